use super::{OptimizationPass, PassEdit};
use crate::tensors::Tensor;

/// Fuses the first adjacent pair of equal-shape tensors into their elementwise
/// sum, halving the memory they hold.
///
/// Only one pair is fused per application; run the pass again to fuse more.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryReductionPass;

impl OptimizationPass for MemoryReductionPass {
    fn name(&self) -> &'static str {
        "memory_reduction"
    }

    fn plan(&self, tensors: &[Tensor]) -> Vec<PassEdit> {
        let Some(i) = tensors
            .windows(2)
            .position(|w| w[0].shape() == w[1].shape())
        else {
            return Vec::new();
        };
        let fused = &tensors[i] + &tensors[i + 1];
        vec![PassEdit::Replace(i, fused), PassEdit::Remove(i + 1)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::passes::TensorSet;

    #[test]
    fn fuses_first_adjacent_pair() {
        let mut set = TensorSet::from(vec![
            Tensor::new(vec![4], vec![1.0, 2.0, 3.0, 4.0]),
            Tensor::new(vec![4], vec![10.0, 20.0, 30.0, 40.0]),
            Tensor::zeros(vec![8]),
        ]);
        set.apply_pass(&MemoryReductionPass);
        assert_eq!(set.len(), 2);
        assert_eq!(set.tensors()[0].data(), &[11.0, 22.0, 33.0, 44.0]);
        assert_eq!(set.tensors()[1].shape(), &[8]);
    }

    #[test]
    fn one_fusion_per_call() {
        let mut set = TensorSet::from(vec![Tensor::new(vec![2], vec![1.0, 1.0]); 4]);
        set.apply_pass(&MemoryReductionPass);
        assert_eq!(set.len(), 3);
        assert_eq!(set.tensors()[0].data(), &[2.0, 2.0]);
        assert_eq!(set.tensors()[1].data(), &[1.0, 1.0]);
    }

    #[test]
    fn non_adjacent_equal_shapes_are_left_alone() {
        let original = vec![
            Tensor::zeros(vec![4]),
            Tensor::zeros(vec![8]),
            Tensor::zeros(vec![4]),
        ];
        let mut set = TensorSet::from(original.clone());
        assert_eq!(set.apply_pass(&MemoryReductionPass), 0);
        assert_eq!(set.into_tensors(), original);
    }

    #[test]
    fn empty_and_single_sets() {
        assert!(MemoryReductionPass.plan(&[]).is_empty());
        assert!(MemoryReductionPass.plan(&[Tensor::zeros(vec![3])]).is_empty());
    }
}
