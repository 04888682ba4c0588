use super::{OptimizationPass, PassEdit};
use crate::tensors::Tensor;

/// Reorders tensors by leading dimension, smallest first.
///
/// The sort is stable, so tensors with equal leading dimensions keep their
/// relative order. Scalars sort as if their leading dimension were 1.
#[derive(Debug, Clone, Copy, Default)]
pub struct LatencyReductionPass;

impl OptimizationPass for LatencyReductionPass {
    fn name(&self) -> &'static str {
        "latency_reduction"
    }

    fn plan(&self, tensors: &[Tensor]) -> Vec<PassEdit> {
        let mut order: Vec<usize> = (0..tensors.len()).collect();
        order.sort_by_key(|&i| tensors[i].leading_dim());
        if order.iter().enumerate().all(|(j, &i)| i == j) {
            return Vec::new();
        }
        vec![PassEdit::Reorder(order)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::passes::TensorSet;

    fn tagged(rows: usize, tag: f32) -> Tensor {
        Tensor::new(vec![rows, 1], vec![tag; rows])
    }

    #[test]
    fn sorts_by_leading_dim_stably() {
        let mut set = TensorSet::from(vec![
            tagged(3, 0.0),
            tagged(1, 1.0),
            tagged(3, 2.0),
            tagged(2, 3.0),
        ]);
        set.apply_pass(&LatencyReductionPass);
        let order: Vec<_> = set.tensors().iter().map(|t| (t.leading_dim(), t[0])).collect();
        assert_eq!(order, [(1, 1.0), (2, 3.0), (3, 0.0), (3, 2.0)]);
    }

    #[test]
    fn scalars_count_as_one() {
        let scalar = Tensor::new(Vec::<usize>::new(), vec![5.0]);
        let tensors = [tagged(2, 0.0), scalar.clone()];
        let mut set = TensorSet::from(tensors.to_vec());
        set.apply_pass(&LatencyReductionPass);
        assert_eq!(set.tensors()[0], scalar);
    }

    #[test]
    fn sorted_input_needs_no_edits() {
        assert!(LatencyReductionPass.plan(&[tagged(1, 0.0), tagged(2, 0.0)]).is_empty());
        assert!(LatencyReductionPass.plan(&[]).is_empty());
    }
}
