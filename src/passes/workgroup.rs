use super::{OptimizationPass, PassEdit};
use crate::tensors::Tensor;

/// Workgroup width the 1-D GPU kernels are launched with.
pub const DEFAULT_ALIGNMENT: usize = 64;

/// Pads 1-D tensors with zeros up to a multiple of the GPU workgroup width so
/// that no workgroup runs partially idle.
///
/// Tensors of any other rank are left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkGroupSizeOptimization {
    alignment: usize,
}

impl Default for WorkGroupSizeOptimization {
    fn default() -> Self {
        Self {
            alignment: DEFAULT_ALIGNMENT,
        }
    }
}

impl WorkGroupSizeOptimization {
    /// # Panics
    /// Panics if `alignment` is zero.
    pub fn with_alignment(alignment: usize) -> Self {
        assert!(alignment > 0, "alignment must be positive");
        Self { alignment }
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }

    fn pad(&self, tensor: &Tensor) -> Option<Tensor> {
        let len = match tensor.shape() {
            [len] if len % self.alignment != 0 => *len,
            _ => return None,
        };
        let padded = len.next_multiple_of(self.alignment);
        let mut data = Vec::with_capacity(padded);
        data.extend_from_slice(tensor.data());
        data.resize(padded, 0.0);
        Some(Tensor::new(vec![padded], data))
    }
}

impl OptimizationPass for WorkGroupSizeOptimization {
    fn name(&self) -> &'static str {
        "workgroup_size"
    }

    fn plan(&self, tensors: &[Tensor]) -> Vec<PassEdit> {
        tensors
            .iter()
            .enumerate()
            .filter_map(|(i, t)| self.pad(t).map(|p| PassEdit::Replace(i, p)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::passes::TensorSet;

    #[test]
    fn pads_to_next_multiple() {
        let data: Vec<f32> = (1..=100).map(|i| i as f32).collect();
        let mut set = TensorSet::from(vec![Tensor::new(vec![100], data.clone())]);
        set.apply_pass(&WorkGroupSizeOptimization::default());

        let t = &set.tensors()[0];
        assert_eq!(t.shape(), &[128]);
        assert_eq!(&t.data()[..100], data.as_slice());
        assert!(t.data()[100..].iter().all(|&x| x == 0.0));
    }

    #[test]
    fn aligned_and_multidimensional_tensors_are_kept() {
        let tensors = [Tensor::zeros(vec![128]), Tensor::zeros(vec![3, 5])];
        assert!(WorkGroupSizeOptimization::default().plan(&tensors).is_empty());
    }

    #[test]
    fn custom_alignment() {
        let pass = WorkGroupSizeOptimization::with_alignment(16);
        let edits = pass.plan(&[Tensor::zeros(vec![64]), Tensor::zeros(vec![17])]);
        assert_eq!(edits.len(), 1);
        match &edits[0] {
            PassEdit::Replace(1, t) => assert_eq!(t.len(), 32),
            other => panic!("unexpected edit {other:?}"),
        }
    }
}
