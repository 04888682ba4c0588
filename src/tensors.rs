//! Core tensor data structure.
//!
//! # Dense Tensors
//!
//! A [`Tensor`] is a fixed-shape, row-major buffer of `f32`. It owns its data
//! exclusively; cloning performs a full deep copy.
//!
//! ## Design Highlights
//! - Shape is stored as a `Vec<usize>` and enforced at construction time
//! - Fields are private: element values can change, length and shape cannot
//! - Elementwise arithmetic requires identical shapes; there is no broadcasting
//! - The `tensor!` macro supports ergonomic construction from nested arrays
//!
//! ## Example
//!
//! ```rust
//! use annof::tensors::Tensor;
//! let t = Tensor::new(vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
//! assert_eq!(t.shape(), &[2, 3]);
//! assert_eq!(t[4], 5.0);
//! ```

use crate::error::{TensorError, TensorResult};
use core::ops::{Add, Div, Index, IndexMut, Mul, Sub};

/// An N-dimensional tensor of `f32` with a flat row-major buffer.
///
/// - `shape` defines the structure, e.g. `[2, 3]` for a 2×3 matrix.
/// - `data` holds `product(shape)` elements in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

/// `product(shape)`, or an error when it does not fit a `usize`.
fn element_count(shape: &[usize]) -> TensorResult<usize> {
    shape
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| TensorError::InvalidShape {
            shape: shape.to_vec(),
            reason: "element count overflows usize".into(),
        })
}

fn check_shape(shape: &[usize], len: usize) -> TensorResult<()> {
    if shape.contains(&0) {
        return Err(TensorError::InvalidShape {
            shape: shape.to_vec(),
            reason: "dimensions must be positive".into(),
        });
    }
    let expected = element_count(shape)?;
    if expected != len {
        return Err(TensorError::InvalidShape {
            shape: shape.to_vec(),
            reason: format!("expected {expected} elements, got {len}"),
        });
    }
    Ok(())
}

impl Tensor {
    /// Creates a new tensor with the given shape and flat data.
    ///
    /// # Panics
    /// Panics if a dimension is zero or the number of elements in `data` does
    /// not match the shape product.
    pub fn new(shape: impl Into<Vec<usize>>, data: Vec<f32>) -> Self {
        match Self::try_new(shape, data) {
            Ok(t) => t,
            Err(e) => panic!("{e}"),
        }
    }

    /// Fallible form of [`Tensor::new`].
    pub fn try_new(shape: impl Into<Vec<usize>>, data: Vec<f32>) -> TensorResult<Self> {
        let shape = shape.into();
        check_shape(&shape, data.len())?;
        Ok(Self { shape, data })
    }

    /// Creates a zero-filled tensor.
    ///
    /// # Panics
    /// Panics if a dimension is zero or the element count overflows `usize`.
    pub fn zeros(shape: impl Into<Vec<usize>>) -> Self {
        let shape = shape.into();
        match element_count(&shape) {
            Ok(len) => Self::new(shape, vec![0.0; len]),
            Err(e) => panic!("{e}"),
        }
    }

    /// Creates a tensor by copying `data`.
    ///
    /// # Panics
    /// Same conditions as [`Tensor::new`].
    pub fn from_slice(shape: impl Into<Vec<usize>>, data: &[f32]) -> Self {
        Self::new(shape, data.to_vec())
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Mutable view of the elements. The length cannot change through it.
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Consumes the tensor, returning its buffer.
    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    /// Total number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Always `false`: dimensions are positive, so a tensor holds at least
    /// one element.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Size of the first dimension; a scalar counts as `1`.
    pub fn leading_dim(&self) -> usize {
        self.shape.first().copied().unwrap_or(1)
    }

    /// `(rows, cols)` of a rank-2 tensor.
    pub fn matrix_dims(&self) -> TensorResult<(usize, usize)> {
        match self.shape[..] {
            [rows, cols] => Ok((rows, cols)),
            _ => Err(TensorError::InvalidShape {
                shape: self.shape.clone(),
                reason: "expected a rank-2 tensor".into(),
            }),
        }
    }

    pub fn get(&self, index: usize) -> Option<f32> {
        self.data.get(index).copied()
    }

    /// Writes `value` at linear `index`.
    ///
    /// # Panics
    /// Panics if `index >= self.len()`.
    pub fn set(&mut self, index: usize, value: f32) {
        self.data[index] = value;
    }

    /// Returns `Ok(())` when both tensors have the same shape.
    pub fn expect_same_shape(&self, other: &Self) -> TensorResult<()> {
        if self.shape == other.shape {
            Ok(())
        } else {
            Err(TensorError::ShapeMismatch {
                expected: self.shape.clone(),
                actual: other.shape.clone(),
            })
        }
    }

    fn zip_with(&self, rhs: &Self, f: impl Fn(f32, f32) -> f32) -> TensorResult<Self> {
        self.expect_same_shape(rhs)?;
        let data = self.data.iter().zip(&rhs.data).map(|(&x, &y)| f(x, y)).collect();
        Ok(Self {
            shape: self.shape.clone(),
            data,
        })
    }

    pub fn try_add(&self, rhs: &Self) -> TensorResult<Self> {
        self.zip_with(rhs, |x, y| x + y)
    }

    pub fn try_sub(&self, rhs: &Self) -> TensorResult<Self> {
        self.zip_with(rhs, |x, y| x - y)
    }

    /// Elementwise product.
    pub fn try_mul(&self, rhs: &Self) -> TensorResult<Self> {
        self.zip_with(rhs, |x, y| x * y)
    }

    pub fn try_div(&self, rhs: &Self) -> TensorResult<Self> {
        self.zip_with(rhs, |x, y| x / y)
    }

    /// Elementwise product, panicking on mismatched shapes.
    pub fn elementwise_multiply(&self, rhs: &Self) -> Self {
        self * rhs
    }
}

macro_rules! impl_elementwise_op {
    ($trait:ident, $method:ident, $checked:ident) => {
        impl $trait for &Tensor {
            type Output = Tensor;

            /// # Panics
            /// Panics if the operand shapes differ.
            fn $method(self, rhs: &Tensor) -> Tensor {
                match self.$checked(rhs) {
                    Ok(t) => t,
                    Err(e) => panic!("{e}"),
                }
            }
        }

        impl $trait for Tensor {
            type Output = Tensor;

            fn $method(self, rhs: Tensor) -> Tensor {
                (&self).$method(&rhs)
            }
        }
    };
}

impl_elementwise_op!(Add, add, try_add);
impl_elementwise_op!(Sub, sub, try_sub);
impl_elementwise_op!(Mul, mul, try_mul);
impl_elementwise_op!(Div, div, try_div);

impl Index<usize> for Tensor {
    type Output = f32;

    fn index(&self, index: usize) -> &f32 {
        &self.data[index]
    }
}

impl IndexMut<usize> for Tensor {
    fn index_mut(&mut self, index: usize) -> &mut f32 {
        &mut self.data[index]
    }
}

/// Defines a tensor from nested literal arrays.
///
/// Supports arbitrary dimensionality as long as sublists are uniform in shape.
///
/// # Example
/// ```
/// use annof::tensor;
/// let t = tensor!([[1.0, 2.0], [3.0, 4.0]]);
/// assert_eq!(t.shape(), &[2, 2]);
/// ```
#[macro_export]
macro_rules! tensor {
    ($lit:literal) => {
        $crate::tensors::Tensor::new(Vec::<usize>::new(), vec![$lit as f32])
    };

    ([ $( $inner:tt ),+ $(,)? ]) => {{
        let children = vec![ $( $crate::tensor!($inner) ),+ ];
        let first_shape = children[0].shape().to_vec();
        assert!(children.iter().all(|c| c.shape() == first_shape.as_slice()),
            "ragged tensor literal (rows have mismatched shapes)");
        let mut shape = vec![children.len()];
        shape.extend_from_slice(&first_shape);
        let mut data = Vec::with_capacity(children.len() * children[0].len());
        for c in children { data.extend(c.into_data()); }
        $crate::tensors::Tensor::new(shape, data)
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeros_fills_with_zero() {
        let t = Tensor::zeros(vec![3, 2]);
        assert_eq!(t.len(), 6);
        assert!(t.data().iter().all(|&x| x == 0.0));
    }

    #[test]
    fn from_slice_copies_exactly() {
        let src = [1.5, -2.25, 3.0, 1e-7];
        let t = Tensor::from_slice(vec![2, 2], &src);
        assert_eq!(t.data(), &src);
    }

    #[test]
    fn clone_is_deep() {
        let a = Tensor::new(vec![2], vec![1.0, 2.0]);
        let mut b = a.clone();
        b[0] = 9.0;
        assert_eq!(a[0], 1.0);
        assert_eq!(b[0], 9.0);
    }

    #[test]
    fn try_new_rejects_bad_lengths_and_zero_dims() {
        assert!(matches!(
            Tensor::try_new(vec![2, 2], vec![1.0; 3]),
            Err(TensorError::InvalidShape { .. })
        ));
        assert!(matches!(
            Tensor::try_new(vec![2, 0], vec![]),
            Err(TensorError::InvalidShape { .. })
        ));
    }

    #[test]
    fn scalar_shape_holds_one_element() {
        let t = tensor!(4.0);
        assert_eq!(t.rank(), 0);
        assert_eq!(t.len(), 1);
        assert_eq!(t.leading_dim(), 1);
    }

    #[test]
    fn arithmetic_operators_are_elementwise() {
        let a = tensor!([2.0, 4.0, 6.0]);
        let b = tensor!([1.0, 2.0, 3.0]);
        assert_eq!((&a + &b).data(), &[3.0, 6.0, 9.0]);
        assert_eq!((&a - &b).data(), &[1.0, 2.0, 3.0]);
        assert_eq!((&a * &b).data(), &[2.0, 8.0, 18.0]);
        assert_eq!((&a / &b).data(), &[2.0, 2.0, 2.0]);
        assert_eq!(a.elementwise_multiply(&b), &a * &b);
    }

    #[test]
    fn overflowing_shape_is_invalid_not_a_panic() {
        let err = Tensor::try_new(vec![usize::MAX, 2], vec![]).unwrap_err();
        match err {
            TensorError::InvalidShape { shape, reason } => {
                assert_eq!(shape, [usize::MAX, 2]);
                assert!(reason.contains("overflows"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    #[should_panic(expected = "element count overflows usize")]
    fn zeros_with_overflowing_shape_panics_with_invalid_shape() {
        Tensor::zeros(vec![usize::MAX, usize::MAX]);
    }

    #[test]
    fn mismatched_shapes_are_reported() {
        let a = Tensor::zeros(vec![2, 2]);
        let b = Tensor::zeros(vec![4]);
        let err = a.try_add(&b).unwrap_err();
        assert!(matches!(err, TensorError::ShapeMismatch { .. }));
    }

    #[test]
    #[should_panic(expected = "shape mismatch")]
    fn operator_panics_on_mismatch() {
        let _ = Tensor::zeros(vec![3]) + Tensor::zeros(vec![1, 3]);
    }

    #[test]
    fn macro_builds_nested_shapes() {
        let t = tensor!([[[1.0, 2.0]], [[3.0, 4.0]]]);
        assert_eq!(t.shape(), &[2, 1, 2]);
        assert_eq!(t.data(), &[1.0, 2.0, 3.0, 4.0]);
    }
}
