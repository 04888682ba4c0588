//! Utilities to approximate equality of floating point values.
//!
//! Blocked and vectorized kernels sum in a different order from the scalar
//! baselines, so their results are compared with a tolerance instead of `==`.

/// Absolute tolerance for elementwise kernels.
pub const F32_ABS_ERROR: f32 = 1e-6;

/// Relative tolerance for reductions such as matmul.
pub const F32_REL_ERROR: f32 = 1e-5;

/// The approximated equality enumerated.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ApproxEquality {
    /// Bit-identical.
    Exact = 0,
    /// Within the requested tolerance.
    Close = 1,
    /// Outside the tolerance, or a length mismatch.
    Distinct = 2,
}

/// Checks closeness of two values or two sequences of values.
pub trait ApproxEq<Rhs: ?Sized = Self> {
    /// `|a - b| <= tol`.
    fn approx_abs(&self, rhs: &Rhs, tol: f32) -> ApproxEquality;

    /// `|a - b| <= tol * max(|a|, |b|, 1)`.
    ///
    /// The `1` floor keeps values near zero from demanding impossible
    /// precision after cancellation.
    fn approx_rel(&self, rhs: &Rhs, tol: f32) -> ApproxEquality;
}

fn classify(a: f32, b: f32, bound: f32) -> ApproxEquality {
    if a.to_bits() == b.to_bits() {
        ApproxEquality::Exact
    } else if (a - b).abs() <= bound {
        ApproxEquality::Close
    } else {
        ApproxEquality::Distinct
    }
}

impl ApproxEq for f32 {
    fn approx_abs(&self, rhs: &Self, tol: f32) -> ApproxEquality {
        classify(*self, *rhs, tol)
    }

    fn approx_rel(&self, rhs: &Self, tol: f32) -> ApproxEquality {
        let scale = self.abs().max(rhs.abs()).max(1.0);
        classify(*self, *rhs, tol * scale)
    }
}

impl ApproxEq for [f32] {
    fn approx_abs(&self, rhs: &Self, tol: f32) -> ApproxEquality {
        fold(self, rhs, |a, b| a.approx_abs(b, tol))
    }

    fn approx_rel(&self, rhs: &Self, tol: f32) -> ApproxEquality {
        fold(self, rhs, |a, b| a.approx_rel(b, tol))
    }
}

fn fold(a: &[f32], b: &[f32], f: impl Fn(&f32, &f32) -> ApproxEquality) -> ApproxEquality {
    if a.len() != b.len() {
        return ApproxEquality::Distinct;
    }
    let mut eq = ApproxEquality::Exact;
    for (x, y) in a.iter().zip(b) {
        eq = eq.max(f(x, y));
        if eq == ApproxEquality::Distinct {
            break;
        }
    }
    eq
}

/// Index and values of the first pair outside absolute tolerance `tol`.
pub fn first_abs_mismatch(a: &[f32], b: &[f32], tol: f32) -> Option<(usize, f32, f32)> {
    a.iter()
        .zip(b)
        .position(|(x, y)| x.approx_abs(y, tol) == ApproxEquality::Distinct)
        .map(|i| (i, a[i], b[i]))
}

/// Index and values of the first pair outside relative tolerance `tol`.
pub fn first_rel_mismatch(a: &[f32], b: &[f32], tol: f32) -> Option<(usize, f32, f32)> {
    a.iter()
        .zip(b)
        .position(|(x, y)| x.approx_rel(y, tol) == ApproxEquality::Distinct)
        .map(|i| (i, a[i], b[i]))
}

/// True when `a` and `b` agree within [`F32_ABS_ERROR`].
pub fn approx_eq(a: &[f32], b: &[f32]) -> bool {
    a.approx_abs(b, F32_ABS_ERROR) != ApproxEquality::Distinct
}

/// True when `a` and `b` agree within [`F32_REL_ERROR`] relative tolerance.
pub fn approx_eq_rel(a: &[f32], b: &[f32]) -> bool {
    a.approx_rel(b, F32_REL_ERROR) != ApproxEquality::Distinct
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_slices_are_exact() {
        assert_eq!([1.0f32, 2.0][..].approx_abs(&[1.0, 2.0][..], 0.0), ApproxEquality::Exact);
    }

    #[test]
    fn relative_tolerance_scales_with_magnitude() {
        assert_eq!(1000.0f32.approx_rel(&1000.005, 1e-5), ApproxEquality::Close);
        assert_eq!(1000.0f32.approx_abs(&1000.005, 1e-5), ApproxEquality::Distinct);
    }

    #[test]
    fn length_mismatch_is_distinct() {
        assert!(!approx_eq(&[1.0, 2.0], &[1.0]));
    }

    #[test]
    fn mismatch_reports_first_offender() {
        let a = [0.0, 1.0, 2.0];
        let b = [0.0, 1.5, 2.5];
        assert_eq!(first_abs_mismatch(&a, &b, 1e-3), Some((1, 1.0, 1.5)));
        assert_eq!(first_rel_mismatch(&a, &a, 1e-5), None);
    }
}
