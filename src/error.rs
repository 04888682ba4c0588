//! Error types shared by every backend.
//!
//! Shape errors are contract violations and are always reported before any
//! output element is written. GPU errors are split into "no device at all"
//! ([`TensorError::GpuUnavailable`]) and "device found, but something in the
//! pipeline broke" ([`TensorError::GpuBackend`]) so callers can route on the
//! former and fall back on the latter.

use thiserror::Error;

/// Result type for tensor operations.
pub type TensorResult<T> = Result<T, TensorError>;

/// Stage of the GPU pipeline in which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuStage {
    /// Device and queue creation.
    Context,
    /// Shader compilation or pipeline creation.
    Build,
    /// Buffer binding, dispatch and submission.
    Enqueue,
    /// Mapping the staging buffer back to the host.
    ReadBack,
}

impl core::fmt::Display for GpuStage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Self::Context => "context",
            Self::Build => "build",
            Self::Enqueue => "enqueue",
            Self::ReadBack => "read-back",
        };
        f.write_str(name)
    }
}

/// Error types for tensor operations.
#[derive(Debug, Error)]
pub enum TensorError {
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("matmul inner dimensions disagree: lhs is {lhs:?}, rhs is {rhs:?}")]
    InnerDimMismatch { lhs: Vec<usize>, rhs: Vec<usize> },

    #[error("invalid shape {shape:?}: {reason}")]
    InvalidShape { shape: Vec<usize>, reason: String },

    #[error("no GPU-class device is available")]
    GpuUnavailable,

    #[error("GPU backend failure during {stage}: {message}")]
    GpuBackend { stage: GpuStage, message: String },
}

impl TensorError {
    pub(crate) fn gpu(stage: GpuStage, message: impl Into<String>) -> Self {
        Self::GpuBackend {
            stage,
            message: message.into(),
        }
    }

    /// Whether this error came from the GPU path and may be recovered by
    /// rerunning the op on the CPU.
    pub fn is_gpu_failure(&self) -> bool {
        matches!(self, Self::GpuUnavailable | Self::GpuBackend { .. })
    }
}
