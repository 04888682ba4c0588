//! Devices and the process-wide device policy.
//!
//! [`Device`] names where an op runs. [`DevicePolicy`] lets an application
//! pin every scheduling decision to one side, which is handy for benchmarks
//! and for reproducing CPU-only numerics on a machine that has a GPU.
//!
//! The policy is stored globally using an `AtomicU8`, enabling fast
//! switching at runtime without threading a setting through every call.

use core::convert::TryFrom;
use core::sync::atomic::{AtomicU8, Ordering};

/// Execution device for a single op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Device {
    /// Vectorized CPU kernels (default).
    #[default]
    Cpu = 0,
    /// Compute shaders dispatched through `wgpu`.
    Gpu = 1,
}

impl core::fmt::Display for Device {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Cpu => f.write_str("cpu"),
            Self::Gpu => f.write_str("gpu"),
        }
    }
}

/// Override applied on top of the scheduler heuristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum DevicePolicy {
    /// Let the scheduler decide (default).
    #[default]
    Auto = 0,
    /// Always run on the CPU.
    ForceCpu = 1,
    /// Run on the GPU whenever one is discoverable.
    ForceGpu = 2,
}

impl TryFrom<u8> for DevicePolicy {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Auto),
            1 => Ok(Self::ForceCpu),
            2 => Ok(Self::ForceGpu),
            other => Err(other),
        }
    }
}

/// Relaxed-enough ordering: the policy changes rarely and never mid-op.
static GLOBAL_DEVICE_POLICY: AtomicU8 = AtomicU8::new(DevicePolicy::Auto as u8);

/// Sets the process-wide device policy.
///
/// # Example
///
/// ```
/// use annof::backend::{set_device_policy, get_device_policy, DevicePolicy};
/// set_device_policy(DevicePolicy::ForceCpu);
/// assert_eq!(get_device_policy(), DevicePolicy::ForceCpu);
/// set_device_policy(DevicePolicy::Auto);
/// ```
pub fn set_device_policy(policy: DevicePolicy) {
    GLOBAL_DEVICE_POLICY.store(policy as u8, Ordering::Release);
}

/// Returns the process-wide device policy.
///
/// If the stored value is invalid, defaults to [`DevicePolicy::Auto`].
pub fn get_device_policy() -> DevicePolicy {
    DevicePolicy::try_from(GLOBAL_DEVICE_POLICY.load(Ordering::Acquire)).unwrap_or_default()
}
