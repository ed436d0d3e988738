// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Error taxonomy for the upload scheduler.
//!
//! Recoverable conditions are returned to the immediate caller. Device failures
//! observed on the copy worker and caller protocol violations are fatal; see
//! [`fatal`].

use std::panic::Location;

/// Errors from the staging arena.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ArenaError {
    #[error("staging arena exhausted: requested {requested} bytes, {available} available")]
    CapacityExceeded { requested: u64, available: u64 },
    #[error("staging arena capacity must be a nonzero multiple of {granularity}")]
    ZeroCapacity { granularity: u64 },
    #[error("staging arena cannot shrink from {current} to {requested} bytes")]
    CannotShrink { current: u64, requested: u64 },
}

/// Errors reported by a [`crate::imp::CopyBackend`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum DeviceError {
    #[error("device lost")]
    Lost,
    #[error("device out of memory")]
    OutOfMemory,
    #[error("invalid resource state: {0}")]
    InvalidState(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("{0}")]
    Backend(String),
}

#[cfg(feature = "backend_wgpu")]
impl From<wgpu::RequestAdapterError> for DeviceError {
    fn from(e: wgpu::RequestAdapterError) -> Self {
        DeviceError::Backend(e.to_string())
    }
}

#[cfg(feature = "backend_wgpu")]
impl From<wgpu::RequestDeviceError> for DeviceError {
    fn from(e: wgpu::RequestDeviceError) -> Self {
        DeviceError::Backend(e.to_string())
    }
}

#[cfg(feature = "backend_wgpu")]
impl From<wgpu::PollError> for DeviceError {
    fn from(e: wgpu::PollError) -> Self {
        DeviceError::Backend(e.to_string())
    }
}

/// Errors from posting an upload task.
///
/// None of these consume a task id; a failed post leaves the engine untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum PostError {
    #[error("Not enough staging space {0}")]
    CapacityExceeded(#[from] ArenaError),
    #[error("buffer upload of {len} bytes at offset {offset} violates the {alignment} byte copy alignment")]
    MisalignedBuffer { offset: u64, len: u64, alignment: u64 },
    #[error("{layouts} image layouts supplied for {subresources} subresources")]
    LayoutCountMismatch { layouts: usize, subresources: u32 },
    #[error("source holds {actual} bytes but its layouts address {required}")]
    SourceTooSmall { required: u64, actual: u64 },
    #[error("Device error {0}")]
    Device(#[from] DeviceError),
}

/// Errors from constructing or resizing a [`crate::CopyEngine`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum EngineError {
    #[error("Can't create staging arena {0}")]
    Arena(#[from] ArenaError),
    #[error("Can't create copy resources {0}")]
    Device(#[from] DeviceError),
    #[error("Can't spawn copy worker {0}")]
    Spawn(#[from] std::io::Error),
}

/// Reports an unrecoverable failure and panics.
///
/// The message carries the failing operation and the caller's source location.
#[track_caller]
pub(crate) fn fatal(operation: &str, detail: &dyn std::fmt::Display) -> ! {
    let location = Location::caller();
    let detail = detail.to_string();
    logwise::error_sync!(
        "{operation} failed at {location}: {detail}",
        operation = logwise::privacy::LogIt(&operation),
        location = logwise::privacy::LogIt(&location),
        detail = logwise::privacy::LogIt(&detail)
    );
    panic!("{operation} failed at {location}: {detail}");
}
