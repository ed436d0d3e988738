// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Construction-time configuration for a [`crate::CopyEngine`].

use crate::imp::CopyAlignment;

const FRAME_ROW_BYTES: u64 = 1920 * 4;

/**
One 1080p RGBA8 frame, plus the slack a texture reservation carries on a D3D12-style device.

A texture upload reserves its rows plus one row pitch and five placement paddings, so that it
fits wherever the ring head lands.
*/
pub const DEFAULT_STAGING_CAPACITY: u64 =
    FRAME_ROW_BYTES * 1080 + FRAME_ROW_BYTES + 5 * CopyAlignment::D3D12.placement;

pub const DEFAULT_REGISTRY_CAPACITY: usize = 100;

/// Controls when staging bytes return to the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReclaimPolicy {
    /// Bytes of task `t` are released once its fence is reached, before
    /// [`crate::CopyEngine::execute_count`] advances past `t`.
    #[default]
    OnCompletion,
    /// Bytes are never released. Sustained uploads eventually report
    /// [`crate::ArenaError::CapacityExceeded`] until the arena is grown.
    Never,
}

/// Configuration for [`crate::CopyEngine::new`].
///
/// # Examples
///
/// ```
/// use staging_copies::{EngineConfig, ReclaimPolicy};
///
/// let config = EngineConfig {
///     staging_capacity: 64 * 1024,
///     reclaim: ReclaimPolicy::Never,
///     ..EngineConfig::default()
/// };
/// assert_eq!(config.initial_registry_capacity, 100);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Size of the staging ring in bytes. Rounded up to the device's arena granularity.
    pub staging_capacity: u64,
    /// Number of task slots allocated up front. The registry grows on demand.
    pub initial_registry_capacity: usize,
    pub reclaim: ReclaimPolicy,
    /// Name of the copy worker thread.
    pub worker_name: String,
    /// Label passed to device objects.
    pub debug_label: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            staging_capacity: DEFAULT_STAGING_CAPACITY,
            initial_registry_capacity: DEFAULT_REGISTRY_CAPACITY,
            reclaim: ReclaimPolicy::default(),
            worker_name: "staging_copies".to_string(),
            debug_label: "staging_copies".to_string(),
        }
    }
}
