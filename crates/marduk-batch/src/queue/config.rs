use crate::buffer::MIN_SHADOW_BUFFERS;
use crate::driver::ClearBits;

/// Command queue configuration.
///
/// Defaults reproduce the standard behavior; tests and embedders override
/// individual fields with struct update syntax.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// GPU vertex buffers rotated between executes. Must be at least 2.
    pub shadow_buffers: usize,

    /// Vertices reserved up front, host and GPU side.
    pub reserved_vertices: usize,

    /// Fold compatible draw batches into their predecessor.
    pub merge_batches: bool,

    /// Buffers cleared by `clear(ClearBits::empty())`.
    pub default_clear_bits: ClearBits,

    /// Forward debug groups to the driver during execute.
    ///
    /// Recording always tracks them; this only controls emission.
    pub debug_groups: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            shadow_buffers: MIN_SHADOW_BUFFERS,
            reserved_vertices: 1024,
            merge_batches: true,
            default_clear_bits: ClearBits::ALL,
            debug_groups: cfg!(debug_assertions),
        }
    }
}
