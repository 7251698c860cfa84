//! Marduk command batching core.
//!
//! Rendering is recorded into a [`CommandQueue`] as batches (draws, clears,
//! debug groups), each carrying only the texture binds and uniform values
//! that changed since the previous one. `execute` replays the batches
//! through a [`Driver`], merging compatible neighbours into single draws.
//!
//! [`render::RenderJob`] is a thin node-tree front end; the wgpu backend
//! lives in [`driver::WgpuDriver`].

pub mod buffer;
pub mod coords;
pub mod driver;
pub mod error;
pub mod logging;
pub mod program;
pub mod queue;
pub mod render;
pub mod state;

pub use driver::Driver;
pub use error::{BatchError, Result};
pub use program::Program;
pub use queue::{CommandQueue, ExecuteStats, QueueConfig, RenderTarget};
