//! Command recording and execution.
//!
//! Rendering code records clears, debug groups and draws into a
//! [`CommandQueue`] during a frame, then calls `execute` to replay them on the
//! driver with redundant state changes removed and compatible draws merged.

mod batch;
mod command_queue;
mod config;
mod execute;

pub use command_queue::{CommandQueue, RenderTarget};
pub use config::QueueConfig;
pub use execute::ExecuteStats;
