//! Thin render job: walks a node tree and records it into a command queue.
//!
//! Convention:
//! - Node geometry is in logical pixels (top-left origin, +Y down).
//! - Vertices carry job-space positions; the vertex shader applies the
//!   `u_modelview` and `u_projection` uniforms.

mod job;
mod node;

pub use job::{register_shared_uniforms, JobPrograms, RenderJob, UniformKey};
pub use node::RenderNode;
