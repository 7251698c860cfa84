//! Geometry types shared by the batching core and the render job.
//!
//! Canonical CPU space:
//! - Logical pixels scaled to device pixels by the render job
//! - Origin top-left, +X right, +Y down
//!
//! Types that are uploaded as uniforms (`ColorRgba`, `Mat4`) are `#[repr(C)]`
//! and `bytemuck::Pod` so their bytes can be compared and copied directly.

mod color;
mod matrix;
mod rect;
mod rounded_rect;
mod vec2;
mod viewport;

pub use color::ColorRgba;
pub use matrix::Mat4;
pub use rect::Rect;
pub use rounded_rect::RoundedRect;
pub use vec2::Vec2;
pub use viewport::Viewport;
