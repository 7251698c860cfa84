//! Graphics driver boundary.
//!
//! The command queue never talks to a GPU API directly. Everything it needs
//! (resource creation, binding, uniform upload, draws) goes through the
//! [`Driver`] trait, so the batching logic can run against the wgpu backend
//! or the call-recording backend used by tests.

mod recording;
mod types;
mod wgpu_driver;

pub use recording::{DriverCall, RecordingDriver};
pub use types::{
    BufferId, ClearBits, DrawVertex, DriverLimits, FilterMode, FramebufferId, FramebufferStatus,
    ProgramId, TextureFilters, TextureId, TextureTarget, TextureUnit, UniformUpload,
    MAX_DRAW_VERTICES, MAX_TEXTURE_UNITS, MAX_UNIFORM_ARRAY_LEN, MAX_UNIFORM_LOCATIONS,
    QUAD_VERTICES,
};
pub use wgpu_driver::{WgpuDriver, WgpuDriverInit, WgpuProgramDesc};

use crate::coords::Viewport;

/// Immediate-mode graphics API consumed by the command queue.
///
/// Binding calls change driver state that later draws and clears observe,
/// mirroring a GL-style state machine. Implementations are not expected to
/// deduplicate; the queue only issues calls it considers necessary.
pub trait Driver {
    /// Queried once per queue.
    fn limits(&self) -> DriverLimits;

    /// Brackets one `CommandQueue::execute` call.
    fn begin_execute(&mut self);
    fn end_execute(&mut self);

    // ── resources ─────────────────────────────────────────────────────────

    fn create_texture(&mut self, width: u32, height: u32, filters: TextureFilters) -> TextureId;
    /// Replaces the full contents of `texture` with tightly packed RGBA8 rows.
    fn upload_texture(&mut self, texture: TextureId, width: u32, height: u32, rgba: &[u8]);
    fn delete_textures(&mut self, textures: &[TextureId]);

    fn create_framebuffer(&mut self) -> FramebufferId;
    /// Attaches `texture` as the single color attachment of `framebuffer`.
    fn attach_texture(&mut self, framebuffer: FramebufferId, texture: TextureId) -> FramebufferStatus;
    fn delete_framebuffers(&mut self, framebuffers: &[FramebufferId]);

    /// Allocates a vertex buffer of `size` bytes.
    fn create_buffer(&mut self, size: usize) -> BufferId;
    /// Writes `data` at offset 0. `data` never exceeds the buffer size.
    fn upload_buffer(&mut self, buffer: BufferId, data: &[u8]);
    fn delete_buffer(&mut self, buffer: BufferId);

    fn delete_program(&mut self, program: ProgramId);
    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<u32>;

    // ── state ─────────────────────────────────────────────────────────────

    fn bind_framebuffer(&mut self, framebuffer: FramebufferId);
    fn bind_texture(&mut self, unit: TextureUnit, target: TextureTarget, texture: TextureId);
    fn bind_vertex_buffer(&mut self, buffer: BufferId);
    fn use_program(&mut self, program: ProgramId);
    /// Applies to the currently used program.
    fn set_uniform(&mut self, program: ProgramId, upload: &UniformUpload<'_>);
    fn set_viewport(&mut self, viewport: Viewport);

    // ── commands ──────────────────────────────────────────────────────────

    fn clear(&mut self, bits: ClearBits);
    /// Draws `count` vertices of the bound vertex buffer as a triangle list.
    fn draw_arrays(&mut self, first: u32, count: u32);
    fn push_debug_group(&mut self, label: &str);
    fn pop_debug_group(&mut self);
}
