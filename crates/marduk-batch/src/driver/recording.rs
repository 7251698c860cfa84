use std::collections::HashMap;

use crate::coords::Viewport;
use crate::state::{UniformFlags, UniformFormat};

use super::{
    BufferId, ClearBits, Driver, DriverLimits, FramebufferId, FramebufferStatus, ProgramId,
    TextureFilters, TextureId, TextureTarget, TextureUnit, UniformUpload,
};

/// One call received by a [`RecordingDriver`].
#[derive(Debug, Clone, PartialEq)]
pub enum DriverCall {
    BeginExecute,
    EndExecute,
    CreateTexture { id: TextureId, width: u32, height: u32, filters: TextureFilters },
    UploadTexture { id: TextureId, width: u32, height: u32, len: usize },
    DeleteTextures(Vec<TextureId>),
    CreateFramebuffer(FramebufferId),
    AttachTexture { framebuffer: FramebufferId, texture: TextureId },
    DeleteFramebuffers(Vec<FramebufferId>),
    CreateBuffer { id: BufferId, size: usize },
    UploadBuffer { id: BufferId, data: Vec<u8> },
    DeleteBuffer(BufferId),
    DeleteProgram(ProgramId),
    BindFramebuffer(FramebufferId),
    BindTexture { unit: TextureUnit, target: TextureTarget, id: TextureId },
    BindVertexBuffer(BufferId),
    UseProgram(ProgramId),
    SetUniform {
        program: ProgramId,
        location: u32,
        format: UniformFormat,
        array_count: u8,
        flags: UniformFlags,
        data: Vec<u8>,
    },
    SetViewport(Viewport),
    Clear(ClearBits),
    DrawArrays { first: u32, count: u32 },
    PushDebugGroup(String),
    PopDebugGroup,
}

/// Driver that performs no GPU work and records every call in order.
///
/// Used to observe exactly what the command queue emits. Resource ids are
/// handed out from per-kind counters starting at 1.
#[derive(Debug)]
pub struct RecordingDriver {
    calls: Vec<DriverCall>,
    limits: DriverLimits,
    framebuffer_status: FramebufferStatus,
    uniform_locations: HashMap<(ProgramId, String), u32>,
    next_texture: u32,
    next_framebuffer: u32,
    next_buffer: u32,
}

impl Default for RecordingDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingDriver {
    pub fn new() -> Self {
        Self {
            calls: Vec::new(),
            limits: DriverLimits::default(),
            framebuffer_status: FramebufferStatus::Complete,
            uniform_locations: HashMap::new(),
            next_texture: 1,
            next_framebuffer: 1,
            next_buffer: 1,
        }
    }

    pub fn with_max_texture_size(mut self, max: u32) -> Self {
        self.limits.max_texture_size = max;
        self
    }

    /// Status reported by every subsequent `attach_texture`.
    pub fn with_framebuffer_status(mut self, status: FramebufferStatus) -> Self {
        self.framebuffer_status = status;
        self
    }

    /// Makes `uniform_location(program, name)` resolve to `location`.
    pub fn register_uniform(&mut self, program: ProgramId, name: &str, location: u32) {
        self.uniform_locations.insert((program, name.to_owned()), location);
    }

    pub fn calls(&self) -> &[DriverCall] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    pub fn count(&self, pred: impl Fn(&DriverCall) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }

    pub fn draws(&self) -> Vec<(u32, u32)> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                DriverCall::DrawArrays { first, count } => Some((*first, *count)),
                _ => None,
            })
            .collect()
    }
}

impl Driver for RecordingDriver {
    fn limits(&self) -> DriverLimits {
        self.limits
    }

    fn begin_execute(&mut self) {
        self.calls.push(DriverCall::BeginExecute);
    }

    fn end_execute(&mut self) {
        self.calls.push(DriverCall::EndExecute);
    }

    fn create_texture(&mut self, width: u32, height: u32, filters: TextureFilters) -> TextureId {
        let id = TextureId(self.next_texture);
        self.next_texture += 1;
        self.calls.push(DriverCall::CreateTexture { id, width, height, filters });
        id
    }

    fn upload_texture(&mut self, texture: TextureId, width: u32, height: u32, rgba: &[u8]) {
        self.calls.push(DriverCall::UploadTexture { id: texture, width, height, len: rgba.len() });
    }

    fn delete_textures(&mut self, textures: &[TextureId]) {
        self.calls.push(DriverCall::DeleteTextures(textures.to_vec()));
    }

    fn create_framebuffer(&mut self) -> FramebufferId {
        let id = FramebufferId(self.next_framebuffer);
        self.next_framebuffer += 1;
        self.calls.push(DriverCall::CreateFramebuffer(id));
        id
    }

    fn attach_texture(&mut self, framebuffer: FramebufferId, texture: TextureId) -> FramebufferStatus {
        self.calls.push(DriverCall::AttachTexture { framebuffer, texture });
        self.framebuffer_status
    }

    fn delete_framebuffers(&mut self, framebuffers: &[FramebufferId]) {
        self.calls.push(DriverCall::DeleteFramebuffers(framebuffers.to_vec()));
    }

    fn create_buffer(&mut self, size: usize) -> BufferId {
        let id = BufferId(self.next_buffer);
        self.next_buffer += 1;
        self.calls.push(DriverCall::CreateBuffer { id, size });
        id
    }

    fn upload_buffer(&mut self, buffer: BufferId, data: &[u8]) {
        self.calls.push(DriverCall::UploadBuffer { id: buffer, data: data.to_vec() });
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        self.calls.push(DriverCall::DeleteBuffer(buffer));
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.calls.push(DriverCall::DeleteProgram(program));
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<u32> {
        self.uniform_locations.get(&(program, name.to_owned())).copied()
    }

    fn bind_framebuffer(&mut self, framebuffer: FramebufferId) {
        self.calls.push(DriverCall::BindFramebuffer(framebuffer));
    }

    fn bind_texture(&mut self, unit: TextureUnit, target: TextureTarget, texture: TextureId) {
        self.calls.push(DriverCall::BindTexture { unit, target, id: texture });
    }

    fn bind_vertex_buffer(&mut self, buffer: BufferId) {
        self.calls.push(DriverCall::BindVertexBuffer(buffer));
    }

    fn use_program(&mut self, program: ProgramId) {
        self.calls.push(DriverCall::UseProgram(program));
    }

    fn set_uniform(&mut self, program: ProgramId, upload: &UniformUpload<'_>) {
        self.calls.push(DriverCall::SetUniform {
            program,
            location: upload.location,
            format: upload.format,
            array_count: upload.array_count,
            flags: upload.flags,
            data: upload.data.to_vec(),
        });
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.calls.push(DriverCall::SetViewport(viewport));
    }

    fn clear(&mut self, bits: ClearBits) {
        self.calls.push(DriverCall::Clear(bits));
    }

    fn draw_arrays(&mut self, first: u32, count: u32) {
        self.calls.push(DriverCall::DrawArrays { first, count });
    }

    fn push_debug_group(&mut self, label: &str) {
        self.calls.push(DriverCall::PushDebugGroup(label.to_owned()));
    }

    fn pop_debug_group(&mut self) {
        self.calls.push(DriverCall::PopDebugGroup);
    }
}
