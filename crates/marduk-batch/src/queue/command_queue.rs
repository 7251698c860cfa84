use crate::buffer::GrowableBuffer;
use crate::coords::{ColorRgba, Mat4, RoundedRect, Viewport};
use crate::driver::{
    ClearBits, DrawVertex, Driver, DriverLimits, FramebufferId, FramebufferStatus, ProgramId,
    TextureFilters, TextureId, TextureTarget, TextureUnit, MAX_DRAW_VERTICES, MAX_TEXTURE_UNITS,
    QUAD_VERTICES,
};
use crate::error::{BatchError, Result};
use crate::state::{AttachmentState, SavedAttachments, UniformState};

use super::batch::{Batch, BatchBind, BatchIndex, BatchKind, BatchUniform, DrawBatch, DrawRange};
use super::config::QueueConfig;
use super::execute::ExecState;

/// Texture plus the framebuffer it is attached to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RenderTarget {
    pub framebuffer: FramebufferId,
    pub texture: TextureId,
}

/// Records one frame of GPU work and replays it on a [`Driver`].
///
/// The queue owns the driver and every state cache. Recording only touches
/// the caches and the batch list; the driver sees binds, uniform uploads
/// and draws once `execute` runs.
pub struct CommandQueue<D: Driver> {
    pub(super) driver: D,
    pub(super) config: QueueConfig,
    limits: DriverLimits,

    pub(super) batches: Vec<Batch>,
    pub(super) head: Option<BatchIndex>,
    tail: Option<BatchIndex>,
    pub(super) draws: Vec<DrawRange>,
    pub(super) binds: Vec<BatchBind>,
    pub(super) batch_uniforms: Vec<BatchUniform>,
    pub(super) debug_labels: String,
    debug_depth: u32,
    pub(super) merged: u32,

    pub(super) vertices: GrowableBuffer<DrawVertex>,
    attachments: AttachmentState,
    pub(super) uniforms: UniformState,
    saved: Vec<SavedAttachments>,
    pub(super) exec: ExecState,

    autorelease_textures: Vec<TextureId>,
    autorelease_framebuffers: Vec<FramebufferId>,

    viewport: Option<Viewport>,
    in_frame: bool,
    pub(super) in_draw: bool,
}

impl<D: Driver> CommandQueue<D> {
    pub fn new(mut driver: D, config: QueueConfig) -> Self {
        let limits = driver.limits();
        let vertices = GrowableBuffer::new(&mut driver, config.shadow_buffers, config.reserved_vertices);

        log::debug!("command queue created (max texture size {})", limits.max_texture_size);

        Self {
            driver,
            config,
            limits,
            batches: Vec::new(),
            head: None,
            tail: None,
            draws: Vec::new(),
            binds: Vec::new(),
            batch_uniforms: Vec::new(),
            debug_labels: String::new(),
            debug_depth: 0,
            merged: 0,
            vertices,
            attachments: AttachmentState::new(),
            uniforms: UniformState::new(),
            saved: Vec::new(),
            exec: ExecState::default(),
            autorelease_textures: Vec::new(),
            autorelease_framebuffers: Vec::new(),
            viewport: None,
            in_frame: false,
            in_draw: false,
        }
    }

    #[inline]
    pub fn driver(&self) -> &D {
        &self.driver
    }

    #[inline]
    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    #[inline]
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    #[inline]
    pub fn limits(&self) -> DriverLimits {
        self.limits
    }

    #[inline]
    pub fn attachments(&self) -> &AttachmentState {
        &self.attachments
    }

    #[inline]
    pub fn uniforms(&self) -> &UniformState {
        &self.uniforms
    }

    #[inline]
    pub fn in_frame(&self) -> bool {
        self.in_frame
    }

    /// Batches recorded and not yet executed, merged batches excluded.
    pub fn pending_batches(&self) -> usize {
        self.batches.len()
    }

    // ── frame lifecycle ───────────────────────────────────────────────────

    /// Starts a frame from a known GPU state: default framebuffer, every
    /// texture unit unbound, no program.
    pub fn begin_frame(&mut self) {
        assert!(!self.in_frame, "begin_frame called while a frame is in progress");
        assert!(self.saved.is_empty(), "begin_frame with unbalanced save/restore");

        self.in_frame = true;
        self.viewport = None;

        self.driver.bind_framebuffer(FramebufferId::DEFAULT);
        for unit in 0..MAX_TEXTURE_UNITS {
            self.driver.bind_texture(TextureUnit::new(unit), TextureTarget::Texture2D, TextureId::NONE);
        }
        self.driver.use_program(ProgramId::NONE);

        self.attachments.reset();
        self.exec = ExecState::after_reset();
    }

    /// Ends the frame: discards batch storage, compacts the uniform pool and
    /// frees autoreleased resources.
    pub fn end_frame(&mut self) {
        assert!(self.in_frame, "end_frame called without begin_frame");
        assert!(!self.in_draw, "end_frame called inside begin_draw/end_draw");

        if !self.batches.is_empty() {
            log::warn!("end_frame discarding {} unexecuted batches", self.batches.len());
            self.reflag_discarded_uniforms();
            self.vertices.discard();
        }
        if self.debug_depth != 0 {
            log::warn!("end_frame with {} unclosed debug groups", self.debug_depth);
        }

        self.retire_batches();
        self.uniforms.end_frame();

        if !self.autorelease_framebuffers.is_empty() {
            self.driver.delete_framebuffers(&self.autorelease_framebuffers);
            self.autorelease_framebuffers.clear();
        }
        if !self.autorelease_textures.is_empty() {
            self.driver.delete_textures(&self.autorelease_textures);
            self.autorelease_textures.clear();
        }

        self.debug_labels.clear();
        self.debug_depth = 0;
        self.in_frame = false;
    }

    /// The driver never saw the uniform values snapshotted by unexecuted
    /// batches, so their slots must upload again.
    fn reflag_discarded_uniforms(&mut self) {
        for batch in &self.batches {
            let BatchKind::Draw(draw) = &batch.kind else { continue };
            for uniform in &self.batch_uniforms[draw.uniforms.start as usize..draw.uniforms.end as usize] {
                self.uniforms.mark_changed(draw.program, uniform.location);
            }
        }
    }

    pub(super) fn retire_batches(&mut self) {
        self.batches.clear();
        self.draws.clear();
        self.binds.clear();
        self.batch_uniforms.clear();
        self.head = None;
        self.tail = None;
        self.merged = 0;
    }

    // ── recording ─────────────────────────────────────────────────────────

    /// Opens a draw batch for `program`.
    pub fn begin_draw(&mut self, program: ProgramId) {
        assert!(self.in_frame, "begin_draw called outside a frame");
        assert!(!self.in_draw, "begin_draw called twice without end_draw");
        assert!(program != ProgramId::NONE, "begin_draw with program 0");
        assert!(self.batches.len() < BatchIndex::MAX as usize, "batch list overflow");

        let len = self.draws.len() as u32;
        let binds = self.binds.len() as u32;
        let uniforms = self.batch_uniforms.len() as u32;

        self.batches.push(Batch::new(BatchKind::Draw(DrawBatch {
            program,
            framebuffer: self.attachments.framebuffer(),
            viewport: self.viewport,
            draws: len..len,
            binds: binds..binds,
            uniforms: uniforms..uniforms,
        })));
        self.in_draw = true;
    }

    /// Closes the open draw batch.
    ///
    /// Stamps the current framebuffer and viewport, snapshots the program's
    /// changed uniforms and the changed texture units, then links the batch
    /// or folds it into the tail.
    pub fn end_draw(&mut self) {
        assert!(self.in_draw, "end_draw called without begin_draw");
        self.in_draw = false;

        let index = self.batches.len() - 1;
        let framebuffer = self.attachments.framebuffer();
        self.attachments.clear_framebuffer_change();

        let BatchKind::Draw(draw) = &mut self.batches[index].kind else {
            unreachable!("open batch is always a draw batch");
        };
        draw.framebuffer = framebuffer;
        draw.viewport = self.viewport;

        let list = &mut self.batch_uniforms;
        self.uniforms.snapshot(draw.program, |location, info| {
            list.push(BatchUniform { location, info: *info });
        });
        draw.uniforms.end = self.batch_uniforms.len() as u32;

        let binds = &mut self.binds;
        self.attachments.take_changed_textures(|b| {
            binds.push(BatchBind { unit: b.unit, target: b.target, id: b.id });
        });
        draw.binds.end = self.binds.len() as u32;

        if self.config.merge_batches && self.try_merge(index) {
            self.batches.pop();
            self.merged += 1;
            return;
        }

        self.link(index as BatchIndex);
    }

    /// Appends one quad to the open draw batch.
    pub fn add_vertices(&mut self, vertices: &[DrawVertex; QUAD_VERTICES]) {
        self.add_vertices_mut().copy_from_slice(vertices);
    }

    /// Reserves one zeroed quad in the open draw batch for the caller to fill.
    pub fn add_vertices_mut(&mut self) -> &mut [DrawVertex] {
        assert!(self.in_draw, "add_vertices called outside begin_draw/end_draw");

        let count = QUAD_VERTICES as u32;
        let (offset, slots) = self.vertices.advance(QUAD_VERTICES);

        let Some(Batch { kind: BatchKind::Draw(draw), .. }) = self.batches.last_mut() else {
            unreachable!("open batch is always a draw batch");
        };

        let extend = !draw.draws.is_empty()
            && self.draws.last().is_some_and(|last| {
                last.offset + last.count == offset && last.count + count <= MAX_DRAW_VERTICES
            });

        if extend {
            if let Some(last) = self.draws.last_mut() {
                last.count += count;
            }
        } else {
            self.draws.push(DrawRange { offset, count });
            draw.draws.end = self.draws.len() as u32;
        }

        slots
    }

    /// Records a clear of the current framebuffer. Empty bits select the
    /// configured default.
    pub fn clear(&mut self, bits: ClearBits) {
        self.assert_recording("clear");

        let bits = if bits.is_empty() { self.config.default_clear_bits } else { bits };
        let framebuffer = self.attachments.framebuffer();
        self.attachments.clear_framebuffer_change();

        self.push_batch(BatchKind::Clear { bits, framebuffer, viewport: self.viewport });
    }

    pub fn push_debug_group(&mut self, name: &str) {
        self.assert_recording("push_debug_group");

        let start = self.debug_labels.len() as u32;
        self.debug_labels.push_str(name);
        let end = self.debug_labels.len() as u32;
        self.debug_depth += 1;

        self.push_batch(BatchKind::PushDebugGroup { label: start..end });
    }

    pub fn pop_debug_group(&mut self) {
        self.assert_recording("pop_debug_group");
        assert!(self.debug_depth > 0, "pop_debug_group without matching push");
        self.debug_depth -= 1;

        self.push_batch(BatchKind::PopDebugGroup);
    }

    pub fn bind_framebuffer(&mut self, framebuffer: FramebufferId) {
        self.attachments.bind_framebuffer(framebuffer);
    }

    pub fn bind_texture(&mut self, unit: TextureUnit, target: TextureTarget, texture: TextureId) {
        self.attachments.bind_texture(unit, target, texture);
    }

    /// Sets the viewport stamped on subsequent batches.
    pub fn change_viewport(&mut self, viewport: Viewport) {
        self.viewport = Some(viewport);
    }

    #[inline]
    pub fn viewport(&self) -> Option<Viewport> {
        self.viewport
    }

    fn assert_recording(&self, op: &str) {
        assert!(self.in_frame, "{op} called outside a frame");
        assert!(!self.in_draw, "{op} called inside begin_draw/end_draw");
    }

    fn push_batch(&mut self, kind: BatchKind) {
        assert!(self.batches.len() < BatchIndex::MAX as usize, "batch list overflow");
        let index = self.batches.len() as BatchIndex;
        self.batches.push(Batch::new(kind));
        self.link(index);
    }

    fn link(&mut self, index: BatchIndex) {
        match self.tail {
            Some(tail) => self.batches[tail as usize].next = Some(index),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
    }

    /// Folds the batch at `index` into the tail when it is a stateless draw
    /// targeting the same program, framebuffer and viewport.
    fn try_merge(&mut self, index: usize) -> bool {
        let Some(tail) = self.tail else { return false };
        let (linked, open) = self.batches.split_at_mut(index);

        let BatchKind::Draw(current) = &open[0].kind else { return false };
        let Some(Batch { kind: BatchKind::Draw(previous), .. }) = linked.get_mut(tail as usize) else {
            return false;
        };
        if !current.is_stateless() || !previous.shares_target(current) {
            return false;
        }

        debug_assert_eq!(previous.draws.end, current.draws.start);

        if !current.draws.is_empty() {
            let first = current.draws.start as usize;
            let joinable = !previous.draws.is_empty() && {
                let last = self.draws[first - 1];
                let next = self.draws[first];
                last.offset + last.count == next.offset && last.count + next.count <= MAX_DRAW_VERTICES
            };
            if joinable {
                let next = self.draws.remove(first);
                self.draws[first - 1].count += next.count;
            }
        }
        previous.draws.end = self.draws.len() as u32;

        log::trace!("merged draw batch into batch {tail}");
        true
    }

    // ── uniforms ──────────────────────────────────────────────────────────

    pub fn set_uniform1f(&mut self, program: ProgramId, location: u32, v0: f32) {
        self.uniforms.set_1f(program, location, v0);
    }

    pub fn set_uniform2f(&mut self, program: ProgramId, location: u32, v0: f32, v1: f32) {
        self.uniforms.set_2f(program, location, v0, v1);
    }

    pub fn set_uniform3f(&mut self, program: ProgramId, location: u32, v0: f32, v1: f32, v2: f32) {
        self.uniforms.set_3f(program, location, v0, v1, v2);
    }

    pub fn set_uniform4f(&mut self, program: ProgramId, location: u32, v: [f32; 4]) {
        self.uniforms.set_4f(program, location, v);
    }

    pub fn set_uniform1fv(&mut self, program: ProgramId, location: u32, values: &[f32]) {
        self.uniforms.set_1fv(program, location, values);
    }

    pub fn set_uniform2fv(&mut self, program: ProgramId, location: u32, values: &[[f32; 2]]) {
        self.uniforms.set_2fv(program, location, values);
    }

    pub fn set_uniform3fv(&mut self, program: ProgramId, location: u32, values: &[[f32; 3]]) {
        self.uniforms.set_3fv(program, location, values);
    }

    pub fn set_uniform4fv(&mut self, program: ProgramId, location: u32, values: &[[f32; 4]]) {
        self.uniforms.set_4fv(program, location, values);
    }

    pub fn set_uniform1i(&mut self, program: ProgramId, location: u32, v0: i32) {
        self.uniforms.set_1i(program, location, v0);
    }

    pub fn set_uniform2i(&mut self, program: ProgramId, location: u32, v0: i32, v1: i32) {
        self.uniforms.set_2i(program, location, v0, v1);
    }

    pub fn set_uniform3i(&mut self, program: ProgramId, location: u32, v0: i32, v1: i32, v2: i32) {
        self.uniforms.set_3i(program, location, v0, v1, v2);
    }

    pub fn set_uniform4i(&mut self, program: ProgramId, location: u32, v: [i32; 4]) {
        self.uniforms.set_4i(program, location, v);
    }

    pub fn set_uniform_matrix(&mut self, program: ProgramId, location: u32, matrix: &Mat4) {
        self.uniforms.set_matrix(program, location, matrix);
    }

    pub fn set_uniform_rounded_rect(&mut self, program: ProgramId, location: u32, rect: &RoundedRect) {
        self.uniforms.set_rounded_rect(program, location, rect);
    }

    pub fn set_uniform_color(&mut self, program: ProgramId, location: u32, color: Option<&ColorRgba>) {
        self.uniforms.set_color(program, location, color);
    }

    /// Binds `texture` on `unit` and points the sampler uniform at it.
    pub fn set_uniform_texture(
        &mut self,
        program: ProgramId,
        location: u32,
        target: TextureTarget,
        unit: TextureUnit,
        texture: TextureId,
    ) {
        self.attachments.bind_texture(unit, target, texture);
        self.uniforms.set_texture(program, location, unit);
    }

    // ── resources ─────────────────────────────────────────────────────────

    /// Creates an uninitialized RGBA texture.
    ///
    /// Fails without touching the driver when either dimension exceeds the
    /// driver's maximum texture size.
    pub fn create_texture(&mut self, width: u32, height: u32, filters: TextureFilters) -> Result<TextureId> {
        assert!(width > 0 && height > 0, "create_texture with empty size {width}x{height}");

        let max = self.limits.max_texture_size;
        if width > max || height > max {
            return Err(BatchError::TextureTooLarge { width, height, max });
        }

        self.save();
        let texture = self.driver.create_texture(width, height, filters);
        self.restore();

        log::trace!("created texture {texture:?} ({width}x{height})");
        Ok(texture)
    }

    /// Creates a linear-filtered texture holding `rgba`.
    pub fn upload_texture(&mut self, width: u32, height: u32, rgba: &[u8]) -> Result<TextureId> {
        let expected = width as usize * height as usize * 4;
        if rgba.len() != expected {
            return Err(BatchError::TextureDataSize { width, height, expected, actual: rgba.len() });
        }

        let texture = self.create_texture(width, height, TextureFilters::LINEAR)?;

        self.save();
        self.driver.upload_texture(texture, width, height, rgba);
        self.restore();

        Ok(texture)
    }

    pub fn create_framebuffer(&mut self) -> FramebufferId {
        self.save();
        let framebuffer = self.driver.create_framebuffer();
        self.restore();
        framebuffer
    }

    /// Creates a nearest-filtered texture and a framebuffer rendering into it.
    ///
    /// Panics if the driver reports the framebuffer incomplete.
    pub fn create_render_target(&mut self, width: u32, height: u32) -> Result<RenderTarget> {
        let texture = self.create_texture(width, height, TextureFilters::NEAREST)?;

        self.save();
        let framebuffer = self.driver.create_framebuffer();
        let status = self.driver.attach_texture(framebuffer, texture);
        assert!(
            status == FramebufferStatus::Complete,
            "framebuffer {framebuffer:?} incomplete after attaching texture {texture:?}: {status:?}"
        );
        self.restore();

        Ok(RenderTarget { framebuffer, texture })
    }

    /// Deletes `texture` at the end of the current frame.
    pub fn autorelease_texture(&mut self, texture: TextureId) {
        assert!(texture != TextureId::NONE, "autorelease of texture 0");
        self.autorelease_textures.push(texture);
    }

    /// Deletes `framebuffer` at the end of the current frame.
    pub fn autorelease_framebuffer(&mut self, framebuffer: FramebufferId) {
        assert!(framebuffer != FramebufferId::DEFAULT, "autorelease of framebuffer 0");
        self.autorelease_framebuffers.push(framebuffer);
    }

    /// Deletes the program on the driver and forgets its uniform state.
    pub fn delete_program(&mut self, program: ProgramId) {
        self.driver.delete_program(program);
        self.uniforms.clear_program(program);
    }

    pub fn uniform_location(&self, program: ProgramId, name: &str) -> Option<u32> {
        self.driver.uniform_location(program, name)
    }

    fn save(&mut self) {
        self.saved.push(self.attachments.save());
    }

    fn restore(&mut self) {
        let Some(saved) = self.saved.pop() else {
            panic!("restore without matching save");
        };
        self.attachments.restore(saved, &mut self.driver);
        self.exec.invalidate_framebuffer();
    }
}

impl<D: Driver> Drop for CommandQueue<D> {
    fn drop(&mut self) {
        self.vertices.release(&mut self.driver);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::{Rect, Vec2};
    use crate::driver::{BufferId, DriverCall, RecordingDriver};
    use crate::queue::ExecuteStats;
    use crate::state::UniformFlags;

    const P: ProgramId = ProgramId(1);
    const Q: ProgramId = ProgramId(2);

    fn queue_with(driver: RecordingDriver) -> CommandQueue<RecordingDriver> {
        let config = QueueConfig { debug_groups: true, ..QueueConfig::default() };
        let mut q = CommandQueue::new(driver, config);
        q.driver_mut().clear_calls();
        q
    }

    fn queue() -> CommandQueue<RecordingDriver> {
        queue_with(RecordingDriver::new())
    }

    /// Begins a frame and drops the reset calls it emits.
    fn frame(q: &mut CommandQueue<RecordingDriver>) {
        q.begin_frame();
        q.driver_mut().clear_calls();
    }

    fn quad(x: f32) -> [DrawVertex; QUAD_VERTICES] {
        [
            DrawVertex::new(x, 0.0, 0.0, 0.0),
            DrawVertex::new(x + 1.0, 0.0, 1.0, 0.0),
            DrawVertex::new(x, 1.0, 0.0, 1.0),
            DrawVertex::new(x + 1.0, 0.0, 1.0, 0.0),
            DrawVertex::new(x + 1.0, 1.0, 1.0, 1.0),
            DrawVertex::new(x, 1.0, 0.0, 1.0),
        ]
    }

    fn draw_quad(q: &mut CommandQueue<RecordingDriver>, program: ProgramId, x: f32) {
        q.begin_draw(program);
        q.add_vertices(&quad(x));
        q.end_draw();
    }

    fn count(q: &CommandQueue<RecordingDriver>, pred: impl Fn(&DriverCall) -> bool) -> usize {
        q.driver().count(pred)
    }

    // ── frame lifecycle ───────────────────────────────────────────────────

    #[test]
    fn begin_frame_resets_gpu_bindings() {
        let mut q = queue();
        q.begin_frame();
        let calls = q.driver().calls();
        assert_eq!(calls.first(), Some(&DriverCall::BindFramebuffer(FramebufferId::DEFAULT)));
        assert_eq!(calls.last(), Some(&DriverCall::UseProgram(ProgramId::NONE)));
        assert_eq!(calls.iter().filter(|c| matches!(c, DriverCall::BindTexture { .. })).count(), MAX_TEXTURE_UNITS);
    }

    #[test]
    fn empty_frame_executes_nothing() {
        let mut q = queue();
        frame(&mut q);
        let stats = q.execute();
        q.end_frame();
        assert_eq!(stats, ExecuteStats::default());
        assert!(q.driver().calls().is_empty());
    }

    #[test]
    #[should_panic(expected = "in progress")]
    fn nested_begin_frame_panics() {
        let mut q = queue();
        q.begin_frame();
        q.begin_frame();
    }

    #[test]
    #[should_panic(expected = "outside begin_draw")]
    fn add_vertices_outside_draw_panics() {
        let mut q = queue();
        frame(&mut q);
        q.add_vertices(&quad(0.0));
    }

    // ── scenarios ─────────────────────────────────────────────────────────

    #[test]
    fn single_textured_draw() {
        let mut q = queue();
        frame(&mut q);

        q.set_uniform_texture(P, 0, TextureTarget::Texture2D, TextureUnit::new(0), TextureId(7));
        draw_quad(&mut q, P, 0.0);
        let stats = q.execute();

        assert_eq!(count(&q, |c| matches!(c, DriverCall::SetUniform { .. })), 1);
        assert_eq!(count(&q, |c| matches!(c, DriverCall::BindTexture { .. })), 1);
        assert_eq!(count(&q, |c| matches!(c, DriverCall::BindFramebuffer(_))), 0);
        assert_eq!(q.driver().draws(), vec![(0, 6)]);
        assert_eq!(stats.framebuffer_binds, 0);
        assert_eq!(stats.vertices, 6);

        let upload = q.driver().calls().iter().find_map(|c| match c {
            DriverCall::SetUniform { location, data, .. } => Some((*location, data.clone())),
            _ => None,
        });
        assert_eq!(upload, Some((0, 0u32.to_ne_bytes().to_vec())));
    }

    #[test]
    fn clear_zero_clears_everything() {
        let mut q = queue();
        frame(&mut q);
        q.clear(ClearBits::empty());
        q.execute();
        assert_eq!(count(&q, |c| *c == DriverCall::Clear(ClearBits::ALL)), 1);
    }

    #[test]
    fn oversized_texture_fails_without_driver_calls() {
        let mut q = queue_with(RecordingDriver::new().with_max_texture_size(1024));
        let result = q.create_texture(2048, 16, TextureFilters::LINEAR);
        assert_eq!(result, Err(BatchError::TextureTooLarge { width: 2048, height: 16, max: 1024 }));
        assert!(q.driver().calls().is_empty());
    }

    #[test]
    fn unchanged_consecutive_draws_merge() {
        let mut q = queue();
        frame(&mut q);

        q.set_uniform4f(P, 1, [1.0, 0.0, 0.0, 1.0]);
        draw_quad(&mut q, P, 0.0);
        q.set_uniform4f(P, 1, [1.0, 0.0, 0.0, 1.0]);
        draw_quad(&mut q, P, 1.0);

        assert_eq!(q.pending_batches(), 1);
        let stats = q.execute();
        assert_eq!(stats.merged, 1);
        assert_eq!(stats.batches, 1);
        assert_eq!(q.driver().draws(), vec![(0, 12)]);
    }

    // ── merging ───────────────────────────────────────────────────────────

    #[test]
    fn changed_uniform_prevents_merge() {
        let mut q = queue();
        frame(&mut q);

        q.set_uniform1f(P, 0, 1.0);
        draw_quad(&mut q, P, 0.0);
        q.set_uniform1f(P, 0, 0.5);
        draw_quad(&mut q, P, 1.0);
        q.execute();

        assert_eq!(q.driver().draws(), vec![(0, 6), (6, 6)]);
        assert_eq!(count(&q, |c| matches!(c, DriverCall::SetUniform { .. })), 2);
    }

    #[test]
    fn program_switch_prevents_merge() {
        let mut q = queue();
        frame(&mut q);

        draw_quad(&mut q, P, 0.0);
        draw_quad(&mut q, Q, 1.0);
        draw_quad(&mut q, P, 2.0);
        let stats = q.execute();

        assert_eq!(stats.batches, 3);
        assert_eq!(stats.program_changes, 3);
        assert_eq!(q.driver().draws(), vec![(0, 6), (6, 6), (12, 6)]);
    }

    #[test]
    fn clear_between_draws_prevents_merge() {
        let mut q = queue();
        frame(&mut q);

        draw_quad(&mut q, P, 0.0);
        q.clear(ClearBits::COLOR);
        draw_quad(&mut q, P, 1.0);
        q.execute();

        assert_eq!(q.driver().draws(), vec![(0, 6), (6, 6)]);
    }

    #[test]
    fn merge_disabled_by_config() {
        let config = QueueConfig { merge_batches: false, ..QueueConfig::default() };
        let mut q = CommandQueue::new(RecordingDriver::new(), config);
        frame(&mut q);

        draw_quad(&mut q, P, 0.0);
        draw_quad(&mut q, P, 1.0);
        assert_eq!(q.pending_batches(), 2);
    }

    #[test]
    fn draw_ranges_split_at_vertex_limit() {
        let mut q = queue();
        frame(&mut q);

        let quads = MAX_DRAW_VERTICES as usize / QUAD_VERTICES + 1;
        q.begin_draw(P);
        for i in 0..quads {
            q.add_vertices(&quad(i as f32));
        }
        q.end_draw();
        q.execute();

        assert_eq!(q.driver().draws(), vec![(0, MAX_DRAW_VERTICES), (MAX_DRAW_VERTICES, 6)]);
    }

    // ── redundant state ───────────────────────────────────────────────────

    #[test]
    fn repeated_bind_replays_once() {
        let mut q = queue();
        frame(&mut q);

        let unit = TextureUnit::new(2);
        q.bind_texture(unit, TextureTarget::Texture2D, TextureId(3));
        draw_quad(&mut q, P, 0.0);
        q.bind_texture(unit, TextureTarget::Texture2D, TextureId(3));
        draw_quad(&mut q, P, 1.0);
        q.execute();

        assert_eq!(count(&q, |c| matches!(c, DriverCall::BindTexture { .. })), 1);
    }

    #[test]
    fn viewport_applied_once_per_change() {
        let mut q = queue();
        frame(&mut q);

        q.change_viewport(Viewport::from_size(100.0, 50.0));
        q.clear(ClearBits::empty());
        draw_quad(&mut q, P, 0.0);
        q.change_viewport(Viewport::from_size(100.0, 50.0));
        draw_quad(&mut q, Q, 0.0);
        q.execute();

        assert_eq!(count(&q, |c| matches!(c, DriverCall::SetViewport(_))), 1);
    }

    #[test]
    fn offscreen_framebuffer_bound_then_restored() {
        let mut q = queue();
        frame(&mut q);

        q.bind_framebuffer(FramebufferId(5));
        draw_quad(&mut q, P, 0.0);
        q.bind_framebuffer(FramebufferId::DEFAULT);
        draw_quad(&mut q, P, 1.0);
        let stats = q.execute();

        let binds: Vec<_> = q
            .driver()
            .calls()
            .iter()
            .filter_map(|c| match c {
                DriverCall::BindFramebuffer(f) => Some(*f),
                _ => None,
            })
            .collect();
        assert_eq!(binds, vec![FramebufferId(5), FramebufferId::DEFAULT]);
        assert_eq!(stats.framebuffer_binds, 2);
    }

    #[test]
    fn pending_uniform_carries_into_next_frame() {
        let mut q = queue();
        frame(&mut q);
        q.set_uniform1f(P, 0, 2.0);
        q.end_frame();

        frame(&mut q);
        draw_quad(&mut q, P, 0.0);
        q.execute();
        assert_eq!(count(&q, |c| matches!(c, DriverCall::SetUniform { .. })), 1);
    }

    #[test]
    fn skipped_frame_uploads_uniform_next_frame() {
        let mut q = queue();
        frame(&mut q);
        q.set_uniform1f(P, 0, 5.0);
        draw_quad(&mut q, P, 0.0);
        q.end_frame();

        frame(&mut q);
        q.set_uniform1f(P, 0, 5.0);
        draw_quad(&mut q, P, 0.0);
        q.execute();

        let uploads: Vec<_> = q
            .driver()
            .calls()
            .iter()
            .filter_map(|c| match c {
                DriverCall::SetUniform { location, data, .. } => Some((*location, data.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(uploads, vec![(0, 5.0f32.to_ne_bytes().to_vec())]);
        assert_eq!(q.driver().draws(), vec![(0, 6)]);
    }

    #[test]
    fn skipped_frame_resends_rounded_rect_corners() {
        let mut q = queue();
        let clip = RoundedRect::new(Rect::new(0.0, 0.0, 8.0, 8.0), [Vec2::new(1.0, 1.0); 4]);
        frame(&mut q);
        q.set_uniform_rounded_rect(P, 2, &clip);
        draw_quad(&mut q, P, 0.0);
        q.execute();
        q.end_frame();

        frame(&mut q);
        q.set_uniform_rounded_rect(P, 2, &RoundedRect { bounds: Rect::new(1.0, 1.0, 8.0, 8.0), ..clip });
        draw_quad(&mut q, P, 0.0);
        q.end_frame();

        frame(&mut q);
        draw_quad(&mut q, P, 0.0);
        q.execute();
        let sent = q.driver().calls().iter().find_map(|c| match c {
            DriverCall::SetUniform { data, flags, .. } => Some((data.len(), flags.contains(UniformFlags::SEND_CORNERS))),
            _ => None,
        });
        assert_eq!(sent, Some((48, true)));
    }

    #[test]
    fn cross_frame_dedup_uploads_only_new_uniform() {
        let mut q = queue();
        frame(&mut q);
        q.set_uniform1f(P, 0, 1.0);
        draw_quad(&mut q, P, 0.0);
        q.execute();
        q.end_frame();

        frame(&mut q);
        q.set_uniform1f(P, 0, 1.0);
        q.set_uniform1f(P, 1, 2.0);
        q.bind_texture(TextureUnit::new(0), TextureTarget::Texture2D, TextureId(7));
        draw_quad(&mut q, P, 0.0);
        q.execute();

        let uploads: Vec<u32> = q
            .driver()
            .calls()
            .iter()
            .filter_map(|c| match c {
                DriverCall::SetUniform { location, .. } => Some(*location),
                _ => None,
            })
            .collect();
        assert_eq!(uploads, vec![1]);
        assert_eq!(count(&q, |c| matches!(c, DriverCall::BindTexture { .. })), 1);
        assert_eq!(count(&q, |c| matches!(c, DriverCall::BindFramebuffer(_))), 0);
        assert_eq!(q.driver().draws(), vec![(0, 6)]);
    }

    // ── execute ───────────────────────────────────────────────────────────

    #[test]
    fn execute_twice_rotates_vertex_buffers() {
        let mut q = queue();
        frame(&mut q);

        draw_quad(&mut q, P, 0.0);
        q.execute();
        draw_quad(&mut q, P, 1.0);
        q.execute();

        let vbos: Vec<_> = q
            .driver()
            .calls()
            .iter()
            .filter_map(|c| match c {
                DriverCall::BindVertexBuffer(id) => Some(*id),
                _ => None,
            })
            .collect();
        assert_eq!(vbos, vec![BufferId(1), BufferId(2)]);
        assert_eq!(q.driver().draws(), vec![(0, 6), (0, 6)]);
        assert_eq!(count(&q, |c| matches!(c, DriverCall::UseProgram(_))), 1);
    }

    #[test]
    fn uploaded_vertices_match_recorded_quads() {
        let mut q = queue();
        frame(&mut q);
        draw_quad(&mut q, P, 3.0);
        q.execute();

        let data = q.driver().calls().iter().find_map(|c| match c {
            DriverCall::UploadBuffer { data, .. } => Some(data.clone()),
            _ => None,
        });
        assert_eq!(data.as_deref(), Some(bytemuck::cast_slice::<DrawVertex, u8>(&quad(3.0))));
    }

    #[test]
    fn add_vertices_mut_fills_in_place() {
        let mut q = queue();
        frame(&mut q);
        q.begin_draw(P);
        let slots = q.add_vertices_mut();
        assert_eq!(slots.len(), QUAD_VERTICES);
        slots[0] = DrawVertex::new(9.0, 9.0, 0.0, 0.0);
        q.end_draw();
        q.execute();

        let data = q.driver().calls().iter().find_map(|c| match c {
            DriverCall::UploadBuffer { data, .. } => Some(data.clone()),
            _ => None,
        });
        let data = data.unwrap();
        let first: DrawVertex = bytemuck::pod_read_unaligned(&data[..16]);
        assert_eq!(first, DrawVertex::new(9.0, 9.0, 0.0, 0.0));
    }

    // ── debug groups ──────────────────────────────────────────────────────

    #[test]
    fn debug_groups_replay_in_order() {
        let mut q = queue();
        frame(&mut q);

        q.push_debug_group("outer");
        q.push_debug_group("inner");
        draw_quad(&mut q, P, 0.0);
        q.pop_debug_group();
        q.pop_debug_group();
        q.execute();

        let groups: Vec<_> = q
            .driver()
            .calls()
            .iter()
            .filter(|c| matches!(c, DriverCall::PushDebugGroup(_) | DriverCall::PopDebugGroup))
            .cloned()
            .collect();
        assert_eq!(
            groups,
            vec![
                DriverCall::PushDebugGroup("outer".into()),
                DriverCall::PushDebugGroup("inner".into()),
                DriverCall::PopDebugGroup,
                DriverCall::PopDebugGroup,
            ]
        );
    }

    #[test]
    fn debug_groups_skipped_when_disabled() {
        let config = QueueConfig { debug_groups: false, ..QueueConfig::default() };
        let mut q = CommandQueue::new(RecordingDriver::new(), config);
        frame(&mut q);
        q.push_debug_group("hidden");
        q.pop_debug_group();
        let stats = q.execute();

        assert_eq!(stats.batches, 2);
        assert_eq!(count(&q, |c| matches!(c, DriverCall::PushDebugGroup(_))), 0);
    }

    #[test]
    #[should_panic(expected = "without matching push")]
    fn unbalanced_pop_panics() {
        let mut q = queue();
        frame(&mut q);
        q.pop_debug_group();
    }

    // ── resources ─────────────────────────────────────────────────────────

    #[test]
    fn create_texture_restores_bindings() {
        let mut q = queue();
        frame(&mut q);
        q.bind_texture(TextureUnit::new(1), TextureTarget::Texture2D, TextureId(4));

        let texture = q.create_texture(64, 64, TextureFilters::NEAREST).unwrap();
        assert_eq!(texture, TextureId(1));
        assert_eq!(
            q.driver().calls(),
            &[
                DriverCall::CreateTexture { id: TextureId(1), width: 64, height: 64, filters: TextureFilters::NEAREST },
                DriverCall::BindFramebuffer(FramebufferId::DEFAULT),
                DriverCall::BindTexture { unit: TextureUnit::new(1), target: TextureTarget::Texture2D, id: TextureId(4) },
            ]
        );
        assert!(q.attachments().has_texture_change());
    }

    #[test]
    fn resource_creation_forces_framebuffer_rebind() {
        let mut q = queue();
        frame(&mut q);
        q.create_texture(8, 8, TextureFilters::LINEAR).unwrap();
        q.driver_mut().clear_calls();

        draw_quad(&mut q, P, 0.0);
        q.execute();
        assert_eq!(count(&q, |c| *c == DriverCall::BindFramebuffer(FramebufferId::DEFAULT)), 1);
    }

    #[test]
    fn upload_texture_checks_data_size() {
        let mut q = queue();
        let err = q.upload_texture(2, 2, &[0u8; 12]).unwrap_err();
        assert_eq!(err, BatchError::TextureDataSize { width: 2, height: 2, expected: 16, actual: 12 });

        let texture = q.upload_texture(2, 2, &[255u8; 16]).unwrap();
        assert_eq!(
            count(&q, |c| *c == DriverCall::UploadTexture { id: texture, width: 2, height: 2, len: 16 }),
            1
        );
    }

    #[test]
    fn render_target_attaches_texture() {
        let mut q = queue();
        let target = q.create_render_target(32, 32).unwrap();
        assert_eq!(target, RenderTarget { framebuffer: FramebufferId(1), texture: TextureId(1) });
        assert_eq!(
            count(&q, |c| *c == DriverCall::AttachTexture { framebuffer: FramebufferId(1), texture: TextureId(1) }),
            1
        );
    }

    #[test]
    #[should_panic(expected = "incomplete")]
    fn incomplete_render_target_panics() {
        let driver = RecordingDriver::new().with_framebuffer_status(FramebufferStatus::Incomplete(0x8cd6));
        let mut q = queue_with(driver);
        let _ = q.create_render_target(32, 32);
    }

    #[test]
    fn autoreleased_resources_deleted_at_end_frame() {
        let mut q = queue();
        frame(&mut q);
        q.autorelease_texture(TextureId(3));
        q.autorelease_texture(TextureId(4));
        q.autorelease_framebuffer(FramebufferId(2));
        assert!(q.driver().calls().is_empty());

        q.end_frame();
        assert_eq!(
            q.driver().calls(),
            &[
                DriverCall::DeleteFramebuffers(vec![FramebufferId(2)]),
                DriverCall::DeleteTextures(vec![TextureId(3), TextureId(4)]),
            ]
        );
    }

    #[test]
    #[should_panic(expected = "texture 0")]
    fn autorelease_of_texture_zero_panics() {
        let mut q = queue();
        q.autorelease_texture(TextureId::NONE);
    }

    #[test]
    fn delete_program_forgets_uniforms() {
        let mut q = queue();
        q.set_uniform1f(P, 0, 1.0);
        q.delete_program(P);
        assert_eq!(q.driver().calls(), &[DriverCall::DeleteProgram(P)]);
        assert!(q.uniforms().info(P, 0).is_none());
    }
}
