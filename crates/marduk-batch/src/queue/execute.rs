use crate::coords::Viewport;
use crate::driver::{Driver, FramebufferId, ProgramId, UniformUpload};

use super::batch::{BatchKind, DrawBatch};
use super::command_queue::CommandQueue;

/// What the current execute pass last applied on the driver. `None` means
/// unknown, forcing the next batch to re-apply.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub(crate) struct ExecState {
    framebuffer: Option<FramebufferId>,
    viewport: Option<Viewport>,
    program: Option<ProgramId>,
}

impl ExecState {
    /// State matching what `begin_frame` binds on the driver.
    pub fn after_reset() -> Self {
        Self {
            framebuffer: Some(FramebufferId::DEFAULT),
            viewport: None,
            program: Some(ProgramId::NONE),
        }
    }

    pub fn invalidate_framebuffer(&mut self) {
        self.framebuffer = None;
    }
}

/// Counters for one `execute` call.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct ExecuteStats {
    pub batches: u32,
    /// Draw batches folded into a predecessor while recording.
    pub merged: u32,
    pub draw_calls: u32,
    pub vertices: u32,
    pub uniform_uploads: u32,
    pub texture_binds: u32,
    pub framebuffer_binds: u32,
    pub program_changes: u32,
    pub clears: u32,
}

impl<D: Driver> CommandQueue<D> {
    /// Replays every batch recorded since the last execute.
    ///
    /// Uploads the staged vertices, then walks the batch list applying only
    /// the state each batch differs in. Executed batches are retired; the
    /// uniform pool is left alone until `end_frame`.
    pub fn execute(&mut self) -> ExecuteStats {
        assert!(!self.in_draw, "execute called inside begin_draw/end_draw");

        let mut stats = ExecuteStats { merged: self.merged, ..ExecuteStats::default() };
        let Some(head) = self.head else {
            log::trace!("execute with no batches");
            return stats;
        };

        self.driver.begin_execute();

        let vertex_buffer = self.vertices.submit(&mut self.driver);
        self.driver.bind_vertex_buffer(vertex_buffer);

        let Self { driver, config, batches, draws, binds, batch_uniforms, uniforms, exec, debug_labels, .. } = self;

        let mut next = Some(head);
        while let Some(index) = next {
            let batch = &batches[index as usize];
            stats.batches += 1;

            match &batch.kind {
                BatchKind::Clear { bits, framebuffer, viewport } => {
                    apply_framebuffer(driver, exec, *framebuffer, &mut stats);
                    apply_viewport(driver, exec, *viewport);
                    log::trace!("clear {:#x} on {framebuffer:?}", bits.bits());
                    driver.clear(*bits);
                    stats.clears += 1;
                }
                BatchKind::PushDebugGroup { label } => {
                    if config.debug_groups {
                        driver.push_debug_group(&debug_labels[label.start as usize..label.end as usize]);
                    }
                }
                BatchKind::PopDebugGroup => {
                    if config.debug_groups {
                        driver.pop_debug_group();
                    }
                }
                BatchKind::Draw(draw) => {
                    let DrawBatch { program, framebuffer, viewport, .. } = draw;

                    apply_framebuffer(driver, exec, *framebuffer, &mut stats);
                    apply_viewport(driver, exec, *viewport);

                    if exec.program != Some(*program) {
                        driver.use_program(*program);
                        exec.program = Some(*program);
                        stats.program_changes += 1;
                    }

                    for bind in &binds[draw.binds.start as usize..draw.binds.end as usize] {
                        driver.bind_texture(bind.unit, bind.target, bind.id);
                        stats.texture_binds += 1;
                    }

                    for uniform in &batch_uniforms[draw.uniforms.start as usize..draw.uniforms.end as usize] {
                        let info = &uniform.info;
                        driver.set_uniform(
                            *program,
                            &UniformUpload {
                                location: uniform.location,
                                format: info.format,
                                array_count: info.array_count,
                                flags: info.flags,
                                data: uniforms.value_bytes(info),
                            },
                        );
                        stats.uniform_uploads += 1;
                    }

                    for range in &draws[draw.draws.start as usize..draw.draws.end as usize] {
                        driver.draw_arrays(range.offset, range.count);
                        stats.draw_calls += 1;
                        stats.vertices += range.count;
                    }
                }
            }

            next = batch.next;
        }

        self.driver.end_execute();
        self.retire_batches();

        log::debug!(
            "executed {} batches ({} merged): {} draws, {} uniforms, {} binds",
            stats.batches,
            stats.merged,
            stats.draw_calls,
            stats.uniform_uploads,
            stats.texture_binds,
        );
        stats
    }
}

fn apply_framebuffer<D: Driver>(driver: &mut D, exec: &mut ExecState, framebuffer: FramebufferId, stats: &mut ExecuteStats) {
    if exec.framebuffer != Some(framebuffer) {
        driver.bind_framebuffer(framebuffer);
        exec.framebuffer = Some(framebuffer);
        stats.framebuffer_binds += 1;
    }
}

fn apply_viewport<D: Driver>(driver: &mut D, exec: &mut ExecState, viewport: Option<Viewport>) {
    let Some(viewport) = viewport else { return };
    if exec.viewport != Some(viewport) {
        driver.set_viewport(viewport);
        exec.viewport = Some(viewport);
    }
}
