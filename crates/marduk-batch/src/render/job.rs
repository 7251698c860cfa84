use crate::coords::{ColorRgba, Mat4, Rect, RoundedRect, Vec2, Viewport};
use crate::driver::{
    ClearBits, DrawVertex, Driver, FramebufferId, TextureId, TextureTarget, TextureUnit, QUAD_VERTICES,
};
use crate::program::Program;
use crate::queue::{CommandQueue, ExecuteStats};

use super::RenderNode;

const ORTHO_NEAR_PLANE: f32 = -10000.0;
const ORTHO_FAR_PLANE: f32 = 10000.0;

/// Keys of the uniforms shared by every job program.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(usize)]
pub enum UniformKey {
    Alpha,
    Source,
    ClipRect,
    Viewport,
    Projection,
    Modelview,
    Color,
}

impl UniformKey {
    pub const ALL: [UniformKey; 7] = [
        UniformKey::Alpha,
        UniformKey::Source,
        UniformKey::ClipRect,
        UniformKey::Viewport,
        UniformKey::Projection,
        UniformKey::Modelview,
        UniformKey::Color,
    ];

    #[inline]
    pub const fn key(self) -> usize {
        self as usize
    }

    /// Uniform name expected in the shader.
    pub const fn name(self) -> &'static str {
        match self {
            UniformKey::Alpha => "u_alpha",
            UniformKey::Source => "u_source",
            UniformKey::ClipRect => "u_clip_rect",
            UniformKey::Viewport => "u_viewport",
            UniformKey::Projection => "u_projection",
            UniformKey::Modelview => "u_modelview",
            UniformKey::Color => "u_color",
        }
    }
}

/// Resolves every [`UniformKey`] the program declares and sets `u_alpha` to
/// its default of 1. Returns how many keys resolved.
pub fn register_shared_uniforms<D: Driver>(program: &mut Program, queue: &mut CommandQueue<D>) -> usize {
    let resolved = UniformKey::ALL
        .iter()
        .filter(|k| program.add_uniform(queue, k.name(), k.key()))
        .count();

    program.set_uniform1f(queue, UniformKey::Alpha.key(), 1.0);
    log::debug!("program {}: {resolved} shared uniforms", program.name());
    resolved
}

/// Programs a job draws with. Nodes needing a missing program are skipped.
#[derive(Debug, Default)]
pub struct JobPrograms {
    /// Solid color fill, uses `u_color`.
    pub color: Option<Program>,
    /// Textured quad sampling `u_source` on unit 0.
    pub blit: Option<Program>,
}

#[derive(Debug, Copy, Clone)]
struct Modelview {
    transform: Mat4,
    offset_before: Vec2,
}

/// Translates a node tree into command-queue batches for one frame.
///
/// Geometry is emitted in job space (node coordinates plus the accumulated
/// offset); the current modelview and the projection are uploaded as
/// uniforms. Clipping is tracked in device space and only used for culling.
#[derive(Debug)]
pub struct RenderJob {
    viewport: Rect,
    framebuffer: FramebufferId,
    flip_y: bool,
    projection: Mat4,
    modelview: Vec<Modelview>,
    clips: Vec<RoundedRect>,
    offset: Vec2,
    alpha: f32,

    warned_missing_color: bool,
    warned_missing_blit: bool,
}

impl RenderJob {
    /// `viewport` is in device pixels; node coordinates are scaled by
    /// `scale` into it.
    pub fn new(viewport: Rect, scale: f32, framebuffer: FramebufferId, flip_y: bool) -> Self {
        assert!(scale > 0.0, "render job scale must be positive");

        let mut projection = Mat4::ortho(
            viewport.origin.x,
            viewport.origin.x + viewport.size.x,
            viewport.origin.y,
            viewport.origin.y + viewport.size.y,
            ORTHO_NEAR_PLANE,
            ORTHO_FAR_PLANE,
        );
        if !flip_y {
            projection = Mat4::scale(1.0, -1.0, 1.0) * projection;
        }

        Self {
            viewport,
            framebuffer,
            flip_y,
            projection,
            modelview: vec![Modelview {
                transform: Mat4::scale(scale, scale, 1.0),
                offset_before: Vec2::zero(),
            }],
            clips: vec![RoundedRect::from_rect(viewport)],
            offset: Vec2::zero(),
            alpha: 1.0,
            warned_missing_color: false,
            warned_missing_blit: false,
        }
    }

    /// Restricts drawing to `region` (node coordinates) instead of the
    /// whole viewport.
    pub fn with_region(mut self, region: Rect) -> Self {
        let bounds = self.transform_bounds(region);
        self.clips = vec![RoundedRect::from_rect(bounds)];
        self
    }

    #[inline]
    pub fn projection(&self) -> &Mat4 {
        &self.projection
    }

    #[inline]
    pub fn flip_y(&self) -> bool {
        self.flip_y
    }

    /// Records the tree into `queue`, executes it and ends the frame.
    pub fn render<D: Driver>(
        &mut self,
        queue: &mut CommandQueue<D>,
        programs: &JobPrograms,
        root: &RenderNode,
    ) -> ExecuteStats {
        queue.begin_frame();

        queue.bind_framebuffer(self.framebuffer);
        queue.change_viewport(self.device_viewport());
        queue.clear(ClearBits::empty());

        self.visit(queue, programs, root);
        debug_assert_eq!(self.modelview.len(), 1, "unbalanced modelview stack");
        debug_assert_eq!(self.clips.len(), 1, "unbalanced clip stack");

        let stats = queue.execute();
        queue.end_frame();
        stats
    }

    // ── traversal ─────────────────────────────────────────────────────────

    fn visit<D: Driver>(&mut self, queue: &mut CommandQueue<D>, programs: &JobPrograms, node: &RenderNode) {
        if node.is_invisible() || !self.overlaps_clip(node.bounds()) {
            return;
        }

        match node {
            RenderNode::Container { children, .. } => {
                for child in children {
                    self.visit(queue, programs, child);
                }
            }
            RenderNode::Debug { message, child } => {
                let grouped = !message.is_empty();
                if grouped {
                    queue.push_debug_group(message);
                }
                self.visit(queue, programs, child);
                if grouped {
                    queue.pop_debug_group();
                }
            }
            RenderNode::Offset { offset, child } => {
                self.offset += *offset;
                self.visit(queue, programs, child);
                self.offset -= *offset;
            }
            RenderNode::Transform { transform, child } => {
                self.push_modelview(transform);
                self.visit(queue, programs, child);
                self.pop_modelview();
            }
            RenderNode::Clip { clip, child } => {
                let Some(bounds) = self.current_clip().bounds.intersect(self.transform_bounds(*clip)) else {
                    return;
                };
                self.clips.push(RoundedRect::from_rect(bounds));
                self.visit(queue, programs, child);
                self.clips.pop();
            }
            RenderNode::Color { bounds, color } => self.draw_color(queue, programs, *bounds, *color),
            RenderNode::Texture { bounds, texture } => self.draw_texture(queue, programs, *bounds, *texture),
        }
    }

    fn draw_color<D: Driver>(&mut self, queue: &mut CommandQueue<D>, programs: &JobPrograms, bounds: Rect, color: ColorRgba) {
        if color.is_clear() {
            return;
        }
        let Some(program) = programs.color.as_ref() else {
            if !self.warned_missing_color {
                log::debug!("no color program configured; skipping color nodes");
                self.warned_missing_color = true;
            }
            return;
        };

        queue.begin_draw(program.id());
        self.apply_shared_uniforms(queue, program);
        program.set_uniform_color(queue, UniformKey::Color.key(), Some(&color));
        queue.add_vertices(&self.quad(bounds));
        queue.end_draw();
    }

    fn draw_texture<D: Driver>(&mut self, queue: &mut CommandQueue<D>, programs: &JobPrograms, bounds: Rect, texture: TextureId) {
        let Some(program) = programs.blit.as_ref() else {
            if !self.warned_missing_blit {
                log::debug!("no blit program configured; skipping texture nodes");
                self.warned_missing_blit = true;
            }
            return;
        };

        queue.begin_draw(program.id());
        self.apply_shared_uniforms(queue, program);
        program.set_uniform_texture(
            queue,
            UniformKey::Source.key(),
            TextureTarget::Texture2D,
            TextureUnit::new(0),
            texture,
        );
        queue.add_vertices(&self.quad(bounds));
        queue.end_draw();
    }

    /// Uploads projection, modelview, viewport, clip and alpha. Values that
    /// did not change since the program's last draw are dropped by the
    /// uniform cache.
    fn apply_shared_uniforms<D: Driver>(&self, queue: &mut CommandQueue<D>, program: &Program) {
        program.set_uniform_matrix(queue, UniformKey::Projection.key(), &self.projection);
        program.set_uniform_matrix(queue, UniformKey::Modelview.key(), &self.current_modelview().transform);
        program.set_uniform4f(queue, UniformKey::Viewport.key(), self.device_viewport().to_array());
        program.set_uniform_rounded_rect(queue, UniformKey::ClipRect.key(), self.current_clip());
        program.set_uniform1f(queue, UniformKey::Alpha.key(), self.alpha);
    }

    // ── geometry ──────────────────────────────────────────────────────────

    fn device_viewport(&self) -> Viewport {
        let v = self.viewport;
        Viewport::new(v.origin.x, v.origin.y, v.size.x, v.size.y)
    }

    fn quad(&self, bounds: Rect) -> [DrawVertex; QUAD_VERTICES] {
        let r = bounds.normalized().offset(self.offset);
        let (x0, y0) = (r.origin.x, r.origin.y);
        let (x1, y1) = (x0 + r.size.x, y0 + r.size.y);
        [
            DrawVertex::new(x0, y0, 0.0, 0.0),
            DrawVertex::new(x1, y0, 1.0, 0.0),
            DrawVertex::new(x0, y1, 0.0, 1.0),
            DrawVertex::new(x1, y0, 1.0, 0.0),
            DrawVertex::new(x1, y1, 1.0, 1.0),
            DrawVertex::new(x0, y1, 0.0, 1.0),
        ]
    }

    /// Node bounds in device space.
    fn transform_bounds(&self, rect: Rect) -> Rect {
        self.current_modelview().transform.transform_bounds(rect.offset(self.offset))
    }

    fn overlaps_clip(&self, bounds: Rect) -> bool {
        self.current_clip().bounds.intersects(self.transform_bounds(bounds))
    }

    fn current_clip(&self) -> &RoundedRect {
        debug_assert!(!self.clips.is_empty());
        &self.clips[self.clips.len() - 1]
    }

    fn current_modelview(&self) -> &Modelview {
        debug_assert!(!self.modelview.is_empty());
        &self.modelview[self.modelview.len() - 1]
    }

    fn push_modelview(&mut self, transform: &Mat4) {
        let last = self.current_modelview().transform;
        let translated = last * Mat4::translation(self.offset.x, self.offset.y, 0.0);
        self.modelview.push(Modelview {
            transform: translated * *transform,
            offset_before: self.offset,
        });
        self.offset = Vec2::zero();
    }

    fn pop_modelview(&mut self) {
        debug_assert!(self.modelview.len() > 1, "pop_modelview without matching push");
        if let Some(head) = self.modelview.pop() {
            self.offset = head.offset_before;
        }
    }
}
