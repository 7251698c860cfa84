use core::ops::Range;

use crate::coords::Viewport;
use crate::driver::{ClearBits, FramebufferId, ProgramId, TextureId, TextureTarget, TextureUnit};
use crate::state::UniformInfo;

/// Index into the queue's batch list.
pub(crate) type BatchIndex = u32;

/// Contiguous run of vertices drawn with one `draw_arrays` call.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct DrawRange {
    pub offset: u32,
    pub count: u32,
}

/// Texture bind carried by a draw batch.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct BatchBind {
    pub unit: TextureUnit,
    pub target: TextureTarget,
    pub id: TextureId,
}

/// Uniform snapshot carried by a draw batch.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct BatchUniform {
    pub location: u32,
    pub info: UniformInfo,
}

/// Draw with one program. Ranges index the queue's side lists.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct DrawBatch {
    pub program: ProgramId,
    pub framebuffer: FramebufferId,
    pub viewport: Option<Viewport>,
    pub draws: Range<u32>,
    pub binds: Range<u32>,
    pub uniforms: Range<u32>,
}

impl DrawBatch {
    /// A batch that changes no state can be folded into its predecessor.
    pub fn is_stateless(&self) -> bool {
        self.binds.is_empty() && self.uniforms.is_empty()
    }

    pub fn shares_target(&self, other: &DrawBatch) -> bool {
        self.program == other.program
            && self.framebuffer == other.framebuffer
            && self.viewport == other.viewport
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum BatchKind {
    Clear {
        bits: ClearBits,
        framebuffer: FramebufferId,
        viewport: Option<Viewport>,
    },
    /// Label is a byte range into the queue's debug string arena.
    PushDebugGroup { label: Range<u32> },
    PopDebugGroup,
    Draw(DrawBatch),
}

/// One recorded command. Batches form a singly linked list in execution
/// order; a batch folded into its predecessor is never linked.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Batch {
    pub kind: BatchKind,
    pub next: Option<BatchIndex>,
}

impl Batch {
    pub fn new(kind: BatchKind) -> Self {
        Self { kind, next: None }
    }
}
