use crate::state::{UniformFlags, UniformFormat};

/// Number of texture units tracked per frame.
pub const MAX_TEXTURE_UNITS: usize = 16;

/// Upper bound (exclusive) for uniform locations and program uniform keys.
pub const MAX_UNIFORM_LOCATIONS: usize = 1024;

/// Largest array length a single uniform slot may hold.
pub const MAX_UNIFORM_ARRAY_LEN: usize = u8::MAX as usize;

/// Maximum number of vertices a single coalesced draw range may cover.
pub const MAX_DRAW_VERTICES: u32 = 33_000;

/// Vertices per quad: two triangles, no index buffer.
pub const QUAD_VERTICES: usize = 6;

/// Driver-issued program handle. `ProgramId::NONE` unbinds.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub u32);

impl ProgramId {
    pub const NONE: Self = Self(0);
}

/// Driver-issued texture handle. `TextureId::NONE` unbinds.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

impl TextureId {
    pub const NONE: Self = Self(0);
}

/// Driver-issued framebuffer handle. `FramebufferId::DEFAULT` is the
/// presentation target.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FramebufferId(pub u32);

impl FramebufferId {
    pub const DEFAULT: Self = Self(0);
}

/// Driver-issued GPU buffer handle.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct BufferId(pub u32);

/// Texture binding target.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum TextureTarget {
    Texture1D,
    #[default]
    Texture2D,
    Texture3D,
}

/// Texture unit index in `0..MAX_TEXTURE_UNITS`.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureUnit(u8);

impl TextureUnit {
    /// Panics when `index` is not a valid unit.
    #[inline]
    pub const fn new(index: usize) -> Self {
        assert!(index < MAX_TEXTURE_UNITS, "texture unit out of range");
        Self(index as u8)
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum FilterMode {
    Nearest,
    #[default]
    Linear,
}

/// Minification and magnification filters for a texture.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct TextureFilters {
    pub min: FilterMode,
    pub mag: FilterMode,
}

impl TextureFilters {
    pub const NEAREST: Self = Self { min: FilterMode::Nearest, mag: FilterMode::Nearest };
    pub const LINEAR: Self = Self { min: FilterMode::Linear, mag: FilterMode::Linear };
}

bitflags::bitflags! {
    /// Buffer selection for a clear. Bit values follow the GL convention.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct ClearBits: u32 {
        const DEPTH = 0x0100;
        const STENCIL = 0x0400;
        const COLOR = 0x4000;
        const ALL = Self::COLOR.bits() | Self::DEPTH.bits() | Self::STENCIL.bits();
    }
}

/// Result of attaching a texture to a framebuffer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FramebufferStatus {
    Complete,
    /// Backend-specific status code.
    Incomplete(u32),
}

/// Capabilities queried once when a queue is created.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DriverLimits {
    /// Largest accepted texture width or height.
    pub max_texture_size: u32,
}

impl Default for DriverLimits {
    fn default() -> Self {
        Self { max_texture_size: 4096 }
    }
}

/// Vertex layout shared by every program: position then texture coordinate.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DrawVertex {
    pub position: [f32; 2],
    pub uv: [f32; 2],
}

impl DrawVertex {
    #[inline]
    pub const fn new(x: f32, y: f32, u: f32, v: f32) -> Self {
        Self { position: [x, y], uv: [u, v] }
    }
}

/// One uniform value handed to the driver during execution.
///
/// `data` is the raw value as stored in the uniform pool. For rounded rects
/// without `SEND_CORNERS` only the 16-byte bounds part is included.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct UniformUpload<'a> {
    pub location: u32,
    pub format: UniformFormat,
    pub array_count: u8,
    pub flags: UniformFlags,
    pub data: &'a [u8],
}

impl UniformUpload<'_> {
    /// Value decoded as floats. Empty for integer formats.
    pub fn floats(&self) -> Vec<f32> {
        if self.format.is_int() {
            return Vec::new();
        }
        bytemuck::pod_collect_to_vec(self.data)
    }

    /// Value decoded as integers. Empty for float formats.
    pub fn ints(&self) -> Vec<i32> {
        if !self.format.is_int() {
            return Vec::new();
        }
        bytemuck::pod_collect_to_vec(self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_bits_use_gl_values() {
        assert_eq!(ClearBits::ALL.bits(), 0x4500);
        assert_eq!(ClearBits::COLOR | ClearBits::DEPTH | ClearBits::STENCIL, ClearBits::ALL);

        let mut bits = ClearBits::empty();
        assert!(bits.is_empty());
        bits |= ClearBits::COLOR;
        assert!(bits.contains(ClearBits::COLOR) && !bits.contains(ClearBits::DEPTH));
    }
}
