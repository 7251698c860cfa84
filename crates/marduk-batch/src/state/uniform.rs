use crate::coords::{ColorRgba, Mat4, RoundedRect};
use crate::driver::{ProgramId, TextureUnit, MAX_UNIFORM_ARRAY_LEN, MAX_UNIFORM_LOCATIONS};

/// Value layout of a uniform slot.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum UniformFormat {
    Float1,
    Float2,
    Float3,
    Float4,
    FloatVec1,
    FloatVec2,
    FloatVec3,
    FloatVec4,
    Int1,
    Int2,
    Int3,
    Int4,
    /// Texture unit index.
    Texture,
    Matrix,
    RoundedRect,
    Color,
}

impl UniformFormat {
    /// Size in bytes of one element.
    pub const fn element_size(self) -> usize {
        use UniformFormat::*;
        match self {
            Float1 | FloatVec1 | Int1 | Texture => 4,
            Float2 | FloatVec2 | Int2 => 8,
            Float3 | FloatVec3 | Int3 => 12,
            Float4 | FloatVec4 | Int4 | Color => 16,
            Matrix => 64,
            RoundedRect => 48,
        }
    }

    pub const fn is_int(self) -> bool {
        matches!(self, Self::Int1 | Self::Int2 | Self::Int3 | Self::Int4 | Self::Texture)
    }
}

bitflags::bitflags! {
    /// Per-slot flag bits.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct UniformFlags: u8 {
        /// The corner part of a rounded-rect value changed and must be uploaded.
        const SEND_CORNERS = 1;
    }
}

/// Metadata of one uniform slot: where its current value lives in the pool.
///
/// Batches snapshot this record; the offset stays valid until the pool is
/// compacted at end of frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct UniformInfo {
    pub format: UniformFormat,
    pub array_count: u8,
    pub flags: UniformFlags,
    pub offset: u32,
    changed: bool,
    initial: bool,
}

impl UniformInfo {
    /// Bytes occupied in the pool.
    pub fn byte_len(&self) -> usize {
        self.format.element_size() * usize::from(self.array_count.max(1))
    }

    /// Bytes that need to reach the driver.
    ///
    /// A rounded rect whose corners are unchanged only uploads its bounds.
    pub fn upload_len(&self) -> usize {
        if self.format == UniformFormat::RoundedRect && !self.flags.contains(UniformFlags::SEND_CORNERS) {
            16
        } else {
            self.byte_len()
        }
    }

    #[inline]
    pub fn is_changed(&self) -> bool {
        self.changed
    }
}

#[derive(Debug, Default)]
struct ProgramUniforms {
    slots: Vec<Option<UniformInfo>>,
    n_changed: u32,
}

/// Deduplicating cache of uniform values for every program.
///
/// Writes that equal the stored value are dropped. A changed value is
/// appended to a bump-allocated byte pool rather than overwritten, so every
/// batch recorded earlier in the frame keeps pointing at the value it saw.
#[derive(Debug, Default)]
pub struct UniformState {
    programs: Vec<Option<ProgramUniforms>>,
    data: Vec<u8>,
}

impl UniformState {
    pub fn new() -> Self {
        Self::default()
    }

    // ── setters ───────────────────────────────────────────────────────────

    pub fn set_1f(&mut self, program: ProgramId, location: u32, v0: f32) {
        self.set_bytes(program, location, UniformFormat::Float1, 1, bytemuck::bytes_of(&v0));
    }

    pub fn set_2f(&mut self, program: ProgramId, location: u32, v0: f32, v1: f32) {
        self.set_bytes(program, location, UniformFormat::Float2, 1, bytemuck::bytes_of(&[v0, v1]));
    }

    pub fn set_3f(&mut self, program: ProgramId, location: u32, v0: f32, v1: f32, v2: f32) {
        self.set_bytes(program, location, UniformFormat::Float3, 1, bytemuck::bytes_of(&[v0, v1, v2]));
    }

    pub fn set_4f(&mut self, program: ProgramId, location: u32, v: [f32; 4]) {
        self.set_bytes(program, location, UniformFormat::Float4, 1, bytemuck::bytes_of(&v));
    }

    pub fn set_1fv(&mut self, program: ProgramId, location: u32, values: &[f32]) {
        self.set_bytes(program, location, UniformFormat::FloatVec1, values.len(), bytemuck::cast_slice(values));
    }

    pub fn set_2fv(&mut self, program: ProgramId, location: u32, values: &[[f32; 2]]) {
        self.set_bytes(program, location, UniformFormat::FloatVec2, values.len(), bytemuck::cast_slice(values));
    }

    pub fn set_3fv(&mut self, program: ProgramId, location: u32, values: &[[f32; 3]]) {
        self.set_bytes(program, location, UniformFormat::FloatVec3, values.len(), bytemuck::cast_slice(values));
    }

    pub fn set_4fv(&mut self, program: ProgramId, location: u32, values: &[[f32; 4]]) {
        self.set_bytes(program, location, UniformFormat::FloatVec4, values.len(), bytemuck::cast_slice(values));
    }

    pub fn set_1i(&mut self, program: ProgramId, location: u32, v0: i32) {
        self.set_bytes(program, location, UniformFormat::Int1, 1, bytemuck::bytes_of(&v0));
    }

    pub fn set_2i(&mut self, program: ProgramId, location: u32, v0: i32, v1: i32) {
        self.set_bytes(program, location, UniformFormat::Int2, 1, bytemuck::bytes_of(&[v0, v1]));
    }

    pub fn set_3i(&mut self, program: ProgramId, location: u32, v0: i32, v1: i32, v2: i32) {
        self.set_bytes(program, location, UniformFormat::Int3, 1, bytemuck::bytes_of(&[v0, v1, v2]));
    }

    pub fn set_4i(&mut self, program: ProgramId, location: u32, v: [i32; 4]) {
        self.set_bytes(program, location, UniformFormat::Int4, 1, bytemuck::bytes_of(&v));
    }

    pub fn set_texture(&mut self, program: ProgramId, location: u32, unit: TextureUnit) {
        let unit = unit.index() as u32;
        self.set_bytes(program, location, UniformFormat::Texture, 1, bytemuck::bytes_of(&unit));
    }

    pub fn set_matrix(&mut self, program: ProgramId, location: u32, matrix: &Mat4) {
        self.set_bytes(program, location, UniformFormat::Matrix, 1, bytemuck::bytes_of(matrix));
    }

    /// `None` stores transparent black.
    pub fn set_color(&mut self, program: ProgramId, location: u32, color: Option<&ColorRgba>) {
        let color = color.copied().unwrap_or_else(ColorRgba::transparent);
        self.set_bytes(program, location, UniformFormat::Color, 1, bytemuck::bytes_of(&color));
    }

    /// Stores a rounded rect, marking `SEND_CORNERS` when any corner differs
    /// from the stored value.
    ///
    /// Unlike the other setters the comparison is by float value, so `-0.0`
    /// matches `0.0` and a NaN component never matches.
    pub fn set_rounded_rect(&mut self, program: ProgramId, location: u32, rect: &RoundedRect) {
        let value = rect.to_uniform();
        let info = self.slot(program, location, UniformFormat::RoundedRect, 1);

        let send_corners = if info.initial {
            true
        } else {
            let stored: [f32; 12] = bytemuck::pod_read_unaligned(self.stored(&info));
            if stored == value {
                return;
            }
            stored[4..] != value[4..]
        };

        let flags = if send_corners { UniformFlags::SEND_CORNERS } else { UniformFlags::empty() };
        self.replace(program, location, bytemuck::bytes_of(&value), flags);
    }

    // ── frame lifecycle ───────────────────────────────────────────────────

    /// Reports every changed slot of `program` to `visit`, then clears the
    /// changed state (including `SEND_CORNERS`).
    pub fn snapshot<F>(&mut self, program: ProgramId, mut visit: F)
    where
        F: FnMut(u32, &UniformInfo),
    {
        let Some(Some(uniforms)) = self.programs.get_mut(program.0 as usize) else { return };
        if uniforms.n_changed == 0 {
            return;
        }

        for (location, slot) in uniforms.slots.iter_mut().enumerate() {
            let Some(info) = slot else { continue };
            if !info.changed {
                continue;
            }
            visit(location as u32, info);
            info.changed = false;
            info.flags.remove(UniformFlags::SEND_CORNERS);
        }

        uniforms.n_changed = 0;
    }

    /// Flags a slot for upload again, e.g. after the batch that carried its
    /// snapshot was dropped unexecuted. Rounded rects resend their corners.
    pub fn mark_changed(&mut self, program: ProgramId, location: u32) {
        let Some(Some(uniforms)) = self.programs.get_mut(program.0 as usize) else { return };
        let Some(Some(info)) = uniforms.slots.get_mut(location as usize) else { return };
        if info.initial || info.changed {
            return;
        }

        info.changed = true;
        if info.format == UniformFormat::RoundedRect {
            info.flags |= UniformFlags::SEND_CORNERS;
        }
        uniforms.n_changed += 1;
    }

    /// Number of slots of `program` changed since its last snapshot.
    pub fn changed_count(&self, program: ProgramId) -> u32 {
        match self.programs.get(program.0 as usize) {
            Some(Some(uniforms)) => uniforms.n_changed,
            _ => 0,
        }
    }

    /// Current metadata of a slot, if it was ever written.
    pub fn info(&self, program: ProgramId, location: u32) -> Option<UniformInfo> {
        match self.programs.get(program.0 as usize) {
            Some(Some(uniforms)) => uniforms.slots.get(location as usize).copied().flatten(),
            _ => None,
        }
    }

    /// Bytes a snapshotted `info` refers to, trimmed to its upload length.
    pub fn value_bytes(&self, info: &UniformInfo) -> &[u8] {
        let start = info.offset as usize;
        &self.data[start..start + info.upload_len()]
    }

    /// Forgets every slot of `program`.
    pub fn clear_program(&mut self, program: ProgramId) {
        if let Some(entry) = self.programs.get_mut(program.0 as usize) {
            *entry = None;
        }
    }

    /// Compacts the pool down to the live value of every slot.
    ///
    /// Pending changed flags survive, so a write that was never snapshotted
    /// still reaches the driver next frame.
    pub fn end_frame(&mut self) {
        let mut data = Vec::with_capacity(self.data.len().min(64 * 1024));

        for uniforms in self.programs.iter_mut().flatten() {
            for info in uniforms.slots.iter_mut().flatten() {
                if info.initial {
                    continue;
                }
                let len = info.byte_len();
                let start = info.offset as usize;
                let offset = alloc(&mut data, len);
                data[offset..offset + len].copy_from_slice(&self.data[start..start + len]);
                info.offset = offset as u32;
            }
        }

        log::trace!("uniform pool compacted: {} -> {} bytes", self.data.len(), data.len());
        self.data = data;
    }

    pub fn pool_len(&self) -> usize {
        self.data.len()
    }

    // ── internals ─────────────────────────────────────────────────────────

    fn set_bytes(&mut self, program: ProgramId, location: u32, format: UniformFormat, count: usize, value: &[u8]) {
        assert!(count >= 1, "uniform array must not be empty");
        assert!(count <= MAX_UNIFORM_ARRAY_LEN, "uniform array of {count} elements exceeds {MAX_UNIFORM_ARRAY_LEN}");

        let info = self.slot(program, location, format, count as u8);
        debug_assert_eq!(value.len(), info.byte_len());

        if !info.initial && self.stored(&info) == value {
            return;
        }

        self.replace(program, location, value, UniformFlags::empty());
    }

    /// Looks up (or creates) a slot and checks its declared layout.
    fn slot(&mut self, program: ProgramId, location: u32, format: UniformFormat, array_count: u8) -> UniformInfo {
        assert!(program != ProgramId::NONE, "uniform write to program 0");
        assert!(
            (location as usize) < MAX_UNIFORM_LOCATIONS,
            "uniform location {location} out of range"
        );

        let index = program.0 as usize;
        if index >= self.programs.len() {
            self.programs.resize_with(index + 1, || None);
        }
        let uniforms = self.programs[index].get_or_insert_with(ProgramUniforms::default);

        let location = location as usize;
        if location >= uniforms.slots.len() {
            uniforms.slots.resize(location + 1, None);
        }

        match uniforms.slots[location] {
            Some(info) => {
                assert!(
                    info.format == format && info.array_count == array_count,
                    "uniform {location} of program {} is {:?}[{}], written as {:?}[{}]",
                    program.0,
                    info.format,
                    info.array_count,
                    format,
                    array_count,
                );
                info
            }
            None => {
                let info = UniformInfo {
                    format,
                    array_count,
                    flags: UniformFlags::empty(),
                    offset: 0,
                    changed: false,
                    initial: true,
                };
                uniforms.slots[location] = Some(info);
                info
            }
        }
    }

    fn stored(&self, info: &UniformInfo) -> &[u8] {
        let start = info.offset as usize;
        &self.data[start..start + info.byte_len()]
    }

    /// Appends `value` to the pool and points the slot at it.
    fn replace(&mut self, program: ProgramId, location: u32, value: &[u8], flags: UniformFlags) {
        let offset = alloc(&mut self.data, value.len());
        self.data[offset..offset + value.len()].copy_from_slice(value);
        assert!(self.data.len() <= u32::MAX as usize, "uniform pool exhausted");

        let Some(Some(uniforms)) = self.programs.get_mut(program.0 as usize) else { return };
        let Some(Some(info)) = uniforms.slots.get_mut(location as usize) else { return };

        info.offset = offset as u32;
        info.flags |= flags;
        info.initial = false;
        if !info.changed {
            info.changed = true;
            uniforms.n_changed += 1;
        }
    }
}

/// Bump-allocates `size` bytes, aligned to the pointer size for values
/// larger than four bytes.
fn alloc(pool: &mut Vec<u8>, size: usize) -> usize {
    let align = if size > 4 { size_of::<usize>() } else { 4 };
    let offset = pool.len().next_multiple_of(align);
    pool.resize(offset + size, 0);
    offset
}
