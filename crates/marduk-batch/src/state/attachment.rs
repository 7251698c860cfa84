use crate::driver::{Driver, FramebufferId, TextureId, TextureTarget, TextureUnit, MAX_TEXTURE_UNITS};

/// Tracked binding of one texture unit.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TextureBinding {
    pub unit: TextureUnit,
    pub target: TextureTarget,
    pub id: TextureId,
    changed: bool,
    initial: bool,
}

impl TextureBinding {
    const fn initial(unit: usize) -> Self {
        Self {
            unit: TextureUnit::new(unit),
            target: TextureTarget::Texture2D,
            id: TextureId::NONE,
            changed: false,
            initial: true,
        }
    }

    #[inline]
    pub fn is_changed(&self) -> bool {
        self.changed
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct FramebufferBinding {
    id: FramebufferId,
    changed: bool,
}

/// Opaque copy of an [`AttachmentState`], produced by `save`.
#[must_use = "a saved attachment state should be restored"]
#[derive(Debug, Clone)]
pub struct SavedAttachments(AttachmentState);

/// Shadow of the framebuffer and texture-unit bindings the recorded batches
/// will observe.
///
/// Binding calls only update this tracker. The pending texture changes are
/// collected into each draw batch by `take_changed_textures`, which is how
/// redundant binds are kept out of the executed stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentState {
    framebuffer: FramebufferBinding,
    textures: [TextureBinding; MAX_TEXTURE_UNITS],
    has_texture_change: bool,
}

impl Default for AttachmentState {
    fn default() -> Self {
        Self::new()
    }
}

impl AttachmentState {
    pub fn new() -> Self {
        Self {
            framebuffer: FramebufferBinding { id: FramebufferId::DEFAULT, changed: false },
            textures: core::array::from_fn(TextureBinding::initial),
            has_texture_change: false,
        }
    }

    /// Back to the state right after `begin_frame`: default framebuffer,
    /// every unit unbound.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn bind_texture(&mut self, unit: TextureUnit, target: TextureTarget, id: TextureId) {
        let binding = &mut self.textures[unit.index()];
        if binding.target == target && binding.id == id {
            return;
        }

        binding.target = target;
        binding.id = id;
        binding.changed = true;
        binding.initial = false;
        self.has_texture_change = true;
    }

    pub fn bind_framebuffer(&mut self, id: FramebufferId) {
        if self.framebuffer.id != id {
            self.framebuffer = FramebufferBinding { id, changed: true };
        }
    }

    #[inline]
    pub fn framebuffer(&self) -> FramebufferId {
        self.framebuffer.id
    }

    #[inline]
    pub fn framebuffer_changed(&self) -> bool {
        self.framebuffer.changed
    }

    /// Called once the current framebuffer has been stamped on a batch.
    pub fn clear_framebuffer_change(&mut self) {
        self.framebuffer.changed = false;
    }

    #[inline]
    pub fn texture(&self, unit: TextureUnit) -> &TextureBinding {
        &self.textures[unit.index()]
    }

    #[inline]
    pub fn has_texture_change(&self) -> bool {
        self.has_texture_change
    }

    /// Reports every changed unit, in unit order, and clears the flags.
    pub fn take_changed_textures<F>(&mut self, mut visit: F)
    where
        F: FnMut(&TextureBinding),
    {
        if !self.has_texture_change {
            return;
        }
        for binding in self.textures.iter_mut().filter(|b| b.changed) {
            visit(binding);
            binding.changed = false;
        }
        self.has_texture_change = false;
    }

    /// Copies the current bindings with every changed flag cleared.
    pub fn save(&self) -> SavedAttachments {
        let mut copy = self.clone();
        copy.framebuffer.changed = false;
        for binding in &mut copy.textures {
            binding.changed = false;
        }
        copy.has_texture_change = false;
        SavedAttachments(copy)
    }

    /// Rebinds the saved state on `driver` and makes it current again.
    ///
    /// The framebuffer and every unit that was ever bound are re-issued
    /// directly, since driver-level work between save and restore may have
    /// clobbered them. A unit stays flagged as changed if it was already
    /// pending, or if its binding differed from the saved one, so the next
    /// draw batch still carries it.
    pub fn restore<D: Driver + ?Sized>(&mut self, saved: SavedAttachments, driver: &mut D) {
        let saved = saved.0;

        driver.bind_framebuffer(saved.framebuffer.id);
        for binding in saved.textures.iter().filter(|b| !b.initial) {
            driver.bind_texture(binding.unit, binding.target, binding.id);
        }

        let fb_changed = self.framebuffer.changed || self.framebuffer.id != saved.framebuffer.id;
        self.framebuffer = FramebufferBinding { id: saved.framebuffer.id, changed: fb_changed };

        for (current, old) in self.textures.iter_mut().zip(saved.textures.iter()) {
            let changed = current.changed || current.target != old.target || current.id != old.id;
            *current = TextureBinding { changed, ..*old };
            if changed {
                self.has_texture_change = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{DriverCall, RecordingDriver};

    fn unit(i: usize) -> TextureUnit {
        TextureUnit::new(i)
    }

    fn collect(state: &mut AttachmentState) -> Vec<(usize, TextureId)> {
        let mut out = Vec::new();
        state.take_changed_textures(|b| out.push((b.unit.index(), b.id)));
        out
    }

    // ── dedup ─────────────────────────────────────────────────────────────

    #[test]
    fn rebinding_same_texture_is_not_a_change() {
        let mut s = AttachmentState::new();
        s.bind_texture(unit(0), TextureTarget::Texture2D, TextureId(5));
        assert_eq!(collect(&mut s), vec![(0, TextureId(5))]);

        s.bind_texture(unit(0), TextureTarget::Texture2D, TextureId(5));
        assert!(!s.has_texture_change());
        assert!(collect(&mut s).is_empty());
    }

    #[test]
    fn changed_units_reported_in_order() {
        let mut s = AttachmentState::new();
        s.bind_texture(unit(3), TextureTarget::Texture2D, TextureId(1));
        s.bind_texture(unit(1), TextureTarget::Texture2D, TextureId(2));
        assert_eq!(collect(&mut s), vec![(1, TextureId(2)), (3, TextureId(1))]);
    }

    #[test]
    fn target_change_counts_as_change() {
        let mut s = AttachmentState::new();
        s.bind_texture(unit(0), TextureTarget::Texture2D, TextureId(1));
        let _ = collect(&mut s);
        s.bind_texture(unit(0), TextureTarget::Texture3D, TextureId(1));
        assert_eq!(collect(&mut s).len(), 1);
    }

    #[test]
    fn framebuffer_dedup() {
        let mut s = AttachmentState::new();
        s.bind_framebuffer(FramebufferId::DEFAULT);
        assert!(!s.framebuffer_changed());
        s.bind_framebuffer(FramebufferId(2));
        assert!(s.framebuffer_changed());
        s.clear_framebuffer_change();
        s.bind_framebuffer(FramebufferId(2));
        assert!(!s.framebuffer_changed());
    }

    // ── save / restore ────────────────────────────────────────────────────

    #[test]
    fn restore_rebinds_saved_state_on_driver() {
        let mut s = AttachmentState::new();
        s.bind_framebuffer(FramebufferId(4));
        s.bind_texture(unit(2), TextureTarget::Texture2D, TextureId(9));
        let saved = s.save();

        let mut driver = RecordingDriver::new();
        s.restore(saved, &mut driver);

        assert_eq!(
            driver.calls(),
            &[
                DriverCall::BindFramebuffer(FramebufferId(4)),
                DriverCall::BindTexture { unit: unit(2), target: TextureTarget::Texture2D, id: TextureId(9) },
            ]
        );
    }

    #[test]
    fn save_restore_round_trip_preserves_pending_changes() {
        let mut s = AttachmentState::new();
        s.bind_texture(unit(0), TextureTarget::Texture2D, TextureId(1));

        let saved = s.save();
        s.bind_texture(unit(0), TextureTarget::Texture2D, TextureId(7));
        s.bind_framebuffer(FramebufferId(3));
        s.restore(saved, &mut RecordingDriver::new());

        assert_eq!(s.framebuffer(), FramebufferId::DEFAULT);
        assert_eq!(s.texture(unit(0)).id, TextureId(1));
        assert_eq!(collect(&mut s), vec![(0, TextureId(1))]);
    }

    #[test]
    fn restore_flags_units_clobbered_in_between() {
        let mut s = AttachmentState::new();
        s.bind_texture(unit(1), TextureTarget::Texture2D, TextureId(1));
        let _ = collect(&mut s);

        let saved = s.save();
        s.bind_texture(unit(1), TextureTarget::Texture2D, TextureId(2));
        s.restore(saved, &mut RecordingDriver::new());

        assert_eq!(collect(&mut s), vec![(1, TextureId(1))]);
    }

    #[test]
    fn untouched_restore_is_clean() {
        let mut s = AttachmentState::new();
        s.bind_texture(unit(1), TextureTarget::Texture2D, TextureId(1));
        let _ = collect(&mut s);

        let saved = s.save();
        s.restore(saved, &mut RecordingDriver::new());
        assert!(!s.has_texture_change());
        assert!(!s.framebuffer_changed());
    }
}
