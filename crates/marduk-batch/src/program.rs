//! Linked GPU program with a key → uniform location table.

use crate::coords::{ColorRgba, Mat4, RoundedRect};
use crate::driver::{Driver, ProgramId, TextureId, TextureTarget, TextureUnit, MAX_UNIFORM_LOCATIONS};
use crate::queue::CommandQueue;

/// Program handle plus the uniform locations it resolved.
///
/// Render code addresses uniforms by small integer keys shared across
/// programs. Setters for a key the program never resolved are ignored, so
/// the same drawing code works with programs that omit some uniforms.
///
/// A program must be released with [`Program::delete`]; dropping it
/// otherwise leaks the driver object and logs a warning.
#[derive(Debug)]
pub struct Program {
    id: ProgramId,
    name: String,
    locations: Vec<Option<u32>>,
    deleted: bool,
}

impl Program {
    pub fn new(id: ProgramId, name: impl Into<String>) -> Self {
        assert!(id != ProgramId::NONE, "program id 0 is reserved");
        Self {
            id,
            name: name.into(),
            locations: Vec::new(),
            deleted: false,
        }
    }

    #[inline]
    pub fn id(&self) -> ProgramId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolves `name` through the driver and stores it under `key`.
    ///
    /// Returns false when the program has no such uniform.
    pub fn add_uniform<D: Driver>(&mut self, queue: &CommandQueue<D>, name: &str, key: usize) -> bool {
        assert!(key < MAX_UNIFORM_LOCATIONS, "uniform key {key} out of range");

        let Some(location) = queue.uniform_location(self.id, name) else {
            log::trace!("program {}: no uniform {name}", self.name);
            return false;
        };

        if key >= self.locations.len() {
            self.locations.resize(key + 1, None);
        }
        self.locations[key] = Some(location);
        true
    }

    #[inline]
    pub fn location(&self, key: usize) -> Option<u32> {
        self.locations.get(key).copied().flatten()
    }

    pub fn set_uniform1f<D: Driver>(&self, queue: &mut CommandQueue<D>, key: usize, v0: f32) {
        if let Some(location) = self.location(key) {
            queue.set_uniform1f(self.id, location, v0);
        }
    }

    pub fn set_uniform2f<D: Driver>(&self, queue: &mut CommandQueue<D>, key: usize, v0: f32, v1: f32) {
        if let Some(location) = self.location(key) {
            queue.set_uniform2f(self.id, location, v0, v1);
        }
    }

    pub fn set_uniform4f<D: Driver>(&self, queue: &mut CommandQueue<D>, key: usize, v: [f32; 4]) {
        if let Some(location) = self.location(key) {
            queue.set_uniform4f(self.id, location, v);
        }
    }

    pub fn set_uniform1i<D: Driver>(&self, queue: &mut CommandQueue<D>, key: usize, v0: i32) {
        if let Some(location) = self.location(key) {
            queue.set_uniform1i(self.id, location, v0);
        }
    }

    pub fn set_uniform_matrix<D: Driver>(&self, queue: &mut CommandQueue<D>, key: usize, matrix: &Mat4) {
        if let Some(location) = self.location(key) {
            queue.set_uniform_matrix(self.id, location, matrix);
        }
    }

    pub fn set_uniform_rounded_rect<D: Driver>(&self, queue: &mut CommandQueue<D>, key: usize, rect: &RoundedRect) {
        if let Some(location) = self.location(key) {
            queue.set_uniform_rounded_rect(self.id, location, rect);
        }
    }

    pub fn set_uniform_color<D: Driver>(&self, queue: &mut CommandQueue<D>, key: usize, color: Option<&ColorRgba>) {
        if let Some(location) = self.location(key) {
            queue.set_uniform_color(self.id, location, color);
        }
    }

    /// Binds `texture` on `unit` and points the sampler at it.
    ///
    /// The bind is recorded even when the key is unknown; only the sampler
    /// uniform write is skipped.
    pub fn set_uniform_texture<D: Driver>(
        &self,
        queue: &mut CommandQueue<D>,
        key: usize,
        target: TextureTarget,
        unit: TextureUnit,
        texture: TextureId,
    ) {
        match self.location(key) {
            Some(location) => queue.set_uniform_texture(self.id, location, target, unit, texture),
            None => queue.bind_texture(unit, target, texture),
        }
    }

    /// Deletes the driver program and its cached uniform state.
    pub fn delete<D: Driver>(mut self, queue: &mut CommandQueue<D>) {
        queue.delete_program(self.id);
        self.deleted = true;
        log::debug!("deleted program {} ({:?})", self.name, self.id);
    }
}

impl Drop for Program {
    fn drop(&mut self) {
        if !self.deleted {
            log::warn!("leaking program {} ({:?}); call Program::delete", self.name, self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{DriverCall, RecordingDriver};
    use crate::queue::QueueConfig;

    const COLOR: usize = 0;
    const ALPHA: usize = 1;

    fn setup() -> (CommandQueue<RecordingDriver>, Program) {
        let mut driver = RecordingDriver::new();
        driver.register_uniform(ProgramId(4), "u_color", 12);
        let queue = CommandQueue::new(driver, QueueConfig::default());
        (queue, Program::new(ProgramId(4), "color"))
    }

    #[test]
    fn add_uniform_resolves_through_driver() {
        let (queue, mut program) = setup();
        assert!(program.add_uniform(&queue, "u_color", COLOR));
        assert!(!program.add_uniform(&queue, "u_alpha", ALPHA));
        assert_eq!(program.location(COLOR), Some(12));
        assert_eq!(program.location(ALPHA), None);
        assert_eq!(program.location(900), None);
    }

    #[test]
    fn setters_forward_to_resolved_location() {
        let (mut queue, mut program) = setup();
        program.add_uniform(&queue, "u_color", COLOR);

        program.set_uniform_color(&mut queue, COLOR, Some(&ColorRgba::white()));
        program.set_uniform1f(&mut queue, ALPHA, 0.5);

        assert!(queue.uniforms().info(ProgramId(4), 12).is_some());
        assert_eq!(queue.uniforms().changed_count(ProgramId(4)), 1);
        program.delete(&mut queue);
    }

    #[test]
    fn texture_setter_binds_even_without_sampler() {
        let (mut queue, program) = setup();
        let unit = TextureUnit::new(0);
        program.set_uniform_texture(&mut queue, 7, TextureTarget::Texture2D, unit, TextureId(9));
        assert_eq!(queue.attachments().texture(unit).id, TextureId(9));
        program.delete(&mut queue);
    }

    #[test]
    fn delete_releases_driver_program() {
        let (mut queue, mut program) = setup();
        program.add_uniform(&queue, "u_color", COLOR);
        program.set_uniform_color(&mut queue, COLOR, None);
        queue.driver_mut().clear_calls();

        program.delete(&mut queue);
        assert_eq!(queue.driver().calls(), &[DriverCall::DeleteProgram(ProgramId(4))]);
        assert!(queue.uniforms().info(ProgramId(4), 12).is_none());
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn key_out_of_range_panics() {
        let (queue, mut program) = setup();
        program.add_uniform(&queue, "u_color", MAX_UNIFORM_LOCATIONS);
    }
}
