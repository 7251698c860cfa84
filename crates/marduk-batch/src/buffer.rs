//! Host-side vertex staging with rotating GPU shadow buffers.

use bytemuck::Pod;

use crate::driver::{BufferId, Driver};

/// Minimum number of GPU buffers rotated between submits.
pub const MIN_SHADOW_BUFFERS: usize = 2;

/// Growth granularity for GPU allocations, in bytes.
const PAGE_SIZE: usize = 4096;

#[derive(Debug, Copy, Clone)]
struct Shadow {
    id: BufferId,
    size_on_gpu: usize,
}

/// Append-only staging area for one frame's vertices.
///
/// Elements are appended with `advance`; `submit` uploads everything into
/// the current GPU shadow, rotates to the next one and empties the host
/// side. Rotating keeps a buffer that the GPU may still be reading from out
/// of the next upload.
#[derive(Debug)]
pub struct GrowableBuffer<T: Pod> {
    host: Vec<T>,
    shadows: Vec<Shadow>,
    current: usize,
}

impl<T: Pod> GrowableBuffer<T> {
    /// Creates `shadow_count` GPU buffers sized for `reserved` elements.
    pub fn new<D: Driver + ?Sized>(driver: &mut D, shadow_count: usize, reserved: usize) -> Self {
        assert!(
            shadow_count >= MIN_SHADOW_BUFFERS,
            "at least {MIN_SHADOW_BUFFERS} shadow buffers are required"
        );

        let size = (reserved * size_of::<T>()).max(PAGE_SIZE);
        let shadows = (0..shadow_count)
            .map(|_| Shadow { id: driver.create_buffer(size), size_on_gpu: size })
            .collect();

        Self {
            host: Vec::with_capacity(reserved),
            shadows,
            current: 0,
        }
    }

    /// Appends `count` zeroed elements and returns the index of the first
    /// one together with the slice to fill in.
    pub fn advance(&mut self, count: usize) -> (u32, &mut [T]) {
        let start = self.host.len();
        assert!(start + count <= u32::MAX as usize, "vertex staging overflow");
        self.host.resize(start + count, T::zeroed());
        (start as u32, &mut self.host[start..])
    }

    /// Number of elements staged since the last submit.
    #[inline]
    pub fn offset(&self) -> u32 {
        self.host.len() as u32
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.host.is_empty()
    }

    /// Uploads the staged elements and returns the buffer that now holds them.
    ///
    /// Empty staging skips the upload; the current shadow is still returned
    /// and rotated so binding it stays valid.
    pub fn submit<D: Driver + ?Sized>(&mut self, driver: &mut D) -> BufferId {
        let shadow = &mut self.shadows[self.current];

        if !self.host.is_empty() {
            let bytes: &[u8] = bytemuck::cast_slice(&self.host);
            if bytes.len() > shadow.size_on_gpu {
                let size = (bytes.len() & !(PAGE_SIZE - 1)) + 4 * PAGE_SIZE;
                log::debug!("growing vertex buffer {:?}: {} -> {} bytes", shadow.id, shadow.size_on_gpu, size);
                driver.delete_buffer(shadow.id);
                shadow.id = driver.create_buffer(size);
                shadow.size_on_gpu = size;
            }
            driver.upload_buffer(shadow.id, bytes);
        }

        let id = shadow.id;
        self.current = (self.current + 1) % self.shadows.len();
        self.host.clear();
        id
    }

    /// Drops staged elements without uploading them.
    pub fn discard(&mut self) {
        self.host.clear();
    }

    /// Deletes every GPU shadow. The buffer must not be used afterwards.
    pub fn release<D: Driver + ?Sized>(&mut self, driver: &mut D) {
        for shadow in self.shadows.drain(..) {
            driver.delete_buffer(shadow.id);
        }
        self.host.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{DrawVertex, DriverCall, RecordingDriver};

    fn uploads(driver: &RecordingDriver) -> Vec<(BufferId, usize)> {
        driver
            .calls()
            .iter()
            .filter_map(|c| match c {
                DriverCall::UploadBuffer { id, data } => Some((*id, data.len())),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn creates_shadows_up_front() {
        let mut d = RecordingDriver::new();
        let _buf: GrowableBuffer<DrawVertex> = GrowableBuffer::new(&mut d, 2, 1024);
        assert_eq!(
            d.calls(),
            &[
                DriverCall::CreateBuffer { id: BufferId(1), size: 1024 * 16 },
                DriverCall::CreateBuffer { id: BufferId(2), size: 1024 * 16 },
            ]
        );
    }

    #[test]
    fn advance_returns_running_offsets_and_zeroed_slots() {
        let mut d = RecordingDriver::new();
        let mut buf: GrowableBuffer<DrawVertex> = GrowableBuffer::new(&mut d, 2, 16);

        let (first, slots) = buf.advance(6);
        assert_eq!(first, 0);
        assert!(slots.iter().all(|v| *v == DrawVertex::default()));
        slots[0] = DrawVertex::new(1.0, 2.0, 0.0, 0.0);

        let (second, _) = buf.advance(6);
        assert_eq!(second, 6);
        assert_eq!(buf.offset(), 12);
    }

    #[test]
    fn submit_uploads_rotates_and_resets() {
        let mut d = RecordingDriver::new();
        let mut buf: GrowableBuffer<DrawVertex> = GrowableBuffer::new(&mut d, 2, 16);
        d.clear_calls();

        buf.advance(6);
        assert_eq!(buf.submit(&mut d), BufferId(1));
        assert_eq!(buf.offset(), 0);

        buf.advance(3);
        assert_eq!(buf.submit(&mut d), BufferId(2));

        buf.advance(1);
        assert_eq!(buf.submit(&mut d), BufferId(1));

        assert_eq!(uploads(&d), vec![(BufferId(1), 96), (BufferId(2), 48), (BufferId(1), 16)]);
    }

    #[test]
    fn empty_submit_skips_upload() {
        let mut d = RecordingDriver::new();
        let mut buf: GrowableBuffer<DrawVertex> = GrowableBuffer::new(&mut d, 2, 16);
        d.clear_calls();

        assert_eq!(buf.submit(&mut d), BufferId(1));
        assert!(d.calls().is_empty());
    }

    #[test]
    fn oversized_submit_regrows_page_aligned() {
        let mut d = RecordingDriver::new();
        let mut buf: GrowableBuffer<DrawVertex> = GrowableBuffer::new(&mut d, 2, 16);
        d.clear_calls();

        // 600 vertices * 16 bytes = 9600 bytes > 4096
        buf.advance(600);
        let id = buf.submit(&mut d);

        assert_eq!(
            d.calls()[..2],
            [
                DriverCall::DeleteBuffer(BufferId(1)),
                DriverCall::CreateBuffer { id: BufferId(3), size: 8192 + 4 * 4096 },
            ]
        );
        assert_eq!(id, BufferId(3));
        assert_eq!(uploads(&d), vec![(BufferId(3), 9600)]);
    }

    #[test]
    fn release_deletes_all_shadows() {
        let mut d = RecordingDriver::new();
        let mut buf: GrowableBuffer<DrawVertex> = GrowableBuffer::new(&mut d, 3, 16);
        d.clear_calls();
        buf.release(&mut d);
        assert_eq!(d.count(|c| matches!(c, DriverCall::DeleteBuffer(_))), 3);
    }

    #[test]
    #[should_panic(expected = "shadow buffers")]
    fn single_shadow_is_rejected() {
        let mut d = RecordingDriver::new();
        let _buf: GrowableBuffer<DrawVertex> = GrowableBuffer::new(&mut d, 1, 16);
    }
}
