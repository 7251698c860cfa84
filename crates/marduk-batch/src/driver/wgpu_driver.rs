//! wgpu implementation of [`Driver`].
//!
//! wgpu has no global bind state, so the GL-style calls are emulated: bind
//! calls only update fields here, and every clear or draw opens its own
//! render pass against the currently bound target. Passes are recorded
//! into one lazily created encoder that is submitted at `end_execute`.

use std::collections::HashMap;

use anyhow::{Context, Result};

use crate::coords::Viewport;
use crate::state::UniformFormat;

use super::{
    BufferId, ClearBits, DrawVertex, Driver, DriverLimits, FilterMode, FramebufferId, FramebufferStatus,
    ProgramId, TextureFilters, TextureId, TextureTarget, TextureUnit, UniformUpload, MAX_TEXTURE_UNITS,
};

/// Sampler locations start here; lower locations address the uniform block.
const SAMPLER_LOCATION_BASE: u32 = 512;

/// Status reported for a framebuffer whose attachment does not exist.
const INCOMPLETE_ATTACHMENT: u32 = 0x8CD6;

const VERTEX_ATTRS: [wgpu::VertexAttribute; 2] = wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2];

/// Initialization parameters for [`WgpuDriver`].
#[derive(Debug, Clone)]
pub struct WgpuDriverInit {
    pub label: &'static str,

    /// Only used by [`WgpuDriver::headless`].
    pub power_preference: wgpu::PowerPreference,

    /// Format of the default target and of every texture the driver
    /// creates. Uploaded texel data must be 4 bytes per texel in this format.
    pub target_format: wgpu::TextureFormat,

    pub required_features: wgpu::Features,
    pub required_limits: wgpu::Limits,
}

impl Default for WgpuDriverInit {
    fn default() -> Self {
        Self {
            label: "marduk-batch",
            power_preference: wgpu::PowerPreference::HighPerformance,
            target_format: wgpu::TextureFormat::Rgba8Unorm,
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
        }
    }
}

/// A compiled pipeline registered as a driver program.
///
/// The bind group layout must follow [`WgpuDriver::program_layout`]:
/// binding 0 is the uniform block, then a texture/sampler pair per entry in
/// `samplers`.
pub struct WgpuProgramDesc {
    pub label: String,
    pub pipeline: wgpu::RenderPipeline,
    pub bind_group_layout: wgpu::BindGroupLayout,
    /// Size in bytes of the uniform block at binding 0.
    pub uniform_block_size: u64,
    /// Uniform names and their byte offsets inside the block.
    pub uniforms: Vec<(String, u64)>,
    /// Sampler uniform names, in binding order.
    pub samplers: Vec<String>,
}

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
    filters: TextureFilters,
}

struct GpuProgram {
    label: String,
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
    uniform_buffer: wgpu::Buffer,
    /// Host copy of the uniform block, written to the GPU before a draw.
    shadow: Vec<u8>,
    uniforms: Vec<(String, u64)>,
    samplers: Vec<String>,
    sampler_units: Vec<TextureUnit>,
    dirty: bool,
    /// Referenced by a pass in the unsubmitted encoder.
    in_flight: bool,
    /// Last bind group built, keyed by the texture sampled in each slot.
    bind_group: Option<(Vec<TextureId>, wgpu::BindGroup)>,
}

struct DefaultTarget {
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

struct TargetRef<'a> {
    view: &'a wgpu::TextureView,
    width: u32,
    height: u32,
}

/// [`Driver`] backed by a wgpu device.
pub struct WgpuDriver {
    device: wgpu::Device,
    queue: wgpu::Queue,
    label: &'static str,
    format: wgpu::TextureFormat,

    default_target: Option<DefaultTarget>,
    /// Texture owned by a headless driver, rendered to as the default target.
    offscreen: Option<wgpu::Texture>,

    textures: HashMap<TextureId, GpuTexture>,
    framebuffers: HashMap<FramebufferId, Option<TextureId>>,
    buffers: HashMap<BufferId, wgpu::Buffer>,
    programs: HashMap<ProgramId, GpuProgram>,
    next_texture: u32,
    next_framebuffer: u32,
    next_buffer: u32,
    next_program: u32,

    /// Indexed by `sampler_index`.
    samplers: [wgpu::Sampler; 4],
    fallback: GpuTexture,

    framebuffer: FramebufferId,
    units: [TextureId; MAX_TEXTURE_UNITS],
    vertex_buffer: Option<BufferId>,
    program: ProgramId,
    viewport: Option<Viewport>,

    encoder: Option<wgpu::CommandEncoder>,
    debug_stack: Vec<String>,
}

impl WgpuDriver {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, init: &WgpuDriverInit) -> Self {
        let samplers = [
            create_sampler(&device, FilterMode::Nearest, FilterMode::Nearest),
            create_sampler(&device, FilterMode::Nearest, FilterMode::Linear),
            create_sampler(&device, FilterMode::Linear, FilterMode::Nearest),
            create_sampler(&device, FilterMode::Linear, FilterMode::Linear),
        ];

        let fallback = create_gpu_texture(&device, "marduk-batch fallback texture", init.target_format, 1, 1, TextureFilters::NEAREST);
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &fallback.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &[255; 4],
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4),
                rows_per_image: Some(1),
            },
            wgpu::Extent3d { width: 1, height: 1, depth_or_array_layers: 1 },
        );

        Self {
            device,
            queue,
            label: init.label,
            format: init.target_format,
            default_target: None,
            offscreen: None,
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            buffers: HashMap::new(),
            programs: HashMap::new(),
            next_texture: 1,
            next_framebuffer: 1,
            next_buffer: 1,
            next_program: 1,
            samplers,
            fallback,
            framebuffer: FramebufferId::DEFAULT,
            units: [TextureId::NONE; MAX_TEXTURE_UNITS],
            vertex_buffer: None,
            program: ProgramId::NONE,
            viewport: None,
            encoder: None,
            debug_stack: Vec::new(),
        }
    }

    /// Creates a device without a surface and a `width` x `height` texture
    /// serving as the default framebuffer. Read it back with
    /// [`WgpuDriver::read_pixels`].
    pub async fn headless(init: WgpuDriverInit, width: u32, height: u32) -> Result<Self> {
        anyhow::ensure!(width > 0 && height > 0, "headless target has zero size");

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: init.power_preference,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .context("failed to find a suitable GPU adapter")?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some(init.label),
                required_features: init.required_features,
                required_limits: init.required_limits.clone(),
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await
            .context("failed to create wgpu device/queue")?;

        log::info!("headless driver on {:?}", adapter.get_info().name);

        let mut driver = Self::new(device, queue, &init);
        let target = create_gpu_texture(&driver.device, "marduk-batch headless target", driver.format, width, height, TextureFilters::NEAREST);
        driver.set_default_target(target.view, width, height);
        driver.offscreen = Some(target.texture);
        Ok(driver)
    }

    /// Sets the view drawn to when framebuffer 0 is bound, typically the
    /// current surface texture.
    pub fn set_default_target(&mut self, view: wgpu::TextureView, width: u32, height: u32) {
        self.default_target = Some(DefaultTarget { view, width, height });
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn target_format(&self) -> wgpu::TextureFormat {
        self.format
    }

    /// Bind group layout matching what the driver binds for a program with
    /// `sampler_count` samplers.
    pub fn program_layout(&self, label: &str, sampler_count: usize) -> wgpu::BindGroupLayout {
        let mut entries = vec![wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }];

        for slot in 0..sampler_count as u32 {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: 1 + slot * 2,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            });
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: 2 + slot * 2,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            });
        }

        self.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(label),
            entries: &entries,
        })
    }

    /// Layout of [`DrawVertex`] at vertex buffer slot 0.
    pub fn vertex_layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: size_of::<DrawVertex>() as u64,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &VERTEX_ATTRS,
        }
    }

    /// Color target for pipelines drawing through this driver: the target
    /// format with premultiplied alpha blending.
    pub fn color_target(&self) -> wgpu::ColorTargetState {
        wgpu::ColorTargetState {
            format: self.format,
            blend: Some(premul_alpha_blend()),
            write_mask: wgpu::ColorWrites::ALL,
        }
    }

    pub fn register_program(&mut self, desc: WgpuProgramDesc) -> ProgramId {
        let id = ProgramId(self.next_program);
        self.next_program += 1;

        let size = desc.uniform_block_size.max(16);
        let uniform_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&desc.label),
            size,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        log::debug!("registered program {} as {id:?} ({} uniforms, {} samplers)", desc.label, desc.uniforms.len(), desc.samplers.len());

        self.programs.insert(
            id,
            GpuProgram {
                label: desc.label,
                pipeline: desc.pipeline,
                layout: desc.bind_group_layout,
                uniform_buffer,
                shadow: vec![0; size as usize],
                uniforms: desc.uniforms,
                sampler_units: vec![TextureUnit::default(); desc.samplers.len()],
                samplers: desc.samplers,
                dirty: true,
                in_flight: false,
                bind_group: None,
            },
        );
        id
    }

    /// Submits recorded passes, keeping the debug group stack open for the
    /// next encoder.
    pub fn flush(&mut self) {
        let Some(mut encoder) = self.encoder.take() else { return };
        for _ in &self.debug_stack {
            encoder.pop_debug_group();
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        for program in self.programs.values_mut() {
            program.in_flight = false;
        }
    }

    /// Copies the headless target back as tightly packed rows.
    pub fn read_pixels(&mut self) -> Result<Vec<u8>> {
        self.flush();

        let texture = self.offscreen.as_ref().context("driver has no headless target")?;
        let (width, height) = (texture.width(), texture.height());
        let aligned_bytes_per_row = (width * 4).next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("marduk-batch readback"),
            size: u64::from(aligned_bytes_per_row) * u64::from(height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("marduk-batch readback encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(aligned_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
        );
        let submission_index = self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device
            .poll(wgpu::PollType::Wait { submission_index: Some(submission_index), timeout: None })
            .context("failed to wait for readback")?;
        rx.recv()
            .context("readback callback dropped")?
            .context("failed to map readback buffer")?;

        let data = slice.get_mapped_range();
        let mut pixels = Vec::with_capacity((width * height * 4) as usize);
        for row in data.chunks(aligned_bytes_per_row as usize).take(height as usize) {
            pixels.extend_from_slice(&row[..(width * 4) as usize]);
        }
        drop(data);
        staging.unmap();

        Ok(pixels)
    }

    /// Uploads the current program's uniform block if it changed. A block
    /// already referenced by the pending encoder is submitted first, since
    /// queue writes land before any pass of the next submission.
    fn sync_uniforms(&mut self, program: ProgramId) -> bool {
        let (dirty, in_flight) = match self.programs.get(&program) {
            Some(p) => (p.dirty, p.in_flight),
            None => return false,
        };
        if dirty && in_flight {
            log::trace!("uniforms of {program:?} changed mid-encoder; flushing");
            self.flush();
        }

        let Some(p) = self.programs.get_mut(&program) else { return false };
        if p.dirty {
            self.queue.write_buffer(&p.uniform_buffer, 0, &p.shadow);
            p.dirty = false;
        }
        p.in_flight = true;
        true
    }
}

impl Driver for WgpuDriver {
    fn limits(&self) -> DriverLimits {
        DriverLimits { max_texture_size: self.device.limits().max_texture_dimension_2d }
    }

    fn begin_execute(&mut self) {
        log::trace!("{}: begin execute", self.label);
    }

    fn end_execute(&mut self) {
        self.flush();
    }

    fn create_texture(&mut self, width: u32, height: u32, filters: TextureFilters) -> TextureId {
        let id = TextureId(self.next_texture);
        self.next_texture += 1;
        let texture = create_gpu_texture(&self.device, "marduk-batch texture", self.format, width, height, filters);
        self.textures.insert(id, texture);
        id
    }

    fn upload_texture(&mut self, texture: TextureId, width: u32, height: u32, rgba: &[u8]) {
        // Pending passes may still sample the old contents.
        self.flush();

        let Some(gpu) = self.textures.get(&texture) else {
            log::warn!("upload to unknown texture {texture:?}");
            return;
        };
        if gpu.width != width || gpu.height != height {
            log::warn!("upload of {width}x{height} into {}x{} texture {texture:?}", gpu.width, gpu.height);
            return;
        }

        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &gpu.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            rgba,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
        );
    }

    fn delete_textures(&mut self, textures: &[TextureId]) {
        for id in textures {
            self.textures.remove(id);
            for unit in self.units.iter_mut().filter(|u| **u == *id) {
                *unit = TextureId::NONE;
            }
        }
        for program in self.programs.values_mut() {
            if program.bind_group.as_ref().is_some_and(|(key, _)| key.iter().any(|t| textures.contains(t))) {
                program.bind_group = None;
            }
        }
    }

    fn create_framebuffer(&mut self) -> FramebufferId {
        let id = FramebufferId(self.next_framebuffer);
        self.next_framebuffer += 1;
        self.framebuffers.insert(id, None);
        id
    }

    fn attach_texture(&mut self, framebuffer: FramebufferId, texture: TextureId) -> FramebufferStatus {
        let Some(slot) = self.framebuffers.get_mut(&framebuffer) else {
            return FramebufferStatus::Incomplete(INCOMPLETE_ATTACHMENT);
        };
        if !self.textures.contains_key(&texture) {
            return FramebufferStatus::Incomplete(INCOMPLETE_ATTACHMENT);
        }
        *slot = Some(texture);
        FramebufferStatus::Complete
    }

    fn delete_framebuffers(&mut self, framebuffers: &[FramebufferId]) {
        for id in framebuffers {
            self.framebuffers.remove(id);
            if self.framebuffer == *id {
                self.framebuffer = FramebufferId::DEFAULT;
            }
        }
    }

    fn create_buffer(&mut self, size: usize) -> BufferId {
        let id = BufferId(self.next_buffer);
        self.next_buffer += 1;
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("marduk-batch vertices"),
            size: (size as u64).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT),
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.buffers.insert(id, buffer);
        id
    }

    fn upload_buffer(&mut self, buffer: BufferId, data: &[u8]) {
        let Some(gpu) = self.buffers.get(&buffer) else {
            log::warn!("upload to unknown buffer {buffer:?}");
            return;
        };

        if data.len() as u64 % wgpu::COPY_BUFFER_ALIGNMENT == 0 {
            self.queue.write_buffer(gpu, 0, data);
        } else {
            let mut padded = data.to_vec();
            padded.resize((data.len() as u64).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT) as usize, 0);
            self.queue.write_buffer(gpu, 0, &padded);
        }
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        if let Some(gpu) = self.buffers.remove(&buffer) {
            gpu.destroy();
        }
        if self.vertex_buffer == Some(buffer) {
            self.vertex_buffer = None;
        }
    }

    fn delete_program(&mut self, program: ProgramId) {
        if let Some(p) = self.programs.remove(&program) {
            log::debug!("deleted program {}", p.label);
        }
        if self.program == program {
            self.program = ProgramId::NONE;
        }
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<u32> {
        let p = self.programs.get(&program)?;
        if let Some(index) = p.uniforms.iter().position(|(n, _)| n == name) {
            return Some(index as u32);
        }
        p.samplers
            .iter()
            .position(|n| n == name)
            .map(|slot| SAMPLER_LOCATION_BASE + slot as u32)
    }

    fn bind_framebuffer(&mut self, framebuffer: FramebufferId) {
        self.framebuffer = framebuffer;
    }

    fn bind_texture(&mut self, unit: TextureUnit, target: TextureTarget, texture: TextureId) {
        if target != TextureTarget::Texture2D {
            log::trace!("{target:?} bound on {unit:?}; sampled as 2D");
        }
        self.units[unit.index()] = texture;
    }

    fn bind_vertex_buffer(&mut self, buffer: BufferId) {
        self.vertex_buffer = Some(buffer);
    }

    fn use_program(&mut self, program: ProgramId) {
        self.program = program;
    }

    fn set_uniform(&mut self, program: ProgramId, upload: &UniformUpload<'_>) {
        let Some(p) = self.programs.get_mut(&program) else {
            log::warn!("uniform upload for unknown program {program:?}");
            return;
        };

        if upload.location >= SAMPLER_LOCATION_BASE {
            let slot = (upload.location - SAMPLER_LOCATION_BASE) as usize;
            let unit = upload.ints().first().copied().unwrap_or(0);
            if upload.format != UniformFormat::Texture || slot >= p.sampler_units.len() || unit < 0 || unit as usize >= MAX_TEXTURE_UNITS {
                log::warn!("program {}: bad sampler upload at {}", p.label, upload.location);
                return;
            }
            p.sampler_units[slot] = TextureUnit::new(unit as usize);
            return;
        }

        let Some((name, offset)) = p.uniforms.get(upload.location as usize) else {
            log::warn!("program {}: no uniform at location {}", p.label, upload.location);
            return;
        };
        let start = *offset as usize;
        let end = start + upload.data.len();
        if end > p.shadow.len() {
            log::warn!("program {}: {name} overruns the uniform block ({end} > {})", p.label, p.shadow.len());
            return;
        }
        if p.shadow[start..end] != *upload.data {
            p.shadow[start..end].copy_from_slice(upload.data);
            p.dirty = true;
        }
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = Some(viewport);
    }

    fn clear(&mut self, bits: ClearBits) {
        if !bits.contains(ClearBits::COLOR) {
            log::trace!("clear {:#x} has no color bit; no depth or stencil attachments", bits.bits());
            return;
        }

        let Some(target) = resolve_target(self.framebuffer, self.default_target.as_ref(), &self.framebuffers, &self.textures) else {
            log::warn!("clear with no target for {:?}", self.framebuffer);
            return;
        };

        let encoder = open_encoder(&self.device, &mut self.encoder, &self.debug_stack);
        let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("marduk-batch clear"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target.view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });
    }

    fn draw_arrays(&mut self, first: u32, count: u32) {
        if count == 0 {
            return;
        }

        let program_id = self.program;
        if !self.sync_uniforms(program_id) {
            log::warn!("draw with unknown program {program_id:?}");
            return;
        }

        let Some(target) = resolve_target(self.framebuffer, self.default_target.as_ref(), &self.framebuffers, &self.textures) else {
            log::warn!("draw with no target for {:?}", self.framebuffer);
            return;
        };
        let Some(rect) = clamp_viewport(self.viewport, target.width, target.height) else {
            log::trace!("draw outside the target; skipped");
            return;
        };
        let Some(vertices) = self.vertex_buffer.and_then(|id| self.buffers.get(&id)) else {
            log::warn!("draw without a vertex buffer");
            return;
        };
        let Some(program) = self.programs.get_mut(&program_id) else { return };

        let key = bind_group_key(&program.sampler_units, &self.units, &self.textures);
        if program.bind_group.as_ref().is_none_or(|(cached, _)| *cached != key) {
            let bind_group = create_bind_group(&self.device, program, &key, &self.textures, &self.fallback, &self.samplers);
            program.bind_group = Some((key, bind_group));
        }
        let Some((_, bind_group)) = program.bind_group.as_ref() else { return };

        let encoder = open_encoder(&self.device, &mut self.encoder, &self.debug_stack);
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("marduk-batch draw"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target.view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });

        let (x, y, w, h) = rect;
        pass.set_viewport(x, y, w, h, 0.0, 1.0);
        pass.set_pipeline(&program.pipeline);
        pass.set_bind_group(0, bind_group, &[]);
        pass.set_vertex_buffer(0, vertices.slice(..));
        pass.draw(first..first + count, 0..1);
    }

    fn push_debug_group(&mut self, label: &str) {
        let encoder = open_encoder(&self.device, &mut self.encoder, &self.debug_stack);
        encoder.push_debug_group(label);
        self.debug_stack.push(label.to_owned());
    }

    fn pop_debug_group(&mut self) {
        if self.debug_stack.pop().is_none() {
            log::warn!("pop_debug_group with an empty stack");
            return;
        }
        // A flush since the push already closed the group.
        if let Some(encoder) = self.encoder.as_mut() {
            encoder.pop_debug_group();
        }
    }
}

impl Drop for WgpuDriver {
    fn drop(&mut self) {
        self.flush();
    }
}

// ── helpers ───────────────────────────────────────────────────────────────

fn premul_alpha_blend() -> wgpu::BlendState {
    let component = wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::One,
        dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
        operation: wgpu::BlendOperation::Add,
    };
    wgpu::BlendState { color: component, alpha: component }
}

fn to_wgpu_filter(mode: FilterMode) -> wgpu::FilterMode {
    match mode {
        FilterMode::Nearest => wgpu::FilterMode::Nearest,
        FilterMode::Linear => wgpu::FilterMode::Linear,
    }
}

fn sampler_index(filters: TextureFilters) -> usize {
    let linear = |m| (m == FilterMode::Linear) as usize;
    linear(filters.min) * 2 + linear(filters.mag)
}

fn create_sampler(device: &wgpu::Device, min: FilterMode, mag: FilterMode) -> wgpu::Sampler {
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("marduk-batch sampler"),
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: to_wgpu_filter(mag),
        min_filter: to_wgpu_filter(min),
        mipmap_filter: wgpu::MipmapFilterMode::Nearest,
        ..Default::default()
    })
}

fn create_gpu_texture(
    device: &wgpu::Device,
    label: &str,
    format: wgpu::TextureFormat,
    width: u32,
    height: u32,
    filters: TextureFilters,
) -> GpuTexture {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_DST
            | wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    GpuTexture { texture, view, width, height, filters }
}

fn open_encoder<'a>(
    device: &wgpu::Device,
    encoder: &'a mut Option<wgpu::CommandEncoder>,
    debug_stack: &[String],
) -> &'a mut wgpu::CommandEncoder {
    encoder.get_or_insert_with(|| {
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("marduk-batch encoder"),
        });
        for label in debug_stack {
            encoder.push_debug_group(label);
        }
        encoder
    })
}

fn resolve_target<'a>(
    framebuffer: FramebufferId,
    default_target: Option<&'a DefaultTarget>,
    framebuffers: &HashMap<FramebufferId, Option<TextureId>>,
    textures: &'a HashMap<TextureId, GpuTexture>,
) -> Option<TargetRef<'a>> {
    if framebuffer == FramebufferId::DEFAULT {
        return default_target.map(|t| TargetRef { view: &t.view, width: t.width, height: t.height });
    }
    let texture = framebuffers.get(&framebuffer).copied().flatten()?;
    textures
        .get(&texture)
        .map(|t| TargetRef { view: &t.view, width: t.width, height: t.height })
}

/// Clamps `viewport` to the target. `None` when nothing of it remains.
fn clamp_viewport(viewport: Option<Viewport>, width: u32, height: u32) -> Option<(f32, f32, f32, f32)> {
    let (tw, th) = (width as f32, height as f32);
    let Some(v) = viewport else {
        return Some((0.0, 0.0, tw, th));
    };

    let x0 = v.x.clamp(0.0, tw);
    let y0 = v.y.clamp(0.0, th);
    let x1 = (v.x + v.width).clamp(0.0, tw);
    let y1 = (v.y + v.height).clamp(0.0, th);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some((x0, y0, x1 - x0, y1 - y0))
}

/// Texture sampled by each sampler slot. Unbound or deleted textures map to
/// `TextureId::NONE`, which samples the fallback.
fn bind_group_key(
    sampler_units: &[TextureUnit],
    units: &[TextureId; MAX_TEXTURE_UNITS],
    textures: &HashMap<TextureId, GpuTexture>,
) -> Vec<TextureId> {
    sampler_units
        .iter()
        .map(|unit| units[unit.index()])
        .map(|id| if textures.contains_key(&id) { id } else { TextureId::NONE })
        .collect()
}

fn create_bind_group(
    device: &wgpu::Device,
    program: &GpuProgram,
    key: &[TextureId],
    textures: &HashMap<TextureId, GpuTexture>,
    fallback: &GpuTexture,
    samplers: &[wgpu::Sampler; 4],
) -> wgpu::BindGroup {
    let mut entries = vec![wgpu::BindGroupEntry {
        binding: 0,
        resource: program.uniform_buffer.as_entire_binding(),
    }];

    for (slot, id) in key.iter().enumerate() {
        let texture = textures.get(id).unwrap_or(fallback);
        let binding = 1 + slot as u32 * 2;
        entries.push(wgpu::BindGroupEntry {
            binding,
            resource: wgpu::BindingResource::TextureView(&texture.view),
        });
        entries.push(wgpu::BindGroupEntry {
            binding: binding + 1,
            resource: wgpu::BindingResource::Sampler(&samplers[sampler_index(texture.filters)]),
        });
    }

    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(&program.label),
        layout: &program.layout,
        entries: &entries,
    })
}
