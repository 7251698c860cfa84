//! Renders a small node tree offscreen and optionally writes it as a PPM.
//!
//! Usage: `marduk-headless [output.ppm]`

use std::path::PathBuf;

use anyhow::{Context, Result};
use marduk_batch::coords::{ColorRgba, Mat4, Rect};
use marduk_batch::driver::{FramebufferId, ProgramId, WgpuDriver, WgpuDriverInit, WgpuProgramDesc};
use marduk_batch::logging::{init_logging, LoggingConfig};
use marduk_batch::render::{register_shared_uniforms, JobPrograms, RenderJob, RenderNode};
use marduk_batch::{CommandQueue, Program, QueueConfig};

const WIDTH: u32 = 256;
const HEIGHT: u32 = 256;

/// Byte offsets of the shared uniform block declared in the shaders.
const UNIFORM_BLOCK: [(&str, u64); 6] = [
    ("u_projection", 0),
    ("u_modelview", 64),
    ("u_viewport", 128),
    ("u_clip_rect", 144),
    ("u_color", 192),
    ("u_alpha", 208),
];
const UNIFORM_BLOCK_SIZE: u64 = 224;

fn main() -> Result<()> {
    init_logging(LoggingConfig::default());
    let output = std::env::args_os().nth(1).map(PathBuf::from);
    pollster::block_on(run(output))
}

async fn run(output: Option<PathBuf>) -> Result<()> {
    let mut driver = WgpuDriver::headless(WgpuDriverInit::default(), WIDTH, HEIGHT).await?;
    let color_id = create_program(&mut driver, "color", include_str!("shaders/color.wgsl"), &[]);
    let blit_id = create_program(&mut driver, "blit", include_str!("shaders/blit.wgsl"), &["u_source"]);

    let mut queue = CommandQueue::new(driver, QueueConfig::default());

    let mut color = Program::new(color_id, "color");
    register_shared_uniforms(&mut color, &mut queue);
    let mut blit = Program::new(blit_id, "blit");
    register_shared_uniforms(&mut blit, &mut queue);
    let programs = JobPrograms { color: Some(color), blit: Some(blit) };

    let checker = queue.upload_texture(8, 8, &checkerboard(8))?;
    let tree = scene(checker);

    let mut job = RenderJob::new(Rect::new(0.0, 0.0, WIDTH as f32, HEIGHT as f32), 1.0, FramebufferId::DEFAULT, true);
    let stats = job.render(&mut queue, &programs, &tree);
    log::info!(
        "{} batches ({} merged), {} draw calls, {} uniform uploads",
        stats.batches,
        stats.merged,
        stats.draw_calls,
        stats.uniform_uploads
    );

    let pixels = queue.driver_mut().read_pixels()?;
    if let Some(path) = output {
        write_ppm(&path, &pixels)?;
        log::info!("wrote {}", path.display());
    }

    queue.autorelease_texture(checker);
    queue.begin_frame();
    queue.end_frame();
    for program in [programs.color, programs.blit].into_iter().flatten() {
        program.delete(&mut queue);
    }
    Ok(())
}

fn scene(checker: marduk_batch::driver::TextureId) -> RenderNode {
    let tile = |x: f32, y: f32, color: ColorRgba| RenderNode::color(Rect::new(x, y, 48.0, 48.0), color);
    let red = ColorRgba::new(0.9, 0.2, 0.2, 1.0);
    let blue = ColorRgba::new(0.2, 0.3, 0.9, 0.8);

    RenderNode::container(vec![
        RenderNode::color(Rect::new(0.0, 0.0, WIDTH as f32, HEIGHT as f32), ColorRgba::new(0.1, 0.1, 0.12, 1.0)),
        RenderNode::debug(
            "tiles",
            RenderNode::container(vec![tile(16.0, 16.0, red), tile(72.0, 16.0, red), tile(128.0, 16.0, blue)]),
        ),
        RenderNode::offset(16.0, 96.0, RenderNode::texture(Rect::new(0.0, 0.0, 64.0, 64.0), checker)),
        RenderNode::clip(
            Rect::new(128.0, 128.0, 64.0, 64.0),
            RenderNode::transform(
                Mat4::translation(160.0, 160.0, 0.0) * Mat4::scale(2.0, 2.0, 1.0),
                tile(-24.0, -24.0, blue),
            ),
        ),
    ])
}

fn create_program(driver: &mut WgpuDriver, label: &str, source: &str, samplers: &[&str]) -> ProgramId {
    let device = driver.device();
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });

    let bind_group_layout = driver.program_layout(label, samplers.len());
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[&bind_group_layout],
        immediate_size: 0,
    });

    let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(&pipeline_layout),
        vertex: wgpu::VertexState {
            module: &shader,
            entry_point: Some("vs_main"),
            compilation_options: Default::default(),
            buffers: &[WgpuDriver::vertex_layout()],
        },
        fragment: Some(wgpu::FragmentState {
            module: &shader,
            entry_point: Some("fs_main"),
            compilation_options: Default::default(),
            targets: &[Some(driver.color_target())],
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: None,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview_mask: None,
        cache: None,
    });

    driver.register_program(WgpuProgramDesc {
        label: label.to_owned(),
        pipeline,
        bind_group_layout,
        uniform_block_size: UNIFORM_BLOCK_SIZE,
        uniforms: UNIFORM_BLOCK.iter().map(|(name, offset)| ((*name).to_owned(), *offset)).collect(),
        samplers: samplers.iter().map(|s| (*s).to_owned()).collect(),
    })
}

/// Opaque black and white squares, premultiplied RGBA8.
fn checkerboard(size: u32) -> Vec<u8> {
    (0..size * size)
        .flat_map(|i| {
            let (x, y) = (i % size, i / size);
            let v = if (x + y) % 2 == 0 { 255 } else { 0 };
            [v, v, v, 255]
        })
        .collect()
}

fn write_ppm(path: &PathBuf, rgba: &[u8]) -> Result<()> {
    let mut out = format!("P6\n{WIDTH} {HEIGHT}\n255\n").into_bytes();
    out.extend(rgba.chunks_exact(4).flat_map(|px| [px[0], px[1], px[2]]));
    std::fs::write(path, out).with_context(|| format!("failed to write {}", path.display()))
}
