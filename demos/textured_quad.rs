//! Spinning textured quad.
//!
//! The quad's transform is a uniform fed by a polling source; vertices,
//! indices and the texture are uploaded once. Every frame renders the
//! pipeline through a [`FrameLoop`].
//!
//! # Usage
//!
//! ```bash
//! # Open a window
//! cargo run --example textured_quad
//!
//! # Render a few frames on the headless device and print what was submitted
//! cargo run --example textured_quad -- --headless 3
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytemuck::{Pod, Zeroable};
use clap::Parser;

use reactive_pipelines::backend::{
    SamplerDescriptor, ShaderStages, TextureDescriptor, TextureFormat, TextureUsage, VertexFormat,
};
use reactive_pipelines::glam::{Mat4, Vec3};
use reactive_pipelines::{
    window, CommandList, FrameLoop, GraphicsDevice, HeadlessDevice, PipelineAssembler,
    PipelineConfig, PipelineResult, PollingSource, Pool, ShaderSource, TextureMode, UploadBinder,
    ValueStream, VertexElement, VertexSemantic, VertexType, WindowConfig,
};

const SHADER: &str = r#"
struct Transform {
    model: mat4x4<f32>,
}

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@group(0) @binding(0) var<uniform> transform: Transform;
@group(1) @binding(0) var albedo: texture_2d<f32>;
@group(1) @binding(1) var albedo_sampler: sampler;

@vertex
fn vs_main(@location(0) position: vec3<f32>, @location(1) uv: vec2<f32>) -> VertexOutput {
    var out: VertexOutput;
    out.position = transform.model * vec4<f32>(position, 1.0);
    out.uv = uv;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    return textureSample(albedo, albedo_sampler, in.uv);
}
"#;

/// Textured quad demo arguments.
#[derive(Parser, Debug)]
#[command(name = "textured_quad", about = "Spinning textured quad fed by value streams")]
struct Args {
    /// Initial window width in pixels.
    #[arg(long, default_value = "800")]
    width: u32,

    /// Initial window height in pixels.
    #[arg(long, default_value = "600")]
    height: u32,

    /// Disable vertical sync.
    #[arg(long)]
    no_vsync: bool,

    /// Render this many frames on the headless device instead of opening a window.
    #[arg(long, value_name = "FRAMES")]
    headless: Option<u32>,

    /// Rotation speed in radians per second.
    #[arg(long, default_value = "1.0")]
    speed: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct Vertex {
    position: [f32; 3],
    uv: [f32; 2],
}

impl VertexType for Vertex {
    const ELEMENTS: &'static [VertexElement] = &[
        VertexElement::new("position", VertexSemantic::Position, VertexFormat::Float32x3),
        VertexElement::new("uv", VertexSemantic::TextureCoordinate, VertexFormat::Float32x2),
    ];
}

const CHECKER_SIZE: u32 = 8;

fn checker_texels() -> Vec<u8> {
    (0..CHECKER_SIZE * CHECKER_SIZE)
        .flat_map(|i| {
            let (x, y) = (i % CHECKER_SIZE, i / CHECKER_SIZE);
            if (x + y) % 2 == 0 {
                [240, 240, 240, 255]
            } else {
                [200, 40, 60, 255]
            }
        })
        .collect()
}

/// Streams and polling thread that must outlive the frame loop.
struct Scene {
    _vertices: ValueStream<Vec<Vertex>>,
    _indices: ValueStream<Vec<u16>>,
    _spin: PollingSource<Mat4>,
}

fn build(
    device: Arc<dyn GraphicsDevice>,
    pool: Arc<Pool<CommandList>>,
    speed: f32,
) -> PipelineResult<(FrameLoop, Scene)> {
    let binder = UploadBinder::new(device.clone(), pool.clone());

    let vertices = ValueStream::with_value(vec![
        Vertex { position: [-0.5, -0.5, 0.0], uv: [0.0, 1.0] },
        Vertex { position: [0.5, -0.5, 0.0], uv: [1.0, 1.0] },
        Vertex { position: [0.5, 0.5, 0.0], uv: [1.0, 0.0] },
        Vertex { position: [-0.5, 0.5, 0.0], uv: [0.0, 0.0] },
    ]);
    let indices = ValueStream::with_value(vec![0u16, 2, 1, 0, 3, 2]);

    let start = Instant::now();
    let spin = PollingSource::spawn("spin", Duration::from_millis(16), move || {
        let angle = start.elapsed().as_secs_f32() * speed;
        Ok::<_, std::convert::Infallible>(Mat4::from_axis_angle(Vec3::Z, angle))
    })
    .map_err(|e| reactive_pipelines::PipelineError::Configuration(format!("spin thread: {}", e)))?;

    let texture = device.create_texture(&TextureDescriptor {
        label: Some("checker".into()),
        width: CHECKER_SIZE,
        height: CHECKER_SIZE,
        format: TextureFormat::Rgba8UnormSrgb,
        usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
        ..Default::default()
    })?;
    device.write_texture(texture, &checker_texels())?;

    let descriptors = vec![
        binder.vertex_stream::<Vertex, Vec<Vertex>>(&vertices, 4, 0)?,
        binder.index_stream::<u16, Vec<u16>>(&indices, 6)?,
        binder.uniform_binding(spin.stream(), "transform", ShaderStages::VERTEX, 0)?,
        binder.texture_binding(texture, TextureMode::ReadOnly, "albedo", ShaderStages::FRAGMENT, 1)?,
        binder.sampler_binding(
            &SamplerDescriptor {
                label: Some("albedo".into()),
                ..Default::default()
            },
            "albedo_sampler",
            ShaderStages::FRAGMENT,
            1,
        )?,
    ];

    let shader = ShaderSource::wgsl(SHADER);
    let pipeline = PipelineAssembler::new(device.clone(), pool.clone())
        .with_config(PipelineConfig::default().with_label("textured quad"))
        .assemble(&shader, &shader, descriptors)?;

    let mut frames = FrameLoop::new(device, pool);
    frames.add_pipeline(pipeline);
    Ok((
        frames,
        Scene {
            _vertices: vertices,
            _indices: indices,
            _spin: spin,
        },
    ))
}

fn run_headless(args: &Args, count: u32) -> PipelineResult<()> {
    let headless = Arc::new(HeadlessDevice::default());
    let device: Arc<dyn GraphicsDevice> = headless.clone();
    let pool = Arc::new(Pool::for_command_lists(device.clone()));
    let (mut frames, _scene) = build(device, pool, args.speed)?;

    for _ in 0..count {
        headless.clear_submissions();
        frames.frame()?;
        for (i, commands) in headless.submissions().iter().enumerate() {
            println!("frame {} submission {}:", frames.frame_count(), i);
            for command in commands {
                println!("  {:?}", command);
            }
        }
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let result = match args.headless {
        Some(count) => run_headless(&args, count),
        None => {
            let config = WindowConfig::default()
                .with_title("Textured Quad")
                .with_size(args.width, args.height)
                .with_vsync(!args.no_vsync);
            let speed = args.speed;
            window::run(config, move |device, pool| {
                let (mut frames, scene) = build(device, pool, speed)?;
                let mut last_report = 0.0;
                let mut rendered = 0u32;
                // Owns the streams for as long as the loop runs
                frames.add_callback(move |_, _, elapsed_ms| {
                    let _ = &scene;
                    rendered += 1;
                    if elapsed_ms - last_report >= 1000.0 {
                        log::info!("{} frames in the last second", rendered);
                        last_report = elapsed_ms;
                        rendered = 0;
                    }
                    Ok(())
                });
                Ok(frames)
            })
        }
    };

    if let Err(e) = result {
        log::error!("{}", e);
        std::process::exit(1);
    }
}
