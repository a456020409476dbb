//! Common utilities for integration tests.
//!
//! Tests are parameterized over [`Backend`] with `rstest`. The headless
//! backend is always available; the wgpu backend needs an adapter and is
//! skipped when none is found.

#![allow(dead_code)]

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use reactive_pipelines::backend::{
    TextureDescriptor, TextureFormat, TextureHandle, TextureUsage, VertexFormat,
};
use reactive_pipelines::{
    CommandList, GraphicsDevice, HeadlessConfig, HeadlessDevice, Pool, ShaderSource,
    UploadBinder, VertexElement, VertexSemantic, VertexType, WgpuDevice,
};

/// Install the test logger once per process.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ============================================================================
// Backend Enumeration
// ============================================================================

/// Devices the integration tests run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Host-memory device that records submissions.
    Headless,
    /// wgpu rendering into an offscreen swapchain stand-in.
    Wgpu,
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Headless => "headless",
            Backend::Wgpu => "wgpu",
        }
    }
}

// ============================================================================
// Test Context
// ============================================================================

/// Device, command-list pool and binder for one test.
pub struct TestContext {
    pub backend: Backend,
    pub device: Arc<dyn GraphicsDevice>,
    /// Set for the headless backend only.
    pub headless: Option<Arc<HeadlessDevice>>,
    pub pool: Arc<Pool<CommandList>>,
    pub binder: UploadBinder,
}

impl TestContext {
    /// Create a context for `backend`; `None` when the backend is unavailable.
    pub fn new(backend: Backend) -> Option<Self> {
        init_logging();
        let config = HeadlessConfig {
            width: 64,
            height: 64,
            format: TextureFormat::Rgba8Unorm,
            ..Default::default()
        };

        let (device, headless): (Arc<dyn GraphicsDevice>, _) = match backend {
            Backend::Headless => {
                let headless = Arc::new(HeadlessDevice::new(config));
                (headless.clone(), Some(headless))
            }
            Backend::Wgpu => match WgpuDevice::headless(config) {
                Ok(device) => (Arc::new(device), None),
                Err(e) => {
                    eprintln!("wgpu unavailable: {}", e);
                    return None;
                }
            },
        };

        let pool = Arc::new(Pool::for_command_lists(device.clone()));
        let binder = UploadBinder::new(device.clone(), pool.clone());
        Some(Self {
            backend,
            device,
            headless,
            pool,
            binder,
        })
    }

    /// A 2x2 RGBA texture filled with a checker pattern.
    pub fn checker_texture(&self) -> TextureHandle {
        let texture = self
            .device
            .create_texture(&TextureDescriptor {
                label: Some("checker".into()),
                width: 2,
                height: 2,
                format: TextureFormat::Rgba8Unorm,
                usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
                ..Default::default()
            })
            .expect("Failed to create texture");
        let texels: [[u8; 4]; 4] = [
            [255, 255, 255, 255],
            [0, 0, 0, 255],
            [0, 0, 0, 255],
            [255, 255, 255, 255],
        ];
        self.device
            .write_texture(texture, bytemuck::cast_slice(&texels))
            .expect("Failed to write texture");
        texture
    }
}

// ============================================================================
// Geometry
// ============================================================================

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct TexturedVertex {
    pub position: [f32; 3],
    pub uv: [f32; 2],
}

impl VertexType for TexturedVertex {
    const ELEMENTS: &'static [VertexElement] = &[
        VertexElement::new("position", VertexSemantic::Position, VertexFormat::Float32x3),
        VertexElement::new("uv", VertexSemantic::TextureCoordinate, VertexFormat::Float32x2),
    ];
}

pub fn quad_vertices() -> Vec<TexturedVertex> {
    vec![
        TexturedVertex { position: [-0.5, -0.5, 0.0], uv: [0.0, 1.0] },
        TexturedVertex { position: [0.5, -0.5, 0.0], uv: [1.0, 1.0] },
        TexturedVertex { position: [0.5, 0.5, 0.0], uv: [1.0, 0.0] },
        TexturedVertex { position: [-0.5, 0.5, 0.0], uv: [0.0, 0.0] },
    ]
}

pub const QUAD_INDICES: [u16; 6] = [0, 2, 1, 0, 3, 2];

/// Reads `albedo` from set 0 binding 0.
pub const TEXTURED_SHADER: &str = r#"
struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@group(0) @binding(0) var albedo: texture_2d<f32>;

@vertex
fn vs_main(@location(0) position: vec3<f32>, @location(1) uv: vec2<f32>) -> VertexOutput {
    var out: VertexOutput;
    out.position = vec4<f32>(position, 1.0);
    out.uv = uv;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    return textureLoad(albedo, vec2<i32>(in.uv * 1.99), 0);
}
"#;

/// Position-only shader without shader resources.
pub const PLAIN_SHADER: &str = r#"
@vertex
fn vs_main(@location(0) position: vec3<f32>, @location(1) uv: vec2<f32>) -> @builtin(position) vec4<f32> {
    return vec4<f32>(position.xy + uv * 0.0, position.z, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return vec4<f32>(1.0, 0.5, 0.0, 1.0);
}
"#;

pub fn textured_shader() -> ShaderSource {
    ShaderSource::wgsl(TEXTURED_SHADER)
}

pub fn plain_shader() -> ShaderSource {
    ShaderSource::wgsl(PLAIN_SHADER)
}

/// Shader reading uniform `tint` and texture `albedo` from set 0 at the given bindings.
pub fn tinted_shader(tint_binding: u32, albedo_binding: u32) -> ShaderSource {
    ShaderSource::wgsl(&format!(
        r#"
struct Tint {{
    color: vec4<f32>,
}}

@group(0) @binding({tint_binding}) var<uniform> tint: Tint;
@group(0) @binding({albedo_binding}) var albedo: texture_2d<f32>;

@vertex
fn vs_main(@location(0) position: vec3<f32>, @location(1) uv: vec2<f32>) -> @builtin(position) vec4<f32> {{
    return vec4<f32>(position.xy + uv * 0.0, position.z, 1.0);
}}

@fragment
fn fs_main() -> @location(0) vec4<f32> {{
    return textureLoad(albedo, vec2<i32>(0, 0), 0) * tint.color;
}}
"#
    ))
}
