//! wgpu device implementation

mod conversion;
mod mipmap;
mod replay;

use crate::backend::headless::HeadlessConfig;
use crate::backend::shader::validate_wgsl;
use crate::backend::traits::*;
use crate::backend::types::*;
use crate::command::CommandList;
use parking_lot::{Mutex, RwLock};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use wgpu::util::DeviceExt;

pub(crate) struct TextureRecord {
    texture: wgpu::Texture,
    desc: TextureDescriptor,
}

pub(crate) struct ShaderRecord {
    module: wgpu::ShaderModule,
    stage: ShaderStage,
    entry_point: String,
}

pub(crate) struct FramebufferRecord {
    colors: Vec<wgpu::TextureView>,
    depth: Option<wgpu::TextureView>,
    output: OutputDescription,
}

/// Live device objects by handle id
#[derive(Default)]
pub(crate) struct Resources {
    buffers: HashMap<u64, wgpu::Buffer>,
    textures: HashMap<u64, TextureRecord>,
    views: HashMap<u64, wgpu::TextureView>,
    samplers: HashMap<u64, wgpu::Sampler>,
    shaders: HashMap<u64, ShaderRecord>,
    layouts: HashMap<u64, wgpu::BindGroupLayout>,
    bind_groups: HashMap<u64, wgpu::BindGroup>,
    render_pipelines: HashMap<u64, wgpu::RenderPipeline>,
    compute_pipelines: HashMap<u64, wgpu::ComputePipeline>,
    framebuffers: HashMap<u64, FramebufferRecord>,
}

impl Resources {
    fn buffer(&self, handle: BufferHandle) -> BackendResult<&wgpu::Buffer> {
        self.buffers
            .get(&handle.0)
            .ok_or_else(|| BackendError::ResourceNotFound(format!("{:?}", handle)))
    }

    fn texture(&self, handle: TextureHandle) -> BackendResult<&TextureRecord> {
        self.textures
            .get(&handle.0)
            .ok_or_else(|| BackendError::ResourceNotFound(format!("{:?}", handle)))
    }

    fn layout(&self, handle: BindingSetLayoutHandle) -> BackendResult<&wgpu::BindGroupLayout> {
        self.layouts
            .get(&handle.0)
            .ok_or_else(|| BackendError::PipelineCreationFailed(format!("{:?} not found", handle)))
    }

    fn shader(&self, handle: ShaderHandle, stage: ShaderStage) -> BackendResult<&ShaderRecord> {
        let shader = self
            .shaders
            .get(&handle.0)
            .ok_or_else(|| BackendError::PipelineCreationFailed(format!("{:?} not found", handle)))?;
        if shader.stage != stage {
            return Err(BackendError::PipelineCreationFailed(format!(
                "{:?} is a {:?} shader, expected {:?}",
                handle, shader.stage, stage
            )));
        }
        Ok(shader)
    }
}

struct DepthTarget {
    format: TextureFormat,
    view: wgpu::TextureView,
}

/// What the swapchain framebuffer renders into
enum Presentation {
    Surface {
        surface: wgpu::Surface<'static>,
        config: wgpu::SurfaceConfiguration,
        current: Option<wgpu::SurfaceTexture>,
    },
    Offscreen {
        texture: wgpu::Texture,
        format: TextureFormat,
    },
}

struct SwapchainTarget {
    presentation: Presentation,
    depth: Option<DepthTarget>,
    width: u32,
    height: u32,
}

impl SwapchainTarget {
    fn color_format(&self) -> TextureFormat {
        match &self.presentation {
            Presentation::Surface { config, .. } => conversion::texture_format_back(config.format),
            Presentation::Offscreen { format, .. } => *format,
        }
    }

    fn output(&self) -> OutputDescription {
        OutputDescription {
            color_formats: vec![self.color_format()],
            depth_format: self.depth.as_ref().map(|d| d.format),
            width: self.width,
            height: self.height,
        }
    }

    /// View over the image the next frame renders into, acquiring it if needed
    fn acquire_view(&mut self) -> BackendResult<wgpu::TextureView> {
        match &mut self.presentation {
            Presentation::Surface { surface, current, .. } => {
                if current.is_none() {
                    let texture = surface.get_current_texture().map_err(|e| match e {
                        wgpu::SurfaceError::Lost => BackendError::SurfaceLost,
                        wgpu::SurfaceError::OutOfMemory => BackendError::OutOfMemory,
                        _ => BackendError::AcquireImageFailed(e.to_string()),
                    })?;
                    *current = Some(texture);
                }
                let texture = current
                    .as_ref()
                    .ok_or_else(|| BackendError::AcquireImageFailed("no surface texture".into()))?;
                Ok(texture.texture.create_view(&wgpu::TextureViewDescriptor::default()))
            }
            Presentation::Offscreen { texture, .. } => {
                Ok(texture.create_view(&wgpu::TextureViewDescriptor::default()))
            }
        }
    }
}

/// Clamp to device limits while maintaining aspect ratio
fn clamp_extent(width: u32, height: u32, max_size: u32) -> (u32, u32) {
    if width > max_size || height > max_size {
        let scale = (max_size as f32 / width as f32).min(max_size as f32 / height as f32);
        (
            ((width as f32 * scale) as u32).max(1),
            ((height as f32 * scale) as u32).max(1),
        )
    } else {
        (width.max(1), height.max(1))
    }
}

fn create_depth_target(
    device: &wgpu::Device,
    format: TextureFormat,
    width: u32,
    height: u32,
) -> DepthTarget {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Swapchain Depth"),
        size: wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: conversion::texture_format(format),
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    DepthTarget {
        format,
        view: texture.create_view(&wgpu::TextureViewDescriptor::default()),
    }
}

fn create_offscreen_color(
    device: &wgpu::Device,
    format: TextureFormat,
    width: u32,
    height: u32,
) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Offscreen Swapchain"),
        size: wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: conversion::texture_format(format),
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    })
}

/// Device backed by wgpu, presenting to a window surface or an offscreen texture
pub struct WgpuDevice {
    #[allow(dead_code)]
    instance: wgpu::Instance,
    name: String,
    device: wgpu::Device,
    queue: wgpu::Queue,
    target: Mutex<SwapchainTarget>,
    resources: RwLock<Resources>,
    mipmaps: mipmap::MipmapGenerator,
    next_id: AtomicU64,
}

const SWAPCHAIN: FramebufferHandle = FramebufferHandle(0);

impl WgpuDevice {
    /// Create a device presenting to `window` at `width` x `height`
    pub fn new<W>(window: Arc<W>, width: u32, height: u32, vsync: bool) -> BackendResult<Self>
    where
        W: HasWindowHandle + HasDisplayHandle + Send + Sync + 'static,
    {
        pollster::block_on(Self::new_async(window, width, height, vsync))
    }

    pub async fn new_async<W>(
        window: Arc<W>,
        width: u32,
        height: u32,
        vsync: bool,
    ) -> BackendResult<Self>
    where
        W: HasWindowHandle + HasDisplayHandle + Send + Sync + 'static,
    {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: Self::preferred_backends(),
            ..Default::default()
        });

        let surface = instance
            .create_surface(window.clone())
            .map_err(|e| BackendError::SurfaceCreationFailed(e.to_string()))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| BackendError::InitializationFailed("No suitable adapter found".into()))?;

        let (name, device, queue) = Self::open_device(&adapter).await?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .or_else(|| surface_caps.formats.first().copied())
            .ok_or_else(|| BackendError::SurfaceCreationFailed("surface reports no formats".into()))?;
        let alpha_mode = surface_caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let (width, height) =
            clamp_extent(width, height, device.limits().max_texture_dimension_2d);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width,
            height,
            present_mode: if vsync {
                wgpu::PresentMode::AutoVsync
            } else {
                wgpu::PresentMode::AutoNoVsync
            },
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let target = SwapchainTarget {
            presentation: Presentation::Surface { surface, config, current: None },
            depth: None,
            width,
            height,
        };

        Ok(Self::from_parts(instance, name, device, queue, target))
    }

    /// Create a device rendering its swapchain framebuffer into an offscreen texture
    pub fn headless(config: HeadlessConfig) -> BackendResult<Self> {
        pollster::block_on(Self::headless_async(config))
    }

    pub async fn headless_async(config: HeadlessConfig) -> BackendResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: Self::preferred_backends(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| BackendError::InitializationFailed("No suitable adapter found".into()))?;

        let (name, device, queue) = Self::open_device(&adapter).await?;

        let (width, height) =
            clamp_extent(config.width, config.height, device.limits().max_texture_dimension_2d);
        let target = SwapchainTarget {
            presentation: Presentation::Offscreen {
                texture: create_offscreen_color(&device, config.format, width, height),
                format: config.format,
            },
            depth: config
                .depth_format
                .map(|format| create_depth_target(&device, format, width, height)),
            width,
            height,
        };

        Ok(Self::from_parts(instance, name, device, queue, target))
    }

    fn preferred_backends() -> wgpu::Backends {
        if std::env::var("WGPU_BACKEND").is_ok() {
            wgpu::util::backend_bits_from_env().unwrap_or(wgpu::Backends::all())
        } else {
            wgpu::Backends::all()
        }
    }

    async fn open_device(adapter: &wgpu::Adapter) -> BackendResult<(String, wgpu::Device, wgpu::Queue)> {
        let info = adapter.get_info();
        log::info!("Selected GPU: {} ({:?} backend)", info.name, info.backend);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Graphics Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .map_err(|e| BackendError::DeviceCreationFailed(e.to_string()))?;

        device.on_uncaptured_error(Box::new(|e| log::error!("wgpu: {}", e)));

        Ok((format!("wgpu ({:?}: {})", info.backend, info.name), device, queue))
    }

    fn from_parts(
        instance: wgpu::Instance,
        name: String,
        device: wgpu::Device,
        queue: wgpu::Queue,
        target: SwapchainTarget,
    ) -> Self {
        let mipmaps = mipmap::MipmapGenerator::new(&device);
        Self {
            instance,
            name,
            device,
            queue,
            target: Mutex::new(target),
            resources: RwLock::new(Resources::default()),
            mipmaps,
            next_id: AtomicU64::new(1),
        }
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Run `create` inside a validation error scope
    fn validated<T>(&self, create: impl FnOnce(&wgpu::Device) -> T) -> Result<T, String> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = create(&self.device);
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(err) => Err(err.to_string()),
            None => Ok(value),
        }
    }

    /// Underlying wgpu device
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Underlying wgpu queue
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }
}

impl GraphicsDevice for WgpuDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn create_buffer(&self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        // Copies move whole words, so round the allocation up
        let size = desc.size.max(1).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
        let buffer = self
            .validated(|device| {
                device.create_buffer(&wgpu::BufferDescriptor {
                    label: desc.label.as_deref(),
                    size,
                    usage: conversion::buffer_usage(desc.usage),
                    mapped_at_creation: false,
                })
            })
            .map_err(BackendError::BufferCreationFailed)?;

        let id = self.allocate_id();
        self.resources.write().buffers.insert(id, buffer);
        Ok(BufferHandle(id))
    }

    fn read_buffer(&self, buffer: BufferHandle, offset: u64, size: u64) -> BackendResult<Vec<u8>> {
        let aligned_offset = offset - offset % wgpu::COPY_BUFFER_ALIGNMENT;
        let skip = (offset - aligned_offset) as usize;
        let copy_size = (size + skip as u64).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);

        let staging = {
            let resources = self.resources.read();
            let source = resources.buffer(buffer)?;
            if aligned_offset + copy_size > source.size() {
                return Err(BackendError::OutOfBounds(format!(
                    "{:?}: {} bytes at offset {} exceed size {}",
                    buffer,
                    size,
                    offset,
                    source.size()
                )));
            }
            let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Readback Staging"),
                size: copy_size,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Readback") });
            encoder.copy_buffer_to_buffer(source, aligned_offset, &staging, 0, copy_size);
            self.queue.submit(std::iter::once(encoder.finish()));
            staging
        };

        let (sender, receiver) = crossbeam_channel::bounded(1);
        let slice = staging.slice(..);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .map_err(|e| BackendError::ReadbackFailed(e.to_string()))?
            .map_err(|e| BackendError::ReadbackFailed(e.to_string()))?;

        let data = slice.get_mapped_range()[skip..skip + size as usize].to_vec();
        staging.unmap();
        Ok(data)
    }

    fn create_texture(&self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        let texture = self
            .validated(|device| {
                device.create_texture(&wgpu::TextureDescriptor {
                    label: desc.label.as_deref(),
                    size: wgpu::Extent3d {
                        width: desc.width,
                        height: desc.height,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: desc.mip_levels.max(1),
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: conversion::texture_format(desc.format),
                    usage: conversion::texture_usage(desc.usage),
                    view_formats: &[],
                })
            })
            .map_err(BackendError::TextureCreationFailed)?;

        let id = self.allocate_id();
        self.resources
            .write()
            .textures
            .insert(id, TextureRecord { texture, desc: desc.clone() });
        Ok(TextureHandle(id))
    }

    fn write_texture(&self, texture: TextureHandle, data: &[u8]) -> BackendResult<()> {
        let resources = self.resources.read();
        let record = resources.texture(texture)?;
        let desc = &record.desc;
        let bytes_per_row = desc.width * desc.format.bytes_per_pixel();
        let expected = bytes_per_row as usize * desc.height as usize;
        if data.len() != expected {
            return Err(BackendError::OutOfBounds(format!(
                "{:?}: wrote {} bytes, texture holds {}",
                texture,
                data.len(),
                expected
            )));
        }

        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &record.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(desc.height),
            },
            wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn texture_format(&self, texture: TextureHandle) -> BackendResult<TextureFormat> {
        Ok(self.resources.read().texture(texture)?.desc.format)
    }

    fn create_texture_view(&self, texture: TextureHandle) -> BackendResult<TextureViewHandle> {
        let mut resources = self.resources.write();
        let view = resources
            .textures
            .get(&texture.0)
            .ok_or_else(|| BackendError::TextureCreationFailed(format!("{:?} not found", texture)))?
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let id = self.allocate_id();
        resources.views.insert(id, view);
        Ok(TextureViewHandle(id))
    }

    fn create_sampler(&self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: desc.label.as_deref(),
            address_mode_u: conversion::address_mode(desc.address_mode_u),
            address_mode_v: conversion::address_mode(desc.address_mode_v),
            address_mode_w: conversion::address_mode(desc.address_mode_w),
            mag_filter: conversion::filter_mode(desc.mag_filter),
            min_filter: conversion::filter_mode(desc.min_filter),
            mipmap_filter: conversion::filter_mode(desc.mipmap_filter),
            lod_min_clamp: 0.0,
            lod_max_clamp: 32.0,
            compare: desc.compare.map(conversion::compare_function),
            anisotropy_clamp: 1,
            border_color: None,
        });

        let id = self.allocate_id();
        self.resources.write().samplers.insert(id, sampler);
        Ok(SamplerHandle(id))
    }

    fn create_shader(&self, desc: &ShaderDescriptor) -> BackendResult<ShaderHandle> {
        validate_wgsl(desc)?;
        let source = std::str::from_utf8(&desc.source)
            .map_err(|e| BackendError::ShaderCreationFailed(e.to_string()))?;

        let module = self
            .validated(|device| {
                device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: desc.label.as_deref(),
                    source: wgpu::ShaderSource::Wgsl(source.into()),
                })
            })
            .map_err(BackendError::ShaderCreationFailed)?;

        let id = self.allocate_id();
        self.resources.write().shaders.insert(
            id,
            ShaderRecord {
                module,
                stage: desc.stage,
                entry_point: desc.entry_point.clone(),
            },
        );
        Ok(ShaderHandle(id))
    }

    fn create_binding_set_layout(
        &self,
        desc: &BindingSetLayoutDescriptor,
    ) -> BackendResult<BindingSetLayoutHandle> {
        let entries: Vec<wgpu::BindGroupLayoutEntry> = desc
            .entries
            .iter()
            .enumerate()
            .map(|(index, entry)| conversion::layout_entry(index as u32, entry))
            .collect();

        let layout = self
            .validated(|device| {
                device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: desc.label.as_deref(),
                    entries: &entries,
                })
            })
            .map_err(BackendError::BindingCreationFailed)?;

        let id = self.allocate_id();
        self.resources.write().layouts.insert(id, layout);
        Ok(BindingSetLayoutHandle(id))
    }

    fn create_binding_set(&self, desc: &BindingSetDescriptor) -> BackendResult<BindingSetHandle> {
        let bind_group = {
            let resources = self.resources.read();
            let layout = resources.layouts.get(&desc.layout.0).ok_or_else(|| {
                BackendError::BindingCreationFailed(format!("{:?} not found", desc.layout))
            })?;

            let entries = desc
                .resources
                .iter()
                .enumerate()
                .map(|(index, resource)| {
                    let resource = match resource {
                        BindingResource::Buffer(b) => resources
                            .buffers
                            .get(&b.0)
                            .map(|buffer| buffer.as_entire_binding()),
                        BindingResource::TextureView(v) => {
                            resources.views.get(&v.0).map(wgpu::BindingResource::TextureView)
                        }
                        BindingResource::Sampler(s) => {
                            resources.samplers.get(&s.0).map(wgpu::BindingResource::Sampler)
                        }
                    }
                    .ok_or_else(|| {
                        BackendError::BindingCreationFailed(format!(
                            "binding {}: {:?} not found",
                            index, resource
                        ))
                    })?;
                    Ok(wgpu::BindGroupEntry { binding: index as u32, resource })
                })
                .collect::<BackendResult<Vec<_>>>()?;

            self.validated(|device| {
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: desc.label.as_deref(),
                    layout,
                    entries: &entries,
                })
            })
            .map_err(BackendError::BindingCreationFailed)?
        };

        let id = self.allocate_id();
        self.resources.write().bind_groups.insert(id, bind_group);
        Ok(BindingSetHandle(id))
    }

    fn create_render_pipeline(
        &self,
        desc: &RenderPipelineDescriptor,
    ) -> BackendResult<RenderPipelineHandle> {
        let pipeline = {
            let resources = self.resources.read();
            let vertex = resources.shader(desc.vertex_shader, ShaderStage::Vertex)?;
            let fragment = resources.shader(desc.fragment_shader, ShaderStage::Fragment)?;
            let layouts = desc
                .binding_set_layouts
                .iter()
                .map(|h| resources.layout(*h))
                .collect::<BackendResult<Vec<_>>>()?;

            let attributes: Vec<Vec<wgpu::VertexAttribute>> = desc
                .vertex_layouts
                .iter()
                .map(|layout| {
                    layout
                        .attributes
                        .iter()
                        .map(|a| wgpu::VertexAttribute {
                            format: conversion::vertex_format(a.format),
                            offset: a.offset,
                            shader_location: a.location,
                        })
                        .collect()
                })
                .collect();

            let vertex_buffers: Vec<wgpu::VertexBufferLayout> = desc
                .vertex_layouts
                .iter()
                .zip(&attributes)
                .map(|(layout, attributes)| wgpu::VertexBufferLayout {
                    array_stride: layout.array_stride,
                    step_mode: match layout.step_mode {
                        VertexStepMode::Vertex => wgpu::VertexStepMode::Vertex,
                        VertexStepMode::Instance => wgpu::VertexStepMode::Instance,
                    },
                    attributes,
                })
                .collect();

            let color_targets: Vec<Option<wgpu::ColorTargetState>> = desc
                .output
                .color_formats
                .iter()
                .map(|format| {
                    Some(wgpu::ColorTargetState {
                        format: conversion::texture_format(*format),
                        blend: desc.blend.map(conversion::blend_state),
                        write_mask: wgpu::ColorWrites::ALL,
                    })
                })
                .collect();

            let depth_stencil = desc.depth_stencil.map(|ds| wgpu::DepthStencilState {
                format: conversion::texture_format(ds.format),
                depth_write_enabled: ds.depth_write_enabled,
                depth_compare: conversion::compare_function(ds.depth_compare),
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            });

            self.validated(|device| {
                let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: desc.label.as_deref(),
                    bind_group_layouts: &layouts,
                    push_constant_ranges: &[],
                });
                device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: desc.label.as_deref(),
                    layout: Some(&pipeline_layout),
                    vertex: wgpu::VertexState {
                        module: &vertex.module,
                        entry_point: &vertex.entry_point,
                        buffers: &vertex_buffers,
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                    },
                    fragment: Some(wgpu::FragmentState {
                        module: &fragment.module,
                        entry_point: &fragment.entry_point,
                        targets: &color_targets,
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                    }),
                    primitive: conversion::primitive_state(desc.primitive),
                    depth_stencil,
                    multisample: wgpu::MultisampleState::default(),
                    multiview: None,
                })
            })
            .map_err(BackendError::PipelineCreationFailed)?
        };

        let id = self.allocate_id();
        self.resources.write().render_pipelines.insert(id, pipeline);
        Ok(RenderPipelineHandle(id))
    }

    fn create_compute_pipeline(
        &self,
        desc: &ComputePipelineDescriptor,
    ) -> BackendResult<ComputePipelineHandle> {
        let pipeline = {
            let resources = self.resources.read();
            let shader = resources.shader(desc.shader, ShaderStage::Compute)?;
            let layouts = desc
                .binding_set_layouts
                .iter()
                .map(|h| resources.layout(*h))
                .collect::<BackendResult<Vec<_>>>()?;

            self.validated(|device| {
                let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: desc.label.as_deref(),
                    bind_group_layouts: &layouts,
                    push_constant_ranges: &[],
                });
                device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: desc.label.as_deref(),
                    layout: Some(&pipeline_layout),
                    module: &shader.module,
                    entry_point: &shader.entry_point,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                })
            })
            .map_err(BackendError::PipelineCreationFailed)?
        };

        let id = self.allocate_id();
        self.resources.write().compute_pipelines.insert(id, pipeline);
        Ok(ComputePipelineHandle(id))
    }

    fn create_framebuffer(&self, desc: &FramebufferDescriptor) -> BackendResult<FramebufferHandle> {
        let mut resources = self.resources.write();
        let mut colors = Vec::with_capacity(desc.color_targets.len());
        let mut color_formats = Vec::with_capacity(desc.color_targets.len());
        let mut extent = None;
        for target in &desc.color_targets {
            let record = resources.texture(*target)?;
            extent.get_or_insert((record.desc.width, record.desc.height));
            color_formats.push(record.desc.format);
            colors.push(record.texture.create_view(&wgpu::TextureViewDescriptor::default()));
        }
        let (depth, depth_format) = match desc.depth_target {
            Some(target) => {
                let record = resources.texture(target)?;
                extent.get_or_insert((record.desc.width, record.desc.height));
                (
                    Some(record.texture.create_view(&wgpu::TextureViewDescriptor::default())),
                    Some(record.desc.format),
                )
            }
            None => (None, None),
        };
        let (width, height) = extent.ok_or_else(|| {
            BackendError::TextureCreationFailed("framebuffer without attachments".into())
        })?;

        let id = self.allocate_id();
        resources.framebuffers.insert(
            id,
            FramebufferRecord {
                colors,
                depth,
                output: OutputDescription { color_formats, depth_format, width, height },
            },
        );
        Ok(FramebufferHandle(id))
    }

    fn swapchain_framebuffer(&self) -> FramebufferHandle {
        SWAPCHAIN
    }

    fn framebuffer_output(&self, framebuffer: FramebufferHandle) -> BackendResult<OutputDescription> {
        if framebuffer == SWAPCHAIN {
            return Ok(self.target.lock().output());
        }
        self.resources
            .read()
            .framebuffers
            .get(&framebuffer.0)
            .map(|fb| fb.output.clone())
            .ok_or_else(|| BackendError::ResourceNotFound(format!("{:?}", framebuffer)))
    }

    fn resize(&self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        let (width, height) = clamp_extent(width, height, self.device.limits().max_texture_dimension_2d);
        let mut target = self.target.lock();
        match &mut target.presentation {
            Presentation::Surface { surface, config, current } => {
                current.take();
                config.width = width;
                config.height = height;
                surface.configure(&self.device, config);
            }
            Presentation::Offscreen { texture, format } => {
                *texture = create_offscreen_color(&self.device, *format, width, height);
            }
        }
        if let Some(format) = target.depth.as_ref().map(|d| d.format) {
            target.depth = Some(create_depth_target(&self.device, format, width, height));
        }
        target.width = width;
        target.height = height;
        log::debug!("Swapchain resized to {}x{}", width, height);
    }

    fn swap_buffers(&self) -> BackendResult<()> {
        let mut target = self.target.lock();
        if let Presentation::Surface { current, .. } = &mut target.presentation {
            match current.take() {
                Some(texture) => texture.present(),
                None => log::trace!("swap_buffers with no rendered frame"),
            }
        }
        Ok(())
    }

    fn submit(&self, commands: &CommandList) -> BackendResult<()> {
        commands.validate_for_submit()?;
        if commands.is_empty() {
            return Ok(());
        }

        let resources = self.resources.read();
        let mut target = self.target.lock();
        let swapchain_view = if replay::uses_framebuffer(commands.commands(), SWAPCHAIN) {
            Some(target.acquire_view()?)
        } else {
            None
        };
        let swapchain = replay::SwapchainViews {
            color: swapchain_view.as_ref(),
            depth: target.depth.as_ref().map(|d| &d.view),
            output: target.output(),
        };

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Command List"),
        });
        let context = replay::ReplayContext {
            device: &self.device,
            resources: &resources,
            swapchain,
            swapchain_handle: SWAPCHAIN,
            mipmaps: &self.mipmaps,
        };
        context.encode(&mut encoder, commands.commands())?;
        self.queue.submit(std::iter::once(encoder.finish()));

        log::trace!(
            "Submitted command list {} ({} commands)",
            commands.id(),
            commands.commands().len()
        );
        Ok(())
    }

    fn wait_idle(&self) {
        self.device.poll(wgpu::Maintain::Wait);
    }

    fn destroy(&self, resource: ResourceHandle) {
        let mut resources = self.resources.write();
        let removed = match resource {
            ResourceHandle::Buffer(h) => resources.buffers.remove(&h.0).map(|b| b.destroy()).is_some(),
            ResourceHandle::Texture(h) => resources
                .textures
                .remove(&h.0)
                .map(|t| t.texture.destroy())
                .is_some(),
            ResourceHandle::TextureView(h) => resources.views.remove(&h.0).is_some(),
            ResourceHandle::Sampler(h) => resources.samplers.remove(&h.0).is_some(),
            ResourceHandle::Shader(h) => resources.shaders.remove(&h.0).is_some(),
            ResourceHandle::BindingSetLayout(h) => resources.layouts.remove(&h.0).is_some(),
            ResourceHandle::BindingSet(h) => resources.bind_groups.remove(&h.0).is_some(),
            ResourceHandle::RenderPipeline(h) => resources.render_pipelines.remove(&h.0).is_some(),
            ResourceHandle::ComputePipeline(h) => resources.compute_pipelines.remove(&h.0).is_some(),
            ResourceHandle::Framebuffer(h) => resources.framebuffers.remove(&h.0).is_some(),
        };
        if !removed {
            log::warn!("destroy of unknown {:?}", resource);
        }
    }
}

/// Staging buffer for an ordered in-list buffer update
pub(crate) fn staging_buffer(device: &wgpu::Device, data: &[u8]) -> wgpu::Buffer {
    let padded = (data.len() as u64).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT) as usize;
    let mut contents = data.to_vec();
    contents.resize(padded, 0);
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("Update Staging"),
        contents: &contents,
        usage: wgpu::BufferUsages::COPY_SRC,
    })
}
