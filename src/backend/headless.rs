//! Headless device for testing and CI.
//!
//! Buffers and textures live in host memory. Submitted command lists are
//! validated, their transfer commands are executed against that memory, and a
//! copy of every submitted list is kept so tests can inspect what was drawn.

use crate::backend::shader::validate_wgsl;
use crate::backend::traits::*;
use crate::backend::types::*;
use crate::command::{Command, CommandList};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Configuration for [`HeadlessDevice`]
#[derive(Debug, Clone)]
pub struct HeadlessConfig {
    /// Size of the stand-in swapchain framebuffer
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    /// Attach a depth target to the stand-in swapchain
    pub depth_format: Option<TextureFormat>,
    /// Run shader sources through the WGSL front end
    pub validate_shaders: bool,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            format: TextureFormat::Bgra8UnormSrgb,
            depth_format: None,
            validate_shaders: true,
        }
    }
}

struct BufferRecord {
    data: Vec<u8>,
}

struct TextureRecord {
    desc: TextureDescriptor,
    data: Vec<u8>,
}

#[derive(Default)]
struct HeadlessState {
    buffers: HashMap<u64, BufferRecord>,
    textures: HashMap<u64, TextureRecord>,
    views: HashMap<u64, u64>,
    samplers: HashMap<u64, SamplerDescriptor>,
    shaders: HashMap<u64, ShaderStage>,
    layouts: HashMap<u64, Vec<BindingLayoutEntry>>,
    sets: HashMap<u64, u64>,
    render_pipelines: HashMap<u64, RenderPipelineDescriptor>,
    compute_pipelines: HashMap<u64, ComputePipelineDescriptor>,
    framebuffers: HashMap<u64, OutputDescription>,

    submissions: Vec<Vec<Command>>,
    destroyed: Vec<ResourceHandle>,
    creations: u64,
    command_lists: u64,
    presented: u64,
}

impl HeadlessState {
    fn live_objects(&self) -> usize {
        self.buffers.len()
            + self.textures.len()
            + self.views.len()
            + self.samplers.len()
            + self.shaders.len()
            + self.layouts.len()
            + self.sets.len()
            + self.render_pipelines.len()
            + self.compute_pipelines.len()
            + self.framebuffers.len()
    }

    fn buffer_mut(&mut self, buffer: BufferHandle) -> BackendResult<&mut BufferRecord> {
        self.buffers
            .get_mut(&buffer.0)
            .ok_or_else(|| BackendError::ResourceNotFound(format!("{:?}", buffer)))
    }

    fn buffer_bytes(&self, buffer: BufferHandle, offset: u64, size: u64) -> BackendResult<&[u8]> {
        let record = self
            .buffers
            .get(&buffer.0)
            .ok_or_else(|| BackendError::ResourceNotFound(format!("{:?}", buffer)))?;
        let range = checked_range(offset, size, record.data.len(), buffer)?;
        Ok(&record.data[range])
    }

    fn require_buffer(&self, buffer: BufferHandle) -> BackendResult<()> {
        self.buffers
            .contains_key(&buffer.0)
            .then_some(())
            .ok_or_else(|| BackendError::ResourceNotFound(format!("{:?}", buffer)))
    }

    fn execute(&mut self, command: &Command, swapchain: FramebufferHandle) -> BackendResult<()> {
        match command {
            Command::SetFramebuffer(fb) => {
                if *fb != swapchain && !self.framebuffers.contains_key(&fb.0) {
                    return Err(BackendError::ResourceNotFound(format!("{:?}", fb)));
                }
            }
            Command::SetPipeline(p) => {
                if !self.render_pipelines.contains_key(&p.0) {
                    return Err(BackendError::ResourceNotFound(format!("{:?}", p)));
                }
            }
            Command::SetComputePipeline(p) => {
                if !self.compute_pipelines.contains_key(&p.0) {
                    return Err(BackendError::ResourceNotFound(format!("{:?}", p)));
                }
            }
            Command::SetBindingSet { set, .. } | Command::SetComputeBindingSet { set, .. } => {
                if !self.sets.contains_key(&set.0) {
                    return Err(BackendError::ResourceNotFound(format!("{:?}", set)));
                }
            }
            Command::SetVertexBuffer { buffer, .. }
            | Command::SetIndexBuffer { buffer, .. }
            | Command::DrawIndirect { buffer, .. }
            | Command::DrawIndexedIndirect { buffer, .. }
            | Command::DispatchIndirect { buffer, .. } => self.require_buffer(*buffer)?,
            Command::UpdateBuffer { buffer, offset, data } => {
                let target = self.buffer_mut(*buffer)?;
                let range = checked_range(*offset, data.len() as u64, target.data.len(), *buffer)?;
                target.data[range].copy_from_slice(data);
            }
            Command::CopyBuffer { src, src_offset, dst, dst_offset, size } => {
                let bytes = self.buffer_bytes(*src, *src_offset, *size)?.to_vec();
                let target = self.buffer_mut(*dst)?;
                let range = checked_range(*dst_offset, *size, target.data.len(), *dst)?;
                target.data[range].copy_from_slice(&bytes);
            }
            Command::CopyTexture { src, dst } => {
                let data = self
                    .textures
                    .get(&src.0)
                    .map(|t| t.data.clone())
                    .ok_or_else(|| BackendError::ResourceNotFound(format!("{:?}", src)))?;
                let target = self
                    .textures
                    .get_mut(&dst.0)
                    .ok_or_else(|| BackendError::ResourceNotFound(format!("{:?}", dst)))?;
                if target.data.len() != data.len() {
                    return Err(BackendError::OutOfBounds(format!(
                        "texture copy {:?} -> {:?} size mismatch",
                        src, dst
                    )));
                }
                target.data = data;
            }
            Command::GenerateMipmaps(texture) => {
                if !self.textures.contains_key(&texture.0) {
                    return Err(BackendError::ResourceNotFound(format!("{:?}", texture)));
                }
            }
            Command::ClearColorTarget { .. }
            | Command::ClearDepthStencil { .. }
            | Command::SetViewport { .. }
            | Command::SetFullViewports
            | Command::SetScissorRect { .. }
            | Command::SetFullScissorRects
            | Command::Draw { .. }
            | Command::DrawIndexed { .. }
            | Command::Dispatch { .. }
            | Command::PushDebugGroup(_)
            | Command::PopDebugGroup
            | Command::InsertDebugMarker(_) => {}
        }
        Ok(())
    }
}

fn checked_range(
    offset: u64,
    size: u64,
    len: usize,
    buffer: BufferHandle,
) -> BackendResult<std::ops::Range<usize>> {
    let end = offset.checked_add(size).filter(|end| *end <= len as u64);
    match end {
        Some(end) => Ok(offset as usize..end as usize),
        None => Err(BackendError::OutOfBounds(format!(
            "{:?}: {} bytes at offset {} exceed size {}",
            buffer, size, offset, len
        ))),
    }
}

/// In-memory device
pub struct HeadlessDevice {
    config: Mutex<HeadlessConfig>,
    state: Mutex<HeadlessState>,
    next_id: AtomicU64,
    swapchain: FramebufferHandle,
}

impl HeadlessDevice {
    pub fn new(config: HeadlessConfig) -> Self {
        log::info!(
            "Headless device created ({}x{} {:?})",
            config.width,
            config.height,
            config.format
        );
        Self {
            config: Mutex::new(config),
            state: Mutex::new(HeadlessState::default()),
            next_id: AtomicU64::new(1),
            swapchain: FramebufferHandle(0),
        }
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Number of successful create calls
    pub fn creation_count(&self) -> u64 {
        self.state.lock().creations
    }

    /// Objects created and not yet destroyed
    pub fn live_objects(&self) -> usize {
        self.state.lock().live_objects()
    }

    /// Destroyed objects in destruction order
    pub fn destroyed(&self) -> Vec<ResourceHandle> {
        self.state.lock().destroyed.clone()
    }

    /// Commands of every successful submission, oldest first
    pub fn submissions(&self) -> Vec<Vec<Command>> {
        self.state.lock().submissions.clone()
    }

    pub fn submission_count(&self) -> usize {
        self.state.lock().submissions.len()
    }

    pub fn clear_submissions(&self) {
        self.state.lock().submissions.clear();
    }

    /// Command lists handed out by `create_command_list`
    pub fn command_lists_created(&self) -> u64 {
        self.state.lock().command_lists
    }

    pub fn presented_frames(&self) -> u64 {
        self.state.lock().presented
    }

    pub fn buffer_size(&self, buffer: BufferHandle) -> Option<u64> {
        self.state
            .lock()
            .buffers
            .get(&buffer.0)
            .map(|b| b.data.len() as u64)
    }

    /// Entries a binding-set layout was created with
    pub fn layout_entries(&self, layout: BindingSetLayoutHandle) -> Option<Vec<BindingLayoutEntry>> {
        self.state.lock().layouts.get(&layout.0).cloned()
    }

    /// Descriptor a render pipeline was created with
    pub fn render_pipeline_desc(&self, pipeline: RenderPipelineHandle) -> Option<RenderPipelineDescriptor> {
        self.state.lock().render_pipelines.get(&pipeline.0).cloned()
    }

    pub fn texture_data(&self, texture: TextureHandle) -> Option<Vec<u8>> {
        self.state.lock().textures.get(&texture.0).map(|t| t.data.clone())
    }

    fn check_binding(
        state: &HeadlessState,
        entry: &BindingLayoutEntry,
        resource: &BindingResource,
    ) -> BackendResult<()> {
        let exists = match resource {
            BindingResource::Buffer(b) => state.buffers.contains_key(&b.0),
            BindingResource::TextureView(v) => state.views.contains_key(&v.0),
            BindingResource::Sampler(s) => state.samplers.contains_key(&s.0),
        };
        if !exists {
            return Err(BackendError::BindingCreationFailed(format!(
                "'{}': {:?} does not exist",
                entry.name, resource
            )));
        }
        let matches = matches!(
            (&entry.kind, resource),
            (BindingKind::UniformBuffer, BindingResource::Buffer(_))
                | (BindingKind::SampledTexture, BindingResource::TextureView(_))
                | (BindingKind::StorageTexture { .. }, BindingResource::TextureView(_))
                | (BindingKind::Sampler, BindingResource::Sampler(_))
        );
        if !matches {
            return Err(BackendError::BindingCreationFailed(format!(
                "'{}' expects {:?}, got {:?}",
                entry.name, entry.kind, resource
            )));
        }
        Ok(())
    }
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new(HeadlessConfig::default())
    }
}

impl GraphicsDevice for HeadlessDevice {
    fn name(&self) -> &str {
        "Headless"
    }

    fn create_buffer(&self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        log::trace!("Headless: creating buffer {:?} (size: {})", desc.label, desc.size);
        let id = self.allocate_id();
        let mut state = self.state.lock();
        state.buffers.insert(id, BufferRecord { data: vec![0; desc.size as usize] });
        state.creations += 1;
        Ok(BufferHandle(id))
    }

    fn read_buffer(&self, buffer: BufferHandle, offset: u64, size: u64) -> BackendResult<Vec<u8>> {
        Ok(self.state.lock().buffer_bytes(buffer, offset, size)?.to_vec())
    }

    fn create_texture(&self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        log::trace!(
            "Headless: creating texture {:?} ({}x{} {:?})",
            desc.label,
            desc.width,
            desc.height,
            desc.format
        );
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::TextureCreationFailed("zero-sized texture".into()));
        }
        let size = desc.width as usize * desc.height as usize * desc.format.bytes_per_pixel() as usize;
        let id = self.allocate_id();
        let mut state = self.state.lock();
        state.textures.insert(id, TextureRecord { desc: desc.clone(), data: vec![0; size] });
        state.creations += 1;
        Ok(TextureHandle(id))
    }

    fn write_texture(&self, texture: TextureHandle, data: &[u8]) -> BackendResult<()> {
        let mut state = self.state.lock();
        let record = state
            .textures
            .get_mut(&texture.0)
            .ok_or_else(|| BackendError::ResourceNotFound(format!("{:?}", texture)))?;
        if data.len() != record.data.len() {
            return Err(BackendError::OutOfBounds(format!(
                "{:?}: wrote {} bytes, texture holds {}",
                texture,
                data.len(),
                record.data.len()
            )));
        }
        record.data.copy_from_slice(data);
        Ok(())
    }

    fn texture_format(&self, texture: TextureHandle) -> BackendResult<TextureFormat> {
        self.state
            .lock()
            .textures
            .get(&texture.0)
            .map(|t| t.desc.format)
            .ok_or_else(|| BackendError::ResourceNotFound(format!("{:?}", texture)))
    }

    fn create_texture_view(&self, texture: TextureHandle) -> BackendResult<TextureViewHandle> {
        let mut state = self.state.lock();
        if !state.textures.contains_key(&texture.0) {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?} not found",
                texture
            )));
        }
        let id = self.allocate_id();
        state.views.insert(id, texture.0);
        state.creations += 1;
        Ok(TextureViewHandle(id))
    }

    fn create_sampler(&self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        log::trace!("Headless: creating sampler {:?}", desc.label);
        let id = self.allocate_id();
        let mut state = self.state.lock();
        state.samplers.insert(id, desc.clone());
        state.creations += 1;
        Ok(SamplerHandle(id))
    }

    fn create_shader(&self, desc: &ShaderDescriptor) -> BackendResult<ShaderHandle> {
        log::trace!("Headless: creating {:?} shader {:?}", desc.stage, desc.label);
        if self.config.lock().validate_shaders {
            validate_wgsl(desc)?;
        }
        let id = self.allocate_id();
        let mut state = self.state.lock();
        state.shaders.insert(id, desc.stage);
        state.creations += 1;
        Ok(ShaderHandle(id))
    }

    fn create_binding_set_layout(
        &self,
        desc: &BindingSetLayoutDescriptor,
    ) -> BackendResult<BindingSetLayoutHandle> {
        log::trace!(
            "Headless: creating binding set layout {:?} ({} entries)",
            desc.label,
            desc.entries.len()
        );
        let id = self.allocate_id();
        let mut state = self.state.lock();
        state.layouts.insert(id, desc.entries.clone());
        state.creations += 1;
        Ok(BindingSetLayoutHandle(id))
    }

    fn create_binding_set(&self, desc: &BindingSetDescriptor) -> BackendResult<BindingSetHandle> {
        let mut state = self.state.lock();
        let entries = state.layouts.get(&desc.layout.0).ok_or_else(|| {
            BackendError::BindingCreationFailed(format!("{:?} not found", desc.layout))
        })?;
        if entries.len() != desc.resources.len() {
            return Err(BackendError::BindingCreationFailed(format!(
                "layout has {} entries, got {} resources",
                entries.len(),
                desc.resources.len()
            )));
        }
        for (entry, resource) in entries.iter().zip(&desc.resources) {
            Self::check_binding(&state, entry, resource)?;
        }
        let id = self.allocate_id();
        state.sets.insert(id, desc.layout.0);
        state.creations += 1;
        Ok(BindingSetHandle(id))
    }

    fn create_render_pipeline(
        &self,
        desc: &RenderPipelineDescriptor,
    ) -> BackendResult<RenderPipelineHandle> {
        log::trace!("Headless: creating render pipeline {:?}", desc.label);
        let mut state = self.state.lock();
        let stages = [
            (desc.vertex_shader, ShaderStage::Vertex),
            (desc.fragment_shader, ShaderStage::Fragment),
        ];
        for (shader, stage) in stages {
            match state.shaders.get(&shader.0) {
                Some(found) if *found == stage => {}
                Some(found) => {
                    return Err(BackendError::PipelineCreationFailed(format!(
                        "{:?} is a {:?} shader, expected {:?}",
                        shader, found, stage
                    )))
                }
                None => {
                    return Err(BackendError::PipelineCreationFailed(format!(
                        "{:?} not found",
                        shader
                    )))
                }
            }
        }
        if let Some(missing) = desc
            .binding_set_layouts
            .iter()
            .find(|l| !state.layouts.contains_key(&l.0))
        {
            return Err(BackendError::PipelineCreationFailed(format!("{:?} not found", missing)));
        }
        if desc.output.color_formats.is_empty() {
            return Err(BackendError::PipelineCreationFailed("no color targets".into()));
        }
        let id = self.allocate_id();
        state.render_pipelines.insert(id, desc.clone());
        state.creations += 1;
        Ok(RenderPipelineHandle(id))
    }

    fn create_compute_pipeline(
        &self,
        desc: &ComputePipelineDescriptor,
    ) -> BackendResult<ComputePipelineHandle> {
        let mut state = self.state.lock();
        if state.shaders.get(&desc.shader.0) != Some(&ShaderStage::Compute) {
            return Err(BackendError::PipelineCreationFailed(format!(
                "{:?} is not a compute shader",
                desc.shader
            )));
        }
        let id = self.allocate_id();
        state.compute_pipelines.insert(id, desc.clone());
        state.creations += 1;
        Ok(ComputePipelineHandle(id))
    }

    fn create_framebuffer(&self, desc: &FramebufferDescriptor) -> BackendResult<FramebufferHandle> {
        let mut state = self.state.lock();
        let mut color_formats = Vec::with_capacity(desc.color_targets.len());
        let mut extent = None;
        for target in desc.color_targets.iter().chain(desc.depth_target.iter()) {
            let texture = state.textures.get(&target.0).ok_or_else(|| {
                BackendError::TextureCreationFailed(format!("{:?} not found", target))
            })?;
            extent.get_or_insert((texture.desc.width, texture.desc.height));
            if !texture.desc.format.is_depth() {
                color_formats.push(texture.desc.format);
            }
        }
        let depth_format = match desc.depth_target {
            Some(depth) => state.textures.get(&depth.0).map(|t| t.desc.format),
            None => None,
        };
        let (width, height) = extent.unwrap_or((0, 0));
        let id = self.allocate_id();
        state.framebuffers.insert(
            id,
            OutputDescription { color_formats, depth_format, width, height },
        );
        state.creations += 1;
        Ok(FramebufferHandle(id))
    }

    fn swapchain_framebuffer(&self) -> FramebufferHandle {
        self.swapchain
    }

    fn framebuffer_output(&self, framebuffer: FramebufferHandle) -> BackendResult<OutputDescription> {
        if framebuffer == self.swapchain {
            let config = self.config.lock();
            return Ok(OutputDescription {
                color_formats: vec![config.format],
                depth_format: config.depth_format,
                width: config.width,
                height: config.height,
            });
        }
        self.state
            .lock()
            .framebuffers
            .get(&framebuffer.0)
            .cloned()
            .ok_or_else(|| BackendError::ResourceNotFound(format!("{:?}", framebuffer)))
    }

    fn resize(&self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            let mut config = self.config.lock();
            config.width = width;
            config.height = height;
        }
    }

    fn swap_buffers(&self) -> BackendResult<()> {
        self.state.lock().presented += 1;
        Ok(())
    }

    fn create_command_list(&self) -> BackendResult<CommandList> {
        let list = CommandList::new();
        log::trace!("Headless: creating command list {}", list.id());
        self.state.lock().command_lists += 1;
        Ok(list)
    }

    fn submit(&self, commands: &CommandList) -> BackendResult<()> {
        commands.validate_for_submit()?;
        let mut state = self.state.lock();
        for command in commands.commands() {
            state.execute(command, self.swapchain)?;
        }
        log::debug!(
            "Headless: executed command list {} ({} commands)",
            commands.id(),
            commands.commands().len()
        );
        state.submissions.push(commands.commands().to_vec());
        Ok(())
    }

    fn wait_idle(&self) {}

    fn destroy(&self, resource: ResourceHandle) {
        let mut state = self.state.lock();
        let removed = match resource {
            ResourceHandle::Buffer(h) => state.buffers.remove(&h.0).is_some(),
            ResourceHandle::Texture(h) => state.textures.remove(&h.0).is_some(),
            ResourceHandle::TextureView(h) => state.views.remove(&h.0).is_some(),
            ResourceHandle::Sampler(h) => state.samplers.remove(&h.0).is_some(),
            ResourceHandle::Shader(h) => state.shaders.remove(&h.0).is_some(),
            ResourceHandle::BindingSetLayout(h) => state.layouts.remove(&h.0).is_some(),
            ResourceHandle::BindingSet(h) => state.sets.remove(&h.0).is_some(),
            ResourceHandle::RenderPipeline(h) => state.render_pipelines.remove(&h.0).is_some(),
            ResourceHandle::ComputePipeline(h) => state.compute_pipelines.remove(&h.0).is_some(),
            ResourceHandle::Framebuffer(h) => state.framebuffers.remove(&h.0).is_some(),
        };
        if removed {
            state.destroyed.push(resource);
        } else {
            log::warn!("Headless: destroy of unknown {:?}", resource);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(device: &HeadlessDevice, size: u64) -> BufferHandle {
        device
            .create_buffer(&BufferDescriptor {
                label: Some("test".into()),
                size,
                usage: BufferUsage::VERTEX | BufferUsage::COPY_DST,
            })
            .unwrap()
    }

    #[test]
    fn test_buffers_start_zeroed() {
        let device = HeadlessDevice::default();
        let b = buffer(&device, 8);
        assert_eq!(device.read_buffer(b, 0, 8).unwrap(), vec![0; 8]);
    }

    #[test]
    fn test_update_and_copy_execute_in_order() {
        let device = HeadlessDevice::default();
        let a = buffer(&device, 4);
        let b = buffer(&device, 4);
        let mut list = CommandList::new();
        list.begin();
        list.update_buffer(a, 0, &[1, 2, 3, 4]);
        list.copy_buffer(a, 1, b, 0, 2);
        list.update_buffer(a, 0, &[9]);
        list.end();
        device.submit(&list).unwrap();

        assert_eq!(device.read_buffer(a, 0, 4).unwrap(), vec![9, 2, 3, 4]);
        assert_eq!(device.read_buffer(b, 0, 4).unwrap(), vec![2, 3, 0, 0]);
        assert_eq!(device.submission_count(), 1);
    }

    #[test]
    fn test_out_of_bounds_update_fails() {
        let device = HeadlessDevice::default();
        let a = buffer(&device, 4);
        let mut list = CommandList::new();
        list.begin();
        list.update_buffer(a, 2, &[1, 2, 3]);
        list.end();
        assert!(matches!(device.submit(&list), Err(BackendError::OutOfBounds(_))));
        assert_eq!(device.submission_count(), 0);
    }

    #[test]
    fn test_unfinished_list_rejected() {
        let device = HeadlessDevice::default();
        let mut list = CommandList::new();
        list.begin();
        assert!(matches!(
            device.submit(&list),
            Err(BackendError::InvalidCommandState(_))
        ));
    }

    #[test]
    fn test_binding_set_checks_kinds() {
        let device = HeadlessDevice::default();
        let layout = device
            .create_binding_set_layout(&BindingSetLayoutDescriptor {
                label: None,
                entries: vec![BindingLayoutEntry {
                    name: "Sampler".into(),
                    kind: BindingKind::Sampler,
                    stages: ShaderStages::FRAGMENT,
                }],
            })
            .unwrap();
        let b = buffer(&device, 16);
        let result = device.create_binding_set(&BindingSetDescriptor {
            label: None,
            layout,
            resources: vec![BindingResource::Buffer(b)],
        });
        assert!(matches!(result, Err(BackendError::BindingCreationFailed(_))));
    }

    #[test]
    fn test_destroy_tracks_order() {
        let device = HeadlessDevice::default();
        let a = buffer(&device, 4);
        let b = buffer(&device, 4);
        device.destroy(b.into());
        device.destroy(a.into());
        device.destroy(a.into());
        assert_eq!(
            device.destroyed(),
            vec![ResourceHandle::Buffer(b), ResourceHandle::Buffer(a)]
        );
        assert_eq!(device.live_objects(), 0);
    }

    #[test]
    fn test_offscreen_framebuffer_output() {
        let device = HeadlessDevice::default();
        let color = device
            .create_texture(&TextureDescriptor {
                width: 64,
                height: 32,
                format: TextureFormat::Rgba8Unorm,
                usage: TextureUsage::RENDER_ATTACHMENT,
                ..Default::default()
            })
            .unwrap();
        let depth = device
            .create_texture(&TextureDescriptor {
                width: 64,
                height: 32,
                format: TextureFormat::Depth32Float,
                usage: TextureUsage::RENDER_ATTACHMENT,
                ..Default::default()
            })
            .unwrap();
        let fb = device
            .create_framebuffer(&FramebufferDescriptor {
                label: None,
                color_targets: vec![color],
                depth_target: Some(depth),
            })
            .unwrap();
        let output = device.framebuffer_output(fb).unwrap();
        assert_eq!(output.color_formats, vec![TextureFormat::Rgba8Unorm]);
        assert_eq!(output.depth_format, Some(TextureFormat::Depth32Float));
        assert_eq!((output.width, output.height), (64, 32));
    }
}
