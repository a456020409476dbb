//! Device abstraction
//!
//! Everything the pipeline core needs from a graphics device: object creation,
//! destruction, command list submission and presentation. Devices are shared
//! across producer threads, so every method takes `&self`.

use crate::backend::types::*;
use crate::command::CommandList;
use thiserror::Error;

/// Backend error type
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Failed to initialize backend: {0}")]
    InitializationFailed(String),
    #[error("Failed to create surface: {0}")]
    SurfaceCreationFailed(String),
    #[error("Failed to create device: {0}")]
    DeviceCreationFailed(String),
    #[error("Failed to acquire next image: {0}")]
    AcquireImageFailed(String),
    #[error("Failed to create buffer: {0}")]
    BufferCreationFailed(String),
    #[error("Failed to create texture: {0}")]
    TextureCreationFailed(String),
    #[error("Failed to create shader: {0}")]
    ShaderCreationFailed(String),
    #[error("Failed to create binding: {0}")]
    BindingCreationFailed(String),
    #[error("Failed to create pipeline: {0}")]
    PipelineCreationFailed(String),
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),
    #[error("Out of bounds access: {0}")]
    OutOfBounds(String),
    #[error("Invalid command list state: {0}")]
    InvalidCommandState(String),
    #[error("Failed to read back buffer: {0}")]
    ReadbackFailed(String),
    #[error("Surface lost")]
    SurfaceLost,
    #[error("Out of memory")]
    OutOfMemory,
    #[error("Device lost")]
    DeviceLost,
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Handle to a GPU buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub(crate) u64);

/// Handle to a GPU texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub(crate) u64);

/// Handle to a texture view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureViewHandle(pub(crate) u64);

/// Handle to a sampler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerHandle(pub(crate) u64);

/// Handle to a compiled shader module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderHandle(pub(crate) u64);

/// Handle to a binding-set layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingSetLayoutHandle(pub(crate) u64);

/// Handle to a binding set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingSetHandle(pub(crate) u64);

/// Handle to a render pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderPipelineHandle(pub(crate) u64);

/// Handle to a compute pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComputePipelineHandle(pub(crate) u64);

/// Handle to a framebuffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FramebufferHandle(pub(crate) u64);

/// Any device object that can be destroyed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceHandle {
    Buffer(BufferHandle),
    Texture(TextureHandle),
    TextureView(TextureViewHandle),
    Sampler(SamplerHandle),
    Shader(ShaderHandle),
    BindingSetLayout(BindingSetLayoutHandle),
    BindingSet(BindingSetHandle),
    RenderPipeline(RenderPipelineHandle),
    ComputePipeline(ComputePipelineHandle),
    Framebuffer(FramebufferHandle),
}

macro_rules! impl_into_resource_handle {
    ($($handle:ident => $variant:ident),* $(,)?) => {
        $(
            impl From<$handle> for ResourceHandle {
                fn from(handle: $handle) -> Self {
                    ResourceHandle::$variant(handle)
                }
            }
        )*
    };
}

impl_into_resource_handle! {
    BufferHandle => Buffer,
    TextureHandle => Texture,
    TextureViewHandle => TextureView,
    SamplerHandle => Sampler,
    ShaderHandle => Shader,
    BindingSetLayoutHandle => BindingSetLayout,
    BindingSetHandle => BindingSet,
    RenderPipelineHandle => RenderPipeline,
    ComputePipelineHandle => ComputePipeline,
    FramebufferHandle => Framebuffer,
}

/// Graphics device used by the pipeline core
pub trait GraphicsDevice: Send + Sync {
    /// Get device name
    fn name(&self) -> &str;

    // Resource creation

    /// Create a buffer; contents start zeroed
    fn create_buffer(&self, desc: &BufferDescriptor) -> BackendResult<BufferHandle>;

    /// Read back `size` bytes of a buffer, waiting for pending work
    fn read_buffer(&self, buffer: BufferHandle, offset: u64, size: u64) -> BackendResult<Vec<u8>>;

    /// Create a texture
    fn create_texture(&self, desc: &TextureDescriptor) -> BackendResult<TextureHandle>;

    /// Upload tightly packed texel data to mip level 0
    fn write_texture(&self, texture: TextureHandle, data: &[u8]) -> BackendResult<()>;

    /// Format a texture was created with
    fn texture_format(&self, texture: TextureHandle) -> BackendResult<TextureFormat>;

    /// Create a full view over a texture
    fn create_texture_view(&self, texture: TextureHandle) -> BackendResult<TextureViewHandle>;

    /// Create a sampler
    fn create_sampler(&self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle>;

    /// Compile a shader module
    fn create_shader(&self, desc: &ShaderDescriptor) -> BackendResult<ShaderHandle>;

    /// Create a binding-set layout
    fn create_binding_set_layout(
        &self,
        desc: &BindingSetLayoutDescriptor,
    ) -> BackendResult<BindingSetLayoutHandle>;

    /// Create a binding set
    fn create_binding_set(&self, desc: &BindingSetDescriptor) -> BackendResult<BindingSetHandle>;

    /// Create a render pipeline
    fn create_render_pipeline(
        &self,
        desc: &RenderPipelineDescriptor,
    ) -> BackendResult<RenderPipelineHandle>;

    /// Create a compute pipeline
    fn create_compute_pipeline(
        &self,
        desc: &ComputePipelineDescriptor,
    ) -> BackendResult<ComputePipelineHandle>;

    /// Create an offscreen framebuffer
    fn create_framebuffer(&self, desc: &FramebufferDescriptor) -> BackendResult<FramebufferHandle>;

    // Presentation

    /// Framebuffer backed by the swapchain (or the headless stand-in)
    fn swapchain_framebuffer(&self) -> FramebufferHandle;

    /// Attachment formats and size of a framebuffer
    fn framebuffer_output(&self, framebuffer: FramebufferHandle) -> BackendResult<OutputDescription>;

    /// Resize the swapchain
    fn resize(&self, width: u32, height: u32);

    /// Present the current swapchain image
    fn swap_buffers(&self) -> BackendResult<()>;

    // Command execution

    /// Allocate a command list for this device
    fn create_command_list(&self) -> BackendResult<CommandList> {
        Ok(CommandList::new())
    }

    /// Execute a finished command list; blocks until the work is queued
    fn submit(&self, commands: &CommandList) -> BackendResult<()>;

    /// Block until all submitted work is complete
    fn wait_idle(&self);

    // Resource cleanup

    /// Destroy a device object; unknown handles are ignored
    fn destroy(&self, resource: ResourceHandle);
}
