//! Resource descriptors and device object ownership
//!
//! Each [`ResourceDescriptor`] owns its device objects and, for stream-backed
//! resources, the subscription feeding them. Dropping a descriptor cancels the
//! subscription and destroys the objects.

pub mod binder;
pub mod index;
pub mod vertex;

pub use binder::UploadBinder;
pub use index::{IndexElement, ScalarKind};
pub use vertex::{VertexElement, VertexElementTable, VertexSemantic, VertexType};

use crate::backend::{
    BindingKind, BufferHandle, GraphicsDevice, ResourceHandle, SamplerHandle, ShaderStages,
    TextureFormat, TextureViewHandle,
};
use crate::stream::{StreamError, Subscription};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// A device object destroyed when dropped
pub struct Owned<H: Copy + Into<ResourceHandle>> {
    handle: H,
    device: Arc<dyn GraphicsDevice>,
    armed: bool,
}

impl<H: Copy + Into<ResourceHandle>> Owned<H> {
    pub fn new(device: Arc<dyn GraphicsDevice>, handle: H) -> Self {
        Self { handle, device, armed: true }
    }

    pub fn handle(&self) -> H {
        self.handle
    }

    /// Same ownership over the untyped handle
    pub fn erase(mut self) -> Owned<ResourceHandle> {
        self.armed = false;
        Owned::new(self.device.clone(), self.handle.into())
    }
}

impl<H: Copy + Into<ResourceHandle>> Drop for Owned<H> {
    fn drop(&mut self) {
        if self.armed {
            let handle = self.handle.into();
            log::trace!("Destroying {:?}", handle);
            self.device.destroy(handle);
        }
    }
}

impl<H: Copy + Into<ResourceHandle> + std::fmt::Debug> std::fmt::Debug for Owned<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Owned").field(&self.handle).finish()
    }
}

/// Owned device objects released in reverse acquisition order
#[derive(Default)]
pub struct ResourceTracker {
    owned: Vec<Owned<ResourceHandle>>,
}

impl ResourceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership and return the typed handle
    pub fn track<H: Copy + Into<ResourceHandle>>(&mut self, owned: Owned<H>) -> H {
        let handle = owned.handle();
        self.owned.push(owned.erase());
        handle
    }

    pub fn len(&self) -> usize {
        self.owned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owned.is_empty()
    }

    /// Release everything now, newest first
    pub fn release_all(&mut self) {
        while let Some(owned) = self.owned.pop() {
            drop(owned);
        }
    }
}

impl Drop for ResourceTracker {
    fn drop(&mut self) {
        self.release_all();
    }
}

/// Progress of the uploads feeding one buffer
#[derive(Debug, Default)]
pub struct UploadStatus {
    uploads: AtomicU64,
    element_count: AtomicU32,
    failure: Mutex<Option<StreamError>>,
}

impl UploadStatus {
    /// Completed uploads
    pub fn uploads(&self) -> u64 {
        self.uploads.load(Ordering::Acquire)
    }

    /// Element count of the last successful upload
    pub fn element_count(&self) -> u32 {
        self.element_count.load(Ordering::Acquire)
    }

    /// Error that ended the upload subscription, if any
    pub fn failure(&self) -> Option<StreamError> {
        self.failure.lock().clone()
    }

    pub fn is_failed(&self) -> bool {
        self.failure.lock().is_some()
    }

    pub(crate) fn record_upload(&self, elements: u32) {
        self.element_count.store(elements, Ordering::Release);
        self.uploads.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn record_failure(&self, err: StreamError) {
        *self.failure.lock() = Some(err);
    }
}

/// Vertex buffer for one input slot, fed by a stream of vertex batches
pub struct VertexStream {
    pub(crate) subscription: Subscription,
    pub(crate) slot: u32,
    pub(crate) elements: VertexElementTable,
    pub(crate) max_elements: u32,
    pub(crate) status: Arc<UploadStatus>,
    pub(crate) buffer: Owned<BufferHandle>,
}

impl VertexStream {
    /// Ordering key among a pipeline's vertex streams
    ///
    /// Streams bind at their position in ascending slot order, so slots `{0, 2}`
    /// occupy vertex buffer indices 0 and 1.
    pub fn slot(&self) -> u32 {
        self.slot
    }

    pub fn elements(&self) -> &VertexElementTable {
        &self.elements
    }

    pub fn max_elements(&self) -> u32 {
        self.max_elements
    }

    pub fn buffer(&self) -> BufferHandle {
        self.buffer.handle()
    }

    pub fn status(&self) -> &Arc<UploadStatus> {
        &self.status
    }
}

/// Index buffer fed by a stream of index batches
pub struct IndexStream {
    pub(crate) subscription: Subscription,
    pub(crate) kind: ScalarKind,
    pub(crate) max_elements: u32,
    pub(crate) status: Arc<UploadStatus>,
    pub(crate) buffer: Owned<BufferHandle>,
}

impl IndexStream {
    pub fn kind(&self) -> ScalarKind {
        self.kind
    }

    pub fn max_elements(&self) -> u32 {
        self.max_elements
    }

    pub fn buffer(&self) -> BufferHandle {
        self.buffer.handle()
    }

    pub fn status(&self) -> &Arc<UploadStatus> {
        &self.status
    }
}

/// Shape of a uniform block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformLayout {
    pub type_name: &'static str,
    pub size: u64,
}

/// Uniform buffer fed by a stream of values
pub struct UniformBinding {
    pub(crate) subscription: Subscription,
    pub(crate) name: String,
    pub(crate) stages: ShaderStages,
    pub(crate) set: u32,
    pub(crate) layout: UniformLayout,
    pub(crate) status: Arc<UploadStatus>,
    pub(crate) buffer: Owned<BufferHandle>,
}

impl UniformBinding {
    pub fn layout(&self) -> UniformLayout {
        self.layout
    }

    pub fn buffer(&self) -> BufferHandle {
        self.buffer.handle()
    }

    pub fn status(&self) -> &Arc<UploadStatus> {
        &self.status
    }
}

/// How a shader accesses a bound texture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureMode {
    ReadOnly,
    ReadWrite,
}

/// View over an externally created texture
pub struct TextureBinding {
    pub(crate) name: String,
    pub(crate) stages: ShaderStages,
    pub(crate) set: u32,
    pub(crate) mode: TextureMode,
    pub(crate) format: TextureFormat,
    pub(crate) view: Owned<TextureViewHandle>,
}

impl TextureBinding {
    pub fn mode(&self) -> TextureMode {
        self.mode
    }

    pub fn view(&self) -> TextureViewHandle {
        self.view.handle()
    }
}

/// Sampler binding
pub struct SamplerBinding {
    pub(crate) name: String,
    pub(crate) stages: ShaderStages,
    pub(crate) set: u32,
    pub(crate) sampler: Owned<SamplerHandle>,
}

impl SamplerBinding {
    pub fn sampler(&self) -> SamplerHandle {
        self.sampler.handle()
    }
}

/// A resource a pipeline draws with
pub enum ResourceDescriptor {
    Vertex(VertexStream),
    Index(IndexStream),
    Uniform(UniformBinding),
    Texture(TextureBinding),
    Sampler(SamplerBinding),
}

impl ResourceDescriptor {
    /// Binding set number for shader resources
    pub fn set(&self) -> Option<u32> {
        match self {
            ResourceDescriptor::Uniform(u) => Some(u.set),
            ResourceDescriptor::Texture(t) => Some(t.set),
            ResourceDescriptor::Sampler(s) => Some(s.set),
            ResourceDescriptor::Vertex(_) | ResourceDescriptor::Index(_) => None,
        }
    }

    /// Shader-visible name for shader resources
    pub fn name(&self) -> Option<&str> {
        match self {
            ResourceDescriptor::Uniform(u) => Some(&u.name),
            ResourceDescriptor::Texture(t) => Some(&t.name),
            ResourceDescriptor::Sampler(s) => Some(&s.name),
            ResourceDescriptor::Vertex(_) | ResourceDescriptor::Index(_) => None,
        }
    }

    pub fn is_shader_resource(&self) -> bool {
        self.set().is_some()
    }
}

/// Shader-visible resource after classification
pub(crate) enum ShaderResource {
    Uniform(UniformBinding),
    Texture(TextureBinding),
    Sampler(SamplerBinding),
}

impl ShaderResource {
    pub(crate) fn set(&self) -> u32 {
        match self {
            ShaderResource::Uniform(u) => u.set,
            ShaderResource::Texture(t) => t.set,
            ShaderResource::Sampler(s) => s.set,
        }
    }

    pub(crate) fn layout_entry(&self) -> crate::backend::BindingLayoutEntry {
        let (name, kind, stages) = match self {
            ShaderResource::Uniform(u) => (&u.name, BindingKind::UniformBuffer, u.stages),
            ShaderResource::Texture(t) => {
                let kind = match t.mode {
                    TextureMode::ReadOnly => BindingKind::SampledTexture,
                    TextureMode::ReadWrite => BindingKind::StorageTexture { format: t.format },
                };
                (&t.name, kind, t.stages)
            }
            ShaderResource::Sampler(s) => (&s.name, BindingKind::Sampler, s.stages),
        };
        crate::backend::BindingLayoutEntry { name: name.clone(), kind, stages }
    }

    pub(crate) fn binding_resource(&self) -> crate::backend::BindingResource {
        use crate::backend::BindingResource;
        match self {
            ShaderResource::Uniform(u) => BindingResource::Buffer(u.buffer.handle()),
            ShaderResource::Texture(t) => BindingResource::TextureView(t.view.handle()),
            ShaderResource::Sampler(s) => BindingResource::Sampler(s.sampler.handle()),
        }
    }

    /// Split into the subscription (if any) and the owned device object
    pub(crate) fn into_parts(self) -> (Option<Subscription>, Owned<ResourceHandle>) {
        match self {
            ShaderResource::Uniform(u) => (Some(u.subscription), u.buffer.erase()),
            ShaderResource::Texture(t) => (None, t.view.erase()),
            ShaderResource::Sampler(s) => (None, s.sampler.erase()),
        }
    }
}
