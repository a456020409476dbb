//! Reactive upload binding
//!
//! Each constructor creates the target device object once and, for
//! stream-backed resources, subscribes to the stream. Every emission is pinned,
//! recorded as a buffer update on a pooled command list and submitted. A failed
//! upload ends that resource's subscription and is reported on its status.

use super::{
    IndexElement, IndexStream, Owned, ResourceDescriptor, SamplerBinding, TextureBinding,
    TextureMode, UniformBinding, UniformLayout, UploadStatus, VertexElementTable, VertexStream,
    VertexType,
};
use crate::backend::{
    BufferDescriptor, BufferHandle, BufferUsage, GraphicsDevice, SamplerDescriptor, ShaderStages,
    TextureHandle,
};
use crate::command::CommandList;
use crate::error::{PipelineError, PipelineResult};
use crate::pin::{pin_slice, pin_value, Pinned};
use crate::pool::Pool;
use crate::stream::{Observer, StreamError, Subscription, ValueStream};
use bytemuck::Pod;
use std::sync::Arc;

/// Uniform buffers are sized in 16-byte steps
const UNIFORM_ALIGNMENT: u64 = 16;

/// Creates resource descriptors wired to value streams
#[derive(Clone)]
pub struct UploadBinder {
    device: Arc<dyn GraphicsDevice>,
    pool: Arc<Pool<CommandList>>,
}

impl UploadBinder {
    pub fn new(device: Arc<dyn GraphicsDevice>, pool: Arc<Pool<CommandList>>) -> Self {
        Self { device, pool }
    }

    pub fn device(&self) -> &Arc<dyn GraphicsDevice> {
        &self.device
    }

    pub fn pool(&self) -> &Arc<Pool<CommandList>> {
        &self.pool
    }

    /// Vertex buffer for `slot` holding up to `max_elements` vertices
    ///
    /// `slot` orders the pipeline's vertex streams; it is not a binding index.
    pub fn vertex_stream<V, B>(
        &self,
        stream: &ValueStream<B>,
        max_elements: u32,
        slot: u32,
    ) -> PipelineResult<ResourceDescriptor>
    where
        V: VertexType,
        B: AsRef<[V]> + Clone + Send + 'static,
    {
        let elements = VertexElementTable::of::<V>();
        elements.validate()?;

        let buffer = self.create_buffer(
            format!("vertex slot {}", slot),
            elements.stride * max_elements as u64,
            BufferUsage::VERTEX,
        )?;
        let status = Arc::new(UploadStatus::default());
        let subscription = self.subscribe_batches::<V, B>(
            stream,
            buffer.handle(),
            max_elements,
            status.clone(),
            format!("vertex slot {}", slot),
        );

        Ok(ResourceDescriptor::Vertex(VertexStream {
            subscription,
            slot,
            elements,
            max_elements,
            status,
            buffer,
        }))
    }

    /// Index buffer holding up to `max_elements` indices
    pub fn index_stream<I, B>(
        &self,
        stream: &ValueStream<B>,
        max_elements: u32,
    ) -> PipelineResult<ResourceDescriptor>
    where
        I: IndexElement,
        B: AsRef<[I]> + Clone + Send + 'static,
    {
        let buffer = self.create_buffer(
            "index buffer".to_string(),
            I::KIND.size() * max_elements as u64,
            BufferUsage::INDEX,
        )?;
        let status = Arc::new(UploadStatus::default());
        let subscription = self.subscribe_batches::<I, B>(
            stream,
            buffer.handle(),
            max_elements,
            status.clone(),
            "index buffer".to_string(),
        );

        Ok(ResourceDescriptor::Index(IndexStream {
            subscription,
            kind: I::KIND,
            max_elements,
            status,
            buffer,
        }))
    }

    /// Uniform buffer named `name` in binding set `set`
    pub fn uniform_binding<U>(
        &self,
        stream: &ValueStream<U>,
        name: &str,
        stages: ShaderStages,
        set: u32,
    ) -> PipelineResult<ResourceDescriptor>
    where
        U: Pod + Send + Sync + 'static,
    {
        let layout = UniformLayout {
            type_name: std::any::type_name::<U>(),
            size: std::mem::size_of::<U>() as u64,
        };
        let padded = layout.size.div_ceil(UNIFORM_ALIGNMENT).max(1) * UNIFORM_ALIGNMENT;
        let buffer = self.create_buffer(format!("uniform {}", name), padded, BufferUsage::UNIFORM)?;
        let status = Arc::new(UploadStatus::default());

        let device = self.device.clone();
        let pool = self.pool.clone();
        let target = buffer.handle();
        let uploaded = status.clone();
        let observer = Observer::new(move |value: &U| {
            let pinned = pin_value(value);
            upload(device.as_ref(), &pool, target, &pinned)?;
            uploaded.record_upload(1);
            Ok(())
        });
        let subscription = stream.subscribe(report_failures(observer, status.clone(), name.to_string()));

        Ok(ResourceDescriptor::Uniform(UniformBinding {
            subscription,
            name: name.to_string(),
            stages,
            set,
            layout,
            status,
            buffer,
        }))
    }

    /// View over `texture` named `name` in binding set `set`
    pub fn texture_binding(
        &self,
        texture: TextureHandle,
        mode: TextureMode,
        name: &str,
        stages: ShaderStages,
        set: u32,
    ) -> PipelineResult<ResourceDescriptor> {
        let format = self.device.texture_format(texture)?;
        let view = Owned::new(self.device.clone(), self.device.create_texture_view(texture)?);
        log::debug!("Texture binding '{}' ({:?}, {:?})", name, mode, format);

        Ok(ResourceDescriptor::Texture(TextureBinding {
            name: name.to_string(),
            stages,
            set,
            mode,
            format,
            view,
        }))
    }

    /// Sampler named `name` in binding set `set`
    pub fn sampler_binding(
        &self,
        desc: &SamplerDescriptor,
        name: &str,
        stages: ShaderStages,
        set: u32,
    ) -> PipelineResult<ResourceDescriptor> {
        let sampler = Owned::new(self.device.clone(), self.device.create_sampler(desc)?);

        Ok(ResourceDescriptor::Sampler(SamplerBinding {
            name: name.to_string(),
            stages,
            set,
            sampler,
        }))
    }

    fn create_buffer(
        &self,
        label: String,
        size: u64,
        usage: BufferUsage,
    ) -> PipelineResult<Owned<BufferHandle>> {
        let handle = self.device.create_buffer(&BufferDescriptor {
            label: Some(label),
            size,
            usage: usage | BufferUsage::COPY_DST | BufferUsage::COPY_SRC,
        })?;
        Ok(Owned::new(self.device.clone(), handle))
    }

    fn subscribe_batches<E, B>(
        &self,
        stream: &ValueStream<B>,
        target: BufferHandle,
        max_elements: u32,
        status: Arc<UploadStatus>,
        what: String,
    ) -> Subscription
    where
        E: Pod + Send + Sync + 'static,
        B: AsRef<[E]> + Clone + Send + 'static,
    {
        let device = self.device.clone();
        let pool = self.pool.clone();
        let uploaded = status.clone();
        let label = what.clone();
        let observer = Observer::new(move |batch: &B| {
            let values = batch.as_ref();
            if values.len() > max_elements as usize {
                return Err(PipelineError::data_format(format!(
                    "{}: emitted {} elements, buffer holds {}",
                    label,
                    values.len(),
                    max_elements
                ))
                .into());
            }
            let pinned = pin_slice(values);
            upload(device.as_ref(), &pool, target, &pinned)?;
            uploaded.record_upload(values.len() as u32);
            Ok(())
        });
        stream.subscribe(report_failures(observer, status, what))
    }
}

/// Record and submit a buffer update through a pooled command list
fn upload(
    device: &dyn GraphicsDevice,
    pool: &Pool<CommandList>,
    buffer: BufferHandle,
    data: &Pinned<'_>,
) -> Result<(), StreamError> {
    if data.is_empty() {
        return Ok(());
    }
    let mut list = pool.take()?;
    let recorded = list.begin_fluent().update_buffer(buffer, 0, data.as_bytes()).end();
    device.submit(recorded).map_err(PipelineError::from)?;
    Ok(())
}

fn report_failures<T>(observer: Observer<T>, status: Arc<UploadStatus>, what: String) -> Observer<T> {
    observer.with_error(move |err| {
        log::error!("Upload to {} failed, no further updates: {}", what, err);
        status.record_failure(err.clone());
    })
}
