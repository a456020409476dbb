//! Reactive Pipelines - declarative GPU pipelines fed by value streams
//!
//! Resources are described once and kept up to date by the streams that
//! feed them:
//! - **Upload binding**: vertex, index and uniform buffers re-upload on every
//!   emission of their [`ValueStream`]
//! - **Assembly**: a descriptor list plus two shader stages become a
//!   [`Pipeline`] with binding sets and fixed-function state
//! - **Rendering**: [`Pipeline::render`] records one indexed draw into a
//!   pooled [`CommandList`] and submits it
//!
//! Two devices implement [`GraphicsDevice`]: [`WgpuDevice`] for real GPUs and
//! [`HeadlessDevice`], which executes transfers in host memory and records
//! every submission for inspection.
//!
//! ```ignore
//! let device: Arc<dyn GraphicsDevice> = Arc::new(HeadlessDevice::default());
//! let pool = Arc::new(Pool::for_command_lists(device.clone()));
//! let binder = UploadBinder::new(device.clone(), pool.clone());
//!
//! let vertices = ValueStream::new();
//! let indices = ValueStream::new();
//! let pipeline = PipelineAssembler::new(device.clone(), pool.clone()).assemble(
//!     &ShaderSource::wgsl(SHADER),
//!     &ShaderSource::wgsl(SHADER),
//!     vec![
//!         binder.vertex_stream::<Vertex, Vec<Vertex>>(&vertices, 4, 0)?,
//!         binder.index_stream::<u16, Vec<u16>>(&indices, 6)?,
//!     ],
//! )?;
//!
//! vertices.emit(quad_vertices());
//! indices.emit(vec![0, 1, 2, 2, 3, 0]);
//! pipeline.render(device.as_ref(), &mut pool.take()?, 0.0)?;
//! ```

pub mod backend;
pub mod command;
pub mod error;
pub mod frame;
pub mod pin;
pub mod pipeline;
pub mod pool;
pub mod resources;
pub mod stream;
pub mod window;

pub use backend::{GraphicsDevice, HeadlessConfig, HeadlessDevice, WgpuDevice};
pub use command::{Command, CommandList, Sequencer};
pub use error::{PipelineError, PipelineResult};
pub use frame::FrameLoop;
pub use pipeline::{
    DrawParameters, Pipeline, PipelineAssembler, PipelineConfig, RasterizerState, ShaderSource,
};
pub use pool::{Pool, Pooled};
pub use resources::{
    IndexElement, ResourceDescriptor, TextureMode, UploadBinder, VertexElement, VertexSemantic,
    VertexType,
};
pub use stream::{FileSource, Observer, PollingSource, StreamError, Subscription, ValueStream};
pub use window::{Window, WindowConfig};

// Re-export math types for uniform and vertex definitions
pub use glam;
