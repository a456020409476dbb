//! Pipeline assembly and rendering
//!
//! [`PipelineAssembler`] turns two shader sources and a list of
//! [`ResourceDescriptor`](crate::resources::ResourceDescriptor)s into a
//! [`Pipeline`]:
//! 1. Classification - sort descriptors by role and validate them
//! 2. Binding sets - one layout and set per set number
//! 3. Pipeline state - shaders, vertex layouts and fixed-function state
//!
//! [`Pipeline::render`] then records and submits one indexed draw per call.

pub mod assembler;
pub mod config;
pub mod layout;
pub mod render;

pub use assembler::{PipelineAssembler, ShaderSource};
pub use config::{DrawParameters, PipelineConfig, RasterizerState, DEFAULT_CLEAR_COLOR};
pub use layout::{BindingSetLayout, VertexLayout, MAX_BINDING_SETS};
pub use render::Pipeline;
