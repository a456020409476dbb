//! Device abstraction layer
//!
//! Provides the traits and types that the wgpu and headless devices implement.

pub mod headless;
pub mod shader;
pub mod traits;
pub mod types;
pub mod wgpu_backend;

pub use headless::{HeadlessConfig, HeadlessDevice};
pub use traits::*;
pub use types::*;
pub use wgpu_backend::WgpuDevice;
