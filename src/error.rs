//! Error taxonomy for pipeline assembly and reactive uploads

use crate::backend::BackendError;
use thiserror::Error;

/// Errors surfaced by classification, assembly, uploads and rendering
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The resource set or a component is wired up incorrectly
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// Data does not match the declared shape (index type, upload size, vertex metadata)
    #[error("Data format error: {0}")]
    DataFormat(String),
    /// Shader or pipeline object construction failed
    #[error("Build error: {0}")]
    Build(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl PipelineError {
    pub(crate) fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub(crate) fn data_format(msg: impl Into<String>) -> Self {
        Self::DataFormat(msg.into())
    }

    pub(crate) fn build(msg: impl Into<String>) -> Self {
        Self::Build(msg.into())
    }

    /// Wrap a device failure that happened while building pipeline objects
    pub(crate) fn from_build(context: &str, err: BackendError) -> Self {
        Self::Build(format!("{context}: {err}"))
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
