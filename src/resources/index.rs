//! Index element types

use crate::backend::IndexFormat;
use crate::error::{PipelineError, PipelineResult};
use bytemuck::Pod;

/// Scalar kind of an index element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    U8,
    U16,
    U32,
    I16,
    I32,
}

impl ScalarKind {
    pub fn size(&self) -> u64 {
        match self {
            ScalarKind::U8 => 1,
            ScalarKind::U16 | ScalarKind::I16 => 2,
            ScalarKind::U32 | ScalarKind::I32 => 4,
        }
    }

    /// Device index format; only unsigned 16 and 32 bit indices are drawable
    pub fn index_format(&self) -> PipelineResult<IndexFormat> {
        match self {
            ScalarKind::U16 => Ok(IndexFormat::Uint16),
            ScalarKind::U32 => Ok(IndexFormat::Uint32),
            other => Err(PipelineError::data_format(format!(
                "unsupported index element type {:?}, expected U16 or U32",
                other
            ))),
        }
    }
}

/// A scalar usable as index data
pub trait IndexElement: Pod + Send + Sync + 'static {
    const KIND: ScalarKind;
}

impl IndexElement for u8 {
    const KIND: ScalarKind = ScalarKind::U8;
}

impl IndexElement for u16 {
    const KIND: ScalarKind = ScalarKind::U16;
}

impl IndexElement for u32 {
    const KIND: ScalarKind = ScalarKind::U32;
}

impl IndexElement for i16 {
    const KIND: ScalarKind = ScalarKind::I16;
}

impl IndexElement for i32 {
    const KIND: ScalarKind = ScalarKind::I32;
}
