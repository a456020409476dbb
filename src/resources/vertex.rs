//! Per-vertex field metadata

use crate::backend::{VertexAttribute, VertexBufferLayout, VertexFormat, VertexStepMode};
use crate::error::{PipelineError, PipelineResult};
use bytemuck::Pod;

/// What a vertex field means to the shader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexSemantic {
    Position,
    Normal,
    Tangent,
    TextureCoordinate,
    Color,
    BlendIndices,
    BlendWeights,
    Other,
}

/// One field of a vertex type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexElement {
    pub name: &'static str,
    pub semantic: VertexSemantic,
    pub format: VertexFormat,
}

impl VertexElement {
    pub const fn new(name: &'static str, semantic: VertexSemantic, format: VertexFormat) -> Self {
        Self { name, semantic, format }
    }
}

/// A plain-old-data vertex with a field table in declaration order
///
/// ```ignore
/// #[repr(C)]
/// #[derive(Clone, Copy, Pod, Zeroable)]
/// struct TexturedVertex {
///     position: [f32; 3],
///     uv: [f32; 2],
/// }
///
/// impl VertexType for TexturedVertex {
///     const ELEMENTS: &'static [VertexElement] = &[
///         VertexElement::new("Position", VertexSemantic::Position, VertexFormat::Float32x3),
///         VertexElement::new("TexCoords", VertexSemantic::TextureCoordinate, VertexFormat::Float32x2),
///     ];
/// }
/// ```
pub trait VertexType: Pod + Send + Sync + 'static {
    const ELEMENTS: &'static [VertexElement];
}

/// Type-erased field table of a vertex type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexElementTable {
    pub type_name: &'static str,
    pub stride: u64,
    pub elements: &'static [VertexElement],
}

impl VertexElementTable {
    pub fn of<V: VertexType>() -> Self {
        Self {
            type_name: std::any::type_name::<V>(),
            stride: std::mem::size_of::<V>() as u64,
            elements: V::ELEMENTS,
        }
    }

    /// Bytes covered by the declared fields when packed back to back
    pub fn packed_size(&self) -> u64 {
        self.elements.iter().map(|e| e.format.size()).sum()
    }

    /// Reject tables that cannot describe the type
    pub fn validate(&self) -> PipelineResult<()> {
        if self.elements.is_empty() {
            return Err(PipelineError::data_format(format!(
                "vertex type {} declares no fields",
                self.type_name
            )));
        }
        let packed = self.packed_size();
        if packed > self.stride {
            return Err(PipelineError::data_format(format!(
                "vertex fields of {} need {} bytes but the type is {} bytes",
                self.type_name, packed, self.stride
            )));
        }
        Ok(())
    }

    /// Buffer layout with packed offsets and shader locations from `first_location`
    pub fn to_layout(&self, first_location: u32) -> PipelineResult<VertexBufferLayout> {
        self.validate()?;
        let mut offset = 0;
        let attributes = self
            .elements
            .iter()
            .enumerate()
            .map(|(i, element)| {
                let attribute = VertexAttribute {
                    location: first_location + i as u32,
                    format: element.format,
                    offset,
                };
                offset += element.format.size();
                attribute
            })
            .collect();

        Ok(VertexBufferLayout {
            array_stride: self.stride,
            step_mode: VertexStepMode::Vertex,
            attributes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytemuck::Zeroable;

    #[repr(C)]
    #[derive(Clone, Copy, Pod, Zeroable)]
    struct PositionUv {
        position: [f32; 3],
        uv: [f32; 2],
    }

    impl VertexType for PositionUv {
        const ELEMENTS: &'static [VertexElement] = &[
            VertexElement::new("Position", VertexSemantic::Position, VertexFormat::Float32x3),
            VertexElement::new("TexCoords", VertexSemantic::TextureCoordinate, VertexFormat::Float32x2),
        ];
    }

    #[repr(C)]
    #[derive(Clone, Copy, Pod, Zeroable)]
    struct Oversized {
        position: [f32; 2],
    }

    impl VertexType for Oversized {
        const ELEMENTS: &'static [VertexElement] = &[VertexElement::new(
            "Position",
            VertexSemantic::Position,
            VertexFormat::Float32x4,
        )];
    }

    #[test]
    fn test_layout_offsets_follow_declaration_order() {
        let layout = VertexElementTable::of::<PositionUv>().to_layout(0).unwrap();
        assert_eq!(layout.array_stride, 20);
        assert_eq!(layout.attributes.len(), 2);
        assert_eq!(layout.attributes[0].offset, 0);
        assert_eq!(layout.attributes[0].format, VertexFormat::Float32x3);
        assert_eq!(layout.attributes[1].offset, 12);
        assert_eq!(layout.attributes[1].location, 1);
    }

    #[test]
    fn test_locations_continue_from_first() {
        let layout = VertexElementTable::of::<PositionUv>().to_layout(3).unwrap();
        let locations: Vec<u32> = layout.attributes.iter().map(|a| a.location).collect();
        assert_eq!(locations, vec![3, 4]);
    }

    #[test]
    fn test_fields_larger_than_type_rejected() {
        let result = VertexElementTable::of::<Oversized>().to_layout(0);
        assert!(matches!(result, Err(PipelineError::DataFormat(_))));
    }
}
