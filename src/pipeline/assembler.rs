//! Pipeline assembly from shader sources and resource descriptors

use super::config::PipelineConfig;
use super::layout::{self, VertexLayout};
use super::render::{IndexBinding, Pipeline, PipelineParts};
use crate::backend::{
    CompareFunction, DepthStencilState, GraphicsDevice, OutputDescription, PrimitiveState,
    RenderPipelineDescriptor, ShaderDescriptor, ShaderHandle, ShaderStage,
};
use crate::command::CommandList;
use crate::error::{PipelineError, PipelineResult};
use crate::pool::Pool;
use crate::resources::{Owned, ResourceDescriptor, ResourceTracker};
use std::path::Path;
use std::sync::Arc;

/// Shader code for one stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSource {
    source: Vec<u8>,
    entry_point: Option<String>,
}

impl ShaderSource {
    /// Raw UTF-8 WGSL bytes
    pub fn new(source: impl Into<Vec<u8>>) -> Self {
        Self {
            source: source.into(),
            entry_point: None,
        }
    }

    pub fn wgsl(source: &str) -> Self {
        Self::new(source.as_bytes())
    }

    /// Read a shader file
    pub fn from_path(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read(path).map_err(|e| {
            PipelineError::build(format!("failed to read shader {}: {}", path.display(), e))
        })?;
        log::debug!("Loaded shader {} ({} bytes)", path.display(), source.len());
        Ok(Self::new(source))
    }

    /// Override the configured entry point for this stage
    pub fn with_entry_point(mut self, entry_point: impl Into<String>) -> Self {
        self.entry_point = Some(entry_point.into());
        self
    }

    pub fn bytes(&self) -> &[u8] {
        &self.source
    }

    pub fn entry_point(&self) -> Option<&str> {
        self.entry_point.as_deref()
    }
}

/// Builds [`Pipeline`]s on one device
///
/// ```ignore
/// let pipeline = PipelineAssembler::new(device.clone(), pool.clone())
///     .with_config(PipelineConfig::default().with_label("quad"))
///     .assemble(&vertex, &fragment, vec![positions, indices, albedo])?;
/// ```
#[derive(Clone)]
pub struct PipelineAssembler {
    device: Arc<dyn GraphicsDevice>,
    pool: Arc<Pool<CommandList>>,
    config: PipelineConfig,
}

impl PipelineAssembler {
    pub fn new(device: Arc<dyn GraphicsDevice>, pool: Arc<Pool<CommandList>>) -> Self {
        Self {
            device,
            pool,
            config: PipelineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<Pool<CommandList>> {
        &self.pool
    }

    /// Classify `descriptors`, compile both stages and create the pipeline
    ///
    /// Descriptor errors are reported before any device object is created. On
    /// failure every object created so far is destroyed and every subscription
    /// cancelled.
    pub fn assemble(
        &self,
        vertex: &ShaderSource,
        fragment: &ShaderSource,
        descriptors: Vec<ResourceDescriptor>,
    ) -> PipelineResult<Pipeline> {
        let classified = layout::classify(descriptors)?;
        let label = self.config.label_or("pipeline").to_string();

        let framebuffer = self
            .config
            .framebuffer
            .unwrap_or_else(|| self.device.swapchain_framebuffer());
        let output = self
            .device
            .framebuffer_output(framebuffer)
            .map_err(|e| PipelineError::from_build("render target", e))?;
        let depth_stencil = resolve_depth_stencil(&self.config, &output)?;

        // Subscriptions are dropped before the objects they write to
        let mut tracker = ResourceTracker::new();
        let mut subscriptions = Vec::new();

        let mut vertex_layouts = Vec::with_capacity(classified.vertex_streams.len());
        for (stream, buffer_layout) in classified
            .vertex_streams
            .into_iter()
            .zip(classified.vertex_layouts.iter().cloned())
        {
            subscriptions.push(stream.subscription);
            let buffer = tracker.track(stream.buffer);
            vertex_layouts.push(VertexLayout::new(stream.slot, buffer, stream.elements, buffer_layout));
        }

        let index_stream = classified.index_stream;
        subscriptions.push(index_stream.subscription);
        let index = IndexBinding {
            buffer: tracker.track(index_stream.buffer),
            format: classified.index_format,
            status: index_stream.status,
        };

        let vertex_shader = self.create_shader(
            &mut tracker,
            vertex,
            ShaderStage::Vertex,
            &self.config.vertex_entry,
            &label,
        )?;
        let fragment_shader = self.create_shader(
            &mut tracker,
            fragment,
            ShaderStage::Fragment,
            &self.config.fragment_entry,
            &label,
        )?;

        let binding_sets = layout::build_binding_sets(
            &self.device,
            &mut tracker,
            &mut subscriptions,
            classified.sets,
            &label,
        )?;

        let rasterizer = self.config.rasterizer;
        let handle = self
            .device
            .create_render_pipeline(&RenderPipelineDescriptor {
                label: Some(label.clone()),
                vertex_shader,
                fragment_shader,
                vertex_layouts: classified.vertex_layouts,
                binding_set_layouts: binding_sets.iter().map(|s| s.layout()).collect(),
                primitive: PrimitiveState {
                    topology: self.config.topology,
                    front_face: rasterizer.front_face,
                    cull_mode: rasterizer.cull_mode,
                    polygon_mode: rasterizer.polygon_mode,
                    depth_clip: rasterizer.depth_clip,
                },
                blend: Some(self.config.blend),
                depth_stencil,
                output: output.clone(),
            })
            .map_err(|e| PipelineError::from_build("render pipeline", e))?;
        let handle = tracker.track(Owned::new(self.device.clone(), handle));

        log::info!(
            "Assembled pipeline '{}': {} vertex stream(s), {} binding set(s), {}x{} target",
            label,
            vertex_layouts.len(),
            binding_sets.len(),
            output.width,
            output.height
        );

        Ok(Pipeline::from_parts(PipelineParts {
            label,
            handle,
            framebuffer,
            color_targets: output.color_formats.len() as u32,
            depth_clear: output.depth_format.and(self.config.depth_clear),
            clear_color: self.config.clear_color,
            draw: self.config.draw,
            scissor_test: rasterizer.scissor_test,
            vertex_layouts,
            index,
            binding_sets,
            subscriptions,
            tracker,
        }))
    }

    fn create_shader(
        &self,
        tracker: &mut ResourceTracker,
        source: &ShaderSource,
        stage: ShaderStage,
        default_entry: &str,
        label: &str,
    ) -> PipelineResult<ShaderHandle> {
        let entry_point = source.entry_point().unwrap_or(default_entry);
        let handle = self
            .device
            .create_shader(&ShaderDescriptor {
                label: Some(format!("{} {:?} shader", label, stage)),
                stage,
                source: source.bytes().to_vec(),
                entry_point: entry_point.to_string(),
            })
            .map_err(|e| PipelineError::from_build(&format!("{:?} shader", stage), e))?;
        Ok(tracker.track(Owned::new(self.device.clone(), handle)))
    }
}

/// Depth state matching the target's attachments
///
/// A target with a depth attachment and no configured depth state gets a
/// pass-through state so the pipeline stays compatible with the pass.
fn resolve_depth_stencil(
    config: &PipelineConfig,
    output: &OutputDescription,
) -> PipelineResult<Option<DepthStencilState>> {
    match (config.depth_stencil, output.depth_format) {
        (Some(state), Some(format)) => Ok(Some(DepthStencilState { format, ..state })),
        (Some(_), None) => Err(PipelineError::build(
            "depth testing is configured but the render target has no depth attachment",
        )),
        (None, Some(format)) => Ok(Some(DepthStencilState {
            format,
            depth_write_enabled: false,
            depth_compare: CompareFunction::Always,
        })),
        (None, None) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{HeadlessConfig, HeadlessDevice, TextureFormat, VertexFormat};
    use crate::resources::{UploadBinder, VertexElement, VertexSemantic, VertexType};
    use crate::stream::ValueStream;
    use bytemuck::{Pod, Zeroable};

    const SHADER: &str = r#"
@vertex
fn vs_main(@location(0) position: vec3<f32>) -> @builtin(position) vec4<f32> {
    return vec4<f32>(position, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return vec4<f32>(1.0, 0.0, 0.0, 1.0);
}
"#;

    #[repr(C)]
    #[derive(Clone, Copy, Pod, Zeroable)]
    struct Position {
        position: [f32; 3],
    }

    impl VertexType for Position {
        const ELEMENTS: &'static [VertexElement] = &[VertexElement::new(
            "position",
            VertexSemantic::Position,
            VertexFormat::Float32x3,
        )];
    }

    fn setup(config: HeadlessConfig) -> (Arc<HeadlessDevice>, PipelineAssembler, UploadBinder) {
        let headless = Arc::new(HeadlessDevice::new(config));
        let device: Arc<dyn GraphicsDevice> = headless.clone();
        let pool = Arc::new(Pool::<CommandList>::for_command_lists(device.clone()));
        let binder = UploadBinder::new(device.clone(), pool.clone());
        (headless, PipelineAssembler::new(device, pool), binder)
    }

    fn descriptors(binder: &UploadBinder) -> Vec<ResourceDescriptor> {
        vec![
            binder
                .vertex_stream::<Position, Vec<Position>>(&ValueStream::new(), 3, 0)
                .unwrap(),
            binder.index_stream::<u16, Vec<u16>>(&ValueStream::new(), 3).unwrap(),
        ]
    }

    #[test]
    fn test_assemble_minimal() {
        let (headless, assembler, binder) = setup(HeadlessConfig::default());
        let source = ShaderSource::wgsl(SHADER);
        let pipeline = assembler.assemble(&source, &source, descriptors(&binder)).unwrap();

        let desc = headless.render_pipeline_desc(pipeline.handle()).unwrap();
        assert_eq!(desc.vertex_layouts.len(), 1);
        assert!(desc.binding_set_layouts.is_empty());
        assert!(desc.depth_stencil.is_none());
        assert_eq!(desc.output.color_formats, vec![TextureFormat::Bgra8UnormSrgb]);
    }

    #[test]
    fn test_bad_entry_point_is_build_error() {
        let (headless, assembler, binder) = setup(HeadlessConfig::default());
        let vertex = ShaderSource::wgsl(SHADER).with_entry_point("main");
        let fragment = ShaderSource::wgsl(SHADER);
        let result = assembler.assemble(&vertex, &fragment, descriptors(&binder));

        assert!(matches!(result, Err(PipelineError::Build(_))));
        assert_eq!(headless.live_objects(), 0);
    }

    #[test]
    fn test_invalid_wgsl_is_build_error() {
        let (_headless, assembler, binder) = setup(HeadlessConfig::default());
        let broken = ShaderSource::wgsl("fn vs_main( {");
        let result = assembler.assemble(&broken, &broken, descriptors(&binder));
        assert!(matches!(result, Err(PipelineError::Build(_))));
    }

    #[test]
    fn test_depth_target_gets_pass_through_state() {
        let (headless, assembler, binder) = setup(HeadlessConfig {
            depth_format: Some(TextureFormat::Depth32Float),
            ..Default::default()
        });
        let source = ShaderSource::wgsl(SHADER);
        let pipeline = assembler.assemble(&source, &source, descriptors(&binder)).unwrap();

        let depth = headless
            .render_pipeline_desc(pipeline.handle())
            .unwrap()
            .depth_stencil
            .unwrap();
        assert_eq!(depth.format, TextureFormat::Depth32Float);
        assert_eq!(depth.depth_compare, CompareFunction::Always);
        assert!(!depth.depth_write_enabled);
    }

    #[test]
    fn test_depth_state_without_depth_target() {
        let (_headless, assembler, binder) = setup(HeadlessConfig::default());
        let assembler = assembler.with_config(PipelineConfig::default().with_depth_stencil(
            DepthStencilState {
                format: TextureFormat::Depth32Float,
                depth_write_enabled: true,
                depth_compare: CompareFunction::Less,
            },
        ));
        let source = ShaderSource::wgsl(SHADER);
        let result = assembler.assemble(&source, &source, descriptors(&binder));
        assert!(matches!(result, Err(PipelineError::Build(_))));
    }

    #[test]
    fn test_shader_from_missing_path() {
        let result = ShaderSource::from_path("does/not/exist.wgsl");
        assert!(matches!(result, Err(PipelineError::Build(_))));
    }
}
