//! Assembled pipelines and per-frame draw recording

use super::config::DrawParameters;
use super::layout::{BindingSetLayout, VertexLayout};
use crate::backend::{BufferHandle, FramebufferHandle, GraphicsDevice, IndexFormat, RenderPipelineHandle};
use crate::command::CommandList;
use crate::error::PipelineResult;
use crate::resources::{ResourceTracker, UploadStatus};
use crate::stream::{Subscription, ValueStream};
use parking_lot::RwLock;
use std::sync::Arc;

/// Draw state that may change after assembly
#[derive(Debug, Clone, Copy)]
struct DynamicState {
    clear_color: [f32; 4],
    draw: DrawParameters,
}

pub(crate) struct IndexBinding {
    pub buffer: BufferHandle,
    pub format: IndexFormat,
    pub status: Arc<UploadStatus>,
}

pub(crate) struct PipelineParts {
    pub label: String,
    pub handle: RenderPipelineHandle,
    pub framebuffer: FramebufferHandle,
    pub color_targets: u32,
    pub depth_clear: Option<f32>,
    pub clear_color: [f32; 4],
    pub draw: DrawParameters,
    pub scissor_test: bool,
    pub vertex_layouts: Vec<VertexLayout>,
    pub index: IndexBinding,
    pub binding_sets: Vec<BindingSetLayout>,
    pub subscriptions: Vec<Subscription>,
    pub tracker: ResourceTracker,
}

/// A render pipeline together with every resource it draws with
///
/// Owns the upload subscriptions and device objects of its descriptors.
/// Dropping it cancels the subscriptions, then destroys the objects newest
/// first.
pub struct Pipeline {
    label: String,
    handle: RenderPipelineHandle,
    framebuffer: FramebufferHandle,
    color_targets: u32,
    depth_clear: Option<f32>,
    scissor_test: bool,
    dynamic: Arc<RwLock<DynamicState>>,
    vertex_layouts: Vec<VertexLayout>,
    index: IndexBinding,
    binding_sets: Vec<BindingSetLayout>,
    subscriptions: Vec<Subscription>,
    tracker: ResourceTracker,
}

impl Pipeline {
    pub(crate) fn from_parts(parts: PipelineParts) -> Self {
        Self {
            label: parts.label,
            handle: parts.handle,
            framebuffer: parts.framebuffer,
            color_targets: parts.color_targets,
            depth_clear: parts.depth_clear,
            scissor_test: parts.scissor_test,
            dynamic: Arc::new(RwLock::new(DynamicState {
                clear_color: parts.clear_color,
                draw: parts.draw,
            })),
            vertex_layouts: parts.vertex_layouts,
            index: parts.index,
            binding_sets: parts.binding_sets,
            subscriptions: parts.subscriptions,
            tracker: parts.tracker,
        }
    }

    /// Record one frame into `list` and submit it
    ///
    /// Clears the target, binds vertex buffers in slot order, the index buffer
    /// and binding sets in set order, then issues one indexed draw. Without a
    /// configured index count the draw covers the last uploaded index batch.
    pub fn render(
        &self,
        device: &dyn GraphicsDevice,
        list: &mut CommandList,
        elapsed_ms: f64,
    ) -> PipelineResult<()> {
        let DynamicState { clear_color, draw } = *self.dynamic.read();
        let index_count = draw
            .index_count
            .unwrap_or_else(|| self.index.status.element_count());
        log::trace!(
            "Rendering '{}' at {:.1} ms: {} indices",
            self.label,
            elapsed_ms,
            index_count
        );

        let mut seq = list.begin_fluent().set_framebuffer(self.framebuffer);
        for target in 0..self.color_targets {
            seq = seq.clear_color_target(target, clear_color);
        }
        if let Some(depth) = self.depth_clear {
            seq = seq.clear_depth_stencil(depth, 0);
        }
        seq = seq
            .set_pipeline(self.handle)
            .set_vertex_buffers(
                self.vertex_layouts
                    .iter()
                    .enumerate()
                    .map(|(position, v)| (position as u32, v.buffer())),
            )
            .set_index_buffer(self.index.buffer, self.index.format)
            .set_binding_sets(self.binding_sets.iter().map(|s| (s.set(), s.binding_set())));
        if self.scissor_test {
            seq = seq.set_full_scissor_rects();
        }
        let list = seq
            .draw_indexed(
                index_count,
                draw.instance_count,
                draw.index_start,
                draw.vertex_offset,
                draw.instance_start,
            )
            .end();

        device.submit(list)?;
        Ok(())
    }

    /// Take draw parameters from `stream` from now on
    pub fn follow_draw_parameters(&mut self, stream: &ValueStream<DrawParameters>) {
        let dynamic = self.dynamic.clone();
        self.subscriptions
            .push(stream.subscribe_fn(move |draw| dynamic.write().draw = *draw));
    }

    /// Take the clear color from `stream` from now on
    pub fn follow_clear_color(&mut self, stream: &ValueStream<[f32; 4]>) {
        let dynamic = self.dynamic.clone();
        self.subscriptions
            .push(stream.subscribe_fn(move |color| dynamic.write().clear_color = *color));
    }

    pub fn set_draw_parameters(&self, draw: DrawParameters) {
        self.dynamic.write().draw = draw;
    }

    pub fn set_clear_color(&self, color: [f32; 4]) {
        self.dynamic.write().clear_color = color;
    }

    pub fn draw_parameters(&self) -> DrawParameters {
        self.dynamic.read().draw
    }

    pub fn clear_color(&self) -> [f32; 4] {
        self.dynamic.read().clear_color
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn handle(&self) -> RenderPipelineHandle {
        self.handle
    }

    pub fn framebuffer(&self) -> FramebufferHandle {
        self.framebuffer
    }

    /// Vertex buffers in binding order
    pub fn vertex_layouts(&self) -> &[VertexLayout] {
        &self.vertex_layouts
    }

    pub fn index_buffer(&self) -> BufferHandle {
        self.index.buffer
    }

    pub fn index_format(&self) -> IndexFormat {
        self.index.format
    }

    /// Upload progress of the index stream
    pub fn index_status(&self) -> &Arc<UploadStatus> {
        &self.index.status
    }

    /// Binding sets in set order
    pub fn binding_sets(&self) -> &[BindingSetLayout] {
        &self.binding_sets
    }

    /// Device objects owned by the pipeline
    pub fn owned_objects(&self) -> usize {
        self.tracker.len()
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        log::debug!(
            "Dropping pipeline '{}' ({} subscriptions, {} objects)",
            self.label,
            self.subscriptions.len(),
            self.tracker.len()
        );
        self.subscriptions.clear();
        self.tracker.release_all();
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("label", &self.label)
            .field("handle", &self.handle)
            .field("framebuffer", &self.framebuffer)
            .field("vertex_layouts", &self.vertex_layouts.len())
            .field("binding_sets", &self.binding_sets.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{HeadlessConfig, HeadlessDevice, ResourceHandle, TextureFormat, VertexFormat};
    use crate::command::Command;
    use crate::pipeline::{PipelineAssembler, PipelineConfig, ShaderSource};
    use crate::pool::Pool;
    use crate::resources::{UploadBinder, VertexElement, VertexSemantic, VertexType};
    use bytemuck::{Pod, Zeroable};

    const SHADER: &str = r#"
@vertex
fn vs_main(@location(0) position: vec2<f32>) -> @builtin(position) vec4<f32> {
    return vec4<f32>(position, 0.0, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return vec4<f32>(1.0);
}
"#;

    #[repr(C)]
    #[derive(Clone, Copy, Pod, Zeroable)]
    struct Point {
        position: [f32; 2],
    }

    impl VertexType for Point {
        const ELEMENTS: &'static [VertexElement] = &[VertexElement::new(
            "position",
            VertexSemantic::Position,
            VertexFormat::Float32x2,
        )];
    }

    struct Fixture {
        headless: Arc<HeadlessDevice>,
        pool: Arc<Pool<CommandList>>,
        points: ValueStream<Vec<Point>>,
        indices: ValueStream<Vec<u16>>,
        pipeline: Pipeline,
    }

    fn fixture(headless_config: HeadlessConfig, config: PipelineConfig) -> Fixture {
        let headless = Arc::new(HeadlessDevice::new(headless_config));
        let device: Arc<dyn GraphicsDevice> = headless.clone();
        let pool = Arc::new(Pool::<CommandList>::for_command_lists(device.clone()));
        let binder = UploadBinder::new(device.clone(), pool.clone());
        let points = ValueStream::new();
        let indices = ValueStream::new();
        let descriptors = vec![
            binder.vertex_stream::<Point, Vec<Point>>(&points, 8, 0).unwrap(),
            binder.index_stream::<u16, Vec<u16>>(&indices, 12).unwrap(),
        ];
        let source = ShaderSource::wgsl(SHADER);
        let pipeline = PipelineAssembler::new(device, pool.clone())
            .with_config(config)
            .assemble(&source, &source, descriptors)
            .unwrap();
        Fixture { headless, pool, points, indices, pipeline }
    }

    fn render(f: &Fixture) -> Vec<Command> {
        f.headless.clear_submissions();
        let mut list = f.pool.take().unwrap();
        f.pipeline.render(f.headless.as_ref(), &mut list, 0.0).unwrap();
        f.headless.submissions().pop().unwrap()
    }

    fn draw_count(commands: &[Command]) -> u32 {
        commands
            .iter()
            .find_map(|c| match c {
                Command::DrawIndexed { index_count, .. } => Some(*index_count),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn test_render_order() {
        let f = fixture(HeadlessConfig::default(), PipelineConfig::default());
        let commands = render(&f);

        let kinds: Vec<&str> = commands
            .iter()
            .map(|c| match c {
                Command::SetFramebuffer(_) => "framebuffer",
                Command::ClearColorTarget { .. } => "clear",
                Command::SetPipeline(_) => "pipeline",
                Command::SetVertexBuffer { .. } => "vertex",
                Command::SetIndexBuffer { .. } => "index",
                Command::DrawIndexed { .. } => "draw",
                _ => "other",
            })
            .collect();
        assert_eq!(kinds, vec!["framebuffer", "clear", "pipeline", "vertex", "index", "draw"]);
    }

    #[test]
    fn test_sparse_slots_bind_by_position() {
        let headless = Arc::new(HeadlessDevice::default());
        let device: Arc<dyn GraphicsDevice> = headless.clone();
        let pool = Arc::new(Pool::<CommandList>::for_command_lists(device.clone()));
        let binder = UploadBinder::new(device.clone(), pool.clone());
        let shader = ShaderSource::wgsl(
            r#"
@vertex
fn vs_main(@location(0) a: vec2<f32>, @location(1) b: vec2<f32>) -> @builtin(position) vec4<f32> {
    return vec4<f32>(a + b, 0.0, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return vec4<f32>(1.0);
}
"#,
        );
        let descriptors = vec![
            binder.vertex_stream::<Point, Vec<Point>>(&ValueStream::new(), 4, 2).unwrap(),
            binder.vertex_stream::<Point, Vec<Point>>(&ValueStream::new(), 4, 0).unwrap(),
            binder.index_stream::<u16, Vec<u16>>(&ValueStream::new(), 6).unwrap(),
        ];
        let pipeline = PipelineAssembler::new(device, pool.clone())
            .assemble(&shader, &shader, descriptors)
            .unwrap();

        let mut list = pool.take().unwrap();
        pipeline.render(headless.as_ref(), &mut list, 0.0).unwrap();
        let bound: Vec<(u32, BufferHandle)> = headless
            .submissions()
            .pop()
            .unwrap()
            .iter()
            .filter_map(|c| match c {
                Command::SetVertexBuffer { slot, buffer, .. } => Some((*slot, *buffer)),
                _ => None,
            })
            .collect();
        let expected: Vec<(u32, BufferHandle)> = pipeline
            .vertex_layouts()
            .iter()
            .enumerate()
            .map(|(position, v)| (position as u32, v.buffer()))
            .collect();
        assert_eq!(pipeline.vertex_layouts()[1].slot(), 2);
        assert_eq!(bound, expected);
    }

    #[test]
    fn test_index_count_follows_uploads() {
        let f = fixture(HeadlessConfig::default(), PipelineConfig::default());
        f.points.emit(vec![Point { position: [0.0, 0.0] }; 4]);
        f.indices.emit(vec![0, 1, 2, 2, 3, 0]);
        assert_eq!(draw_count(&render(&f)), 6);

        f.indices.emit(vec![0, 1, 2]);
        assert_eq!(draw_count(&render(&f)), 3);
    }

    #[test]
    fn test_dynamic_draw_parameters() {
        let mut f = fixture(HeadlessConfig::default(), PipelineConfig::default());
        let draw = ValueStream::new();
        f.pipeline.follow_draw_parameters(&draw);
        draw.emit(DrawParameters::default().with_index_count(9).with_instances(2, 5));

        let commands = render(&f);
        assert!(commands.iter().any(|c| matches!(
            c,
            Command::DrawIndexed { index_count: 9, instance_count: 5, instance_start: 2, .. }
        )));
    }

    #[test]
    fn test_dynamic_clear_color() {
        let mut f = fixture(HeadlessConfig::default(), PipelineConfig::default());
        let color = ValueStream::with_value([1.0, 0.0, 0.0, 1.0]);
        f.pipeline.follow_clear_color(&color);
        assert_eq!(f.pipeline.clear_color(), [1.0, 0.0, 0.0, 1.0]);

        let commands = render(&f);
        assert!(commands.iter().any(|c| matches!(
            c,
            Command::ClearColorTarget { color, .. } if *color == [1.0, 0.0, 0.0, 1.0]
        )));
    }

    #[test]
    fn test_depth_clear_only_with_depth_target() {
        let config = PipelineConfig::default().with_depth_clear(1.0);
        let without = fixture(HeadlessConfig::default(), config.clone());
        assert!(!render(&without)
            .iter()
            .any(|c| matches!(c, Command::ClearDepthStencil { .. })));

        let with = fixture(
            HeadlessConfig {
                depth_format: Some(TextureFormat::Depth32Float),
                ..Default::default()
            },
            config,
        );
        assert!(render(&with)
            .iter()
            .any(|c| matches!(c, Command::ClearDepthStencil { depth, .. } if *depth == 1.0)));
    }

    #[test]
    fn test_drop_releases_everything() {
        let f = fixture(HeadlessConfig::default(), PipelineConfig::default());
        let pipeline_handle = f.pipeline.handle();
        assert_eq!(f.points.subscriber_count(), 1);

        let Fixture { headless, points, pipeline, .. } = f;
        drop(pipeline);
        assert_eq!(points.subscriber_count(), 0);
        assert_eq!(headless.live_objects(), 0);
        // the pipeline object goes first
        assert_eq!(
            headless.destroyed().first(),
            Some(&ResourceHandle::RenderPipeline(pipeline_handle))
        );
    }
}
