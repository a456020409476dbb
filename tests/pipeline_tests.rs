//! Integration tests for pipeline assembly and rendering.
//!
//! Every test runs against each [`Backend`]; the wgpu cases are skipped when
//! no adapter is available.
//!
//! ```bash
//! cargo test --test pipeline_tests
//! ```

mod common;

use bytemuck::{Pod, Zeroable};
use rstest::rstest;

use common::{
    plain_shader, quad_vertices, textured_shader, tinted_shader, Backend, TestContext,
    TexturedVertex, QUAD_INDICES,
};
use reactive_pipelines::backend::{BindingKind, ShaderStages, VertexFormat};
use reactive_pipelines::{
    Command, DrawParameters, FrameLoop, PipelineAssembler, PipelineConfig, PipelineError,
    ResourceDescriptor, ShaderSource, TextureMode, ValueStream, VertexElement, VertexSemantic,
    VertexType,
};

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct ColorVertex {
    color: [f32; 4],
}

impl VertexType for ColorVertex {
    const ELEMENTS: &'static [VertexElement] = &[VertexElement::new(
        "color",
        VertexSemantic::Color,
        VertexFormat::Float32x4,
    )];
}

fn assembler(ctx: &TestContext) -> PipelineAssembler {
    PipelineAssembler::new(ctx.device.clone(), ctx.pool.clone())
}

// ============================================================================
// Assembly
// ============================================================================

/// A textured quad renders as exactly one clear followed by one indexed draw
/// covering the six uploaded indices.
#[rstest]
#[case::headless(Backend::Headless)]
#[case::wgpu(Backend::Wgpu)]
fn test_textured_quad_end_to_end(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let vertices = ValueStream::new();
    let indices = ValueStream::new();
    let texture = ctx.checker_texture();
    let descriptors = vec![
        ctx.binder
            .vertex_stream::<TexturedVertex, Vec<TexturedVertex>>(&vertices, 4, 0)
            .unwrap(),
        ctx.binder.index_stream::<u16, Vec<u16>>(&indices, 6).unwrap(),
        ctx.binder
            .texture_binding(texture, TextureMode::ReadOnly, "albedo", ShaderStages::FRAGMENT, 0)
            .unwrap(),
    ];
    let pipeline = assembler(&ctx)
        .with_config(PipelineConfig::default().with_label("quad"))
        .assemble(&textured_shader(), &textured_shader(), descriptors)
        .unwrap();

    vertices.emit(quad_vertices());
    indices.emit(QUAD_INDICES.to_vec());

    let mut list = ctx.pool.take().unwrap();
    pipeline.render(ctx.device.as_ref(), &mut list, 16.0).unwrap();

    let commands = list.commands();
    let clears: Vec<usize> = positions(commands, |c| matches!(c, Command::ClearColorTarget { .. }));
    let draws: Vec<usize> = positions(commands, |c| matches!(c, Command::DrawIndexed { .. }));
    assert_eq!(clears.len(), 1);
    assert_eq!(draws.len(), 1);
    assert!(clears[0] < draws[0]);
    assert!(matches!(
        commands[draws[0]],
        Command::DrawIndexed { index_count: 6, instance_count: 1, index_start: 0, vertex_offset: 0, instance_start: 0 }
    ));
    assert!(commands.contains(&Command::SetBindingSet {
        slot: 0,
        set: pipeline.binding_sets()[0].binding_set(),
    }));

    if let Some(headless) = &ctx.headless {
        // two uploads, then the frame
        assert_eq!(headless.submission_count(), 3);
    }
}

fn positions(commands: &[Command], predicate: impl Fn(&Command) -> bool) -> Vec<usize> {
    commands
        .iter()
        .enumerate()
        .filter(|(_, c)| predicate(c))
        .map(|(i, _)| i)
        .collect()
}

/// Vertex streams bind in ascending slot order regardless of input order.
#[rstest]
#[case::headless(Backend::Headless)]
#[case::wgpu(Backend::Wgpu)]
fn test_vertex_layouts_in_slot_order(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let shader = ShaderSource::wgsl(
        r#"
@vertex
fn vs_main(
    @location(0) position: vec3<f32>,
    @location(1) uv: vec2<f32>,
    @location(2) color: vec4<f32>,
) -> @builtin(position) vec4<f32> {
    return vec4<f32>(position + vec3<f32>(uv, 0.0) * 0.0 + color.xyz * 0.0, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return vec4<f32>(1.0);
}
"#,
    );
    let descriptors = vec![
        ctx.binder
            .vertex_stream::<ColorVertex, Vec<ColorVertex>>(&ValueStream::new(), 4, 1)
            .unwrap(),
        ctx.binder.index_stream::<u32, Vec<u32>>(&ValueStream::new(), 6).unwrap(),
        ctx.binder
            .vertex_stream::<TexturedVertex, Vec<TexturedVertex>>(&ValueStream::new(), 4, 0)
            .unwrap(),
    ];
    let pipeline = assembler(&ctx).assemble(&shader, &shader, descriptors).unwrap();

    let slots: Vec<u32> = pipeline.vertex_layouts().iter().map(|v| v.slot()).collect();
    assert_eq!(slots, vec![0, 1]);
    assert_eq!(pipeline.vertex_layouts()[1].layout().attributes[0].location, 2);
}

/// Without vertex streams assembly fails before any device object is created.
#[rstest]
#[case::headless(Backend::Headless)]
#[case::wgpu(Backend::Wgpu)]
fn test_zero_vertex_streams(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let descriptors = vec![ctx.binder.index_stream::<u16, Vec<u16>>(&ValueStream::new(), 6).unwrap()];
    let created = ctx.headless.as_ref().map(|h| h.creation_count());

    let result = assembler(&ctx).assemble(&plain_shader(), &plain_shader(), descriptors);

    assert!(matches!(result, Err(PipelineError::Configuration(_))));
    assert_eq!(ctx.headless.as_ref().map(|h| h.creation_count()), created);
}

/// A missing index stream is a configuration error too.
#[rstest]
#[case::headless(Backend::Headless)]
#[case::wgpu(Backend::Wgpu)]
fn test_missing_index_stream(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let descriptors = vec![ctx
        .binder
        .vertex_stream::<TexturedVertex, Vec<TexturedVertex>>(&ValueStream::new(), 4, 0)
        .unwrap()];
    let result = assembler(&ctx).assemble(&plain_shader(), &plain_shader(), descriptors);
    assert!(matches!(result, Err(PipelineError::Configuration(_))));
}

/// Index element types other than u16 and u32 are rejected.
#[rstest]
#[case::headless(Backend::Headless)]
#[case::wgpu(Backend::Wgpu)]
fn test_unsupported_index_type(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let vertices = || {
        ctx.binder
            .vertex_stream::<TexturedVertex, Vec<TexturedVertex>>(&ValueStream::new(), 4, 0)
            .unwrap()
    };
    let signed = ctx.binder.index_stream::<i16, Vec<i16>>(&ValueStream::new(), 6).unwrap();
    let bytes = ctx.binder.index_stream::<u8, Vec<u8>>(&ValueStream::new(), 6).unwrap();

    for index in [signed, bytes] {
        let result = assembler(&ctx).assemble(&plain_shader(), &plain_shader(), vec![vertices(), index]);
        assert!(matches!(result, Err(PipelineError::DataFormat(_))));
    }
}

/// Resources sharing a set keep their input order in the layout.
#[rstest]
#[case::headless_uniform_first(Backend::Headless, false)]
#[case::headless_texture_first(Backend::Headless, true)]
#[case::wgpu_uniform_first(Backend::Wgpu, false)]
#[case::wgpu_texture_first(Backend::Wgpu, true)]
fn test_same_set_keeps_input_order(#[case] backend: Backend, #[case] reversed: bool) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let tint = ctx
        .binder
        .uniform_binding::<[f32; 4]>(
            &ValueStream::with_value([1.0, 1.0, 1.0, 1.0]),
            "A",
            ShaderStages::FRAGMENT,
            0,
        )
        .unwrap();
    let albedo = ctx
        .binder
        .texture_binding(ctx.checker_texture(), TextureMode::ReadOnly, "B", ShaderStages::FRAGMENT, 0)
        .unwrap();
    let (shared, shader) = if reversed {
        (vec![albedo, tint], tinted_shader(1, 0))
    } else {
        (vec![tint, albedo], tinted_shader(0, 1))
    };

    let mut descriptors: Vec<ResourceDescriptor> = vec![
        ctx.binder
            .vertex_stream::<TexturedVertex, Vec<TexturedVertex>>(&ValueStream::new(), 4, 0)
            .unwrap(),
        ctx.binder.index_stream::<u16, Vec<u16>>(&ValueStream::new(), 6).unwrap(),
    ];
    descriptors.extend(shared);
    let pipeline = assembler(&ctx).assemble(&shader, &shader, descriptors).unwrap();

    let entries = pipeline.binding_sets()[0].entries();
    let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    let kinds: Vec<BindingKind> = entries.iter().map(|e| e.kind).collect();
    if reversed {
        assert_eq!(names, vec!["B", "A"]);
        assert_eq!(kinds, vec![BindingKind::SampledTexture, BindingKind::UniformBuffer]);
    } else {
        assert_eq!(names, vec!["A", "B"]);
        assert_eq!(kinds, vec![BindingKind::UniformBuffer, BindingKind::SampledTexture]);
    }
}

/// A shader that does not compile is a build error and leaves nothing behind.
#[rstest]
#[case::headless(Backend::Headless)]
#[case::wgpu(Backend::Wgpu)]
fn test_shader_failure_is_build_error(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let descriptors = vec![
        ctx.binder
            .vertex_stream::<TexturedVertex, Vec<TexturedVertex>>(&ValueStream::new(), 4, 0)
            .unwrap(),
        ctx.binder.index_stream::<u16, Vec<u16>>(&ValueStream::new(), 6).unwrap(),
    ];
    let broken = ShaderSource::wgsl("@vertex fn vs_main( -> {}");
    let result = assembler(&ctx).assemble(&broken, &plain_shader(), descriptors);

    assert!(matches!(result, Err(PipelineError::Build(_))));
    if let Some(headless) = &ctx.headless {
        assert_eq!(headless.live_objects(), 0);
    }
}

// ============================================================================
// Rendering
// ============================================================================

/// Configured draw parameters override the uploaded index count.
#[rstest]
#[case::headless(Backend::Headless)]
#[case::wgpu(Backend::Wgpu)]
fn test_configured_draw_parameters(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let vertices = ValueStream::with_value(quad_vertices());
    let indices = ValueStream::with_value(QUAD_INDICES.to_vec());
    let descriptors = vec![
        ctx.binder
            .vertex_stream::<TexturedVertex, Vec<TexturedVertex>>(&vertices, 4, 0)
            .unwrap(),
        ctx.binder.index_stream::<u16, Vec<u16>>(&indices, 6).unwrap(),
    ];
    let config = PipelineConfig::default()
        .with_draw_parameters(DrawParameters::default().with_index_count(3).with_index_start(3));
    let pipeline = assembler(&ctx)
        .with_config(config)
        .assemble(&plain_shader(), &plain_shader(), descriptors)
        .unwrap();

    let mut list = ctx.pool.take().unwrap();
    pipeline.render(ctx.device.as_ref(), &mut list, 0.0).unwrap();
    assert!(list.commands().iter().any(|c| matches!(
        c,
        Command::DrawIndexed { index_count: 3, index_start: 3, .. }
    )));
}

/// A frame loop renders registered pipelines and presents once per frame.
#[rstest]
#[case::headless(Backend::Headless)]
#[case::wgpu(Backend::Wgpu)]
fn test_frame_loop_renders_pipeline(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let descriptors = vec![
        ctx.binder
            .vertex_stream::<TexturedVertex, Vec<TexturedVertex>>(
                &ValueStream::with_value(quad_vertices()),
                4,
                0,
            )
            .unwrap(),
        ctx.binder
            .index_stream::<u16, Vec<u16>>(&ValueStream::with_value(QUAD_INDICES.to_vec()), 6)
            .unwrap(),
    ];
    let pipeline = assembler(&ctx)
        .assemble(&plain_shader(), &plain_shader(), descriptors)
        .unwrap();

    let mut frames = FrameLoop::new(ctx.device.clone(), ctx.pool.clone());
    frames.add_pipeline(pipeline);
    for _ in 0..3 {
        frames.frame().unwrap();
    }

    assert_eq!(frames.frame_count(), 3);
    if let Some(headless) = &ctx.headless {
        assert_eq!(headless.presented_frames(), 3);
    }
}

/// Dropping a pipeline cancels its uploads and destroys its objects.
#[test]
fn test_pipeline_drop_releases_resources() {
    let ctx = TestContext::new(Backend::Headless).unwrap();
    let headless = ctx.headless.clone().unwrap();

    let vertices = ValueStream::new();
    let descriptors = vec![
        ctx.binder
            .vertex_stream::<TexturedVertex, Vec<TexturedVertex>>(&vertices, 4, 0)
            .unwrap(),
        ctx.binder.index_stream::<u16, Vec<u16>>(&ValueStream::new(), 6).unwrap(),
        ctx.binder
            .uniform_binding::<[f32; 4]>(&ValueStream::new(), "tint", ShaderStages::FRAGMENT, 1)
            .unwrap(),
    ];
    let pipeline = assembler(&ctx)
        .assemble(&plain_shader(), &plain_shader(), descriptors)
        .unwrap();
    assert!(headless.live_objects() > 0);
    assert_eq!(vertices.subscriber_count(), 1);

    drop(pipeline);
    assert_eq!(vertices.subscriber_count(), 0);
    assert_eq!(headless.live_objects(), 0);

    let submissions = headless.submission_count();
    vertices.emit(quad_vertices());
    assert_eq!(headless.submission_count(), submissions);
}
