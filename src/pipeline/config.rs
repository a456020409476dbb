//! Pipeline configuration

use crate::backend::{
    BlendState, CullMode, DepthStencilState, FramebufferHandle, FrontFace, PolygonMode,
    PrimitiveTopology,
};

/// Cornflower blue
pub const DEFAULT_CLEAR_COLOR: [f32; 4] = [0.392, 0.584, 0.929, 1.0];

/// Arguments of the indexed draw issued each frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawParameters {
    /// Indices to draw; `None` draws as many as the index stream last uploaded
    pub index_count: Option<u32>,
    pub instance_count: u32,
    pub index_start: u32,
    /// Added to every index before fetching vertices
    pub vertex_offset: i32,
    pub instance_start: u32,
}

impl Default for DrawParameters {
    fn default() -> Self {
        Self {
            index_count: None,
            instance_count: 1,
            index_start: 0,
            vertex_offset: 0,
            instance_start: 0,
        }
    }
}

impl DrawParameters {
    pub fn with_index_count(mut self, count: u32) -> Self {
        self.index_count = Some(count);
        self
    }

    pub fn with_instances(mut self, start: u32, count: u32) -> Self {
        self.instance_start = start;
        self.instance_count = count;
        self
    }

    pub fn with_index_start(mut self, start: u32) -> Self {
        self.index_start = start;
        self
    }

    pub fn with_vertex_offset(mut self, offset: i32) -> Self {
        self.vertex_offset = offset;
        self
    }
}

/// Rasterizer state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterizerState {
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
    pub polygon_mode: PolygonMode,
    /// Clip primitives against the depth range
    pub depth_clip: bool,
    /// Restrict drawing to the scissor rectangle, reset to the full target each frame
    pub scissor_test: bool,
}

impl Default for RasterizerState {
    fn default() -> Self {
        Self {
            cull_mode: CullMode::Back,
            front_face: FrontFace::Cw,
            polygon_mode: PolygonMode::Fill,
            depth_clip: true,
            scissor_test: false,
        }
    }
}

/// Configuration for [`PipelineAssembler`](super::PipelineAssembler)
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Debug label for the pipeline and its device objects
    pub label: Option<String>,
    /// Render target; `None` renders to the swapchain
    pub framebuffer: Option<FramebufferHandle>,
    /// Color the target is cleared to every frame
    pub clear_color: [f32; 4],
    /// Depth clear value; only used when the target has a depth attachment
    pub depth_clear: Option<f32>,
    pub draw: DrawParameters,
    pub rasterizer: RasterizerState,
    pub blend: BlendState,
    /// Depth testing; `None` disables it
    pub depth_stencil: Option<DepthStencilState>,
    pub topology: PrimitiveTopology,
    /// Entry points used when a shader source does not name one
    pub vertex_entry: String,
    pub fragment_entry: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            label: None,
            framebuffer: None,
            clear_color: DEFAULT_CLEAR_COLOR,
            depth_clear: None,
            draw: DrawParameters::default(),
            rasterizer: RasterizerState::default(),
            blend: BlendState::single_override(),
            depth_stencil: None,
            topology: PrimitiveTopology::TriangleList,
            vertex_entry: "vs_main".to_string(),
            fragment_entry: "fs_main".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_framebuffer(mut self, framebuffer: FramebufferHandle) -> Self {
        self.framebuffer = Some(framebuffer);
        self
    }

    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    pub fn with_depth_clear(mut self, depth: f32) -> Self {
        self.depth_clear = Some(depth);
        self
    }

    pub fn with_draw_parameters(mut self, draw: DrawParameters) -> Self {
        self.draw = draw;
        self
    }

    pub fn with_rasterizer(mut self, rasterizer: RasterizerState) -> Self {
        self.rasterizer = rasterizer;
        self
    }

    pub fn with_blend(mut self, blend: BlendState) -> Self {
        self.blend = blend;
        self
    }

    pub fn with_depth_stencil(mut self, depth_stencil: DepthStencilState) -> Self {
        self.depth_stencil = Some(depth_stencil);
        self
    }

    pub fn with_topology(mut self, topology: PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    pub fn with_entry_points(mut self, vertex: impl Into<String>, fragment: impl Into<String>) -> Self {
        self.vertex_entry = vertex.into();
        self.fragment_entry = fragment.into();
        self
    }

    pub(crate) fn label_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.label.as_deref().unwrap_or(fallback)
    }
}
