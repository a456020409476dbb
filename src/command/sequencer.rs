//! Fluent command sequencing

use super::CommandList;
use crate::backend::{
    BindingSetHandle, BufferHandle, ComputePipelineHandle, FramebufferHandle, IndexFormat,
    RenderPipelineHandle, ScissorRect, TextureHandle, Viewport,
};

/// Chained recording over a [`CommandList`]
///
/// Created by [`CommandList::begin_fluent`], which begins recording. Each call
/// records immediately; [`Sequencer::end`] stops recording and hands the list back
/// for submission.
///
/// ```ignore
/// let list = list
///     .begin_fluent()
///     .set_framebuffer(framebuffer)
///     .clear_color_target(0, [0.0, 0.0, 0.0, 1.0])
///     .end();
/// device.submit(list)?;
/// ```
#[must_use = "call end() to finish recording"]
pub struct Sequencer<'a> {
    list: &'a mut CommandList,
}

impl<'a> Sequencer<'a> {
    pub(super) fn new(list: &'a mut CommandList) -> Self {
        list.begin();
        Self { list }
    }

    /// Finish recording
    pub fn end(self) -> &'a mut CommandList {
        self.list.end();
        self.list
    }

    pub fn set_framebuffer(self, framebuffer: FramebufferHandle) -> Self {
        self.list.set_framebuffer(framebuffer);
        self
    }

    pub fn clear_color_target(self, index: u32, color: [f32; 4]) -> Self {
        self.list.clear_color_target(index, color);
        self
    }

    pub fn clear_depth_stencil(self, depth: f32, stencil: u8) -> Self {
        self.list.clear_depth_stencil(depth, stencil);
        self
    }

    pub fn set_pipeline(self, pipeline: RenderPipelineHandle) -> Self {
        self.list.set_pipeline(pipeline);
        self
    }

    pub fn set_vertex_buffer(self, slot: u32, buffer: BufferHandle) -> Self {
        self.list.set_vertex_buffer(slot, buffer, 0);
        self
    }

    /// Bind `(slot, buffer)` pairs in iteration order
    pub fn set_vertex_buffers<I>(self, buffers: I) -> Self
    where
        I: IntoIterator<Item = (u32, BufferHandle)>,
    {
        for (slot, buffer) in buffers {
            self.list.set_vertex_buffer(slot, buffer, 0);
        }
        self
    }

    pub fn set_index_buffer(self, buffer: BufferHandle, format: IndexFormat) -> Self {
        self.list.set_index_buffer(buffer, format, 0);
        self
    }

    pub fn set_binding_set(self, slot: u32, set: BindingSetHandle) -> Self {
        self.list.set_binding_set(slot, set);
        self
    }

    /// Bind `(slot, set)` pairs in iteration order
    pub fn set_binding_sets<I>(self, sets: I) -> Self
    where
        I: IntoIterator<Item = (u32, BindingSetHandle)>,
    {
        for (slot, set) in sets {
            self.list.set_binding_set(slot, set);
        }
        self
    }

    pub fn set_viewport(self, index: u32, viewport: Viewport) -> Self {
        self.list.set_viewport(index, viewport);
        self
    }

    pub fn set_full_viewports(self) -> Self {
        self.list.set_full_viewports();
        self
    }

    pub fn set_scissor_rect(self, index: u32, rect: ScissorRect) -> Self {
        self.list.set_scissor_rect(index, rect);
        self
    }

    pub fn set_full_scissor_rects(self) -> Self {
        self.list.set_full_scissor_rects();
        self
    }

    pub fn draw(self, vertex_count: u32, instance_count: u32, vertex_start: u32, instance_start: u32) -> Self {
        self.list.draw(vertex_count, instance_count, vertex_start, instance_start);
        self
    }

    pub fn draw_indexed(
        self,
        index_count: u32,
        instance_count: u32,
        index_start: u32,
        vertex_offset: i32,
        instance_start: u32,
    ) -> Self {
        self.list
            .draw_indexed(index_count, instance_count, index_start, vertex_offset, instance_start);
        self
    }

    pub fn draw_indirect(self, buffer: BufferHandle, offset: u64, draw_count: u32, stride: u32) -> Self {
        self.list.draw_indirect(buffer, offset, draw_count, stride);
        self
    }

    pub fn draw_indexed_indirect(self, buffer: BufferHandle, offset: u64, draw_count: u32, stride: u32) -> Self {
        self.list.draw_indexed_indirect(buffer, offset, draw_count, stride);
        self
    }

    pub fn set_compute_pipeline(self, pipeline: ComputePipelineHandle) -> Self {
        self.list.set_compute_pipeline(pipeline);
        self
    }

    pub fn set_compute_binding_set(self, slot: u32, set: BindingSetHandle) -> Self {
        self.list.set_compute_binding_set(slot, set);
        self
    }

    pub fn dispatch(self, x: u32, y: u32, z: u32) -> Self {
        self.list.dispatch(x, y, z);
        self
    }

    pub fn dispatch_indirect(self, buffer: BufferHandle, offset: u64) -> Self {
        self.list.dispatch_indirect(buffer, offset);
        self
    }

    pub fn update_buffer(self, buffer: BufferHandle, offset: u64, data: &[u8]) -> Self {
        self.list.update_buffer(buffer, offset, data);
        self
    }

    pub fn copy_buffer(
        self,
        src: BufferHandle,
        src_offset: u64,
        dst: BufferHandle,
        dst_offset: u64,
        size: u64,
    ) -> Self {
        self.list.copy_buffer(src, src_offset, dst, dst_offset, size);
        self
    }

    pub fn copy_texture(self, src: TextureHandle, dst: TextureHandle) -> Self {
        self.list.copy_texture(src, dst);
        self
    }

    pub fn generate_mipmaps(self, texture: TextureHandle) -> Self {
        self.list.generate_mipmaps(texture);
        self
    }

    pub fn push_debug_group(self, label: &str) -> Self {
        self.list.push_debug_group(label);
        self
    }

    pub fn pop_debug_group(self) -> Self {
        self.list.pop_debug_group();
        self
    }

    pub fn insert_debug_marker(self, label: &str) -> Self {
        self.list.insert_debug_marker(label);
        self
    }
}
