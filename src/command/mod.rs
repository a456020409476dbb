//! Command recording
//!
//! A [`CommandList`] records [`Command`]s between `begin` and `end`. Devices replay
//! the recorded commands in order when the list is submitted. The fluent
//! [`Sequencer`] wraps the same recording calls for chaining.

mod sequencer;

pub use sequencer::Sequencer;

use crate::backend::{
    BackendError, BackendResult, BindingSetHandle, BufferHandle, ComputePipelineHandle,
    FramebufferHandle, IndexFormat, RenderPipelineHandle, ScissorRect, TextureHandle, Viewport,
};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_LIST_ID: AtomicU64 = AtomicU64::new(1);

/// A single recorded command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetFramebuffer(FramebufferHandle),
    ClearColorTarget { index: u32, color: [f32; 4] },
    ClearDepthStencil { depth: f32, stencil: u8 },
    SetPipeline(RenderPipelineHandle),
    SetVertexBuffer { slot: u32, buffer: BufferHandle, offset: u64 },
    SetIndexBuffer { buffer: BufferHandle, format: IndexFormat, offset: u64 },
    SetBindingSet { slot: u32, set: BindingSetHandle },
    SetViewport { index: u32, viewport: Viewport },
    SetFullViewports,
    SetScissorRect { index: u32, rect: ScissorRect },
    SetFullScissorRects,
    Draw { vertex_count: u32, instance_count: u32, vertex_start: u32, instance_start: u32 },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        index_start: u32,
        vertex_offset: i32,
        instance_start: u32,
    },
    DrawIndirect { buffer: BufferHandle, offset: u64, draw_count: u32, stride: u32 },
    DrawIndexedIndirect { buffer: BufferHandle, offset: u64, draw_count: u32, stride: u32 },
    SetComputePipeline(ComputePipelineHandle),
    SetComputeBindingSet { slot: u32, set: BindingSetHandle },
    Dispatch { x: u32, y: u32, z: u32 },
    DispatchIndirect { buffer: BufferHandle, offset: u64 },
    UpdateBuffer { buffer: BufferHandle, offset: u64, data: Vec<u8> },
    CopyBuffer { src: BufferHandle, src_offset: u64, dst: BufferHandle, dst_offset: u64, size: u64 },
    CopyTexture { src: TextureHandle, dst: TextureHandle },
    GenerateMipmaps(TextureHandle),
    PushDebugGroup(String),
    PopDebugGroup,
    InsertDebugMarker(String),
}

impl Command {
    /// Whether the command only makes sense inside a framebuffer pass
    pub fn is_render_pass_command(&self) -> bool {
        matches!(
            self,
            Command::ClearColorTarget { .. }
                | Command::ClearDepthStencil { .. }
                | Command::SetPipeline(_)
                | Command::SetVertexBuffer { .. }
                | Command::SetIndexBuffer { .. }
                | Command::SetBindingSet { .. }
                | Command::SetViewport { .. }
                | Command::SetFullViewports
                | Command::SetScissorRect { .. }
                | Command::SetFullScissorRects
                | Command::Draw { .. }
                | Command::DrawIndexed { .. }
                | Command::DrawIndirect { .. }
                | Command::DrawIndexedIndirect { .. }
        )
    }
}

/// Recording state of a command list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListState {
    Idle,
    Recording,
}

/// A reusable list of recorded commands
#[derive(Debug)]
pub struct CommandList {
    id: u64,
    state: ListState,
    commands: Vec<Command>,
    misuse: Option<String>,
}

impl CommandList {
    pub fn new() -> Self {
        Self {
            id: NEXT_LIST_ID.fetch_add(1, Ordering::Relaxed),
            state: ListState::Idle,
            commands: Vec::new(),
            misuse: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> ListState {
        self.state
    }

    /// Commands recorded since the last `begin`
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Start recording, discarding anything recorded before
    pub fn begin(&mut self) {
        if self.state == ListState::Recording {
            log::warn!("Command list {} restarted while recording", self.id);
        }
        self.commands.clear();
        self.misuse = None;
        self.state = ListState::Recording;
    }

    /// Stop recording; the list is ready for submission
    pub fn end(&mut self) {
        if self.state != ListState::Recording {
            self.flag_misuse("end called without begin");
        }
        self.state = ListState::Idle;
    }

    /// Return to the initial empty state
    pub fn reset(&mut self) {
        self.commands.clear();
        self.misuse = None;
        self.state = ListState::Idle;
    }

    /// Start a fluent recording sequence
    pub fn begin_fluent(&mut self) -> Sequencer<'_> {
        Sequencer::new(self)
    }

    /// Check that the list can be handed to a device
    pub fn validate_for_submit(&self) -> BackendResult<()> {
        if self.state == ListState::Recording {
            return Err(BackendError::InvalidCommandState(format!(
                "command list {} submitted while still recording",
                self.id
            )));
        }
        if let Some(reason) = &self.misuse {
            return Err(BackendError::InvalidCommandState(format!(
                "command list {}: {}",
                self.id, reason
            )));
        }
        Ok(())
    }

    /// Append a command; only valid while recording
    pub fn record(&mut self, command: Command) {
        if self.state != ListState::Recording {
            self.flag_misuse("command recorded outside begin/end");
            return;
        }
        log::trace!("Command list {}: {:?}", self.id, command);
        self.commands.push(command);
    }

    fn flag_misuse(&mut self, reason: &str) {
        log::warn!("Command list {}: {}", self.id, reason);
        if self.misuse.is_none() {
            self.misuse = Some(reason.to_string());
        }
    }

    pub fn set_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        self.record(Command::SetFramebuffer(framebuffer));
    }

    pub fn clear_color_target(&mut self, index: u32, color: [f32; 4]) {
        self.record(Command::ClearColorTarget { index, color });
    }

    pub fn clear_depth_stencil(&mut self, depth: f32, stencil: u8) {
        self.record(Command::ClearDepthStencil { depth, stencil });
    }

    pub fn set_pipeline(&mut self, pipeline: RenderPipelineHandle) {
        self.record(Command::SetPipeline(pipeline));
    }

    pub fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, offset: u64) {
        self.record(Command::SetVertexBuffer { slot, buffer, offset });
    }

    pub fn set_index_buffer(&mut self, buffer: BufferHandle, format: IndexFormat, offset: u64) {
        self.record(Command::SetIndexBuffer { buffer, format, offset });
    }

    pub fn set_binding_set(&mut self, slot: u32, set: BindingSetHandle) {
        self.record(Command::SetBindingSet { slot, set });
    }

    pub fn set_viewport(&mut self, index: u32, viewport: Viewport) {
        self.record(Command::SetViewport { index, viewport });
    }

    pub fn set_full_viewports(&mut self) {
        self.record(Command::SetFullViewports);
    }

    pub fn set_scissor_rect(&mut self, index: u32, rect: ScissorRect) {
        self.record(Command::SetScissorRect { index, rect });
    }

    pub fn set_full_scissor_rects(&mut self) {
        self.record(Command::SetFullScissorRects);
    }

    pub fn draw(&mut self, vertex_count: u32, instance_count: u32, vertex_start: u32, instance_start: u32) {
        self.record(Command::Draw { vertex_count, instance_count, vertex_start, instance_start });
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        index_start: u32,
        vertex_offset: i32,
        instance_start: u32,
    ) {
        self.record(Command::DrawIndexed {
            index_count,
            instance_count,
            index_start,
            vertex_offset,
            instance_start,
        });
    }

    pub fn draw_indirect(&mut self, buffer: BufferHandle, offset: u64, draw_count: u32, stride: u32) {
        self.record(Command::DrawIndirect { buffer, offset, draw_count, stride });
    }

    pub fn draw_indexed_indirect(&mut self, buffer: BufferHandle, offset: u64, draw_count: u32, stride: u32) {
        self.record(Command::DrawIndexedIndirect { buffer, offset, draw_count, stride });
    }

    pub fn set_compute_pipeline(&mut self, pipeline: ComputePipelineHandle) {
        self.record(Command::SetComputePipeline(pipeline));
    }

    pub fn set_compute_binding_set(&mut self, slot: u32, set: BindingSetHandle) {
        self.record(Command::SetComputeBindingSet { slot, set });
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.record(Command::Dispatch { x, y, z });
    }

    pub fn dispatch_indirect(&mut self, buffer: BufferHandle, offset: u64) {
        self.record(Command::DispatchIndirect { buffer, offset });
    }

    /// Copy `data` into the list; the bytes are written to `buffer` at submission
    pub fn update_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        self.record(Command::UpdateBuffer { buffer, offset, data: data.to_vec() });
    }

    pub fn copy_buffer(
        &mut self,
        src: BufferHandle,
        src_offset: u64,
        dst: BufferHandle,
        dst_offset: u64,
        size: u64,
    ) {
        self.record(Command::CopyBuffer { src, src_offset, dst, dst_offset, size });
    }

    pub fn copy_texture(&mut self, src: TextureHandle, dst: TextureHandle) {
        self.record(Command::CopyTexture { src, dst });
    }

    pub fn generate_mipmaps(&mut self, texture: TextureHandle) {
        self.record(Command::GenerateMipmaps(texture));
    }

    pub fn push_debug_group(&mut self, label: &str) {
        self.record(Command::PushDebugGroup(label.to_string()));
    }

    pub fn pop_debug_group(&mut self) {
        self.record(Command::PopDebugGroup);
    }

    pub fn insert_debug_marker(&mut self, label: &str) {
        self.record(Command::InsertDebugMarker(label.to_string()));
    }
}

impl Default for CommandList {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_list_is_idle_and_empty() {
        let list = CommandList::new();
        assert_eq!(list.state(), ListState::Idle);
        assert!(list.is_empty());
        assert!(list.validate_for_submit().is_ok());
    }

    #[test]
    fn test_commands_keep_call_order() {
        let mut list = CommandList::new();
        list.begin();
        list.set_framebuffer(FramebufferHandle(1));
        list.clear_color_target(0, [0.0, 0.0, 0.0, 1.0]);
        list.draw(3, 1, 0, 0);
        list.end();

        assert_eq!(
            list.commands(),
            &[
                Command::SetFramebuffer(FramebufferHandle(1)),
                Command::ClearColorTarget { index: 0, color: [0.0, 0.0, 0.0, 1.0] },
                Command::Draw { vertex_count: 3, instance_count: 1, vertex_start: 0, instance_start: 0 },
            ]
        );
        assert!(list.validate_for_submit().is_ok());
    }

    #[test]
    fn test_submit_while_recording_rejected() {
        let mut list = CommandList::new();
        list.begin();
        list.draw(3, 1, 0, 0);
        assert!(matches!(
            list.validate_for_submit(),
            Err(BackendError::InvalidCommandState(_))
        ));
    }

    #[test]
    fn test_record_while_idle_flags_list() {
        let mut list = CommandList::new();
        list.draw(3, 1, 0, 0);
        assert!(list.is_empty());
        assert!(list.validate_for_submit().is_err());

        // begin clears the flag
        list.begin();
        list.end();
        assert!(list.validate_for_submit().is_ok());
    }

    #[test]
    fn test_begin_discards_previous_commands() {
        let mut list = CommandList::new();
        list.begin();
        list.dispatch(1, 1, 1);
        list.end();
        list.begin();
        assert!(list.is_empty());
    }

    #[test]
    fn test_update_buffer_copies_bytes() {
        let mut list = CommandList::new();
        let mut data = vec![1u8, 2, 3];
        list.begin();
        list.update_buffer(BufferHandle(7), 4, &data);
        list.end();
        data[0] = 9;

        match &list.commands()[0] {
            Command::UpdateBuffer { buffer, offset, data } => {
                assert_eq!(*buffer, BufferHandle(7));
                assert_eq!(*offset, 4);
                assert_eq!(data, &[1, 2, 3]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_render_pass_classification() {
        assert!(Command::DrawIndexed {
            index_count: 6,
            instance_count: 1,
            index_start: 0,
            vertex_offset: 0,
            instance_start: 0
        }
        .is_render_pass_command());
        assert!(!Command::Dispatch { x: 1, y: 1, z: 1 }.is_render_pass_command());
        assert!(!Command::SetFramebuffer(FramebufferHandle(0)).is_render_pass_command());
    }
}
