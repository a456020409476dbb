//! Replays a recorded command list onto a wgpu encoder
//!
//! Commands are grouped into passes: a framebuffer binding opens a render pass
//! and leading clears become its load operations, compute commands share a
//! compute pass, and transfers run directly on the encoder between passes.
//! When a pass has to be split, bound state is replayed into the next one.

use super::mipmap::MipmapGenerator;
use super::{conversion, staging_buffer, Resources};
use crate::backend::traits::*;
use crate::backend::types::*;
use crate::command::Command;

pub(super) struct SwapchainViews<'a> {
    pub color: Option<&'a wgpu::TextureView>,
    pub depth: Option<&'a wgpu::TextureView>,
    pub output: OutputDescription,
}

pub(super) struct ReplayContext<'a> {
    pub device: &'a wgpu::Device,
    pub resources: &'a Resources,
    pub swapchain: SwapchainViews<'a>,
    pub swapchain_handle: FramebufferHandle,
    pub mipmaps: &'a MipmapGenerator,
}

/// Whether any command binds `framebuffer`
pub(super) fn uses_framebuffer(commands: &[Command], framebuffer: FramebufferHandle) -> bool {
    commands
        .iter()
        .any(|c| matches!(c, Command::SetFramebuffer(fb) if *fb == framebuffer))
}

struct RenderPlan<'c> {
    framebuffer: FramebufferHandle,
    color_clears: Vec<(u32, [f32; 4])>,
    depth_clear: Option<(f32, u8)>,
    commands: Vec<&'c Command>,
    draws: usize,
}

impl<'c> RenderPlan<'c> {
    fn new(framebuffer: FramebufferHandle, state: &[&'c Command]) -> Self {
        Self {
            framebuffer,
            color_clears: Vec::new(),
            depth_clear: None,
            commands: state.to_vec(),
            draws: 0,
        }
    }

    fn is_noop(&self) -> bool {
        self.draws == 0 && self.color_clears.is_empty() && self.depth_clear.is_none()
    }
}

enum OpenPass<'c> {
    None,
    Render(RenderPlan<'c>),
    Compute(Vec<&'c Command>),
}

struct Attachments<'a> {
    colors: Vec<&'a wgpu::TextureView>,
    depth: Option<&'a wgpu::TextureView>,
    stencil: bool,
    width: u32,
    height: u32,
}

fn invalid(message: impl Into<String>) -> BackendError {
    BackendError::InvalidCommandState(message.into())
}

fn not_found(what: impl std::fmt::Debug) -> BackendError {
    BackendError::ResourceNotFound(format!("{:?}", what))
}

impl<'a> ReplayContext<'a> {
    pub(super) fn encode(&self, encoder: &mut wgpu::CommandEncoder, commands: &[Command]) -> BackendResult<()> {
        let mut framebuffer = None;
        let mut render_state: Vec<&Command> = Vec::new();
        let mut compute_state: Vec<&Command> = Vec::new();
        let mut open = OpenPass::None;
        let mut debug_depth = 0usize;

        for command in commands {
            match command {
                Command::SetFramebuffer(fb) => {
                    self.flush(encoder, &mut open)?;
                    framebuffer = Some(*fb);
                    render_state.clear();
                    open = OpenPass::Render(RenderPlan::new(*fb, &[]));
                }
                Command::ClearColorTarget { index, color } => {
                    let plan = self.clearable(encoder, &mut open, framebuffer, &render_state)?;
                    plan.color_clears.retain(|(i, _)| i != index);
                    plan.color_clears.push((*index, *color));
                }
                Command::ClearDepthStencil { depth, stencil } => {
                    let plan = self.clearable(encoder, &mut open, framebuffer, &render_state)?;
                    plan.depth_clear = Some((*depth, *stencil));
                }
                Command::SetPipeline(_)
                | Command::SetVertexBuffer { .. }
                | Command::SetIndexBuffer { .. }
                | Command::SetBindingSet { .. }
                | Command::SetViewport { .. }
                | Command::SetFullViewports
                | Command::SetScissorRect { .. }
                | Command::SetFullScissorRects => {
                    let plan = self.render_plan(encoder, &mut open, framebuffer, &render_state)?;
                    plan.commands.push(command);
                    render_state.push(command);
                }
                Command::Draw { .. }
                | Command::DrawIndexed { .. }
                | Command::DrawIndirect { .. }
                | Command::DrawIndexedIndirect { .. } => {
                    let plan = self.render_plan(encoder, &mut open, framebuffer, &render_state)?;
                    plan.commands.push(command);
                    plan.draws += 1;
                }
                Command::SetComputePipeline(_) | Command::SetComputeBindingSet { .. } => {
                    self.compute_pass(encoder, &mut open, &compute_state)?.push(command);
                    compute_state.push(command);
                }
                Command::Dispatch { .. } | Command::DispatchIndirect { .. } => {
                    self.compute_pass(encoder, &mut open, &compute_state)?.push(command);
                }
                Command::InsertDebugMarker(label) => match &mut open {
                    OpenPass::Render(plan) => plan.commands.push(command),
                    OpenPass::Compute(commands) => commands.push(command),
                    OpenPass::None => encoder.insert_debug_marker(label),
                },
                Command::PushDebugGroup(label) => {
                    self.flush(encoder, &mut open)?;
                    encoder.push_debug_group(label);
                    debug_depth += 1;
                }
                Command::PopDebugGroup => {
                    if debug_depth == 0 {
                        return Err(invalid("pop_debug_group without a matching push"));
                    }
                    self.flush(encoder, &mut open)?;
                    encoder.pop_debug_group();
                    debug_depth -= 1;
                }
                Command::UpdateBuffer { .. }
                | Command::CopyBuffer { .. }
                | Command::CopyTexture { .. }
                | Command::GenerateMipmaps(_) => {
                    self.flush(encoder, &mut open)?;
                    self.transfer(encoder, command)?;
                }
            }
        }

        self.flush(encoder, &mut open)?;
        if debug_depth != 0 {
            return Err(invalid(format!("{} debug groups left open", debug_depth)));
        }
        Ok(())
    }

    fn flush(&self, encoder: &mut wgpu::CommandEncoder, open: &mut OpenPass<'_>) -> BackendResult<()> {
        match std::mem::replace(open, OpenPass::None) {
            OpenPass::None => Ok(()),
            OpenPass::Render(plan) if plan.is_noop() => Ok(()),
            OpenPass::Render(plan) => self.render_pass(encoder, &plan),
            OpenPass::Compute(commands) => self.compute(encoder, &commands),
        }
    }

    fn render_plan<'o, 'c>(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        open: &'o mut OpenPass<'c>,
        framebuffer: Option<FramebufferHandle>,
        state: &[&'c Command],
    ) -> BackendResult<&'o mut RenderPlan<'c>> {
        let framebuffer =
            framebuffer.ok_or_else(|| invalid("render command recorded before set_framebuffer"))?;
        if !matches!(&*open, OpenPass::Render(_)) {
            self.flush(encoder, open)?;
            *open = OpenPass::Render(RenderPlan::new(framebuffer, state));
        }
        match open {
            OpenPass::Render(plan) => Ok(plan),
            _ => Err(invalid("render pass not open")),
        }
    }

    /// Render plan whose load operations can still take a clear
    fn clearable<'o, 'c>(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        open: &'o mut OpenPass<'c>,
        framebuffer: Option<FramebufferHandle>,
        state: &[&'c Command],
    ) -> BackendResult<&'o mut RenderPlan<'c>> {
        let has_draws = matches!(&*open, OpenPass::Render(plan) if plan.draws > 0);
        if has_draws {
            self.flush(encoder, open)?;
        }
        self.render_plan(encoder, open, framebuffer, state)
    }

    fn compute_pass<'o, 'c>(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        open: &'o mut OpenPass<'c>,
        state: &[&'c Command],
    ) -> BackendResult<&'o mut Vec<&'c Command>> {
        if !matches!(&*open, OpenPass::Compute(_)) {
            self.flush(encoder, open)?;
            *open = OpenPass::Compute(state.to_vec());
        }
        match open {
            OpenPass::Compute(commands) => Ok(commands),
            _ => Err(invalid("compute pass not open")),
        }
    }

    fn attachments(&self, framebuffer: FramebufferHandle) -> BackendResult<Attachments<'a>> {
        if framebuffer == self.swapchain_handle {
            let color = self
                .swapchain
                .color
                .ok_or_else(|| BackendError::AcquireImageFailed("swapchain image not acquired".into()))?;
            let output = &self.swapchain.output;
            return Ok(Attachments {
                colors: vec![color],
                depth: self.swapchain.depth,
                stencil: output.depth_format.is_some_and(|f| f.has_stencil()),
                width: output.width,
                height: output.height,
            });
        }
        let resources: &'a Resources = self.resources;
        let record = resources
            .framebuffers
            .get(&framebuffer.0)
            .ok_or_else(|| not_found(framebuffer))?;
        Ok(Attachments {
            colors: record.colors.iter().collect(),
            depth: record.depth.as_ref(),
            stencil: record.output.depth_format.is_some_and(|f| f.has_stencil()),
            width: record.output.width,
            height: record.output.height,
        })
    }

    fn render_pass(&self, encoder: &mut wgpu::CommandEncoder, plan: &RenderPlan<'_>) -> BackendResult<()> {
        let resources: &'a Resources = self.resources;
        let attachments = self.attachments(plan.framebuffer)?;

        if let Some((index, _)) = plan
            .color_clears
            .iter()
            .find(|(index, _)| *index as usize >= attachments.colors.len())
        {
            return Err(invalid(format!(
                "clear of color target {} on {:?} with {} targets",
                index,
                plan.framebuffer,
                attachments.colors.len()
            )));
        }
        if plan.depth_clear.is_some() && attachments.depth.is_none() {
            return Err(invalid(format!("depth clear on {:?} without depth", plan.framebuffer)));
        }

        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = attachments
            .colors
            .iter()
            .copied()
            .enumerate()
            .map(|(index, view)| {
                let clear = plan
                    .color_clears
                    .iter()
                    .find(|(i, _)| *i as usize == index)
                    .map(|(_, color)| color);
                Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: match clear {
                            Some(color) => wgpu::LoadOp::Clear(wgpu::Color {
                                r: color[0] as f64,
                                g: color[1] as f64,
                                b: color[2] as f64,
                                a: color[3] as f64,
                            }),
                            None => wgpu::LoadOp::Load,
                        },
                        store: wgpu::StoreOp::Store,
                    },
                })
            })
            .collect();

        let depth_attachment = attachments.depth.map(|view| wgpu::RenderPassDepthStencilAttachment {
            view,
            depth_ops: Some(wgpu::Operations {
                load: match plan.depth_clear {
                    Some((depth, _)) => wgpu::LoadOp::Clear(depth),
                    None => wgpu::LoadOp::Load,
                },
                store: wgpu::StoreOp::Store,
            }),
            stencil_ops: attachments.stencil.then(|| wgpu::Operations {
                load: match plan.depth_clear {
                    Some((_, stencil)) => wgpu::LoadOp::Clear(stencil as u32),
                    None => wgpu::LoadOp::Load,
                },
                store: wgpu::StoreOp::Store,
            }),
        });

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Render Pass"),
            color_attachments: &color_attachments,
            depth_stencil_attachment: depth_attachment,
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        for command in &plan.commands {
            match command {
                Command::SetPipeline(handle) => {
                    let pipeline = resources
                        .render_pipelines
                        .get(&handle.0)
                        .ok_or_else(|| not_found(handle))?;
                    pass.set_pipeline(pipeline);
                }
                Command::SetVertexBuffer { slot, buffer, offset } => {
                    pass.set_vertex_buffer(*slot, resources.buffer(*buffer)?.slice(*offset..));
                }
                Command::SetIndexBuffer { buffer, format, offset } => {
                    pass.set_index_buffer(
                        resources.buffer(*buffer)?.slice(*offset..),
                        conversion::index_format(*format),
                    );
                }
                Command::SetBindingSet { slot, set } => {
                    let bind_group = resources.bind_groups.get(&set.0).ok_or_else(|| not_found(set))?;
                    pass.set_bind_group(*slot, bind_group, &[]);
                }
                Command::SetViewport { index, viewport } => {
                    if *index == 0 {
                        pass.set_viewport(
                            viewport.x,
                            viewport.y,
                            viewport.width,
                            viewport.height,
                            viewport.min_depth,
                            viewport.max_depth,
                        );
                    } else {
                        log::debug!("Ignoring viewport {}: one viewport per pass", index);
                    }
                }
                Command::SetFullViewports => {
                    pass.set_viewport(
                        0.0,
                        0.0,
                        attachments.width as f32,
                        attachments.height as f32,
                        0.0,
                        1.0,
                    );
                }
                Command::SetScissorRect { index, rect } => {
                    if *index == 0 {
                        pass.set_scissor_rect(rect.x, rect.y, rect.width, rect.height);
                    } else {
                        log::debug!("Ignoring scissor rect {}: one scissor per pass", index);
                    }
                }
                Command::SetFullScissorRects => {
                    pass.set_scissor_rect(0, 0, attachments.width, attachments.height);
                }
                Command::Draw { vertex_count, instance_count, vertex_start, instance_start } => {
                    pass.draw(
                        *vertex_start..vertex_start + vertex_count,
                        *instance_start..instance_start + instance_count,
                    );
                }
                Command::DrawIndexed {
                    index_count,
                    instance_count,
                    index_start,
                    vertex_offset,
                    instance_start,
                } => {
                    pass.draw_indexed(
                        *index_start..index_start + index_count,
                        *vertex_offset,
                        *instance_start..instance_start + instance_count,
                    );
                }
                Command::DrawIndirect { buffer, offset, draw_count, stride } => {
                    let buffer = resources.buffer(*buffer)?;
                    for draw in 0..*draw_count as u64 {
                        pass.draw_indirect(buffer, offset + draw * *stride as u64);
                    }
                }
                Command::DrawIndexedIndirect { buffer, offset, draw_count, stride } => {
                    let buffer = resources.buffer(*buffer)?;
                    for draw in 0..*draw_count as u64 {
                        pass.draw_indexed_indirect(buffer, offset + draw * *stride as u64);
                    }
                }
                Command::InsertDebugMarker(label) => pass.insert_debug_marker(label),
                other => return Err(invalid(format!("{:?} inside a render pass", other))),
            }
        }
        Ok(())
    }

    fn compute(&self, encoder: &mut wgpu::CommandEncoder, commands: &[&Command]) -> BackendResult<()> {
        let resources: &'a Resources = self.resources;
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Compute Pass"),
            timestamp_writes: None,
        });

        for command in commands {
            match command {
                Command::SetComputePipeline(handle) => {
                    let pipeline = resources
                        .compute_pipelines
                        .get(&handle.0)
                        .ok_or_else(|| not_found(handle))?;
                    pass.set_pipeline(pipeline);
                }
                Command::SetComputeBindingSet { slot, set } => {
                    let bind_group = resources.bind_groups.get(&set.0).ok_or_else(|| not_found(set))?;
                    pass.set_bind_group(*slot, bind_group, &[]);
                }
                Command::Dispatch { x, y, z } => pass.dispatch_workgroups(*x, *y, *z),
                Command::DispatchIndirect { buffer, offset } => {
                    pass.dispatch_workgroups_indirect(resources.buffer(*buffer)?, *offset);
                }
                Command::InsertDebugMarker(label) => pass.insert_debug_marker(label),
                other => return Err(invalid(format!("{:?} inside a compute pass", other))),
            }
        }
        Ok(())
    }

    fn transfer(&self, encoder: &mut wgpu::CommandEncoder, command: &Command) -> BackendResult<()> {
        let resources = self.resources;
        match command {
            Command::UpdateBuffer { buffer, offset, data } => {
                if data.is_empty() {
                    return Ok(());
                }
                let target = resources.buffer(*buffer)?;
                let size = (data.len() as u64).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
                check_copy(*buffer, *offset, size, target.size())?;
                let staging = staging_buffer(self.device, data);
                encoder.copy_buffer_to_buffer(&staging, 0, target, *offset, size);
            }
            Command::CopyBuffer { src, src_offset, dst, dst_offset, size } => {
                let source = resources.buffer(*src)?;
                let target = resources.buffer(*dst)?;
                check_copy(*src, *src_offset, *size, source.size())?;
                check_copy(*dst, *dst_offset, *size, target.size())?;
                encoder.copy_buffer_to_buffer(source, *src_offset, target, *dst_offset, *size);
            }
            Command::CopyTexture { src, dst } => {
                let source = resources.texture(*src)?;
                let target = resources.texture(*dst)?;
                if (source.desc.width, source.desc.height) != (target.desc.width, target.desc.height) {
                    return Err(BackendError::OutOfBounds(format!(
                        "texture copy {:?} -> {:?} size mismatch",
                        src, dst
                    )));
                }
                encoder.copy_texture_to_texture(
                    source.texture.as_image_copy(),
                    target.texture.as_image_copy(),
                    wgpu::Extent3d {
                        width: source.desc.width,
                        height: source.desc.height,
                        depth_or_array_layers: 1,
                    },
                );
            }
            Command::GenerateMipmaps(texture) => {
                let record = resources.texture(*texture)?;
                let usage = record.desc.usage;
                if record.desc.format.is_depth()
                    || !usage.contains(TextureUsage::RENDER_ATTACHMENT)
                    || !usage.contains(TextureUsage::TEXTURE_BINDING)
                {
                    return Err(invalid(format!(
                        "{:?} needs a color format with render and sampling usage for mip generation",
                        texture
                    )));
                }
                self.mipmaps.generate(self.device, encoder, &record.texture);
            }
            other => return Err(invalid(format!("{:?} is not a transfer", other))),
        }
        Ok(())
    }
}

fn check_copy(buffer: BufferHandle, offset: u64, size: u64, len: u64) -> BackendResult<()> {
    if offset % wgpu::COPY_BUFFER_ALIGNMENT != 0 || size % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
        return Err(invalid(format!(
            "{:?}: copy of {} bytes at offset {} is not 4-byte aligned",
            buffer, size, offset
        )));
    }
    if offset.checked_add(size).map_or(true, |end| end > len) {
        return Err(BackendError::OutOfBounds(format!(
            "{:?}: {} bytes at offset {} exceed size {}",
            buffer, size, offset, len
        )));
    }
    Ok(())
}
