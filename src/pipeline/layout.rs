//! Resource classification and binding layout construction
//!
//! Classification is pure: it sorts the descriptor list into vertex streams,
//! the index stream and per-set shader resources, and derives the vertex
//! layouts and index format. Nothing touches the device until it succeeds.

use crate::backend::{
    BindingLayoutEntry, BindingSetDescriptor, BindingSetHandle, BindingSetLayoutDescriptor,
    BindingSetLayoutHandle, BufferHandle, GraphicsDevice, IndexFormat, VertexBufferLayout,
};
use crate::error::{PipelineError, PipelineResult};
use crate::resources::{
    IndexStream, Owned, ResourceDescriptor, ResourceTracker, ShaderResource, VertexElementTable,
    VertexStream,
};
use crate::stream::Subscription;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Binding sets a pipeline may use; set numbers run from 0 to `MAX_BINDING_SETS - 1`
pub const MAX_BINDING_SETS: u32 = 8;

/// Descriptors sorted by role, ready for device object creation
pub(crate) struct Classified {
    /// Ascending slot order
    pub vertex_streams: Vec<VertexStream>,
    pub index_stream: IndexStream,
    pub index_format: IndexFormat,
    /// One per vertex stream, same order
    pub vertex_layouts: Vec<VertexBufferLayout>,
    /// Ascending set number; entries keep input order within a set
    pub sets: Vec<(u32, Vec<ShaderResource>)>,
}

/// Partition and validate a descriptor list
pub(crate) fn classify(descriptors: Vec<ResourceDescriptor>) -> PipelineResult<Classified> {
    let mut vertex_streams = Vec::new();
    let mut index_streams = Vec::new();
    let mut sets: BTreeMap<u32, Vec<ShaderResource>> = BTreeMap::new();

    for descriptor in descriptors {
        match descriptor {
            ResourceDescriptor::Vertex(v) => vertex_streams.push(v),
            ResourceDescriptor::Index(i) => index_streams.push(i),
            ResourceDescriptor::Uniform(u) => {
                sets.entry(u.set).or_default().push(ShaderResource::Uniform(u))
            }
            ResourceDescriptor::Texture(t) => {
                sets.entry(t.set).or_default().push(ShaderResource::Texture(t))
            }
            ResourceDescriptor::Sampler(s) => {
                sets.entry(s.set).or_default().push(ShaderResource::Sampler(s))
            }
        }
    }

    if vertex_streams.is_empty() {
        return Err(PipelineError::configuration(
            "pipeline needs at least one vertex stream",
        ));
    }
    if index_streams.len() > 1 {
        return Err(PipelineError::configuration(format!(
            "pipeline takes one index stream, got {}",
            index_streams.len()
        )));
    }
    let index_stream = index_streams
        .pop()
        .ok_or_else(|| PipelineError::configuration("pipeline needs an index stream"))?;

    if let Some(&set) = sets.keys().next_back().filter(|&&set| set >= MAX_BINDING_SETS) {
        return Err(PipelineError::configuration(format!(
            "binding set {} is out of range, pipelines use sets 0..{}",
            set, MAX_BINDING_SETS
        )));
    }

    vertex_streams.sort_by_key(|v| v.slot);
    if let Some(pair) = vertex_streams.windows(2).find(|w| w[0].slot == w[1].slot) {
        return Err(PipelineError::configuration(format!(
            "vertex slot {} is bound twice",
            pair[0].slot
        )));
    }

    let vertex_layouts = vertex_layouts(vertex_streams.iter().map(|v| &v.elements))?;
    let index_format = index_stream.kind.index_format()?;

    Ok(Classified {
        vertex_streams,
        index_stream,
        index_format,
        vertex_layouts,
        sets: sets.into_iter().collect(),
    })
}

/// Layouts with shader locations numbered across slots
fn vertex_layouts<'a>(
    tables: impl Iterator<Item = &'a VertexElementTable>,
) -> PipelineResult<Vec<VertexBufferLayout>> {
    let mut next_location = 0;
    tables
        .map(|table| {
            let layout = table.to_layout(next_location)?;
            next_location += layout.attributes.len() as u32;
            Ok(layout)
        })
        .collect()
}

/// A vertex buffer as bound by a pipeline
#[derive(Debug, Clone)]
pub struct VertexLayout {
    slot: u32,
    buffer: BufferHandle,
    elements: VertexElementTable,
    layout: VertexBufferLayout,
}

impl VertexLayout {
    pub(crate) fn new(
        slot: u32,
        buffer: BufferHandle,
        elements: VertexElementTable,
        layout: VertexBufferLayout,
    ) -> Self {
        Self { slot, buffer, elements, layout }
    }

    /// Slot the stream was declared for; the bound buffer index is this
    /// layout's position in [`Pipeline::vertex_layouts`](crate::Pipeline::vertex_layouts)
    pub fn slot(&self) -> u32 {
        self.slot
    }

    pub fn buffer(&self) -> BufferHandle {
        self.buffer
    }

    pub fn elements(&self) -> &VertexElementTable {
        &self.elements
    }

    pub fn layout(&self) -> &VertexBufferLayout {
        &self.layout
    }
}

/// One binding set of a pipeline and its layout
#[derive(Debug, Clone)]
pub struct BindingSetLayout {
    set: u32,
    entries: Vec<BindingLayoutEntry>,
    layout: BindingSetLayoutHandle,
    binding_set: BindingSetHandle,
}

impl BindingSetLayout {
    pub fn set(&self) -> u32 {
        self.set
    }

    /// Entries in binding order
    pub fn entries(&self) -> &[BindingLayoutEntry] {
        &self.entries
    }

    pub fn layout(&self) -> BindingSetLayoutHandle {
        self.layout
    }

    pub fn binding_set(&self) -> BindingSetHandle {
        self.binding_set
    }
}

/// Create layouts and sets for every set number up to the highest one used
///
/// Unused set numbers below the highest get an empty layout and set so set
/// indices stay contiguous. The shader resources' objects move into `tracker`
/// and their subscriptions into `subscriptions`.
pub(crate) fn build_binding_sets(
    device: &Arc<dyn GraphicsDevice>,
    tracker: &mut ResourceTracker,
    subscriptions: &mut Vec<Subscription>,
    sets: Vec<(u32, Vec<ShaderResource>)>,
    label: &str,
) -> PipelineResult<Vec<BindingSetLayout>> {
    let count = sets.last().map_or(0, |(set, _)| set + 1);
    let mut by_set: BTreeMap<u32, Vec<ShaderResource>> = sets.into_iter().collect();
    let mut built = Vec::with_capacity(count as usize);

    for set in 0..count {
        let resources = by_set.remove(&set).unwrap_or_default();
        if resources.is_empty() {
            log::debug!("{}: binding set {} is unused, binding an empty set", label, set);
        }

        let entries: Vec<BindingLayoutEntry> = resources.iter().map(|r| r.layout_entry()).collect();
        let bindings = resources.iter().map(|r| r.binding_resource()).collect();
        for resource in resources {
            let (subscription, owned) = resource.into_parts();
            subscriptions.extend(subscription);
            tracker.track(owned);
        }

        let layout = device
            .create_binding_set_layout(&BindingSetLayoutDescriptor {
                label: Some(format!("{} set {} layout", label, set)),
                entries: entries.clone(),
            })
            .map_err(|e| PipelineError::from_build(&format!("binding set {} layout", set), e))?;
        let layout = tracker.track(Owned::new(device.clone(), layout));

        let binding_set = device
            .create_binding_set(&BindingSetDescriptor {
                label: Some(format!("{} set {}", label, set)),
                layout,
                resources: bindings,
            })
            .map_err(|e| PipelineError::from_build(&format!("binding set {}", set), e))?;
        let binding_set = tracker.track(Owned::new(device.clone(), binding_set));

        built.push(BindingSetLayout { set, entries, layout, binding_set });
    }

    Ok(built)
}
