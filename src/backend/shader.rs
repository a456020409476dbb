//! WGSL front end shared by devices

use crate::backend::traits::{BackendError, BackendResult};
use crate::backend::types::{ShaderDescriptor, ShaderStage};

/// Parse and validate a WGSL module, checking the requested entry point exists
/// for the requested stage
pub fn validate_wgsl(desc: &ShaderDescriptor) -> BackendResult<naga::Module> {
    let label = desc.label.as_deref().unwrap_or("shader");
    let source = std::str::from_utf8(&desc.source).map_err(|e| {
        BackendError::ShaderCreationFailed(format!("{}: source is not UTF-8: {}", label, e))
    })?;

    let module = naga::front::wgsl::parse_str(source).map_err(|e| {
        BackendError::ShaderCreationFailed(format!("{}: {}", label, e.emit_to_string(source)))
    })?;

    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|e| BackendError::ShaderCreationFailed(format!("{}: {:?}", label, e)))?;

    let stage = match desc.stage {
        ShaderStage::Vertex => naga::ShaderStage::Vertex,
        ShaderStage::Fragment => naga::ShaderStage::Fragment,
        ShaderStage::Compute => naga::ShaderStage::Compute,
    };
    let found = module
        .entry_points
        .iter()
        .any(|ep| ep.name == desc.entry_point && ep.stage == stage);
    if !found {
        return Err(BackendError::ShaderCreationFailed(format!(
            "{}: no {:?} entry point named '{}'",
            label, desc.stage, desc.entry_point
        )));
    }

    Ok(module)
}
