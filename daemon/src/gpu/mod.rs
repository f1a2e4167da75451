/// GPU rendering backend using wgpu
///
/// Architecture:
/// - `context`: wgpu device/queue management
/// - `pipeline_builder`: quad pipeline creation
/// - `texture`: texture upload and reallocation
/// - `backend`: the [`crate::render::GraphicsBackend`] implementation
mod backend;
mod context;
mod pipeline_builder;
mod texture;

pub use backend::WgpuBackend;

/// Check that an adapter and device can be obtained, returning the adapter name
pub fn probe() -> Result<String, crate::render::RenderError> {
    let context = context::GpuContext::new()?;
    Ok(context.adapter_info.name.clone())
}
