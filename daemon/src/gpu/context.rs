/// GPU context management - wgpu device/queue initialization
use crate::render::RenderError;

/// Device, queue and adapter info for one graphics context
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter_info: wgpu::AdapterInfo,
    pub limits: wgpu::Limits,
}

impl GpuContext {
    /// Connect to the best available adapter.
    ///
    /// Blocks the calling thread.
    pub fn new() -> Result<Self, RenderError> {
        pollster::block_on(Self::request())
    }

    async fn request() -> Result<Self, RenderError> {
        log::info!("Initializing GPU context...");

        let instance = wgpu::Instance::default();

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::LowPower,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| RenderError::Context(format!("no suitable GPU adapter: {}", e)))?;

        let adapter_info = adapter.get_info();
        log::info!(
            "Selected GPU adapter: {} ({:?})",
            adapter_info.name,
            adapter_info.backend
        );

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Glasswall Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults(),
                ..Default::default()
            })
            .await
            .map_err(|e| RenderError::Context(format!("failed to create GPU device: {}", e)))?;

        let limits = device.limits();
        log::debug!(
            "  Max Texture Size: {}x{}",
            limits.max_texture_dimension_2d,
            limits.max_texture_dimension_2d
        );

        Ok(Self {
            device,
            queue,
            adapter_info,
            limits,
        })
    }

    /// Reject surfaces the device cannot render
    pub fn check_size(&self, width: u32, height: u32) -> Result<(), RenderError> {
        let max = self.limits.max_texture_dimension_2d;
        if width == 0 || height == 0 || width > max || height > max {
            return Err(RenderError::Context(format!(
                "surface {}x{} outside 1..={} on {}",
                width, height, max, self.adapter_info.name
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for GpuContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuContext")
            .field("adapter", &self.adapter_info.name)
            .field("backend", &self.adapter_info.backend)
            .finish()
    }
}
