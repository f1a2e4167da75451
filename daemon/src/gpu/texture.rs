use crate::render::{RenderError, TextureKind};

/// A texture slot. Storage is (re)allocated on the first upload and
/// whenever the uploaded size changes.
pub struct GpuTexture {
    pub kind: TextureKind,
    storage: Option<Storage>,
}

struct Storage {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

impl GpuTexture {
    pub fn new(kind: TextureKind) -> Self {
        Self {
            kind,
            storage: None,
        }
    }

    /// Decoder frames stay in BGRA; bitmaps are RGBA
    fn format(&self) -> wgpu::TextureFormat {
        match self.kind {
            TextureKind::ExternalVideo => wgpu::TextureFormat::Bgra8Unorm,
            TextureKind::Static2D => wgpu::TextureFormat::Rgba8Unorm,
        }
    }

    pub fn view(&self) -> Option<&wgpu::TextureView> {
        self.storage.as_ref().map(|s| &s.view)
    }

    pub fn size(&self) -> Option<(u32, u32)> {
        self.storage.as_ref().map(|s| (s.width, s.height))
    }

    /// Upload tightly packed 4-byte pixels
    pub fn upload(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        width: u32,
        height: u32,
        data: &[u8],
    ) -> Result<(), RenderError> {
        let expected_size = width as usize * height as usize * 4;
        if width == 0 || height == 0 || data.len() != expected_size {
            return Err(RenderError::Upload(format!(
                "expected {} bytes for {}x{}, got {}",
                expected_size,
                width,
                height,
                data.len()
            )));
        }
        let max = device.limits().max_texture_dimension_2d;
        if width > max || height > max {
            return Err(RenderError::Upload(format!(
                "{}x{} exceeds the {} texture limit",
                width, height, max
            )));
        }

        if self.size() != Some((width, height)) {
            let texture = device.create_texture(&wgpu::TextureDescriptor {
                label: Some(match self.kind {
                    TextureKind::ExternalVideo => "Video Texture",
                    TextureKind::Static2D => "Bitmap Texture",
                }),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: self.format(),
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            });
            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            self.storage = Some(Storage {
                texture,
                view,
                width,
                height,
            });
        }

        let Some(storage) = &self.storage else {
            return Err(RenderError::Upload("texture storage missing".to_string()));
        };
        queue.write_texture(
            storage.texture.as_image_copy(),
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }
}
