//! wgpu implementation of [`GraphicsBackend`].
//!
//! Renders into an offscreen RGBA target and reads every finished frame back
//! for presentation through the Wayland shared-memory buffers.

use super::context::GpuContext;
use super::pipeline_builder::{
    PipelineBuilder, TARGET_FORMAT, bind_group_entries, create_pipeline_layout,
};
use super::texture::GpuTexture;
use crate::bitmap::Bitmap;
use crate::render::crop::Mat4;
use crate::render::{
    Blend, GraphicsBackend, PresentedFrame, Program, RenderError, TextureId, TextureKind,
    VideoFrame,
};
use std::collections::HashMap;
use wgpu::util::DeviceExt;

/// Uniform block of `quad.wgsl`
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct Transforms {
    mvp: Mat4,
    st: Mat4,
}

/// Offscreen color target plus its readback buffer
struct Target {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    readback: wgpu::Buffer,
    width: u32,
    height: u32,
    /// Row pitch aligned to `COPY_BYTES_PER_ROW_ALIGNMENT`
    padded_row: u32,
}

impl Target {
    fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Frame Target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_row = (width * 4).div_ceil(align) * align;
        let readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Frame Readback"),
            size: padded_row as u64 * height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        Self {
            texture,
            view,
            readback,
            width,
            height,
            padded_row,
        }
    }
}

struct WgpuContext {
    gpu: GpuContext,
    layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    pipelines: HashMap<(Program, Blend), wgpu::RenderPipeline>,
    target: Target,
    textures: HashMap<TextureId, GpuTexture>,
}

impl WgpuContext {
    fn new(width: u32, height: u32) -> Result<Self, RenderError> {
        let gpu = GpuContext::new()?;
        gpu.check_size(width, height)?;
        let device = &gpu.device;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Quad Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/quad.wgsl").into()),
        });

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Quad Bind Group Layout"),
            entries: &[
                bind_group_entries::uniform_buffer(0),
                bind_group_entries::texture(1),
                bind_group_entries::sampler(2),
            ],
        });
        let pipeline_layout = create_pipeline_layout(device, "Quad Pipeline Layout", &[&layout]);

        let mut pipelines = HashMap::new();
        for program in [Program::External, Program::Standard2D] {
            for blend in [Blend::Opaque, Blend::StraightAlpha] {
                let (label, entry) = match program {
                    Program::External => ("External Quad Pipeline", "fs_external"),
                    Program::Standard2D => ("Standard Quad Pipeline", "fs_standard"),
                };
                let state = match blend {
                    Blend::Opaque => wgpu::BlendState::REPLACE,
                    Blend::StraightAlpha => wgpu::BlendState::ALPHA_BLENDING,
                };
                let pipeline = PipelineBuilder::new(device, &shader)
                    .with_label(label)
                    .with_layout(&pipeline_layout)
                    .with_fragment(entry)
                    .with_blend(state)
                    .build();
                pipelines.insert((program, blend), pipeline);
            }
        }

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Quad Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::MipmapFilterMode::Nearest,
            ..Default::default()
        });

        let target = Target::new(device, width, height);

        Ok(Self {
            gpu,
            layout,
            sampler,
            pipelines,
            target,
            textures: HashMap::new(),
        })
    }

    fn texture_mut(&mut self, id: TextureId) -> Result<&mut GpuTexture, RenderError> {
        self.textures
            .get_mut(&id)
            .ok_or_else(|| RenderError::Upload(format!("unknown texture {:?}", id)))
    }

    fn submit(&self, encoder: wgpu::CommandEncoder) {
        self.gpu.queue.submit(std::iter::once(encoder.finish()));
    }

    fn encoder(&self, label: &str) -> wgpu::CommandEncoder {
        self.gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
    }

    fn pass<'e>(
        &self,
        encoder: &'e mut wgpu::CommandEncoder,
        load: wgpu::LoadOp<wgpu::Color>,
    ) -> wgpu::RenderPass<'e> {
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Quad Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &self.target.view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load,
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        })
    }
}

#[derive(Default)]
pub struct WgpuBackend {
    context: Option<WgpuContext>,
    next_texture: u32,
}

impl WgpuBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn context_mut(&mut self) -> Result<&mut WgpuContext, RenderError> {
        self.context.as_mut().ok_or(RenderError::NoContext)
    }
}

impl GraphicsBackend for WgpuBackend {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn create_context(&mut self, width: u32, height: u32) -> Result<(), RenderError> {
        self.context = None;
        let context = WgpuContext::new(width, height)?;
        log::info!(
            "GPU context ready on {} ({:?}), {}x{}",
            context.gpu.adapter_info.name,
            context.gpu.adapter_info.backend,
            width,
            height
        );
        self.context = Some(context);
        Ok(())
    }

    fn destroy_context(&mut self) {
        if self.context.take().is_some() {
            log::debug!("GPU context destroyed");
        }
    }

    fn has_context(&self) -> bool {
        self.context.is_some()
    }

    fn create_texture(&mut self, kind: TextureKind) -> Result<TextureId, RenderError> {
        self.next_texture += 1;
        let id = TextureId(self.next_texture);
        self.context_mut()?.textures.insert(id, GpuTexture::new(kind));
        Ok(id)
    }

    fn delete_texture(&mut self, id: TextureId) {
        if let Some(ctx) = self.context.as_mut() {
            ctx.textures.remove(&id);
        }
    }

    fn upload_bitmap(&mut self, id: TextureId, bitmap: &Bitmap) -> Result<(), RenderError> {
        let ctx = self.context_mut()?;
        let (device, queue) = (&ctx.gpu.device, &ctx.gpu.queue);
        let texture = ctx
            .textures
            .get_mut(&id)
            .ok_or_else(|| RenderError::Upload(format!("unknown texture {:?}", id)))?;
        texture.upload(device, queue, bitmap.width(), bitmap.height(), bitmap.pixels())
    }

    fn upload_video_frame(&mut self, id: TextureId, frame: &VideoFrame) -> Result<(), RenderError> {
        let ctx = self.context_mut()?;
        let (device, queue) = (&ctx.gpu.device, &ctx.gpu.queue);
        let texture = ctx
            .textures
            .get_mut(&id)
            .ok_or_else(|| RenderError::Upload(format!("unknown texture {:?}", id)))?;
        texture.upload(device, queue, frame.width, frame.height, &frame.data)
    }

    fn set_viewport(&mut self, width: u32, height: u32) -> Result<(), RenderError> {
        let ctx = self.context_mut()?;
        if (ctx.target.width, ctx.target.height) != (width, height) {
            ctx.gpu.check_size(width, height)?;
            ctx.target = Target::new(&ctx.gpu.device, width, height);
        }
        Ok(())
    }

    fn clear(&mut self, color: [f32; 4]) -> Result<(), RenderError> {
        let ctx = self.context_mut()?;
        let mut encoder = ctx.encoder("Clear Encoder");
        {
            let _pass = ctx.pass(
                &mut encoder,
                wgpu::LoadOp::Clear(wgpu::Color {
                    r: color[0] as f64,
                    g: color[1] as f64,
                    b: color[2] as f64,
                    a: color[3] as f64,
                }),
            );
        }
        ctx.submit(encoder);
        Ok(())
    }

    fn draw_quad(
        &mut self,
        program: Program,
        texture: TextureId,
        mvp: &Mat4,
        st: &Mat4,
        blend: Blend,
    ) -> Result<(), RenderError> {
        let ctx = self.context_mut()?;
        let kind = ctx.texture_mut(texture)?.kind;
        if kind != program.texture_kind() {
            return Err(RenderError::Shader(format!(
                "{:?} program cannot sample a {:?} texture",
                program, kind
            )));
        }
        let Some(view) = ctx.textures.get(&texture).and_then(GpuTexture::view) else {
            // Nothing uploaded yet
            return Ok(());
        };
        let pipeline = ctx
            .pipelines
            .get(&(program, blend))
            .ok_or_else(|| RenderError::Shader(format!("no pipeline for {:?}", program)))?;

        let uniforms = ctx
            .gpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Quad Transforms"),
                contents: bytemuck::bytes_of(&Transforms { mvp: *mvp, st: *st }),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let bind_group = ctx.gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Quad Bind Group"),
            layout: &ctx.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniforms.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&ctx.sampler),
                },
            ],
        });

        let mut encoder = ctx.encoder("Quad Encoder");
        {
            let mut pass = ctx.pass(&mut encoder, wgpu::LoadOp::Load);
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.draw(0..6, 0..1);
        }
        ctx.submit(encoder);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<PresentedFrame, RenderError> {
        let ctx = self.context_mut()?;
        let Target {
            texture,
            readback,
            width,
            height,
            padded_row,
            ..
        } = &ctx.target;
        let (width, height, padded_row) = (*width, *height, *padded_row);

        let mut encoder = ctx.encoder("Readback Encoder");
        encoder.copy_texture_to_buffer(
            texture.as_image_copy(),
            wgpu::TexelCopyBufferInfo {
                buffer: readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        ctx.submit(encoder);

        let slice = readback.slice(..);
        let (sender, receiver) = futures::channel::oneshot::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        ctx.gpu
            .device
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: None,
            })
            .map_err(|e| RenderError::Present(format!("device poll failed: {}", e)))?;
        pollster::block_on(receiver)
            .map_err(|_| RenderError::Present("readback cancelled".to_string()))?
            .map_err(|e| RenderError::Present(format!("readback failed: {}", e)))?;

        let mut argb = vec![0u8; width as usize * height as usize * 4];
        {
            let data = slice.get_mapped_range();
            let row_bytes = width as usize * 4;
            for (y, dst_row) in argb.chunks_exact_mut(row_bytes).enumerate() {
                let start = y * padded_row as usize;
                let src_row = &data[start..start + row_bytes];
                for (dst, src) in dst_row.chunks_exact_mut(4).zip(src_row.chunks_exact(4)) {
                    // RGBA -> little-endian ARGB; the surface is opaque
                    dst.copy_from_slice(&[src[2], src[1], src[0], 255]);
                }
            }
        }
        readback.unmap();

        Ok(PresentedFrame {
            width,
            height,
            argb,
        })
    }
}
