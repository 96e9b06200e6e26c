//! Scene compositing: the backdrop and the keyed video plane in one pass.

use crate::frame::{PixelFormat, PlaneVertex, VideoFrame};
use crate::keying::{ChromaKeyMaterial, KeyingParams, KeyingUniforms, SceneUniforms, ShaderSet};
use crate::render::gpu::GpuContext;
use crate::scene::Stage;
use anyhow::{anyhow, Result};
use tracing::info;
use wgpu::util::DeviceExt;

/// Stage background where no billboard covers the frame, and the whole
/// background when no backdrop image is loaded.
const CLEAR_COLOR: wgpu::Color = wgpu::Color {
    r: 0.06,
    g: 0.06,
    b: 0.07,
    a: 1.0,
};

/// Owns the GPU resources of the stage and draws it.
///
/// There is no depth buffer: the backdrop is drawn first and the keyed plane
/// blends over it in painter's order. Keying parameters are snapshotted into
/// the uniform buffer at the start of every render, so host-side changes
/// never affect a pass already encoded.
pub struct Compositor {
    device: wgpu::Device,
    queue: wgpu::Queue,
    material: ChromaKeyMaterial,
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    backdrop_scene_buffer: wgpu::Buffer,
    screen_scene_buffer: wgpu::Buffer,
    backdrop_scene_bind_group: wgpu::BindGroup,
    screen_scene_bind_group: wgpu::BindGroup,
    keying_buffer: wgpu::Buffer,
    backdrop_bind_group: Option<wgpu::BindGroup>,
    video_texture: Option<wgpu::Texture>,
    video_bind_group: Option<wgpu::BindGroup>,
    cached_width: u32,
    cached_height: u32,
    stage: Stage,
    params: KeyingParams,
}

impl Compositor {
    pub fn new(
        gpu: &GpuContext,
        shaders: &ShaderSet,
        target_format: wgpu::TextureFormat,
        backdrop: Option<&VideoFrame>,
        params: KeyingParams,
    ) -> Result<Self> {
        let params = params.sanitized();
        let device = gpu.device.clone();
        let queue = gpu.queue.clone();
        let material = ChromaKeyMaterial::new(&device, shaders, target_format);

        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Plane Vertex Buffer"),
            contents: bytemuck::cast_slice(PlaneVertex::VERTICES),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Plane Index Buffer"),
            contents: bytemuck::cast_slice(PlaneVertex::INDICES),
            usage: wgpu::BufferUsages::INDEX,
        });

        let identity = SceneUniforms::from_matrix(glam::Mat4::IDENTITY);
        let backdrop_scene_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Backdrop Scene Uniforms"),
            contents: bytemuck::cast_slice(&[identity]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let screen_scene_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Screen Scene Uniforms"),
            contents: bytemuck::cast_slice(&[identity]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let backdrop_scene_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Backdrop Scene Bind Group"),
            layout: &material.scene_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: backdrop_scene_buffer.as_entire_binding(),
            }],
        });

        let screen_scene_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Screen Scene Bind Group"),
            layout: &material.scene_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: screen_scene_buffer.as_entire_binding(),
            }],
        });

        let keying_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Keying Uniforms"),
            contents: bytemuck::cast_slice(&[KeyingUniforms::from_params(&params)]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        // The backdrop is static; upload it once. Without one the clear
        // color fills the stage.
        let backdrop_bind_group = match backdrop {
            Some(backdrop) => {
                let backdrop_rgba = backdrop.to_rgba();
                let backdrop_texture = device.create_texture(&wgpu::TextureDescriptor {
                    label: Some("Backdrop Texture"),
                    size: wgpu::Extent3d {
                        width: backdrop_rgba.width,
                        height: backdrop_rgba.height,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: wgpu::TextureFormat::Rgba8Unorm,
                    usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                    view_formats: &[],
                });

                queue.write_texture(
                    wgpu::TexelCopyTextureInfo {
                        texture: &backdrop_texture,
                        mip_level: 0,
                        origin: wgpu::Origin3d::ZERO,
                        aspect: wgpu::TextureAspect::All,
                    },
                    &backdrop_rgba.data,
                    wgpu::TexelCopyBufferLayout {
                        offset: 0,
                        bytes_per_row: Some(backdrop_rgba.width * 4),
                        rows_per_image: Some(backdrop_rgba.height),
                    },
                    wgpu::Extent3d {
                        width: backdrop_rgba.width,
                        height: backdrop_rgba.height,
                        depth_or_array_layers: 1,
                    },
                );

                let backdrop_view =
                    backdrop_texture.create_view(&wgpu::TextureViewDescriptor::default());
                Some(device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("Backdrop Bind Group"),
                    layout: &material.backdrop_layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: wgpu::BindingResource::TextureView(&backdrop_view),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: wgpu::BindingResource::Sampler(&material.sampler),
                        },
                    ],
                }))
            }
            None => None,
        };

        Ok(Self {
            device,
            queue,
            material,
            vertex_buffer,
            index_buffer,
            backdrop_scene_buffer,
            screen_scene_buffer,
            backdrop_scene_bind_group,
            screen_scene_bind_group,
            keying_buffer,
            backdrop_bind_group,
            video_texture: None,
            video_bind_group: None,
            cached_width: 0,
            cached_height: 0,
            stage: Stage::new(),
            params,
        })
    }

    pub fn set_keying_params(&mut self, params: KeyingParams) {
        self.params = params.sanitized();
    }

    /// Uploads a decoded frame, recreating the video texture when the frame
    /// size changes. RGBA input uploads without a copy.
    pub fn upload_frame(&mut self, frame: &VideoFrame) {
        let converted;
        let rgba = if frame.format == PixelFormat::Rgba {
            frame
        } else {
            converted = frame.to_rgba();
            &converted
        };
        if self.video_texture.is_none()
            || self.cached_width != rgba.width
            || self.cached_height != rgba.height
        {
            info!("Creating video texture ({}x{})", rgba.width, rgba.height);
            let texture = self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some("Video Texture"),
                size: wgpu::Extent3d {
                    width: rgba.width,
                    height: rgba.height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            });
            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Video Bind Group"),
                layout: &self.material.keyed_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(&self.material.sampler),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: self.keying_buffer.as_entire_binding(),
                    },
                ],
            });
            self.video_texture = Some(texture);
            self.video_bind_group = Some(bind_group);
            self.cached_width = rgba.width;
            self.cached_height = rgba.height;
        }

        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: self.video_texture.as_ref().unwrap(),
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &rgba.data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(rgba.width * 4),
                rows_per_image: Some(rgba.height),
            },
            wgpu::Extent3d {
                width: rgba.width,
                height: rgba.height,
                depth_or_array_layers: 1,
            },
        );
    }

    /// Renders the stage into `view` and submits. The backdrop draws when an
    /// image was loaded; the keyed plane draws once a video frame has been
    /// uploaded.
    pub fn render(&mut self, view: &wgpu::TextureView, aspect: f32) {
        let vp = self.stage.camera.view_projection(aspect);
        let eye = self.stage.camera.eye;
        let backdrop_wvp = vp * self.stage.backdrop.model_matrix(eye);
        let screen_wvp = vp * self.stage.screen.model_matrix(eye);

        self.queue.write_buffer(
            &self.backdrop_scene_buffer,
            0,
            bytemuck::cast_slice(&[SceneUniforms::from_matrix(backdrop_wvp)]),
        );
        self.queue.write_buffer(
            &self.screen_scene_buffer,
            0,
            bytemuck::cast_slice(&[SceneUniforms::from_matrix(screen_wvp)]),
        );
        self.queue.write_buffer(
            &self.keying_buffer,
            0,
            bytemuck::cast_slice(&[KeyingUniforms::from_params(&self.params)]),
        );

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Stage Render Encoder"),
            });

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Stage Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(CLEAR_COLOR),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });

            render_pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
            render_pass.set_index_buffer(self.index_buffer.slice(..), wgpu::IndexFormat::Uint16);

            if let Some(backdrop_bind_group) = &self.backdrop_bind_group {
                render_pass.set_pipeline(&self.material.backdrop_pipeline);
                render_pass.set_bind_group(0, &self.backdrop_scene_bind_group, &[]);
                render_pass.set_bind_group(1, backdrop_bind_group, &[]);
                render_pass.draw_indexed(0..PlaneVertex::INDICES.len() as u32, 0, 0..1);
            }

            if let Some(video_bind_group) = &self.video_bind_group {
                render_pass.set_pipeline(&self.material.keyed_pipeline);
                render_pass.set_bind_group(0, &self.screen_scene_bind_group, &[]);
                render_pass.set_bind_group(1, video_bind_group, &[]);
                render_pass.draw_indexed(0..PlaneVertex::INDICES.len() as u32, 0, 0..1);
            }
        }

        self.queue.submit(std::iter::once(encoder.finish()));
    }

    /// Composites one frame offscreen and reads it back to the CPU.
    pub fn render_to_frame(&mut self, width: u32, height: u32) -> Result<VideoFrame> {
        let target = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Snapshot Target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = target.create_view(&wgpu::TextureViewDescriptor::default());
        self.render(&view, width as f32 / height as f32);

        let unpadded = width as usize * 4;
        let padded = padded_bytes_per_row(width);
        let readback = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Snapshot Readback Buffer"),
            size: (padded * height as usize) as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Snapshot Copy Encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &target,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded as u32),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let buffer_slice = readback.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            sender.send(result).unwrap()
        });
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: None,
            })
            .map_err(|e| anyhow!("Device poll failed: {:?}", e))?;
        receiver.recv()??;

        let data = buffer_slice.get_mapped_range();
        let mut pixels = vec![0u8; unpadded * height as usize];
        for row in 0..height as usize {
            let src = row * padded;
            let dst = row * unpadded;
            pixels[dst..dst + unpadded].copy_from_slice(&data[src..src + unpadded]);
        }
        drop(data);
        readback.unmap();

        Ok(VideoFrame::from_data(width, height, PixelFormat::Rgba, pixels))
    }
}

/// Rounds a row of RGBA texels up to wgpu's copy alignment.
fn padded_bytes_per_row(width: u32) -> usize {
    let unpadded = width as usize * 4;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as usize;
    (unpadded + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readback_rows_are_aligned() {
        assert_eq!(padded_bytes_per_row(1280), 5120);
        assert_eq!(padded_bytes_per_row(1000), 4096);
        assert_eq!(padded_bytes_per_row(1), 256);
        assert_eq!(padded_bytes_per_row(64), 256);
    }
}
