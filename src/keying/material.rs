//! Bind group layouts, uniform types and render pipelines for the stage.

use super::shaders::ShaderSet;
use super::KeyingParams;
use crate::frame::PlaneVertex;
use bytemuck::{Pod, Zeroable};

/// Per-plane uniforms for the vertex stage.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct SceneUniforms {
    pub world_view_projection: [[f32; 4]; 4],
}

impl SceneUniforms {
    pub fn from_matrix(matrix: glam::Mat4) -> Self {
        Self {
            world_view_projection: matrix.to_cols_array_2d(),
        }
    }
}

/// Keying uniforms exactly as the fragment shader declares them (32 bytes).
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct KeyingUniforms {
    pub key_color: [f32; 4],
    pub threshold_sensitivity: f32,
    pub smoothing: f32,
    /// 0.0 samples the reference corner, 1.0 uses `key_color`.
    pub key_mode: f32,
    pub _pad: f32,
}

impl KeyingUniforms {
    /// Snapshots host parameters for one draw. Parameter changes between
    /// frames never reach in-flight work.
    pub fn from_params(params: &KeyingParams) -> Self {
        let p = params.sanitized();
        let (key_color, key_mode) = match p.key_override {
            Some([r, g, b]) => ([r, g, b, 1.0], 1.0),
            None => ([0.0; 4], 0.0),
        };
        Self {
            key_color,
            threshold_sensitivity: p.threshold_sensitivity,
            smoothing: p.smoothing,
            key_mode,
            _pad: 0.0,
        }
    }
}

/// Pipelines and layouts for compositing the keyed plane over the backdrop.
///
/// Both pipelines share the billboard vertex stage and the group(0) scene
/// uniforms; they differ in the group(1) material bindings and in blending.
/// The keyed pipeline expects premultiplied shader output, the backdrop is
/// opaque.
pub struct ChromaKeyMaterial {
    pub scene_layout: wgpu::BindGroupLayout,
    pub keyed_layout: wgpu::BindGroupLayout,
    pub backdrop_layout: wgpu::BindGroupLayout,
    pub keyed_pipeline: wgpu::RenderPipeline,
    pub backdrop_pipeline: wgpu::RenderPipeline,
    pub sampler: wgpu::Sampler,
}

impl ChromaKeyMaterial {
    pub fn new(
        device: &wgpu::Device,
        shaders: &ShaderSet,
        target_format: wgpu::TextureFormat,
    ) -> Self {
        let scene_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Scene Bind Group Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let keyed_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Keyed Material Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let backdrop_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Backdrop Material Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let keyed_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Keyed Pipeline Layout"),
                bind_group_layouts: &[&scene_layout, &keyed_layout],
                immediate_size: 0,
            });

        let backdrop_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Backdrop Pipeline Layout"),
                bind_group_layouts: &[&scene_layout, &backdrop_layout],
                immediate_size: 0,
            });

        let keyed_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Keyed Render Pipeline"),
            layout: Some(&keyed_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shaders.vertex,
                entry_point: Some("vs_main"),
                buffers: &[PlaneVertex::layout()],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shaders.keyed_fragment,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: target_format,
                    // The shader outputs premultiplied color, so the source
                    // factor is One rather than SrcAlpha.
                    blend: Some(wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        });

        let backdrop_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Backdrop Render Pipeline"),
            layout: Some(&backdrop_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shaders.vertex,
                entry_point: Some("vs_main"),
                buffers: &[PlaneVertex::layout()],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shaders.backdrop_fragment,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: target_format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        });

        // ClampToEdge plus single-mip textures make the (1.0, 1.0) reference
        // fetch resolve to the exact corner texel.
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Stage Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        Self {
            scene_layout,
            keyed_layout,
            backdrop_layout,
            keyed_pipeline,
            backdrop_pipeline,
            sampler,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keying_uniforms_are_32_bytes() {
        assert_eq!(std::mem::size_of::<KeyingUniforms>(), 32);
        assert_eq!(std::mem::align_of::<KeyingUniforms>() % 4, 0);
    }

    #[test]
    fn scene_uniforms_are_one_mat4() {
        assert_eq!(std::mem::size_of::<SceneUniforms>(), 64);
    }

    #[test]
    fn auto_mode_zeroes_the_override() {
        let u = KeyingUniforms::from_params(&KeyingParams::default());
        assert_eq!(u.key_mode, 0.0);
        assert_eq!(u.key_color, [0.0; 4]);
        assert_eq!(u.threshold_sensitivity, 0.24);
        assert_eq!(u.smoothing, 0.2);
    }

    #[test]
    fn override_mode_carries_the_color() {
        let params = KeyingParams {
            key_override: Some([0.1, 0.9, 0.2]),
            ..KeyingParams::default()
        };
        let u = KeyingUniforms::from_params(&params);
        assert_eq!(u.key_mode, 1.0);
        assert_eq!(u.key_color, [0.1, 0.9, 0.2, 1.0]);
    }

    #[test]
    fn snapshot_sanitizes_params() {
        let params = KeyingParams {
            threshold_sensitivity: 0.3,
            smoothing: 0.0,
            key_override: None,
        };
        let u = KeyingUniforms::from_params(&params);
        assert!(u.smoothing > 0.0);
    }

    #[test]
    fn field_order_matches_the_shader_struct() {
        let u = KeyingUniforms {
            key_color: [1.0, 2.0, 3.0, 4.0],
            threshold_sensitivity: 5.0,
            smoothing: 6.0,
            key_mode: 7.0,
            _pad: 0.0,
        };
        let words: &[f32] = bytemuck::cast_slice(bytemuck::bytes_of(&u));
        assert_eq!(words, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 0.0]);
    }
}
