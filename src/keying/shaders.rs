//! WGSL shader sources and validated module compilation.
//!
//! The vertex/fragment pairing is explicit: a [`ShaderSet`] is built once and
//! handed to the compositor, which constructs its pipelines from the modules
//! it was given. There is no name-based shader lookup anywhere.

use anyhow::{anyhow, Result};
use naga::valid::{Capabilities, ValidationFlags, Validator};
use std::borrow::Cow;

/// Billboard vertex shader shared by the keyed and backdrop pipelines.
pub const BILLBOARD_VERTEX_SHADER: &str = r#"
struct SceneUniforms {
    world_view_projection: mat4x4<f32>,
}

@group(0) @binding(0) var<uniform> scene: SceneUniforms;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
}

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(in: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    out.clip_position = scene.world_view_projection * vec4<f32>(in.position, 1.0);
    out.uv = in.uv;
    return out;
}
"#;

/// Chroma-key fragment shader. Outputs premultiplied RGB with the blend
/// factor as alpha.
///
/// The constants must stay in lockstep with `keying::color`; that module is
/// the CPU reference the tests run against.
pub const CHROMA_KEY_FRAGMENT_SHADER: &str = r#"
@group(1) @binding(0) var t_video: texture_2d<f32>;
@group(1) @binding(1) var s_video: sampler;

struct KeyingUniforms {
    key_color: vec4<f32>,
    threshold_sensitivity: f32,
    smoothing: f32,
    key_mode: f32,
    _pad: f32,
}

@group(1) @binding(2) var<uniform> keying: KeyingUniforms;

const LUMA_WEIGHTS: vec3<f32> = vec3<f32>(0.2989, 0.5866, 0.1145);
const CR_SCALE: f32 = 0.7132;
const CB_SCALE: f32 = 0.5647;
const REFERENCE_UV: vec2<f32> = vec2<f32>(1.0, 1.0);

fn ycrcb(rgb: vec3<f32>) -> vec3<f32> {
    let y = dot(rgb, LUMA_WEIGHTS);
    return vec3<f32>(y, CR_SCALE * (rgb.r - y), CB_SCALE * (rgb.b - y));
}

@fragment
fn fs_main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    let texel = textureSample(t_video, s_video, uv);
    let auto_key = textureSample(t_video, s_video, REFERENCE_UV).rgb;
    let key_rgb = select(auto_key, keying.key_color.rgb, keying.key_mode > 0.5);
    let key = ycrcb(key_rgb);
    let smp = ycrcb(texel.rgb);
    let blend = smoothstep(
        keying.threshold_sensitivity,
        keying.threshold_sensitivity + keying.smoothing,
        distance(key.yz, smp.yz),
    );
    return vec4<f32>(texel.rgb * blend, blend);
}
"#;

/// Passthrough fragment shader for the opaque backdrop plane.
pub const BACKDROP_FRAGMENT_SHADER: &str = r#"
@group(1) @binding(0) var t_backdrop: texture_2d<f32>;
@group(1) @binding(1) var s_backdrop: sampler;

@fragment
fn fs_main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    return textureSample(t_backdrop, s_backdrop, uv);
}
"#;

/// The compiled shader modules the compositor renders with.
pub struct ShaderSet {
    pub vertex: wgpu::ShaderModule,
    pub keyed_fragment: wgpu::ShaderModule,
    pub backdrop_fragment: wgpu::ShaderModule,
}

impl ShaderSet {
    /// Validates and compiles the built-in shaders.
    pub fn compile(device: &wgpu::Device) -> Result<Self> {
        Ok(Self {
            vertex: compile_module(device, "Billboard Vertex Shader", BILLBOARD_VERTEX_SHADER)?,
            keyed_fragment: compile_module(
                device,
                "Chroma Key Fragment Shader",
                CHROMA_KEY_FRAGMENT_SHADER,
            )?,
            backdrop_fragment: compile_module(
                device,
                "Backdrop Fragment Shader",
                BACKDROP_FRAGMENT_SHADER,
            )?,
        })
    }
}

/// Runs a WGSL source through naga before handing it to the device, so a bad
/// shader fails here with a readable error instead of a device loss later.
fn compile_module(device: &wgpu::Device, label: &str, source: &str) -> Result<wgpu::ShaderModule> {
    validate_wgsl(label, source)?;
    Ok(device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(source)),
    }))
}

fn validate_wgsl(label: &str, source: &str) -> Result<()> {
    let module = naga::front::wgsl::parse_str(source)
        .map_err(|e| anyhow!("WGSL parse error in {}: {}", label, e.emit_to_string(source)))?;
    let mut validator = Validator::new(ValidationFlags::all(), Capabilities::all());
    validator
        .validate(&module)
        .map_err(|e| anyhow!("Shader validation error in {}: {:?}", label, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_shaders_are_valid_wgsl() {
        validate_wgsl("vertex", BILLBOARD_VERTEX_SHADER).unwrap();
        validate_wgsl("chroma key", CHROMA_KEY_FRAGMENT_SHADER).unwrap();
        validate_wgsl("backdrop", BACKDROP_FRAGMENT_SHADER).unwrap();
    }

    #[test]
    fn chroma_fragment_pins_the_transform_constants() {
        // The WGSL must carry the exact constants of the CPU reference.
        for needle in ["0.2989", "0.5866", "0.1145", "0.7132", "0.5647"] {
            assert!(
                CHROMA_KEY_FRAGMENT_SHADER.contains(needle),
                "missing constant {needle}"
            );
        }
        assert!(CHROMA_KEY_FRAGMENT_SHADER.contains("vec2<f32>(1.0, 1.0)"));
    }

    #[test]
    fn vertex_and_fragment_interfaces_line_up() {
        // Both fragment shaders consume the vertex stage's @location(0) uv.
        assert!(BILLBOARD_VERTEX_SHADER.contains("@location(0) uv"));
        assert!(CHROMA_KEY_FRAGMENT_SHADER.contains("@location(0) uv"));
        assert!(BACKDROP_FRAGMENT_SHADER.contains("@location(0) uv"));
    }
}
