//! Skinned Blinn-Phong shader shared by both renderers
//!
//! wgpu consumes the WGSL directly; the Vulkan renderer compiles it to
//! SPIR-V with naga. Bindings follow [`ConstantSlot`] and [`TextureSlot`].
//!
//! [`ConstantSlot`]: crate::backend::ConstantSlot
//! [`TextureSlot`]: crate::backend::TextureSlot

use crate::backend::types::ShaderDescriptor;
use crate::resources::Vertex;

pub const VERTEX_ENTRY: &str = "vs_main";
pub const FRAGMENT_ENTRY: &str = "fs_main";

/// Size of the bone palette array in the shader
pub const MAX_BONES: usize = 96;

pub const MODEL_SHADER: &str = r#"
struct FrameUniforms {
    world: mat4x4<f32>,
    view: mat4x4<f32>,
    projection: mat4x4<f32>,
    inverse_world: mat4x4<f32>,
    camera_position: vec4<f32>,
    light_direction: vec4<f32>,
    // x: diffuse, y: ambient, z: specular, w: specular power
    light_terms: vec4<f32>,
    // x: palette size, 0 disables skinning
    options: vec4<u32>,
}

struct BoneUniforms {
    palette: array<mat4x4<f32>, 96>,
}

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) colour: vec4<f32>,
    @location(2) uv: vec2<f32>,
    @location(3) normal: vec3<f32>,
    @location(4) tangent: vec3<f32>,
    @location(5) bitangent: vec3<f32>,
    @location(6) weights: vec4<f32>,
    @location(7) bones: vec4<u32>,
}

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) world_position: vec3<f32>,
    @location(1) colour: vec4<f32>,
    @location(2) uv: vec2<f32>,
    @location(3) normal: vec3<f32>,
    @location(4) tangent: vec3<f32>,
    @location(5) bitangent: vec3<f32>,
}

@group(0) @binding(0) var<uniform> frame: FrameUniforms;
@group(0) @binding(1) var<uniform> bones: BoneUniforms;

@group(1) @binding(0) var diffuse_map: texture_2d<f32>;
@group(1) @binding(1) var normal_map: texture_2d<f32>;
@group(1) @binding(2) var material_sampler: sampler;

fn bone(index: u32) -> mat4x4<f32> {
    return bones.palette[min(index, frame.options.x - 1u)];
}

// Weighted palette blend; weight missing from the four slots stays in bind pose
fn skin_matrix(input: VertexInput) -> mat4x4<f32> {
    let identity = mat4x4<f32>(
        vec4<f32>(1.0, 0.0, 0.0, 0.0),
        vec4<f32>(0.0, 1.0, 0.0, 0.0),
        vec4<f32>(0.0, 0.0, 1.0, 0.0),
        vec4<f32>(0.0, 0.0, 0.0, 1.0),
    );
    if (frame.options.x == 0u) {
        return identity;
    }
    let w = input.weights;
    let rest = max(1.0 - (w.x + w.y + w.z + w.w), 0.0);
    return bone(input.bones.x) * w.x
        + bone(input.bones.y) * w.y
        + bone(input.bones.z) * w.z
        + bone(input.bones.w) * w.w
        + identity * rest;
}

@vertex
fn vs_main(input: VertexInput) -> VertexOutput {
    let skin = skin_matrix(input);
    let local_position = skin * vec4<f32>(input.position, 1.0);
    let world_position = frame.world * local_position;

    var output: VertexOutput;
    output.clip_position = frame.projection * frame.view * world_position;
    output.world_position = world_position.xyz;
    output.colour = input.colour;
    output.uv = input.uv;
    // Row-vector product applies the inverse transpose
    output.normal = (vec4<f32>((skin * vec4<f32>(input.normal, 0.0)).xyz, 0.0) * frame.inverse_world).xyz;
    output.tangent = (frame.world * skin * vec4<f32>(input.tangent, 0.0)).xyz;
    output.bitangent = (frame.world * skin * vec4<f32>(input.bitangent, 0.0)).xyz;
    return output;
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let albedo = textureSample(diffuse_map, material_sampler, input.uv) * input.colour;

    let sampled = textureSample(normal_map, material_sampler, input.uv).xyz * 2.0 - 1.0;
    var n = normalize(input.normal);
    if (length(input.tangent) * length(input.bitangent) > 0.0) {
        let tbn = mat3x3<f32>(normalize(input.tangent), normalize(input.bitangent), n);
        n = normalize(tbn * sampled);
    }

    let terms = frame.light_terms;
    let to_light = normalize(-frame.light_direction.xyz);
    let to_eye = normalize(frame.camera_position.xyz - input.world_position);
    let halfway = normalize(to_light + to_eye);

    let diffuse = max(dot(n, to_light), 0.0) * terms.x;
    let specular = pow(max(dot(n, halfway), 0.0), terms.w) * terms.z;
    let lit = albedo.rgb * (terms.y + diffuse) + vec3<f32>(specular);
    return vec4<f32>(min(lit, vec3<f32>(1.0)), albedo.a);
}
"#;

/// Descriptor for [`MODEL_SHADER`] with the [`Vertex`] input layout
pub fn descriptor() -> ShaderDescriptor {
    ShaderDescriptor {
        label: Some("Model Shader".to_string()),
        source: MODEL_SHADER.to_string(),
        vertex_entry: VERTEX_ENTRY.to_string(),
        fragment_entry: FRAGMENT_ENTRY.to_string(),
        vertex_layout: Vertex::layout(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_matches_vertex_layout() {
        let desc = descriptor();
        assert_eq!(desc.vertex_layout.array_stride, 104);
        for attribute in &desc.vertex_layout.attributes {
            let needle = format!("@location({})", attribute.location);
            assert!(desc.source.contains(&needle), "missing {}", needle);
        }
    }

    #[test]
    fn test_palette_size_matches_shader() {
        assert!(MODEL_SHADER.contains(&format!("array<mat4x4<f32>, {}>", MAX_BONES)));
    }
}
