//! Descriptor layouts and graphics pipeline creation

use super::swapchain::sample_count_flags;
use crate::backend::traits::{RendererError, RendererResult};
use crate::backend::types::*;
use ash::vk;
use std::ffi::CString;

/// Draws a per-frame descriptor pool has room for
pub(super) const MAX_DRAWS_PER_FRAME: u32 = 256;

/// Set 0 holds the uniform buffers, set 1 the textures and their sampler
pub(super) fn create_set_layouts(
    device: &ash::Device,
) -> RendererResult<[vk::DescriptorSetLayout; 2]> {
    let constants = [
        vk::DescriptorSetLayoutBinding::default()
            .binding(ConstantSlot::Frame.binding())
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT),
        vk::DescriptorSetLayoutBinding::default()
            .binding(ConstantSlot::Bones.binding())
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::VERTEX),
    ];
    let textures = [
        vk::DescriptorSetLayoutBinding::default()
            .binding(TextureSlot::Diffuse.binding())
            .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT),
        vk::DescriptorSetLayoutBinding::default()
            .binding(TextureSlot::Normal.binding())
            .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT),
        vk::DescriptorSetLayoutBinding::default()
            .binding(SAMPLER_BINDING)
            .descriptor_type(vk::DescriptorType::SAMPLER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT),
    ];

    let err = |e: vk::Result| RendererError::PipelineCreationFailed(e.to_string());
    unsafe {
        let constants_layout = device
            .create_descriptor_set_layout(
                &vk::DescriptorSetLayoutCreateInfo::default().bindings(&constants),
                None,
            )
            .map_err(err)?;
        match device.create_descriptor_set_layout(
            &vk::DescriptorSetLayoutCreateInfo::default().bindings(&textures),
            None,
        ) {
            Ok(textures_layout) => Ok([constants_layout, textures_layout]),
            Err(e) => {
                device.destroy_descriptor_set_layout(constants_layout, None);
                Err(err(e))
            }
        }
    }
}

pub(super) fn create_descriptor_pool(device: &ash::Device) -> RendererResult<vk::DescriptorPool> {
    let pool_sizes = [
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: 2 * MAX_DRAWS_PER_FRAME,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::SAMPLED_IMAGE,
            descriptor_count: 2 * MAX_DRAWS_PER_FRAME,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::SAMPLER,
            descriptor_count: MAX_DRAWS_PER_FRAME,
        },
    ];
    let pool_info = vk::DescriptorPoolCreateInfo::default()
        .pool_sizes(&pool_sizes)
        .max_sets(2 * MAX_DRAWS_PER_FRAME);

    unsafe {
        device
            .create_descriptor_pool(&pool_info, None)
            .map_err(|e| RendererError::PipelineCreationFailed(e.to_string()))
    }
}

fn convert_vertex_format(format: VertexFormat) -> vk::Format {
    match format {
        VertexFormat::Float32x2 => vk::Format::R32G32_SFLOAT,
        VertexFormat::Float32x3 => vk::Format::R32G32B32_SFLOAT,
        VertexFormat::Float32x4 => vk::Format::R32G32B32A32_SFLOAT,
        VertexFormat::Uint32x4 => vk::Format::R32G32B32A32_UINT,
    }
}

fn convert_topology(topology: PrimitiveTopology) -> vk::PrimitiveTopology {
    match topology {
        PrimitiveTopology::PointList => vk::PrimitiveTopology::POINT_LIST,
        PrimitiveTopology::LineList => vk::PrimitiveTopology::LINE_LIST,
        PrimitiveTopology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
        PrimitiveTopology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
    }
}

/// Compiled shader modules of one program
pub(super) struct VkShader {
    pub vertex: vk::ShaderModule,
    pub fragment: vk::ShaderModule,
    pub vertex_entry: CString,
    pub fragment_entry: CString,
    pub vertex_layout: VertexBufferLayout,
}

/// Fixed-function state a pipeline is specialized for
pub(super) struct PipelineState {
    pub render_pass: vk::RenderPass,
    pub layout: vk::PipelineLayout,
    pub samples: u32,
    pub wireframe: bool,
    pub topology: PrimitiveTopology,
}

pub(super) fn create_graphics_pipeline(
    device: &ash::Device,
    shader: &VkShader,
    state: &PipelineState,
) -> RendererResult<vk::Pipeline> {
    let shader_stages = [
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(shader.vertex)
            .name(&shader.vertex_entry),
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(shader.fragment)
            .name(&shader.fragment_entry),
    ];

    let binding_descriptions = [vk::VertexInputBindingDescription::default()
        .binding(0)
        .stride(shader.vertex_layout.array_stride as u32)
        .input_rate(vk::VertexInputRate::VERTEX)];

    let attribute_descriptions: Vec<vk::VertexInputAttributeDescription> = shader
        .vertex_layout
        .attributes
        .iter()
        .map(|attr| {
            vk::VertexInputAttributeDescription::default()
                .location(attr.location)
                .binding(0)
                .format(convert_vertex_format(attr.format))
                .offset(attr.offset as u32)
        })
        .collect();

    let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&binding_descriptions)
        .vertex_attribute_descriptions(&attribute_descriptions);

    let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(convert_topology(state.topology))
        .primitive_restart_enable(false);

    // Dynamic viewport and scissor
    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);

    // Winding is reversed by the negative viewport height
    let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(if state.wireframe {
            vk::PolygonMode::LINE
        } else {
            vk::PolygonMode::FILL
        })
        .line_width(1.0)
        .cull_mode(vk::CullModeFlags::NONE)
        .front_face(vk::FrontFace::CLOCKWISE)
        .depth_bias_enable(false);

    let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
        .sample_shading_enable(false)
        .rasterization_samples(sample_count_flags(state.samples));

    let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(true)
        .depth_write_enable(true)
        .depth_compare_op(vk::CompareOp::LESS)
        .depth_bounds_test_enable(false)
        .stencil_test_enable(false);

    let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .blend_enable(false)];

    let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
        .logic_op_enable(false)
        .attachments(&color_blend_attachments);

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&shader_stages)
        .vertex_input_state(&vertex_input_state)
        .input_assembly_state(&input_assembly_state)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization_state)
        .multisample_state(&multisample_state)
        .depth_stencil_state(&depth_stencil_state)
        .color_blend_state(&color_blend_state)
        .dynamic_state(&dynamic_state)
        .layout(state.layout)
        .render_pass(state.render_pass)
        .subpass(0);

    let pipelines = unsafe {
        device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
    }
    .map_err(|(_, e)| {
        RendererError::PipelineCreationFailed(format!("Failed to create graphics pipeline: {:?}", e))
    })?;

    Ok(pipelines[0])
}

pub(super) fn create_shader_module(
    device: &ash::Device,
    code: &[u32],
) -> RendererResult<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::default().code(code);
    unsafe { device.create_shader_module(&create_info, None) }.map_err(|e| {
        RendererError::ShaderCreationFailed(format!("Failed to create shader module: {:?}", e))
    })
}
