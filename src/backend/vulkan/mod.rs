//! Vulkan renderer implementation using ash
//!
//! Draw calls are recorded straight into one primary command buffer between
//! `clear` and `present`, with a single frame in flight. WGSL programs are
//! compiled to SPIR-V through naga and memory comes from gpu-allocator.

mod memory;
mod pipeline;
mod shader;
mod swapchain;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::resources::{TextureData, Vertex};
use crate::BackendType;
use ash::khr::{surface, swapchain as khr_swapchain};
use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use gpu_allocator::MemoryLocation;
use memory::{create_buffer, create_image, submit_immediate, transition_image, ImageDesc, VkBuffer, VkImage};
use parking_lot::Mutex;
use pipeline::{PipelineState, VkShader};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::collections::HashMap;
use std::ffi::CString;
use std::sync::Arc;
use swapchain::{FrameTargets, SurfaceContext, Swapchain};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PipelineKey {
    shader: u64,
    samples: u32,
    wireframe: bool,
    topology: PrimitiveTopology,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SetKey {
    /// Frame and bone uniform buffers
    Constants(u64, u64),
    /// Diffuse and normal textures
    Textures(u64, u64),
}

#[derive(Default)]
struct BoundState {
    shader: Option<u64>,
    vertex_buffer: Option<u64>,
    index_buffer: Option<u64>,
    constants: [Option<u64>; ConstantSlot::COUNT],
    textures: [Option<u64>; TextureSlot::COUNT],
    topology: PrimitiveTopology,
}

/// What the selected physical device can do
struct Capabilities {
    msaa_levels: Vec<u32>,
    max_anisotropy: u32,
    wireframe: bool,
    bc_compression: bool,
    max_uniform_range: u64,
}

/// Vulkan renderer
pub struct VulkanRenderer {
    _entry: ash::Entry,
    instance: ash::Instance,
    surface_fn: surface::Instance,
    swapchain_fn: khr_swapchain::Device,
    surface: vk::SurfaceKHR,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    graphics_queue: vk::Queue,
    graphics_queue_family: u32,
    allocator: Option<Arc<Mutex<Allocator>>>,
    info: DeviceInfo,
    caps: Capabilities,

    // Swapchain and attachments
    swapchain: Swapchain,
    render_pass: vk::RenderPass,
    targets: Option<FrameTargets>,
    requested_size: (u32, u32),
    msaa_level: u32,
    vsync: bool,

    // Raster and sampler state
    wireframe: bool,
    anisotropy: u32,
    sampler: vk::Sampler,

    // Binding model
    set_layouts: [vk::DescriptorSetLayout; 2],
    pipeline_layout: vk::PipelineLayout,
    descriptor_pool: vk::DescriptorPool,
    frame_sets: HashMap<SetKey, vk::DescriptorSet>,

    // Synchronization
    image_available_semaphore: vk::Semaphore,
    in_flight_fence: vk::Fence,

    // Command pool and buffer
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    /// Swapchain image being recorded, `None` outside `clear`..`present`
    current_image: Option<u32>,

    // Resource storage
    buffers: HashMap<u64, VkBuffer>,
    textures: HashMap<u64, VkImage>,
    shaders: HashMap<u64, VkShader>,
    pipelines: HashMap<PipelineKey, vk::Pipeline>,
    fallback_textures: [u64; TextureSlot::COUNT],

    // Handle counters
    next_buffer_id: u64,
    next_texture_id: u64,
    next_shader_id: u64,

    bound: BoundState,
    last_pipeline: Option<PipelineKey>,
}

impl VulkanRenderer {
    /// Get the Vulkan instance
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get the physical device
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Get the Vulkan device
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Get the graphics queue
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    pub fn graphics_queue_family(&self) -> u32 {
        self.graphics_queue_family
    }

    /// Get the current command buffer (only valid during frame recording)
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    /// Get the render pass draws are recorded into
    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    fn convert_texture_format(format: TextureFormat) -> vk::Format {
        match format {
            TextureFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
            TextureFormat::Rgba8UnormSrgb => vk::Format::R8G8B8A8_SRGB,
            TextureFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
            TextureFormat::Bgra8UnormSrgb => vk::Format::B8G8R8A8_SRGB,
            TextureFormat::Depth32Float => vk::Format::D32_SFLOAT,
            TextureFormat::Bc1RgbaUnorm => vk::Format::BC1_RGBA_UNORM_BLOCK,
            TextureFormat::Bc2RgbaUnorm => vk::Format::BC2_UNORM_BLOCK,
            TextureFormat::Bc3RgbaUnorm => vk::Format::BC3_UNORM_BLOCK,
            TextureFormat::Bc4RUnorm => vk::Format::BC4_UNORM_BLOCK,
            TextureFormat::Bc5RgUnorm => vk::Format::BC5_UNORM_BLOCK,
            TextureFormat::Bc7RgbaUnorm => vk::Format::BC7_UNORM_BLOCK,
        }
    }

    fn find_queue_family(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        surface_fn: &surface::Instance,
        surface: vk::SurfaceKHR,
    ) -> Option<u32> {
        let queue_families =
            unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

        for (index, family) in queue_families.iter().enumerate() {
            let supports_graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
            let supports_surface = unsafe {
                surface_fn
                    .get_physical_device_surface_support(physical_device, index as u32, surface)
                    .unwrap_or(false)
            };

            if supports_graphics && supports_surface {
                return Some(index as u32);
            }
        }
        None
    }

    fn supports_swapchain(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> bool {
        let extensions =
            unsafe { instance.enumerate_device_extension_properties(physical_device) };
        extensions.map_or(false, |extensions| {
            extensions
                .iter()
                .any(|ext| ext.extension_name_as_c_str() == Ok(khr_swapchain::NAME))
        })
    }

    /// Discrete GPUs first, then integrated, then anything else
    fn device_rank(device_type: vk::PhysicalDeviceType) -> u32 {
        match device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => 0,
            vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
            vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
            _ => 3,
        }
    }

    fn allocator(&self) -> RendererResult<Arc<Mutex<Allocator>>> {
        self.allocator.clone().ok_or(RendererError::DeviceLost)
    }

    fn surface_context(&self) -> SurfaceContext<'_> {
        SurfaceContext {
            device: &self.device,
            surface_fn: &self.surface_fn,
            swapchain_fn: &self.swapchain_fn,
            physical_device: self.physical_device,
            surface: self.surface,
        }
    }

    fn map_vk_error(e: vk::Result, context: fn(String) -> RendererError) -> RendererError {
        match e {
            vk::Result::ERROR_DEVICE_LOST => RendererError::DeviceLost,
            vk::Result::ERROR_SURFACE_LOST_KHR => RendererError::SurfaceLost,
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
                RendererError::OutOfMemory
            }
            e => context(e.to_string()),
        }
    }
}

impl VulkanRenderer {
    /// Create a renderer presenting to `window`
    pub fn create(
        window: Arc<winit::window::Window>,
        settings: &RendererSettings,
    ) -> RendererResult<Self> {
        unsafe {
            let entry = ash::Entry::load()
                .map_err(|e| RendererError::InitializationFailed(e.to_string()))?;

            let app_info = vk::ApplicationInfo::default()
                .application_name(c"Model Viewer")
                .application_version(vk::make_api_version(0, 1, 0, 0))
                .engine_name(c"Model Viewer")
                .engine_version(vk::make_api_version(0, 1, 0, 0))
                .api_version(vk::API_VERSION_1_2);

            let display_handle = window
                .display_handle()
                .map_err(|e| RendererError::InitializationFailed(e.to_string()))?;
            let window_handle = window
                .window_handle()
                .map_err(|e| RendererError::InitializationFailed(e.to_string()))?;

            let extensions = ash_window::enumerate_required_extensions(display_handle.as_raw())
                .map_err(|e| RendererError::InitializationFailed(e.to_string()))?;

            let instance_info = vk::InstanceCreateInfo::default()
                .application_info(&app_info)
                .enabled_extension_names(extensions);

            let instance = entry
                .create_instance(&instance_info, None)
                .map_err(|e| RendererError::InitializationFailed(e.to_string()))?;

            // Create surface
            let surface_fn = surface::Instance::new(&entry, &instance);
            let surface = match ash_window::create_surface(
                &entry,
                &instance,
                display_handle.as_raw(),
                window_handle.as_raw(),
                None,
            ) {
                Ok(surface) => surface,
                Err(e) => {
                    instance.destroy_instance(None);
                    return Err(RendererError::SurfaceCreationFailed(e.to_string()));
                }
            };

            let destroy_early = |e: RendererError| {
                surface_fn.destroy_surface(surface, None);
                instance.destroy_instance(None);
                e
            };

            // Select physical device
            let physical_devices = instance
                .enumerate_physical_devices()
                .map_err(|e| destroy_early(RendererError::InitializationFailed(e.to_string())))?;

            let selected = physical_devices
                .into_iter()
                .filter(|&pd| Self::supports_swapchain(&instance, pd))
                .filter_map(|pd| {
                    Self::find_queue_family(&instance, pd, &surface_fn, surface).map(|q| (pd, q))
                })
                .min_by_key(|&(pd, _)| {
                    Self::device_rank(instance.get_physical_device_properties(pd).device_type)
                });
            let Some((physical_device, graphics_queue_family)) = selected else {
                return Err(destroy_early(RendererError::InitializationFailed(
                    "No suitable physical device".into(),
                )));
            };

            let properties = instance.get_physical_device_properties(physical_device);
            let supported = instance.get_physical_device_features(physical_device);
            let memory_properties = instance.get_physical_device_memory_properties(physical_device);

            let name = properties
                .device_name_as_c_str()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "Unknown Vulkan device".to_string());
            log::info!("Selected GPU: {} (Vulkan backend)", name);

            let dedicated_video_memory: u64 = memory_properties
                .memory_heaps_as_slice()
                .iter()
                .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
                .map(|heap| heap.size)
                .sum();

            let limits = properties.limits;
            let sampler_anisotropy = supported.sampler_anisotropy == vk::TRUE;
            let caps = Capabilities {
                msaa_levels: filter_msaa_levels(swapchain::msaa_levels_from_flags(
                    limits.framebuffer_color_sample_counts & limits.framebuffer_depth_sample_counts,
                )),
                max_anisotropy: if sampler_anisotropy {
                    (limits.max_sampler_anisotropy as u32).clamp(1, MAX_ANISOTROPY)
                } else {
                    1
                },
                wireframe: supported.fill_mode_non_solid == vk::TRUE,
                bc_compression: supported.texture_compression_bc == vk::TRUE,
                max_uniform_range: limits.max_uniform_buffer_range as u64,
            };
            log::info!("Supported MSAA levels: {:?}", caps.msaa_levels);

            // Create logical device
            let queue_priorities = [1.0f32];
            let queue_info = vk::DeviceQueueCreateInfo::default()
                .queue_family_index(graphics_queue_family)
                .queue_priorities(&queue_priorities);

            let device_extensions = [khr_swapchain::NAME.as_ptr()];
            let device_features = vk::PhysicalDeviceFeatures::default()
                .fill_mode_non_solid(caps.wireframe)
                .sampler_anisotropy(sampler_anisotropy)
                .texture_compression_bc(caps.bc_compression);

            let device_info = vk::DeviceCreateInfo::default()
                .queue_create_infos(std::slice::from_ref(&queue_info))
                .enabled_extension_names(&device_extensions)
                .enabled_features(&device_features);

            let device = instance
                .create_device(physical_device, &device_info, None)
                .map_err(|e| destroy_early(RendererError::DeviceCreationFailed(e.to_string())))?;

            let graphics_queue = device.get_device_queue(graphics_queue_family, 0);

            // Create allocator
            let allocator = match Allocator::new(&AllocatorCreateDesc {
                instance: instance.clone(),
                device: device.clone(),
                physical_device,
                debug_settings: Default::default(),
                buffer_device_address: false,
                allocation_sizes: Default::default(),
            }) {
                Ok(allocator) => allocator,
                Err(e) => {
                    device.destroy_device(None);
                    return Err(destroy_early(RendererError::InitializationFailed(
                        e.to_string(),
                    )));
                }
            };

            let swapchain_fn = khr_swapchain::Device::new(&instance, &device);
            let size = window.inner_size();

            // From here on, Drop cleans up whatever was created
            let mut renderer = Self {
                _entry: entry,
                instance,
                surface_fn,
                swapchain_fn,
                surface,
                physical_device,
                device,
                graphics_queue,
                graphics_queue_family,
                allocator: Some(Arc::new(Mutex::new(allocator))),
                info: DeviceInfo {
                    name,
                    backend: BackendType::Vulkan,
                    dedicated_video_memory: Some(dedicated_video_memory),
                },
                caps,
                swapchain: Swapchain::default(),
                render_pass: vk::RenderPass::null(),
                targets: None,
                requested_size: (size.width.max(1), size.height.max(1)),
                msaa_level: 0,
                vsync: settings.vsync,
                wireframe: false,
                anisotropy: 1,
                sampler: vk::Sampler::null(),
                set_layouts: [vk::DescriptorSetLayout::null(); 2],
                pipeline_layout: vk::PipelineLayout::null(),
                descriptor_pool: vk::DescriptorPool::null(),
                frame_sets: HashMap::new(),
                image_available_semaphore: vk::Semaphore::null(),
                in_flight_fence: vk::Fence::null(),
                command_pool: vk::CommandPool::null(),
                command_buffer: vk::CommandBuffer::null(),
                current_image: None,
                buffers: HashMap::new(),
                textures: HashMap::new(),
                shaders: HashMap::new(),
                pipelines: HashMap::new(),
                fallback_textures: [0; TextureSlot::COUNT],
                next_buffer_id: 1,
                next_texture_id: 1,
                next_shader_id: 1,
                bound: BoundState::default(),
                last_pipeline: None,
            };

            renderer.init(settings)?;
            Ok(renderer)
        }
    }

    fn init(&mut self, settings: &RendererSettings) -> RendererResult<()> {
        let init_err = |e: vk::Result| RendererError::InitializationFailed(e.to_string());
        unsafe {
            let pool_info = vk::CommandPoolCreateInfo::default()
                .queue_family_index(self.graphics_queue_family)
                .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
            self.command_pool = self
                .device
                .create_command_pool(&pool_info, None)
                .map_err(init_err)?;

            let alloc_info = vk::CommandBufferAllocateInfo::default()
                .command_pool(self.command_pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);
            self.command_buffer = self
                .device
                .allocate_command_buffers(&alloc_info)
                .map_err(init_err)?[0];

            self.image_available_semaphore = self
                .device
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
                .map_err(init_err)?;
            self.in_flight_fence = self
                .device
                .create_fence(
                    &vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED),
                    None,
                )
                .map_err(init_err)?;

            self.set_layouts = pipeline::create_set_layouts(&self.device)?;
            self.pipeline_layout = self
                .device
                .create_pipeline_layout(
                    &vk::PipelineLayoutCreateInfo::default().set_layouts(&self.set_layouts),
                    None,
                )
                .map_err(|e| RendererError::PipelineCreationFailed(e.to_string()))?;
            self.descriptor_pool = pipeline::create_descriptor_pool(&self.device)?;
        }

        self.anisotropy = settings.anisotropy.clamp(1, self.caps.max_anisotropy);
        self.sampler = self.create_sampler(self.anisotropy)?;
        self.toggle_wireframe(settings.wireframe);

        self.msaa_level = resolve_msaa_level(settings.msaa_level, &self.caps.msaa_levels)?
            .unwrap_or(0);
        self.recreate_swapchain()?;

        for slot in [TextureSlot::Diffuse, TextureSlot::Normal] {
            let id = self.upload(&TextureData::fallback(slot))?;
            self.fallback_textures[slot.index()] = id;
        }
        Ok(())
    }

    fn create_sampler(&self, anisotropy: u32) -> RendererResult<vk::Sampler> {
        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(anisotropy > 1)
            .max_anisotropy(anisotropy as f32)
            .compare_enable(false)
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE)
            .border_color(vk::BorderColor::FLOAT_OPAQUE_BLACK);

        unsafe {
            self.device
                .create_sampler(&sampler_info, None)
                .map_err(|e| RendererError::TextureCreationFailed(e.to_string()))
        }
    }

    /// Submit any frame being recorded and wait until the GPU is idle, so
    /// resources can be destroyed or rebuilt.
    fn retire_frame(&mut self) -> RendererResult<()> {
        if self.current_image.is_some() {
            self.present()?;
        }
        unsafe {
            self.device
                .device_wait_idle()
                .map_err(|e| Self::map_vk_error(e, RendererError::InitializationFailed))
        }
    }

    fn destroy_pipelines(&mut self) {
        for (_, pipeline) in self.pipelines.drain() {
            unsafe { self.device.destroy_pipeline(pipeline, None) };
        }
        self.last_pipeline = None;
    }

    /// Rebuild swapchain, render pass and attachments at `requested_size`
    fn recreate_swapchain(&mut self) -> RendererResult<()> {
        let allocator = self.allocator()?;
        unsafe {
            let _ = self.device.device_wait_idle();
        }
        if let Some(targets) = self.targets.take() {
            unsafe { targets.destroy(&self.device, &allocator) };
        }

        let mut old = std::mem::take(&mut self.swapchain);
        let (width, height) = self.requested_size;
        let created = Swapchain::create(&self.surface_context(), width, height, self.vsync, old.handle);
        unsafe { old.destroy(&self.device, &self.swapchain_fn) };
        self.swapchain = created?;

        if self.render_pass == vk::RenderPass::null() || old.format != self.swapchain.format {
            self.invalidate_render_pass();
            self.render_pass = swapchain::create_render_pass(
                &self.device,
                self.swapchain.format,
                self.msaa_level.max(1),
            )?;
        }

        self.targets = Some(FrameTargets::create(
            &self.device,
            &allocator,
            &self.swapchain,
            self.render_pass,
            self.msaa_level.max(1),
        )?);
        Ok(())
    }

    /// Drop the render pass and every pipeline built against it
    fn invalidate_render_pass(&mut self) {
        self.destroy_pipelines();
        if self.render_pass != vk::RenderPass::null() {
            unsafe { self.device.destroy_render_pass(self.render_pass, None) };
            self.render_pass = vk::RenderPass::null();
        }
    }

    /// Copy `data` into a new device local buffer
    fn upload_buffer(&mut self, name: &str, data: &[u8], usage: vk::BufferUsageFlags) -> RendererResult<u64> {
        let allocator = self.allocator()?;
        let size = data.len() as u64;
        let mut staging = create_buffer(
            &self.device,
            &allocator,
            "staging buffer",
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
        )?;
        staging.write(data);

        let buffer = match create_buffer(
            &self.device,
            &allocator,
            name,
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuOnly,
        ) {
            Ok(buffer) => buffer,
            Err(e) => {
                unsafe { staging.destroy(&self.device, &allocator) };
                return Err(e);
            }
        };

        let (src, dst) = (staging.buffer, buffer.buffer);
        let copied = submit_immediate(&self.device, self.command_pool, self.graphics_queue, |cmd| unsafe {
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size,
            };
            self.device.cmd_copy_buffer(cmd, src, dst, &[region]);
        });
        unsafe { staging.destroy(&self.device, &allocator) };
        if let Err(e) = copied {
            unsafe { buffer.destroy(&self.device, &allocator) };
            return Err(e);
        }

        let id = self.next_buffer_id;
        self.next_buffer_id += 1;
        self.buffers.insert(id, buffer);
        Ok(id)
    }

    fn upload(&mut self, data: &TextureData) -> RendererResult<u64> {
        data.validate()
            .map_err(|e| RendererError::TextureCreationFailed(e.to_string()))?;
        let (width, height) = (data.width(), data.height());
        if data.format.is_compressed() && !self.caps.bc_compression {
            return Err(RendererError::UnsupportedFeature(format!(
                "'{}' uses {:?}, BC compression is not supported by this device",
                data.name, data.format
            )));
        }

        let format = Self::convert_texture_format(data.format);
        let format_properties = unsafe {
            self.instance
                .get_physical_device_format_properties(self.physical_device, format)
        };
        if !format_properties
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::SAMPLED_IMAGE)
        {
            return Err(RendererError::UnsupportedFeature(format!(
                "{:?} cannot be sampled on this device",
                data.format
            )));
        }

        // Pack every mip into one staging buffer
        let mut staged = Vec::new();
        let mut regions = Vec::with_capacity(data.mips.len());
        for (level, mip) in data.mips.iter().enumerate() {
            regions.push(
                vk::BufferImageCopy::default()
                    .buffer_offset(staged.len() as u64)
                    .image_subresource(
                        vk::ImageSubresourceLayers::default()
                            .aspect_mask(vk::ImageAspectFlags::COLOR)
                            .mip_level(level as u32)
                            .base_array_layer(0)
                            .layer_count(1),
                    )
                    .image_extent(vk::Extent3D {
                        width: mip.width,
                        height: mip.height,
                        depth: 1,
                    }),
            );
            staged.extend_from_slice(&mip.data);
        }

        let allocator = self.allocator()?;
        let mut staging = create_buffer(
            &self.device,
            &allocator,
            "texture staging buffer",
            staged.len() as u64,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
        )?;
        staging.write(&staged);

        let mip_levels = data.mip_level_count();
        let image = match create_image(
            &self.device,
            &allocator,
            &ImageDesc {
                name: &data.name,
                width,
                height,
                mip_levels,
                samples: vk::SampleCountFlags::TYPE_1,
                format,
                usage: vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
                aspect: vk::ImageAspectFlags::COLOR,
            },
        ) {
            Ok(image) => image,
            Err(e) => {
                unsafe { staging.destroy(&self.device, &allocator) };
                return Err(e);
            }
        };

        let (src, dst) = (staging.buffer, image.image);
        let copied = submit_immediate(&self.device, self.command_pool, self.graphics_queue, |cmd| {
            transition_image(
                &self.device,
                cmd,
                dst,
                mip_levels,
                (
                    vk::ImageLayout::UNDEFINED,
                    vk::AccessFlags::empty(),
                    vk::PipelineStageFlags::TOP_OF_PIPE,
                ),
                (
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::AccessFlags::TRANSFER_WRITE,
                    vk::PipelineStageFlags::TRANSFER,
                ),
            );
            unsafe {
                self.device.cmd_copy_buffer_to_image(
                    cmd,
                    src,
                    dst,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &regions,
                );
            }
            transition_image(
                &self.device,
                cmd,
                dst,
                mip_levels,
                (
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::AccessFlags::TRANSFER_WRITE,
                    vk::PipelineStageFlags::TRANSFER,
                ),
                (
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    vk::AccessFlags::SHADER_READ,
                    vk::PipelineStageFlags::FRAGMENT_SHADER,
                ),
            );
        });
        unsafe { staging.destroy(&self.device, &allocator) };
        if let Err(e) = copied {
            unsafe { image.destroy(&self.device, &allocator) };
            return Err(e);
        }

        let id = self.next_texture_id;
        self.next_texture_id += 1;
        self.textures.insert(id, image);

        log::debug!(
            "Created texture '{}' {}x{} {:?}, {} mip level(s)",
            data.name,
            width,
            height,
            data.format,
            mip_levels
        );
        Ok(id)
    }

    fn ensure_pipeline(&mut self, key: PipelineKey) -> RendererResult<vk::Pipeline> {
        if let Some(&pipeline) = self.pipelines.get(&key) {
            return Ok(pipeline);
        }
        let shader = self
            .shaders
            .get(&key.shader)
            .ok_or_else(|| RendererError::PipelineCreationFailed("shader was released".into()))?;
        let pipeline = pipeline::create_graphics_pipeline(
            &self.device,
            shader,
            &PipelineState {
                render_pass: self.render_pass,
                layout: self.pipeline_layout,
                samples: key.samples,
                wireframe: key.wireframe,
                topology: key.topology,
            },
        )?;
        log::debug!("Created pipeline {:?}", key);
        self.pipelines.insert(key, pipeline);
        Ok(pipeline)
    }

    /// Descriptor set for `key`, allocated from this frame's pool on first use
    fn descriptor_set(&mut self, key: SetKey) -> Option<vk::DescriptorSet> {
        if let Some(&set) = self.frame_sets.get(&key) {
            return Some(set);
        }
        let layout_index = match key {
            SetKey::Constants(..) => 0,
            SetKey::Textures(..) => 1,
        };
        let layouts = [self.set_layouts[layout_index]];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.descriptor_pool)
            .set_layouts(&layouts);
        let set = match unsafe { self.device.allocate_descriptor_sets(&alloc_info) } {
            Ok(sets) => sets[0],
            Err(e) => {
                log::warn!("Descriptor pool exhausted ({}), draw skipped", e);
                return None;
            }
        };

        match key {
            SetKey::Constants(frame, bones) => {
                let frame = self.buffers.get(&frame)?;
                let bones = self.buffers.get(&bones)?;
                let frame_info = [vk::DescriptorBufferInfo::default()
                    .buffer(frame.buffer)
                    .offset(0)
                    .range(vk::WHOLE_SIZE)];
                let bones_info = [vk::DescriptorBufferInfo::default()
                    .buffer(bones.buffer)
                    .offset(0)
                    .range(vk::WHOLE_SIZE)];
                let writes = [
                    vk::WriteDescriptorSet::default()
                        .dst_set(set)
                        .dst_binding(ConstantSlot::Frame.binding())
                        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                        .buffer_info(&frame_info),
                    vk::WriteDescriptorSet::default()
                        .dst_set(set)
                        .dst_binding(ConstantSlot::Bones.binding())
                        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                        .buffer_info(&bones_info),
                ];
                unsafe { self.device.update_descriptor_sets(&writes, &[]) };
            }
            SetKey::Textures(diffuse, normal) => {
                let diffuse = self.textures.get(&diffuse)?;
                let normal = self.textures.get(&normal)?;
                let image_info = |view| {
                    [vk::DescriptorImageInfo::default()
                        .image_view(view)
                        .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)]
                };
                let diffuse_info = image_info(diffuse.view);
                let normal_info = image_info(normal.view);
                let sampler_info = [vk::DescriptorImageInfo::default().sampler(self.sampler)];
                let writes = [
                    vk::WriteDescriptorSet::default()
                        .dst_set(set)
                        .dst_binding(TextureSlot::Diffuse.binding())
                        .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
                        .image_info(&diffuse_info),
                    vk::WriteDescriptorSet::default()
                        .dst_set(set)
                        .dst_binding(TextureSlot::Normal.binding())
                        .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
                        .image_info(&normal_info),
                    vk::WriteDescriptorSet::default()
                        .dst_set(set)
                        .dst_binding(SAMPLER_BINDING)
                        .descriptor_type(vk::DescriptorType::SAMPLER)
                        .image_info(&sampler_info),
                ];
                unsafe { self.device.update_descriptor_sets(&writes, &[]) };
            }
        }

        self.frame_sets.insert(key, set);
        Some(set)
    }

    fn release_buffer(&mut self, id: u64) {
        if let Err(e) = self.retire_frame() {
            log::warn!("Failed to wait for the GPU before releasing a buffer: {}", e);
        }
        if let (Some(buffer), Some(allocator)) = (self.buffers.remove(&id), self.allocator.clone()) {
            unsafe { buffer.destroy(&self.device, &allocator) };
        }
    }
}

impl Renderer for VulkanRenderer {
    fn api(&self) -> BackendType {
        BackendType::Vulkan
    }

    fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    fn surface_size(&self) -> (u32, u32) {
        if self.targets.is_some() {
            (self.swapchain.extent.width, self.swapchain.extent.height)
        } else {
            self.requested_size
        }
    }

    fn resize(&mut self, width: u32, height: u32) -> RendererResult<()> {
        if width == 0 || height == 0 {
            return Ok(());
        }
        self.retire_frame()?;
        self.requested_size = (width, height);
        self.recreate_swapchain()
    }

    fn clear(&mut self) -> RendererResult<()> {
        if self.current_image.is_some() {
            self.present()?;
        }
        if self.targets.is_none() {
            // Swapchain could not be built last time, e.g. while minimized
            if let Err(e) = self.recreate_swapchain() {
                log::debug!("Skipping frame: {}", e);
                return Ok(());
            }
        }

        unsafe {
            self.device
                .wait_for_fences(&[self.in_flight_fence], true, u64::MAX)
                .map_err(|e| Self::map_vk_error(e, RendererError::AcquireImageFailed))?;

            let image_index = match self.swapchain_fn.acquire_next_image(
                self.swapchain.handle,
                u64::MAX,
                self.image_available_semaphore,
                vk::Fence::null(),
            ) {
                Ok((index, _suboptimal)) => index,
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                    log::warn!("Swapchain out of date, recreating and skipping frame");
                    if let Err(e) = self.recreate_swapchain() {
                        log::debug!("Swapchain recreation deferred: {}", e);
                    }
                    return Ok(());
                }
                Err(e) => return Err(Self::map_vk_error(e, RendererError::AcquireImageFailed)),
            };

            let Some((framebuffer, samples)) = self.targets.as_ref().and_then(|t| {
                t.framebuffers
                    .get(image_index as usize)
                    .map(|&fb| (fb, t.samples))
            }) else {
                return Err(RendererError::AcquireImageFailed(format!(
                    "no framebuffer for swapchain image {}",
                    image_index
                )));
            };

            let frame_err = |e| Self::map_vk_error(e, RendererError::AcquireImageFailed);
            self.device
                .reset_fences(&[self.in_flight_fence])
                .map_err(frame_err)?;
            self.device
                .reset_descriptor_pool(self.descriptor_pool, vk::DescriptorPoolResetFlags::empty())
                .map_err(frame_err)?;
            self.frame_sets.clear();
            self.device
                .reset_command_buffer(self.command_buffer, vk::CommandBufferResetFlags::empty())
                .map_err(frame_err)?;
            self.device
                .begin_command_buffer(self.command_buffer, &vk::CommandBufferBeginInfo::default())
                .map_err(frame_err)?;

            let extent = self.swapchain.extent;
            let color = vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: CLEAR_COLOR,
                },
            };
            let depth = vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: CLEAR_DEPTH,
                    stencil: 0,
                },
            };
            let clear_values = [color, depth, color];
            let attachment_count = if samples > 1 { 3 } else { 2 };

            let render_pass_info = vk::RenderPassBeginInfo::default()
                .render_pass(self.render_pass)
                .framebuffer(framebuffer)
                .render_area(vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent,
                })
                .clear_values(&clear_values[..attachment_count]);
            self.device.cmd_begin_render_pass(
                self.command_buffer,
                &render_pass_info,
                vk::SubpassContents::INLINE,
            );

            // Flip Y so clip space matches wgpu
            let viewport = vk::Viewport {
                x: 0.0,
                y: extent.height as f32,
                width: extent.width as f32,
                height: -(extent.height as f32),
                min_depth: 0.0,
                max_depth: 1.0,
            };
            let scissor = vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            };
            self.device.cmd_set_viewport(self.command_buffer, 0, &[viewport]);
            self.device.cmd_set_scissor(self.command_buffer, 0, &[scissor]);

            self.current_image = Some(image_index);
            self.last_pipeline = None;
        }
        Ok(())
    }

    fn present(&mut self) -> RendererResult<()> {
        let Some(image_index) = self.current_image.take() else {
            return Ok(());
        };

        unsafe {
            let present_err = |e| Self::map_vk_error(e, RendererError::PresentFailed);
            self.device.cmd_end_render_pass(self.command_buffer);
            self.device
                .end_command_buffer(self.command_buffer)
                .map_err(present_err)?;

            let wait_semaphores = [self.image_available_semaphore];
            let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
            let signal_semaphores = [self.swapchain.render_finished[image_index as usize]];
            let command_buffers = [self.command_buffer];

            let submit_info = vk::SubmitInfo::default()
                .wait_semaphores(&wait_semaphores)
                .wait_dst_stage_mask(&wait_stages)
                .command_buffers(&command_buffers)
                .signal_semaphores(&signal_semaphores);

            self.device
                .queue_submit(self.graphics_queue, &[submit_info], self.in_flight_fence)
                .map_err(present_err)?;

            let swapchains = [self.swapchain.handle];
            let image_indices = [image_index];
            let present_info = vk::PresentInfoKHR::default()
                .wait_semaphores(&signal_semaphores)
                .swapchains(&swapchains)
                .image_indices(&image_indices);

            match self.swapchain_fn.queue_present(self.graphics_queue, &present_info) {
                Ok(false) => Ok(()),
                Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                    log::debug!("Swapchain suboptimal or out of date, recreating");
                    if let Err(e) = self.recreate_swapchain() {
                        log::debug!("Swapchain recreation deferred: {}", e);
                    }
                    Ok(())
                }
                Err(e) => Err(present_err(e)),
            }
        }
    }

    fn create_vertex_buffer(&mut self, vertices: &[Vertex]) -> RendererResult<VertexBuffer> {
        if vertices.is_empty() {
            return Err(RendererError::BufferCreationFailed(
                "vertex buffer is empty".into(),
            ));
        }
        let id = self.upload_buffer(
            "vertex buffer",
            bytemuck::cast_slice(vertices),
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )?;
        log::debug!("Created vertex buffer {} ({} vertices)", id, vertices.len());
        Ok(VertexBuffer {
            handle: BufferHandle(id),
            vertex_count: vertices.len() as u32,
        })
    }

    fn create_index_buffer(&mut self, indices: &[u32]) -> RendererResult<IndexBuffer> {
        if indices.is_empty() {
            return Err(RendererError::BufferCreationFailed(
                "index buffer is empty".into(),
            ));
        }
        let id = self.upload_buffer(
            "index buffer",
            bytemuck::cast_slice(indices),
            vk::BufferUsageFlags::INDEX_BUFFER,
        )?;
        log::debug!("Created index buffer {} ({} indices)", id, indices.len());
        Ok(IndexBuffer {
            handle: BufferHandle(id),
            index_count: indices.len() as u32,
        })
    }

    fn upload_texture_2d(&mut self, data: &TextureData) -> RendererResult<Texture2D> {
        let id = self.upload(data)?;
        Ok(Texture2D {
            handle: TextureHandle(id),
            width: data.width(),
            height: data.height(),
            mip_levels: data.mip_level_count(),
            format: data.format,
        })
    }

    fn create_constant_buffer(&mut self, label: &str, size: u64) -> RendererResult<ConstantBuffer> {
        if size == 0 || size > self.caps.max_uniform_range {
            return Err(RendererError::BufferCreationFailed(format!(
                "constant buffer '{}' of {} bytes is outside device limits",
                label, size
            )));
        }
        let allocator = self.allocator()?;
        let buffer = create_buffer(
            &self.device,
            &allocator,
            label,
            size,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            MemoryLocation::CpuToGpu,
        )?;

        let id = self.next_buffer_id;
        self.next_buffer_id += 1;
        self.buffers.insert(id, buffer);

        Ok(ConstantBuffer {
            handle: BufferHandle(id),
            size,
        })
    }

    fn update_constant_buffer(&mut self, buffer: &ConstantBuffer, data: &[u8]) {
        debug_assert!(data.len() as u64 <= buffer.size);
        if let Some(vk_buffer) = self.buffers.get_mut(&buffer.handle.0) {
            debug_assert!(data.len() as u64 <= vk_buffer.size);
            if !vk_buffer.write(data) {
                log::warn!("Constant buffer {} is not host visible", buffer.handle.0);
            }
        }
    }

    fn create_shader(&mut self, desc: &ShaderDescriptor) -> RendererResult<Shader> {
        let compiled = shader::compile_wgsl(&desc.source, &desc.vertex_entry, &desc.fragment_entry)?;
        let entry = |name: &str| {
            CString::new(name).map_err(|e| {
                RendererError::InvalidParameter(format!("Invalid entry point name: {}", e))
            })
        };
        let vertex_entry = entry(&desc.vertex_entry)?;
        let fragment_entry = entry(&desc.fragment_entry)?;

        let vertex = pipeline::create_shader_module(&self.device, &compiled.vertex)?;
        let fragment = match pipeline::create_shader_module(&self.device, &compiled.fragment) {
            Ok(module) => module,
            Err(e) => {
                unsafe { self.device.destroy_shader_module(vertex, None) };
                return Err(e);
            }
        };

        let id = self.next_shader_id;
        self.next_shader_id += 1;
        self.shaders.insert(
            id,
            VkShader {
                vertex,
                fragment,
                vertex_entry,
                fragment_entry,
                vertex_layout: desc.vertex_layout.clone(),
            },
        );
        log::debug!("Created shader {:?}", desc.label);

        Ok(Shader {
            handle: ShaderHandle(id),
        })
    }

    fn release_vertex_buffer(&mut self, buffer: VertexBuffer) {
        self.release_buffer(buffer.handle.0);
    }

    fn release_index_buffer(&mut self, buffer: IndexBuffer) {
        self.release_buffer(buffer.handle.0);
    }

    fn release_texture_2d(&mut self, texture: Texture2D) {
        if let Err(e) = self.retire_frame() {
            log::warn!("Failed to wait for the GPU before releasing a texture: {}", e);
        }
        let id = texture.handle.0;
        if let (Some(image), Some(allocator)) = (self.textures.remove(&id), self.allocator.clone()) {
            unsafe { image.destroy(&self.device, &allocator) };
        }
        if self.bound.textures.contains(&Some(id)) {
            self.bound.textures = [None; TextureSlot::COUNT];
        }
    }

    fn release_constant_buffer(&mut self, buffer: ConstantBuffer) {
        self.release_buffer(buffer.handle.0);
    }

    fn release_shader(&mut self, shader: Shader) {
        if let Err(e) = self.retire_frame() {
            log::warn!("Failed to wait for the GPU before releasing a shader: {}", e);
        }
        let id = shader.handle.0;
        if let Some(shader) = self.shaders.remove(&id) {
            unsafe {
                self.device.destroy_shader_module(shader.vertex, None);
                self.device.destroy_shader_module(shader.fragment, None);
            }
        }
        let stale: Vec<PipelineKey> = self
            .pipelines
            .keys()
            .filter(|key| key.shader == id)
            .copied()
            .collect();
        for key in stale {
            if let Some(pipeline) = self.pipelines.remove(&key) {
                unsafe { self.device.destroy_pipeline(pipeline, None) };
            }
        }
        self.last_pipeline = None;
    }

    fn apply_shader(&mut self, shader: &Shader) {
        self.bound.shader = Some(shader.handle.0);
    }

    fn apply_vertex_buffer(&mut self, buffer: &VertexBuffer) {
        self.bound.vertex_buffer = Some(buffer.handle.0);
    }

    fn apply_index_buffer(&mut self, buffer: &IndexBuffer) {
        self.bound.index_buffer = Some(buffer.handle.0);
    }

    fn apply_constant_buffer(&mut self, slot: ConstantSlot, buffer: &ConstantBuffer) {
        self.bound.constants[slot.index()] = Some(buffer.handle.0);
    }

    fn apply_texture_2d(&mut self, slot: TextureSlot, texture: &Texture2D) {
        self.bound.textures[slot.index()] = Some(texture.handle.0);
    }

    fn set_primitive_topology(&mut self, topology: PrimitiveTopology) {
        self.bound.topology = topology;
    }

    fn draw_indexed(&mut self, index_count: u32, start_index: u32, base_vertex: i32) {
        if self.current_image.is_none() {
            return;
        }
        let (Some(shader), Some(vb), Some(ib)) = (
            self.bound.shader,
            self.bound.vertex_buffer,
            self.bound.index_buffer,
        ) else {
            log::warn!("draw_indexed without shader, vertex and index buffers bound");
            return;
        };
        let [Some(frame), Some(bones)] = self.bound.constants else {
            log::warn!("draw_indexed without both constant buffers bound");
            return;
        };

        let key = PipelineKey {
            shader,
            samples: self.msaa_level.max(1),
            wireframe: self.wireframe,
            topology: self.bound.topology,
        };
        let pipeline = match self.ensure_pipeline(key) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                log::warn!("draw_indexed skipped: {}", e);
                return;
            }
        };

        let diffuse = self.bound.textures[TextureSlot::Diffuse.index()]
            .unwrap_or(self.fallback_textures[TextureSlot::Diffuse.index()]);
        let normal = self.bound.textures[TextureSlot::Normal.index()]
            .unwrap_or(self.fallback_textures[TextureSlot::Normal.index()]);
        let (Some(constants), Some(textures)) = (
            self.descriptor_set(SetKey::Constants(frame, bones)),
            self.descriptor_set(SetKey::Textures(diffuse, normal)),
        ) else {
            log::warn!("draw_indexed with released resources bound, skipped");
            return;
        };
        let (Some(vertex_buffer), Some(index_buffer)) = (
            self.buffers.get(&vb).map(|b| b.buffer),
            self.buffers.get(&ib).map(|b| b.buffer),
        ) else {
            log::warn!("draw_indexed with released buffers bound, skipped");
            return;
        };

        let cmd = self.command_buffer;
        unsafe {
            if self.last_pipeline != Some(key) {
                self.device
                    .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline);
                self.last_pipeline = Some(key);
            }
            self.device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline_layout,
                0,
                &[constants, textures],
                &[],
            );
            self.device.cmd_bind_vertex_buffers(cmd, 0, &[vertex_buffer], &[0]);
            self.device
                .cmd_bind_index_buffer(cmd, index_buffer, 0, vk::IndexType::UINT32);
            self.device
                .cmd_draw_indexed(cmd, index_count, 1, start_index, base_vertex, 0);
        }
    }

    fn create_anti_aliasing_target(
        &mut self,
        level: u32,
        width: u32,
        height: u32,
    ) -> RendererResult<()> {
        let samples = resolve_msaa_level(level, &self.caps.msaa_levels)?.unwrap_or(0);
        self.retire_frame()?;

        self.msaa_level = samples;
        if width > 0 && height > 0 {
            self.requested_size = (width, height);
        }
        // Attachments and render pass both depend on the sample count
        if let (Some(targets), Some(allocator)) = (self.targets.take(), self.allocator.clone()) {
            unsafe { targets.destroy(&self.device, &allocator) };
        }
        self.invalidate_render_pass();
        self.recreate_swapchain()?;

        if samples > 1 {
            log::info!("MSAA {}x", samples);
        } else {
            log::info!("MSAA disabled");
        }
        Ok(())
    }

    fn msaa_level(&self) -> u32 {
        self.msaa_level
    }

    fn supported_msaa_levels(&self) -> &[u32] {
        &self.caps.msaa_levels
    }

    fn toggle_wireframe(&mut self, enabled: bool) {
        if enabled && !self.caps.wireframe {
            log::warn!("Wireframe needs fillModeNonSolid, staying solid");
            return;
        }
        self.wireframe = enabled;
    }

    fn is_wireframe(&self) -> bool {
        self.wireframe
    }

    fn max_anisotropic_filter_level(&self) -> u32 {
        self.caps.max_anisotropy
    }

    fn set_anisotropic_filter(&mut self, level: u32) -> RendererResult<()> {
        let level = level.clamp(1, self.caps.max_anisotropy);
        if level == self.anisotropy {
            return Ok(());
        }
        self.retire_frame()?;
        let sampler = self.create_sampler(level)?;
        unsafe { self.device.destroy_sampler(self.sampler, None) };
        self.sampler = sampler;
        self.anisotropy = level;
        log::info!("Anisotropic filtering {}x", level);
        Ok(())
    }

    fn anisotropic_filter(&self) -> u32 {
        self.anisotropy
    }

    fn set_vsync(&mut self, enabled: bool) -> RendererResult<()> {
        if enabled == self.vsync {
            return Ok(());
        }
        self.retire_frame()?;
        self.vsync = enabled;
        log::info!("VSync {}", if enabled { "on" } else { "off" });
        self.recreate_swapchain()
    }

    fn vsync(&self) -> bool {
        self.vsync
    }
}

impl Drop for VulkanRenderer {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            // Free all allocations, then the allocator, before the device goes
            if let Some(allocator) = self.allocator.take() {
                for (_, buffer) in self.buffers.drain() {
                    buffer.destroy(&self.device, &allocator);
                }
                for (_, texture) in self.textures.drain() {
                    texture.destroy(&self.device, &allocator);
                }
                if let Some(targets) = self.targets.take() {
                    targets.destroy(&self.device, &allocator);
                }
                drop(allocator);
            }

            for (_, shader) in self.shaders.drain() {
                self.device.destroy_shader_module(shader.vertex, None);
                self.device.destroy_shader_module(shader.fragment, None);
            }
            for (_, pipeline) in self.pipelines.drain() {
                self.device.destroy_pipeline(pipeline, None);
            }

            self.device.destroy_sampler(self.sampler, None);
            self.device.destroy_pipeline_layout(self.pipeline_layout, None);
            for layout in self.set_layouts {
                self.device.destroy_descriptor_set_layout(layout, None);
            }
            self.device.destroy_descriptor_pool(self.descriptor_pool, None);
            self.device.destroy_render_pass(self.render_pass, None);

            self.device.destroy_semaphore(self.image_available_semaphore, None);
            self.device.destroy_fence(self.in_flight_fence, None);
            self.device.destroy_command_pool(self.command_pool, None);

            self.swapchain.destroy(&self.device, &self.swapchain_fn);

            self.device.destroy_device(None);
            self.surface_fn.destroy_surface(self.surface, None);
            self.instance.destroy_instance(None);
        }
    }
}
