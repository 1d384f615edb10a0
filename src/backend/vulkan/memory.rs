//! Buffers and images backed by gpu-allocator, plus one-shot command submission.

use crate::backend::traits::{RendererError, RendererResult};
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator};
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;

pub(super) struct VkBuffer {
    pub buffer: vk::Buffer,
    pub allocation: Allocation,
    pub size: u64,
}

pub(super) struct VkImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub allocation: Allocation,
}

/// Description of an image to allocate
pub(super) struct ImageDesc<'a> {
    pub name: &'a str,
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub samples: vk::SampleCountFlags,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub aspect: vk::ImageAspectFlags,
}

pub(super) fn create_buffer(
    device: &ash::Device,
    allocator: &Mutex<Allocator>,
    name: &str,
    size: u64,
    usage: vk::BufferUsageFlags,
    location: MemoryLocation,
) -> RendererResult<VkBuffer> {
    let buffer_info = vk::BufferCreateInfo::default()
        .size(size)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    unsafe {
        let buffer = device
            .create_buffer(&buffer_info, None)
            .map_err(|e| RendererError::BufferCreationFailed(e.to_string()))?;
        let requirements = device.get_buffer_memory_requirements(buffer);

        let allocation = match allocator.lock().allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        }) {
            Ok(allocation) => allocation,
            Err(e) => {
                device.destroy_buffer(buffer, None);
                return Err(RendererError::BufferCreationFailed(e.to_string()));
            }
        };

        if let Err(e) = device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) {
            device.destroy_buffer(buffer, None);
            let _ = allocator.lock().free(allocation);
            return Err(RendererError::BufferCreationFailed(e.to_string()));
        }

        Ok(VkBuffer {
            buffer,
            allocation,
            size,
        })
    }
}

impl VkBuffer {
    /// Copy `data` into a host visible buffer
    pub fn write(&mut self, data: &[u8]) -> bool {
        match self.allocation.mapped_slice_mut() {
            Some(mapped) if data.len() <= mapped.len() => {
                mapped[..data.len()].copy_from_slice(data);
                true
            }
            _ => false,
        }
    }

    pub unsafe fn destroy(self, device: &ash::Device, allocator: &Mutex<Allocator>) {
        device.destroy_buffer(self.buffer, None);
        let _ = allocator.lock().free(self.allocation);
    }
}

pub(super) fn create_image(
    device: &ash::Device,
    allocator: &Mutex<Allocator>,
    desc: &ImageDesc,
) -> RendererResult<VkImage> {
    let image_info = vk::ImageCreateInfo::default()
        .image_type(vk::ImageType::TYPE_2D)
        .extent(vk::Extent3D {
            width: desc.width,
            height: desc.height,
            depth: 1,
        })
        .mip_levels(desc.mip_levels)
        .array_layers(1)
        .format(desc.format)
        .tiling(vk::ImageTiling::OPTIMAL)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .usage(desc.usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .samples(desc.samples);

    unsafe {
        let image = device
            .create_image(&image_info, None)
            .map_err(|e| RendererError::TextureCreationFailed(e.to_string()))?;
        let requirements = device.get_image_memory_requirements(image);

        let allocation = match allocator.lock().allocate(&AllocationCreateDesc {
            name: desc.name,
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        }) {
            Ok(allocation) => allocation,
            Err(e) => {
                device.destroy_image(image, None);
                return Err(RendererError::TextureCreationFailed(e.to_string()));
            }
        };

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(desc.format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(desc.aspect)
                    .base_mip_level(0)
                    .level_count(desc.mip_levels)
                    .base_array_layer(0)
                    .layer_count(1),
            );

        let view = device
            .bind_image_memory(image, allocation.memory(), allocation.offset())
            .and_then(|_| device.create_image_view(&view_info, None));
        match view {
            Ok(view) => Ok(VkImage {
                image,
                view,
                allocation,
            }),
            Err(e) => {
                device.destroy_image(image, None);
                let _ = allocator.lock().free(allocation);
                Err(RendererError::TextureCreationFailed(e.to_string()))
            }
        }
    }
}

impl VkImage {
    pub unsafe fn destroy(self, device: &ash::Device, allocator: &Mutex<Allocator>) {
        device.destroy_image_view(self.view, None);
        device.destroy_image(self.image, None);
        let _ = allocator.lock().free(self.allocation);
    }
}

/// Record commands into a throwaway command buffer and wait for them to finish
pub(super) fn submit_immediate(
    device: &ash::Device,
    command_pool: vk::CommandPool,
    queue: vk::Queue,
    record: impl FnOnce(vk::CommandBuffer),
) -> RendererResult<()> {
    let alloc_info = vk::CommandBufferAllocateInfo::default()
        .command_pool(command_pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);

    unsafe {
        let cmd = device
            .allocate_command_buffers(&alloc_info)
            .map_err(|e| RendererError::BufferCreationFailed(e.to_string()))?[0];

        let result = (|| {
            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device.begin_command_buffer(cmd, &begin_info)?;
            record(cmd);
            device.end_command_buffer(cmd)?;

            let command_buffers = [cmd];
            let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
            device.queue_submit(queue, &[submit_info], vk::Fence::null())?;
            device.queue_wait_idle(queue)
        })();

        device.free_command_buffers(command_pool, &[cmd]);
        result.map_err(|e| match e {
            vk::Result::ERROR_DEVICE_LOST => RendererError::DeviceLost,
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
                RendererError::OutOfMemory
            }
            e => RendererError::BufferCreationFailed(e.to_string()),
        })
    }
}

/// Layout transition for every mip of a colour image
pub(super) fn transition_image(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    mip_levels: u32,
    (old_layout, src_access, src_stage): (vk::ImageLayout, vk::AccessFlags, vk::PipelineStageFlags),
    (new_layout, dst_access, dst_stage): (vk::ImageLayout, vk::AccessFlags, vk::PipelineStageFlags),
) {
    let barrier = vk::ImageMemoryBarrier::default()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_access_mask(src_access)
        .dst_access_mask(dst_access)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .base_mip_level(0)
                .level_count(mip_levels)
                .base_array_layer(0)
                .layer_count(1),
        );
    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            src_stage,
            dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }
}
