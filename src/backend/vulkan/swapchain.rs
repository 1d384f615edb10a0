//! Swapchain, render pass and the attachments each frame renders into

use super::memory::{create_image, ImageDesc, VkImage};
use crate::backend::traits::{RendererError, RendererResult};
use ash::khr::{surface, swapchain};
use ash::vk;
use gpu_allocator::vulkan::Allocator;
use parking_lot::Mutex;

pub(super) const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

#[derive(Default)]
pub(super) struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub views: Vec<vk::ImageView>,
    /// One per image, signalled when rendering to that image is done
    pub render_finished: Vec<vk::Semaphore>,
}

/// Surface queries the swapchain is created from
pub(super) struct SurfaceContext<'a> {
    pub device: &'a ash::Device,
    pub surface_fn: &'a surface::Instance,
    pub swapchain_fn: &'a swapchain::Device,
    pub physical_device: vk::PhysicalDevice,
    pub surface: vk::SurfaceKHR,
}

impl Swapchain {
    /// Create a swapchain, retiring `old` if it is not null. The caller still
    /// destroys the old one.
    pub fn create(
        ctx: &SurfaceContext,
        width: u32,
        height: u32,
        vsync: bool,
        old: vk::SwapchainKHR,
    ) -> RendererResult<Self> {
        let err = |e: vk::Result| RendererError::SwapchainCreationFailed(e.to_string());
        unsafe {
            let capabilities = ctx
                .surface_fn
                .get_physical_device_surface_capabilities(ctx.physical_device, ctx.surface)
                .map_err(err)?;
            let formats = ctx
                .surface_fn
                .get_physical_device_surface_formats(ctx.physical_device, ctx.surface)
                .map_err(err)?;
            let present_modes = ctx
                .surface_fn
                .get_physical_device_surface_present_modes(ctx.physical_device, ctx.surface)
                .map_err(err)?;

            // Prefer an sRGB format
            let format = formats
                .iter()
                .find(|f| {
                    matches!(f.format, vk::Format::B8G8R8A8_SRGB | vk::Format::R8G8B8A8_SRGB)
                        && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
                })
                .or_else(|| formats.first())
                .copied()
                .ok_or_else(|| {
                    RendererError::SwapchainCreationFailed("surface reports no formats".into())
                })?;

            let present_mode = choose_present_mode(&present_modes, vsync);

            let extent = if capabilities.current_extent.width != u32::MAX {
                capabilities.current_extent
            } else {
                vk::Extent2D {
                    width: width.clamp(
                        capabilities.min_image_extent.width,
                        capabilities.max_image_extent.width,
                    ),
                    height: height.clamp(
                        capabilities.min_image_extent.height,
                        capabilities.max_image_extent.height,
                    ),
                }
            };
            if extent.width == 0 || extent.height == 0 {
                return Err(RendererError::SwapchainCreationFailed(
                    "surface has zero extent".into(),
                ));
            }

            let image_count = (capabilities.min_image_count + 1).min(
                if capabilities.max_image_count > 0 {
                    capabilities.max_image_count
                } else {
                    u32::MAX
                },
            );

            let composite_alpha = [
                vk::CompositeAlphaFlagsKHR::OPAQUE,
                vk::CompositeAlphaFlagsKHR::INHERIT,
                vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
                vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
            ]
            .into_iter()
            .find(|&mode| capabilities.supported_composite_alpha.contains(mode))
            .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE);

            let swapchain_info = vk::SwapchainCreateInfoKHR::default()
                .surface(ctx.surface)
                .min_image_count(image_count)
                .image_format(format.format)
                .image_color_space(format.color_space)
                .image_extent(extent)
                .image_array_layers(1)
                .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
                .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
                .pre_transform(capabilities.current_transform)
                .composite_alpha(composite_alpha)
                .present_mode(present_mode)
                .clipped(true)
                .old_swapchain(old);

            let handle = ctx
                .swapchain_fn
                .create_swapchain(&swapchain_info, None)
                .map_err(err)?;

            let mut created = Self {
                handle,
                format: format.format,
                extent,
                views: Vec::new(),
                render_finished: Vec::new(),
            };

            let images = match ctx.swapchain_fn.get_swapchain_images(handle) {
                Ok(images) => images,
                Err(e) => {
                    created.destroy(ctx.device, ctx.swapchain_fn);
                    return Err(err(e));
                }
            };

            for image in images {
                let view_info = vk::ImageViewCreateInfo::default()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(format.format)
                    .subresource_range(
                        vk::ImageSubresourceRange::default()
                            .aspect_mask(vk::ImageAspectFlags::COLOR)
                            .level_count(1)
                            .layer_count(1),
                    );
                let view = ctx.device.create_image_view(&view_info, None);
                let semaphore = ctx
                    .device
                    .create_semaphore(&vk::SemaphoreCreateInfo::default(), None);
                match (view, semaphore) {
                    (Ok(view), Ok(semaphore)) => {
                        created.views.push(view);
                        created.render_finished.push(semaphore);
                    }
                    (view, semaphore) => {
                        if let Ok(view) = view {
                            ctx.device.destroy_image_view(view, None);
                        }
                        if let Ok(semaphore) = semaphore {
                            ctx.device.destroy_semaphore(semaphore, None);
                        }
                        created.destroy(ctx.device, ctx.swapchain_fn);
                        return Err(RendererError::SwapchainCreationFailed(
                            "failed to create swapchain image views".into(),
                        ));
                    }
                }
            }

            log::debug!(
                "Swapchain {}x{} {:?} {:?}, {} images",
                extent.width,
                extent.height,
                format.format,
                present_mode,
                created.views.len()
            );
            Ok(created)
        }
    }

    pub unsafe fn destroy(&mut self, device: &ash::Device, swapchain_fn: &swapchain::Device) {
        for view in self.views.drain(..) {
            device.destroy_image_view(view, None);
        }
        for semaphore in self.render_finished.drain(..) {
            device.destroy_semaphore(semaphore, None);
        }
        if self.handle != vk::SwapchainKHR::null() {
            swapchain_fn.destroy_swapchain(self.handle, None);
            self.handle = vk::SwapchainKHR::null();
        }
    }
}

/// FIFO with vsync, otherwise the lowest latency mode available
pub(super) fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    vsync: bool,
) -> vk::PresentModeKHR {
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| available.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

pub(super) fn sample_count_flags(samples: u32) -> vk::SampleCountFlags {
    match samples {
        2 => vk::SampleCountFlags::TYPE_2,
        4 => vk::SampleCountFlags::TYPE_4,
        8 => vk::SampleCountFlags::TYPE_8,
        16 => vk::SampleCountFlags::TYPE_16,
        _ => vk::SampleCountFlags::TYPE_1,
    }
}

/// Sample counts above one present in `flags`
pub(super) fn msaa_levels_from_flags(flags: vk::SampleCountFlags) -> Vec<u32> {
    [2, 4, 8, 16]
        .into_iter()
        .filter(|&n| flags.contains(sample_count_flags(n)))
        .collect()
}

/// Render pass clearing colour and depth, resolving into the swapchain image
/// when `samples` is above one.
pub(super) fn create_render_pass(
    device: &ash::Device,
    color_format: vk::Format,
    samples: u32,
) -> RendererResult<vk::RenderPass> {
    let sample_flags = sample_count_flags(samples);
    let multisampled = samples > 1;

    let color = vk::AttachmentDescription::default()
        .format(color_format)
        .samples(sample_flags)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(if multisampled {
            vk::AttachmentStoreOp::DONT_CARE
        } else {
            vk::AttachmentStoreOp::STORE
        })
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(if multisampled {
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        } else {
            vk::ImageLayout::PRESENT_SRC_KHR
        });

    let depth = vk::AttachmentDescription::default()
        .format(DEPTH_FORMAT)
        .samples(sample_flags)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::DONT_CARE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);

    let resolve = vk::AttachmentDescription::default()
        .format(color_format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::DONT_CARE)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR);

    let color_refs = [vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    }];
    let depth_ref = vk::AttachmentReference {
        attachment: 1,
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    };
    let resolve_refs = [vk::AttachmentReference {
        attachment: 2,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    }];

    let mut subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs)
        .depth_stencil_attachment(&depth_ref);
    if multisampled {
        subpass = subpass.resolve_attachments(&resolve_refs);
    }

    let dependency = vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        )
        .dst_stage_mask(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        )
        .src_access_mask(vk::AccessFlags::empty())
        .dst_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        );

    let attachments_ms = [color, depth, resolve];
    let attachments: &[vk::AttachmentDescription] = if multisampled {
        &attachments_ms
    } else {
        &attachments_ms[..2]
    };

    let render_pass_info = vk::RenderPassCreateInfo::default()
        .attachments(attachments)
        .subpasses(std::slice::from_ref(&subpass))
        .dependencies(std::slice::from_ref(&dependency));

    unsafe {
        device
            .create_render_pass(&render_pass_info, None)
            .map_err(|e| RendererError::PipelineCreationFailed(e.to_string()))
    }
}

/// Depth target, optional multisampled colour target and one framebuffer per
/// swapchain image
pub(super) struct FrameTargets {
    pub samples: u32,
    depth: VkImage,
    color: Option<VkImage>,
    pub framebuffers: Vec<vk::Framebuffer>,
}

impl FrameTargets {
    pub fn create(
        device: &ash::Device,
        allocator: &Mutex<Allocator>,
        swapchain: &Swapchain,
        render_pass: vk::RenderPass,
        samples: u32,
    ) -> RendererResult<Self> {
        let vk::Extent2D { width, height } = swapchain.extent;
        let sample_flags = sample_count_flags(samples);

        let depth = create_image(
            device,
            allocator,
            &ImageDesc {
                name: "depth target",
                width,
                height,
                mip_levels: 1,
                samples: sample_flags,
                format: DEPTH_FORMAT,
                usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                aspect: vk::ImageAspectFlags::DEPTH,
            },
        )?;

        let mut targets = Self {
            samples,
            depth,
            color: None,
            framebuffers: Vec::with_capacity(swapchain.views.len()),
        };

        if samples > 1 {
            let color = create_image(
                device,
                allocator,
                &ImageDesc {
                    name: "msaa colour target",
                    width,
                    height,
                    mip_levels: 1,
                    samples: sample_flags,
                    format: swapchain.format,
                    usage: vk::ImageUsageFlags::COLOR_ATTACHMENT
                        | vk::ImageUsageFlags::TRANSIENT_ATTACHMENT,
                    aspect: vk::ImageAspectFlags::COLOR,
                },
            );
            match color {
                Ok(color) => targets.color = Some(color),
                Err(e) => {
                    unsafe { targets.destroy(device, allocator) };
                    return Err(e);
                }
            }
        }

        for &view in &swapchain.views {
            let attachments = match &targets.color {
                Some(color) => vec![color.view, targets.depth.view, view],
                None => vec![view, targets.depth.view],
            };
            let framebuffer_info = vk::FramebufferCreateInfo::default()
                .render_pass(render_pass)
                .attachments(&attachments)
                .width(width)
                .height(height)
                .layers(1);
            match unsafe { device.create_framebuffer(&framebuffer_info, None) } {
                Ok(framebuffer) => targets.framebuffers.push(framebuffer),
                Err(e) => {
                    unsafe { targets.destroy(device, allocator) };
                    return Err(RendererError::SwapchainCreationFailed(e.to_string()));
                }
            }
        }

        Ok(targets)
    }

    pub unsafe fn destroy(self, device: &ash::Device, allocator: &Mutex<Allocator>) {
        for framebuffer in self.framebuffers {
            device.destroy_framebuffer(framebuffer, None);
        }
        if let Some(color) = self.color {
            color.destroy(device, allocator);
        }
        self.depth.destroy(device, allocator);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_present_mode_selection() {
        let all = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
        ];
        assert_eq!(choose_present_mode(&all, true), vk::PresentModeKHR::FIFO);
        assert_eq!(choose_present_mode(&all, false), vk::PresentModeKHR::MAILBOX);
        assert_eq!(
            choose_present_mode(&all[..2], false),
            vk::PresentModeKHR::IMMEDIATE
        );
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO], false),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn test_msaa_levels_from_flags() {
        let flags = vk::SampleCountFlags::TYPE_1
            | vk::SampleCountFlags::TYPE_2
            | vk::SampleCountFlags::TYPE_4
            | vk::SampleCountFlags::TYPE_8;
        assert_eq!(msaa_levels_from_flags(flags), vec![2, 4, 8]);
        assert!(msaa_levels_from_flags(vk::SampleCountFlags::TYPE_1).is_empty());
    }
}
