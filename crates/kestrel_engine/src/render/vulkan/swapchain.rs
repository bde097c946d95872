//! Presentation swapchain and its image views
//!
//! Negotiates the surface format and extent, requests triple buffering as a
//! hint (the platform may grant a different count), and builds one image
//! view per granted image. The frames-in-flight count is deliberately
//! independent of the image count returned here.

use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::{vk, Device};

use crate::core::stage::{LoadError, StageStack};
use crate::render::vulkan::device::RenderDevice;
use crate::render::vulkan::instance::RenderInstance;

/// Requested image count; a hint, not a guarantee
const REQUESTED_IMAGE_COUNT: u32 = 3;

/// Swapchain plus the image views this system owns
pub struct Swapchain {
    parts: SwapchainParts,
    stages: StageStack<SwapchainParts>,
}

struct SwapchainParts {
    device: Device,
    loader: SwapchainLoader,
    surface: vk::SurfaceKHR,
    surface_loader: Surface,
    physical: vk::PhysicalDevice,
    requested_extent: vk::Extent2D,
    debug: bool,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
}

impl Swapchain {
    /// Build the swapchain on the presentation device
    pub fn new(
        device: &RenderDevice,
        instance: &RenderInstance,
        requested_extent: vk::Extent2D,
        debug: bool,
    ) -> Result<Self, LoadError> {
        let loader = SwapchainLoader::new(instance.handle(), device.logical());
        let mut parts = SwapchainParts {
            device: device.logical().clone(),
            loader,
            surface: instance.surface(),
            surface_loader: instance.surface_loader().clone(),
            physical: device.physical(),
            requested_extent,
            debug,
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            image_views: Vec::new(),
            format: vk::SurfaceFormatKHR::default(),
            extent: vk::Extent2D::default(),
        };

        let mut stages = StageStack::new();
        stages.add(
            "swapchain object",
            SwapchainParts::load_swapchain,
            SwapchainParts::unload_swapchain,
        );
        stages.add(
            "swapchain image views",
            SwapchainParts::load_image_views,
            SwapchainParts::unload_image_views,
        );
        stages
            .load(&mut parts)
            .map_err(|e| e.context("could not initialize swapchain"))?;

        Ok(Self { parts, stages })
    }

    /// Swapchain handle
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.parts.swapchain
    }

    /// Extension loader used for acquire and present
    pub fn loader(&self) -> &SwapchainLoader {
        &self.parts.loader
    }

    /// Negotiated surface format
    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.parts.format
    }

    /// Granted image extent
    pub fn extent(&self) -> vk::Extent2D {
        self.parts.extent
    }

    /// Image views, one per granted image
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.parts.image_views
    }

    /// Number of granted images; may differ from the requested count
    pub fn image_count(&self) -> usize {
        self.parts.images.len()
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.stages.unload(&mut self.parts);
    }
}

impl SwapchainParts {
    fn load_swapchain(&mut self) -> Result<(), LoadError> {
        let capabilities = unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.physical, self.surface)
                .map_err(|code| {
                    LoadError::new(format!("failed to query surface capabilities: {code:?}"))
                })?
        };

        if self.debug {
            log::debug!(
                "surface capabilities: image count {}..{}, extent {}x{}..{}x{}",
                capabilities.min_image_count,
                capabilities.max_image_count,
                capabilities.min_image_extent.width,
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.width,
                capabilities.max_image_extent.height,
            );
        }

        let formats = unsafe {
            self.surface_loader
                .get_physical_device_surface_formats(self.physical, self.surface)
                .map_err(|code| {
                    LoadError::new(format!("failed to query surface formats: {code:?}"))
                })?
        };
        // First reported format; a policy choice, not a negotiation.
        self.format = *formats
            .first()
            .ok_or_else(|| LoadError::new("surface reports no formats"))?;

        self.extent = if capabilities.current_extent.width != u32::MAX {
            capabilities.current_extent
        } else {
            vk::Extent2D {
                width: self.requested_extent.width.clamp(
                    capabilities.min_image_extent.width,
                    capabilities.max_image_extent.width,
                ),
                height: self.requested_extent.height.clamp(
                    capabilities.min_image_extent.height,
                    capabilities.max_image_extent.height,
                ),
            }
        };

        // Triple buffering as a hint, clamped to what the surface allows.
        let mut image_count = REQUESTED_IMAGE_COUNT.max(capabilities.min_image_count);
        if capabilities.max_image_count > 0 {
            image_count = image_count.min(capabilities.max_image_count);
        }

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(self.format.format)
            .image_color_space(self.format.color_space)
            .image_extent(self.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(vk::PresentModeKHR::FIFO)
            .clipped(false)
            .old_swapchain(vk::SwapchainKHR::null());

        self.swapchain = unsafe {
            self.loader
                .create_swapchain(&create_info, None)
                .map_err(|code| LoadError::new(format!("swapchain creation failed: {code:?}")))?
        };

        self.images = unsafe {
            self.loader
                .get_swapchain_images(self.swapchain)
                .map_err(|code| {
                    LoadError::new(format!("failed to get swapchain images: {code:?}"))
                })?
        };

        Ok(())
    }

    fn unload_swapchain(&mut self) {
        unsafe {
            self.loader.destroy_swapchain(self.swapchain, None);
        }
        self.swapchain = vk::SwapchainKHR::null();
        self.images.clear();
    }

    fn load_image_views(&mut self) -> Result<(), LoadError> {
        self.image_views.reserve(self.images.len());
        for &image in &self.images {
            let create_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(self.format.format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });

            let view = unsafe { self.device.create_image_view(&create_info, None) };
            match view {
                Ok(view) => self.image_views.push(view),
                Err(code) => {
                    // A failed acquire never sees its own release; clean up
                    // the views created so far before the stack rolls back.
                    self.unload_image_views();
                    return Err(LoadError::new(format!(
                        "swapchain image view creation failed: {code:?}"
                    )));
                }
            }
        }
        Ok(())
    }

    fn unload_image_views(&mut self) {
        for view in self.image_views.drain(..) {
            unsafe {
                self.device.destroy_image_view(view, None);
            }
        }
    }
}
