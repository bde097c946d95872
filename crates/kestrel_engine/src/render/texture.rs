//! GPU textures built from raw decoded pixels
//!
//! Image decoding stays with the asset loader; this module consumes a
//! width, a height, and an RGBA8 byte buffer. Upload is a staging copy with
//! layout transitions recorded through the scoped one-time submit, blocking
//! until the leased queue is idle.

use ash::{vk, Device};

use crate::core::stage::{LoadError, StageStack};
use crate::render::vulkan::buffer::Buffer;
use crate::render::vulkan::commands::{submit_one_time, CommandPool};
use crate::render::vulkan::device::{select_memory_type, RenderDevice};
use crate::render::vulkan::queue::QueueFamily;

const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;
const BYTES_PER_PIXEL: usize = 4;

/// Raw decoded pixels handed over by the asset loader
#[derive(Debug, Clone)]
pub struct TextureData {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// RGBA8 bytes, row-major, `width * height * 4` long
    pub pixels: Vec<u8>,
}

impl TextureData {
    /// Check that the byte buffer matches the declared dimensions
    pub fn validate(&self) -> Result<(), LoadError> {
        if self.width == 0 || self.height == 0 {
            return Err(LoadError::new(format!(
                "texture dimensions must be positive, got {}x{}",
                self.width, self.height
            )));
        }
        let expected = self.width as usize * self.height as usize * BYTES_PER_PIXEL;
        if self.pixels.len() != expected {
            return Err(LoadError::new(format!(
                "texture of {}x{} needs {expected} bytes, got {}",
                self.width,
                self.height,
                self.pixels.len()
            )));
        }
        Ok(())
    }
}

/// A sampled 2D texture: device-local image, sampler, and view
pub struct Texture {
    parts: TextureParts,
    stages: StageStack<TextureParts>,
}

struct TextureParts {
    device: Device,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    width: u32,
    height: u32,
    max_anisotropy: f32,
    image: vk::Image,
    memory: vk::DeviceMemory,
    sampler: vk::Sampler,
    view: vk::ImageView,
}

impl Texture {
    /// Create the image, sampler, and view through the staged protocol, then
    /// upload the pixels with a blocking one-time transfer on a queue leased
    /// from `family`.
    pub fn new(
        device: &RenderDevice,
        family: &QueueFamily,
        data: &TextureData,
    ) -> Result<Self, LoadError> {
        data.validate()
            .map_err(|e| e.context("could not initialize texture"))?;

        let mut parts = TextureParts {
            device: device.logical().clone(),
            memory_properties: device.memory_properties(),
            width: data.width,
            height: data.height,
            max_anisotropy: 16.0,
            image: vk::Image::null(),
            memory: vk::DeviceMemory::null(),
            sampler: vk::Sampler::null(),
            view: vk::ImageView::null(),
        };

        let mut stages = StageStack::new();
        stages.add(
            "texture image",
            TextureParts::load_image,
            TextureParts::unload_image,
        );
        stages.add(
            "texture memory",
            TextureParts::load_memory,
            TextureParts::unload_memory,
        );
        stages.add(
            "texture sampler",
            TextureParts::load_sampler,
            TextureParts::unload_sampler,
        );
        stages.add(
            "texture view",
            TextureParts::load_view,
            TextureParts::unload_view,
        );
        stages
            .load(&mut parts)
            .map_err(|e| e.context("could not initialize texture"))?;

        // A failed upload drops `texture`, unwinding the stages in reverse.
        let texture = Self { parts, stages };
        texture
            .upload(device, family, &data.pixels)
            .map_err(|e| e.context("could not initialize texture"))?;

        Ok(texture)
    }

    /// Image view bound into model descriptor sets
    pub fn view(&self) -> vk::ImageView {
        self.parts.view
    }

    /// Sampler bound into model descriptor sets
    pub fn sampler(&self) -> vk::Sampler {
        self.parts.sampler
    }

    fn upload(
        &self,
        device: &RenderDevice,
        family: &QueueFamily,
        pixels: &[u8],
    ) -> Result<(), LoadError> {
        let staging = Buffer::source(device, pixels)?;
        let pool = CommandPool::new(device.logical().clone(), family.family_index(), 1)?;
        let queue = family.lease().map_err(|e| LoadError::new(e.to_string()))?;

        let image = self.parts.image;
        let staging_handle = staging.handle();
        let extent = vk::Extent3D {
            width: self.parts.width,
            height: self.parts.height,
            depth: 1,
        };

        submit_one_time(device.logical(), &queue, pool.buffers()[0], |device, cmd| {
            transition_image(
                device,
                cmd,
                image,
                vk::AccessFlags::empty(),
                vk::AccessFlags::TRANSFER_WRITE,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::PipelineStageFlags::HOST,
                vk::PipelineStageFlags::TRANSFER,
            );

            let region = vk::BufferImageCopy {
                buffer_offset: 0,
                buffer_row_length: 0,
                buffer_image_height: 0,
                image_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
                image_extent: extent,
            };
            unsafe {
                device.cmd_copy_buffer_to_image(
                    cmd,
                    staging_handle,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );
            }

            transition_image(
                device,
                cmd,
                image,
                vk::AccessFlags::TRANSFER_WRITE,
                vk::AccessFlags::SHADER_READ,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
            );
        })
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        self.stages.unload(&mut self.parts);
    }
}

#[allow(clippy::too_many_arguments)]
fn transition_image(
    device: &Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    src_access: vk::AccessFlags,
    dst_access: vk::AccessFlags,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    src_stage: vk::PipelineStageFlags,
    dst_stage: vk::PipelineStageFlags,
) {
    let barrier = vk::ImageMemoryBarrier::builder()
        .src_access_mask(src_access)
        .dst_access_mask(dst_access)
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        })
        .build();

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

impl TextureParts {
    fn load_image(&mut self) -> Result<(), LoadError> {
        let create_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(TEXTURE_FORMAT)
            .extent(vk::Extent3D {
                width: self.width,
                height: self.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        self.image = unsafe {
            self.device
                .create_image(&create_info, None)
                .map_err(|code| LoadError::new(format!("image creation failed: {code:?}")))?
        };
        Ok(())
    }

    fn unload_image(&mut self) {
        unsafe {
            self.device.destroy_image(self.image, None);
        }
        self.image = vk::Image::null();
    }

    fn load_memory(&mut self) -> Result<(), LoadError> {
        let requirements = unsafe { self.device.get_image_memory_requirements(self.image) };
        let memory_type_index = select_memory_type(
            &self.memory_properties,
            requirements,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        self.memory = unsafe {
            self.device
                .allocate_memory(&alloc_info, None)
                .map_err(|code| {
                    LoadError::new(format!("image memory allocation failed: {code:?}"))
                })?
        };

        let bound = unsafe { self.device.bind_image_memory(self.image, self.memory, 0) };
        if let Err(code) = bound {
            unsafe { self.device.free_memory(self.memory, None) };
            self.memory = vk::DeviceMemory::null();
            return Err(LoadError::new(format!(
                "image memory bind failed: {code:?}"
            )));
        }
        Ok(())
    }

    fn unload_memory(&mut self) {
        unsafe {
            self.device.free_memory(self.memory, None);
        }
        self.memory = vk::DeviceMemory::null();
    }

    fn load_sampler(&mut self) -> Result<(), LoadError> {
        let create_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(true)
            .max_anisotropy(self.max_anisotropy)
            .compare_enable(false)
            .compare_op(vk::CompareOp::NEVER)
            .border_color(vk::BorderColor::FLOAT_OPAQUE_WHITE)
            .unnormalized_coordinates(false);

        self.sampler = unsafe {
            self.device
                .create_sampler(&create_info, None)
                .map_err(|code| LoadError::new(format!("sampler creation failed: {code:?}")))?
        };
        Ok(())
    }

    fn unload_sampler(&mut self) {
        unsafe {
            self.device.destroy_sampler(self.sampler, None);
        }
        self.sampler = vk::Sampler::null();
    }

    fn load_view(&mut self) -> Result<(), LoadError> {
        let create_info = vk::ImageViewCreateInfo::builder()
            .image(self.image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(TEXTURE_FORMAT)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        self.view = unsafe {
            self.device
                .create_image_view(&create_info, None)
                .map_err(|code| LoadError::new(format!("texture view creation failed: {code:?}")))?
        };
        Ok(())
    }

    fn unload_view(&mut self) {
        unsafe {
            self.device.destroy_image_view(self.view, None);
        }
        self.view = vk::ImageView::null();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_pixel_buffer_validates() {
        let data = TextureData {
            width: 2,
            height: 2,
            pixels: vec![0; 16],
        };
        assert!(data.validate().is_ok());
    }

    #[test]
    fn short_pixel_buffer_is_rejected() {
        let data = TextureData {
            width: 2,
            height: 2,
            pixels: vec![0; 12],
        };
        let error = data.validate().unwrap_err();
        assert!(error.to_string().contains("needs 16 bytes"));
    }

    #[test]
    fn zero_dimensions_are_rejected() {
        let data = TextureData {
            width: 0,
            height: 2,
            pixels: Vec::new(),
        };
        assert!(data.validate().is_err());
    }
}
