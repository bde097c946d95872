//! Renderable models
//!
//! A model owns device-local vertex and index buffers, one instance uniform
//! slab per swapchain image, and a descriptor set bound to its texture. The
//! staging sources exist only until the blocking copies complete; a failure
//! anywhere in construction unwinds whatever was already built, in reverse.

use ash::{vk, Device};

use crate::core::stage::LoadError;
use crate::render::camera::{model_matrix, Transform3};
use crate::render::mesh::MeshData;
use crate::render::texture::{Texture, TextureData};
use crate::render::vulkan::buffer::Buffer;
use crate::render::vulkan::descriptor::{DescriptorSetLayout, DescriptorSets};
use crate::render::vulkan::device::RenderDevice;
use crate::render::vulkan::queue::QueueFamily;
use crate::render::vulkan::uniform::{UboModelInstance, MAX_MODEL_INSTANCES};
use crate::render::vulkan::RenderError;

/// One renderable model and its GPU resources
pub struct Model {
    vertex_buffer: Buffer,
    index_buffer: Buffer,
    index_count: u32,
    instance_buffers: Vec<Buffer>,
    descriptor_sets: DescriptorSets,
    // Referenced by the descriptor sets; must outlive them.
    _texture: Texture,
}

impl Model {
    /// Upload a validated mesh and texture, then build the per-image
    /// instance uniforms and the descriptor set bound to both.
    pub fn new(
        device: &RenderDevice,
        family: &QueueFamily,
        layout: &DescriptorSetLayout,
        image_count: usize,
        mesh: &MeshData,
        texture_data: &TextureData,
    ) -> Result<Self, LoadError> {
        mesh.validate()
            .map_err(|e| e.context("failed to load model"))?;

        let (vertex_buffer, index_buffer) = {
            let vertex_source = Buffer::source(device, mesh.vertex_bytes())
                .map_err(|e| e.context("failed to load model"))?;
            let vertex_buffer =
                Buffer::destination(device, family, &vertex_source, vk::BufferUsageFlags::VERTEX_BUFFER)
                    .map_err(|e| e.context("failed to load model"))?;

            let index_source = Buffer::source(device, mesh.index_bytes())
                .map_err(|e| e.context("failed to load model"))?;
            let index_buffer =
                Buffer::destination(device, family, &index_source, vk::BufferUsageFlags::INDEX_BUFFER)
                    .map_err(|e| e.context("failed to load model"))?;

            // The staging sources drop here; the copies have completed.
            (vertex_buffer, index_buffer)
        };

        let texture = Texture::new(device, family, texture_data)
            .map_err(|e| e.context("failed to load model"))?;

        let mut instance_buffers = Vec::with_capacity(image_count);
        for _ in 0..image_count {
            instance_buffers.push(
                Buffer::uniform(
                    device,
                    std::mem::size_of::<UboModelInstance>() as vk::DeviceSize,
                )
                .map_err(|e| e.context("failed to load model"))?,
            );
        }

        let descriptor_sets = DescriptorSets::for_model_instance(
            device.logical().clone(),
            layout,
            &instance_buffers,
            &texture,
        )
        .map_err(|e| e.context("failed to load model"))?;

        Ok(Self {
            vertex_buffer,
            index_buffer,
            index_count: mesh.index_count(),
            instance_buffers,
            descriptor_sets,
            _texture: texture,
        })
    }

    /// Number of indices drawn per instance
    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    /// Write this frame's instance transforms for the acquired image index
    pub fn update_instances(
        &self,
        image_index: usize,
        transforms: &[Transform3],
    ) -> Result<(), RenderError> {
        if transforms.len() > MAX_MODEL_INSTANCES {
            return Err(RenderError::TooManyInstances {
                count: transforms.len(),
                max: MAX_MODEL_INSTANCES,
            });
        }

        let mut ubo = UboModelInstance::default();
        for (slot, transform) in transforms.iter().enumerate() {
            ubo.model[slot] = model_matrix(transform).into();
        }
        self.instance_buffers[image_index].copy_data(&ubo)
    }

    /// Record one instanced draw: bind the instance and frame descriptor
    /// sets, the pipeline, and the geometry, then issue a single indexed
    /// draw with the group's instance count.
    pub fn record_draw(
        &self,
        device: &Device,
        cmd: vk::CommandBuffer,
        image_index: usize,
        instance_count: u32,
        pipeline: vk::Pipeline,
        pipeline_layout: vk::PipelineLayout,
        view_projection_set: vk::DescriptorSet,
    ) {
        let descriptor_sets = [self.descriptor_sets.set(image_index), view_projection_set];
        let vertex_buffers = [self.vertex_buffer.handle()];
        let offsets = [0];

        unsafe {
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline_layout,
                0,
                &descriptor_sets,
                &[],
            );
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline);
            device.cmd_bind_vertex_buffers(cmd, 0, &vertex_buffers, &offsets);
            device.cmd_bind_index_buffer(
                cmd,
                self.index_buffer.handle(),
                0,
                vk::IndexType::UINT32,
            );
            device.cmd_draw_indexed(cmd, self.index_count, instance_count, 0, 0, 0);
        }
    }
}
