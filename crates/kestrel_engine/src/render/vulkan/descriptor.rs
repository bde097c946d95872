//! Descriptor set layouts and descriptor sets
//!
//! Two fixed binding groups exist: the per-model-instance group (transform
//! array + combined image sampler) and the per-frame view/projection group.
//! The variants are a closed set, so the layouts and sets carry a kind tag
//! instead of dispatching through a trait.

use ash::{vk, Device};

use crate::core::stage::{LoadError, StageStack};
use crate::render::texture::Texture;
use crate::render::vulkan::buffer::Buffer;
use crate::render::vulkan::uniform::{UboModelInstance, UboViewProjection};

/// The closed set of descriptor-set layouts used by the fixed pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorLayoutKind {
    /// Set 0: per-instance transform array (vertex stage) and the model's
    /// texture sampler (fragment stage)
    ModelInstance,
    /// Set 1: per-frame view and projection matrices (vertex stage)
    ViewProjection,
}

/// A descriptor-set layout of one of the fixed kinds
pub struct DescriptorSetLayout {
    device: Device,
    layout: vk::DescriptorSetLayout,
    kind: DescriptorLayoutKind,
}

impl DescriptorSetLayout {
    /// Create the layout for the given kind
    pub fn new(device: Device, kind: DescriptorLayoutKind) -> Result<Self, LoadError> {
        let bindings: Vec<vk::DescriptorSetLayoutBinding> = match kind {
            DescriptorLayoutKind::ModelInstance => vec![
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(0)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .descriptor_count(1)
                    .stage_flags(vk::ShaderStageFlags::VERTEX)
                    .build(),
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(1)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .descriptor_count(1)
                    .stage_flags(vk::ShaderStageFlags::FRAGMENT)
                    .build(),
            ],
            DescriptorLayoutKind::ViewProjection => vec![
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(0)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .descriptor_count(1)
                    .stage_flags(vk::ShaderStageFlags::VERTEX)
                    .build(),
            ],
        };

        let create_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
        let layout = unsafe {
            device
                .create_descriptor_set_layout(&create_info, None)
                .map_err(|code| {
                    LoadError::new(format!(
                        "descriptor set layout creation failed for {kind:?}: {code:?}"
                    ))
                })?
        };

        Ok(Self {
            device,
            layout,
            kind,
        })
    }

    /// Layout handle
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// Which of the fixed layouts this is
    pub fn kind(&self) -> DescriptorLayoutKind {
        self.kind
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// A descriptor pool with one set per in-flight swapchain image, written
/// against that image's uniform buffer (and, for model-instance sets, the
/// model's texture).
pub struct DescriptorSets {
    parts: DescriptorSetParts,
    stages: StageStack<DescriptorSetParts>,
}

struct DescriptorSetParts {
    device: Device,
    layout: vk::DescriptorSetLayout,
    kind: DescriptorLayoutKind,
    buffers: Vec<vk::Buffer>,
    buffer_range: vk::DeviceSize,
    image_view: vk::ImageView,
    sampler: vk::Sampler,
    pool: vk::DescriptorPool,
    sets: Vec<vk::DescriptorSet>,
}

impl DescriptorSets {
    /// Sets for the per-frame view/projection group, one per uniform buffer
    pub fn for_view_projection(
        device: Device,
        layout: &DescriptorSetLayout,
        uniform_buffers: &[Buffer],
    ) -> Result<Self, LoadError> {
        if layout.kind() != DescriptorLayoutKind::ViewProjection {
            return Err(LoadError::new(format!(
                "view/projection descriptor sets cannot use a {:?} layout",
                layout.kind()
            )));
        }
        Self::for_view_projection_raw(device, layout.handle(), uniform_buffers)
    }

    /// View/projection sets from a raw layout handle, for owners that only
    /// carry handles instead of a [`DescriptorSetLayout`] reference
    pub(crate) fn for_view_projection_raw(
        device: Device,
        layout: vk::DescriptorSetLayout,
        uniform_buffers: &[Buffer],
    ) -> Result<Self, LoadError> {
        Self::build(
            device,
            layout,
            DescriptorLayoutKind::ViewProjection,
            uniform_buffers,
            std::mem::size_of::<UboViewProjection>() as vk::DeviceSize,
            vk::ImageView::null(),
            vk::Sampler::null(),
        )
    }

    /// Sets for the per-model-instance group, one per uniform buffer, each
    /// also bound to the model's texture
    pub fn for_model_instance(
        device: Device,
        layout: &DescriptorSetLayout,
        uniform_buffers: &[Buffer],
        texture: &Texture,
    ) -> Result<Self, LoadError> {
        if layout.kind() != DescriptorLayoutKind::ModelInstance {
            return Err(LoadError::new(format!(
                "model instance descriptor sets cannot use a {:?} layout",
                layout.kind()
            )));
        }
        Self::build(
            device,
            layout.handle(),
            DescriptorLayoutKind::ModelInstance,
            uniform_buffers,
            std::mem::size_of::<UboModelInstance>() as vk::DeviceSize,
            texture.view(),
            texture.sampler(),
        )
    }

    fn build(
        device: Device,
        layout: vk::DescriptorSetLayout,
        kind: DescriptorLayoutKind,
        uniform_buffers: &[Buffer],
        buffer_range: vk::DeviceSize,
        image_view: vk::ImageView,
        sampler: vk::Sampler,
    ) -> Result<Self, LoadError> {
        if uniform_buffers.is_empty() {
            return Err(LoadError::new(
                "descriptor sets need at least one uniform buffer",
            ));
        }

        let mut parts = DescriptorSetParts {
            device,
            layout,
            kind,
            buffers: uniform_buffers.iter().map(Buffer::handle).collect(),
            buffer_range,
            image_view,
            sampler,
            pool: vk::DescriptorPool::null(),
            sets: Vec::new(),
        };

        let mut stages = StageStack::new();
        stages.add(
            "descriptor pool",
            DescriptorSetParts::load_pool,
            DescriptorSetParts::unload_pool,
        );
        stages.add(
            "descriptor sets",
            DescriptorSetParts::load_sets,
            DescriptorSetParts::unload_sets,
        );
        stages.add(
            "descriptor writes",
            DescriptorSetParts::load_writes,
            DescriptorSetParts::unload_writes,
        );
        stages.load(&mut parts).map_err(|e| {
            e.context(format!("could not initialize {kind:?} descriptor sets"))
        })?;

        Ok(Self { parts, stages })
    }

    /// The set for one swapchain image index
    pub fn set(&self, image_index: usize) -> vk::DescriptorSet {
        self.parts.sets[image_index]
    }

    /// All allocated sets
    pub fn sets(&self) -> &[vk::DescriptorSet] {
        &self.parts.sets
    }
}

impl Drop for DescriptorSets {
    fn drop(&mut self) {
        self.stages.unload(&mut self.parts);
    }
}

impl DescriptorSetParts {
    fn load_pool(&mut self) -> Result<(), LoadError> {
        let count = self.buffers.len() as u32;
        let mut pool_sizes = vec![vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: count,
        }];
        if self.kind == DescriptorLayoutKind::ModelInstance {
            pool_sizes.push(vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: count,
            });
        }

        let create_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(count)
            .pool_sizes(&pool_sizes);

        self.pool = unsafe {
            self.device
                .create_descriptor_pool(&create_info, None)
                .map_err(|code| {
                    LoadError::new(format!("descriptor pool creation failed: {code:?}"))
                })?
        };
        Ok(())
    }

    fn unload_pool(&mut self) {
        unsafe {
            self.device.destroy_descriptor_pool(self.pool, None);
        }
        self.pool = vk::DescriptorPool::null();
    }

    fn load_sets(&mut self) -> Result<(), LoadError> {
        let layouts = vec![self.layout; self.buffers.len()];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);

        self.sets = unsafe {
            self.device
                .allocate_descriptor_sets(&alloc_info)
                .map_err(|code| {
                    LoadError::new(format!("descriptor set allocation failed: {code:?}"))
                })?
        };
        Ok(())
    }

    fn unload_sets(&mut self) {
        // Sets are returned implicitly when their pool is destroyed.
        self.sets.clear();
    }

    fn load_writes(&mut self) -> Result<(), LoadError> {
        for (set, &buffer) in self.sets.iter().zip(&self.buffers) {
            let buffer_info = [vk::DescriptorBufferInfo {
                buffer,
                offset: 0,
                range: self.buffer_range,
            }];

            let mut writes = vec![vk::WriteDescriptorSet::builder()
                .dst_set(*set)
                .dst_binding(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(&buffer_info)
                .build()];

            let image_info = [vk::DescriptorImageInfo {
                image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                image_view: self.image_view,
                sampler: self.sampler,
            }];
            if self.kind == DescriptorLayoutKind::ModelInstance {
                writes.push(
                    vk::WriteDescriptorSet::builder()
                        .dst_set(*set)
                        .dst_binding(1)
                        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                        .image_info(&image_info)
                        .build(),
                );
            }

            unsafe {
                self.device.update_descriptor_sets(&writes, &[]);
            }
        }
        Ok(())
    }

    fn unload_writes(&mut self) {
        // Writes have no teardown of their own.
    }
}
