//! Render pass, framebuffers, and the fixed graphics pipeline
//!
//! The pipeline is built once. Viewport, scissor, and line width are dynamic
//! state supplied per command buffer, so a window resize only needs the
//! framebuffer chain rebuilt, not the pipeline.

use ash::{vk, Device};
use std::ffi::CStr;

use crate::core::stage::{LoadError, StageStack};
use crate::render::mesh::Vertex;
use crate::render::vulkan::buffer::Buffer;
use crate::render::vulkan::descriptor::{DescriptorLayoutKind, DescriptorSetLayout, DescriptorSets};
use crate::render::vulkan::device::RenderDevice;
use crate::render::vulkan::swapchain::Swapchain;
use crate::render::vulkan::uniform::UboViewProjection;
use crate::render::vulkan::RenderError;

/// Pipeline layout combining the instance set (index 0) and the frame set
/// (index 1)
pub struct PipelineLayout {
    device: Device,
    layout: vk::PipelineLayout,
}

impl PipelineLayout {
    /// Create the layout over the two fixed descriptor-set layouts
    pub fn new(
        device: Device,
        model_instance: &DescriptorSetLayout,
        view_projection: &DescriptorSetLayout,
    ) -> Result<Self, LoadError> {
        let set_layouts = [model_instance.handle(), view_projection.handle()];
        let create_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&set_layouts);

        let layout = unsafe {
            device
                .create_pipeline_layout(&create_info, None)
                .map_err(|code| {
                    LoadError::new(format!("pipeline layout creation failed: {code:?}"))
                })?
        };

        Ok(Self { device, layout })
    }

    /// Layout handle
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// Vertex buffer binding for the fixed vertex layout
pub fn vertex_binding_description() -> vk::VertexInputBindingDescription {
    vk::VertexInputBindingDescription {
        binding: 0,
        stride: std::mem::size_of::<Vertex>() as u32,
        input_rate: vk::VertexInputRate::VERTEX,
    }
}

/// The four vertex attributes: position, normal, color, texture coordinate.
/// Offsets follow the tightly packed `repr(C)` field order of [`Vertex`].
pub fn vertex_attribute_descriptions() -> [vk::VertexInputAttributeDescription; 4] {
    [
        vk::VertexInputAttributeDescription {
            location: 0,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: 0,
        },
        vk::VertexInputAttributeDescription {
            location: 1,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: 12,
        },
        vk::VertexInputAttributeDescription {
            location: 2,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: 24,
        },
        vk::VertexInputAttributeDescription {
            location: 3,
            binding: 0,
            format: vk::Format::R32G32_SFLOAT,
            offset: 36,
        },
    ]
}

/// The graphics pipeline with the resources it owns: per-image
/// view/projection uniform buffers and descriptor sets, the render pass, and
/// one framebuffer per swapchain image view.
pub struct GraphicsPipeline {
    parts: PipelineParts,
    stages: StageStack<PipelineParts>,
}

struct PipelineParts {
    device: Device,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    color_format: vk::Format,
    extent: vk::Extent2D,
    image_views: Vec<vk::ImageView>,
    pipeline_layout: vk::PipelineLayout,
    view_projection_layout: vk::DescriptorSetLayout,
    vert_shader: vk::ShaderModule,
    frag_shader: vk::ShaderModule,
    ub_view_projection: Vec<Buffer>,
    ds_view_projection: Option<DescriptorSets>,
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
    pipeline: vk::Pipeline,
}

impl GraphicsPipeline {
    /// Build the pipeline and everything it owns through the staged protocol
    pub fn new(
        device: &RenderDevice,
        swapchain: &Swapchain,
        pipeline_layout: &PipelineLayout,
        view_projection_layout: &DescriptorSetLayout,
    ) -> Result<Self, LoadError> {
        if view_projection_layout.kind() != DescriptorLayoutKind::ViewProjection {
            return Err(LoadError::new(
                "graphics pipeline expects the view/projection layout",
            ));
        }

        let mut parts = PipelineParts {
            device: device.logical().clone(),
            memory_properties: device.memory_properties(),
            color_format: swapchain.format().format,
            extent: swapchain.extent(),
            image_views: swapchain.image_views().to_vec(),
            pipeline_layout: pipeline_layout.handle(),
            view_projection_layout: view_projection_layout.handle(),
            vert_shader: device.vert_shader(),
            frag_shader: device.frag_shader(),
            ub_view_projection: Vec::new(),
            ds_view_projection: None,
            render_pass: vk::RenderPass::null(),
            framebuffers: Vec::new(),
            pipeline: vk::Pipeline::null(),
        };

        let mut stages = StageStack::new();
        stages.add(
            "view projection uniform buffers",
            PipelineParts::load_uniform_buffers,
            PipelineParts::unload_uniform_buffers,
        );
        stages.add(
            "view projection descriptor sets",
            PipelineParts::load_descriptor_sets,
            PipelineParts::unload_descriptor_sets,
        );
        stages.add(
            "render pass",
            PipelineParts::load_render_pass,
            PipelineParts::unload_render_pass,
        );
        stages.add(
            "framebuffers",
            PipelineParts::load_framebuffers,
            PipelineParts::unload_framebuffers,
        );
        stages.add(
            "graphics pipeline object",
            PipelineParts::load_pipeline,
            PipelineParts::unload_pipeline,
        );
        stages
            .load(&mut parts)
            .map_err(|e| e.context("could not initialize graphics pipeline"))?;

        Ok(Self { parts, stages })
    }

    /// Pipeline handle
    pub fn handle(&self) -> vk::Pipeline {
        self.parts.pipeline
    }

    /// Render pass handle
    pub fn render_pass(&self) -> vk::RenderPass {
        self.parts.render_pass
    }

    /// Framebuffer for one swapchain image index
    pub fn framebuffer(&self, image_index: usize) -> vk::Framebuffer {
        self.parts.framebuffers[image_index]
    }

    /// View/projection descriptor set for one swapchain image index
    pub fn view_projection_set(&self, image_index: usize) -> vk::DescriptorSet {
        self.parts
            .ds_view_projection
            .as_ref()
            .expect("pipeline is loaded")
            .set(image_index)
    }

    /// Write this frame's view/projection matrices for the acquired image
    pub fn update_view_projection(
        &self,
        image_index: usize,
        ubo: &UboViewProjection,
    ) -> Result<(), RenderError> {
        self.parts.ub_view_projection[image_index].copy_data(ubo)
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        self.stages.unload(&mut self.parts);
    }
}

impl PipelineParts {
    fn load_uniform_buffers(&mut self) -> Result<(), LoadError> {
        // One view/projection slab per swapchain image, so the CPU never
        // rewrites matrices the GPU is still reading for an earlier image.
        let mut buffers = Vec::with_capacity(self.image_views.len());
        for _ in 0..self.image_views.len() {
            buffers.push(Buffer::uniform_raw(
                self.device.clone(),
                self.memory_properties,
                std::mem::size_of::<UboViewProjection>() as vk::DeviceSize,
            )?);
        }
        self.ub_view_projection = buffers;
        Ok(())
    }

    fn unload_uniform_buffers(&mut self) {
        self.ub_view_projection.clear();
    }

    fn load_descriptor_sets(&mut self) -> Result<(), LoadError> {
        let layout_handle = self.view_projection_layout;
        self.ds_view_projection = Some(DescriptorSets::for_view_projection_raw(
            self.device.clone(),
            layout_handle,
            &self.ub_view_projection,
        )?);
        Ok(())
    }

    fn unload_descriptor_sets(&mut self) {
        self.ds_view_projection = None;
    }

    fn load_render_pass(&mut self) -> Result<(), LoadError> {
        let color_attachment = vk::AttachmentDescription::builder()
            .format(self.color_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .build();
        let attachments = [color_attachment];

        let color_attachment_refs = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let subpasses = [vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_attachment_refs)
            .build()];

        // Color writes wait until the presentation engine has released the
        // image.
        let dependencies = [vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            )
            .build()];

        let create_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        self.render_pass = unsafe {
            self.device
                .create_render_pass(&create_info, None)
                .map_err(|code| LoadError::new(format!("render pass creation failed: {code:?}")))?
        };
        Ok(())
    }

    fn unload_render_pass(&mut self) {
        unsafe {
            self.device.destroy_render_pass(self.render_pass, None);
        }
        self.render_pass = vk::RenderPass::null();
    }

    fn load_framebuffers(&mut self) -> Result<(), LoadError> {
        self.framebuffers.reserve(self.image_views.len());
        for &view in &self.image_views {
            let attachments = [view];
            let create_info = vk::FramebufferCreateInfo::builder()
                .render_pass(self.render_pass)
                .attachments(&attachments)
                .width(self.extent.width)
                .height(self.extent.height)
                .layers(1);

            match unsafe { self.device.create_framebuffer(&create_info, None) } {
                Ok(framebuffer) => self.framebuffers.push(framebuffer),
                Err(code) => {
                    // A failed acquire never sees its own release; clean up
                    // the framebuffers created so far.
                    self.unload_framebuffers();
                    return Err(LoadError::new(format!(
                        "framebuffer creation failed: {code:?}"
                    )));
                }
            }
        }
        Ok(())
    }

    fn unload_framebuffers(&mut self) {
        for framebuffer in self.framebuffers.drain(..) {
            unsafe {
                self.device.destroy_framebuffer(framebuffer, None);
            }
        }
    }

    fn load_pipeline(&mut self) -> Result<(), LoadError> {
        let entry_point = CStr::from_bytes_with_nul(b"main\0").expect("static entry point name");
        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(self.vert_shader)
                .name(entry_point)
                .build(),
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(self.frag_shader)
                .name(entry_point)
                .build(),
        ];

        let vertex_bindings = [vertex_binding_description()];
        let vertex_attributes = vertex_attribute_descriptions();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&vertex_bindings)
            .vertex_attribute_descriptions(&vertex_attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        // Viewport and scissor are dynamic; only the counts are baked in.
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false)
            .line_width(1.0);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .sample_shading_enable(false)
            .min_sample_shading(1.0);

        let blend_attachments = [vk::PipelineColorBlendAttachmentState::builder()
            .blend_enable(false)
            .color_write_mask(
                vk::ColorComponentFlags::R
                    | vk::ColorComponentFlags::G
                    | vk::ColorComponentFlags::B
                    | vk::ColorComponentFlags::A,
            )
            .build()];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&blend_attachments);

        let dynamic_states = [
            vk::DynamicState::VIEWPORT,
            vk::DynamicState::SCISSOR,
            vk::DynamicState::LINE_WIDTH,
        ];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let create_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(self.pipeline_layout)
            .render_pass(self.render_pass)
            .subpass(0)
            .build();

        let pipelines = unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
                .map_err(|(_, code)| {
                    LoadError::new(format!("graphics pipeline creation failed: {code:?}"))
                })?
        };
        self.pipeline = pipelines[0];
        Ok(())
    }

    fn unload_pipeline(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
        }
        self.pipeline = vk::Pipeline::null();
    }
}
