//! The engine context: staged initialization, the per-frame state machine,
//! and reverse-order teardown
//!
//! The host owns the [`Engine`] value. Constructing it runs the full stage
//! stack with rollback on the first failure; dropping it (or calling
//! [`Engine::shutdown`]) waits for the device to go idle and unwinds the
//! stack in reverse. Double initialization is impossible by construction:
//! there is no global state, only the value the host holds.

use ash::vk;
use raw_window_handle::{
    HasRawDisplayHandle, HasRawWindowHandle, RawDisplayHandle, RawWindowHandle,
};
use slotmap::SlotMap;
use std::time::{Duration, Instant};

use crate::core::config::EngineConfig;
use crate::core::stage::{LoadError, StageStack};
use crate::foundation::time::FrameLimiter;
use crate::render::camera::view_projection;
use crate::render::frame::{plan_draws, FramePacket, ModelHandle};
use crate::render::mesh::MeshData;
use crate::render::model::Model;
use crate::render::texture::TextureData;
use crate::render::vulkan::commands::CommandPool;
use crate::render::vulkan::descriptor::{DescriptorLayoutKind, DescriptorSetLayout};
use crate::render::vulkan::device::{RenderDevice, SelectionError};
use crate::render::vulkan::instance::RenderInstance;
use crate::render::vulkan::pipeline::{GraphicsPipeline, PipelineLayout};
use crate::render::vulkan::queue::{rank_by_specificity, QueueFamily};
use crate::render::vulkan::swapchain::Swapchain;
use crate::render::vulkan::sync::{FrameSlots, MAX_FRAMES_IN_FLIGHT};
use crate::render::vulkan::RenderError;

/// Fixed background color, a dark gray-blue
const CLEAR_COLOR: [f32; 4] = [0.12, 0.12, 0.18, 1.0];

/// Everything the stage stack acquires and releases. Resources record their
/// dependencies as indices into these collections; destruction order is
/// driven by the stack, not by shared ownership.
struct EngineResources {
    config: EngineConfig,
    display_handle: RawDisplayHandle,
    window_handle: RawWindowHandle,
    limiter: Option<FrameLimiter>,
    instance: Option<RenderInstance>,
    devices: Vec<RenderDevice>,
    families: Vec<QueueFamily>,
    graphics_pool: Vec<usize>,
    present_pool: Vec<usize>,
    swapchain: Option<Swapchain>,
    dsl_model_instance: Option<DescriptorSetLayout>,
    dsl_view_projection: Option<DescriptorSetLayout>,
    pipeline_layout: Option<PipelineLayout>,
    pipeline: Option<GraphicsPipeline>,
    frame_slots: Option<FrameSlots>,
    draw_pool: Option<CommandPool>,
}

/// The engine context owned by the host
pub struct Engine {
    resources: EngineResources,
    stages: StageStack<EngineResources>,
    swapchain_stage: usize,
    models: SlotMap<ModelHandle, Model>,
}

impl Engine {
    /// Initialize the full stack: configuration, instance, devices and
    /// queue pools, swapchain, descriptor layouts, pipeline, frame
    /// synchronization, and the draw command pool. On the first failure the
    /// already-acquired stages are rolled back before the error returns;
    /// nothing is left partially running.
    pub fn new<W>(config: EngineConfig, window: &W) -> Result<Self, LoadError>
    where
        W: HasRawDisplayHandle + HasRawWindowHandle,
    {
        config
            .validate()
            .map_err(|e| LoadError::new(e.to_string()))?;

        let mut resources = EngineResources {
            config,
            display_handle: window.raw_display_handle(),
            window_handle: window.raw_window_handle(),
            limiter: None,
            instance: None,
            devices: Vec::new(),
            families: Vec::new(),
            graphics_pool: Vec::new(),
            present_pool: Vec::new(),
            swapchain: None,
            dsl_model_instance: None,
            dsl_view_projection: None,
            pipeline_layout: None,
            pipeline: None,
            frame_slots: None,
            draw_pool: None,
        };

        let mut stages = StageStack::new();
        stages.add(
            "configuration",
            EngineResources::load_configuration,
            EngineResources::unload_configuration,
        );
        stages.add(
            "render instance",
            EngineResources::load_instance,
            EngineResources::unload_instance,
        );
        stages.add(
            "devices and queue pools",
            EngineResources::load_devices,
            EngineResources::unload_devices,
        );
        let swapchain_stage = stages.len();
        stages.add(
            "swapchain",
            EngineResources::load_swapchain,
            EngineResources::unload_swapchain,
        );
        stages.add(
            "descriptor set layouts",
            EngineResources::load_descriptor_set_layouts,
            EngineResources::unload_descriptor_set_layouts,
        );
        stages.add(
            "pipeline layout",
            EngineResources::load_pipeline_layout,
            EngineResources::unload_pipeline_layout,
        );
        stages.add(
            "graphics pipeline",
            EngineResources::load_pipeline,
            EngineResources::unload_pipeline,
        );
        stages.add(
            "frame synchronization",
            EngineResources::load_frame_sync,
            EngineResources::unload_frame_sync,
        );
        stages.add(
            "draw command pool",
            EngineResources::load_draw_command_pool,
            EngineResources::unload_draw_command_pool,
        );

        stages.load(&mut resources)?;
        log::info!("engine initialized");

        Ok(Self {
            resources,
            stages,
            swapchain_stage,
            models: SlotMap::with_key(),
        })
    }

    /// The configuration the engine was initialized with
    pub fn config(&self) -> &EngineConfig {
        &self.resources.config
    }

    /// Index of the frame slot the next `render_frame` call will use
    pub fn frame_slot_index(&self) -> usize {
        self.resources.frame_slots().current_index()
    }

    /// Number of swapchain images granted by the platform
    pub fn swapchain_image_count(&self) -> usize {
        self.resources.swapchain().image_count()
    }

    /// Upload a model from validated mesh data and raw texture pixels.
    /// Transfers run synchronously on a queue leased from the most specific
    /// graphics-capable family of the presentation device.
    pub fn create_model(
        &mut self,
        mesh: &MeshData,
        texture: &TextureData,
    ) -> Result<ModelHandle, LoadError> {
        let resources = &self.resources;
        let device = resources.presentation_device()?;
        let family = resources.graphics_family()?;
        let layout = resources
            .dsl_model_instance
            .as_ref()
            .ok_or_else(|| LoadError::new("descriptor set layouts are not loaded"))?;
        let image_count = resources.swapchain().image_count();

        let model = Model::new(device, family, layout, image_count, mesh, texture)?;
        Ok(self.models.insert(model))
    }

    /// Destroy a model. Waits for the device to go idle first so in-flight
    /// frames can no longer reference its resources.
    pub fn destroy_model(&mut self, handle: ModelHandle) -> Result<(), RenderError> {
        if !self.models.contains_key(handle) {
            return Err(RenderError::UnknownModel);
        }
        unsafe {
            self.resources
                .presentation_device_logical()
                .device_wait_idle()
                .map_err(|code| RenderError::Api {
                    what: "device idle wait",
                    code,
                })?;
        }
        self.models.remove(handle);
        Ok(())
    }

    /// Render one frame: wait on the slot fence, acquire an image, record
    /// one instanced draw per model group, update the uniform buffers,
    /// submit, present, and advance the slot. Returns the reported frame
    /// duration after FPS pacing. Failures are fatal to this frame and
    /// surfaced to the host; the next call starts a fresh frame.
    pub fn render_frame(&mut self, packet: &FramePacket) -> Result<Duration, RenderError> {
        let frame_start = Instant::now();

        let plan = plan_draws(&packet.groups)?;
        for draw in &plan {
            if !self.models.contains_key(packet.groups[draw.group].model) {
                return Err(RenderError::UnknownModel);
            }
        }

        let resources = &self.resources;
        let device = resources.presentation_device_logical();
        let swapchain = resources.swapchain();
        let pipeline = resources.pipeline();
        let extent = swapchain.extent();

        // Backpressure point: block until the GPU has finished the frame
        // that last used this slot.
        let (image_available, render_finished, in_flight) = {
            let slot = resources.frame_slots().current();
            slot.in_flight.wait(u64::MAX)?;
            slot.in_flight.reset()?;
            (
                slot.image_available.handle(),
                slot.render_finished.handle(),
                slot.in_flight.handle(),
            )
        };

        let (image_index, _suboptimal) = unsafe {
            swapchain
                .loader()
                .acquire_next_image(
                    swapchain.handle(),
                    u64::MAX,
                    image_available,
                    vk::Fence::null(),
                )
                .map_err(|code| RenderError::Api {
                    what: "swapchain image acquire",
                    code,
                })?
        };
        let image = image_index as usize;

        // Record the draw command buffer for the acquired image.
        let cmd = resources.draw_pool().buffers()[image];
        unsafe {
            device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .map_err(|code| RenderError::Api {
                    what: "command buffer reset",
                    code,
                })?;

            let begin_info = vk::CommandBufferBeginInfo::builder().flags(
                vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT
                    | vk::CommandBufferUsageFlags::SIMULTANEOUS_USE,
            );
            device
                .begin_command_buffer(cmd, &begin_info)
                .map_err(|code| RenderError::Api {
                    what: "command buffer begin",
                    code,
                })?;

            let clear_values = [vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: CLEAR_COLOR,
                },
            }];
            let render_pass_begin = vk::RenderPassBeginInfo::builder()
                .render_pass(pipeline.render_pass())
                .framebuffer(pipeline.framebuffer(image))
                .render_area(vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent,
                })
                .clear_values(&clear_values);
            device.cmd_begin_render_pass(cmd, &render_pass_begin, vk::SubpassContents::INLINE);

            // Viewport and scissor are dynamic state, set from the current
            // surface size.
            let viewport = vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent.width as f32,
                height: extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            };
            device.cmd_set_viewport(cmd, 0, &[viewport]);
            let scissor = vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            };
            device.cmd_set_scissor(cmd, 0, &[scissor]);

            for draw in &plan {
                let group = &packet.groups[draw.group];
                let model = &self.models[group.model];
                model.record_draw(
                    device,
                    cmd,
                    image,
                    draw.instance_count,
                    pipeline.handle(),
                    resources.pipeline_layout().handle(),
                    pipeline.view_projection_set(image),
                );
            }

            device.cmd_end_render_pass(cmd);
            device
                .end_command_buffer(cmd)
                .map_err(|code| RenderError::Api {
                    what: "command buffer end",
                    code,
                })?;
        }

        // Update the uniform buffers for the acquired image index.
        let ubo = view_projection(&packet.camera, extent.width, extent.height);
        pipeline.update_view_projection(image, &ubo)?;
        for draw in &plan {
            let group = &packet.groups[draw.group];
            self.models[group.model].update_instances(image, &group.transforms)?;
        }

        // Submit on a queue leased from the presentation pool, then present.
        {
            let family = resources.presentation_family().expect("engine is loaded");
            let queue = family.lease()?;

            let wait_semaphores = [image_available];
            let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
            let command_buffers = [cmd];
            let signal_semaphores = [render_finished];
            let submit_info = vk::SubmitInfo::builder()
                .wait_semaphores(&wait_semaphores)
                .wait_dst_stage_mask(&wait_stages)
                .command_buffers(&command_buffers)
                .signal_semaphores(&signal_semaphores)
                .build();

            unsafe {
                device
                    .queue_submit(queue.handle(), &[submit_info], in_flight)
                    .map_err(|code| RenderError::Api {
                        what: "draw submit",
                        code,
                    })?;
            }

            let swapchains = [swapchain.handle()];
            let image_indices = [image_index];
            let present_info = vk::PresentInfoKHR::builder()
                .wait_semaphores(&signal_semaphores)
                .swapchains(&swapchains)
                .image_indices(&image_indices);

            unsafe {
                swapchain
                    .loader()
                    .queue_present(queue.handle(), &present_info)
                    .map_err(|code| RenderError::Api {
                        what: "present",
                        code,
                    })?;
            }
        }

        self.resources
            .frame_slots_mut()
            .advance();

        Ok(self.resources.limiter().wait(frame_start))
    }

    /// Recreate the presentation chain for a new surface size by reloading
    /// the stack from the swapchain stage down, after a device-idle wait.
    /// Models hold per-image resources; if the granted image count changes
    /// they must be recreated by the host.
    pub fn reconfigure_surface(&mut self, width: u32, height: u32) -> Result<(), LoadError> {
        let old_image_count = self.resources.swapchain().image_count();

        unsafe {
            self.resources
                .presentation_device_logical()
                .device_wait_idle()
                .map_err(|code| LoadError::new(format!("device idle wait failed: {code:?}")))?;
        }

        self.resources.config.screen_width = width;
        self.resources.config.screen_height = height;
        self.stages
            .reload(&mut self.resources, self.swapchain_stage)?;

        let new_image_count = self.resources.swapchain().image_count();
        if new_image_count != old_image_count && !self.models.is_empty() {
            log::warn!(
                "swapchain image count changed from {old_image_count} to {new_image_count}; \
                 existing models must be recreated"
            );
        }
        Ok(())
    }

    /// Wait for the device to go idle, then unwind the stage stack. Dropping
    /// the engine does the same; this form only makes the teardown point
    /// explicit.
    pub fn shutdown(self) {}
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Some(device) = self.resources.devices.first() {
            unsafe {
                let _ = device.logical().device_wait_idle();
            }
        }
        // Models reference device resources; release them before the stack
        // unwinds the device.
        self.models.clear();
        self.stages.unload(&mut self.resources);
        log::info!("engine shut down");
    }
}

impl EngineResources {
    fn load_configuration(&mut self) -> Result<(), LoadError> {
        self.config
            .validate()
            .map_err(|e| LoadError::new(e.to_string()))?;
        self.limiter = Some(FrameLimiter::from_max_fps(self.config.max_fps));
        log::debug!(
            "configuration: {}x{} at {} fps max, debug {}",
            self.config.screen_width,
            self.config.screen_height,
            self.config.max_fps,
            self.config.debug,
        );
        Ok(())
    }

    fn unload_configuration(&mut self) {
        self.limiter = None;
    }

    fn load_instance(&mut self) -> Result<(), LoadError> {
        self.instance = Some(RenderInstance::new(
            &self.config,
            self.display_handle,
            self.window_handle,
        )?);
        Ok(())
    }

    fn unload_instance(&mut self) {
        self.instance = None;
    }

    fn load_devices(&mut self) -> Result<(), LoadError> {
        // A failed acquire never sees its own release; clean up whatever
        // partial device state was built before returning the error.
        if let Err(error) = self.try_load_devices() {
            self.unload_devices();
            return Err(error);
        }
        Ok(())
    }

    fn try_load_devices(&mut self) -> Result<(), LoadError> {
        let instance = self
            .instance
            .as_ref()
            .ok_or_else(|| LoadError::new("render instance is not loaded"))?;

        let physical_devices = unsafe {
            instance
                .handle()
                .enumerate_physical_devices()
                .map_err(|code| {
                    LoadError::new(format!("physical device enumeration failed: {code:?}"))
                })?
        };
        if physical_devices.is_empty() {
            return Err(SelectionError::NoDevices.into());
        }

        for (device_index, &physical) in physical_devices.iter().enumerate() {
            let family_properties = unsafe {
                instance
                    .handle()
                    .get_physical_device_queue_family_properties(physical)
            };

            // The first enumerated device hosts the presentation surface.
            let device = RenderDevice::new(
                instance.handle(),
                physical,
                &family_properties,
                device_index == 0,
                &self.config.shaders,
                self.config.debug,
            )?;

            for (family_index, properties) in family_properties.iter().enumerate() {
                let family = QueueFamily::new(
                    device.logical(),
                    device_index,
                    family_index as u32,
                    properties,
                )?;
                let slot = self.families.len();

                if properties.queue_count > 0 && family.supports_graphics() {
                    self.graphics_pool.push(slot);
                }

                let presentable = unsafe {
                    instance
                        .surface_loader()
                        .get_physical_device_surface_support(
                            physical,
                            family_index as u32,
                            instance.surface(),
                        )
                        .map_err(|code| {
                            LoadError::new(format!(
                                "surface support query failed: {code:?}"
                            ))
                        })?
                };
                if presentable {
                    self.present_pool.push(slot);
                }

                self.families.push(family);
            }

            if device_index == 0 {
                log::info!("presentation device: {}", device.name());
            }
            self.devices.push(device);
        }

        // Most specific families first; generalists are overflow capacity.
        rank_by_specificity(&mut self.graphics_pool, &self.families);
        rank_by_specificity(&mut self.present_pool, &self.families);

        if self.graphics_pool.is_empty() {
            return Err(SelectionError::NoGraphicsFamily.into());
        }
        if self.present_pool.is_empty() {
            return Err(SelectionError::NoPresentationFamily.into());
        }
        Ok(())
    }

    fn unload_devices(&mut self) {
        self.graphics_pool.clear();
        self.present_pool.clear();
        self.families.clear();
        self.devices.clear();
    }

    fn load_swapchain(&mut self) -> Result<(), LoadError> {
        let instance = self
            .instance
            .as_ref()
            .ok_or_else(|| LoadError::new("render instance is not loaded"))?;
        let device = self.devices.first().ok_or(SelectionError::NoDevices)?;

        self.swapchain = Some(Swapchain::new(
            device,
            instance,
            vk::Extent2D {
                width: self.config.screen_width,
                height: self.config.screen_height,
            },
            self.config.debug,
        )?);
        Ok(())
    }

    fn unload_swapchain(&mut self) {
        self.swapchain = None;
    }

    fn load_descriptor_set_layouts(&mut self) -> Result<(), LoadError> {
        let device = self.presentation_device()?.logical().clone();
        let model_instance =
            DescriptorSetLayout::new(device.clone(), DescriptorLayoutKind::ModelInstance)?;
        let view_projection =
            DescriptorSetLayout::new(device, DescriptorLayoutKind::ViewProjection)?;
        self.dsl_model_instance = Some(model_instance);
        self.dsl_view_projection = Some(view_projection);
        Ok(())
    }

    fn unload_descriptor_set_layouts(&mut self) {
        self.dsl_view_projection = None;
        self.dsl_model_instance = None;
    }

    fn load_pipeline_layout(&mut self) -> Result<(), LoadError> {
        let device = self.presentation_device()?.logical().clone();
        let model_instance = self
            .dsl_model_instance
            .as_ref()
            .ok_or_else(|| LoadError::new("descriptor set layouts are not loaded"))?;
        let view_projection = self
            .dsl_view_projection
            .as_ref()
            .ok_or_else(|| LoadError::new("descriptor set layouts are not loaded"))?;

        self.pipeline_layout = Some(PipelineLayout::new(
            device,
            model_instance,
            view_projection,
        )?);
        Ok(())
    }

    fn unload_pipeline_layout(&mut self) {
        self.pipeline_layout = None;
    }

    fn load_pipeline(&mut self) -> Result<(), LoadError> {
        let device = self.presentation_device()?;
        let swapchain = self
            .swapchain
            .as_ref()
            .ok_or_else(|| LoadError::new("swapchain is not loaded"))?;
        let pipeline_layout = self
            .pipeline_layout
            .as_ref()
            .ok_or_else(|| LoadError::new("pipeline layout is not loaded"))?;
        let view_projection = self
            .dsl_view_projection
            .as_ref()
            .ok_or_else(|| LoadError::new("descriptor set layouts are not loaded"))?;

        self.pipeline = Some(GraphicsPipeline::new(
            device,
            swapchain,
            pipeline_layout,
            view_projection,
        )?);
        Ok(())
    }

    fn unload_pipeline(&mut self) {
        self.pipeline = None;
    }

    fn load_frame_sync(&mut self) -> Result<(), LoadError> {
        let device = self.presentation_device()?.logical();
        self.frame_slots = Some(FrameSlots::new(device, MAX_FRAMES_IN_FLIGHT)?);
        Ok(())
    }

    fn unload_frame_sync(&mut self) {
        self.frame_slots = None;
    }

    fn load_draw_command_pool(&mut self) -> Result<(), LoadError> {
        let device = self.presentation_device()?.logical().clone();
        let family = self.presentation_family()?;
        let family_index = family.family_index();
        let image_count = self
            .swapchain
            .as_ref()
            .ok_or_else(|| LoadError::new("swapchain is not loaded"))?
            .image_count() as u32;

        // One draw command buffer per granted swapchain image.
        self.draw_pool = Some(CommandPool::new(device, family_index, image_count)?);
        Ok(())
    }

    fn unload_draw_command_pool(&mut self) {
        self.draw_pool = None;
    }

    fn presentation_device(&self) -> Result<&RenderDevice, LoadError> {
        self.devices
            .first()
            .ok_or_else(|| LoadError::new("no devices are loaded"))
    }

    /// Most specific presentation-capable family on the presentation device.
    /// Queue pools span every device, but draw submission must stay on the
    /// device that owns the swapchain.
    fn presentation_family(&self) -> Result<&QueueFamily, SelectionError> {
        self.present_pool
            .iter()
            .map(|&slot| &self.families[slot])
            .find(|family| family.device_index() == 0)
            .ok_or(SelectionError::NoPresentationFamily)
    }

    /// Most specific graphics-capable family on the presentation device,
    /// used for load-time transfers.
    fn graphics_family(&self) -> Result<&QueueFamily, SelectionError> {
        self.graphics_pool
            .iter()
            .map(|&slot| &self.families[slot])
            .find(|family| family.device_index() == 0)
            .ok_or(SelectionError::NoGraphicsFamily)
    }

    // Accessors below are only reachable while the stack is loaded; an
    // Engine value guarantees that.
    fn presentation_device_logical(&self) -> &ash::Device {
        self.devices.first().expect("engine is loaded").logical()
    }

    fn swapchain(&self) -> &Swapchain {
        self.swapchain.as_ref().expect("engine is loaded")
    }

    fn pipeline(&self) -> &GraphicsPipeline {
        self.pipeline.as_ref().expect("engine is loaded")
    }

    fn pipeline_layout(&self) -> &PipelineLayout {
        self.pipeline_layout.as_ref().expect("engine is loaded")
    }

    fn frame_slots(&self) -> &FrameSlots {
        self.frame_slots.as_ref().expect("engine is loaded")
    }

    fn frame_slots_mut(&mut self) -> &mut FrameSlots {
        self.frame_slots.as_mut().expect("engine is loaded")
    }

    fn draw_pool(&self) -> &CommandPool {
        self.draw_pool.as_ref().expect("engine is loaded")
    }

    fn limiter(&self) -> &FrameLimiter {
        self.limiter.as_ref().expect("engine is loaded")
    }
}
