//! Command pool ownership and scoped one-time submission

use ash::{vk, Device};

use crate::core::stage::{LoadError, StageStack};
use crate::render::vulkan::queue::QueueLease;

/// Command pool with its pre-allocated primary command buffers
pub struct CommandPool {
    parts: CommandPoolParts,
    stages: StageStack<CommandPoolParts>,
}

struct CommandPoolParts {
    device: Device,
    queue_family_index: u32,
    buffer_count: u32,
    pool: vk::CommandPool,
    buffers: Vec<vk::CommandBuffer>,
}

impl CommandPool {
    /// Create a pool on the given queue family and allocate `buffer_count`
    /// primary command buffers from it
    pub fn new(
        device: Device,
        queue_family_index: u32,
        buffer_count: u32,
    ) -> Result<Self, LoadError> {
        let mut parts = CommandPoolParts {
            device,
            queue_family_index,
            buffer_count,
            pool: vk::CommandPool::null(),
            buffers: Vec::new(),
        };

        let mut stages = StageStack::new();
        stages.add(
            "command pool",
            CommandPoolParts::load_pool,
            CommandPoolParts::unload_pool,
        );
        stages.add(
            "command buffers",
            CommandPoolParts::load_buffers,
            CommandPoolParts::unload_buffers,
        );
        stages
            .load(&mut parts)
            .map_err(|e| e.context("could not initialize command pool"))?;

        Ok(Self { parts, stages })
    }

    /// The allocated command buffers
    pub fn buffers(&self) -> &[vk::CommandBuffer] {
        &self.parts.buffers
    }

    /// The pool handle
    pub fn handle(&self) -> vk::CommandPool {
        self.parts.pool
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        self.stages.unload(&mut self.parts);
    }
}

impl CommandPoolParts {
    fn load_pool(&mut self) -> Result<(), LoadError> {
        let create_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(self.queue_family_index);

        self.pool = unsafe {
            self.device
                .create_command_pool(&create_info, None)
                .map_err(|code| {
                    LoadError::new(format!("command pool creation failed: {code:?}"))
                })?
        };
        Ok(())
    }

    fn unload_pool(&mut self) {
        unsafe {
            self.device.destroy_command_pool(self.pool, None);
        }
        self.pool = vk::CommandPool::null();
    }

    fn load_buffers(&mut self) -> Result<(), LoadError> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(self.buffer_count);

        self.buffers = unsafe {
            self.device
                .allocate_command_buffers(&alloc_info)
                .map_err(|code| {
                    LoadError::new(format!("command buffer allocation failed: {code:?}"))
                })?
        };
        Ok(())
    }

    fn unload_buffers(&mut self) {
        // Command buffers are freed implicitly when their pool is destroyed.
        self.buffers.clear();
    }
}

/// Scoped one-time command submission: begin, caller-supplied recording,
/// end, submit on the leased queue, block until that queue is idle.
/// Synchronous by contract; acceptable only at resource load time, never per
/// frame.
pub fn submit_one_time<F>(
    device: &Device,
    queue: &QueueLease,
    command_buffer: vk::CommandBuffer,
    record: F,
) -> Result<(), LoadError>
where
    F: FnOnce(&Device, vk::CommandBuffer),
{
    let begin_info =
        vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

    unsafe {
        device
            .begin_command_buffer(command_buffer, &begin_info)
            .map_err(|code| LoadError::new(format!("command buffer begin failed: {code:?}")))?;

        record(device, command_buffer);

        device
            .end_command_buffer(command_buffer)
            .map_err(|code| LoadError::new(format!("command buffer end failed: {code:?}")))?;

        let command_buffers = [command_buffer];
        let submit_info = vk::SubmitInfo::builder()
            .command_buffers(&command_buffers)
            .build();
        device
            .queue_submit(queue.handle(), &[submit_info], vk::Fence::null())
            .map_err(|code| LoadError::new(format!("one-time submit failed: {code:?}")))?;
        device
            .queue_wait_idle(queue.handle())
            .map_err(|code| LoadError::new(format!("queue wait failed: {code:?}")))?;
    }

    Ok(())
}
