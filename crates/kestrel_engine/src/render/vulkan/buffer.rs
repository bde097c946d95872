//! GPU buffer variants
//!
//! One buffer type, three roles: host-visible staging sources filled at
//! construction, device-local destinations populated once by a blocking
//! transfer, and host-visible uniform slabs rewritten every frame. Buffer
//! and memory acquisition are two stages of the shared lifecycle protocol,
//! so a failed memory allocation releases the buffer object before the
//! error propagates.

use ash::{vk, Device};
use bytemuck::Pod;

use crate::core::stage::{LoadError, StageStack};
use crate::render::vulkan::commands::{submit_one_time, CommandPool};
use crate::render::vulkan::device::{select_memory_type, RenderDevice};
use crate::render::vulkan::queue::QueueFamily;
use crate::render::vulkan::RenderError;

/// Closed set of buffer roles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    /// Host-visible staging area, filled once at construction and destroyed
    /// after the copy out of it completes
    Source,
    /// Device-local buffer populated once via a synchronous staged transfer
    Destination,
    /// Host-visible buffer rewritten by the CPU every frame
    Uniform,
}

/// A GPU buffer with its backing memory
pub struct Buffer {
    kind: BufferKind,
    parts: BufferParts,
    stages: StageStack<BufferParts>,
}

struct BufferParts {
    device: Device,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    memory_flags: vk::MemoryPropertyFlags,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
}

impl Buffer {
    /// Host-visible staging buffer holding a copy of `bytes`
    pub fn source(device: &RenderDevice, bytes: &[u8]) -> Result<Self, LoadError> {
        let buffer = Self::allocate(
            device,
            BufferKind::Source,
            bytes.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
        .map_err(|e| e.context("could not initialize source buffer"))?;
        buffer
            .write_bytes(bytes)
            .map_err(|e| e.context("could not initialize source buffer"))?;
        Ok(buffer)
    }

    /// Device-local buffer populated from `source` by a one-time transfer on
    /// a queue leased from `family`. Blocks until the leased queue is idle;
    /// load-time only. The source may be destroyed as soon as this returns.
    pub fn destination(
        device: &RenderDevice,
        family: &QueueFamily,
        source: &Buffer,
        usage: vk::BufferUsageFlags,
    ) -> Result<Self, LoadError> {
        if source.kind != BufferKind::Source {
            return Err(LoadError::new(
                "destination buffers are populated from a source buffer",
            ));
        }

        let buffer = Self::allocate(
            device,
            BufferKind::Destination,
            source.size(),
            vk::BufferUsageFlags::TRANSFER_DST | usage,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )
        .map_err(|e| e.context("could not initialize destination buffer"))?;

        // A failed transfer drops `buffer`, releasing its stages in reverse.
        buffer
            .transfer_from(device, family, source)
            .map_err(|e| e.context("could not initialize destination buffer"))?;

        Ok(buffer)
    }

    /// Host-visible uniform buffer of `size` bytes
    pub fn uniform(device: &RenderDevice, size: vk::DeviceSize) -> Result<Self, LoadError> {
        Self::uniform_raw(device.logical().clone(), device.memory_properties(), size)
    }

    /// Uniform buffer from raw device handles, for owners that only carry
    /// handles instead of a [`RenderDevice`] reference
    pub(crate) fn uniform_raw(
        device: Device,
        memory_properties: vk::PhysicalDeviceMemoryProperties,
        size: vk::DeviceSize,
    ) -> Result<Self, LoadError> {
        Self::allocate_raw(
            device,
            memory_properties,
            BufferKind::Uniform,
            size,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
        .map_err(|e| e.context("could not initialize uniform buffer"))
    }

    fn allocate(
        device: &RenderDevice,
        kind: BufferKind,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory_flags: vk::MemoryPropertyFlags,
    ) -> Result<Self, LoadError> {
        Self::allocate_raw(
            device.logical().clone(),
            device.memory_properties(),
            kind,
            size,
            usage,
            memory_flags,
        )
    }

    fn allocate_raw(
        device: Device,
        memory_properties: vk::PhysicalDeviceMemoryProperties,
        kind: BufferKind,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory_flags: vk::MemoryPropertyFlags,
    ) -> Result<Self, LoadError> {
        if size == 0 {
            return Err(LoadError::new("buffers cannot be empty"));
        }

        let mut parts = BufferParts {
            device,
            memory_properties,
            size,
            usage,
            memory_flags,
            buffer: vk::Buffer::null(),
            memory: vk::DeviceMemory::null(),
        };

        let mut stages = StageStack::new();
        stages.add(
            "buffer object",
            BufferParts::load_buffer,
            BufferParts::unload_buffer,
        );
        stages.add(
            "buffer memory",
            BufferParts::load_memory,
            BufferParts::unload_memory,
        );
        stages.load(&mut parts)?;

        Ok(Self {
            kind,
            parts,
            stages,
        })
    }

    /// Buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.parts.buffer
    }

    /// Buffer size in bytes
    pub fn size(&self) -> vk::DeviceSize {
        self.parts.size
    }

    /// Role of this buffer
    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    /// Map, copy, unmap. The byte count must match the buffer size exactly;
    /// mismatches are flagged instead of guessed at.
    fn write_bytes(&self, bytes: &[u8]) -> Result<(), LoadError> {
        if bytes.len() as vk::DeviceSize != self.parts.size {
            return Err(LoadError::new(format!(
                "write of {} bytes does not match buffer size {}",
                bytes.len(),
                self.parts.size
            )));
        }
        unsafe {
            let mapped = self
                .parts
                .device
                .map_memory(
                    self.parts.memory,
                    0,
                    self.parts.size,
                    vk::MemoryMapFlags::empty(),
                )
                .map_err(|code| LoadError::new(format!("memory map failed: {code:?}")))?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), mapped.cast::<u8>(), bytes.len());
            self.parts.device.unmap_memory(self.parts.memory);
        }
        Ok(())
    }

    /// Per-frame uniform update: map, copy one `T`, unmap
    pub fn copy_data<T: Pod>(&self, data: &T) -> Result<(), RenderError> {
        let data_size = std::mem::size_of::<T>() as vk::DeviceSize;
        if data_size != self.parts.size {
            return Err(RenderError::UniformSize {
                data: data_size,
                buffer: self.parts.size,
            });
        }
        unsafe {
            let mapped = self
                .parts
                .device
                .map_memory(
                    self.parts.memory,
                    0,
                    self.parts.size,
                    vk::MemoryMapFlags::empty(),
                )
                .map_err(|code| RenderError::Api {
                    what: "uniform memory map",
                    code,
                })?;
            std::ptr::copy_nonoverlapping(
                bytemuck::bytes_of(data).as_ptr(),
                mapped.cast::<u8>(),
                data_size as usize,
            );
            self.parts.device.unmap_memory(self.parts.memory);
        }
        Ok(())
    }

    fn transfer_from(
        &self,
        device: &RenderDevice,
        family: &QueueFamily,
        source: &Buffer,
    ) -> Result<(), LoadError> {
        let pool = CommandPool::new(device.logical().clone(), family.family_index(), 1)?;
        let queue = family.lease().map_err(|e| LoadError::new(e.to_string()))?;

        let source_handle = source.handle();
        let destination_handle = self.handle();
        let size = self.size();

        submit_one_time(device.logical(), &queue, pool.buffers()[0], |device, cmd| {
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size,
            };
            unsafe {
                device.cmd_copy_buffer(cmd, source_handle, destination_handle, &[region]);
            }
        })
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.stages.unload(&mut self.parts);
    }
}

impl BufferParts {
    fn load_buffer(&mut self) -> Result<(), LoadError> {
        let create_info = vk::BufferCreateInfo::builder()
            .size(self.size)
            .usage(self.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        self.buffer = unsafe {
            self.device
                .create_buffer(&create_info, None)
                .map_err(|code| LoadError::new(format!("buffer creation failed: {code:?}")))?
        };
        Ok(())
    }

    fn unload_buffer(&mut self) {
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
        }
        self.buffer = vk::Buffer::null();
    }

    fn load_memory(&mut self) -> Result<(), LoadError> {
        let requirements = unsafe { self.device.get_buffer_memory_requirements(self.buffer) };
        let memory_type_index =
            select_memory_type(&self.memory_properties, requirements, self.memory_flags)?;

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        self.memory = unsafe {
            self.device
                .allocate_memory(&alloc_info, None)
                .map_err(|code| {
                    LoadError::new(format!("buffer memory allocation failed: {code:?}"))
                })?
        };

        let bound = unsafe { self.device.bind_buffer_memory(self.buffer, self.memory, 0) };
        if let Err(code) = bound {
            // A failed acquire never sees its own release; free the
            // allocation before the stack rolls back.
            unsafe { self.device.free_memory(self.memory, None) };
            self.memory = vk::DeviceMemory::null();
            return Err(LoadError::new(format!(
                "buffer memory bind failed: {code:?}"
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
}
