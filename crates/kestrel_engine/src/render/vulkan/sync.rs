//! CPU/GPU synchronization primitives and the frame-slot cycle
//!
//! Each frame slot owns one "image available" semaphore, one "render
//! finished" semaphore, and one CPU/GPU fence. The slots cycle modulo the
//! frames-in-flight count, which is fixed at startup and independent of the
//! swapchain image count.

use ash::{vk, Device};

use crate::core::stage::LoadError;
use crate::render::vulkan::RenderError;

/// Number of frame slots cycling across frames in flight
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// GPU-GPU synchronization primitive
pub struct Semaphore {
    device: Device,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Create a new semaphore
    pub fn new(device: Device) -> Result<Self, LoadError> {
        let create_info = vk::SemaphoreCreateInfo::builder();
        let semaphore = unsafe {
            device
                .create_semaphore(&create_info, None)
                .map_err(|code| LoadError::new(format!("semaphore creation failed: {code:?}")))?
        };
        Ok(Self { device, semaphore })
    }

    /// Get the semaphore handle
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.semaphore, None);
        }
    }
}

/// CPU-GPU synchronization primitive
pub struct Fence {
    device: Device,
    fence: vk::Fence,
}

impl Fence {
    /// Create a new fence, optionally in the signaled state
    pub fn new(device: Device, signaled: bool) -> Result<Self, LoadError> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::builder().flags(flags);
        let fence = unsafe {
            device
                .create_fence(&create_info, None)
                .map_err(|code| LoadError::new(format!("fence creation failed: {code:?}")))?
        };
        Ok(Self { device, fence })
    }

    /// Block until the fence signals
    pub fn wait(&self, timeout: u64) -> Result<(), RenderError> {
        unsafe {
            self.device
                .wait_for_fences(&[self.fence], true, timeout)
                .map_err(|code| RenderError::Api {
                    what: "fence wait",
                    code,
                })
        }
    }

    /// Return the fence to the unsignaled state
    pub fn reset(&self) -> Result<(), RenderError> {
        unsafe {
            self.device
                .reset_fences(&[self.fence])
                .map_err(|code| RenderError::Api {
                    what: "fence reset",
                    code,
                })
        }
    }

    /// Get the fence handle
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_fence(self.fence, None);
        }
    }
}

/// Synchronization set owned by one frame slot
pub struct FrameSlot {
    /// Signaled by the presentation engine when the acquired image is ready
    pub image_available: Semaphore,
    /// Signaled by the submission when rendering completes
    pub render_finished: Semaphore,
    /// Signaled fence gating CPU reuse of this slot's resources
    pub in_flight: Fence,
}

impl FrameSlot {
    /// Create the slot's semaphores and its fence (signaled, so the first
    /// wait on a never-submitted slot falls through)
    pub fn new(device: Device) -> Result<Self, LoadError> {
        Ok(Self {
            image_available: Semaphore::new(device.clone())?,
            render_finished: Semaphore::new(device.clone())?,
            in_flight: Fence::new(device, true)?,
        })
    }
}

/// Cycles the active slot index modulo the slot count
#[derive(Debug, Clone, Copy)]
pub struct SlotCursor {
    index: usize,
    count: usize,
}

impl SlotCursor {
    /// Create a cursor over `count` slots, starting at slot 0
    pub fn new(count: usize) -> Self {
        Self {
            index: 0,
            count: count.max(1),
        }
    }

    /// The active slot index
    pub fn index(&self) -> usize {
        self.index
    }

    /// Advance by exactly one slot, wrapping at the slot count
    pub fn advance(&mut self) {
        self.index = (self.index + 1) % self.count;
    }
}

/// The fixed set of frame slots cycling across frames in flight
pub struct FrameSlots {
    slots: Vec<FrameSlot>,
    cursor: SlotCursor,
}

impl FrameSlots {
    /// Create `count` frame slots on the given device
    pub fn new(device: &Device, count: usize) -> Result<Self, LoadError> {
        let mut slots = Vec::with_capacity(count);
        for _ in 0..count {
            slots.push(FrameSlot::new(device.clone())?);
        }
        Ok(Self {
            slots,
            cursor: SlotCursor::new(count),
        })
    }

    /// The slot for the current frame
    pub fn current(&self) -> &FrameSlot {
        &self.slots[self.cursor.index()]
    }

    /// Index of the current slot
    pub fn current_index(&self) -> usize {
        self.cursor.index()
    }

    /// Advance to the next slot after a completed frame
    pub fn advance(&mut self) {
        self.cursor.advance();
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the slot set is empty
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_advances_by_one_modulo_the_slot_count() {
        let mut cursor = SlotCursor::new(MAX_FRAMES_IN_FLIGHT);

        for frame in 0..7 {
            assert_eq!(cursor.index(), frame % MAX_FRAMES_IN_FLIGHT);
            cursor.advance();
        }
        assert_eq!(cursor.index(), 7 % MAX_FRAMES_IN_FLIGHT);
    }

    #[test]
    fn cursor_over_one_slot_stays_at_zero() {
        let mut cursor = SlotCursor::new(1);
        cursor.advance();
        cursor.advance();
        assert_eq!(cursor.index(), 0);
    }
}
