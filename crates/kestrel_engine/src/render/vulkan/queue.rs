//! Queue families and exclusive queue leasing
//!
//! Each family keeps a mutex-guarded free/busy table over its hardware
//! queues. Leasing is a non-blocking try-lease: when every queue is busy the
//! caller gets [`QueueExhausted`] immediately instead of waiting, and must
//! implement its own backoff. Dropping a lease returns the slot to the free
//! state under the same mutex.

use ash::vk;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

use crate::core::stage::LoadError;

/// All queues of a family are busy. Callers treat this as a normal
/// contention signal.
#[derive(Debug, Clone, Copy, Error)]
#[error("no free queue in family {family_index}")]
pub struct QueueExhausted {
    /// Index of the exhausted family
    pub family_index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueueState {
    Free,
    Busy,
}

/// Number of set capability bits among graphics, compute, transfer, and
/// sparse binding. Lower counts mean a more specialized family.
pub fn capability_count(flags: vk::QueueFlags) -> u32 {
    [
        vk::QueueFlags::GRAPHICS,
        vk::QueueFlags::COMPUTE,
        vk::QueueFlags::TRANSFER,
        vk::QueueFlags::SPARSE_BINDING,
    ]
    .iter()
    .filter(|&&capability| flags.contains(capability))
    .count() as u32
}

/// Stable sort of a candidate pool so the most specific families (fewest
/// capability bits) come first. Generalist families stay at the back as
/// overflow capacity; callers pick index 0.
pub fn rank_by_specificity(pool: &mut [usize], families: &[QueueFamily]) {
    pool.sort_by_key(|&index| capability_count(families[index].flags()));
}

/// One hardware queue family and its lease table
pub struct QueueFamily {
    device_index: usize,
    family_index: u32,
    flags: vk::QueueFlags,
    queues: Vec<vk::Queue>,
    states: Arc<Mutex<Vec<QueueState>>>,
}

impl QueueFamily {
    /// Collect the family's queues from a logical device
    pub fn new(
        device: &ash::Device,
        device_index: usize,
        family_index: u32,
        properties: &vk::QueueFamilyProperties,
    ) -> Result<Self, LoadError> {
        let mut queues = Vec::with_capacity(properties.queue_count as usize);
        for queue_index in 0..properties.queue_count {
            let queue = unsafe { device.get_device_queue(family_index, queue_index) };
            if queue == vk::Queue::null() {
                return Err(LoadError::new(format!(
                    "failed to get queue {queue_index} of family {family_index}"
                )));
            }
            queues.push(queue);
        }

        log::debug!(
            "queue family {family_index}: {} queue(s), graphics: {}, compute: {}, transfer: {}, sparse binding: {}",
            properties.queue_count,
            properties.queue_flags.contains(vk::QueueFlags::GRAPHICS),
            properties.queue_flags.contains(vk::QueueFlags::COMPUTE),
            properties.queue_flags.contains(vk::QueueFlags::TRANSFER),
            properties.queue_flags.contains(vk::QueueFlags::SPARSE_BINDING),
        );

        Ok(Self::from_queues(
            device_index,
            family_index,
            properties.queue_flags,
            queues,
        ))
    }

    pub(crate) fn from_queues(
        device_index: usize,
        family_index: u32,
        flags: vk::QueueFlags,
        queues: Vec<vk::Queue>,
    ) -> Self {
        let states = Arc::new(Mutex::new(vec![QueueState::Free; queues.len()]));
        Self {
            device_index,
            family_index,
            flags,
            queues,
            states,
        }
    }

    /// Index of the logical device this family belongs to
    pub fn device_index(&self) -> usize {
        self.device_index
    }

    /// Family index within its device
    pub fn family_index(&self) -> u32 {
        self.family_index
    }

    /// Capability bitset of the family
    pub fn flags(&self) -> vk::QueueFlags {
        self.flags
    }

    /// Whether the family supports graphics work
    pub fn supports_graphics(&self) -> bool {
        self.flags.contains(vk::QueueFlags::GRAPHICS)
    }

    /// Number of queues in the family
    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }

    /// Number of queues currently free
    pub fn free_queues(&self) -> usize {
        let states = self
            .states
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        states
            .iter()
            .filter(|&&state| state == QueueState::Free)
            .count()
    }

    /// Try to borrow a free queue exclusively. Fails immediately with
    /// [`QueueExhausted`] when every queue is busy.
    pub fn lease(&self) -> Result<QueueLease, QueueExhausted> {
        let mut states = self
            .states
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for (slot, state) in states.iter_mut().enumerate() {
            if *state == QueueState::Free {
                *state = QueueState::Busy;
                return Ok(QueueLease {
                    queue: self.queues[slot],
                    slot,
                    family_index: self.family_index,
                    states: Arc::clone(&self.states),
                });
            }
        }
        Err(QueueExhausted {
            family_index: self.family_index,
        })
    }
}

/// Exclusive borrow of one hardware queue; the slot returns to the free
/// state when the lease is dropped.
pub struct QueueLease {
    queue: vk::Queue,
    slot: usize,
    family_index: u32,
    states: Arc<Mutex<Vec<QueueState>>>,
}

impl QueueLease {
    /// The borrowed queue handle
    pub fn handle(&self) -> vk::Queue {
        self.queue
    }

    /// Index of the family the queue was leased from
    pub fn family_index(&self) -> u32 {
        self.family_index
    }
}

impl Drop for QueueLease {
    fn drop(&mut self) {
        let mut states = self
            .states
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        states[self.slot] = QueueState::Free;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn family_with_queues(flags: vk::QueueFlags, count: u64) -> QueueFamily {
        let queues = (1..=count).map(vk::Queue::from_raw).collect();
        QueueFamily::from_queues(0, 0, flags, queues)
    }

    #[test]
    fn capability_count_counts_set_bits() {
        assert_eq!(capability_count(vk::QueueFlags::TRANSFER), 1);
        assert_eq!(
            capability_count(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
            2
        );
        assert_eq!(
            capability_count(
                vk::QueueFlags::GRAPHICS
                    | vk::QueueFlags::COMPUTE
                    | vk::QueueFlags::TRANSFER
                    | vk::QueueFlags::SPARSE_BINDING
            ),
            4
        );
        assert_eq!(capability_count(vk::QueueFlags::empty()), 0);
    }

    #[test]
    fn ranking_puts_most_specific_families_first() {
        // Capability counts 4, 1, 2 must order as 1, 2, 4.
        let families = vec![
            family_with_queues(
                vk::QueueFlags::GRAPHICS
                    | vk::QueueFlags::COMPUTE
                    | vk::QueueFlags::TRANSFER
                    | vk::QueueFlags::SPARSE_BINDING,
                1,
            ),
            family_with_queues(vk::QueueFlags::TRANSFER, 1),
            family_with_queues(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER, 1),
        ];
        let mut pool = vec![0, 1, 2];

        rank_by_specificity(&mut pool, &families);

        let counts: Vec<u32> = pool
            .iter()
            .map(|&i| capability_count(families[i].flags()))
            .collect();
        assert_eq!(counts, [1, 2, 4]);
    }

    #[test]
    fn ranking_is_stable_between_equal_families() {
        let families = vec![
            family_with_queues(vk::QueueFlags::TRANSFER, 1),
            family_with_queues(vk::QueueFlags::COMPUTE, 1),
        ];
        let mut pool = vec![0, 1];

        rank_by_specificity(&mut pool, &families);

        assert_eq!(pool, [0, 1]);
    }

    #[test]
    fn lease_is_exclusive_until_dropped() {
        let family = family_with_queues(vk::QueueFlags::GRAPHICS, 1);

        let lease = family.lease().unwrap();
        assert_eq!(family.free_queues(), 0);
        assert!(family.lease().is_err());

        drop(lease);
        assert_eq!(family.free_queues(), 1);
        assert!(family.lease().is_ok());
    }

    #[test]
    fn concurrent_leases_use_distinct_queues() {
        let family = family_with_queues(vk::QueueFlags::GRAPHICS, 2);

        let first = family.lease().unwrap();
        let second = family.lease().unwrap();

        assert_ne!(first.handle(), second.handle());
        assert_eq!(family.free_queues(), 0);

        let third = family.lease();
        assert!(matches!(third, Err(QueueExhausted { family_index: 0 })));
    }

    #[test]
    fn released_slot_is_reused() {
        let family = family_with_queues(vk::QueueFlags::GRAPHICS, 2);

        let first = family.lease().unwrap();
        let first_handle = first.handle();
        let _second = family.lease().unwrap();
        drop(first);

        let replacement = family.lease().unwrap();
        assert_eq!(replacement.handle(), first_handle);
    }
}
