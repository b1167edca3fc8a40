/// Bounded ring of descriptor sets for one pipeline
///
/// Each set is tagged with where it is in its life:
///
/// - `Free`: not referenced by any recorded command, safe to write
/// - `Recording`: current set of an open `begin`/`end` span; once bound on
///   the command list it must not be written again
/// - `InFlight(frame)`: referenced by frame `frame`, untouchable until that
///   frame is known complete on the GPU
///
/// The ring only grows when no set is reusable, and never past its capacity.

use std::sync::Arc;
use crate::graphics_device::{DescriptorSet, ResourceId};

/// Lifecycle state of one descriptor set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetState {
    /// Safe to write and bind
    Free,
    /// Current set of an open recording span; `bound` once the command list references it
    Recording { bound: bool },
    /// Referenced by the given frame's command buffer
    InFlight(u64),
}

/// One descriptor set and what has been written into it
pub struct RingSlot {
    pub set: Arc<dyn DescriptorSet>,
    pub state: SetState,
    /// Frame that last used this set (orders reuse)
    pub last_frame: Option<u64>,
    /// Resource id currently written at each binding
    pub written: Vec<Option<ResourceId>>,
}

/// Descriptor sets of a pipeline, one of which is current
pub struct DescriptorSetRing {
    slots: Vec<RingSlot>,
    current: usize,
    capacity: usize,
}

impl DescriptorSetRing {
    /// Ring holding `initial` as its only (current) set
    pub fn new(initial: Arc<dyn DescriptorSet>, binding_count: usize, capacity: usize) -> Self {
        Self {
            slots: vec![RingSlot {
                set: initial,
                state: SetState::Free,
                last_frame: None,
                written: vec![None; binding_count],
            }],
            current: 0,
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.slots.len() >= self.capacity
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current(&self) -> &RingSlot {
        &self.slots[self.current]
    }

    pub fn current_mut(&mut self) -> &mut RingSlot {
        &mut self.slots[self.current]
    }

    pub fn slot(&self, index: usize) -> &RingSlot {
        &self.slots[index]
    }

    /// Free every set whose frame is `<= completed_through`
    pub fn reclaim(&mut self, completed_through: Option<u64>) {
        let Some(completed) = completed_through else {
            return;
        };
        for slot in &mut self.slots {
            if let SetState::InFlight(frame) = slot.state {
                if frame <= completed {
                    slot.state = SetState::Free;
                }
            }
        }
    }

    /// Best free set to record into next
    ///
    /// The current set wins if it is free; otherwise the free set that was
    /// used the longest time ago (never-used sets first).
    pub fn find_reusable(&self) -> Option<usize> {
        if self.slots[self.current].state == SetState::Free {
            return Some(self.current);
        }
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.state == SetState::Free)
            .min_by_key(|(_, slot)| slot.last_frame.map_or(0, |f| f + 1))
            .map(|(index, _)| index)
    }

    /// Append a new free set; returns its index, or `None` when the ring is full
    pub fn push(&mut self, set: Arc<dyn DescriptorSet>, binding_count: usize) -> Option<usize> {
        if self.is_full() {
            return None;
        }
        self.slots.push(RingSlot {
            set,
            state: SetState::Free,
            last_frame: None,
            written: vec![None; binding_count],
        });
        Some(self.slots.len() - 1)
    }

    /// Make `index` the current set
    pub fn set_current(&mut self, index: usize) {
        self.current = index;
    }

    /// Mark the current set as referenced by `frame`
    pub fn retire_current(&mut self, frame: u64) {
        let slot = &mut self.slots[self.current];
        slot.state = SetState::InFlight(frame);
        slot.last_frame = Some(frame);
    }
}

#[cfg(test)]
#[path = "descriptor_ring_tests.rs"]
mod tests;
