/// Allocates and recycles unique `u32` indices below a fixed capacity.
///
/// The pipeline factory hands each pipeline one slot, which selects its
/// timestamp query pair in every query pool. Freed indices are recycled on
/// subsequent allocations, lowest first, so query ranges stay compact.
///
/// # Example
///
/// ```ignore
/// let mut alloc = SlotAllocator::with_capacity(2);
/// let a = alloc.alloc();  // Some(0)
/// let b = alloc.alloc();  // Some(1)
/// let c = alloc.alloc();  // None (full)
/// alloc.free(0);
/// let d = alloc.alloc();  // Some(0) (recycled)
/// ```
pub struct SlotAllocator {
    free_list: Vec<u32>,
    next_id: u32,
    len: u32,
    capacity: u32,
}

impl SlotAllocator {
    /// Create an empty allocator handing out at most `capacity` slots
    pub fn with_capacity(capacity: u32) -> Self {
        Self {
            free_list: Vec::new(),
            next_id: 0,
            len: 0,
            capacity,
        }
    }

    /// Allocate the lowest available slot index, or `None` when full
    pub fn alloc(&mut self) -> Option<u32> {
        let id = match self.free_list.pop() {
            Some(id) => id,
            None if self.next_id < self.capacity => {
                let id = self.next_id;
                self.next_id += 1;
                id
            }
            None => return None,
        };
        self.len += 1;
        Some(id)
    }

    /// Return a slot index to the pool for reuse
    ///
    /// Freeing an index that is not allocated is ignored.
    pub fn free(&mut self, id: u32) {
        if id >= self.next_id || self.free_list.contains(&id) {
            debug_assert!(false, "freeing an unallocated slot: {}", id);
            return;
        }
        self.len -= 1;
        // Keep the free list sorted descending so pop() yields the lowest index
        let at = self.free_list.partition_point(|&free| free > id);
        self.free_list.insert(at, id);
    }

    /// Number of currently allocated slots
    pub fn len(&self) -> u32 {
        self.len
    }

    /// Whether no slots are currently allocated
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Maximum number of slots
    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "slot_allocator_tests.rs"]
mod tests;
