/// Small allocation helpers shared by the compute core

pub mod slot_allocator;

pub use slot_allocator::SlotAllocator;
