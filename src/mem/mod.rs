//! Memory subsystem.

pub mod slab;

pub use slab::{SlabAllocator, SlabBox, SlabStats, BLOCK_SIZE};
