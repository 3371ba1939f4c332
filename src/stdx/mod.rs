//! Small, self-contained primitives with no kernel dependencies.
//!
//! # Module map
//! - `bitset`: heap-allocated bitset for runtime-determined sizes.
//! - `hash`: non-cryptographic integrity hash.
//! - `rng`: deterministic xorshift generator.

pub mod bitset;
pub mod hash;
pub mod rng;

pub use bitset::DynamicBitSet;
pub use hash::fast_hash;
pub use rng::XorShift64;
