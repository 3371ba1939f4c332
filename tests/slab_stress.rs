//! Slab allocator stress through the public API.

use std::collections::HashSet;

use kernel_sim::{SlabAllocator, SlabBox};

#[test]
fn alternating_free_and_reallocate() {
    let slab = SlabAllocator::<u64>::new();

    let mut held: Vec<Option<SlabBox<u64>>> =
        (0..10_000u64).map(|i| Some(slab.alloc(i))).collect();
    let pages_at_peak = slab.stats().pages;
    assert_eq!(slab.stats().live, 10_000);

    for slot in held.iter_mut().step_by(2) {
        *slot = None;
    }
    assert_eq!(slab.stats().live, 5_000);

    for i in 0..5_000u64 {
        held.push(Some(slab.alloc(100_000 + i)));
    }

    let stats = slab.stats();
    assert_eq!(stats.live, 10_000);
    // Resident pages never shrink, and the freed slots absorbed the
    // reallocation wave.
    assert_eq!(stats.pages, pages_at_peak);

    // No address is handed to two callers at once.
    let addrs: HashSet<usize> = held
        .iter()
        .flatten()
        .map(|b| &**b as *const u64 as usize)
        .collect();
    assert_eq!(addrs.len(), 10_000);

    // Writes through one handle are never observed through another.
    for (i, slot) in held.iter().enumerate() {
        if let Some(b) = slot {
            let expected = if i < 10_000 {
                i as u64
            } else {
                100_000 + (i - 10_000) as u64
            };
            assert_eq!(**b, expected);
        }
    }

    held.clear();
    assert_eq!(slab.stats().live, 0);
    assert_eq!(slab.stats().pages, pages_at_peak);
}
