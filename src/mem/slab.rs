//! Slab allocator backing task-context storage.
//!
//! Fixed-object-size pool carved from page-sized blocks. Unused slots are
//! threaded into a LIFO free-list through the slot memory itself; each page
//! additionally keeps an occupancy bitset so every release is validated.
//! Double-free and foreign-pointer release are invariant violations and halt
//! the process.
//!
//! Allocation and deallocation serialize under a single mutex. Underlying
//! system out-of-memory surfaces through `handle_alloc_error` and is
//! unrecoverable.
//!
//! # Invariants
//! - Every pointer handed out is exclusively owned by its [`SlabBox`] until
//!   the box drops.
//! - A slot is either on the free-list or marked occupied, never both.
//! - `live` equals the number of outstanding boxes; `pages` never shrinks.

use std::alloc::{alloc, dealloc, handle_alloc_error, Layout};
use std::marker::PhantomData;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::ptr::{self, NonNull};
use std::sync::{Arc, Mutex};

use crate::fatal::fatal;
use crate::stdx::DynamicBitSet;

/// Block size each expansion carves slots from: one 4 KiB page.
pub const BLOCK_SIZE: usize = 4096;

/// Free slots reuse their own storage as list links.
struct FreeSlot {
    next: Option<NonNull<FreeSlot>>,
}

struct Page {
    buf: NonNull<u8>,
    occupied: DynamicBitSet,
}

struct SlabInner {
    free: Option<NonNull<FreeSlot>>,
    pages: Vec<Page>,
    live: usize,
}

/// Observable slab counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SlabStats {
    /// Outstanding allocations.
    pub live: usize,
    /// Resident pages (monotonically non-decreasing).
    pub pages: usize,
}

struct SlabShared<T> {
    inner: Mutex<SlabInner>,
    _marker: PhantomData<T>,
}

// The raw page pointers are owned by the slab and only touched under the
// mutex; slot contents are `T` values, so thread-safety follows `T`'s.
unsafe impl<T: Send> Send for SlabShared<T> {}
unsafe impl<T: Send> Sync for SlabShared<T> {}

const fn const_max(a: usize, b: usize) -> usize {
    if a > b {
        a
    } else {
        b
    }
}

impl<T> SlabShared<T> {
    /// Slot alignment: whichever of `T` and the free-list link is stricter.
    const OBJ_ALIGN: usize = const_max(mem::align_of::<T>(), mem::align_of::<FreeSlot>());

    /// Slot size: large enough for `T` and the link, rounded to alignment so
    /// consecutive slots stay aligned.
    const OBJ_SIZE: usize = {
        let raw = const_max(mem::size_of::<T>(), mem::size_of::<FreeSlot>());
        (raw + Self::OBJ_ALIGN - 1) / Self::OBJ_ALIGN * Self::OBJ_ALIGN
    };

    const SLOTS_PER_PAGE: usize = BLOCK_SIZE / Self::OBJ_SIZE;

    fn page_layout() -> Layout {
        Layout::from_size_align(BLOCK_SIZE, Self::OBJ_ALIGN).expect("slab page layout")
    }

    /// Allocates one page and threads all its slots onto the free-list.
    fn expand(inner: &mut SlabInner) {
        let layout = Self::page_layout();
        // SAFETY: layout has non-zero size; null is handled below.
        let raw = unsafe { alloc(layout) };
        let base = NonNull::new(raw).unwrap_or_else(|| handle_alloc_error(layout));

        // Thread in reverse so slot 0 ends up at the list head.
        for i in (0..Self::SLOTS_PER_PAGE).rev() {
            // SAFETY: i * OBJ_SIZE + OBJ_SIZE <= BLOCK_SIZE, so the slot is
            // in-page and aligned (base is OBJ_ALIGN-aligned, offsets are
            // OBJ_SIZE multiples).
            let slot = unsafe { base.as_ptr().add(i * Self::OBJ_SIZE) }.cast::<FreeSlot>();
            // SAFETY: slot is valid, aligned, and exclusively ours.
            unsafe { slot.write(FreeSlot { next: inner.free }) };
            inner.free = NonNull::new(slot);
        }

        inner.pages.push(Page {
            buf: base,
            occupied: DynamicBitSet::empty(Self::SLOTS_PER_PAGE),
        });
    }

    /// Maps a slot pointer back to its (page, slot) coordinates.
    fn locate(inner: &SlabInner, ptr: NonNull<u8>) -> Option<(usize, usize)> {
        let addr = ptr.as_ptr() as usize;
        for (page_idx, page) in inner.pages.iter().enumerate() {
            let base = page.buf.as_ptr() as usize;
            if addr < base || addr >= base + BLOCK_SIZE {
                continue;
            }
            let offset = addr - base;
            if offset % Self::OBJ_SIZE != 0 {
                return None;
            }
            let slot_idx = offset / Self::OBJ_SIZE;
            if slot_idx >= Self::SLOTS_PER_PAGE {
                return None;
            }
            return Some((page_idx, slot_idx));
        }
        None
    }

    /// Returns a slot to the free-list, validating ownership first.
    fn release(&self, ptr: NonNull<T>) {
        let mut inner = self.inner.lock().expect("slab mutex poisoned");
        let Some((page_idx, slot_idx)) = Self::locate(&inner, ptr.cast()) else {
            fatal("slab release of a pointer it does not own");
        };
        let page = &mut inner.pages[page_idx];
        if !page.occupied.is_set(slot_idx) {
            fatal("slab double free");
        }
        page.occupied.unset(slot_idx);

        let slot = ptr.cast::<FreeSlot>();
        // SAFETY: the slot's T was dropped by the caller; the storage is ours
        // again and large enough for the link.
        unsafe { slot.as_ptr().write(FreeSlot { next: inner.free }) };
        inner.free = Some(slot);
        inner.live -= 1;
    }
}

impl<T> Drop for SlabShared<T> {
    fn drop(&mut self) {
        let inner = match self.inner.get_mut() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Boxes hold an Arc to the shared state, so reaching drop with live
        // allocations means a bookkeeping bug, not a caller mistake.
        assert_eq!(inner.live, 0, "slab dropped with live allocations");
        let layout = Self::page_layout();
        for page in &inner.pages {
            // SAFETY: same layout as the matching alloc in `expand`.
            unsafe { dealloc(page.buf.as_ptr(), layout) };
        }
    }
}

/// Handle to a shared slab. Clones share the same pool.
pub struct SlabAllocator<T> {
    shared: Arc<SlabShared<T>>,
}

impl<T> Clone for SlabAllocator<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> SlabAllocator<T> {
    /// Creates a slab with one page pre-carved into slots.
    ///
    /// # Panics
    /// Panics if `T` does not fit in a block (a configuration error).
    pub fn new() -> Self {
        assert!(
            SlabShared::<T>::SLOTS_PER_PAGE >= 1,
            "slab object larger than its block size"
        );
        let mut inner = SlabInner {
            free: None,
            pages: Vec::new(),
            live: 0,
        };
        SlabShared::<T>::expand(&mut inner);
        Self {
            shared: Arc::new(SlabShared {
                inner: Mutex::new(inner),
                _marker: PhantomData,
            }),
        }
    }

    /// Moves `value` into a free slot, growing by one page when the
    /// free-list is empty. The returned box owns the slot until dropped.
    pub fn alloc(&self, value: T) -> SlabBox<T> {
        let ptr = {
            let mut inner = self.shared.inner.lock().expect("slab mutex poisoned");
            if inner.free.is_none() {
                SlabShared::<T>::expand(&mut inner);
            }
            let head = match inner.free {
                Some(head) => head,
                // A fresh page always populates the list.
                None => fatal("slab free-list empty after expand"),
            };
            // SAFETY: head was written as a FreeSlot by expand/release and
            // is not aliased while on the list.
            inner.free = unsafe { head.as_ref().next };

            let Some((page_idx, slot_idx)) = SlabShared::<T>::locate(&inner, head.cast()) else {
                fatal("slab free-list entry outside any page");
            };
            let page = &mut inner.pages[page_idx];
            if page.occupied.is_set(slot_idx) {
                fatal("slab free-list entry already marked live");
            }
            page.occupied.set(slot_idx);
            inner.live += 1;
            head.cast::<T>()
        };

        // SAFETY: the slot is OBJ_SIZE >= size_of::<T>() bytes, aligned for
        // T, and exclusively ours now that it is off the free-list.
        unsafe { ptr.as_ptr().write(value) };
        SlabBox {
            ptr,
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn stats(&self) -> SlabStats {
        let inner = self.shared.inner.lock().expect("slab mutex poisoned");
        SlabStats {
            live: inner.live,
            pages: inner.pages.len(),
        }
    }
}

impl<T> Default for SlabAllocator<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Owning handle to a slab-allocated `T`.
///
/// Dropping the box runs `T`'s destructor and returns the slot. The pointer
/// is stable for the lifetime of the box, so containers may hold boxes while
/// other code keeps references obtained through them.
pub struct SlabBox<T> {
    ptr: NonNull<T>,
    shared: Arc<SlabShared<T>>,
}

// A box owns its T exclusively; the Arc handle is Send + Sync already.
unsafe impl<T: Send> Send for SlabBox<T> {}
unsafe impl<T: Sync> Sync for SlabBox<T> {}

impl<T> Deref for SlabBox<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // SAFETY: ptr holds an initialized T owned by this box.
        unsafe { self.ptr.as_ref() }
    }
}

impl<T> DerefMut for SlabBox<T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: ptr holds an initialized T owned exclusively by this box.
        unsafe { self.ptr.as_mut() }
    }
}

impl<T> Drop for SlabBox<T> {
    fn drop(&mut self) {
        // SAFETY: the box owns an initialized T; this is the only drop path.
        unsafe { ptr::drop_in_place(self.ptr.as_ptr()) };
        self.shared.release(self.ptr);
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for SlabBox<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        (**self).fmt(f)
    }
}
