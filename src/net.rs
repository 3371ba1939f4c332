//! Network subsystem: fixed-size packet records and the bounded receive
//! ring.
//!
//! The ring is the canonical lock-protected form: one mutex covers head,
//! tail, and the slots, because both producers and consumers may be
//! multi-threaded here. Stores to a full ring are dropped and counted, never
//! blocked.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::klog::KernelLog;
use crate::stdx::XorShift64;

/// Payload capacity per packet (simulation MTU).
pub const PAYLOAD_MAX: usize = 128;

/// Fixed-size packet record stored inline in the ring.
///
/// Source/destination fields stay zero for loopback-style feeds; only id,
/// payload, and length are filled by [`RxRing::receive`].
#[derive(Clone, Copy)]
pub struct Packet {
    pub id: u64,
    pub src_addr: u32,
    pub dst_addr: u32,
    pub src_port: u16,
    pub dst_port: u16,
    pub payload: [u8; PAYLOAD_MAX],
    /// Valid bytes in `payload`.
    pub len: usize,
}

impl Packet {
    pub const EMPTY: Packet = Packet {
        id: 0,
        src_addr: 0,
        dst_addr: 0,
        src_port: 0,
        dst_port: 0,
        payload: [0u8; PAYLOAD_MAX],
        len: 0,
    };

    /// The valid portion of the payload.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.payload[..self.len]
    }
}

// Manual impl: dumping 128 payload bytes per packet drowns debug output.
impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("id", &self.id)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

struct RingInner {
    slots: Box<[Packet]>,
    head: usize,
    tail: usize,
    rng: XorShift64,
}

/// Observable ring counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RingStats {
    pub depth: usize,
    pub received: u64,
    pub dropped: u64,
    /// Slot count; usable capacity is one less.
    pub capacity: usize,
}

/// Bounded circular buffer of packet slots with drop-on-full semantics.
///
/// Head and tail are interpreted modulo capacity. The ring is full when
/// advancing head would meet tail, so one slot is always sacrificed to
/// distinguish full from empty: a ring of capacity C stores at most C - 1
/// packets.
pub struct RxRing {
    inner: Mutex<RingInner>,
    capacity: usize,
    received: AtomicU64,
    dropped: AtomicU64,
}

impl RxRing {
    /// # Panics
    /// Panics if `capacity < 2` (such a ring could never store a packet).
    pub fn new(capacity: usize, seed: u64) -> Self {
        assert!(capacity >= 2, "ring capacity must be at least 2");
        Self {
            inner: Mutex::new(RingInner {
                slots: vec![Packet::EMPTY; capacity].into_boxed_slice(),
                head: 0,
                tail: 0,
                rng: XorShift64::new(seed),
            }),
            capacity,
            received: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Stores up to [`PAYLOAD_MAX`] bytes (longer input is truncated) as a
    /// packet with a fresh id. Returns `false` when the ring was full and
    /// the packet dropped.
    pub fn receive(&self, bytes: &[u8]) -> bool {
        let mut inner = self.lock();
        let next = (inner.head + 1) % self.capacity;
        if next == inner.tail {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let id = inner.rng.next_u64();
        let len = bytes.len().min(PAYLOAD_MAX);
        let mut payload = [0u8; PAYLOAD_MAX];
        payload[..len].copy_from_slice(&bytes[..len]);

        let head = inner.head;
        inner.slots[head] = Packet {
            id,
            src_addr: 0,
            dst_addr: 0,
            src_port: 0,
            dst_port: 0,
            payload,
            len,
        };
        inner.head = next;
        self.received.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Removes and returns the oldest packet, or `None` when empty.
    pub fn pop(&self) -> Option<Packet> {
        let mut inner = self.lock();
        if inner.head == inner.tail {
            return None;
        }
        let packet = inner.slots[inner.tail];
        inner.tail = (inner.tail + 1) % self.capacity;
        Some(packet)
    }

    /// Packets currently queued.
    pub fn depth(&self) -> usize {
        let inner = self.lock();
        (inner.head + self.capacity - inner.tail) % self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> RingStats {
        RingStats {
            depth: self.depth(),
            received: self.received.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            capacity: self.capacity,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RingInner> {
        self.inner.lock().expect("rx ring mutex poisoned")
    }
}

/// The network interface: the receive ring plus kernel logging.
pub struct NetworkInterface {
    rx: RxRing,
    log: Arc<KernelLog>,
}

impl NetworkInterface {
    pub fn new(ring_capacity: usize, seed: u64, log: Arc<KernelLog>) -> Self {
        Self {
            rx: RxRing::new(ring_capacity, seed),
            log,
        }
    }

    /// Feeds bytes into the receive ring. A full ring drops the packet with
    /// a warning; the caller is not notified.
    pub fn receive_packet(&self, bytes: &[u8]) {
        if !self.rx.receive(bytes) {
            self.log.warn("rx ring full, dropping packet");
        }
    }

    /// Removes and returns the oldest received packet.
    pub fn pop_packet(&self) -> Option<Packet> {
        self.rx.pop()
    }

    pub fn depth(&self) -> usize {
        self.rx.depth()
    }

    pub fn stats(&self) -> RingStats {
        self.rx.stats()
    }
}
