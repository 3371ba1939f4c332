//! Multi-level priority scheduler.
//!
//! Four FIFO bands, REALTIME=0 through LOW=3. Dequeue is strict priority: a
//! lower band is only consulted when every higher band is empty, so sustained
//! REALTIME load starves LOW indefinitely. That is intentional; there is no
//! aging or demotion.
//!
//! Each band has an independent lock and `next` probes bands in order holding
//! one lock at a time, so producers on different bands never contend.

use std::collections::VecDeque;
use std::sync::Mutex;

use crossbeam_utils::CachePadded;

use super::task::{Priority, TaskId};

/// Strict-priority scheduler over four FIFO bands.
///
/// Queues are unbounded; backpressure is the caller's concern. An id must be
/// in at most one band at a time, which holds because ids enter only through
/// `Kernel::submit` (once, when unblocked) or `TaskGraph::complete` (once,
/// on the final dependency release).
pub struct PriorityScheduler {
    bands: [CachePadded<Mutex<VecDeque<TaskId>>>; Priority::COUNT],
}

impl PriorityScheduler {
    pub fn new() -> Self {
        Self {
            bands: std::array::from_fn(|_| CachePadded::new(Mutex::new(VecDeque::new()))),
        }
    }

    /// Appends at the tail of the band selected by `priority`. O(1).
    pub fn submit(&self, id: TaskId, priority: Priority) {
        self.bands[priority.band()]
            .lock()
            .expect("scheduler band mutex poisoned")
            .push_back(id);
    }

    /// Re-enqueues a task. Reserved hook for demotion policies; currently
    /// identical to [`submit`](Self::submit).
    pub fn requeue(&self, id: TaskId, priority: Priority) {
        self.submit(id, priority);
    }

    /// Pops the head of the highest-priority non-empty band, or `None` when
    /// all bands are empty.
    pub fn next(&self) -> Option<TaskId> {
        for band in &self.bands {
            let popped = band
                .lock()
                .expect("scheduler band mutex poisoned")
                .pop_front();
            if popped.is_some() {
                return popped;
            }
        }
        None
    }

    /// Queued tasks in one band.
    pub fn depth(&self, priority: Priority) -> usize {
        self.bands[priority.band()]
            .lock()
            .expect("scheduler band mutex poisoned")
            .len()
    }

    /// Queued tasks across all bands.
    pub fn len(&self) -> usize {
        Priority::ALL.iter().map(|&p| self.depth(p)).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PriorityScheduler {
    fn default() -> Self {
        Self::new()
    }
}
