//! Task model: identifiers, priority bands, lifecycle states, and the shared
//! task context.
//!
//! A `TaskContext` lives in the graph's slab and is reached by id from the
//! scheduler queues and the workers, so every hot field is atomic: holders of
//! the registry read lock never block each other on a task's state.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;

use crate::fatal::fatal;

/// Process-unique task identifier.
///
/// Assigned monotonically from 1; zero is reserved and never valid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Priority band. Lower band index is higher priority.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Priority {
    Realtime,
    High,
    Normal,
    Low,
}

impl Priority {
    pub const COUNT: usize = 4;

    pub const ALL: [Priority; Priority::COUNT] = [
        Priority::Realtime,
        Priority::High,
        Priority::Normal,
        Priority::Low,
    ];

    /// Queue band for this priority: REALTIME=0 through LOW=3.
    #[inline]
    pub fn band(self) -> usize {
        match self {
            Priority::Realtime => 0,
            Priority::High => 1,
            Priority::Normal => 2,
            Priority::Low => 3,
        }
    }
}

/// Lifecycle states. COMPLETED and FAILED are terminal.
///
/// ```text
/// PENDING ──(edge added)──> BLOCKED ──(deps satisfied)──> READY
///    │                                                      │
///    └──────────────(no deps at submit)─────────────────────┤
///                                                           ▼
///                                RUNNING ──> COMPLETED | FAILED
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    Pending = 0,
    Blocked = 1,
    Ready = 2,
    Running = 3,
    Completed = 4,
    Failed = 5,
}

impl TaskState {
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }

    fn from_u8(v: u8) -> TaskState {
        match v {
            0 => TaskState::Pending,
            1 => TaskState::Blocked,
            2 => TaskState::Ready,
            3 => TaskState::Running,
            4 => TaskState::Completed,
            5 => TaskState::Failed,
            _ => fatal("corrupt task state value"),
        }
    }
}

/// A task's work unit: no arguments, no return, runs at most once.
pub type WorkFn = Box<dyn FnOnce() + Send + 'static>;

/// Terminal outcome reported by the execution engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Failed,
}

impl TaskOutcome {
    #[inline]
    pub(crate) fn state(self) -> TaskState {
        match self {
            TaskOutcome::Completed => TaskState::Completed,
            TaskOutcome::Failed => TaskState::Failed,
        }
    }
}

/// Shared task record.
///
/// The final decrement of `unsatisfied` is a release that pairs with the
/// acquire on subsequent state loads, so a dependent observed READY also
/// observes every dependency's terminal transition.
pub struct TaskContext {
    id: TaskId,
    priority: Priority,
    state: AtomicU8,
    /// Dependencies not yet in a terminal state.
    unsatisfied: AtomicU32,
    /// Cumulative run time in nanoseconds.
    cpu_time_ns: AtomicU64,
    /// HAL clock reading at creation.
    created_at_ns: u64,
    work: Mutex<Option<WorkFn>>,
}

impl TaskContext {
    pub fn new(id: TaskId, priority: Priority, created_at_ns: u64, work: WorkFn) -> Self {
        Self {
            id,
            priority,
            state: AtomicU8::new(TaskState::Pending as u8),
            unsatisfied: AtomicU32::new(0),
            cpu_time_ns: AtomicU64::new(0),
            created_at_ns,
            work: Mutex::new(Some(work)),
        }
    }

    #[inline]
    pub fn id(&self) -> TaskId {
        self.id
    }

    #[inline]
    pub fn priority(&self) -> Priority {
        self.priority
    }

    #[inline]
    pub fn created_at_ns(&self) -> u64 {
        self.created_at_ns
    }

    #[inline]
    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub fn unsatisfied(&self) -> u32 {
        self.unsatisfied.load(Ordering::Acquire)
    }

    #[inline]
    pub fn cpu_time_ns(&self) -> u64 {
        self.cpu_time_ns.load(Ordering::Relaxed)
    }

    pub(crate) fn set_state(&self, state: TaskState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Adds one unsatisfied dependency. Called under the graph write lock.
    pub(crate) fn inc_unsatisfied(&self) {
        self.unsatisfied.fetch_add(1, Ordering::Relaxed);
    }

    /// Marks one dependency terminal; true when this was the last one.
    pub(crate) fn satisfy_dep(&self) -> bool {
        self.unsatisfied.fetch_sub(1, Ordering::AcqRel) == 1
    }

    /// PENDING/BLOCKED to READY when no dependencies remain unsatisfied.
    pub(crate) fn try_make_ready(&self) -> bool {
        if self.unsatisfied.load(Ordering::Acquire) != 0 {
            return false;
        }
        for from in [TaskState::Pending, TaskState::Blocked] {
            if self
                .state
                .compare_exchange(
                    from as u8,
                    TaskState::Ready as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return true;
            }
        }
        false
    }

    /// READY to RUNNING; true when this caller won the transition.
    pub(crate) fn try_begin_run(&self) -> bool {
        self.state
            .compare_exchange(
                TaskState::Ready as u8,
                TaskState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Takes the work closure; `None` after the first take.
    pub(crate) fn take_work(&self) -> Option<WorkFn> {
        self.work.lock().expect("task work mutex poisoned").take()
    }

    pub(crate) fn add_cpu_time(&self, ns: u64) {
        self.cpu_time_ns.fetch_add(ns, Ordering::Relaxed);
    }
}

// Manual impl because WorkFn has no Debug.
impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("state", &self.state())
            .field("unsatisfied", &self.unsatisfied())
            .field("cpu_time_ns", &self.cpu_time_ns())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> TaskContext {
        TaskContext::new(TaskId(1), Priority::Normal, 0, Box::new(|| {}))
    }

    #[test]
    fn bands_map_realtime_first() {
        assert_eq!(Priority::Realtime.band(), 0);
        assert_eq!(Priority::High.band(), 1);
        assert_eq!(Priority::Normal.band(), 2);
        assert_eq!(Priority::Low.band(), 3);
    }

    #[test]
    fn new_task_is_pending_and_unblocked() {
        let t = ctx();
        assert_eq!(t.state(), TaskState::Pending);
        assert_eq!(t.unsatisfied(), 0);
        assert_eq!(t.cpu_time_ns(), 0);
    }

    #[test]
    fn ready_requires_all_deps_satisfied() {
        let t = ctx();
        t.inc_unsatisfied();
        t.inc_unsatisfied();
        t.set_state(TaskState::Blocked);

        assert!(!t.try_make_ready());
        assert!(!t.satisfy_dep());
        assert!(!t.try_make_ready());
        assert!(t.satisfy_dep());
        assert!(t.try_make_ready());
        assert_eq!(t.state(), TaskState::Ready);
    }

    #[test]
    fn begin_run_wins_exactly_once() {
        let t = ctx();
        assert!(t.try_make_ready());
        assert!(t.try_begin_run());
        assert!(!t.try_begin_run());
        assert_eq!(t.state(), TaskState::Running);
    }

    #[test]
    fn work_is_taken_at_most_once() {
        let t = ctx();
        assert!(t.take_work().is_some());
        assert!(t.take_work().is_none());
    }

    #[test]
    fn terminal_states() {
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert!(!TaskState::Ready.is_terminal());
    }
}
