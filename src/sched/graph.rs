//! Task graph: the authoritative task registry with dependency edges and
//! atomic unsatisfied-dependency counters.
//!
//! Contexts are stored in the task slab; the registry, the scheduler queues,
//! and the edge lists all hold `TaskId`s, never pointers, so terminal tasks
//! have no destructor races. Structural mutation (register, edge, unlink)
//! takes the registry write lock; dispatch-path reads take the read lock and
//! work through the context's atomics.
//!
//! # Invariants
//! - For every edge parent -> child, the child's unsatisfied count stays
//!   >= 1 until the parent reaches a terminal state.
//! - unsatisfied == 0 implies state is READY, RUNNING, COMPLETED or FAILED
//!   (once the task has been observed by `mark_ready_if_unblocked`).
//! - Completion of a FAILED task still releases its dependents.
//! - The graph must stay acyclic. `add_dependency` does not verify this:
//!   a cycle leaves its members BLOCKED forever (the scheduler itself never
//!   deadlocks). Callers building graphs from untrusted input must check
//!   acyclicity up front.

use std::collections::hash_map::Entry;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use ahash::AHashMap;

use crate::fatal::fatal;
use crate::mem::{SlabAllocator, SlabBox, SlabStats};

use super::task::{Priority, TaskContext, TaskId, TaskOutcome, TaskState, WorkFn};

/// Errors from graph mutation. Caller mistakes, never logged above WARN.
#[derive(Debug)]
#[non_exhaustive]
pub enum GraphError {
    /// Referenced task id is not registered.
    UnknownTask { id: TaskId },
    /// A task with this id is already registered.
    DuplicateId { id: TaskId },
    /// The child already left PENDING/BLOCKED; edges must be added before a
    /// task is handed to the scheduler.
    AlreadyScheduled { id: TaskId },
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownTask { id } => write!(f, "unknown task: {id}"),
            Self::DuplicateId { id } => write!(f, "duplicate task id: {id}"),
            Self::AlreadyScheduled { id } => {
                write!(f, "task {id} already scheduled; cannot add edges")
            }
        }
    }
}

impl std::error::Error for GraphError {}

/// A dependent released by [`TaskGraph::complete`], ready for the scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadyTask {
    pub id: TaskId,
    pub priority: Priority,
}

struct Node {
    ctx: SlabBox<TaskContext>,
    /// Ids this task waits on.
    deps: Vec<TaskId>,
    /// Ids waiting on this task.
    dependents: Vec<TaskId>,
}

type Registry = AHashMap<TaskId, Node>;

/// Map of task id to task context with dependency edges.
pub struct TaskGraph {
    slab: SlabAllocator<TaskContext>,
    registry: RwLock<Registry>,
    /// Tasks not yet terminal; the kernel's quiescence probe.
    nonterminal: AtomicUsize,
}

impl TaskGraph {
    pub fn new(slab: SlabAllocator<TaskContext>) -> Self {
        Self {
            slab,
            registry: RwLock::new(Registry::default()),
            nonterminal: AtomicUsize::new(0),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().expect("task registry lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write().expect("task registry lock poisoned")
    }

    /// Registers `ctx` under its id. The context starts PENDING with no
    /// unsatisfied dependencies.
    ///
    /// A zero id is an invariant violation; a colliding id is the caller's.
    pub fn add_task(&self, ctx: TaskContext) -> Result<TaskId, GraphError> {
        let id = ctx.id();
        if id.0 == 0 {
            fatal("task id zero is reserved");
        }
        let boxed = self.slab.alloc(ctx);
        let mut reg = self.write();
        match reg.entry(id) {
            // `boxed` is released after the guard drops.
            Entry::Occupied(_) => Err(GraphError::DuplicateId { id }),
            Entry::Vacant(slot) => {
                slot.insert(Node {
                    ctx: boxed,
                    deps: Vec::new(),
                    dependents: Vec::new(),
                });
                self.nonterminal.fetch_add(1, Ordering::Relaxed);
                Ok(id)
            }
        }
    }

    /// Adds the edge parent -> child.
    ///
    /// The child must still be PENDING or BLOCKED: once it is in a scheduler
    /// queue, raising its counter could re-block a READY task. The parent
    /// may be in any state. A non-terminal parent's counter increment is
    /// ordered before its `complete` by the write lock; an already-terminal
    /// parent contributes a pre-satisfied edge and the counter is untouched.
    pub fn add_dependency(&self, parent: TaskId, child: TaskId) -> Result<(), GraphError> {
        let mut reg = self.write();
        if !reg.contains_key(&parent) {
            return Err(GraphError::UnknownTask { id: parent });
        }
        let Some(child_node) = reg.get(&child) else {
            return Err(GraphError::UnknownTask { id: child });
        };
        match child_node.ctx.state() {
            TaskState::Pending | TaskState::Blocked => {}
            _ => return Err(GraphError::AlreadyScheduled { id: child }),
        }

        let parent_terminal = reg
            .get(&parent)
            .map(|n| n.ctx.state().is_terminal())
            .unwrap_or(false);

        if parent_terminal {
            // Pre-satisfied: record the edge for bookkeeping only. The
            // parent's dependents list is left alone so every counter
            // decrement matches an increment.
            reg.get_mut(&child)
                .expect("child vanished under write lock")
                .deps
                .push(parent);
            return Ok(());
        }

        reg.get_mut(&parent)
            .expect("parent vanished under write lock")
            .dependents
            .push(child);
        let child_node = reg.get_mut(&child).expect("child vanished under write lock");
        child_node.deps.push(parent);
        child_node.ctx.inc_unsatisfied();
        child_node.ctx.set_state(TaskState::Blocked);
        Ok(())
    }

    /// Transitions `id` to READY when it is PENDING/BLOCKED with no
    /// unsatisfied dependencies. Returns whether the transition happened.
    pub fn mark_ready_if_unblocked(&self, id: TaskId) -> bool {
        let reg = self.read();
        match reg.get(&id) {
            Some(node) => node.ctx.try_make_ready(),
            None => false,
        }
    }

    /// Claims `id` for execution: READY to RUNNING, and takes the work
    /// closure. The scheduler hands out each id exactly once, so a missing
    /// entry, a lost state race, or an already-taken closure is corruption.
    pub(crate) fn begin_run(&self, id: TaskId) -> WorkFn {
        let reg = self.read();
        let Some(node) = reg.get(&id) else {
            fatal("scheduled task missing from registry");
        };
        if !node.ctx.try_begin_run() {
            fatal("task dispatched twice");
        }
        match node.ctx.take_work() {
            Some(work) => work,
            None => fatal("task work closure already taken"),
        }
    }

    /// Records a terminal outcome and releases dependents.
    ///
    /// For each dependent the unsatisfied counter is decremented; dependents
    /// reaching zero transition to READY inside this critical section and
    /// are returned for the caller to feed the scheduler. Failure does not
    /// propagate: a FAILED task releases its dependents like a COMPLETED
    /// one.
    pub fn complete(&self, id: TaskId, outcome: TaskOutcome) -> Vec<ReadyTask> {
        let reg = self.write();
        let Some(node) = reg.get(&id) else {
            fatal("completed task missing from registry");
        };
        if node.ctx.state().is_terminal() {
            fatal("task completed twice");
        }
        node.ctx.set_state(outcome.state());
        self.nonterminal.fetch_sub(1, Ordering::Relaxed);

        let dependents = node.dependents.clone();
        let mut ready = Vec::new();
        for dep_id in dependents {
            let Some(dep) = reg.get(&dep_id) else {
                fatal("dependent missing from registry");
            };
            if dep.ctx.satisfy_dep() && dep.ctx.try_make_ready() {
                ready.push(ReadyTask {
                    id: dep_id,
                    priority: dep.ctx.priority(),
                });
            }
        }
        ready
    }

    /// Adds `ns` to the task's cumulative CPU time.
    pub(crate) fn add_cpu_time(&self, id: TaskId, ns: u64) {
        if let Some(node) = self.read().get(&id) {
            node.ctx.add_cpu_time(ns);
        }
    }

    /// Unlinks a task and its edges. Used for submit error-path cleanup and
    /// by [`prune_terminal`](Self::prune_terminal); not exposed as general
    /// removal because unlinking a live mid-graph task would break counter
    /// accounting for its dependents.
    pub(crate) fn remove(&self, id: TaskId) -> bool {
        let mut reg = self.write();
        Self::unlink(&mut reg, id, &self.nonterminal)
    }

    fn unlink(reg: &mut Registry, id: TaskId, nonterminal: &AtomicUsize) -> bool {
        let Some(node) = reg.remove(&id) else {
            return false;
        };
        for parent in &node.deps {
            if let Some(parent_node) = reg.get_mut(parent) {
                parent_node.dependents.retain(|&d| d != id);
            }
        }
        for child in &node.dependents {
            if let Some(child_node) = reg.get_mut(child) {
                child_node.deps.retain(|&d| d != id);
            }
        }
        if !node.ctx.state().is_terminal() {
            nonterminal.fetch_sub(1, Ordering::Relaxed);
        }
        true
    }

    /// Removes terminal tasks whose dependents are all terminal. Returns the
    /// number pruned. Retention is otherwise unbounded; the kernel exposes
    /// this but never calls it implicitly.
    pub fn prune_terminal(&self) -> usize {
        let mut reg = self.write();
        let victims: Vec<TaskId> = reg
            .iter()
            .filter(|(_, node)| {
                node.ctx.state().is_terminal()
                    && node.dependents.iter().all(|d| {
                        reg.get(d)
                            .map(|dep| dep.ctx.state().is_terminal())
                            .unwrap_or(true)
                    })
            })
            .map(|(&id, _)| id)
            .collect();
        for &id in &victims {
            Self::unlink(&mut reg, id, &self.nonterminal);
        }
        victims.len()
    }

    pub fn state_of(&self, id: TaskId) -> Option<TaskState> {
        self.read().get(&id).map(|n| n.ctx.state())
    }

    pub fn cpu_time_ns(&self, id: TaskId) -> Option<u64> {
        self.read().get(&id).map(|n| n.ctx.cpu_time_ns())
    }

    pub fn unsatisfied_of(&self, id: TaskId) -> Option<u32> {
        self.read().get(&id).map(|n| n.ctx.unsatisfied())
    }

    /// Registered tasks, terminal or not.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Tasks not yet in a terminal state.
    pub fn nonterminal_count(&self) -> usize {
        self.nonterminal.load(Ordering::Acquire)
    }

    /// Counters of the slab backing task contexts.
    pub fn slab_stats(&self) -> SlabStats {
        self.slab.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::task::Priority;

    fn graph() -> TaskGraph {
        TaskGraph::new(SlabAllocator::new())
    }

    fn task(id: u64) -> TaskContext {
        TaskContext::new(TaskId(id), Priority::Normal, 0, Box::new(|| {}))
    }

    fn register(g: &TaskGraph, id: u64) -> TaskId {
        g.add_task(task(id)).expect("add_task")
    }

    /// Drives a task through READY/RUNNING so completion is legal.
    fn run_to_terminal(g: &TaskGraph, id: TaskId, outcome: TaskOutcome) -> Vec<ReadyTask> {
        assert!(g.mark_ready_if_unblocked(id));
        let work = g.begin_run(id);
        work();
        g.complete(id, outcome)
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let g = graph();
        register(&g, 1);
        match g.add_task(task(1)) {
            Err(GraphError::DuplicateId { id }) => assert_eq!(id, TaskId(1)),
            other => panic!("expected DuplicateId, got {other:?}"),
        }
        assert_eq!(g.len(), 1);
        // The rejected context's slot went back to the slab.
        assert_eq!(g.slab_stats().live, 1);
    }

    #[test]
    fn unknown_task_edges_are_rejected() {
        let g = graph();
        let a = register(&g, 1);
        assert!(matches!(
            g.add_dependency(a, TaskId(9)),
            Err(GraphError::UnknownTask { id: TaskId(9) })
        ));
        assert!(matches!(
            g.add_dependency(TaskId(9), a),
            Err(GraphError::UnknownTask { id: TaskId(9) })
        ));
    }

    #[test]
    fn edge_blocks_child_until_parent_completes() {
        let g = graph();
        let parent = register(&g, 1);
        let child = register(&g, 2);

        g.add_dependency(parent, child).unwrap();
        assert_eq!(g.state_of(child), Some(TaskState::Blocked));
        assert_eq!(g.unsatisfied_of(child), Some(1));
        assert!(!g.mark_ready_if_unblocked(child));

        let ready = run_to_terminal(&g, parent, TaskOutcome::Completed);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, child);
        assert_eq!(ready[0].priority, Priority::Normal);
        assert_eq!(g.state_of(child), Some(TaskState::Ready));
    }

    #[test]
    fn failed_parent_still_releases_dependents() {
        let g = graph();
        let parent = register(&g, 1);
        let child = register(&g, 2);
        g.add_dependency(parent, child).unwrap();

        let ready = run_to_terminal(&g, parent, TaskOutcome::Failed);
        assert_eq!(g.state_of(parent), Some(TaskState::Failed));
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, child);
    }

    #[test]
    fn child_releases_only_after_all_parents() {
        let g = graph();
        let p1 = register(&g, 1);
        let p2 = register(&g, 2);
        let child = register(&g, 3);
        g.add_dependency(p1, child).unwrap();
        g.add_dependency(p2, child).unwrap();
        assert_eq!(g.unsatisfied_of(child), Some(2));

        assert!(run_to_terminal(&g, p1, TaskOutcome::Completed).is_empty());
        assert_eq!(g.state_of(child), Some(TaskState::Blocked));

        let ready = run_to_terminal(&g, p2, TaskOutcome::Completed);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, child);
    }

    #[test]
    fn terminal_parent_contributes_a_satisfied_edge() {
        let g = graph();
        let parent = register(&g, 1);
        run_to_terminal(&g, parent, TaskOutcome::Completed);

        let child = register(&g, 2);
        g.add_dependency(parent, child).unwrap();
        assert_eq!(g.unsatisfied_of(child), Some(0));
        assert!(g.mark_ready_if_unblocked(child));
    }

    #[test]
    fn edges_after_scheduling_are_refused() {
        let g = graph();
        let a = register(&g, 1);
        let b = register(&g, 2);
        assert!(g.mark_ready_if_unblocked(b));

        assert!(matches!(
            g.add_dependency(a, b),
            Err(GraphError::AlreadyScheduled { id: TaskId(2) })
        ));
    }

    #[test]
    fn remove_unlinks_edges() {
        let g = graph();
        let parent = register(&g, 1);
        let child = register(&g, 2);
        g.add_dependency(parent, child).unwrap();

        assert!(g.remove(child));
        assert_eq!(g.len(), 1);
        assert_eq!(g.nonterminal_count(), 1);
        // Parent completion finds no dependents left.
        let ready = run_to_terminal(&g, parent, TaskOutcome::Completed);
        assert!(ready.is_empty());
    }

    #[test]
    fn prune_removes_only_settled_subgraphs() {
        let g = graph();
        let parent = register(&g, 1);
        let child = register(&g, 2);
        g.add_dependency(parent, child).unwrap();

        run_to_terminal(&g, parent, TaskOutcome::Completed);
        // Child is READY but not terminal: parent must be retained.
        assert_eq!(g.prune_terminal(), 0);

        let work = g.begin_run(child);
        work();
        g.complete(child, TaskOutcome::Completed);
        assert_eq!(g.prune_terminal(), 2);
        assert!(g.is_empty());
        assert_eq!(g.slab_stats().live, 0);
    }

    #[test]
    fn concurrent_fan_in_releases_child_exactly_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;
        use std::thread;

        let g = Arc::new(graph());
        let parents: Vec<TaskId> = (1..=8).map(|i| register(&g, i)).collect();
        let child = register(&g, 100);
        for &p in &parents {
            g.add_dependency(p, child).unwrap();
        }
        for &p in &parents {
            assert!(g.mark_ready_if_unblocked(p));
            let work = g.begin_run(p);
            work();
        }

        let releases = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = parents
            .into_iter()
            .map(|p| {
                let g = Arc::clone(&g);
                let releases = Arc::clone(&releases);
                thread::spawn(move || {
                    let ready = g.complete(p, TaskOutcome::Completed);
                    releases.fetch_add(ready.len(), Ordering::Relaxed);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(releases.load(Ordering::Relaxed), 1);
        assert_eq!(g.state_of(child), Some(TaskState::Ready));
    }

    #[test]
    fn nonterminal_count_tracks_lifecycle() {
        let g = graph();
        assert_eq!(g.nonterminal_count(), 0);
        let a = register(&g, 1);
        assert_eq!(g.nonterminal_count(), 1);
        run_to_terminal(&g, a, TaskOutcome::Completed);
        assert_eq!(g.nonterminal_count(), 0);
    }
}
