//! Execution engine: a fixed-size worker pool draining the priority
//! scheduler.
//!
//! Workers pull the highest-priority READY task, run its closure inside a
//! failure barrier, record timing, and release dependents through the graph.
//! Task panics are caught at the worker boundary only and converted to a
//! FAILED outcome; invariant violations bypass the barrier by aborting.
//!
//! Idle workers park with a bounded timeout (the ~50 us backoff) on a
//! `Parker`, and submitters wake one worker per enqueue, so a wakeup is
//! never lost and an idle pool picks up new work immediately. Shutdown is
//! coarse: a flag flips, each worker finishes its current task (running
//! tasks are never preempted) and exits.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_utils::sync::{Parker, Unparker};

use crate::klog::KernelLog;

use super::graph::TaskGraph;
use super::queue::PriorityScheduler;
use super::task::{TaskId, TaskOutcome};

/// Engine configuration. Defaults suit the simulated workload; profile
/// before tuning.
#[derive(Clone, Copy, Debug)]
pub struct EngineConfig {
    /// Worker threads.
    pub workers: usize,
    /// Park timeout when the scheduler is empty.
    pub idle_backoff: Duration,
}

impl EngineConfig {
    /// Validates the configuration. Panics on invalid values.
    pub fn validate(&self) {
        assert!(self.workers > 0, "workers must be > 0");
        assert!(
            self.idle_backoff > Duration::ZERO,
            "idle_backoff must be > 0"
        );
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            idle_backoff: Duration::from_micros(50),
        }
    }
}

/// Per-worker counters. Plain integers on the hot path; merged after join.
#[derive(Clone, Copy, Debug, Default)]
struct WorkerMetrics {
    tasks_run: u64,
    tasks_failed: u64,
    parks: u64,
}

/// Aggregated engine counters, available once the pool has been joined.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EngineMetrics {
    /// Tasks executed (including failed ones).
    pub tasks_run: u64,
    /// Tasks whose closure panicked.
    pub tasks_failed: u64,
    /// Idle park intervals across all workers.
    pub parks: u64,
    /// Pool size.
    pub workers: usize,
}

impl EngineMetrics {
    fn merge_worker(&mut self, m: &WorkerMetrics) {
        self.tasks_run += m.tasks_run;
        self.tasks_failed += m.tasks_failed;
        self.parks += m.parks;
    }
}

struct EngineShared {
    running: AtomicBool,
    unparkers: Vec<Unparker>,
    /// Round-robin wakeup cursor; approximate fairness is enough.
    next_unpark: AtomicUsize,
}

impl EngineShared {
    fn kick_one(&self) {
        let n = self.unparkers.len();
        if n == 0 {
            return;
        }
        let idx = self.next_unpark.fetch_add(1, Ordering::Relaxed) % n;
        self.unparkers[idx].unpark();
    }

    fn kick_all(&self) {
        for u in &self.unparkers {
            u.unpark();
        }
    }
}

/// Fixed-size worker pool draining the scheduler.
pub struct ExecutionEngine {
    shared: Arc<EngineShared>,
    threads: Vec<JoinHandle<WorkerMetrics>>,
}

impl ExecutionEngine {
    /// Spawns the pool and blocks until every worker is live.
    pub fn new(
        cfg: EngineConfig,
        sched: Arc<PriorityScheduler>,
        graph: Arc<TaskGraph>,
        log: Arc<KernelLog>,
    ) -> Self {
        cfg.validate();

        let mut parkers = Vec::with_capacity(cfg.workers);
        let mut unparkers = Vec::with_capacity(cfg.workers);
        for _ in 0..cfg.workers {
            let parker = Parker::new();
            unparkers.push(parker.unparker().clone());
            parkers.push(parker);
        }

        let shared = Arc::new(EngineShared {
            running: AtomicBool::new(true),
            unparkers,
            next_unpark: AtomicUsize::new(0),
        });

        let startup = Arc::new(Barrier::new(cfg.workers + 1));
        let mut threads = Vec::with_capacity(cfg.workers);
        for worker_id in 0..cfg.workers {
            let shared = Arc::clone(&shared);
            let sched = Arc::clone(&sched);
            let graph = Arc::clone(&graph);
            let log = Arc::clone(&log);
            let startup = Arc::clone(&startup);
            let parker = parkers.pop().expect("parker per worker");
            let backoff = cfg.idle_backoff;

            let handle = thread::Builder::new()
                .name(format!("kernel-worker-{worker_id}"))
                .spawn(move || {
                    startup.wait();
                    worker_loop(&shared, &sched, &graph, &log, &parker, backoff)
                })
                .expect("failed to spawn worker thread");
            threads.push(handle);
        }
        startup.wait();
        log.info(format!("execution engine online ({} workers)", cfg.workers));

        Self { shared, threads }
    }

    /// Wakes one parked worker. Called after enqueuing work from outside the
    /// pool.
    pub fn kick(&self) {
        self.shared.kick_one();
    }

    /// Signals shutdown, lets workers drain their current task, and joins
    /// them. Returns the merged counters.
    pub fn shutdown(mut self) -> EngineMetrics {
        self.stop_and_join()
    }

    fn stop_and_join(&mut self) -> EngineMetrics {
        self.shared.running.store(false, Ordering::Release);
        self.shared.kick_all();

        let mut metrics = EngineMetrics {
            workers: self.threads.len(),
            ..EngineMetrics::default()
        };
        while let Some(handle) = self.threads.pop() {
            match handle.join() {
                Ok(m) => metrics.merge_worker(&m),
                // Task panics are caught in the loop; a worker panic is a
                // bug and is surfaced on the joining thread.
                Err(payload) => std::panic::resume_unwind(payload),
            }
        }
        metrics
    }
}

impl Drop for ExecutionEngine {
    fn drop(&mut self) {
        if !self.threads.is_empty() {
            self.stop_and_join();
        }
    }
}

fn worker_loop(
    shared: &EngineShared,
    sched: &PriorityScheduler,
    graph: &TaskGraph,
    log: &KernelLog,
    parker: &Parker,
    backoff: Duration,
) -> WorkerMetrics {
    let mut metrics = WorkerMetrics::default();
    while shared.running.load(Ordering::Acquire) {
        match sched.next() {
            Some(id) => run_one(id, shared, sched, graph, log, &mut metrics),
            None => {
                metrics.parks += 1;
                parker.park_timeout(backoff);
            }
        }
    }
    metrics
}

fn run_one(
    id: TaskId,
    shared: &EngineShared,
    sched: &PriorityScheduler,
    graph: &TaskGraph,
    log: &KernelLog,
    metrics: &mut WorkerMetrics,
) {
    let work = graph.begin_run(id);

    let start = Instant::now();
    let result = catch_unwind(AssertUnwindSafe(|| work()));
    let elapsed_ns = start.elapsed().as_nanos() as u64;
    graph.add_cpu_time(id, elapsed_ns);

    let outcome = match result {
        Ok(()) => TaskOutcome::Completed,
        Err(payload) => {
            log.error(format!("task {id} failed: {}", panic_message(&payload)));
            metrics.tasks_failed += 1;
            TaskOutcome::Failed
        }
    };
    metrics.tasks_run += 1;

    let ready = graph.complete(id, outcome);
    for (extra, dep) in ready.iter().enumerate() {
        sched.submit(dep.id, dep.priority);
        // This worker takes one of them on its next loop; siblings handle
        // the rest.
        if extra > 0 {
            shared.kick_one();
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&'static str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("opaque panic payload")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::Hal;
    use crate::klog::Level;
    use crate::mem::SlabAllocator;
    use crate::sched::task::{Priority, TaskContext, TaskState};
    use std::sync::atomic::AtomicU64;
    use std::sync::Mutex;

    struct Rig {
        sched: Arc<PriorityScheduler>,
        graph: Arc<TaskGraph>,
        log: Arc<KernelLog>,
        next_id: AtomicU64,
    }

    impl Rig {
        fn new() -> Self {
            let hal = Arc::new(Hal::new());
            Self {
                sched: Arc::new(PriorityScheduler::new()),
                graph: Arc::new(TaskGraph::new(SlabAllocator::new())),
                log: Arc::new(KernelLog::new(hal, 1024, Level::Critical)),
                next_id: AtomicU64::new(1),
            }
        }

        fn engine(&self, workers: usize) -> ExecutionEngine {
            ExecutionEngine::new(
                EngineConfig {
                    workers,
                    idle_backoff: Duration::from_micros(50),
                },
                Arc::clone(&self.sched),
                Arc::clone(&self.graph),
                Arc::clone(&self.log),
            )
        }

        fn submit(&self, priority: Priority, work: impl FnOnce() + Send + 'static) -> TaskId {
            let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
            let ctx = TaskContext::new(id, priority, 0, Box::new(work));
            self.graph.add_task(ctx).expect("add_task");
            assert!(self.graph.mark_ready_if_unblocked(id));
            self.sched.submit(id, priority);
            id
        }

        fn wait_quiescent(&self) {
            let deadline = Instant::now() + Duration::from_secs(10);
            while self.graph.nonterminal_count() > 0 {
                assert!(Instant::now() < deadline, "engine did not drain in time");
                thread::sleep(Duration::from_micros(200));
            }
        }
    }

    #[test]
    fn startup_barrier_returns_with_workers_live() {
        let rig = Rig::new();
        let engine = rig.engine(3);
        let metrics = engine.shutdown();
        assert_eq!(metrics.workers, 3);
        assert_eq!(metrics.tasks_run, 0);
    }

    #[test]
    fn runs_submitted_tasks_to_completion() {
        let rig = Rig::new();
        let engine = rig.engine(2);

        let counter = Arc::new(AtomicUsize::new(0));
        let ids: Vec<TaskId> = (0..64)
            .map(|_| {
                let counter = Arc::clone(&counter);
                let id = rig.submit(Priority::Normal, move || {
                    counter.fetch_add(1, Ordering::Relaxed);
                });
                engine.kick();
                id
            })
            .collect();

        rig.wait_quiescent();
        assert_eq!(counter.load(Ordering::Relaxed), 64);
        for id in ids {
            assert_eq!(rig.graph.state_of(id), Some(TaskState::Completed));
        }

        let metrics = engine.shutdown();
        assert_eq!(metrics.tasks_run, 64);
        assert_eq!(metrics.tasks_failed, 0);
    }

    #[test]
    fn task_panic_becomes_failed_outcome() {
        let rig = Rig::new();
        let engine = rig.engine(1);

        let bad = rig.submit(Priority::Normal, || panic!("injected failure"));
        engine.kick();
        let good = rig.submit(Priority::Normal, || {});
        engine.kick();

        rig.wait_quiescent();
        assert_eq!(rig.graph.state_of(bad), Some(TaskState::Failed));
        assert_eq!(rig.graph.state_of(good), Some(TaskState::Completed));

        let failures: Vec<String> = rig
            .log
            .entries()
            .into_iter()
            .filter(|e| e.level == Level::Error)
            .map(|e| e.message)
            .collect();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].contains("injected failure"));

        let metrics = engine.shutdown();
        assert_eq!(metrics.tasks_run, 2);
        assert_eq!(metrics.tasks_failed, 1);
    }

    #[test]
    fn dependents_flow_back_through_the_scheduler() {
        let rig = Rig::new();
        let engine = rig.engine(2);

        let order = Arc::new(Mutex::new(Vec::new()));
        let push = |tag: &'static str| {
            let order = Arc::clone(&order);
            move || order.lock().unwrap().push(tag)
        };

        let parent = rig.submit(Priority::Normal, push("parent"));
        let child_id = TaskId(rig.next_id.fetch_add(1, Ordering::Relaxed));
        let ctx = TaskContext::new(child_id, Priority::Normal, 0, Box::new(push("child")));
        rig.graph.add_task(ctx).unwrap();
        rig.graph.add_dependency(parent, child_id).unwrap();
        if rig.graph.mark_ready_if_unblocked(child_id) {
            rig.sched.submit(child_id, Priority::Normal);
        }
        engine.kick();

        rig.wait_quiescent();
        assert_eq!(*order.lock().unwrap(), ["parent", "child"]);
        engine.shutdown();
    }

    #[test]
    fn records_cpu_time_for_completed_tasks() {
        let rig = Rig::new();
        let engine = rig.engine(1);

        let id = rig.submit(Priority::Normal, || thread::sleep(Duration::from_millis(2)));
        engine.kick();
        rig.wait_quiescent();

        let cpu = rig.graph.cpu_time_ns(id).unwrap();
        assert!(cpu >= 2_000_000, "cpu_time_ns = {cpu}");
        engine.shutdown();
    }
}
