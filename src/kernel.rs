//! Kernel facade: lifecycle and composition of the runtime subsystems.
//!
//! `boot` constructs everything in dependency order (HAL, log, task slab,
//! graph, scheduler, engine, VFS, network) and threads explicit handles
//! through the constructors; nothing in the crate is a process-wide
//! singleton, so tests instantiate isolated kernels freely.

use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::KernelConfig;
use crate::hal::Hal;
use crate::klog::KernelLog;
use crate::mem::{SlabAllocator, SlabStats};
use crate::net::NetworkInterface;
use crate::sched::{
    EngineConfig, EngineMetrics, ExecutionEngine, GraphError, Priority, PriorityScheduler,
    TaskContext, TaskGraph, TaskId, TaskState, WorkFn,
};
use crate::vfs::Vfs;

/// The assembled kernel.
///
/// Fields are declared so that drop order releases the engine before the
/// structures its workers drain.
pub struct Kernel {
    engine: Mutex<Option<ExecutionEngine>>,
    net: Arc<NetworkInterface>,
    vfs: Arc<Vfs>,
    sched: Arc<PriorityScheduler>,
    graph: Arc<TaskGraph>,
    log: Arc<KernelLog>,
    hal: Arc<Hal>,
    id_gen: AtomicU64,
}

impl Kernel {
    /// Boots a kernel: constructs every subsystem and starts the worker
    /// pool. Returns once all workers are live.
    pub fn boot(cfg: KernelConfig) -> Kernel {
        cfg.validate();

        let hal = Arc::new(Hal::new());
        let log = Arc::new(KernelLog::new(
            Arc::clone(&hal),
            cfg.log_capacity,
            cfg.console_level,
        ));
        log.info("booting kernel");

        let slab = SlabAllocator::<TaskContext>::new();
        let graph = Arc::new(TaskGraph::new(slab));
        let sched = Arc::new(PriorityScheduler::new());
        let engine = ExecutionEngine::new(
            EngineConfig {
                workers: cfg.workers,
                idle_backoff: cfg.idle_backoff,
            },
            Arc::clone(&sched),
            Arc::clone(&graph),
            Arc::clone(&log),
        );

        let vfs = Arc::new(Vfs::new(Arc::clone(&log)));
        for dir in ["/sys", "/proc", "/dev", "/etc"] {
            vfs.mkdir(dir).expect("seed vfs layout");
        }
        vfs.create_file("/etc/motd", b"Welcome to kernel-sim\n")
            .expect("seed vfs layout");

        let net = Arc::new(NetworkInterface::new(
            cfg.ring_capacity,
            cfg.rng_seed,
            Arc::clone(&log),
        ));

        log.info("kernel initialized");
        Kernel {
            engine: Mutex::new(Some(engine)),
            net,
            vfs,
            sched,
            graph,
            log,
            hal,
            id_gen: AtomicU64::new(1),
        }
    }

    /// Registers a unit of work and, when unblocked, hands it to the
    /// scheduler.
    ///
    /// `deps` name previously submitted tasks this one must wait for; they
    /// may be in any state, including already terminal. An unknown
    /// dependency id unlinks the partially registered task and returns
    /// [`GraphError::UnknownTask`].
    pub fn submit(
        &self,
        priority: Priority,
        work: WorkFn,
        deps: &[TaskId],
    ) -> Result<TaskId, GraphError> {
        let id = TaskId(self.id_gen.fetch_add(1, Ordering::Relaxed));
        let ctx = TaskContext::new(id, priority, self.hal.now_ns(), work);
        self.graph.add_task(ctx)?;

        for &dep in deps {
            if let Err(err) = self.graph.add_dependency(dep, id) {
                self.graph.remove(id);
                return Err(err);
            }
        }

        if self.graph.mark_ready_if_unblocked(id) {
            self.sched.submit(id, priority);
            if let Some(engine) = &*self.engine.lock().expect("engine slot poisoned") {
                engine.kick();
            }
        }
        self.log.trace(format!(
            "task {id} submitted ({priority:?}, {} deps)",
            deps.len()
        ));
        Ok(id)
    }

    /// Blocks until every registered task is terminal, or `timeout`
    /// elapses. Returns whether quiescence was reached.
    pub fn wait_quiescent(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.graph.nonterminal_count() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_micros(200));
        }
        true
    }

    /// Stops the engine, drains current tasks, and flushes the console.
    /// Idempotent; returns the engine counters on the first call.
    pub fn shutdown(&self) -> Option<EngineMetrics> {
        let engine = self.engine.lock().expect("engine slot poisoned").take()?;
        let metrics = engine.shutdown();
        self.log.info(format!(
            "kernel halted ({} tasks run, {} failed)",
            metrics.tasks_run, metrics.tasks_failed
        ));
        let _ = io::stdout().flush();
        Some(metrics)
    }

    pub fn vfs(&self) -> &Arc<Vfs> {
        &self.vfs
    }

    pub fn net(&self) -> &Arc<NetworkInterface> {
        &self.net
    }

    pub fn log(&self) -> &Arc<KernelLog> {
        &self.log
    }

    pub fn hal(&self) -> &Arc<Hal> {
        &self.hal
    }

    pub fn task_state(&self, id: TaskId) -> Option<TaskState> {
        self.graph.state_of(id)
    }

    pub fn task_cpu_time_ns(&self, id: TaskId) -> Option<u64> {
        self.graph.cpu_time_ns(id)
    }

    /// Tasks not yet in a terminal state.
    pub fn pending_tasks(&self) -> usize {
        self.graph.nonterminal_count()
    }

    /// Removes settled task records from the graph. Retention is otherwise
    /// unbounded.
    pub fn prune_completed(&self) -> usize {
        self.graph.prune_terminal()
    }

    /// Counters of the slab backing task contexts.
    pub fn slab_stats(&self) -> SlabStats {
        self.graph.slab_stats()
    }
}

impl Drop for Kernel {
    fn drop(&mut self) {
        self.shutdown();
    }
}
