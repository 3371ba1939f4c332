//! User-space kernel simulator.
//!
//! One process hosts a set of cooperating runtime subsystems that execute a
//! mix of compute, I/O, and network tasks under strict priority and
//! dependency constraints, while staying observable and resilient to
//! individual task failures.
//!
//! # Architecture
//!
//! ```text
//!                       ┌──────────────────────────────────────────────┐
//!                       │                  Kernel                      │
//!  submit(prio, work, ──┼──> TaskGraph ───READY──> PriorityScheduler   │
//!  deps)                │    (DAG, slab-backed     (4 strict FIFO      │
//!                       │     contexts, atomic      bands)             │
//!                       │     dep counters)            │               │
//!                       │         ▲                    ▼               │
//!                       │         │ complete()   ExecutionEngine       │
//!                       │         └───────────── (N workers, failure   │
//!                       │                         barrier)             │
//!                       │                                              │
//!                       │   Vfs (inode tree)   NetworkInterface (ring) │
//!                       │   KernelLog (bounded ring)   Hal (clock)     │
//!                       └──────────────────────────────────────────────┘
//! ```
//!
//! # Module map
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`kernel`] | Facade: boot, submit, shutdown |
//! | [`sched`] | Task graph, priority scheduler, execution engine |
//! | [`mem`] | Slab allocator backing task contexts |
//! | [`net`] | Packet records and the bounded receive ring |
//! | [`vfs`] | In-memory file tree with per-node locks |
//! | [`klog`] | Bounded structured log with console emission |
//! | [`shell`] | Line-oriented command interface |
//! | [`hal`] | Mock hardware: monotonic clock, pause hint |
//! | [`config`] | Boot-time configuration |
//! | [`fatal`] | Uncatchable invariant-violation halt |
//! | [`stdx`] | Bitset, xorshift RNG, integrity hash |
//! | [`demo`] | Example simulation workload |
//!
//! # Guarantees
//!
//! - FIFO dispatch within a priority band; strict priority across bands.
//! - A dependent never dispatches before all its dependencies are terminal.
//! - Each task's work closure runs at most once.
//! - A failing task is contained: it becomes FAILED, is logged at Error,
//!   and still releases its dependents.
//! - Running tasks are never preempted; shutdown drains current tasks only.
//!
//! No persistence: all state is in-process and lost on exit.

pub mod config;
pub mod demo;
pub mod fatal;
pub mod hal;
pub mod kernel;
pub mod klog;
pub mod mem;
pub mod net;
pub mod sched;
pub mod shell;
pub mod stdx;
pub mod vfs;

// Facade and configuration.
pub use config::KernelConfig;
pub use kernel::Kernel;
pub use shell::Shell;

// Scheduling substrate.
pub use sched::{
    EngineConfig, EngineMetrics, ExecutionEngine, GraphError, Priority, PriorityScheduler,
    ReadyTask, TaskContext, TaskGraph, TaskId, TaskOutcome, TaskState, WorkFn,
};

// Leaf subsystems.
pub use hal::Hal;
pub use klog::{KernelLog, Level, LogEntry, LogStats};
pub use mem::{SlabAllocator, SlabBox, SlabStats};
pub use net::{NetworkInterface, Packet, RingStats, RxRing, PAYLOAD_MAX};
pub use vfs::{DirEntry, NodeKind, Vfs, VfsError};
