//! Scheduling subsystem: the execution substrate of the simulator.
//!
//! ```text
//!  submit(priority, work, deps)
//!        │
//!        ▼
//!  ┌───────────┐  READY ids   ┌─────────────────┐   next()   ┌────────────┐
//!  │ TaskGraph │─────────────>│ PriorityScheduler│──────────>│  Engine    │
//!  │ (DAG +    │              │ (4 FIFO bands)   │           │ (N workers)│
//!  │  counters)│<─────────────│                  │<──────────│            │
//!  └───────────┘ complete()   └─────────────────┘  released  └────────────┘
//!                                                  dependents
//! ```
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`task`] | Ids, priority bands, lifecycle states, shared task context |
//! | [`graph`] | DAG registry with atomic unsatisfied-dependency counters |
//! | [`queue`] | Strict-priority scheduler over four FIFO bands |
//! | [`engine`] | Worker pool: dispatch, failure barrier, dependent release |
//!
//! Lock order on the hot path: graph-write, then a scheduler band, then the
//! log buffer. Per-task state is atomic and never holds a lock.

pub mod engine;
pub mod graph;
pub mod queue;
pub mod task;

pub use engine::{EngineConfig, EngineMetrics, ExecutionEngine};
pub use graph::{GraphError, ReadyTask, TaskGraph};
pub use queue::PriorityScheduler;
pub use task::{Priority, TaskContext, TaskId, TaskOutcome, TaskState, WorkFn};
