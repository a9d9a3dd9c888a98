//! Orchestration layer: planning, execution, recovery and scheduling.
//!
//! The pipeline runs Planner -> Orchestrator queue -> Executor (retry and
//! rollback via `ErrorHandler`) -> `ReportGenerator`. Category workers and
//! their step handlers plug in underneath the executor.

pub mod events;
pub mod executor;
pub mod handlers;
pub mod planner;
pub mod recovery;
pub mod scheduler;
pub mod worker;

pub use events::{ChannelSink, EventBus, EventSink, LogSink, TaskEvent};
pub use executor::{Executor, TaskOutcome};
pub use planner::{estimate_duration, validate_feasibility, Feasibility, Planner, StepTemplate};
pub use recovery::{
    classify_message, ErrorClass, ErrorContext, ErrorHandler, RecoveryDecision, RetryPolicy,
};
pub use scheduler::{
    Orchestrator, OrchestratorBuilder, OrchestratorStats, RestartPolicy,
    DEFAULT_MAX_CONCURRENT_TASKS,
};
pub use worker::{
    handler_fn, CategoryWorker, Checkpoint, StepError, StepHandler, StepResult, Worker,
    WorkerContext, WorkerRegistry, WorkerSettings,
};
