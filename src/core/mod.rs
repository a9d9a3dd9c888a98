//! Core domain models for the task engine.
//!
//! Tasks, their steps and the step dependency graph, plus the small
//! collaborator seams (clock, id source) every other layer depends on.

pub mod clock;
pub mod dag;
pub mod entry;
pub mod ids;
pub mod step;
pub mod task;

pub use clock::{Clock, ManualClock, SystemClock};
pub use dag::StepGraph;
pub use entry::{EntryLevel, LogEntry};
pub use ids::{IdSource, UuidIds};
pub use step::{Step, StepId, StepKind, StepStatus};
pub use task::{Metadata, Task, TaskCategory, TaskId, TaskStatus, DEFAULT_MAX_RETRIES};
