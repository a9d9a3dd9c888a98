pub mod api;
pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod orchestration;
pub mod report;
pub mod state;
pub mod util;

pub use api::TaskApi;
pub use config::Config;
pub use core::{Step, StepStatus, Task, TaskCategory, TaskId, TaskStatus};
pub use error::{Error, Result};
pub use orchestration::{Orchestrator, OrchestratorBuilder, OrchestratorStats};
pub use report::{Report, ReportGenerator};
