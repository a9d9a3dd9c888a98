//! Identifier generation for tasks and steps.

use crate::core::step::StepId;
use crate::core::task::TaskId;

pub trait IdSource: Send + Sync {
    fn task_id(&self) -> TaskId;

    /// Step ids only need to be unique within their task.
    fn step_id(&self, task: &TaskId, index: usize) -> StepId {
        StepId(format!("{}-{}", task.short(), index + 1))
    }
}

/// Random UUID v4 task ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidIds;

impl IdSource for UuidIds {
    fn task_id(&self) -> TaskId {
        TaskId::new()
    }
}
