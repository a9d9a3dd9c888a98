//! Caller-facing surface returning JSON envelopes.
//!
//! Every call answers with `{"result": "success", ...}` or
//! `{"result": "error", "message": ...}`. Errors never cross this boundary
//! as `Err` values or panics.

use crate::core::{TaskCategory, TaskId, TaskStatus};
use crate::error::Error;
use crate::orchestration::Orchestrator;
use crate::tlog_debug;
use serde_json::{json, Map, Value};

fn success(fields: Value) -> Value {
    let mut map = Map::new();
    map.insert("result".to_string(), json!("success"));
    if let Value::Object(extra) = fields {
        map.extend(extra);
    }
    Value::Object(map)
}

fn error(message: impl Into<String>) -> Value {
    json!({ "result": "error", "message": message.into() })
}

fn parse_id(id: &str) -> Result<TaskId, Value> {
    id.trim()
        .parse::<TaskId>()
        .map_err(|_| error(format!("Invalid task id: {}", id)))
}

#[derive(Clone)]
pub struct TaskApi {
    orchestrator: Orchestrator,
}

impl TaskApi {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self { orchestrator }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Must be called from within a Tokio runtime.
    pub fn create_task(&self, description: &str, category: &str) -> Value {
        let category = match category.parse::<TaskCategory>() {
            Ok(category) => category,
            Err(e) => return error(e.to_string()),
        };
        match self.orchestrator.create_task(description, category) {
            Ok(task) => success(json!({
                "message": "Task created",
                "id": task.id,
                "status": task.status,
                "category": task.category,
                "steps": task.steps.iter().map(|s| s.name.clone()).collect::<Vec<_>>(),
                "estimated_duration_ms": task.estimated_duration_ms,
            })),
            Err(e) => {
                tlog_debug!("api: create_task rejected: {}", e);
                error(e.to_string())
            }
        }
    }

    pub fn get_status(&self, id: &str) -> Value {
        let id = match parse_id(id) {
            Ok(id) => id,
            Err(envelope) => return envelope,
        };
        match self.orchestrator.get_task_status(id) {
            Some(task) => {
                let current = task.steps.get(task.current_step_index).map(|s| s.name.clone());
                success(json!({
                    "id": task.id,
                    "status": task.status,
                    "category": task.category,
                    "description": task.description,
                    "progress": {
                        "completed": task.completed_steps(),
                        "failed": task.failed_steps(),
                        "total": task.steps.len(),
                    },
                    "current_step": current,
                    "retry_count": task.retry_count,
                    "error": task.error,
                }))
            }
            None => error(Error::TaskNotFound(id.to_string()).to_string()),
        }
    }

    pub fn cancel(&self, id: &str) -> Value {
        let id = match parse_id(id) {
            Ok(id) => id,
            Err(envelope) => return envelope,
        };
        if self.orchestrator.cancel_task(id) {
            success(json!({ "message": "Task cancelled", "id": id }))
        } else if self.orchestrator.get_task_status(id).is_some() {
            error(format!("Task {} has already finished", id))
        } else {
            error(Error::TaskNotFound(id.to_string()).to_string())
        }
    }

    pub fn get_report(&self, id: &str) -> Value {
        let id = match parse_id(id) {
            Ok(id) => id,
            Err(envelope) => return envelope,
        };
        match self.orchestrator.get_report(id) {
            Some(report) => match serde_json::to_value(&report) {
                Ok(report) => success(json!({ "report": report })),
                Err(e) => error(e.to_string()),
            },
            None if self.orchestrator.get_task_status(id).is_some() => {
                error(format!("No report yet for task {}", id))
            }
            None => error(Error::TaskNotFound(id.to_string()).to_string()),
        }
    }

    /// Summaries of all tasks, optionally filtered by status name.
    pub fn list_tasks(&self, status: Option<&str>) -> Value {
        let tasks = match status {
            Some(name) => match name.parse::<TaskStatus>() {
                Ok(status) => self.orchestrator.get_tasks_by_status(status),
                Err(e) => return error(e.to_string()),
            },
            None => self.orchestrator.get_all_tasks(),
        };
        let rows: Vec<Value> = tasks
            .iter()
            .map(|t| {
                json!({
                    "id": t.id,
                    "status": t.status,
                    "category": t.category,
                    "description": t.description,
                })
            })
            .collect();
        success(json!({ "count": rows.len(), "tasks": rows }))
    }
}
