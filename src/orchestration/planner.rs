//! Planner: turns a description and a category into a step plan.
//!
//! Each category owns a template of named steps with declared
//! dependencies. The built-in templates are linear chains, but a template
//! may describe any DAG; `validate_feasibility` is what guarantees the
//! result is acyclic before a task is ever queued.

use crate::core::{
    Clock, IdSource, Step, StepGraph, StepKind, SystemClock, Task, TaskCategory, UuidIds,
    DEFAULT_MAX_RETRIES,
};
use crate::error::{Error, Result};
use crate::tlog_debug;
use std::collections::HashMap;
use std::sync::Arc;

/// Advisory cost of one step.
pub const BASE_STEP_COST_MS: u64 = 30_000;

/// Multiplier applied to steps that wait on other steps.
pub const DEPENDENCY_PENALTY: f64 = 1.5;

/// One entry of a category template.
#[derive(Debug, Clone, PartialEq)]
pub struct StepTemplate {
    pub kind: StepKind,
    pub name: String,
    pub description: String,
    /// Indices of earlier template entries this step depends on.
    pub depends_on: Vec<usize>,
}

impl StepTemplate {
    pub fn new(kind: StepKind, name: &str, description: &str) -> Self {
        Self {
            kind,
            name: name.to_string(),
            description: description.to_string(),
            depends_on: Vec::new(),
        }
    }

    pub fn after(mut self, index: usize) -> Self {
        self.depends_on.push(index);
        self
    }
}

/// Chain templates so step k depends on step k-1.
pub fn linear(steps: Vec<StepTemplate>) -> Vec<StepTemplate> {
    steps
        .into_iter()
        .enumerate()
        .map(|(i, t)| if i == 0 { t } else { t.after(i - 1) })
        .collect()
}

fn builtin_template(category: TaskCategory) -> Option<Vec<StepTemplate>> {
    let steps = match category {
        TaskCategory::Research => vec![
            StepTemplate::new(StepKind::Search, "search", "Search for relevant sources"),
            StepTemplate::new(StepKind::Verify, "verify", "Cross-check source reliability"),
            StepTemplate::new(
                StepKind::Synthesize,
                "synthesize",
                "Synthesize verified findings into a summary",
            ),
        ],
        TaskCategory::Analysis => vec![
            StepTemplate::new(StepKind::Extraction, "extraction", "Extract data points"),
            StepTemplate::new(
                StepKind::PatternDetection,
                "pattern-detection",
                "Detect recurring patterns in the extracted data",
            ),
            StepTemplate::new(StepKind::Synthesis, "synthesis", "Combine patterns into a model"),
            StepTemplate::new(StepKind::Insights, "insights", "Derive actionable insights"),
        ],
        TaskCategory::Creation => vec![
            StepTemplate::new(StepKind::Outline, "outline", "Outline the structure"),
            StepTemplate::new(StepKind::Draft, "draft", "Write a first draft"),
            StepTemplate::new(StepKind::Refine, "refine", "Refine wording and flow"),
            StepTemplate::new(StepKind::Finalize, "finalize", "Assemble the final piece"),
        ],
        TaskCategory::Automation | TaskCategory::General => return None,
    };
    Some(linear(steps))
}

fn generic_template() -> Vec<StepTemplate> {
    vec![StepTemplate::new(
        StepKind::Execute,
        "execute",
        "Carry out the requested task",
    )]
}

/// Outcome of a feasibility check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feasibility {
    pub feasible: bool,
    pub reason: Option<String>,
}

impl Feasibility {
    pub fn ok() -> Self {
        Self {
            feasible: true,
            reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            feasible: false,
            reason: Some(reason.into()),
        }
    }
}

pub struct Planner {
    ids: Arc<dyn IdSource>,
    clock: Arc<dyn Clock>,
    max_retries: u32,
    templates: HashMap<TaskCategory, Vec<StepTemplate>>,
}

impl Planner {
    pub fn new(ids: Arc<dyn IdSource>, clock: Arc<dyn Clock>) -> Self {
        let templates = TaskCategory::ALL
            .into_iter()
            .filter_map(|c| builtin_template(c).map(|t| (c, t)))
            .collect();
        Self {
            ids,
            clock,
            max_retries: DEFAULT_MAX_RETRIES,
            templates,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Replace the template used for a category.
    pub fn with_template(mut self, category: TaskCategory, template: Vec<StepTemplate>) -> Self {
        self.templates.insert(category, template);
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Build a pending task for the description.
    ///
    /// # Errors
    /// `Error::InvalidPlan` when the description is blank.
    pub fn plan(&self, description: &str, category: TaskCategory) -> Result<Task> {
        let description = description.trim();
        if description.is_empty() {
            return Err(Error::InvalidPlan(
                "task description must not be empty".to_string(),
            ));
        }

        let id = self.ids.task_id();
        let template = self
            .templates
            .get(&category)
            .cloned()
            .unwrap_or_else(generic_template);

        let step_ids: Vec<_> = (0..template.len())
            .map(|i| self.ids.step_id(&id, i))
            .collect();
        let steps: Vec<Step> = template
            .iter()
            .enumerate()
            .map(|(i, t)| {
                t.depends_on.iter().fold(
                    Step::new(step_ids[i].clone(), t.kind, &t.name, &t.description),
                    |step, &dep| {
                        let dep_id = step_ids
                            .get(dep)
                            .cloned()
                            .unwrap_or_else(|| self.ids.step_id(&id, dep));
                        step.depends_on(dep_id)
                    },
                )
            })
            .collect();

        let mut task = Task::new(id, category, description, steps, self.clock.now());
        task.max_retries = self.max_retries;
        task.estimated_duration_ms = estimate_duration(&task.steps);

        tlog_debug!(
            "Planner: task {} ({}) planned with {} steps, estimate {}ms",
            task.id.short(),
            category,
            task.steps.len(),
            task.estimated_duration_ms
        );
        Ok(task)
    }

    /// Plan and validate in one go.
    ///
    /// Every rejection surfaces as `Error::Planning` so callers can treat
    /// bad input and self-contradictory plans the same way.
    pub fn plan_feasible(&self, description: &str, category: TaskCategory) -> Result<Task> {
        let task = self.plan(description, category).map_err(|e| match e {
            Error::InvalidPlan(reason) => Error::Planning(reason),
            other => other,
        })?;
        let check = validate_feasibility(&task);
        if !check.feasible {
            return Err(Error::Planning(
                check.reason.unwrap_or_else(|| "plan is not feasible".to_string()),
            ));
        }
        Ok(task)
    }
}

impl Default for Planner {
    fn default() -> Self {
        Self::new(Arc::new(UuidIds), Arc::new(SystemClock))
    }
}

/// Check that a task can be executed at all.
///
/// Rejects blank descriptions, empty plans, dependencies on unknown
/// steps, and dependency cycles.
pub fn validate_feasibility(task: &Task) -> Feasibility {
    if task.description.trim().is_empty() {
        return Feasibility::rejected("task description is empty");
    }
    if task.steps.is_empty() {
        return Feasibility::rejected("plan has no steps");
    }
    let graph = match StepGraph::from_steps(&task.steps) {
        Ok(graph) => graph,
        Err(e) => return Feasibility::rejected(e.to_string()),
    };
    if let Some(step) = graph.cycle_member() {
        return Feasibility::rejected(format!("dependency cycle detected at step {}", step));
    }
    Feasibility::ok()
}

/// Advisory duration estimate in milliseconds.
pub fn estimate_duration(steps: &[Step]) -> u64 {
    steps
        .iter()
        .map(|s| {
            if s.dependencies.is_empty() {
                BASE_STEP_COST_MS as f64
            } else {
                BASE_STEP_COST_MS as f64 * DEPENDENCY_PENALTY
            }
        })
        .sum::<f64>()
        .round() as u64
}
