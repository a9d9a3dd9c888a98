//! Conclusion prose and rule-based recommendations.

use super::ReportMetrics;
use crate::core::{Task, TaskStatus};
use crate::util::format_duration_ms;
use serde_json::Value;

/// Relative drift from the estimate that is worth flagging.
const DRIFT_THRESHOLD: f64 = 0.5;

fn plural(count: usize, one: &str, many: &str) -> String {
    if count == 1 {
        format!("{} {}", count, one)
    } else {
        format!("{} {}", count, many)
    }
}

fn opening(task: &Task, metrics: &ReportMetrics) -> String {
    let done = task.completed_steps();
    let total = task.steps.len();
    match task.status {
        TaskStatus::Completed if metrics.success_rate >= 1.0 => format!(
            "Task \"{}\" completed successfully: all {} finished.",
            task.description,
            plural(total, "step", "steps")
        ),
        TaskStatus::Completed => format!(
            "Task \"{}\" completed with partial success: {} of {} steps finished.",
            task.description, done, total
        ),
        TaskStatus::Failed if done > 0 => format!(
            "Task \"{}\" failed after partial progress ({} of {} steps): {}.",
            task.description,
            done,
            total,
            task.error.as_deref().unwrap_or("unknown error")
        ),
        TaskStatus::Failed => format!(
            "Task \"{}\" failed: {}.",
            task.description,
            task.error.as_deref().unwrap_or("unknown error")
        ),
        TaskStatus::Cancelled => format!(
            "Task \"{}\" was cancelled after {} of {} steps.",
            task.description, done, total
        ),
        TaskStatus::Pending => format!(
            "Task \"{}\" is queued and has not started yet.",
            task.description
        ),
        TaskStatus::InProgress | TaskStatus::Retrying => format!(
            "Task \"{}\" is in progress: {} of {} steps finished so far.",
            task.description, done, total
        ),
    }
}

fn array_len(result: &Value, key: &str) -> Option<usize> {
    result.get(key).and_then(Value::as_array).map(Vec::len)
}

/// Sentences describing recognizable parts of the result.
fn highlights(result: Option<&Value>) -> Vec<String> {
    let Some(result) = result else {
        return Vec::new();
    };
    let mut out = Vec::new();
    if let Some(n) = array_len(result, "sources") {
        out.push(format!("Gathered {}.", plural(n, "verified source", "verified sources")));
    }
    if let Some(n) = array_len(result, "patterns") {
        out.push(format!("Detected {}.", plural(n, "pattern", "patterns")));
    }
    if let Some(n) = array_len(result, "insights") {
        out.push(format!("Produced {}.", plural(n, "insight", "insights")));
    }
    if let Some(words) = result.get("word_count").and_then(Value::as_u64) {
        out.push(format!("Generated content of {} words.", words));
    }
    out
}

fn performance(task: &Task, metrics: &ReportMetrics) -> String {
    format!(
        "Performance: {} total, {:.0}% step success rate, {}.",
        format_duration_ms(metrics.total_duration_ms),
        metrics.success_rate * 100.0,
        plural(task.retry_count as usize, "retry", "retries")
    )
}

fn closing(task: &Task) -> &'static str {
    match task.status {
        TaskStatus::Completed => "The result is ready to use.",
        TaskStatus::Failed => "See the recommendations before creating a new attempt.",
        TaskStatus::Cancelled => "No further work will be done on this task.",
        _ => "This report will be refreshed when the task finishes.",
    }
}

/// Narrative summary keyed off status and success rate.
pub fn conclusion(task: &Task, metrics: &ReportMetrics) -> String {
    let mut parts = vec![opening(task, metrics)];
    parts.extend(highlights(task.result.as_ref()));
    parts.push(performance(task, metrics));
    parts.push(closing(task).to_string());
    parts.join(" ")
}

pub fn recommendations(task: &Task, metrics: &ReportMetrics) -> Vec<String> {
    let mut out = Vec::new();

    let failed: Vec<&str> = task
        .steps
        .iter()
        .filter(|s| s.is_failed())
        .map(|s| s.name.as_str())
        .collect();
    if !failed.is_empty() {
        out.push(format!(
            "{} failed ({}); check the step errors and the inputs they depend on.",
            plural(failed.len(), "step", "steps"),
            failed.join(", ")
        ));
    }

    if task.retry_count > 0 {
        out.push(format!(
            "The task needed {}; look for flaky dependencies or widen the retry backoff.",
            plural(task.retry_count as usize, "retry", "retries")
        ));
    }

    if task.status.is_terminal() && task.estimated_duration_ms > 0 && metrics.total_duration_ms > 0
    {
        let estimate = task.estimated_duration_ms as f64;
        let drift = (metrics.total_duration_ms as f64 - estimate) / estimate;
        if drift > DRIFT_THRESHOLD {
            out.push(format!(
                "Took {:.0}% longer than the {} estimate; the plan may underestimate its steps.",
                drift * 100.0,
                format_duration_ms(task.estimated_duration_ms)
            ));
        } else if drift < -DRIFT_THRESHOLD {
            out.push(format!(
                "Finished {:.0}% faster than the {} estimate; the estimate may be too conservative.",
                -drift * 100.0,
                format_duration_ms(task.estimated_duration_ms)
            ));
        }
    }

    match task.status {
        TaskStatus::Completed if task.retry_count == 0 && metrics.success_rate >= 1.0 => {
            out.push("Clean run: every step succeeded on the first attempt.".to_string())
        }
        TaskStatus::Cancelled => {
            out.push("The task was cancelled; create a new task to run it again.".to_string())
        }
        _ => {}
    }

    out
}
