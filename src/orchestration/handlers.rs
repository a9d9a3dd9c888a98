//! Built-in step handlers.
//!
//! These are deterministic, offline stand-ins for real retrieval, analysis
//! and writing. They exist so every category has a working pipeline and
//! so each step visibly hands its artifact to the next one through the
//! metadata bag.

use crate::core::{Metadata, Step, StepKind, Task, TaskCategory};
use crate::orchestration::worker::{handler_fn, CategoryWorker, StepError, StepResult};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Relevance below which a source does not survive verification.
const MIN_RELEVANCE: f64 = 0.5;
const MAX_SOURCES: usize = 6;

fn keywords(description: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for word in description
        .split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|w| w.len() > 3)
    {
        if !seen.contains(&word) {
            seen.push(word);
        }
    }
    seen
}

fn read<'a>(metadata: &'a Metadata, key: &str, step: &Step) -> Result<&'a Value, StepError> {
    metadata.get(key).ok_or_else(|| {
        StepError::new(format!(
            "invalid state: step {} expected '{}' in task metadata",
            step.name, key
        ))
    })
}

fn read_array<'a>(
    metadata: &'a Metadata,
    key: &str,
    step: &Step,
) -> Result<&'a Vec<Value>, StepError> {
    read(metadata, key, step)?
        .as_array()
        .ok_or_else(|| StepError::new(format!("invalid state: '{}' is not a list", key)))
}

// Research

fn search(_: &Step, description: &str, metadata: &mut Metadata) -> StepResult {
    let mut terms = keywords(description);
    if terms.is_empty() {
        terms.push(description.trim().to_lowercase());
    }
    let sources: Vec<Value> = terms
        .iter()
        .take(MAX_SOURCES)
        .enumerate()
        .map(|(i, term)| {
            json!({
                "title": format!("Notes on {}", term),
                "topic": term,
                "relevance": 1.0 - i as f64 * 0.15,
            })
        })
        .collect();
    metadata.insert("sources".to_string(), Value::Array(sources.clone()));
    Ok(json!({ "found": sources.len() }))
}

fn verify(step: &Step, _: &str, metadata: &mut Metadata) -> StepResult {
    let verified: Vec<Value> = read_array(metadata, "sources", step)?
        .iter()
        .filter(|s| s["relevance"].as_f64().unwrap_or(0.0) >= MIN_RELEVANCE)
        .cloned()
        .collect();
    let count = verified.len();
    metadata.insert("verified_sources".to_string(), Value::Array(verified));
    Ok(json!({ "verified": count }))
}

fn synthesize(step: &Step, description: &str, metadata: &mut Metadata) -> StepResult {
    let topics: Vec<&str> = read_array(metadata, "verified_sources", step)?
        .iter()
        .filter_map(|s| s["topic"].as_str())
        .collect();
    let summary = if topics.is_empty() {
        format!("No verified sources were found for \"{}\".", description)
    } else {
        format!(
            "\"{}\" draws on {} verified sources covering {}.",
            description,
            topics.len(),
            topics.join(", ")
        )
    };
    metadata.insert("summary".to_string(), json!(summary));
    Ok(json!(summary))
}

fn research_result(task: &Task) -> Value {
    let sources = task
        .metadata
        .get("verified_sources")
        .cloned()
        .unwrap_or_else(|| json!([]));
    json!({
        "sources": sources,
        "summary": task.metadata.get("summary").cloned().unwrap_or(Value::Null),
    })
}

// Analysis

fn extraction(_: &Step, description: &str, metadata: &mut Metadata) -> StepResult {
    let points: Vec<Value> = description
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| json!(w.to_lowercase()))
        .collect();
    let count = points.len();
    metadata.insert("data_points".to_string(), Value::Array(points));
    Ok(json!({ "extracted": count }))
}

fn pattern_detection(step: &Step, _: &str, metadata: &mut Metadata) -> StepResult {
    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    for point in read_array(metadata, "data_points", step)?
        .iter()
        .filter_map(Value::as_str)
    {
        *counts.entry(point.to_string()).or_default() += 1;
    }
    let mut ranked: Vec<(String, u64)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let patterns: Vec<Value> = ranked
        .iter()
        .take(5)
        .map(|(term, count)| json!({ "term": term, "count": count }))
        .collect();
    let count = patterns.len();
    metadata.insert("patterns".to_string(), Value::Array(patterns));
    Ok(json!({ "patterns": count }))
}

fn synthesis(step: &Step, _: &str, metadata: &mut Metadata) -> StepResult {
    let patterns = read_array(metadata, "patterns", step)?;
    let dominant = patterns
        .first()
        .and_then(|p| p["term"].as_str())
        .unwrap_or("none")
        .to_string();
    let model = json!({
        "dominant": dominant,
        "distinct_terms": patterns.len(),
    });
    metadata.insert("model".to_string(), model.clone());
    Ok(model)
}

fn insights(step: &Step, _: &str, metadata: &mut Metadata) -> StepResult {
    let dominant = read(metadata, "model", step)?["dominant"]
        .as_str()
        .unwrap_or("none")
        .to_string();
    let mut found: Vec<Value> = read_array(metadata, "patterns", step)?
        .iter()
        .filter_map(|p| Some(format!("'{}' occurs {} time(s)", p["term"].as_str()?, p["count"])))
        .map(Value::String)
        .collect();
    found.insert(0, json!(format!("Dominant theme: {}", dominant)));
    metadata.insert("insights".to_string(), Value::Array(found.clone()));
    Ok(Value::Array(found))
}

fn analysis_result(task: &Task) -> Value {
    let pick = |key: &str| task.metadata.get(key).cloned().unwrap_or_else(|| json!([]));
    json!({
        "patterns": pick("patterns"),
        "insights": pick("insights"),
        "data_points": task
            .metadata
            .get("data_points")
            .and_then(Value::as_array)
            .map_or(0, Vec::len),
    })
}

// Creation

fn outline(_: &Step, description: &str, metadata: &mut Metadata) -> StepResult {
    let subject = description.trim();
    let sections = json!([
        "Introduction",
        format!("Background on {}", subject),
        format!("Key points of {}", subject),
        "Conclusion",
    ]);
    metadata.insert("outline".to_string(), sections.clone());
    Ok(sections)
}

fn draft(step: &Step, description: &str, metadata: &mut Metadata) -> StepResult {
    let body: Vec<String> = read_array(metadata, "outline", step)?
        .iter()
        .filter_map(Value::as_str)
        .map(|section| {
            format!(
                "## {}\n\nThis  section covers {} as it relates to {}.",
                section,
                section.to_lowercase(),
                description.trim()
            )
        })
        .collect();
    let text = body.join("\n\n");
    metadata.insert("draft".to_string(), json!(text));
    Ok(json!({ "sections": body.len() }))
}

fn refine(step: &Step, _: &str, metadata: &mut Metadata) -> StepResult {
    let draft = read(metadata, "draft", step)?
        .as_str()
        .ok_or_else(|| StepError::new("invalid state: draft is not text"))?;
    let refined: Vec<String> = draft
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect();
    let text = refined.join("\n");
    metadata.insert("refined".to_string(), json!(text));
    Ok(json!({ "characters": text.len() }))
}

fn finalize(step: &Step, description: &str, metadata: &mut Metadata) -> StepResult {
    let refined = read(metadata, "refined", step)?
        .as_str()
        .ok_or_else(|| StepError::new("invalid state: refined draft is not text"))?;
    let content = format!("# {}\n\n{}", description.trim(), refined);
    let word_count = content.split_whitespace().filter(|w| *w != "#" && *w != "##").count();
    metadata.insert("content".to_string(), json!(content));
    metadata.insert("word_count".to_string(), json!(word_count));
    Ok(json!({ "word_count": word_count }))
}

fn creation_result(task: &Task) -> Value {
    json!({
        "content": task.metadata.get("content").cloned().unwrap_or(Value::Null),
        "word_count": task.metadata.get("word_count").cloned().unwrap_or(json!(0)),
        "sections": task
            .metadata
            .get("outline")
            .and_then(Value::as_array)
            .map_or(0, Vec::len),
    })
}

// Everything else

fn execute(_: &Step, description: &str, metadata: &mut Metadata) -> StepResult {
    let output = json!({ "executed": description.trim() });
    metadata.insert("output".to_string(), output.clone());
    Ok(output)
}

fn generic_result(task: &Task) -> Value {
    let outputs: Vec<Value> = task
        .steps
        .iter()
        .filter_map(|s| s.result.clone())
        .collect();
    json!({ "output": outputs })
}

/// The built-in worker for a category.
pub fn builtin_worker(category: TaskCategory) -> CategoryWorker {
    let worker = match category {
        TaskCategory::Research => CategoryWorker::new(category, Arc::new(research_result))
            .with_handler(StepKind::Search, handler_fn(search))
            .with_handler(StepKind::Verify, handler_fn(verify))
            .with_handler(StepKind::Synthesize, handler_fn(synthesize)),
        TaskCategory::Analysis => CategoryWorker::new(category, Arc::new(analysis_result))
            .with_handler(StepKind::Extraction, handler_fn(extraction))
            .with_handler(StepKind::PatternDetection, handler_fn(pattern_detection))
            .with_handler(StepKind::Synthesis, handler_fn(synthesis))
            .with_handler(StepKind::Insights, handler_fn(insights)),
        TaskCategory::Creation => CategoryWorker::new(category, Arc::new(creation_result))
            .with_handler(StepKind::Outline, handler_fn(outline))
            .with_handler(StepKind::Draft, handler_fn(draft))
            .with_handler(StepKind::Refine, handler_fn(refine))
            .with_handler(StepKind::Finalize, handler_fn(finalize)),
        TaskCategory::Automation | TaskCategory::General => {
            CategoryWorker::new(category, Arc::new(generic_result))
        }
    };
    worker.with_handler(StepKind::Execute, handler_fn(execute))
}
