//! Integration test suite for taskpilot.
//!
//! These tests drive the public `Orchestrator` from task creation through
//! execution, retries, cancellation and reporting. Step handlers are
//! scripted so that failures and timing are deterministic.
//!
//! # Test Categories
//!
//! - `workflow_e2e`: Full plan, run and report cycles
//! - `parallel_tasks`: Concurrency bound and FIFO admission
//! - `recovery`: Error classification, retries, rollback, restart
//! - `cancellation`: Queued and running cancellation
//! - `persistence`: Snapshot round trips through the JSON store

mod fixtures;

mod parallel_tasks;
mod persistence;
mod recovery;
mod workflow_e2e;
