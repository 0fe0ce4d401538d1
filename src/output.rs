//! Output records: the only state that outlives task processing.
//!
//! Everything else (tasks, page sets, temp directories) is discarded when a
//! task finishes, successfully or not. A [`TaskResult`] per completed task
//! and the aggregated [`BatchSummary`] are what the caller gets back, and
//! what a front end renders as the download list.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Per-task output record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    /// Output artifact name, extension included (`one-piece-042.cbz`).
    pub name: String,
    /// Where the artifact was written in the persistent output area.
    pub path: PathBuf,
    /// Artifact size in bytes (total size of copied pages for the folder
    /// kind).
    pub bytes: u64,
    /// Final page count — after range clamping, splitting, and renumbering.
    pub pages: usize,
    /// Preview of the final first page as a base64 data URI.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
}

/// A task that failed, with the captured diagnostic reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskFailure {
    pub name: String,
    pub reason: String,
}

/// Aggregated result of one conversion request.
///
/// A failed task never hides its siblings: `results` always reports
/// whichever tasks did succeed, alongside `failures`. `batch_error` is set
/// only when the batch handler itself failed before or between tasks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Number of tasks attempted.
    pub tasks: usize,
    /// Sum of final page counts over successful tasks.
    pub total_pages: usize,
    /// Sum of artifact sizes over successful tasks.
    pub total_bytes: u64,
    pub results: Vec<TaskResult>,
    pub failures: Vec<TaskFailure>,
    /// Top-level handler error, when the batch as a whole failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_error: Option<String>,
}

impl BatchSummary {
    /// Record a successful task, updating the aggregate counters.
    pub fn push_result(&mut self, result: TaskResult) {
        self.total_pages += result.pages;
        self.total_bytes += result.bytes;
        self.results.push(result);
    }

    /// Record a failed task.
    pub fn push_failure(&mut self, name: impl Into<String>, reason: impl Into<String>) {
        self.failures.push(TaskFailure {
            name: name.into(),
            reason: reason.into(),
        });
    }

    /// Whether every attempted task succeeded and no batch-level error
    /// occurred.
    pub fn is_complete_success(&self) -> bool {
        self.failures.is_empty() && self.batch_error.is_none()
    }
}
