//! Directory-polling progress estimator.
//!
//! External tools materialize page files one by one but report nothing
//! while they run. Sampling the task's temporary directory on a fixed
//! interval and counting the page images that already exist gives a useful
//! percent-complete estimate without any cooperation from the tool.
//!
//! This is an estimate, nothing more: the sample races the subprocess that
//! is writing the directory, so a tick may see a partial listing, a file
//! mid-write, or a directory that does not exist yet. Every failure mode is
//! tolerated by skipping the tick. The interval comes from
//! [`crate::config::ConvertConfig::poll_interval`] so tests can inject a
//! short one.

use crate::progress::{percent, ProgressEvent, ProgressSink};
use crate::task;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::trace;

/// Static context echoed into every sampled progress event.
#[derive(Debug, Clone)]
pub struct WatchContext {
    pub task_index: usize,
    pub task_total: usize,
    /// Human status for the phase being sampled ("Rendering pages…").
    pub status: String,
    /// Effective page total when known; archives are extracted before their
    /// count exists, so the estimate may run without one.
    pub expected: Option<usize>,
}

/// Handle to a running sampler; aborts the sampling task when dropped.
#[derive(Debug)]
pub struct DirWatcher {
    handle: JoinHandle<()>,
}

impl DirWatcher {
    /// Start sampling `dir` every `interval`, emitting progress through
    /// `sink` until stopped.
    pub fn spawn(
        dir: PathBuf,
        interval: Duration,
        sink: ProgressSink,
        ctx: WatchContext,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; skip it so the subprocess
            // gets a head start before the first sample.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let count = count_page_images(&dir);
                trace!("Sampled {}: {} page files", dir.display(), count);
                if count == 0 {
                    continue;
                }
                let pct = ctx.expected.map(|total| percent(count, total)).unwrap_or(0);
                sink.emit(ProgressEvent::Progress {
                    task_index: ctx.task_index,
                    task_total: ctx.task_total,
                    page_current: Some(count),
                    page_total: ctx.expected,
                    percent: pct,
                    status: ctx.status.clone(),
                    file: None,
                });
            }
        });
        Self { handle }
    }

    /// Stop sampling. Idempotent with drop.
    pub fn stop(self) {
        self.handle.abort();
    }
}

impl Drop for DirWatcher {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Count recognized page-image files under `dir`, recursively.
///
/// Any unreadable directory or entry counts as absent — a transient race
/// with the writing subprocess, not an error.
fn count_page_images(dir: &Path) -> usize {
    let mut count = 0;
    let mut pending = vec![dir.to_path_buf()];
    while let Some(d) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&d) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else if task::is_image(&path) {
                count += 1;
            }
        }
    }
    count
}
