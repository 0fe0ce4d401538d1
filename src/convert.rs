//! Batch orchestration: the conversion entry point.
//!
//! One request is one batch. The batch is classified into independent
//! tasks, and tasks execute **strictly one at a time** — an explicit
//! scheduling policy, not an accident: every task drives heavyweight
//! external processes, and a second concurrent task would double peak
//! subprocess memory for no latency win on a single box.
//!
//! Each task walks the state machine
//! `Received → Analyzing → (Extracting|Rendering) → Transforming →
//! Assembling → Finalizing → Done | Failed`, emitting progress at every
//! transition. A task that fails is recorded and cleaned up; its siblings
//! run regardless. Temporary state is removed on success and failure
//! alike — the only things that outlive a task are its artifact in the
//! output area and its entry in the [`BatchSummary`].

use crate::config::ConvertConfig;
use crate::error::BinderyError;
use crate::output::{BatchSummary, TaskResult};
use crate::pipeline::preview::{self, ThumbnailStrategy};
use crate::pipeline::source::{self, SourceKind};
use crate::pipeline::{assemble, paginate, transform, PipelineCtx};
use crate::progress::{percent, ProgressEvent, ProgressRegistry, ProgressSink};
use crate::task::{classify_batch, Task, UploadItem};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// The three persistent directories a conversion service works in.
#[derive(Debug, Clone)]
pub struct WorkAreas {
    /// Uploads land here; each file is removed once its task finishes.
    pub staging: PathBuf,
    /// Per-task temporary page directories; removed with their task.
    pub work: PathBuf,
    /// Final artifacts; retained indefinitely.
    pub output: PathBuf,
}

impl WorkAreas {
    /// Root all three areas under one base directory.
    pub fn under(base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        Self {
            staging: base.join("staging"),
            work: base.join("work"),
            output: base.join("output"),
        }
    }

    fn ensure(&self) -> Result<(), BinderyError> {
        for dir in [&self.staging, &self.work, &self.output] {
            std::fs::create_dir_all(dir).map_err(|e| BinderyError::io(dir, e))?;
        }
        Ok(())
    }
}

/// Phases of the per-task state machine, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskPhase {
    Received,
    Analyzing,
    Assembling,
    Finalizing,
    Done,
    Failed,
}

impl TaskPhase {
    fn status(&self) -> &'static str {
        match self {
            TaskPhase::Received => "Received",
            TaskPhase::Analyzing => "Analyzing input…",
            TaskPhase::Assembling => "Assembling container…",
            TaskPhase::Finalizing => "Finalizing…",
            TaskPhase::Done => "Done",
            TaskPhase::Failed => "Failed",
        }
    }

    /// Coarse percent milestone for phase-transition events; the page-level
    /// events in between carry the finer-grained numbers.
    fn milestone(&self) -> u8 {
        match self {
            TaskPhase::Received => 0,
            TaskPhase::Analyzing => 5,
            TaskPhase::Assembling => 90,
            TaskPhase::Finalizing => 95,
            TaskPhase::Done => 100,
            TaskPhase::Failed => 100,
        }
    }
}

/// Convert an upload batch, streaming progress to the listener registered
/// under `request_id` (if any).
///
/// Always returns a [`BatchSummary`]: task failures land in
/// `summary.failures`, and a failure of the batch handler itself (nothing
/// classified, staging unusable) lands in `summary.batch_error` — in that
/// case every staged upload is swept. This function never loses the
/// results of tasks that did succeed.
pub async fn convert_batch(
    items: Vec<UploadItem>,
    config: &ConvertConfig,
    areas: &WorkAreas,
    registry: &Arc<ProgressRegistry>,
    request_id: &str,
) -> BatchSummary {
    let sink = registry.sink(request_id);
    let staged: Vec<PathBuf> = items.iter().map(|i| i.local_path.clone()).collect();
    let mut summary = BatchSummary::default();

    // ── Step 1: Classify ─────────────────────────────────────────────────
    let tasks = match areas.ensure().and_then(|()| classify_batch(items)) {
        Ok(tasks) => tasks,
        Err(e) => {
            // Nothing was converted; sweep the staging area and report a
            // batch-level failure.
            warn!("Batch rejected: {}", e);
            sink.log(format!("Conversion failed: {e}"));
            sweep(&staged).await;
            summary.batch_error = Some(e.to_string());
            return summary;
        }
    };

    let total = tasks.len();
    summary.tasks = total;
    info!("Batch classified into {} tasks", total);
    sink.log(format!("Converting {total} item(s)…"));

    // ── Step 2: Run tasks strictly in sequence ───────────────────────────
    for (i, task) in tasks.iter().enumerate() {
        let index = i + 1;
        let outcome = run_task(task, index, total, config, areas, &sink).await;

        // Uploaded sources are consumed by their task, win or lose.
        sweep(&task.sources.iter().map(|s| s.local_path.clone()).collect::<Vec<_>>()).await;

        match outcome {
            Ok(result) => {
                sink.log(format!("Finished '{}' ({} pages)", result.name, result.pages));
                summary.push_result(result);
            }
            Err(e) => {
                warn!("Task '{}' failed: {}", task.name, e);
                emit_phase(&sink, index, total, TaskPhase::Failed);
                sink.log(format!("'{}' failed: {e}", task.name));
                summary.push_failure(&task.name, e.to_string());
            }
        }
    }

    sink.log(format!(
        "Batch complete: {} succeeded, {} failed",
        summary.results.len(),
        summary.failures.len()
    ));
    summary
}

/// Run one task through the full pipeline.
async fn run_task(
    task: &Task,
    index: usize,
    total: usize,
    config: &ConvertConfig,
    areas: &WorkAreas,
    sink: &ProgressSink,
) -> Result<TaskResult, BinderyError> {
    info!("Task {}/{}: '{}' ({:?})", index, total, task.name, SourceKind::of(task));
    emit_phase(sink, index, total, TaskPhase::Received);
    emit_phase(sink, index, total, TaskPhase::Analyzing);

    let ctx = PipelineCtx {
        sink: sink.clone(),
        task_index: index,
        task_total: total,
    };

    // ── Resolve the source into ordered page files ───────────────────────
    // Extraction/rendering progress streams from the directory sampler
    // while the external tool runs.
    let set = source::resolve(task, config, &areas.work, &ctx).await?;

    // ── Fast preview before the heavy work ───────────────────────────────
    let strategy = ThumbnailStrategy::for_config(config);
    if let Some(event) = preview::thumbnail_event(&set.pages()[0], strategy).await {
        sink.emit(event);
    }

    // ── Transform every page ─────────────────────────────────────────────
    let pages_dir = set.scratch_dir().join("pages");
    tokio::fs::create_dir_all(&pages_dir)
        .await
        .map_err(|e| BinderyError::io(&pages_dir, e))?;
    let transformed = transform::transform_pages(set.pages(), &pages_dir, config, &ctx).await?;

    // ── Renumber and assemble ────────────────────────────────────────────
    emit_phase(sink, index, total, TaskPhase::Assembling);
    let finals = paginate::renumber(&transformed)?;
    let page_count = finals.len();
    let assembled =
        assemble::assemble(&task.name, &pages_dir, &finals, config, &areas.output).await?;

    // ── Completion thumbnail from the final first page ───────────────────
    emit_phase(sink, index, total, TaskPhase::Finalizing);
    let thumbnail = preview::result_thumbnail(&finals[0]).await;
    if let Some(ref uri) = thumbnail {
        sink.emit(ProgressEvent::ThumbnailInit {
            gray: None,
            color: uri.clone(),
        });
    }

    emit_progress_pages(sink, index, total, TaskPhase::Done, page_count);
    // `set` drops here: the task's temporary directory is removed.
    Ok(TaskResult {
        name: assembled.name,
        path: assembled.path,
        bytes: assembled.bytes,
        pages: page_count,
        thumbnail,
    })
}

fn emit_phase(sink: &ProgressSink, index: usize, total: usize, phase: TaskPhase) {
    sink.emit(ProgressEvent::Progress {
        task_index: index,
        task_total: total,
        page_current: None,
        page_total: None,
        percent: phase.milestone(),
        status: phase.status().to_string(),
        file: None,
    });
}

fn emit_progress_pages(
    sink: &ProgressSink,
    index: usize,
    total: usize,
    phase: TaskPhase,
    pages: usize,
) {
    sink.emit(ProgressEvent::Progress {
        task_index: index,
        task_total: total,
        page_current: Some(pages),
        page_total: Some(pages),
        percent: percent(pages, pages).max(phase.milestone()),
        status: phase.status().to_string(),
        file: None,
    });
}

/// Best-effort removal of staged upload files.
async fn sweep(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = tokio::fs::remove_file(path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Could not sweep '{}': {}", path.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ContainerKind, PageFormat};
    use image::{DynamicImage, Rgb, RgbImage};
    use std::time::Duration;

    fn stage_image(staging: &Path, name: &str) -> UploadItem {
        std::fs::create_dir_all(staging).unwrap();
        let local = staging.join(name.replace('/', "_"));
        DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 96, Rgb([40, 90, 160])))
            .save_with_format(&local, image::ImageFormat::Png)
            .unwrap();
        UploadItem::new(name, local)
    }

    fn folder_config() -> ConvertConfig {
        ConvertConfig::builder()
            .container(ContainerKind::Folder)
            .format(PageFormat::Png)
            .poll_interval(Duration::from_millis(20))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn merge_batch_end_to_end_without_external_tools() {
        let tmp = tempfile::tempdir().unwrap();
        let areas = WorkAreas::under(tmp.path());
        let items = vec![
            stage_image(&areas.staging, "a.png"),
            stage_image(&areas.staging, "b.png"),
            stage_image(&areas.staging, "c.png"),
        ];
        let staged: Vec<PathBuf> = items.iter().map(|i| i.local_path.clone()).collect();

        let registry = Arc::new(ProgressRegistry::new());
        let summary =
            convert_batch(items, &folder_config(), &areas, &registry, "req-1").await;

        assert!(summary.is_complete_success(), "failures: {:?}", summary.failures);
        assert_eq!(summary.tasks, 1);
        assert_eq!(summary.results.len(), 1);
        let result = &summary.results[0];
        // Three root images → one merge task with a collective name.
        assert_eq!(result.name, "images");
        assert_eq!(result.pages, 3);
        assert!(result.thumbnail.is_some());
        for page in ["001.png", "002.png", "003.png"] {
            assert!(areas.output.join("images").join(page).is_file());
        }
        // Uploaded sources were consumed.
        for path in staged {
            assert!(!path.exists(), "staging not swept: {}", path.display());
        }
        // Per-task temp dirs were cleaned up.
        let leftovers = std::fs::read_dir(&areas.work).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn failed_task_does_not_block_siblings() {
        let tmp = tempfile::tempdir().unwrap();
        let areas = WorkAreas::under(tmp.path());
        std::fs::create_dir_all(&areas.staging).unwrap();

        // A garbage archive that no extractor can open…
        let bad = areas.staging.join("broken.cbz");
        std::fs::write(&bad, b"certainly not a zip").unwrap();
        // …next to a healthy image merge.
        let items = vec![
            UploadItem::new("broken.cbz", &bad),
            stage_image(&areas.staging, "ok.png"),
        ];

        let registry = Arc::new(ProgressRegistry::new());
        let summary =
            convert_batch(items, &folder_config(), &areas, &registry, "req-2").await;

        assert_eq!(summary.tasks, 2);
        assert_eq!(summary.results.len(), 1, "the healthy task must survive");
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].name, "broken");
        assert!(summary.batch_error.is_none());
        // The broken upload was still swept.
        assert!(!bad.exists());
    }

    #[tokio::test]
    async fn empty_batch_is_a_batch_level_error() {
        let tmp = tempfile::tempdir().unwrap();
        let areas = WorkAreas::under(tmp.path());
        let registry = Arc::new(ProgressRegistry::new());

        let summary = convert_batch(vec![], &folder_config(), &areas, &registry, "req-3").await;
        assert!(summary.batch_error.is_some());
        assert!(summary.results.is_empty());
    }

    #[tokio::test]
    async fn unsupported_upload_sweeps_staging() {
        let tmp = tempfile::tempdir().unwrap();
        let areas = WorkAreas::under(tmp.path());
        std::fs::create_dir_all(&areas.staging).unwrap();
        let bad = areas.staging.join("virus.exe");
        std::fs::write(&bad, b"mz").unwrap();
        let good = stage_image(&areas.staging, "fine.png");
        let good_path = good.local_path.clone();

        let registry = Arc::new(ProgressRegistry::new());
        let summary = convert_batch(
            vec![UploadItem::new("virus.exe", &bad), good],
            &folder_config(),
            &areas,
            &registry,
            "req-4",
        )
        .await;

        assert!(summary.batch_error.is_some());
        assert!(!bad.exists());
        assert!(!good_path.exists());
    }

    #[tokio::test]
    async fn progress_events_reach_a_subscribed_listener() {
        let tmp = tempfile::tempdir().unwrap();
        let areas = WorkAreas::under(tmp.path());
        let items = vec![stage_image(&areas.staging, "solo.png")];

        let registry = Arc::new(ProgressRegistry::new());
        let mut rx = registry.subscribe("req-5");
        let summary =
            convert_batch(items, &folder_config(), &areas, &registry, "req-5").await;
        assert!(summary.is_complete_success());

        let mut saw_thumbnail = false;
        let mut saw_done = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                ProgressEvent::ThumbnailInit { .. } => saw_thumbnail = true,
                ProgressEvent::Progress { status, percent, .. } => {
                    if status == "Done" {
                        assert_eq!(percent, 100);
                        saw_done = true;
                    }
                }
                ProgressEvent::Log { .. } => {}
            }
        }
        assert!(saw_thumbnail, "expected a thumbnail-init event");
        assert!(saw_done, "expected a terminal Done event");
    }

    #[tokio::test]
    async fn single_root_image_takes_its_own_name() {
        let tmp = tempfile::tempdir().unwrap();
        let areas = WorkAreas::under(tmp.path());
        let items = vec![stage_image(&areas.staging, "cover.png")];

        let registry = Arc::new(ProgressRegistry::new());
        let summary =
            convert_batch(items, &folder_config(), &areas, &registry, "req-6").await;
        assert_eq!(summary.results[0].name, "cover");
    }
}
