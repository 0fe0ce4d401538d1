//! Page source resolution: any task → an ordered sequence of page images.
//!
//! Three source kinds exist — paginated document, page-image archive, and
//! loose image set — and everything downstream of this module is blind to
//! which one a page came from. All three paths converge on one contract:
//! a [`PageSet`] of readable image files in order, whose length is the
//! effective (in-range) page count.
//!
//! ## Why raw-byte path ordering for archives?
//!
//! Archive entry names are opaque byte sequences, not guaranteed valid
//! UTF-8. Sorting extracted paths by their raw bytes keeps page order
//! stable and reproducible for identical archive content regardless of the
//! platform's text encoding.

use crate::config::{ConvertConfig, Density, PageRange};
use crate::error::BinderyError;
use crate::pipeline::PipelineCtx;
use crate::task::{self, Task, TaskKind};
use crate::tools;
use crate::watch::{DirWatcher, WatchContext};
use std::io::Read;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Which resolution path a task takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Paginated document rendered (or verbatim-extracted) by the
    /// rasterizer tool.
    Document,
    /// Page-image archive unpacked by the extractor chain.
    Archive,
    /// Loose images; the task's file list already is the page sequence.
    Images,
}

impl SourceKind {
    /// Select the resolution path from task kind and file extension.
    pub fn of(task: &Task) -> SourceKind {
        match task.kind {
            TaskKind::Merge => SourceKind::Images,
            TaskKind::Convert => {
                if task::is_document(&task.source().relative_path) {
                    SourceKind::Document
                } else {
                    SourceKind::Archive
                }
            }
        }
    }
}

/// The resolved page sequence for one task, indexed 1..N in `pages` order.
///
/// Owns the temporary directory that rendered/extracted pages were
/// materialized into; dropping the set removes it. Loose-image pages
/// reference the staging area instead and survive the drop (staging
/// cleanup is the orchestrator's job).
#[derive(Debug)]
pub struct PageSet {
    dir: TempDir,
    pages: Vec<PathBuf>,
}

impl PageSet {
    /// The ordered page files.
    pub fn pages(&self) -> &[PathBuf] {
        &self.pages
    }

    /// Effective page count.
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Scratch space alongside the resolved pages, same lifetime as the
    /// set.
    pub fn scratch_dir(&self) -> &Path {
        self.dir.path()
    }
}

/// Resolve a task into its ordered page sequence.
///
/// # Errors
/// [`BinderyError::EmptyResult`] when resolution yields zero in-range
/// pages; tool errors pass through unchanged. Either way the owning task
/// fails alone — siblings are unaffected.
pub async fn resolve(
    task: &Task,
    config: &ConvertConfig,
    work_area: &Path,
    ctx: &PipelineCtx,
) -> Result<PageSet, BinderyError> {
    let dir = TempDir::new_in(work_area)
        .map_err(|e| BinderyError::io(work_area, e))?;

    let pages = match SourceKind::of(task) {
        SourceKind::Document => resolve_document(task, config, dir.path(), ctx).await?,
        SourceKind::Archive => resolve_archive(task, config, dir.path(), ctx).await?,
        SourceKind::Images => resolve_images(task, config)?,
    };

    if pages.is_empty() {
        return Err(BinderyError::EmptyResult {
            name: task.name.clone(),
        });
    }

    info!("'{}' resolved to {} pages", task.name, pages.len());
    Ok(PageSet { dir, pages })
}

// ── Paginated documents ──────────────────────────────────────────────────

/// Effective page count: the requested range intersected with the real
/// extent, clamped to ≥ 0. Defaults to the full document when no range is
/// given.
pub(crate) fn effective_count(total: usize, range: Option<PageRange>) -> usize {
    match range {
        None => total,
        Some(r) => {
            let start = r.start.max(1);
            let end = r.end.min(total);
            (end + 1).saturating_sub(start)
        }
    }
}

/// Clamp a requested range against a known total, 1-based inclusive.
fn clamp_range(total: usize, range: PageRange) -> Option<(usize, usize)> {
    let start = range.start.max(1);
    let end = range.end.min(total);
    (start <= end).then_some((start, end))
}

async fn resolve_document(
    task: &Task,
    config: &ConvertConfig,
    dir: &Path,
    ctx: &PipelineCtx,
) -> Result<Vec<PathBuf>, BinderyError> {
    let doc = &task.source().local_path;
    if !looks_like_pdf(doc) {
        warn!("'{}' lacks the document magic bytes; attempting anyway", doc.display());
    }

    let total = tools::query_page_count(doc, config.tool_timeout).await;

    // Unknown total means the range cannot be clamped and passes through
    // unmodified; the rasterizer renders whatever actually exists.
    let (range, expected) = match (config.range, total) {
        (None, t) => (None, t),
        (Some(r), None) => (Some((r.start.max(1), r.end)), None),
        (Some(r), Some(t)) => match clamp_range(t, r) {
            Some(clamped) => (Some(clamped), Some(effective_count(t, Some(r)))),
            None => {
                return Err(BinderyError::EmptyResult {
                    name: task.name.clone(),
                });
            }
        },
    };
    debug!(
        "'{}': total={:?}, range={:?}, expected={:?}",
        task.name, total, range, expected
    );

    let status = if config.is_original() {
        "Extracting pages…"
    } else {
        "Rendering pages…"
    };
    let watcher = DirWatcher::spawn(
        dir.to_path_buf(),
        config.poll_interval,
        ctx.sink.clone(),
        WatchContext {
            task_index: ctx.task_index,
            task_total: ctx.task_total,
            status: status.to_string(),
            expected,
        },
    );

    let result = match config.density {
        // Original mode: embedded images verbatim; rendering options do not
        // apply.
        Density::Original => {
            tools::extract_embedded_images(doc, dir, range, config.tool_timeout).await
        }
        Density::Dpi(dpi) => {
            tools::rasterize_document(
                doc,
                dir,
                tools::RenderOptions {
                    dpi,
                    format: config.format,
                    color: config.color,
                    jpeg_quality: config.jpeg_quality,
                    range,
                },
                config.tool_timeout,
            )
            .await
        }
    };
    watcher.stop();
    result?;

    let pages = scan_images(dir);
    if let Some(expected) = expected {
        if pages.len() != expected {
            // The rasterizer may skip unrenderable pages; the materialized
            // count wins.
            warn!(
                "'{}': expected {} pages, rasterizer produced {}",
                task.name,
                expected,
                pages.len()
            );
        }
    }
    Ok(pages)
}

// ── Page-image archives ──────────────────────────────────────────────────

async fn resolve_archive(
    task: &Task,
    config: &ConvertConfig,
    dir: &Path,
    ctx: &PipelineCtx,
) -> Result<Vec<PathBuf>, BinderyError> {
    let archive = &task.source().local_path;

    let watcher = DirWatcher::spawn(
        dir.to_path_buf(),
        config.poll_interval,
        ctx.sink.clone(),
        WatchContext {
            task_index: ctx.task_index,
            task_total: ctx.task_total,
            status: "Extracting archive…".to_string(),
            // Entry count is unknown until extraction finishes.
            expected: None,
        },
    );
    let extractor = tools::extract_archive(archive, dir, config.tool_timeout).await;
    watcher.stop();
    let used = extractor?;
    debug!("'{}' extracted with {}", task.name, used);

    // Range is an index slice over the sorted listing — the archive is
    // never re-queried.
    Ok(slice_range(scan_images(dir), config.range))
}

// ── Loose images ─────────────────────────────────────────────────────────

fn resolve_images(task: &Task, config: &ConvertConfig) -> Result<Vec<PathBuf>, BinderyError> {
    let mut pages = Vec::with_capacity(task.sources.len());
    for item in &task.sources {
        if !item.local_path.is_file() {
            return Err(BinderyError::FileNotFound {
                path: item.local_path.clone(),
            });
        }
        pages.push(item.local_path.clone());
    }
    // Upload order is the page order; range slices it like any other kind.
    Ok(slice_range(pages, config.range))
}

// ── Shared helpers ───────────────────────────────────────────────────────

/// Recursively collect recognized image files under `dir`, sorted by full
/// path in raw byte order.
pub(crate) fn scan_images(dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
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
                found.push(path);
            }
        }
    }
    found.sort_by(|a, b| {
        a.as_os_str()
            .as_encoded_bytes()
            .cmp(b.as_os_str().as_encoded_bytes())
    });
    found
}

/// Apply a 1-based inclusive range as an index slice over an already-ordered
/// page list.
pub(crate) fn slice_range(pages: Vec<PathBuf>, range: Option<PageRange>) -> Vec<PathBuf> {
    let Some(r) = range else {
        return pages;
    };
    let start = r.start.max(1) - 1;
    let end = r.end.min(pages.len());
    if start >= end {
        return Vec::new();
    }
    pages[start..end].to_vec()
}

fn looks_like_pdf(path: &Path) -> bool {
    let Ok(mut f) = std::fs::File::open(path) else {
        return false;
    };
    let mut magic = [0u8; 4];
    f.read_exact(&mut magic).is_ok() && &magic == b"%PDF"
}
