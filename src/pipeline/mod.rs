//! Pipeline stages for one conversion task.
//!
//! Each submodule implements exactly one transformation step.
//! Keeping stages separate makes each independently testable and lets us
//! swap implementations (e.g. switch a packer) without touching other
//! stages.
//!
//! ## Data Flow
//!
//! ```text
//! source ──▶ transform ──▶ paginate ──▶ assemble
//! (resolve   (per-page     (renumber    (pack into
//!  to pages)  ops + split)  001..NNN)    container)
//! ```
//!
//! 1. [`source`]    — resolve a document, archive, or loose-image task to an
//!    ordered sequence of page image files on local storage
//! 2. [`transform`] — rotate / resize / grayscale / re-encode / split each
//!    page; runs in `spawn_blocking` because image decode is CPU-bound
//! 3. [`paginate`]  — renumber the final sequence to fixed-width names; the
//!    single source of truth for archive order and page count
//! 4. [`preview`]   — thumbnail generation for the progress stream
//! 5. [`assemble`]  — hand the renumbered directory to the packer for the
//!    requested container kind

pub mod assemble;
pub mod paginate;
pub mod preview;
pub mod source;
pub mod transform;

use crate::progress::ProgressSink;

/// Progress context threaded through the stages of one task, so that
/// long-running steps can stream events carrying the right task counters.
#[derive(Debug, Clone)]
pub struct PipelineCtx {
    pub sink: ProgressSink,
    /// 1-based index of the task in the batch.
    pub task_index: usize,
    pub task_total: usize,
}
