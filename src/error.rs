//! Error types for the bindery library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`BinderyError`] — **Task-fatal**: the owning task (or, for input
//!   validation, the whole batch) cannot proceed. A task-level error aborts
//!   that task, triggers its cleanup, and is recorded in the batch summary;
//!   sibling tasks continue unaffected.
//!
//! * [`PageError`] — **Non-fatal**: a single page's transform step failed.
//!   The transform pipeline degrades (skip the step, or fall back to a
//!   verbatim copy of the source page) and the task keeps going. A
//!   `PageError` never escapes the transform stage except as a log line.

use std::path::PathBuf;
use thiserror::Error;

/// All task- and batch-fatal errors returned by the bindery library.
///
/// Per-page transform failures use [`PageError`] and are recovered inside
/// the transform stage rather than propagated here.
#[derive(Debug, Error)]
pub enum BinderyError {
    // ── Input errors (rejected before any task is created) ────────────────
    /// The upload batch contained no files at all.
    #[error("No files submitted — nothing to convert.")]
    EmptyBatch,

    /// A root item has an extension that is neither an image nor a
    /// convertible document/archive.
    #[error("Unsupported file type: '{path}'\nSupported: documents (pdf), archives (zip/cbz/rar/cbr/7z/cb7/tar/cbt), images.")]
    UnsupportedExtension { path: PathBuf },

    /// A staged upload path does not exist or is unreadable.
    #[error("Input file not found or unreadable: '{path}'")]
    FileNotFound { path: PathBuf },

    // ── Resolution errors (fail the owning task only) ─────────────────────
    /// Source resolution yielded zero in-range pages — empty archive, an
    /// archive with no recognized images, or a page range entirely outside
    /// the document.
    #[error("'{name}' produced no pages in the requested range")]
    EmptyResult { name: String },

    // ── External tool errors (fail the owning task only) ──────────────────
    /// An external tool exited non-zero. Captured stderr is included so the
    /// failure reason reaches the batch response.
    #[error("{tool} failed ({status}): {stderr}")]
    ToolFailed {
        tool: String,
        status: String,
        stderr: String,
    },

    /// An external tool ran past the hard per-invocation timeout and was
    /// killed.
    #[error("{tool} timed out after {secs}s and was killed")]
    ToolTimeout { tool: String, secs: u64 },

    /// The tool binary could not be spawned at all (not installed, not on
    /// PATH).
    #[error("Cannot run '{tool}': {source}\nIs it installed and on PATH?")]
    ToolUnavailable {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    // ── Assembly errors (fail the owning task only) ───────────────────────
    /// The packer reported success but the expected output artifact does not
    /// exist.
    #[error("Expected output artifact missing after packing: '{path}'")]
    MissingArtifact { path: PathBuf },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// A filesystem operation on a known path failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BinderyError {
    /// Wrap an `std::io::Error` with the path it occurred on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BinderyError::Io {
            path: path.into(),
            source,
        }
    }
}

/// A non-fatal error for a single page's transform step.
///
/// Logged and recovered inside [`crate::pipeline::transform`]; the page is
/// carried forward as a verbatim copy instead.
#[derive(Debug, Error)]
pub enum PageError {
    /// The page image could not be decoded.
    #[error("page {page}: decode failed: {detail}")]
    DecodeFailed { page: usize, detail: String },

    /// The transformed page could not be re-encoded or written.
    #[error("page {page}: encode failed: {detail}")]
    EncodeFailed { page: usize, detail: String },
}
