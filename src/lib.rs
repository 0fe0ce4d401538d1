//! # bindery
//!
//! Convert a batch of page-bearing inputs — paginated documents, comic
//! archives, loose images, image folders — into paginated containers
//! (CBZ/CBT/CB7/CBR, a single PDF, or a flat folder), streaming live
//! progress to the submitting client and producing a preview image per
//! output.
//!
//! ## Why this crate?
//!
//! Every comic/scan conversion tool reinvents the same plumbing: figuring
//! out what a pile of uploads actually *is*, turning each piece into an
//! ordered page sequence, normalising the pages, and packing them so a
//! reader app sorts them correctly. This crate owns exactly that
//! orchestration; the heavyweight engines (rasterizer, extractors,
//! packers) stay external tools behind a narrow subprocess contract.
//!
//! ## Pipeline Overview
//!
//! ```text
//! uploads
//!  │
//!  ├─ 1. Classify  fold the batch into independent tasks
//!  ├─ 2. Resolve   document/archive/images → ordered page files
//!  ├─ 3. Transform rotate · resize · gray · re-encode · split spreads
//!  ├─ 4. Renumber  001…NNN, the single source of truth for page order
//!  ├─ 5. Assemble  pack into cbz / cbt / cb7 / cbr / pdf / folder
//!  └─ 6. Report    per-task results + batch summary
//! ```
//!
//! Progress events stream through a per-request [`ProgressRegistry`]
//! throughout; a client that never subscribes costs nothing.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bindery::{convert_batch, ConvertConfig, ProgressRegistry, UploadItem, WorkAreas};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let areas = WorkAreas::under("/var/lib/bindery");
//!     let registry = Arc::new(ProgressRegistry::new());
//!     let items = vec![UploadItem::new("issue-01.pdf", "/var/lib/bindery/staging/issue-01.pdf")];
//!
//!     let summary =
//!         convert_batch(items, &ConvertConfig::default(), &areas, &registry, "req-1").await;
//!     for result in &summary.results {
//!         println!("{} → {} pages, {} bytes", result.name, result.pages, result.bytes);
//!     }
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `bindery` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! bindery = { version = "0.4", default-features = false }
//! ```
//!
//! ## External tools
//!
//! | Concern | Tool | Needed when |
//! |---------|------|-------------|
//! | Document rendering | `pdftoppm` | converting PDFs |
//! | Verbatim page extraction | `pdfimages` | converting PDFs in original mode |
//! | Page count query | `pdfinfo` | converting PDFs |
//! | Archive extraction | `7z`, `unar`, `bsdtar` (fallback chain) | converting archives |
//! | Packing | `7z` / `rar` / `bsdtar` / `img2pdf` | per container kind |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod task;
pub mod tools;
pub mod watch;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    ColorMode, ContainerKind, ConvertConfig, ConvertConfigBuilder, Density, PageFormat, PageRange,
    ReadingDirection, SplitMode,
};
pub use convert::{convert_batch, WorkAreas};
pub use error::{BinderyError, PageError};
pub use output::{BatchSummary, TaskFailure, TaskResult};
pub use progress::{ProgressEvent, ProgressRegistry, ProgressSink};
pub use task::{classify_batch, Task, TaskKind, UploadItem};
