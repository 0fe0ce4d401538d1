//! Deterministic renumbering of the final page sequence.
//!
//! The renumbered names are the single source of truth for both the final
//! archive ordering and the reported page count: whatever order the pages
//! arrive in, `001.jpg … NNN.jpg` is what every packer sees and what every
//! reader will sort by.

use crate::error::BinderyError;
use std::path::{Path, PathBuf};

/// Zero-padded width for a sequence of `count` pages: at least 3 digits,
/// more when the count needs them.
pub fn padded_width(count: usize) -> usize {
    count.to_string().len().max(3)
}

/// Rename `pages` (already in final order) to sequential zero-padded names
/// within their directories, preserving extensions.
///
/// Renaming happens in two phases — everything moves aside to a temporary
/// name first — so an input like `002.jpg, 001.jpg` (in that order) cannot
/// collide with its own targets. Idempotent: renumbering a renumbered
/// sequence yields identical names.
pub fn renumber(pages: &[PathBuf]) -> Result<Vec<PathBuf>, BinderyError> {
    let width = padded_width(pages.len());

    // Phase 1: move every page aside.
    let mut staged: Vec<(PathBuf, String)> = Vec::with_capacity(pages.len());
    for (i, page) in pages.iter().enumerate() {
        let ext = page
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_else(|| "jpg".to_string());
        let parent = page.parent().unwrap_or(Path::new("."));
        let tmp = parent.join(format!("renumber-{i:06}.tmp"));
        std::fs::rename(page, &tmp).map_err(|e| BinderyError::io(page, e))?;
        staged.push((tmp, ext));
    }

    // Phase 2: settle on the final names.
    let mut finals = Vec::with_capacity(staged.len());
    for (i, (tmp, ext)) in staged.iter().enumerate() {
        let parent = tmp.parent().unwrap_or(Path::new("."));
        let dest = parent.join(format!("{:0width$}.{ext}", i + 1));
        std::fs::rename(tmp, &dest).map_err(|e| BinderyError::io(tmp, e))?;
        finals.push(dest);
    }
    Ok(finals)
}
