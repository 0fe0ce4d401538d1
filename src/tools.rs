//! External tool invocation: rasterizer, metadata query, extractors, packers.
//!
//! Every engine with real decoding/packing complexity lives outside this
//! process and is driven as a black-box subprocess with a defined contract:
//! give it paths and flags, get files and an exit status back. This module
//! owns that boundary — one [`run_tool`] primitive with a hard timeout and
//! captured diagnostics, plus a typed wrapper per tool so the rest of the
//! crate never touches argv directly.
//!
//! Invocations block the task's logical thread (awaited to completion); the
//! orchestrator's one-task-at-a-time policy bounds subprocess resource usage.

use crate::config::{ColorMode, ContainerKind, PageFormat};
use crate::error::BinderyError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Captured output of a finished tool run.
#[derive(Debug)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Keep failure reasons readable when a tool dumps pages of diagnostics.
fn truncate_diag(s: &str) -> String {
    const MAX: usize = 2000;
    if s.len() <= MAX {
        return s.trim().to_string();
    }
    let mut cut = MAX;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…", s[..cut].trim())
}

/// Run `program` with `args`, killing it at `timeout`.
///
/// # Errors
/// * [`BinderyError::ToolUnavailable`] — the binary could not be spawned.
/// * [`BinderyError::ToolTimeout`] — the hard per-invocation timeout hit;
///   the child is killed.
/// * [`BinderyError::ToolFailed`] — non-zero exit; stderr is captured into
///   the error so the failure reason reaches the batch response.
pub async fn run_tool(
    program: &str,
    args: &[OsString],
    cwd: Option<&Path>,
    timeout: Duration,
) -> Result<ToolOutput, BinderyError> {
    debug!("Running {} {:?}", program, args);

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        // If the timeout future wins, dropping the child must not leave an
        // orphan subprocess behind.
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let child = cmd.spawn().map_err(|e| BinderyError::ToolUnavailable {
        tool: program.to_string(),
        source: e,
    })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(io_result) => io_result.map_err(|e| BinderyError::ToolUnavailable {
            tool: program.to_string(),
            source: e,
        })?,
        Err(_) => {
            return Err(BinderyError::ToolTimeout {
                tool: program.to_string(),
                secs: timeout.as_secs(),
            });
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !output.status.success() {
        return Err(BinderyError::ToolFailed {
            tool: program.to_string(),
            status: output
                .status
                .code()
                .map(|c| format!("exit code {c}"))
                .unwrap_or_else(|| "killed by signal".to_string()),
            stderr: truncate_diag(if stderr.trim().is_empty() {
                &stdout
            } else {
                &stderr
            }),
        });
    }

    Ok(ToolOutput { stdout, stderr })
}

fn os_args<I, S>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
{
    args.into_iter().map(Into::into).collect()
}

// ── Rasterizer (pdftoppm contract) ───────────────────────────────────────

/// Rendering options handed to the rasterizer tool.
#[derive(Debug, Clone, Copy)]
pub struct RenderOptions {
    pub dpi: u32,
    pub format: PageFormat,
    pub color: ColorMode,
    pub jpeg_quality: u8,
    /// 1-based inclusive page range; `None` renders everything.
    pub range: Option<(usize, usize)>,
}

/// Render each in-range page of `document` into `out_dir` as
/// `page-NN.<ext>` raster files.
pub async fn rasterize_document(
    document: &Path,
    out_dir: &Path,
    opts: RenderOptions,
    timeout: Duration,
) -> Result<(), BinderyError> {
    let mut args: Vec<OsString> = os_args(["-r".to_string(), opts.dpi.to_string()]);

    match opts.format {
        PageFormat::Jpeg => {
            args.push("-jpeg".into());
            args.push("-jpegopt".into());
            args.push(format!("quality={}", opts.jpeg_quality).into());
        }
        PageFormat::Png => args.push("-png".into()),
        PageFormat::Tiff => args.push("-tiff".into()),
    }

    match opts.color {
        ColorMode::Color => {}
        ColorMode::Gray => args.push("-gray".into()),
        ColorMode::Mono => args.push("-mono".into()),
    }

    if let Some((start, end)) = opts.range {
        args.extend(os_args(["-f".to_string(), start.to_string()]));
        args.extend(os_args(["-l".to_string(), end.to_string()]));
    }

    args.push(document.into());
    args.push(out_dir.join("page").into());

    run_tool("pdftoppm", &args, None, timeout).await.map(|_| ())
}

/// Extract embedded page images verbatim (original mode): no rendering, no
/// recompression. Rendering options do not apply and are not accepted.
pub async fn extract_embedded_images(
    document: &Path,
    out_dir: &Path,
    range: Option<(usize, usize)>,
    timeout: Duration,
) -> Result<(), BinderyError> {
    let mut args: Vec<OsString> = vec!["-all".into()];
    if let Some((start, end)) = range {
        args.extend(os_args(["-f".to_string(), start.to_string()]));
        args.extend(os_args(["-l".to_string(), end.to_string()]));
    }
    args.push(document.into());
    args.push(out_dir.join("page").into());

    run_tool("pdfimages", &args, None, timeout).await.map(|_| ())
}

// ── Metadata query (pdfinfo contract) ────────────────────────────────────

static RE_PAGE_COUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^Pages:\s+(\d+)\s*$").expect("static regex"));

/// Total page count of a document, or `None` when the query fails.
///
/// Unknown means the resolver cannot clamp the requested range and passes
/// it through unmodified — never a task failure on its own.
pub async fn query_page_count(document: &Path, timeout: Duration) -> Option<usize> {
    let args: Vec<OsString> = vec![document.into()];
    match run_tool("pdfinfo", &args, None, timeout).await {
        Ok(out) => {
            let count = RE_PAGE_COUNT
                .captures(&out.stdout)
                .and_then(|c| c[1].parse::<usize>().ok());
            if count.is_none() {
                warn!(
                    "Page count missing from metadata output for '{}'",
                    document.display()
                );
            }
            count
        }
        Err(e) => {
            warn!("Page count query failed for '{}': {}", document.display(), e);
            None
        }
    }
}

// ── Archive extraction (fallback chain) ──────────────────────────────────

/// Unpack `archive` into `out_dir`, preserving entry names and nesting.
///
/// Tries the primary extractor first, then the secondary, then a generic
/// fallback; a primary failure followed by a fallback success is not a task
/// failure. Returns the name of the tool that succeeded.
pub async fn extract_archive(
    archive: &Path,
    out_dir: &Path,
    timeout: Duration,
) -> Result<&'static str, BinderyError> {
    let mut out_flag = OsString::from("-o");
    out_flag.push(out_dir);
    let attempts: [(&'static str, Vec<OsString>); 3] = [
        (
            "7z",
            vec!["x".into(), "-y".into(), out_flag, archive.into()],
        ),
        (
            "unar",
            vec![
                "-quiet".into(),
                "-force-overwrite".into(),
                "-o".into(),
                out_dir.into(),
                archive.into(),
            ],
        ),
        (
            "bsdtar",
            vec!["-xf".into(), archive.into(), "-C".into(), out_dir.into()],
        ),
    ];

    let mut last_err = None;
    for (tool, args) in attempts {
        match run_tool(tool, &args, None, timeout).await {
            Ok(_) => {
                debug!("Extracted '{}' with {}", archive.display(), tool);
                return Ok(tool);
            }
            Err(e) => {
                warn!("{} could not extract '{}': {}", tool, archive.display(), e);
                last_err = Some(e);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| BinderyError::Internal("no extractor attempted".into())))
}

// ── Packers ──────────────────────────────────────────────────────────────

/// Remap a logical 0–9 compression level onto a packer's native scale.
///
/// zip-like and 7z-like packers use 0–9 natively, so the logical level maps
/// through unchanged. rar-like packers use a condensed 0–5 scale; the
/// breakpoints put logical 0,1,3,5,7,9 at native 0,1,2,3,4,5.
pub fn native_level(kind: ContainerKind, logical: u8) -> u8 {
    let logical = logical.min(9);
    match kind {
        ContainerKind::Zip | ContainerKind::SevenZ => logical,
        ContainerKind::Rar | ContainerKind::RarLegacy => match logical {
            0 => 0,
            1..=2 => 1,
            3..=4 => 2,
            5..=6 => 3,
            7..=8 => 4,
            _ => 5,
        },
        // No compression concept for the rest.
        ContainerKind::Tar | ContainerKind::Pdf | ContainerKind::Folder => 0,
    }
}

/// Pack the contents of `pages_dir` into the archive `dest`.
///
/// `logical_level` is the 0–9 scale from the config (already forced to 0 in
/// original mode); the per-kind remap happens here. Only archive kinds are
/// accepted — single-document and folder outputs assemble elsewhere.
pub async fn pack_archive(
    kind: ContainerKind,
    pages_dir: &Path,
    dest: &Path,
    logical_level: u8,
    timeout: Duration,
) -> Result<(), BinderyError> {
    let level = native_level(kind, logical_level);
    match kind {
        ContainerKind::Zip => {
            let args = vec![
                "a".into(),
                "-tzip".into(),
                format!("-mx={level}").into(),
                dest.into(),
                "*".into(),
            ];
            run_tool("7z", &args, Some(pages_dir), timeout).await?;
        }
        ContainerKind::SevenZ => {
            let args = vec![
                "a".into(),
                "-t7z".into(),
                format!("-mx={level}").into(),
                dest.into(),
                "*".into(),
            ];
            run_tool("7z", &args, Some(pages_dir), timeout).await?;
        }
        ContainerKind::Rar | ContainerKind::RarLegacy => {
            let mut args: Vec<OsString> = vec!["a".into(), format!("-m{level}").into()];
            if kind == ContainerKind::RarLegacy {
                args.push("-ma4".into());
            }
            args.push("-ep1".into());
            args.push(dest.into());
            args.push("*".into());
            run_tool("rar", &args, Some(pages_dir), timeout).await?;
        }
        ContainerKind::Tar => {
            // The format has no compression; level is meaningless here.
            let args = vec![
                "-cf".into(),
                dest.into(),
                "-C".into(),
                pages_dir.into(),
                ".".into(),
            ];
            run_tool("bsdtar", &args, None, timeout).await?;
        }
        ContainerKind::Pdf | ContainerKind::Folder => {
            return Err(BinderyError::Internal(format!(
                "pack_archive called for non-archive kind {kind:?}"
            )));
        }
    }
    Ok(())
}

/// Lay the ordered `pages` out into a single document at `dest`, one page
/// per image at native pixel dimensions (no forced page size).
pub async fn build_document(
    pages: &[std::path::PathBuf],
    dest: &Path,
    timeout: Duration,
) -> Result<(), BinderyError> {
    let mut args: Vec<OsString> = vec!["--output".into(), dest.into()];
    args.extend(pages.iter().map(|p| p.into()));
    run_tool("img2pdf", &args, None, timeout).await.map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_count_regex_matches_pdfinfo_output() {
        let out = "Title:          Some Comic\nPages:          42\nEncrypted:      no\n";
        let caps = RE_PAGE_COUNT.captures(out).unwrap();
        assert_eq!(&caps[1], "42");
    }

    #[test]
    fn page_count_regex_ignores_similar_lines() {
        assert!(RE_PAGE_COUNT.captures("Page size: 612 x 792 pts\n").is_none());
    }

    #[test]
    fn zip_levels_map_through_unchanged() {
        for lvl in 0..=9u8 {
            assert_eq!(native_level(ContainerKind::Zip, lvl), lvl);
            assert_eq!(native_level(ContainerKind::SevenZ, lvl), lvl);
        }
    }

    #[test]
    fn rar_levels_follow_documented_breakpoints() {
        let expect = [
            (0u8, 0u8),
            (1, 1),
            (2, 1),
            (3, 2),
            (4, 2),
            (5, 3),
            (6, 3),
            (7, 4),
            (8, 4),
            (9, 5),
        ];
        for (logical, native) in expect {
            assert_eq!(native_level(ContainerKind::Rar, logical), native);
            assert_eq!(native_level(ContainerKind::RarLegacy, logical), native);
        }
    }

    #[test]
    fn levelless_kinds_always_map_to_zero() {
        assert_eq!(native_level(ContainerKind::Tar, 9), 0);
        assert_eq!(native_level(ContainerKind::Folder, 9), 0);
        assert_eq!(native_level(ContainerKind::Pdf, 9), 0);
    }

    #[test]
    fn diagnostics_are_truncated_on_char_boundary() {
        let long = "é".repeat(3000);
        let t = truncate_diag(&long);
        assert!(t.len() <= 2005);
        assert!(t.ends_with('…'));
        assert_eq!(truncate_diag("short  "), "short");
    }

    #[tokio::test]
    async fn missing_binary_reports_tool_unavailable() {
        let err = run_tool(
            "bindery-test-no-such-tool",
            &[],
            None,
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, BinderyError::ToolUnavailable { .. }));
    }
}
