//! CLI binary for bindery.
//!
//! A thin shim over the library crate that stages local files/folders into
//! a scratch area, maps CLI flags to `ConvertConfig`, renders the progress
//! stream with indicatif, and prints the batch summary.

use anyhow::{bail, Context, Result};
use bindery::{
    convert_batch, ColorMode, ContainerKind, ConvertConfig, Density, PageFormat, PageRange,
    ProgressEvent, ProgressRegistry, ReadingDirection, SplitMode, UploadItem, WorkAreas,
};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # One comic archive → CBZ at default settings
  bindery issue-01.cbr

  # A PDF, pages 3-7, rendered at 300 DPI, grayscale
  bindery --pages 3-7 --dpi 300 --color gray book.pdf

  # Original mode: extract embedded pages verbatim, no recompression
  bindery --dpi original scans.pdf

  # A folder of images → one CB7, manga reading order with spread splitting
  bindery --container cb7 --split auto --direction rtl ./chapter1

  # Everything at once; outputs land in ./converted
  bindery -o ./converted vol1.pdf vol2.cbz ./extras

  # Machine-readable summary
  bindery --json issue-01.cbz > result.json

EXTERNAL TOOLS:
  pdftoppm / pdfimages / pdfinfo   poppler-utils, for PDF inputs
  7z, unar, bsdtar                 archive extraction (fallback chain)
  7z / rar / bsdtar / img2pdf      packing, per container kind
"#;

/// Convert documents, comic archives, and image sets into paginated containers.
#[derive(Parser, Debug)]
#[command(
    name = "bindery",
    version,
    about = "Convert documents, comic archives, and image sets into paginated containers",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Input files and/or image folders.
    inputs: Vec<PathBuf>,

    /// Output directory for the converted artifacts.
    #[arg(short, long, env = "BINDERY_OUTPUT", default_value = "output")]
    output: PathBuf,

    /// Container kind: zip|cbz, tar|cbt, 7z|cb7, rar|cbr, rar4, pdf, folder.
    #[arg(short = 't', long, env = "BINDERY_CONTAINER", default_value = "zip")]
    container: String,

    /// Logical compression level 0-9 (remapped per container kind).
    #[arg(short, long, env = "BINDERY_LEVEL", default_value_t = 6,
          value_parser = clap::value_parser!(u8).range(0..=9))]
    level: u8,

    /// Target density in DPI, or 'original' for verbatim passthrough.
    #[arg(long, env = "BINDERY_DPI", default_value = "150")]
    dpi: String,

    /// Color mode: color, gray, mono.
    #[arg(long, env = "BINDERY_COLOR", value_enum, default_value = "color")]
    color: ColorArg,

    /// Output page format: jpeg, png, tiff.
    #[arg(long, env = "BINDERY_FORMAT", value_enum, default_value = "jpeg")]
    format: FormatArg,

    /// JPEG quality (0-100).
    #[arg(short, long, env = "BINDERY_QUALITY", default_value_t = 85,
          value_parser = clap::value_parser!(u8).range(0..=100))]
    quality: u8,

    /// Rotation in degrees, multiple of 90.
    #[arg(short, long, env = "BINDERY_ROTATE", default_value_t = 0, allow_negative_numbers = true)]
    rotate: i32,

    /// Maximum page width in pixels (downscale only).
    #[arg(long, env = "BINDERY_MAX_WIDTH")]
    max_width: Option<u32>,

    /// Double-page spread splitting: off, auto.
    #[arg(long, env = "BINDERY_SPLIT", value_enum, default_value = "off")]
    split: SplitArg,

    /// Reading direction for split ordering: ltr, rtl.
    #[arg(long, env = "BINDERY_DIRECTION", value_enum, default_value = "ltr")]
    direction: DirectionArg,

    /// Page range, 1-based inclusive: "3-7" or a single page "5".
    #[arg(short, long, env = "BINDERY_PAGES")]
    pages: Option<String>,

    /// Print the batch summary as JSON instead of the human report.
    #[arg(long, env = "BINDERY_JSON")]
    json: bool,

    /// Disable the progress bar.
    #[arg(long, env = "BINDERY_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "BINDERY_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(long, env = "BINDERY_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ColorArg {
    Color,
    Gray,
    Mono,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Jpeg,
    Png,
    Tiff,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum SplitArg {
    Off,
    Auto,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum DirectionArg {
    Ltr,
    Rtl,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar is the user-facing feedback; keep library logs at
    // error level unless explicitly asked for more.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Map flags to config ──────────────────────────────────────────────
    let density: Density = cli
        .dpi
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))
        .context("--dpi")?;

    let container: ContainerKind = cli
        .container
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))
        .context("--container")?;

    let mut builder = ConvertConfig::builder()
        .density(density)
        .container(container)
        .level(cli.level)
        .color(match cli.color {
            ColorArg::Color => ColorMode::Color,
            ColorArg::Gray => ColorMode::Gray,
            ColorArg::Mono => ColorMode::Mono,
        })
        .format(match cli.format {
            FormatArg::Jpeg => PageFormat::Jpeg,
            FormatArg::Png => PageFormat::Png,
            FormatArg::Tiff => PageFormat::Tiff,
        })
        .jpeg_quality(cli.quality)
        .rotation(cli.rotate)
        .split(match cli.split {
            SplitArg::Off => SplitMode::Off,
            SplitArg::Auto => SplitMode::Auto,
        })
        .direction(match cli.direction {
            DirectionArg::Ltr => ReadingDirection::Ltr,
            DirectionArg::Rtl => ReadingDirection::Rtl,
        });
    if let Some(px) = cli.max_width {
        builder = builder.max_width(px);
    }
    if let Some(ref spec) = cli.pages {
        let range: PageRange = spec
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))
            .context("--pages")?;
        builder = builder.range(range);
    }
    let config = builder.build().context("Invalid configuration")?;

    // ── Stage inputs ─────────────────────────────────────────────────────
    // The library consumes staged uploads (they are removed when a task
    // finishes), so the CLI copies the user's files rather than moving
    // them.
    let scratch = tempfile::tempdir().context("Failed to create scratch area")?;
    let areas = WorkAreas {
        staging: scratch.path().join("staging"),
        work: scratch.path().join("work"),
        output: cli.output.clone(),
    };
    std::fs::create_dir_all(&areas.staging).context("Failed to create staging area")?;

    let items = stage_inputs(&cli.inputs, &areas.staging)?;
    if items.is_empty() {
        bail!("No inputs given");
    }

    // ── Progress stream ──────────────────────────────────────────────────
    let registry = Arc::new(ProgressRegistry::new());
    let request_id = "cli";
    let display = if show_progress {
        Some(tokio::spawn(render_progress(registry.subscribe(request_id))))
    } else {
        None
    };

    // ── Convert ──────────────────────────────────────────────────────────
    let summary = convert_batch(items, &config, &areas, &registry, request_id).await;

    registry.unsubscribe(request_id);
    if let Some(handle) = display {
        let _ = handle.await;
    }

    // ── Report ───────────────────────────────────────────────────────────
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to serialize summary")?
        );
    } else if !cli.quiet {
        for result in &summary.results {
            println!(
                "{} {}  {}",
                green("✓"),
                bold(&result.name),
                dim(&format!(
                    "{} pages, {}",
                    result.pages,
                    human_bytes(result.bytes)
                )),
            );
        }
        for failure in &summary.failures {
            println!("{} {}  {}", red("✗"), bold(&failure.name), red(&failure.reason));
        }
        if let Some(ref err) = summary.batch_error {
            println!("{} {}", red("✘"), red(err));
        }
        println!(
            "{} task(s), {} pages, {} total → {}",
            summary.tasks,
            summary.total_pages,
            human_bytes(summary.total_bytes),
            cli.output.display()
        );
    }

    if summary.batch_error.is_some() || summary.results.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}

/// Copy the user's files into the staging area, preserving one folder level
/// so directory inputs classify as merge groups.
fn stage_inputs(inputs: &[PathBuf], staging: &std::path::Path) -> Result<Vec<UploadItem>> {
    let mut items = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let folder = input
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "folder".to_string());
            let mut entries: Vec<PathBuf> = std::fs::read_dir(input)
                .with_context(|| format!("Cannot read folder '{}'", input.display()))?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_file())
                .collect();
            entries.sort();
            for entry in entries {
                let name = entry
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let staged = staging.join(format!("{folder}__{name}"));
                std::fs::copy(&entry, &staged)
                    .with_context(|| format!("Cannot stage '{}'", entry.display()))?;
                items.push(UploadItem::new(format!("{folder}/{name}"), staged));
            }
        } else {
            if !input.is_file() {
                bail!("Input not found: '{}'", input.display());
            }
            let name = input
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let staged = staging.join(&name);
            std::fs::copy(input, &staged)
                .with_context(|| format!("Cannot stage '{}'", input.display()))?;
            items.push(UploadItem::new(name, staged));
        }
    }
    Ok(items)
}

/// Drive an indicatif bar from the library's progress stream.
async fn render_progress(
    mut rx: tokio::sync::mpsc::UnboundedReceiver<ProgressEvent>,
) {
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}%  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
    );
    bar.set_prefix("Converting");
    bar.enable_steady_tick(Duration::from_millis(80));

    while let Some(event) = rx.recv().await {
        match event {
            ProgressEvent::Log { message } => bar.println(format!("  {}", dim(&message))),
            ProgressEvent::Progress {
                task_index,
                task_total,
                percent,
                status,
                file,
                ..
            } => {
                bar.set_position(percent as u64);
                let suffix = file.map(|f| format!("  {}", dim(&f))).unwrap_or_default();
                bar.set_message(format!("[{task_index}/{task_total}] {status}{suffix}"));
            }
            // Thumbnails are for push-stream UIs; nothing to show in a
            // terminal.
            ProgressEvent::ThumbnailInit { .. } => {}
        }
    }
    bar.finish_and_clear();
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
