//! Configuration types for batch conversion.
//!
//! All conversion behaviour is controlled through [`ConvertConfig`], built
//! via its [`ConvertConfigBuilder`]. Keeping every knob in one struct makes
//! it trivial to share a config across a whole batch, log it, and diff two
//! runs to understand why their outputs differ.
//!
//! # Design choice: builder over constructor
//! A fifteen-field constructor is unreadable and breaks on every new field.
//! The builder lets callers set only what they care about and rely on
//! documented defaults for the rest.

use crate::error::BinderyError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Configuration for one conversion request (shared by every task in the
/// batch).
///
/// Built via [`ConvertConfig::builder()`] or [`ConvertConfig::default()`].
///
/// # Example
/// ```rust
/// use bindery::{ContainerKind, ConvertConfig, Density};
///
/// let config = ConvertConfig::builder()
///     .density(Density::Dpi(150))
///     .container(ContainerKind::Zip)
///     .level(9)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct ConvertConfig {
    /// Target rendering/resampling density, or [`Density::Original`] for
    /// verbatim passthrough. Default: 150 DPI.
    ///
    /// Original mode extracts embedded pixel data without any recompression,
    /// rendering, or resizing; it also disables color-mode/format/quality
    /// options for document sources and forces store-level packing.
    pub density: Density,

    /// Page color mode. Default: [`ColorMode::Color`].
    pub color: ColorMode,

    /// Output image format for transformed pages. Default: JPEG.
    ///
    /// Inputs with exotic encodings (webp/avif/heic-class) are forced onto
    /// the JPEG output path regardless of this setting so that every packer
    /// downstream can handle the result.
    pub format: PageFormat,

    /// JPEG encode quality, 0–100. Default: 85. Ignored for PNG/TIFF beyond
    /// the basic encode.
    pub jpeg_quality: u8,

    /// Rotation angle in degrees; must be a multiple of 90. Default: 0.
    ///
    /// Rotation is the one transform applied even in original mode, since
    /// the rasterizer cannot perform it during verbatim extraction.
    pub rotation: i32,

    /// Optional maximum pixel width. Pages wider than this are downscaled
    /// preserving aspect ratio; pages narrower are never upscaled.
    pub max_width: Option<u32>,

    /// Double-page spread splitting. Default: off.
    pub split: SplitMode,

    /// Reading direction, controls the order of split halves. Default: ltr.
    pub direction: ReadingDirection,

    /// Optional 1-based inclusive page range, clamped to the source's real
    /// extent during resolution.
    pub range: Option<PageRange>,

    /// Output container kind. Default: zip-like ([`ContainerKind::Zip`]).
    pub container: ContainerKind,

    /// Logical compression level 0–9, remapped to each packer's native
    /// scale. Default: 6. Forced to 0 (store) in original mode.
    pub level: u8,

    /// Sampling interval for the directory-polling progress estimator.
    /// Default: 1 s. Tests inject a shorter interval.
    pub poll_interval: Duration,

    /// Hard timeout for a single external tool invocation. Default: 30 min.
    pub tool_timeout: Duration,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            density: Density::Dpi(150),
            color: ColorMode::Color,
            format: PageFormat::Jpeg,
            jpeg_quality: 85,
            rotation: 0,
            max_width: None,
            split: SplitMode::Off,
            direction: ReadingDirection::Ltr,
            range: None,
            container: ContainerKind::Zip,
            level: 6,
            poll_interval: Duration::from_secs(1),
            tool_timeout: Duration::from_secs(30 * 60),
        }
    }
}

impl ConvertConfig {
    /// Create a new builder for `ConvertConfig`.
    pub fn builder() -> ConvertConfigBuilder {
        ConvertConfigBuilder {
            config: Self::default(),
        }
    }

    /// Whether this request runs in original (no-recompression) mode.
    pub fn is_original(&self) -> bool {
        matches!(self.density, Density::Original)
    }

    /// The compression level actually handed to the packer: the configured
    /// logical level, or 0 (store) when original mode is active.
    pub fn effective_level(&self) -> u8 {
        if self.is_original() {
            0
        } else {
            self.level
        }
    }

    /// Rotation normalised to 0, 90, 180, or 270.
    pub fn normalized_rotation(&self) -> u32 {
        self.rotation.rem_euclid(360) as u32
    }
}

/// Builder for [`ConvertConfig`].
#[derive(Debug)]
pub struct ConvertConfigBuilder {
    config: ConvertConfig,
}

impl ConvertConfigBuilder {
    pub fn density(mut self, d: Density) -> Self {
        self.config.density = d;
        self
    }

    pub fn color(mut self, c: ColorMode) -> Self {
        self.config.color = c;
        self
    }

    pub fn format(mut self, f: PageFormat) -> Self {
        self.config.format = f;
        self
    }

    pub fn jpeg_quality(mut self, q: u8) -> Self {
        self.config.jpeg_quality = q.min(100);
        self
    }

    pub fn rotation(mut self, degrees: i32) -> Self {
        self.config.rotation = degrees;
        self
    }

    pub fn max_width(mut self, px: u32) -> Self {
        self.config.max_width = Some(px.max(1));
        self
    }

    pub fn split(mut self, mode: SplitMode) -> Self {
        self.config.split = mode;
        self
    }

    pub fn direction(mut self, dir: ReadingDirection) -> Self {
        self.config.direction = dir;
        self
    }

    pub fn range(mut self, range: PageRange) -> Self {
        self.config.range = Some(range);
        self
    }

    pub fn container(mut self, kind: ContainerKind) -> Self {
        self.config.container = kind;
        self
    }

    pub fn level(mut self, level: u8) -> Self {
        self.config.level = level.min(9);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn tool_timeout(mut self, timeout: Duration) -> Self {
        self.config.tool_timeout = timeout;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConvertConfig, BinderyError> {
        let c = &self.config;
        if c.rotation % 90 != 0 {
            return Err(BinderyError::InvalidConfig(format!(
                "rotation must be a multiple of 90°, got {}",
                c.rotation
            )));
        }
        if let Density::Dpi(dpi) = c.density {
            if !(36..=1200).contains(&dpi) {
                return Err(BinderyError::InvalidConfig(format!(
                    "DPI must be 36–1200, got {dpi}"
                )));
            }
        }
        if let Some(PageRange { start, end }) = c.range {
            if start == 0 || end < start {
                return Err(BinderyError::InvalidConfig(format!(
                    "page range must be 1-based with start ≤ end, got [{start}, {end}]"
                )));
            }
        }
        if c.poll_interval.is_zero() {
            return Err(BinderyError::InvalidConfig(
                "poll interval must be non-zero".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Target density: render/resample towards a DPI, or pass pixel data
/// through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Density {
    /// Verbatim passthrough: no rendering, resampling, or recompression.
    Original,
    /// Render (documents) or resample (images) towards this DPI.
    Dpi(u32),
}

impl FromStr for Density {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("original") {
            return Ok(Density::Original);
        }
        s.parse::<u32>()
            .map(Density::Dpi)
            .map_err(|_| format!("expected a DPI number or 'original', got '{s}'"))
    }
}

/// Page color mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
    /// Full color (default).
    #[default]
    Color,
    /// 8-bit grayscale.
    Gray,
    /// Black and white.
    Mono,
}

/// Output image format for transformed pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageFormat {
    /// JPEG (default). The only format where `jpeg_quality` applies.
    #[default]
    Jpeg,
    Png,
    Tiff,
}

impl PageFormat {
    /// Canonical file extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            PageFormat::Jpeg => "jpg",
            PageFormat::Png => "png",
            PageFormat::Tiff => "tif",
        }
    }
}

/// Double-page spread splitting mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitMode {
    /// Never split (default).
    #[default]
    Off,
    /// Split any page whose width/height ratio exceeds 1.2 into two
    /// half-width pages.
    Auto,
}

/// Reading direction; decides which half of a split spread comes first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadingDirection {
    /// Left-to-right (default): left half first.
    #[default]
    Ltr,
    /// Right-to-left (manga): right half first.
    Rtl,
}

/// 1-based inclusive page range, clamped to the source's real extent during
/// resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRange {
    pub start: usize,
    pub end: usize,
}

impl PageRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

impl FromStr for PageRange {
    type Err = String;

    /// Parse `"3-7"` or a single page `"5"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |p: &str| {
            p.trim()
                .parse::<usize>()
                .map_err(|_| format!("invalid page number '{p}'"))
        };
        match s.split_once('-') {
            Some((a, b)) => Ok(PageRange::new(parse(a)?, parse(b)?)),
            None => {
                let p = parse(s)?;
                Ok(PageRange::new(p, p))
            }
        }
    }
}

impl fmt::Display for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Output container kind.
///
/// The compressed variants carry the conventional comic-archive extensions.
/// The rar-legacy flavor forces the RAR4 on-disk format for readers that
/// never learned RAR5, but still names its output `.cbr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerKind {
    /// Zip-like archive → `.cbz` (default).
    #[default]
    Zip,
    /// Tar-like archive → `.cbt`. The format has no compression.
    Tar,
    /// 7z-like archive → `.cb7`.
    SevenZ,
    /// Rar-like archive (RAR5) → `.cbr`.
    Rar,
    /// Rar-like archive in the legacy RAR4 format → still `.cbr`.
    RarLegacy,
    /// Single-file document, one image per page at native pixel size → `.pdf`.
    Pdf,
    /// Flat image folder; pages copied verbatim, no packing step.
    Folder,
}

impl ContainerKind {
    /// Output file extension, or `None` for the folder kind.
    pub fn extension(&self) -> Option<&'static str> {
        match self {
            ContainerKind::Zip => Some("cbz"),
            ContainerKind::Tar => Some("cbt"),
            ContainerKind::SevenZ => Some("cb7"),
            ContainerKind::Rar | ContainerKind::RarLegacy => Some("cbr"),
            ContainerKind::Pdf => Some("pdf"),
            ContainerKind::Folder => None,
        }
    }

    /// Whether this kind accepts a compression level at all.
    pub fn supports_levels(&self) -> bool {
        matches!(
            self,
            ContainerKind::Zip | ContainerKind::SevenZ | ContainerKind::Rar | ContainerKind::RarLegacy
        )
    }
}

impl FromStr for ContainerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "zip" | "cbz" => Ok(ContainerKind::Zip),
            "tar" | "cbt" => Ok(ContainerKind::Tar),
            "7z" | "cb7" => Ok(ContainerKind::SevenZ),
            "rar" | "cbr" => Ok(ContainerKind::Rar),
            "rar4" | "rar-legacy" => Ok(ContainerKind::RarLegacy),
            "pdf" => Ok(ContainerKind::Pdf),
            "folder" | "dir" => Ok(ContainerKind::Folder),
            _ => Err(format!("unknown container kind '{s}'")),
        }
    }
}
