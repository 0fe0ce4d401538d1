//! Per-page transform chain: rotate, resize, color-reduce, re-encode,
//! double-page split.
//!
//! Applied uniformly whether a page came from rendering, extraction, or a
//! plain upload. Pages are processed strictly one at a time — decoded
//! bitmaps are large, and sequential processing keeps peak memory at one
//! page. Each page's CPU-bound work runs under `spawn_blocking` so the
//! runtime's worker threads never stall on a decode.
//!
//! ## Degradation ladder
//!
//! A step that fails for one page (unreadable density metadata, say) is
//! skipped for that page. A page whose transform fails outright (undecodable
//! image) is carried forward as a verbatim copy. Neither ever fails the
//! task; only a filesystem error on the copy fallback does.
//!
//! ## Original mode
//!
//! Original mode means no recompression, so the chain is skipped entirely —
//! except rotation, which the rasterizer cannot do during verbatim
//! extraction and therefore must happen here.

use crate::config::{ColorMode, ConvertConfig, Density, PageFormat, ReadingDirection, SplitMode};
use crate::error::{BinderyError, PageError};
use crate::pipeline::PipelineCtx;
use crate::progress::{percent, ProgressEvent};
use crate::task;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageEncoder};
use std::io::{BufWriter, Cursor};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Width/height ratio above which a page counts as a double-page spread.
const SPREAD_RATIO: f32 = 1.2;

/// Relative density mismatch below which resampling is skipped.
const DENSITY_TOLERANCE: f64 = 0.02;

/// Run the transform chain over `pages` in order, writing results into
/// `out_dir`.
///
/// Returns the produced files in final page order; splitting can make the
/// output longer than the input. The only fatal outcome is an I/O failure
/// while writing — every per-page transform problem degrades instead.
pub async fn transform_pages(
    pages: &[PathBuf],
    out_dir: &Path,
    config: &ConvertConfig,
    ctx: &PipelineCtx,
) -> Result<Vec<PathBuf>, BinderyError> {
    let total = pages.len();
    let mut outputs = Vec::with_capacity(total);

    for (i, src) in pages.iter().enumerate() {
        let page_num = i + 1;
        ctx.sink.emit(ProgressEvent::Progress {
            task_index: ctx.task_index,
            task_total: ctx.task_total,
            page_current: Some(page_num),
            page_total: Some(total),
            percent: percent(i, total),
            status: "Transforming pages…".to_string(),
            file: src
                .file_name()
                .map(|n| n.to_string_lossy().into_owned()),
        });

        let src = src.clone();
        let out = out_dir.to_path_buf();
        let cfg = config.clone();
        let produced =
            tokio::task::spawn_blocking(move || transform_page(&src, &out, page_num, &cfg))
                .await
                .map_err(|e| BinderyError::Internal(format!("transform task panicked: {e}")))??;
        outputs.extend(produced);
    }

    Ok(outputs)
}

/// Transform one page; returns one output file, or two after a split.
fn transform_page(
    src: &Path,
    out_dir: &Path,
    page_num: usize,
    config: &ConvertConfig,
) -> Result<Vec<PathBuf>, BinderyError> {
    if config.is_original() {
        return original_page(src, out_dir, page_num, config);
    }

    match full_chain(src, out_dir, page_num, config) {
        Ok(outs) => Ok(outs),
        Err(e) => {
            warn!("{e}; keeping page {page_num} verbatim");
            Ok(vec![copy_verbatim(src, out_dir, page_num)?])
        }
    }
}

/// Original mode: verbatim copy, with rotation as the single exception.
fn original_page(
    src: &Path,
    out_dir: &Path,
    page_num: usize,
    config: &ConvertConfig,
) -> Result<Vec<PathBuf>, BinderyError> {
    let rotation = config.normalized_rotation();
    if rotation == 0 {
        return Ok(vec![copy_verbatim(src, out_dir, page_num)?]);
    }

    let rotated = (|| -> Result<PathBuf, String> {
        let img = image::open(src).map_err(|e| e.to_string())?;
        let img = apply_rotation(img, rotation);
        // Rotation forces a re-encode; lossless sources stay lossless,
        // everything else goes through JPEG at near-transparent quality.
        let format = preserved_format(src).unwrap_or(PageFormat::Jpeg);
        let dest = out_dir.join(page_name(page_num, None, format.extension()));
        encode_page(&img, format, 95, None, &dest)?;
        Ok(dest)
    })();

    match rotated {
        Ok(dest) => Ok(vec![dest]),
        Err(e) => {
            warn!("page {page_num}: rotation failed ({e}); keeping verbatim");
            Ok(vec![copy_verbatim(src, out_dir, page_num)?])
        }
    }
}

/// The full chain: decode → rotate → resize → color → (split) → encode.
fn full_chain(
    src: &Path,
    out_dir: &Path,
    page_num: usize,
    config: &ConvertConfig,
) -> Result<Vec<PathBuf>, PageError> {
    let img = image::open(src).map_err(|e| PageError::DecodeFailed {
        page: page_num,
        detail: e.to_string(),
    })?;

    let img = apply_rotation(img, config.normalized_rotation());
    let (img, density_tag) = apply_resize(img, src, config);
    let img = apply_color(img, config.color);

    let format = output_format_for(src, config);
    let ext = format.extension();

    let halves = split_if_spread(img, config);
    let mut outs = Vec::with_capacity(halves.len());
    let suffixes: &[Option<char>] = if halves.len() == 2 {
        &[Some('a'), Some('b')]
    } else {
        &[None]
    };
    for (half, suffix) in halves.iter().zip(suffixes) {
        let dest = out_dir.join(page_name(page_num, *suffix, ext));
        encode_page(half, format, config.jpeg_quality, density_tag, &dest).map_err(|e| {
            PageError::EncodeFailed {
                page: page_num,
                detail: e,
            }
        })?;
        outs.push(dest);
    }
    Ok(outs)
}

// ── Chain steps ──────────────────────────────────────────────────────────

fn apply_rotation(img: DynamicImage, degrees: u32) -> DynamicImage {
    match degrees {
        90 => img.rotate90(),
        180 => img.rotate180(),
        270 => img.rotate270(),
        _ => img,
    }
}

/// Resize step. A page wider than the max width is downscaled to it (never
/// upscaled); otherwise a density mismatch beyond tolerance triggers a
/// proportional resample. Returns the density to tag the output with, when
/// the page was resampled to match a target DPI.
fn apply_resize(
    img: DynamicImage,
    src: &Path,
    config: &ConvertConfig,
) -> (DynamicImage, Option<u32>) {
    if let Some(max_w) = config.max_width {
        if img.width() > max_w {
            let h = ((img.height() as u64 * max_w as u64) / img.width() as u64).max(1) as u32;
            return (img.resize_exact(max_w, h, FilterType::Lanczos3), None);
        }
    }

    if let Density::Dpi(target) = config.density {
        // Unknown source density → the step is skipped for this page.
        let Some(src_dpi) = sniff_density(src) else {
            return (img, None);
        };
        let relative = (src_dpi as f64 - target as f64).abs() / target as f64;
        if relative > DENSITY_TOLERANCE {
            let scale = target as f64 / src_dpi as f64;
            let w = ((img.width() as f64 * scale).round() as u32).max(1);
            let h = ((img.height() as f64 * scale).round() as u32).max(1);
            debug!(
                "Resampling {}dpi → {}dpi ({}x{} → {w}x{h})",
                src_dpi,
                target,
                img.width(),
                img.height()
            );
            return (img.resize_exact(w, h, FilterType::Lanczos3), Some(target));
        }
    }
    (img, None)
}

fn apply_color(img: DynamicImage, mode: ColorMode) -> DynamicImage {
    match mode {
        ColorMode::Color => img,
        ColorMode::Gray => DynamicImage::ImageLuma8(img.to_luma8()),
        ColorMode::Mono => {
            let mut gray = img.to_luma8();
            for px in gray.pixels_mut() {
                px.0[0] = if px.0[0] < 128 { 0 } else { 255 };
            }
            DynamicImage::ImageLuma8(gray)
        }
    }
}

/// Split a double-page spread into its two halves, ordered by reading
/// direction. Pages at or below the spread ratio pass through untouched.
fn split_if_spread(img: DynamicImage, config: &ConvertConfig) -> Vec<DynamicImage> {
    if config.split != SplitMode::Auto {
        return vec![img];
    }
    let (w, h) = (img.width(), img.height());
    if h == 0 || (w as f32 / h as f32) <= SPREAD_RATIO {
        return vec![img];
    }

    let half = w / 2;
    let left = img.crop_imm(0, 0, half, h);
    let right = img.crop_imm(half, 0, w - half, h);
    match config.direction {
        ReadingDirection::Ltr => vec![left, right],
        ReadingDirection::Rtl => vec![right, left],
    }
}

/// Output format for a page: the configured one, except exotic source
/// encodings which are always forced onto the JPEG path so every packer
/// downstream can read the result.
fn output_format_for(src: &Path, config: &ConvertConfig) -> PageFormat {
    if task::is_exotic_image(src) {
        PageFormat::Jpeg
    } else {
        config.format
    }
}

/// Source formats that can be re-encoded losslessly after a rotation.
fn preserved_format(src: &Path) -> Option<PageFormat> {
    match src
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => Some(PageFormat::Png),
        Some("tif" | "tiff") => Some(PageFormat::Tiff),
        Some("jpg" | "jpeg") => Some(PageFormat::Jpeg),
        _ => None,
    }
}

fn page_name(page_num: usize, suffix: Option<char>, ext: &str) -> String {
    match suffix {
        Some(c) => format!("{page_num:05}{c}.{ext}"),
        None => format!("{page_num:05}.{ext}"),
    }
}

fn copy_verbatim(src: &Path, out_dir: &Path, page_num: usize) -> Result<PathBuf, BinderyError> {
    let ext = src
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_else(|| "jpg".to_string());
    let dest = out_dir.join(page_name(page_num, None, &ext));
    std::fs::copy(src, &dest).map_err(|e| BinderyError::io(src, e))?;
    Ok(dest)
}

/// Encode `img` to `dest`, tagging JPEG output with `density` when given.
fn encode_page(
    img: &DynamicImage,
    format: PageFormat,
    quality: u8,
    density: Option<u32>,
    dest: &Path,
) -> Result<(), String> {
    match format {
        PageFormat::Jpeg => {
            let mut buf = Vec::new();
            let encoder = JpegEncoder::new_with_quality(Cursor::new(&mut buf), quality);
            // JPEG has no alpha; reduce before encoding.
            match img {
                DynamicImage::ImageLuma8(gray) => encoder
                    .write_image(
                        gray.as_raw(),
                        gray.width(),
                        gray.height(),
                        image::ExtendedColorType::L8,
                    )
                    .map_err(|e| e.to_string())?,
                other => {
                    let rgb = other.to_rgb8();
                    encoder
                        .write_image(
                            rgb.as_raw(),
                            rgb.width(),
                            rgb.height(),
                            image::ExtendedColorType::Rgb8,
                        )
                        .map_err(|e| e.to_string())?
                }
            }
            if let Some(dpi) = density {
                tag_jpeg_density(&mut buf, dpi);
            }
            std::fs::write(dest, buf).map_err(|e| e.to_string())
        }
        PageFormat::Png | PageFormat::Tiff => {
            let file = std::fs::File::create(dest).map_err(|e| e.to_string())?;
            let mut writer = BufWriter::new(file);
            let image_format = match format {
                PageFormat::Png => image::ImageFormat::Png,
                _ => image::ImageFormat::Tiff,
            };
            img.write_to(&mut writer, image_format)
                .map_err(|e| e.to_string())
        }
    }
}

// ── Pixel density (the `image` crate does not surface DPI) ───────────────

/// Read the source's pixel density from its header: JFIF APP0 for JPEG,
/// pHYs for PNG. `None` for everything else — the caller skips the
/// density-resample step.
pub(crate) fn sniff_density(path: &Path) -> Option<u32> {
    let data = read_prefix(path, 64 * 1024)?;
    jpeg_density(&data).or_else(|| png_density(&data))
}

fn read_prefix(path: &Path, limit: usize) -> Option<Vec<u8>> {
    use std::io::Read;
    let mut f = std::fs::File::open(path).ok()?;
    let mut buf = vec![0u8; limit];
    let mut filled = 0;
    loop {
        match f.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(_) => return None,
        }
        if filled == buf.len() {
            break;
        }
    }
    buf.truncate(filled);
    Some(buf)
}

fn jpeg_density(data: &[u8]) -> Option<u32> {
    if data.len() < 4 || data[0] != 0xFF || data[1] != 0xD8 {
        return None;
    }
    let mut i = 2;
    while i + 4 <= data.len() {
        if data[i] != 0xFF {
            return None;
        }
        let marker = data[i + 1];
        // Start of scan: no more header segments.
        if marker == 0xDA {
            return None;
        }
        let len = u16::from_be_bytes([data[i + 2], data[i + 3]]) as usize;
        if marker == 0xE0
            && len >= 16
            && i + 2 + len <= data.len()
            && data.get(i + 4..i + 9) == Some(&b"JFIF\0"[..])
        {
            let units = data[i + 11];
            let xd = u16::from_be_bytes([data[i + 12], data[i + 13]]) as u32;
            return match units {
                1 => Some(xd),
                2 => Some(((xd as f64) * 2.54).round() as u32),
                _ => None,
            }
            .filter(|&d| d > 0);
        }
        i += 2 + len;
    }
    None
}

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

fn png_density(data: &[u8]) -> Option<u32> {
    if !data.starts_with(&PNG_SIGNATURE) {
        return None;
    }
    let mut i = PNG_SIGNATURE.len();
    while i + 8 <= data.len() {
        let len = u32::from_be_bytes([data[i], data[i + 1], data[i + 2], data[i + 3]]) as usize;
        let ctype = &data[i + 4..i + 8];
        if ctype == b"pHYs" && i + 17 <= data.len() {
            let ppm = u32::from_be_bytes([data[i + 8], data[i + 9], data[i + 10], data[i + 11]]);
            let unit = data[i + 16];
            // Unit 1 = pixels per metre; anything else is aspect-only.
            return (unit == 1 && ppm > 0).then(|| ((ppm as f64) * 0.0254).round() as u32);
        }
        if ctype == b"IDAT" {
            return None;
        }
        i += 12 + len;
    }
    None
}

/// Patch (or insert) the JFIF APP0 density fields of an encoded JPEG.
/// Best-effort: bytes that do not look like a JPEG are left alone.
fn tag_jpeg_density(buf: &mut Vec<u8>, dpi: u32) {
    if buf.len() < 4 || buf[0] != 0xFF || buf[1] != 0xD8 {
        return;
    }
    let dpi = dpi.min(u16::MAX as u32) as u16;
    if buf.len() >= 18 && buf[2] == 0xFF && buf[3] == 0xE0 && &buf[6..11] == b"JFIF\0" {
        buf[13] = 1; // dots per inch
        buf[14..16].copy_from_slice(&dpi.to_be_bytes());
        buf[16..18].copy_from_slice(&dpi.to_be_bytes());
    } else {
        let mut seg = Vec::with_capacity(18);
        seg.extend_from_slice(&[0xFF, 0xE0, 0x00, 0x10]);
        seg.extend_from_slice(b"JFIF\0");
        seg.extend_from_slice(&[0x01, 0x02, 0x01]);
        seg.extend_from_slice(&dpi.to_be_bytes());
        seg.extend_from_slice(&dpi.to_be_bytes());
        seg.extend_from_slice(&[0x00, 0x00]);
        buf.splice(2..2, seg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConvertConfig;
    use image::{Rgb, RgbImage};

    fn write_png(path: &Path, img: &RgbImage) {
        DynamicImage::ImageRgb8(img.clone())
            .save_with_format(path, image::ImageFormat::Png)
            .unwrap();
    }

    fn flat(w: u32, h: u32, rgb: [u8; 3]) -> RgbImage {
        RgbImage::from_pixel(w, h, Rgb(rgb))
    }

    /// Left half black, right half white.
    fn spread(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, _| {
            if x < w / 2 {
                Rgb([0, 0, 0])
            } else {
                Rgb([255, 255, 255])
            }
        })
    }

    #[test]
    fn wide_page_splits_rtl_right_half_first() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("spread.png");
        write_png(&src, &spread(120, 50)); // ratio 2.4

        let config = ConvertConfig::builder()
            .split(SplitMode::Auto)
            .direction(ReadingDirection::Rtl)
            .format(PageFormat::Png)
            .build()
            .unwrap();

        let outs = transform_page(&src, tmp.path(), 1, &config).unwrap();
        assert_eq!(outs.len(), 2);

        // Right (white) half must come first in rtl.
        let first = image::open(&outs[0]).unwrap().to_rgb8();
        let second = image::open(&outs[1]).unwrap().to_rgb8();
        assert_eq!(first.get_pixel(30, 25).0, [255, 255, 255]);
        assert_eq!(second.get_pixel(30, 25).0, [0, 0, 0]);
        assert_eq!(first.width(), 60);
    }

    #[test]
    fn ltr_split_keeps_left_half_first() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("spread.png");
        write_png(&src, &spread(120, 50));

        let config = ConvertConfig::builder()
            .split(SplitMode::Auto)
            .format(PageFormat::Png)
            .build()
            .unwrap();

        let outs = transform_page(&src, tmp.path(), 1, &config).unwrap();
        let first = image::open(&outs[0]).unwrap().to_rgb8();
        assert_eq!(first.get_pixel(30, 25).0, [0, 0, 0]);
    }

    #[test]
    fn near_square_page_is_not_split() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("page.png");
        write_png(&src, &flat(100, 90, [10, 10, 10])); // ratio ≈ 1.11

        let config = ConvertConfig::builder()
            .split(SplitMode::Auto)
            .format(PageFormat::Png)
            .build()
            .unwrap();

        let outs = transform_page(&src, tmp.path(), 1, &config).unwrap();
        assert_eq!(outs.len(), 1);
    }

    #[test]
    fn ratio_exactly_at_threshold_is_not_split() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("page.png");
        write_png(&src, &flat(120, 100, [0, 0, 0])); // ratio exactly 1.2

        let config = ConvertConfig::builder()
            .split(SplitMode::Auto)
            .format(PageFormat::Png)
            .build()
            .unwrap();

        assert_eq!(transform_page(&src, tmp.path(), 1, &config).unwrap().len(), 1);
    }

    #[test]
    fn rotation_swaps_dimensions() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("page.png");
        write_png(&src, &flat(80, 40, [5, 5, 5]));

        let config = ConvertConfig::builder()
            .rotation(90)
            .format(PageFormat::Png)
            .build()
            .unwrap();

        let outs = transform_page(&src, tmp.path(), 1, &config).unwrap();
        let img = image::open(&outs[0]).unwrap();
        assert_eq!((img.width(), img.height()), (40, 80));
    }

    #[test]
    fn max_width_downscales_but_never_upscales() {
        let tmp = tempfile::tempdir().unwrap();
        let wide = tmp.path().join("wide.png");
        let narrow = tmp.path().join("narrow.png");
        write_png(&wide, &flat(400, 200, [0, 0, 0]));
        write_png(&narrow, &flat(100, 50, [0, 0, 0]));

        let config = ConvertConfig::builder()
            .max_width(200)
            .format(PageFormat::Png)
            .build()
            .unwrap();

        let out = transform_page(&wide, tmp.path(), 1, &config).unwrap();
        let img = image::open(&out[0]).unwrap();
        assert_eq!((img.width(), img.height()), (200, 100));

        let out = transform_page(&narrow, tmp.path(), 2, &config).unwrap();
        let img = image::open(&out[0]).unwrap();
        assert_eq!((img.width(), img.height()), (100, 50));
    }

    #[test]
    fn grayscale_reduction_applies() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("page.png");
        write_png(&src, &flat(10, 10, [200, 30, 90]));

        let config = ConvertConfig::builder()
            .color(ColorMode::Gray)
            .format(PageFormat::Png)
            .build()
            .unwrap();

        let outs = transform_page(&src, tmp.path(), 1, &config).unwrap();
        assert!(matches!(
            image::open(&outs[0]).unwrap().color(),
            image::ColorType::L8
        ));
    }

    #[test]
    fn mono_output_is_pure_black_and_white() {
        let mid = DynamicImage::ImageRgb8(flat(4, 4, [100, 100, 100]));
        let mono = apply_color(mid, ColorMode::Mono);
        let gray = mono.to_luma8();
        for px in gray.pixels() {
            assert!(px.0[0] == 0 || px.0[0] == 255);
        }
    }

    #[test]
    fn undecodable_page_falls_back_to_verbatim_copy() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("broken.jpg");
        std::fs::write(&src, b"this is not a jpeg at all").unwrap();

        let config = ConvertConfig::default();
        let outs = transform_page(&src, tmp.path(), 3, &config).unwrap();
        assert_eq!(outs.len(), 1);
        assert_eq!(
            std::fs::read(&outs[0]).unwrap(),
            b"this is not a jpeg at all"
        );
    }

    #[test]
    fn original_mode_copies_untouched() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("page.png");
        write_png(&src, &flat(30, 30, [1, 2, 3]));
        let original_bytes = std::fs::read(&src).unwrap();

        let config = ConvertConfig::builder()
            .density(Density::Original)
            .color(ColorMode::Gray) // must be ignored
            .build()
            .unwrap();

        let outs = transform_page(&src, tmp.path(), 1, &config).unwrap();
        assert_eq!(std::fs::read(&outs[0]).unwrap(), original_bytes);
    }

    #[test]
    fn original_mode_still_rotates() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("page.png");
        write_png(&src, &flat(60, 20, [9, 9, 9]));

        let config = ConvertConfig::builder()
            .density(Density::Original)
            .rotation(90)
            .build()
            .unwrap();

        let outs = transform_page(&src, tmp.path(), 1, &config).unwrap();
        let img = image::open(&outs[0]).unwrap();
        assert_eq!((img.width(), img.height()), (20, 60));
    }

    #[test]
    fn exotic_sources_force_the_jpeg_path() {
        let config = ConvertConfig::builder()
            .format(PageFormat::Png)
            .build()
            .unwrap();
        assert_eq!(
            output_format_for(Path::new("x.webp"), &config),
            PageFormat::Jpeg
        );
        assert_eq!(
            output_format_for(Path::new("x.png"), &config),
            PageFormat::Png
        );
    }

    #[test]
    fn jpeg_density_roundtrip_through_tagging() {
        let img = DynamicImage::ImageRgb8(flat(8, 8, [50, 60, 70]));
        let mut buf = Vec::new();
        JpegEncoder::new_with_quality(Cursor::new(&mut buf), 90)
            .write_image(
                img.to_rgb8().as_raw(),
                8,
                8,
                image::ExtendedColorType::Rgb8,
            )
            .unwrap();

        tag_jpeg_density(&mut buf, 150);
        assert_eq!(jpeg_density(&buf), Some(150));
    }

    #[test]
    fn png_phys_chunk_is_parsed_as_dpi() {
        // Minimal PNG prefix: signature + a pHYs chunk at 5906 px/m ≈ 150 dpi.
        let mut data = PNG_SIGNATURE.to_vec();
        data.extend_from_slice(&9u32.to_be_bytes());
        data.extend_from_slice(b"pHYs");
        data.extend_from_slice(&5906u32.to_be_bytes());
        data.extend_from_slice(&5906u32.to_be_bytes());
        data.push(1);
        data.extend_from_slice(&[0, 0, 0, 0]); // crc (unchecked)
        assert_eq!(png_density(&data), Some(150));
    }

    #[test]
    fn density_sniff_returns_none_for_garbage() {
        let tmp = tempfile::tempdir().unwrap();
        let p = tmp.path().join("x.jpg");
        std::fs::write(&p, b"garbage").unwrap();
        assert_eq!(sniff_density(&p), None);
    }

    #[test]
    fn density_resample_halves_a_300dpi_page_at_150dpi_target() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("page.jpg");

        // Encode a 200x100 JPEG tagged as 300 dpi.
        let img = flat(200, 100, [80, 80, 80]);
        let mut buf = Vec::new();
        JpegEncoder::new_with_quality(Cursor::new(&mut buf), 90)
            .write_image(img.as_raw(), 200, 100, image::ExtendedColorType::Rgb8)
            .unwrap();
        tag_jpeg_density(&mut buf, 300);
        std::fs::write(&src, buf).unwrap();

        let config = ConvertConfig::builder()
            .density(Density::Dpi(150))
            .build()
            .unwrap();
        let outs = transform_page(&src, tmp.path(), 1, &config).unwrap();
        let out = image::open(&outs[0]).unwrap();
        assert_eq!((out.width(), out.height()), (100, 50));
        // Output carries the target density.
        assert_eq!(sniff_density(&outs[0]), Some(150));
    }

    #[test]
    fn matching_density_within_tolerance_skips_resample() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("page.jpg");

        let img = flat(100, 100, [80, 80, 80]);
        let mut buf = Vec::new();
        JpegEncoder::new_with_quality(Cursor::new(&mut buf), 90)
            .write_image(img.as_raw(), 100, 100, image::ExtendedColorType::Rgb8)
            .unwrap();
        tag_jpeg_density(&mut buf, 151); // < 2% off target
        std::fs::write(&src, buf).unwrap();

        let config = ConvertConfig::builder()
            .density(Density::Dpi(150))
            .build()
            .unwrap();
        let outs = transform_page(&src, tmp.path(), 1, &config).unwrap();
        let out = image::open(&outs[0]).unwrap();
        assert_eq!((out.width(), out.height()), (100, 100));
    }
}
