//! Thumbnail generation for the progress stream and the final result.
//!
//! Thumbnails ride the progress channel as base64 data URIs and are never
//! persisted. Two strategies exist:
//!
//! * [`ThumbnailStrategy::Reveal`] — a gray and a color rendition of the
//!   same page, letting the front end animate a gray-to-color reveal while
//!   the task processes.
//! * [`ThumbnailStrategy::Static`] — color only, used in original mode
//!   where the page is delivered untouched anyway.
//!
//! Everything here is best-effort: an undecodable first page simply means
//! no thumbnail, never a failed task.

use crate::config::ConvertConfig;
use crate::progress::ProgressEvent;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageEncoder};
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

/// Longest edge of a generated thumbnail, in pixels.
const THUMB_EDGE: u32 = 240;

/// Which previews a task sends at start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThumbnailStrategy {
    /// Gray + color pair for the animated reveal.
    Reveal,
    /// Color only.
    Static,
}

impl ThumbnailStrategy {
    /// Original mode gets the static preview; everything else the reveal
    /// pair.
    pub fn for_config(config: &ConvertConfig) -> Self {
        if config.is_original() {
            ThumbnailStrategy::Static
        } else {
            ThumbnailStrategy::Reveal
        }
    }
}

/// Build the `thumbnail-init` event for a task's first page, off the async
/// runtime's worker threads.
pub async fn thumbnail_event(page: &Path, strategy: ThumbnailStrategy) -> Option<ProgressEvent> {
    let page = page.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let img = decode_thumb(&page)?;
        let color = data_uri(&img)?;
        let gray = match strategy {
            ThumbnailStrategy::Reveal => {
                data_uri(&DynamicImage::ImageLuma8(img.to_luma8()))
            }
            ThumbnailStrategy::Static => None,
        };
        Some(ProgressEvent::ThumbnailInit { gray, color })
    })
    .await
    .ok()
    .flatten()
}

/// Color-only preview of the final first page, for the task result record.
pub async fn result_thumbnail(page: &Path) -> Option<String> {
    let page = page.to_path_buf();
    tokio::task::spawn_blocking(move || data_uri(&decode_thumb(&page)?))
        .await
        .ok()
        .flatten()
}

fn decode_thumb(page: &Path) -> Option<DynamicImage> {
    match image::open(page) {
        Ok(img) => Some(img.thumbnail(THUMB_EDGE, THUMB_EDGE)),
        Err(e) => {
            debug!("No thumbnail for '{}': {}", page.display(), e);
            None
        }
    }
}

/// JPEG-encode and wrap as a `data:` URI.
fn data_uri(img: &DynamicImage) -> Option<String> {
    let mut buf = Vec::new();
    let encoder = JpegEncoder::new_with_quality(Cursor::new(&mut buf), 75);
    let result = match img {
        DynamicImage::ImageLuma8(gray) => encoder.write_image(
            gray.as_raw(),
            gray.width(),
            gray.height(),
            image::ExtendedColorType::L8,
        ),
        other => {
            let rgb = other.to_rgb8();
            encoder.write_image(
                rgb.as_raw(),
                rgb.width(),
                rgb.height(),
                image::ExtendedColorType::Rgb8,
            )
        }
    };
    if let Err(e) = result {
        debug!("Thumbnail encode failed: {}", e);
        return None;
    }
    Some(format!("data:image/jpeg;base64,{}", STANDARD.encode(&buf)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Density;
    use image::{Rgb, RgbImage};

    fn sample_page(dir: &Path) -> std::path::PathBuf {
        let p = dir.join("page.png");
        DynamicImage::ImageRgb8(RgbImage::from_pixel(600, 400, Rgb([120, 40, 200])))
            .save_with_format(&p, image::ImageFormat::Png)
            .unwrap();
        p
    }

    #[test]
    fn strategy_follows_original_mode() {
        let normal = ConvertConfig::default();
        let original = ConvertConfig::builder()
            .density(Density::Original)
            .build()
            .unwrap();
        assert_eq!(
            ThumbnailStrategy::for_config(&normal),
            ThumbnailStrategy::Reveal
        );
        assert_eq!(
            ThumbnailStrategy::for_config(&original),
            ThumbnailStrategy::Static
        );
    }

    #[tokio::test]
    async fn reveal_strategy_sends_gray_and_color() {
        let tmp = tempfile::tempdir().unwrap();
        let page = sample_page(tmp.path());

        let event = thumbnail_event(&page, ThumbnailStrategy::Reveal)
            .await
            .expect("thumbnail should build");
        match event {
            ProgressEvent::ThumbnailInit { gray, color } => {
                assert!(gray.is_some());
                assert!(color.starts_with("data:image/jpeg;base64,"));
            }
            other => panic!("expected thumbnail-init, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn static_strategy_sends_color_only() {
        let tmp = tempfile::tempdir().unwrap();
        let page = sample_page(tmp.path());

        let event = thumbnail_event(&page, ThumbnailStrategy::Static)
            .await
            .expect("thumbnail should build");
        match event {
            ProgressEvent::ThumbnailInit { gray, .. } => assert!(gray.is_none()),
            other => panic!("expected thumbnail-init, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn undecodable_page_yields_no_event() {
        let tmp = tempfile::tempdir().unwrap();
        let bad = tmp.path().join("bad.jpg");
        std::fs::write(&bad, b"nope").unwrap();
        assert!(thumbnail_event(&bad, ThumbnailStrategy::Reveal)
            .await
            .is_none());
        assert!(result_thumbnail(&bad).await.is_none());
    }

    #[tokio::test]
    async fn thumbnail_is_bounded_by_edge() {
        let tmp = tempfile::tempdir().unwrap();
        let page = sample_page(tmp.path());
        let uri = result_thumbnail(&page).await.unwrap();
        let b64 = uri.strip_prefix("data:image/jpeg;base64,").unwrap();
        let bytes = STANDARD.decode(b64).unwrap();
        let img = image::load_from_memory(&bytes).unwrap();
        assert!(img.width() <= THUMB_EDGE && img.height() <= THUMB_EDGE);
    }
}
