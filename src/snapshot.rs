//! Flattens the current frame and detections into one image at the
//! stream's native resolution.

use crate::config::ensure_parent_dir;
use crate::error::SnapshotError;
use crate::mapper::native_viewport;
use crate::media::{MediaElement, NativeFrame};
use crate::model::Detection;
use crate::overlay::OverlayRenderer;
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use clap::ValueEnum;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, RgbaImage};
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

const JPEG_QUALITY: u8 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum SnapshotFormat {
    #[default]
    Jpeg,
    Png,
}

impl SnapshotFormat {
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub filename: String,
    pub width: u32,
    pub height: u32,
    pub bytes: Vec<u8>,
}

/// `snapshot-{stream}-{timestamp}.{ext}` with spaces in the stream name and
/// `:`/`.` in the ISO-8601 timestamp replaced by dashes.
#[must_use]
pub fn snapshot_filename(stream: &str, at: DateTime<Utc>, format: SnapshotFormat) -> String {
    let stream = stream.replace(' ', "-");
    let stamp = at
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-");
    format!("snapshot-{stream}-{stamp}.{}", format.extension())
}

/// Draws `frame` at (0,0) and re-draws `detections` on top with the native
/// mapper. The display overlay is never reused here: its letterbox offsets
/// would shift every box.
pub fn compose(
    stream: &str,
    frame: &NativeFrame,
    detections: &[Detection],
    renderer: &OverlayRenderer,
) -> Result<RgbaImage, SnapshotError> {
    let viewport = native_viewport(frame.width, frame.height)
        .ok_or_else(|| SnapshotError::NotReady(stream.to_owned()))?;
    debug_assert!(viewport.is_unoffset());
    let mut surface = frame.to_rgba().ok_or(SnapshotError::BadFrame {
        width: frame.width,
        height: frame.height,
    })?;
    renderer.draw_detections(&mut surface, &viewport, detections);
    Ok(surface)
}

pub fn encode(image: &RgbaImage, format: SnapshotFormat) -> Result<Vec<u8>, SnapshotError> {
    let mut bytes = Vec::new();
    match format {
        SnapshotFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgba8(image.clone()).to_rgb8();
            let encoder = JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY);
            rgb.write_with_encoder(encoder)
                .map_err(|err| SnapshotError::Encode(err.to_string()))?;
        }
        SnapshotFormat::Png => {
            image
                .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
                .map_err(|err| SnapshotError::Encode(err.to_string()))?;
        }
    }
    Ok(bytes)
}

/// Captures `element`'s latest frame with `detections` drawn in.
///
/// Fails with [`SnapshotError::NotReady`] until the element has decoded a
/// frame, instead of producing a blank image.
pub fn capture(
    element: &MediaElement,
    detections: &[Detection],
    renderer: &OverlayRenderer,
    format: SnapshotFormat,
    at: DateTime<Utc>,
) -> Result<Snapshot, SnapshotError> {
    let frame = element
        .latest_frame()
        .ok_or_else(|| SnapshotError::NotReady(element.name().to_owned()))?;
    let image = compose(element.name(), &frame, detections, renderer)?;
    Ok(Snapshot {
        filename: snapshot_filename(element.name(), at, format),
        width: image.width(),
        height: image.height(),
        bytes: encode(&image, format)?,
    })
}

pub fn save(snapshot: &Snapshot, dir: &Path) -> Result<PathBuf> {
    let path = dir.join(&snapshot.filename);
    ensure_parent_dir(&path)?;
    fs::write(&path, &snapshot.bytes)
        .with_context(|| format!("failed writing snapshot {}", path.display()))?;
    Ok(path)
}
