//! Image decoding and normalization.
//!
//! Construction of [`ImagePayload`] is the only place request bytes are
//! interpreted; everything downstream (the task queue, the backends) works
//! with the decoded handle and never touches the raw upload.

use std::fmt;
use std::io::Cursor;

use image::imageops::FilterType;
use image::{ImageFormat, RgbImage};
use thiserror::Error;

/// Errors from decoding or re-encoding an image.
#[derive(Debug, Error)]
pub enum ImageError {
    /// The bytes were not recognized by any supported codec.
    #[error("undecodable image: {0}")]
    Undecodable(#[from] image::ImageError),

    /// Re-encoding a normalized image to PNG failed.
    #[error("png encoding failed: {0}")]
    Encode(#[source] image::ImageError),
}

/// A decoded image, normalized and ready for captioning.
#[derive(Clone)]
pub struct ImagePayload {
    rgb: RgbImage,
}

impl ImagePayload {
    /// Decode `bytes` and downscale so neither dimension exceeds `max_dim`.
    ///
    /// Aspect ratio is preserved (Lanczos3). Images already within bounds
    /// keep their original size.
    pub fn from_bytes(bytes: &[u8], max_dim: u32) -> Result<Self, ImageError> {
        let rgb = image::load_from_memory(bytes)?.to_rgb8();
        Ok(Self {
            rgb: shrink_to_fit(rgb, max_dim),
        })
    }

    /// Wrap an already-decoded image without rescaling.
    pub fn from_rgb(rgb: RgbImage) -> Self {
        Self { rgb }
    }

    pub fn width(&self) -> u32 {
        self.rgb.width()
    }

    pub fn height(&self) -> u32 {
        self.rgb.height()
    }

    pub fn as_rgb(&self) -> &RgbImage {
        &self.rgb
    }

    /// Re-encode as PNG, for backends that ship the image over the wire.
    pub fn to_png_bytes(&self) -> Result<Vec<u8>, ImageError> {
        let mut cursor = Cursor::new(Vec::new());
        self.rgb
            .write_to(&mut cursor, ImageFormat::Png)
            .map_err(ImageError::Encode)?;
        Ok(cursor.into_inner())
    }
}

impl fmt::Debug for ImagePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImagePayload")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

/// Scale down so neither dimension exceeds `max_dim`, preserving aspect
/// ratio. No-op for images already within bounds; degenerate dimensions are
/// clamped to 1 pixel so extreme aspect ratios never collapse to zero.
fn shrink_to_fit(rgb: RgbImage, max_dim: u32) -> RgbImage {
    let (w, h) = rgb.dimensions();
    if w <= max_dim && h <= max_dim {
        return rgb;
    }
    let scale = f64::from(max_dim) / f64::from(w.max(h));
    let new_w = ((f64::from(w) * scale) as u32).max(1);
    let new_h = ((f64::from(h) * scale) as u32).max(1);
    image::imageops::resize(&rgb, new_w, new_h, FilterType::Lanczos3)
}

// ── Tests ──────────────────────────────────────────────────────────────────────
