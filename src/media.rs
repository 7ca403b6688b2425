//! Media Boundary - Format Sniffing and the Compositor Seam
//!
//! The pipeline talks to image codecs only through [`Compositor`]:
//! probe dimensions, measure the marker text, and produce the composed
//! artifact bytes. The shipped [`SegmentCompositor`] parses JPEG frame
//! headers directly and embeds the overlay plan as a comment segment;
//! raster backends implement the same trait.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hashing::canonical_json;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("not a JPEG image")]
    NotJpeg,

    #[error("truncated JPEG stream")]
    Truncated,

    #[error("corrupt JPEG segment structure")]
    Corrupt,

    #[error("no frame header before scan data")]
    MissingFrame,

    #[error("overlay plan exceeds comment segment capacity")]
    OversizedOverlay,

    #[error("overlay serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
}

/// Everything the compositor needs to render one stamped artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposePlan {
    pub marker_text: String,
    pub marker_pos: (u32, u32),
    pub font_size: u32,
    pub logo_id: String,
    pub logo_pos: (u32, u32),
    pub logo_size: u32,
}

/// Image codec/compositor boundary.
pub trait Compositor {
    fn probe(&self, bytes: &[u8]) -> Result<ImageInfo, MediaError>;

    /// Bounding box of the marker text at the given font size.
    fn measure_text(&self, text: &str, font_size: u32) -> (u32, u32);

    /// Apply the plan and return the final artifact bytes.
    fn compose(&self, bytes: &[u8], plan: &ComposePlan) -> Result<Vec<u8>, MediaError>;
}

/// True for a JPEG SOI header.
pub fn sniff_is_jpeg(bytes: &[u8]) -> bool {
    bytes.len() >= 3 && bytes[0] == 0xFF && bytes[1] == 0xD8 && bytes[2] == 0xFF
}

/// Walk the segment chain up to the first frame header (SOF0..SOF15).
pub fn jpeg_dimensions(bytes: &[u8]) -> Result<(u32, u32), MediaError> {
    if !sniff_is_jpeg(bytes) {
        return Err(MediaError::NotJpeg);
    }
    let mut i = 2usize;
    loop {
        if i + 2 > bytes.len() {
            return Err(MediaError::Truncated);
        }
        if bytes[i] != 0xFF {
            return Err(MediaError::Corrupt);
        }
        let marker = bytes[i + 1];
        match marker {
            // Fill byte before the real marker.
            0xFF => i += 1,
            // Standalone markers carry no length field.
            0x01 | 0xD0..=0xD7 | 0xD8 => i += 2,
            // End of image or start of scan without a frame header.
            0xD9 | 0xDA => return Err(MediaError::MissingFrame),
            0xC0..=0xC3 | 0xC5..=0xC7 | 0xC9..=0xCB | 0xCD..=0xCF => {
                if i + 9 > bytes.len() {
                    return Err(MediaError::Truncated);
                }
                let height = u32::from(bytes[i + 5]) << 8 | u32::from(bytes[i + 6]);
                let width = u32::from(bytes[i + 7]) << 8 | u32::from(bytes[i + 8]);
                return Ok((width, height));
            }
            _ => {
                if i + 4 > bytes.len() {
                    return Err(MediaError::Truncated);
                }
                let len = usize::from(bytes[i + 2]) << 8 | usize::from(bytes[i + 3]);
                if len < 2 {
                    return Err(MediaError::Corrupt);
                }
                i += 2 + len;
            }
        }
    }
}

/// Header-level compositor: dimensions from the frame header, fixed
/// advance-width text metrics, overlay plan spliced in as a JPEG
/// comment segment directly after SOI.
#[derive(Debug, Default, Clone)]
pub struct SegmentCompositor;

impl Compositor for SegmentCompositor {
    fn probe(&self, bytes: &[u8]) -> Result<ImageInfo, MediaError> {
        let (width, height) = jpeg_dimensions(bytes)?;
        Ok(ImageInfo { width, height })
    }

    fn measure_text(&self, text: &str, font_size: u32) -> (u32, u32) {
        // Fixed 0.6em advance per glyph, 1.25em line height.
        let glyphs = text.chars().count() as u32;
        (glyphs * font_size * 3 / 5, font_size + font_size / 4)
    }

    fn compose(&self, bytes: &[u8], plan: &ComposePlan) -> Result<Vec<u8>, MediaError> {
        if !sniff_is_jpeg(bytes) {
            return Err(MediaError::NotJpeg);
        }
        let payload = canonical_json(plan)?.into_bytes();
        let seg_len = payload.len() + 2;
        if seg_len > usize::from(u16::MAX) {
            return Err(MediaError::OversizedOverlay);
        }

        let mut out = Vec::with_capacity(bytes.len() + seg_len + 2);
        out.extend_from_slice(&bytes[..2]);
        out.extend_from_slice(&[0xFF, 0xFE]);
        out.extend_from_slice(&(seg_len as u16).to_be_bytes());
        out.extend_from_slice(&payload);
        out.extend_from_slice(&bytes[2..]);
        Ok(out)
    }
}
