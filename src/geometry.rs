//! Rectangle Geometry and Exclusion Zones
//!
//! Pure functions only. Overlap is defined on open intervals: two
//! rectangles that share an edge do not intersect.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Axis-aligned rectangle in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    /// True iff the projections overlap on both axes.
    pub fn intersects(&self, other: &Rect) -> bool {
        self.x < other.x + other.w
            && self.x + self.w > other.x
            && self.y < other.y + other.h
            && self.y + self.h > other.y
    }
}

#[derive(Debug, Error)]
pub enum ZoneError {
    #[error("inverted fractional zone: ({fx0}, {fy0}) .. ({fx1}, {fy1})")]
    Inverted { fx0: f64, fy0: f64, fx1: f64, fy1: f64 },

    #[error("fractional zone outside [0,1]: ({fx0}, {fy0}) .. ({fx1}, {fy1})")]
    OutOfRange { fx0: f64, fy0: f64, fx1: f64, fy1: f64 },
}

/// Exclusion zone specification from configuration.
///
/// Absolute zones carry pixel bounds and always extend to the full image
/// height ("keep clear below this line"). Fractional zones are scaled by
/// the current image size at composition time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ZoneSpec {
    Absolute { x0: u32, y0: u32, x1: u32 },
    Fractional { fx0: f64, fy0: f64, fx1: f64, fy1: f64 },
}

impl ZoneSpec {
    /// Reject specs that can never resolve, independent of image size.
    /// Fractions outside `[0,1]` would resolve past the canvas.
    pub fn validate(&self) -> Result<(), ZoneError> {
        match *self {
            ZoneSpec::Absolute { .. } => Ok(()),
            ZoneSpec::Fractional { fx0, fy0, fx1, fy1 } => {
                let unit = 0.0..=1.0;
                if ![fx0, fy0, fx1, fy1].iter().all(|f| unit.contains(f)) {
                    Err(ZoneError::OutOfRange { fx0, fy0, fx1, fy1 })
                } else if fx1 <= fx0 || fy1 <= fy0 {
                    Err(ZoneError::Inverted { fx0, fy0, fx1, fy1 })
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Resolve against a concrete canvas.
    pub fn resolve(&self, img_w: u32, img_h: u32) -> Result<Rect, ZoneError> {
        self.validate()?;
        match *self {
            ZoneSpec::Absolute { x0, y0, x1 } => {
                let x0 = x0.min(img_w);
                let x1 = x1.min(img_w);
                let y0 = y0.min(img_h);
                Ok(Rect::new(x0, y0, x1.saturating_sub(x0), img_h - y0))
            }
            ZoneSpec::Fractional { fx0, fy0, fx1, fy1 } => {
                let x0 = (img_w as f64 * fx0) as u32;
                let y0 = (img_h as f64 * fy0) as u32;
                let x1 = (img_w as f64 * fx1) as u32;
                let y1 = (img_h as f64 * fy1) as u32;
                Ok(Rect::new(x0, y0, x1 - x0, y1 - y0))
            }
        }
    }
}
