//! Placement Engine - Marker and Logo Positioning
//!
//! Chooses a marker rectangle avoiding all exclusion zones and a logo
//! corner avoiding the marker. Randomness is an explicit parameter so
//! placement is reproducible under a seeded rng.
//!
//! Availability over precision: when the attempt budget runs out the
//! engine returns a degraded placement instead of failing the job.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::Rect;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 200;

#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("marker {marker_w}x{marker_h} exceeds canvas {img_w}x{img_h}")]
    InvalidDimensions {
        marker_w: u32,
        marker_h: u32,
        img_w: u32,
        img_h: u32,
    },
}

/// A chosen top-left position. `degraded` is set when the overlap
/// constraints could not be satisfied within the attempt budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub x: u32,
    pub y: u32,
    pub degraded: bool,
}

impl Placement {
    pub fn rect(&self, w: u32, h: u32) -> Rect {
        Rect::new(self.x, self.y, w, h)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Corner {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl Corner {
    pub const ALL: [Corner; 4] = [
        Corner::TopLeft,
        Corner::TopRight,
        Corner::BottomLeft,
        Corner::BottomRight,
    ];

    /// Top-left origin of a `w`x`h` box anchored in this corner.
    pub fn origin(self, img_w: u32, img_h: u32, w: u32, h: u32) -> (u32, u32) {
        match self {
            Corner::TopLeft => (0, 0),
            Corner::TopRight => (img_w.saturating_sub(w), 0),
            Corner::BottomLeft => (0, img_h.saturating_sub(h)),
            Corner::BottomRight => (img_w.saturating_sub(w), img_h.saturating_sub(h)),
        }
    }
}

/// Random corner order for production placement. Tests pin their own.
pub fn shuffled_corners(rng: &mut impl Rng) -> [Corner; 4] {
    let mut corners = Corner::ALL;
    corners.shuffle(rng);
    corners
}

/// Sample marker positions until one clears every exclusion zone.
///
/// Falls back to the last sampled candidate (flagged degraded) after
/// `max_attempts`; provenance marking must not block publication.
pub fn place_marker(
    img_w: u32,
    img_h: u32,
    marker_w: u32,
    marker_h: u32,
    zones: &[Rect],
    rng: &mut impl Rng,
    max_attempts: u32,
) -> Result<Placement, PlacementError> {
    if marker_w > img_w || marker_h > img_h {
        return Err(PlacementError::InvalidDimensions {
            marker_w,
            marker_h,
            img_w,
            img_h,
        });
    }

    let mut last = (0, 0);
    for _ in 0..max_attempts {
        let x = rng.gen_range(0..=img_w - marker_w);
        let y = rng.gen_range(0..=img_h - marker_h);
        let candidate = Rect::new(x, y, marker_w, marker_h);
        if !zones.iter().any(|zone| candidate.intersects(zone)) {
            return Ok(Placement {
                x,
                y,
                degraded: false,
            });
        }
        last = (x, y);
    }

    tracing::warn!(
        attempts = max_attempts,
        "marker placement degraded: no zone-free position found"
    );
    Ok(Placement {
        x: last.0,
        y: last.1,
        degraded: true,
    })
}

/// First corner in `corner_order` whose logo box clears the marker.
/// All four blocked falls back to the first corner, flagged degraded.
pub fn place_logo(
    img_w: u32,
    img_h: u32,
    logo_w: u32,
    logo_h: u32,
    marker: Rect,
    corner_order: &[Corner; 4],
) -> Placement {
    for corner in corner_order {
        let (x, y) = corner.origin(img_w, img_h, logo_w, logo_h);
        let candidate = Rect::new(x, y, logo_w, logo_h);
        if !candidate.intersects(&marker) {
            return Placement {
                x,
                y,
                degraded: false,
            };
        }
    }

    tracing::warn!("logo placement degraded: every corner overlaps the marker");
    let (x, y) = corner_order[0].origin(img_w, img_h, logo_w, logo_h);
    Placement {
        x,
        y,
        degraded: true,
    }
}
