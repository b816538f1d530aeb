//! 8-bit HSV conversion and inclusive HSV range tests.
//!
//! Hue is stored halved (`0..=179`), saturation and value span `0..=255`,
//! the common 8-bit HSV convention that the mark's color ranges are tuned in.

use serde::{Deserialize, Serialize};

/// One pixel in 8-bit HSV.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hsv {
    /// Hue in `0..=179` (degrees / 2).
    pub h: u8,
    /// Saturation in `0..=255`.
    pub s: u8,
    /// Value in `0..=255`.
    pub v: u8,
}

/// Convert an RGB pixel to 8-bit HSV.
#[must_use]
#[allow(clippy::many_single_char_names)]
pub fn rgb_to_hsv(r: u8, g: u8, b: u8) -> Hsv {
    let v = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = f32::from(v - min);

    let s = if v == 0 {
        0.0
    } else {
        255.0 * delta / f32::from(v)
    };

    let (r, g, b) = (f32::from(r), f32::from(g), f32::from(b));
    let mut h = if delta == 0.0 {
        0.0
    } else if (f32::from(v) - r).abs() < f32::EPSILON {
        60.0 * (g - b) / delta
    } else if (f32::from(v) - g).abs() < f32::EPSILON {
        120.0 + 60.0 * (b - r) / delta
    } else {
        240.0 + 60.0 * (r - g) / delta
    };
    if h < 0.0 {
        h += 360.0;
    }

    // 359.x / 2 rounds to 180, which wraps back to red at 0.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let h = ((h / 2.0).round() as u32 % 180) as u8;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let s = s.round().clamp(0.0, 255.0) as u8;

    Hsv { h, s, v }
}

/// Inclusive lower/upper bounds on all three HSV channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HsvRange {
    /// Lower bound `[h, s, v]`.
    pub lower: [u8; 3],
    /// Upper bound `[h, s, v]`.
    pub upper: [u8; 3],
}

impl HsvRange {
    /// Construct a range from `[h, s, v]` bounds.
    #[must_use]
    pub const fn new(lower: [u8; 3], upper: [u8; 3]) -> Self {
        Self { lower, upper }
    }

    /// Whether `px` lies inside the range on every channel.
    #[must_use]
    pub fn contains(&self, px: Hsv) -> bool {
        (self.lower[0]..=self.upper[0]).contains(&px.h)
            && (self.lower[1]..=self.upper[1]).contains(&px.s)
            && (self.lower[2]..=self.upper[2]).contains(&px.v)
    }
}
