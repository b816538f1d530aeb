//! Red/white brand-mark classifier.
//!
//! Decides whether an image likely carries the mark by inspecting two corner
//! bands:
//! 1. **Color balance**: the band must contain white pixels, and red pixels at
//!    no less than a minimum fraction of the white count.
//! 2. **Blob size**: the largest external contour of red ∪ white must cover a
//!    minimum fraction of the band.
//! 3. **Blob shape**: that contour's bounding box must have a plausible
//!    width/height ratio.
//!
//! Images with no passing band are moved to the processed tree; the rest stay
//! behind for template redaction.

use std::fs;
use std::io;
use std::path::Path;

use image::{GrayImage, Luma, RgbImage};
use imageproc::contours::{find_contours, BorderType, Contour};
use serde::{Deserialize, Serialize};

use crate::color::{rgb_to_hsv, HsvRange};
use crate::error::{Error, Result};
use crate::imaging::load_image;
use crate::layout::PathLayout;
use crate::outcome::{FilterOutcome, Tally};
use crate::pool::run_pool;
use crate::progress::ProgressSink;
use crate::regions::{RatioRegion, CLASSIFIER_REGIONS};

/// Tunable thresholds of the classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Low-hue red band.
    pub red_low: HsvRange,
    /// High-hue red band (hue wraps around at 180).
    pub red_high: HsvRange,
    /// Low saturation, high value.
    pub white: HsvRange,
    /// Minimum red / white pixel ratio.
    pub min_red_to_white_ratio: f64,
    /// Minimum largest-contour area as a fraction of the band area.
    pub min_area_ratio: f64,
    /// Minimum bounding-box width / height.
    pub min_aspect_ratio: f64,
    /// Maximum bounding-box width / height.
    pub max_aspect_ratio: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            red_low: HsvRange::new([0, 80, 80], [10, 255, 255]),
            red_high: HsvRange::new([160, 80, 80], [179, 255, 255]),
            white: HsvRange::new([0, 0, 180], [179, 40, 255]),
            min_red_to_white_ratio: 0.01,
            min_area_ratio: 0.002,
            min_aspect_ratio: 0.3,
            max_aspect_ratio: 7.0,
        }
    }
}

impl ClassifierConfig {
    /// Load a tuning file; fields left out keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read, or
    /// [`Error::StateFormat`] if it is not valid JSON.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Why a band was (not) accepted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RegionVerdict {
    /// All checks passed.
    Mark,
    /// The band resolves to zero pixels.
    Empty,
    /// No white pixels in the band.
    NoWhite,
    /// Too little red relative to white.
    LowRedRatio(f64),
    /// The mask has no external contour.
    NoContour,
    /// Largest contour area / band area below the minimum.
    TooSmall(f64),
    /// Bounding-box aspect ratio outside the admissible band.
    BadAspect(f64),
}

/// Classifies images with a fixed configuration.
#[derive(Debug, Clone, Default)]
pub struct LogoClassifier {
    config: ClassifierConfig,
}

impl LogoClassifier {
    /// Create a classifier from tuning parameters.
    #[must_use]
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    /// Active tuning parameters.
    #[must_use]
    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Whether either corner band carries the mark.
    #[must_use]
    pub fn detect(&self, image: &RgbImage) -> bool {
        CLASSIFIER_REGIONS
            .iter()
            .any(|region| self.inspect_region(image, *region) == RegionVerdict::Mark)
    }

    /// Run all checks on one band of `image`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn inspect_region(&self, image: &RgbImage, region: RatioRegion) -> RegionVerdict {
        let rect = region.to_rect(image.width(), image.height());
        if rect.is_empty() {
            return RegionVerdict::Empty;
        }

        let cfg = &self.config;
        let mut mask = GrayImage::new(rect.width, rect.height);
        let mut red = 0usize;
        let mut white = 0usize;
        for dy in 0..rect.height {
            for dx in 0..rect.width {
                let px = image.get_pixel(rect.x + dx, rect.y + dy);
                let hsv = rgb_to_hsv(px[0], px[1], px[2]);
                let is_red = cfg.red_low.contains(hsv) || cfg.red_high.contains(hsv);
                let is_white = cfg.white.contains(hsv);
                red += usize::from(is_red);
                white += usize::from(is_white);
                if is_red || is_white {
                    mask.put_pixel(dx, dy, Luma([255]));
                }
            }
        }

        if white == 0 {
            return RegionVerdict::NoWhite;
        }
        let red_ratio = red as f64 / white as f64;
        if red_ratio < cfg.min_red_to_white_ratio {
            return RegionVerdict::LowRedRatio(red_ratio);
        }

        let contours: Vec<Contour<i32>> = find_contours(&mask);
        let Some((area, aspect)) = contours
            .iter()
            .filter(|c| c.parent.is_none() && c.border_type == BorderType::Outer)
            .map(|c| (polygon_area(c), bbox_aspect(c)))
            .max_by(|a, b| a.0.total_cmp(&b.0))
        else {
            return RegionVerdict::NoContour;
        };

        let area_ratio = area / rect.area() as f64;
        if area_ratio < cfg.min_area_ratio {
            return RegionVerdict::TooSmall(area_ratio);
        }
        if aspect < cfg.min_aspect_ratio || aspect > cfg.max_aspect_ratio {
            return RegionVerdict::BadAspect(aspect);
        }
        RegionVerdict::Mark
    }

    /// Classify one file from the unprocessed tree, moving it to the
    /// processed tree when no mark is found.
    #[must_use]
    pub fn classify_file(&self, layout: &PathLayout, source: &Path) -> FilterOutcome {
        if !source.is_file() {
            return FilterOutcome::Absent;
        }
        let image = match load_image(source) {
            Ok(img) => img.to_rgb8(),
            Err(e) => {
                tracing::debug!(path = %source.display(), error = %e, "failed to decode");
                return FilterOutcome::LoadFail;
            }
        };

        if self.detect(&image) {
            tracing::debug!(path = %source.display(), "mark likely present");
            return FilterOutcome::LogoFoundStay;
        }

        let Some(dest) = layout.mirror_to_processed(source) else {
            tracing::warn!(path = %source.display(), "file outside the unprocessed tree");
            return FilterOutcome::ErrorStay;
        };
        match move_file(source, &dest) {
            Ok(()) => FilterOutcome::NoLogoMoved,
            Err(e) => {
                tracing::warn!(path = %source.display(), error = %e, "failed to move");
                FilterOutcome::ErrorStay
            }
        }
    }
}

/// Classify every pending image, moving mark-free ones to the processed tree.
///
/// # Errors
///
/// Returns [`Error::MissingDirectory`] if the unprocessed tree does not
/// exist, or [`Error::ThreadPool`] if the pool cannot start.
pub fn filter_unprocessed(
    layout: &PathLayout,
    classifier: &LogoClassifier,
    workers: usize,
    sink: &dyn ProgressSink<FilterOutcome>,
) -> Result<Tally<FilterOutcome>> {
    if !layout.unprocessed_dir().is_dir() {
        return Err(Error::MissingDirectory(layout.unprocessed_dir().to_path_buf()));
    }
    let tasks = layout.pending_images();
    tracing::info!(files = tasks.len(), workers, "classifying unprocessed images");

    run_pool(workers, &tasks, sink, || (), |_, path| {
        classifier.classify_file(layout, path)
    })
}

/// Move `source` to `dest`, creating parent directories. Falls back to copy
/// and delete when a rename is not possible.
pub(crate) fn move_file(source: &Path, dest: &Path) -> io::Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    if fs::rename(source, dest).is_ok() {
        return Ok(());
    }
    fs::copy(source, dest)?;
    fs::remove_file(source)
}

/// Shoelace area of a closed contour.
fn polygon_area(contour: &Contour<i32>) -> f64 {
    let pts = &contour.points;
    if pts.len() < 3 {
        return 0.0;
    }
    let mut twice = 0i64;
    for (i, p) in pts.iter().enumerate() {
        let q = &pts[(i + 1) % pts.len()];
        twice += i64::from(p.x) * i64::from(q.y) - i64::from(q.x) * i64::from(p.y);
    }
    #[allow(clippy::cast_precision_loss)]
    let area = twice.unsigned_abs() as f64 / 2.0;
    area
}

/// Bounding-box width / height of a contour, in whole pixels.
fn bbox_aspect(contour: &Contour<i32>) -> f64 {
    let xs = contour.points.iter().map(|p| p.x);
    let ys = contour.points.iter().map(|p| p.y);
    let (Some(min_x), Some(max_x)) = (xs.clone().min(), xs.max()) else {
        return 0.0;
    };
    let (Some(min_y), Some(max_y)) = (ys.clone().min(), ys.max()) else {
        return 0.0;
    };
    f64::from(max_x - min_x + 1) / f64::from(max_y - min_y + 1)
}
