//! Template redaction: cover a matched mark and move the image to the
//! processed tree.

use std::fs;
use std::path::Path;

use image::{imageops, Rgb, RgbImage};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;
use rustfft::FftPlanner;

use crate::error::Result;
use crate::imaging::{load_image, save_image};
use crate::layout::PathLayout;
use crate::matching::{MatchCache, SearchRegion, TemplateSet};
use crate::outcome::{RedactOutcome, Tally};
use crate::pool::run_pool;
use crate::progress::ProgressSink;
use crate::regions::{search_regions, PixelRect};
use crate::state::validate_threshold;

/// Fill color painted over a matched mark.
pub const COVER_COLOR: Rgb<u8> = Rgb([0, 128, 0]);

/// A qualifying match in full-image coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkMatch {
    /// Covered rectangle.
    pub rect: PixelRect,
    /// ZNCC score of the match.
    pub score: f32,
    /// Index of the matching template in its [`TemplateSet`].
    pub template: usize,
    /// Scale the template was applied at.
    pub scale: f64,
}

/// Finds and covers marks at a fixed threshold.
#[derive(Debug, Clone, Copy)]
pub struct TemplateRedactor {
    threshold: f32,
}

impl TemplateRedactor {
    /// Create a redactor accepting matches scoring at least `threshold`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidThreshold`] outside `[0, 1]`.
    pub fn new(threshold: f32) -> Result<Self> {
        Ok(Self {
            threshold: validate_threshold(threshold)?,
        })
    }

    /// Active threshold.
    #[must_use]
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// First qualifying match, searching regions, then templates, then scales
    /// in their fixed orders.
    #[must_use]
    pub fn find_mark(&self, image: &RgbImage, cache: &MatchCache) -> Option<MarkMatch> {
        if cache.entries().is_empty() {
            return None;
        }
        let gray = imageops::grayscale(image);
        let mut planner = FftPlanner::new();
        for region in search_regions(image.width(), image.height()) {
            if region.is_empty() {
                continue;
            }
            let roi = imageops::crop_imm(&gray, region.x, region.y, region.width, region.height)
                .to_image();
            let search = SearchRegion::new(&roi, &mut planner);
            for tpl in cache.entries() {
                let Some(peak) = search.best_match(tpl) else {
                    continue;
                };
                if peak.score >= self.threshold {
                    return Some(MarkMatch {
                        rect: PixelRect {
                            x: region.x + peak.x,
                            y: region.y + peak.y,
                            width: tpl.width(),
                            height: tpl.height(),
                        },
                        score: peak.score,
                        template: tpl.template,
                        scale: tpl.scale,
                    });
                }
            }
        }
        None
    }

    /// Redact one file from the unprocessed tree.
    ///
    /// On a match the covered image is written to the mirrored processed path
    /// and the source is deleted. A source that no longer exists is a no-op.
    #[must_use]
    pub fn redact_file(&self, layout: &PathLayout, cache: &MatchCache, source: &Path) -> RedactOutcome {
        if !source.is_file() {
            return RedactOutcome::Absent;
        }
        let mut image = match load_image(source) {
            Ok(img) => img.to_rgb8(),
            Err(e) => {
                tracing::debug!(path = %source.display(), error = %e, "failed to decode");
                return RedactOutcome::LoadFail;
            }
        };

        let Some(found) = self.find_mark(&image, cache) else {
            return RedactOutcome::Unmatched;
        };
        tracing::debug!(
            path = %source.display(),
            score = found.score,
            template = found.template,
            scale = found.scale,
            "template matched"
        );
        cover(&mut image, found.rect);

        let Some(dest) = layout.mirror_to_processed(source) else {
            tracing::warn!(path = %source.display(), "file outside the unprocessed tree");
            return RedactOutcome::Error;
        };
        let written = dest
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .map_err(crate::Error::from)
            .and_then(|()| save_image(&image, &dest))
            .and_then(|()| fs::remove_file(source).map_err(crate::Error::from));
        match written {
            Ok(()) => RedactOutcome::Processed,
            Err(e) => {
                tracing::warn!(path = %source.display(), error = %e, "failed to store redacted image");
                RedactOutcome::Error
            }
        }
    }
}

/// Paint an opaque [`COVER_COLOR`] rectangle over `rect`.
#[allow(clippy::cast_possible_wrap)]
pub fn cover(image: &mut RgbImage, rect: PixelRect) {
    if rect.is_empty() {
        return;
    }
    draw_filled_rect_mut(
        image,
        Rect::at(rect.x as i32, rect.y as i32).of_size(rect.width, rect.height),
        COVER_COLOR,
    );
}

/// Redact every pending image with `templates` at `threshold`.
///
/// Each pool thread builds its own [`MatchCache`] from the shared, read-only
/// template set the first time it picks up a file. An empty set is allowed and leaves every file unmatched.
///
/// # Errors
///
/// Returns [`crate::Error::InvalidThreshold`] for a bad threshold,
/// [`crate::Error::MissingDirectory`] if the unprocessed tree is missing, or
/// [`crate::Error::ThreadPool`] if the pool cannot start.
pub fn redact_unprocessed(
    layout: &PathLayout,
    templates: &TemplateSet,
    threshold: f32,
    workers: usize,
    sink: &dyn ProgressSink<RedactOutcome>,
) -> Result<Tally<RedactOutcome>> {
    let redactor = TemplateRedactor::new(threshold)?;
    if !layout.unprocessed_dir().is_dir() {
        return Err(crate::Error::MissingDirectory(
            layout.unprocessed_dir().to_path_buf(),
        ));
    }
    if templates.is_empty() {
        tracing::warn!("template store is empty; nothing can match");
    }
    let tasks = layout.pending_images();
    tracing::info!(
        files = tasks.len(),
        templates = templates.len(),
        threshold,
        workers,
        "redacting unprocessed images"
    );

    run_pool(
        workers,
        &tasks,
        sink,
        || MatchCache::build(templates),
        |cache, path| redactor.redact_file(layout, cache, path),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::Template;
    use image::{GrayImage, Luma};

    fn noise(w: u32, h: u32, seed: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| {
            let hash = (x.wrapping_mul(73_856_093) ^ y.wrapping_mul(19_349_663) ^ seed)
                .wrapping_mul(2_654_435_761);
            Luma([(hash >> 24) as u8])
        })
    }

    fn set_of(image: GrayImage) -> TemplateSet {
        TemplateSet::new(vec![Template {
            name: "mark.png".into(),
            image,
        }])
    }

    /// Gray canvas with `mark` pasted at (`x`, `y`).
    fn canvas_with(mark: &GrayImage, x: u32, y: u32) -> RgbImage {
        let mut img = RgbImage::from_pixel(120, 100, Rgb([128, 128, 128]));
        for (mx, my, px) in mark.enumerate_pixels() {
            img.put_pixel(x + mx, y + my, Rgb([px[0], px[0], px[0]]));
        }
        img
    }

    #[test]
    fn mark_in_bottom_left_is_found_at_its_position() {
        let mark = noise(16, 12, 7);
        let img = canvas_with(&mark, 8, 70);
        let cache = MatchCache::build(&set_of(mark));
        let redactor = TemplateRedactor::new(0.8).unwrap();

        let found = redactor.find_mark(&img, &cache).unwrap();
        assert_eq!(
            found.rect,
            PixelRect {
                x: 8,
                y: 70,
                width: 16,
                height: 12
            }
        );
        assert!((found.scale - 1.0).abs() < 1e-9);
        assert!(found.score > 0.99);
    }

    #[test]
    fn mark_outside_search_regions_is_ignored() {
        let mark = noise(16, 12, 7);
        // Top-left quadrant is never searched.
        let img = canvas_with(&mark, 5, 5);
        let cache = MatchCache::build(&set_of(mark));
        let redactor = TemplateRedactor::new(0.8).unwrap();
        assert!(redactor.find_mark(&img, &cache).is_none());
    }

    #[test]
    fn empty_cache_never_matches() {
        let img = canvas_with(&noise(16, 12, 7), 70, 10);
        let redactor = TemplateRedactor::new(0.5).unwrap();
        assert!(redactor.find_mark(&img, &MatchCache::default()).is_none());
    }

    #[test]
    fn cover_paints_the_rectangle_only() {
        let mut img = RgbImage::from_pixel(10, 10, Rgb([255, 255, 255]));
        cover(
            &mut img,
            PixelRect {
                x: 2,
                y: 3,
                width: 4,
                height: 2,
            },
        );
        assert_eq!(img.get_pixel(2, 3), &COVER_COLOR);
        assert_eq!(img.get_pixel(5, 4), &COVER_COLOR);
        assert_eq!(img.get_pixel(6, 4), &Rgb([255, 255, 255]));
        assert_eq!(img.get_pixel(2, 5), &Rgb([255, 255, 255]));
    }

    #[test]
    fn redactor_rejects_bad_threshold() {
        assert!(TemplateRedactor::new(1.5).is_err());
    }

    #[test]
    fn missing_source_is_a_no_op() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = PathLayout::new(tmp.path());
        let redactor = TemplateRedactor::new(0.8).unwrap();
        let ghost = layout.unprocessed_dir().join("a/b/c.png");
        assert_eq!(
            redactor.redact_file(&layout, &MatchCache::default(), &ghost),
            RedactOutcome::Absent
        );
    }
}
