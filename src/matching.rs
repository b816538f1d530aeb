//! Zero-mean normalized cross-correlation (ZNCC) template matching.
//!
//! For a window `I` and template `T` of `n` pixels:
//!
//! `ZNCC = sum((I - mean_I) * (T - mean_T)) / sqrt(sum((I - mean_I)^2) * sum((T - mean_T)^2))`
//!
//! The template is stored zero-mean (`T'`), which reduces the numerator to
//! `sum(I * T')`. Window sums of `I` and `I^2` come from integral images.
//! The remaining dot products are either evaluated directly ([`best_zncc`]) or,
//! for larger templates, obtained for all placements at once by an FFT
//! cross-correlation ([`SearchRegion`]).

use std::path::Path;
use std::sync::Arc;

use image::imageops::{self, FilterType};
use image::GrayImage;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::error::{Error, Result};
use crate::imaging::{is_supported_image, load_image};

/// Template scale factors in search order.
pub const SCALES: [f64; 3] = [1.2, 1.0, 0.8];

/// Windows or templates with a variance below this (per pixel) are flat.
const MIN_VARIANCE: f64 = 1e-6;

/// Templates up to this many pixels are correlated directly.
const DIRECT_MAX_AREA: usize = 256;

/// A decoded grayscale template.
#[derive(Debug, Clone)]
pub struct Template {
    /// File name the template was loaded from.
    pub name: String,
    /// Grayscale pixels.
    pub image: GrayImage,
}

/// The templates of one redaction run, in file-name order.
#[derive(Debug, Clone, Default)]
pub struct TemplateSet {
    templates: Vec<Template>,
}

impl TemplateSet {
    /// Build a set from already decoded templates, keeping their order.
    #[must_use]
    pub fn new(templates: Vec<Template>) -> Self {
        Self { templates }
    }

    /// Decode every PNG/JPEG file in `dir` to grayscale, ordered by file name.
    ///
    /// Files that fail to decode are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingDirectory`] if `dir` does not exist, or an I/O
    /// error if it cannot be listed.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            return Err(Error::MissingDirectory(dir.to_path_buf()));
        }
        let mut paths: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(std::result::Result::ok)
            .map(|e| e.path())
            .filter(|p| p.is_file() && is_supported_image(p))
            .collect();
        paths.sort();

        let mut templates = Vec::with_capacity(paths.len());
        for path in paths {
            match load_image(&path) {
                Ok(img) => templates.push(Template {
                    name: path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                    image: img.to_luma8(),
                }),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable template");
                }
            }
        }
        Ok(Self { templates })
    }

    /// Number of templates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Templates in search order.
    #[must_use]
    pub fn templates(&self) -> &[Template] {
        &self.templates
    }
}

/// A template resized to one search scale, with precomputed statistics.
#[derive(Debug, Clone)]
pub struct ScaledTemplate {
    /// Index into the owning [`TemplateSet`].
    pub template: usize,
    /// Scale factor applied.
    pub scale: f64,
    width: u32,
    height: u32,
    zero_mean: Vec<f32>,
    norm: f64,
}

impl ScaledTemplate {
    /// Resize `image` by `scale` (sizes truncate toward zero) and precompute
    /// its zero-mean form. Returns `None` when the result is empty or flat.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn new(template: usize, image: &GrayImage, scale: f64) -> Option<Self> {
        let width = (f64::from(image.width()) * scale) as u32;
        let height = (f64::from(image.height()) * scale) as u32;
        if width == 0 || height == 0 {
            return None;
        }
        let resized = if (width, height) == image.dimensions() {
            image.clone()
        } else {
            imageops::resize(image, width, height, FilterType::Triangle)
        };

        let n = f64::from(width) * f64::from(height);
        let mean = resized.as_raw().iter().map(|&v| f64::from(v)).sum::<f64>() / n;
        let zero_mean: Vec<f32> = resized
            .as_raw()
            .iter()
            .map(|&v| (f64::from(v) - mean) as f32)
            .collect();
        let var: f64 = zero_mean.iter().map(|&v| f64::from(v) * f64::from(v)).sum();
        if var <= MIN_VARIANCE * n {
            return None;
        }

        Some(Self {
            template,
            scale,
            width,
            height,
            zero_mean,
            norm: var.sqrt(),
        })
    }

    /// Scaled width.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Scaled height.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }
}

/// Per-worker cache: every usable template at every scale, template-major.
#[derive(Debug, Clone, Default)]
pub struct MatchCache {
    entries: Vec<ScaledTemplate>,
}

impl MatchCache {
    /// Resize and prepare every template of `set` at every [`SCALES`] entry.
    #[must_use]
    pub fn build(set: &TemplateSet) -> Self {
        let entries = set
            .templates()
            .iter()
            .enumerate()
            .flat_map(|(idx, tpl)| {
                SCALES
                    .iter()
                    .filter_map(move |&scale| ScaledTemplate::new(idx, &tpl.image, scale))
            })
            .collect();
        Self { entries }
    }

    /// Prepared templates in search order.
    #[must_use]
    pub fn entries(&self) -> &[ScaledTemplate] {
        &self.entries
    }
}

/// Best match of one template inside one image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    /// Left edge of the best window.
    pub x: u32,
    /// Top edge of the best window.
    pub y: u32,
    /// ZNCC score in `[-1, 1]`.
    pub score: f32,
}

/// Summed-area tables of values and squared values.
struct Integral {
    stride: usize,
    sum: Vec<f64>,
    sq: Vec<f64>,
}

impl Integral {
    fn new(image: &GrayImage) -> Self {
        let (w, h) = (image.width() as usize, image.height() as usize);
        let stride = w + 1;
        let mut sum = vec![0.0; stride * (h + 1)];
        let mut sq = vec![0.0; stride * (h + 1)];
        let raw = image.as_raw();
        for y in 0..h {
            let mut row_sum = 0.0;
            let mut row_sq = 0.0;
            for x in 0..w {
                let v = f64::from(raw[y * w + x]);
                row_sum += v;
                row_sq += v * v;
                sum[(y + 1) * stride + x + 1] = sum[y * stride + x + 1] + row_sum;
                sq[(y + 1) * stride + x + 1] = sq[y * stride + x + 1] + row_sq;
            }
        }
        Self { stride, sum, sq }
    }

    fn window(&self, table: &[f64], x: usize, y: usize, w: usize, h: usize) -> f64 {
        let s = self.stride;
        table[(y + h) * s + x + w] - table[y * s + x + w] - table[(y + h) * s + x]
            + table[y * s + x]
    }
}

/// `sum(I * T')` for the window at (`x`, `y`), evaluated pixel by pixel.
fn direct_dot(raw: &[u8], img_w: usize, x: usize, y: usize, tpl: &ScaledTemplate) -> f64 {
    let (tw, th) = (tpl.width as usize, tpl.height as usize);
    let mut dot = 0.0f64;
    for ty in 0..th {
        let row = &raw[(y + ty) * img_w + x..(y + ty) * img_w + x + tw];
        let trow = &tpl.zero_mean[ty * tw..(ty + 1) * tw];
        let row_dot: f32 = row
            .iter()
            .zip(trow)
            .map(|(&i, &t)| f32::from(i) * t)
            .sum();
        dot += f64::from(row_dot);
    }
    dot
}

/// Turn numerators into ZNCC scores over every placement and keep the best.
///
/// Flat windows are skipped. Ties keep the first window in row-major order.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn pick_peak(
    integral: &Integral,
    (img_w, img_h): (usize, usize),
    tpl: &ScaledTemplate,
    dot: impl Fn(usize, usize) -> f64,
) -> Option<Peak> {
    let (tw, th) = (tpl.width as usize, tpl.height as usize);
    let n = (tw * th) as f64;
    let mut best: Option<Peak> = None;

    for y in 0..=img_h - th {
        for x in 0..=img_w - tw {
            let sum_i = integral.window(&integral.sum, x, y, tw, th);
            let sum_i2 = integral.window(&integral.sq, x, y, tw, th);
            let var_i = sum_i2 - sum_i * sum_i / n;
            if var_i <= MIN_VARIANCE * n {
                continue;
            }

            let score = (dot(x, y) / (tpl.norm * var_i.sqrt())) as f32;
            if score.is_finite() && best.is_none_or(|b| score > b.score) {
                best = Some(Peak {
                    x: x as u32,
                    y: y as u32,
                    score,
                });
            }
        }
    }
    best
}

/// Scan every placement of `tpl` inside `image` and return the highest ZNCC,
/// computing each numerator directly.
///
/// Exact, but the cost grows with image area times template area; used for
/// small templates and as the reference for [`SearchRegion::best_match`].
/// Returns `None` when the template does not fit or every window is flat.
#[must_use]
pub fn best_zncc(image: &GrayImage, tpl: &ScaledTemplate) -> Option<Peak> {
    let dims = (image.width() as usize, image.height() as usize);
    if tpl.width as usize > dims.0 || tpl.height as usize > dims.1 {
        return None;
    }
    let raw = image.as_raw();
    pick_peak(&Integral::new(image), dims, tpl, |x, y| {
        direct_dot(raw, dims.0, x, y, tpl)
    })
}

/// Row and column transforms for one region size.
struct Plans {
    rows: Arc<dyn Fft<f64>>,
    cols: Arc<dyn Fft<f64>>,
    rows_inv: Arc<dyn Fft<f64>>,
    cols_inv: Arc<dyn Fft<f64>>,
}

impl Plans {
    fn new(planner: &mut FftPlanner<f64>, w: usize, h: usize) -> Self {
        Self {
            rows: planner.plan_fft_forward(w),
            cols: planner.plan_fft_forward(h),
            rows_inv: planner.plan_fft_inverse(w),
            cols_inv: planner.plan_fft_inverse(h),
        }
    }

    /// 2-D forward transform of a row-major `w x h` buffer. The result is
    /// left column-major.
    fn forward(&self, mut data: Vec<Complex<f64>>, w: usize, h: usize) -> Vec<Complex<f64>> {
        self.rows.process(&mut data);
        let mut out = transpose(&data, w, h);
        self.cols.process(&mut out);
        out
    }

    /// Inverse of [`Plans::forward`], normalized, back to row-major.
    #[allow(clippy::cast_precision_loss)]
    fn inverse(&self, mut data: Vec<Complex<f64>>, w: usize, h: usize) -> Vec<f64> {
        self.cols_inv.process(&mut data);
        let mut out = transpose(&data, h, w);
        self.rows_inv.process(&mut out);
        let scale = 1.0 / (w * h) as f64;
        out.iter().map(|c| c.re * scale).collect()
    }
}

/// Transpose a row-major buffer of `h` rows by `w` columns.
fn transpose(src: &[Complex<f64>], w: usize, h: usize) -> Vec<Complex<f64>> {
    let mut out = vec![Complex::new(0.0, 0.0); w * h];
    for y in 0..h {
        for x in 0..w {
            out[x * h + y] = src[y * w + x];
        }
    }
    out
}

/// One search region prepared for matching many templates.
///
/// Integral images and the region's 2-D spectrum are computed once. Large
/// templates get their numerators for every placement from a single
/// frequency-domain cross-correlation, so the cost per template is
/// `O(region log region)` instead of `O(region * template)`. Small templates
/// use [`best_zncc`]'s direct scan, which is cheaper at that size.
pub struct SearchRegion<'a> {
    image: &'a GrayImage,
    integral: Integral,
    spectrum: Option<(Plans, Vec<Complex<f64>>)>,
}

impl<'a> SearchRegion<'a> {
    /// Prepare `image` for matching. `planner` caches transform plans across
    /// regions of the same size.
    #[must_use]
    pub fn new(image: &'a GrayImage, planner: &mut FftPlanner<f64>) -> Self {
        let (w, h) = (image.width() as usize, image.height() as usize);
        let spectrum = (w > 0 && h > 0).then(|| {
            let plans = Plans::new(planner, w, h);
            let data = image
                .as_raw()
                .iter()
                .map(|&v| Complex::new(f64::from(v), 0.0))
                .collect();
            let spectrum = plans.forward(data, w, h);
            (plans, spectrum)
        });
        Self {
            image,
            integral: Integral::new(image),
            spectrum,
        }
    }

    /// Highest ZNCC of `tpl` over every placement inside the region, with
    /// the same tie and flat-window rules as [`best_zncc`].
    #[must_use]
    pub fn best_match(&self, tpl: &ScaledTemplate) -> Option<Peak> {
        let dims = (self.image.width() as usize, self.image.height() as usize);
        let (tw, th) = (tpl.width as usize, tpl.height as usize);
        if tw > dims.0 || th > dims.1 {
            return None;
        }
        if tw * th <= DIRECT_MAX_AREA {
            let raw = self.image.as_raw();
            return pick_peak(&self.integral, dims, tpl, |x, y| {
                direct_dot(raw, dims.0, x, y, tpl)
            });
        }

        let (plans, spectrum) = self.spectrum.as_ref()?;
        let (w, h) = dims;
        let mut padded = vec![Complex::new(0.0, 0.0); w * h];
        for ty in 0..th {
            for tx in 0..tw {
                padded[ty * w + tx] = Complex::new(f64::from(tpl.zero_mean[ty * tw + tx]), 0.0);
            }
        }
        // Circular cross-correlation; valid placements never wrap.
        let product: Vec<Complex<f64>> = plans
            .forward(padded, w, h)
            .iter()
            .zip(spectrum)
            .map(|(t, i)| i * t.conj())
            .collect();
        let numerators = plans.inverse(product, w, h);
        pick_peak(&self.integral, dims, tpl, |x, y| numerators[y * w + x])
    }
}
