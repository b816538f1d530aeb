//! Corner regions where the brand mark is expected.

/// An axis-aligned pixel rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl PixelRect {
    /// Number of pixels covered.
    #[must_use]
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Whether the rectangle covers no pixels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// A region given as fractions of the image height (rows) and width (cols).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatioRegion {
    /// Start and end row as a fraction of the height.
    pub rows: (f64, f64),
    /// Start and end column as a fraction of the width.
    pub cols: (f64, f64),
}

impl RatioRegion {
    /// Resolve against an image size. Edges truncate toward zero.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn to_rect(&self, width: u32, height: u32) -> PixelRect {
        let h = f64::from(height);
        let w = f64::from(width);
        let y1 = (h * self.rows.0) as u32;
        let y2 = ((h * self.rows.1) as u32).min(height);
        let x1 = (w * self.cols.0) as u32;
        let x2 = ((w * self.cols.1) as u32).min(width);
        PixelRect {
            x: x1,
            y: y1,
            width: x2.saturating_sub(x1),
            height: y2.saturating_sub(y1),
        }
    }
}

/// Bottom-left band inspected by the classifier.
pub const BOTTOM_LEFT_BAND: RatioRegion = RatioRegion {
    rows: (0.75, 1.0),
    cols: (0.0, 0.4),
};

/// Top-right band inspected by the classifier.
pub const TOP_RIGHT_BAND: RatioRegion = RatioRegion {
    rows: (0.0, 0.25),
    cols: (0.6, 1.0),
};

/// Classifier regions in inspection order.
pub const CLASSIFIER_REGIONS: [RatioRegion; 2] = [BOTTOM_LEFT_BAND, TOP_RIGHT_BAND];

/// Template search regions in search order: the bottom-left quadrant, then
/// the top-right quadrant.
#[must_use]
pub fn search_regions(width: u32, height: u32) -> [PixelRect; 2] {
    let half_w = width / 2;
    let half_h = height / 2;
    [
        PixelRect {
            x: 0,
            y: half_h,
            width: half_w,
            height: height - half_h,
        },
        PixelRect {
            x: half_w,
            y: 0,
            width: width - half_w,
            height: half_h,
        },
    ]
}
