//! Coordinate spaces for page annotation.
//!
//! - natural space: pixels of the decoded page image
//! - container space: on-screen pixels of the element hosting the image
//! - normalized space: fractions of the natural image, origin top-left, in `[0, 1]`
//!
//! The image is letterboxed into its container, so container space contains an
//! inner "rendered" rectangle; only points inside it map onto the page.

use serde::{Deserialize, Serialize};

/// Tolerance used when comparing derived floating point geometry.
pub const GEOMETRY_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Both dimensions are finite and strictly positive.
    pub fn is_drawable(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }

    fn aspect(&self) -> f64 {
        self.width / self.height
    }
}

/// Axis-aligned rectangle in container pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PixelRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl PixelRect {
    /// Builds the rectangle spanned by two corners in any order.
    pub fn from_corners(a: Point, b: Point) -> Self {
        let x = a.x.min(b.x);
        let y = a.y.min(b.y);
        Self {
            x,
            y,
            width: a.x.max(b.x) - x,
            height: a.y.max(b.y) - y,
        }
    }

    pub fn top_left(&self) -> Point {
        Point::new(self.x, self.y)
    }

    pub fn bottom_right(&self) -> Point {
        Point::new(self.x + self.width, self.y + self.height)
    }
}

/// Rectangle in normalized page space.
///
/// Constructed through [`NormalizedRect::clamped`] or geometry conversions, which
/// keep `x + width <= 1` and `y + height <= 1`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NormalizedRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl NormalizedRect {
    pub const FULL_PAGE: NormalizedRect = NormalizedRect {
        x: 0.0,
        y: 0.0,
        width: 1.0,
        height: 1.0,
    };

    /// Clips a rectangle to the unit square.
    pub fn clamped(x: f64, y: f64, width: f64, height: f64) -> Self {
        let x0 = clamp01(x);
        let y0 = clamp01(y);
        let x1 = clamp01(x + width).max(x0);
        let y1 = clamp01(y + height).max(y0);
        Self {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
        }
    }

    /// Every edge lies inside the unit square and the extent is positive.
    pub fn is_within_page(&self) -> bool {
        let values = [self.x, self.y, self.width, self.height];
        values.iter().all(|value| value.is_finite())
            && self.x >= 0.0
            && self.y >= 0.0
            && self.width > 0.0
            && self.height > 0.0
            && self.x + self.width <= 1.0 + GEOMETRY_EPSILON
            && self.y + self.height <= 1.0 + GEOMETRY_EPSILON
    }

    /// Maps the rectangle onto natural image pixels.
    pub fn to_natural(&self, natural: Size) -> (f64, f64, f64, f64) {
        let x0 = self.x * natural.width;
        let y0 = self.y * natural.height;
        (
            x0,
            y0,
            x0 + self.width * natural.width,
            y0 + self.height * natural.height,
        )
    }
}

/// Letterbox placement of a page image inside its container.
///
/// Derived from the current natural and container sizes. Callers recompute it
/// whenever either changes and never keep one across a resize.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderedGeometry {
    pub natural: Size,
    pub container: Size,
    pub rendered: Size,
    pub offset: Point,
}

impl RenderedGeometry {
    /// Fits `natural` inside `container`, preserving aspect ratio and centering.
    ///
    /// Returns `None` when either size is empty or non-finite.
    pub fn fit(natural: Size, container: Size) -> Option<Self> {
        if !natural.is_drawable() || !container.is_drawable() {
            return None;
        }

        let rendered = if natural.aspect() > container.aspect() {
            Size::new(
                container.width,
                container.width * natural.height / natural.width,
            )
        } else {
            Size::new(
                container.height * natural.width / natural.height,
                container.height,
            )
        };

        let offset = Point::new(
            (container.width - rendered.width) / 2.0,
            (container.height - rendered.height) / 2.0,
        );

        Some(Self {
            natural,
            container,
            rendered,
            offset,
        })
    }

    /// Whether a container-space point lands on the rendered image.
    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.offset.x
            && point.x <= self.offset.x + self.rendered.width
            && point.y >= self.offset.y
            && point.y <= self.offset.y + self.rendered.height
    }

    pub fn to_normalized(&self, point: Point) -> Point {
        Point::new(
            clamp01((point.x - self.offset.x) / self.rendered.width),
            clamp01((point.y - self.offset.y) / self.rendered.height),
        )
    }

    pub fn to_pixel(&self, point: Point) -> Point {
        Point::new(
            self.offset.x + point.x * self.rendered.width,
            self.offset.y + point.y * self.rendered.height,
        )
    }

    /// Converts a container rectangle to page space, clipping whatever falls
    /// outside the rendered image.
    pub fn normalize_rect(&self, rect: PixelRect) -> NormalizedRect {
        let top_left = self.to_normalized(rect.top_left());
        let bottom_right = self.to_normalized(rect.bottom_right());
        NormalizedRect {
            x: top_left.x,
            y: top_left.y,
            width: bottom_right.x - top_left.x,
            height: bottom_right.y - top_left.y,
        }
    }

    /// Places a stored box back onto the container, e.g. for an overlay.
    pub fn to_pixel_rect(&self, rect: &NormalizedRect) -> PixelRect {
        let top_left = self.to_pixel(Point::new(rect.x, rect.y));
        PixelRect {
            x: top_left.x,
            y: top_left.y,
            width: rect.width * self.rendered.width,
            height: rect.height * self.rendered.height,
        }
    }

    /// Ratio between on-screen and natural pixels.
    pub fn scale(&self) -> f64 {
        self.rendered.width / self.natural.width
    }
}

pub fn clamp01(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}
