//! One free-hand rectangle gesture, from pointer-down to commit or discard.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::geometry::{NormalizedRect, PixelRect, Point, RenderedGeometry};

pub const DEFAULT_MIN_PIXEL_EXTENT: f64 = 5.0;
pub const DEFAULT_MIN_NORMALIZED_EXTENT: f64 = 0.01;

/// Minimum extents a gesture must reach to become a box.
///
/// Empirical values; tune through settings rather than relying on them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DrawThresholds {
    pub min_pixel_extent: f64,
    pub min_normalized_extent: f64,
}

impl Default for DrawThresholds {
    fn default() -> Self {
        Self {
            min_pixel_extent: DEFAULT_MIN_PIXEL_EXTENT,
            min_normalized_extent: DEFAULT_MIN_NORMALIZED_EXTENT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerKind {
    Mouse,
    Touch,
    Pen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerPhase {
    Down,
    Move,
    Up,
    Leave,
}

/// Pointer input in container pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerEvent {
    pub phase: PointerPhase,
    pub position: Point,
    pub kind: PointerKind,
}

impl PointerEvent {
    pub fn new(phase: PointerPhase, position: Point, kind: PointerKind) -> Self {
        Self {
            phase,
            position,
            kind,
        }
    }

    pub fn mouse(phase: PointerPhase, x: f64, y: f64) -> Self {
        Self::new(phase, Point::new(x, y), PointerKind::Mouse)
    }

    pub fn touch(phase: PointerPhase, x: f64, y: f64) -> Self {
        Self::new(phase, Point::new(x, y), PointerKind::Touch)
    }
}

/// Live state the gesture depends on, read fresh for every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct DrawContext<'a> {
    pub geometry: Option<RenderedGeometry>,
    pub label: Option<&'a str>,
    pub page_number: Option<i64>,
}

/// A validated rectangle ready to be stored.
#[derive(Debug, Clone, PartialEq)]
pub struct BoxDraft {
    pub label: String,
    pub page_number: i64,
    pub rect: NormalizedRect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingDrawContext {
    Task,
    Page,
    TaskAndPage,
}

/// Why a finished gesture did not produce a box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DrawRejection {
    TooSmallInPixels { width: f64, height: f64, min: f64 },
    TooSmallNormalized { width: f64, height: f64, min: f64 },
    GeometryUnavailable,
}

impl fmt::Display for DrawRejection {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooSmallInPixels { width, height, min } => write!(
                formatter,
                "selection {width:.1}x{height:.1}px is smaller than {min}px"
            ),
            Self::TooSmallNormalized { width, height, min } => write!(
                formatter,
                "selection {width:.3}x{height:.3} of the page is smaller than {min}"
            ),
            Self::GeometryUnavailable => {
                formatter.write_str("page image is not laid out yet")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrawOutcome {
    /// Event had no effect in the current state.
    Ignored,
    /// Pointer went down without a task or page to attach a box to.
    MissingContext(MissingDrawContext),
    Started,
    Updated,
    Committed(BoxDraft),
    Rejected(DrawRejection),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum DrawState {
    #[default]
    Idle,
    Drawing {
        start: Point,
        current: Point,
        label: String,
        page_number: i64,
    },
}

#[derive(Debug, Clone, Default)]
pub struct DrawingSession {
    state: DrawState,
    thresholds: DrawThresholds,
}

impl DrawingSession {
    pub fn new(thresholds: DrawThresholds) -> Self {
        Self {
            state: DrawState::Idle,
            thresholds,
        }
    }

    pub fn state(&self) -> &DrawState {
        &self.state
    }

    pub fn is_drawing(&self) -> bool {
        matches!(self.state, DrawState::Drawing { .. })
    }

    pub fn thresholds(&self) -> DrawThresholds {
        self.thresholds
    }

    pub fn set_thresholds(&mut self, thresholds: DrawThresholds) {
        self.thresholds = thresholds;
    }

    /// In-progress rectangle in container pixels, for the rubber-band overlay.
    pub fn preview_rect(&self) -> Option<PixelRect> {
        match &self.state {
            DrawState::Drawing { start, current, .. } => {
                Some(PixelRect::from_corners(*start, *current))
            }
            DrawState::Idle => None,
        }
    }

    /// Abandons any gesture in progress.
    pub fn cancel(&mut self) {
        self.state = DrawState::Idle;
    }

    /// Advances the gesture. Pointer kind never changes the transition taken.
    pub fn handle(&mut self, event: PointerEvent, context: DrawContext<'_>) -> DrawOutcome {
        match event.phase {
            PointerPhase::Down => self.pointer_down(event.position, context),
            PointerPhase::Move => self.pointer_move(event.position),
            PointerPhase::Up | PointerPhase::Leave => self.finish(event.position, context),
        }
    }

    fn pointer_down(&mut self, position: Point, context: DrawContext<'_>) -> DrawOutcome {
        let (label, page_number) = match (context.label, context.page_number) {
            (Some(label), Some(page_number)) => (label, page_number),
            (None, Some(_)) => return DrawOutcome::MissingContext(MissingDrawContext::Task),
            (Some(_), None) => return DrawOutcome::MissingContext(MissingDrawContext::Page),
            (None, None) => return DrawOutcome::MissingContext(MissingDrawContext::TaskAndPage),
        };

        let Some(geometry) = context.geometry else {
            return DrawOutcome::Ignored;
        };
        if !geometry.contains(position) {
            return DrawOutcome::Ignored;
        }

        self.state = DrawState::Drawing {
            start: position,
            current: position,
            label: label.to_string(),
            page_number,
        };
        DrawOutcome::Started
    }

    fn pointer_move(&mut self, position: Point) -> DrawOutcome {
        match &mut self.state {
            DrawState::Drawing { current, .. } => {
                *current = position;
                DrawOutcome::Updated
            }
            DrawState::Idle => DrawOutcome::Ignored,
        }
    }

    fn finish(&mut self, position: Point, context: DrawContext<'_>) -> DrawOutcome {
        let DrawState::Drawing {
            start,
            label,
            page_number,
            ..
        } = std::mem::take(&mut self.state)
        else {
            return DrawOutcome::Ignored;
        };

        let pixel_rect = PixelRect::from_corners(start, position);
        let min_pixels = self.thresholds.min_pixel_extent;
        if pixel_rect.width < min_pixels || pixel_rect.height < min_pixels {
            return DrawOutcome::Rejected(DrawRejection::TooSmallInPixels {
                width: pixel_rect.width,
                height: pixel_rect.height,
                min: min_pixels,
            });
        }

        // Geometry comes from the caller at commit time so a resize mid-gesture
        // is reflected in the stored box.
        let Some(geometry) = context.geometry else {
            return DrawOutcome::Rejected(DrawRejection::GeometryUnavailable);
        };

        let rect = geometry.normalize_rect(pixel_rect);
        let min_normalized = self.thresholds.min_normalized_extent;
        if rect.width < min_normalized || rect.height < min_normalized {
            return DrawOutcome::Rejected(DrawRejection::TooSmallNormalized {
                width: rect.width,
                height: rect.height,
                min: min_normalized,
            });
        }

        DrawOutcome::Committed(BoxDraft {
            label,
            page_number,
            rect,
        })
    }
}
