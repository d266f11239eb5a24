//! Domain model for marking figure regions on rendered document pages.
//!
//! Everything here is synchronous and free of I/O: job status projection,
//! letterbox geometry, the draw gesture state machine and the annotation
//! collection. Network and session concerns live in `figseg-service` and
//! `figseg-workspace`.

pub mod annotation;
pub mod drawing;
pub mod error;
pub mod geometry;
pub mod ids;
pub mod status;
pub mod types;
pub mod wire;

pub use annotation::{AnnotationEngine, AnnotationSnapshot, BoundingBox, BoxPatch};
pub use drawing::{
    BoxDraft, DrawContext, DrawOutcome, DrawRejection, DrawState, DrawThresholds, DrawingSession,
    MissingDrawContext, PointerEvent, PointerKind, PointerPhase,
};
pub use error::{CoreError, CoreResult};
pub use geometry::{NormalizedRect, PixelRect, Point, RenderedGeometry, Size};
pub use ids::{BoxId, JobId, ServerBoxId};
pub use status::{Capabilities, JobStatus, capabilities, capabilities_for};
pub use types::{
    Job, PageImage, SegmentationProgress, SegmentationTask, tasks_from_mapping,
};
pub use wire::WireBox;
