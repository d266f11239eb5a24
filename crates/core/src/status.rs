//! Job lifecycle status and the capabilities it unlocks.
//!
//! Transitions are owned by the backend pipeline. This module only projects a
//! status onto the set of actions the workspace may offer.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Backend job status.
///
/// Unrecognized strings map to [`JobStatus::Unknown`] so newer backends never
/// break status parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Pending,
    Rendering,
    ProcessingVlm,
    AwaitingSegmentation,
    SegmentationComplete,
    CompilationPending,
    CompilationComplete,
    CompilationFailed,
    RefinementInProgress,
    RefinementComplete,
    RefinementFailed,
    Failed,
    Completed,
    Unknown,
}

impl JobStatus {
    pub const ALL: [JobStatus; 14] = [
        Self::Pending,
        Self::Rendering,
        Self::ProcessingVlm,
        Self::AwaitingSegmentation,
        Self::SegmentationComplete,
        Self::CompilationPending,
        Self::CompilationComplete,
        Self::CompilationFailed,
        Self::RefinementInProgress,
        Self::RefinementComplete,
        Self::RefinementFailed,
        Self::Failed,
        Self::Completed,
        Self::Unknown,
    ];

    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Self::Pending,
            "rendering" => Self::Rendering,
            "processing_vlm" => Self::ProcessingVlm,
            "awaiting_segmentation" => Self::AwaitingSegmentation,
            "segmentation_complete" => Self::SegmentationComplete,
            "compilation_pending" => Self::CompilationPending,
            "compilation_complete" => Self::CompilationComplete,
            "compilation_failed" => Self::CompilationFailed,
            "refinement_in_progress" => Self::RefinementInProgress,
            "refinement_complete" => Self::RefinementComplete,
            "refinement_failed" => Self::RefinementFailed,
            "failed" => Self::Failed,
            "completed" => Self::Completed,
            other => {
                tracing::debug!(status = %other, "unrecognized job status");
                Self::Unknown
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Rendering => "rendering",
            Self::ProcessingVlm => "processing_vlm",
            Self::AwaitingSegmentation => "awaiting_segmentation",
            Self::SegmentationComplete => "segmentation_complete",
            Self::CompilationPending => "compilation_pending",
            Self::CompilationComplete => "compilation_complete",
            Self::CompilationFailed => "compilation_failed",
            Self::RefinementInProgress => "refinement_in_progress",
            Self::RefinementComplete => "refinement_complete",
            Self::RefinementFailed => "refinement_failed",
            Self::Failed => "failed",
            Self::Completed => "completed",
            Self::Unknown => "unknown",
        }
    }

    /// Backend workers are still producing something for this job.
    pub fn is_processing(&self) -> bool {
        matches!(
            self,
            Self::Pending
                | Self::Rendering
                | Self::ProcessingVlm
                | Self::CompilationPending
                | Self::RefinementInProgress
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::Failed | Self::CompilationFailed | Self::RefinementFailed
        )
    }

    pub fn capabilities(&self) -> Capabilities {
        capabilities(*self)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl Serialize for JobStatus {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for JobStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Ok(Self::parse(&value))
    }
}

/// Actions the UI may offer for a job in a given status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub can_view_tex: bool,
    pub can_segment: bool,
    pub can_compile: bool,
    pub can_download_pdf: bool,
    pub can_download_tex: bool,
}

impl Capabilities {
    pub const NONE: Capabilities = Capabilities {
        can_view_tex: false,
        can_segment: false,
        can_compile: false,
        can_download_pdf: false,
        can_download_tex: false,
    };
}

/// Projects a status onto its capability flags.
///
/// Exhaustive, so a new status does not compile until it is classified here.
pub fn capabilities(status: JobStatus) -> Capabilities {
    let can_download = match status {
        JobStatus::CompilationComplete | JobStatus::Completed => true,
        JobStatus::Pending
        | JobStatus::Rendering
        | JobStatus::ProcessingVlm
        | JobStatus::AwaitingSegmentation
        | JobStatus::SegmentationComplete
        | JobStatus::CompilationPending
        | JobStatus::CompilationFailed
        | JobStatus::RefinementInProgress
        | JobStatus::RefinementComplete
        | JobStatus::RefinementFailed
        | JobStatus::Failed
        | JobStatus::Unknown => false,
    };

    let tex_exists = match status {
        JobStatus::Pending
        | JobStatus::Rendering
        | JobStatus::ProcessingVlm
        | JobStatus::Failed
        | JobStatus::Unknown => false,
        JobStatus::AwaitingSegmentation
        | JobStatus::SegmentationComplete
        | JobStatus::CompilationPending
        | JobStatus::CompilationComplete
        | JobStatus::CompilationFailed
        | JobStatus::RefinementInProgress
        | JobStatus::RefinementComplete
        | JobStatus::RefinementFailed
        | JobStatus::Completed => true,
    };

    Capabilities {
        // Once downloads are offered the viewer gives way to the download actions.
        can_view_tex: tex_exists && !can_download,
        can_segment: status == JobStatus::AwaitingSegmentation,
        can_compile: status == JobStatus::SegmentationComplete,
        can_download_pdf: can_download,
        can_download_tex: can_download,
    }
}

/// Same as [`capabilities`] for a raw status string.
pub fn capabilities_for(raw_status: &str) -> Capabilities {
    capabilities(JobStatus::parse(raw_status))
}
