use std::sync::Arc;

use figseg_core::{Job, JobId, PageImage, SegmentationTask, WireBox};
use figseg_service::{EnhancementOffer, ServiceResult};

use super::cache::LoadedPage;
use super::download::{Download, DownloadKind};
use super::enhancement::{EnhancementTicket, PendingChoice};

/// Identifies the job session a request was issued for.
///
/// The epoch changes whenever the workspace opens or closes a job, so a
/// response carrying an older epoch belongs to abandoned state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestContext {
    pub job_id: JobId,
    pub epoch: u64,
}

/// Everything fetched when a job is opened.
#[derive(Debug, Clone)]
pub struct LoadedJob {
    pub job: Job,
    pub pages: Vec<PageImage>,
    pub tasks: Vec<SegmentationTask>,
    pub boxes: Vec<WireBox>,
}

/// Completion of background work, delivered back to the workspace.
#[derive(Debug)]
pub enum WorkspaceEvent {
    JobLoaded {
        context: RequestContext,
        result: ServiceResult<LoadedJob>,
    },
    /// `sequence` orders refreshes issued within one session.
    StatusRefreshed {
        context: RequestContext,
        sequence: u64,
        result: ServiceResult<Job>,
    },
    PageImageLoaded {
        context: RequestContext,
        page_number: i64,
        page: Option<Arc<LoadedPage>>,
    },
    SubmitFinished {
        context: RequestContext,
        revision: u64,
        result: ServiceResult<Vec<WireBox>>,
    },
    CompileFinished {
        context: RequestContext,
        result: ServiceResult<()>,
    },
    EnhancementFinished {
        context: RequestContext,
        label: String,
        ticket: EnhancementTicket,
        result: ServiceResult<EnhancementOffer>,
    },
    PreferencePersisted {
        context: RequestContext,
        label: String,
        choice: PendingChoice,
        result: ServiceResult<()>,
    },
    TexLoaded {
        context: RequestContext,
        result: ServiceResult<String>,
    },
    TexSaved {
        context: RequestContext,
        revision: u64,
        result: ServiceResult<()>,
    },
    DownloadFinished {
        context: RequestContext,
        kind: DownloadKind,
        result: ServiceResult<Download>,
    },
    PreviewDue {
        context: RequestContext,
        revision: u64,
    },
    PreviewFinished {
        context: RequestContext,
        revision: u64,
        result: ServiceResult<Vec<u8>>,
    },
}

impl WorkspaceEvent {
    pub fn context(&self) -> RequestContext {
        match self {
            Self::JobLoaded { context, .. }
            | Self::StatusRefreshed { context, .. }
            | Self::PageImageLoaded { context, .. }
            | Self::SubmitFinished { context, .. }
            | Self::CompileFinished { context, .. }
            | Self::EnhancementFinished { context, .. }
            | Self::PreferencePersisted { context, .. }
            | Self::TexLoaded { context, .. }
            | Self::TexSaved { context, .. }
            | Self::DownloadFinished { context, .. }
            | Self::PreviewDue { context, .. }
            | Self::PreviewFinished { context, .. } => *context,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::JobLoaded { .. } => "job-loaded",
            Self::StatusRefreshed { .. } => "status-refreshed",
            Self::PageImageLoaded { .. } => "page-image-loaded",
            Self::SubmitFinished { .. } => "submit-finished",
            Self::CompileFinished { .. } => "compile-finished",
            Self::EnhancementFinished { .. } => "enhancement-finished",
            Self::PreferencePersisted { .. } => "preference-persisted",
            Self::TexLoaded { .. } => "tex-loaded",
            Self::TexSaved { .. } => "tex-saved",
            Self::DownloadFinished { .. } => "download-finished",
            Self::PreviewDue { .. } => "preview-due",
            Self::PreviewFinished { .. } => "preview-finished",
        }
    }
}
