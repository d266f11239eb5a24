use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use figseg_core::{
    Job, JobId, NormalizedRect, PageImage, SegmentationTask, ServerBoxId, WireBox,
};
use serde::{Deserialize, Serialize};
use snafu::Snafu;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub base_url: String,
    pub request_timeout: Duration,
}

impl ServiceConfig {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim().trim_end_matches('/').to_string(),
            request_timeout,
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::new(DEFAULT_API_BASE_URL, DEFAULT_REQUEST_TIMEOUT)
    }
}

/// Region of a page sent along with an enhancement request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnhancementRegion {
    pub page_number: i64,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl EnhancementRegion {
    pub fn new(page_number: i64, rect: NormalizedRect) -> Self {
        Self {
            page_number,
            x: rect.x,
            y: rect.y,
            width: rect.width,
            height: rect.height,
        }
    }
}

/// Original and AI-enhanced crops offered for one label.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EnhancementOffer {
    pub label: String,
    pub original_url: String,
    pub enhanced_url: String,
    #[serde(default, alias = "enhanced_s3_path")]
    pub asset_ref: Option<String>,
    #[serde(default, alias = "segmentation_id")]
    pub box_id: Option<ServerBoxId>,
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ServiceError {
    #[snafu(display("job service base URL is empty"))]
    MissingBaseUrl { stage: &'static str },
    #[snafu(display("failed to build HTTP client on `{stage}`: {source}"))]
    BuildClient {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("request to {url} failed on `{stage}`: {source}"))]
    Transport {
        stage: &'static str,
        url: String,
        source: reqwest::Error,
    },
    #[snafu(display("{url} returned status {status} on `{stage}`: {body}"))]
    HttpStatus {
        stage: &'static str,
        url: String,
        status: u16,
        body: String,
    },
    #[snafu(display("failed to decode response from {url} on `{stage}`: {source}"))]
    Decode {
        stage: &'static str,
        url: String,
        source: reqwest::Error,
    },
}

impl ServiceError {
    /// Whether repeating the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { source, .. } => !source.is_builder(),
            Self::HttpStatus { status, .. } => {
                *status == 408 || *status == 429 || (500..600).contains(status)
            }
            Self::MissingBaseUrl { .. } | Self::BuildClient { .. } | Self::Decode { .. } => false,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn stage(&self) -> &'static str {
        match self {
            Self::MissingBaseUrl { stage }
            | Self::BuildClient { stage, .. }
            | Self::Transport { stage, .. }
            | Self::HttpStatus { stage, .. }
            | Self::Decode { stage, .. } => stage,
        }
    }
}

/// Backend operations the segmentation workspace depends on.
///
/// Page numbers are passed through exactly as the backend reports them.
pub trait JobService: Send + Sync {
    /// Jobs newest first, `limit` at most, after skipping `skip`.
    fn list_jobs<'a>(&'a self, skip: usize, limit: usize) -> BoxFuture<'a, ServiceResult<Vec<Job>>>;

    fn get_job<'a>(&'a self, job_id: JobId) -> BoxFuture<'a, ServiceResult<Job>>;

    fn get_pages<'a>(&'a self, job_id: JobId) -> BoxFuture<'a, ServiceResult<Vec<PageImage>>>;

    fn get_segmentation_tasks<'a>(
        &'a self,
        job_id: JobId,
    ) -> BoxFuture<'a, ServiceResult<Vec<SegmentationTask>>>;

    /// Persisted boxes for the job. An empty list is a normal answer.
    fn get_segmentations<'a>(&'a self, job_id: JobId)
    -> BoxFuture<'a, ServiceResult<Vec<WireBox>>>;

    /// Stores `boxes` and returns the persisted rows with their server ids.
    fn submit_segmentations<'a>(
        &'a self,
        job_id: JobId,
        boxes: Vec<WireBox>,
    ) -> BoxFuture<'a, ServiceResult<Vec<WireBox>>>;

    fn request_enhancement<'a>(
        &'a self,
        job_id: JobId,
        label: String,
        region: EnhancementRegion,
    ) -> BoxFuture<'a, ServiceResult<EnhancementOffer>>;

    fn set_enhancement_preference<'a>(
        &'a self,
        job_id: JobId,
        box_id: ServerBoxId,
        use_enhanced: bool,
    ) -> BoxFuture<'a, ServiceResult<()>>;

    fn trigger_compile<'a>(&'a self, job_id: JobId) -> BoxFuture<'a, ServiceResult<()>>;

    fn fetch_page_image<'a>(&'a self, url: String) -> BoxFuture<'a, ServiceResult<Vec<u8>>>;

    /// Current TeX source. For compiled jobs this is the final source.
    fn get_tex<'a>(&'a self, job_id: JobId) -> BoxFuture<'a, ServiceResult<String>>;

    fn save_tex<'a>(&'a self, job_id: JobId, tex: String) -> BoxFuture<'a, ServiceResult<()>>;

    /// Final PDF of a compiled job.
    fn download_pdf<'a>(&'a self, job_id: JobId) -> BoxFuture<'a, ServiceResult<Vec<u8>>>;

    /// Compiles `tex` on the backend and returns the preview PDF bytes.
    fn preview_tex<'a>(
        &'a self,
        job_id: JobId,
        tex: String,
    ) -> BoxFuture<'a, ServiceResult<Vec<u8>>>;
}
