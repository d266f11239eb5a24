//! Scripted in-memory backend for tests.

use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use figseg_core::{Job, JobId, JobStatus, PageImage, SegmentationTask, ServerBoxId, WireBox};
use figseg_service::{
    BoxFuture, EnhancementOffer, EnhancementRegion, JobService, ServiceError, ServiceResult,
};

pub(crate) const LIST_JOBS: &str = "list-jobs";
pub(crate) const GET_JOB: &str = "get-job";
pub(crate) const GET_PAGES: &str = "get-pages";
pub(crate) const GET_TASKS: &str = "get-segmentation-tasks";
pub(crate) const GET_SEGMENTATIONS: &str = "get-segmentations";
pub(crate) const SUBMIT: &str = "submit-segmentations";
pub(crate) const ENHANCE: &str = "request-enhancement";
pub(crate) const PREFERENCE: &str = "set-enhancement-preference";
pub(crate) const COMPILE: &str = "trigger-compile";
pub(crate) const FETCH_IMAGE: &str = "fetch-page-image";
pub(crate) const GET_TEX: &str = "get-tex";
pub(crate) const SAVE_TEX: &str = "save-tex";
pub(crate) const DOWNLOAD_PDF: &str = "download-pdf";
pub(crate) const PREVIEW: &str = "preview-tex";

/// PNG of the given size, for feeding the page cache.
pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut bytes = Vec::new();
    image::RgbaImage::new(width, height)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .expect("encode png");
    bytes
}

#[derive(Default)]
struct FakeState {
    jobs: HashMap<JobId, Job>,
    pages: HashMap<JobId, Vec<PageImage>>,
    tasks: HashMap<JobId, Vec<SegmentationTask>>,
    segmentations: HashMap<JobId, Vec<WireBox>>,
    tex: HashMap<JobId, String>,
    images: HashMap<String, Vec<u8>>,
    delays: HashMap<&'static str, Duration>,
    failures: HashMap<&'static str, VecDeque<u16>>,
    calls: HashMap<&'static str, usize>,
    fetches: HashMap<String, usize>,
    submitted: Vec<Vec<WireBox>>,
    preferences: Vec<(ServerBoxId, bool)>,
    previews: Vec<String>,
    next_server_id: i64,
}

#[derive(Default)]
pub(crate) struct FakeJobService {
    state: Mutex<FakeState>,
}

impl FakeJobService {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers a job with one PNG per page and the given task labels.
    pub(crate) fn seed_job(
        &self,
        job_id: JobId,
        status: JobStatus,
        page_count: i64,
        labels: &[&str],
    ) -> Vec<PageImage> {
        let pages: Vec<_> = (0..page_count)
            .map(|number| PageImage::new(number, format!("https://pages.example/{job_id}/{number}.png")))
            .collect();
        let mut state = self.lock();
        for page in &pages {
            state.images.insert(page.image_url.clone(), png_bytes(300, 400));
        }
        state.jobs.insert(job_id, Job::new(job_id, status));
        state.pages.insert(job_id, pages.clone());
        state.tasks.insert(
            job_id,
            labels
                .iter()
                .map(|label| SegmentationTask::new(*label, format!("{label} region")))
                .collect(),
        );
        state.tex.insert(job_id, "\\documentclass{article}".to_string());
        pages
    }

    pub(crate) fn set_status(&self, job_id: JobId, status: JobStatus) {
        if let Some(job) = self.lock().jobs.get_mut(&job_id) {
            job.status = status;
        }
    }

    pub(crate) fn set_segmentations(&self, job_id: JobId, boxes: Vec<WireBox>) {
        self.lock().segmentations.insert(job_id, boxes);
    }

    pub(crate) fn set_image(&self, url: &str, bytes: Vec<u8>) {
        self.lock().images.insert(url.to_string(), bytes);
    }

    pub(crate) fn set_fetch_delay(&self, delay: Duration) {
        self.set_delay(FETCH_IMAGE, delay);
    }

    pub(crate) fn set_delay(&self, operation: &'static str, delay: Duration) {
        self.lock().delays.insert(operation, delay);
    }

    /// Makes the next call of `operation` fail with `status`.
    pub(crate) fn fail_next(&self, operation: &'static str, status: u16) {
        self.lock()
            .failures
            .entry(operation)
            .or_default()
            .push_back(status);
    }

    pub(crate) fn calls(&self, operation: &'static str) -> usize {
        self.lock().calls.get(operation).copied().unwrap_or(0)
    }

    pub(crate) fn fetch_count(&self, url: &str) -> usize {
        self.lock().fetches.get(url).copied().unwrap_or(0)
    }

    pub(crate) fn submitted(&self) -> Vec<Vec<WireBox>> {
        self.lock().submitted.clone()
    }

    pub(crate) fn preferences(&self) -> Vec<(ServerBoxId, bool)> {
        self.lock().preferences.clone()
    }

    pub(crate) fn previews(&self) -> Vec<String> {
        self.lock().previews.clone()
    }

    pub(crate) fn tex(&self, job_id: JobId) -> Option<String> {
        self.lock().tex.get(&job_id).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn enter(&self, operation: &'static str) -> ServiceResult<()> {
        let (delay, failure) = {
            let mut state = self.lock();
            *state.calls.entry(operation).or_default() += 1;
            let delay = state.delays.get(operation).copied();
            let failure = state
                .failures
                .get_mut(operation)
                .and_then(VecDeque::pop_front);
            (delay, failure)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match failure {
            Some(status) => Err(ServiceError::HttpStatus {
                stage: operation,
                url: format!("fake://{operation}"),
                status,
                body: "scripted failure".to_string(),
            }),
            None => Ok(()),
        }
    }

    fn not_found(operation: &'static str, what: String) -> ServiceError {
        Self::rejected(operation, 404, format!("{what} not found"))
    }

    fn rejected(operation: &'static str, status: u16, body: String) -> ServiceError {
        ServiceError::HttpStatus {
            stage: operation,
            url: format!("fake://{operation}"),
            status,
            body,
        }
    }

    fn status_of(&self, operation: &'static str, job_id: JobId) -> ServiceResult<JobStatus> {
        self.lock()
            .jobs
            .get(&job_id)
            .map(|job| job.status)
            .ok_or_else(|| Self::not_found(operation, format!("job {job_id}")))
    }
}

impl JobService for FakeJobService {
    fn list_jobs<'a>(&'a self, skip: usize, limit: usize) -> BoxFuture<'a, ServiceResult<Vec<Job>>> {
        Box::pin(async move {
            self.enter(LIST_JOBS).await?;
            let mut jobs: Vec<Job> = self.lock().jobs.values().cloned().collect();
            jobs.sort_by_key(|job| job.id.to_string());
            Ok(jobs.into_iter().skip(skip).take(limit).collect())
        })
    }

    fn get_job<'a>(&'a self, job_id: JobId) -> BoxFuture<'a, ServiceResult<Job>> {
        Box::pin(async move {
            self.enter(GET_JOB).await?;
            self.lock()
                .jobs
                .get(&job_id)
                .cloned()
                .ok_or_else(|| Self::not_found(GET_JOB, format!("job {job_id}")))
        })
    }

    fn get_pages<'a>(&'a self, job_id: JobId) -> BoxFuture<'a, ServiceResult<Vec<PageImage>>> {
        Box::pin(async move {
            self.enter(GET_PAGES).await?;
            Ok(self.lock().pages.get(&job_id).cloned().unwrap_or_default())
        })
    }

    fn get_segmentation_tasks<'a>(
        &'a self,
        job_id: JobId,
    ) -> BoxFuture<'a, ServiceResult<Vec<SegmentationTask>>> {
        Box::pin(async move {
            self.enter(GET_TASKS).await?;
            Ok(self.lock().tasks.get(&job_id).cloned().unwrap_or_default())
        })
    }

    fn get_segmentations<'a>(
        &'a self,
        job_id: JobId,
    ) -> BoxFuture<'a, ServiceResult<Vec<WireBox>>> {
        Box::pin(async move {
            self.enter(GET_SEGMENTATIONS).await?;
            Ok(self
                .lock()
                .segmentations
                .get(&job_id)
                .cloned()
                .unwrap_or_default())
        })
    }

    fn submit_segmentations<'a>(
        &'a self,
        job_id: JobId,
        boxes: Vec<WireBox>,
    ) -> BoxFuture<'a, ServiceResult<Vec<WireBox>>> {
        Box::pin(async move {
            self.enter(SUBMIT).await?;
            let mut state = self.lock();
            state.submitted.push(boxes.clone());

            let mut persisted = Vec::with_capacity(boxes.len());
            for mut row in boxes {
                state.next_server_id += 1;
                row.id = Some(ServerBoxId::new(state.next_server_id));
                persisted.push(row);
            }
            // Storing rows leaves the job status alone.
            state.segmentations.insert(job_id, persisted.clone());
            Ok(persisted)
        })
    }

    fn request_enhancement<'a>(
        &'a self,
        job_id: JobId,
        label: String,
        _region: EnhancementRegion,
    ) -> BoxFuture<'a, ServiceResult<EnhancementOffer>> {
        Box::pin(async move {
            self.enter(ENHANCE).await?;
            Ok(EnhancementOffer {
                original_url: format!("https://assets.example/{job_id}/{label}-original.png"),
                enhanced_url: format!("https://assets.example/{job_id}/{label}-enhanced.png"),
                asset_ref: Some(format!("enhanced/{job_id}/{label}.png")),
                box_id: None,
                label,
            })
        })
    }

    fn set_enhancement_preference<'a>(
        &'a self,
        _job_id: JobId,
        box_id: ServerBoxId,
        use_enhanced: bool,
    ) -> BoxFuture<'a, ServiceResult<()>> {
        Box::pin(async move {
            self.enter(PREFERENCE).await?;
            self.lock().preferences.push((box_id, use_enhanced));
            Ok(())
        })
    }

    fn trigger_compile<'a>(&'a self, job_id: JobId) -> BoxFuture<'a, ServiceResult<()>> {
        Box::pin(async move {
            self.enter(COMPILE).await?;
            let status = self.status_of(COMPILE, job_id)?;
            if !matches!(
                status,
                JobStatus::AwaitingSegmentation | JobStatus::SegmentationComplete
            ) {
                return Err(Self::rejected(
                    COMPILE,
                    400,
                    format!("job status is '{status}'"),
                ));
            }
            if let Some(job) = self.lock().jobs.get_mut(&job_id) {
                job.status = JobStatus::CompilationPending;
            }
            Ok(())
        })
    }

    fn fetch_page_image<'a>(&'a self, url: String) -> BoxFuture<'a, ServiceResult<Vec<u8>>> {
        Box::pin(async move {
            *self.lock().fetches.entry(url.clone()).or_default() += 1;
            self.enter(FETCH_IMAGE).await?;
            self.lock()
                .images
                .get(&url)
                .cloned()
                .ok_or_else(|| Self::not_found(FETCH_IMAGE, url))
        })
    }

    fn get_tex<'a>(&'a self, job_id: JobId) -> BoxFuture<'a, ServiceResult<String>> {
        Box::pin(async move {
            self.enter(GET_TEX).await?;
            self.lock()
                .tex
                .get(&job_id)
                .cloned()
                .ok_or_else(|| Self::not_found(GET_TEX, format!("tex for {job_id}")))
        })
    }

    fn save_tex<'a>(&'a self, job_id: JobId, tex: String) -> BoxFuture<'a, ServiceResult<()>> {
        Box::pin(async move {
            self.enter(SAVE_TEX).await?;
            self.lock().tex.insert(job_id, tex);
            Ok(())
        })
    }

    fn download_pdf<'a>(&'a self, job_id: JobId) -> BoxFuture<'a, ServiceResult<Vec<u8>>> {
        Box::pin(async move {
            self.enter(DOWNLOAD_PDF).await?;
            let status = self.status_of(DOWNLOAD_PDF, job_id)?;
            if status != JobStatus::CompilationComplete {
                return Err(Self::rejected(
                    DOWNLOAD_PDF,
                    409,
                    format!("final PDF not available while '{status}'"),
                ));
            }
            Ok(format!("%PDF-1.7 final {job_id}").into_bytes())
        })
    }

    fn preview_tex<'a>(
        &'a self,
        _job_id: JobId,
        tex: String,
    ) -> BoxFuture<'a, ServiceResult<Vec<u8>>> {
        Box::pin(async move {
            self.enter(PREVIEW).await?;
            self.lock().previews.push(tex.clone());
            Ok(format!("%PDF-1.7 {}", tex.len()).into_bytes())
        })
    }
}
