//! The segmentation workspace for one job at a time.
//!
//! `Workspace` is the only owner of annotation state. Service calls run as
//! spawned tasks and report back as [`WorkspaceEvent`]s which the owner feeds
//! to [`Workspace::handle_event`] on a single task. Events from a job or epoch
//! that is no longer open are dropped without touching state.

use std::future::Future;
use std::sync::Arc;

use figseg_core::{
    AnnotationEngine, BoxId, BoxPatch, Capabilities, DrawContext, DrawOutcome, DrawingSession,
    Job, JobId, JobStatus, MissingDrawContext, PageImage, PixelRect, PointerEvent,
    RenderedGeometry, SegmentationProgress, SegmentationTask, Size, WireBox,
};
use figseg_service::{
    EnhancementOffer, EnhancementRegion, JobService, ServiceError, ServiceResult,
};
use snafu::{OptionExt, ensure};
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};

use super::cache::{CacheStats, LoadedPage, PageImageCache};
use super::download::{Download, DownloadKind};
use super::enhancement::{
    ChoiceRejection, EnhancementSelector, EnhancementSelectors, EnhancementTicket, PendingChoice,
    Resolution,
};
use super::error::{
    CompileInFlightSnafu, NoJobSnafu, NoOfferSnafu, NoRegionSnafu, NotAllowedSnafu,
    SubmitInFlightSnafu, UnknownBoxSnafu, UnknownLabelSnafu, WorkspaceResult,
};
use super::event::{LoadedJob, RequestContext, WorkspaceEvent};
use super::notice::Notice;
use super::preview::PreviewDebouncer;
use super::settings::WorkspaceSettings;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    Loading,
    Ready,
    Failed { message: String, retryable: bool },
}

pub struct Workspace {
    service: Arc<dyn JobService>,
    settings: Arc<WorkspaceSettings>,
    events_tx: mpsc::UnboundedSender<WorkspaceEvent>,
    events_rx: mpsc::UnboundedReceiver<WorkspaceEvent>,
    tasks: Vec<JoinHandle<()>>,
    epoch: u64,
    active: Option<RequestContext>,
    load_state: LoadState,
    cache: PageImageCache,
    job: Option<Job>,
    pages: Vec<PageImage>,
    segmentation_tasks: Vec<SegmentationTask>,
    current_page: Option<usize>,
    page_image: Option<Arc<LoadedPage>>,
    selected_task: Option<String>,
    container: Option<Size>,
    engine: AnnotationEngine,
    drawing: DrawingSession,
    enhancements: EnhancementSelectors,
    submit_in_flight: Option<u64>,
    last_submitted_revision: Option<u64>,
    compile_in_flight: bool,
    status_refreshes: u64,
    status_applied: u64,
    preview: PreviewDebouncer,
    tex_edited: bool,
    tex_saved_revision: Option<u64>,
    download: Option<Download>,
    notices: Vec<Notice>,
}

impl Workspace {
    pub fn new(service: Arc<dyn JobService>, settings: Arc<WorkspaceSettings>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            cache: PageImageCache::new(Arc::clone(&service)),
            drawing: DrawingSession::new(settings.draw_thresholds()),
            preview: PreviewDebouncer::new(settings.preview_debounce()),
            service,
            settings,
            events_tx,
            events_rx,
            tasks: Vec::new(),
            epoch: 0,
            active: None,
            load_state: LoadState::Idle,
            job: None,
            pages: Vec::new(),
            segmentation_tasks: Vec::new(),
            current_page: None,
            page_image: None,
            selected_task: None,
            container: None,
            engine: AnnotationEngine::new(),
            enhancements: EnhancementSelectors::new(),
            submit_in_flight: None,
            last_submitted_revision: None,
            compile_in_flight: false,
            status_refreshes: 0,
            status_applied: 0,
            tex_edited: false,
            tex_saved_revision: None,
            download: None,
            notices: Vec::new(),
        }
    }

    // Lifecycle.

    /// Abandons whatever is open and starts loading `job_id`.
    pub fn open_job(&mut self, job_id: JobId) {
        self.abandon_session();
        let context = RequestContext {
            job_id,
            epoch: self.epoch,
        };
        self.active = Some(context);
        tracing::info!(job_id = %job_id, epoch = self.epoch, "opening job");
        self.spawn_load(context);
    }

    /// Restarts the initial load after a failure.
    pub fn retry_load(&mut self) -> bool {
        let Some(context) = self.active else {
            return false;
        };
        if !matches!(self.load_state, LoadState::Failed { .. }) {
            return false;
        }
        tracing::info!(job_id = %context.job_id, "retrying job load");
        self.spawn_load(context);
        true
    }

    pub fn close(&mut self) {
        if let Some(context) = self.active {
            if self.has_unsaved_tex() {
                tracing::warn!(job_id = %context.job_id, "closing job with unsaved TeX edits");
            }
            tracing::info!(job_id = %context.job_id, "closing job");
        }
        self.abandon_session();
        self.active = None;
    }

    fn abandon_session(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.cache.close();
        self.cache = PageImageCache::new(Arc::clone(&self.service));
        self.epoch += 1;

        self.load_state = LoadState::Idle;
        self.job = None;
        self.pages.clear();
        self.segmentation_tasks.clear();
        self.current_page = None;
        self.page_image = None;
        self.selected_task = None;
        self.engine.clear();
        self.drawing.cancel();
        self.enhancements.clear();
        self.submit_in_flight = None;
        self.last_submitted_revision = None;
        self.compile_in_flight = false;
        self.preview.reset();
        self.tex_edited = false;
        self.tex_saved_revision = None;
        self.download = None;
        self.notices.clear();
    }

    fn spawn_load(&mut self, context: RequestContext) {
        self.load_state = LoadState::Loading;
        let service = Arc::clone(&self.service);
        self.spawn_event(async move {
            let job_id = context.job_id;
            let result = futures::try_join!(
                service.get_job(job_id),
                service.get_pages(job_id),
                service.get_segmentation_tasks(job_id),
                service.get_segmentations(job_id),
            )
            .map(|(job, pages, tasks, boxes)| LoadedJob {
                job,
                pages,
                tasks,
                boxes,
            });
            WorkspaceEvent::JobLoaded { context, result }
        });
    }

    /// Polls the job status. Returns the refresh's sequence number; an
    /// answer older than one already applied is dropped.
    pub fn refresh_status(&mut self) -> Option<u64> {
        let context = self.active?;
        self.status_refreshes += 1;
        let sequence = self.status_refreshes;
        let service = Arc::clone(&self.service);
        self.spawn_event(async move {
            let result = service.get_job(context.job_id).await;
            WorkspaceEvent::StatusRefreshed {
                context,
                sequence,
                result,
            }
        });
        Some(sequence)
    }

    // Navigation.

    pub fn select_page(&mut self, index: usize) -> bool {
        let Some(context) = self.active else {
            return false;
        };
        let Some(page) = self.pages.get(index).cloned() else {
            return false;
        };

        self.drawing.cancel();
        self.current_page = Some(index);
        self.page_image = self.cache.peek(&page.image_url);
        if self.page_image.is_none() {
            let cache = self.cache.clone();
            self.spawn_event(async move {
                let loaded = cache.request(&page.image_url).await;
                WorkspaceEvent::PageImageLoaded {
                    context,
                    page_number: page.page_number,
                    page: loaded,
                }
            });
        }

        self.cache.prefetch_window(
            &self.pages,
            index,
            self.settings.prefetch_behind,
            self.settings.prefetch_ahead,
        );
        true
    }

    pub fn select_task(&mut self, label: &str) -> bool {
        if !self
            .segmentation_tasks
            .iter()
            .any(|task| task.placeholder == label)
        {
            return false;
        }
        self.selected_task = Some(label.to_string());
        true
    }

    /// Records the size of the area the page image is laid out in.
    pub fn resize_container(&mut self, container: Size) {
        if self.container == Some(container) {
            return;
        }
        // Gesture points are in the old layout's pixels.
        self.drawing.cancel();
        self.container = Some(container);
    }

    /// Letterbox geometry for the current page, recomputed on every call.
    pub fn geometry(&self) -> Option<RenderedGeometry> {
        let natural = self.page_image.as_ref()?.natural_size;
        RenderedGeometry::fit(natural, self.container?)
    }

    // Annotation.

    pub fn pointer(&mut self, event: PointerEvent) -> DrawOutcome {
        if !self.capabilities().can_segment {
            self.drawing.cancel();
            return DrawOutcome::Ignored;
        }

        let page_number = self
            .page_image
            .as_ref()
            .and_then(|_| self.current_page())
            .map(|page| page.page_number);
        let context = DrawContext {
            geometry: self.geometry(),
            label: self.selected_task.as_deref(),
            page_number,
        };
        let outcome = self.drawing.handle(event, context);

        match &outcome {
            DrawOutcome::Committed(draft) => {
                let id = self.engine.add(draft.clone());
                tracing::info!(
                    box_id = %id,
                    label = %draft.label,
                    page_number = draft.page_number,
                    pointer = ?event.kind,
                    "region marked"
                );
            }
            DrawOutcome::Rejected(rejection) => {
                tracing::debug!(rejection = %rejection, "gesture rejected");
                self.notices.push(Notice::info(rejection.to_string()));
            }
            DrawOutcome::MissingContext(missing) => {
                let message = match missing {
                    MissingDrawContext::Task => "select a task before marking a region",
                    MissingDrawContext::Page => "wait for the page image to load",
                    MissingDrawContext::TaskAndPage => {
                        "select a task and wait for the page image to load"
                    }
                };
                self.notices.push(Notice::warning(message));
            }
            DrawOutcome::Ignored | DrawOutcome::Started | DrawOutcome::Updated => {}
        }
        outcome
    }

    pub fn remove_box(&mut self, box_id: BoxId) -> WorkspaceResult<()> {
        self.ensure_can_segment("remove-box", "remove regions")?;
        self.engine.remove(box_id).context(UnknownBoxSnafu {
            stage: "remove-box",
            box_id,
        })?;
        tracing::info!(box_id = %box_id, "region removed");
        Ok(())
    }

    /// Sends the current collection and, once it is stored, asks the backend
    /// to compile the final document. Returns the revision being submitted.
    pub fn submit(&mut self) -> WorkspaceResult<u64> {
        let stage = "submit";
        let context = self.active.context(NoJobSnafu { stage })?;
        self.ensure_can_segment(stage, "submit segmentations")?;
        if let Some(revision) = self.submit_in_flight {
            return SubmitInFlightSnafu { stage, revision }.fail();
        }
        ensure!(!self.compile_in_flight, CompileInFlightSnafu { stage });

        let snapshot = self.engine.snapshot();
        let revision = snapshot.revision;
        self.submit_in_flight = Some(revision);
        tracing::info!(
            job_id = %context.job_id,
            revision,
            boxes = snapshot.boxes.len(),
            "submitting segmentations"
        );

        let service = Arc::clone(&self.service);
        self.spawn_event(async move {
            let result = service
                .submit_segmentations(context.job_id, snapshot.boxes)
                .await;
            WorkspaceEvent::SubmitFinished {
                context,
                revision,
                result,
            }
        });
        Ok(revision)
    }

    pub fn trigger_compile(&mut self) -> WorkspaceResult<()> {
        let stage = "trigger-compile";
        let context = self.active.context(NoJobSnafu { stage })?;
        let status = self.status();
        ensure!(
            self.capabilities().can_compile,
            NotAllowedSnafu {
                stage,
                action: "compile",
                status,
            }
        );
        ensure!(!self.compile_in_flight, CompileInFlightSnafu { stage });

        self.spawn_compile(context);
        Ok(())
    }

    fn spawn_compile(&mut self, context: RequestContext) {
        self.compile_in_flight = true;
        tracing::info!(job_id = %context.job_id, "requesting final compilation");
        let service = Arc::clone(&self.service);
        self.spawn_event(async move {
            let result = service.trigger_compile(context.job_id).await;
            WorkspaceEvent::CompileFinished { context, result }
        });
    }

    // Enhancement.

    /// Requests an enhanced crop for the first region marked with `label`.
    pub fn request_enhancement(&mut self, label: &str) -> WorkspaceResult<EnhancementTicket> {
        let box_id = self
            .engine
            .boxes_for_label(label)
            .next()
            .map(|bounding_box| bounding_box.id)
            .context(NoRegionSnafu {
                stage: "request-enhancement",
                label,
            })?;
        self.request_enhancement_for(box_id)
    }

    /// Requests an enhanced crop of one region. The choice made afterwards
    /// applies to this box only.
    pub fn request_enhancement_for(&mut self, box_id: BoxId) -> WorkspaceResult<EnhancementTicket> {
        let stage = "request-enhancement";
        let context = self.active.context(NoJobSnafu { stage })?;
        self.ensure_can_segment(stage, "request enhancements")?;
        let bounding_box = self
            .engine
            .get(box_id)
            .context(UnknownBoxSnafu { stage, box_id })?;

        let label = bounding_box.label.clone();
        let region = EnhancementRegion::new(bounding_box.page_number, bounding_box.rect);
        let ticket = self.enhancements.begin_request(&label, box_id);
        tracing::info!(label = %label, box_id = %box_id, ticket = ticket.value(), "requesting enhancement");

        let service = Arc::clone(&self.service);
        self.spawn_event(async move {
            let result = service
                .request_enhancement(context.job_id, label.clone(), region)
                .await;
            WorkspaceEvent::EnhancementFinished {
                context,
                label,
                ticket,
                result,
            }
        });
        Ok(ticket)
    }

    /// Chooses between the original and the enhanced crop for the box behind
    /// `label`'s latest offer.
    ///
    /// Boxes already known to the backend are updated locally once the
    /// preference write returns, whether or not it succeeded, unless a newer
    /// choice for the same box was made meanwhile.
    pub fn choose_enhancement(&mut self, label: &str, use_enhanced: bool) -> WorkspaceResult<()> {
        let stage = "choose-enhancement";
        let context = self.active.context(NoJobSnafu { stage })?;
        self.ensure_can_segment(stage, "choose enhancements")?;

        let target = self
            .enhancements
            .get(label)
            .map(EnhancementSelector::target)
            .context(UnknownLabelSnafu { stage, label })?;
        let server_id = self
            .engine
            .get(target)
            .context(UnknownBoxSnafu {
                stage,
                box_id: target,
            })?
            .server_id;

        let choice = self
            .enhancements
            .choose(label, use_enhanced)
            .map_err(|rejection| match rejection {
                ChoiceRejection::UnknownLabel => UnknownLabelSnafu { stage, label }.build(),
                ChoiceRejection::NoOffer => NoOfferSnafu { stage, label }.build(),
            })?;

        let Some(server_id) = server_id else {
            self.enhancements.settle_choice(&choice);
            self.apply_choice(label, &choice);
            return Ok(());
        };

        let service = Arc::clone(&self.service);
        let label = label.to_string();
        self.spawn_event(async move {
            let result = service
                .set_enhancement_preference(context.job_id, server_id, choice.use_enhanced)
                .await;
            WorkspaceEvent::PreferencePersisted {
                context,
                label,
                choice,
                result,
            }
        });
        Ok(())
    }

    fn apply_choice(&mut self, label: &str, choice: &PendingChoice) {
        let patch = BoxPatch {
            use_enhanced: Some(choice.use_enhanced),
            // Choosing the original without an offer keeps any stored asset.
            enhanced_asset_ref: choice.asset_ref.clone().map(Some),
            server_id: None,
        };
        if self.engine.update_box(choice.target, &patch) {
            tracing::info!(
                label,
                box_id = %choice.target,
                use_enhanced = choice.use_enhanced,
                "enhancement choice applied"
            );
        } else {
            tracing::debug!(label, box_id = %choice.target, "enhancement target no longer exists");
        }
    }

    // Source editing.

    pub fn load_tex(&mut self) -> WorkspaceResult<()> {
        let stage = "load-tex";
        let context = self.active.context(NoJobSnafu { stage })?;
        self.ensure_can_view_tex(stage)?;
        let service = Arc::clone(&self.service);
        self.spawn_event(async move {
            let result = service.get_tex(context.job_id).await;
            WorkspaceEvent::TexLoaded { context, result }
        });
        Ok(())
    }

    /// Replaces the TeX source and schedules a preview after the quiet period.
    pub fn edit_tex(&mut self, source: impl Into<String>) -> WorkspaceResult<u64> {
        let stage = "edit-tex";
        let context = self.active.context(NoJobSnafu { stage })?;
        self.ensure_can_view_tex(stage)?;

        let revision = self.preview.edit(source.into());
        self.tex_edited = true;
        let delay = self.preview.delay();
        let timer = self.spawn_event(async move {
            tokio::time::sleep(delay).await;
            WorkspaceEvent::PreviewDue { context, revision }
        });
        self.preview.arm(timer);
        Ok(revision)
    }

    /// Stores the current TeX source on the backend. Returns the revision
    /// being saved.
    pub fn save_tex(&mut self) -> WorkspaceResult<u64> {
        let stage = "save-tex";
        let context = self.active.context(NoJobSnafu { stage })?;
        self.ensure_can_view_tex(stage)?;

        let revision = self.preview.revision();
        let source = self.preview.source().to_string();
        tracing::info!(job_id = %context.job_id, revision, bytes = source.len(), "saving tex source");
        let service = Arc::clone(&self.service);
        self.spawn_event(async move {
            let result = service.save_tex(context.job_id, source).await;
            WorkspaceEvent::TexSaved {
                context,
                revision,
                result,
            }
        });
        Ok(revision)
    }

    // Downloads.

    pub fn download_pdf(&mut self) -> WorkspaceResult<()> {
        let stage = "download-pdf";
        let context = self.active.context(NoJobSnafu { stage })?;
        let job = self.job.clone().context(NoJobSnafu { stage })?;
        ensure!(
            job.status.capabilities().can_download_pdf,
            NotAllowedSnafu {
                stage,
                action: "download the PDF",
                status: job.status,
            }
        );

        let kind = DownloadKind::Pdf;
        let service = Arc::clone(&self.service);
        self.spawn_event(async move {
            let result = service
                .download_pdf(context.job_id)
                .await
                .map(|bytes| Download {
                    kind,
                    file_name: kind.file_name(&job),
                    bytes,
                });
            WorkspaceEvent::DownloadFinished {
                context,
                kind,
                result,
            }
        });
        Ok(())
    }

    pub fn download_tex(&mut self) -> WorkspaceResult<()> {
        let stage = "download-tex";
        let context = self.active.context(NoJobSnafu { stage })?;
        let job = self.job.clone().context(NoJobSnafu { stage })?;
        ensure!(
            job.status.capabilities().can_download_tex,
            NotAllowedSnafu {
                stage,
                action: "download the TeX source",
                status: job.status,
            }
        );

        let kind = DownloadKind::Tex;
        let service = Arc::clone(&self.service);
        self.spawn_event(async move {
            let result = service
                .get_tex(context.job_id)
                .await
                .map(|source| Download {
                    kind,
                    file_name: kind.file_name(&job),
                    bytes: source.into_bytes(),
                });
            WorkspaceEvent::DownloadFinished {
                context,
                kind,
                result,
            }
        });
        Ok(())
    }

    // Events.

    pub async fn next_event(&mut self) -> Option<WorkspaceEvent> {
        self.events_rx.recv().await
    }

    pub fn try_next_event(&mut self) -> Option<WorkspaceEvent> {
        self.events_rx.try_recv().ok()
    }

    /// Handles every event already delivered. Returns how many were applied.
    pub fn drain_events(&mut self) -> usize {
        let mut applied = 0;
        while let Some(event) = self.try_next_event() {
            if self.handle_event(event) {
                applied += 1;
            }
        }
        applied
    }

    /// Applies `event`. Returns false when it belongs to abandoned state.
    pub fn handle_event(&mut self, event: WorkspaceEvent) -> bool {
        let context = event.context();
        if self.active != Some(context) {
            tracing::debug!(
                event = event.name(),
                job_id = %context.job_id,
                epoch = context.epoch,
                current_epoch = self.epoch,
                "discarding event for an abandoned job session"
            );
            return false;
        }

        match event {
            WorkspaceEvent::JobLoaded { result, .. } => self.on_job_loaded(context, result),
            WorkspaceEvent::StatusRefreshed {
                sequence, result, ..
            } => self.on_status_refreshed(sequence, result),
            WorkspaceEvent::PageImageLoaded {
                page_number, page, ..
            } => self.on_page_image_loaded(page_number, page),
            WorkspaceEvent::SubmitFinished {
                revision, result, ..
            } => self.on_submit_finished(context, revision, result),
            WorkspaceEvent::CompileFinished { result, .. } => self.on_compile_finished(result),
            WorkspaceEvent::EnhancementFinished {
                label,
                ticket,
                result,
                ..
            } => self.on_enhancement_finished(&label, ticket, result),
            WorkspaceEvent::PreferencePersisted {
                label,
                choice,
                result,
                ..
            } => self.on_preference_persisted(&label, choice, result),
            WorkspaceEvent::TexLoaded { result, .. } => self.on_tex_loaded(result),
            WorkspaceEvent::TexSaved {
                revision, result, ..
            } => self.on_tex_saved(revision, result),
            WorkspaceEvent::DownloadFinished { kind, result, .. } => {
                self.on_download_finished(kind, result)
            }
            WorkspaceEvent::PreviewDue { revision, .. } => self.on_preview_due(context, revision),
            WorkspaceEvent::PreviewFinished {
                revision, result, ..
            } => self.preview.finish(revision, result.map_err(|error| error.to_string())),
        }
    }

    fn on_job_loaded(&mut self, context: RequestContext, result: ServiceResult<LoadedJob>) -> bool {
        let loaded = match result {
            Ok(loaded) => loaded,
            Err(error) => {
                tracing::error!(job_id = %context.job_id, error = %error, "failed to load job");
                self.load_state = LoadState::Failed {
                    message: error.to_string(),
                    retryable: error.is_retryable(),
                };
                return true;
            }
        };

        let LoadedJob {
            job,
            pages,
            mut tasks,
            boxes,
        } = loaded;
        if tasks.is_empty() {
            tasks = job.segmentation_tasks.clone();
        }

        let valid_boxes: Vec<WireBox> = boxes
            .into_iter()
            .filter(|row| match row.validate() {
                Ok(()) => true,
                Err(error) => {
                    tracing::warn!(error = %error, "skipping persisted region");
                    false
                }
            })
            .collect();

        tracing::info!(
            job_id = %context.job_id,
            status = %job.status,
            pages = pages.len(),
            tasks = tasks.len(),
            boxes = valid_boxes.len(),
            "job loaded"
        );

        self.engine.overwrite(valid_boxes);
        self.last_submitted_revision = Some(self.engine.revision());
        if !job.status.capabilities().can_segment {
            self.notices.push(Notice::info(format!(
                "job is {}; regions are read-only",
                job.status
            )));
        }
        self.job = Some(job);
        self.pages = pages;
        self.segmentation_tasks = tasks;
        self.selected_task = self
            .segmentation_tasks
            .first()
            .map(|task| task.placeholder.clone());
        self.load_state = LoadState::Ready;
        if !self.pages.is_empty() {
            self.select_page(0);
        }
        true
    }

    fn on_status_refreshed(&mut self, sequence: u64, result: ServiceResult<Job>) -> bool {
        if sequence <= self.status_applied {
            tracing::debug!(
                sequence,
                applied = self.status_applied,
                "discarding out-of-order status refresh"
            );
            return false;
        }
        match result {
            Ok(job) => {
                self.status_applied = sequence;
                let previous = self.status();
                if previous != job.status {
                    tracing::info!(from = %previous, to = %job.status, "job status changed");
                }
                if !job.status.capabilities().can_segment {
                    self.drawing.cancel();
                }
                self.job = Some(job);
            }
            Err(error) => {
                tracing::warn!(error = %error, "failed to refresh job status");
                self.notices
                    .push(Notice::warning(format!("could not refresh job status: {error}")));
            }
        }
        true
    }

    fn on_page_image_loaded(&mut self, page_number: i64, page: Option<Arc<LoadedPage>>) -> bool {
        let Some(current) = self.current_page() else {
            return false;
        };
        if current.page_number != page_number {
            tracing::debug!(page_number, current = current.page_number, "page image arrived after navigation");
            return false;
        }

        if page.is_none() {
            self.notices.push(Notice::warning(format!(
                "page {page_number} could not be loaded"
            )));
        }
        self.page_image = page;
        true
    }

    fn on_submit_finished(
        &mut self,
        context: RequestContext,
        revision: u64,
        result: ServiceResult<Vec<WireBox>>,
    ) -> bool {
        self.submit_in_flight = None;
        match result {
            Ok(persisted) => {
                if !self.engine.reconcile_server_ids(revision, &persisted) {
                    tracing::debug!(
                        revision,
                        current = self.engine.revision(),
                        "regions changed during submit, server ids not attached"
                    );
                }
                self.last_submitted_revision = Some(revision);
                tracing::info!(revision, persisted = persisted.len(), "segmentations saved");
                self.notices.push(Notice::info(format!(
                    "saved {} regions",
                    persisted.len()
                )));
                // Storing rows leaves the status alone; compiling moves the job on.
                if !self.compile_in_flight {
                    self.spawn_compile(context);
                }
            }
            Err(error) => {
                tracing::warn!(revision, error = %error, "submit failed, keeping local regions");
                self.notices.push(Notice::warning(submit_failure_message(&error)));
            }
        }
        true
    }

    fn on_compile_finished(&mut self, result: ServiceResult<()>) -> bool {
        self.compile_in_flight = false;
        match result {
            Ok(()) => {
                self.notices.push(Notice::info("compilation started"));
                self.refresh_status();
            }
            Err(error) => {
                tracing::warn!(error = %error, "compile request failed");
                self.notices
                    .push(Notice::warning(format!("could not start compilation: {error}")));
            }
        }
        true
    }

    fn on_enhancement_finished(
        &mut self,
        label: &str,
        ticket: EnhancementTicket,
        result: ServiceResult<EnhancementOffer>,
    ) -> bool {
        let failed = result.as_ref().err().map(ToString::to_string);
        let outcome = result.map_err(|error| error.to_string());
        if self.enhancements.resolve_request(label, ticket, outcome) == Resolution::Superseded {
            tracing::debug!(label, ticket = ticket.value(), "discarding superseded enhancement");
            return false;
        }

        if let Some(message) = failed {
            tracing::warn!(label, error = %message, "enhancement failed");
            self.notices
                .push(Notice::warning(format!("enhancement of {label} failed: {message}")));
        } else {
            tracing::info!(label, "enhancement ready");
        }
        true
    }

    fn on_preference_persisted(
        &mut self,
        label: &str,
        choice: PendingChoice,
        result: ServiceResult<()>,
    ) -> bool {
        if self.enhancements.settle_choice(&choice) == Resolution::Superseded {
            tracing::debug!(label, box_id = %choice.target, "newer choice exists for this box");
            return false;
        }

        if let Err(error) = result {
            tracing::warn!(
                label,
                box_id = %choice.target,
                error = %error,
                "enhancement preference was not saved, keeping local choice"
            );
            self.notices.push(Notice::warning(format!(
                "choice for {label} was not saved: {error}"
            )));
        }
        self.apply_choice(label, &choice);
        true
    }

    fn on_tex_loaded(&mut self, result: ServiceResult<String>) -> bool {
        match result {
            Ok(source) => {
                tracing::debug!(bytes = source.len(), "tex source loaded");
                self.preview.load(source);
                self.tex_edited = false;
                self.tex_saved_revision = Some(self.preview.revision());
            }
            Err(error) => {
                tracing::warn!(error = %error, "failed to load tex source");
                self.notices
                    .push(Notice::warning(format!("could not load TeX source: {error}")));
            }
        }
        true
    }

    fn on_tex_saved(&mut self, revision: u64, result: ServiceResult<()>) -> bool {
        match result {
            Ok(()) => {
                if self.tex_saved_revision.is_some_and(|saved| saved > revision) {
                    tracing::debug!(revision, "older tex save finished after a newer one");
                    return false;
                }
                self.tex_saved_revision = Some(revision);
                self.notices.push(Notice::info("TeX source saved"));
            }
            Err(error) => {
                tracing::warn!(revision, error = %error, "failed to save tex source");
                self.notices
                    .push(Notice::warning(format!("TeX source was not saved: {error}")));
            }
        }
        true
    }

    fn on_download_finished(&mut self, kind: DownloadKind, result: ServiceResult<Download>) -> bool {
        match result {
            Ok(download) => {
                tracing::info!(
                    kind = kind.as_str(),
                    file_name = %download.file_name,
                    bytes = download.bytes.len(),
                    "download ready"
                );
                self.download = Some(download);
            }
            Err(error) => {
                tracing::warn!(kind = kind.as_str(), error = %error, "download failed");
                self.notices.push(Notice::warning(format!(
                    "could not download the {}: {error}",
                    kind.as_str()
                )));
            }
        }
        true
    }

    fn on_preview_due(&mut self, context: RequestContext, revision: u64) -> bool {
        let Some(source) = self.preview.due(revision) else {
            tracing::debug!(revision, "preview timer fired for an older revision");
            return false;
        };
        let service = Arc::clone(&self.service);
        self.spawn_event(async move {
            let result = service.preview_tex(context.job_id, source).await;
            WorkspaceEvent::PreviewFinished {
                context,
                revision,
                result,
            }
        });
        true
    }

    fn spawn_event<F>(&mut self, work: F) -> AbortHandle
    where
        F: Future<Output = WorkspaceEvent> + Send + 'static,
    {
        let events = self.events_tx.clone();
        let handle = tokio::spawn(async move {
            let event = work.await;
            if events.send(event).is_err() {
                tracing::debug!("workspace dropped before event delivery");
            }
        });
        let abort = handle.abort_handle();
        self.tasks.retain(|task| !task.is_finished());
        self.tasks.push(handle);
        abort
    }

    fn ensure_can_segment(&self, stage: &'static str, action: &'static str) -> WorkspaceResult<()> {
        ensure!(
            self.capabilities().can_segment,
            NotAllowedSnafu {
                stage,
                action,
                status: self.status(),
            }
        );
        Ok(())
    }

    fn ensure_can_view_tex(&self, stage: &'static str) -> WorkspaceResult<()> {
        ensure!(
            self.capabilities().can_view_tex,
            NotAllowedSnafu {
                stage,
                action: "edit TeX",
                status: self.status(),
            }
        );
        Ok(())
    }

    // Read access.

    pub fn active_context(&self) -> Option<RequestContext> {
        self.active
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn load_state(&self) -> &LoadState {
        &self.load_state
    }

    pub fn job(&self) -> Option<&Job> {
        self.job.as_ref()
    }

    /// `Unknown` until a job has loaded.
    pub fn status(&self) -> JobStatus {
        self.job
            .as_ref()
            .map(|job| job.status)
            .unwrap_or(JobStatus::Unknown)
    }

    pub fn capabilities(&self) -> Capabilities {
        self.status().capabilities()
    }

    pub fn pages(&self) -> &[PageImage] {
        &self.pages
    }

    pub fn current_page_index(&self) -> Option<usize> {
        self.current_page
    }

    pub fn current_page(&self) -> Option<&PageImage> {
        self.pages.get(self.current_page?)
    }

    pub fn page_image(&self) -> Option<&Arc<LoadedPage>> {
        self.page_image.as_ref()
    }

    pub fn segmentation_tasks(&self) -> &[SegmentationTask] {
        &self.segmentation_tasks
    }

    pub fn selected_task(&self) -> Option<&str> {
        self.selected_task.as_deref()
    }

    pub fn engine(&self) -> &AnnotationEngine {
        &self.engine
    }

    pub fn drawing(&self) -> &DrawingSession {
        &self.drawing
    }

    pub fn progress(&self) -> SegmentationProgress {
        SegmentationProgress::compute(&self.segmentation_tasks, self.engine.completed_labels())
    }

    /// Stored regions of the current page, in container pixels.
    pub fn overlays(&self) -> Vec<(BoxId, PixelRect)> {
        let (Some(geometry), Some(page)) = (self.geometry(), self.current_page()) else {
            return Vec::new();
        };
        self.engine
            .boxes_for_page(page.page_number)
            .map(|bounding_box| (bounding_box.id, geometry.to_pixel_rect(&bounding_box.rect)))
            .collect()
    }

    pub fn enhancement(&self, label: &str) -> Option<&EnhancementSelector> {
        self.enhancements.get(label)
    }

    pub fn preview(&self) -> &PreviewDebouncer {
        &self.preview
    }

    pub fn is_submitting(&self) -> bool {
        self.submit_in_flight.is_some()
    }

    pub fn is_compiling(&self) -> bool {
        self.compile_in_flight
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.last_submitted_revision != Some(self.engine.revision())
    }

    /// Whether TeX edits were made since the source was loaded or saved.
    pub fn has_unsaved_tex(&self) -> bool {
        self.tex_edited && self.tex_saved_revision != Some(self.preview.revision())
    }

    pub fn download(&self) -> Option<&Download> {
        self.download.as_ref()
    }

    pub fn take_download(&mut self) -> Option<Download> {
        self.download.take()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.cache.close();
    }
}

fn submit_failure_message(error: &ServiceError) -> String {
    if error.is_retryable() {
        format!("regions were not saved, try again: {error}")
    } else {
        format!("regions were not saved: {error}")
    }
}
