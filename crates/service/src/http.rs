use figseg_core::{Job, JobId, PageImage, SegmentationTask, ServerBoxId, WireBox};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, ensure};

use super::service::{
    BoxFuture, BuildClientSnafu, DecodeSnafu, EnhancementOffer, EnhancementRegion,
    HttpStatusSnafu, JobService, MissingBaseUrlSnafu, ServiceConfig, ServiceResult,
    TransportSnafu,
};

/// Longest response body excerpt kept in an error.
const ERROR_BODY_LIMIT: usize = 2_000;

#[derive(Deserialize)]
struct PagesEnvelope {
    pages: Vec<PageImage>,
}

#[derive(Deserialize)]
struct TasksEnvelope {
    tasks: Vec<SegmentationTask>,
}

#[derive(Serialize)]
struct EnhanceBody<'a> {
    label: &'a str,
    #[serde(flatten)]
    region: &'a EnhancementRegion,
}

#[derive(Serialize)]
struct PreferenceBody {
    use_enhanced: bool,
}

/// [`JobService`] backed by the REST API.
pub struct HttpJobService {
    config: ServiceConfig,
    client: Client,
}

impl HttpJobService {
    pub fn new(config: ServiceConfig) -> ServiceResult<Self> {
        ensure!(
            !config.base_url.is_empty(),
            MissingBaseUrlSnafu {
                stage: "http-service-new",
            }
        );

        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context(BuildClientSnafu {
                stage: "http-service-build-client",
            })?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    fn job_url(&self, job_id: JobId, suffix: &str) -> String {
        format!("{}/jobs/{}{}", self.config.base_url, job_id, suffix)
    }

    fn jobs_url(&self, skip: usize, limit: usize) -> String {
        format!("{}/jobs?skip={skip}&limit={limit}", self.config.base_url)
    }

    async fn send(
        &self,
        stage: &'static str,
        url: &str,
        request: RequestBuilder,
    ) -> ServiceResult<Response> {
        let response = request.send().await.context(TransportSnafu {
            stage,
            url: url.to_string(),
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        // Best effort: an unreadable error body still reports the status.
        let mut body = response.text().await.unwrap_or_default();
        if body.len() > ERROR_BODY_LIMIT {
            let mut cut = ERROR_BODY_LIMIT;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }

        tracing::warn!(
            stage,
            url = %url,
            status = status.as_u16(),
            "job service returned an error status"
        );

        HttpStatusSnafu {
            stage,
            url: url.to_string(),
            status: status.as_u16(),
            body,
        }
        .fail()
    }

    async fn get_json<T>(&self, stage: &'static str, url: String) -> ServiceResult<T>
    where
        T: DeserializeOwned,
    {
        let response = self.send(stage, &url, self.client.get(&url)).await?;
        response.json::<T>().await.context(DecodeSnafu { stage, url })
    }
}

impl JobService for HttpJobService {
    fn list_jobs<'a>(&'a self, skip: usize, limit: usize) -> BoxFuture<'a, ServiceResult<Vec<Job>>> {
        Box::pin(async move { self.get_json("list-jobs", self.jobs_url(skip, limit)).await })
    }

    fn get_job<'a>(&'a self, job_id: JobId) -> BoxFuture<'a, ServiceResult<Job>> {
        Box::pin(async move {
            self.get_json("get-job-status", self.job_url(job_id, "/status"))
                .await
        })
    }

    fn get_pages<'a>(&'a self, job_id: JobId) -> BoxFuture<'a, ServiceResult<Vec<PageImage>>> {
        Box::pin(async move {
            let envelope: PagesEnvelope = self
                .get_json("get-pages", self.job_url(job_id, "/pages"))
                .await?;
            let mut pages = envelope.pages;
            pages.sort_by_key(|page| page.page_number);
            Ok(pages)
        })
    }

    fn get_segmentation_tasks<'a>(
        &'a self,
        job_id: JobId,
    ) -> BoxFuture<'a, ServiceResult<Vec<SegmentationTask>>> {
        Box::pin(async move {
            let envelope: TasksEnvelope = self
                .get_json(
                    "get-segmentation-tasks",
                    self.job_url(job_id, "/segmentation-tasks"),
                )
                .await?;
            Ok(envelope.tasks)
        })
    }

    fn get_segmentations<'a>(
        &'a self,
        job_id: JobId,
    ) -> BoxFuture<'a, ServiceResult<Vec<WireBox>>> {
        Box::pin(async move {
            self.get_json("get-segmentations", self.job_url(job_id, "/segmentations"))
                .await
        })
    }

    fn submit_segmentations<'a>(
        &'a self,
        job_id: JobId,
        boxes: Vec<WireBox>,
    ) -> BoxFuture<'a, ServiceResult<Vec<WireBox>>> {
        Box::pin(async move {
            let stage = "submit-segmentations";
            let url = self.job_url(job_id, "/segmentations");
            let box_count = boxes.len();
            let response = self
                .send(stage, &url, self.client.post(&url).json(&boxes))
                .await?;
            let persisted = response
                .json::<Vec<WireBox>>()
                .await
                .context(DecodeSnafu { stage, url })?;
            tracing::info!(
                job_id = %job_id,
                submitted = box_count,
                persisted = persisted.len(),
                "segmentations submitted"
            );
            Ok(persisted)
        })
    }

    fn request_enhancement<'a>(
        &'a self,
        job_id: JobId,
        label: String,
        region: EnhancementRegion,
    ) -> BoxFuture<'a, ServiceResult<EnhancementOffer>> {
        Box::pin(async move {
            let stage = "request-enhancement";
            let url = self.job_url(job_id, "/enhance");
            let body = EnhanceBody {
                label: &label,
                region: &region,
            };
            let response = self
                .send(stage, &url, self.client.post(&url).json(&body))
                .await?;
            response
                .json::<EnhancementOffer>()
                .await
                .context(DecodeSnafu { stage, url })
        })
    }

    fn set_enhancement_preference<'a>(
        &'a self,
        job_id: JobId,
        box_id: ServerBoxId,
        use_enhanced: bool,
    ) -> BoxFuture<'a, ServiceResult<()>> {
        Box::pin(async move {
            let url = self.job_url(job_id, &format!("/segmentations/{box_id}/use-enhanced"));
            let request = self
                .client
                .patch(&url)
                .json(&PreferenceBody { use_enhanced });
            self.send("set-enhancement-preference", &url, request)
                .await?;
            Ok(())
        })
    }

    fn trigger_compile<'a>(&'a self, job_id: JobId) -> BoxFuture<'a, ServiceResult<()>> {
        Box::pin(async move {
            let url = self.job_url(job_id, "/compile");
            self.send("trigger-compile", &url, self.client.post(&url))
                .await?;
            tracing::info!(job_id = %job_id, "final compilation requested");
            Ok(())
        })
    }

    fn fetch_page_image<'a>(&'a self, url: String) -> BoxFuture<'a, ServiceResult<Vec<u8>>> {
        Box::pin(async move {
            let stage = "fetch-page-image";
            let response = self.send(stage, &url, self.client.get(&url)).await?;
            let bytes = response
                .bytes()
                .await
                .context(DecodeSnafu { stage, url })?;
            Ok(bytes.to_vec())
        })
    }

    fn get_tex<'a>(&'a self, job_id: JobId) -> BoxFuture<'a, ServiceResult<String>> {
        Box::pin(async move {
            let stage = "get-tex";
            let url = self.job_url(job_id, "/tex");
            let response = self.send(stage, &url, self.client.get(&url)).await?;
            response.text().await.context(DecodeSnafu { stage, url })
        })
    }

    fn save_tex<'a>(&'a self, job_id: JobId, tex: String) -> BoxFuture<'a, ServiceResult<()>> {
        Box::pin(async move {
            let url = self.job_url(job_id, "/tex");
            let bytes = tex.len();
            let request = self
                .client
                .put(&url)
                .header(reqwest::header::CONTENT_TYPE, "text/plain")
                .body(tex);
            self.send("save-tex", &url, request).await?;
            tracing::info!(job_id = %job_id, bytes, "tex source saved");
            Ok(())
        })
    }

    fn download_pdf<'a>(&'a self, job_id: JobId) -> BoxFuture<'a, ServiceResult<Vec<u8>>> {
        Box::pin(async move {
            let stage = "download-pdf";
            let url = self.job_url(job_id, "/pdf");
            let response = self.send(stage, &url, self.client.get(&url)).await?;
            let bytes = response
                .bytes()
                .await
                .context(DecodeSnafu { stage, url })?;
            Ok(bytes.to_vec())
        })
    }

    fn preview_tex<'a>(
        &'a self,
        job_id: JobId,
        tex: String,
    ) -> BoxFuture<'a, ServiceResult<Vec<u8>>> {
        Box::pin(async move {
            let stage = "preview-tex";
            let url = self.job_url(job_id, "/preview");
            let request = self
                .client
                .post(&url)
                .header(reqwest::header::CONTENT_TYPE, "text/plain")
                .body(tex);
            let response = self.send(stage, &url, request).await?;
            let bytes = response
                .bytes()
                .await
                .context(DecodeSnafu { stage, url })?;
            Ok(bytes.to_vec())
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::ServiceError;

    #[test]
    fn empty_base_url_is_rejected() {
        let result = HttpJobService::new(ServiceConfig::new("  ", Duration::from_secs(1)));
        assert!(matches!(result, Err(ServiceError::MissingBaseUrl { .. })));
    }

    #[test]
    fn job_urls_are_rooted_at_base() {
        let service = HttpJobService::new(ServiceConfig::new(
            "http://localhost:8000/",
            Duration::from_secs(1),
        ))
        .expect("client");
        let job_id = JobId::parse("4f9c5a52-1b7e-4a8e-9d3f-2a7c6b1e0d11").expect("uuid");
        assert_eq!(
            service.job_url(job_id, "/segmentation-tasks"),
            "http://localhost:8000/jobs/4f9c5a52-1b7e-4a8e-9d3f-2a7c6b1e0d11/segmentation-tasks"
        );
    }

    #[test]
    fn job_listing_carries_paging() {
        let service = HttpJobService::new(ServiceConfig::new(
            "http://localhost:8000",
            Duration::from_secs(1),
        ))
        .expect("client");
        assert_eq!(
            service.jobs_url(20, 10),
            "http://localhost:8000/jobs?skip=20&limit=10"
        );
    }

    #[test]
    fn listed_jobs_decode_from_backend_rows() {
        let jobs: Vec<Job> = serde_json::from_str(
            r#"[{"id":"4f9c5a52-1b7e-4a8e-9d3f-2a7c6b1e0d11","status":"compilation_complete",
                 "input_pdf_filename":"paper.pdf","created_at":"2025-01-02T03:04:05",
                 "final_pdf_s3_path":"jobs/x/final.pdf"}]"#,
        )
        .expect("job rows");
        assert_eq!(jobs.len(), 1);
        assert!(jobs[0].status.capabilities().can_download_pdf);
        assert_eq!(jobs[0].display_name(), "paper");
    }

    #[test]
    fn enhance_body_flattens_region() {
        let region = EnhancementRegion {
            page_number: 0,
            x: 0.1,
            y: 0.1,
            width: 0.2,
            height: 0.2,
        };
        let body = EnhanceBody {
            label: "DIAGRAM-1",
            region: &region,
        };
        let json = serde_json::to_value(&body).expect("serialize");
        assert_eq!(json["label"], "DIAGRAM-1");
        assert_eq!(json["page_number"], 0);
        assert_eq!(json["width"], 0.2);
    }

    #[tokio::test]
    async fn unreachable_backend_surfaces_retryable_transport_error() {
        let service = HttpJobService::new(ServiceConfig::new(
            "http://127.0.0.1:9",
            Duration::from_millis(500),
        ))
        .expect("client");
        let job_id = JobId::new_v4();
        let error = service.get_pages(job_id).await.expect_err("nothing listens on port 9");
        assert!(matches!(error, ServiceError::Transport { .. }));
        assert!(error.is_retryable());
    }
}
