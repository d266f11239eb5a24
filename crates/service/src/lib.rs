use std::sync::Arc;

mod http;
mod service;

pub use http::HttpJobService;
pub use service::{
    BoxFuture, DEFAULT_API_BASE_URL, DEFAULT_REQUEST_TIMEOUT, EnhancementOffer, EnhancementRegion,
    JobService, ServiceConfig, ServiceError, ServiceResult,
};

pub fn create_service(config: ServiceConfig) -> ServiceResult<Arc<dyn JobService>> {
    let service = HttpJobService::new(config)?;
    tracing::info!(base_url = %service.config().base_url, "job service ready");
    Ok(Arc::new(service))
}
