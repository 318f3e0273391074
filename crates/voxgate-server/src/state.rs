//! Application state shared by all handlers

use std::sync::Arc;

use tokio::sync::{Semaphore, SemaphorePermit};
use voxgate_core::RuntimeService;

use crate::error::ApiError;

const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 100;

/// Shared application state with backpressure
#[derive(Clone)]
pub struct AppState {
    /// Engines and request services, loaded once at startup
    pub runtime: Arc<RuntimeService>,
    /// Concurrency limiter to prevent resource exhaustion
    pub request_semaphore: Arc<Semaphore>,
}

impl AppState {
    pub fn new(runtime: RuntimeService) -> Self {
        let max_concurrent = std::env::var("MAX_CONCURRENT_REQUESTS")
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .filter(|n: &usize| *n > 0)
            .unwrap_or(DEFAULT_MAX_CONCURRENT_REQUESTS);

        Self::with_limit(runtime, max_concurrent)
    }

    pub fn with_limit(runtime: RuntimeService, max_concurrent: usize) -> Self {
        Self {
            runtime: Arc::new(runtime),
            request_semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Acquire a permit for concurrent request processing
    pub async fn acquire_permit(&self) -> Result<SemaphorePermit<'_>, ApiError> {
        self.request_semaphore
            .acquire()
            .await
            .map_err(|_| ApiError::internal("Server is shutting down"))
    }
}
