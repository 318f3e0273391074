use axum::extract::{DefaultBodyLimit, Request};
use axum::routing::{get, post};
use axum::{middleware, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info_span;

use crate::api::request_context::{attach_request_context, RequestContext};
use crate::api::{health, stt, tts};
use crate::state::AppState;

const AUDIO_UPLOAD_LIMIT_BYTES: usize = 64 * 1024 * 1024;

/// Create the main API router.
pub fn create_router(state: AppState) -> Router {
    // Runs inside `attach_request_context`, so minted ids are already in the extensions.
    let trace_layer = TraceLayer::new_for_http().make_span_with(|request: &Request| {
        let correlation_id = request
            .extensions()
            .get::<RequestContext>()
            .map(|ctx| ctx.correlation_id.as_str())
            .unwrap_or("-");
        info_span!(
            "http_request",
            method = %request.method(),
            uri = %request.uri(),
            correlation_id = %correlation_id
        )
    });

    Router::new()
        .route("/", get(health::health))
        .route(
            "/stt",
            post(stt::transcribe).layer(DefaultBodyLimit::max(AUDIO_UPLOAD_LIMIT_BYTES)),
        )
        .route("/tts", post(tts::synthesize))
        .layer(trace_layer)
        .layer(middleware::from_fn(attach_request_context))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
