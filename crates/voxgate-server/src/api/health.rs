use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub whisper: bool,
    pub kokoro: bool,
}

/// Liveness probe. Engines load before the listener binds, so a running
/// server always reports both as loaded.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        whisper: true,
        kokoro: true,
    })
}
