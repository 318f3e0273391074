//! `POST /tts`: JSON text to base64 audio.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, State};
use axum::Json;
use serde::Deserialize;
use tracing::debug;
use voxgate_core::SynthesisResult;

use crate::api::request_context::RequestContext;
use crate::error::ApiError;
use crate::state::AppState;

/// Request body. Absent fields take their defaults; a missing `text` counts as empty.
#[derive(Debug, Default, Deserialize)]
pub struct TtsRequestBody {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
}

pub async fn synthesize(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    body: Result<Json<TtsRequestBody>, JsonRejection>,
) -> Result<Json<SynthesisResult>, ApiError> {
    let Json(body) =
        body.map_err(|e| ApiError::bad_request(format!("Invalid JSON payload: {e}")))?;
    let request = state
        .runtime
        .synthesis_request(body.text, body.voice, body.format)?;

    debug!(
        correlation_id = %ctx.correlation_id,
        "TTS request for voice {} as {}",
        request.voice,
        request.format.tag()
    );

    let _permit = state.acquire_permit().await?;
    let result = state.runtime.synthesize(request).await?;
    Ok(Json(result))
}
