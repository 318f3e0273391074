//! `POST /stt`: multipart audio upload to transcript.

use axum::extract::multipart::MultipartRejection;
use axum::extract::{Extension, Multipart, State};
use axum::Json;
use tracing::debug;
use voxgate_core::{AudioUpload, TranscriptionResult};

use crate::api::request_context::RequestContext;
use crate::error::ApiError;
use crate::state::AppState;

pub async fn transcribe(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<TranscriptionResult>, ApiError> {
    let mut multipart =
        multipart.map_err(|e| ApiError::bad_request(format!("Invalid multipart payload: {e}")))?;
    let upload = read_upload(&mut multipart).await?;

    debug!(
        correlation_id = %ctx.correlation_id,
        "STT upload of {} bytes as {}",
        upload.bytes.len(),
        upload.content_type
    );

    let _permit = state.acquire_permit().await?;
    let result = state.runtime.transcribe(upload).await?;
    Ok(Json(result))
}

/// Take the first `file` (or `audio`) field; other fields are ignored.
async fn read_upload(multipart: &mut Multipart) -> Result<AudioUpload, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Failed reading multipart field: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name != "file" && name != "audio" {
            continue;
        }

        let filename = field.file_name().map(|value| value.to_string());
        let content_type = field.content_type().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("Failed reading '{name}' bytes: {e}")))?;

        let upload = AudioUpload::new(bytes.to_vec(), content_type);
        return Ok(match filename {
            Some(filename) => upload.with_filename(filename),
            None => upload,
        });
    }

    Err(ApiError::bad_request("Missing audio file (`file` field)"))
}
