//! Speech-to-text request orchestration.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::OwnedSemaphorePermit;
use tracing::{debug, info};

use super::pool::{EngineGate, WorkerPool};
use crate::audio::{is_supported_upload_type, normalize_content_type};
use crate::engine::SpeechToText;
use crate::error::{Error, Result};
use crate::staging::StagingArea;

/// Staged uploads always carry this suffix; the engine sniffs the real container.
const STAGING_SUFFIX: &str = "wav";

/// Raw audio as received from a client.
#[derive(Debug, Clone)]
pub struct AudioUpload {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub filename: Option<String>,
}

impl AudioUpload {
    pub fn new(bytes: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            bytes,
            content_type: content_type.into(),
            filename: None,
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptionResult {
    pub text: String,
    pub language: String,
}

pub struct TranscriptionService {
    engine: Arc<dyn SpeechToText>,
    gate: EngineGate,
    staging: StagingArea,
    pool: WorkerPool,
}

impl TranscriptionService {
    pub fn new(engine: Arc<dyn SpeechToText>, staging: StagingArea, pool: WorkerPool) -> Self {
        let gate = EngineGate::new(engine.name(), engine.supports_concurrent_calls());
        Self {
            engine,
            gate,
            staging,
            pool,
        }
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    pub async fn transcribe(&self, upload: AudioUpload) -> Result<TranscriptionResult> {
        if !is_supported_upload_type(&upload.content_type) {
            return Err(Error::UnsupportedFormat(upload.content_type));
        }

        info!(
            "Transcribing {} bytes of {}{}",
            upload.bytes.len(),
            normalize_content_type(&upload.content_type),
            upload
                .filename
                .as_deref()
                .map(|name| format!(" ({name})"))
                .unwrap_or_default()
        );

        let pass = self.gate.enter().await?;
        let engine = self.engine.clone();
        let staging = self.staging.clone();
        self.pool
            .run(move || transcribe_staged(engine.as_ref(), pass, &staging, &upload.bytes))
            .await
    }
}

fn transcribe_staged(
    engine: &dyn SpeechToText,
    pass: Option<OwnedSemaphorePermit>,
    staging: &StagingArea,
    bytes: &[u8],
) -> Result<TranscriptionResult> {
    let _pass = pass;
    let started = Instant::now();
    let staged = staging.acquire(STAGING_SUFFIX)?;
    staged.write_all(bytes)?;

    let stream = engine.transcribe(staged.path())?;
    let language = stream.language;

    let mut text = String::new();
    let mut segment_count = 0usize;
    for segment in stream.segments {
        text.push_str(&segment?.text);
        segment_count += 1;
    }

    debug!(
        "Transcribed {} segments in {:.1}ms",
        segment_count,
        started.elapsed().as_secs_f64() * 1000.0
    );

    Ok(TranscriptionResult {
        text: text.trim().to_string(),
        language,
    })
}
