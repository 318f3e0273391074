//! Runtime service: the engines and the services built on them, constructed once.

use std::sync::Arc;

use tracing::info;

use super::pool::WorkerPool;
use super::synthesis::{SynthesisRequest, SynthesisResult, SynthesisService};
use super::transcription::{AudioUpload, TranscriptionResult, TranscriptionService};
use crate::audio::{NativeTranscoder, Transcoder};
use crate::config::EngineConfig;
use crate::engine::EngineSet;
use crate::error::Result;
use crate::staging::StagingArea;

/// Shared, immutable runtime. Hold it behind an `Arc`.
pub struct RuntimeService {
    config: EngineConfig,
    engines: EngineSet,
    staging: StagingArea,
    pool: WorkerPool,
    transcription: TranscriptionService,
    synthesis: SynthesisService,
}

impl RuntimeService {
    /// Load the configured engines and build the runtime around them.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let engines = EngineSet::load(&config)?;
        Self::with_engines(config, engines)
    }

    pub fn with_engines(config: EngineConfig, engines: EngineSet) -> Result<Self> {
        let transcoder = Arc::new(NativeTranscoder::new(config.codec.mp3_bitrate_kbps));
        Self::with_parts(config, engines, transcoder)
    }

    pub fn with_parts(
        config: EngineConfig,
        engines: EngineSet,
        transcoder: Arc<dyn Transcoder>,
    ) -> Result<Self> {
        let staging = StagingArea::new(config.staging_dir.clone())?;
        let pool = WorkerPool::new(config.worker_threads);

        let transcription =
            TranscriptionService::new(engines.stt.clone(), staging.clone(), pool.clone());
        let synthesis = SynthesisService::new(
            engines.tts.clone(),
            transcoder,
            staging.clone(),
            pool.clone(),
        );

        info!(
            "Runtime ready: staging at {}, {} worker slots",
            staging.root().display(),
            pool.max_workers()
        );

        Ok(Self {
            config,
            engines,
            staging,
            pool,
            transcription,
            synthesis,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn engines(&self) -> &EngineSet {
        &self.engines
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub async fn transcribe(&self, upload: AudioUpload) -> Result<TranscriptionResult> {
        self.transcription.transcribe(upload).await
    }

    /// Validate raw client fields, filling in the configured default voice.
    pub fn synthesis_request(
        &self,
        text: Option<String>,
        voice: Option<String>,
        format: Option<String>,
    ) -> Result<SynthesisRequest> {
        SynthesisRequest::from_parts(text, voice, format, &self.config.tts.default_voice)
    }

    pub async fn synthesize(&self, request: SynthesisRequest) -> Result<SynthesisResult> {
        self.synthesis.synthesize(request).await
    }
}
