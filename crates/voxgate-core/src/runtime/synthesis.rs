//! Text-to-speech request orchestration: chunk assembly, staging, transcoding.

use std::sync::Arc;

use base64::Engine as _;
use serde::Serialize;
use tokio::sync::OwnedSemaphorePermit;
use tracing::{debug, info};

use super::pool::{EngineGate, WorkerPool};
use crate::audio::{write_wav_pcm16, OutputFormat, Transcoder};
use crate::engine::{ChunkStream, TextToSpeech};
use crate::error::{Error, Result};
use crate::staging::StagingArea;

/// A validated synthesis request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisRequest {
    pub text: String,
    pub voice: String,
    pub format: OutputFormat,
}

impl SynthesisRequest {
    /// Build a request from optional client fields, resolving defaults.
    ///
    /// Only a missing or empty `text` is rejected. Voice and format are passed on verbatim.
    pub fn from_parts(
        text: Option<String>,
        voice: Option<String>,
        format: Option<String>,
        default_voice: &str,
    ) -> Result<Self> {
        let text = text.unwrap_or_default();
        if text.is_empty() {
            return Err(Error::MissingText);
        }

        Ok(Self {
            text,
            voice: voice.unwrap_or_else(|| default_voice.to_string()),
            format: format.map(OutputFormat::parse).unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SynthesisResult {
    pub status: &'static str,
    pub audio_base64: String,
    pub format: String,
}

pub struct SynthesisService {
    engine: Arc<dyn TextToSpeech>,
    gate: EngineGate,
    transcoder: Arc<dyn Transcoder>,
    staging: StagingArea,
    pool: WorkerPool,
}

impl SynthesisService {
    pub fn new(
        engine: Arc<dyn TextToSpeech>,
        transcoder: Arc<dyn Transcoder>,
        staging: StagingArea,
        pool: WorkerPool,
    ) -> Self {
        let gate = EngineGate::new(engine.name(), engine.supports_concurrent_calls());
        Self {
            engine,
            gate,
            transcoder,
            staging,
            pool,
        }
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    /// Synthesize `request` into a base64 container in the requested format.
    ///
    /// Every failure past validation is reported as [`Error::SynthesisFailure`]
    /// carrying the underlying message, after all staging files are released.
    pub async fn synthesize(&self, request: SynthesisRequest) -> Result<SynthesisResult> {
        if request.text.is_empty() {
            return Err(Error::MissingText);
        }

        info!(
            "Synthesizing {} chars with voice '{}' as '{}'",
            request.text.chars().count(),
            request.voice,
            request.format.tag()
        );

        let pass = self
            .gate
            .enter()
            .await
            .map_err(|err| Error::SynthesisFailure(err.to_string()))?;
        let engine = self.engine.clone();
        let transcoder = self.transcoder.clone();
        let staging = self.staging.clone();
        let format_tag = request.format.tag().to_string();

        let encoded = self
            .pool
            .run(move || {
                render(
                    engine.as_ref(),
                    pass,
                    transcoder.as_ref(),
                    &staging,
                    &request,
                )
            })
            .await
            .map_err(|err| Error::SynthesisFailure(err.to_string()))?;

        Ok(SynthesisResult {
            status: "success",
            audio_base64: base64::engine::general_purpose::STANDARD.encode(&encoded),
            format: format_tag,
        })
    }
}

/// Engine pass is held only while the engine produces chunks; encoding runs without it.
fn render(
    engine: &dyn TextToSpeech,
    pass: Option<OwnedSemaphorePermit>,
    transcoder: &dyn Transcoder,
    staging: &StagingArea,
    request: &SynthesisRequest,
) -> Result<Vec<u8>> {
    let samples = {
        let _pass = pass;
        assemble_chunks(engine.synthesize(&request.text, &request.voice)?)?
    };

    let wav = staging.acquire("wav")?;
    write_wav_pcm16(wav.path(), &samples, engine.sample_rate())?;

    let output = staging.acquire(request.format.tag())?;
    transcoder.transcode(wav.path(), output.path(), &request.format)?;

    let encoded = output.read_all()?;
    debug!(
        "Encoded {} samples into {} '{}' bytes",
        samples.len(),
        encoded.len(),
        request.format.tag()
    );
    Ok(encoded)
}

/// Concatenate chunk samples in the order the engine yields them.
fn assemble_chunks(chunks: ChunkStream<'_>) -> Result<Vec<f32>> {
    let mut samples = Vec::new();
    let mut chunk_count = 0usize;
    for chunk in chunks {
        samples.extend_from_slice(&chunk?.samples);
        chunk_count += 1;
    }

    if chunk_count == 0 {
        return Err(Error::Inference("TTS engine produced no audio".to_string()));
    }
    debug!("Assembled {} chunks, {} samples", chunk_count, samples.len());
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{read_wav_pcm16, NativeTranscoder};
    use crate::runtime::test_support::{FailingTranscoder, FakeTts};
    use crate::staging::tests::{dir_entries, temp_area};

    fn service(
        engine: Arc<FakeTts>,
        transcoder: Arc<dyn Transcoder>,
        staging: &StagingArea,
    ) -> SynthesisService {
        SynthesisService::new(engine, transcoder, staging.clone(), WorkerPool::new(2))
    }

    fn decode(result: &SynthesisResult) -> Vec<u8> {
        base64::engine::general_purpose::STANDARD
            .decode(&result.audio_base64)
            .unwrap()
    }

    fn request(text: &str, format: Option<&str>) -> SynthesisRequest {
        SynthesisRequest::from_parts(
            Some(text.to_string()),
            None,
            format.map(str::to_string),
            "af_heart",
        )
        .unwrap()
    }

    #[test]
    fn from_parts_resolves_defaults_and_rejects_empty_text() {
        let req = SynthesisRequest::from_parts(Some("hi".into()), None, None, "af_heart").unwrap();
        assert_eq!(req.voice, "af_heart");
        assert_eq!(req.format.tag(), "mp3");

        let req = SynthesisRequest::from_parts(
            Some("hi".into()),
            Some("bm_george".into()),
            Some("wav".into()),
            "af_heart",
        )
        .unwrap();
        assert_eq!(req.voice, "bm_george");
        assert_eq!(req.format.tag(), "wav");

        assert!(matches!(
            SynthesisRequest::from_parts(None, None, None, "af_heart"),
            Err(Error::MissingText)
        ));
        assert!(matches!(
            SynthesisRequest::from_parts(Some(String::new()), None, None, "af_heart"),
            Err(Error::MissingText)
        ));
    }

    #[tokio::test]
    async fn chunks_are_concatenated_in_order() {
        let staging = temp_area("tts-order");
        let engine = Arc::new(FakeTts::new(vec![
            vec![0.1, 0.2],
            vec![-0.3],
            vec![0.4, 0.5, 0.6],
        ]));
        let service = service(engine.clone(), Arc::new(NativeTranscoder::default()), &staging);

        let result = service.synthesize(request("Hello.", Some("wav"))).await.unwrap();
        assert_eq!(result.status, "success");
        assert_eq!(result.format, "wav");

        let path = std::env::temp_dir()
            .join(format!("voxgate-order-{}.wav", uuid::Uuid::new_v4()));
        std::fs::write(&path, decode(&result)).unwrap();
        let audio = read_wav_pcm16(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        let expected: Vec<i16> = [0.1f32, 0.2, -0.3, 0.4, 0.5, 0.6]
            .into_iter()
            .map(crate::audio::f32_to_i16)
            .collect();
        assert_eq!(audio.sample_rate, 24_000);
        assert_eq!(audio.samples, expected);
        assert_eq!(engine.calls(), vec![("Hello.".to_string(), "af_heart".to_string())]);

        assert!(dir_entries(&staging).is_empty());
        std::fs::remove_dir_all(staging.root()).unwrap();
    }

    #[tokio::test]
    async fn default_format_is_mp3() {
        let staging = temp_area("tts-mp3");
        let engine = Arc::new(FakeTts::new(vec![vec![0.25; 4800], vec![-0.25; 4800]]));
        let service = service(engine, Arc::new(NativeTranscoder::default()), &staging);

        let result = service.synthesize(request("Hi there", None)).await.unwrap();
        assert_eq!(result.format, "mp3");

        let bytes = decode(&result);
        let frame_sync = bytes.len() > 1 && bytes[0] == 0xFF && (bytes[1] & 0xE0) == 0xE0;
        assert!(frame_sync || bytes.starts_with(b"ID3"));

        assert!(dir_entries(&staging).is_empty());
        std::fs::remove_dir_all(staging.root()).unwrap();
    }

    #[tokio::test]
    async fn unknown_format_falls_back_to_wav_and_echoes_tag() {
        let staging = temp_area("tts-flac");
        let engine = Arc::new(FakeTts::new(vec![vec![0.0; 240]]));
        let service = service(engine, Arc::new(NativeTranscoder::default()), &staging);

        let result = service.synthesize(request("x", Some("flac"))).await.unwrap();
        assert_eq!(result.format, "flac");
        assert!(decode(&result).starts_with(b"RIFF"));
        std::fs::remove_dir_all(staging.root()).unwrap();
    }

    #[tokio::test]
    async fn engine_error_becomes_synthesis_failure() {
        let staging = temp_area("tts-engine-fail");
        let engine = Arc::new(FakeTts::failing("boom"));
        let service = service(engine, Arc::new(NativeTranscoder::default()), &staging);

        let err = service.synthesize(request("Hello.", None)).await.unwrap_err();
        assert!(matches!(err, Error::SynthesisFailure(ref msg) if msg == "boom"));
        assert!(dir_entries(&staging).is_empty());
        std::fs::remove_dir_all(staging.root()).unwrap();
    }

    #[tokio::test]
    async fn empty_engine_output_is_a_failure() {
        let staging = temp_area("tts-empty");
        let service = service(
            Arc::new(FakeTts::new(Vec::new())),
            Arc::new(NativeTranscoder::default()),
            &staging,
        );

        let err = service.synthesize(request("Hello.", None)).await.unwrap_err();
        assert_eq!(err.to_string(), "TTS engine produced no audio");
        std::fs::remove_dir_all(staging.root()).unwrap();
    }

    #[tokio::test]
    async fn transcode_failure_releases_both_staging_files() {
        let staging = temp_area("tts-transcode-fail");
        let transcoder = Arc::new(FailingTranscoder::default());
        let service = service(
            Arc::new(FakeTts::new(vec![vec![0.5; 10]])),
            transcoder.clone(),
            &staging,
        );

        let err = service.synthesize(request("Hello.", Some("mp3"))).await.unwrap_err();
        assert!(matches!(err, Error::SynthesisFailure(_)));

        let (src, dst) = transcoder.last_paths().unwrap();
        assert_eq!(src.extension().unwrap(), "wav");
        assert_eq!(dst.extension().unwrap(), "mp3");
        assert!(!src.exists() && !dst.exists());
        assert!(dir_entries(&staging).is_empty());
        assert_eq!(staging.outstanding(), 0);
        std::fs::remove_dir_all(staging.root()).unwrap();
    }

    #[tokio::test]
    async fn wav_stage_failure_releases_without_output_file() {
        let staging = temp_area("tts-wav-fail");
        let transcoder = Arc::new(FailingTranscoder::default());
        let service = service(
            Arc::new(FakeTts::new(vec![vec![0.5; 10]]).with_sample_rate(0)),
            transcoder.clone(),
            &staging,
        );

        let err = service.synthesize(request("Hello.", Some("mp3"))).await.unwrap_err();
        assert!(matches!(err, Error::SynthesisFailure(ref msg) if msg.contains("sample rate")));

        assert!(transcoder.last_paths().is_none());
        assert!(dir_entries(&staging).is_empty());
        assert_eq!(staging.outstanding(), 0);
        std::fs::remove_dir_all(staging.root()).unwrap();
    }

    #[tokio::test]
    async fn validation_failure_allocates_nothing() {
        let staging = temp_area("tts-validate");
        let engine = Arc::new(FakeTts::new(vec![vec![0.1]]));
        let service = service(engine.clone(), Arc::new(NativeTranscoder::default()), &staging);

        let bad = SynthesisRequest {
            text: String::new(),
            voice: "af_heart".into(),
            format: OutputFormat::default(),
        };
        assert!(matches!(
            service.synthesize(bad).await,
            Err(Error::MissingText)
        ));
        assert!(engine.calls().is_empty());
        assert!(dir_entries(&staging).is_empty());
        std::fs::remove_dir_all(staging.root()).unwrap();
    }
}
