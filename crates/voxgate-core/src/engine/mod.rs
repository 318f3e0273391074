//! Inference engine interfaces and the adapters the runtime loads at startup.
//!
//! Engines are opaque collaborators: the runtime only sees an ordered stream of
//! transcript segments (STT) or sample chunks (TTS). Both traits are synchronous
//! and are always driven from the blocking worker pool.

mod bridge;
#[cfg(feature = "whisper")]
mod whisper;

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::config::{EngineConfig, SttBackend, TtsBackend};
use crate::error::{Error, Result};

pub use bridge::{
    BridgeEvent, BridgeRequest, BridgeSpeechToText, BridgeTextToSpeech, ProcessBridge,
};
#[cfg(feature = "whisper")]
pub use whisper::WhisperSpeechToText;

/// Output rate of the TTS engine. Chunks are concatenated without resampling.
pub const TTS_SAMPLE_RATE: u32 = 24_000;

/// One unit of recognized speech.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptSegment {
    pub text: String,
    /// Segment start, in seconds from the beginning of the audio.
    pub start: f32,
    pub end: f32,
}

/// Lazily produced STT output for one audio file.
pub struct SegmentStream<'a> {
    /// Detected language for the whole file.
    pub language: String,
    pub segments: Box<dyn Iterator<Item = Result<TranscriptSegment>> + Send + 'a>,
}

impl<'a> SegmentStream<'a> {
    pub fn from_segments(language: impl Into<String>, segments: Vec<TranscriptSegment>) -> Self {
        Self {
            language: language.into(),
            segments: Box::new(segments.into_iter().map(Ok)),
        }
    }
}

impl std::fmt::Debug for SegmentStream<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentStream")
            .field("language", &self.language)
            .finish_non_exhaustive()
    }
}

/// One unit of synthesized speech, in generation order.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisChunk {
    pub graphemes: String,
    pub phonemes: String,
    /// Mono samples in [-1, 1] at the engine's sample rate.
    pub samples: Vec<f32>,
}

pub type ChunkStream<'a> = Box<dyn Iterator<Item = Result<SynthesisChunk>> + Send + 'a>;

pub trait SpeechToText: Send + Sync {
    fn name(&self) -> &str;

    /// Engines that can run several calls at once skip the runtime's per-engine gate.
    fn supports_concurrent_calls(&self) -> bool {
        false
    }

    fn transcribe(&self, audio_path: &Path) -> Result<SegmentStream<'_>>;
}

pub trait TextToSpeech: Send + Sync {
    fn name(&self) -> &str;

    fn sample_rate(&self) -> u32 {
        TTS_SAMPLE_RATE
    }

    fn supports_concurrent_calls(&self) -> bool {
        false
    }

    fn synthesize(&self, text: &str, voice: &str) -> Result<ChunkStream<'_>>;
}

/// The two engines, loaded once per process.
#[derive(Clone)]
pub struct EngineSet {
    pub stt: Arc<dyn SpeechToText>,
    pub tts: Arc<dyn TextToSpeech>,
}

impl EngineSet {
    pub fn new(stt: Arc<dyn SpeechToText>, tts: Arc<dyn TextToSpeech>) -> Self {
        Self { stt, tts }
    }

    /// Start the configured engines. Blocks until both report ready.
    pub fn load(config: &EngineConfig) -> Result<Self> {
        let stt = load_stt(config)?;
        let tts = load_tts(config)?;
        info!("Engines ready: stt={}, tts={}", stt.name(), tts.name());
        Ok(Self { stt, tts })
    }
}

impl std::fmt::Debug for EngineSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineSet")
            .field("stt", &self.stt.name())
            .field("tts", &self.tts.name())
            .finish()
    }
}

fn load_stt(config: &EngineConfig) -> Result<Arc<dyn SpeechToText>> {
    match config.stt.backend {
        SttBackend::Bridge => {
            let command = config.stt.bridge.as_ref().ok_or_else(|| {
                Error::Config(
                    "stt.backend = \"bridge\" requires an [stt.bridge] command".to_string(),
                )
            })?;
            Ok(Arc::new(BridgeSpeechToText::spawn(command)?))
        }
        SttBackend::Whisper => load_whisper(config),
    }
}

#[cfg(feature = "whisper")]
fn load_whisper(config: &EngineConfig) -> Result<Arc<dyn SpeechToText>> {
    let model = config.stt.whisper_model.as_ref().ok_or_else(|| {
        Error::Config("stt.backend = \"whisper\" requires stt.whisper_model".to_string())
    })?;
    Ok(Arc::new(WhisperSpeechToText::load(
        model,
        &config.stt.language,
        config.stt.threads,
    )?))
}

#[cfg(not(feature = "whisper"))]
fn load_whisper(_config: &EngineConfig) -> Result<Arc<dyn SpeechToText>> {
    Err(Error::Config(
        "stt.backend = \"whisper\" needs a build with the `whisper` feature".to_string(),
    ))
}

fn load_tts(config: &EngineConfig) -> Result<Arc<dyn TextToSpeech>> {
    match config.tts.backend {
        TtsBackend::Bridge => {
            let command = config.tts.bridge.as_ref().ok_or_else(|| {
                Error::Config(
                    "tts.backend = \"bridge\" requires a [tts.bridge] command".to_string(),
                )
            })?;
            Ok(Arc::new(BridgeTextToSpeech::spawn(
                command,
                config.tts.sample_rate,
            )?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bridge_backend_without_command_fails_startup() {
        let err = EngineSet::load(&EngineConfig::default()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[cfg(not(feature = "whisper"))]
    #[test]
    fn whisper_backend_requires_feature() {
        let mut config = EngineConfig::default();
        config.stt.backend = SttBackend::Whisper;
        let err = EngineSet::load(&config).unwrap_err();
        assert!(err.to_string().contains("whisper"));
    }

    #[test]
    fn segment_stream_yields_in_order() {
        let stream = SegmentStream::from_segments(
            "en",
            vec![
                TranscriptSegment {
                    text: "a".into(),
                    start: 0.0,
                    end: 1.0,
                },
                TranscriptSegment {
                    text: "b".into(),
                    start: 1.0,
                    end: 2.0,
                },
            ],
        );
        let texts: Vec<String> = stream.segments.map(|s| s.unwrap().text).collect();
        assert_eq!(texts, vec!["a", "b"]);
    }
}
