//! In-process Whisper speech-to-text via whisper.cpp.

use std::path::Path;

use tracing::{debug, info};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use super::{SegmentStream, SpeechToText, TranscriptSegment};
use crate::audio::load_speech;
use crate::error::{Error, Result};

const WHISPER_SAMPLE_RATE: u32 = 16_000;

pub struct WhisperSpeechToText {
    ctx: WhisperContext,
    language: String,
    threads: i32,
}

// SAFETY: whisper-rs declares WhisperContext Send + Sync; the model weights are
// read-only after loading and every call runs on its own state.
unsafe impl Send for WhisperSpeechToText {}
unsafe impl Sync for WhisperSpeechToText {}

impl WhisperSpeechToText {
    pub fn load(model_path: &Path, language: &str, threads: usize) -> Result<Self> {
        if !model_path.exists() {
            return Err(Error::ModelNotFound(model_path.display().to_string()));
        }
        let path_str = model_path.to_str().ok_or_else(|| {
            Error::ModelNotFound(format!(
                "model path contains non-UTF-8 characters: {}",
                model_path.display()
            ))
        })?;

        let ctx = WhisperContext::new_with_params(path_str, WhisperContextParameters::default())
            .map_err(|e| Error::ModelLoad(e.to_string()))?;
        info!("Loaded Whisper model from {}", model_path.display());

        Ok(Self {
            ctx,
            language: language.to_string(),
            threads: threads.clamp(1, i32::MAX as usize) as i32,
        })
    }
}

impl SpeechToText for WhisperSpeechToText {
    fn name(&self) -> &str {
        "whisper"
    }

    // Each call creates its own WhisperState; the context is read-only.
    fn supports_concurrent_calls(&self) -> bool {
        true
    }

    fn transcribe(&self, audio_path: &Path) -> Result<SegmentStream<'_>> {
        let audio = load_speech(audio_path, WHISPER_SAMPLE_RATE)?;

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        let language = if self.language == "auto" {
            None
        } else {
            Some(self.language.as_str())
        };
        params.set_language(language);
        params.set_n_threads(self.threads);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_special(false);

        let mut state = self
            .ctx
            .create_state()
            .map_err(|e| Error::Inference(format!("Whisper state init failed: {e}")))?;
        state
            .full(params, &audio)
            .map_err(|e| Error::Inference(format!("Whisper inference failed: {e}")))?;

        let n_segments = state
            .full_n_segments()
            .map_err(|e| Error::Inference(e.to_string()))?;
        let mut segments = Vec::with_capacity(n_segments.max(0) as usize);
        for i in 0..n_segments {
            let text = state
                .full_get_segment_text(i)
                .map_err(|e| Error::Inference(format!("segment {i}: {e}")))?;
            // Timestamps are centiseconds.
            let t0 = state.full_get_segment_t0(i).unwrap_or(0).max(0) as f32 / 100.0;
            let t1 = state.full_get_segment_t1(i).unwrap_or(0).max(0) as f32 / 100.0;
            segments.push(TranscriptSegment {
                text,
                start: t0,
                end: t1,
            });
        }

        let detected = state
            .full_lang_id_from_state()
            .ok()
            .and_then(whisper_rs::get_lang_str);
        let language = match detected {
            Some(detected) => detected.to_string(),
            None if self.language == "auto" => "en".to_string(),
            None => self.language.clone(),
        };
        debug!(
            "Whisper produced {} segments, language {}",
            segments.len(),
            language
        );

        Ok(SegmentStream::from_segments(language, segments))
    }
}
