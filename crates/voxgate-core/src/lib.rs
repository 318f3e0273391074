//! voxgate core: request orchestration for speech-to-text and text-to-speech engines.
//!
//! The crate validates requests, stages audio through scoped temporary files, drives
//! the engines on a bounded worker pool, assembles chunked synthesis output in order,
//! and transcodes between containers.

pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod runtime;
pub mod staging;

pub use audio::{OutputFormat, SUPPORTED_UPLOAD_TYPES};
pub use config::EngineConfig;
pub use engine::{
    ChunkStream, EngineSet, SegmentStream, SpeechToText, SynthesisChunk, TextToSpeech,
    TranscriptSegment,
};
pub use error::{Error, Result};
pub use runtime::{
    AudioUpload, RuntimeService, SynthesisRequest, SynthesisResult, TranscriptionResult,
};
pub use staging::{StagingArea, StagingFile};
