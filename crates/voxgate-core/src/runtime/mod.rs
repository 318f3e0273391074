//! Request orchestration on top of the loaded engines.

mod pool;
mod service;
mod synthesis;
mod transcription;

pub use pool::{EngineGate, WorkerPool};
pub use service::RuntimeService;
pub use synthesis::{SynthesisRequest, SynthesisResult, SynthesisService};
pub use transcription::{AudioUpload, TranscriptionResult, TranscriptionService};
