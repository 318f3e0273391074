//! HTTP API for the speech gateway.

mod health;
mod request_context;
mod router;
mod stt;
mod tts;

pub use router::create_router;
