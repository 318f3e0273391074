//! Audio codec helpers: WAV staging, MP3 transcoding, and upload decoding for Whisper.

#[cfg(feature = "whisper")]
mod decode;
mod format;
mod transcoder;
mod wav;

#[cfg(feature = "whisper")]
pub use decode::load_speech;
pub use format::{
    is_supported_upload_type, normalize_content_type, Encoding, OutputFormat,
    SUPPORTED_UPLOAD_TYPES,
};
pub use transcoder::{NativeTranscoder, Transcoder};
pub use wav::{f32_to_i16, read_wav_pcm16, write_pcm16, write_wav_pcm16, PcmAudio};
