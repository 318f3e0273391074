//! Upload content types and synthesis output formats.

/// Content types accepted for transcription uploads.
pub const SUPPORTED_UPLOAD_TYPES: [&str; 5] = [
    "audio/wav",
    "audio/mp3",
    "audio/webm",
    "audio/mpeg",
    "audio/ogg",
];

/// Lower-cased media type with any parameters (`; codecs=opus`) removed.
pub fn normalize_content_type(raw: &str) -> String {
    raw.split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

pub fn is_supported_upload_type(raw: &str) -> bool {
    let normalized = normalize_content_type(raw);
    SUPPORTED_UPLOAD_TYPES.contains(&normalized.as_str())
}

/// How the synthesized waveform is packaged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Lossy, bitrate-limited MPEG layer III.
    Mp3,
    /// Uncompressed 16-bit PCM RIFF/WAVE.
    Wav,
}

/// Requested output format. The tag is echoed back verbatim; only `mp3`
/// selects lossy encoding and every other tag falls through to WAV.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFormat {
    tag: String,
    encoding: Encoding,
}

impl OutputFormat {
    pub const DEFAULT_TAG: &'static str = "mp3";

    pub fn parse(tag: impl Into<String>) -> Self {
        let tag = tag.into();
        let encoding = if tag == "mp3" {
            Encoding::Mp3
        } else {
            Encoding::Wav
        };
        Self { tag, encoding }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::parse(Self::DEFAULT_TAG)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supported_types_match_with_parameters_and_case() {
        for ty in SUPPORTED_UPLOAD_TYPES {
            assert!(is_supported_upload_type(ty), "{ty}");
        }
        assert!(is_supported_upload_type("audio/webm;codecs=opus"));
        assert!(is_supported_upload_type("Audio/WAV"));
        assert!(!is_supported_upload_type("audio/flac"));
        assert!(!is_supported_upload_type("application/octet-stream"));
        assert!(!is_supported_upload_type(""));
    }

    #[test]
    fn only_exact_mp3_selects_lossy_encoding() {
        assert_eq!(OutputFormat::parse("mp3").encoding(), Encoding::Mp3);
        assert_eq!(OutputFormat::default().tag(), "mp3");

        let wav = OutputFormat::parse("wav");
        assert_eq!(wav.encoding(), Encoding::Wav);

        let other = OutputFormat::parse("flac");
        assert_eq!(other.encoding(), Encoding::Wav);
        assert_eq!(other.tag(), "flac");

        assert_eq!(OutputFormat::parse("MP3").encoding(), Encoding::Wav);
    }
}
