//! Container transcoding from staged PCM16 WAV into the requested output format.

use std::path::Path;

use mp3lame_encoder::{Bitrate, Builder, FlushNoGap, MonoPcm, Quality};
use tracing::debug;

use super::format::{Encoding, OutputFormat};
use super::wav::{read_wav_pcm16, write_pcm16, PcmAudio};
use crate::error::{Error, Result};

/// LAME needs up to this many bytes for its final frames on flush.
const FLUSH_RESERVE_BYTES: usize = 7200;

/// Converts a staged WAV file into another container.
pub trait Transcoder: Send + Sync {
    fn transcode(&self, src_wav: &Path, dst: &Path, format: &OutputFormat) -> Result<()>;
}

/// In-process transcoder: LAME for MP3, hound for WAV.
#[derive(Debug, Clone)]
pub struct NativeTranscoder {
    mp3_bitrate_kbps: u32,
}

impl NativeTranscoder {
    pub fn new(mp3_bitrate_kbps: u32) -> Self {
        Self { mp3_bitrate_kbps }
    }

    fn encode_mp3(&self, audio: &PcmAudio) -> Result<Vec<u8>> {
        let mut builder = Builder::new()
            .ok_or_else(|| Error::Transcode("Unable to allocate LAME encoder".to_string()))?;
        builder.set_num_channels(1).map_err(lame_err)?;
        builder
            .set_sample_rate(audio.sample_rate)
            .map_err(lame_err)?;
        builder
            .set_brate(bitrate_from_kbps(self.mp3_bitrate_kbps))
            .map_err(lame_err)?;
        builder.set_quality(Quality::Good).map_err(lame_err)?;
        let mut encoder = builder.build().map_err(lame_err)?;

        let mut out = Vec::with_capacity(
            mp3lame_encoder::max_required_buffer_size(audio.samples.len()) + FLUSH_RESERVE_BYTES,
        );
        encoder
            .encode_to_vec(MonoPcm(audio.samples.as_slice()), &mut out)
            .map_err(lame_err)?;
        out.reserve(FLUSH_RESERVE_BYTES);
        encoder
            .flush_to_vec::<FlushNoGap>(&mut out)
            .map_err(lame_err)?;

        Ok(out)
    }
}

impl Default for NativeTranscoder {
    fn default() -> Self {
        Self::new(128)
    }
}

impl Transcoder for NativeTranscoder {
    fn transcode(&self, src_wav: &Path, dst: &Path, format: &OutputFormat) -> Result<()> {
        let audio = read_wav_pcm16(src_wav)?;

        match format.encoding() {
            Encoding::Mp3 => {
                let bytes = self.encode_mp3(&audio)?;
                std::fs::write(dst, &bytes)?;
                debug!(
                    "Encoded {} samples into {} MP3 bytes",
                    audio.samples.len(),
                    bytes.len()
                );
            }
            Encoding::Wav => write_pcm16(dst, &audio)?,
        }

        Ok(())
    }
}

fn lame_err(err: impl std::fmt::Debug) -> Error {
    Error::Transcode(format!("MP3 encoder error: {err:?}"))
}

/// Largest LAME CBR rate not above the requested one.
fn bitrate_from_kbps(kbps: u32) -> Bitrate {
    match kbps {
        0..=15 => Bitrate::Kbps8,
        16..=23 => Bitrate::Kbps16,
        24..=31 => Bitrate::Kbps24,
        32..=39 => Bitrate::Kbps32,
        40..=47 => Bitrate::Kbps40,
        48..=63 => Bitrate::Kbps48,
        64..=79 => Bitrate::Kbps64,
        80..=95 => Bitrate::Kbps80,
        96..=111 => Bitrate::Kbps96,
        112..=127 => Bitrate::Kbps112,
        128..=159 => Bitrate::Kbps128,
        160..=191 => Bitrate::Kbps160,
        192..=223 => Bitrate::Kbps192,
        224..=255 => Bitrate::Kbps224,
        256..=319 => Bitrate::Kbps256,
        _ => Bitrate::Kbps320,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::wav::write_wav_pcm16;
    use uuid::Uuid;

    fn tone(len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (i as f32 * 440.0 * std::f32::consts::TAU / 24_000.0).sin() * 0.3)
            .collect()
    }

    fn staged_tone(tag: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("voxgate-{tag}-{}.wav", Uuid::new_v4()));
        write_wav_pcm16(&path, &tone(24_000), 24_000).unwrap();
        path
    }

    #[test]
    fn mp3_output_starts_with_frame_sync_or_id3() {
        let src = staged_tone("transcode-src");
        let dst = std::env::temp_dir().join(format!("voxgate-transcode-{}.mp3", Uuid::new_v4()));

        NativeTranscoder::default()
            .transcode(&src, &dst, &OutputFormat::parse("mp3"))
            .unwrap();

        let bytes = std::fs::read(&dst).unwrap();
        assert!(bytes.len() > 4);
        let frame_sync = bytes[0] == 0xFF && (bytes[1] & 0xE0) == 0xE0;
        assert!(frame_sync || bytes.starts_with(b"ID3"));

        std::fs::remove_file(&src).unwrap();
        std::fs::remove_file(&dst).unwrap();
    }

    #[test]
    fn non_mp3_tags_pass_through_as_wav() {
        let src = staged_tone("transcode-src");
        let dst = std::env::temp_dir().join(format!("voxgate-transcode-{}.ogg", Uuid::new_v4()));

        NativeTranscoder::default()
            .transcode(&src, &dst, &OutputFormat::parse("ogg"))
            .unwrap();

        let bytes = std::fs::read(&dst).unwrap();
        assert_eq!(&bytes[..4], b"RIFF");
        let audio = read_wav_pcm16(&dst).unwrap();
        assert_eq!(audio.sample_rate, 24_000);
        assert_eq!(audio.samples.len(), 24_000);

        std::fs::remove_file(&src).unwrap();
        std::fs::remove_file(&dst).unwrap();
    }

    #[test]
    fn missing_source_fails() {
        let src = std::env::temp_dir().join(format!("voxgate-absent-{}.wav", Uuid::new_v4()));
        let dst = std::env::temp_dir().join(format!("voxgate-absent-{}.mp3", Uuid::new_v4()));
        assert!(NativeTranscoder::default()
            .transcode(&src, &dst, &OutputFormat::default())
            .is_err());
    }

    #[test]
    fn bitrate_rounds_down_to_supported_rate() {
        assert!(matches!(bitrate_from_kbps(128), Bitrate::Kbps128));
        assert!(matches!(bitrate_from_kbps(150), Bitrate::Kbps128));
        assert!(matches!(bitrate_from_kbps(1000), Bitrate::Kbps320));
    }
}
