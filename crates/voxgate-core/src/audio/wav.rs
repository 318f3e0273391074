//! PCM16 WAV read/write helpers.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::error::{Error, Result};

/// Mono 16-bit PCM audio read back from a WAV container.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmAudio {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

pub fn f32_to_i16(sample: f32) -> i16 {
    let sample = if sample.is_finite() { sample } else { 0.0 };
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

/// Write mono f32 samples as 16-bit PCM WAV.
pub fn write_wav_pcm16(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    if sample_rate == 0 {
        return Err(Error::Transcode("WAV sample rate must be non-zero".to_string()));
    }
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for &sample in samples {
        writer.write_sample(f32_to_i16(sample))?;
    }
    writer.finalize()?;
    Ok(())
}

pub fn write_pcm16(path: &Path, audio: &PcmAudio) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: audio.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for &sample in &audio.samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Read a WAV file into mono PCM16, downmixing and requantizing as needed.
pub fn read_wav_pcm16(path: &Path) -> Result<PcmAudio> {
    let mut reader = hound::WavReader::new(BufReader::new(File::open(path)?))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(|v| v as f32 / i16::MAX as f32))
            .collect::<std::result::Result<_, _>>()?,
        (hound::SampleFormat::Int, bits) => {
            let max_val = ((1i64 << (bits.max(2) - 1)) - 1) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<std::result::Result<_, _>>()?
        }
        (hound::SampleFormat::Float, _) => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()?,
    };

    let samples = if channels == 1 {
        interleaved.into_iter().map(f32_to_i16).collect()
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| f32_to_i16(frame.iter().sum::<f32>() / frame.len() as f32))
            .collect()
    };

    Ok(PcmAudio {
        samples,
        sample_rate: spec.sample_rate,
    })
}
