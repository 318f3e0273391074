//! Staged upload to mono speech samples at the rate an in-process recognizer expects.
//!
//! Packets are downmixed and resampled as they are decoded, so only the output
//! signal is held in memory. Uploads are staged with a fixed suffix, so the
//! container is found by sniffing; plain WAV that symphonia rejects goes
//! through hound instead.

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

use super::wav::read_wav_pcm16;
use crate::error::{Error, Result};

/// Decode the staged file at `path` into mono samples at `target_rate`.
pub fn load_speech(path: &Path, target_rate: u32) -> Result<Vec<f32>> {
    let samples = match stream_decode(path, target_rate) {
        Ok(samples) => samples,
        Err(stream_err) => {
            let audio = read_wav_pcm16(path).map_err(|wav_err| {
                Error::Inference(format!(
                    "Failed to decode audio. Symphonia: {stream_err}; WAV fallback: {wav_err}"
                ))
            })?;
            let mut resampler = StreamResampler::new(audio.sample_rate, target_rate)?;
            let mono: Vec<f32> = audio
                .samples
                .iter()
                .map(|&s| s as f32 / i16::MAX as f32)
                .collect();
            resampler.push(&mono);
            resampler.finish()
        }
    };

    if samples.is_empty() {
        return Err(Error::Inference(
            "Decoded audio contains no samples".to_string(),
        ));
    }
    Ok(samples)
}

fn stream_decode(path: &Path, target_rate: u32) -> Result<Vec<f32>> {
    let source = MediaSourceStream::new(Box::new(File::open(path)?), Default::default());
    let probed = symphonia::default::get_probe()
        .format(
            &Hint::new(),
            source,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| Error::Inference(format!("Unrecognized audio container: {e}")))?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| Error::Inference("Upload has no audio track".to_string()))?;
    let track_id = track.id;
    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| Error::Inference(format!("No decoder for upload codec: {e}")))?;

    let mut resampler: Option<StreamResampler> = None;
    let mut interleaved: Option<SampleBuffer<f32>> = None;
    let mut mono = Vec::new();
    let mut packets = 0usize;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            // End of stream surfaces as an I/O error.
            Err(SymphoniaError::IoError(_)) => break,
            Err(err) => return Err(Error::Inference(format!("Corrupt audio stream: {err}"))),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(err)) => {
                debug!("Skipping undecodable packet: {}", err);
                continue;
            }
            Err(SymphoniaError::IoError(_)) => break,
            Err(err) => return Err(Error::Inference(format!("Audio decode failed: {err}"))),
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count().max(1);
        if resampler.is_none() {
            resampler = Some(StreamResampler::new(spec.rate, target_rate)?);
        }
        let frames = decoded.capacity();
        if interleaved
            .as_ref()
            .is_some_and(|buffer| buffer.capacity() < frames * channels)
        {
            interleaved = None;
        }
        let buffer =
            interleaved.get_or_insert_with(|| SampleBuffer::new(frames as u64, spec));
        buffer.copy_interleaved_ref(decoded);

        mono.clear();
        mono.extend(
            buffer
                .samples()
                .chunks(channels)
                .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32),
        );
        if let Some(resampler) = resampler.as_mut() {
            resampler.push(&mono);
        }
        packets += 1;
    }

    let resampler = resampler
        .ok_or_else(|| Error::Inference("Upload contains no decodable audio".to_string()))?;
    debug!(
        "Decoded {} packets from {} at {} Hz",
        packets,
        path.display(),
        resampler.from_rate
    );
    Ok(resampler.finish())
}

/// Linear-interpolation resampler fed one block of mono samples at a time.
struct StreamResampler {
    from_rate: u32,
    /// Input samples advanced per output sample.
    step: f64,
    /// Position of the next output sample, in input samples from `carry`.
    position: f64,
    /// Last input sample of the previous block.
    carry: Option<f32>,
    output: Vec<f32>,
}

impl StreamResampler {
    fn new(from_rate: u32, to_rate: u32) -> Result<Self> {
        if from_rate == 0 || to_rate == 0 {
            return Err(Error::Inference(format!(
                "Cannot resample {from_rate} Hz audio to {to_rate} Hz"
            )));
        }
        Ok(Self {
            from_rate,
            step: from_rate as f64 / to_rate as f64,
            position: 0.0,
            carry: None,
            output: Vec::new(),
        })
    }

    fn push(&mut self, block: &[f32]) {
        if block.is_empty() {
            return;
        }
        let window: Vec<f32> = self
            .carry
            .into_iter()
            .chain(block.iter().copied().map(sanitize))
            .collect();

        while self.position + 1.0 < window.len() as f64 {
            let idx = self.position.floor() as usize;
            let frac = self.position.fract() as f32;
            self.output
                .push(window[idx] * (1.0 - frac) + window[idx + 1] * frac);
            self.position += self.step;
        }
        self.position -= (window.len() - 1) as f64;
        self.carry = window.last().copied();
    }

    fn finish(mut self) -> Vec<f32> {
        if let Some(last) = self.carry {
            while self.position < 1.0 {
                self.output.push(last);
                self.position += self.step;
            }
        }
        self.output
    }
}

fn sanitize(sample: f32) -> f32 {
    if sample.is_finite() {
        sample.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}
