//! Engine adapter for an external worker process.
//!
//! The worker is spawned once and kept alive for the lifetime of the engine. Each
//! exchange writes one JSON request line to its stdin and reads JSON event lines from
//! its stdout until a `done` or `error` event:
//!
//! ```text
//! -> {"command":"check"}
//! <- {"event":"done"}
//! -> {"command":"transcribe","audio_path":"/tmp/voxgate-....wav"}
//! <- {"event":"segment","text":" Hello","start":0.0,"end":1.2}
//! <- {"event":"done","language":"en"}
//! -> {"command":"synthesize","text":"Hello","voice":"af_heart"}
//! <- {"event":"chunk","graphemes":"Hello","phonemes":"həlˈO","audio_base64":"<f32 LE>"}
//! <- {"event":"done"}
//! ```

use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::Mutex;

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{
    ChunkStream, SegmentStream, SpeechToText, SynthesisChunk, TextToSpeech, TranscriptSegment,
};
use crate::config::BridgeCommand;
use crate::error::{Error, Result};

const UNKNOWN_LANGUAGE: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum BridgeRequest<'a> {
    Check,
    Transcribe { audio_path: &'a str },
    Synthesize { text: &'a str, voice: &'a str },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum BridgeEvent {
    Segment {
        text: String,
        #[serde(default)]
        start: f32,
        #[serde(default)]
        end: f32,
    },
    Chunk {
        #[serde(default)]
        graphemes: String,
        #[serde(default)]
        phonemes: String,
        audio_base64: String,
    },
    Done {
        #[serde(default)]
        language: Option<String>,
    },
    Error {
        message: String,
    },
    /// Any event this side does not know, such as progress reports.
    #[serde(other)]
    Other,
}

/// Request/response channel to a worker.
///
/// After a failed read or write the position in the worker's output is unknown,
/// so the channel refuses further exchanges until the worker is restarted.
pub(crate) struct EventChannel<W, R> {
    writer: W,
    reader: R,
    in_step: bool,
}

impl<W: Write, R: BufRead> EventChannel<W, R> {
    pub(crate) fn new(writer: W, reader: R) -> Self {
        Self {
            writer,
            reader,
            in_step: true,
        }
    }

    pub(crate) fn is_in_step(&self) -> bool {
        self.in_step
    }

    /// Write `request` as one line and read event lines until `done` or `error`.
    ///
    /// Lines that fail to parse do not end the exchange early: the rest of the
    /// response is consumed so the next request starts on its own output.
    pub(crate) fn exchange(&mut self, request: &BridgeRequest<'_>) -> Result<Vec<BridgeEvent>> {
        if !self.in_step {
            return Err(Error::Inference(
                "Worker output is out of step with its requests".to_string(),
            ));
        }

        let mut line = serde_json::to_string(request)?;
        line.push('\n');
        if let Err(err) = self
            .writer
            .write_all(line.as_bytes())
            .and_then(|_| self.writer.flush())
        {
            self.in_step = false;
            return Err(err.into());
        }

        let mut events = Vec::new();
        let mut malformed: Option<Error> = None;
        let mut buf = String::new();
        loop {
            buf.clear();
            match self.reader.read_line(&mut buf) {
                Ok(0) => {
                    self.in_step = false;
                    return Err(Error::Inference(
                        "Worker closed its output before finishing".to_string(),
                    ));
                }
                Ok(_) => {}
                Err(err) => {
                    self.in_step = false;
                    return Err(err.into());
                }
            }
            let trimmed = buf.trim();
            if trimmed.is_empty() {
                continue;
            }

            let event = match serde_json::from_str::<BridgeEvent>(trimmed) {
                Ok(event) => event,
                Err(err) => {
                    warn!("Malformed worker line: {}", err);
                    if malformed.is_none() {
                        malformed = Some(err.into());
                    }
                    continue;
                }
            };
            match event {
                BridgeEvent::Error { message } => return Err(Error::Inference(message)),
                done @ BridgeEvent::Done { .. } => {
                    if let Some(err) = malformed {
                        return Err(err);
                    }
                    events.push(done);
                    return Ok(events);
                }
                BridgeEvent::Other => debug!("Ignoring unrecognized worker event"),
                event => events.push(event),
            }
        }
    }
}

type WorkerChannel = EventChannel<ChildStdin, BufReader<ChildStdout>>;

struct WorkerProcess {
    child: Child,
    channel: WorkerChannel,
}

impl WorkerProcess {
    fn start(command: &BridgeCommand) -> Result<Self> {
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                Error::ModelLoad(format!("Failed to start worker '{}': {e}", command.program))
            })?;

        let channel = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => EventChannel::new(stdin, BufReader::new(stdout)),
            _ => {
                let _ = child.kill();
                return Err(Error::ModelLoad(
                    "Worker process has no stdio pipes".to_string(),
                ));
            }
        };

        let mut worker = Self { child, channel };
        if let Err(err) = worker.channel.exchange(&BridgeRequest::Check) {
            worker.stop();
            return Err(Error::ModelLoad(format!(
                "Worker '{}' failed check: {err}",
                command.program
            )));
        }
        Ok(worker)
    }

    fn stop(&mut self) {
        if let Err(err) = self.child.kill() {
            debug!("Worker already exited: {}", err);
        }
        let _ = self.child.wait();
    }
}

/// A persistent worker process. Exchanges are serialized.
pub struct ProcessBridge {
    command: BridgeCommand,
    worker: Mutex<WorkerProcess>,
}

impl ProcessBridge {
    /// Spawn the worker and wait for it to answer a `check`.
    pub fn spawn(command: &BridgeCommand) -> Result<Self> {
        info!("Starting engine worker: {} {:?}", command.program, command.args);
        let worker = WorkerProcess::start(command)?;
        info!("Engine worker '{}' is ready", command.program);

        Ok(Self {
            command: command.clone(),
            worker: Mutex::new(worker),
        })
    }

    pub fn program(&self) -> &str {
        &self.command.program
    }

    /// Send one request and collect its events up to and including `done`.
    ///
    /// A worker whose output fell out of step is replaced before the request is sent.
    pub fn exchange(&self, request: &BridgeRequest<'_>) -> Result<Vec<BridgeEvent>> {
        let mut worker = self
            .worker
            .lock()
            .map_err(|_| Error::Inference("Worker bridge lock poisoned".to_string()))?;

        if !worker.channel.is_in_step() {
            warn!("Restarting engine worker '{}'", self.command.program);
            worker.stop();
            *worker = WorkerProcess::start(&self.command)?;
        }
        worker.channel.exchange(request)
    }
}

impl Drop for ProcessBridge {
    fn drop(&mut self) {
        match self.worker.get_mut() {
            Ok(worker) => worker.stop(),
            Err(poisoned) => poisoned.into_inner().stop(),
        }
    }
}

fn decode_f32_le(encoded: &str) -> Result<Vec<f32>> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| Error::Inference(format!("Invalid chunk audio encoding: {e}")))?;
    if bytes.len() % 4 != 0 {
        return Err(Error::Inference(format!(
            "Chunk audio has {} bytes, not a whole number of f32 samples",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

fn into_segment_stream(events: Vec<BridgeEvent>) -> Result<SegmentStream<'static>> {
    let mut language = None;
    let mut segments = Vec::new();
    for event in events {
        match event {
            BridgeEvent::Segment { text, start, end } => {
                segments.push(TranscriptSegment { text, start, end })
            }
            BridgeEvent::Done { language: lang } => language = lang,
            other => {
                return Err(Error::Inference(format!(
                    "Unexpected worker event during transcription: {other:?}"
                )))
            }
        }
    }

    let language = language
        .filter(|l| !l.trim().is_empty())
        .unwrap_or_else(|| UNKNOWN_LANGUAGE.to_string());
    Ok(SegmentStream::from_segments(language, segments))
}

fn into_chunks(events: Vec<BridgeEvent>) -> Vec<Result<SynthesisChunk>> {
    events
        .into_iter()
        .filter_map(|event| match event {
            BridgeEvent::Chunk {
                graphemes,
                phonemes,
                audio_base64,
            } => Some(decode_f32_le(&audio_base64).map(|samples| SynthesisChunk {
                graphemes,
                phonemes,
                samples,
            })),
            BridgeEvent::Done { .. } => None,
            other => Some(Err(Error::Inference(format!(
                "Unexpected worker event during synthesis: {other:?}"
            )))),
        })
        .collect()
}

/// Speech-to-text backed by a worker process.
pub struct BridgeSpeechToText {
    bridge: ProcessBridge,
}

impl BridgeSpeechToText {
    pub fn spawn(command: &BridgeCommand) -> Result<Self> {
        Ok(Self {
            bridge: ProcessBridge::spawn(command)?,
        })
    }
}

impl SpeechToText for BridgeSpeechToText {
    fn name(&self) -> &str {
        self.bridge.program()
    }

    fn transcribe(&self, audio_path: &Path) -> Result<SegmentStream<'_>> {
        let audio_path = audio_path.to_str().ok_or_else(|| {
            Error::InvalidInput(format!("Non UTF-8 staging path: {}", audio_path.display()))
        })?;
        let events = self.bridge.exchange(&BridgeRequest::Transcribe { audio_path })?;
        into_segment_stream(events)
    }
}

/// Text-to-speech backed by a worker process.
pub struct BridgeTextToSpeech {
    bridge: ProcessBridge,
    sample_rate: u32,
}

impl BridgeTextToSpeech {
    pub fn spawn(command: &BridgeCommand, sample_rate: u32) -> Result<Self> {
        if sample_rate != super::TTS_SAMPLE_RATE {
            warn!(
                "TTS sample rate configured as {} Hz; chunks are not resampled",
                sample_rate
            );
        }
        Ok(Self {
            bridge: ProcessBridge::spawn(command)?,
            sample_rate,
        })
    }
}

impl TextToSpeech for BridgeTextToSpeech {
    fn name(&self) -> &str {
        self.bridge.program()
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn synthesize(&self, text: &str, voice: &str) -> Result<ChunkStream<'_>> {
        let events = self
            .bridge
            .exchange(&BridgeRequest::Synthesize { text, voice })?;
        Ok(Box::new(into_chunks(events).into_iter()))
    }
}
