//! Configuration types for the voxgate runtime

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{Error, Result};

const CONFIG_ENV: &str = "VOXGATE_CONFIG";
const STAGING_DIR_ENV: &str = "VOXGATE_STAGING_DIR";
const WORKER_THREADS_ENV: &str = "VOXGATE_WORKER_THREADS";
const DEFAULT_VOICE_ENV: &str = "VOXGATE_DEFAULT_VOICE";

/// Main runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory holding per-request staging files
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,

    /// Maximum number of blocking engine/codec jobs running at once
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    #[serde(default)]
    pub stt: SttConfig,

    #[serde(default)]
    pub tts: TtsConfig,

    #[serde(default)]
    pub codec: CodecConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            staging_dir: default_staging_dir(),
            worker_threads: default_worker_threads(),
            stt: SttConfig::default(),
            tts: TtsConfig::default(),
            codec: CodecConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SttBackend {
    #[default]
    Bridge,
    Whisper,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TtsBackend {
    #[default]
    Bridge,
}

/// External worker process speaking the line-delimited JSON bridge protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Speech-to-text engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttConfig {
    #[serde(default)]
    pub backend: SttBackend,

    #[serde(default)]
    pub bridge: Option<BridgeCommand>,

    /// GGML model file for the in-process Whisper backend
    #[serde(default)]
    pub whisper_model: Option<PathBuf>,

    /// Whisper language hint, `auto` for detection
    #[serde(default = "default_stt_language")]
    pub language: String,

    #[serde(default = "default_stt_threads")]
    pub threads: usize,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            backend: SttBackend::default(),
            bridge: None,
            whisper_model: None,
            language: default_stt_language(),
            threads: default_stt_threads(),
        }
    }
}

/// Text-to-speech engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    #[serde(default)]
    pub backend: TtsBackend,

    #[serde(default)]
    pub bridge: Option<BridgeCommand>,

    /// Voice used when a request does not name one
    #[serde(default = "default_voice")]
    pub default_voice: String,

    /// Output rate of the engine; chunks are never resampled
    #[serde(default = "default_tts_sample_rate")]
    pub sample_rate: u32,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            backend: TtsBackend::default(),
            bridge: None,
            default_voice: default_voice(),
            sample_rate: default_tts_sample_rate(),
        }
    }
}

/// Output encoding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodecConfig {
    #[serde(default = "default_mp3_bitrate_kbps")]
    pub mp3_bitrate_kbps: u32,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            mp3_bitrate_kbps: default_mp3_bitrate_kbps(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from TOML, falling back to defaults, then apply env overrides.
    ///
    /// Lookup order: explicit `path`, `VOXGATE_CONFIG`, `<config_dir>/voxgate/config.toml`.
    /// An explicit path that does not exist is an error; the implicit locations are optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| env_path(CONFIG_ENV));

        let mut config = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(Error::Config(format!(
                        "Config file not found: {}",
                        path.display()
                    )));
                }
                Self::from_file(&path)?
            }
            None => match default_config_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };

        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Unable to read {}: {e}", path.display()))
        })?;
        let config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Invalid config {}: {e}", path.display())))?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(dir) = env_path(STAGING_DIR_ENV) {
            self.staging_dir = dir;
        }

        if let Ok(raw) = std::env::var(WORKER_THREADS_ENV) {
            match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => self.worker_threads = n,
                _ => warn!(
                    "Invalid {}='{}', keeping {}",
                    WORKER_THREADS_ENV, raw, self.worker_threads
                ),
            }
        }

        if let Ok(raw) = std::env::var(DEFAULT_VOICE_ENV) {
            let voice = raw.trim();
            if !voice.is_empty() {
                self.tts.default_voice = voice.to_string();
            }
        }
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
        .map(PathBuf::from)
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("voxgate").join("config.toml"))
}

fn default_staging_dir() -> PathBuf {
    std::env::temp_dir().join("voxgate-staging")
}

fn default_worker_threads() -> usize {
    get_num_cpus().clamp(1, 8)
}

fn default_stt_language() -> String {
    "auto".to_string()
}

fn default_stt_threads() -> usize {
    get_num_cpus().min(8)
}

fn default_voice() -> String {
    "af_heart".to_string()
}

fn default_tts_sample_rate() -> u32 {
    24_000
}

fn default_mp3_bitrate_kbps() -> u32 {
    128
}

fn get_num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(4)
}
