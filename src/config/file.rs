//! TOML configuration file loading
//!
//! Supports `~/.config/alma/gateway/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct GatewayConfigFile {
    /// Server/runtime configuration
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Audio format configuration
    #[serde(default)]
    pub audio: AudioFileConfig,

    /// Speech recognition configuration
    #[serde(default)]
    pub stt: SttFileConfig,

    /// Speech synthesis configuration
    #[serde(default)]
    pub tts: TtsFileConfig,

    /// LLM configuration
    #[serde(default)]
    pub llm: LlmFileConfig,

    /// Pipeline behavior
    #[serde(default)]
    pub pipeline: PipelineFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Server/runtime configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// API server port
    pub port: Option<u16>,

    /// Directory with a web client to serve at `/`
    pub static_dir: Option<String>,
}

/// Audio format configuration
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    /// Sample rate of inbound float32 frames
    pub input_sample_rate: Option<u32>,

    /// Sample rate the recognizer expects
    pub recognizer_sample_rate: Option<u32>,

    /// Sample rate of outbound PCM16 audio
    pub output_sample_rate: Option<u32>,
}

/// Speech recognition configuration
#[derive(Debug, Default, Deserialize)]
pub struct SttFileConfig {
    /// Provider ("whisper" or "deepgram")
    pub provider: Option<String>,

    /// STT model (e.g. "whisper-1", "nova-2")
    pub model: Option<String>,

    /// Recognition language (e.g. "fr")
    pub language: Option<String>,

    /// Interval between partial transcripts in milliseconds (0 disables)
    pub partial_interval_ms: Option<u64>,
}

/// Speech synthesis configuration
#[derive(Debug, Default, Deserialize)]
pub struct TtsFileConfig {
    /// Provider ("openai" or "elevenlabs")
    pub provider: Option<String>,

    /// TTS model (e.g. "tts-1")
    pub model: Option<String>,

    /// Voice identifier (e.g. "alloy" or an ElevenLabs voice ID)
    pub voice: Option<String>,

    /// Speed multiplier
    pub speed: Option<f64>,
}

/// LLM-related configuration
#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    /// OpenAI-compatible API base URL
    pub base_url: Option<String>,

    /// Model identifier (e.g. "gpt-4o-mini")
    pub model: Option<String>,

    /// System prompt opening every conversation
    pub system_prompt: Option<String>,

    /// Upper bound on generated tokens
    pub max_tokens: Option<u32>,
}

/// Pipeline behavior
#[derive(Debug, Default, Deserialize)]
pub struct PipelineFileConfig {
    /// Barge-in policy ("partial" or "final")
    pub barge_in: Option<String>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub deepgram: Option<String>,
    pub elevenlabs: Option<String>,
    pub llm: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `GatewayConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> GatewayConfigFile {
    config_file_path().map_or_else(GatewayConfigFile::default, |path| load_from(&path))
}

/// Load a config file from an explicit path
///
/// Missing or malformed files fall back to defaults with a warning.
pub fn load_from(path: &Path) -> GatewayConfigFile {
    if !path.exists() {
        return GatewayConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                GatewayConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            GatewayConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/alma/gateway/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| {
        d.config_dir()
            .join("alma")
            .join("gateway")
            .join("config.toml")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let config = load_from(Path::new("/nonexistent/alma/config.toml"));
        assert!(config.server.port.is_none());
        assert!(config.llm.model.is_none());
    }

    #[test]
    fn partial_file_overlays_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[server]\nport = 9000\n\n[pipeline]\nbarge_in = \"final\"\n\n[audio]\ninput_sample_rate = 44100\n",
        )
        .unwrap();

        let config = load_from(&path);
        assert_eq!(config.server.port, Some(9000));
        assert_eq!(config.pipeline.barge_in.as_deref(), Some("final"));
        assert_eq!(config.audio.input_sample_rate, Some(44100));
        assert!(config.audio.output_sample_rate.is_none());
    }

    #[test]
    fn malformed_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server\nport = ").unwrap();

        let config = load_from(&path);
        assert!(config.server.port.is_none());
    }
}
