//! Configuration management for Alma gateway
//!
//! Every field resolves as env > toml > default.

pub mod file;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::{Error, Result};

use self::file::GatewayConfigFile;

/// Default system prompt for voice conversations
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful voice assistant named Alma. \
     Answer very briefly but precisely: every word you write is spoken aloud, \
     so keep latency low and avoid lists or markup.";

/// Gateway configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,

    /// Audio formats on both sides of the pipeline
    pub audio: AudioConfig,

    /// Speech recognition configuration
    pub stt: SttConfig,

    /// Speech synthesis configuration
    pub tts: TtsConfig,

    /// Chat completion configuration
    pub llm: LlmConfig,

    /// Pipeline behavior
    pub pipeline: PipelineConfig,

    /// API keys
    pub api_keys: ApiKeys,
}

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,

    /// Path to static files directory (web client)
    pub static_dir: Option<PathBuf>,
}

/// Audio format configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioConfig {
    /// Sample rate of inbound float32 mono frames
    pub input_sample_rate: u32,

    /// Sample rate of PCM16 pushed into the recognizer
    pub recognizer_sample_rate: u32,

    /// Sample rate of outbound PCM16 audio
    pub output_sample_rate: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: 48_000,
            recognizer_sample_rate: 16_000,
            output_sample_rate: 24_000,
        }
    }
}

/// STT provider backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SttProvider {
    #[default]
    Whisper,
    Deepgram,
}

impl SttProvider {
    fn parse(value: &str) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "whisper" | "openai" => Ok(Self::Whisper),
            "deepgram" => Ok(Self::Deepgram),
            other => Err(Error::Config(format!("unknown STT provider: {other}"))),
        }
    }
}

/// Speech recognition configuration
#[derive(Debug, Clone)]
pub struct SttConfig {
    /// Transcription backend
    pub provider: SttProvider,

    /// Model identifier
    pub model: String,

    /// Recognition language hint
    pub language: Option<String>,

    /// Interval between partial transcripts (0 disables partials)
    pub partial_interval_ms: u64,
}

/// TTS provider backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TtsProvider {
    #[default]
    OpenAI,
    ElevenLabs,
}

impl TtsProvider {
    fn parse(value: &str) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "elevenlabs" => Ok(Self::ElevenLabs),
            other => Err(Error::Config(format!("unknown TTS provider: {other}"))),
        }
    }
}

/// Speech synthesis configuration
#[derive(Debug, Clone)]
pub struct TtsConfig {
    /// Synthesis backend
    pub provider: TtsProvider,

    /// Model identifier
    pub model: String,

    /// Voice identifier
    pub voice: String,

    /// Speed multiplier (0.25 to 4.0, `OpenAI` only)
    pub speed: f64,
}

/// Chat completion configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// OpenAI-compatible API base URL
    pub base_url: String,

    /// Model identifier
    pub model: String,

    /// System prompt opening every conversation
    pub system_prompt: String,

    /// Upper bound on generated tokens
    pub max_tokens: Option<u32>,
}

/// When user speech interrupts assistant speech
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BargeInPolicy {
    /// Any non-empty partial transcript stops assistant speech
    #[default]
    Partial,
    /// Only a final transcript stops assistant speech
    Final,
}

impl BargeInPolicy {
    fn parse(value: &str) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "partial" | "on_partial" => Ok(Self::Partial),
            "final" | "on_final" => Ok(Self::Final),
            other => Err(Error::Config(format!("unknown barge-in policy: {other}"))),
        }
    }
}

/// Pipeline behavior
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineConfig {
    /// Barge-in policy
    pub barge_in: BargeInPolicy,
}

/// API keys for external services
#[derive(Clone, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (Whisper, TTS, default LLM)
    pub openai: Option<String>,

    /// `Deepgram` API key (optional STT)
    pub deepgram: Option<String>,

    /// `ElevenLabs` API key (optional TTS)
    pub elevenlabs: Option<String>,

    /// Key for the chat completion endpoint
    pub llm: Option<String>,
}

impl fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKeys")
            .field("openai", &self.openai.is_some())
            .field("deepgram", &self.deepgram.is_some())
            .field("elevenlabs", &self.elevenlabs.is_some())
            .field("llm", &self.llm.is_some())
            .finish()
    }
}

impl Config {
    /// Load configuration from the environment and the config file
    ///
    /// # Errors
    ///
    /// Returns error if a value is invalid or a required credential is missing
    pub fn load() -> Result<Self> {
        let config = Self::resolve()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration without checking credentials
    ///
    /// Used by one-off commands that need only some of the providers.
    ///
    /// # Errors
    ///
    /// Returns error if a value is invalid
    pub fn resolve() -> Result<Self> {
        Self::from_sources(file::load_config_file(), |key| std::env::var(key).ok())
    }

    /// Resolve configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if an enum-valued setting cannot be parsed
    pub fn from_sources<F>(fc: GatewayConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let server = ServerConfig {
            port: env_number(&env, "ALMA_PORT")
                .or_else(|| env_number(&env, "PORT"))
                .or(fc.server.port)
                .unwrap_or(8080),
            static_dir: env("ALMA_STATIC_DIR")
                .or(fc.server.static_dir)
                .map(PathBuf::from),
        };

        let defaults = AudioConfig::default();
        let audio = AudioConfig {
            input_sample_rate: env_number(&env, "ALMA_INPUT_SAMPLE_RATE")
                .or(fc.audio.input_sample_rate)
                .unwrap_or(defaults.input_sample_rate),
            recognizer_sample_rate: env_number(&env, "ALMA_RECOGNIZER_SAMPLE_RATE")
                .or(fc.audio.recognizer_sample_rate)
                .unwrap_or(defaults.recognizer_sample_rate),
            output_sample_rate: env_number(&env, "ALMA_OUTPUT_SAMPLE_RATE")
                .or(fc.audio.output_sample_rate)
                .unwrap_or(defaults.output_sample_rate),
        };

        let stt_provider = env("ALMA_STT_PROVIDER")
            .or(fc.stt.provider)
            .map(|p| SttProvider::parse(&p))
            .transpose()?
            .unwrap_or_default();
        let stt = SttConfig {
            provider: stt_provider,
            model: env("ALMA_STT_MODEL").or(fc.stt.model).unwrap_or_else(|| {
                match stt_provider {
                    SttProvider::Whisper => "whisper-1",
                    SttProvider::Deepgram => "nova-2",
                }
                .to_string()
            }),
            language: env("ALMA_STT_LANGUAGE").or(fc.stt.language),
            partial_interval_ms: env_number(&env, "ALMA_PARTIAL_INTERVAL_MS")
                .or(fc.stt.partial_interval_ms)
                .unwrap_or(700),
        };

        let tts_provider = env("ALMA_TTS_PROVIDER")
            .or(fc.tts.provider)
            .map(|p| TtsProvider::parse(&p))
            .transpose()?
            .unwrap_or_default();
        let tts = TtsConfig {
            provider: tts_provider,
            model: env("ALMA_TTS_MODEL").or(fc.tts.model).unwrap_or_else(|| {
                match tts_provider {
                    TtsProvider::OpenAI => "tts-1",
                    TtsProvider::ElevenLabs => "eleven_flash_v2_5",
                }
                .to_string()
            }),
            voice: env("ALMA_TTS_VOICE")
                .or(fc.tts.voice)
                .unwrap_or_else(|| "alloy".to_string()),
            speed: env_number(&env, "ALMA_TTS_SPEED")
                .or(fc.tts.speed)
                .unwrap_or(1.0),
        };

        let llm = LlmConfig {
            base_url: env("ALMA_LLM_BASE_URL")
                .or(fc.llm.base_url)
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            model: env("ALMA_LLM_MODEL")
                .or(fc.llm.model)
                .unwrap_or_else(|| "gpt-4o-mini".to_string()),
            system_prompt: env("ALMA_SYSTEM_PROMPT")
                .or(fc.llm.system_prompt)
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            max_tokens: env_number(&env, "ALMA_LLM_MAX_TOKENS")
                .or(fc.llm.max_tokens),
        };

        let pipeline = PipelineConfig {
            barge_in: env("ALMA_BARGE_IN")
                .or(fc.pipeline.barge_in)
                .map(|p| BargeInPolicy::parse(&p))
                .transpose()?
                .unwrap_or_default(),
        };

        // LLM key falls back through Groq to OpenAI
        let openai = env("OPENAI_API_KEY").or(fc.api_keys.openai);
        let api_keys = ApiKeys {
            llm: env("ALMA_LLM_API_KEY")
                .or_else(|| env("GROQ_API_KEY"))
                .or(fc.api_keys.llm)
                .or_else(|| openai.clone()),
            openai,
            deepgram: env("DEEPGRAM_API_KEY").or(fc.api_keys.deepgram),
            elevenlabs: env("ELEVENLABS_API_KEY").or(fc.api_keys.elevenlabs),
        };

        Ok(Self {
            server,
            audio,
            stt,
            tts,
            llm,
            pipeline,
            api_keys,
        })
    }

    /// Check that the selected providers have credentials and formats are sane
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` naming the first problem found
    pub fn validate(&self) -> Result<()> {
        let AudioConfig {
            input_sample_rate,
            recognizer_sample_rate,
            output_sample_rate,
        } = self.audio;
        if input_sample_rate == 0 || recognizer_sample_rate == 0 || output_sample_rate == 0 {
            return Err(Error::Config("sample rates must be non-zero".to_string()));
        }

        let missing = |key: &Option<String>| key.as_deref().is_none_or(str::is_empty);

        match self.stt.provider {
            SttProvider::Whisper if missing(&self.api_keys.openai) => {
                return Err(Error::Config(
                    "OPENAI_API_KEY required for Whisper recognition".to_string(),
                ));
            }
            SttProvider::Deepgram if missing(&self.api_keys.deepgram) => {
                return Err(Error::Config(
                    "DEEPGRAM_API_KEY required for Deepgram recognition".to_string(),
                ));
            }
            _ => {}
        }

        match self.tts.provider {
            TtsProvider::OpenAI if missing(&self.api_keys.openai) => {
                return Err(Error::Config(
                    "OPENAI_API_KEY required for OpenAI speech synthesis".to_string(),
                ));
            }
            TtsProvider::ElevenLabs if missing(&self.api_keys.elevenlabs) => {
                return Err(Error::Config(
                    "ELEVENLABS_API_KEY required for ElevenLabs speech synthesis".to_string(),
                ));
            }
            _ => {}
        }

        if missing(&self.api_keys.llm) {
            return Err(Error::Config(
                "no chat completion key: set ALMA_LLM_API_KEY, GROQ_API_KEY or OPENAI_API_KEY"
                    .to_string(),
            ));
        }

        Ok(())
    }
}

/// Numeric override from the environment
///
/// A value that does not parse is reported and ignored, so the file or
/// default setting applies.
fn env_number<T, F>(env: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let value = env(key)?;
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!(key, value = %value, "ignoring unparseable numeric setting");
            None
        }
    }
}
