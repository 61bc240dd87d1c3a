//! Text-to-speech (TTS) over HTTP
//!
//! Both providers are asked for raw PCM16 mono so audio can be relayed to
//! the peer while the response body is still arriving.

use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};

use crate::config::{ApiKeys, TtsConfig, TtsProvider};
use crate::{Error, Result};

/// `OpenAI` speech returns PCM at this fixed rate
const OPENAI_PCM_RATE: u32 = 24_000;

/// PCM rates `ElevenLabs` can produce
const ELEVENLABS_PCM_RATES: [u32; 4] = [16_000, 22_050, 24_000, 44_100];

/// Stream of PCM16 byte chunks
pub type AudioStream = BoxStream<'static, Result<Vec<u8>>>;

/// Synthesizes speech from text
pub struct TextToSpeech {
    client: reqwest::Client,
    api_key: String,
    voice: String,
    speed: f64,
    model: String,
    sample_rate: u32,
    provider: TtsProvider,
}

impl TextToSpeech {
    /// Create a new TTS instance using `OpenAI`
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_openai(api_key: String, voice: String, speed: f64, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("OpenAI API key required for TTS".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            voice,
            speed,
            model,
            sample_rate: OPENAI_PCM_RATE,
            provider: TtsProvider::OpenAI,
        })
    }

    /// Create a new TTS instance using `ElevenLabs`
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing or the rate is unsupported
    pub fn new_elevenlabs(
        api_key: String,
        voice_id: String,
        model: String,
        sample_rate: u32,
    ) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "ElevenLabs API key required for TTS".to_string(),
            ));
        }
        if !ELEVENLABS_PCM_RATES.contains(&sample_rate) {
            return Err(Error::Config(format!(
                "ElevenLabs cannot produce PCM at {sample_rate} Hz"
            )));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            voice: voice_id,
            speed: 1.0, // ElevenLabs doesn't use speed in the same way
            model,
            sample_rate,
            provider: TtsProvider::ElevenLabs,
        })
    }

    /// Create the provider selected in configuration
    ///
    /// # Errors
    ///
    /// Returns error if the provider's API key is missing
    pub fn from_config(config: &TtsConfig, api_keys: &ApiKeys, output_rate: u32) -> Result<Self> {
        match config.provider {
            TtsProvider::OpenAI => {
                if output_rate != OPENAI_PCM_RATE {
                    tracing::warn!(
                        configured = output_rate,
                        actual = OPENAI_PCM_RATE,
                        "OpenAI speech is always 24kHz, ignoring configured output rate"
                    );
                }
                Self::new_openai(
                    api_keys.openai.clone().unwrap_or_default(),
                    config.voice.clone(),
                    config.speed,
                    config.model.clone(),
                )
            }
            TtsProvider::ElevenLabs => Self::new_elevenlabs(
                api_keys.elevenlabs.clone().unwrap_or_default(),
                config.voice.clone(),
                config.model.clone(),
                output_rate,
            ),
        }
    }

    /// Sample rate of produced PCM16
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Synthesize text, streaming PCM16 chunks as they arrive
    ///
    /// # Errors
    ///
    /// Returns error if the request is rejected
    pub async fn synthesize_stream(&self, text: &str) -> Result<AudioStream> {
        let response = match self.provider {
            TtsProvider::OpenAI => self.request_openai(text).await?,
            TtsProvider::ElevenLabs => self.request_elevenlabs(text).await?,
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("{:?} TTS error {status}: {body}", self.provider)));
        }

        Ok(response
            .bytes_stream()
            .map_ok(|chunk| chunk.to_vec())
            .map_err(Error::from)
            .boxed())
    }

    /// Synthesize text to a complete PCM16 buffer
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails
    pub async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let mut stream = self.synthesize_stream(text).await?;
        let mut audio = Vec::new();
        while let Some(chunk) = stream.next().await {
            audio.extend_from_slice(&chunk?);
        }
        Ok(audio)
    }

    /// Send an `OpenAI` speech request
    async fn request_openai(&self, text: &str) -> Result<reqwest::Response> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f64,
            response_format: &'a str,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            speed: self.speed,
            response_format: "pcm",
        };

        Ok(self
            .client
            .post("https://api.openai.com/v1/audio/speech")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?)
    }

    /// Send an `ElevenLabs` streaming request
    async fn request_elevenlabs(&self, text: &str) -> Result<reqwest::Response> {
        #[derive(serde::Serialize)]
        struct ElevenLabsRequest<'a> {
            text: &'a str,
            model_id: &'a str,
        }

        let url = format!(
            "https://api.elevenlabs.io/v1/text-to-speech/{}/stream?output_format=pcm_{}",
            self.voice, self.sample_rate
        );

        let request = ElevenLabsRequest {
            text,
            model_id: &self.model,
        };

        Ok(self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_rate_is_fixed() {
        let tts = TextToSpeech::new_openai(
            "sk-test".to_string(),
            "alloy".to_string(),
            1.0,
            "tts-1".to_string(),
        )
        .unwrap();
        assert_eq!(tts.sample_rate(), 24_000);
    }

    #[test]
    fn elevenlabs_rejects_unsupported_rate() {
        let result = TextToSpeech::new_elevenlabs(
            "xi-test".to_string(),
            "voice".to_string(),
            "eleven_flash_v2_5".to_string(),
            48_000,
        );
        assert!(result.is_err());
    }

    #[test]
    fn empty_keys_are_rejected() {
        assert!(
            TextToSpeech::new_openai(String::new(), "alloy".to_string(), 1.0, "tts-1".to_string())
                .is_err()
        );
    }
}
