//! Speech-to-text (STT) over HTTP

use async_trait::async_trait;

use crate::config::{SttConfig, SttProvider};
use crate::{Error, Result};

/// Batch transcription of a complete WAV clip
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe WAV audio to text
    async fn transcribe(&self, wav: &[u8]) -> Result<String>;
}

/// Response from OpenAI Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Response from Deepgram transcription API
#[derive(serde::Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(serde::Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(serde::Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(serde::Deserialize)]
struct DeepgramAlternative {
    transcript: String,
}

/// Transcribes speech to text
pub struct SpeechToText {
    client: reqwest::Client,
    api_key: String,
    model: String,
    language: Option<String>,
    provider: SttProvider,
}

impl SpeechToText {
    /// Create a new STT instance using `OpenAI` Whisper
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_whisper(api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for Whisper".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            language: None,
            provider: SttProvider::Whisper,
        })
    }

    /// Create a new STT instance using Deepgram
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_deepgram(api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("Deepgram API key required".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            language: None,
            provider: SttProvider::Deepgram,
        })
    }

    /// Create the provider selected in configuration
    ///
    /// # Errors
    ///
    /// Returns error if the provider's API key is missing
    pub fn from_config(config: &SttConfig, api_keys: &crate::config::ApiKeys) -> Result<Self> {
        let stt = match config.provider {
            SttProvider::Whisper => Self::new_whisper(
                api_keys.openai.clone().unwrap_or_default(),
                config.model.clone(),
            )?,
            SttProvider::Deepgram => Self::new_deepgram(
                api_keys.deepgram.clone().unwrap_or_default(),
                config.model.clone(),
            )?,
        };

        Ok(stt.with_language(config.language.clone()))
    }

    /// Set the recognition language hint
    #[must_use]
    pub fn with_language(mut self, language: Option<String>) -> Self {
        self.language = language;
        self
    }

    /// Transcribe using OpenAI Whisper
    async fn transcribe_whisper(&self, audio: &[u8]) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting Whisper transcription");

        let mut form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio.to_vec())
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone());

        if let Some(language) = &self.language {
            form = form.text("language", language.clone());
        }

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/transcriptions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Whisper request failed");
                e
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(Error::Stt(format!("Whisper API error {status}: {body}")));
        }

        let result: WhisperResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse response");
            e
        })?;

        Ok(result.text.trim().to_string())
    }

    /// Deepgram request with model and language passed as encoded query
    /// parameters
    fn deepgram_request(&self, audio: &[u8]) -> reqwest::RequestBuilder {
        let mut query = vec![("model", self.model.as_str()), ("punctuate", "true")];
        if let Some(language) = &self.language {
            query.push(("language", language.as_str()));
        }

        self.client
            .post("https://api.deepgram.com/v1/listen")
            .query(&query)
            .header("Authorization", format!("Token {}", self.api_key))
            .header("Content-Type", "audio/wav")
            .body(audio.to_vec())
    }

    /// Transcribe using Deepgram
    async fn transcribe_deepgram(&self, audio: &[u8]) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting Deepgram transcription");

        let response = self
            .deepgram_request(audio)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Deepgram request failed");
                e
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Deepgram API error");
            return Err(Error::Stt(format!("Deepgram API error {status}: {body}")));
        }

        let result: DeepgramResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse Deepgram response");
            e
        })?;

        let transcript = result
            .results
            .channels
            .first()
            .and_then(|c| c.alternatives.first())
            .map(|a| a.transcript.trim().to_string())
            .unwrap_or_default();

        Ok(transcript)
    }
}

#[async_trait]
impl Transcriber for SpeechToText {
    async fn transcribe(&self, wav: &[u8]) -> Result<String> {
        match self.provider {
            SttProvider::Whisper => self.transcribe_whisper(wav).await,
            SttProvider::Deepgram => self.transcribe_deepgram(wav).await,
        }
    }
}
