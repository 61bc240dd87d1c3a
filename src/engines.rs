//! Per-session engine construction
//!
//! The transport asks an [`EngineFactory`] for a fresh recognizer and
//! synthesizer for every connecting peer. Engine clients that hold no
//! per-session state (HTTP transcription, synthesis, chat) are shared.

use std::sync::Arc;

use crate::Result;
use crate::chat::{ChatCompletion, OpenAiChat};
use crate::config::Config;
use crate::pipeline::{OutboundSender, SessionEngines};
use crate::speech::{
    RecognizerSettings, SegmentingRecognizer, SpeechToText, StreamingSynthesizer, TextToSpeech,
    Transcriber,
};

/// Builds the engines for one session
pub trait EngineFactory: Send + Sync {
    /// Create engines whose audio output goes to `outbound`
    ///
    /// # Errors
    ///
    /// Returns error if an engine cannot be created
    fn engines(&self, outbound: &OutboundSender) -> Result<SessionEngines>;
}

/// Engines backed by HTTP speech and chat APIs
pub struct HttpEngines {
    transcriber: Arc<dyn Transcriber>,
    tts: Arc<TextToSpeech>,
    chat: Arc<dyn ChatCompletion>,
    recognizer: RecognizerSettings,
}

impl HttpEngines {
    /// Create the providers selected in configuration
    ///
    /// # Errors
    ///
    /// Returns error if a selected provider has no API key
    pub fn from_config(config: &Config) -> Result<Self> {
        let stt = SpeechToText::from_config(&config.stt, &config.api_keys)?;
        let tts = TextToSpeech::from_config(
            &config.tts,
            &config.api_keys,
            config.audio.output_sample_rate,
        )?;
        let chat = OpenAiChat::from_config(&config.llm, &config.api_keys)?;

        tracing::info!(
            stt = ?config.stt.provider,
            tts = ?config.tts.provider,
            llm = %chat.model(),
            output_rate = tts.sample_rate(),
            "speech engines ready"
        );

        Ok(Self {
            transcriber: Arc::new(stt),
            tts: Arc::new(tts),
            chat: Arc::new(chat),
            recognizer: RecognizerSettings::new(
                config.audio.recognizer_sample_rate,
                config.stt.partial_interval_ms,
            ),
        })
    }

    /// Rate of synthesized audio sent to peers
    #[must_use]
    pub fn output_sample_rate(&self) -> u32 {
        self.tts.sample_rate()
    }
}

impl EngineFactory for HttpEngines {
    fn engines(&self, outbound: &OutboundSender) -> Result<SessionEngines> {
        Ok(SessionEngines {
            recognizer: Arc::new(SegmentingRecognizer::new(
                Arc::clone(&self.transcriber),
                self.recognizer,
            )),
            synthesizer: Arc::new(StreamingSynthesizer::new(
                Arc::clone(&self.tts),
                Arc::new(outbound.clone()),
            )),
            chat: Arc::clone(&self.chat),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::file::GatewayConfigFile;

    fn config(vars: &[(&str, &str)]) -> Config {
        Config::from_sources(GatewayConfigFile::default(), |key| {
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| (*v).to_string())
        })
        .unwrap()
    }

    #[test]
    fn missing_keys_fail_fast() {
        assert!(HttpEngines::from_config(&config(&[])).is_err());
    }

    #[tokio::test]
    async fn builds_fresh_engines_per_session() {
        let engines = HttpEngines::from_config(&config(&[("OPENAI_API_KEY", "sk-test")])).unwrap();
        assert_eq!(engines.output_sample_rate(), 24_000);

        let (outbound, _rx) = crate::pipeline::outbound_channel();
        let first = engines.engines(&outbound).unwrap();
        let second = engines.engines(&outbound).unwrap();
        assert!(!Arc::ptr_eq(&first.recognizer, &second.recognizer));
        assert!(Arc::ptr_eq(&first.chat, &second.chat));
    }
}
