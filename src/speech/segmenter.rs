//! Utterance segmentation
//!
//! Splits a continuous audio stream into utterances with a local energy
//! detector: speech opens an utterance, enough trailing silence ends it.

use crate::audio::rms;

/// Minimum audio energy threshold to consider speech
const ENERGY_THRESHOLD: f32 = 0.03;

/// Minimum voiced duration for an utterance to count (seconds)
const MIN_SPEECH_SECS: f32 = 0.3;

/// Silence that ends an utterance (seconds)
const SILENCE_SECS: f32 = 0.5;

/// Analysis windows per second (20ms windows)
const WINDOWS_PER_SEC: u32 = 50;

/// State of the segmenter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterState {
    /// Waiting for speech
    Idle,
    /// Inside an utterance
    Speaking,
}

/// What a call to [`SpeechSegmenter::process`] observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentEvent {
    /// Nothing changed
    None,
    /// Speech started a new utterance
    Started,
    /// Utterance in progress
    Continuing,
    /// Utterance finished; take it with [`SpeechSegmenter::take_utterance`]
    Ended,
    /// Noise burst too short to be speech, dropped
    Discarded,
}

/// Energy-based utterance segmenter
pub struct SpeechSegmenter {
    state: SegmenterState,
    window: usize,
    min_speech_samples: usize,
    silence_samples: usize,
    utterance: Vec<f32>,
    voiced: usize,
    silence_counter: usize,
}

impl SpeechSegmenter {
    /// Create a segmenter for audio at `sample_rate`
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn new(sample_rate: u32) -> Self {
        let rate = sample_rate as f32;
        Self {
            state: SegmenterState::Idle,
            window: (sample_rate / WINDOWS_PER_SEC).max(1) as usize,
            min_speech_samples: (rate * MIN_SPEECH_SECS) as usize,
            silence_samples: (rate * SILENCE_SECS) as usize,
            utterance: Vec::new(),
            voiced: 0,
            silence_counter: 0,
        }
    }

    /// Process audio samples, returning the most significant transition
    pub fn process(&mut self, samples: &[f32]) -> SegmentEvent {
        let mut event = SegmentEvent::None;

        for window in samples.chunks(self.window) {
            let energy = rms(window);
            let is_speech = energy > ENERGY_THRESHOLD;

            match self.state {
                SegmenterState::Idle => {
                    if is_speech {
                        self.state = SegmenterState::Speaking;
                        self.utterance.clear();
                        self.utterance.extend_from_slice(window);
                        self.voiced = window.len();
                        self.silence_counter = 0;
                        tracing::trace!(energy, "speech detected");
                        event = SegmentEvent::Started;
                    }
                }
                SegmenterState::Speaking => {
                    self.utterance.extend_from_slice(window);

                    if is_speech {
                        self.voiced += window.len();
                        self.silence_counter = 0;
                    } else {
                        self.silence_counter += window.len();
                    }

                    if self.silence_counter > self.silence_samples {
                        if self.voiced >= self.min_speech_samples {
                            tracing::debug!(
                                samples = self.utterance.len(),
                                voiced = self.voiced,
                                "utterance complete"
                            );
                            // Rest of this chunk goes with the trailing silence
                            return SegmentEvent::Ended;
                        }

                        tracing::trace!(voiced = self.voiced, "too short, discarding");
                        self.reset();
                        event = SegmentEvent::Discarded;
                    } else if event == SegmentEvent::None {
                        event = SegmentEvent::Continuing;
                    }
                }
            }
        }

        event
    }

    /// Take the finished (or in-progress) utterance, returning to idle
    pub fn take_utterance(&mut self) -> Vec<f32> {
        let utterance = std::mem::take(&mut self.utterance);
        self.reset();
        utterance
    }

    /// Audio of the utterance in progress
    #[must_use]
    pub fn utterance(&self) -> &[f32] {
        &self.utterance
    }

    /// Whether the current utterance has enough voiced audio to transcribe
    #[must_use]
    pub const fn has_speech(&self) -> bool {
        matches!(self.state, SegmenterState::Speaking) && self.voiced >= self.min_speech_samples
    }

    /// Reset to idle, dropping buffered audio
    pub fn reset(&mut self) {
        self.state = SegmenterState::Idle;
        self.utterance.clear();
        self.voiced = 0;
        self.silence_counter = 0;
    }

    /// Get current state
    #[must_use]
    pub const fn state(&self) -> SegmenterState {
        self.state
    }
}
