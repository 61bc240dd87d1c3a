//! Streaming completion relay
//!
//! Forwards each completion delta into the open synthesis input the moment
//! it arrives, so speech starts with the first sentence rather than after
//! the whole reply.

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use super::outbound::{Outbound, OutboundSender};
use crate::Error;
use crate::chat::{ChatCompletion, Turn};
use crate::speech::TextInput;

/// How a relay ended
#[derive(Debug)]
pub enum RelayOutcome {
    /// The completion stream ended; carries the full reply
    Completed(String),
    /// Barge-in cancelled the relay; carries what was forwarded so far
    Interrupted(String),
    /// The completion could not be started or broke mid-stream
    Failed(Error),
}

impl RelayOutcome {
    /// Assistant text worth recording in the conversation
    #[must_use]
    pub fn spoken_text(&self) -> Option<&str> {
        match self {
            Self::Completed(text) | Self::Interrupted(text) if !text.trim().is_empty() => {
                Some(text.as_str())
            }
            _ => None,
        }
    }
}

/// Everything one relay run needs
pub struct Relay {
    pub chat: Arc<dyn ChatCompletion>,
    pub input: TextInput,
    pub turns: Vec<Turn>,
    pub token: CancellationToken,
    pub outbound: OutboundSender,
}

impl Relay {
    /// Stream the completion into the synthesis input until it ends or the
    /// token is cancelled
    ///
    /// The input is closed on every path before this returns.
    pub async fn run(self) -> RelayOutcome {
        let Self {
            chat,
            input,
            turns,
            token,
            outbound,
        } = self;

        let started = Instant::now();

        let mut stream = tokio::select! {
            biased;
            () = token.cancelled() => {
                input.close();
                return RelayOutcome::Interrupted(String::new());
            }
            stream = chat.stream(&turns) => match stream {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::error!(error = %e, "failed to start completion");
                    input.close();
                    return RelayOutcome::Failed(e);
                }
            },
        };

        let mut input = Some(input);
        let mut reply = String::new();
        let mut first_token = None;

        let outcome = loop {
            let delta = tokio::select! {
                biased;
                () = token.cancelled() => break RelayOutcome::Interrupted(reply),
                delta = stream.next() => delta,
            };

            match delta {
                Some(Ok(delta)) if delta.is_empty() => {}
                Some(Ok(delta)) => {
                    if first_token.is_none() {
                        let ttft = started.elapsed();
                        first_token = Some(ttft);
                        tracing::debug!(ttft_ms = ttft.as_millis(), "first completion token");
                    }

                    // The reply is still mirrored once the engine stops taking text
                    if let Some(Err(e)) = input.as_ref().map(|open| open.write(&delta)) {
                        tracing::warn!(error = %e, "synthesis input rejected text");
                        input = None;
                    }
                    reply.push_str(&delta);

                    tokio::select! {
                        biased;
                        () = token.cancelled() => break RelayOutcome::Interrupted(reply),
                        _ = outbound.publish(Outbound::AssistantText(delta)) => {}
                    }
                }
                Some(Err(e)) => {
                    tracing::error!(error = %e, "completion stream failed");
                    break RelayOutcome::Failed(e);
                }
                None => break RelayOutcome::Completed(reply),
            }
        };

        if let Some(input) = input {
            input.close();
        }
        drop(stream);

        match &outcome {
            RelayOutcome::Completed(text) => tracing::debug!(
                total_ms = started.elapsed().as_millis(),
                chars = text.len(),
                "completion relayed"
            ),
            RelayOutcome::Interrupted(text) => tracing::info!(
                after_ms = started.elapsed().as_millis(),
                chars = text.len(),
                "completion interrupted"
            ),
            RelayOutcome::Failed(_) => {}
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use futures::stream;

    use super::*;
    use crate::Result;
    use crate::chat::{DeltaStream, Role};
    use crate::pipeline::outbound::{OUTBOUND_CAPACITY, outbound_channel};
    use crate::speech::SynthesisTask;

    struct ScriptedChat(Vec<Result<String>>);

    #[async_trait]
    impl ChatCompletion for ScriptedChat {
        async fn stream(&self, _turns: &[Turn]) -> Result<DeltaStream> {
            let items: Vec<Result<String>> = self
                .0
                .iter()
                .map(|r| match r {
                    Ok(s) => Ok(s.clone()),
                    Err(e) => Err(Error::Chat(e.to_string())),
                })
                .collect();
            Ok(stream::iter(items).boxed())
        }
    }

    fn relay(chat: ScriptedChat) -> (Relay, crate::speech::TextReceiver, CancellationToken) {
        let (task, text_rx, _done) = SynthesisTask::channel();
        let (outbound, _rx) = outbound_channel();
        let token = CancellationToken::new();
        let relay = Relay {
            chat: Arc::new(chat),
            input: task.input,
            turns: vec![Turn::new(Role::User, "hi")],
            token: token.clone(),
            outbound,
        };
        (relay, text_rx, token)
    }

    #[tokio::test]
    async fn forwards_deltas_in_order_and_closes_input() {
        let chat = ScriptedChat(vec![
            Ok("Hel".to_string()),
            Ok(String::new()),
            Ok("lo.".to_string()),
        ]);
        let (relay, mut text_rx, _token) = relay(chat);

        let outcome = relay.run().await;
        assert!(matches!(&outcome, RelayOutcome::Completed(t) if t == "Hello."));

        let mut written = Vec::new();
        while let Some(text) = text_rx.recv().await {
            written.push(text);
        }
        assert_eq!(written, vec!["Hel", "lo."]);
    }

    #[tokio::test]
    async fn cancelled_before_start_is_interrupted() {
        let (relay, mut text_rx, token) = relay(ScriptedChat(vec![Ok("never".to_string())]));
        token.cancel();

        let outcome = relay.run().await;
        assert!(matches!(&outcome, RelayOutcome::Interrupted(t) if t.is_empty()));
        assert!(outcome.spoken_text().is_none());
        assert_eq!(text_rx.recv().await, None);
    }

    #[tokio::test]
    async fn cancel_unblocks_a_stalled_publish() {
        let (task, mut text_rx, _done) = SynthesisTask::channel();
        let (outbound, mut outbound_rx) = outbound_channel();
        for _ in 0..OUTBOUND_CAPACITY {
            assert!(outbound.publish(Outbound::Audio(vec![0, 0])).await);
        }

        let token = CancellationToken::new();
        let relay = Relay {
            chat: Arc::new(ScriptedChat(vec![
                Ok("Hel".to_string()),
                Ok("lo.".to_string()),
            ])),
            input: task.input,
            turns: vec![Turn::new(Role::User, "hi")],
            token: token.clone(),
            outbound,
        };
        let handle = tokio::spawn(relay.run());

        // The first delta reaches synthesis, then the full queue holds the relay
        assert_eq!(text_rx.recv().await.as_deref(), Some("Hel"));
        token.cancel();

        let outcome = tokio::time::timeout(std::time::Duration::from_secs(2), handle)
            .await
            .expect("relay stayed blocked on a full outbound queue")
            .unwrap();
        assert!(matches!(&outcome, RelayOutcome::Interrupted(t) if t == "Hel"));
        assert_eq!(text_rx.recv().await, None);

        // Nothing past the backlog was queued for the peer
        let mut queued = 0;
        while let Ok(message) = outbound_rx.try_recv() {
            assert_eq!(message, Outbound::Audio(vec![0, 0]));
            queued += 1;
        }
        assert_eq!(queued, OUTBOUND_CAPACITY);
    }

    #[tokio::test]
    async fn closed_synthesis_input_still_mirrors_text() {
        let (task, text_rx, _done) = SynthesisTask::channel();
        drop(text_rx);
        let (outbound, mut outbound_rx) = outbound_channel();
        let relay = Relay {
            chat: Arc::new(ScriptedChat(vec![
                Ok("One. ".to_string()),
                Ok("Two. ".to_string()),
                Ok("Three.".to_string()),
            ])),
            input: task.input,
            turns: vec![Turn::new(Role::User, "count")],
            token: CancellationToken::new(),
            outbound,
        };

        let outcome = relay.run().await;
        assert!(matches!(&outcome, RelayOutcome::Completed(t) if t == "One. Two. Three."));

        let mut mirrored = Vec::new();
        while let Ok(Outbound::AssistantText(text)) = outbound_rx.try_recv() {
            mirrored.push(text);
        }
        assert_eq!(mirrored, vec!["One. ", "Two. ", "Three."]);
    }

    #[tokio::test]
    async fn stream_error_fails_without_spoken_text() {
        let chat = ScriptedChat(vec![
            Ok("partial ".to_string()),
            Err(Error::Chat("reset".to_string())),
        ]);
        let (relay, _text_rx, _token) = relay(chat);

        let outcome = relay.run().await;
        assert!(matches!(outcome, RelayOutcome::Failed(_)));
        assert!(outcome.spoken_text().is_none());
    }
}
