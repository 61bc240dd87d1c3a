//! Synthesis completion waiter
//!
//! A single worker per session awaits synthesis completions one at a time.
//! Outcomes and errors end here as log lines; nothing is reported back to
//! the router or the relay.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::speech::{SynthesisCompletion, SynthesisOutcome};

/// Tally of how queued syntheses ended
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WaiterStats {
    /// Finished speaking all their text
    pub completed: usize,
    /// Engine reported a stop
    pub stopped: usize,
    /// Engine reported an error
    pub failed: usize,
    /// Barge-in fired before the engine reported anything
    pub interrupted: usize,
}

type Pending = (SynthesisCompletion, CancellationToken);

/// Handle to a session's completion worker
pub struct CompletionWaiter {
    tx: mpsc::UnboundedSender<Pending>,
    worker: JoinHandle<WaiterStats>,
}

impl CompletionWaiter {
    /// Spawn the worker for a session
    #[must_use]
    pub fn spawn(session_id: Uuid) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(wait_loop(session_id, rx));
        Self { tx, worker }
    }

    /// Queue a completion, abandoned early if `token` is cancelled
    pub fn enqueue(&self, completion: SynthesisCompletion, token: CancellationToken) {
        if self.tx.send((completion, token)).is_err() {
            tracing::warn!("completion waiter already stopped");
        }
    }

    /// Stop accepting work and wait for the queue to drain
    pub async fn finish(self) -> WaiterStats {
        drop(self.tx);
        match self.worker.await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::warn!(error = %e, "completion waiter ended abnormally");
                WaiterStats::default()
            }
        }
    }
}

async fn wait_loop(session_id: Uuid, mut rx: mpsc::UnboundedReceiver<Pending>) -> WaiterStats {
    let mut stats = WaiterStats::default();

    while let Some((completion, token)) = rx.recv().await {
        tokio::select! {
            result = completion.wait() => match result {
                Ok(SynthesisOutcome::Completed { audio_bytes }) => {
                    stats.completed += 1;
                    tracing::debug!(%session_id, audio_bytes, "synthesis finished");
                }
                Ok(SynthesisOutcome::Stopped) => {
                    stats.stopped += 1;
                    tracing::debug!(%session_id, "synthesis stopped");
                }
                Err(e) => {
                    stats.failed += 1;
                    tracing::error!(%session_id, error = %e, "synthesis failed");
                }
            },
            () = token.cancelled() => {
                stats.interrupted += 1;
                tracing::debug!(%session_id, "stopped waiting on interrupted synthesis");
            }
        }
    }

    stats
}
