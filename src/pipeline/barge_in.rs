//! Barge-in cancellation
//!
//! Every synthesis gets a generation number and its own cancellation token.
//! Interrupting cancels the token of the newest generation; the relay and
//! completion waiter holding it notice at their next await.

use tokio_util::sync::CancellationToken;

/// Owner of the current synthesis generation's token
#[derive(Debug, Default)]
pub struct BargeIn {
    current: Option<CancellationToken>,
    generation: u64,
}

impl BargeIn {
    /// Create with no synthesis in flight
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh token for a new synthesis
    ///
    /// Any previous token is cancelled first so two generations are never
    /// live at once.
    pub fn begin(&mut self) -> (u64, CancellationToken) {
        self.interrupt();
        self.generation += 1;
        let token = CancellationToken::new();
        self.current = Some(token.clone());
        (self.generation, token)
    }

    /// Cancel the current generation
    ///
    /// Returns true if a live token was cancelled by this call.
    pub fn interrupt(&mut self) -> bool {
        match self.current.take() {
            Some(token) if !token.is_cancelled() => {
                token.cancel();
                true
            }
            _ => false,
        }
    }

    /// Whether a synthesis may still be producing audio
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.current.as_ref().is_some_and(|t| !t.is_cancelled())
    }

    /// Number of the newest generation (0 before the first)
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }
}
