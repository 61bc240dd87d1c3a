//! Barge-in duplex streaming pipeline
//!
//! Inbound audio flows through the recognizer; each final transcript starts
//! a completion relay feeding the synthesizer token by token; synthesized
//! audio and transcripts flow back out. New user speech cancels the
//! assistant speech still in flight.
//!
//! ```text
//! frame -> FrameDecoder -> Recognizer --events--> Session (coordinator)
//!                                                   | final
//!                                                   v
//!                            ChatCompletion -> Relay -> Synthesizer -> Outbound
//!                                                   |
//!                                          CompletionWaiter
//! ```

mod barge_in;
mod outbound;
mod relay;
mod session;
mod waiter;

pub use barge_in::BargeIn;
pub use outbound::{OUTBOUND_CAPACITY, Outbound, OutboundSender, outbound_channel};
pub use relay::{Relay, RelayOutcome};
pub use session::{
    Session, SessionEngines, SessionEvent, SessionHandle, SessionSettings, SessionSummary,
};
pub use waiter::{CompletionWaiter, WaiterStats};
