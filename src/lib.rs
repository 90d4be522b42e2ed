//! livecall - real-time conversational voice client
//!
//! Streams live microphone audio to a hosted voice model over a
//! bidirectional WebSocket session, plays the synthesized replies back
//! gaplessly against a shared playback clock, and assembles a turn-ordered
//! transcript of the exchange.

#![forbid(unsafe_code)]

/// Microphone capture pipeline (16 kHz mono, fixed-size frames)
pub mod capture;
/// Pure audio/wire codec helpers
pub mod codec;
/// Session configuration and credentials
pub mod config;
/// Conversation state machine and context
pub mod convo;
/// Crate error type
pub mod error;
/// Gapless playback scheduling (24 kHz output clock)
pub mod playback;
/// Realtime session transport to the live endpoint
pub mod session;
/// Turn-based transcript assembly
pub mod transcript;

pub use convo::{CallingRequest, Conversation, ConversationStatus};
pub use error::{LiveError, Result};
