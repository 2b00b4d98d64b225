//! Enunciate Voice Library Crate
//!
//! This library contains the realtime voice transport core: the connection
//! lifecycle, the session configuration controller, and the event router
//! that turns remote protocol events into conversational phases. Media and
//! network primitives are injected through the traits in [`transport`]; the
//! `signal` binary is a thin operator tool on top of [`signaling`].

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod health;
pub mod protocol;
pub mod router;
pub mod session;
pub mod signaling;
pub mod transport;

#[cfg(test)]
mod testing;

pub use client::{VoiceClient, spawn_voice_session};
pub use config::{ConfigError, VoiceConfig};
pub use connection::VoiceSession;
pub use error::{Result, VoiceError};
pub use events::{EventHub, InputMode, Phase, VoiceEvent};
pub use health::{HealthBoard, HealthSnapshot};
pub use session::UpdateOutcome;
pub use signaling::HttpSignaling;
