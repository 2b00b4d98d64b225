//! Session configuration: `session.update` patches and turn-taking mode.

use crate::connection::VoiceSession;
use crate::error::Result;
use crate::events::InputMode;
use crate::health::HealthPatch;
use crate::protocol::{ClientEvent, SessionPatch, TurnDetection};
use tracing::{debug, info};

pub const VAD_SILENCE_DURATION_MS: u32 = 500;
pub const VAD_PREFIX_PADDING_MS: u32 = 300;
pub const VAD_THRESHOLD: f32 = 0.5;

/// Result of submitting a session patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The channel was open and the write was accepted locally.
    Sent,
    /// The channel was not open; the patch now occupies the pending slot.
    Queued,
}

/// Holds at most one not-yet-sent patch. A newer patch replaces the older one.
#[derive(Debug, Default)]
pub struct PendingSessionPatch {
    slot: Option<SessionPatch>,
}

impl PendingSessionPatch {
    /// Stores `patch`, returning the patch it displaced, if any.
    pub fn replace(&mut self, patch: SessionPatch) -> Option<SessionPatch> {
        self.slot.replace(patch)
    }

    pub fn take(&mut self) -> Option<SessionPatch> {
        self.slot.take()
    }

    pub fn peek(&self) -> Option<&SessionPatch> {
        self.slot.as_ref()
    }

    pub fn is_pending(&self) -> bool {
        self.slot.is_some()
    }
}

/// The voice-activity-detection patch for a turn-taking mode.
///
/// `tap` and `auto` differ only in whether the remote side creates a
/// response by itself once it hears silence.
pub fn turn_taking_patch(mode: InputMode) -> SessionPatch {
    SessionPatch::turn_detection(TurnDetection::ServerVad {
        threshold: VAD_THRESHOLD,
        prefix_padding_ms: VAD_PREFIX_PADDING_MS,
        silence_duration_ms: VAD_SILENCE_DURATION_MS,
        create_response: mode == InputMode::Auto,
        interrupt_response: true,
    })
}

impl VoiceSession {
    /// Sends `patch` now if the control channel is open, otherwise queues it
    /// in the pending slot, replacing whatever was queued before.
    pub fn update_session(&mut self, patch: SessionPatch) -> Result<UpdateOutcome> {
        if !self.channel_is_open() {
            if self.pending_patch.replace(patch).is_some() {
                debug!("Replaced queued session patch with a newer one.");
            } else {
                debug!("Control channel not open; queued session patch.");
            }
            return Ok(UpdateOutcome::Queued);
        }
        self.send(&ClientEvent::session_update(patch))?;
        Ok(UpdateOutcome::Sent)
    }

    /// Sends the queued patch, if any. Returns `None` when nothing was pending.
    pub fn flush_pending_session_update(&mut self) -> Option<Result<UpdateOutcome>> {
        let patch = self.pending_patch.take()?;
        debug!("Flushing queued session patch.");
        Some(self.update_session(patch))
    }

    /// Switches turn-taking and tells the remote side about it.
    pub fn set_turn_taking(&mut self, mode: impl Into<InputMode>) -> Result<UpdateOutcome> {
        let mode = mode.into();
        if self.mode != mode {
            info!(from = %self.mode, to = %mode, "Turn-taking mode changed.");
        }
        self.mode = mode;
        if mode == InputMode::Auto {
            // Manual commits have no meaning once the remote side ends turns.
            self.tap.settle();
        }
        self.merge_health(HealthPatch {
            mode: Some(mode),
            ..Default::default()
        });
        self.update_session(turn_taking_patch(mode))
    }
}

impl From<&str> for InputMode {
    fn from(value: &str) -> Self {
        InputMode::normalize(value)
    }
}
