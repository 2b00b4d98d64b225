//! Inbound event routing: the phase state machine, the manual (tap) turn
//! commit flow, and assistant text extraction.

use crate::connection::VoiceSession;
use crate::error::{Result, VoiceError};
use crate::events::{InputMode, Phase, VoiceEvent};
use crate::health::HealthPatch;
use crate::protocol::{ClientEvent, InboundMessage, ServerEvent};
use crate::transport::{CommitExpiry, SessionInput};
use chrono::Utc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Manual turn-taking state. Holds at most one armed timer.
#[derive(Debug, Default)]
pub(crate) struct TapCommitState {
    awaiting_commit: bool,
    cycle: u64,
    timer: Option<JoinHandle<()>>,
}

impl TapCommitState {
    /// Starts a new commit cycle, cancelling any previous timer first.
    fn arm(&mut self, timeout: Duration, inputs: &mpsc::UnboundedSender<SessionInput>) -> u64 {
        self.cancel_timer();
        self.cycle += 1;
        self.awaiting_commit = true;

        let cycle = self.cycle;
        let inputs = inputs.clone();
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = inputs.send(SessionInput::CommitDeadline { cycle });
        }));
        cycle
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    /// Ends the current cycle. Returns whether a commit was being awaited.
    pub(crate) fn settle(&mut self) -> bool {
        self.cancel_timer();
        std::mem::take(&mut self.awaiting_commit)
    }

    pub(crate) fn is_awaiting(&self) -> bool {
        self.awaiting_commit
    }

    pub(crate) fn has_pending_timer(&self) -> bool {
        self.timer.as_ref().is_some_and(|timer| !timer.is_finished())
    }
}

impl VoiceSession {
    /// Routes one inbound control-channel message.
    pub(crate) fn handle_channel_message(&mut self, text: &str) {
        let Some(message) = InboundMessage::parse(text) else {
            trace!("Dropped malformed control message.");
            return;
        };
        trace!(event_type = %message.event_type(), "Control message received.");

        match &message.event {
            ServerEvent::SpeechStarted => {
                if self.phase == Phase::Speaking && !self.muted_by_interrupt {
                    debug!("User barged in; muting assistant audio.");
                    self.muted_by_interrupt = true;
                    self.set_sink_muted(true);
                }
                self.set_phase(Phase::Listening);
            }
            ServerEvent::SpeechStopped => {
                if self.mode == InputMode::Auto {
                    self.set_phase(Phase::Thinking);
                }
            }
            ServerEvent::BufferCommitted => match self.mode {
                InputMode::Auto => self.set_phase(Phase::Thinking),
                InputMode::Tap => {
                    if self.tap.settle() {
                        debug!("Tap commit acknowledged.");
                        self.request_response();
                    }
                }
            },
            ServerEvent::ResponseCreated { response } => {
                let id = response.as_ref().and_then(|r| r.id.clone());
                if self.muted_by_interrupt {
                    self.muted_by_interrupt = false;
                    self.set_sink_muted(false);
                }
                self.set_phase(Phase::Speaking);
                self.merge_health(HealthPatch {
                    active_response: Some(true),
                    active_response_id: Some(id),
                    ..Default::default()
                });
            }
            ServerEvent::ResponseDone => {
                self.set_phase(Phase::Listening);
                self.merge_health(HealthPatch {
                    active_response: Some(false),
                    active_response_id: Some(None),
                    ..Default::default()
                });
            }
            ServerEvent::Error { error } => {
                if error.is_benign() {
                    return;
                }
                warn!(
                    code = error.code.as_deref().unwrap_or("unknown"),
                    message = error.message.as_deref().unwrap_or(""),
                    "Remote reported an error."
                );
            }
            ServerEvent::Other => {}
        }

        if let Some(text) = message.assistant_text() {
            self.emit(VoiceEvent::AssistantText {
                text: text.to_string(),
            });
        }
    }

    /// Ends the user's turn in tap mode: arms the commit timer, then commits
    /// the input buffer. A no-op in auto mode.
    pub fn commit_turn(&mut self) -> Result<()> {
        if self.mode != InputMode::Tap {
            debug!("commit_turn() ignored in auto mode.");
            return Ok(());
        }
        if !self.channel_is_open() {
            return Err(VoiceError::ChannelNotOpen);
        }

        let cycle = self.tap.arm(self.collab.commit_policy.timeout, &self.inputs);
        if let Err(e) = self.send(&ClientEvent::InputAudioBufferCommit) {
            self.tap.settle();
            return Err(e);
        }
        debug!(cycle, "Committed user turn; awaiting acknowledgement.");
        self.merge_health(HealthPatch {
            last_commit_at: Some(Utc::now()),
            ..Default::default()
        });
        Ok(())
    }

    pub(crate) fn on_commit_deadline(&mut self, cycle: u64) {
        if cycle != self.tap.cycle || !self.tap.is_awaiting() {
            trace!(cycle, "Ignoring stale commit deadline.");
            return;
        }
        self.tap.settle();
        match self.collab.commit_policy.on_expiry {
            CommitExpiry::CreateResponse => {
                info!(cycle, "Commit not acknowledged in time; requesting a response anyway.");
                self.request_response();
            }
            CommitExpiry::ReturnToListening => {
                info!(cycle, "Commit not acknowledged in time; returning to listening.");
                self.set_phase(Phase::Listening);
            }
        }
    }

    fn request_response(&mut self) {
        if let Err(e) = self.send(&ClientEvent::ResponseCreate) {
            warn!(error = %e, "Failed to request a response.");
        }
        self.merge_health(HealthPatch {
            last_reply_at: Some(Utc::now()),
            ..Default::default()
        });
        self.set_phase(Phase::Thinking);
    }

    fn set_sink_muted(&mut self, muted: bool) {
        if let Some(sink) = self.context.as_mut().and_then(|c| c.audio_sink.as_mut()) {
            sink.set_muted(muted);
        }
    }

    pub fn commit_timer_pending(&self) -> bool {
        self.tap.has_pending_timer()
    }
}
