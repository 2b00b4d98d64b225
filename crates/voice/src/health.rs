//! Read-only connection health projection for the UI.

use crate::events::InputMode;
use crate::transport::{ChannelState, IceState, PeerState};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HealthSnapshot {
    pub pc: Option<PeerState>,
    pub ice: Option<IceState>,
    pub dc: Option<ChannelState>,
    pub mode: InputMode,
    pub last_commit_at: Option<DateTime<Utc>>,
    pub last_reply_at: Option<DateTime<Utc>>,
    pub active_response: bool,
    pub active_response_id: Option<String>,
}

/// A partial update to a `HealthSnapshot`. `None` leaves a field untouched.
///
/// `active_response_id` is doubly optional so a patch can clear it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HealthPatch {
    pub pc: Option<PeerState>,
    pub ice: Option<IceState>,
    pub dc: Option<ChannelState>,
    pub mode: Option<InputMode>,
    pub last_commit_at: Option<DateTime<Utc>>,
    pub last_reply_at: Option<DateTime<Utc>>,
    pub active_response: Option<bool>,
    pub active_response_id: Option<Option<String>>,
}

impl HealthSnapshot {
    /// The only way a snapshot changes.
    pub fn merge(&mut self, patch: &HealthPatch) {
        if let Some(pc) = patch.pc {
            self.pc = Some(pc);
        }
        if let Some(ice) = patch.ice {
            self.ice = Some(ice);
        }
        if let Some(dc) = patch.dc {
            self.dc = Some(dc);
        }
        if let Some(mode) = patch.mode {
            self.mode = mode;
        }
        if let Some(at) = patch.last_commit_at {
            self.last_commit_at = Some(at);
        }
        if let Some(at) = patch.last_reply_at {
            self.last_reply_at = Some(at);
        }
        if let Some(active) = patch.active_response {
            self.active_response = active;
        }
        if let Some(id) = &patch.active_response_id {
            self.active_response_id = id.clone();
        }
    }
}

/// Receives health patches in the order the session observes them.
pub trait HealthSink: Send + Sync {
    fn merge(&self, patch: &HealthPatch);
}

/// Default `HealthSink` backed by a `watch` channel.
///
/// Subscribers always see the latest merged snapshot and can never write to it.
#[derive(Debug)]
pub struct HealthBoard {
    tx: watch::Sender<HealthSnapshot>,
}

impl HealthBoard {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(HealthSnapshot::default());
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<HealthSnapshot> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        self.tx.borrow().clone()
    }
}

impl Default for HealthBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthSink for HealthBoard {
    fn merge(&self, patch: &HealthPatch) {
        self.tx.send_modify(|snapshot| snapshot.merge(patch));
    }
}
