//! Platform seams of the voice transport.
//!
//! The session never touches a concrete media stack. Peer connections,
//! control channels, microphones, audio playback and signaling are all
//! injected through the traits below, so the same state machine runs
//! against a browser bridge, a native WebRTC stack, or test fakes.

use crate::error::Result;
use crate::health::HealthSink;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl PeerState {
    /// States after which the peer connection will not recover on its own.
    pub fn is_terminal(self) -> bool {
        matches!(self, PeerState::Failed | PeerState::Closed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IceState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// An inbound media track handed to the remote audio sink.
pub trait RemoteMediaTrack: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;
}

/// Notifications raised by the platform for one connection.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    PeerStateChanged(PeerState),
    IceStateChanged(IceState),
    ChannelOpen,
    ChannelClosed,
    ChannelMessage(String),
    RemoteTrack(Arc<dyn RemoteMediaTrack>),
}

/// Everything that reaches the session task besides UI commands.
#[derive(Debug, Clone)]
pub enum SessionInput {
    /// A platform notification, stamped with the connection it belongs to.
    Transport { epoch: u64, event: TransportEvent },
    /// The tap-commit timer for `cycle` elapsed.
    CommitDeadline { cycle: u64 },
}

/// Handle given to the platform for reporting transport events.
///
/// Every event is stamped with the connection epoch it was created for, so
/// late callbacks from a torn-down connection are recognisable.
#[derive(Debug, Clone)]
pub struct TransportEvents {
    epoch: u64,
    tx: mpsc::UnboundedSender<SessionInput>,
}

impl TransportEvents {
    pub(crate) fn new(epoch: u64, tx: mpsc::UnboundedSender<SessionInput>) -> Self {
        Self { epoch, tx }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn emit(&self, event: TransportEvent) {
        if self
            .tx
            .send(SessionInput::Transport {
                epoch: self.epoch,
                event,
            })
            .is_err()
        {
            warn!(epoch = self.epoch, "Dropped transport event: session task is gone.");
        }
    }
}

/// A session description exchanged during signaling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub kind: SdpKind,
    pub sdp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Creates peer connections whose observers are wired before any async work.
#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(&self, events: TransportEvents) -> Result<Box<dyn PeerConnection>>;
}

#[async_trait]
pub trait PeerConnection: Send {
    async fn add_track(&mut self, track: &dyn MediaTrack) -> Result<()>;
    /// Opens the ordered, reliable control channel. Its open, close and
    /// message notifications are reported through the connection's `TransportEvents`.
    fn create_control_channel(&mut self, label: &str) -> Result<Box<dyn ControlChannel>>;
    async fn create_offer(&mut self) -> Result<SessionDescription>;
    async fn set_local_description(&mut self, description: SessionDescription) -> Result<()>;
    async fn set_remote_description(&mut self, description: SessionDescription) -> Result<()>;
    async fn close(&mut self) -> Result<()>;
}

#[async_trait]
pub trait ControlChannel: Send {
    fn is_open(&self) -> bool;
    /// Writes one text frame. Success means the write was accepted locally,
    /// not that the remote side acted on it.
    fn send_text(&self, text: &str) -> Result<()>;
    async fn close(&mut self) -> Result<()>;
}

pub trait MediaTrack: Send + Sync {
    fn id(&self) -> &str;
    fn stop(&self) -> Result<()>;
}

#[async_trait]
pub trait MicrophoneSource: Send + Sync {
    async fn acquire(&self) -> Result<MicrophoneStream>;
}

/// A captured microphone stream: one or more live tracks.
pub struct MicrophoneStream {
    tracks: Vec<Box<dyn MediaTrack>>,
}

impl MicrophoneStream {
    pub fn new(tracks: Vec<Box<dyn MediaTrack>>) -> Self {
        Self { tracks }
    }

    pub fn tracks(&self) -> impl Iterator<Item = &dyn MediaTrack> {
        self.tracks.iter().map(|track| track.as_ref())
    }

    /// Stops every track, continuing past individual failures.
    pub fn stop_all(&self) {
        for track in &self.tracks {
            if let Err(e) = track.stop() {
                warn!(track = %track.id(), error = %e, "Failed to stop microphone track.");
            }
        }
    }
}

impl fmt::Debug for MicrophoneStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MicrophoneStream")
            .field("tracks", &self.tracks.iter().map(|t| t.id()).collect::<Vec<_>>())
            .finish()
    }
}

/// Plays the remote assistant audio.
pub trait RemoteAudioSink: Send {
    /// Attempts to start playback while still inside the user gesture that
    /// triggered `connect()`. Off-browser this is a capability check.
    fn prime_playback(&mut self) -> Result<()>;
    fn attach(&mut self, track: Arc<dyn RemoteMediaTrack>) -> Result<()>;
    fn set_muted(&mut self, muted: bool);
    /// Pauses playback, detaches the source and removes the sink.
    fn release(&mut self);
}

pub trait AudioSinkFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn RemoteAudioSink>>;
}

/// Exchanges a local offer for a remote answer. Used once per `connect()`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SignalingClient: Send + Sync {
    async fn exchange_offer(&self, offer_sdp: &str) -> Result<String>;
}

/// Local microphone level metering, owned by the UI layer.
pub trait LevelMeter: Send + Sync {
    fn start(&self, microphone: &MicrophoneStream);
    fn stop(&self);
}

/// A `LevelMeter` for hosts that do not visualise input levels.
#[derive(Debug, Default)]
pub struct NoopMeter;

impl LevelMeter for NoopMeter {
    fn start(&self, _microphone: &MicrophoneStream) {}
    fn stop(&self) {}
}

/// What to do when a tap commit is never acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommitExpiry {
    /// Ask for a response anyway.
    #[default]
    CreateResponse,
    /// Give up on the turn and go back to listening.
    ReturnToListening,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TapCommitPolicy {
    pub timeout: Duration,
    pub on_expiry: CommitExpiry,
}

impl Default for TapCommitPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(1500),
            on_expiry: CommitExpiry::CreateResponse,
        }
    }
}

/// The injected platform for one voice session.
#[derive(Clone)]
pub struct Collaborators {
    pub peers: Arc<dyn PeerConnectionFactory>,
    pub microphone: Arc<dyn MicrophoneSource>,
    pub audio_sinks: Arc<dyn AudioSinkFactory>,
    pub signaling: Arc<dyn SignalingClient>,
    pub meter: Arc<dyn LevelMeter>,
    pub health: Arc<dyn HealthSink>,
    pub commit_policy: TapCommitPolicy,
}
