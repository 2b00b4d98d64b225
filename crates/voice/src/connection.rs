//! Connection lifecycle: bringing the peer connection, microphone, control
//! channel and remote audio sink up in `connect()` and releasing all of them
//! in `disconnect()`.

use crate::error::{Result, VoiceError};
use crate::events::{EventHub, InputMode, Phase, VoiceEvent};
use crate::health::HealthPatch;
use crate::protocol::ClientEvent;
use crate::router::TapCommitState;
use crate::session::PendingSessionPatch;
use crate::transport::{
    ChannelState, Collaborators, ControlChannel, MicrophoneStream, PeerConnection, PeerState,
    RemoteAudioSink, SessionDescription, SessionInput, TransportEvent, TransportEvents,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

/// Label of the control channel the remote endpoint listens on.
pub const CONTROL_CHANNEL_LABEL: &str = "oai-events";

/// Resources owned by one live connection.
pub(crate) struct ConnectionContext {
    pub(crate) epoch: u64,
    peer: Box<dyn PeerConnection>,
    pub(crate) channel: Option<Box<dyn ControlChannel>>,
    microphone: Option<MicrophoneStream>,
    pub(crate) audio_sink: Option<Box<dyn RemoteAudioSink>>,
    metering: bool,
}

impl ConnectionContext {
    fn new(epoch: u64, peer: Box<dyn PeerConnection>) -> Self {
        Self {
            epoch,
            peer,
            channel: None,
            microphone: None,
            audio_sink: None,
            metering: false,
        }
    }
}

/// One voice session: the connection context plus the state the router and
/// the configuration controller work on.
///
/// All mutation goes through `&mut self`. Run it on a single task, either
/// directly or through [`crate::client::spawn_voice_session`].
pub struct VoiceSession {
    pub(crate) collab: Collaborators,
    pub(crate) inputs: mpsc::UnboundedSender<SessionInput>,
    events: EventHub,
    pub(crate) context: Option<ConnectionContext>,
    epoch: u64,
    pub(crate) phase: Phase,
    pub(crate) mode: InputMode,
    pub(crate) pending_patch: PendingSessionPatch,
    pub(crate) tap: TapCommitState,
    pub(crate) muted_by_interrupt: bool,
}

impl VoiceSession {
    /// Creates a disconnected session. Transport notifications and timer
    /// expiries arrive on the returned receiver and must be fed back through
    /// [`VoiceSession::handle_input`].
    pub fn new(collab: Collaborators) -> (Self, mpsc::UnboundedReceiver<SessionInput>) {
        let (inputs, inputs_rx) = mpsc::unbounded_channel();
        let session = Self {
            collab,
            inputs,
            events: EventHub::default(),
            context: None,
            epoch: 0,
            phase: Phase::Disconnected,
            mode: InputMode::Tap,
            pending_patch: PendingSessionPatch::default(),
            tap: TapCommitState::default(),
            muted_by_interrupt: false,
        };
        (session, inputs_rx)
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<VoiceEvent> {
        self.events.subscribe()
    }

    pub(crate) fn event_hub(&self) -> EventHub {
        self.events.clone()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn input_mode(&self) -> InputMode {
        self.mode
    }

    pub fn is_connected(&self) -> bool {
        self.context.is_some()
    }

    /// Brings the connection up. A no-op if a connection already exists.
    ///
    /// Fails only on peer-connection, microphone or signaling errors, after
    /// releasing everything acquired so far.
    pub async fn connect(&mut self) -> Result<()> {
        if self.context.is_some() {
            debug!("connect() ignored: a connection already exists.");
            return Ok(());
        }

        self.epoch += 1;
        let epoch = self.epoch;
        info!(epoch, "Connecting voice session.");
        self.set_phase(Phase::Connecting);
        self.merge_health(HealthPatch {
            mode: Some(self.mode),
            ..Default::default()
        });

        let events = TransportEvents::new(epoch, self.inputs.clone());
        let peer = match self.collab.peers.create(events).await {
            Ok(peer) => peer,
            Err(e) => {
                error!(error = %e, "Failed to create peer connection.");
                self.set_phase(Phase::Disconnected);
                return Err(e);
            }
        };

        let mut context = ConnectionContext::new(epoch, peer);
        if let Err(e) = establish(&self.collab, &mut context).await {
            error!(error = %e, "Voice connection failed; releasing partial resources.");
            self.teardown(Some(context)).await;
            self.set_phase(Phase::Disconnected);
            return Err(e);
        }

        self.context = Some(context);
        info!(epoch, "Remote description set; voice session signaled.");
        self.emit(VoiceEvent::Connected {
            channel_ready: false,
        });
        Ok(())
    }

    /// Tears the connection down. Safe to call at any time, any number of times.
    pub async fn disconnect(&mut self) {
        let context = self.context.take();
        if context.is_some() {
            info!("Disconnecting voice session.");
        }
        self.teardown(context).await;
        self.set_phase(Phase::Disconnected);
        self.emit(VoiceEvent::Disconnected);
    }

    /// Releases every resource in a fixed order. Each step is best-effort.
    async fn teardown(&mut self, context: Option<ConnectionContext>) {
        let mut sink = None;
        if let Some(mut context) = context {
            if let Some(mut channel) = context.channel.take() {
                if let Err(e) = channel.close().await {
                    warn!(error = %e, "Failed to close control channel.");
                }
            }
            if let Err(e) = context.peer.close().await {
                warn!(error = %e, "Failed to close peer connection.");
            }
            if let Some(microphone) = context.microphone.take() {
                microphone.stop_all();
            }
            if context.metering {
                self.collab.meter.stop();
            }
            sink = context.audio_sink.take();
        }

        self.tap.settle();
        if self.pending_patch.take().is_some() {
            debug!("Dropped session patch queued for the closed connection.");
        }
        self.mode = InputMode::Tap;
        self.muted_by_interrupt = false;
        if let Some(mut sink) = sink {
            sink.set_muted(false);
            sink.release();
        }
        self.merge_health(HealthPatch {
            pc: Some(PeerState::Closed),
            dc: Some(ChannelState::Closed),
            mode: Some(InputMode::Tap),
            active_response: Some(false),
            active_response_id: Some(None),
            ..Default::default()
        });
    }

    /// Feeds one transport notification or timer expiry into the session.
    pub async fn handle_input(&mut self, input: SessionInput) {
        match input {
            SessionInput::Transport { epoch, event } => {
                if self.context.as_ref().map(|c| c.epoch) != Some(epoch) {
                    trace!(epoch, "Ignoring event from a previous connection.");
                    return;
                }
                self.handle_transport_event(event).await;
            }
            SessionInput::CommitDeadline { cycle } => self.on_commit_deadline(cycle),
        }
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::PeerStateChanged(state) => {
                debug!(state = ?state, "Peer connection state changed.");
                self.merge_health(HealthPatch {
                    pc: Some(state),
                    ..Default::default()
                });
                if state.is_terminal() {
                    warn!(state = ?state, "Peer connection lost.");
                    self.disconnect().await;
                }
            }
            TransportEvent::IceStateChanged(state) => {
                debug!(state = ?state, "ICE connection state changed.");
                self.merge_health(HealthPatch {
                    ice: Some(state),
                    ..Default::default()
                });
            }
            TransportEvent::ChannelOpen => self.on_channel_open(),
            TransportEvent::ChannelClosed => {
                self.merge_health(HealthPatch {
                    dc: Some(ChannelState::Closed),
                    ..Default::default()
                });
                warn!("Control channel closed.");
                self.disconnect().await;
            }
            TransportEvent::ChannelMessage(text) => self.handle_channel_message(&text),
            TransportEvent::RemoteTrack(track) => {
                let Some(sink) = self.context.as_mut().and_then(|c| c.audio_sink.as_mut()) else {
                    warn!(track = %track.id(), "Remote track arrived without an audio sink.");
                    return;
                };
                debug!(track = %track.id(), "Attaching remote audio track.");
                if let Err(e) = sink.attach(track) {
                    warn!(error = %e, "Failed to attach remote audio track.");
                }
            }
        }
    }

    fn on_channel_open(&mut self) {
        info!("Control channel open.");
        self.merge_health(HealthPatch {
            dc: Some(ChannelState::Open),
            ..Default::default()
        });

        // Answered with a benign error when nothing is active; the router drops it.
        if let Err(e) = self.send(&ClientEvent::ResponseCancel) {
            debug!(error = %e, "Stale response cancel was not sent.");
        }

        let applied = match self.flush_pending_session_update() {
            Some(result) => result,
            None => self.set_turn_taking(self.mode),
        };
        if let Err(e) = applied {
            warn!(error = %e, "Failed to apply session configuration on open.");
        }

        self.set_phase(Phase::Listening);
        self.emit(VoiceEvent::Connected {
            channel_ready: true,
        });
    }

    pub(crate) fn channel_is_open(&self) -> bool {
        self.open_channel().is_some()
    }

    fn open_channel(&self) -> Option<&dyn ControlChannel> {
        self.context
            .as_ref()
            .and_then(|c| c.channel.as_deref())
            .filter(|channel| channel.is_open())
    }

    /// Writes one client event to the control channel.
    pub(crate) fn send(&self, event: &ClientEvent) -> Result<()> {
        let channel = self.open_channel().ok_or(VoiceError::ChannelNotOpen)?;
        let text = event.to_json()?;
        trace!(payload = %text, "Sending control message.");
        channel.send_text(&text)
    }

    pub(crate) fn set_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            debug!(from = %self.phase, to = %phase, "Phase transition.");
            self.phase = phase;
        }
    }

    pub(crate) fn emit(&self, event: VoiceEvent) {
        self.events.send(event);
    }

    pub(crate) fn merge_health(&self, patch: HealthPatch) {
        self.collab.health.merge(&patch);
    }
}

/// Steps 2 to 7 of `connect()`. Everything acquired is stored in `context`
/// as soon as it exists so a failure can release it.
async fn establish(collab: &Collaborators, context: &mut ConnectionContext) -> Result<()> {
    let mut sink = collab.audio_sinks.create()?;
    if let Err(e) = sink.prime_playback() {
        debug!(error = %e, "Eager playback not started; will retry when the track arrives.");
    }
    context.audio_sink = Some(sink);

    let microphone = context.microphone.insert(collab.microphone.acquire().await?);
    for track in microphone.tracks() {
        context.peer.add_track(track).await?;
    }
    collab.meter.start(microphone);
    context.metering = true;

    context.channel = Some(context.peer.create_control_channel(CONTROL_CHANNEL_LABEL)?);
    collab.health.merge(&HealthPatch {
        dc: Some(ChannelState::Connecting),
        ..Default::default()
    });

    let offer = context.peer.create_offer().await?;
    let offer_sdp = offer.sdp.clone();
    context.peer.set_local_description(offer).await?;

    let answer = collab.signaling.exchange_offer(&offer_sdp).await?;
    context
        .peer
        .set_remote_description(SessionDescription::answer(answer))
        .await?;
    Ok(())
}
