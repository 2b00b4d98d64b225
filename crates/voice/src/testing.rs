//! In-memory platform fakes shared by the unit tests.

use crate::connection::VoiceSession;
use crate::error::{Result, VoiceError};
use crate::events::VoiceEvent;
use crate::health::{HealthBoard, HealthSink};
use crate::transport::{
    AudioSinkFactory, Collaborators, ControlChannel, LevelMeter, MediaTrack, MicrophoneSource,
    MicrophoneStream, PeerConnection, PeerConnectionFactory, RemoteAudioSink, RemoteMediaTrack,
    SessionDescription, SessionInput, SignalingClient, TapCommitPolicy, TransportEvent,
    TransportEvents,
};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Default)]
struct PlatformState {
    track_count: usize,
    fail_microphone: bool,
    fail_track_stop: Vec<String>,
    fail_sends: bool,

    events: Option<TransportEvents>,
    peers_created: usize,
    peers_closed: usize,
    tracks_added: Vec<String>,
    live_tracks: Vec<Arc<AtomicBool>>,
    mic_acquisitions: usize,
    channels_created: usize,
    channels_closed: usize,
    channel_open: bool,
    sent: Vec<String>,
    local_description: Option<SessionDescription>,
    remote_description: Option<SessionDescription>,
    sinks_created: usize,
    sinks_released: usize,
    playback_primed: bool,
    sink_muted: bool,
    attached_tracks: Vec<String>,
    meter_running: bool,
}

/// A fake media stack that records every call made against it.
#[derive(Clone)]
pub(crate) struct FakePlatform {
    state: Arc<Mutex<PlatformState>>,
}

impl Default for FakePlatform {
    fn default() -> Self {
        Self::with_tracks(1)
    }
}

impl FakePlatform {
    pub(crate) fn with_tracks(track_count: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(PlatformState {
                track_count,
                ..Default::default()
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, PlatformState> {
        self.state.lock().unwrap()
    }

    pub(crate) fn fail_microphone(&self) {
        self.state().fail_microphone = true;
    }

    pub(crate) fn fail_track_stop(&self, id: &str) {
        self.state().fail_track_stop.push(id.to_string());
    }

    pub(crate) fn fail_sends(&self, fail: bool) {
        self.state().fail_sends = fail;
    }

    pub(crate) fn set_channel_open(&self, open: bool) {
        self.state().channel_open = open;
    }

    pub(crate) fn events_handle(&self) -> TransportEvents {
        self.state()
            .events
            .clone()
            .expect("no peer connection has been created")
    }

    pub(crate) fn peers_created(&self) -> usize {
        self.state().peers_created
    }

    pub(crate) fn peers_closed(&self) -> usize {
        self.state().peers_closed
    }

    pub(crate) fn tracks_added(&self) -> Vec<String> {
        self.state().tracks_added.clone()
    }

    pub(crate) fn live_tracks(&self) -> usize {
        self.state()
            .live_tracks
            .iter()
            .filter(|live| live.load(Ordering::SeqCst))
            .count()
    }

    pub(crate) fn mic_acquisitions(&self) -> usize {
        self.state().mic_acquisitions
    }

    pub(crate) fn channels_created(&self) -> usize {
        self.state().channels_created
    }

    pub(crate) fn channels_closed(&self) -> usize {
        self.state().channels_closed
    }

    pub(crate) fn local_description(&self) -> Option<SessionDescription> {
        self.state().local_description.clone()
    }

    pub(crate) fn remote_description(&self) -> Option<SessionDescription> {
        self.state().remote_description.clone()
    }

    pub(crate) fn sinks_created(&self) -> usize {
        self.state().sinks_created
    }

    pub(crate) fn sinks_released(&self) -> usize {
        self.state().sinks_released
    }

    pub(crate) fn playback_primed(&self) -> bool {
        self.state().playback_primed
    }

    pub(crate) fn sink_muted(&self) -> bool {
        self.state().sink_muted
    }

    pub(crate) fn attached_tracks(&self) -> Vec<String> {
        self.state().attached_tracks.clone()
    }

    pub(crate) fn meter_running(&self) -> bool {
        self.state().meter_running
    }

    /// Wires this platform into every collaborator slot except signaling.
    pub(crate) fn collaborators(
        &self,
        signaling: Arc<dyn SignalingClient>,
        health: Arc<HealthBoard>,
        commit_policy: TapCommitPolicy,
    ) -> Collaborators {
        Collaborators {
            peers: Arc::new(self.clone()),
            microphone: Arc::new(self.clone()),
            audio_sinks: Arc::new(self.clone()),
            signaling,
            meter: Arc::new(self.clone()),
            health: health as Arc<dyn HealthSink>,
            commit_policy,
        }
    }

    /// Every control message written so far, parsed as JSON.
    pub(crate) fn sent(&self) -> Vec<Value> {
        self.state()
            .sent
            .iter()
            .map(|text| serde_json::from_str(text).unwrap())
            .collect()
    }

    pub(crate) fn sent_of_type(&self, event_type: &str) -> Vec<Value> {
        self.sent()
            .into_iter()
            .filter(|msg| msg["type"] == event_type)
            .collect()
    }
}

struct FakePeer {
    state: Arc<Mutex<PlatformState>>,
}

#[async_trait]
impl PeerConnection for FakePeer {
    async fn add_track(&mut self, track: &dyn MediaTrack) -> Result<()> {
        self.state.lock().unwrap().tracks_added.push(track.id().to_string());
        Ok(())
    }

    fn create_control_channel(&mut self, _label: &str) -> Result<Box<dyn ControlChannel>> {
        self.state.lock().unwrap().channels_created += 1;
        Ok(Box::new(FakeChannel {
            state: self.state.clone(),
        }))
    }

    async fn create_offer(&mut self) -> Result<SessionDescription> {
        Ok(SessionDescription::offer("v=0 fake-offer"))
    }

    async fn set_local_description(&mut self, description: SessionDescription) -> Result<()> {
        self.state.lock().unwrap().local_description = Some(description);
        Ok(())
    }

    async fn set_remote_description(&mut self, description: SessionDescription) -> Result<()> {
        self.state.lock().unwrap().remote_description = Some(description);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.state.lock().unwrap().peers_closed += 1;
        Ok(())
    }
}

struct FakeChannel {
    state: Arc<Mutex<PlatformState>>,
}

#[async_trait]
impl ControlChannel for FakeChannel {
    fn is_open(&self) -> bool {
        self.state.lock().unwrap().channel_open
    }

    fn send_text(&self, text: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_sends {
            return Err(VoiceError::ChannelSend("simulated write failure".to_string()));
        }
        state.sent.push(text.to_string());
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.channel_open = false;
        state.channels_closed += 1;
        Ok(())
    }
}

struct FakeTrack {
    id: String,
    live: Arc<AtomicBool>,
    fail_stop: bool,
}

impl MediaTrack for FakeTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn stop(&self) -> Result<()> {
        if self.fail_stop {
            return Err(VoiceError::MicrophoneUnavailable(format!(
                "track {} refused to stop",
                self.id
            )));
        }
        self.live.store(false, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeSink {
    state: Arc<Mutex<PlatformState>>,
}

impl RemoteAudioSink for FakeSink {
    fn prime_playback(&mut self) -> Result<()> {
        self.state.lock().unwrap().playback_primed = true;
        Ok(())
    }

    fn attach(&mut self, track: Arc<dyn RemoteMediaTrack>) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .attached_tracks
            .push(track.id().to_string());
        Ok(())
    }

    fn set_muted(&mut self, muted: bool) {
        self.state.lock().unwrap().sink_muted = muted;
    }

    fn release(&mut self) {
        self.state.lock().unwrap().sinks_released += 1;
    }
}

#[derive(Debug)]
pub(crate) struct FakeRemoteTrack(pub String);

impl RemoteMediaTrack for FakeRemoteTrack {
    fn id(&self) -> &str {
        &self.0
    }
}

#[async_trait]
impl PeerConnectionFactory for FakePlatform {
    async fn create(&self, events: TransportEvents) -> Result<Box<dyn PeerConnection>> {
        let mut state = self.state();
        state.peers_created += 1;
        state.events = Some(events);
        Ok(Box::new(FakePeer {
            state: self.state.clone(),
        }))
    }
}

#[async_trait]
impl MicrophoneSource for FakePlatform {
    async fn acquire(&self) -> Result<MicrophoneStream> {
        let mut state = self.state();
        state.mic_acquisitions += 1;
        if state.fail_microphone {
            return Err(VoiceError::MicrophoneUnavailable(
                "permission denied".to_string(),
            ));
        }
        let mut tracks: Vec<Box<dyn MediaTrack>> = Vec::new();
        for index in 0..state.track_count {
            let id = format!("mic-{index}");
            let live = Arc::new(AtomicBool::new(true));
            state.live_tracks.push(live.clone());
            let fail_stop = state.fail_track_stop.contains(&id);
            tracks.push(Box::new(FakeTrack { id, live, fail_stop }));
        }
        Ok(MicrophoneStream::new(tracks))
    }
}

impl AudioSinkFactory for FakePlatform {
    fn create(&self) -> Result<Box<dyn RemoteAudioSink>> {
        self.state().sinks_created += 1;
        Ok(Box::new(FakeSink {
            state: self.state.clone(),
        }))
    }
}

#[async_trait]
impl SignalingClient for FakePlatform {
    async fn exchange_offer(&self, offer_sdp: &str) -> Result<String> {
        Ok(format!("answer-for:{offer_sdp}"))
    }
}

impl LevelMeter for FakePlatform {
    fn start(&self, _microphone: &MicrophoneStream) {
        self.state().meter_running = true;
    }

    fn stop(&self) {
        self.state().meter_running = false;
    }
}

/// A session wired to a `FakePlatform`, plus helpers to drive it.
pub(crate) struct Harness {
    pub session: VoiceSession,
    pub inputs: mpsc::UnboundedReceiver<SessionInput>,
    pub events: mpsc::UnboundedReceiver<VoiceEvent>,
    pub platform: FakePlatform,
    pub health: Arc<HealthBoard>,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self::with_platform(FakePlatform::default())
    }

    pub(crate) fn with_platform(platform: FakePlatform) -> Self {
        let signaling = Arc::new(platform.clone());
        Self::build(platform, signaling, TapCommitPolicy::default())
    }

    pub(crate) fn with_policy(policy: TapCommitPolicy) -> Self {
        let platform = FakePlatform::default();
        let signaling = Arc::new(platform.clone());
        Self::build(platform, signaling, policy)
    }

    pub(crate) fn with_signaling(
        platform: FakePlatform,
        signaling: Arc<dyn SignalingClient>,
    ) -> Self {
        Self::build(platform, signaling, TapCommitPolicy::default())
    }

    fn build(
        platform: FakePlatform,
        signaling: Arc<dyn SignalingClient>,
        commit_policy: TapCommitPolicy,
    ) -> Self {
        let health = Arc::new(HealthBoard::new());
        let collab = platform.collaborators(signaling, health.clone(), commit_policy);
        let (session, inputs) = VoiceSession::new(collab);
        let events = session.subscribe();
        Self {
            session,
            inputs,
            events,
            platform,
            health,
        }
    }

    /// Processes every input already queued for the session.
    pub(crate) async fn pump(&mut self) {
        while let Ok(input) = self.inputs.try_recv() {
            self.session.handle_input(input).await;
        }
    }

    /// Emits a transport event the way the platform would, then processes it.
    pub(crate) async fn deliver(&mut self, event: TransportEvent) {
        self.platform.events_handle().emit(event);
        self.pump().await;
    }

    pub(crate) async fn open_channel(&mut self) {
        self.platform.set_channel_open(true);
        self.deliver(TransportEvent::ChannelOpen).await;
    }

    pub(crate) async fn message(&mut self, text: &str) {
        self.deliver(TransportEvent::ChannelMessage(text.to_string()))
            .await;
    }

    pub(crate) async fn deliver_remote_track(&mut self, id: &str) {
        self.deliver(TransportEvent::RemoteTrack(Arc::new(FakeRemoteTrack(
            id.to_string(),
        ))))
        .await;
    }

    /// Waits for the next session input, or `None` if nothing arrives in `limit`.
    pub(crate) async fn next_input_within(&mut self, limit: Duration) -> Option<SessionInput> {
        tokio::time::timeout(limit, self.inputs.recv())
            .await
            .ok()
            .flatten()
    }

    pub(crate) fn drain_events(&mut self) -> Vec<VoiceEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }
}
