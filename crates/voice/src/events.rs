use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// The single authoritative conversational phase of a voice session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Disconnected,
    Connecting,
    Listening,
    Thinking,
    Speaking,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Disconnected => write!(f, "disconnected"),
            Phase::Connecting => write!(f, "connecting"),
            Phase::Listening => write!(f, "listening"),
            Phase::Thinking => write!(f, "thinking"),
            Phase::Speaking => write!(f, "speaking"),
        }
    }
}

/// Who ends the user's turn.
///
/// In `Tap` mode the client commits the audio buffer and asks for a
/// response explicitly. In `Auto` mode the remote side creates a response
/// once its voice-activity detection hears silence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputMode {
    #[default]
    Tap,
    Auto,
}

impl InputMode {
    /// Normalises a free-form mode name. Anything other than `auto` is `Tap`.
    pub fn normalize(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("auto") {
            InputMode::Auto
        } else {
            InputMode::Tap
        }
    }
}

impl fmt::Display for InputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputMode::Tap => write!(f, "tap"),
            InputMode::Auto => write!(f, "auto"),
        }
    }
}

/// High-level events the UI layer may depend on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VoiceEvent {
    /// The session is usable. Emitted once when signaling completes
    /// (`channel_ready: false`) and again when the control channel opens.
    Connected { channel_ready: bool },
    /// The session was torn down, by request or by a transport failure.
    Disconnected,
    /// A piece of assistant text extracted from the event stream.
    AssistantText { text: String },
}

/// Fans `VoiceEvent`s out to every subscriber without dropping any.
///
/// Each subscriber owns an unbounded queue, so a slow reader only grows its
/// own backlog. Subscribers whose receiver is gone are pruned on the next send.
#[derive(Debug, Clone, Default)]
pub struct EventHub {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<VoiceEvent>>>>,
}

impl EventHub {
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<VoiceEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(tx);
        rx
    }

    pub fn send(&self, event: VoiceEvent) {
        self.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::UnboundedSender<VoiceEvent>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
