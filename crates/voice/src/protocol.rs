//! Defines the JSON message protocol spoken over the control channel.
//!
//! Outbound messages are `ClientEvent`s. Inbound messages are parsed in two
//! passes: first into a raw `serde_json::Value` (anything that fails here is
//! malformed and dropped), then into a `ServerEvent` for phase handling.
//! Assistant text is extracted from the raw value independently.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Error code the remote side returns when asked to cancel a response that
/// is not active. Expected after the stale-response cancel on channel open.
pub const BENIGN_CANCEL_ERROR_CODE: &str = "response_cancel_not_active";

/// Session type carried in every `session.update` envelope.
pub const SESSION_TYPE: &str = "realtime";

// --- Session configuration ---

/// A partial session configuration sent in a `session.update`.
///
/// Fields left as `None` are omitted from the wire so the remote side keeps
/// its current value. `extra` carries fields this crate does not model.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct SessionPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_modalities: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioConfig>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct AudioConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<AudioInputConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<AudioOutputConfig>,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct AudioInputConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_detection: Option<TurnDetection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcription: Option<AudioTranscription>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct AudioTranscription {
    pub model: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct AudioOutputConfig {
    pub voice: String,
}

/// Remote voice-activity detection settings.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum TurnDetection {
    #[serde(rename = "server_vad")]
    ServerVad {
        threshold: f32,
        prefix_padding_ms: u32,
        silence_duration_ms: u32,
        create_response: bool,
        interrupt_response: bool,
    },
}

impl SessionPatch {
    /// A patch touching only the input turn-detection settings.
    pub fn turn_detection(turn_detection: TurnDetection) -> Self {
        Self {
            audio: Some(AudioConfig {
                input: Some(AudioInputConfig {
                    turn_detection: Some(turn_detection),
                    transcription: None,
                }),
                output: None,
            }),
            ..Default::default()
        }
    }
}

/// The `session` object of a `session.update`: the patch plus its type tag.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SessionEnvelope {
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(flatten)]
    pub patch: SessionPatch,
}

// --- Outbound ---

/// Messages sent from the client to the remote realtime endpoint.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionEnvelope },
    #[serde(rename = "response.create")]
    ResponseCreate,
    #[serde(rename = "response.cancel")]
    ResponseCancel,
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioBufferCommit,
}

impl ClientEvent {
    pub fn session_update(patch: SessionPatch) -> Self {
        ClientEvent::SessionUpdate {
            session: SessionEnvelope {
                kind: SESSION_TYPE,
                patch,
            },
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

// --- Inbound ---

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ResponseRef {
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ErrorDetail {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

impl ErrorDetail {
    /// Whether this error only reports cancelling a response that was not active.
    pub fn is_benign(&self) -> bool {
        self.code.as_deref() == Some(BENIGN_CANCEL_ERROR_CODE)
    }
}

/// The subset of remote events that drive the phase machine.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped,
    #[serde(rename = "input_audio_buffer.committed")]
    BufferCommitted,
    #[serde(rename = "response.created")]
    ResponseCreated {
        #[serde(default)]
        response: Option<ResponseRef>,
    },
    #[serde(rename = "response.done")]
    ResponseDone,
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        error: ErrorDetail,
    },
    #[serde(other)]
    Other,
}

/// One parsed inbound control-channel message.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub raw: Value,
    pub event: ServerEvent,
}

impl InboundMessage {
    /// Parses a text frame. Returns `None` for anything that is not a JSON object.
    ///
    /// A well-formed object whose known fields have unexpected shapes still
    /// parses; it is classified as `ServerEvent::Other`.
    pub fn parse(text: &str) -> Option<Self> {
        let raw: Value = serde_json::from_str(text).ok()?;
        if !raw.is_object() {
            return None;
        }
        let event = ServerEvent::deserialize(&raw).unwrap_or(ServerEvent::Other);
        Some(Self { raw, event })
    }

    pub fn event_type(&self) -> &str {
        self.raw.get("type").and_then(Value::as_str).unwrap_or("")
    }

    /// Extracts incremental assistant text, if the message carries any.
    ///
    /// Candidates in priority order: `delta`, `text`, then the first
    /// `item.content[]` entry with a `text` or `transcript` string. Empty
    /// strings do not count as present. Raw audio
    /// deltas carry base64 audio in `delta` and are skipped.
    pub fn assistant_text(&self) -> Option<&str> {
        if is_audio_payload(self.event_type()) {
            return None;
        }
        non_empty(self.raw.get("delta"))
            .or_else(|| non_empty(self.raw.get("text")))
            .or_else(|| {
                self.raw
                    .get("item")
                    .and_then(|item| item.get("content"))
                    .and_then(Value::as_array)
                    .and_then(|content| {
                        content.iter().find_map(|entry| {
                            non_empty(entry.get("text"))
                                .or_else(|| non_empty(entry.get("transcript")))
                        })
                    })
            })
    }
}

fn non_empty(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn is_audio_payload(event_type: &str) -> bool {
    event_type.ends_with(".audio.delta") || event_type.ends_with(".output_audio.delta")
}
