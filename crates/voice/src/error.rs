use thiserror::Error;

/// Errors surfaced by the voice transport.
///
/// Only acquisition and signaling failures ever reach the caller of
/// `connect()`. Transport drops, remote protocol errors and malformed
/// messages are absorbed by the session and expressed as phase changes.
#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("Microphone unavailable: {0}")]
    MicrophoneUnavailable(String),
    #[error("Peer connection error: {0}")]
    PeerConnection(String),
    #[error("Signaling failed: {0}")]
    Signaling(String),
    #[error("Signaling endpoint rejected the offer with status {status}: {body}")]
    SignalingRejected { status: u16, body: String },
    #[error("HTTP error during signaling: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Control channel is not open")]
    ChannelNotOpen,
    #[error("Failed to write to control channel: {0}")]
    ChannelSend(String),
    #[error("Failed to encode control message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Voice session task is no longer running")]
    SessionClosed,
}

pub type Result<T, E = VoiceError> = std::result::Result<T, E>;
