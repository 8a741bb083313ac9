//! Avatar room abstraction
//!
//! The avatar streaming SDK (media transport, speech-to-text, avatar video)
//! is an external collaborator. This module defines the seam the session
//! controller talks to:
//!
//! - [`RoomConnector`] creates a room bound to the SDK server endpoint.
//! - [`AvatarRoom`] exposes the control surface of a joined room.
//! - [`RoomEvent`] is the closed set of events a room emits. Events are
//!   delivered over an unbounded channel returned alongside the room in a
//!   [`RoomHandle`].
//!
//! The serde representation of [`RoomEvent`] uses the SDK's wire event names
//! so a bridge can decode SDK payloads directly into the enum.
//!
//! [`loopback`] provides an in-process implementation used by the CLI's
//! offline mode and by tests.

pub mod loopback;

use std::sync::Arc;

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Result;

/// Speech-to-text event kinds reported for the user's microphone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SttEventType {
    /// Final transcript of an utterance
    Transcript,
    /// Interim transcript that may still change
    PartialTranscript,
    /// Voice activity started
    StartOfSpeech,
    /// Voice activity ended
    EndOfSpeech,
}

/// Speech-to-text payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SttData {
    /// Transcribed text; empty for voice-activity markers
    #[serde(default)]
    pub text: String,
    /// Event kind
    #[serde(rename = "eventType")]
    pub event_type: SttEventType,
}

impl SttData {
    /// Final transcript event
    pub fn transcript(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            event_type: SttEventType::Transcript,
        }
    }

    /// Voice-activity marker without text
    pub fn marker(event_type: SttEventType) -> Self {
        Self {
            text: String::new(),
            event_type,
        }
    }
}

/// Error reported asynchronously by the room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomError {
    /// Machine-readable error code
    pub code: String,
    /// Optional human-readable detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RoomError {
    /// Avatar could not be allocated on the hosting service
    pub const AVATAR_ALLOCATION_FAILED: &'static str = "AVATAR_ALLOCATION_FAILED";
    /// Media connection to the avatar failed
    pub const AVATAR_CONNECTION_FAILED: &'static str = "AVATAR_CONNECTION_FAILED";
    /// The avatar's language model backend is unreachable
    pub const LLM_CONNECTION_FAILED: &'static str = "LLM_CONNECTION_FAILED";

    /// Create an error with a code and detail message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: Some(message.into()),
        }
    }

    /// User-facing alert text for well-known codes
    ///
    /// Returns `None` for codes that should only be logged.
    pub fn alert_text(&self) -> Option<&'static str> {
        match self.code.as_str() {
            Self::AVATAR_ALLOCATION_FAILED => Some("Failed to allocate AI avatar"),
            Self::AVATAR_CONNECTION_FAILED => Some("Failed to connect to AI avatar"),
            Self::LLM_CONNECTION_FAILED => Some("Failed to connect to LLM"),
            _ => None,
        }
    }
}

/// Events emitted by a room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RoomEvent {
    /// The room finished joining
    #[serde(rename = "joined")]
    Joined,
    /// The session ended
    #[serde(rename = "left")]
    Left,
    /// The avatar started speaking
    #[serde(rename = "aiavatar-start-speaking")]
    AvatarStartSpeaking,
    /// The avatar stopped speaking
    #[serde(rename = "aiavatar-stop-speaking")]
    AvatarStopSpeaking,
    /// A text fragment of the avatar's current utterance
    #[serde(rename = "aiavatar-message")]
    AvatarMessage {
        /// Fragment text
        text: String,
    },
    /// Speech-to-text data for the user's microphone
    #[serde(rename = "stt-data")]
    SttData(SttData),
    /// Transport or allocation failure
    #[serde(rename = "error")]
    Error(RoomError),
}

impl RoomEvent {
    /// The SDK wire name of this event
    pub fn name(&self) -> &'static str {
        match self {
            RoomEvent::Joined => "joined",
            RoomEvent::Left => "left",
            RoomEvent::AvatarStartSpeaking => "aiavatar-start-speaking",
            RoomEvent::AvatarStopSpeaking => "aiavatar-stop-speaking",
            RoomEvent::AvatarMessage { .. } => "aiavatar-message",
            RoomEvent::SttData(_) => "stt-data",
            RoomEvent::Error(_) => "error",
        }
    }
}

/// Parameters for joining a provisioned session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOptions {
    /// Session id from the session descriptor
    pub session_id: String,
    /// Access token from the session descriptor
    pub token: String,
    /// Stream id from the session descriptor
    pub stream_id: String,
    /// Start with the microphone unmuted
    pub unmute_user_audio_on_joined: bool,
    /// Speech-to-text language code
    pub stt_language: String,
}

/// What the avatar should say
pub enum SpeakInput {
    /// A complete utterance
    Text(String),
    /// An utterance produced incrementally, e.g. by a language model
    Stream(BoxStream<'static, String>),
}

impl std::fmt::Debug for SpeakInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpeakInput::Text(text) => f.debug_tuple("Text").field(text).finish(),
            SpeakInput::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// A speak request forwarded to the room
///
/// `disable_interrupt` asks the room not to let a later speak request cut
/// this utterance off; the room enforces it.
#[derive(Debug)]
pub struct SpeakRequest {
    /// Text or text stream to speak
    pub input: SpeakInput,
    /// Protect this utterance from interruption
    pub disable_interrupt: bool,
}

impl SpeakRequest {
    /// One-shot text request
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            input: SpeakInput::Text(text.into()),
            disable_interrupt: false,
        }
    }

    /// Streaming request
    pub fn stream(stream: BoxStream<'static, String>) -> Self {
        Self {
            input: SpeakInput::Stream(stream),
            disable_interrupt: false,
        }
    }

    /// Set whether the utterance may be interrupted
    pub fn with_disable_interrupt(mut self, disable_interrupt: bool) -> Self {
        self.disable_interrupt = disable_interrupt;
        self
    }

    /// Whether this is a streaming request
    pub fn is_stream(&self) -> bool {
        matches!(self.input, SpeakInput::Stream(_))
    }
}

/// Control surface of a room
#[async_trait::async_trait]
pub trait AvatarRoom: Send + Sync + std::fmt::Debug {
    /// Join the provisioned session
    async fn join(&self, options: JoinOptions) -> Result<()>;

    /// Leave the session and release transport resources
    async fn leave(&self) -> Result<()>;

    /// Ask the avatar to speak
    async fn speak(&self, request: SpeakRequest) -> Result<()>;

    /// Interrupt the avatar's current utterance
    async fn stop_speaking(&self) -> Result<()>;

    /// Mute the local microphone track
    async fn mute_user_audio(&self) -> Result<()>;

    /// Unmute the local microphone track
    async fn unmute_user_audio(&self) -> Result<()>;
}

/// A freshly created room and its event channel
#[derive(Debug)]
pub struct RoomHandle {
    /// The room control surface
    pub room: Arc<dyn AvatarRoom>,
    /// Events emitted by the room
    pub events: mpsc::UnboundedReceiver<RoomEvent>,
}

/// Creates rooms bound to an SDK server endpoint
#[async_trait::async_trait]
pub trait RoomConnector: Send + Sync + std::fmt::Debug {
    /// Create a room bound to `server_url`
    async fn connect(&self, server_url: &str) -> Result<RoomHandle>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_wire_events() {
        let event: RoomEvent =
            serde_json::from_str(r#"{"type":"aiavatar-message","text":"Hi"}"#).unwrap();
        assert_eq!(
            event,
            RoomEvent::AvatarMessage {
                text: "Hi".to_string()
            }
        );

        let event: RoomEvent = serde_json::from_str(
            r#"{"type":"stt-data","text":"hello","eventType":"transcript"}"#,
        )
        .unwrap();
        assert_eq!(event, RoomEvent::SttData(SttData::transcript("hello")));

        let event: RoomEvent =
            serde_json::from_str(r#"{"type":"stt-data","eventType":"start_of_speech"}"#).unwrap();
        assert_eq!(
            event,
            RoomEvent::SttData(SttData::marker(SttEventType::StartOfSpeech))
        );

        let event: RoomEvent =
            serde_json::from_str(r#"{"type":"error","code":"LLM_CONNECTION_FAILED"}"#).unwrap();
        assert!(matches!(event, RoomEvent::Error(ref e) if e.code == "LLM_CONNECTION_FAILED"));
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        let result = serde_json::from_str::<RoomEvent>(r#"{"type":"mystery"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_event_name_matches_serde_tag() {
        let events = vec![
            RoomEvent::Joined,
            RoomEvent::Left,
            RoomEvent::AvatarStartSpeaking,
            RoomEvent::AvatarStopSpeaking,
            RoomEvent::AvatarMessage {
                text: "x".to_string(),
            },
            RoomEvent::SttData(SttData::transcript("x")),
            RoomEvent::Error(RoomError::new("E", "m")),
        ];
        for event in events {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["type"], event.name());
        }
    }

    #[test]
    fn test_alert_text_for_known_codes() {
        let err = RoomError::new(RoomError::AVATAR_ALLOCATION_FAILED, "busy");
        assert_eq!(err.alert_text(), Some("Failed to allocate AI avatar"));

        let err = RoomError::new("SOMETHING_ELSE", "?");
        assert_eq!(err.alert_text(), None);
    }

    #[test]
    fn test_speak_request_builders() {
        let request = SpeakRequest::text("hi").with_disable_interrupt(true);
        assert!(request.disable_interrupt);
        assert!(!request.is_stream());

        let stream = futures::stream::iter(vec!["a".to_string()]);
        let request = SpeakRequest::stream(Box::pin(stream));
        assert!(request.is_stream());
    }
}
