//! Chat message model shared by the renderer and the session controller

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Who produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// The avatar
    Ai,
    /// The local user (speech-to-text transcript)
    Human,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::Ai => write!(f, "ai"),
            MessageRole::Human => write!(f, "human"),
        }
    }
}

/// A single transcript entry
///
/// Timestamps are ISO-8601 UTC strings with millisecond precision, so
/// lexicographic comparison orders messages chronologically.
///
/// # Examples
///
/// ```
/// use avatalk::message::{ChatMessage, MessageRole};
///
/// let msg = ChatMessage::human("hello");
/// assert_eq!(msg.role, MessageRole::Human);
/// assert!(msg.is_final.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Message author
    pub role: MessageRole,
    /// Text content
    pub content: String,
    /// ISO-8601 creation time
    pub timestamp: String,
    /// Whether an AI message is complete; always `None` for human messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_final: Option<bool>,
}

impl ChatMessage {
    /// Create a finalized human message stamped with the current time
    pub fn human(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Human,
            content: content.into(),
            timestamp: now_timestamp(),
            is_final: None,
        }
    }

    /// Create an open (non-final) AI message with the given timestamp
    pub fn ai_open(content: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Ai,
            content: content.into(),
            timestamp: timestamp.into(),
            is_final: Some(false),
        }
    }

    /// Whether this message is a finalized AI message
    pub fn is_final_ai(&self) -> bool {
        self.role == MessageRole::Ai && self.is_final == Some(true)
    }
}

/// Current time as an ISO-8601 string with fixed millisecond precision
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Merge user and avatar messages into one transcript ordered by timestamp
///
/// The sort is stable, so messages sharing a timestamp keep their relative
/// order with user messages first.
pub fn merge_transcript(user: &[ChatMessage], avatar: &[ChatMessage]) -> Vec<ChatMessage> {
    let mut all: Vec<ChatMessage> = user.iter().chain(avatar.iter()).cloned().collect();
    all.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    all
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(role: MessageRole, content: &str, ts: &str) -> ChatMessage {
        ChatMessage {
            role,
            content: content.to_string(),
            timestamp: ts.to_string(),
            is_final: if role == MessageRole::Ai { Some(true) } else { None },
        }
    }

    #[test]
    fn test_timestamp_has_fixed_precision() {
        let ts = now_timestamp();
        // 2026-10-17T08:15:30.123Z
        assert_eq!(ts.len(), 24);
        assert!(ts.ends_with('Z'));
    }

    #[test]
    fn test_merge_transcript_orders_by_timestamp() {
        let user = vec![
            at(MessageRole::Human, "hi", "2026-01-01T00:00:01.000Z"),
            at(MessageRole::Human, "bye", "2026-01-01T00:00:05.000Z"),
        ];
        let avatar = vec![at(MessageRole::Ai, "hello!", "2026-01-01T00:00:02.500Z")];

        let merged = merge_transcript(&user, &avatar);
        let contents: Vec<&str> = merged.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["hi", "hello!", "bye"]);
    }

    #[test]
    fn test_serialization_uses_wire_names() {
        let msg = at(MessageRole::Ai, "x", "2026-01-01T00:00:00.000Z");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "ai");
        assert_eq!(json["isFinal"], true);

        let human = ChatMessage::human("y");
        let json = serde_json::to_value(&human).unwrap();
        assert!(json.get("isFinal").is_none());
    }
}
