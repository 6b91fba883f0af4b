//! Core types shared across Turnstile components.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TurnstileError;

/// Identifier of a group conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub i64);

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a member (user account).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(pub i64);

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MemberId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(MemberId)
    }
}

/// A stable reference to a message posted in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    pub conversation: ConversationId,
    pub message_id: i64,
}

impl MessageRef {
    pub fn new(conversation: ConversationId, message_id: i64) -> Self {
        Self {
            conversation,
            message_id,
        }
    }
}

impl fmt::Display for MessageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.conversation, self.message_id)
    }
}

/// A member as seen in a join notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    pub is_bot: bool,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl Member {
    pub fn new(id: MemberId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            is_bot: false,
            display_name: display_name.into(),
            username: None,
        }
    }
}

/// The button a member pressed on a challenge prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerAction {
    Correct,
    Wrong,
}

impl AnswerAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Correct => "correct",
            Self::Wrong => "wrong",
        }
    }
}

impl fmt::Display for AnswerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnswerAction {
    type Err = TurnstileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "correct" => Ok(Self::Correct),
            "wrong" => Ok(Self::Wrong),
            other => Err(TurnstileError::MalformedPayload(format!(
                "unknown action {other:?}"
            ))),
        }
    }
}

/// Terminal outcome of a verification session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    /// Member pressed the correct button
    Correct,
    /// Member pressed the wrong button
    Wrong,
    /// The challenge deadline passed without an answer
    Expired,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Correct => "correct",
            Self::Wrong => "wrong",
            Self::Expired => "expired",
        }
    }

    /// Returns true if this outcome triggers the punitive action
    pub fn is_punitive(&self) -> bool {
        matches!(self, Self::Wrong | Self::Expired)
    }
}

impl From<AnswerAction> for Resolution {
    fn from(action: AnswerAction) -> Self {
        match action {
            AnswerAction::Correct => Self::Correct,
            AnswerAction::Wrong => Self::Wrong,
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Posting rights of a member in a conversation.
///
/// Field names follow the Bot API `ChatPermissions` object so the struct can
/// be serialized straight into a request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPermissions {
    pub can_send_messages: bool,
    pub can_send_audios: bool,
    pub can_send_documents: bool,
    pub can_send_photos: bool,
    pub can_send_videos: bool,
    pub can_send_video_notes: bool,
    pub can_send_voice_notes: bool,
    pub can_send_polls: bool,
    pub can_send_other_messages: bool,
    pub can_add_web_page_previews: bool,
}

impl ChatPermissions {
    /// Read-only: the member can see the conversation but not post.
    pub const fn muted() -> Self {
        Self::all(false)
    }

    /// Every posting right a regular member can hold.
    pub const fn full() -> Self {
        Self::all(true)
    }

    const fn all(allowed: bool) -> Self {
        Self {
            can_send_messages: allowed,
            can_send_audios: allowed,
            can_send_documents: allowed,
            can_send_photos: allowed,
            can_send_videos: allowed,
            can_send_video_notes: allowed,
            can_send_voice_notes: allowed,
            can_send_polls: allowed,
            can_send_other_messages: allowed,
            can_add_web_page_previews: allowed,
        }
    }
}

/// Counter snapshot for monitoring
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Sessions currently pending
    pub active_sessions: u64,

    /// Timers armed and not yet fired or cancelled
    pub armed_timers: u64,

    /// Sessions created since start
    pub sessions_created: u64,

    /// Sessions resolved by a correct answer
    pub resolved_correct: u64,

    /// Sessions resolved by a wrong answer
    pub resolved_wrong: u64,

    /// Sessions resolved by timeout
    pub resolved_expired: u64,

    /// Join notifications rejected because a session was already pending
    pub duplicate_joins: u64,

    /// Button presses by someone other than the challenged member
    pub identity_mismatches: u64,

    /// Answers that arrived after the session was already resolved
    pub late_answers: u64,

    /// Joins aborted because the member could not be restricted
    pub restriction_failures: u64,
}

impl MetricsSnapshot {
    pub fn resolved_total(&self) -> u64 {
        self.resolved_correct + self.resolved_wrong + self.resolved_expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_answer_action_parse() {
        assert_eq!("correct".parse::<AnswerAction>().unwrap(), AnswerAction::Correct);
        assert_eq!("wrong".parse::<AnswerAction>().unwrap(), AnswerAction::Wrong);
        assert!("Correct".parse::<AnswerAction>().is_err());
        assert!("".parse::<AnswerAction>().is_err());
    }

    #[test]
    fn test_resolution_is_punitive() {
        assert!(!Resolution::Correct.is_punitive());
        assert!(Resolution::Wrong.is_punitive());
        assert!(Resolution::Expired.is_punitive());
        assert_eq!(Resolution::from(AnswerAction::Wrong), Resolution::Wrong);
    }

    #[test]
    fn test_permissions_serialize_as_bot_api_object() {
        let json = serde_json::to_value(ChatPermissions::muted()).unwrap();
        assert_eq!(json["can_send_messages"], false);
        assert_eq!(json["can_add_web_page_previews"], false);
        assert_eq!(serde_json::to_value(ChatPermissions::full()).unwrap()["can_send_messages"], true);
    }

    #[test]
    fn test_ids_are_transparent() {
        let json = serde_json::to_string(&MemberId(42)).unwrap();
        assert_eq!(json, "42");
        assert_eq!(MessageRef::new(ConversationId(-100), 7).to_string(), "-100/7");
    }
}
