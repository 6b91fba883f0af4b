//! Verification sessions: one pending challenge per joining member.
//!
//! - `store` - the take-once session map
//! - `machine` - the lifecycle state machine (`Gatekeeper`)

mod machine;
mod store;

pub use machine::{Answer, ClaimedAnswer, Gatekeeper, TimerEvent};
pub use store::SessionStore;

use chrono::{DateTime, Utc};
use std::fmt;
use turnstile_common::{ConversationId, MemberId, MessageRef, Resolution};

use crate::timer::TimerHandle;

/// Identifies the slot a session occupies: one per member per conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub conversation: ConversationId,
    pub member: MemberId,
}

impl SessionKey {
    pub fn new(conversation: ConversationId, member: MemberId) -> Self {
        Self {
            conversation,
            member,
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.conversation, self.member)
    }
}

/// Random per-session nonce carried by the prompt buttons and the timeout.
///
/// Lets a stale button or a stale timer from an earlier session of the same
/// member be told apart from the current one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh URL-safe id
    pub fn generate() -> Self {
        use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
        use rand::Rng;

        let mut bytes = [0u8; turnstile_common::constants::SESSION_ID_BYTES];
        rand::rng().fill(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Wrap an id decoded from an interaction payload
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Session lifecycle state. Only `Pending` sessions are ever stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Pending,
    Resolved(Resolution),
}

/// The live record of one member's verification challenge
#[derive(Debug)]
pub struct VerificationSession {
    pub id: SessionId,
    pub key: SessionKey,
    /// Shown in the welcome message
    pub display_name: String,
    /// The join notification, deleted on failure
    pub join_event_ref: Option<MessageRef>,
    /// The challenge prompt; `None` until the prompt has been delivered
    pub prompt_ref: Option<MessageRef>,
    pub created_at: DateTime<Utc>,
    pub state: SessionState,
    /// The session's timeout, if one is configured
    pub timer: Option<TimerHandle>,
}

impl VerificationSession {
    pub fn new(key: SessionKey, display_name: impl Into<String>, join_event_ref: Option<MessageRef>) -> Self {
        Self {
            id: SessionId::generate(),
            key,
            display_name: display_name.into(),
            join_event_ref,
            prompt_ref: None,
            created_at: Utc::now(),
            state: SessionState::Pending,
            timer: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state == SessionState::Pending
    }

    /// Move into the terminal state. Returns false if already resolved.
    pub fn resolve(&mut self, resolution: Resolution) -> bool {
        if !self.is_pending() {
            return false;
        }
        self.state = SessionState::Resolved(resolution);
        true
    }

    /// Milliseconds since the session was created
    pub fn age_ms(&self) -> i64 {
        (Utc::now() - self.created_at).num_milliseconds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_fits_in_payload() {
        let id = SessionId::generate();
        assert_eq!(id.as_str().len(), 8);
        assert_ne!(id, SessionId::generate());
    }

    #[test]
    fn test_resolve_only_once() {
        let key = SessionKey::new(ConversationId(-100), MemberId(1));
        let mut session = VerificationSession::new(key, "Alice", None);
        assert!(session.is_pending());

        assert!(session.resolve(Resolution::Correct));
        assert!(!session.resolve(Resolution::Expired));
        assert_eq!(session.state, SessionState::Resolved(Resolution::Correct));
    }
}
