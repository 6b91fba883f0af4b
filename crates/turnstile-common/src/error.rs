//! Common error types for Turnstile components.

use thiserror::Error;

/// Errors raised while driving a verification session.
///
/// None of these are fatal to the process; each is scoped to one session
/// or one inbound event.
#[derive(Debug, Error)]
pub enum TurnstileError {
    /// A session is already pending for this member in this conversation
    #[error("verification already pending for member {member} in {conversation}")]
    DuplicateSession { conversation: i64, member: i64 },

    /// The button was pressed by someone other than the challenged member
    #[error("member {presser} tried to answer the challenge of member {target}")]
    IdentityMismatch { presser: i64, target: i64 },

    /// The session was already resolved (or never existed)
    #[error("verification window closed")]
    SessionExpiredOrAbsent,

    /// A call to the messaging platform failed
    #[error("platform action `{action}` failed: {source}")]
    PlatformAction {
        action: &'static str,
        #[source]
        source: PlatformError,
    },

    /// An interaction payload did not decode
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl TurnstileError {
    pub fn platform(action: &'static str, source: PlatformError) -> Self {
        Self::PlatformAction { action, source }
    }

    /// Returns true for the outcomes that are part of normal operation
    /// (lost races and duplicate deliveries) rather than faults.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            Self::DuplicateSession { .. } | Self::SessionExpiredOrAbsent
        )
    }
}

/// Errors returned by the messaging platform client.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// Network or transport failure
    #[error("transport error: {0}")]
    Transport(String),

    /// The platform rejected the request
    #[error("api error {code}: {description}")]
    Api { code: i64, description: String },

    /// The response could not be decoded
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl PlatformError {
    /// Returns true if this error should be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Api { code, .. } => *code == 429 || *code >= 500,
            Self::Decode(_) => false,
        }
    }
}
