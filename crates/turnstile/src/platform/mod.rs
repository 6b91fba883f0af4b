//! Messaging-platform boundary.
//!
//! The state machine never talks to the network directly; every side effect
//! goes through the `Platform` trait. `TelegramClient` is the production
//! implementation.

mod telegram;
#[cfg(test)]
pub mod testing;

pub use telegram::TelegramClient;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use turnstile_common::{ChatPermissions, ConversationId, MemberId, MessageRef, PlatformError};

/// An inline button on a challenge prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptButton {
    pub label: String,
    /// Opaque payload echoed back when the button is pressed
    pub payload: String,
}

/// A challenge prompt: image, caption and answer buttons
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengePrompt {
    /// URL or platform file reference of the challenge image
    pub image: String,
    /// HTML caption
    pub caption: String,
    pub buttons: Vec<PromptButton>,
    /// Message the prompt replies to (the join notification)
    pub reply_to: Option<MessageRef>,
}

/// Operations the bot needs from the messaging platform
#[async_trait]
pub trait Platform: Send + Sync {
    /// Set a member's posting rights, optionally until a deadline
    async fn restrict(
        &self,
        conversation: ConversationId,
        member: MemberId,
        permissions: ChatPermissions,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), PlatformError>;

    /// Restore full posting rights
    async fn unrestrict(
        &self,
        conversation: ConversationId,
        member: MemberId,
    ) -> Result<(), PlatformError> {
        self.restrict(conversation, member, ChatPermissions::full(), None)
            .await
    }

    async fn send_challenge_prompt(
        &self,
        conversation: ConversationId,
        prompt: &ChallengePrompt,
    ) -> Result<MessageRef, PlatformError>;

    async fn send_message(
        &self,
        conversation: ConversationId,
        text: &str,
    ) -> Result<MessageRef, PlatformError>;

    /// Delete a message. A message that is already gone is not an error.
    async fn delete_message(&self, message: MessageRef) -> Result<(), PlatformError>;

    /// Private notice to a member. Callers treat failure as non-fatal.
    async fn send_direct_notice(&self, member: MemberId, text: &str) -> Result<(), PlatformError>;

    /// Remove a member from the conversation.
    ///
    /// With `until` the ban lifts itself at the deadline; without it the
    /// member is unbanned immediately so they can rejoin.
    async fn ban_then_unban(
        &self,
        conversation: ConversationId,
        member: MemberId,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), PlatformError>;

    /// Acknowledge a button press, optionally with a notice to the presser
    async fn answer_interaction(
        &self,
        interaction_id: &str,
        text: Option<&str>,
        alert: bool,
    ) -> Result<(), PlatformError>;
}
