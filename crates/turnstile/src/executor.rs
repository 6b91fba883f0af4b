//! Platform side effects of session transitions.
//!
//! The executor borrows a session to read the references it needs and never
//! keeps it. Failures of the initial restriction and the prompt are returned
//! to the state machine; every cleanup failure after resolution is logged
//! and swallowed.

use chrono::{DateTime, TimeDelta, Utc};
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::time::Duration;
use turnstile_common::{
    AnswerAction, ChatPermissions, ConversationId, Member, MemberId, MessageRef, PlatformError,
    Resolution, TurnstileError,
};

use crate::config::{AppConfig, ChallengeConfig, NoticeConfig, PunitivePolicy, WelcomeConfig};
use crate::platform::{ChallengePrompt, Platform, PromptButton};
use crate::router::CallbackPayload;
use crate::session::{SessionId, VerificationSession};

/// A message to delete again after a delay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledDeletion {
    pub message: MessageRef,
    pub after: Duration,
}

/// Drives the platform for each session transition
pub struct ActionExecutor {
    platform: Arc<dyn Platform>,
    challenge: ChallengeConfig,
    punishment: PunitivePolicy,
    welcome: WelcomeConfig,
    notices: NoticeConfig,
}

impl ActionExecutor {
    pub fn new(platform: Arc<dyn Platform>, config: &AppConfig) -> Self {
        Self {
            platform,
            challenge: config.challenge.clone(),
            punishment: config.punishment,
            welcome: config.welcome.clone(),
            notices: config.notices.clone(),
        }
    }

    /// Make a newcomer read-only until the challenge resolves
    pub async fn restrict_newcomer(
        &self,
        conversation: ConversationId,
        member: MemberId,
    ) -> Result<(), TurnstileError> {
        self.platform
            .restrict(conversation, member, ChatPermissions::muted(), None)
            .await
            .map_err(|e| TurnstileError::platform("restrict", e))
    }

    /// Undo `restrict_newcomer` when the challenge could not be issued
    pub async fn lift_restriction(&self, conversation: ConversationId, member: MemberId) {
        if let Err(e) = self.platform.unrestrict(conversation, member).await {
            tracing::error!(
                conversation = %conversation,
                member = %member,
                error = %e,
                "Failed to lift restriction after aborted challenge"
            );
        }
    }

    /// Send the two-button challenge prompt for session `session_id`
    pub async fn send_prompt(
        &self,
        conversation: ConversationId,
        member: &Member,
        session_id: &SessionId,
        reply_to: Option<MessageRef>,
    ) -> Result<MessageRef, TurnstileError> {
        let prompt = self.build_prompt(member, session_id, reply_to);
        self.platform
            .send_challenge_prompt(conversation, &prompt)
            .await
            .map_err(|e| TurnstileError::platform("send_challenge_prompt", e))
    }

    fn build_prompt(
        &self,
        member: &Member,
        session_id: &SessionId,
        reply_to: Option<MessageRef>,
    ) -> ChallengePrompt {
        let button = |label: &str, action| PromptButton {
            label: label.to_string(),
            payload: CallbackPayload::new(action, member.id, session_id.clone()).to_string(),
        };

        let mut buttons = vec![
            button(&self.challenge.correct_label, AnswerAction::Correct),
            button(&self.challenge.wrong_label, AnswerAction::Wrong),
        ];
        if self.challenge.shuffle_buttons {
            buttons.shuffle(&mut rand::rng());
        }

        ChallengePrompt {
            image: self.challenge.image_url.clone(),
            caption: render(&self.challenge.caption, member.id, &member.display_name),
            buttons,
            reply_to,
        }
    }

    /// Apply the side effects of a resolved session.
    ///
    /// Returns the welcome message when it should be deleted later.
    pub async fn apply(
        &self,
        session: &VerificationSession,
        resolution: Resolution,
    ) -> Option<ScheduledDeletion> {
        if resolution.is_punitive() {
            self.punish(session, resolution).await;
            None
        } else {
            self.admit(session).await
        }
    }

    async fn admit(&self, session: &VerificationSession) -> Option<ScheduledDeletion> {
        let conversation = session.key.conversation;
        let member = session.key.member;

        if let Err(e) = self.platform.unrestrict(conversation, member).await {
            tracing::error!(
                conversation = %conversation,
                member = %member,
                error = %e,
                "Failed to restore posting rights"
            );
        }

        if let Some(prompt) = session.prompt_ref {
            self.delete_quietly(prompt).await;
        }

        if !self.welcome.enabled {
            return None;
        }

        let text = render(&self.welcome.text, member, &session.display_name);
        match self.platform.send_message(conversation, &text).await {
            Ok(message) => self
                .welcome
                .delete_after()
                .map(|after| ScheduledDeletion { message, after }),
            Err(e) => {
                tracing::warn!(conversation = %conversation, error = %e, "Failed to send welcome message");
                None
            }
        }
    }

    async fn punish(&self, session: &VerificationSession, resolution: Resolution) {
        let conversation = session.key.conversation;
        let member = session.key.member;

        futures::join!(
            self.delete_optional(session.prompt_ref),
            self.delete_optional(session.join_event_ref),
        );

        let result = match self.punishment {
            PunitivePolicy::Kick => self.platform.ban_then_unban(conversation, member, None).await,
            PunitivePolicy::Mute { duration_secs } => match deadline(duration_secs) {
                Some(until) => {
                    self.platform
                        .restrict(conversation, member, ChatPermissions::muted(), Some(until))
                        .await
                }
                None => self.kick_instead(conversation, member, duration_secs).await,
            },
            PunitivePolicy::TempBan { duration_secs } => match deadline(duration_secs) {
                Some(until) => {
                    self.platform
                        .ban_then_unban(conversation, member, Some(until))
                        .await
                }
                None => self.kick_instead(conversation, member, duration_secs).await,
            },
        };

        match result {
            Ok(()) => tracing::info!(
                conversation = %conversation,
                member = %member,
                resolution = %resolution,
                policy = ?self.punishment,
                "Punitive action applied"
            ),
            Err(e) => tracing::error!(
                conversation = %conversation,
                member = %member,
                error = %e,
                "Failed to apply punitive action"
            ),
        }

        if let Err(e) = self
            .platform
            .send_direct_notice(member, &self.notices.failed)
            .await
        {
            tracing::debug!(member = %member, error = %e, "Direct notice not delivered");
        }
    }

    /// Fallback when a timed policy's deadline cannot be represented
    async fn kick_instead(
        &self,
        conversation: ConversationId,
        member: MemberId,
        duration_secs: u64,
    ) -> Result<(), PlatformError> {
        tracing::warn!(
            conversation = %conversation,
            member = %member,
            duration_secs,
            "Punitive duration out of range, kicking instead"
        );
        self.platform.ban_then_unban(conversation, member, None).await
    }

    async fn delete_optional(&self, message: Option<MessageRef>) {
        if let Some(message) = message {
            self.delete_quietly(message).await;
        }
    }

    /// Delete a message, logging instead of failing
    pub async fn delete_quietly(&self, message: MessageRef) {
        if let Err(e) = self.platform.delete_message(message).await {
            tracing::warn!(message = %message, error = %e, "Failed to delete message");
        }
    }
}

/// Deadline `secs` from now, `None` if it does not fit a timestamp
fn deadline(secs: u64) -> Option<DateTime<Utc>> {
    let delta = TimeDelta::try_seconds(i64::try_from(secs).ok()?)?;
    Utc::now().checked_add_signed(delta)
}

/// Substitute `{mention}` with an HTML link to the member
fn render(template: &str, member: MemberId, display_name: &str) -> String {
    let mention = format!(
        r#"<a href="tg://user?id={}">{}</a>"#,
        member,
        escape_html(display_name)
    );
    template.replace("{mention}", &mention)
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
