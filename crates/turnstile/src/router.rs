//! Inbound event routing.
//!
//! Decodes join notifications and button presses into state machine calls.
//! Button payloads are validated before anything touches the session store.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use turnstile_common::constants::callback;
use turnstile_common::{
    AnswerAction, ConversationId, Member, MemberId, MessageRef, Resolution, TurnstileError,
};

use crate::config::NoticeConfig;
use crate::platform::Platform;
use crate::session::{Answer, ClaimedAnswer, Gatekeeper, SessionId};

/// An event received from the platform's update stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// One notification announcing one or more new members
    MembersJoined {
        conversation: ConversationId,
        members: Vec<Member>,
        join_event: MessageRef,
    },
    ButtonPressed(Interaction),
}

/// A button press as delivered by the platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interaction {
    /// Platform id used to acknowledge the press
    pub id: String,
    /// Conversation of the message carrying the button, if known
    pub conversation: Option<ConversationId>,
    pub presser: MemberId,
    pub data: Option<String>,
}

/// Decoded challenge button payload: `verify_{action}_{member}_{session}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackPayload {
    pub action: AnswerAction,
    pub target: MemberId,
    pub session_id: SessionId,
}

impl CallbackPayload {
    pub fn new(action: AnswerAction, target: MemberId, session_id: SessionId) -> Self {
        Self {
            action,
            target,
            session_id,
        }
    }
}

impl fmt::Display for CallbackPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sep = callback::SEPARATOR;
        write!(
            f,
            "{}{sep}{}{sep}{}{sep}{}",
            callback::PREFIX,
            self.action,
            self.target,
            self.session_id
        )
    }
}

impl FromStr for CallbackPayload {
    type Err = TurnstileError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let malformed = |reason: &str| TurnstileError::MalformedPayload(format!("{reason}: {data:?}"));

        if data.len() > callback::MAX_LEN {
            return Err(malformed("payload too long"));
        }

        // The session id is last and may itself contain the separator
        let mut parts = data.splitn(4, callback::SEPARATOR);
        let (Some(prefix), Some(action), Some(target), Some(session)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(malformed("expected 4 fields"));
        };

        if prefix != callback::PREFIX {
            return Err(malformed("unknown prefix"));
        }
        let action: AnswerAction = action.parse()?;
        let target: MemberId = target
            .parse()
            .map_err(|_| malformed("invalid member id"))?;
        if session.is_empty()
            || !session
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return Err(malformed("invalid session id"));
        }

        Ok(Self::new(action, target, SessionId::from_raw(session)))
    }
}

/// Dispatches inbound events to the gatekeeper and acknowledges presses
pub struct ResponseRouter {
    gatekeeper: Arc<Gatekeeper>,
    platform: Arc<dyn Platform>,
    notices: NoticeConfig,
}

impl ResponseRouter {
    pub fn new(gatekeeper: Arc<Gatekeeper>, platform: Arc<dyn Platform>, notices: NoticeConfig) -> Self {
        Self {
            gatekeeper,
            platform,
            notices,
        }
    }

    pub async fn dispatch(&self, event: InboundEvent) {
        match event {
            InboundEvent::MembersJoined {
                conversation,
                members,
                join_event,
            } => self.handle_join(conversation, &members, join_event).await,
            InboundEvent::ButtonPressed(interaction) => {
                // Outcome is logged by the gatekeeper
                let _ = self.handle_button(&interaction).await;
            }
        }
    }

    /// Challenge every human in a join notification
    pub async fn handle_join(&self, conversation: ConversationId, members: &[Member], join_event: MessageRef) {
        for member in members.iter().filter(|m| !m.is_bot) {
            tracing::info!(
                conversation = %conversation,
                member = %member.id,
                name = %member.display_name,
                "New member joined"
            );

            // Errors are scoped to this member; keep going with the others
            if let Err(e) = self
                .gatekeeper
                .on_join(conversation, member, Some(join_event))
                .await
            {
                if !e.is_expected() {
                    tracing::warn!(conversation = %conversation, member = %member.id, error = %e, "Join not challenged");
                }
            }
        }
    }

    /// Validate a button press, claim the session, acknowledge the press,
    /// then run the side effects
    pub async fn handle_button(&self, interaction: &Interaction) -> Result<Resolution, TurnstileError> {
        let claimed = self.claim_button(interaction);

        let (text, alert) = match &claimed {
            Ok(_) | Err(TurnstileError::MalformedPayload(_)) => (None, false),
            Err(TurnstileError::IdentityMismatch { .. }) => (Some(self.notices.wrong_member.as_str()), true),
            Err(TurnstileError::SessionExpiredOrAbsent) => (Some(self.notices.window_closed.as_str()), false),
            Err(_) => (None, false),
        };

        if let Err(e) = self.platform.answer_interaction(&interaction.id, text, alert).await {
            tracing::debug!(interaction = %interaction.id, error = %e, "Failed to acknowledge interaction");
        }

        Ok(self.gatekeeper.settle(claimed?).await)
    }

    fn claim_button(&self, interaction: &Interaction) -> Result<ClaimedAnswer, TurnstileError> {
        let payload = match decode(interaction) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(
                    interaction = %interaction.id,
                    presser = %interaction.presser,
                    error = %e,
                    "Rejected interaction payload"
                );
                return Err(e);
            }
        };

        let conversation = interaction
            .conversation
            .ok_or_else(|| TurnstileError::MalformedPayload("interaction without conversation".to_string()))?;

        let answer = Answer {
            conversation,
            presser: interaction.presser,
            target: payload.target,
            session_id: payload.session_id,
            action: payload.action,
        };

        self.gatekeeper.on_answer(&answer)
    }
}

fn decode(interaction: &Interaction) -> Result<CallbackPayload, TurnstileError> {
    interaction
        .data
        .as_deref()
        .ok_or_else(|| TurnstileError::MalformedPayload("missing payload".to_string()))?
        .parse()
}
