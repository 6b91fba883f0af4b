//! Recording `Platform` double for unit tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use tokio::sync::Notify;
use turnstile_common::{ChatPermissions, ConversationId, MemberId, MessageRef, PlatformError};

use super::{ChallengePrompt, Platform};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Restrict {
        conversation: ConversationId,
        member: MemberId,
        permissions: ChatPermissions,
        timed: bool,
    },
    Prompt {
        message: MessageRef,
        payloads: Vec<String>,
    },
    Message {
        message: MessageRef,
        text: String,
    },
    Delete(MessageRef),
    DirectNotice {
        member: MemberId,
    },
    BanThenUnban {
        conversation: ConversationId,
        member: MemberId,
        timed: bool,
    },
    Answer {
        id: String,
        text: Option<String>,
        alert: bool,
    },
}

#[derive(Default)]
pub struct RecordingPlatform {
    calls: Mutex<Vec<Call>>,
    next_message_id: AtomicI64,
    fail_restrict: AtomicBool,
    fail_prompt: AtomicBool,
    fail_direct_notices: AtomicBool,
    prompt_gate: Mutex<Option<Arc<Notify>>>,
}

impl RecordingPlatform {
    pub fn new() -> Self {
        Self {
            next_message_id: AtomicI64::new(1000),
            ..Default::default()
        }
    }

    pub fn fail_restrict(&self) {
        self.fail_restrict.store(true, Ordering::SeqCst);
    }

    pub fn fail_prompt(&self) {
        self.fail_prompt.store(true, Ordering::SeqCst);
    }

    pub fn fail_direct_notices(&self) {
        self.fail_direct_notices.store(true, Ordering::SeqCst);
    }

    /// Park every prompt send after it is recorded until the returned
    /// gate is notified
    pub fn hold_prompts(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.prompt_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| predicate(c)).count()
    }

    /// Sent prompts in order: (prompt message, button payloads)
    pub fn prompts(&self) -> Vec<(MessageRef, Vec<String>)> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|c| match c {
                Call::Prompt { message, payloads } => Some((*message, payloads.clone())),
                _ => None,
            })
            .collect()
    }

    /// Payload of the `action` button on the most recent prompt
    pub fn last_payload(&self, action: &str) -> String {
        let (_, payloads) = self.prompts().pop().expect("no prompt sent");
        payloads
            .into_iter()
            .find(|p| p.starts_with(&format!("verify_{action}_")))
            .expect("no such button")
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn next_message(&self, conversation: ConversationId) -> MessageRef {
        MessageRef::new(conversation, self.next_message_id.fetch_add(1, Ordering::SeqCst))
    }
}

fn api_error(description: &str) -> PlatformError {
    PlatformError::Api {
        code: 400,
        description: description.to_string(),
    }
}

#[async_trait]
impl Platform for RecordingPlatform {
    async fn restrict(
        &self,
        conversation: ConversationId,
        member: MemberId,
        permissions: ChatPermissions,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), PlatformError> {
        if self.fail_restrict.load(Ordering::SeqCst) {
            return Err(api_error("Bad Request: not enough rights to restrict/unrestrict chat member"));
        }
        self.record(Call::Restrict {
            conversation,
            member,
            permissions,
            timed: until.is_some(),
        });
        Ok(())
    }

    async fn send_challenge_prompt(
        &self,
        conversation: ConversationId,
        prompt: &ChallengePrompt,
    ) -> Result<MessageRef, PlatformError> {
        if self.fail_prompt.load(Ordering::SeqCst) {
            return Err(api_error("Bad Request: wrong file identifier/HTTP URL specified"));
        }
        let message = self.next_message(conversation);
        self.record(Call::Prompt {
            message,
            payloads: prompt.buttons.iter().map(|b| b.payload.clone()).collect(),
        });

        let gate = self.prompt_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(message)
    }

    async fn send_message(
        &self,
        conversation: ConversationId,
        text: &str,
    ) -> Result<MessageRef, PlatformError> {
        let message = self.next_message(conversation);
        self.record(Call::Message {
            message,
            text: text.to_string(),
        });
        Ok(message)
    }

    async fn delete_message(&self, message: MessageRef) -> Result<(), PlatformError> {
        self.record(Call::Delete(message));
        Ok(())
    }

    async fn send_direct_notice(&self, member: MemberId, _text: &str) -> Result<(), PlatformError> {
        if self.fail_direct_notices.load(Ordering::SeqCst) {
            return Err(api_error("Forbidden: bot can't initiate conversation with a user"));
        }
        self.record(Call::DirectNotice { member });
        Ok(())
    }

    async fn ban_then_unban(
        &self,
        conversation: ConversationId,
        member: MemberId,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), PlatformError> {
        self.record(Call::BanThenUnban {
            conversation,
            member,
            timed: until.is_some(),
        });
        Ok(())
    }

    async fn answer_interaction(
        &self,
        interaction_id: &str,
        text: Option<&str>,
        alert: bool,
    ) -> Result<(), PlatformError> {
        self.record(Call::Answer {
            id: interaction_id.to_string(),
            text: text.map(str::to_string),
            alert,
        });
        Ok(())
    }
}
