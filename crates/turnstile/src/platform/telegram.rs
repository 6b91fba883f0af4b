//! Telegram Bot API client.
//!
//! Every method is a JSON `POST {base}/bot{token}/{method}`. The API answers
//! with `{"ok": bool, "result": ..., "description": ..., "error_code": ...}`
//! even for failed calls, so the body is decoded before the HTTP status is
//! looked at.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;
use turnstile_common::{
    ChatPermissions, ConversationId, Member, MemberId, MessageRef, PlatformError,
};

use super::{ChallengePrompt, Platform};
use crate::router::{InboundEvent, Interaction};

/// Default timeout for regular API calls.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default connection timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Extra time granted to a long poll on top of its server-side timeout.
const POLL_GRACE: Duration = Duration::from_secs(10);

/// Client for the Bot API
pub struct TelegramClient {
    /// HTTP client (reusable connection pool)
    http: reqwest::Client,
    /// `{api_base_url}/bot{token}`
    endpoint: String,
    poll_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<i64>,
}

/// `Update` object (only the fields the bot subscribes to)
#[derive(Debug, Deserialize)]
pub struct TgUpdate {
    pub update_id: i64,
    pub message: Option<TgMessage>,
    pub callback_query: Option<TgCallbackQuery>,
}

#[derive(Debug, Deserialize)]
pub struct TgMessage {
    pub message_id: i64,
    pub chat: TgChat,
    #[serde(default)]
    pub new_chat_members: Vec<TgUser>,
}

#[derive(Debug, Deserialize)]
pub struct TgChat {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct TgUser {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TgCallbackQuery {
    pub id: String,
    pub from: TgUser,
    pub message: Option<TgMessage>,
    pub data: Option<String>,
}

impl From<TgUser> for Member {
    fn from(user: TgUser) -> Self {
        let display_name = match user.last_name {
            Some(last) => format!("{} {}", user.first_name, last),
            None => user.first_name,
        };
        Member {
            id: MemberId(user.id),
            is_bot: user.is_bot,
            display_name,
            username: user.username,
        }
    }
}

impl TgUpdate {
    /// Convert into a router event; updates the bot does not act on yield `None`
    pub fn into_event(self) -> Option<InboundEvent> {
        if let Some(query) = self.callback_query {
            return Some(InboundEvent::ButtonPressed(Interaction {
                id: query.id,
                conversation: query.message.map(|m| ConversationId(m.chat.id)),
                presser: MemberId(query.from.id),
                data: query.data,
            }));
        }

        let message = self.message?;
        if message.new_chat_members.is_empty() {
            return None;
        }
        let conversation = ConversationId(message.chat.id);
        Some(InboundEvent::MembersJoined {
            conversation,
            members: message.new_chat_members.into_iter().map(Member::from).collect(),
            join_event: MessageRef::new(conversation, message.message_id),
        })
    }
}

impl TelegramClient {
    pub fn new(api_base_url: &str, token: &str, poll_timeout: Duration) -> Result<Self, PlatformError> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| PlatformError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            endpoint: format!("{}/bot{}", api_base_url.trim_end_matches('/'), token),
            poll_timeout,
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: &Value) -> Result<T, PlatformError> {
        self.call_with_timeout(method, body, DEFAULT_TIMEOUT).await
    }

    async fn call_with_timeout<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<T, PlatformError> {
        let url = format!("{}/{}", self.endpoint, method);

        let response = self
            .http
            .post(&url)
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                // reqwest errors carry the URL, which carries the token
                PlatformError::Transport(format!("{method}: {}", e.without_url()))
            })?;

        let status = response.status();
        let parsed: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| PlatformError::Decode(format!("{method} (HTTP {status}): {}", e.without_url())))?;

        if !parsed.ok {
            return Err(PlatformError::Api {
                code: parsed.error_code.unwrap_or_else(|| i64::from(status.as_u16())),
                description: parsed.description.unwrap_or_default(),
            });
        }

        parsed
            .result
            .ok_or_else(|| PlatformError::Decode(format!("{method}: ok response without result")))
    }

    /// Identity of the bot, used as a startup credential check
    pub async fn get_me(&self) -> Result<TgUser, PlatformError> {
        self.call("getMe", &json!({})).await
    }

    /// Long-poll for updates after `offset`
    pub async fn get_updates(&self, offset: Option<i64>) -> Result<Vec<TgUpdate>, PlatformError> {
        let mut body = json!({
            "timeout": self.poll_timeout.as_secs(),
            "allowed_updates": ["message", "callback_query"],
        });
        if let Some(offset) = offset {
            body["offset"] = json!(offset);
        }
        self.call_with_timeout("getUpdates", &body, self.poll_timeout + POLL_GRACE)
            .await
    }
}

/// The message is gone already; deleting it again is a no-op
fn is_already_deleted(error: &PlatformError) -> bool {
    matches!(
        error,
        PlatformError::Api { description, .. } if description.contains("message to delete not found")
    )
}

#[async_trait]
impl Platform for TelegramClient {
    async fn restrict(
        &self,
        conversation: ConversationId,
        member: MemberId,
        permissions: ChatPermissions,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), PlatformError> {
        let mut body = json!({
            "chat_id": conversation.0,
            "user_id": member.0,
            "permissions": permissions,
            "use_independent_chat_permissions": true,
        });
        if let Some(until) = until {
            body["until_date"] = json!(until.timestamp());
        }
        self.call::<bool>("restrictChatMember", &body).await.map(drop)
    }

    async fn send_challenge_prompt(
        &self,
        conversation: ConversationId,
        prompt: &ChallengePrompt,
    ) -> Result<MessageRef, PlatformError> {
        let keyboard: Vec<Value> = prompt
            .buttons
            .iter()
            .map(|b| json!({ "text": b.label, "callback_data": b.payload }))
            .collect();

        let mut body = json!({
            "chat_id": conversation.0,
            "photo": prompt.image,
            "caption": prompt.caption,
            "parse_mode": "HTML",
            "reply_markup": { "inline_keyboard": [keyboard] },
        });
        if let Some(reply_to) = prompt.reply_to {
            body["reply_parameters"] = json!({
                "message_id": reply_to.message_id,
                "allow_sending_without_reply": true,
            });
        }

        let message: TgMessage = self.call("sendPhoto", &body).await?;
        Ok(MessageRef::new(ConversationId(message.chat.id), message.message_id))
    }

    async fn send_message(
        &self,
        conversation: ConversationId,
        text: &str,
    ) -> Result<MessageRef, PlatformError> {
        let body = json!({
            "chat_id": conversation.0,
            "text": text,
            "parse_mode": "HTML",
        });
        let message: TgMessage = self.call("sendMessage", &body).await?;
        Ok(MessageRef::new(ConversationId(message.chat.id), message.message_id))
    }

    async fn delete_message(&self, message: MessageRef) -> Result<(), PlatformError> {
        let body = json!({
            "chat_id": message.conversation.0,
            "message_id": message.message_id,
        });
        match self.call::<bool>("deleteMessage", &body).await {
            Ok(_) => Ok(()),
            Err(e) if is_already_deleted(&e) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn send_direct_notice(&self, member: MemberId, text: &str) -> Result<(), PlatformError> {
        // A private chat shares the user's id
        let body = json!({ "chat_id": member.0, "text": text });
        self.call::<TgMessage>("sendMessage", &body).await.map(drop)
    }

    async fn ban_then_unban(
        &self,
        conversation: ConversationId,
        member: MemberId,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), PlatformError> {
        let mut ban = json!({
            "chat_id": conversation.0,
            "user_id": member.0,
        });

        match until {
            Some(until) => {
                ban["until_date"] = json!(until.timestamp());
                self.call::<bool>("banChatMember", &ban).await.map(drop)
            }
            None => {
                self.call::<bool>("banChatMember", &ban).await?;
                let unban = json!({
                    "chat_id": conversation.0,
                    "user_id": member.0,
                    "only_if_banned": true,
                });
                self.call::<bool>("unbanChatMember", &unban).await.map(drop)
            }
        }
    }

    async fn answer_interaction(
        &self,
        interaction_id: &str,
        text: Option<&str>,
        alert: bool,
    ) -> Result<(), PlatformError> {
        let body = json!({
            "callback_query_id": interaction_id,
            "text": text,
            "show_alert": alert,
        });
        self.call::<bool>("answerCallbackQuery", &body).await.map(drop)
    }
}
