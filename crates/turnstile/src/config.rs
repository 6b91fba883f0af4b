//! Configuration management for Turnstile.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use turnstile_common::TurnstileError;
use turnstile_common::constants::{
    DEFAULT_API_BASE_URL, DEFAULT_CHALLENGE_TIMEOUT_SECS, DEFAULT_LISTEN_ADDR,
    DEFAULT_POLL_TIMEOUT_SECS, DEFAULT_PUNISHMENT_SECS, DEFAULT_WELCOME_TTL_SECS,
    MAX_PUNISHMENT_SECS, MIN_PUNISHMENT_SECS,
};

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Bot API credential (usually supplied via TELEGRAM_TOKEN)
    #[serde(default)]
    pub bot_token: BotToken,

    /// Bot API base URL
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// HTTP listen address for health and metrics
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Long-poll timeout for update fetching
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,

    /// Challenge prompt configuration
    #[serde(default)]
    pub challenge: ChallengeConfig,

    /// What happens on a wrong answer or timeout
    #[serde(default)]
    pub punishment: PunitivePolicy,

    /// Welcome message posted after a correct answer
    #[serde(default)]
    pub welcome: WelcomeConfig,

    /// Short notices shown to members
    #[serde(default)]
    pub notices: NoticeConfig,
}

/// Bot credential. Never printed.
#[derive(Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct BotToken(String);

impl BotToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for BotToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BotToken(***)")
    }
}

/// Challenge prompt configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ChallengeConfig {
    /// URL or file reference of the challenge image
    #[serde(default)]
    pub image_url: String,

    /// HTML caption; `{mention}` is replaced by a link to the member
    #[serde(default = "default_caption")]
    pub caption: String,

    #[serde(default = "default_correct_label")]
    pub correct_label: String,

    #[serde(default = "default_wrong_label")]
    pub wrong_label: String,

    /// Seconds before an unanswered challenge expires (0 disables the timeout)
    #[serde(default = "default_challenge_timeout")]
    pub timeout_secs: u64,

    /// Randomize button order per prompt
    #[serde(default = "default_true")]
    pub shuffle_buttons: bool,
}

impl ChallengeConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            image_url: String::new(),
            caption: default_caption(),
            correct_label: default_correct_label(),
            wrong_label: default_wrong_label(),
            timeout_secs: default_challenge_timeout(),
            shuffle_buttons: true,
        }
    }
}

/// Punitive action applied on a wrong answer or an expired challenge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum PunitivePolicy {
    /// Ban and immediately unban: the member is removed but may rejoin
    #[default]
    Kick,
    /// Keep the member read-only until the deadline
    Mute {
        #[serde(default = "default_punishment_secs")]
        duration_secs: u64,
    },
    /// Ban until the deadline, after which the platform lifts it
    TempBan {
        #[serde(default = "default_punishment_secs")]
        duration_secs: u64,
    },
}

impl PunitivePolicy {
    /// Length of a timed policy; `None` for a kick
    pub fn duration_secs(&self) -> Option<u64> {
        match self {
            Self::Kick => None,
            Self::Mute { duration_secs } | Self::TempBan { duration_secs } => Some(*duration_secs),
        }
    }
}

/// Welcome message configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WelcomeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// HTML text; `{mention}` is replaced by a link to the member
    #[serde(default = "default_welcome_text")]
    pub text: String,

    /// Seconds before the welcome message is deleted (0 keeps it)
    #[serde(default = "default_welcome_ttl")]
    pub delete_after_secs: u64,
}

impl WelcomeConfig {
    pub fn delete_after(&self) -> Option<Duration> {
        (self.delete_after_secs > 0).then(|| Duration::from_secs(self.delete_after_secs))
    }
}

impl Default for WelcomeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            text: default_welcome_text(),
            delete_after_secs: default_welcome_ttl(),
        }
    }
}

/// Short member-facing notices
#[derive(Debug, Clone, Deserialize)]
pub struct NoticeConfig {
    /// Alert for someone pressing another member's challenge
    #[serde(default = "default_wrong_member")]
    pub wrong_member: String,

    /// Shown when a button is pressed after the session resolved
    #[serde(default = "default_window_closed")]
    pub window_closed: String,

    /// Direct notice after a failed or expired challenge
    #[serde(default = "default_failed")]
    pub failed: String,
}

impl Default for NoticeConfig {
    fn default() -> Self {
        Self {
            wrong_member: default_wrong_member(),
            window_closed: default_window_closed(),
            failed: default_failed(),
        }
    }
}

// Default value functions
fn default_api_base_url() -> String { DEFAULT_API_BASE_URL.to_string() }
fn default_listen_addr() -> String { DEFAULT_LISTEN_ADDR.to_string() }
fn default_poll_timeout() -> u64 { DEFAULT_POLL_TIMEOUT_SECS }
fn default_challenge_timeout() -> u64 { DEFAULT_CHALLENGE_TIMEOUT_SECS }
fn default_punishment_secs() -> u64 { DEFAULT_PUNISHMENT_SECS }
fn default_welcome_ttl() -> u64 { DEFAULT_WELCOME_TTL_SECS }
fn default_true() -> bool { true }
fn default_correct_label() -> String { "I am human".to_string() }
fn default_wrong_label() -> String { "I am a bot".to_string() }
fn default_caption() -> String {
    "Welcome, {mention}! To post in this chat, confirm you are not a robot by pressing the correct answer.".to_string()
}
fn default_welcome_text() -> String {
    "✅ Hi, {mention}! Verification passed. Please read the chat rules.".to_string()
}
fn default_wrong_member() -> String { "This check is for another member.".to_string() }
fn default_window_closed() -> String { "This verification window has closed.".to_string() }
fn default_failed() -> String { "You did not pass the verification.".to_string() }

impl AppConfig {
    /// Load configuration from file and `TURNSTILE__*` environment
    /// variables, with CLI overrides
    pub fn load(config_path: &str, args: &super::Args) -> Result<Self> {
        let mut builder = config::Config::builder();

        if Path::new(config_path).exists() {
            builder = builder.add_source(config::File::with_name(config_path));
        } else {
            tracing::warn!(path = %config_path, "Config file not found, using defaults");
        }

        let mut config: AppConfig = builder
            .add_source(
                config::Environment::with_prefix("TURNSTILE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to load config")?
            .try_deserialize()
            .context("Failed to parse config")?;

        // Apply CLI overrides
        if let Some(token) = &args.token {
            config.bot_token = BotToken::new(token.clone());
        }
        if let Some(listen) = &args.listen {
            config.listen_addr = listen.clone();
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the bot cannot run with
    pub fn validate(&self) -> Result<(), TurnstileError> {
        if self.bot_token.is_empty() {
            return Err(TurnstileError::Config(
                "bot token missing (set TELEGRAM_TOKEN)".to_string(),
            ));
        }
        if self.challenge.image_url.trim().is_empty() {
            return Err(TurnstileError::Config(
                "challenge.image_url must be set".to_string(),
            ));
        }
        if self.challenge.correct_label.trim().is_empty()
            || self.challenge.wrong_label.trim().is_empty()
        {
            return Err(TurnstileError::Config(
                "button labels must not be empty".to_string(),
            ));
        }
        if self.challenge.correct_label == self.challenge.wrong_label {
            return Err(TurnstileError::Config(
                "correct and wrong labels must differ".to_string(),
            ));
        }
        if let Some(secs) = self.punishment.duration_secs() {
            if !(MIN_PUNISHMENT_SECS..=MAX_PUNISHMENT_SECS).contains(&secs) {
                return Err(TurnstileError::Config(format!(
                    "punishment.duration_secs must be within {MIN_PUNISHMENT_SECS}..={MAX_PUNISHMENT_SECS}, got {secs}"
                )));
            }
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bot_token: BotToken::default(),
            api_base_url: default_api_base_url(),
            listen_addr: default_listen_addr(),
            poll_timeout_secs: default_poll_timeout(),
            challenge: ChallengeConfig::default(),
            punishment: PunitivePolicy::default(),
            welcome: WelcomeConfig::default(),
            notices: NoticeConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> AppConfig {
        config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse("");
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.challenge.timeout(), Some(Duration::from_secs(60)));
        assert_eq!(config.punishment, PunitivePolicy::Kick);
        assert!(config.welcome.enabled);
        assert!(config.bot_token.is_empty());
    }

    #[test]
    fn test_punishment_variants() {
        let config = parse(
            r#"
            [punishment]
            policy = "mute"
            duration_secs = 120
            "#,
        );
        assert_eq!(config.punishment, PunitivePolicy::Mute { duration_secs: 120 });

        let config = parse(
            r#"
            [punishment]
            policy = "temp_ban"
            "#,
        );
        assert_eq!(
            config.punishment,
            PunitivePolicy::TempBan {
                duration_secs: DEFAULT_PUNISHMENT_SECS
            }
        );
    }

    #[test]
    fn test_zero_timeout_disables_deadline() {
        let config = parse(
            r#"
            [challenge]
            image_url = "https://example.org/cat.jpg"
            timeout_secs = 0
            "#,
        );
        assert_eq!(config.challenge.timeout(), None);
        assert_eq!(config.challenge.correct_label, "I am human");
    }

    #[test]
    fn test_validate() {
        let mut config = AppConfig::default();
        assert!(matches!(config.validate(), Err(TurnstileError::Config(_))));

        config.bot_token = BotToken::new("123:abc");
        assert!(config.validate().is_err());

        config.challenge.image_url = "https://example.org/cat.jpg".to_string();
        assert!(config.validate().is_ok());

        config.challenge.wrong_label = config.challenge.correct_label.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_punishment_duration_bounds() {
        let mut config = AppConfig {
            bot_token: BotToken::new("123:abc"),
            ..Default::default()
        };
        config.challenge.image_url = "https://example.org/cat.jpg".to_string();

        let mute = |duration_secs| PunitivePolicy::Mute { duration_secs };
        let temp_ban = |duration_secs| PunitivePolicy::TempBan { duration_secs };

        for policy in [
            mute(MIN_PUNISHMENT_SECS),
            mute(MAX_PUNISHMENT_SECS),
            temp_ban(DEFAULT_PUNISHMENT_SECS),
            PunitivePolicy::Kick,
        ] {
            config.punishment = policy;
            assert!(config.validate().is_ok(), "{policy:?} should be accepted");
        }

        // Too short or too long would be permanent on the platform
        for policy in [
            mute(5),
            mute(MIN_PUNISHMENT_SECS - 1),
            temp_ban(0),
            temp_ban(MAX_PUNISHMENT_SECS + 1),
            mute(10_000_000_000_000_000),
        ] {
            config.punishment = policy;
            assert!(
                matches!(config.validate(), Err(TurnstileError::Config(_))),
                "{policy:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_token_is_not_printed() {
        let config = AppConfig {
            bot_token: BotToken::new("123:secret"),
            ..Default::default()
        };
        assert!(!format!("{config:?}").contains("secret"));
    }
}
