//! Shared constants for Turnstile components.

/// Default Telegram Bot API base URL
pub const DEFAULT_API_BASE_URL: &str = "https://api.telegram.org";

/// Default HTTP listen address (health/metrics)
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8090";

/// Default challenge deadline in seconds
pub const DEFAULT_CHALLENGE_TIMEOUT_SECS: u64 = 60;

/// Default duration of the mute / temporary ban punitive policies (5 minutes)
pub const DEFAULT_PUNISHMENT_SECS: u64 = 300;

/// Shortest mute / temporary ban. The Bot API treats a deadline closer
/// than this as permanent.
pub const MIN_PUNISHMENT_SECS: u64 = 30;

/// Longest mute / temporary ban (366 days); anything further out is
/// permanent as well.
pub const MAX_PUNISHMENT_SECS: u64 = 366 * 24 * 60 * 60;

/// Welcome message lifetime before it is deleted again
pub const DEFAULT_WELCOME_TTL_SECS: u64 = 60;

/// Long-poll timeout for update fetching
pub const DEFAULT_POLL_TIMEOUT_SECS: u64 = 30;

/// Back-off after a failed update poll
pub const POLL_RETRY_DELAY_SECS: u64 = 5;

/// Random bytes in a session id (8 characters once base64-encoded)
pub const SESSION_ID_BYTES: usize = 6;

/// Interaction payload layout
pub mod callback {
    /// Prefix of every challenge button payload: verify_{action}_{member}_{session}
    pub const PREFIX: &str = "verify";

    /// Field separator
    pub const SEPARATOR: char = '_';

    /// Upper bound the platform places on button payloads
    pub const MAX_LEN: usize = 64;
}
