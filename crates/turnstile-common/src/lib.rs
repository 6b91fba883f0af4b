//! # Turnstile Common
//!
//! Shared types, errors, and constants used across Turnstile components.
//!
//! ## Modules
//! - `types` - Identifiers, permissions, resolutions, metrics
//! - `error` - Session and platform error types
//! - `constants` - Shared configuration constants

pub mod constants;
pub mod error;
pub mod types;

pub use error::{PlatformError, TurnstileError};
pub use types::*;
