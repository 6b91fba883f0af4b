//! Application state and shared resources.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::config::AppConfig;
use crate::session::Gatekeeper;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<AppConfig>,

    /// Verification state machine
    pub gatekeeper: Arc<Gatekeeper>,

    /// Set once the update poller has talked to the platform successfully
    pub ready: Arc<AtomicBool>,

    /// Process start, for uptime reporting
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, gatekeeper: Arc<Gatekeeper>) -> Self {
        Self {
            config,
            gatekeeper,
            ready: Arc::new(AtomicBool::new(false)),
            started_at: Instant::now(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
