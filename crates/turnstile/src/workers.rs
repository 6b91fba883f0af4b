//! Background workers: the update poller and the timer dispatcher.
//!
//! Both run until the shutdown broadcast fires. Each inbound update and each
//! fired timer is handled on its own task, so a slow platform call never
//! holds up the stream and answers can race timeouts for real.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use turnstile_common::constants::POLL_RETRY_DELAY_SECS;

use crate::platform::TelegramClient;
use crate::router::ResponseRouter;
use crate::session::{Gatekeeper, TimerEvent};

/// Long-poll the Bot API and hand every update to the router
pub async fn update_poller(
    client: Arc<TelegramClient>,
    router: Arc<ResponseRouter>,
    ready: Arc<AtomicBool>,
    mut shutdown: broadcast::Receiver<()>,
) {
    tracing::info!("📬 Update poller started");

    let mut offset: Option<i64> = None;

    loop {
        let updates = tokio::select! {
            result = client.get_updates(offset) => result,
            _ = shutdown.recv() => {
                tracing::info!("📬 Update poller shutting down");
                break;
            }
        };

        let updates = match updates {
            Ok(updates) => {
                if !ready.swap(true, Ordering::Relaxed) {
                    tracing::info!("✅ Connected to Bot API");
                }
                updates
            }
            Err(e) => {
                tracing::warn!(error = %e, retryable = e.is_retryable(), "Failed to fetch updates");
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(POLL_RETRY_DELAY_SECS)) => continue,
                    _ = shutdown.recv() => break,
                }
            }
        };

        for update in updates {
            offset = Some(update.update_id + 1);

            let Some(event) = update.into_event() else {
                continue;
            };

            let router = router.clone();
            tokio::spawn(async move {
                router.dispatch(event).await;
            });
        }
    }
}

/// Drain fired timers into the gatekeeper
pub async fn timer_dispatcher(
    gatekeeper: Arc<Gatekeeper>,
    mut fired: mpsc::UnboundedReceiver<TimerEvent>,
    mut shutdown: broadcast::Receiver<()>,
) {
    tracing::info!("⏱️ Timer dispatcher started");

    loop {
        tokio::select! {
            event = fired.recv() => {
                let Some(event) = event else { break };
                let gatekeeper = gatekeeper.clone();
                tokio::spawn(async move {
                    gatekeeper.on_timer(event).await;
                });
            }
            _ = shutdown.recv() => {
                tracing::info!("⏱️ Timer dispatcher shutting down");
                break;
            }
        }
    }
}
