//! One-shot, cancellable timers.
//!
//! Every armed timer runs on its own tokio task. When the deadline passes
//! the payload is pushed into an unbounded channel read by the timer
//! dispatcher. The payload is never delivered from inside `schedule`.
//!
//! Cancellation and firing race for the same map entry: whichever removes
//! it first decides the outcome. Once a payload has been pushed into the
//! channel a later `cancel` is a no-op, so the consumer must still tolerate
//! stale payloads (the session store's take-once does that).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

type ArmedTimers = Arc<Mutex<HashMap<u64, oneshot::Sender<()>>>>;

/// Ownership of one armed timer.
///
/// Not `Clone`: a session holds exactly one handle for its timeout.
#[derive(Debug, PartialEq, Eq)]
pub struct TimerHandle {
    id: u64,
    key: String,
}

impl TimerHandle {
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Arms delayed payload deliveries
pub struct TimerScheduler<P> {
    next_id: AtomicU64,
    armed: ArmedTimers,
    fired: mpsc::UnboundedSender<P>,
}

impl<P: Send + 'static> TimerScheduler<P> {
    /// Create a scheduler and the receiving end of its fired payloads
    pub fn new() -> (Self, mpsc::UnboundedReceiver<P>) {
        let (fired, rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            next_id: AtomicU64::new(1),
            armed: Arc::new(Mutex::new(HashMap::new())),
            fired,
        };
        (scheduler, rx)
    }

    /// Arm a timer delivering `payload` after `delay`.
    ///
    /// Keys are labels only; scheduling the same key twice arms two timers.
    pub fn schedule(&self, key: impl Into<String>, delay: Duration, payload: P) -> TimerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let key = key.into();
        let (cancel_tx, cancel_rx) = oneshot::channel();

        lock(&self.armed).insert(id, cancel_tx);

        let armed = self.armed.clone();
        let fired = self.fired.clone();
        let task_key = key.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    if lock(&armed).remove(&id).is_none() {
                        // cancel() won the race
                        return;
                    }
                    if fired.send(payload).is_err() {
                        tracing::debug!(key = %task_key, "Timer fired after dispatcher shut down");
                    } else {
                        tracing::trace!(key = %task_key, "Timer fired");
                    }
                }
                _ = cancel_rx => {
                    tracing::trace!(key = %task_key, "Timer cancelled");
                }
            }
        });

        tracing::trace!(key = %key, delay = ?delay, "Timer armed");

        TimerHandle { id, key }
    }

    /// Cancel a timer.
    ///
    /// Returns false (and does nothing) if the timer already fired or was
    /// already cancelled.
    pub fn cancel(&self, handle: &TimerHandle) -> bool {
        match lock(&self.armed).remove(&handle.id) {
            Some(cancel_tx) => {
                // The task may have just passed its deadline; the map entry
                // is already gone for it, so it will not deliver.
                let _ = cancel_tx.send(());
                true
            }
            None => false,
        }
    }

    /// Number of timers armed and not yet fired or cancelled
    pub fn armed(&self) -> usize {
        lock(&self.armed).len()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{Instant, timeout};

    const HOUR: Duration = Duration::from_secs(3600);

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_after_delay() {
        let (timers, mut rx) = TimerScheduler::new();
        let start = Instant::now();

        let handle = timers.schedule("a", Duration::from_secs(60), 7u32);
        assert_eq!(handle.key(), "a");
        assert_eq!(timers.armed(), 1);

        assert_eq!(rx.recv().await, Some(7));
        assert!(start.elapsed() >= Duration::from_secs(60));
        assert_eq!(timers.armed(), 0);

        // Nothing else ever arrives
        assert!(timeout(HOUR, rx.recv()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_fires_synchronously() {
        let (timers, mut rx) = TimerScheduler::new();

        let _handle = timers.schedule("now", Duration::ZERO, ());
        assert!(rx.try_recv().is_err());

        assert_eq!(rx.recv().await, Some(()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_deadline() {
        let (timers, mut rx) = TimerScheduler::new();

        let handle = timers.schedule("a", Duration::from_secs(60), 1u8);
        tokio::time::advance(Duration::from_secs(5)).await;

        assert!(timers.cancel(&handle));
        assert_eq!(timers.armed(), 0);
        assert!(timeout(HOUR, rx.recv()).await.is_err());

        // Double cancel is a silent no-op
        assert!(!timers.cancel(&handle));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_after_fire_has_no_effect() {
        let (timers, mut rx) = TimerScheduler::new();

        let handle = timers.schedule("a", Duration::from_secs(1), "payload");
        assert_eq!(rx.recv().await, Some("payload"));

        assert!(!timers.cancel(&handle));
        assert!(!timers.cancel(&handle));
        assert_eq!(timers.armed(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_not_coalesced() {
        let (timers, mut rx) = TimerScheduler::new();

        let _a1 = timers.schedule("a", Duration::from_secs(10), 1);
        let _a2 = timers.schedule("a", Duration::from_secs(20), 2);
        let b = timers.schedule("b", Duration::from_secs(15), 3);
        assert_eq!(timers.armed(), 3);

        assert!(timers.cancel(&b));

        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
        assert!(timeout(HOUR, rx.recv()).await.is_err());
    }
}
