//! Verification session state machine.
//!
//! ```text
//!            on_join
//!               │
//!               ▼
//!           Pending ──on_answer(correct)──▶ Correct
//!               │  ╲
//!               │   ╲─on_answer(wrong)────▶ Wrong
//!               │
//!               └────on_timeout───────────▶ Expired
//! ```
//!
//! The answer and the timeout race for one `SessionStore::take`. The
//! winner owns the session from then on and runs every side effect; the
//! loser sees `SessionExpiredOrAbsent` and does nothing. Timer cancellation
//! only saves a wake-up, it is not what makes resolution exactly-once.
//!
//! An answer is resolved in two steps: `on_answer` claims the session
//! without touching the platform, `settle` runs the side effects. The
//! router acknowledges the press in between.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use turnstile_common::{
    AnswerAction, ConversationId, Member, MemberId, MessageRef, MetricsSnapshot, Resolution,
    TurnstileError,
};

use super::{SessionId, SessionKey, SessionStore, VerificationSession};
use crate::executor::ActionExecutor;
use crate::timer::TimerScheduler;

/// Payloads delivered by the timer scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerEvent {
    /// The challenge deadline of a session passed
    ChallengeExpired {
        key: SessionKey,
        session_id: SessionId,
    },
    /// A transient message (the welcome) should go away
    DeleteMessage(MessageRef),
}

/// A decoded button press
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub conversation: ConversationId,
    /// Who pressed the button
    pub presser: MemberId,
    /// Whose challenge the button belongs to
    pub target: MemberId,
    pub session_id: SessionId,
    pub action: AnswerAction,
}

/// An answer that won its session. Dropping it without `settle` leaves the
/// member restricted.
#[must_use]
#[derive(Debug)]
pub struct ClaimedAnswer {
    session: VerificationSession,
    resolution: Resolution,
}

#[derive(Default)]
struct GatekeeperStats {
    created: AtomicU64,
    correct: AtomicU64,
    wrong: AtomicU64,
    expired: AtomicU64,
    duplicate_joins: AtomicU64,
    identity_mismatches: AtomicU64,
    late_answers: AtomicU64,
    restriction_failures: AtomicU64,
}

impl GatekeeperStats {
    fn record(&self, resolution: Resolution) {
        let counter = match resolution {
            Resolution::Correct => &self.correct,
            Resolution::Wrong => &self.wrong,
            Resolution::Expired => &self.expired,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Owns every pending session from join to resolution
pub struct Gatekeeper {
    store: SessionStore,
    timers: TimerScheduler<TimerEvent>,
    executor: ActionExecutor,
    challenge_timeout: Option<Duration>,
    stats: GatekeeperStats,
}

impl Gatekeeper {
    /// Create the state machine and the receiver of its timer events.
    ///
    /// The receiver must be drained into `on_timer` (see
    /// `workers::timer_dispatcher`).
    pub fn new(
        executor: ActionExecutor,
        challenge_timeout: Option<Duration>,
    ) -> (Self, mpsc::UnboundedReceiver<TimerEvent>) {
        let (timers, fired) = TimerScheduler::new();
        let gatekeeper = Self {
            store: SessionStore::new(),
            timers,
            executor,
            challenge_timeout,
            stats: GatekeeperStats::default(),
        };
        (gatekeeper, fired)
    }

    /// Challenge a member who just joined.
    ///
    /// The member is restricted before the prompt goes out; if that fails
    /// no session survives and no prompt is sent.
    pub async fn on_join(
        &self,
        conversation: ConversationId,
        member: &Member,
        join_event: Option<MessageRef>,
    ) -> Result<SessionId, TurnstileError> {
        let key = SessionKey::new(conversation, member.id);
        let session = VerificationSession::new(key, member.display_name.clone(), join_event);
        let session_id = session.id.clone();

        // Reserve the slot first so a duplicate join never reaches the platform
        if let Err(e) = self.store.put(session) {
            self.stats.duplicate_joins.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(conversation = %conversation, member = %member.id, "Duplicate join ignored");
            return Err(e);
        }

        if let Err(e) = self.executor.restrict_newcomer(conversation, member.id).await {
            self.store.take(&key, &session_id);
            self.stats.restriction_failures.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                conversation = %conversation,
                member = %member.id,
                error = %e,
                "Failed to restrict new member, not challenging"
            );
            return Err(e);
        }

        let prompt = match self
            .executor
            .send_prompt(conversation, member, &session_id, join_event)
            .await
        {
            Ok(prompt) => prompt,
            Err(e) => {
                if self.store.take(&key, &session_id).is_some() {
                    self.executor.lift_restriction(conversation, member.id).await;
                }
                tracing::error!(
                    conversation = %conversation,
                    member = %member.id,
                    error = %e,
                    "Failed to send challenge prompt"
                );
                return Err(e);
            }
        };

        let timer = self.challenge_timeout.map(|delay| {
            self.timers.schedule(
                key.to_string(),
                delay,
                TimerEvent::ChallengeExpired {
                    key,
                    session_id: session_id.clone(),
                },
            )
        });

        self.stats.created.fetch_add(1, Ordering::Relaxed);

        if let Err(timer) = self.store.attach(&key, &session_id, prompt, timer) {
            // Answered before the prompt reference was recorded; the winner
            // could not delete a prompt it did not know about.
            if let Some(timer) = timer {
                self.timers.cancel(&timer);
            }
            self.executor.delete_quietly(prompt).await;
            tracing::debug!(conversation = %conversation, member = %member.id, "Session resolved during setup");
            return Ok(session_id);
        }

        tracing::info!(
            conversation = %conversation,
            member = %member.id,
            session = %session_id,
            timeout = ?self.challenge_timeout,
            "Challenge issued"
        );

        Ok(session_id)
    }

    /// Claim a session for a button press.
    ///
    /// The session leaves the store here, so a timeout can no longer win.
    /// The side effects run in `settle`.
    pub fn on_answer(&self, answer: &Answer) -> Result<ClaimedAnswer, TurnstileError> {
        if answer.presser != answer.target {
            self.stats.identity_mismatches.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                conversation = %answer.conversation,
                presser = %answer.presser,
                target = %answer.target,
                "Challenge answered by another member"
            );
            return Err(TurnstileError::IdentityMismatch {
                presser: answer.presser.0,
                target: answer.target.0,
            });
        }

        let key = SessionKey::new(answer.conversation, answer.target);
        let Some(mut session) = self.store.take(&key, &answer.session_id) else {
            self.stats.late_answers.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                conversation = %answer.conversation,
                member = %answer.target,
                "Answer arrived after the session resolved"
            );
            return Err(TurnstileError::SessionExpiredOrAbsent);
        };

        if let Some(timer) = session.timer.take() {
            if self.timers.cancel(&timer) {
                tracing::trace!(key = %timer.key(), "Timeout disarmed");
            }
        }

        Ok(ClaimedAnswer {
            session,
            resolution: Resolution::from(answer.action),
        })
    }

    /// Apply a claimed answer
    pub async fn settle(&self, claimed: ClaimedAnswer) -> Resolution {
        let ClaimedAnswer { session, resolution } = claimed;
        self.finish(session, resolution).await;
        resolution
    }

    /// Resolve a session whose deadline passed.
    ///
    /// `SessionExpiredOrAbsent` means the member answered first.
    pub async fn on_timeout(
        &self,
        key: SessionKey,
        session_id: &SessionId,
    ) -> Result<(), TurnstileError> {
        let Some(mut session) = self.store.take(&key, session_id) else {
            tracing::trace!(session = %key, "Timeout lost the race");
            return Err(TurnstileError::SessionExpiredOrAbsent);
        };

        // Already fired
        session.timer = None;

        self.finish(session, Resolution::Expired).await;
        Ok(())
    }

    /// Entry point for fired timers
    pub async fn on_timer(&self, event: TimerEvent) {
        match event {
            TimerEvent::ChallengeExpired { key, session_id } => {
                match self.on_timeout(key, &session_id).await {
                    Ok(()) | Err(TurnstileError::SessionExpiredOrAbsent) => {}
                    Err(e) => tracing::warn!(session = %key, error = %e, "Timeout handling failed"),
                }
            }
            TimerEvent::DeleteMessage(message) => self.executor.delete_quietly(message).await,
        }
    }

    async fn finish(&self, mut session: VerificationSession, resolution: Resolution) {
        session.resolve(resolution);
        self.stats.record(resolution);

        tracing::info!(
            conversation = %session.key.conversation,
            member = %session.key.member,
            session = %session.id,
            resolution = %resolution,
            age_ms = session.age_ms(),
            "Verification resolved"
        );

        if let Some(deletion) = self.executor.apply(&session, resolution).await {
            // Never cancelled
            self.timers.schedule(
                format!("delete:{}", deletion.message),
                deletion.after,
                TimerEvent::DeleteMessage(deletion.message),
            );
        }
    }

    /// Is a challenge pending for this member?
    #[cfg(test)]
    pub fn is_pending(&self, conversation: ConversationId, member: MemberId) -> bool {
        self.store.contains(&SessionKey::new(conversation, member))
    }

    pub fn stats(&self) -> MetricsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        MetricsSnapshot {
            active_sessions: self.store.len() as u64,
            armed_timers: self.timers.armed() as u64,
            sessions_created: load(&self.stats.created),
            resolved_correct: load(&self.stats.correct),
            resolved_wrong: load(&self.stats.wrong),
            resolved_expired: load(&self.stats.expired),
            duplicate_joins: load(&self.stats.duplicate_joins),
            identity_mismatches: load(&self.stats.identity_mismatches),
            late_answers: load(&self.stats.late_answers),
            restriction_failures: load(&self.stats.restriction_failures),
        }
    }
}
