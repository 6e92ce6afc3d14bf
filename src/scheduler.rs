//! Phase scheduling.
//!
//! One cancellable timer task per active session. Timer fire,
//! `force_end_phase`, and startup restore all funnel into the same
//! expiry path, which resolves the phase, checks the win condition,
//! and arms the next phase as a single committed write under the
//! session lock. The persisted `phase_epoch` makes resolution
//! single-flight: a resolution only commits if the epoch it captured
//! still matches, so a timer racing an admin override (or a retried
//! startup) can never resolve the same phase twice.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::GameError;
use crate::rules::{self, DayOutcome, NightOutcome};
use crate::session::{GameId, Phase, Winner};
use crate::store::StateStore;

// ---------------------------------------------------------------------------
// Timed phases and durations
// ---------------------------------------------------------------------------

/// The two phases that carry a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimedPhase {
    /// Night phase timer
    Night,
    /// Day phase timer
    Day,
}

impl TimedPhase {
    /// Maps a session phase onto its timed counterpart, if any.
    #[must_use]
    pub const fn of(phase: Phase) -> Option<Self> {
        match phase {
            Phase::Night => Some(Self::Night),
            Phase::Day => Some(Self::Day),
            Phase::Setup | Phase::Ended => None,
        }
    }

    /// The phase that follows on resolution.
    #[must_use]
    pub const fn next(self) -> Self {
        match self {
            Self::Night => Self::Day,
            Self::Day => Self::Night,
        }
    }

    /// The session phase this represents.
    #[must_use]
    pub const fn phase(self) -> Phase {
        match self {
            Self::Night => Phase::Night,
            Self::Day => Phase::Day,
        }
    }
}

/// Configured timer lengths for the two timed phases.
#[derive(Debug, Clone, Copy)]
pub struct PhaseDurations {
    /// Night phase length
    pub night: Duration,
    /// Day phase length
    pub day: Duration,
}

impl PhaseDurations {
    /// Returns the configured length for the given timed phase.
    #[must_use]
    pub const fn for_phase(&self, phase: TimedPhase) -> Duration {
        match phase {
            TimedPhase::Night => self.night,
            TimedPhase::Day => self.day,
        }
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// What a phase resolution produced.
#[derive(Debug, Clone)]
pub enum PhaseResolution {
    /// Night actions were resolved
    Night(NightOutcome),
    /// Day votes were resolved
    Day(DayOutcome),
}

/// Result of one expiry pass for a session.
#[derive(Debug, Clone)]
pub enum ExpiryOutcome {
    /// Another resolution already handled this phase; nothing was done
    Stale,
    /// The phase resolved and the game ended with a winner
    Ended {
        /// Winning faction
        winner: Winner,
        /// What the final resolution produced
        resolution: PhaseResolution,
    },
    /// The phase resolved and the next phase's timer was armed
    Advanced {
        /// The phase now running
        next: Phase,
        /// Its absolute deadline
        deadline: DateTime<Utc>,
        /// What the resolution produced
        resolution: PhaseResolution,
    },
}

/// Counters from a startup restore pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// Sessions whose overdue phase was resolved immediately
    pub resolved: usize,
    /// Sessions re-armed for their remaining duration
    pub rearmed: usize,
    /// Active sessions without a usable deadline, left untouched
    pub skipped: usize,
}

struct TimerHandle {
    epoch: u64,
    cancel: CancellationToken,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Timer-driven phase scheduler over a shared [`StateStore`].
pub struct PhaseScheduler {
    store: Arc<StateStore>,
    durations: PhaseDurations,
    retry_interval: Duration,
    timers: DashMap<GameId, TimerHandle>,
}

impl PhaseScheduler {
    /// Creates a scheduler with the given durations and resolution
    /// retry interval (used when a resolution's durable commit fails).
    #[must_use]
    pub fn new(store: Arc<StateStore>, durations: PhaseDurations, retry_interval: Duration) -> Self {
        Self {
            store,
            durations,
            retry_interval,
            timers: DashMap::new(),
        }
    }

    /// Starts the given phase for a session: bumps the phase epoch,
    /// persists the new phase and its absolute deadline, and arms a
    /// fresh timer (cancelling any prior one).
    ///
    /// # Errors
    ///
    /// Returns [`GameError::SessionNotFound`], [`GameError::AlreadyEnded`],
    /// or a `Persistence` error (in which case no timer is armed).
    pub async fn start_phase(
        self: &Arc<Self>,
        id: &GameId,
        phase: TimedPhase,
    ) -> Result<(), GameError> {
        let duration = self.durations.for_phase(phase);
        let (epoch, deadline) = self
            .store
            .update_session(id, |game| {
                if game.ended {
                    return Err(GameError::AlreadyEnded);
                }
                let deadline = Utc::now()
                    + chrono::Duration::from_std(duration)
                        .unwrap_or_else(|_| chrono::Duration::seconds(i64::MAX / 1_000));
                game.phase = phase.phase();
                game.phase_end = Some(deadline);
                game.phase_epoch += 1;
                Ok((game.phase_epoch, deadline))
            })
            .await?;

        info!(
            session = %id,
            phase = %phase.phase(),
            epoch,
            duration_secs = duration.as_secs(),
            "phase started"
        );
        self.arm(id.clone(), epoch, deadline);
        Ok(())
    }

    /// Cancels the live timer and synchronously runs the expiry logic.
    ///
    /// Safe to call while the timer is mid-fire: whichever resolution
    /// wins the session lock first commits, the other observes a
    /// bumped epoch and reports [`ExpiryOutcome::Stale`].
    ///
    /// # Errors
    ///
    /// Returns [`GameError::SessionNotFound`], [`GameError::NotStarted`],
    /// [`GameError::AlreadyEnded`], or a `Persistence` error (the
    /// timer is then re-armed for a retry).
    pub async fn force_end_phase(self: &Arc<Self>, id: &GameId) -> Result<ExpiryOutcome, GameError> {
        let game = self
            .store
            .read_session(id)
            .ok_or_else(|| GameError::SessionNotFound(id.clone()))?;
        if game.ended {
            return Err(GameError::AlreadyEnded);
        }
        if !game.started || TimedPhase::of(game.phase).is_none() {
            return Err(GameError::NotStarted);
        }

        self.cancel(id);
        info!(session = %id, phase = %game.phase, "forcing phase end");
        self.run_expiry(id, game.phase_epoch).await
    }

    /// Reconstructs timers from persisted deadlines after a process
    /// start. Overdue sessions are resolved immediately through the
    /// single-flight expiry path, so a retried startup cannot resolve
    /// the same phase twice; the rest are re-armed for their remaining
    /// duration.
    pub async fn restore_on_startup(self: &Arc<Self>) -> RestoreReport {
        let now = Utc::now();
        let mut report = RestoreReport::default();

        for (id, game) in self.store.list_sessions() {
            if !game.started || game.ended || TimedPhase::of(game.phase).is_none() {
                continue;
            }
            let Some(deadline) = game.phase_end else {
                warn!(session = %id, phase = %game.phase, "active session has no deadline");
                report.skipped += 1;
                continue;
            };

            if deadline <= now {
                debug!(session = %id, phase = %game.phase, "deadline passed, resolving now");
                if let Err(err) = self.run_expiry(&id, game.phase_epoch).await {
                    warn!(session = %id, error = %err, "startup resolution failed");
                }
                report.resolved += 1;
            } else {
                self.arm(id.clone(), game.phase_epoch, deadline);
                report.rearmed += 1;
            }
        }

        info!(
            resolved = report.resolved,
            rearmed = report.rearmed,
            skipped = report.skipped,
            "timers restored from persisted state"
        );
        report
    }

    /// Cancels the pending timer for a session, if any.
    pub fn cancel(&self, id: &GameId) {
        if let Some((_, handle)) = self.timers.remove(id) {
            handle.cancel.cancel();
        }
    }

    /// Returns whether a timer is pending for the session.
    #[must_use]
    pub fn is_pending(&self, id: &GameId) -> bool {
        self.timers.contains_key(id)
    }

    /// Number of armed timers.
    #[must_use]
    pub fn active_timer_count(&self) -> usize {
        self.timers.len()
    }

    /// Cancels every pending timer.
    pub fn shutdown(&self) {
        for entry in &self.timers {
            entry.value().cancel.cancel();
        }
        self.timers.clear();
        debug!("scheduler shut down");
    }

    /// Arms a timer for the session, replacing (and cancelling) any
    /// existing one, so at most one timer per session is pending.
    fn arm(self: &Arc<Self>, id: GameId, epoch: u64, deadline: DateTime<Utc>) {
        let cancel = CancellationToken::new();
        let handle = TimerHandle {
            epoch,
            cancel: cancel.clone(),
        };
        if let Some(old) = self.timers.insert(id.clone(), handle) {
            old.cancel.cancel();
        }

        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let wait = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!(session = %id, epoch, "timer cancelled");
                }
                () = tokio::time::sleep(wait) => {
                    if let Err(err) = scheduler.run_expiry(&id, epoch).await {
                        warn!(session = %id, epoch, error = %err, "timer expiry failed");
                    }
                }
            }
        });
    }

    /// The shared expiry path: under the session lock, verify the
    /// captured epoch, resolve the current phase, evaluate the win
    /// condition, and either end the game or advance to the next phase
    /// with a fresh deadline — all committed as one durable write.
    ///
    /// # Errors
    ///
    /// On a persistence failure the session stays at its last-good
    /// committed state and the timer is re-armed after the retry
    /// interval; the error is also returned to synchronous callers.
    async fn run_expiry(
        self: &Arc<Self>,
        id: &GameId,
        epoch: u64,
    ) -> Result<ExpiryOutcome, GameError> {
        let durations = self.durations;
        let result = self
            .store
            .update_session(id, move |game| {
                if game.ended || game.phase_epoch != epoch {
                    return Ok(ExpiryOutcome::Stale);
                }
                let Some(timed) = TimedPhase::of(game.phase) else {
                    return Ok(ExpiryOutcome::Stale);
                };

                let now = Utc::now();
                game.phase_epoch += 1;
                let resolution = match timed {
                    TimedPhase::Night => PhaseResolution::Night(rules::resolve_night(game, now)),
                    TimedPhase::Day => {
                        let mut rng = rand::rng();
                        PhaseResolution::Day(rules::resolve_day(game, &mut rng))
                    }
                };

                if let Some(winner) = rules::check_win(game) {
                    return Ok(ExpiryOutcome::Ended { winner, resolution });
                }

                let next = timed.next();
                let deadline = now
                    + chrono::Duration::from_std(durations.for_phase(next))
                        .unwrap_or_else(|_| chrono::Duration::seconds(i64::MAX / 1_000));
                game.phase = next.phase();
                game.phase_end = Some(deadline);
                Ok(ExpiryOutcome::Advanced {
                    next: next.phase(),
                    deadline,
                    resolution,
                })
            })
            .await;

        match result {
            Ok(ExpiryOutcome::Stale) => {
                debug!(session = %id, epoch, "expiry discarded as stale");
                self.drop_timer_if(id, epoch);
                Ok(ExpiryOutcome::Stale)
            }
            Ok(ExpiryOutcome::Ended { winner, resolution }) => {
                log_resolution(id, &resolution);
                info!(session = %id, winner = ?winner, "game ended");
                self.drop_timer_if(id, epoch);
                Ok(ExpiryOutcome::Ended { winner, resolution })
            }
            Ok(ExpiryOutcome::Advanced {
                next,
                deadline,
                resolution,
            }) => {
                log_resolution(id, &resolution);
                info!(session = %id, phase = %next, "next phase started");
                self.arm(id.clone(), epoch + 1, deadline);
                Ok(ExpiryOutcome::Advanced {
                    next,
                    deadline,
                    resolution,
                })
            }
            Err(GameError::Snapshot(err)) => {
                warn!(
                    session = %id,
                    error = %err,
                    retry_secs = self.retry_interval.as_secs(),
                    "resolution commit failed, re-arming for retry"
                );
                self.arm(id.clone(), epoch, Utc::now() + chrono::Duration::from_std(self.retry_interval).unwrap_or_else(|_| chrono::Duration::seconds(5)));
                Err(GameError::Snapshot(err))
            }
            Err(err) => {
                self.drop_timer_if(id, epoch);
                Err(err)
            }
        }
    }

    /// Removes the session's timer entry only if it still belongs to
    /// the given epoch, leaving any newer timer alone.
    fn drop_timer_if(&self, id: &GameId, epoch: u64) {
        self.timers
            .remove_if(id, |_, handle| handle.epoch <= epoch);
    }
}

fn log_resolution(id: &GameId, resolution: &PhaseResolution) {
    match resolution {
        PhaseResolution::Night(outcome) => {
            info!(
                session = %id,
                killed = outcome.killed.as_ref().map(|k| k.name.as_str()),
                investigated = outcome.seer_result.as_ref().map(|s| s.target_name.as_str()),
                "night resolved"
            );
        }
        PhaseResolution::Day(outcome) => {
            info!(
                session = %id,
                executed = outcome.executed.as_ref().map(|e| e.name.as_str()),
                votes = outcome.executed.as_ref().map(|e| e.votes),
                "day resolved"
            );
        }
    }
}

impl std::fmt::Debug for PhaseScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseScheduler")
            .field("active_timers", &self.timers.len())
            .field("durations", &self.durations)
            .finish_non_exhaustive()
    }
}
