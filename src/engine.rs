//! Game engine facade.
//!
//! Ties the store, rules, and scheduler together behind the operation
//! surface a transport would call. Validation and mutation for one
//! operation always run inside a single store commit, so a concurrent
//! phase change can never slip between the check and the write.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::error::GameError;
use crate::rules;
use crate::scheduler::{ExpiryOutcome, PhaseScheduler, RestoreReport, TimedPhase};
use crate::session::{ActionKind, GameId, NAME_MAX_CHARS, PlayerId};
use crate::store::StateStore;
use crate::view::{self, GameSummary, RoleInfo};

/// Operation surface over a shared store and scheduler.
#[derive(Debug)]
pub struct GameEngine {
    store: Arc<StateStore>,
    scheduler: Arc<PhaseScheduler>,
}

impl GameEngine {
    /// Creates an engine over an existing store and scheduler.
    #[must_use]
    pub const fn new(store: Arc<StateStore>, scheduler: Arc<PhaseScheduler>) -> Self {
        Self { store, scheduler }
    }

    /// Creates a new empty session.
    ///
    /// # Errors
    ///
    /// Returns a `Persistence` error if the durable commit fails.
    pub async fn create_session(&self) -> Result<GameId, GameError> {
        self.store.create_session().await
    }

    /// Adds a player to a session.
    ///
    /// The name is trimmed before any other check; an empty or
    /// over-long name is rejected rather than truncated, unlike chat.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::InvalidName`], [`GameError::NameTaken`],
    /// or session-state errors.
    pub async fn join(&self, id: &GameId, name: &str) -> Result<PlayerId, GameError> {
        let name = name.trim();
        if name.is_empty() || name.chars().count() > NAME_MAX_CHARS {
            return Err(GameError::InvalidName(name.to_string()));
        }
        let player_id = self.store.add_player(id, name.to_string()).await?;
        info!(session = %id, player = %player_id, name, "player joined");
        Ok(player_id)
    }

    /// Assigns roles and starts the Night phase with its timer.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::NotEnoughPlayers`],
    /// [`GameError::AlreadyStarted`], [`GameError::AlreadyEnded`], or
    /// a `Persistence` error. Role assignment and the timer start are
    /// two commits; if the second fails the session is started without
    /// a deadline and the startup restore path reports it.
    pub async fn start_session(&self, id: &GameId) -> Result<(), GameError> {
        self.store
            .update_session(id, |game| {
                let mut rng = rand::rng();
                rules::assign_roles(game, &mut rng)
            })
            .await?;
        info!(session = %id, "roles assigned");

        self.scheduler.start_phase(id, TimedPhase::Night).await
    }

    /// Records a night or day action after full validation, atomically
    /// against concurrent actions and phase changes.
    ///
    /// # Errors
    ///
    /// Propagates every validation error from
    /// [`rules::validate_action`] plus store-level failures.
    pub async fn record_action(
        &self,
        id: &GameId,
        actor: &PlayerId,
        kind: ActionKind,
        target: Option<&PlayerId>,
    ) -> Result<(), GameError> {
        self.store
            .update_session(id, |game| {
                rules::validate_action(game, actor, kind, target)?;
                game.record_action(kind, actor, target)
            })
            .await
    }

    /// Appends a chat message during the Day phase.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::WrongPhase`] outside Day,
    /// [`GameError::EmptyMessage`], [`GameError::RateLimited`], or
    /// liveness/membership errors.
    pub async fn add_chat(
        &self,
        id: &GameId,
        player: &PlayerId,
        text: &str,
    ) -> Result<(), GameError> {
        self.store
            .update_session(id, |game| {
                rules::validate_action(game, player, ActionKind::Chat, None)?;
                game.add_chat(player, text, Utc::now())
            })
            .await
    }

    /// Returns the viewer-filtered summary of a session.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::SessionNotFound`].
    pub fn summary(
        &self,
        id: &GameId,
        viewer: Option<&PlayerId>,
    ) -> Result<GameSummary, GameError> {
        let game = self
            .store
            .read_session(id)
            .ok_or_else(|| GameError::SessionNotFound(id.clone()))?;
        Ok(view::summary(&game, viewer, Utc::now()))
    }

    /// Returns the role-specific capability snapshot for a player.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::SessionNotFound`],
    /// [`GameError::PlayerNotFound`], or [`GameError::NotStarted`].
    pub fn role_info(&self, id: &GameId, player: &PlayerId) -> Result<RoleInfo, GameError> {
        let game = self
            .store
            .read_session(id)
            .ok_or_else(|| GameError::SessionNotFound(id.clone()))?;
        view::role_info(&game, player)
    }

    /// Summaries of every session, with no viewer privileges.
    #[must_use]
    pub fn list_sessions(&self) -> Vec<GameSummary> {
        let now = Utc::now();
        self.store
            .list_sessions()
            .values()
            .map(|game| view::summary(game, None, now))
            .collect()
    }

    /// Number of live sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.store.session_count()
    }

    /// Ends the current timed phase immediately.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::SessionNotFound`],
    /// [`GameError::NotStarted`], or [`GameError::AlreadyEnded`].
    pub async fn force_end_phase(&self, id: &GameId) -> Result<ExpiryOutcome, GameError> {
        self.scheduler.force_end_phase(id).await
    }

    /// Removes sessions older than `max_age` and cancels their timers.
    ///
    /// # Errors
    ///
    /// Returns a `Persistence` error; removals are rolled back in that
    /// case and no timers are cancelled.
    pub async fn purge_expired(
        &self,
        max_age: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<GameId>, GameError> {
        let removed = self.store.purge_expired(max_age, now).await?;
        for id in &removed {
            self.scheduler.cancel(id);
        }
        Ok(removed)
    }

    /// Rebuilds timers from persisted deadlines after a process start.
    pub async fn restore_timers(&self) -> RestoreReport {
        self.scheduler.restore_on_startup().await
    }

    /// Cancels all pending timers.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }
}
