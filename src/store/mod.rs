//! Shared session store.
//!
//! The [`StateStore`] owns the authoritative in-memory sessions and
//! arbitrates concurrent access: one async mutex per session
//! serializes every read-modify-write, while a shadow map of
//! last-committed clones serves lock-free reads and whole-store
//! serialization without ever acquiring two session locks at once.
//! Every successful mutation is durably committed to the snapshot
//! file before the caller sees success; a failed commit rolls the
//! in-memory state back so memory and disk never diverge.

pub mod snapshot;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{GameError, SnapshotError};
use crate::session::{ActionKind, Game, GameId, Player, PlayerId, SessionPatch};

pub use snapshot::SnapshotFile;

/// Concurrent, write-through session store.
pub struct StateStore {
    /// Authoritative per-session state; the mutex serializes all
    /// mutations for one session without blocking other sessions.
    sessions: DashMap<GameId, Arc<Mutex<Game>>>,
    /// Last committed clone of every session. Updated only while the
    /// matching session mutex is held; read without it.
    committed: DashMap<GameId, Game>,
    /// Serializes collecting `committed` with writing it out, so
    /// whole-store snapshots reach disk in the order they were built.
    persist_lock: Mutex<()>,
    /// Durable snapshot file.
    snapshot: SnapshotFile,
}

impl StateStore {
    /// Opens a store backed by the given snapshot file, loading any
    /// persisted sessions.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError`] if the file exists but cannot be read
    /// or parsed.
    pub async fn open(snapshot: SnapshotFile) -> Result<Self, SnapshotError> {
        let games = snapshot.load().await?;
        let store = Self {
            sessions: DashMap::new(),
            committed: DashMap::new(),
            persist_lock: Mutex::new(()),
            snapshot,
        };
        for (id, game) in games {
            store
                .sessions
                .insert(id.clone(), Arc::new(Mutex::new(game.clone())));
            store.committed.insert(id, game);
        }
        info!(
            sessions = store.sessions.len(),
            path = %store.snapshot.path().display(),
            "session store opened"
        );
        Ok(store)
    }

    /// Allocates a new empty session in Setup phase and persists it.
    ///
    /// # Errors
    ///
    /// Returns a `Persistence` error if the durable commit fails; the
    /// session is not retained in that case.
    pub async fn create_session(&self) -> Result<GameId, GameError> {
        let id = loop {
            let candidate = GameId::generate();
            if !self.sessions.contains_key(&candidate) {
                break candidate;
            }
        };
        let game = Game::new(id.clone(), Utc::now());

        self.sessions
            .insert(id.clone(), Arc::new(Mutex::new(game.clone())));
        self.committed.insert(id.clone(), game);

        if let Err(err) = self.persist().await {
            self.sessions.remove(&id);
            self.committed.remove(&id);
            return Err(GameError::Snapshot(err));
        }
        debug!(session = %id, "session created");
        Ok(id)
    }

    /// Runs a mutation against one session as a single atomic unit:
    /// session lock → mutate → publish committed clone → durable
    /// write. Both the in-memory and committed copies roll back if the
    /// closure fails or the commit cannot be persisted.
    ///
    /// This is the primitive all mutating operations go through.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::SessionNotFound`] for an unknown (or
    /// concurrently purged) session, the closure's error unchanged, or
    /// a `Persistence` error after rollback.
    pub async fn update_session<T>(
        &self,
        id: &GameId,
        f: impl FnOnce(&mut Game) -> Result<T, GameError>,
    ) -> Result<T, GameError> {
        let slot = self
            .sessions
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| GameError::SessionNotFound(id.clone()))?;

        let mut game = slot.lock().await;
        // The session may have been purged while we waited for the lock
        if !self.sessions.contains_key(id) {
            return Err(GameError::SessionNotFound(id.clone()));
        }

        let prior = game.clone();
        match f(&mut game) {
            Ok(value) => {
                self.committed.insert(id.clone(), game.clone());
                if let Err(err) = self.persist().await {
                    *game = prior.clone();
                    self.committed.insert(id.clone(), prior);
                    return Err(GameError::Snapshot(err));
                }
                Ok(value)
            }
            Err(err) => {
                *game = prior;
                Err(err)
            }
        }
    }

    /// Adds a player to a session not yet started.
    ///
    /// The caller is expected to have normalized the name; this
    /// enforces uniqueness and session state.
    ///
    /// # Errors
    ///
    /// Rejects unknown sessions, started or ended sessions, and name
    /// collisions.
    pub async fn add_player(&self, id: &GameId, name: String) -> Result<PlayerId, GameError> {
        self.update_session(id, |game| {
            if game.ended {
                return Err(GameError::AlreadyEnded);
            }
            if game.started {
                return Err(GameError::AlreadyStarted);
            }
            if game.name_taken(&name) {
                return Err(GameError::NameTaken(name.clone()));
            }
            let player_id = PlayerId::generate();
            game.players
                .insert(player_id.clone(), Player::new(name.clone(), Utc::now()));
            Ok(player_id)
        })
        .await
    }

    /// Returns a snapshot of the latest committed state of a session.
    ///
    /// A commit becomes visible here just before its durable write
    /// completes, so a concurrent reader can briefly observe a state
    /// that is then rolled back if that write fails.
    #[must_use]
    pub fn read_session(&self, id: &GameId) -> Option<Game> {
        self.committed.get(id).map(|entry| entry.value().clone())
    }

    /// Merges a typed partial update atomically.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::SessionNotFound`] or a `Persistence`
    /// error.
    pub async fn apply_update(&self, id: &GameId, patch: SessionPatch) -> Result<(), GameError> {
        self.update_session(id, |game| {
            game.apply(patch);
            Ok(())
        })
        .await
    }

    /// Records a ledger action race-free against concurrent calls for
    /// the same session.
    ///
    /// # Errors
    ///
    /// Propagates ledger errors ([`GameError::MissingTarget`],
    /// [`GameError::UnknownAction`]) plus store-level failures.
    pub async fn record_action(
        &self,
        id: &GameId,
        kind: ActionKind,
        actor: &PlayerId,
        target: Option<&PlayerId>,
    ) -> Result<(), GameError> {
        self.update_session(id, |game| game.record_action(kind, actor, target))
            .await
    }

    /// Appends a chat message under the per-player rate window.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::RateLimited`], [`GameError::EmptyMessage`],
    /// or store-level failures.
    pub async fn add_chat_message(
        &self,
        id: &GameId,
        player: &PlayerId,
        text: &str,
    ) -> Result<(), GameError> {
        self.update_session(id, |game| game.add_chat(player, text, Utc::now()))
            .await
    }

    /// Returns the latest committed state of every session.
    #[must_use]
    pub fn list_sessions(&self) -> BTreeMap<GameId, Game> {
        self.committed
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Number of live sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Removes sessions created before `now - max_age`, regardless of
    /// phase, and persists the removal. Returns the removed ids.
    ///
    /// # Errors
    ///
    /// On persistence failure every removal is reinstated and the
    /// error returned, so memory and disk stay consistent.
    pub async fn purge_expired(
        &self,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<GameId>, GameError> {
        let cutoff = now - max_age;
        let expired: Vec<GameId> = self
            .committed
            .iter()
            .filter(|entry| entry.value().created_at < cutoff)
            .map(|entry| entry.key().clone())
            .collect();
        if expired.is_empty() {
            return Ok(Vec::new());
        }

        let mut removed = Vec::new();
        for id in &expired {
            if let Some((_, slot)) = self.sessions.remove(id) {
                // Wait out any in-flight mutation before discarding
                let _guard = slot.lock().await;
                if let Some((_, game)) = self.committed.remove(id) {
                    removed.push((id.clone(), Arc::clone(&slot), game));
                }
            }
        }

        if let Err(err) = self.persist().await {
            warn!(error = %err, "purge rollback: reinstating removed sessions");
            for (id, slot, game) in removed {
                self.sessions.insert(id.clone(), slot);
                self.committed.insert(id, game);
            }
            return Err(GameError::Snapshot(err));
        }

        let ids: Vec<GameId> = removed.into_iter().map(|(id, _, _)| id).collect();
        info!(count = ids.len(), "purged expired sessions");
        Ok(ids)
    }

    /// Serializes the committed map to the snapshot file.
    ///
    /// The lock is held from collection through the durable write.
    /// Without it, two sessions committing concurrently could flush
    /// out of order: a stale pre-collected map acquiring the file
    /// lock second would overwrite the newer snapshot and drop an
    /// already-acknowledged commit. No session lock is taken here.
    async fn persist(&self) -> Result<(), SnapshotError> {
        let _guard = self.persist_lock.lock().await;
        let games: BTreeMap<GameId, Game> = self
            .committed
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        self.snapshot.write(&games).await
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("sessions", &self.sessions.len())
            .field("snapshot", &self.snapshot.path())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Phase;

    async fn temp_store() -> (tempfile::TempDir, Arc<StateStore>) {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = SnapshotFile::new(dir.path().join("games.json"));
        let store = Arc::new(StateStore::open(snapshot).await.unwrap());
        (dir, store)
    }

    #[tokio::test]
    async fn test_create_and_read() {
        let (_dir, store) = temp_store().await;
        let id = store.create_session().await.unwrap();

        let game = store.read_session(&id).unwrap();
        assert_eq!(game.phase, Phase::Setup);
        assert!(game.players.is_empty());
        assert!(store.read_session(&GameId::from("nope")).is_none());
    }

    #[tokio::test]
    async fn test_add_player_rules() {
        let (_dir, store) = temp_store().await;
        let id = store.create_session().await.unwrap();

        store.add_player(&id, "mina".to_string()).await.unwrap();
        let err = store.add_player(&id, "mina".to_string()).await.unwrap_err();
        assert!(matches!(err, GameError::NameTaken(_)));

        store
            .apply_update(
                &id,
                SessionPatch {
                    started: Some(true),
                    ..SessionPatch::default()
                },
            )
            .await
            .unwrap();
        let err = store.add_player(&id, "lucy".to_string()).await.unwrap_err();
        assert!(matches!(err, GameError::AlreadyStarted));
    }

    #[tokio::test]
    async fn test_read_after_write() {
        let (_dir, store) = temp_store().await;
        let id = store.create_session().await.unwrap();
        let pid = store.add_player(&id, "mina".to_string()).await.unwrap();

        let game = store.read_session(&id).unwrap();
        assert_eq!(game.players[&pid].name, "mina");
    }

    #[tokio::test]
    async fn test_failed_mutation_rolls_back() {
        let (_dir, store) = temp_store().await;
        let id = store.create_session().await.unwrap();
        store.add_player(&id, "mina".to_string()).await.unwrap();

        // Closure mutates, then errors: nothing may stick
        let result = store
            .update_session(&id, |game| {
                game.players.clear();
                Err::<(), _>(GameError::AlreadyEnded)
            })
            .await;
        assert!(result.is_err());
        assert_eq!(store.read_session(&id).unwrap().players.len(), 1);
    }

    #[tokio::test]
    async fn test_persistence_failure_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("games.json");
        let snapshot =
            SnapshotFile::with_retry_policy(&path, 0, std::time::Duration::from_millis(1));
        let store = StateStore::open(snapshot).await.unwrap();
        let id = store.create_session().await.unwrap();

        // Make the snapshot target unwritable by replacing the parent
        let saved = std::fs::read(&path).unwrap();
        drop(dir);

        let err = store.add_player(&id, "mina".to_string()).await.unwrap_err();
        assert!(matches!(err, GameError::Snapshot(_)));
        // In-memory state matches the last durable commit
        assert!(store.read_session(&id).unwrap().players.is_empty());
        let disk: BTreeMap<GameId, Game> = serde_json::from_slice(&saved).unwrap();
        assert!(disk[&id].players.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_day_votes_no_lost_updates() {
        let (_dir, store) = temp_store().await;
        let id = store.create_session().await.unwrap();

        let mut voters = Vec::new();
        for i in 0..8 {
            voters.push(store.add_player(&id, format!("voter{i}")).await.unwrap());
        }
        let target_a = voters[6].clone();
        let target_b = voters[7].clone();

        let mut tasks = Vec::new();
        for (i, voter) in voters.iter().take(6).cloned().enumerate() {
            let store = Arc::clone(&store);
            let id = id.clone();
            let target = if i % 2 == 0 {
                target_a.clone()
            } else {
                target_b.clone()
            };
            tasks.push(tokio::spawn(async move {
                store
                    .record_action(&id, ActionKind::DayVote, &voter, Some(&target))
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let game = store.read_session(&id).unwrap();
        let total: usize = game.actions.day_votes.values().map(Vec::len).sum();
        assert_eq!(total, 6, "every vote must be recorded");
        for voter in voters.iter().take(6) {
            let appearances: usize = game
                .actions
                .day_votes
                .values()
                .map(|v| v.iter().filter(|x| *x == voter).count())
                .sum();
            assert_eq!(appearances, 1, "voter {voter} must appear exactly once");
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_commits_keep_disk_and_memory_aligned() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("games.json");
        let store = Arc::new(StateStore::open(SnapshotFile::new(&path)).await.unwrap());
        let a = store.create_session().await.unwrap();
        let b = store.create_session().await.unwrap();

        // Race one commit on each session; a stale whole-store flush
        // landing second would erase the other session's commit
        for _ in 0..100 {
            let mut tasks = Vec::new();
            for id in [a.clone(), b.clone()] {
                let store = Arc::clone(&store);
                tasks.push(tokio::spawn(async move {
                    store
                        .update_session(&id, |game| {
                            game.phase_epoch += 1;
                            Ok(())
                        })
                        .await
                }));
            }
            for task in tasks {
                task.await.unwrap().unwrap();
            }
        }

        let disk = SnapshotFile::new(&path).load().await.unwrap();
        for id in [&a, &b] {
            assert_eq!(
                disk[id].phase_epoch,
                store.read_session(id).unwrap().phase_epoch,
                "acknowledged commit for {id} must be on disk"
            );
            assert_eq!(disk[id].phase_epoch, 100);
        }
    }

    #[tokio::test]
    async fn test_store_round_trips_through_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("games.json");

        let (id, expected) = {
            let store = StateStore::open(SnapshotFile::new(&path)).await.unwrap();
            let id = store.create_session().await.unwrap();
            let pid = store.add_player(&id, "mina".to_string()).await.unwrap();
            store
                .apply_update(
                    &id,
                    SessionPatch {
                        phase: Some(Phase::Day),
                        started: Some(true),
                        ..SessionPatch::default()
                    },
                )
                .await
                .unwrap();
            store.add_chat_message(&id, &pid, "good morning").await.unwrap();
            (id.clone(), store.read_session(&id).unwrap())
        };

        let reopened = StateStore::open(SnapshotFile::new(&path)).await.unwrap();
        assert_eq!(reopened.read_session(&id).unwrap(), expected);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let (_dir, store) = temp_store().await;
        let old = store.create_session().await.unwrap();
        let fresh = store.create_session().await.unwrap();

        // Age the first session by three hours
        let created = Utc::now() - Duration::hours(3);
        store
            .update_session(&old, |game| {
                game.created_at = created;
                Ok(())
            })
            .await
            .unwrap();

        let removed = store
            .purge_expired(Duration::hours(2), Utc::now())
            .await
            .unwrap();
        assert_eq!(removed, vec![old.clone()]);
        assert!(store.read_session(&old).is_none());
        assert!(store.read_session(&fresh).is_some());
        assert_eq!(store.session_count(), 1);
    }

    #[tokio::test]
    async fn test_purge_keeps_young_sessions() {
        let (_dir, store) = temp_store().await;
        store.create_session().await.unwrap();
        let removed = store
            .purge_expired(Duration::hours(24), Utc::now())
            .await
            .unwrap();
        assert!(removed.is_empty());
        assert_eq!(store.session_count(), 1);
    }
}
