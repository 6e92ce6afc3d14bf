//! Shared fixtures for integration tests.

// Not every test binary uses every fixture
#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use moonphase::engine::GameEngine;
use moonphase::scheduler::{PhaseDurations, PhaseScheduler};
use moonphase::session::{GameId, PlayerId, Role};
use moonphase::store::{SnapshotFile, StateStore};
use moonphase::view::RoleInfo;

/// An engine backed by a temp-dir snapshot file.
///
/// The raw store handle is exposed so tests can rewrite persisted
/// state directly, e.g. to simulate a deadline passing while the
/// process was down.
pub struct TestServer {
    pub engine: GameEngine,
    pub store: Arc<StateStore>,
    // Held so the snapshot file outlives the test
    _dir: Option<tempfile::TempDir>,
}

impl TestServer {
    /// Fresh server with a new snapshot file.
    pub async fn start(durations: PhaseDurations) -> Self {
        let dir = tempfile::tempdir().expect("create tempdir");
        let path = dir.path().join("games.json");
        let mut server = Self::open(&path, durations).await;
        server._dir = Some(dir);
        server
    }

    /// Server over an existing snapshot file, as after a restart.
    pub async fn open(path: &Path, durations: PhaseDurations) -> Self {
        let store = Arc::new(
            StateStore::open(SnapshotFile::new(path))
                .await
                .expect("open store"),
        );
        let scheduler = Arc::new(PhaseScheduler::new(
            Arc::clone(&store),
            durations,
            Duration::from_millis(50),
        ));
        Self {
            engine: GameEngine::new(Arc::clone(&store), scheduler),
            store,
            _dir: None,
        }
    }

    /// Creates a session with `n` players and starts it.
    pub async fn started_game(&self, n: usize) -> (GameId, Vec<PlayerId>) {
        let id = self.engine.create_session().await.expect("create session");
        let mut players = Vec::new();
        for i in 0..n {
            players.push(
                self.engine
                    .join(&id, &format!("player{i}"))
                    .await
                    .expect("join"),
            );
        }
        self.engine.start_session(&id).await.expect("start");
        (id, players)
    }

    /// Finds the player holding a given role.
    pub fn player_with_role(&self, id: &GameId, players: &[PlayerId], role: Role) -> PlayerId {
        players
            .iter()
            .find(|p| {
                matches!(
                    (role, self.engine.role_info(id, p).expect("role info")),
                    (Role::Werewolf, RoleInfo::Werewolf { .. })
                        | (Role::Seer, RoleInfo::Seer { .. })
                        | (Role::Villager, RoleInfo::Villager { .. })
                )
            })
            .cloned()
            .expect("role is always assigned")
    }
}

/// Phase lengths long enough that timers never fire during a test.
pub const MANUAL: PhaseDurations = PhaseDurations {
    night: Duration::from_secs(600),
    day: Duration::from_secs(600),
};

/// Short phase lengths for timer-driven tests.
pub const FAST: PhaseDurations = PhaseDurations {
    night: Duration::from_millis(80),
    day: Duration::from_millis(80),
};
