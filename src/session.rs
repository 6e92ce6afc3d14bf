//! Session data model.
//!
//! The types here are the persisted shape of a game: roster, phase,
//! per-phase action ledger, chat log, and seer history. Mutation
//! helpers live on [`Game`] so the store can serialize them under the
//! session lock; rule resolution lives in [`crate::rules`].

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GameError;

/// Minimum roster size for role assignment.
pub const MIN_PLAYERS: usize = 3;

/// Maximum display-name length in characters, after trimming.
pub const NAME_MAX_CHARS: usize = 20;

/// Maximum chat message length in characters, after trimming.
pub const CHAT_MAX_CHARS: usize = 200;

/// Maximum messages per player inside the rolling rate window.
pub const CHAT_RATE_LIMIT: usize = 3;

/// Rolling chat rate window in seconds.
pub const CHAT_RATE_WINDOW_SECS: i64 = 60;

/// Retained chat log length; older messages are dropped.
pub const CHAT_LOG_CAP: usize = 100;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Opaque short session token, globally unique.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameId(String);

/// Opaque short player token, unique within a session.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(String);

/// Generates an 8-character token from a v4 UUID.
fn short_token() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..8].to_string()
}

impl GameId {
    /// Generates a fresh random session id.
    #[must_use]
    pub fn generate() -> Self {
        Self(short_token())
    }

    /// Returns the token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PlayerId {
    /// Generates a fresh random player id.
    #[must_use]
    pub fn generate() -> Self {
        Self(short_token())
    }

    /// Returns the token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for GameId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<&str> for PlayerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for GameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Display for PlayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Lifecycle phase of a session.
///
/// Transitions follow the fixed cycle Setup → Night → Day → Night → …
/// → Ended; Ended is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Waiting for players; roles unassigned
    #[default]
    Setup,
    /// Werewolf votes and seer investigations
    Night,
    /// Open voting and chat
    Day,
    /// Terminal; a winner has been decided
    Ended,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Setup => "setup",
            Self::Night => "night",
            Self::Day => "day",
            Self::Ended => "ended",
        };
        f.write_str(s)
    }
}

/// Assigned player role.
///
/// `Player.role` is `Option<Role>`; `None` means unassigned (Setup).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Kills one villager per night
    Werewolf,
    /// Investigates one player per night
    Seer,
    /// No night action; votes during the day
    Villager,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Werewolf => "werewolf",
            Self::Seer => "seer",
            Self::Villager => "villager",
        };
        f.write_str(s)
    }
}

/// Winning faction of an ended session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Winner {
    /// All werewolves eliminated
    Villagers,
    /// Werewolves reached parity with the village
    Werewolves,
}

/// Player action kinds accepted by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Werewolf nominates a kill target (Night)
    WerewolfVote,
    /// Seer investigates a target (Night)
    SeerInvestigate,
    /// Open vote to execute a target (Day)
    DayVote,
    /// Chat message (Day); routed through the chat path, not the ledger
    Chat,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::WerewolfVote => "werewolf_vote",
            Self::SeerInvestigate => "seer_investigate",
            Self::DayVote => "day_vote",
            Self::Chat => "chat",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for ActionKind {
    type Err = GameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "werewolf_vote" => Ok(Self::WerewolfVote),
            "seer_investigate" => Ok(Self::SeerInvestigate),
            "day_vote" => Ok(Self::DayVote),
            "chat" => Ok(Self::Chat),
            other => Err(GameError::UnknownAction(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A player on the roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    /// Display name, unique within the session
    pub name: String,
    /// Assigned role; `None` until the session starts
    pub role: Option<Role>,
    /// Only ever transitions true → false
    pub alive: bool,
    /// Current day-vote target, cleared on phase resolution
    pub vote: Option<PlayerId>,
    /// When the player joined
    pub joined_at: DateTime<Utc>,
}

impl Player {
    /// Creates a living, unassigned player.
    #[must_use]
    pub const fn new(name: String, joined_at: DateTime<Utc>) -> Self {
        Self {
            name,
            role: None,
            alive: true,
            vote: None,
            joined_at,
        }
    }
}

/// One seer investigation result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeerRecord {
    /// Investigated player
    pub target_id: PlayerId,
    /// Role revealed to the seer
    pub target_role: Role,
    /// When the investigation resolved
    pub timestamp: DateTime<Utc>,
}

/// One chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Sending player
    pub player: PlayerId,
    /// Sanitized message text
    pub message: String,
    /// When the message was accepted
    pub time: DateTime<Utc>,
}

/// Per-phase transient record of in-flight actions.
///
/// Cleared on every phase resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ActionLedger {
    /// Kill-nomination tallies, target → vote count
    pub werewolf_votes: BTreeMap<PlayerId, u32>,
    /// Pending investigation; last investigate wins
    pub seer_target: Option<PlayerId>,
    /// Day votes, target → ordered voter list. A voter appears under at
    /// most one target.
    pub day_votes: BTreeMap<PlayerId, Vec<PlayerId>>,
}

impl ActionLedger {
    /// Returns true if no actions are recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.werewolf_votes.is_empty() && self.seer_target.is_none() && self.day_votes.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Game
// ---------------------------------------------------------------------------

/// One game session: roster, phase, ledger, chat, and history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Game {
    /// Session token
    pub id: GameId,
    /// Current lifecycle phase
    pub phase: Phase,
    /// Absolute deadline of the current phase, if a timer is armed
    pub phase_end: Option<DateTime<Utc>>,
    /// Monotonic counter bumped on every phase change; stale scheduler
    /// resolutions are discarded when their captured epoch no longer
    /// matches
    pub phase_epoch: u64,
    /// Roster keyed by player id
    pub players: BTreeMap<PlayerId, Player>,
    /// Per-phase action ledger
    pub actions: ActionLedger,
    /// Ordered investigation history
    pub seer_history: Vec<SeerRecord>,
    /// Bounded chat log, oldest first
    pub chat: Vec<ChatMessage>,
    /// When the session was created
    pub created_at: DateTime<Utc>,
    /// Roles assigned and first Night begun
    pub started: bool,
    /// Terminal flag; only cleanup may remove an ended session
    pub ended: bool,
    /// Winning faction once ended
    pub winner: Option<Winner>,
}

impl Game {
    /// Creates an empty session in Setup phase.
    #[must_use]
    pub fn new(id: GameId, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            phase: Phase::Setup,
            phase_end: None,
            phase_epoch: 0,
            players: BTreeMap::new(),
            actions: ActionLedger::default(),
            seer_history: Vec::new(),
            chat: Vec::new(),
            created_at,
            started: false,
            ended: false,
            winner: None,
        }
    }

    /// Returns the player with the given id.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::PlayerNotFound`] if absent.
    pub fn player(&self, id: &PlayerId) -> Result<&Player, GameError> {
        self.players
            .get(id)
            .ok_or_else(|| GameError::PlayerNotFound(id.clone()))
    }

    /// Returns ids of living players.
    #[must_use]
    pub fn alive_ids(&self) -> Vec<PlayerId> {
        self.players
            .iter()
            .filter(|(_, p)| p.alive)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Counts living players holding the given role.
    #[must_use]
    pub fn alive_with_role(&self, role: Role) -> usize {
        self.players
            .values()
            .filter(|p| p.alive && p.role == Some(role))
            .count()
    }

    /// Counts living players.
    #[must_use]
    pub fn alive_count(&self) -> usize {
        self.players.values().filter(|p| p.alive).count()
    }

    /// Returns true if any player carries the given display name.
    #[must_use]
    pub fn name_taken(&self, name: &str) -> bool {
        self.players.values().any(|p| p.name == name)
    }

    /// Records a validated ledger action.
    ///
    /// Assumes phase/role validation already ran (see
    /// [`crate::rules::validate_action`]); this only maintains the
    /// ledger invariants. `day_vote` removes the actor's prior vote
    /// entry before inserting the new one, so a voter never appears
    /// under two targets.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::MissingTarget`] if the action needs a
    /// target and none was given, or [`GameError::UnknownAction`] for
    /// [`ActionKind::Chat`], which goes through [`Game::add_chat`].
    pub fn record_action(
        &mut self,
        kind: ActionKind,
        actor: &PlayerId,
        target: Option<&PlayerId>,
    ) -> Result<(), GameError> {
        match kind {
            ActionKind::WerewolfVote => {
                let target = target.ok_or(GameError::MissingTarget(kind))?;
                *self.actions.werewolf_votes.entry(target.clone()).or_insert(0) += 1;
            }
            ActionKind::SeerInvestigate => {
                let target = target.ok_or(GameError::MissingTarget(kind))?;
                self.actions.seer_target = Some(target.clone());
            }
            ActionKind::DayVote => {
                let target = target.ok_or(GameError::MissingTarget(kind))?;
                self.revoke_day_vote(actor);
                self.actions
                    .day_votes
                    .entry(target.clone())
                    .or_default()
                    .push(actor.clone());
                if let Some(player) = self.players.get_mut(actor) {
                    player.vote = Some(target.clone());
                }
            }
            ActionKind::Chat => {
                return Err(GameError::UnknownAction("chat".to_string()));
            }
        }
        Ok(())
    }

    /// Removes the actor's current day vote, dropping empty entries.
    fn revoke_day_vote(&mut self, actor: &PlayerId) {
        let mut emptied = None;
        for (target, voters) in &mut self.actions.day_votes {
            if let Some(pos) = voters.iter().position(|v| v == actor) {
                voters.remove(pos);
                if voters.is_empty() {
                    emptied = Some(target.clone());
                }
                break;
            }
        }
        if let Some(target) = emptied {
            self.actions.day_votes.remove(&target);
        }
    }

    /// Appends a chat message, enforcing the rate window and length cap.
    ///
    /// The message is trimmed and truncated to [`CHAT_MAX_CHARS`]
    /// characters. The log keeps the most recent [`CHAT_LOG_CAP`]
    /// entries.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::EmptyMessage`] if nothing remains after
    /// trimming, or [`GameError::RateLimited`] if the player already
    /// sent [`CHAT_RATE_LIMIT`] messages inside the rolling window.
    pub fn add_chat(
        &mut self,
        player: &PlayerId,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<(), GameError> {
        let window_start = now - Duration::seconds(CHAT_RATE_WINDOW_SECS);
        let recent = self
            .chat
            .iter()
            .filter(|m| &m.player == player && m.time > window_start)
            .count();
        if recent >= CHAT_RATE_LIMIT {
            return Err(GameError::RateLimited);
        }

        let sanitized: String = text.trim().chars().take(CHAT_MAX_CHARS).collect();
        if sanitized.is_empty() {
            return Err(GameError::EmptyMessage);
        }

        self.chat.push(ChatMessage {
            player: player.clone(),
            message: sanitized,
            time: now,
        });
        if self.chat.len() > CHAT_LOG_CAP {
            let excess = self.chat.len() - CHAT_LOG_CAP;
            self.chat.drain(..excess);
        }
        Ok(())
    }

    /// Clears the action ledger and every player's current vote.
    ///
    /// Called by phase resolution regardless of outcome.
    pub fn clear_phase_actions(&mut self) {
        self.actions = ActionLedger::default();
        for player in self.players.values_mut() {
            player.vote = None;
        }
    }

    /// Applies a typed partial update.
    ///
    /// Map-valued fields merge key-wise; scalar and list fields
    /// replace.
    pub fn apply(&mut self, patch: SessionPatch) {
        if let Some(phase) = patch.phase {
            self.phase = phase;
        }
        if let Some(phase_end) = patch.phase_end {
            self.phase_end = phase_end;
        }
        if let Some(started) = patch.started {
            self.started = started;
        }
        if let Some(ended) = patch.ended {
            self.ended = ended;
        }
        if let Some(winner) = patch.winner {
            self.winner = winner;
        }
        if let Some(players) = patch.players {
            self.players.extend(players);
        }
        if let Some(actions) = patch.actions {
            self.actions = actions;
        }
        if let Some(seer_history) = patch.seer_history {
            self.seer_history = seer_history;
        }
        if let Some(chat) = patch.chat {
            self.chat = chat;
        }
    }
}

/// Typed partial update for [`Game::apply`].
///
/// Each field is optional; `None` leaves the target untouched. The
/// doubly-wrapped fields (`phase_end`, `winner`) distinguish "don't
/// touch" from "set to null".
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    /// Replace the current phase
    pub phase: Option<Phase>,
    /// Replace the phase deadline (outer `None` = untouched)
    pub phase_end: Option<Option<DateTime<Utc>>>,
    /// Replace the started flag
    pub started: Option<bool>,
    /// Replace the ended flag
    pub ended: Option<bool>,
    /// Replace the winner (outer `None` = untouched)
    pub winner: Option<Option<Winner>>,
    /// Merge players key-wise (existing ids are overwritten)
    pub players: Option<BTreeMap<PlayerId, Player>>,
    /// Replace the whole action ledger
    pub actions: Option<ActionLedger>,
    /// Replace the seer history
    pub seer_history: Option<Vec<SeerRecord>>,
    /// Replace the chat log
    pub chat: Option<Vec<ChatMessage>>,
}
