//! Game rule resolution.
//!
//! Pure functions over [`Game`]: role assignment, night and day phase
//! resolution, win-condition evaluation, and action validation. No
//! concurrency concerns here; the store invokes these under the
//! session lock and randomness comes in as an explicit `Rng` so tests
//! can seed it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::seq::SliceRandom;
use serde::Serialize;

use crate::error::GameError;
use crate::session::{ActionKind, Game, MIN_PLAYERS, Phase, PlayerId, Role, SeerRecord, Winner};

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// A player killed during night resolution.
#[derive(Debug, Clone, Serialize)]
pub struct KilledPlayer {
    /// Victim id
    pub player_id: PlayerId,
    /// Victim display name
    pub name: String,
}

/// Result revealed to the seer after night resolution.
#[derive(Debug, Clone, Serialize)]
pub struct SeerResult {
    /// Investigated player
    pub target_id: PlayerId,
    /// Investigated player's display name
    pub target_name: String,
    /// Whether the target is the werewolf
    pub is_werewolf: bool,
}

/// Outcome of resolving the Night phase.
#[derive(Debug, Clone, Serialize)]
pub struct NightOutcome {
    /// Werewolf kill, if the vote produced a strict maximum
    pub killed: Option<KilledPlayer>,
    /// Investigation result, if one was recorded
    pub seer_result: Option<SeerResult>,
}

/// A player executed by day vote.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutedPlayer {
    /// Executed player id
    pub player_id: PlayerId,
    /// Executed player's display name
    pub name: String,
    /// Role revealed on execution
    pub role: Option<Role>,
    /// Votes the player received
    pub votes: usize,
}

/// Outcome of resolving the Day phase.
#[derive(Debug, Clone, Serialize)]
pub struct DayOutcome {
    /// Execution, if any votes were cast for a living target
    pub executed: Option<ExecutedPlayer>,
    /// Final tally over living targets
    pub vote_counts: BTreeMap<PlayerId, usize>,
}

// ---------------------------------------------------------------------------
// Role assignment
// ---------------------------------------------------------------------------

/// Assigns roles with a uniformly random permutation: exactly one
/// werewolf, exactly one seer, everyone else a villager. Marks the
/// session started and moves it to Night.
///
/// # Errors
///
/// Returns [`GameError::AlreadyEnded`] / [`GameError::AlreadyStarted`]
/// if the session is past Setup, or [`GameError::NotEnoughPlayers`]
/// below [`MIN_PLAYERS`]. Retrying after a successful assignment is a
/// conflict, never a silent no-op.
pub fn assign_roles(game: &mut Game, rng: &mut impl Rng) -> Result<(), GameError> {
    if game.ended {
        return Err(GameError::AlreadyEnded);
    }
    if game.started {
        return Err(GameError::AlreadyStarted);
    }
    if game.players.len() < MIN_PLAYERS {
        return Err(GameError::NotEnoughPlayers {
            required: MIN_PLAYERS,
            actual: game.players.len(),
        });
    }

    let mut ids: Vec<PlayerId> = game.players.keys().cloned().collect();
    ids.shuffle(rng);

    for (i, id) in ids.iter().enumerate() {
        let role = match i {
            0 => Role::Werewolf,
            1 => Role::Seer,
            _ => Role::Villager,
        };
        if let Some(player) = game.players.get_mut(id) {
            player.role = Some(role);
        }
    }

    game.started = true;
    game.phase = Phase::Night;
    Ok(())
}

// ---------------------------------------------------------------------------
// Phase resolution
// ---------------------------------------------------------------------------

/// Resolves the Night phase: werewolf kill and seer investigation.
///
/// The kill target is the strict maximum of the werewolf-vote tally; a
/// tie for the top count kills nobody. An already-dead target is never
/// re-killed. The investigation, if recorded, is appended to the seer
/// history with the resolution timestamp. The ledger and per-player
/// votes are cleared regardless of outcome.
pub fn resolve_night(game: &mut Game, now: DateTime<Utc>) -> NightOutcome {
    let mut killed = None;
    let mut seer_result = None;

    if let Some((target_id, _)) = strict_max(&game.actions.werewolf_votes) {
        let target_id = target_id.clone();
        if let Some(target) = game.players.get_mut(&target_id) {
            if target.alive {
                target.alive = false;
                killed = Some(KilledPlayer {
                    player_id: target_id,
                    name: target.name.clone(),
                });
            }
        }
    }

    if let Some(target_id) = game.actions.seer_target.clone() {
        if let Some(target) = game.players.get(&target_id) {
            if let Some(role) = target.role {
                seer_result = Some(SeerResult {
                    target_id: target_id.clone(),
                    target_name: target.name.clone(),
                    is_werewolf: role == Role::Werewolf,
                });
                game.seer_history.push(SeerRecord {
                    target_id,
                    target_role: role,
                    timestamp: now,
                });
            }
        }
    }

    game.clear_phase_actions();
    NightOutcome { killed, seer_result }
}

/// Returns the entry with the strictly greatest count, or `None` on a
/// tie for the maximum.
fn strict_max(votes: &BTreeMap<PlayerId, u32>) -> Option<(&PlayerId, u32)> {
    let max = votes.values().copied().max()?;
    let mut top = votes.iter().filter(|(_, count)| **count == max);
    let leader = top.next()?;
    if top.next().is_some() {
        return None;
    }
    Some((leader.0, *leader.1))
}

/// Resolves the Day phase: tallies votes over living targets and
/// executes one of the top-voted targets, chosen uniformly at random
/// on a tie. Clears the ledger and per-player votes.
pub fn resolve_day(game: &mut Game, rng: &mut impl Rng) -> DayOutcome {
    let vote_counts: BTreeMap<PlayerId, usize> = game
        .actions
        .day_votes
        .iter()
        .filter(|(target, _)| game.players.get(*target).is_some_and(|p| p.alive))
        .map(|(target, voters)| (target.clone(), voters.len()))
        .collect();

    let mut executed = None;
    if let Some(max) = vote_counts.values().copied().max() {
        let top: Vec<&PlayerId> = vote_counts
            .iter()
            .filter(|(_, count)| **count == max)
            .map(|(target, _)| target)
            .collect();
        let choice = top[rng.random_range(0..top.len())].clone();
        if let Some(target) = game.players.get_mut(&choice) {
            target.alive = false;
            executed = Some(ExecutedPlayer {
                player_id: choice.clone(),
                name: target.name.clone(),
                role: target.role,
                votes: max,
            });
        }
    }

    game.clear_phase_actions();
    DayOutcome {
        executed,
        vote_counts,
    }
}

// ---------------------------------------------------------------------------
// Win condition
// ---------------------------------------------------------------------------

/// Evaluates the win condition and, on a win, transitions the session
/// to Ended.
///
/// Werewolves win when living werewolves equal or outnumber living
/// non-werewolves; villagers win when no werewolf remains. Returns the
/// recorded winner for an already-ended session.
pub fn check_win(game: &mut Game) -> Option<Winner> {
    if !game.started {
        return None;
    }
    if game.ended {
        return game.winner;
    }

    let wolves = game.alive_with_role(Role::Werewolf);
    let others = game.alive_count() - wolves;

    let winner = if wolves >= others {
        Winner::Werewolves
    } else if wolves == 0 {
        Winner::Villagers
    } else {
        return None;
    };

    game.ended = true;
    game.phase = Phase::Ended;
    game.phase_end = None;
    game.winner = Some(winner);
    Some(winner)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validates that `actor` may perform `kind` against `target` right
/// now.
///
/// Checks, in order: session liveness, actor existence and liveness,
/// target existence and liveness, then phase/role legality per action.
///
/// # Errors
///
/// Returns the specific [`GameError`] describing the first failed
/// check.
pub fn validate_action(
    game: &Game,
    actor: &PlayerId,
    kind: ActionKind,
    target: Option<&PlayerId>,
) -> Result<(), GameError> {
    if game.ended {
        return Err(GameError::AlreadyEnded);
    }
    if !game.started {
        return Err(GameError::NotStarted);
    }

    let player = game.player(actor)?;
    if !player.alive {
        return Err(GameError::ActorDead);
    }

    if let Some(target_id) = target {
        let target_player = game
            .players
            .get(target_id)
            .ok_or_else(|| GameError::TargetNotFound(target_id.clone()))?;
        if !target_player.alive {
            return Err(GameError::TargetDead(target_id.clone()));
        }
    }

    match kind {
        ActionKind::WerewolfVote => {
            if player.role != Some(Role::Werewolf) {
                return Err(GameError::WrongRole {
                    action: kind,
                    required: Role::Werewolf,
                });
            }
            require_other_target(game, actor, kind, target)
        }
        ActionKind::SeerInvestigate => {
            if player.role != Some(Role::Seer) {
                return Err(GameError::WrongRole {
                    action: kind,
                    required: Role::Seer,
                });
            }
            require_other_target(game, actor, kind, target)
        }
        ActionKind::DayVote => require_other_target(game, actor, kind, target),
        ActionKind::Chat => {
            if game.phase == legal_phase(kind) {
                Ok(())
            } else {
                Err(GameError::WrongPhase {
                    action: kind,
                    phase: game.phase,
                })
            }
        }
    }
}

/// Phase in which the action is legal.
const fn legal_phase(kind: ActionKind) -> Phase {
    match kind {
        ActionKind::WerewolfVote | ActionKind::SeerInvestigate => Phase::Night,
        ActionKind::DayVote | ActionKind::Chat => Phase::Day,
    }
}

/// Shared tail for targeted actions: phase legality, target presence,
/// and the no-self-targeting rule.
fn require_other_target(
    game: &Game,
    actor: &PlayerId,
    kind: ActionKind,
    target: Option<&PlayerId>,
) -> Result<(), GameError> {
    if game.phase != legal_phase(kind) {
        return Err(GameError::WrongPhase {
            action: kind,
            phase: game.phase,
        });
    }
    let target = target.ok_or(GameError::MissingTarget(kind))?;
    if target == actor {
        return Err(GameError::SelfTarget);
    }
    Ok(())
}
