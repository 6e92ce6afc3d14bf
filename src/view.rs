//! Player-visible projections of session state.
//!
//! Roles stay hidden until the session ends, except to their owner.
//! These are pure functions over a committed [`Game`] snapshot.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::GameError;
use crate::session::{ChatMessage, Game, GameId, Phase, PlayerId, Role, SeerRecord, Winner};

/// Chat window size exposed during the Day phase.
const RECENT_CHAT: usize = 10;

/// One roster entry in a [`GameSummary`].
#[derive(Debug, Clone, Serialize)]
pub struct PlayerSummary {
    /// Player id
    pub id: PlayerId,
    /// Display name
    pub name: String,
    /// Liveness
    pub alive: bool,
    /// Role, present only for the viewer or once the game ended
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

/// Public summary of a session, filtered for the requesting viewer.
#[derive(Debug, Clone, Serialize)]
pub struct GameSummary {
    /// Session id
    pub game_id: GameId,
    /// Current phase
    pub phase: Phase,
    /// Whether roles have been assigned
    pub started: bool,
    /// Whether the game is over
    pub ended: bool,
    /// Winning faction, if ended
    pub winner: Option<Winner>,
    /// Roster with role visibility applied
    pub players: Vec<PlayerSummary>,
    /// Living player count
    pub alive_count: usize,
    /// Dead player count
    pub dead_count: usize,
    /// Current day-vote tally, target → votes
    pub vote_counts: BTreeMap<PlayerId, usize>,
    /// Absolute phase deadline, if a timer is armed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase_end: Option<DateTime<Utc>>,
    /// Whole seconds until the deadline, floored at zero
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_remaining: Option<u64>,
    /// Last messages, exposed during Day only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recent_chat: Option<Vec<ChatMessage>>,
}

/// A living werewolf ally.
#[derive(Debug, Clone, Serialize)]
pub struct AllyInfo {
    /// Ally id
    pub id: PlayerId,
    /// Ally display name
    pub name: String,
}

/// Role-specific capability snapshot for one player.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum RoleInfo {
    /// Werewolf: sees living allied werewolves
    Werewolf {
        /// Other living werewolves
        allies: Vec<AllyInfo>,
        /// Whether a kill vote is possible right now
        can_kill: bool,
        /// Whether this player is alive
        is_alive: bool,
    },
    /// Seer: sees investigation history
    Seer {
        /// Whether an investigation is possible right now
        can_investigate: bool,
        /// Prior investigation results
        previous_investigations: Vec<SeerRecord>,
        /// Whether this player is alive
        is_alive: bool,
    },
    /// Villager: no special capability
    Villager {
        /// Static objective text
        objective: &'static str,
        /// Whether this player is alive
        is_alive: bool,
    },
}

/// Builds the viewer-filtered summary of a session.
///
/// Roles are exposed for the viewer's own entry and for everyone once
/// the session ended. The chat window appears during Day only.
#[must_use]
pub fn summary(game: &Game, viewer: Option<&PlayerId>, now: DateTime<Utc>) -> GameSummary {
    let players: Vec<PlayerSummary> = game
        .players
        .iter()
        .map(|(id, player)| PlayerSummary {
            id: id.clone(),
            name: player.name.clone(),
            alive: player.alive,
            role: if game.ended || viewer == Some(id) {
                player.role
            } else {
                None
            },
        })
        .collect();

    let alive_count = players.iter().filter(|p| p.alive).count();
    let dead_count = players.len() - alive_count;

    let vote_counts = game
        .actions
        .day_votes
        .iter()
        .map(|(target, voters)| (target.clone(), voters.len()))
        .collect();

    let time_remaining = game.phase_end.map(|end| {
        let remaining = (end - now).num_seconds();
        u64::try_from(remaining).unwrap_or(0)
    });

    let recent_chat = if game.phase == Phase::Day && !game.chat.is_empty() {
        let start = game.chat.len().saturating_sub(RECENT_CHAT);
        Some(game.chat[start..].to_vec())
    } else {
        None
    };

    GameSummary {
        game_id: game.id.clone(),
        phase: game.phase,
        started: game.started,
        ended: game.ended,
        winner: game.winner,
        players,
        alive_count,
        dead_count,
        vote_counts,
        phase_end: game.phase_end,
        time_remaining,
        recent_chat,
    }
}

/// Builds the role-specific capability snapshot for a player.
///
/// # Errors
///
/// Returns [`GameError::PlayerNotFound`] for an unknown player or
/// [`GameError::NotStarted`] if roles are not assigned yet.
pub fn role_info(game: &Game, player_id: &PlayerId) -> Result<RoleInfo, GameError> {
    let player = game.player(player_id)?;
    let role = player.role.ok_or(GameError::NotStarted)?;
    let is_alive = player.alive;
    let night = game.phase == Phase::Night;

    Ok(match role {
        Role::Werewolf => RoleInfo::Werewolf {
            allies: game
                .players
                .iter()
                .filter(|(id, p)| {
                    p.alive && p.role == Some(Role::Werewolf) && *id != player_id
                })
                .map(|(id, p)| AllyInfo {
                    id: id.clone(),
                    name: p.name.clone(),
                })
                .collect(),
            can_kill: night,
            is_alive,
        },
        Role::Seer => RoleInfo::Seer {
            can_investigate: night,
            previous_investigations: game.seer_history.clone(),
            is_alive,
        },
        Role::Villager => RoleInfo::Villager {
            objective: "Find and eliminate all werewolves",
            is_alive,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::assign_roles;
    use crate::session::{ActionKind, Player};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn started_game(n: usize) -> (Game, Vec<PlayerId>) {
        let now = Utc::now();
        let mut game = Game::new(GameId::generate(), now);
        let ids: Vec<PlayerId> = (0..n)
            .map(|i| {
                let id = PlayerId::from(format!("p{i}").as_str());
                game.players
                    .insert(id.clone(), Player::new(format!("player{i}"), now));
                id
            })
            .collect();
        assign_roles(&mut game, &mut StdRng::seed_from_u64(9)).unwrap();
        (game, ids)
    }

    #[test]
    fn test_roles_hidden_from_others() {
        let (game, ids) = started_game(4);
        let view = summary(&game, Some(&ids[0]), Utc::now());

        for entry in &view.players {
            if entry.id == ids[0] {
                assert!(entry.role.is_some(), "viewer sees own role");
            } else {
                assert!(entry.role.is_none(), "other roles stay hidden");
            }
        }
    }

    #[test]
    fn test_roles_revealed_after_end() {
        let (mut game, _) = started_game(4);
        game.ended = true;
        let view = summary(&game, None, Utc::now());
        assert!(view.players.iter().all(|p| p.role.is_some()));
    }

    #[test]
    fn test_counts_and_votes() {
        let (mut game, ids) = started_game(4);
        game.phase = Phase::Day;
        game.players.get_mut(&ids[3]).unwrap().alive = false;
        game.record_action(ActionKind::DayVote, &ids[0], Some(&ids[1]))
            .unwrap();
        game.record_action(ActionKind::DayVote, &ids[2], Some(&ids[1]))
            .unwrap();

        let view = summary(&game, None, Utc::now());
        assert_eq!(view.alive_count, 3);
        assert_eq!(view.dead_count, 1);
        assert_eq!(view.vote_counts.get(&ids[1]), Some(&2));
    }

    #[test]
    fn test_time_remaining_floors_at_zero() {
        let (mut game, _) = started_game(3);
        let now = Utc::now();
        game.phase_end = Some(now - chrono::Duration::seconds(5));
        assert_eq!(summary(&game, None, now).time_remaining, Some(0));

        game.phase_end = Some(now + chrono::Duration::seconds(42));
        let remaining = summary(&game, None, now).time_remaining.unwrap();
        assert!((41..=42).contains(&remaining));
    }

    #[test]
    fn test_chat_window_day_only_last_ten() {
        let (mut game, ids) = started_game(3);
        let mut now = Utc::now();
        for i in 0..12 {
            now += chrono::Duration::seconds(61);
            game.add_chat(&ids[0], &format!("m{i}"), now).unwrap();
        }

        assert!(summary(&game, None, now).recent_chat.is_none());

        game.phase = Phase::Day;
        let chat = summary(&game, None, now).recent_chat.unwrap();
        assert_eq!(chat.len(), 10);
        assert_eq!(chat.last().unwrap().message, "m11");
    }

    #[test]
    fn test_role_info_variants() {
        let (game, _) = started_game(4);
        let find = |role| {
            game.players
                .iter()
                .find(|(_, p)| p.role == Some(role))
                .map(|(id, _)| id.clone())
                .unwrap()
        };

        match role_info(&game, &find(Role::Werewolf)).unwrap() {
            RoleInfo::Werewolf {
                allies, can_kill, ..
            } => {
                assert!(allies.is_empty(), "single werewolf has no allies");
                assert!(can_kill, "night phase allows kills");
            }
            other => panic!("expected werewolf info, got {other:?}"),
        }

        match role_info(&game, &find(Role::Seer)).unwrap() {
            RoleInfo::Seer {
                can_investigate,
                previous_investigations,
                ..
            } => {
                assert!(can_investigate);
                assert!(previous_investigations.is_empty());
            }
            other => panic!("expected seer info, got {other:?}"),
        }

        match role_info(&game, &find(Role::Villager)).unwrap() {
            RoleInfo::Villager { objective, .. } => {
                assert!(objective.contains("werewolves"));
            }
            other => panic!("expected villager info, got {other:?}"),
        }
    }

    #[test]
    fn test_role_info_before_start() {
        let game = Game::new(GameId::from("g"), Utc::now());
        let err = role_info(&game, &PlayerId::from("nobody")).unwrap_err();
        assert!(matches!(err, GameError::PlayerNotFound(_)));

        let mut game = Game::new(GameId::from("g"), Utc::now());
        let pid = PlayerId::from("p0");
        game.players
            .insert(pid.clone(), Player::new("mina".to_string(), Utc::now()));
        let err = role_info(&game, &pid).unwrap_err();
        assert!(matches!(err, GameError::NotStarted));
    }
}
