//! Error types for `moonphase`.
//!
//! Two layers: [`GameError`] is the caller-facing taxonomy returned by
//! every engine and store operation, with a stable [`ErrorCategory`]
//! the transport layer can map to status semantics. [`MoonphaseError`]
//! aggregates everything the binary can fail with and maps to exit
//! codes.

use std::path::PathBuf;
use thiserror::Error;

use crate::session::{ActionKind, GameId, Phase, PlayerId, Role};

// ============================================================================
// Exit Codes
// ============================================================================

/// Exit codes for the `moonphase` binary.
///
/// These codes follow Unix conventions.
pub struct ExitCode;

impl ExitCode {
    /// Successful execution
    pub const SUCCESS: i32 = 0;

    /// General error
    pub const ERROR: i32 = 1;

    /// Configuration error (invalid YAML, validation failure)
    pub const CONFIG_ERROR: i32 = 2;

    /// I/O error (file not found, permission denied)
    pub const IO_ERROR: i32 = 3;

    /// Snapshot error (corrupt or unwritable persistence file)
    pub const SNAPSHOT_ERROR: i32 = 4;

    /// Usage error (invalid arguments, missing required options)
    pub const USAGE_ERROR: i32 = 64;

    /// Interrupted by SIGINT (Ctrl+C)
    pub const INTERRUPTED: i32 = 130;

    /// Terminated by SIGTERM
    pub const TERMINATED: i32 = 143;
}

// ============================================================================
// Top-Level Error
// ============================================================================

/// Top-level error type for `moonphase` operations.
///
/// Aggregates all domain-specific errors and provides a unified
/// interface for error handling and exit-code mapping.
#[derive(Debug, Error)]
pub enum MoonphaseError {
    /// Configuration loading or validation error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Game operation error
    #[error(transparent)]
    Game(#[from] GameError),

    /// Snapshot persistence error
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl MoonphaseError {
    /// Returns the appropriate exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Yaml(_) => ExitCode::CONFIG_ERROR,
            Self::Snapshot(_) | Self::Json(_) => ExitCode::SNAPSHOT_ERROR,
            Self::Io(_) => ExitCode::IO_ERROR,
            Self::Game(_) => ExitCode::ERROR,
        }
    }
}

// ============================================================================
// Error Categories
// ============================================================================

/// Stable reason category for a rejected operation.
///
/// The transport layer dispatches on this rather than on individual
/// [`GameError`] variants, so new variants can be added without
/// breaking status mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Unknown session, player, or target
    NotFound,
    /// Operation conflicts with current session state
    Conflict,
    /// Malformed or disallowed input
    Validation,
    /// Chat flood protection tripped
    RateLimited,
    /// Durable write or read failed
    Persistence,
}

impl ErrorCategory {
    /// Returns the stable wire-visible reason code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Validation => "validation",
            Self::RateLimited => "rate_limited",
            Self::Persistence => "persistence",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Game Errors
// ============================================================================

/// Caller-facing error for session and game operations.
///
/// Every rejected operation returns one of these as a typed outcome;
/// nothing in the engine panics or silently drops a rejection.
#[derive(Debug, Error)]
pub enum GameError {
    /// No session with the given id
    #[error("session not found: {0}")]
    SessionNotFound(GameId),

    /// Actor is not a member of the session
    #[error("player not found: {0}")]
    PlayerNotFound(PlayerId),

    /// Target is not a member of the session
    #[error("target player not found: {0}")]
    TargetNotFound(PlayerId),

    /// Join or role assignment attempted after the session started
    #[error("session already started")]
    AlreadyStarted,

    /// Operation attempted on an ended session
    #[error("session has ended")]
    AlreadyEnded,

    /// Action attempted before roles were assigned
    #[error("session has not started yet")]
    NotStarted,

    /// Fewer players than the minimum needed to assign roles
    #[error("need at least {required} players, have {actual}")]
    NotEnoughPlayers {
        /// Minimum roster size for role assignment
        required: usize,
        /// Current roster size
        actual: usize,
    },

    /// Display name collides with an existing player
    #[error("player name already taken: {0}")]
    NameTaken(String),

    /// Display name empty after trimming or over the length cap
    #[error("invalid player name: {0:?}")]
    InvalidName(String),

    /// Dead players cannot act
    #[error("dead players cannot act")]
    ActorDead,

    /// Dead players cannot be targeted
    #[error("cannot target dead player: {0}")]
    TargetDead(PlayerId),

    /// Action requires a target but none was given
    #[error("action {0} requires a target")]
    MissingTarget(ActionKind),

    /// Self-targeting is never allowed
    #[error("cannot target yourself")]
    SelfTarget,

    /// Action not legal in the current phase
    #[error("{action} not allowed during {phase} phase")]
    WrongPhase {
        /// The attempted action
        action: ActionKind,
        /// The session's current phase
        phase: Phase,
    },

    /// Action reserved for a different role
    #[error("{action} requires the {required} role")]
    WrongRole {
        /// The attempted action
        action: ActionKind,
        /// Role that may perform it
        required: Role,
    },

    /// Action type string did not parse
    #[error("unknown action type: {0:?}")]
    UnknownAction(String),

    /// Chat message empty after trimming
    #[error("message is empty")]
    EmptyMessage,

    /// Chat flood window exceeded
    #[error("too many messages, slow down")]
    RateLimited,

    /// Durable commit failed after retries; the mutation was rolled back
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

impl GameError {
    /// Returns the stable category for this error.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::SessionNotFound(_) | Self::PlayerNotFound(_) | Self::TargetNotFound(_) => {
                ErrorCategory::NotFound
            }
            Self::AlreadyStarted
            | Self::AlreadyEnded
            | Self::NotStarted
            | Self::NameTaken(_)
            | Self::WrongPhase { .. }
            | Self::WrongRole { .. }
            | Self::ActorDead
            | Self::TargetDead(_) => ErrorCategory::Conflict,
            Self::NotEnoughPlayers { .. }
            | Self::InvalidName(_)
            | Self::MissingTarget(_)
            | Self::SelfTarget
            | Self::UnknownAction(_)
            | Self::EmptyMessage => ErrorCategory::Validation,
            Self::RateLimited => ErrorCategory::RateLimited,
            Self::Snapshot(_) => ErrorCategory::Persistence,
        }
    }
}

// ============================================================================
// Configuration Errors
// ============================================================================

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("cannot read config file {path}: {source}")]
    Read {
        /// Path to the configuration file
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// YAML parsing failed
    #[error("parse error in {path}: {message}")]
    Parse {
        /// Path to the configuration file
        path: PathBuf,
        /// Error message from the parser
        message: String,
    },

    /// Field has an invalid value
    #[error("invalid value for '{field}': got '{value}', expected {expected}")]
    InvalidValue {
        /// Name of the field with the invalid value
        field: String,
        /// The actual value provided
        value: String,
        /// Description of what was expected
        expected: String,
    },
}

// ============================================================================
// Snapshot Errors
// ============================================================================

/// Persistence-layer errors for the durable session snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Write or rename failed after the configured retries
    #[error("snapshot write to {path} failed after {attempts} attempts: {source}")]
    WriteFailed {
        /// Snapshot file path
        path: PathBuf,
        /// Number of attempts made
        attempts: u32,
        /// Last I/O error observed
        source: std::io::Error,
    },

    /// Snapshot file could not be read
    #[error("cannot read snapshot {path}: {source}")]
    Read {
        /// Snapshot file path
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Snapshot file exists but does not deserialize
    #[error("corrupt snapshot {path}: {source}")]
    Corrupt {
        /// Snapshot file path
        path: PathBuf,
        /// Underlying JSON error
        source: serde_json::Error,
    },

    /// Session map did not serialize
    #[error("snapshot serialization failed: {0}")]
    Serialize(#[source] serde_json::Error),
}

// ============================================================================
// Result Type Alias
// ============================================================================

/// Result type alias for `moonphase` operations.
pub type Result<T> = std::result::Result<T, MoonphaseError>;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(ExitCode::SUCCESS, 0);
        assert_eq!(ExitCode::ERROR, 1);
        assert_eq!(ExitCode::CONFIG_ERROR, 2);
        assert_eq!(ExitCode::IO_ERROR, 3);
        assert_eq!(ExitCode::SNAPSHOT_ERROR, 4);
        assert_eq!(ExitCode::USAGE_ERROR, 64);
        assert_eq!(ExitCode::INTERRUPTED, 130);
        assert_eq!(ExitCode::TERMINATED, 143);
    }

    #[test]
    fn test_config_error_exit_code() {
        let err: MoonphaseError = ConfigError::InvalidValue {
            field: "phases.night.duration_seconds".to_string(),
            value: "0".to_string(),
            expected: "a positive integer".to_string(),
        }
        .into();
        assert_eq!(err.exit_code(), ExitCode::CONFIG_ERROR);
    }

    #[test]
    fn test_io_error_exit_code() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "not found");
        let err: MoonphaseError = io_err.into();
        assert_eq!(err.exit_code(), ExitCode::IO_ERROR);
    }

    #[test]
    fn test_not_found_category() {
        let id = GameId::from("abc123");
        assert_eq!(
            GameError::SessionNotFound(id).category(),
            ErrorCategory::NotFound
        );
    }

    #[test]
    fn test_conflict_category() {
        assert_eq!(
            GameError::AlreadyStarted.category(),
            ErrorCategory::Conflict
        );
        assert_eq!(
            GameError::NameTaken("mina".to_string()).category(),
            ErrorCategory::Conflict
        );
    }

    #[test]
    fn test_validation_category() {
        assert_eq!(GameError::SelfTarget.category(), ErrorCategory::Validation);
        assert_eq!(
            GameError::UnknownAction("dance".to_string()).category(),
            ErrorCategory::Validation
        );
    }

    #[test]
    fn test_rate_limited_category() {
        assert_eq!(
            GameError::RateLimited.category(),
            ErrorCategory::RateLimited
        );
    }

    #[test]
    fn test_category_reason_codes_are_stable() {
        assert_eq!(ErrorCategory::NotFound.as_str(), "not_found");
        assert_eq!(ErrorCategory::Conflict.as_str(), "conflict");
        assert_eq!(ErrorCategory::Validation.as_str(), "validation");
        assert_eq!(ErrorCategory::RateLimited.as_str(), "rate_limited");
        assert_eq!(ErrorCategory::Persistence.as_str(), "persistence");
    }

    #[test]
    fn test_wrong_phase_display() {
        let err = GameError::WrongPhase {
            action: ActionKind::DayVote,
            phase: Phase::Night,
        };
        assert!(err.to_string().contains("day_vote"));
        assert!(err.to_string().contains("night"));
    }
}
