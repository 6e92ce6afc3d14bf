//! Runtime configuration.
//!
//! A single YAML file covering the snapshot path, phase durations,
//! cleanup policy, and persistence retry policy. Every section is
//! optional and falls back to defaults, so an empty file (or no file)
//! is a valid configuration. Loaded once at startup, validated, and
//! then treated as immutable.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ConfigError;
use crate::scheduler::PhaseDurations;

// ============================================================================
// Schema
// ============================================================================

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// Path of the durable session snapshot file.
    pub snapshot_path: PathBuf,

    /// Timed phase lengths.
    pub phases: PhasesConfig,

    /// Expired-session cleanup policy.
    pub cleanup: CleanupConfig,

    /// Snapshot write retry policy.
    pub persistence: PersistenceConfig,

    /// Scheduler behavior.
    pub scheduler: SchedulerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            snapshot_path: PathBuf::from("moonphase.json"),
            phases: PhasesConfig::default(),
            cleanup: CleanupConfig::default(),
            persistence: PersistenceConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

/// Per-phase timer lengths.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PhasesConfig {
    /// Night phase length.
    pub night: PhaseConfig,

    /// Day phase length.
    pub day: PhaseConfig,
}

impl Default for PhasesConfig {
    fn default() -> Self {
        Self {
            night: PhaseConfig {
                duration_seconds: 120,
            },
            day: PhaseConfig {
                duration_seconds: 300,
            },
        }
    }
}

/// A single phase timer length.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PhaseConfig {
    /// Timer length in whole seconds.
    pub duration_seconds: u64,
}

/// Expired-session cleanup policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CleanupConfig {
    /// Sessions older than this are purged regardless of phase.
    pub max_age_hours: u64,

    /// Interval between cleanup sweeps.
    pub sweep_interval_seconds: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            max_age_hours: 24,
            sweep_interval_seconds: 3600,
        }
    }
}

/// Snapshot write retry policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PersistenceConfig {
    /// Extra attempts after the first failed write.
    pub write_retries: u32,

    /// Backoff between write attempts, in milliseconds.
    pub retry_backoff_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            write_retries: 3,
            retry_backoff_ms: 25,
        }
    }
}

/// Scheduler behavior.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SchedulerConfig {
    /// Delay before retrying a phase resolution whose durable commit
    /// failed.
    pub retry_interval_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            retry_interval_seconds: 5,
        }
    }
}

// ============================================================================
// Loading and validation
// ============================================================================

impl Config {
    /// Loads and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if the file cannot be read,
    /// [`ConfigError::Parse`] for malformed YAML, or
    /// [`ConfigError::InvalidValue`] if validation fails.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Self = serde_yaml::from_str(&raw).map_err(|err| ConfigError::Parse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;

        config.validate()?;
        info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Validates field values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] naming the offending
    /// field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_positive(
            "phases.night.duration_seconds",
            self.phases.night.duration_seconds,
        )?;
        require_positive(
            "phases.day.duration_seconds",
            self.phases.day.duration_seconds,
        )?;
        require_positive("cleanup.max_age_hours", self.cleanup.max_age_hours)?;
        require_positive(
            "cleanup.sweep_interval_seconds",
            self.cleanup.sweep_interval_seconds,
        )?;
        require_positive(
            "scheduler.retry_interval_seconds",
            self.scheduler.retry_interval_seconds,
        )?;

        if self.snapshot_path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "snapshot_path".to_string(),
                value: String::new(),
                expected: "a non-empty path".to_string(),
            });
        }
        Ok(())
    }

    /// Phase durations in the scheduler's terms.
    #[must_use]
    pub const fn phase_durations(&self) -> PhaseDurations {
        PhaseDurations {
            night: Duration::from_secs(self.phases.night.duration_seconds),
            day: Duration::from_secs(self.phases.day.duration_seconds),
        }
    }

    /// Maximum session age before a cleanup sweep removes it.
    #[must_use]
    pub fn max_session_age(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::try_from(self.cleanup.max_age_hours).unwrap_or(i64::MAX))
    }

    /// Interval between cleanup sweeps.
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup.sweep_interval_seconds)
    }

    /// Delay before a failed resolution commit is retried.
    #[must_use]
    pub const fn scheduler_retry_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler.retry_interval_seconds)
    }

    /// Backoff between snapshot write attempts.
    #[must_use]
    pub const fn write_backoff(&self) -> Duration {
        Duration::from_millis(self.persistence.retry_backoff_ms)
    }
}

fn require_positive(field: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: "0".to_string(),
            expected: "a positive integer".to_string(),
        });
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
