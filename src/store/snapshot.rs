//! Durable session snapshot.
//!
//! One JSON file mapping session id to the full session record. Every
//! commit rewrites the file through a temp-file-then-rename so a crash
//! mid-write never leaves a torn snapshot: readers see the prior
//! complete file or the new complete file, never a mix.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::SnapshotError;
use crate::session::{Game, GameId};

/// Default bounded retry count for a failed durable write.
pub const DEFAULT_WRITE_RETRIES: u32 = 3;

/// Default backoff between write retries.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(25);

/// Atomic-replace snapshot file.
///
/// Writes are serialized through an internal lock so concurrent
/// committers cannot interleave temp files.
#[derive(Debug)]
pub struct SnapshotFile {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
    retries: u32,
    backoff: Duration,
}

impl SnapshotFile {
    /// Creates a snapshot handle with the default retry policy.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_retry_policy(path, DEFAULT_WRITE_RETRIES, DEFAULT_RETRY_BACKOFF)
    }

    /// Creates a snapshot handle with an explicit retry policy.
    ///
    /// `retries` counts attempts after the first, so `0` means a
    /// single try.
    #[must_use]
    pub fn with_retry_policy(path: impl Into<PathBuf>, retries: u32, backoff: Duration) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
            retries,
            backoff,
        }
    }

    /// Returns the snapshot file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serializes and durably writes the full session mapping.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Serialize`] if the mapping does not
    /// serialize, or [`SnapshotError::WriteFailed`] once every retry
    /// is exhausted.
    pub async fn write(&self, games: &BTreeMap<GameId, Game>) -> Result<(), SnapshotError> {
        let bytes = serde_json::to_vec_pretty(games).map_err(SnapshotError::Serialize)?;

        let _guard = self.write_lock.lock().await;
        let tmp = self.tmp_path();
        let attempts = self.retries + 1;
        let mut last_err = None;

        for attempt in 1..=attempts {
            match self.replace(&tmp, &bytes).await {
                Ok(()) => {
                    debug!(path = %self.path.display(), bytes = bytes.len(), "snapshot committed");
                    return Ok(());
                }
                Err(err) => {
                    warn!(
                        path = %self.path.display(),
                        attempt,
                        attempts,
                        error = %err,
                        "snapshot write failed"
                    );
                    last_err = Some(err);
                    if attempt < attempts {
                        tokio::time::sleep(self.backoff).await;
                    }
                }
            }
        }

        // Leave no temp file behind on total failure
        let _ = tokio::fs::remove_file(&tmp).await;
        Err(SnapshotError::WriteFailed {
            path: self.path.clone(),
            attempts,
            source: last_err
                .unwrap_or_else(|| std::io::Error::other("snapshot write failed")),
        })
    }

    async fn replace(&self, tmp: &Path, bytes: &[u8]) -> std::io::Result<()> {
        tokio::fs::write(tmp, bytes).await?;
        tokio::fs::rename(tmp, &self.path).await
    }

    /// Loads the session mapping.
    ///
    /// A missing file yields an empty mapping; corrupt JSON is a typed
    /// error rather than a silent reset.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Read`] on I/O failure or
    /// [`SnapshotError::Corrupt`] if the file does not deserialize.
    pub async fn load(&self) -> Result<BTreeMap<GameId, Game>, SnapshotError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| SnapshotError::Corrupt {
                path: self.path.clone(),
                source,
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no snapshot file, starting empty");
                Ok(BTreeMap::new())
            }
            Err(source) => Err(SnapshotError::Read {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn tmp_path(&self) -> PathBuf {
        let mut os = self.path.as_os_str().to_os_string();
        os.push(".tmp");
        PathBuf::from(os)
    }
}
