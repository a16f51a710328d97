//! Checkpoint tracking — computes the `[last_checked, next_check)` window
//! for a run and commits the new checkpoint only once the run completes.
//!
//! The checkpoint is the only state shared across runs. It is read once at
//! run start and written once at run end; a run killed mid-way leaves it
//! untouched, so the next run reprocesses the same window (at-least-once).

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;

/// Key under which the last-checked timestamp is persisted.
pub const CHECKPOINT_KEY: &str = "relay_last_checked";

/// Minimal persistent key-value seam for the checkpoint.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Read a stored value.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a value.
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// The half-open time window a run is responsible for, in epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    /// End of the previously committed window.
    pub last_checked: i64,
    /// Start-of-run timestamp; becomes the next checkpoint on commit.
    pub next_check: i64,
}

impl TimeWindow {
    /// The `after:`/`before:` search terms bounding this window.
    ///
    /// The upper bound is `next_check - 1`: `before:` is exclusive in the
    /// mailbox DSL and the committed checkpoint re-opens at `next_check`.
    pub fn date_range_query(&self) -> String {
        format!("after:{} before:{}", self.last_checked, self.next_check - 1)
    }
}

/// Opens the window for one run and commits it on completion.
pub struct CheckpointTracker {
    store: Arc<dyn CheckpointStore>,
    next_check: i64,
}

impl CheckpointTracker {
    /// Read the persisted checkpoint and compute this run's window.
    ///
    /// With no stored value the window starts now (a first run never
    /// processes retroactively). A stored value ahead of `now` clamps the
    /// window empty rather than letting the checkpoint regress.
    pub async fn open(
        store: Arc<dyn CheckpointStore>,
        now: DateTime<Utc>,
    ) -> Result<(Self, TimeWindow), StoreError> {
        let mut next_check = now.timestamp();
        let last_checked = store
            .get(CHECKPOINT_KEY)
            .await?
            .and_then(|v| v.trim().parse::<i64>().ok())
            .unwrap_or(next_check);
        if last_checked > next_check {
            next_check = last_checked;
        }

        let window = TimeWindow {
            last_checked,
            next_check,
        };
        Ok((Self { store, next_check }, window))
    }

    /// Persist the `next_check` captured at run start.
    ///
    /// Never a value computed after the sends — messages arriving mid-run
    /// belong to the next window.
    pub async fn commit(&self) -> Result<(), StoreError> {
        self.store
            .set(CHECKPOINT_KEY, &self.next_check.to_string())
            .await
    }
}

/// File-backed checkpoint store: one value per key, stored as
/// `<dir>/<key>` with the raw string as contents.
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Read(e.to_string())),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StoreError::Write(e.to_string()))?;
        tokio::fs::write(self.path_for(key), value)
            .await
            .map_err(|e| StoreError::Write(e.to_string()))
    }
}
