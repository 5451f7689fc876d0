use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::message::Message;

/// Externally observable state of the migration engine's current or last cycle.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    /// No cycle has run yet, or the last completed cycle has been acknowledged by a tick
    Idle,
    /// A cycle is migrating rows
    Running,
    /// The last cycle finished its batch
    CompletedBatch,
    /// The last cycle hit a storage error; periodic cycles are halted until an operator
    /// triggers or resets the engine
    Failed,
    /// Shutdown was requested; no further rows will be migrated
    Stopped,
}

/// Resumable checkpoint of the last archive row migrated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationCursor {
    pub retention_days: u32,
    pub max_batch_size: u32,
    pub last_migrated_id: Option<i64>,
    pub last_date_processed: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl MigrationCursor {
    pub fn new(retention_days: u32, max_batch_size: u32) -> Self {
        Self {
            retention_days,
            max_batch_size,
            last_migrated_id: None,
            last_date_processed: None,
            updated_at: Utc::now(),
        }
    }

    pub(crate) fn advance(&mut self, message: &Message, date_processed: DateTime<Utc>) {
        self.last_migrated_id = Some(message.id);
        self.last_date_processed = Some(date_processed);
        self.updated_at = Utc::now();
    }
}

/// Summary of one migration cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cutoff: DateTime<Utc>,
    pub selected: usize,
    pub migrated: usize,
    pub status: TransferStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatus {
    pub status: TransferStatus,
    pub archive_directory: PathBuf,
    pub retention_days: u32,
    pub max_batch_size: u32,
    pub cursor: Option<MigrationCursor>,
    pub last_error: Option<String>,
    pub last_cycle: Option<CycleReport>,
}

/// What [`super::ArchiveMigrationEngine::trigger`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TriggerOutcome {
    Started,
    AlreadyRunning,
    Stopped,
}
