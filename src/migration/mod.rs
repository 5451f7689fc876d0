//! Retirement of aged archive rows into file-backed storage.
//!
//! The engine runs one cycle at a time. Each cycle selects up to `max_batch_size`
//! archive rows processed before the retention cutoff, oldest first, and for each row
//! writes a [`MigrationRecord`] through an [`ArchiveSink`] before deleting the row. A
//! failed write stops the batch and leaves the engine `FAILED` with the cursor at the
//! last row that was fully migrated.
//!
//! Only one cycle may run at a time: an in-process mutex guards against overlapping
//! triggers, and a lease row in the database guards against a second process sharing
//! the same database.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use chrono::Utc;
use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    config::MigrationConfig,
    db::MessageStore,
    error::Error,
    message::{Message, MessageState, Partition},
};

mod record;
mod sink;
mod status;

pub use record::MigrationRecord;
pub use sink::{ArchiveSink, FileArchive};
pub use status::{CycleReport, MigrationCursor, MigrationStatus, TransferStatus, TriggerOutcome};

const MIGRATION_LOCK_TTL: Duration = Duration::from_secs(300);

#[derive(Clone)]
pub struct ArchiveMigrationEngine {
    inner: Arc<Inner>,
}

struct Inner {
    store: MessageStore,
    sink: Arc<dyn ArchiveSink>,
    config: MigrationConfig,
    /// Identifies this engine in the database lease.
    holder: String,
    status: watch::Sender<TransferStatus>,
    cycle: tokio::sync::Mutex<()>,
    shutdown: CancellationToken,
    /// Set while [`ArchiveMigrationEngine::run`] is looping.
    looping: AtomicBool,
    wake: Notify,
    last_error: Mutex<Option<String>>,
    last_cycle: Mutex<Option<CycleReport>>,
}

#[bon::bon]
impl ArchiveMigrationEngine {
    #[builder]
    pub fn new(
        store: MessageStore,
        config: MigrationConfig,
        sink: Option<Arc<dyn ArchiveSink>>,
        shutdown: Option<CancellationToken>,
    ) -> Self {
        let sink = sink.unwrap_or_else(|| Arc::new(FileArchive::new(config.archive_dir.clone())));
        let (status, _) = watch::channel(TransferStatus::Idle);

        Self {
            inner: Arc::new(Inner {
                store,
                sink,
                config,
                holder: format!("migration-{}", Uuid::new_v4()),
                status,
                cycle: tokio::sync::Mutex::new(()),
                shutdown: shutdown.unwrap_or_default(),
                looping: AtomicBool::new(false),
                wake: Notify::new(),
                last_error: Mutex::new(None),
                last_cycle: Mutex::new(None),
            }),
        }
    }
}

impl ArchiveMigrationEngine {
    pub fn transfer_status(&self) -> TransferStatus {
        *self.inner.status.borrow()
    }

    /// Receiver that observes every status change.
    pub fn subscribe(&self) -> watch::Receiver<TransferStatus> {
        self.inner.status.subscribe()
    }

    fn set_status(&self, status: TransferStatus) {
        let previous = self.inner.status.send_replace(status);
        if previous != status {
            tracing::debug!(%previous, %status, "migration status changed");
        }
    }

    pub async fn status(&self) -> Result<MigrationStatus, Error> {
        let cursor = self.inner.store.load_cursor().await?;

        Ok(MigrationStatus {
            status: self.transfer_status(),
            archive_directory: self.inner.sink.root().to_path_buf(),
            retention_days: self.inner.config.retention_days,
            max_batch_size: self.inner.config.max_batch_size,
            cursor,
            last_error: lock(&self.inner.last_error).clone(),
            last_cycle: lock(&self.inner.last_cycle).clone(),
        })
    }

    /// Starts a cycle now unless one is already running.
    ///
    /// With the periodic loop running this wakes it early; otherwise the cycle is
    /// spawned on its own task. From `FAILED` this is the operator's retry: the cycle
    /// runs even though periodic cycles are halted, and a successful cycle resumes them.
    pub fn trigger(&self) -> TriggerOutcome {
        if self.inner.shutdown.is_cancelled() {
            return TriggerOutcome::Stopped;
        }
        if self.transfer_status() == TransferStatus::Running {
            return TriggerOutcome::AlreadyRunning;
        }

        if self.inner.looping.load(Ordering::Acquire) {
            self.inner.wake.notify_one();
            return TriggerOutcome::Started;
        }

        let engine = self.clone();
        tokio::spawn(async move {
            match engine.run_cycle().await {
                Ok(Some(report)) => {
                    tracing::info!(migrated = report.migrated, "triggered migration cycle finished")
                }
                Ok(None) => tracing::debug!("triggered migration cycle skipped"),
                Err(e) => {
                    tracing::error!(error = %e.describe(), "triggered migration cycle failed")
                }
            }
        });

        TriggerOutcome::Started
    }

    /// Returns a `FAILED` engine to `IDLE` so periodic cycles resume.
    pub fn reset(&self) -> bool {
        let reset = self.inner.status.send_if_modified(|status| {
            if *status == TransferStatus::Failed {
                *status = TransferStatus::Idle;
                true
            } else {
                false
            }
        });

        if reset {
            lock(&self.inner.last_error).take();
            tracing::info!("migration engine reset by operator");
        }

        reset
    }

    /// Requests shutdown. A cycle in progress finishes its current row and then stops.
    pub fn stop(&self) {
        self.inner.shutdown.cancel();
    }

    /// Runs one cycle now.
    ///
    /// Returns `Ok(None)` without doing anything if another cycle holds the in-process
    /// guard or the database lease, or if shutdown has been requested.
    pub async fn run_cycle(&self) -> Result<Option<CycleReport>, Error> {
        let Ok(_guard) = self.inner.cycle.try_lock() else {
            return Ok(None);
        };

        if self.inner.shutdown.is_cancelled() {
            return Ok(None);
        }

        let store = &self.inner.store;
        if !store
            .try_lock_migration(&self.inner.holder, MIGRATION_LOCK_TTL)
            .await?
        {
            tracing::info!("migration lease held by another process, skipping cycle");
            return Ok(None);
        }

        let result = self.migrate_batch().await;

        if let Err(e) = store.unlock_migration(&self.inner.holder).await {
            tracing::warn!(error = %e, "failed to release migration lease");
        }

        match &result {
            Ok(report) => {
                lock(&self.inner.last_error).take();
                *lock(&self.inner.last_cycle) = Some(report.clone());
            }
            Err(e) => {
                *lock(&self.inner.last_error) = Some(e.describe());
            }
        }

        result.map(Some)
    }

    async fn migrate_batch(&self) -> Result<CycleReport, Error> {
        let store = &self.inner.store;
        let config = &self.inner.config;

        let started_at = Utc::now();
        let Some(cutoff) = chrono::Duration::try_days(config.retention_days as i64)
            .and_then(|retention| started_at.checked_sub_signed(retention))
        else {
            self.set_status(TransferStatus::Failed);
            return Err(Error::invalid_parameter(format!(
                "retention of {} days is out of range",
                config.retention_days
            )));
        };

        self.set_status(TransferStatus::Running);

        let mut report = CycleReport {
            started_at,
            finished_at: started_at,
            cutoff,
            selected: 0,
            migrated: 0,
            status: TransferStatus::Running,
        };

        let prepared = async {
            let batch = store.select_migratable(cutoff, config.max_batch_size).await?;
            let mut cursor = store
                .load_cursor()
                .await?
                .unwrap_or_else(|| MigrationCursor::new(config.retention_days, config.max_batch_size));
            cursor.retention_days = config.retention_days;
            cursor.max_batch_size = config.max_batch_size;
            Ok::<_, Error>((batch, cursor))
        }
        .await;

        let (batch, mut cursor) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => return Err(self.fail(e, &mut report)),
        };

        report.selected = batch.len();
        tracing::info!(
            selected = batch.len(),
            %cutoff,
            max_batch_size = config.max_batch_size,
            "starting migration cycle"
        );

        let mut stopped = false;

        for message in &batch {
            if self.inner.shutdown.is_cancelled() {
                stopped = true;
                break;
            }

            if let Err(e) = self.migrate_one(message, &mut cursor).await {
                tracing::error!(
                    id = message.id,
                    uuid = %message.uuid,
                    error = %e.describe(),
                    "migration of archive row failed, halting cycle"
                );
                return Err(self.fail(e, &mut report));
            }

            report.migrated += 1;
        }

        report.finished_at = Utc::now();
        report.status = if stopped {
            TransferStatus::Stopped
        } else {
            TransferStatus::CompletedBatch
        };
        self.set_status(report.status);

        tracing::info!(
            migrated = report.migrated,
            selected = report.selected,
            status = %report.status,
            "migration cycle finished"
        );

        Ok(report)
    }

    /// Write, then delete, then checkpoint. The row is only deleted after the sink has
    /// confirmed the write, and the cursor only moves after the delete.
    async fn migrate_one(&self, message: &Message, cursor: &mut MigrationCursor) -> Result<(), Error> {
        let MessageState::Processed { date_processed } = message.state else {
            return Err(Error::corrupt(format!(
                "row {} selected for migration is not archived",
                message.id
            )));
        };

        if !self
            .inner
            .store
            .try_lock_migration(&self.inner.holder, MIGRATION_LOCK_TTL)
            .await?
        {
            return Err(Error::MigrationLockLost);
        }

        let record = MigrationRecord::from_message(message)?;
        let path = self.inner.sink.write(&record).await?;

        self.inner.store.delete(Partition::Archive, message.id).await?;

        cursor.advance(message, date_processed);
        self.inner.store.save_cursor(cursor).await?;

        tracing::debug!(
            id = message.id,
            uuid = %message.uuid,
            path = %path.display(),
            "migrated archive row"
        );

        Ok(())
    }

    fn fail(&self, error: Error, report: &mut CycleReport) -> Error {
        report.finished_at = Utc::now();
        report.status = TransferStatus::Failed;
        *lock(&self.inner.last_cycle) = Some(report.clone());
        self.set_status(TransferStatus::Failed);
        error
    }

    /// Periodic loop: one cycle, then sleep for the configured interval or until
    /// triggered, until stopped.
    ///
    /// While `FAILED` only a trigger runs a cycle; ticks are skipped.
    pub async fn run(self) {
        tracing::info!(
            archive_directory = %self.inner.sink.root().display(),
            retention_days = self.inner.config.retention_days,
            max_batch_size = self.inner.config.max_batch_size,
            interval_secs = self.inner.config.interval.as_secs(),
            "migration engine started"
        );

        self.inner.looping.store(true, Ordering::Release);
        let mut triggered = false;

        loop {
            match self.transfer_status() {
                TransferStatus::Stopped => break,
                TransferStatus::Failed if !triggered => {
                    tracing::debug!("migration halted after failure, waiting for operator");
                }
                status => {
                    if status == TransferStatus::CompletedBatch {
                        self.set_status(TransferStatus::Idle);
                    }

                    match self.run_cycle().await {
                        Ok(Some(_)) => {}
                        Ok(None) => tracing::debug!("migration cycle skipped"),
                        Err(e) => tracing::error!(
                            error = %e.describe(),
                            retryable = e.is_retryable(),
                            "migration cycle failed"
                        ),
                    }
                }
            }

            triggered = false;

            tokio::select! {
                _ = self.inner.shutdown.cancelled() => break,
                _ = self.inner.wake.notified() => triggered = true,
                _ = tokio::time::sleep(self.inner.config.interval) => {}
            }
        }

        self.inner.looping.store(false, Ordering::Release);

        // Let a cycle started by a trigger finish its current row.
        let _guard = self.inner.cycle.lock().await;
        self.set_status(TransferStatus::Stopped);

        tracing::info!("migration engine stopped");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
