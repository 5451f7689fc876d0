//! Queue consumers.
//!
//! A [`Worker`] claims the oldest claimable queue row, runs the configured
//! [`Processor`] on it, and moves the row to the archive or error partition under the
//! same claim. Workers share nothing but the store; claims keep them apart.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    config::WorkerConfig,
    db::MessageStore,
    error::Error,
    message::{ClaimedMessage, Message, Transition},
    processor::{ProcessingFailure, Processor},
};

/// What happened to the one message a worker took.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Archived {
        uuid: Uuid,
        archive_id: i64,
    },
    Failed {
        uuid: Uuid,
        error_id: i64,
        error_type: String,
    },
    /// The lease expired while processing and another worker took the row over. The
    /// result of this attempt was discarded.
    ClaimLost {
        uuid: Uuid,
    },
}

pub struct Worker {
    id: String,
    store: MessageStore,
    processor: Arc<dyn Processor>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        store: MessageStore,
        processor: Arc<dyn Processor>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            id: id.into(),
            store,
            processor,
            config,
        }
    }

    /// Claims and processes at most one message. Returns `None` if the queue had nothing
    /// claimable.
    pub async fn process_next(&self) -> Result<Option<Outcome>, Error> {
        let Some(ClaimedMessage { message, claim }) = self
            .store
            .claim_next(&self.id, self.config.claim_lease)
            .await?
        else {
            return Ok(None);
        };

        let id = message.id;
        let uuid = message.uuid;
        let result = self.run_processor(message).await;

        let transition = match &result {
            Ok(()) => Transition::Archive {
                claim: claim.clone(),
                date_processed: Utc::now(),
            },
            Err(failure) => Transition::Fail {
                claim: claim.clone(),
                error_type: failure.error_type.clone(),
                error_details: failure.details.clone(),
            },
        };

        match self.store.move_message(id, transition).await {
            Ok(new_id) => Ok(Some(match result {
                Ok(()) => {
                    tracing::info!(worker = %self.id, %uuid, archive_id = new_id, "message archived");
                    Outcome::Archived {
                        uuid,
                        archive_id: new_id,
                    }
                }
                Err(failure) => {
                    tracing::warn!(
                        worker = %self.id,
                        %uuid,
                        error_id = new_id,
                        error_type = %failure.error_type,
                        details = %failure.details,
                        "message failed processing"
                    );
                    Outcome::Failed {
                        uuid,
                        error_id: new_id,
                        error_type: failure.error_type,
                    }
                }
            })),
            Err(Error::ClaimLost { .. }) => {
                tracing::warn!(worker = %self.id, %uuid, "claim lost before result was recorded");
                Ok(Some(Outcome::ClaimLost { uuid }))
            }
            Err(e) => {
                // Hand the row back rather than leave it blocked until the lease runs out.
                if let Err(release) = self.store.release(id, &claim).await {
                    tracing::warn!(worker = %self.id, %uuid, error = %release, "failed to release claim");
                }
                Err(e)
            }
        }
    }

    /// Runs the processor on its own task so a panic becomes a failure instead of
    /// taking the worker down, bounded by the processing timeout.
    async fn run_processor(&self, message: Message) -> Result<(), ProcessingFailure> {
        let processor = self.processor.clone();
        let mut handle = tokio::spawn(async move { processor.process(&message).await });

        match tokio::time::timeout(self.config.processing_timeout, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) if join.is_panic() => Err(ProcessingFailure::new(
                "ProcessorPanic",
                panic_message(join.into_panic()),
            )),
            Ok(Err(join)) => Err(ProcessingFailure::new("ProcessorAborted", join.to_string())),
            Err(_) => {
                handle.abort();
                Err(ProcessingFailure::new(
                    "Timeout",
                    format!(
                        "processing did not finish within {}s",
                        self.config.processing_timeout.as_secs_f64()
                    ),
                ))
            }
        }
    }

    /// Polls until `shutdown` fires. Idle polls back off between `poll_min` and
    /// `poll_max`; any processed message resets the delay.
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(worker = %self.id, "worker started");

        let mut backoff = Backoff::new(self.config.poll_min, self.config.poll_max);

        while !shutdown.is_cancelled() {
            let delay = match self.process_next().await {
                Ok(Some(_)) => {
                    backoff.reset();
                    continue;
                }
                Ok(None) => backoff.next_delay(),
                Err(e) => {
                    tracing::error!(
                        worker = %self.id,
                        error = %e.describe(),
                        retryable = e.is_retryable(),
                        "worker iteration failed"
                    );
                    backoff.next_delay()
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        tracing::info!(worker = %self.id, "worker stopped");
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "processor panicked".to_owned()
    }
}

/// Doubling delay between idle polls.
#[derive(Debug)]
pub(crate) struct Backoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub(crate) fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max: max.max(min),
            current: min,
        }
    }

    pub(crate) fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub(crate) fn reset(&mut self) {
        self.current = self.min;
    }
}

/// A fixed set of workers sharing one processor and one shutdown token.
pub struct WorkerPool {
    tasks: JoinSet<()>,
    shutdown: CancellationToken,
}

impl WorkerPool {
    pub fn spawn(
        count: usize,
        store: MessageStore,
        processor: Arc<dyn Processor>,
        config: WorkerConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let mut tasks = JoinSet::new();
        let prefix = format!("worker-{}", &Uuid::new_v4().simple().to_string()[..8]);

        for n in 0..count {
            let worker = Worker::new(
                format!("{prefix}-{n}"),
                store.clone(),
                processor.clone(),
                config.clone(),
            );
            tasks.spawn(worker.run(shutdown.clone()));
        }

        tracing::info!(count, "worker pool started");

        Self { tasks, shutdown }
    }

    /// Cancels every worker and waits for them to finish their current message.
    pub async fn join(mut self) {
        self.shutdown.cancel();
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "worker task ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_cap_and_resets() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(350));
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(350));
        assert_eq!(backoff.next_delay(), Duration::from_millis(350));

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn panic_payloads_are_rendered() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_message(Box::new(7u8)), "processor panicked");
    }
}
