use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    db::{Lookup, MessageStore},
    error::Error,
    message::{MessageState, Partition, Transition},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RestoreReceipt {
    pub uuid: Uuid,
    pub queue_id: i64,
}

/// Operator actions on the error partition.
#[derive(Clone)]
pub struct ErrorRecovery {
    store: MessageStore,
}

impl ErrorRecovery {
    pub fn new(store: MessageStore) -> Self {
        Self { store }
    }

    /// Puts a failed message back on the queue with its original payload and uuid.
    ///
    /// The error row is removed in the same transaction that creates the queue row, so
    /// of two concurrent restores of the same id exactly one succeeds and the other
    /// gets [`Error::NotFound`].
    pub async fn restore(&self, error_id: i64) -> Result<RestoreReceipt, Error> {
        let message = self.store.get(Partition::Error, Lookup::Id(error_id)).await?;

        let queue_id = self
            .store
            .move_message(
                error_id,
                Transition::Requeue {
                    date_created: Utc::now(),
                },
            )
            .await?;

        if let MessageState::Failed { error_type, .. } = &message.state {
            tracing::info!(
                uuid = %message.uuid,
                source = %message.source,
                error_id,
                queue_id,
                %error_type,
                "restored failed message to queue"
            );
        }

        Ok(RestoreReceipt {
            uuid: message.uuid,
            queue_id,
        })
    }

    /// Discards a failed message for good.
    pub async fn purge(&self, error_id: i64) -> Result<(), Error> {
        self.store.delete(Partition::Error, error_id).await?;
        tracing::info!(error_id, "purged failed message");
        Ok(())
    }
}
