use bytes::Bytes;
use serde::Serialize;
use uuid::Uuid;

use crate::{db::MessageStore, error::Error, message::NewMessage};

/// Acknowledgement handed back to a sender once its message is durably queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SubmitReceipt {
    pub id: i64,
    pub uuid: Uuid,
}

/// Entry point for inbound messages. Accepts raw bytes from a registered source and
/// writes them into the queue partition.
#[derive(Clone)]
pub struct IngestGateway {
    store: MessageStore,
    max_payload_bytes: usize,
}

impl IngestGateway {
    pub fn new(store: MessageStore, max_payload_bytes: usize) -> Self {
        Self {
            store,
            max_payload_bytes,
        }
    }

    pub async fn submit(
        &self,
        source: impl AsRef<str>,
        payload: impl Into<Bytes>,
    ) -> Result<SubmitReceipt, Error> {
        let source = source.as_ref();
        let payload = payload.into();

        if self.store.source(source).await?.is_none() {
            return Err(Error::unknown_source(source));
        }
        if payload.is_empty() {
            return Err(Error::invalid_parameter("payload must not be empty"));
        }
        if payload.len() > self.max_payload_bytes {
            return Err(Error::invalid_parameter(format!(
                "payload of {} bytes exceeds the limit of {} bytes",
                payload.len(),
                self.max_payload_bytes
            )));
        }

        let message = NewMessage::pending(source, payload);
        let uuid = message.uuid;
        let size = message.payload.len();

        let id = self.store.create(message).await?;

        tracing::info!(%source, %uuid, id, size, "message queued");

        Ok(SubmitReceipt { id, uuid })
    }
}
