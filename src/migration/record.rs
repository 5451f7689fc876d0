use std::path::PathBuf;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{
    error::Error,
    message::{Message, MessageState, NewMessage},
};

const RECORD_VERSION: u32 = 1;

/// The self-describing envelope written for each migrated archive row.
///
/// A file alone is enough to recreate the archive row it came from. Every field is
/// derived from the row, so writing the same row twice yields byte-identical files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRecord {
    pub version: u32,
    pub uuid: Uuid,
    pub source: String,
    pub date_created: DateTime<Utc>,
    pub date_processed: DateTime<Utc>,
    pub payload_sha256: String,
    #[serde(with = "crate::utils::base64_bytes")]
    pub payload: Bytes,
}

fn digest(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

impl MigrationRecord {
    pub fn from_message(message: &Message) -> Result<Self, Error> {
        let MessageState::Processed { date_processed } = message.state else {
            return Err(Error::invalid_parameter(format!(
                "only archived messages can be migrated, {} is in the {} partition",
                message.uuid,
                message.partition()
            )));
        };

        Ok(Self {
            version: RECORD_VERSION,
            uuid: message.uuid,
            source: message.source.clone(),
            date_created: message.date_created,
            date_processed,
            payload_sha256: digest(&message.payload),
            payload: message.payload.clone(),
        })
    }

    /// `{source}/{YYYY-MM-DD}/{uuid}`, relative to the archive root.
    pub fn relative_path(&self) -> PathBuf {
        PathBuf::from(&self.source)
            .join(self.date_created.format("%Y-%m-%d").to_string())
            .join(self.uuid.to_string())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Parses an envelope and checks the payload against its recorded digest.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let record: Self = serde_json::from_slice(bytes)?;

        if record.version != RECORD_VERSION {
            return Err(Error::corrupt(format!(
                "unsupported migration record version {}",
                record.version
            )));
        }

        if digest(&record.payload) != record.payload_sha256 {
            return Err(Error::corrupt(format!(
                "payload digest mismatch for {}",
                record.uuid
            )));
        }

        Ok(record)
    }

    /// The archive row this record was migrated from.
    pub fn into_new_message(self) -> NewMessage {
        NewMessage {
            uuid: self.uuid,
            source: self.source,
            payload: self.payload,
            date_created: self.date_created,
            state: MessageState::Processed {
                date_processed: self.date_processed,
            },
        }
    }
}
