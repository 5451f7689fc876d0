//! Message types and the partition state machine.
//!
//! A message is one conceptual entity that always rests in exactly one partition:
//!
//! 1. Messages are created in the `Queue` partition (`Pending`)
//! 2. When processed successfully, they move to `Archive` (`Processed`)
//! 3. If processing fails, they move to `Error` (`Failed`)
//! 4. Failed messages may be restored to `Queue` by an operator
//!
//! The partition is never stored separately from the state; it is derived from
//! [`MessageState`], and [`Transition`] values are the only moves the store accepts.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};
use uuid::Uuid;

/// The physical resting place of a message.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
    EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Partition {
    Queue,
    Archive,
    Error,
}

impl Partition {
    pub(crate) fn table(&self) -> &'static str {
        match self {
            Self::Queue => "queue_messages",
            Self::Archive => "archive_messages",
            Self::Error => "error_messages",
        }
    }

    /// The state names a message in this partition can report.
    pub fn states(&self) -> &'static [&'static str] {
        match self {
            Self::Queue => &["pending", "claimed"],
            Self::Archive => &["processed"],
            Self::Error => &["failed"],
        }
    }
}

/// A leased assignment of a queue row to one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub token: Uuid,
    pub worker: String,
    pub expires_at: DateTime<Utc>,
}

impl Claim {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum MessageState {
    Pending {
        claim: Option<Claim>,
    },
    Processed {
        date_processed: DateTime<Utc>,
    },
    Failed {
        error_type: String,
        error_details: String,
        #[serde(with = "crate::utils::base64_bytes")]
        original_payload: Bytes,
    },
}

impl MessageState {
    pub fn pending() -> Self {
        Self::Pending { claim: None }
    }

    pub fn partition(&self) -> Partition {
        match self {
            Self::Pending { .. } => Partition::Queue,
            Self::Processed { .. } => Partition::Archive,
            Self::Failed { .. } => Partition::Error,
        }
    }

    /// The name used by state filters in search. A pending row with an expired claim
    /// reports `pending` since any worker may take it.
    pub fn name(&self, now: DateTime<Utc>) -> &'static str {
        match self {
            Self::Pending { claim: Some(c) } if !c.is_expired(now) => "claimed",
            Self::Pending { .. } => "pending",
            Self::Processed { .. } => "processed",
            Self::Failed { .. } => "failed",
        }
    }
}

/// A message as read from one of the partitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Per-partition identifier; changes when the message moves
    pub id: i64,
    /// Global identifier, stable across moves
    pub uuid: Uuid,
    /// Name of the registered source that submitted the message
    pub source: String,
    #[serde(with = "crate::utils::base64_bytes")]
    pub payload: Bytes,
    pub date_created: DateTime<Utc>,
    #[serde(flatten)]
    pub state: MessageState,
}

impl Message {
    pub fn partition(&self) -> Partition {
        self.state.partition()
    }
}

/// A message to be written into the partition implied by its state.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub uuid: Uuid,
    pub source: String,
    pub payload: Bytes,
    pub date_created: DateTime<Utc>,
    pub state: MessageState,
}

impl NewMessage {
    pub fn pending(source: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            source: source.into(),
            payload: payload.into(),
            date_created: Utc::now(),
            state: MessageState::pending(),
        }
    }
}

/// The authorized moves between partitions.
///
/// Moves out of the queue carry the claim that authorizes them; the store refuses the
/// move if the claim has since been taken over by another worker.
#[derive(Debug, Clone)]
pub enum Transition {
    Archive {
        claim: Claim,
        date_processed: DateTime<Utc>,
    },
    Fail {
        claim: Claim,
        error_type: String,
        error_details: String,
    },
    Requeue {
        date_created: DateTime<Utc>,
    },
}

impl Transition {
    pub fn origin(&self) -> Partition {
        match self {
            Self::Archive { .. } | Self::Fail { .. } => Partition::Queue,
            Self::Requeue { .. } => Partition::Error,
        }
    }

    pub fn destination(&self) -> Partition {
        match self {
            Self::Archive { .. } => Partition::Archive,
            Self::Fail { .. } => Partition::Error,
            Self::Requeue { .. } => Partition::Queue,
        }
    }

    pub(crate) fn claim(&self) -> Option<&Claim> {
        match self {
            Self::Archive { claim, .. } | Self::Fail { claim, .. } => Some(claim),
            Self::Requeue { .. } => None,
        }
    }
}

/// A queue row together with the claim that currently owns it.
#[derive(Debug, Clone)]
pub struct ClaimedMessage {
    pub message: Message,
    pub claim: Claim,
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    #[test]
    fn partition_follows_state() {
        assert_eq!(MessageState::pending().partition(), Partition::Queue);
        assert_eq!(
            MessageState::Processed {
                date_processed: Utc::now()
            }
            .partition(),
            Partition::Archive
        );
    }

    #[test]
    fn expired_claim_reads_as_pending() {
        let now = Utc::now();
        let state = MessageState::Pending {
            claim: Some(Claim {
                token: Uuid::new_v4(),
                worker: "w1".to_owned(),
                expires_at: now - TimeDelta::seconds(1),
            }),
        };
        assert_eq!(state.name(now), "pending");
    }

    #[test]
    fn partition_names_parse() {
        assert_eq!("error".parse::<Partition>().unwrap(), Partition::Error);
        assert!("errors".parse::<Partition>().is_err());
    }
}
