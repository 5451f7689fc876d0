use chrono::Utc;
use serde::Serialize;
use sqlx::{FromRow, SqliteConnection};
use uuid::Uuid;

use crate::{
    error::Error,
    message::{Claim, ClaimedMessage, Message, MessageState, NewMessage, Partition, Transition},
    source::Source,
    utils::{from_millis, to_millis},
};

use super::MessageStore;

/// How a caller identifies a message within one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Id(i64),
    Uuid(Uuid),
}

impl std::fmt::Display for Lookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Uuid(uuid) => write!(f, "{uuid}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PartitionCounts {
    pub queue: u64,
    pub archive: u64,
    pub error: u64,
}

/// One row of any partition. Columns a partition does not have are selected as NULL.
#[derive(FromRow)]
pub(crate) struct MessageRow {
    id: i64,
    uuid: String,
    source: String,
    payload: Vec<u8>,
    date_created: i64,

    claim_token: Option<String>,
    claimed_by: Option<String>,
    claim_expires_at: Option<i64>,

    date_processed: Option<i64>,

    error_type: Option<String>,
    error_details: Option<String>,
    original_payload: Option<Vec<u8>>,
}

fn parse_uuid(raw: &str) -> Result<Uuid, Error> {
    Uuid::parse_str(raw).map_err(|e| Error::corrupt(format!("invalid uuid {raw:?}: {e}")))
}

fn missing(column: &str, id: i64) -> Error {
    Error::corrupt(format!("message {id} is missing column {column}"))
}

impl MessageRow {
    pub(crate) fn into_message(self, partition: Partition) -> Result<Message, Error> {
        let state = match partition {
            Partition::Queue => {
                let claim = match (self.claim_token, self.claimed_by, self.claim_expires_at) {
                    (Some(token), Some(worker), Some(expires_at)) => Some(Claim {
                        token: parse_uuid(&token)?,
                        worker,
                        expires_at: from_millis(expires_at)?,
                    }),
                    _ => None,
                };
                MessageState::Pending { claim }
            }
            Partition::Archive => MessageState::Processed {
                date_processed: from_millis(
                    self.date_processed
                        .ok_or_else(|| missing("date_processed", self.id))?,
                )?,
            },
            Partition::Error => MessageState::Failed {
                error_type: self.error_type.ok_or_else(|| missing("error_type", self.id))?,
                error_details: self
                    .error_details
                    .ok_or_else(|| missing("error_details", self.id))?,
                original_payload: self
                    .original_payload
                    .ok_or_else(|| missing("original_payload", self.id))?
                    .into(),
            },
        };

        Ok(Message {
            id: self.id,
            uuid: parse_uuid(&self.uuid)?,
            source: self.source,
            payload: self.payload.into(),
            date_created: from_millis(self.date_created)?,
            state,
        })
    }
}

/// `SELECT` clause producing [`MessageRow`]s for a partition, aliased `m` joined to `s`.
pub(crate) fn select_from(partition: Partition) -> String {
    let extra = match partition {
        Partition::Queue => {
            "m.claim_token, m.claimed_by, m.claim_expires_at, \
             NULL AS date_processed, \
             NULL AS error_type, NULL AS error_details, NULL AS original_payload"
        }
        Partition::Archive => {
            "NULL AS claim_token, NULL AS claimed_by, NULL AS claim_expires_at, \
             m.date_processed, \
             NULL AS error_type, NULL AS error_details, NULL AS original_payload"
        }
        Partition::Error => {
            "NULL AS claim_token, NULL AS claimed_by, NULL AS claim_expires_at, \
             NULL AS date_processed, \
             m.error_type, m.error_details, m.original_payload"
        }
    };

    format!(
        "SELECT m.id, m.uuid, s.name AS source, m.payload, m.date_created, {extra} \
         FROM {} m JOIN sources s ON s.id = m.source",
        partition.table()
    )
}

/// The common columns of a row removed from its origin partition during a move.
#[derive(FromRow)]
struct Detached {
    uuid: String,
    source: i64,
    payload: Vec<u8>,
    date_created: i64,
}

async fn insert_row(
    db: &mut SqliteConnection,
    source: i64,
    uuid: &str,
    payload: &[u8],
    date_created: i64,
    state: &MessageState,
) -> Result<i64, Error> {
    let id: i64 = match state {
        MessageState::Pending { .. } => {
            sqlx::query_scalar(
                "
                INSERT INTO queue_messages (uuid, source, payload, date_created)
                VALUES ($1, $2, $3, $4)
                RETURNING id
                ",
            )
            .bind(uuid)
            .bind(source)
            .bind(payload)
            .bind(date_created)
            .fetch_one(db)
            .await?
        }
        MessageState::Processed { date_processed } => {
            sqlx::query_scalar(
                "
                INSERT INTO archive_messages (uuid, source, payload, date_created, date_processed)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING id
                ",
            )
            .bind(uuid)
            .bind(source)
            .bind(payload)
            .bind(date_created)
            .bind(to_millis(*date_processed))
            .fetch_one(db)
            .await?
        }
        MessageState::Failed {
            error_type,
            error_details,
            original_payload,
        } => {
            sqlx::query_scalar(
                "
                INSERT INTO error_messages
                    (uuid, source, payload, date_created, error_type, error_details, original_payload)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING id
                ",
            )
            .bind(uuid)
            .bind(source)
            .bind(payload)
            .bind(date_created)
            .bind(error_type)
            .bind(error_details)
            .bind(original_payload.as_ref())
            .fetch_one(db)
            .await?
        }
    };

    Ok(id)
}

impl MessageStore {
    /// Writes a new message into the partition implied by its state and returns its id.
    ///
    /// Any claim carried by a pending state is ignored; new queue rows are always unclaimed.
    pub async fn create(&self, message: NewMessage) -> Result<i64, Error> {
        // Sources are never deleted, so the lookup and the insert need no shared
        // transaction; each statement commits on its own.
        let mut conn = self.db.acquire().await?;

        let source = Source::get_id(&mut conn, &message.source).await?;
        insert_row(
            &mut conn,
            source,
            &message.uuid.to_string(),
            &message.payload,
            to_millis(message.date_created),
            &message.state,
        )
        .await
    }

    pub async fn get(&self, partition: Partition, lookup: Lookup) -> Result<Message, Error> {
        let row: Option<MessageRow> = match lookup {
            Lookup::Id(id) => {
                sqlx::query_as(&format!("{} WHERE m.id = $1", select_from(partition)))
                    .bind(id)
                    .fetch_optional(&self.db)
                    .await?
            }
            Lookup::Uuid(uuid) => {
                sqlx::query_as(&format!("{} WHERE m.uuid = $1", select_from(partition)))
                    .bind(uuid.to_string())
                    .fetch_optional(&self.db)
                    .await?
            }
        };

        row.ok_or_else(|| Error::message_not_found(partition, lookup))?
            .into_message(partition)
    }

    /// Finds the partition a uuid currently rests in, with its per-partition id.
    pub async fn locate(&self, uuid: Uuid) -> Result<Option<(Partition, i64)>, Error> {
        let uuid = uuid.to_string();
        for partition in [Partition::Queue, Partition::Archive, Partition::Error] {
            let id: Option<i64> = sqlx::query_scalar(&format!(
                "SELECT id FROM {} WHERE uuid = $1",
                partition.table()
            ))
            .bind(&uuid)
            .fetch_optional(&self.db)
            .await?;

            if let Some(id) = id {
                return Ok(Some((partition, id)));
            }
        }
        Ok(None)
    }

    /// Atomically claims the oldest queue row that is unclaimed or whose lease has expired.
    ///
    /// The selection and the claim happen in one `UPDATE` statement, so two callers can
    /// never be handed the same row. Returns `None` when nothing is claimable.
    pub async fn claim_next(
        &self,
        worker: &str,
        lease: std::time::Duration,
    ) -> Result<Option<ClaimedMessage>, Error> {
        let now = Utc::now();
        let expires_at = chrono::Duration::from_std(lease)
            .ok()
            .and_then(|lease| now.checked_add_signed(lease))
            .ok_or_else(|| {
                Error::invalid_parameter(format!("claim lease of {lease:?} is out of range"))
            })?;
        let claim = Claim {
            token: Uuid::new_v4(),
            worker: worker.to_owned(),
            expires_at,
        };

        let claimed: Option<i64> = sqlx::query_scalar(
            "
            UPDATE queue_messages
            SET claim_token = $1, claimed_by = $2, claim_expires_at = $3
            WHERE id = (
                SELECT id FROM queue_messages
                WHERE claim_expires_at IS NULL OR claim_expires_at <= $4
                ORDER BY date_created ASC, id ASC
                LIMIT 1
            )
            RETURNING id
            ",
        )
        .bind(claim.token.to_string())
        .bind(&claim.worker)
        .bind(to_millis(claim.expires_at))
        .bind(to_millis(now))
        .fetch_optional(&self.db)
        .await?;

        let Some(id) = claimed else {
            return Ok(None);
        };

        let message = self.get(Partition::Queue, Lookup::Id(id)).await?;

        tracing::debug!(id, uuid = %message.uuid, worker, "claimed queue message");

        Ok(Some(ClaimedMessage { message, claim }))
    }

    /// Gives a claimed row back to the queue before its lease expires.
    pub async fn release(&self, id: i64, claim: &Claim) -> Result<bool, Error> {
        let result = sqlx::query(
            "
            UPDATE queue_messages
            SET claim_token = NULL, claimed_by = NULL, claim_expires_at = NULL
            WHERE id = $1 AND claim_token = $2
            ",
        )
        .bind(id)
        .bind(claim.token.to_string())
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Moves a message between partitions and returns its id in the destination.
    ///
    /// The delete from the origin and the insert into the destination share one
    /// transaction; if either fails nothing is committed and the origin row is untouched.
    /// Moves out of the queue fail with [`Error::ClaimLost`] unless the row is still
    /// held by the transition's claim.
    pub async fn move_message(&self, id: i64, transition: Transition) -> Result<i64, Error> {
        let origin = transition.origin();
        let destination = transition.destination();

        let mut tx = self.db.begin().await?;

        // Writing first takes the write lock up front.
        let detached: Option<Detached> = match transition.claim() {
            Some(claim) => {
                sqlx::query_as(
                    "
                    DELETE FROM queue_messages
                    WHERE id = $1 AND claim_token = $2
                    RETURNING uuid, source, payload, date_created
                    ",
                )
                .bind(id)
                .bind(claim.token.to_string())
                .fetch_optional(&mut *tx)
                .await?
            }
            None => {
                sqlx::query_as(
                    "
                    DELETE FROM error_messages
                    WHERE id = $1
                    RETURNING uuid, source, original_payload AS payload, date_created
                    ",
                )
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?
            }
        };

        let Some(detached) = detached else {
            return Err(match origin {
                Partition::Queue => Error::ClaimLost { id },
                _ => Error::message_not_found(origin, id),
            });
        };

        let (date_created, state) = match transition {
            Transition::Archive { date_processed, .. } => (
                detached.date_created,
                MessageState::Processed { date_processed },
            ),
            Transition::Fail {
                error_type,
                error_details,
                ..
            } => (
                detached.date_created,
                MessageState::Failed {
                    error_type,
                    error_details,
                    original_payload: detached.payload.clone().into(),
                },
            ),
            Transition::Requeue { date_created } => {
                (to_millis(date_created), MessageState::pending())
            }
        };

        let new_id = insert_row(
            &mut *tx,
            detached.source,
            &detached.uuid,
            &detached.payload,
            date_created,
            &state,
        )
        .await?;

        tx.commit().await?;

        tracing::debug!(
            uuid = %detached.uuid,
            %origin,
            %destination,
            from_id = id,
            to_id = new_id,
            "moved message"
        );

        Ok(new_id)
    }

    pub async fn delete(&self, partition: Partition, id: i64) -> Result<(), Error> {
        let result = sqlx::query(&format!("DELETE FROM {} WHERE id = $1", partition.table()))
            .bind(id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::message_not_found(partition, id));
        }

        Ok(())
    }

    pub async fn counts(&self) -> Result<PartitionCounts, Error> {
        let (queue, archive, error): (i64, i64, i64) = sqlx::query_as(
            "
            SELECT
                (SELECT COUNT(*) FROM queue_messages),
                (SELECT COUNT(*) FROM archive_messages),
                (SELECT COUNT(*) FROM error_messages)
            ",
        )
        .fetch_one(&self.db)
        .await?;

        Ok(PartitionCounts {
            queue: queue as u64,
            archive: archive as u64,
            error: error as u64,
        })
    }
}
