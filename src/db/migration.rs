use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use tokio_stream::StreamExt;

use crate::{
    error::Error,
    message::{Message, Partition},
    migration::MigrationCursor,
    utils::{from_millis, to_millis},
};

use super::{
    message::{select_from, MessageRow},
    MessageStore,
};

#[derive(FromRow)]
struct CursorRow {
    retention_days: i64,
    max_batch_size: i64,
    last_migrated_id: Option<i64>,
    last_date_processed: Option<i64>,
    updated_at: i64,
}

impl MessageStore {
    /// Archive rows processed strictly before `cutoff`, oldest first, at most `limit` of them.
    pub async fn select_migratable(
        &self,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Message>, Error> {
        let sql = format!(
            "{} WHERE m.date_processed < $1 ORDER BY m.date_processed ASC, m.id ASC LIMIT $2",
            select_from(Partition::Archive)
        );

        let mut stream = sqlx::query_as::<_, MessageRow>(&sql)
            .bind(to_millis(cutoff))
            .bind(limit as i64)
            .fetch(&self.db);

        let mut messages = Vec::new();

        while let Some(row) = stream.next().await.transpose()? {
            messages.push(row.into_message(Partition::Archive)?);
        }

        Ok(messages)
    }

    pub async fn load_cursor(&self) -> Result<Option<MigrationCursor>, Error> {
        let row: Option<CursorRow> = sqlx::query_as(
            "
            SELECT retention_days, max_batch_size, last_migrated_id, last_date_processed, updated_at
            FROM migration_cursor WHERE id = 1
            ",
        )
        .fetch_optional(&self.db)
        .await?;

        row.map(|row| {
            Ok(MigrationCursor {
                retention_days: row.retention_days as u32,
                max_batch_size: row.max_batch_size as u32,
                last_migrated_id: row.last_migrated_id,
                last_date_processed: row.last_date_processed.map(from_millis).transpose()?,
                updated_at: from_millis(row.updated_at)?,
            })
        })
        .transpose()
    }

    pub async fn save_cursor(&self, cursor: &MigrationCursor) -> Result<(), Error> {
        sqlx::query(
            "
            INSERT INTO migration_cursor
                (id, retention_days, max_batch_size, last_migrated_id, last_date_processed, updated_at)
            VALUES (1, $1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                retention_days = excluded.retention_days,
                max_batch_size = excluded.max_batch_size,
                last_migrated_id = excluded.last_migrated_id,
                last_date_processed = excluded.last_date_processed,
                updated_at = excluded.updated_at
            ",
        )
        .bind(cursor.retention_days as i64)
        .bind(cursor.max_batch_size as i64)
        .bind(cursor.last_migrated_id)
        .bind(cursor.last_date_processed.map(to_millis))
        .bind(to_millis(cursor.updated_at))
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// Takes or renews the database-wide migration lease for `holder`.
    ///
    /// Succeeds when the lease is free, already held by `holder`, or expired.
    pub async fn try_lock_migration(&self, holder: &str, ttl: Duration) -> Result<bool, Error> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).map_err(Error::internal)?;

        let result = sqlx::query(
            "
            UPDATE migration_lock
            SET holder = $1, expires_at = $2
            WHERE id = 1 AND (holder IS NULL OR holder = $1 OR expires_at <= $3)
            ",
        )
        .bind(holder)
        .bind(to_millis(now + ttl))
        .bind(to_millis(now))
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn unlock_migration(&self, holder: &str) -> Result<(), Error> {
        sqlx::query(
            "
            UPDATE migration_lock
            SET holder = NULL, expires_at = NULL
            WHERE id = 1 AND holder = $1
            ",
        )
        .bind(holder)
        .execute(&self.db)
        .await?;

        Ok(())
    }
}
