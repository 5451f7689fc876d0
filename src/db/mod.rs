//! SQLite persistence for sources and the three message partitions.
//!
//! [`MessageStore`] is the only component that touches the database. Every partition
//! change goes through [`MessageStore::move_message`], which performs the insert into
//! the destination and the delete from the origin inside one transaction.

use std::time::Duration;

use sqlx::{
    sqlite::{
        SqliteAutoVacuum, SqliteConnectOptions, SqliteJournalMode, SqliteLockingMode,
        SqlitePoolOptions,
    },
    Acquire, SqlitePool,
};

use crate::{error::Error, source::Source};

pub mod message;
pub mod migration;
pub mod search;
pub mod source;

pub use message::{Lookup, PartitionCounts};
pub use search::{Page, SearchFilter};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct MessageStore {
    db: SqlitePool,
}

impl MessageStore {
    pub async fn connect(path: Option<&str>) -> Result<Self, Error> {
        let (opts, pool_opts) = match path {
            Some(path) => (
                SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true)
                    .journal_mode(SqliteJournalMode::Wal),
                SqlitePoolOptions::new(),
            ),
            // Every in-memory connection is its own database, so the pool must hold
            // exactly one connection for its whole lifetime.
            None => (
                SqliteConnectOptions::new().in_memory(true),
                SqlitePoolOptions::new()
                    .max_connections(1)
                    .idle_timeout(None)
                    .max_lifetime(None),
            ),
        };

        let opts = opts
            .foreign_keys(true)
            .locking_mode(SqliteLockingMode::Normal)
            .busy_timeout(BUSY_TIMEOUT)
            .optimize_on_close(true, None)
            .auto_vacuum(SqliteAutoVacuum::Full);

        let pool = pool_opts.connect_with(opts).await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::debug!(path = path.unwrap_or(":memory:"), "connected to message store");

        Ok(Self { db: pool })
    }

    pub fn db(&self) -> &SqlitePool {
        &self.db
    }

    pub async fn register_source(
        &self,
        name: impl AsRef<str>,
        description: impl AsRef<str>,
    ) -> Result<Source, Error> {
        let mut tx = self.db.begin().await?;

        let source = Source::insert(tx.acquire().await?, name, description).await?;

        tx.commit().await?;

        tracing::info!(source = %source.name, "registered source");

        Ok(source)
    }

    pub async fn source(&self, name: impl AsRef<str>) -> Result<Option<Source>, Error> {
        let mut conn = self.db.acquire().await?;
        Source::get_by_name(&mut conn, name).await
    }

    pub async fn sources(&self) -> Result<Vec<Source>, Error> {
        let mut conn = self.db.acquire().await?;
        Source::list(&mut conn).await
    }

    pub async fn describe_source(
        &self,
        name: impl AsRef<str>,
        description: impl AsRef<str>,
    ) -> Result<Source, Error> {
        let mut conn = self.db.acquire().await?;
        Source::set_description(&mut conn, name, description).await
    }
}
