use sqlx::SqliteConnection;

use crate::{error::Error, source::Source};

impl Source {
    pub async fn get_by_name(
        db: &mut SqliteConnection,
        name: impl AsRef<str>,
    ) -> Result<Option<Source>, Error> {
        Ok(
            sqlx::query_as("SELECT id, name, description FROM sources WHERE name = $1")
                .bind(name.as_ref())
                .fetch_optional(db)
                .await?,
        )
    }

    pub async fn get_id(
        db: &mut SqliteConnection,
        name: impl AsRef<str>,
    ) -> Result<i64, Error> {
        let name = name.as_ref();
        sqlx::query_scalar("SELECT id FROM sources WHERE name = $1")
            .bind(name)
            .fetch_optional(db)
            .await?
            .ok_or_else(|| Error::unknown_source(name))
    }

    pub async fn insert(
        db: &mut SqliteConnection,
        name: impl AsRef<str>,
        description: impl AsRef<str>,
    ) -> Result<Source, Error> {
        let name = name.as_ref();
        crate::source::validate_name(name)?;

        sqlx::query_as(
            "
            INSERT INTO sources (name, description)
            VALUES ($1, $2)
            RETURNING id, name, description
            ",
        )
        .bind(name)
        .bind(description.as_ref())
        .fetch_one(db)
        .await
        .map_err(|e| match e.as_database_error() {
            Some(db_err) if db_err.is_unique_violation() => {
                Error::invalid_parameter(format!("source {name} is already registered"))
            }
            _ => Error::from(e),
        })
    }

    pub async fn set_description(
        db: &mut SqliteConnection,
        name: impl AsRef<str>,
        description: impl AsRef<str>,
    ) -> Result<Source, Error> {
        let name = name.as_ref();
        sqlx::query_as(
            "
            UPDATE sources SET description = $2
            WHERE name = $1
            RETURNING id, name, description
            ",
        )
        .bind(name)
        .bind(description.as_ref())
        .fetch_optional(db)
        .await?
        .ok_or_else(|| Error::unknown_source(name))
    }

    pub async fn list(db: &mut SqliteConnection) -> Result<Vec<Source>, Error> {
        Ok(
            sqlx::query_as("SELECT id, name, description FROM sources ORDER BY name")
                .fetch_all(db)
                .await?,
        )
    }
}
