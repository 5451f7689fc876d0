use std::path::PathBuf;

use actix_web::{http::StatusCode, HttpResponse};
use serde::Serialize;
use snafu::Snafu;
use strum::{AsRefStr, Display};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Unknown source: {name}"))]
    UnknownSource { name: String },

    #[snafu(display("Invalid parameter: {message}"))]
    InvalidParameter { message: String },

    #[snafu(display("Resource not found: {resource}"))]
    NotFound { resource: String },

    #[snafu(display("Claim on queue message {id} is no longer held"))]
    ClaimLost { id: i64 },

    #[snafu(display("Migration lease was taken over by another engine"))]
    MigrationLockLost,

    #[snafu(display("Error returned from database"))]
    Sqlx {
        #[snafu(source)]
        source: sqlx::Error,
    },

    #[snafu(display("Error running migrations"))]
    MigrationError {
        #[snafu(source)]
        source: sqlx::migrate::MigrateError,
    },

    #[snafu(display("I/O error on {}", path.display()))]
    Io {
        path: PathBuf,
        #[snafu(source)]
        source: std::io::Error,
    },

    #[snafu(display("Corrupt record: {message}"))]
    Corrupt { message: String },

    #[snafu(display("Internal server error"))]
    InternalServerError {
        #[snafu(source(false))]
        source: Option<eyre::Report>,
    },
}

/// Coarse classification of an [`Error`], stable enough for operator tooling to match on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Concurrency,
    Storage,
    Internal,
}

impl From<sqlx::Error> for Error {
    fn from(source: sqlx::Error) -> Self {
        Self::Sqlx { source }
    }
}

impl From<sqlx::migrate::MigrateError> for Error {
    fn from(source: sqlx::migrate::MigrateError) -> Self {
        Self::MigrationError { source }
    }
}

impl From<eyre::Report> for Error {
    fn from(e: eyre::Report) -> Self {
        Self::InternalServerError { source: Some(e) }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Corrupt {
            message: e.to_string(),
        }
    }
}

impl Error {
    pub fn internal(e: impl Into<eyre::Report>) -> Self {
        Self::InternalServerError {
            source: Some(e.into()),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            message: message.into(),
        }
    }

    pub fn unknown_source(name: impl Into<String>) -> Self {
        Self::UnknownSource { name: name.into() }
    }

    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt {
            message: message.into(),
        }
    }

    pub fn message_not_found(partition: impl std::fmt::Display, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            resource: format!("{partition} message {id}"),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownSource { .. } | Self::InvalidParameter { .. } => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::ClaimLost { .. } | Self::MigrationLockLost => ErrorKind::Concurrency,
            Self::Sqlx {
                source: sqlx::Error::RowNotFound,
            } => ErrorKind::NotFound,
            Self::Sqlx { .. } | Self::Io { .. } => ErrorKind::Storage,
            Self::MigrationError { .. }
            | Self::Corrupt { .. }
            | Self::InternalServerError { .. } => ErrorKind::Internal,
        }
    }

    /// The display string followed by every underlying cause.
    pub fn describe(&self) -> String {
        let mut out = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            out.push_str(": ");
            out.push_str(&cause.to_string());
            source = cause.source();
        }
        out
    }

    /// Whether the same call may succeed if repeated later without operator action.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Storage | ErrorKind::Concurrency)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    kind: ErrorKind,
    retryable: bool,
}

impl actix_web::ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Concurrency => StatusCode::CONFLICT,
            ErrorKind::Storage => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if self.kind() == ErrorKind::Internal || self.kind() == ErrorKind::Storage {
            tracing::error!(error = ?self, "request failed");
        }

        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: self.describe(),
            kind: self.kind(),
            retryable: self.is_retryable(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_and_concurrency_are_retryable() {
        let io = Error::Io {
            path: PathBuf::from("/tmp/x"),
            source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        };
        assert!(io.is_retryable());
        assert!(Error::ClaimLost { id: 3 }.is_retryable());

        assert!(!Error::not_found("error message 1").is_retryable());
        assert!(!Error::unknown_source("LAB9").is_retryable());
        assert_eq!(Error::unknown_source("LAB9").kind(), ErrorKind::Validation);
    }
}
