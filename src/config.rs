use std::{path::PathBuf, time::Duration};

use serde::Deserialize;

use crate::error::Error;

const MAX_RETENTION_DAYS: u32 = 36_500;
const MAX_CLAIM_LEASE_SECS: u64 = 7 * 24 * 60 * 60;
const MAX_INTERVAL_SECS: u64 = 7 * 24 * 60 * 60;

/// Process-wide configuration, read from `SLUICE_*` environment variables.
///
/// Components never read this directly; they receive the derived [`WorkerConfig`] or
/// [`MigrationConfig`] at construction.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    pub db_path: Option<String>,
    pub bind_host: String,
    pub bind_port: u16,

    pub archive_dir: PathBuf,
    pub retention_days: u32,
    pub max_batch_size: u32,
    pub migration_interval_secs: u64,
    pub migration_enabled: bool,

    pub workers: usize,
    pub processor: String,
    pub claim_lease_secs: u64,
    pub processing_timeout_secs: u64,
    pub poll_min_ms: u64,
    pub poll_max_ms: u64,

    pub max_payload_bytes: usize,
}

impl Config {
    pub fn load() -> eyre::Result<Self> {
        let config = envy::prefixed("SLUICE_").from_env::<Self>()?;
        config.validate()?;
        Ok(config)
    }

    pub fn db_path(&self) -> Option<&str> {
        self.db_path.as_deref()
    }

    pub fn validate(&self) -> Result<(), Error> {
        if !(1..=MAX_RETENTION_DAYS).contains(&self.retention_days) {
            return Err(Error::invalid_parameter(format!(
                "retention_days must be between 1 and {MAX_RETENTION_DAYS}"
            )));
        }
        if !(1..=10_000).contains(&self.max_batch_size) {
            return Err(Error::invalid_parameter(
                "max_batch_size must be between 1 and 10000",
            ));
        }
        if self.workers == 0 {
            return Err(Error::invalid_parameter("workers must be at least 1"));
        }
        if self.claim_lease_secs > MAX_CLAIM_LEASE_SECS {
            return Err(Error::invalid_parameter(format!(
                "claim_lease_secs must not exceed {MAX_CLAIM_LEASE_SECS}"
            )));
        }
        if self.processing_timeout_secs >= self.claim_lease_secs {
            return Err(Error::invalid_parameter(
                "processing_timeout_secs must be shorter than claim_lease_secs",
            ));
        }
        if self.poll_min_ms == 0 || self.poll_min_ms > self.poll_max_ms {
            return Err(Error::invalid_parameter(
                "poll_min_ms must be non-zero and not exceed poll_max_ms",
            ));
        }
        if !(1..=MAX_INTERVAL_SECS).contains(&self.migration_interval_secs) {
            return Err(Error::invalid_parameter(format!(
                "migration_interval_secs must be between 1 and {MAX_INTERVAL_SECS}"
            )));
        }
        Ok(())
    }

    pub fn worker(&self) -> WorkerConfig {
        WorkerConfig {
            claim_lease: Duration::from_secs(self.claim_lease_secs),
            processing_timeout: Duration::from_secs(self.processing_timeout_secs),
            poll_min: Duration::from_millis(self.poll_min_ms),
            poll_max: Duration::from_millis(self.poll_max_ms),
        }
    }

    pub fn migration(&self) -> MigrationConfig {
        MigrationConfig {
            archive_dir: self.archive_dir.clone(),
            retention_days: self.retention_days,
            max_batch_size: self.max_batch_size,
            interval: Duration::from_secs(self.migration_interval_secs),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: None,
            bind_host: "127.0.0.1".to_owned(),
            bind_port: 8080,
            archive_dir: PathBuf::from("archive"),
            retention_days: 30,
            max_batch_size: 100,
            migration_interval_secs: 300,
            migration_enabled: true,
            workers: 4,
            processor: "accept".to_owned(),
            claim_lease_secs: 300,
            processing_timeout_secs: 120,
            poll_min_ms: 100,
            poll_max_ms: 5_000,
            max_payload_bytes: 16 * 1024 * 1024,
        }
    }
}

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    /// How long a claim is held before another worker may take the row over.
    pub claim_lease: Duration,
    /// Upper bound on a single processor call. Always shorter than `claim_lease`.
    pub processing_timeout: Duration,
    pub poll_min: Duration,
    pub poll_max: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Config::default().worker()
    }
}

#[derive(Clone, Debug)]
pub struct MigrationConfig {
    pub archive_dir: PathBuf,
    pub retention_days: u32,
    pub max_batch_size: u32,
    pub interval: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn timeout_must_fit_inside_lease() {
        let config = Config {
            claim_lease_secs: 60,
            processing_timeout_secs: 60,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn durations_are_bounded() {
        let config = Config {
            retention_days: 100_000_000,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            claim_lease_secs: 10_000_000_000_000,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            retention_days: MAX_RETENTION_DAYS,
            claim_lease_secs: MAX_CLAIM_LEASE_SECS,
            ..Default::default()
        };
        config.validate().unwrap();
    }

    #[test]
    fn batch_size_is_bounded() {
        let config = Config {
            max_batch_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
