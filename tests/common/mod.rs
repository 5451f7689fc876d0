#![allow(dead_code)]

use std::{ops::Deref, path::PathBuf, sync::Arc};

use chrono::{DateTime, Utc};
use sluice::{
    config::Config,
    message::{MessageState, NewMessage},
    processor::ProcessorRegistry,
    service::Service,
};
use tempfile::TempDir;
use uuid::Uuid;

pub const HL7: &[u8] = b"MSH|^~\\&|LAB|HOSP|EHR|HOSP|20240301120000||ORU^R01|123|P|2.5\rPID|1||42\r";

pub struct TmpService {
    pub svc: Arc<Service>,
    pub tmpdir: TempDir,
}

impl Deref for TmpService {
    type Target = Service;

    fn deref(&self) -> &Self::Target {
        &self.svc
    }
}

impl TmpService {
    pub fn archive_dir(&self) -> PathBuf {
        self.tmpdir.path().join("archive")
    }
}

/// The current time at the millisecond precision the store keeps.
pub fn now_ms() -> DateTime<Utc> {
    DateTime::from_timestamp_millis(Utc::now().timestamp_millis()).unwrap()
}

pub fn config(tmpdir: &TempDir) -> Config {
    Config {
        db_path: Some(tmpdir.path().join("sluice.db").to_string_lossy().to_string()),
        archive_dir: tmpdir.path().join("archive"),
        ..Default::default()
    }
}

pub async fn setup() -> TmpService {
    setup_with(None, |_| {}).await
}

pub async fn setup_with(
    processors: Option<ProcessorRegistry>,
    configure: impl FnOnce(&mut Config),
) -> TmpService {
    let tmpdir = tempfile::tempdir().unwrap();

    let mut config = config(&tmpdir);
    configure(&mut config);

    let svc = Service::connect_with()
        .config(config)
        .maybe_processors(processors)
        .call()
        .await
        .unwrap();

    svc.register_source("LAB1", "Main laboratory").await.unwrap();

    TmpService {
        svc: Arc::new(svc),
        tmpdir,
    }
}

/// Writes an archive row directly, as if it had been processed at `date_processed`.
pub async fn archived(
    service: &Service,
    payload: &[u8],
    date_created: DateTime<Utc>,
    date_processed: DateTime<Utc>,
) -> (i64, Uuid) {
    let uuid = Uuid::new_v4();
    let id = service
        .store()
        .create(NewMessage {
            uuid,
            source: "LAB1".to_owned(),
            payload: payload.to_vec().into(),
            date_created,
            state: MessageState::Processed { date_processed },
        })
        .await
        .unwrap();

    (id, uuid)
}
