use std::{
    collections::HashSet,
    sync::Arc,
    time::Duration,
};

use sluice::{
    db::{Lookup, SearchFilter},
    error::{Error, ErrorKind},
    message::{MessageState, Partition},
    processor::{FnProcessor, ProcessingFailure, Processor, ProcessorRegistry},
    worker::Outcome,
};

mod common;

use common::{setup, setup_with, HL7};

fn registry_with(name: &str, processor: impl Fn() -> Arc<dyn Processor> + Send + Sync + 'static) -> ProcessorRegistry {
    let mut registry = ProcessorRegistry::with_builtins();
    registry.register(name, processor);
    registry
}

#[tokio::test]
async fn test_processed_message_is_archived() {
    let service = setup().await;
    let receipt = service.submit("LAB1", HL7).await.unwrap();

    let outcome = service.worker("w1").process_next().await.unwrap().unwrap();
    let Outcome::Archived { uuid, archive_id } = outcome else {
        panic!("expected archive, got {outcome:?}");
    };
    assert_eq!(uuid, receipt.uuid);

    let archived = service
        .get(Partition::Archive, Lookup::Id(archive_id))
        .await
        .unwrap();
    assert_eq!(archived.uuid, receipt.uuid);
    assert_eq!(archived.payload.as_ref(), HL7);
    assert!(matches!(archived.state, MessageState::Processed { .. }));

    assert!(service.worker("w1").process_next().await.unwrap().is_none());
}

#[tokio::test]
async fn test_rejected_message_fails_then_restores() {
    let service = setup_with(None, |c| c.processor = "msh-header".to_owned()).await;

    let receipt = service.submit("LAB1", "PID|1||42").await.unwrap();

    let outcome = service.worker("w1").process_next().await.unwrap().unwrap();
    let Outcome::Failed {
        uuid,
        error_id,
        error_type,
    } = outcome
    else {
        panic!("expected failure, got {outcome:?}");
    };
    assert_eq!(uuid, receipt.uuid);
    assert_eq!(error_type, "InvalidHeader");

    let filter = SearchFilter {
        error_type: Some("InvalidHeader".to_owned()),
        ..Default::default()
    };
    let page = service.search(Partition::Error, &filter).await.unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.records[0].id, error_id);

    let restored = service.restore(error_id).await.unwrap();
    assert_eq!(restored.uuid, receipt.uuid);

    let queued = service
        .get(Partition::Queue, Lookup::Id(restored.queue_id))
        .await
        .unwrap();
    assert_eq!(queued.uuid, receipt.uuid);
    assert_eq!(queued.payload.as_ref(), b"PID|1||42");

    let counts = service.counts().await.unwrap();
    assert_eq!((counts.queue, counts.archive, counts.error), (1, 0, 0));
}

#[tokio::test]
async fn test_every_message_ends_in_exactly_one_partition() {
    // Odd-numbered payloads fail so both destinations are exercised.
    let registry = registry_with("odd-fails", || {
        Arc::new(FnProcessor(|message: &sluice::message::Message| {
            if message.payload.last().is_some_and(|b| b % 2 == 1) {
                Err(ProcessingFailure::new("Odd", "odd trailing byte"))
            } else {
                Ok(())
            }
        }))
    });
    let service = setup_with(Some(registry), |c| c.processor = "odd-fails".to_owned()).await;

    let mut uuids = Vec::new();
    for n in 0u8..40 {
        let mut payload = HL7.to_vec();
        payload.push(n);
        uuids.push(service.submit("LAB1", payload).await.unwrap().uuid);
    }

    let mut tasks = tokio::task::JoinSet::new();
    for n in 0..4 {
        let worker = service.worker(format!("w{n}"));
        tasks.spawn(async move {
            let mut outcomes = Vec::new();
            while let Some(outcome) = worker.process_next().await.unwrap() {
                outcomes.push(outcome);
            }
            outcomes
        });
    }

    let mut handled = HashSet::new();
    while let Some(outcomes) = tasks.join_next().await {
        for outcome in outcomes.unwrap() {
            let uuid = match outcome {
                Outcome::Archived { uuid, .. } | Outcome::Failed { uuid, .. } => uuid,
                Outcome::ClaimLost { uuid } => panic!("claim on {uuid} lost without lease expiry"),
            };
            assert!(handled.insert(uuid), "{uuid} handled twice");
        }
    }

    let counts = service.counts().await.unwrap();
    assert_eq!(counts.queue, 0);
    assert_eq!(counts.archive, 20);
    assert_eq!(counts.error, 20);

    for uuid in uuids {
        let location = service.locate(uuid).await.unwrap();
        assert_ne!(location.partition, Partition::Queue);
    }
}

#[tokio::test]
async fn test_slow_processor_times_out() {
    struct Sleepy;

    impl Processor for Sleepy {
        fn process<'a>(
            &'a self,
            _message: &'a sluice::message::Message,
        ) -> sluice::processor::ProcessFuture<'a> {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
        }
    }

    let registry = registry_with("sleepy", || Arc::new(Sleepy));
    let service = setup_with(Some(registry), |c| {
        c.processor = "sleepy".to_owned();
        c.processing_timeout_secs = 1;
        c.claim_lease_secs = 5;
    })
    .await;

    service.submit("LAB1", HL7).await.unwrap();

    let outcome = service.worker("w1").process_next().await.unwrap().unwrap();
    assert!(
        matches!(&outcome, Outcome::Failed { error_type, .. } if error_type == "Timeout"),
        "{outcome:?}"
    );
}

#[tokio::test]
async fn test_panicking_processor_is_recorded_as_failure() {
    let registry = registry_with("panics", || {
        Arc::new(FnProcessor(|_: &sluice::message::Message| -> Result<(), ProcessingFailure> {
            panic!("segment parser exploded")
        }))
    });
    let service = setup_with(Some(registry), |c| c.processor = "panics".to_owned()).await;

    service.submit("LAB1", HL7).await.unwrap();

    let outcome = service.worker("w1").process_next().await.unwrap().unwrap();
    let Outcome::Failed { error_id, .. } = outcome else {
        panic!("expected failure, got {outcome:?}");
    };

    let failed = service
        .get(Partition::Error, Lookup::Id(error_id))
        .await
        .unwrap();
    let MessageState::Failed {
        error_type,
        error_details,
        ..
    } = failed.state
    else {
        panic!("expected failed state");
    };
    assert_eq!(error_type, "ProcessorPanic");
    assert_eq!(error_details, "segment parser exploded");
}

#[tokio::test]
async fn test_background_pool_drains_queue() {
    let service = setup_with(None, |c| {
        c.workers = 3;
        c.poll_min_ms = 10;
        c.poll_max_ms = 50;
        c.migration_enabled = false;
    })
    .await;

    for _ in 0..15 {
        service.submit("LAB1", HL7).await.unwrap();
    }

    let background = service.start_background();

    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if service.counts().await.unwrap().archive == 15 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    background.shutdown().await;

    assert_eq!(service.counts().await.unwrap().queue, 0);
}

#[tokio::test]
async fn test_double_restore_creates_one_queue_row() {
    let service = setup_with(None, |c| c.processor = "msh-header".to_owned()).await;

    service.submit("LAB1", "garbage").await.unwrap();
    let Some(Outcome::Failed { error_id, .. }) =
        service.worker("w1").process_next().await.unwrap()
    else {
        panic!("expected failure");
    };

    let (a, b) = tokio::join!(service.restore(error_id), service.restore(error_id));

    let (ok, err) = match (a, b) {
        (Ok(ok), Err(err)) | (Err(err), Ok(ok)) => (ok, err),
        other => panic!("expected exactly one restore to succeed: {other:?}"),
    };
    assert!(matches!(err, Error::NotFound { .. }));
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let counts = service.counts().await.unwrap();
    assert_eq!((counts.queue, counts.error), (1, 0));
    assert_eq!(service.locate(ok.uuid).await.unwrap().id, ok.queue_id);

    let err = service.purge_error(error_id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_ingest_rejects_bad_submissions() {
    let service = setup_with(None, |c| c.max_payload_bytes = 16).await;

    let err = service.submit("LAB9", HL7).await.unwrap_err();
    assert!(matches!(err, Error::UnknownSource { .. }));

    let err = service.submit("LAB1", "").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = service.submit("LAB1", HL7).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    assert_eq!(service.counts().await.unwrap().queue, 0);
}
