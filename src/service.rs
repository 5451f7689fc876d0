use std::sync::Arc;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    config::Config,
    db::{Lookup, MessageStore, Page, PartitionCounts, SearchFilter},
    error::Error,
    ingest::{IngestGateway, SubmitReceipt},
    message::{Message, Partition},
    migration::{ArchiveMigrationEngine, ArchiveSink, MigrationStatus, TriggerOutcome},
    processor::{Processor, ProcessorRegistry},
    query::{Location, QueryService},
    recovery::{ErrorRecovery, RestoreReceipt},
    source::Source,
    worker::{Worker, WorkerPool},
};

/// Everything the HTTP layer and the background tasks share.
pub struct Service {
    config: Config,
    store: MessageStore,
    ingest: IngestGateway,
    recovery: ErrorRecovery,
    query: QueryService,
    engine: ArchiveMigrationEngine,
    processor: Arc<dyn Processor>,
    shutdown: CancellationToken,
}

#[bon::bon]
impl Service {
    #[builder]
    pub async fn connect_with(
        config: Config,
        processors: Option<ProcessorRegistry>,
        sink: Option<Arc<dyn ArchiveSink>>,
    ) -> Result<Self, Error> {
        config.validate()?;

        let store = MessageStore::connect(config.db_path()).await?;

        let processor = processors
            .unwrap_or_default()
            .build(&config.processor)?;

        let shutdown = CancellationToken::new();

        let engine = ArchiveMigrationEngine::builder()
            .store(store.clone())
            .config(config.migration())
            .maybe_sink(sink)
            .shutdown(shutdown.child_token())
            .build();

        tracing::info!(
            db = config.db_path().unwrap_or(":memory:"),
            processor = %config.processor,
            "service ready"
        );

        Ok(Self {
            ingest: IngestGateway::new(store.clone(), config.max_payload_bytes),
            recovery: ErrorRecovery::new(store.clone()),
            query: QueryService::new(store.clone()),
            engine,
            processor,
            shutdown,
            store,
            config,
        })
    }
}

impl Service {
    pub async fn connect() -> Result<Self, Error> {
        Self::connect_with().config(Config::default()).call().await
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn engine(&self) -> &ArchiveMigrationEngine {
        &self.engine
    }

    /// A worker bound to this service's store and processor, for driving the queue by hand.
    pub fn worker(&self, id: impl Into<String>) -> Worker {
        Worker::new(
            id,
            self.store.clone(),
            self.processor.clone(),
            self.config.worker(),
        )
    }

    pub async fn submit(
        &self,
        source: impl AsRef<str>,
        payload: impl Into<Bytes>,
    ) -> Result<SubmitReceipt, Error> {
        self.ingest.submit(source, payload).await
    }

    pub async fn search(
        &self,
        partition: Partition,
        filter: &SearchFilter,
    ) -> Result<Page<Message>, Error> {
        self.query.search(partition, filter).await
    }

    pub async fn get(&self, partition: Partition, lookup: Lookup) -> Result<Message, Error> {
        self.query.get(partition, lookup).await
    }

    pub async fn counts(&self) -> Result<PartitionCounts, Error> {
        self.query.counts().await
    }

    pub async fn locate(&self, uuid: Uuid) -> Result<Location, Error> {
        self.query.locate(uuid).await
    }

    pub async fn restore(&self, error_id: i64) -> Result<RestoreReceipt, Error> {
        self.recovery.restore(error_id).await
    }

    pub async fn purge_error(&self, error_id: i64) -> Result<(), Error> {
        self.recovery.purge(error_id).await
    }

    pub async fn migration_status(&self) -> Result<MigrationStatus, Error> {
        self.engine.status().await
    }

    pub fn migration_trigger(&self) -> TriggerOutcome {
        self.engine.trigger()
    }

    pub fn migration_reset(&self) -> bool {
        self.engine.reset()
    }

    pub async fn register_source(
        &self,
        name: impl AsRef<str>,
        description: impl AsRef<str>,
    ) -> Result<Source, Error> {
        self.store.register_source(name, description).await
    }

    pub async fn list_sources(&self) -> Result<Vec<Source>, Error> {
        self.store.sources().await
    }

    pub async fn describe_source(
        &self,
        name: impl AsRef<str>,
        description: impl AsRef<str>,
    ) -> Result<Source, Error> {
        self.store.describe_source(name, description).await
    }

    /// Starts the worker pool and, if enabled, the periodic migration loop.
    pub fn start_background(&self) -> BackgroundTasks {
        let workers = WorkerPool::spawn(
            self.config.workers,
            self.store.clone(),
            self.processor.clone(),
            self.config.worker(),
            self.shutdown.child_token(),
        );

        let migration = self
            .config
            .migration_enabled
            .then(|| tokio::spawn(self.engine.clone().run()));

        BackgroundTasks {
            shutdown: self.shutdown.clone(),
            workers,
            migration,
        }
    }
}

/// Handles to the tasks started by [`Service::start_background`].
pub struct BackgroundTasks {
    shutdown: CancellationToken,
    workers: WorkerPool,
    migration: Option<tokio::task::JoinHandle<()>>,
}

impl BackgroundTasks {
    /// Stops workers and the migration engine and waits for in-flight work to settle.
    pub async fn shutdown(self) {
        self.shutdown.cancel();

        self.workers.join().await;

        if let Some(migration) = self.migration {
            if let Err(e) = migration.await {
                tracing::error!(error = %e, "migration task ended abnormally");
            }
        }

        tracing::info!("background tasks stopped");
    }
}
