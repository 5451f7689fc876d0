use actix_web::{
    middleware::{NormalizePath, TrailingSlash},
    web::{Data, JsonConfig, PayloadConfig},
    App, HttpServer,
};
use config::Config;
use processor::ProcessorRegistry;
use tracing::level_filters::LevelFilter;
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{util::SubscriberInitExt, EnvFilter, FmtSubscriber};

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod message;
pub mod migration;
pub mod processor;
pub mod query;
pub mod recovery;
pub mod service;
pub mod source;
pub mod utils;
pub mod worker;

/// Returns a builder for the main application.
///
/// Without `processors` the built-in registry is used and `SLUICE_PROCESSOR` picks
/// one of its entries.
#[bon::builder(finish_fn = start)]
pub async fn run(processors: Option<ProcessorRegistry>) -> eyre::Result<()> {
    #[cfg(debug_assertions)]
    FmtSubscriber::builder()
        .pretty()
        .with_env_filter(
            EnvFilter::builder()
                .with_env_var("SLUICE_LOG")
                .with_default_directive(LevelFilter::INFO.into())
                .from_env()?,
        )
        .finish()
        .try_init()?;

    #[cfg(not(debug_assertions))]
    FmtSubscriber::builder()
        .json()
        .with_env_filter(
            EnvFilter::builder()
                .with_env_var("SLUICE_LOG")
                .with_default_directive(LevelFilter::INFO.into())
                .from_env()?,
        )
        .finish()
        .try_init()?;

    let config = Config::load()?;
    let bind = (config.bind_host.clone(), config.bind_port);
    let max_payload_bytes = config.max_payload_bytes;

    let service = service::Service::connect_with()
        .config(config)
        .maybe_processors(processors)
        .call()
        .await?;

    let background = service.start_background();

    let data = Data::new(service);

    tracing::info!(host = %bind.0, port = bind.1, "listening");

    let served = HttpServer::new(move || {
        let json_cfg = JsonConfig::default().content_type_required(false);
        let payload_cfg = PayloadConfig::new(max_payload_bytes);

        App::new()
            .wrap(TracingLogger::default())
            .wrap(NormalizePath::new(TrailingSlash::Trim))
            .service(api::messages::service())
            .service(api::errors::service())
            .service(api::migration::service())
            .service(api::sources::service())
            .app_data(data.clone())
            .app_data(json_cfg)
            .app_data(payload_cfg)
    })
    .bind(bind)?
    .run()
    .await;

    // The server returns on SIGINT/SIGTERM; let workers and migration settle either way.
    background.shutdown().await;

    served?;

    Ok(())
}
