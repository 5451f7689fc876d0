use actix_web::{
    web::{self, Json},
    HttpResponse, Responder, Scope,
};
use serde::Serialize;

use crate::{error::Error, migration::TriggerOutcome, service::Service};

async fn status(service: web::Data<Service>) -> Result<impl Responder, Error> {
    Ok(Json(service.migration_status().await?))
}

#[derive(Serialize)]
struct TriggerResponse {
    outcome: TriggerOutcome,
}

async fn trigger(service: web::Data<Service>) -> Result<impl Responder, Error> {
    let outcome = service.migration_trigger();

    let response = match outcome {
        TriggerOutcome::Started => HttpResponse::Accepted(),
        TriggerOutcome::AlreadyRunning | TriggerOutcome::Stopped => HttpResponse::Conflict(),
    }
    .json(TriggerResponse { outcome });

    Ok(response)
}

#[derive(Serialize)]
struct ResetResponse {
    reset: bool,
}

async fn reset(service: web::Data<Service>) -> Result<impl Responder, Error> {
    let reset = service.migration_reset();

    Ok(Json(ResetResponse { reset }))
}

pub fn service() -> Scope {
    web::scope("/migration")
        .route("", web::get().to(status))
        .route("/trigger", web::post().to(trigger))
        .route("/reset", web::post().to(reset))
}
