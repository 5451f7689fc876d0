use actix_web::{
    web::{self, Json},
    HttpResponse, Responder, Scope,
};

use crate::{error::Error, service::Service};

async fn restore(
    service: web::Data<Service>,
    id: web::Path<i64>,
) -> Result<impl Responder, Error> {
    Ok(Json(service.restore(*id).await?))
}

async fn purge(service: web::Data<Service>, id: web::Path<i64>) -> Result<impl Responder, Error> {
    service.purge_error(*id).await?;

    Ok(HttpResponse::NoContent())
}

pub fn service() -> Scope {
    web::scope("/errors")
        .route("/{id}", web::delete().to(purge))
        .route("/{id}/restore", web::post().to(restore))
}
