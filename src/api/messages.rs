use actix_web::{
    web::{self, Json},
    HttpResponse, Responder, Scope,
};
use uuid::Uuid;

use crate::{
    db::{Lookup, SearchFilter},
    error::Error,
    service::Service,
};

use super::parse_partition;

async fn counts(service: web::Data<Service>) -> Result<impl Responder, Error> {
    Ok(Json(service.counts().await?))
}

async fn submit(
    service: web::Data<Service>,
    source: web::Path<String>,
    body: web::Bytes,
) -> Result<impl Responder, Error> {
    let receipt = service.submit(&*source, body).await?;

    Ok(HttpResponse::Created().json(receipt))
}

async fn search(
    service: web::Data<Service>,
    partition: web::Path<String>,
    filter: web::Query<SearchFilter>,
) -> Result<impl Responder, Error> {
    let partition = parse_partition(&partition)?;

    Ok(Json(service.search(partition, &filter).await?))
}

async fn get_message(
    service: web::Data<Service>,
    path: web::Path<(String, i64)>,
) -> Result<impl Responder, Error> {
    let (partition, id) = path.into_inner();
    let partition = parse_partition(&partition)?;

    Ok(Json(service.get(partition, Lookup::Id(id)).await?))
}

async fn locate(
    service: web::Data<Service>,
    uuid: web::Path<Uuid>,
) -> Result<impl Responder, Error> {
    Ok(Json(service.locate(*uuid).await?))
}

pub fn service() -> Scope {
    web::scope("/messages")
        .route("", web::get().to(counts))
        // Registered ahead of /{partition}/{id} so it is matched first.
        .route("/by-uuid/{uuid}", web::get().to(locate))
        // GET reads the segment as a partition, POST as a source name.
        .service(
            web::resource("/{partition}")
                .get(search)
                .post(submit),
        )
        .route("/{partition}/{id}", web::get().to(get_message))
}
