use actix_web::{
    web::{self, Json},
    HttpResponse, Responder, Scope,
};
use serde::Deserialize;

use crate::{error::Error, service::Service};

async fn list_sources(service: web::Data<Service>) -> Result<impl Responder, Error> {
    Ok(Json(service.list_sources().await?))
}

#[derive(Debug, Deserialize)]
pub struct RegisterSourceRequest {
    name: String,
    #[serde(default)]
    description: String,
}

async fn register_source(
    service: web::Data<Service>,
    data: web::Json<RegisterSourceRequest>,
) -> Result<impl Responder, Error> {
    let data = data.into_inner();

    let source = service.register_source(data.name, data.description).await?;

    Ok(HttpResponse::Created().json(source))
}

#[derive(Debug, Deserialize)]
pub struct DescribeSourceRequest {
    description: String,
}

async fn describe_source(
    service: web::Data<Service>,
    name: web::Path<String>,
    data: web::Json<DescribeSourceRequest>,
) -> Result<impl Responder, Error> {
    let source = service
        .describe_source(&*name, &data.description)
        .await?;

    Ok(Json(source))
}

pub fn service() -> Scope {
    web::scope("/sources")
        .service(
            web::resource("")
                .get(list_sources)
                .post(register_source),
        )
        .route("/{name}", web::put().to(describe_source))
}
