use actix_web::{
    http::StatusCode,
    test,
    web::{Data, PayloadConfig},
    App,
};
use serde_json::{json, Value};
use sluice::api;

mod common;

use common::{setup, HL7};

macro_rules! app {
    ($service:expr) => {
        test::init_service(
            App::new()
                .app_data(Data::from($service.svc.clone()))
                .app_data(PayloadConfig::new($service.config().max_payload_bytes))
                .service(api::messages::service())
                .service(api::errors::service())
                .service(api::migration::service())
                .service(api::sources::service()),
        )
        .await
    };
}

#[actix_web::test]
async fn test_submit_and_fetch_over_http() {
    let service = setup().await;
    let app = app!(service);

    let req = test::TestRequest::post()
        .uri("/messages/LAB1")
        .set_payload(HL7)
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let receipt: Value = test::read_body_json(res).await;
    let id = receipt["id"].as_i64().unwrap();

    let req = test::TestRequest::get()
        .uri(&format!("/messages/queue/{id}"))
        .to_request();
    let message: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(message["uuid"], receipt["uuid"]);
    assert_eq!(message["state"], "pending");
    assert_eq!(message["source"], "LAB1");

    let req = test::TestRequest::get()
        .uri("/messages/queue?query=ORU&limit=10")
        .to_request();
    let page: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(page["total"], 1);

    let req = test::TestRequest::get()
        .uri(&format!("/messages/by-uuid/{}", receipt["uuid"].as_str().unwrap()))
        .to_request();
    let location: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(location, json!({ "partition": "queue", "id": id }));

    let req = test::TestRequest::get().uri("/messages").to_request();
    let counts: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(counts, json!({ "queue": 1, "archive": 0, "error": 0 }));
}

#[actix_web::test]
async fn test_errors_render_kind_and_status() {
    let service = setup().await;
    let app = app!(service);

    let req = test::TestRequest::post()
        .uri("/messages/NOPE")
        .set_payload(HL7)
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(res).await;
    assert_eq!(body["kind"], "validation");
    assert_eq!(body["retryable"], false);

    let req = test::TestRequest::post()
        .uri("/sources")
        .set_json(json!({ "name": "queue", "description": "" }))
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let req = test::TestRequest::post()
        .uri("/messages/queue")
        .set_payload(HL7)
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(service.counts().await.unwrap().queue, 0);

    let req = test::TestRequest::get().uri("/messages/limbo").to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let req = test::TestRequest::post().uri("/errors/42/restore").to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: Value = test::read_body_json(res).await;
    assert_eq!(body["kind"], "not_found");
}

#[actix_web::test]
async fn test_restore_over_http() {
    let service = common::setup_with(None, |c| c.processor = "msh-header".to_owned()).await;
    let app = app!(service);

    service.submit("LAB1", "not hl7").await.unwrap();
    service.worker("w1").process_next().await.unwrap().unwrap();

    let req = test::TestRequest::get()
        .uri("/messages/error?error_type=InvalidHeader")
        .to_request();
    let page: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(page["total"], 1);
    let error_id = page["records"][0]["id"].as_i64().unwrap();

    let req = test::TestRequest::post()
        .uri(&format!("/errors/{error_id}/restore"))
        .to_request();
    let receipt: Value = test::call_and_read_body_json(&app, req).await;
    assert!(receipt["queue_id"].is_i64());

    let req = test::TestRequest::post()
        .uri(&format!("/errors/{error_id}/restore"))
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn test_sources_and_migration_endpoints() {
    let service = setup().await;
    let app = app!(service);

    let req = test::TestRequest::post()
        .uri("/sources")
        .set_json(json!({ "name": "ADT2", "description": "Admissions" }))
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::CREATED);

    let req = test::TestRequest::put()
        .uri("/sources/ADT2")
        .set_json(json!({ "description": "Admissions feed" }))
        .to_request();
    let source: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(source["description"], "Admissions feed");

    let req = test::TestRequest::get().uri("/sources").to_request();
    let sources: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(sources.as_array().unwrap().len(), 2);

    let req = test::TestRequest::get().uri("/migration").to_request();
    let status: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(status["status"], "IDLE");

    let req = test::TestRequest::post().uri("/migration/reset").to_request();
    let reset: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(reset, json!({ "reset": false }));
}
