mod common;

use axum::http::{Method, StatusCode};
use common::{component_product, seed_component, FakeStockApi, TestApp};
use inventory_sync::{
    entities::OutboxStatus,
    events::enqueue_stock_delta,
    middleware_helpers::REQUEST_ID_HEADER,
    services::cursor_store::{self, RESERVED_AMOUNTS_KIND},
};
use sea_orm::ConnectionTrait;

#[tokio::test]
async fn full_sync_returns_flattened_camel_case_metrics() {
    let app = TestApp::new(FakeStockApi::new().with_catalog(vec![component_product(100, "C-100")])).await;

    let (status, body) = app.request(Method::POST, "/jobs/full-stock-sync", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert_eq!(body["componentsUpserted"], 1);
    assert_eq!(body["productsSeen"], 1);
    assert!(body.get("durationMs").is_some());
}

#[tokio::test]
async fn worker_accepts_json_body_and_query_string() {
    let app = TestApp::new(FakeStockApi::new().with_reserved(100, 2.0)).await;
    for product_id in [100, 101, 102] {
        seed_component(app.db(), product_id).await;
    }

    let (status, body) = app
        .request(
            Method::POST,
            "/jobs/reserved-amounts/components",
            Some(r#"{"limit": 1, "cursor": 0}"#),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["processed"], 1);
    assert_eq!(body["hasMore"], true);
    assert_eq!(body["nextCursor"], 1);
    assert_eq!(body["updatedCount"], 1);

    let (status, body) = app
        .request(Method::GET, "/jobs/reserved-amounts/components?limit=5&cursor=1", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["processed"], 2);
    assert_eq!(body["hasMore"], false);
    assert!(body["nextCursor"].is_null());

    // Explicit cursors never move the stored one
    assert_eq!(cursor_store::load(app.db(), RESERVED_AMOUNTS_KIND).await.unwrap(), 0);
}

#[tokio::test]
async fn empty_post_body_uses_defaults_and_stored_cursor() {
    let app = TestApp::new(FakeStockApi::new()).await;
    for product_id in [100, 101, 102] {
        seed_component(app.db(), product_id).await;
    }

    let (status, body) = app
        .request(Method::POST, "/jobs/reserved-amounts/components", None)
        .await;

    assert_eq!(status, StatusCode::OK);
    // test_config uses a default batch of 2
    assert_eq!(body["limit"], 2);
    assert_eq!(body["nextCursor"], 2);
    assert_eq!(cursor_store::load(app.db(), RESERVED_AMOUNTS_KIND).await.unwrap(), 2);
}

#[tokio::test]
async fn malformed_input_is_a_400_with_request_id() {
    let app = TestApp::new(FakeStockApi::new()).await;

    let (status, headers, bytes) = app
        .raw_request(Method::POST, "/jobs/reserved-amounts/bom", Some("{not json"))
        .await;
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["ok"], false);
    assert!(body["error"].as_str().unwrap().contains("invalid JSON body"));
    let header_id = headers.get(REQUEST_ID_HEADER).unwrap().to_str().unwrap();
    assert_eq!(body["request_id"], header_id);

    let (status, body) = app
        .request(Method::POST, "/jobs/reserved-amounts/bom", Some(r#"{"limit": 0}"#))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["ok"], false);
}

#[tokio::test]
async fn preflight_is_answered_with_cors_headers() {
    let app = TestApp::new(FakeStockApi::new()).await;

    let (status, headers, bytes) = app
        .raw_request(Method::OPTIONS, "/jobs/inventory-cron", None)
        .await;

    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(bytes.is_empty());
    assert_eq!(headers["access-control-allow-origin"], "*");
    assert_eq!(
        headers["access-control-allow-headers"],
        "authorization, x-client-info, apikey, content-type"
    );
    assert_eq!(headers["access-control-allow-methods"], "GET, POST, OPTIONS");
}

#[tokio::test]
async fn inventory_cron_runs_a_cycle_and_honours_reset() {
    let app = TestApp::new(FakeStockApi::new().with_catalog(vec![component_product(100, "C-100")])).await;

    let (status, body) = app.request(Method::POST, "/jobs/inventory-cron", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert_eq!(body["phase"], "idle");
    assert_eq!(body["partial"], false);
    assert_eq!(
        body["phasesCompleted"],
        serde_json::json!(["stock", "components", "bom", "aggregate"])
    );
    assert!(body.get("skipped").is_none());

    let (_, idle) = app.request(Method::GET, "/jobs/inventory-cron", None).await;
    assert_eq!(idle["phasesCompleted"], serde_json::json!([]));

    let (status, reset) = app
        .request(Method::POST, "/jobs/inventory-cron", Some(r#"{"reset": true}"#))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reset["phasesCompleted"][0], "stock");
}

#[tokio::test]
async fn outbox_dispatch_and_admin_routes() {
    let app = TestApp::new(FakeStockApi::new().with_stock(100, 10.0)).await;
    let id = enqueue_stock_delta(app.db(), 100, 3.0, None).await.unwrap();

    let (status, listed) = app.request(Method::GET, "/admin/outbox", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["items"].as_array().unwrap().len(), 1);
    assert_eq!(listed["items"][0]["status"], OutboxStatus::Pending.to_string());

    let (status, single) = app
        .request(
            Method::POST,
            "/jobs/outbox-dispatch",
            Some(&format!(r#"{{"outbox_id": {}}}"#, id)),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(single["mode"], "single");
    assert_eq!(single["done"], 1);
    assert_eq!(app.api.stock_of(100), Some(13.0));

    let (_, listed) = app.request(Method::GET, "/admin/outbox", None).await;
    assert!(listed["items"].as_array().unwrap().is_empty());

    let (status, conflict) = app
        .request(Method::POST, &format!("/admin/outbox/{}/retry", id), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(conflict["ok"], false);

    let (status, missing) = app.request(Method::POST, "/admin/outbox/999/retry", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(missing["ok"], false);

    let (status, both) = app
        .request(
            Method::POST,
            "/jobs/outbox-dispatch",
            Some(r#"{"outbox_id": 1, "sweep": true}"#),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(both["ok"], false);
}

#[tokio::test]
async fn job_failure_is_a_500_with_error_text() {
    let app = TestApp::new(FakeStockApi::new()).await;
    app.db()
        .execute_unprepared("DROP TABLE bom_recipes")
        .await
        .unwrap();

    let (status, body) = app.request(Method::POST, "/jobs/bom-aggregation", None).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["ok"], false);
    assert!(body["error"].as_str().unwrap().contains("Database error"));
}

#[tokio::test]
async fn status_and_health_report_pipeline_state() {
    let app = TestApp::new(FakeStockApi::new()).await;
    enqueue_stock_delta(app.db(), 100, 1.0, None).await.unwrap();

    let (status, health) = app.request(Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["ok"], true);
    assert_eq!(health["database"], "up");

    let (status, before) = app.request(Method::GET, "/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(before["phase"].is_null());
    assert_eq!(before["outboxPending"], 1);
    assert_eq!(before["reservedAmountsCursor"], 0);

    app.request(Method::POST, "/jobs/inventory-cron", None).await;
    let (_, after) = app.request(Method::GET, "/status", None).await;
    assert_eq!(after["phase"], "idle");
    assert!(after["lockedUntil"].is_null());
}
