mod common;

use std::sync::Arc;
use std::time::Duration;

use inventory_sync::{
    billbee::{ApiClientError, BillbeeClient, StockApi, StockUpdate},
    config::BillbeeConfig,
    retry::RetryConfig,
    services::{category_rules::CategoryRules, full_stock_sync::FullStockSync},
};
use serde_json::json;
use wiremock::{
    matchers::{basic_auth, body_json, header, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

fn client_for(server: &MockServer) -> BillbeeClient {
    let config = BillbeeConfig {
        base_url: server.uri(),
        username: "shop@example.com".into(),
        api_password: "api-secret".into(),
        api_key: "key-123".into(),
        max_attempts: 3,
        ..BillbeeConfig::default()
    };
    BillbeeClient::new(&config)
        .unwrap()
        .with_retry_config(RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_factor: 1.0,
        })
        .with_default_retry_after(Duration::from_millis(1))
}

#[tokio::test]
async fn sends_credentials_and_reads_a_catalog_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/products"))
        .and(query_param("page", "2"))
        .and(query_param("pageSize", "50"))
        .and(basic_auth("shop@example.com", "api-secret"))
        .and(header("X-Billbee-Api-Key", "key-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Paging": {"Page": 2, "TotalPages": 3, "TotalRows": 120, "PageSize": 50},
            "ErrorMessage": null,
            "ErrorCode": 0,
            "Data": [
                {"Id": 100, "SKU": "C-100", "Type": 1, "Stocks": [{"StockCurrent": 5.0}]},
                {"Id": 900, "SKU": "SET-900", "Type": 2, "BillOfMaterial": [{"ArticleId": 100, "Amount": 2}]}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let page = client_for(&server).list_products(2, 50).await.unwrap();

    assert_eq!(page.page, 2);
    assert_eq!(page.total_pages, 3);
    assert_eq!(page.items.len(), 2);
    assert!(page.items[0].is_component());
    assert_eq!(page.items[1].bom_lines()[0].article_id, Some(100));
}

#[tokio::test]
async fn throttled_request_is_retried_after_the_server_hint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/products/reservedamount"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/products/reservedamount"))
        .and(query_param("id", "100"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"Data": {"ReservedAmount": 4.0}})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let reserved = client_for(&server).get_reserved_amount(100).await.unwrap();

    assert_eq!(reserved, 4.0);
}

#[tokio::test]
async fn gives_up_after_the_configured_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/products/reservedamount"))
        .respond_with(ResponseTemplate::new(429))
        .expect(3)
        .mount(&server)
        .await;

    let result = client_for(&server).get_reserved_amount(100).await;

    assert_eq!(result, Err(ApiClientError::TooManyRequests { retry_after: None }));
}

#[tokio::test]
async fn server_errors_surface_with_their_body_and_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/products/100"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal failure"))
        .expect(1)
        .mount(&server)
        .await;

    let result = client_for(&server).get_product_stock(100).await;

    assert_eq!(
        result,
        Err(ApiClientError::Status {
            status: 500,
            body: "internal failure".into()
        })
    );
}

#[tokio::test]
async fn missing_reserved_amount_is_a_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/products/reservedamount"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"Data": null})))
        .mount(&server)
        .await;

    let result = client_for(&server).get_reserved_amount(7).await;

    assert!(matches!(result, Err(ApiClientError::Decode(msg)) if msg.contains("7")));
}

#[tokio::test]
async fn reads_stock_by_id_lookup() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/products/100"))
        .and(query_param("lookupBy", "id"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"Data": {"Id": 100, "StockCurrent": 11.0}})),
        )
        .mount(&server)
        .await;

    assert_eq!(client_for(&server).get_product_stock(100).await.unwrap(), 11.0);
}

#[tokio::test]
async fn stock_writes_post_absolute_amounts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/products/updatestock"))
        .and(body_json(json!({"ProductId": 100, "Amount": 12.0, "Reason": "outbox"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ErrorCode": 0})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/products/updatestockmultiple"))
        .and(body_json(json!({"Products": [
            {"ProductId": 100, "Amount": 1.0},
            {"ProductId": 200, "Amount": 2.0}
        ]})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    client
        .update_stock(StockUpdate::for_product(100, 12.0).with_reason("outbox"))
        .await
        .unwrap();
    client
        .update_stock_multiple(vec![
            StockUpdate::for_product(100, 1.0),
            StockUpdate::for_product(200, 2.0),
        ])
        .await
        .unwrap();
}

#[tokio::test]
async fn error_envelope_on_a_200_fails_the_write() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/products/updatestock"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ErrorCode": 2,
            "ErrorMessage": "Product not found"
        })))
        .mount(&server)
        .await;

    let result = client_for(&server)
        .update_stock(StockUpdate::for_product(5, 1.0))
        .await;

    assert_eq!(
        result,
        Err(ApiClientError::Status {
            status: 200,
            body: "Product not found".into()
        })
    );
}

fn page_with_one_bad_item() -> serde_json::Value {
    json!({
        "Paging": {"Page": 1, "TotalPages": 1, "TotalRows": 2, "PageSize": 2},
        "ErrorCode": 0,
        "Data": [
            {"Id": 100, "SKU": "C-100", "Type": 1, "Stocks": [{"StockCurrent": 5.0}]},
            {"Id": 101, "SKU": "C-101", "Type": 1, "SoldAmount": "n/a"}
        ]
    })
}

#[tokio::test]
async fn a_bad_catalog_item_does_not_sink_its_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/products"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_with_one_bad_item()))
        .mount(&server)
        .await;

    let page = client_for(&server).list_products(1, 2).await.unwrap();

    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].id, 100);
    assert_eq!(page.malformed.len(), 1);
    assert_eq!(page.malformed[0].id, Some(101));
    assert!(page.malformed[0].error.contains("invalid type"));
    assert_eq!(page.returned(), 2);
}

#[tokio::test]
async fn full_sync_counts_malformed_items_and_keeps_going() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/products"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_with_one_bad_item()))
        .expect(1)
        .mount(&server)
        .await;
    let db = common::setup_db().await;
    let sync = FullStockSync::new(
        db.clone(),
        Arc::new(client_for(&server)),
        CategoryRules::default(),
        2,
    );

    let report = sync.run().await.unwrap();

    assert_eq!(report.products_seen, 2);
    assert_eq!(report.skipped_malformed, 1);
    assert_eq!(report.components_upserted, 1);
    let stored = common::components(&db).await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].billbee_product_id, 100);
}
