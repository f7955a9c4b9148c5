#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::Utc;
use inventory_sync::{
    billbee::{
        models::{BomLine, Category, StockBucket, TranslatedText, PRODUCT_TYPE_ASSEMBLY, PRODUCT_TYPE_COMPONENT},
        ApiClientError, Product, ProductPage, StockApi, StockUpdate,
    },
    config::AppConfig,
    db::{self, DbConfig},
    entities::{bom_recipe, component},
    AppState,
};
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, QueryOrder, Set};
use serde_json::Value;
use tokio::time::Instant;
use tower::ServiceExt;

/// Fresh in-memory database with every migration applied.
pub async fn setup_db() -> Arc<DatabaseConnection> {
    let pool = db::establish_connection_with_config(&DbConfig::sqlite_memory())
        .await
        .expect("failed to open in-memory database");
    db::run_migrations(&pool)
        .await
        .expect("failed to run migrations in tests");
    Arc::new(pool)
}

/// Configuration tuned for tests: fast pacing, small batches.
pub fn test_config() -> AppConfig {
    let mut cfg = AppConfig::new(
        "sqlite::memory:".to_string(),
        "127.0.0.1".to_string(),
        18_080,
        "test".to_string(),
    );
    cfg.billbee.page_size = 2;
    cfg.sync.reserved_min_interval_ms = 5;
    cfg.sync.default_batch_limit = 2;
    cfg.sync.orchestrator_batch_limit = 2;
    cfg.sync.orchestrator_budget_secs = 60;
    cfg
}

/// Scripted marketplace. Every call is recorded so tests can assert on traffic.
#[derive(Default)]
pub struct FakeStockApi {
    catalog: Mutex<Vec<Product>>,
    reserved: Mutex<HashMap<i64, f64>>,
    stock: Mutex<HashMap<i64, f64>>,
    failing: Mutex<HashSet<i64>>,
    fail_updates: Mutex<bool>,
    pub pages_requested: Mutex<Vec<u32>>,
    pub reserved_calls: Mutex<Vec<(i64, Instant)>>,
    pub stock_reads: Mutex<Vec<i64>>,
    pub single_updates: Mutex<Vec<StockUpdate>>,
    pub multi_updates: Mutex<Vec<Vec<StockUpdate>>>,
}

impl FakeStockApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_catalog(self, products: Vec<Product>) -> Self {
        *self.catalog.lock().unwrap() = products;
        self
    }

    pub fn with_reserved(self, product_id: i64, amount: f64) -> Self {
        self.reserved.lock().unwrap().insert(product_id, amount);
        self
    }

    pub fn with_stock(self, product_id: i64, amount: f64) -> Self {
        self.stock.lock().unwrap().insert(product_id, amount);
        self
    }

    /// Every call mentioning `product_id` answers HTTP 500.
    pub fn failing_for(self, product_id: i64) -> Self {
        self.failing.lock().unwrap().insert(product_id);
        self
    }

    pub fn set_catalog(&self, products: Vec<Product>) {
        *self.catalog.lock().unwrap() = products;
    }

    pub fn set_fail_updates(&self, fail: bool) {
        *self.fail_updates.lock().unwrap() = fail;
    }

    pub fn reserved_ids(&self) -> Vec<i64> {
        self.reserved_calls
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn stock_of(&self, product_id: i64) -> Option<f64> {
        self.stock.lock().unwrap().get(&product_id).copied()
    }

    fn check(&self, product_id: i64) -> Result<(), ApiClientError> {
        if self.failing.lock().unwrap().contains(&product_id) {
            return Err(ApiClientError::Status {
                status: 500,
                body: format!("product {} unavailable", product_id),
            });
        }
        Ok(())
    }

    fn apply(&self, updates: &[StockUpdate]) -> Result<(), ApiClientError> {
        if *self.fail_updates.lock().unwrap() {
            return Err(ApiClientError::Status {
                status: 503,
                body: "stock update rejected".to_string(),
            });
        }
        let mut stock = self.stock.lock().unwrap();
        for update in updates {
            if let Some(id) = update.product_id {
                stock.insert(id, update.amount);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StockApi for FakeStockApi {
    async fn list_products(&self, page: u32, page_size: u32) -> Result<ProductPage, ApiClientError> {
        self.pages_requested.lock().unwrap().push(page);
        let catalog = self.catalog.lock().unwrap();
        let size = page_size.max(1) as usize;
        let total_pages = ((catalog.len() + size - 1) / size) as u32;
        let start = (page.saturating_sub(1) as usize) * size;
        let items = catalog.iter().skip(start).take(size).cloned().collect();
        Ok(ProductPage {
            items,
            page,
            total_pages,
            ..ProductPage::default()
        })
    }

    async fn get_reserved_amount(&self, product_id: i64) -> Result<f64, ApiClientError> {
        self.reserved_calls
            .lock()
            .unwrap()
            .push((product_id, Instant::now()));
        self.check(product_id)?;
        Ok(self
            .reserved
            .lock()
            .unwrap()
            .get(&product_id)
            .copied()
            .unwrap_or(0.0))
    }

    async fn get_product_stock(&self, product_id: i64) -> Result<f64, ApiClientError> {
        self.stock_reads.lock().unwrap().push(product_id);
        self.check(product_id)?;
        Ok(self.stock_of(product_id).unwrap_or(0.0))
    }

    async fn update_stock(&self, update: StockUpdate) -> Result<(), ApiClientError> {
        self.apply(std::slice::from_ref(&update))?;
        self.single_updates.lock().unwrap().push(update);
        Ok(())
    }

    async fn update_stock_multiple(&self, updates: Vec<StockUpdate>) -> Result<(), ApiClientError> {
        self.apply(&updates)?;
        self.multi_updates.lock().unwrap().push(updates);
        Ok(())
    }
}

fn category(name: &str) -> Option<Category> {
    Some(Category {
        id: None,
        name: Some(name.to_string()),
    })
}

/// Active single article in an allowed category with stock 10 / 2 / 1.
pub fn component_product(id: i64, sku: &str) -> Product {
    Product {
        id,
        sku: Some(sku.to_string()),
        title: Some(vec![TranslatedText {
            text: Some(format!("Bauteil {}", id)),
            lang_code: Some("de".to_string()),
        }]),
        manufacturer: Some("Werkstatt".to_string()),
        category1: category("Alle Produkte"),
        category2: category("Möbel"),
        category3: None,
        cost_price_net: Some(12.5),
        stock_current: Some(10.0),
        stocks: Some(vec![
            StockBucket {
                stock_id: Some(1),
                name: Some("Lager".to_string()),
                stock_current: Some(10.0),
            },
            StockBucket {
                stock_id: Some(2),
                name: Some("Beschädigt".to_string()),
                stock_current: Some(2.0),
            },
            StockBucket {
                stock_id: Some(3),
                name: Some("Ausstellung".to_string()),
                stock_current: Some(1.0),
            },
        ]),
        product_type: Some(PRODUCT_TYPE_COMPONENT),
        bill_of_material: None,
        is_deactivated: Some(false),
        sold_amount: Some(4.0),
        stock_reserved_amount: Some(1.0),
    }
}

pub fn bom_line(article_id: i64, amount: f64) -> BomLine {
    BomLine {
        article_id: Some(article_id),
        sku: None,
        amount: Some(amount),
    }
}

pub fn sku_line(sku: &str, amount: f64) -> BomLine {
    BomLine {
        article_id: None,
        sku: Some(sku.to_string()),
        amount: Some(amount),
    }
}

pub fn assembly_product(id: i64, lines: Vec<BomLine>) -> Product {
    Product {
        id,
        sku: Some(format!("SET-{}", id)),
        product_type: Some(PRODUCT_TYPE_ASSEMBLY),
        bill_of_material: Some(lines),
        is_deactivated: Some(false),
        sold_amount: Some(7.0),
        stock_reserved_amount: Some(3.0),
        ..Default::default()
    }
}

pub async fn seed_component(db: &DatabaseConnection, billbee_product_id: i64) -> component::Model {
    component::ActiveModel::for_product(billbee_product_id)
        .insert(db)
        .await
        .expect("seed component")
}

pub async fn seed_recipe(
    db: &DatabaseConnection,
    bom_id: Option<i64>,
    component_id: i64,
    quantity: f64,
    stock_committed: f64,
) -> bom_recipe::Model {
    bom_recipe::ActiveModel {
        billbee_bom_id: Set(bom_id),
        billbee_component_id: Set(component_id),
        quantity: Set(quantity),
        stock_committed: Set(stock_committed),
        sold_amount: Set(0.0),
        updated_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("seed recipe")
}

pub async fn components(db: &DatabaseConnection) -> Vec<component::Model> {
    component::Entity::find()
        .order_by_asc(component::Column::BillbeeProductId)
        .all(db)
        .await
        .expect("load components")
}

pub async fn component_by_product(db: &DatabaseConnection, billbee_product_id: i64) -> component::Model {
    components(db)
        .await
        .into_iter()
        .find(|c| c.billbee_product_id == billbee_product_id)
        .unwrap_or_else(|| panic!("component {} missing", billbee_product_id))
}

pub async fn recipes(db: &DatabaseConnection) -> Vec<bom_recipe::Model> {
    bom_recipe::Entity::find()
        .order_by_asc(bom_recipe::Column::BillbeeBomId)
        .order_by_asc(bom_recipe::Column::BillbeeComponentId)
        .all(db)
        .await
        .expect("load recipes")
}

/// Router plus the state and fake behind it.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub api: Arc<FakeStockApi>,
}

impl TestApp {
    pub async fn new(api: FakeStockApi) -> Self {
        let db = setup_db().await;
        let api = Arc::new(api);
        let state = AppState::new(db, api.clone(), test_config());
        let router = inventory_sync::app_router(state.clone());
        Self { router, state, api }
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.state.db
    }

    pub async fn request(&self, method: Method, uri: &str, body: Option<&str>) -> (StatusCode, Value) {
        let (status, _, payload) = self.raw_request(method, uri, body).await;
        let json = if payload.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&payload).expect("response is JSON")
        };
        (status, json)
    }

    pub async fn raw_request(
        &self,
        method: Method,
        uri: &str,
        body: Option<&str>,
    ) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let mut builder = Request::builder().method(method).uri(uri);
        if body.is_some() {
            builder = builder.header("content-type", "application/json");
        }
        let request = builder
            .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
            .expect("request builds");

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router responds");
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body readable");
        (status, headers, bytes.to_vec())
    }
}

pub fn elapsed_between(calls: &[(i64, Instant)]) -> Duration {
    match (calls.first(), calls.last()) {
        (Some((_, first)), Some((_, last))) => last.duration_since(*first),
        _ => Duration::ZERO,
    }
}
