//! Inventory sync library
//!
//! Mirrors the marketplace catalog into the ERP database, refreshes reserved
//! quantities in rate-limited batches, pushes assembly reservations down to
//! their components and delivers queued stock changes back to the marketplace.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod billbee;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod rate_limiter;
pub mod retry;
pub mod services;
pub mod telemetry;

use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use chrono::Utc;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::billbee::StockApi;
use crate::config::AppConfig;
use crate::entities::{integration_outbox, OutboxStatus};
use crate::errors::ServiceError;
use crate::events::OutboxDispatcher;
use crate::rate_limiter::Throttle;
use crate::services::{
    bom_aggregation::BomAggregation,
    cursor_store,
    full_stock_sync::FullStockSync,
    orchestrator::{Orchestrator, OrchestratorSettings},
    reserved_amounts::{ReservedAmountWorker, ReservedTarget},
};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<AppConfig>,
    pub full_sync: FullStockSync,
    pub components_worker: ReservedAmountWorker,
    pub bom_worker: ReservedAmountWorker,
    pub aggregation: BomAggregation,
    pub orchestrator: Orchestrator,
    pub dispatcher: OutboxDispatcher,
}

impl AppState {
    /// Wires every job against one database and one marketplace client.
    pub fn new(db: Arc<DatabaseConnection>, api: Arc<dyn StockApi>, config: AppConfig) -> Self {
        let sync = &config.sync;

        let full_sync = FullStockSync::new(
            db.clone(),
            api.clone(),
            config.categories.rules(),
            config.billbee.page_size,
        );
        // Both workers talk to the same account, so they share one pacing gate
        let pacing = Throttle::shared(sync.reserved_min_interval());
        let worker = |target| {
            ReservedAmountWorker::new(
                db.clone(),
                api.clone(),
                target,
                sync.reserved_min_interval(),
                sync.worker_concurrency,
                sync.default_batch_limit,
            )
            .with_pacing(pacing.clone())
        };
        let components_worker = worker(ReservedTarget::Components);
        let bom_worker = worker(ReservedTarget::BomRecipes);
        let aggregation = BomAggregation::new(db.clone());

        let orchestrator = Orchestrator::new(
            db.clone(),
            full_sync.clone(),
            components_worker.clone(),
            bom_worker.clone(),
            aggregation.clone(),
            OrchestratorSettings {
                budget: sync.orchestrator_budget(),
                batch_limit: sync.orchestrator_batch_limit,
                lease: sync.orchestrator_lease(),
            },
        );
        let dispatcher = OutboxDispatcher::new(
            db.clone(),
            api,
            sync.outbox_backoff(),
            sync.outbox_sweep_limit,
        )
        .with_processing_timeout(sync.outbox_processing_timeout());

        Self {
            db,
            config: Arc::new(config),
            full_sync,
            components_worker,
            bom_worker,
            aggregation,
            orchestrator,
            dispatcher,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStatus {
    pub ok: bool,
    pub phase: Option<String>,
    pub components_cursor: Option<i64>,
    pub bom_cursor: Option<i64>,
    pub batches_run: i64,
    pub locked_until: Option<String>,
    pub reserved_amounts_cursor: i64,
    pub bom_reserved_amounts_cursor: i64,
    pub outbox_pending: u64,
    pub outbox_error: u64,
    pub timestamp: String,
}

/// Snapshot of the persisted pipeline state.
async fn pipeline_status(
    State(state): State<AppState>,
) -> Result<Json<PipelineStatus>, ServiceError> {
    let db = &*state.db;
    let orchestrator = state.orchestrator.state().await?;

    let count_status = |status: OutboxStatus| {
        integration_outbox::Entity::find()
            .filter(integration_outbox::Column::Status.eq(status))
            .count(db)
    };
    let outbox_pending = count_status(OutboxStatus::Pending)
        .await
        .map_err(ServiceError::db_error)?;
    let outbox_error = count_status(OutboxStatus::Error)
        .await
        .map_err(ServiceError::db_error)?;

    Ok(Json(PipelineStatus {
        ok: true,
        phase: orchestrator.as_ref().map(|s| s.phase.to_string()),
        components_cursor: orchestrator.as_ref().and_then(|s| s.components_cursor),
        bom_cursor: orchestrator.as_ref().and_then(|s| s.bom_cursor),
        batches_run: orchestrator.as_ref().map_or(0, |s| s.batches_run),
        locked_until: orchestrator
            .as_ref()
            .and_then(|s| s.locked_until)
            .map(|t| t.to_rfc3339()),
        reserved_amounts_cursor: cursor_store::load(db, cursor_store::RESERVED_AMOUNTS_KIND).await?,
        bom_reserved_amounts_cursor: cursor_store::load(db, cursor_store::BOM_RESERVED_AMOUNTS_KIND)
            .await?,
        outbox_pending,
        outbox_error,
        timestamp: Utc::now().to_rfc3339(),
    }))
}

/// Liveness plus a database ping.
async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match db::check_connection(&state.db).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "ok": true,
                "status": "healthy",
                "database": "up",
                "version": env!("CARGO_PKG_VERSION"),
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "ok": false,
                "status": "unhealthy",
                "database": "down",
                "error": e.to_string(),
            })),
        ),
    }
}

/// Full HTTP surface with CORS, request ids and request tracing.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(pipeline_status).post(pipeline_status))
        .route("/health", get(health).post(health))
        .nest("/jobs", handlers::jobs::router())
        .nest("/admin/outbox", handlers::outbox_admin::router())
        .layer(telemetry::configure_http_tracing())
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id_middleware,
        ))
        .layer(axum::middleware::from_fn(middleware_helpers::cors_middleware))
        .with_state(state)
}
