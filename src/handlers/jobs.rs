use axum::{extract::State, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{error, instrument};

use super::{JobInput, JobResponse};
use crate::{
    errors::ServiceError,
    events::outbox::{DispatchReport, DispatchRequest},
    services::{
        bom_aggregation::AggregationReport,
        full_stock_sync::FullSyncReport,
        orchestrator::OrchestratorReport,
        reserved_amounts::{BatchReport, BatchRequest},
    },
    AppState,
};

/// Orchestrator parameters.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize)]
pub struct CronRequest {
    /// Start a fresh cycle before advancing
    #[serde(default)]
    pub reset: Option<bool>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/full-stock-sync", get(full_stock_sync).post(full_stock_sync))
        .route(
            "/reserved-amounts/components",
            get(reserved_components).post(reserved_components),
        )
        .route("/reserved-amounts/bom", get(reserved_bom).post(reserved_bom))
        .route("/bom-aggregation", get(bom_aggregation).post(bom_aggregation))
        .route("/inventory-cron", get(inventory_cron).post(inventory_cron))
        .route("/outbox-dispatch", get(outbox_dispatch).post(outbox_dispatch))
}

fn log_failure<T>(job: &str, result: Result<T, ServiceError>) -> Result<T, ServiceError> {
    if let Err(e) = &result {
        error!(job, error = %e, "Job invocation failed");
    }
    result
}

#[instrument(skip(state))]
async fn full_stock_sync(
    State(state): State<AppState>,
) -> Result<Json<JobResponse<FullSyncReport>>, ServiceError> {
    let report = log_failure("full-stock-sync", state.full_sync.run().await)?;
    Ok(Json(JobResponse::ok(report)))
}

#[instrument(skip(state))]
async fn reserved_components(
    State(state): State<AppState>,
    JobInput(request): JobInput<BatchRequest>,
) -> Result<Json<JobResponse<BatchReport>>, ServiceError> {
    let report = log_failure(
        "reserved-amounts/components",
        state.components_worker.run(request).await,
    )?;
    Ok(Json(JobResponse::ok(report)))
}

#[instrument(skip(state))]
async fn reserved_bom(
    State(state): State<AppState>,
    JobInput(request): JobInput<BatchRequest>,
) -> Result<Json<JobResponse<BatchReport>>, ServiceError> {
    let report = log_failure("reserved-amounts/bom", state.bom_worker.run(request).await)?;
    Ok(Json(JobResponse::ok(report)))
}

#[instrument(skip(state))]
async fn bom_aggregation(
    State(state): State<AppState>,
) -> Result<Json<JobResponse<AggregationReport>>, ServiceError> {
    let report = log_failure("bom-aggregation", state.aggregation.run().await)?;
    Ok(Json(JobResponse::ok(report)))
}

#[instrument(skip(state))]
async fn inventory_cron(
    State(state): State<AppState>,
    JobInput(request): JobInput<CronRequest>,
) -> Result<Json<JobResponse<OrchestratorReport>>, ServiceError> {
    if request.reset.unwrap_or(false) {
        log_failure("inventory-cron", state.orchestrator.start_cycle(true).await)?;
    }
    let report = log_failure("inventory-cron", state.orchestrator.run().await)?;
    Ok(Json(JobResponse::ok(report)))
}

#[instrument(skip(state))]
async fn outbox_dispatch(
    State(state): State<AppState>,
    JobInput(request): JobInput<DispatchRequest>,
) -> Result<Json<JobResponse<DispatchReport>>, ServiceError> {
    let report = log_failure("outbox-dispatch", state.dispatcher.dispatch(request).await)?;
    Ok(Json(JobResponse::ok(report)))
}
