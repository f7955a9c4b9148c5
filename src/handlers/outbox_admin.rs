use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tracing::info;

use super::JobResponse;
use crate::{entities::integration_outbox, errors::ServiceError, events::outbox, AppState};

const LIST_LIMIT: u64 = 100;

#[derive(Debug, Serialize)]
pub struct OutboxList {
    pub items: Vec<integration_outbox::Model>,
}

#[derive(Debug, Serialize)]
pub struct OutboxRetried {
    pub item: integration_outbox::Model,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_outbox))
        .route("/:id/retry", post(retry_outbox))
}

/// Rows that are not yet `done`, oldest first.
async fn list_outbox(
    State(state): State<AppState>,
) -> Result<Json<JobResponse<OutboxList>>, ServiceError> {
    let items = outbox::list_open(&*state.db, LIST_LIMIT).await?;
    Ok(Json(JobResponse::ok(OutboxList { items })))
}

async fn retry_outbox(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<JobResponse<OutboxRetried>>, ServiceError> {
    let item = outbox::retry_now(&*state.db, id).await?;
    info!(outbox_id = id, "Outbox row rescheduled by operator");
    Ok(Json(JobResponse::ok(OutboxRetried { item })))
}
