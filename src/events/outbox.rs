use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait,
    DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::{StockDelta, STOCK_DELTA_TOPIC};
use crate::billbee::{StockApi, StockUpdate};
use crate::entities::integration_outbox::{self, OutboxStatus};
use crate::errors::ServiceError;

const UPDATE_REASON: &str = "inventory-sync outbox";

/// How long a `processing` row may sit before a sweep treats its claimer as dead.
pub const DEFAULT_PROCESSING_TIMEOUT: Duration = Duration::from_secs(600);

/// Enqueue a stock delta. Call it with the caller's transaction so the row
/// commits together with the business write.
pub async fn enqueue_stock_delta<C: ConnectionTrait>(
    db: &C,
    product_id: i64,
    delta: f64,
    reason: Option<String>,
) -> Result<i64, ServiceError> {
    if product_id <= 0 {
        return Err(ServiceError::InvalidInput(format!(
            "invalid product id {}",
            product_id
        )));
    }
    if !delta.is_finite() {
        return Err(ServiceError::InvalidInput("delta must be finite".to_string()));
    }

    let payload = serde_json::to_value(StockDelta {
        product_id,
        delta,
        reason,
    })?;
    let now = Utc::now();
    let row = integration_outbox::ActiveModel {
        topic: Set(STOCK_DELTA_TOPIC.to_string()),
        payload: Set(payload),
        status: Set(OutboxStatus::Pending),
        retry_count: Set(0),
        available_at: Set(now),
        error: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };

    let inserted = integration_outbox::Entity::insert(row)
        .exec(db)
        .await
        .map_err(ServiceError::db_error)?;
    info!(
        outbox_id = inserted.last_insert_id,
        product_id, delta, "Enqueued stock delta"
    );
    Ok(inserted.last_insert_id)
}

/// Rows an operator may still care about, oldest first.
pub async fn list_open<C: ConnectionTrait>(
    db: &C,
    limit: u64,
) -> Result<Vec<integration_outbox::Model>, ServiceError> {
    integration_outbox::Entity::find()
        .filter(integration_outbox::Column::Status.ne(OutboxStatus::Done))
        .order_by_asc(integration_outbox::Column::Id)
        .limit(limit)
        .all(db)
        .await
        .map_err(ServiceError::db_error)
}

/// Makes an errored row immediately eligible again.
pub async fn retry_now<C: ConnectionTrait>(
    db: &C,
    id: i64,
) -> Result<integration_outbox::Model, ServiceError> {
    let row = integration_outbox::Entity::find_by_id(id)
        .one(db)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("outbox row {}", id)))?;

    if row.status != OutboxStatus::Error {
        return Err(ServiceError::Conflict(format!(
            "outbox row {} is {}, only error rows can be retried",
            id, row.status
        )));
    }

    let mut active: integration_outbox::ActiveModel = row.into();
    let now = Utc::now();
    active.status = Set(OutboxStatus::Pending);
    active.available_at = Set(now);
    active.updated_at = Set(now);
    active.update(db).await.map_err(ServiceError::db_error)
}

/// Invocation parameters; `outbox_id` selects single mode, otherwise sweep.
/// `sweep: false` without an `outbox_id` names no work and is rejected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchRequest {
    #[serde(default)]
    pub outbox_id: Option<i64>,
    #[serde(default)]
    pub sweep: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DispatchMode {
    Single,
    Sweep,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchReport {
    pub mode: DispatchMode,
    pub claimed: u64,
    /// Claimed rows left `processing` by an invocation that never finished
    pub reclaimed: u64,
    /// Rows another invocation claimed first
    pub skipped: u64,
    pub done: u64,
    pub errored: u64,
    pub products: u64,
}

impl DispatchReport {
    fn new(mode: DispatchMode) -> Self {
        Self {
            mode,
            claimed: 0,
            reclaimed: 0,
            skipped: 0,
            done: 0,
            errored: 0,
            products: 0,
        }
    }
}

/// Claimed rows targeting one product.
#[derive(Debug, Default)]
struct ProductGroup {
    row_ids: Vec<i64>,
    delta: f64,
}

/// Delivers queued stock deltas at least once.
///
/// A row moves to `processing` only through a conditional update, so two
/// dispatchers never push the same row. Rows that fail go to `error` with a
/// fixed backoff and are picked up by a later sweep. A row still `processing`
/// after `processing_timeout` lost its invocation; a sweep claims it again, so
/// its delta may be pushed twice but is never lost.
#[derive(Clone)]
pub struct OutboxDispatcher {
    db: Arc<DatabaseConnection>,
    api: Arc<dyn StockApi>,
    backoff: Duration,
    sweep_limit: u64,
    processing_timeout: Duration,
}

impl OutboxDispatcher {
    pub fn new(
        db: Arc<DatabaseConnection>,
        api: Arc<dyn StockApi>,
        backoff: Duration,
        sweep_limit: u64,
    ) -> Self {
        Self {
            db,
            api,
            backoff,
            sweep_limit: sweep_limit.max(1),
            processing_timeout: DEFAULT_PROCESSING_TIMEOUT,
        }
    }

    pub fn with_processing_timeout(mut self, timeout: Duration) -> Self {
        self.processing_timeout = timeout;
        self
    }

    pub async fn dispatch(&self, request: DispatchRequest) -> Result<DispatchReport, ServiceError> {
        match (request.outbox_id, request.sweep) {
            (Some(id), Some(true)) => Err(ServiceError::BadRequest(format!(
                "pass either outbox_id ({}) or sweep, not both",
                id
            ))),
            (Some(id), _) => self.dispatch_one(id).await,
            (None, Some(false)) => Err(ServiceError::BadRequest(
                "sweep: false requires an outbox_id".to_string(),
            )),
            (None, _) => self.sweep().await,
        }
    }

    /// Rows a sweep may claim: due `pending`/`error` rows and stale `processing` rows.
    fn sweep_eligible(&self, now: DateTime<Utc>) -> Result<Condition, ServiceError> {
        let timeout = chrono::Duration::from_std(self.processing_timeout).map_err(|e| {
            ServiceError::InternalError(format!("invalid outbox processing timeout: {}", e))
        })?;
        Ok(Condition::any()
            .add(
                Condition::all()
                    .add(
                        integration_outbox::Column::Status
                            .is_in([OutboxStatus::Pending, OutboxStatus::Error]),
                    )
                    .add(integration_outbox::Column::AvailableAt.lte(now)),
            )
            .add(
                Condition::all()
                    .add(integration_outbox::Column::Status.eq(OutboxStatus::Processing))
                    .add(integration_outbox::Column::UpdatedAt.lt(now - timeout)),
            ))
    }

    /// Conditional `status -> processing`; false when another invocation won.
    /// The claim refreshes `updated_at`, so a reclaimed row is not stale anymore.
    async fn claim(&self, id: i64, eligible: Condition) -> Result<bool, ServiceError> {
        let result = integration_outbox::Entity::update_many()
            .col_expr(
                integration_outbox::Column::Status,
                Expr::value(OutboxStatus::Processing),
            )
            .col_expr(integration_outbox::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(integration_outbox::Column::Id.eq(id))
            .filter(eligible)
            .exec(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;
        Ok(result.rows_affected == 1)
    }

    async fn mark_done(&self, ids: &[i64]) -> Result<(), ServiceError> {
        if ids.is_empty() {
            return Ok(());
        }
        integration_outbox::Entity::update_many()
            .col_expr(integration_outbox::Column::Status, Expr::value(OutboxStatus::Done))
            .col_expr(integration_outbox::Column::Error, Expr::value(Option::<String>::None))
            .col_expr(integration_outbox::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(integration_outbox::Column::Id.is_in(ids.iter().copied()))
            .exec(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;
        counter!("inventory_sync.outbox.done", ids.len() as u64);
        Ok(())
    }

    async fn mark_error(&self, ids: &[i64], message: &str) -> Result<(), ServiceError> {
        if ids.is_empty() {
            return Ok(());
        }
        let now = Utc::now();
        let backoff = chrono::Duration::from_std(self.backoff)
            .map_err(|e| ServiceError::InternalError(format!("invalid outbox backoff: {}", e)))?;

        integration_outbox::Entity::update_many()
            .col_expr(integration_outbox::Column::Status, Expr::value(OutboxStatus::Error))
            .col_expr(
                integration_outbox::Column::Error,
                Expr::value(Some(message.to_string())),
            )
            .col_expr(integration_outbox::Column::AvailableAt, Expr::value(now + backoff))
            .col_expr(
                integration_outbox::Column::RetryCount,
                Expr::col(integration_outbox::Column::RetryCount).add(1),
            )
            .col_expr(integration_outbox::Column::UpdatedAt, Expr::value(now))
            .filter(integration_outbox::Column::Id.is_in(ids.iter().copied()))
            .exec(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;
        counter!("inventory_sync.outbox.error", ids.len() as u64);
        warn!(?ids, error = message, "Outbox rows marked error");
        Ok(())
    }

    /// Single mode: claim one pending row and push it.
    #[instrument(skip(self))]
    pub async fn dispatch_one(&self, id: i64) -> Result<DispatchReport, ServiceError> {
        let mut report = DispatchReport::new(DispatchMode::Single);

        let row = integration_outbox::Entity::find_by_id(id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("outbox row {}", id)))?;

        let pending =
            Condition::all().add(integration_outbox::Column::Status.eq(OutboxStatus::Pending));
        if !self.claim(id, pending).await? {
            debug!(outbox_id = id, status = %row.status, "Row not pending; nothing to do");
            report.skipped = 1;
            return Ok(report);
        }
        report.claimed = 1;

        let delta = match parse_row(&row) {
            Ok(delta) => delta,
            Err(message) => {
                self.mark_error(&[id], &message).await?;
                report.errored = 1;
                return Ok(report);
            }
        };
        report.products = 1;

        let mut groups = BTreeMap::new();
        groups.insert(
            delta.product_id,
            ProductGroup {
                row_ids: vec![id],
                delta: delta.delta,
            },
        );
        self.push_groups(groups, &mut report).await?;
        Ok(report)
    }

    /// Sweep mode: claim due pending and error rows plus stale processing rows,
    /// coalesce per product, push.
    #[instrument(skip(self))]
    pub async fn sweep(&self) -> Result<DispatchReport, ServiceError> {
        let mut report = DispatchReport::new(DispatchMode::Sweep);
        let now = Utc::now();
        let eligible = self.sweep_eligible(now)?;

        let candidates = integration_outbox::Entity::find()
            .filter(eligible.clone())
            .order_by_asc(integration_outbox::Column::Id)
            .limit(self.sweep_limit)
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;

        let mut groups: BTreeMap<i64, ProductGroup> = BTreeMap::new();
        for row in candidates {
            if !self.claim(row.id, eligible.clone()).await? {
                report.skipped += 1;
                continue;
            }
            report.claimed += 1;
            if row.status == OutboxStatus::Processing {
                warn!(
                    outbox_id = row.id,
                    since = %row.updated_at,
                    "Reclaiming stale processing row"
                );
                report.reclaimed += 1;
            }

            match parse_row(&row) {
                Ok(delta) => {
                    let group = groups.entry(delta.product_id).or_default();
                    group.row_ids.push(row.id);
                    group.delta += delta.delta;
                }
                Err(message) => {
                    self.mark_error(&[row.id], &message).await?;
                    report.errored += 1;
                }
            }
        }

        report.products = groups.len() as u64;
        if !groups.is_empty() {
            self.push_groups(groups, &mut report).await?;
        }

        info!(
            claimed = report.claimed,
            reclaimed = report.reclaimed,
            skipped = report.skipped,
            done = report.done,
            errored = report.errored,
            products = report.products,
            "Outbox sweep finished"
        );
        Ok(report)
    }

    /// Reads current stock once per product and writes the new absolute values.
    async fn push_groups(
        &self,
        groups: BTreeMap<i64, ProductGroup>,
        report: &mut DispatchReport,
    ) -> Result<(), ServiceError> {
        let mut updates: Vec<StockUpdate> = Vec::with_capacity(groups.len());
        let mut pushed_rows: Vec<i64> = Vec::new();

        for (product_id, group) in groups {
            match self.api.get_product_stock(product_id).await {
                Ok(current) if current.is_finite() => {
                    let amount = current + group.delta;
                    debug!(product_id, current, delta = group.delta, amount, "Computed new stock");
                    updates.push(
                        StockUpdate::for_product(product_id, amount).with_reason(UPDATE_REASON),
                    );
                    pushed_rows.extend(group.row_ids);
                }
                Ok(current) => {
                    let message =
                        format!("non-finite stock {} for product {}", current, product_id);
                    self.mark_error(&group.row_ids, &message).await?;
                    report.errored += group.row_ids.len() as u64;
                }
                Err(e) => {
                    self.mark_error(&group.row_ids, &e.to_string()).await?;
                    report.errored += group.row_ids.len() as u64;
                }
            }
        }

        let outcome = match updates.len() {
            0 => return Ok(()),
            1 => {
                let update = updates.remove(0);
                self.api.update_stock(update).await
            }
            _ => self.api.update_stock_multiple(updates).await,
        };

        match outcome {
            Ok(()) => {
                self.mark_done(&pushed_rows).await?;
                report.done += pushed_rows.len() as u64;
            }
            Err(e) => {
                self.mark_error(&pushed_rows, &e.to_string()).await?;
                report.errored += pushed_rows.len() as u64;
            }
        }
        Ok(())
    }
}

fn parse_row(row: &integration_outbox::Model) -> Result<StockDelta, String> {
    if row.topic != STOCK_DELTA_TOPIC {
        return Err(format!("unsupported topic '{}'", row.topic));
    }
    StockDelta::from_payload(&row.payload)
}
