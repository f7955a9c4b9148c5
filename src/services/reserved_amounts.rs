/*!
 * # Reserved-Amount Batch Workers
 *
 * Refresh the reserved ("committed") quantity of a bounded slice of rows per
 * invocation. Rows are read in ascending id order after `cursor`; a full page
 * means more rows may follow.
 *
 * Two variants share the batch loop:
 * - [`ReservedTarget::Components`] fetches by `components.billbee_product_id`
 *   and writes `components.stock_committed`.
 * - [`ReservedTarget::BomRecipes`] fetches by the assembly id of each recipe and
 *   writes `bom_recipes.stock_committed` of that recipe row.
 *
 * Requests are spread over `concurrency` lanes. All lanes acquire one
 * [`SharedThrottle`] before each request, so any two requests start at least
 * `min_interval` apart regardless of the lane count. Lanes only overlap on
 * response latency and database writes.
 * Per-row failures are counted as skipped and never abort the batch.
 */
use chrono::Utc;
use futures::future::join_all;
use metrics::{counter, histogram};
use sea_orm::{
    sea_query::Expr, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};
use validator::Validate;

use crate::billbee::StockApi;
use crate::entities::{bom_recipe, component};
use crate::errors::ServiceError;
use crate::rate_limiter::{SharedThrottle, Throttle};
use crate::services::cursor_store;

/// Which table a worker refreshes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ReservedTarget {
    Components,
    BomRecipes,
}

impl ReservedTarget {
    /// Cursor Store kind used by standalone invocations.
    pub fn cursor_kind(self) -> &'static str {
        match self {
            ReservedTarget::Components => cursor_store::RESERVED_AMOUNTS_KIND,
            ReservedTarget::BomRecipes => cursor_store::BOM_RESERVED_AMOUNTS_KIND,
        }
    }
}

/// Invocation parameters; both fields are optional on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct BatchRequest {
    #[serde(default)]
    #[validate(range(min = 1, max = 1000))]
    pub limit: Option<u64>,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub cursor: Option<i64>,
}

/// Result of one batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub processed: u64,
    pub skipped: u64,
    pub updated_count: u64,
    pub has_more: bool,
    pub next_cursor: Option<i64>,
    pub limit: u64,
}

/// Row picked for a batch: local id plus the external id to query.
#[derive(Debug, Clone, Copy)]
struct WorkItem {
    row_id: i64,
    external_id: Option<i64>,
}

#[derive(Debug, Default, Clone, Copy)]
struct LaneTally {
    processed: u64,
    skipped: u64,
    updated: u64,
}

#[derive(Clone)]
pub struct ReservedAmountWorker {
    db: Arc<DatabaseConnection>,
    api: Arc<dyn StockApi>,
    target: ReservedTarget,
    pacing: SharedThrottle,
    concurrency: usize,
    default_limit: u64,
}

impl ReservedAmountWorker {
    pub fn new(
        db: Arc<DatabaseConnection>,
        api: Arc<dyn StockApi>,
        target: ReservedTarget,
        min_interval: Duration,
        concurrency: usize,
        default_limit: u64,
    ) -> Self {
        Self {
            db,
            api,
            target,
            pacing: Throttle::shared(min_interval),
            concurrency: concurrency.max(1),
            default_limit: default_limit.max(1),
        }
    }

    /// Replaces the worker's own pacing gate, so several workers share one rate.
    pub fn with_pacing(mut self, pacing: SharedThrottle) -> Self {
        self.pacing = pacing;
        self
    }

    /// Standalone invocation. Without an explicit cursor the Cursor Store
    /// supplies one, and the outcome is written back (0 once the sweep ends).
    #[instrument(skip(self), fields(target = %self.target))]
    pub async fn run(&self, request: BatchRequest) -> Result<BatchReport, ServiceError> {
        request.validate()?;
        let kind = self.target.cursor_kind();
        let use_store = request.cursor.is_none();
        let cursor = match request.cursor {
            Some(cursor) => cursor,
            None => cursor_store::load(&*self.db, kind).await?,
        };

        let report = self.run_batch(request.limit, cursor).await?;

        if use_store {
            match (report.has_more, report.next_cursor) {
                (true, Some(next)) => cursor_store::store(&*self.db, kind, next).await?,
                _ => cursor_store::reset(&*self.db, kind).await?,
            }
        }
        Ok(report)
    }

    /// Processes up to `limit` rows with id greater than `cursor`.
    #[instrument(skip(self), fields(target = %self.target))]
    pub async fn run_batch(
        &self,
        limit: Option<u64>,
        cursor: i64,
    ) -> Result<BatchReport, ServiceError> {
        let started = Instant::now();
        let limit = limit.filter(|l| *l > 0).unwrap_or(self.default_limit);

        let items = self.load_items(cursor, limit).await?;
        let fetched = items.len() as u64;
        let last_id = items.last().map(|item| item.row_id);

        let mut lanes: Vec<Vec<WorkItem>> = vec![Vec::new(); self.concurrency];
        for (index, item) in items.into_iter().enumerate() {
            lanes[index % self.concurrency].push(item);
        }

        let tallies = join_all(
            lanes
                .into_iter()
                .filter(|lane| !lane.is_empty())
                .map(|lane| self.run_lane(lane)),
        )
        .await;

        let mut report = BatchReport {
            limit,
            ..Default::default()
        };
        for tally in tallies {
            report.processed += tally.processed;
            report.skipped += tally.skipped;
            report.updated_count += tally.updated;
        }

        report.has_more = fetched == limit;
        report.next_cursor = if report.has_more { last_id } else { None };

        histogram!("inventory_sync.reserved.batch_duration", started.elapsed(), "target" => self.target.to_string());
        counter!("inventory_sync.reserved.processed", report.processed, "target" => self.target.to_string());
        counter!("inventory_sync.reserved.skipped", report.skipped, "target" => self.target.to_string());

        info!(
            cursor,
            limit,
            processed = report.processed,
            skipped = report.skipped,
            updated = report.updated_count,
            has_more = report.has_more,
            "Reserved-amount batch finished"
        );
        Ok(report)
    }

    async fn load_items(&self, cursor: i64, limit: u64) -> Result<Vec<WorkItem>, ServiceError> {
        let db = &*self.db;
        let items = match self.target {
            ReservedTarget::Components => component::Entity::find()
                .select_only()
                .column(component::Column::Id)
                .column(component::Column::BillbeeProductId)
                .filter(component::Column::Id.gt(cursor))
                .order_by_asc(component::Column::Id)
                .limit(limit)
                .into_tuple::<(i64, i64)>()
                .all(db)
                .await
                .map_err(ServiceError::db_error)?
                .into_iter()
                .map(|(row_id, external_id)| WorkItem {
                    row_id,
                    external_id: Some(external_id),
                })
                .collect(),
            ReservedTarget::BomRecipes => bom_recipe::Entity::find()
                .select_only()
                .column(bom_recipe::Column::Id)
                .column(bom_recipe::Column::BillbeeBomId)
                .filter(bom_recipe::Column::Id.gt(cursor))
                .order_by_asc(bom_recipe::Column::Id)
                .limit(limit)
                .into_tuple::<(i64, Option<i64>)>()
                .all(db)
                .await
                .map_err(ServiceError::db_error)?
                .into_iter()
                .map(|(row_id, external_id)| WorkItem { row_id, external_id })
                .collect(),
        };
        Ok(items)
    }

    async fn run_lane(&self, items: Vec<WorkItem>) -> LaneTally {
        let mut tally = LaneTally::default();

        for item in items {
            tally.processed += 1;

            let Some(external_id) = item.external_id.filter(|id| *id > 0) else {
                debug!(row_id = item.row_id, "Skipping row without external product id");
                tally.skipped += 1;
                continue;
            };

            self.pacing.lock().await.acquire().await;
            let amount = match self.api.get_reserved_amount(external_id).await {
                Ok(amount) if amount.is_finite() => amount,
                Ok(amount) => {
                    warn!(row_id = item.row_id, external_id, amount, "Non-finite reserved amount");
                    tally.skipped += 1;
                    continue;
                }
                Err(e) => {
                    warn!(row_id = item.row_id, external_id, error = %e, "Reserved amount fetch failed");
                    tally.skipped += 1;
                    continue;
                }
            };

            match self.write_committed(item.row_id, amount).await {
                Ok(rows) if rows > 0 => tally.updated += 1,
                Ok(_) => {
                    debug!(row_id = item.row_id, "Row vanished before update");
                    tally.skipped += 1;
                }
                Err(e) => {
                    warn!(row_id = item.row_id, error = %e, "Reserved amount write failed");
                    tally.skipped += 1;
                }
            }
        }
        tally
    }

    async fn write_committed(&self, row_id: i64, amount: f64) -> Result<u64, ServiceError> {
        let db = &*self.db;
        let now = Utc::now();
        let result = match self.target {
            ReservedTarget::Components => component::Entity::update_many()
                .col_expr(component::Column::StockCommitted, Expr::value(amount))
                .col_expr(component::Column::UpdatedAt, Expr::value(now))
                .filter(component::Column::Id.eq(row_id))
                .exec(db)
                .await,
            ReservedTarget::BomRecipes => bom_recipe::Entity::update_many()
                .col_expr(bom_recipe::Column::StockCommitted, Expr::value(amount))
                .col_expr(bom_recipe::Column::UpdatedAt, Expr::value(now))
                .filter(bom_recipe::Column::Id.eq(row_id))
                .exec(db)
                .await,
        };
        result
            .map(|r| r.rows_affected)
            .map_err(ServiceError::db_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billbee::{ApiClientError, MockStockApi};
    use crate::db::{establish_connection_with_config, run_migrations, DbConfig};
    use crate::entities::component::ActiveModel as ComponentRow;
    use sea_orm::{ActiveModelTrait, Set};

    async fn seeded_db(product_ids: &[i64]) -> Arc<DatabaseConnection> {
        let db = establish_connection_with_config(&DbConfig::sqlite_memory())
            .await
            .unwrap();
        run_migrations(&db).await.unwrap();
        for id in product_ids {
            ComponentRow::for_product(*id).insert(&db).await.unwrap();
        }
        Arc::new(db)
    }

    #[tokio::test]
    async fn api_failure_skips_row_without_aborting() {
        let db = seeded_db(&[100, 200, 300]).await;
        let mut api = MockStockApi::new();
        api.expect_get_reserved_amount().returning(|id| match id {
            200 => Err(ApiClientError::TooManyRequests { retry_after: None }),
            other => Ok(other as f64 / 100.0),
        });

        let worker = ReservedAmountWorker::new(
            db.clone(),
            Arc::new(api),
            ReservedTarget::Components,
            Duration::ZERO,
            2,
            50,
        );
        let report = worker.run_batch(Some(10), 0).await.unwrap();

        assert_eq!(report.processed, 3);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.updated_count, 2);
        assert!(!report.has_more);
        assert_eq!(report.next_cursor, None);

        let rows = component::Entity::find().all(&*db).await.unwrap();
        let committed: Vec<(i64, f64)> = rows
            .iter()
            .map(|r| (r.billbee_product_id, r.stock_committed))
            .collect();
        assert!(committed.contains(&(100, 1.0)));
        assert!(committed.contains(&(200, 0.0)));
        assert!(committed.contains(&(300, 3.0)));
    }

    #[tokio::test]
    async fn full_page_reports_more_with_last_id() {
        let db = seeded_db(&[1, 2, 3]).await;
        let mut api = MockStockApi::new();
        api.expect_get_reserved_amount()
            .times(2)
            .returning(|_| Ok(1.0));

        let worker = ReservedAmountWorker::new(
            db,
            Arc::new(api),
            ReservedTarget::Components,
            Duration::ZERO,
            1,
            50,
        );
        let report = worker.run_batch(Some(2), 0).await.unwrap();
        assert!(report.has_more);
        assert_eq!(report.next_cursor, Some(2));
        assert_eq!(report.limit, 2);
    }

    #[tokio::test]
    async fn recipe_without_assembly_id_is_skipped() {
        let db = seeded_db(&[]).await;
        bom_recipe::ActiveModel {
            billbee_bom_id: Set(None),
            billbee_component_id: Set(100),
            quantity: Set(1.0),
            stock_committed: Set(0.0),
            sold_amount: Set(0.0),
            updated_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&*db)
        .await
        .unwrap();

        let mut api = MockStockApi::new();
        api.expect_get_reserved_amount().never();

        let worker = ReservedAmountWorker::new(
            db,
            Arc::new(api),
            ReservedTarget::BomRecipes,
            Duration::ZERO,
            2,
            50,
        );
        let report = worker.run_batch(None, 0).await.unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.updated_count, 0);
    }
}
