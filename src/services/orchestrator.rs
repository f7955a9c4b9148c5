/*!
 * # Inventory Cron Orchestrator
 *
 * Drives one pipeline cycle `stock -> components -> bom -> aggregate -> idle`
 * across many wall-clock-bounded invocations. All progress lives in the single
 * `orchestrator_state` row, so an invocation that runs out of budget returns
 * `partial` and the next one resumes from the persisted cursor.
 *
 * Every invocation performs at least one unit of work (a full sync, a worker
 * batch or the aggregation) before it looks at the budget. The phase and the
 * cursor are written after every unit, so a crash loses at most one batch.
 *
 * Overlapping invocations are kept apart by a lease (`locked_until`) taken
 * with a conditional update and released when the invocation ends.
 */
use chrono::Utc;
use sea_orm::{
    sea_query::{Expr, OnConflict},
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, IntoActiveModel,
    QueryFilter, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn};

use crate::entities::orchestrator_state::{self, Phase, INVENTORY_STATE_ID};
use crate::errors::ServiceError;
use crate::services::bom_aggregation::{AggregationReport, BomAggregation};
use crate::services::full_stock_sync::{FullStockSync, FullSyncReport};
use crate::services::reserved_amounts::{BatchReport, ReservedAmountWorker};

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorSettings {
    /// Wall-clock budget of one invocation
    pub budget: Duration,
    /// Rows per worker batch
    pub batch_limit: u64,
    /// Lease length; an abandoned lease expires after this
    pub lease: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            budget: Duration::from_secs(110),
            batch_limit: 50,
            lease: Duration::from_secs(150),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorReport {
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reason: Option<String>,
    pub partial: bool,
    pub phase: Option<Phase>,
    pub phases_completed: Vec<Phase>,
    /// Worker batches run by this invocation
    pub batches_run: u64,
    /// Worker batches run since the cycle started
    pub total_batches: i64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub full_sync: Option<FullSyncReport>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub aggregation: Option<AggregationReport>,
}

#[derive(Clone)]
pub struct Orchestrator {
    db: Arc<DatabaseConnection>,
    full_sync: FullStockSync,
    components: ReservedAmountWorker,
    bom: ReservedAmountWorker,
    aggregation: BomAggregation,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        db: Arc<DatabaseConnection>,
        full_sync: FullStockSync,
        components: ReservedAmountWorker,
        bom: ReservedAmountWorker,
        aggregation: BomAggregation,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            db,
            full_sync,
            components,
            bom,
            aggregation,
            settings,
        }
    }

    /// Current state row, if one was ever written.
    pub async fn state(&self) -> Result<Option<orchestrator_state::Model>, ServiceError> {
        orchestrator_state::Entity::find_by_id(INVENTORY_STATE_ID.to_string())
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    /// Creates the state row in phase `stock` unless it exists.
    async fn ensure_state(&self) -> Result<(), ServiceError> {
        let row = orchestrator_state::ActiveModel {
            id: Set(INVENTORY_STATE_ID.to_string()),
            phase: Set(Phase::Stock),
            components_cursor: Set(None),
            bom_cursor: Set(None),
            batches_run: Set(0),
            locked_until: Set(None),
            updated_at: Set(Utc::now()),
        };
        orchestrator_state::Entity::insert(row)
            .on_conflict(
                OnConflict::column(orchestrator_state::Column::Id)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;
        Ok(())
    }

    async fn load_state(&self) -> Result<orchestrator_state::Model, ServiceError> {
        self.state().await?.ok_or_else(|| {
            ServiceError::NotFound(format!("orchestrator state '{}'", INVENTORY_STATE_ID))
        })
    }

    /// Starts a new cycle when idle, or unconditionally with `force`.
    #[instrument(skip(self))]
    pub async fn start_cycle(&self, force: bool) -> Result<Phase, ServiceError> {
        self.ensure_state().await?;
        let state = self.load_state().await?;
        if state.phase != Phase::Idle && !force {
            info!(phase = %state.phase, "Cycle already in progress");
            return Ok(state.phase);
        }

        let mut active = state.into_active_model();
        active.phase = Set(Phase::Stock);
        active.components_cursor = Set(None);
        active.bom_cursor = Set(None);
        active.batches_run = Set(0);
        active.updated_at = Set(Utc::now());
        active.update(&*self.db).await.map_err(ServiceError::db_error)?;

        info!(force, "Inventory cycle reset to stock phase");
        Ok(Phase::Stock)
    }

    async fn acquire_lease(&self) -> Result<bool, ServiceError> {
        let now = Utc::now();
        let lease = chrono::Duration::from_std(self.settings.lease)
            .map_err(|e| ServiceError::InternalError(format!("invalid lease length: {}", e)))?;

        let result = orchestrator_state::Entity::update_many()
            .col_expr(orchestrator_state::Column::LockedUntil, Expr::value(Some(now + lease)))
            .filter(orchestrator_state::Column::Id.eq(INVENTORY_STATE_ID))
            .filter(
                Condition::any()
                    .add(orchestrator_state::Column::LockedUntil.is_null())
                    .add(orchestrator_state::Column::LockedUntil.lt(now)),
            )
            .exec(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;
        Ok(result.rows_affected == 1)
    }

    async fn release_lease(&self) -> Result<(), ServiceError> {
        orchestrator_state::Entity::update_many()
            .col_expr(
                orchestrator_state::Column::LockedUntil,
                Expr::value(Option::<chrono::DateTime<Utc>>::None),
            )
            .filter(orchestrator_state::Column::Id.eq(INVENTORY_STATE_ID))
            .exec(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;
        Ok(())
    }

    /// One bounded invocation.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<OrchestratorReport, ServiceError> {
        self.ensure_state().await?;

        if !self.acquire_lease().await? {
            warn!("Orchestrator lease held by another invocation");
            return Ok(OrchestratorReport {
                skipped: true,
                reason: Some("locked".to_string()),
                ..Default::default()
            });
        }

        let outcome = self.advance(Instant::now()).await;

        if let Err(e) = self.release_lease().await {
            error!(error = %e, "Failed to release orchestrator lease");
        }
        outcome
    }

    async fn advance(&self, started: Instant) -> Result<OrchestratorReport, ServiceError> {
        let mut report = OrchestratorReport::default();

        loop {
            let state = self.load_state().await?;
            report.phase = Some(state.phase);
            report.total_batches = state.batches_run;

            let phase = state.phase;
            let mut active = state.clone().into_active_model();

            match phase {
                Phase::Stock => {
                    let sync = self.full_sync.run().await?;
                    report.full_sync = Some(sync);
                    active.phase = Set(Phase::Components);
                    active.components_cursor = Set(None);
                    active.bom_cursor = Set(None);
                }
                Phase::Components | Phase::Bom => {
                    let (worker, cursor) = if phase == Phase::Components {
                        (&self.components, state.components_cursor)
                    } else {
                        (&self.bom, state.bom_cursor)
                    };
                    let batch = worker
                        .run_batch(Some(self.settings.batch_limit), cursor.unwrap_or(0))
                        .await?;
                    report.batches_run += 1;
                    active.batches_run = Set(state.batches_run + 1);
                    let next = next_cursor(&batch);
                    if phase == Phase::Components {
                        active.components_cursor = Set(next);
                    } else {
                        active.bom_cursor = Set(next);
                    }
                    if next.is_none() {
                        active.phase = Set(phase.next());
                    }
                }
                Phase::Aggregate => {
                    let aggregation = self.aggregation.run().await?;
                    report.aggregation = Some(aggregation);
                    active.phase = Set(Phase::Idle);
                    active.components_cursor = Set(None);
                    active.bom_cursor = Set(None);
                }
                Phase::Idle => {
                    report.partial = false;
                    return Ok(report);
                }
            }

            active.updated_at = Set(Utc::now());
            let saved = active.update(&*self.db).await.map_err(ServiceError::db_error)?;
            if saved.phase != phase {
                info!(from = %phase, to = %saved.phase, "Orchestrator phase advanced");
                report.phases_completed.push(phase);
            }
            report.phase = Some(saved.phase);
            report.total_batches = saved.batches_run;

            if saved.phase == Phase::Idle {
                report.partial = false;
                return Ok(report);
            }
            if started.elapsed() >= self.settings.budget {
                info!(phase = %saved.phase, "Orchestrator budget spent; resuming next invocation");
                report.partial = true;
                return Ok(report);
            }
        }
    }
}

/// Cursor to persist after a batch; `None` once the sweep is exhausted.
fn next_cursor(batch: &BatchReport) -> Option<i64> {
    if batch.has_more {
        batch.next_cursor
    } else {
        None
    }
}
