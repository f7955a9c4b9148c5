use chrono::Utc;
use metrics::{counter, histogram};
use sea_orm::{
    sea_query::Expr, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QuerySelect,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};

use crate::entities::{bom_recipe, component};
use crate::errors::ServiceError;

/// Recipe columns the aggregation reads.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecipeInput {
    pub component_id: i64,
    pub quantity: f64,
    pub stock_committed: f64,
    pub sold_amount: f64,
}

/// Per-component totals pushed down from assemblies.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BomTotals {
    pub stock_committed_in_bom: f64,
    pub sold_amount_in_bom: f64,
}

/// Sums `quantity × committed` and `quantity × sold` per component.
///
/// The result holds exactly the components referenced by at least one recipe.
/// Non-finite inputs contribute nothing.
pub fn accumulate<I>(recipes: I) -> BTreeMap<i64, BomTotals>
where
    I: IntoIterator<Item = RecipeInput>,
{
    let mut totals: BTreeMap<i64, BomTotals> = BTreeMap::new();
    for recipe in recipes {
        let entry = totals.entry(recipe.component_id).or_default();
        let committed = recipe.quantity * recipe.stock_committed;
        let sold = recipe.quantity * recipe.sold_amount;
        if committed.is_finite() {
            entry.stock_committed_in_bom += committed;
        }
        if sold.is_finite() {
            entry.sold_amount_in_bom += sold;
        }
    }
    totals
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationReport {
    pub recipes_read: u64,
    pub components_touched: u64,
    pub updated_count: u64,
    pub failed_count: u64,
    /// Referenced components with no row in `components`
    pub missing_count: u64,
    pub updated_ids: Vec<i64>,
    pub duration_ms: u64,
}

/// Full recompute of `components.*_in_bom` from `bom_recipes`.
#[derive(Clone)]
pub struct BomAggregation {
    db: Arc<DatabaseConnection>,
}

impl BomAggregation {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<AggregationReport, ServiceError> {
        let started = Instant::now();
        let db = &*self.db;

        let rows: Vec<(i64, f64, f64, f64)> = bom_recipe::Entity::find()
            .select_only()
            .column(bom_recipe::Column::BillbeeComponentId)
            .column(bom_recipe::Column::Quantity)
            .column(bom_recipe::Column::StockCommitted)
            .column(bom_recipe::Column::SoldAmount)
            .into_tuple()
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let mut report = AggregationReport {
            recipes_read: rows.len() as u64,
            ..Default::default()
        };

        let totals = accumulate(rows.into_iter().map(
            |(component_id, quantity, stock_committed, sold_amount)| RecipeInput {
                component_id,
                quantity,
                stock_committed,
                sold_amount,
            },
        ));
        report.components_touched = totals.len() as u64;

        let now = Utc::now();
        for (component_id, total) in totals {
            let result = component::Entity::update_many()
                .col_expr(
                    component::Column::StockCommittedInBom,
                    Expr::value(total.stock_committed_in_bom),
                )
                .col_expr(
                    component::Column::SoldAmountInBom,
                    Expr::value(total.sold_amount_in_bom),
                )
                .col_expr(component::Column::UpdatedAt, Expr::value(now))
                .filter(component::Column::BillbeeProductId.eq(component_id))
                .exec(db)
                .await;

            match result {
                Ok(r) if r.rows_affected > 0 => {
                    report.updated_count += 1;
                    report.updated_ids.push(component_id);
                }
                Ok(_) => report.missing_count += 1,
                Err(e) => {
                    warn!(component_id, error = %e, "BOM total update failed");
                    report.failed_count += 1;
                }
            }
        }

        let elapsed = started.elapsed();
        report.duration_ms = elapsed.as_millis() as u64;
        histogram!("inventory_sync.aggregation.duration", elapsed);
        counter!("inventory_sync.aggregation.updated", report.updated_count);
        if report.failed_count > 0 {
            counter!("inventory_sync.aggregation.failed", report.failed_count);
        }

        info!(
            recipes = report.recipes_read,
            updated = report.updated_count,
            failed = report.failed_count,
            missing = report.missing_count,
            "BOM aggregation finished"
        );
        Ok(report)
    }
}
