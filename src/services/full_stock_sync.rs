use chrono::Utc;
use metrics::{counter, histogram};
use sea_orm::{
    sea_query::OnConflict, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::billbee::{Product, StockApi};
use crate::entities::{bom_recipe, component};
use crate::errors::ServiceError;
use crate::services::category_rules::CategoryRules;

/// Rows per INSERT statement; keeps bind parameters well below SQLite's limit.
const UPSERT_CHUNK: usize = 50;

/// Outcome of one full catalog pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullSyncReport {
    pub pages: u32,
    pub products_seen: u64,
    pub components_upserted: u64,
    pub recipes_upserted: u64,
    pub skipped_inactive: u64,
    pub skipped_excluded: u64,
    pub skipped_other_types: u64,
    pub unresolved_lines: u64,
    pub invalid_lines: u64,
    /// Catalog items that did not decode; logged with their id and left out
    pub skipped_malformed: u64,
    /// Rows whose upsert chunk failed; the pass continues with the next chunk
    pub failed_writes: u64,
    pub duration_ms: u64,
}

/// A bill-of-materials line that only names its component by SKU.
#[derive(Debug, Clone)]
struct PendingSkuLine {
    bom_id: i64,
    sku: String,
    amount: f64,
    stock_committed: f64,
    sold_amount: f64,
}

fn sku_key(sku: &str) -> String {
    sku.trim().to_lowercase()
}

fn finite_or_zero(value: Option<f64>) -> f64 {
    value.filter(|v| v.is_finite()).unwrap_or(0.0)
}

/// Rebuilds `components` and `bom_recipes` from the full marketplace catalog.
///
/// Pages through the catalog until a short or empty page. Upserts are keyed on
/// natural ids, so re-running from scratch is always safe. A failed catalog
/// fetch aborts the run. A malformed item is counted in `skipped_malformed` and
/// a failed upsert chunk in `failed_writes`; neither stops the pass.
#[derive(Clone)]
pub struct FullStockSync {
    db: Arc<DatabaseConnection>,
    api: Arc<dyn StockApi>,
    rules: CategoryRules,
    page_size: u32,
}

impl FullStockSync {
    pub fn new(
        db: Arc<DatabaseConnection>,
        api: Arc<dyn StockApi>,
        rules: CategoryRules,
        page_size: u32,
    ) -> Self {
        Self {
            db,
            api,
            rules,
            page_size: page_size.clamp(1, 249),
        }
    }

    #[instrument(skip(self), fields(page_size = self.page_size))]
    pub async fn run(&self) -> Result<FullSyncReport, ServiceError> {
        let started = Instant::now();
        let mut report = FullSyncReport::default();
        let mut skus_seen: HashMap<String, i64> = HashMap::new();
        let mut pending_sku_lines: Vec<PendingSkuLine> = Vec::new();
        let mut page = 1u32;

        loop {
            let result = self.api.list_products(page, self.page_size).await.map_err(|e| {
                error!(page, error = %e, "Catalog page fetch failed");
                ServiceError::from(e)
            })?;
            let fetched = result.returned();
            if fetched == 0 {
                break;
            }
            report.pages += 1;
            report.products_seen += fetched as u64;
            for bad in &result.malformed {
                warn!(
                    page,
                    product_id = ?bad.id,
                    error = %bad.error,
                    "Skipping malformed catalog item"
                );
            }
            report.skipped_malformed += result.malformed.len() as u64;

            for product in result.items.iter().filter(|p| p.is_component()) {
                if let Some(sku) = product.sku.as_deref().filter(|s| !s.trim().is_empty()) {
                    skus_seen.insert(sku_key(sku), product.id);
                }
            }

            let mut components: BTreeMap<i64, component::ActiveModel> = BTreeMap::new();
            let mut recipes: BTreeMap<(i64, i64), RecipeRow> = BTreeMap::new();

            for product in &result.items {
                if product.is_deactivated() {
                    report.skipped_inactive += 1;
                    continue;
                }

                if product.is_component() {
                    if self.rules.is_excluded(&product.category_names()) {
                        report.skipped_excluded += 1;
                        continue;
                    }
                    components.insert(product.id, self.component_row(product));
                } else if product.is_assembly() {
                    self.collect_recipe_lines(
                        product,
                        &skus_seen,
                        &mut recipes,
                        &mut pending_sku_lines,
                        &mut report,
                    );
                } else {
                    report.skipped_other_types += 1;
                }
            }

            self.upsert_components(components.into_values().collect(), &mut report)
                .await;
            self.upsert_recipes(recipes, &mut report).await;

            debug!(page, fetched, total_pages = result.total_pages, "Processed catalog page");

            let short_page = fetched < self.page_size as usize;
            let last_page = result.total_pages > 0 && page >= result.total_pages;
            if short_page || last_page {
                break;
            }
            page += 1;
        }

        if !pending_sku_lines.is_empty() {
            let recipes = self
                .resolve_sku_lines(pending_sku_lines, &skus_seen, &mut report)
                .await?;
            self.upsert_recipes(recipes, &mut report).await;
        }

        let elapsed = started.elapsed();
        report.duration_ms = elapsed.as_millis() as u64;
        histogram!("inventory_sync.full_sync.duration", elapsed);
        counter!("inventory_sync.full_sync.components_upserted", report.components_upserted);
        counter!("inventory_sync.full_sync.recipes_upserted", report.recipes_upserted);

        info!(
            pages = report.pages,
            components = report.components_upserted,
            recipes = report.recipes_upserted,
            skipped_inactive = report.skipped_inactive,
            skipped_excluded = report.skipped_excluded,
            skipped_malformed = report.skipped_malformed,
            unresolved_lines = report.unresolved_lines,
            "Full stock sync finished"
        );
        Ok(report)
    }

    fn component_row(&self, product: &Product) -> component::ActiveModel {
        let mut row = component::ActiveModel::for_product(product.id);
        row.sku = Set(product.sku.clone());
        row.name = Set(product.display_name());
        row.manufacturer = Set(product.manufacturer.clone());
        row.category = Set(self.rules.resolve(&product.category_names()));
        row.net_purchase_price = Set(product.cost_price_net.filter(|v| v.is_finite()));
        row.stock_available = Set(finite_or_zero(Some(product.stock_available())));
        row.stock_unavailable = Set(finite_or_zero(Some(product.stock_unavailable())));
        row.stock_committed = Set(finite_or_zero(product.stock_reserved_amount));
        row.sold_amount = Set(finite_or_zero(product.sold_amount));
        row
    }

    fn collect_recipe_lines(
        &self,
        product: &Product,
        skus_seen: &HashMap<String, i64>,
        recipes: &mut BTreeMap<(i64, i64), RecipeRow>,
        pending: &mut Vec<PendingSkuLine>,
        report: &mut FullSyncReport,
    ) {
        let stock_committed = finite_or_zero(product.stock_reserved_amount);
        let sold_amount = finite_or_zero(product.sold_amount);

        for line in product.bom_lines() {
            let amount = match line.amount {
                Some(a) if a.is_finite() && a > 0.0 => a,
                _ => {
                    warn!(bom_id = product.id, ?line, "Skipping BOM line without a usable amount");
                    report.invalid_lines += 1;
                    continue;
                }
            };

            let component_id = line.article_id.or_else(|| {
                line.sku
                    .as_deref()
                    .and_then(|sku| skus_seen.get(&sku_key(sku)).copied())
            });

            match (component_id, line.sku.as_deref()) {
                (Some(component_id), _) => {
                    recipes
                        .entry((product.id, component_id))
                        .or_insert_with(|| RecipeRow::new(stock_committed, sold_amount))
                        .quantity += amount;
                }
                (None, Some(sku)) if !sku.trim().is_empty() => pending.push(PendingSkuLine {
                    bom_id: product.id,
                    sku: sku.to_string(),
                    amount,
                    stock_committed,
                    sold_amount,
                }),
                _ => {
                    warn!(bom_id = product.id, "BOM line names neither article id nor SKU");
                    report.unresolved_lines += 1;
                }
            }
        }
    }

    /// Resolves SKU-only lines against the whole catalog pass, then the stored components.
    async fn resolve_sku_lines(
        &self,
        lines: Vec<PendingSkuLine>,
        skus_seen: &HashMap<String, i64>,
        report: &mut FullSyncReport,
    ) -> Result<BTreeMap<(i64, i64), RecipeRow>, ServiceError> {
        let unknown: Vec<String> = lines
            .iter()
            .filter(|l| !skus_seen.contains_key(&sku_key(&l.sku)))
            .map(|l| l.sku.trim().to_string())
            .collect();

        let mut stored: HashMap<String, i64> = HashMap::new();
        if !unknown.is_empty() {
            let rows = component::Entity::find()
                .filter(component::Column::Sku.is_in(unknown))
                .all(&*self.db)
                .await
                .map_err(ServiceError::db_error)?;
            for row in rows {
                if let Some(sku) = row.sku.as_deref() {
                    stored.insert(sku_key(sku), row.billbee_product_id);
                }
            }
        }

        let mut recipes: BTreeMap<(i64, i64), RecipeRow> = BTreeMap::new();
        for line in lines {
            let key = sku_key(&line.sku);
            match skus_seen.get(&key).or_else(|| stored.get(&key)) {
                Some(&component_id) => {
                    recipes
                        .entry((line.bom_id, component_id))
                        .or_insert_with(|| RecipeRow::new(line.stock_committed, line.sold_amount))
                        .quantity += line.amount;
                }
                None => {
                    warn!(bom_id = line.bom_id, sku = %line.sku, "Unresolved BOM component SKU");
                    report.unresolved_lines += 1;
                }
            }
        }
        Ok(recipes)
    }

    /// Upserts in chunks. A failed chunk is logged and counted, not fatal.
    async fn upsert_components(
        &self,
        rows: Vec<component::ActiveModel>,
        report: &mut FullSyncReport,
    ) {
        for chunk in rows.chunks(UPSERT_CHUNK) {
            let result = component::Entity::insert_many(chunk.to_vec())
                .on_conflict(
                    OnConflict::column(component::Column::BillbeeProductId)
                        .update_columns([
                            component::Column::Sku,
                            component::Column::Name,
                            component::Column::Manufacturer,
                            component::Column::Category,
                            component::Column::NetPurchasePrice,
                            component::Column::StockAvailable,
                            component::Column::StockCommitted,
                            component::Column::StockUnavailable,
                            component::Column::SoldAmount,
                            component::Column::UpdatedAt,
                        ])
                        .to_owned(),
                )
                .exec_without_returning(&*self.db)
                .await;
            match result {
                Ok(_) => report.components_upserted += chunk.len() as u64,
                Err(e) => {
                    let ids: Vec<i64> = chunk
                        .iter()
                        .filter_map(|row| row.billbee_product_id.clone().take())
                        .collect();
                    error!(error = %e, ?ids, "Component upsert failed");
                    report.failed_writes += chunk.len() as u64;
                }
            }
        }
    }

    async fn upsert_recipes(
        &self,
        recipes: BTreeMap<(i64, i64), RecipeRow>,
        report: &mut FullSyncReport,
    ) {
        let now = Utc::now();
        let rows: Vec<bom_recipe::ActiveModel> = recipes
            .into_iter()
            .map(|((bom_id, component_id), row)| bom_recipe::ActiveModel {
                billbee_bom_id: Set(Some(bom_id)),
                billbee_component_id: Set(component_id),
                quantity: Set(row.quantity),
                stock_committed: Set(row.stock_committed),
                sold_amount: Set(row.sold_amount),
                updated_at: Set(now),
                ..Default::default()
            })
            .collect();

        for chunk in rows.chunks(UPSERT_CHUNK) {
            let result = bom_recipe::Entity::insert_many(chunk.to_vec())
                .on_conflict(
                    OnConflict::columns([
                        bom_recipe::Column::BillbeeBomId,
                        bom_recipe::Column::BillbeeComponentId,
                    ])
                    .update_columns([
                        bom_recipe::Column::Quantity,
                        bom_recipe::Column::StockCommitted,
                        bom_recipe::Column::SoldAmount,
                        bom_recipe::Column::UpdatedAt,
                    ])
                    .to_owned(),
                )
                .exec_without_returning(&*self.db)
                .await;
            match result {
                Ok(_) => report.recipes_upserted += chunk.len() as u64,
                Err(e) => {
                    let bom_ids: Vec<i64> = chunk
                        .iter()
                        .filter_map(|row| row.billbee_bom_id.clone().take().flatten())
                        .collect();
                    error!(error = %e, ?bom_ids, "BOM recipe upsert failed");
                    report.failed_writes += chunk.len() as u64;
                }
            }
        }
    }
}

/// Merged quantity of one (assembly, component) pair.
#[derive(Debug, Clone)]
struct RecipeRow {
    quantity: f64,
    stock_committed: f64,
    sold_amount: f64,
}

impl RecipeRow {
    fn new(stock_committed: f64, sold_amount: f64) -> Self {
        Self {
            quantity: 0.0,
            stock_committed,
            sold_amount,
        }
    }
}
