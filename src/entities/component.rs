use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::Set;
use serde::{Deserialize, Serialize};

/// One stockable unit mirrored from the marketplace catalog.
///
/// `billbee_product_id` is the natural key; the full stock sync upserts on it and
/// never touches the `*_in_bom` columns, which belong to the BOM aggregation job.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "components")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique)]
    pub billbee_product_id: i64,
    pub sku: Option<String>,
    pub name: Option<String>,
    pub manufacturer: Option<String>,
    pub category: Option<String>,
    pub net_purchase_price: Option<f64>,
    pub stock_available: f64,
    pub stock_committed: f64,
    pub stock_unavailable: f64,
    pub sold_amount: f64,
    pub stock_committed_in_bom: f64,
    pub sold_amount_in_bom: f64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl ActiveModel {
    /// Builds a fresh row for insertion; the derived columns start at zero.
    pub fn for_product(billbee_product_id: i64) -> Self {
        Self {
            billbee_product_id: Set(billbee_product_id),
            sku: Set(None),
            name: Set(None),
            manufacturer: Set(None),
            category: Set(None),
            net_purchase_price: Set(None),
            stock_available: Set(0.0),
            stock_committed: Set(0.0),
            stock_unavailable: Set(0.0),
            sold_amount: Set(0.0),
            stock_committed_in_bom: Set(0.0),
            sold_amount_in_bom: Set(0.0),
            updated_at: Set(Utc::now()),
            ..Default::default()
        }
    }
}
