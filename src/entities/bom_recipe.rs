use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One bill-of-materials line: assembly `billbee_bom_id` consumes `quantity`
/// units of `billbee_component_id`.
///
/// `stock_committed` and `sold_amount` describe the assembly, not the component.
/// Unique per (`billbee_bom_id`, `billbee_component_id`).
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "bom_recipes")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Assembly product id; rows without one are skipped by the reserved-amount worker
    pub billbee_bom_id: Option<i64>,
    pub billbee_component_id: i64,
    pub quantity: f64,
    pub stock_committed: f64,
    pub sold_amount: f64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
