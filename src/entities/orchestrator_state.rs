use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Id of the single orchestrator row.
pub const INVENTORY_STATE_ID: &str = "inventory";

/// Pipeline phase. Transitions run strictly in declaration order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Phase {
    #[sea_orm(string_value = "stock")]
    Stock,
    #[sea_orm(string_value = "components")]
    Components,
    #[sea_orm(string_value = "bom")]
    Bom,
    #[sea_orm(string_value = "aggregate")]
    Aggregate,
    #[sea_orm(string_value = "idle")]
    Idle,
}

impl Phase {
    pub fn next(self) -> Phase {
        match self {
            Phase::Stock => Phase::Components,
            Phase::Components => Phase::Bom,
            Phase::Bom => Phase::Aggregate,
            Phase::Aggregate | Phase::Idle => Phase::Idle,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orchestrator_state")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub phase: Phase,
    pub components_cursor: Option<i64>,
    pub bom_cursor: Option<i64>,
    pub batches_run: i64,
    /// Lease held by the running invocation; stale once in the past
    pub locked_until: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
