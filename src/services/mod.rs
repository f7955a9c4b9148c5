pub mod bom_aggregation;
pub mod category_rules;
pub mod cursor_store;
pub mod full_stock_sync;
pub mod orchestrator;
pub mod reserved_amounts;
