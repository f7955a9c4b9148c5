pub mod bom_recipe;
pub mod component;
pub mod integration_outbox;
pub mod orchestrator_state;
pub mod sync_cursor;

pub use bom_recipe::Entity as BomRecipe;
pub use component::Entity as Component;
pub use integration_outbox::{Entity as IntegrationOutbox, OutboxStatus};
pub use orchestrator_state::{Entity as OrchestratorState, Phase, INVENTORY_STATE_ID};
pub use sync_cursor::Entity as SyncCursor;
