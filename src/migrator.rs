use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240601_000001_create_components_table::Migration),
            Box::new(m20240601_000002_create_bom_recipes_table::Migration),
            Box::new(m20240601_000003_create_sync_cursors_table::Migration),
            Box::new(m20240601_000004_create_orchestrator_state_table::Migration),
            Box::new(m20240601_000005_create_integration_outbox_table::Migration),
        ]
    }
}

mod m20240601_000001_create_components_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000001_create_components_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Components::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Components::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(Components::BillbeeProductId)
                                .big_integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Components::Sku).string().null())
                        .col(ColumnDef::new(Components::Name).string().null())
                        .col(ColumnDef::new(Components::Manufacturer).string().null())
                        .col(ColumnDef::new(Components::Category).string().null())
                        .col(ColumnDef::new(Components::NetPurchasePrice).double().null())
                        .col(
                            ColumnDef::new(Components::StockAvailable)
                                .double()
                                .not_null()
                                .default(0.0),
                        )
                        .col(
                            ColumnDef::new(Components::StockCommitted)
                                .double()
                                .not_null()
                                .default(0.0),
                        )
                        .col(
                            ColumnDef::new(Components::StockUnavailable)
                                .double()
                                .not_null()
                                .default(0.0),
                        )
                        .col(
                            ColumnDef::new(Components::SoldAmount)
                                .double()
                                .not_null()
                                .default(0.0),
                        )
                        .col(
                            ColumnDef::new(Components::StockCommittedInBom)
                                .double()
                                .not_null()
                                .default(0.0),
                        )
                        .col(
                            ColumnDef::new(Components::SoldAmountInBom)
                                .double()
                                .not_null()
                                .default(0.0),
                        )
                        .col(
                            ColumnDef::new(Components::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // Upsert conflict target
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("ux_components_billbee_product_id")
                        .table(Components::Table)
                        .col(Components::BillbeeProductId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_components_sku")
                        .table(Components::Table)
                        .col(Components::Sku)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Components::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Components {
        Table,
        Id,
        BillbeeProductId,
        Sku,
        Name,
        Manufacturer,
        Category,
        NetPurchasePrice,
        StockAvailable,
        StockCommitted,
        StockUnavailable,
        SoldAmount,
        StockCommittedInBom,
        SoldAmountInBom,
        UpdatedAt,
    }
}

mod m20240601_000002_create_bom_recipes_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000002_create_bom_recipes_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(BomRecipes::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(BomRecipes::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(BomRecipes::BillbeeBomId).big_integer().null())
                        .col(
                            ColumnDef::new(BomRecipes::BillbeeComponentId)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(BomRecipes::Quantity)
                                .double()
                                .not_null()
                                .default(1.0),
                        )
                        .col(
                            ColumnDef::new(BomRecipes::StockCommitted)
                                .double()
                                .not_null()
                                .default(0.0),
                        )
                        .col(
                            ColumnDef::new(BomRecipes::SoldAmount)
                                .double()
                                .not_null()
                                .default(0.0),
                        )
                        .col(
                            ColumnDef::new(BomRecipes::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("ux_bom_recipes_bom_component")
                        .table(BomRecipes::Table)
                        .col(BomRecipes::BillbeeBomId)
                        .col(BomRecipes::BillbeeComponentId)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(BomRecipes::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum BomRecipes {
        Table,
        Id,
        BillbeeBomId,
        BillbeeComponentId,
        Quantity,
        StockCommitted,
        SoldAmount,
        UpdatedAt,
    }
}

mod m20240601_000003_create_sync_cursors_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000003_create_sync_cursors_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(SyncCursors::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(SyncCursors::Kind)
                                .string_len(64)
                                .not_null()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(SyncCursors::NextOffset)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(SyncCursors::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(SyncCursors::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum SyncCursors {
        Table,
        Kind,
        NextOffset,
        UpdatedAt,
    }
}

mod m20240601_000004_create_orchestrator_state_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000004_create_orchestrator_state_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(OrchestratorState::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OrchestratorState::Id)
                                .string_len(32)
                                .not_null()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(OrchestratorState::Phase)
                                .string_len(16)
                                .not_null()
                                .default("idle"),
                        )
                        .col(
                            ColumnDef::new(OrchestratorState::ComponentsCursor)
                                .big_integer()
                                .null(),
                        )
                        .col(ColumnDef::new(OrchestratorState::BomCursor).big_integer().null())
                        .col(
                            ColumnDef::new(OrchestratorState::BatchesRun)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(OrchestratorState::LockedUntil)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(OrchestratorState::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OrchestratorState::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum OrchestratorState {
        Table,
        Id,
        Phase,
        ComponentsCursor,
        BomCursor,
        BatchesRun,
        LockedUntil,
        UpdatedAt,
    }
}

mod m20240601_000005_create_integration_outbox_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000005_create_integration_outbox_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(IntegrationOutbox::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(IntegrationOutbox::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(IntegrationOutbox::Topic)
                                .string_len(64)
                                .not_null(),
                        )
                        .col(ColumnDef::new(IntegrationOutbox::Payload).json().not_null())
                        .col(
                            ColumnDef::new(IntegrationOutbox::Status)
                                .string_len(16)
                                .not_null()
                                .default("pending"),
                        )
                        .col(
                            ColumnDef::new(IntegrationOutbox::RetryCount)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(IntegrationOutbox::AvailableAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(IntegrationOutbox::Error).text().null())
                        .col(
                            ColumnDef::new(IntegrationOutbox::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(IntegrationOutbox::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // Sweep claim scans by status and due time
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_integration_outbox_status_available_at")
                        .table(IntegrationOutbox::Table)
                        .col(IntegrationOutbox::Status)
                        .col(IntegrationOutbox::AvailableAt)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(IntegrationOutbox::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum IntegrationOutbox {
        Table,
        Id,
        Topic,
        Payload,
        Status,
        RetryCount,
        AvailableAt,
        Error,
        CreatedAt,
        UpdatedAt,
    }
}
