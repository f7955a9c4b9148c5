use anyhow::Context;
use inventory_sync::{
    config,
    db::{self, DbConfig},
    migrator::Migrator,
};
use sea_orm_migration::MigratorTrait;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::load_config().context("loading configuration")?;
    config::init_tracing(cfg.log_level(), cfg.log_json);

    let rollback = std::env::args().any(|arg| arg == "--down");

    info!("Connecting to database for migrations");
    let pool = db::establish_connection_with_config(&DbConfig::from(&cfg))
        .await
        .context("connecting to database")?;

    if rollback {
        info!("Rolling back the most recent migration");
        Migrator::down(&pool, Some(1))
            .await
            .context("rolling back migration")?;
    } else {
        db::run_migrations(&pool)
            .await
            .context("running migrations")?;
    }

    info!("Migration completed successfully");
    Ok(())
}
