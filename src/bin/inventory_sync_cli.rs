use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use inventory_sync::{
    billbee::BillbeeClient,
    config::{self, AppConfig},
    db,
    events::{self, DispatchReport, DispatchRequest},
    services::{
        bom_aggregation::AggregationReport,
        full_stock_sync::FullSyncReport,
        orchestrator::OrchestratorReport,
        reserved_amounts::{BatchReport, BatchRequest},
    },
    AppState,
};
use serde::Serialize;
use tracing::debug;

#[derive(Parser)]
#[command(
    name = "inventory-sync-cli",
    about = "Run a single inventory sync job and print its metrics",
    version
)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Print the raw job metrics as pretty JSON"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,
    /// Mirror the marketplace catalog into components and BOM recipes
    FullSync,
    /// Refresh reserved amounts of components for one batch
    ReservedComponents(BatchArgs),
    /// Refresh reserved amounts of assemblies for one batch
    ReservedBom(BatchArgs),
    /// Push assembly reservations down to their components
    Aggregate,
    /// Advance the pipeline state machine within its time budget
    Orchestrate(OrchestrateArgs),
    /// Deliver queued stock deltas to the marketplace
    Dispatch(DispatchArgs),
    /// Queue a stock delta for a marketplace product
    Enqueue(EnqueueArgs),
}

#[derive(Args)]
struct BatchArgs {
    #[arg(long, help = "Rows to process (defaults to the configured batch size)")]
    limit: Option<u64>,
    #[arg(long, help = "Start offset; omitted means resume from the stored cursor")]
    cursor: Option<i64>,
}

#[derive(Args)]
struct OrchestrateArgs {
    #[arg(long, action = ArgAction::SetTrue, help = "Start a fresh cycle first")]
    reset: bool,
}

#[derive(Args)]
struct DispatchArgs {
    #[arg(long, conflicts_with = "sweep", help = "Deliver a single outbox row")]
    outbox_id: Option<i64>,
    #[arg(long, action = ArgAction::SetTrue, help = "Deliver every due row (default)")]
    sweep: bool,
}

#[derive(Args)]
struct EnqueueArgs {
    #[arg(long, help = "Marketplace product id")]
    product_id: i64,
    #[arg(long, allow_hyphen_values = true, help = "Signed stock change")]
    delta: f64,
    #[arg(long, help = "Free-form reason stored with the event")]
    reason: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Enqueued {
    outbox_id: i64,
    product_id: i64,
    delta: f64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::load_config().context("failed to load application config")?;
    config::init_tracing(config.log_level(), config.log_json);

    let pool = db::establish_connection_from_app_config(&config)
        .await
        .context("failed to connect to database")?;

    if let Commands::Migrate = cli.command {
        db::run_migrations(&pool).await.context("running migrations")?;
        println!("Migrations applied");
        return Ok(());
    }

    let state = build_state(pool, config)?;
    match cli.command {
        Commands::Migrate => {}
        Commands::FullSync => {
            let report = state.full_sync.run().await.context("full stock sync failed")?;
            render(&report, cli.json, render_full_sync)?;
        }
        Commands::ReservedComponents(args) => {
            let report = state
                .components_worker
                .run(args.into())
                .await
                .context("component reserved-amount batch failed")?;
            render(&report, cli.json, render_batch)?;
        }
        Commands::ReservedBom(args) => {
            let report = state
                .bom_worker
                .run(args.into())
                .await
                .context("BOM reserved-amount batch failed")?;
            render(&report, cli.json, render_batch)?;
        }
        Commands::Aggregate => {
            let report = state.aggregation.run().await.context("BOM aggregation failed")?;
            render(&report, cli.json, render_aggregation)?;
        }
        Commands::Orchestrate(args) => {
            if args.reset {
                let phase = state
                    .orchestrator
                    .start_cycle(true)
                    .await
                    .context("failed to reset the cycle")?;
                debug!(%phase, "Cycle reset");
            }
            let report = state.orchestrator.run().await.context("orchestrator failed")?;
            render(&report, cli.json, render_orchestrator)?;
        }
        Commands::Dispatch(args) => {
            let request = DispatchRequest {
                outbox_id: args.outbox_id,
                sweep: args.sweep.then_some(true),
            };
            let report = state
                .dispatcher
                .dispatch(request)
                .await
                .context("outbox dispatch failed")?;
            render(&report, cli.json, render_dispatch)?;
        }
        Commands::Enqueue(args) => {
            if args.product_id <= 0 {
                bail!("--product-id must be positive");
            }
            let outbox_id =
                events::enqueue_stock_delta(&*state.db, args.product_id, args.delta, args.reason)
                    .await
                    .context("failed to enqueue stock delta")?;
            let enqueued = Enqueued {
                outbox_id,
                product_id: args.product_id,
                delta: args.delta,
            };
            render(&enqueued, cli.json, |e| {
                println!(
                    "Queued outbox row {} • product {} • delta {}",
                    e.outbox_id, e.product_id, e.delta
                )
            })?;
        }
    }

    Ok(())
}

fn build_state(pool: db::DbPool, config: AppConfig) -> Result<AppState> {
    let client = BillbeeClient::new(&config.billbee).context("failed to build the Billbee client")?;
    Ok(AppState::new(Arc::new(pool), Arc::new(client), config))
}

impl From<BatchArgs> for BatchRequest {
    fn from(args: BatchArgs) -> Self {
        BatchRequest {
            limit: args.limit,
            cursor: args.cursor,
        }
    }
}

fn render<T: Serialize>(value: &T, json: bool, human: impl FnOnce(&T)) -> Result<()> {
    if json {
        print_json(value)
    } else {
        human(value);
        Ok(())
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn render_full_sync(r: &FullSyncReport) {
    println!(
        "Full sync: {} pages • {} products • {} components • {} recipes ({} ms)",
        r.pages, r.products_seen, r.components_upserted, r.recipes_upserted, r.duration_ms
    );
    println!(
        "  skipped: {} inactive • {} excluded • {} other types • {} malformed • {} unresolved lines • {} invalid lines • {} failed writes",
        r.skipped_inactive,
        r.skipped_excluded,
        r.skipped_other_types,
        r.skipped_malformed,
        r.unresolved_lines,
        r.invalid_lines,
        r.failed_writes
    );
}

fn render_batch(r: &BatchReport) {
    let next = r
        .next_cursor
        .map_or_else(|| "-".to_string(), |c| c.to_string());
    println!(
        "Batch: {} processed • {} skipped • {} updated • more: {} • next cursor: {}",
        r.processed, r.skipped, r.updated_count, r.has_more, next
    );
}

fn render_aggregation(r: &AggregationReport) {
    println!(
        "Aggregation: {} recipes • {} components • {} updated • {} failed • {} missing ({} ms)",
        r.recipes_read,
        r.components_touched,
        r.updated_count,
        r.failed_count,
        r.missing_count,
        r.duration_ms
    );
}

fn render_orchestrator(r: &OrchestratorReport) {
    if r.skipped {
        println!(
            "Orchestrator skipped: {}",
            r.reason.as_deref().unwrap_or("unknown")
        );
        return;
    }
    let phase = r
        .phase
        .map_or_else(|| "-".to_string(), |p| p.to_string());
    let completed: Vec<String> = r.phases_completed.iter().map(|p| p.to_string()).collect();
    println!(
        "Orchestrator: phase {} • partial: {} • completed [{}] • {} batches ({} this cycle)",
        phase,
        r.partial,
        completed.join(", "),
        r.batches_run,
        r.total_batches
    );
}

fn render_dispatch(r: &DispatchReport) {
    println!(
        "Dispatch ({}): {} claimed ({} reclaimed) • {} skipped • {} done • {} errored • {} products",
        r.mode, r.claimed, r.reclaimed, r.skipped, r.done, r.errored, r.products
    );
}
