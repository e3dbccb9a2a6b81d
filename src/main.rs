use std::{str::FromStr, sync::Arc};

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;

use batchline::{
    config, db,
    entities::{purchase_order::PurchaseOrderStatus, wip_batch::BatchStatus},
    events,
    services::{
        requirements::{DemandLine, PlanTarget, ReportScope},
        wip::AllocationLine,
    },
    AppState,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let cfg = config::load_config().context("failed to load application config")?;
    config::init_tracing(&cfg.log_level, cfg.log_json);

    let db_pool = db::establish_connection_from_app_config(&cfg)
        .await
        .context("failed to connect to database")?;
    db::check_connection(&db_pool)
        .await
        .context("database did not answer ping")?;
    if cfg.auto_migrate || matches!(cli.command, Commands::Migrate) {
        db::run_migrations(&db_pool)
            .await
            .context("failed running migrations")?;
    }

    let (state, event_rx) = AppState::new(Arc::new(db_pool), cfg);
    let processor = tokio::spawn(events::process_events(event_rx));

    run(&state, cli.command).await?;

    drop(state);
    processor.await.context("event processor panicked")?;
    Ok(())
}

#[derive(Parser)]
#[command(
    name = "batchline",
    about = "Recipe requirements, WIP batches and inventory ledger",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,
    /// Flatten a recipe into raw ingredients for one batch
    Resolve(ResolveArgs),
    /// Shortfall against stock minimums
    Requirements(RequirementsArgs),
    /// Shortfall for an ad-hoc production plan
    Plan(PlanArgs),
    /// Per-batch ingredient totals across every recipe
    Totals,
    Dashboard,
    #[command(subcommand)]
    Batch(BatchCommands),
    #[command(subcommand)]
    Po(PoCommands),
    #[command(subcommand)]
    Inventory(InventoryCommands),
}

#[derive(Args)]
struct ResolveArgs {
    #[arg(help = "Recipe id")]
    recipe_id: i32,
}

#[derive(Args)]
struct RequirementsArgs {
    #[arg(long, help = "Months of stock minimums to cover (defaults to configuration)")]
    forecast_months: Option<u32>,
    #[arg(
        long,
        value_parser = ReportScope::from_str,
        help = "Rows to report when listing raw demand: shortages-only, demanded or with-surplus"
    )]
    scope: Option<ReportScope>,
}

#[derive(Args)]
struct PlanArgs {
    #[arg(
        long = "target",
        value_parser = parse_plan_target,
        action = ArgAction::Append,
        required = true,
        help = "Production target as product_id=jars (e.g. 4=120)"
    )]
    targets: Vec<PlanTarget>,
}

#[derive(Subcommand)]
enum BatchCommands {
    StartProduct(StartProductArgs),
    StartIntermediate(StartIntermediateArgs),
    Show(BatchIdArgs),
    List(ListBatchesArgs),
    Allocate(AllocateArgs),
    Complete(CompleteArgs),
    Delete(BatchIdArgs),
}

#[derive(Args)]
struct StartProductArgs {
    #[arg(long)]
    product_id: i32,
    #[arg(long)]
    location_id: i32,
    #[arg(long, value_parser = parse_decimal, help = "Planned jars")]
    target_jars: Option<Decimal>,
}

#[derive(Args)]
struct StartIntermediateArgs {
    #[arg(long, help = "Inventory item the batch produces")]
    item_id: i32,
    #[arg(long, value_parser = parse_decimal)]
    target_quantity: Option<Decimal>,
}

#[derive(Args)]
struct BatchIdArgs {
    batch_id: i32,
}

#[derive(Args)]
struct ListBatchesArgs {
    #[arg(long, action = ArgAction::SetTrue, help = "Only batches still in progress")]
    in_progress: bool,
}

#[derive(Args)]
struct AllocateArgs {
    batch_id: i32,
    #[arg(
        long = "line",
        value_parser = parse_allocation_line,
        action = ArgAction::Append,
        required = true,
        help = "Allocation as item_id=quantity; repeat for an all-or-nothing bulk allocation"
    )]
    lines: Vec<AllocationLine>,
}

#[derive(Args)]
struct CompleteArgs {
    batch_id: i32,
    #[arg(long, value_parser = parse_decimal, help = "Actual output of the batch")]
    actual_yield: Decimal,
}

#[derive(Subcommand)]
enum PoCommands {
    Show(PoIdArgs),
    Status(PoStatusArgs),
    Delete(PoIdArgs),
}

#[derive(Args)]
struct PoIdArgs {
    po_id: i32,
}

#[derive(Args)]
struct PoStatusArgs {
    po_id: i32,
    #[arg(value_parser = PurchaseOrderStatus::from_str, help = "Draft, Placed, Shipped, Received or Cancelled")]
    status: PurchaseOrderStatus,
}

#[derive(Subcommand)]
enum InventoryCommands {
    List,
    Adjust(AdjustArgs),
    Log(LogArgs),
}

#[derive(Args)]
struct AdjustArgs {
    item_id: i32,
    #[arg(long, value_parser = parse_decimal, allow_hyphen_values = true, help = "Signed change to on-hand")]
    delta: Decimal,
    #[arg(long)]
    reason: Option<String>,
}

#[derive(Args)]
struct LogArgs {
    #[arg(long)]
    item_id: Option<i32>,
    #[arg(long, default_value_t = 50)]
    limit: u64,
}

async fn run(state: &AppState, command: Commands) -> Result<()> {
    let services = &state.services;
    match command {
        Commands::Migrate => {
            info!("Migrations applied");
            Ok(())
        }
        Commands::Resolve(args) => print_json(&services.bom.resolve(args.recipe_id).await?),
        Commands::Requirements(args) => match args.scope {
            None => print_json(
                &services
                    .requirements
                    .stock_requirements(args.forecast_months)
                    .await?,
            ),
            Some(scope) => {
                let report = services
                    .requirements
                    .stock_requirements(args.forecast_months)
                    .await?;
                let demand: Vec<_> = report
                    .products
                    .iter()
                    .map(|p| DemandLine {
                        recipe_id: p.recipe_id,
                        batches: p.batches,
                    })
                    .collect();
                print_json(
                    &services
                        .requirements
                        .compute_requirements(&demand, scope)
                        .await?,
                )
            }
        },
        Commands::Plan(args) => {
            print_json(&services.requirements.plan_production(&args.targets).await?)
        }
        Commands::Totals => print_json(&services.requirements.ingredient_totals().await?),
        Commands::Dashboard => print_json(&services.requirements.dashboard().await?),
        Commands::Batch(command) => run_batch(state, command).await,
        Commands::Po(command) => run_po(state, command).await,
        Commands::Inventory(command) => run_inventory(state, command).await,
    }
}

async fn run_batch(state: &AppState, command: BatchCommands) -> Result<()> {
    let wip = &state.services.wip;
    match command {
        BatchCommands::StartProduct(args) => print_json(
            &wip.start_product_batch(args.product_id, args.location_id, args.target_jars)
                .await?,
        ),
        BatchCommands::StartIntermediate(args) => print_json(
            &wip.start_intermediate_batch(args.item_id, args.target_quantity)
                .await?,
        ),
        BatchCommands::Show(args) => print_json(&wip.batch_requirements(args.batch_id).await?),
        BatchCommands::List(args) => {
            let status = args.in_progress.then_some(BatchStatus::InProgress);
            print_json(&wip.list_batches(status).await?)
        }
        BatchCommands::Allocate(args) => {
            print_json(&wip.bulk_allocate(args.batch_id, &args.lines).await?)
        }
        BatchCommands::Complete(args) => {
            print_json(&wip.complete(args.batch_id, args.actual_yield).await?)
        }
        BatchCommands::Delete(args) => {
            wip.delete_batch(args.batch_id).await?;
            println!("Deleted WIP batch {}", args.batch_id);
            Ok(())
        }
    }
}

async fn run_po(state: &AppState, command: PoCommands) -> Result<()> {
    let orders = &state.services.purchase_orders;
    match command {
        PoCommands::Show(args) => print_json(&orders.get_order(args.po_id).await?),
        PoCommands::Status(args) => {
            print_json(&orders.set_status(args.po_id, args.status).await?)
        }
        PoCommands::Delete(args) => {
            orders.delete_order(args.po_id).await?;
            println!("Deleted purchase order {}", args.po_id);
            Ok(())
        }
    }
}

async fn run_inventory(state: &AppState, command: InventoryCommands) -> Result<()> {
    let inventory = &state.services.inventory;
    match command {
        InventoryCommands::List => print_json(&inventory.list_items().await?),
        InventoryCommands::Adjust(args) => print_json(
            &inventory
                .adjust(args.item_id, args.delta, args.reason)
                .await?,
        ),
        InventoryCommands::Log(args) => print_json(
            &inventory
                .adjustment_log(args.item_id, Some(args.limit))
                .await?,
        ),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_decimal(raw: &str) -> Result<Decimal, String> {
    Decimal::from_str(raw).map_err(|_| format!("invalid decimal '{raw}'"))
}

fn parse_pair(raw: &str) -> Result<(i32, Decimal), String> {
    let (id, quantity) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected id=quantity, got '{raw}'"))?;
    let id = id
        .trim()
        .parse()
        .map_err(|_| format!("invalid id '{}'", id.trim()))?;
    Ok((id, parse_decimal(quantity.trim())?))
}

fn parse_plan_target(raw: &str) -> Result<PlanTarget, String> {
    let (product_id, jars) = parse_pair(raw)?;
    Ok(PlanTarget { product_id, jars })
}

fn parse_allocation_line(raw: &str) -> Result<AllocationLine, String> {
    let (item_id, quantity) = parse_pair(raw)?;
    Ok(AllocationLine { item_id, quantity })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn parses_id_quantity_pairs() {
        assert_eq!(parse_pair("4=120").unwrap(), (4, dec!(120)));
        assert_eq!(parse_pair(" 7 = 2.5 ").unwrap(), (7, dec!(2.5)));
        assert!(parse_pair("4:120").is_err());
        assert!(parse_pair("x=1").is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
