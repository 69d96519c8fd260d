//! pbs: privacy budget coordinator service and operator CLI.

use std::path::PathBuf;
use std::sync::Arc;

use pbs_client::{BudgetGate, Clearance, DistributedPrivacyBudgetClient};
use pbs_core::{BudgetConfig, PrivacyBudgetUnit};
use pbs_ledger::{BudgetLedger, RecordTtl, SqliteLedger};
use pbs_server::{build_router, AppState};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn load_config() -> anyhow::Result<BudgetConfig> {
    let path = std::env::var("PBS_CONFIG").map(PathBuf::from).ok();
    Ok(BudgetConfig::load(path.as_deref())?)
}

fn open_ledger(config: &BudgetConfig) -> anyhow::Result<SqliteLedger> {
    let ttl = RecordTtl::new(
        config.reporting_window_offset_days,
        config.record_ttl_buffer_days,
    );
    SqliteLedger::open(config.ledger_path(), ttl)
        .map_err(|e| anyhow::anyhow!("Failed to open ledger: {}", e))
}

fn print_help() {
    println!("pbs: privacy budget coordinator");
    println!();
    println!("Usage: pbs [command]");
    println!();
    println!("Commands:");
    println!("  (none) | serve                      Start the coordinator budget service");
    println!("  consume <origin> <key>@<time>...    Clear units against all configured coordinators");
    println!("  purge                               Delete expired ledger records");
    println!("  help                                Show this help message");
    println!();
    println!("Configuration is read from the JSON file named by PBS_CONFIG, then PBS_* variables.");
}

async fn serve(config: BudgetConfig) -> anyhow::Result<()> {
    info!("Data directory: {}", config.data_dir.display());
    let ledger = open_ledger(&config)?;
    if config.allowed_identities.is_empty() {
        warn!("No allowed_identities configured; every consume request will be rejected");
    }

    let port = config.port;
    let state = Arc::new(AppState::new(config, Arc::new(ledger)));
    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Privacy budget service listening on {}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}

async fn consume(
    config: BudgetConfig,
    origin: &str,
    raw_units: &[String],
) -> anyhow::Result<bool> {
    let units = raw_units
        .iter()
        .map(|s| s.parse::<PrivacyBudgetUnit>())
        .collect::<Result<Vec<_>, _>>()?;

    let client = DistributedPrivacyBudgetClient::from_config(&config)?;
    info!(coordinators = ?client.coordinator_names(), "Consuming budget");
    let gate = BudgetGate::new(client, config.reporting_window_offset_days);

    match gate.clear(origin, units).await {
        Ok(Clearance::Cleared) => {
            println!("cleared");
            Ok(true)
        }
        Ok(Clearance::Exhausted(units)) => {
            println!("exhausted:");
            for unit in units {
                println!("  {}", unit);
            }
            Ok(false)
        }
        Ok(Clearance::Rejected(units)) => {
            println!(
                "rejected (reporting window outside the last {} days):",
                config.reporting_window_offset_days
            );
            for unit in units {
                println!("  {}", unit);
            }
            Ok(false)
        }
        Err(e) => {
            eprintln!("failed [{:?}]: {}", e.kind(), e);
            Ok(false)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("serve");

    match command {
        "serve" => serve(load_config()?).await,
        "consume" => {
            if args.len() < 4 {
                eprintln!("Usage: pbs consume <origin> <key>@<rfc3339>...");
                std::process::exit(1);
            }
            let cleared = consume(load_config()?, &args[2], &args[3..]).await?;
            std::process::exit(if cleared { 0 } else { 1 });
        }
        "purge" => {
            let ledger = open_ledger(&load_config()?)?;
            let purged = ledger.purge_expired(chrono::Utc::now())?;
            println!("purged {} expired records", purged);
            Ok(())
        }
        "--help" | "-h" | "help" => {
            print_help();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}. Use 'pbs help' for usage.", other);
            std::process::exit(1);
        }
    }
}
