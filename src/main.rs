//! Bank Ledger - operations binary
//!
//! ```text
//! bank_ledger [--env <name>] migrate   apply the ledger schema
//! bank_ledger [--env <name>] health    check database connectivity
//! bank_ledger [--env <name>] limits    print the configured transfer limits
//! ```

use anyhow::{Context, bail};

use bank_ledger::config::AppConfig;
use bank_ledger::db::Database;
use bank_ledger::money::format_amount;

// ============================================================
// ARGUMENTS
// ============================================================

fn get_env(args: &[String]) -> String {
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

fn get_command(args: &[String]) -> Option<String> {
    let mut skip_next = false;
    for arg in args.iter().skip(1) {
        if skip_next {
            skip_next = false;
            continue;
        }
        if arg == "--env" || arg == "-e" {
            skip_next = true;
            continue;
        }
        return Some(arg.clone());
    }
    None
}

async fn connect(config: &AppConfig) -> anyhow::Result<Database> {
    let url = config
        .postgres_url
        .as_deref()
        .context("postgres_url is not configured")?;
    Database::connect(url)
        .await
        .context("Failed to connect to PostgreSQL")
}

// ============================================================
// MAIN
// ============================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let env = get_env(&args);

    let app_config = AppConfig::load(&env)?;
    let _log_guard = bank_ledger::logging::init_logging(&app_config)?;

    tracing::info!(
        git_hash = env!("GIT_HASH"),
        "Starting bank_ledger in {} mode",
        env
    );

    match get_command(&args).as_deref() {
        Some("migrate") => {
            let db = connect(&app_config).await?;
            db.migrate().await.context("Migration failed")?;
            println!("✅ Schema applied");
        }
        Some("health") => {
            let db = connect(&app_config).await?;
            db.health_check().await.context("Health check failed")?;
            println!("✅ Database healthy");
        }
        Some("limits") => {
            let limits = &app_config.limits;
            println!("per_transaction_max: {}", format_amount(limits.per_transaction_max));
            println!("daily_max:           {}", format_amount(limits.daily_max));
            println!("monthly_max:         {}", format_amount(limits.monthly_max));
        }
        Some(other) => bail!("unknown command '{}' (expected migrate, health or limits)", other),
        None => bail!("usage: bank_ledger [--env <name>] <migrate|health|limits>"),
    }

    Ok(())
}
