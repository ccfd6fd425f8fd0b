//! Simple Bank host process
//!
//! ```text
//! simple_bank [--env <env>] [--migrate] [--transfer <from> <to> <amount>]
//! ```
//!
//! Loads `config/<env>.yaml`, connects to PostgreSQL, optionally applies
//! the schema and runs one transfer, printing its result as JSON.

use anyhow::{Context, bail};

use simple_bank::config::AppConfig;
use simple_bank::db::PgDatabase;
use simple_bank::transfer::{TransferOrchestrator, TransferTxParams};

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

fn use_migrate() -> bool {
    std::env::args().any(|a| a == "--migrate")
}

/// `--transfer <from> <to> <amount>`
fn get_transfer_request() -> anyhow::Result<Option<TransferTxParams>> {
    let args: Vec<String> = std::env::args().collect();
    let Some(pos) = args.iter().position(|a| a == "--transfer") else {
        return Ok(None);
    };
    let values = args.get(pos + 1..pos + 4).context("--transfer needs <from> <to> <amount>")?;
    let from = values[0].parse().context("invalid <from> account id")?;
    let to = values[1].parse().context("invalid <to> account id")?;
    let amount = values[2].parse().context("invalid <amount>")?;
    Ok(Some(TransferTxParams::new(from, to, amount)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let app_config = AppConfig::load(&env)?;
    let _log_guard = simple_bank::logging::init_logging(&app_config);

    tracing::info!("Starting Simple Bank in {} mode", env);

    let Some(url) = app_config.postgres_url.as_deref() else {
        bail!("postgres_url is not configured (set it in config/{env}.yaml or DATABASE_URL)");
    };

    let db = PgDatabase::connect(url, &app_config.database).await?;
    db.health_check().await?;

    if use_migrate() {
        db.migrate().await?;
    }

    if let Some(params) = get_transfer_request()? {
        let orchestrator = TransferOrchestrator::new(db.store());
        let result = orchestrator.transfer(params).await?;
        println!("{}", serde_json::to_string_pretty(&result)?);
    }

    Ok(())
}
