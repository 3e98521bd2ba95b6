use bankops_core::{BankOpsConfig, StorageConfig};
use bankops_service::{build_router, ServiceState};
use clap::{Parser, ValueEnum};
use rust_decimal::Decimal;
use std::net::SocketAddr;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StorageMode {
    Auto,
    Memory,
    Postgres,
}

#[derive(Debug, Parser)]
#[command(name = "bankopsd", version, about = "Loan and account lifecycle REST service")]
struct Cli {
    /// REST socket address to bind, e.g. 127.0.0.1:8092
    #[arg(long, default_value = "127.0.0.1:8092")]
    listen: SocketAddr,
    /// Persistence backend. `auto` picks postgres when a database url is configured.
    #[arg(long, value_enum, default_value_t = StorageMode::Auto, env = "BANKOPS_STORAGE")]
    storage: StorageMode,
    /// PostgreSQL url for loans, accounts and deposit records.
    #[arg(long, env = "BANKOPS_DATABASE_URL")]
    database_url: Option<String>,
    /// Max PostgreSQL pool connections.
    #[arg(long, default_value_t = 5, env = "BANKOPS_PG_MAX_CONNECTIONS")]
    pg_max_connections: u32,
    /// Account row that funds loan disbursements.
    #[arg(long, default_value = "treasury", env = "BANKOPS_TREASURY_ACCOUNT_ID")]
    treasury_account_id: String,
    /// Balance used only when the treasury row has to be created.
    #[arg(long, default_value = "1000000", env = "BANKOPS_TREASURY_OPENING_BALANCE")]
    treasury_opening_balance: Decimal,
    /// Operator allowed to approve loans, as `id=secret`. Repeatable.
    #[arg(long = "operator", env = "BANKOPS_OPERATORS", value_delimiter = ',')]
    operators: Vec<String>,
    /// Register the local development operator `operator-local`. Never use in production.
    #[arg(long, default_value_t = false, env = "BANKOPS_DEV")]
    dev: bool,
}

const DEV_OPERATOR_ID: &str = "operator-local";
const DEV_OPERATOR_SECRET: &str = "bankops-local-dev-secret";

fn resolve_storage(cli: &Cli) -> anyhow::Result<StorageConfig> {
    let resolved_url = cli
        .database_url
        .clone()
        .or_else(|| std::env::var("DATABASE_URL").ok());

    let storage = match cli.storage {
        StorageMode::Memory => StorageConfig::Memory,
        StorageMode::Postgres => {
            let database_url = resolved_url.ok_or_else(|| {
                anyhow::anyhow!("storage=postgres requires --database-url or DATABASE_URL")
            })?;
            StorageConfig::postgres(database_url, cli.pg_max_connections)
        }
        StorageMode::Auto => {
            if let Some(database_url) = resolved_url {
                StorageConfig::postgres(database_url, cli.pg_max_connections)
            } else {
                StorageConfig::Memory
            }
        }
    };

    Ok(storage)
}

fn parse_operators(entries: &[String]) -> anyhow::Result<Vec<(String, String)>> {
    entries
        .iter()
        .map(|entry| {
            let (id, secret) = entry
                .split_once('=')
                .ok_or_else(|| anyhow::anyhow!("operator '{}' must be formatted as id=secret", entry))?;
            if id.trim().is_empty() || secret.is_empty() {
                anyhow::bail!("operator '{}' must have a non-empty id and secret", entry);
            }
            Ok((id.trim().to_string(), secret.to_string()))
        })
        .collect()
}

fn engine_config(cli: &Cli) -> anyhow::Result<BankOpsConfig> {
    let mut config = BankOpsConfig {
        treasury_account_id: cli.treasury_account_id.clone(),
        treasury_opening_balance: cli.treasury_opening_balance,
        operators: parse_operators(&cli.operators)?,
        storage: resolve_storage(cli)?,
    };
    if cli.dev {
        warn!(operator = DEV_OPERATOR_ID, "registering the development operator");
        config = config.with_operator(DEV_OPERATOR_ID, DEV_OPERATOR_SECRET);
    }
    if config.operators.is_empty() {
        anyhow::bail!("no operators configured; pass --operator id=secret or --dev");
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| {
            "bankops_service=info,bankops_core=info,info".to_string()
        }))
        .init();

    let cli = Cli::parse();
    let config = engine_config(&cli)?;
    info!(backend = config.storage.label(), "starting bankops-service");

    let state = ServiceState::bootstrap(config).await?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(cli.listen).await?;
    info!("bankops-service REST listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
