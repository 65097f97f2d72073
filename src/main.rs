// ABOUTME: Entry point for the codeclaim binary.
// ABOUTME: Parses CLI arguments, initializes tracing, and either serves the HTTP API or runs a ledger command.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use codeclaim_server::{AppState, CodeclaimConfig, create_router, spawn_event_logger};
use codeclaim_store::DiscountLedger;
use ulid::Ulid;

#[derive(Debug, Parser)]
#[command(name = "codeclaim")]
#[command(about = "Issue single-use discount codes and claim them exactly once", long_about = None)]
struct Cli {
    /// Snapshot file (overrides CODECLAIM_DB)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Serve the HTTP API
    Serve,
    /// Issue a discount with a batch of codes
    Create {
        #[arg(long)]
        brand: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        count: i64,
    },
    /// List a brand's discounts
    List {
        #[arg(long)]
        brand: String,
    },
    /// Claim a code of a discount for a user
    Claim {
        #[arg(long)]
        discount: Ulid,
        #[arg(long)]
        store: String,
        #[arg(long)]
        user: String,
    },
    /// List the codes a user has claimed
    Codes {
        #[arg(long)]
        user: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("codeclaim=info,tower_http=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = CodeclaimConfig::from_env().context("invalid configuration")?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    let ledger = DiscountLedger::new(config.db_path.clone()).with_lock_timeout(config.lock_timeout);
    let output = match cli.command {
        Commands::Serve => return serve(config).await,
        Commands::Create { brand, name, count } => {
            serde_json::to_value(ledger.create(&name, &brand, count)?.summary())?
        }
        Commands::List { brand } => serde_json::to_value(ledger.summaries(&brand)?)?,
        Commands::Claim {
            discount,
            store,
            user,
        } => serde_json::json!({ "code": ledger.claim(discount, &store, &user)? }),
        Commands::Codes { user } => serde_json::to_value(ledger.codes_claimed_by(&user)?)?,
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn serve(config: CodeclaimConfig) -> anyhow::Result<()> {
    let state = Arc::new(AppState::new(config.db_path.clone(), config.lock_timeout));
    let _event_logger = spawn_event_logger(&state.events);
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    tracing::info!(
        "codeclaim listening on {} (snapshot {})",
        config.bind,
        config.db_path.display()
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await
        .context("server error")
}
