use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use taskforest::{api, config::AppConfig, db};

/// How often expired session tokens and idle rate-limit entries are swept.
const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Parser)]
#[command(name = "taskforest")]
#[command(about = "Hierarchical task tracking for organizations")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Port for HTTP API
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Database file (overrides TASKFOREST_DB_PATH)
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Apply pending schema migrations and exit
    Migrate {
        /// Database file (overrides TASKFOREST_DB_PATH)
        #[arg(long)]
        db: Option<PathBuf>,
    },
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "taskforest=debug,tower_http=debug".into()),
    );

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn open_database(arg: Option<PathBuf>, config: &AppConfig) -> anyhow::Result<db::Database> {
    let db = match arg.or_else(|| config.db_path.clone()) {
        Some(path) => db::Database::open(path)?,
        None => db::Database::open_default()?,
    };
    db.migrate()?;
    Ok(db)
}

async fn serve(port: u16, db: db::Database, config: AppConfig) -> anyhow::Result<()> {
    tracing::info!("Starting taskforest server on port {}", port);

    let sweeper_db = db.clone();
    let limiter = config.security.rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            match sweeper_db.delete_expired_tokens() {
                Ok(0) => {}
                Ok(removed) => tracing::debug!(removed, "Removed expired session tokens"),
                Err(e) => tracing::warn!("Failed to remove expired tokens: {e:#}"),
            }
            if let Some(limiter) = &limiter {
                limiter.cleanup();
            }
        }
    });

    let app = api::create_router(db, &config);

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    tracing::info!("taskforest server listening on http://127.0.0.1:{}", port);

    axum::serve(listener, app).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = AppConfig::from_env();

    match cli.command {
        Some(Commands::Serve { port, db }) => {
            let db = open_database(db, &config)?;
            serve(port, db, config).await?;
        }
        Some(Commands::Migrate { db }) => {
            open_database(db, &config)?;
            tracing::info!("Migrations applied");
        }
        None => {
            let db = open_database(None, &config)?;
            serve(3000, db, config).await?;
        }
    }

    Ok(())
}
