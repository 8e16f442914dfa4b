mod api;
mod app;
mod auth;
mod commands;
mod terminal_output;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use pacer_config::{config_dir, config_file_path, load_and_prepare, log_report, validate, PacerConfig};
use pacer_logging::init_logger;

use api::AppState;

#[derive(Parser)]
#[command(name = "pacer")]
#[command(about = "Pacer: persisted task scheduler for racing data refreshes")]
#[command(version)]
struct Cli {
    /// Config file (default: $PACER_CONFIG_DIR/config.yaml or ~/.pacer/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler loop and the management API
    Serve {
        /// Port to bind the HTTP server to
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Show scheduler status from a running server
    Status,
    /// List scheduled tasks
    Tasks,
    /// Execute one task now, in this process
    Run { id: Uuid },
    /// Clear a stuck running flag
    Unlock { id: Uuid },
    /// Validate a cron expression and show upcoming fire times
    CheckCron {
        expr: String,
        #[arg(short, long, default_value_t = 5)]
        count: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let path = cli
        .config
        .unwrap_or_else(|| config_file_path(&config_dir()));
    let mut config = load_and_prepare(&path).await?;

    let serving = matches!(cli.command, Commands::Serve { .. });
    // only the server writes the rolling file log; one-shot commands stay quiet
    let _log_guard = if serving {
        init_logger(config.log_dir().map(Path::new), config.log_level())
    } else {
        init_logger(None, "warn")
    };

    let report = validate(&config);
    log_report(&report);

    match cli.command {
        Commands::Serve { port } => {
            if !report.is_valid() {
                bail!("refusing to start with {} config error(s)", report.errors.len());
            }
            if let Some(port) = port {
                config.server.get_or_insert_with(Default::default).port = Some(port);
            }
            run_server(config).await?;
        }
        Commands::Status => commands::status(&config).await?,
        Commands::Tasks => commands::list_tasks(&config).await?,
        Commands::Run { id } => commands::run(&config, id).await?,
        Commands::Unlock { id } => commands::unlock(&config, id).await?,
        Commands::CheckCron { expr, count } => commands::check_cron(&expr, count)?,
    }

    Ok(())
}

async fn run_server(config: PacerConfig) -> Result<()> {
    info!(
        port = config.port(),
        bind = %config.bind(),
        db = %config.db_path(),
        "Starting Pacer"
    );

    let scheduler = app::build_scheduler(&config)?;
    scheduler.start().await;

    let state = Arc::new(AppState {
        scheduler: Arc::clone(&scheduler),
        api_token: config.api_token().map(String::from),
    });
    let router = api::build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("{}:{}", config.bind(), config.port());
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "HTTP API listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.stop().await;
    info!("Pacer shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
