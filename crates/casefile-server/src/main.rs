//! Casefile game server
//!
//! Serves the detective game API together with usage accounting, rate
//! limits and the prompt test harness:
//! - Every AI call is priced and recorded in the usage ledger
//! - Sessions are throttled by cost and hourly operation ceilings
//! - Prompt test suites validate the game's prompts against live services
//!
//! Usage:
//! ```bash
//! # With config file
//! casefile-server --config casefile.yaml
//!
//! # Or with environment variables
//! OPENAI_API_KEY=... ANTHROPIC_API_KEY=... FAL_KEY=... casefile-server
//!
//! # Run the prompt test catalog once and exit
//! casefile-server run-tests --types case_generation,evidence_analysis
//! ```
//!
//! Test with:
//! ```bash
//! curl -X POST http://localhost:8001/api/generate-case \
//!   -H "Content-Type: application/json" \
//!   -d '{"session_id": "demo"}'
//!
//! curl http://localhost:8001/api/usage/session/demo
//! ```

mod app;
mod bootstrap;
mod config;

use casefile_observability::{Metrics, init_logging};
use clap::{Parser, Subcommand};
use config::ServerConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

#[derive(Parser)]
#[command(name = "casefile-server")]
#[command(about = "Casefile detective game server with usage accounting and prompt tests", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to configuration file (YAML or TOML)
    #[arg(short, long, value_name = "FILE", env = "CASEFILE_CONFIG", global = true)]
    config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server (default if no command specified)
    Serve,
    /// Run the prompt test catalog once, print the summary and exit
    RunTests {
        /// Comma-separated prompt types to run (all when omitted)
        #[arg(long, value_name = "TYPES")]
        types: Option<String>,
    },
}

fn load_config(path: Option<&str>) -> anyhow::Result<ServerConfig> {
    let mut config = match path {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };
    config.merge_env();
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    init_logging(&config.logging.level, config.logging.json, config.logging.log_sql_queries)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;
    if let Some(path) = &cli.config {
        info!("📁 Loaded configuration from {}", path);
    }
    debug!("Effective limits: {:?}", config.limits);

    let metrics = Arc::new(Metrics::new()?);
    let state = bootstrap::build(&config, metrics).await?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(&config, state).await,
        Commands::RunTests { types } => run_tests(state, types.as_deref()).await,
    }
}

async fn serve(config: &ServerConfig, state: app::AppState) -> anyhow::Result<()> {
    let game = state.game.clone();
    let app = app::router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("🔍 Casefile listening on http://{}", addr);
    info!("   Game:     POST /api/generate-case, /api/question-character, /api/analyze-evidence");
    info!("             POST /api/generate-dynamic-character, /api/generate-visual-scene");
    info!("   Usage:    GET  /api/usage/session/{{id}}, /api/usage/statistics");
    info!("   Testing:  POST /api/testing/run-tests, GET /api/testing/health-report");
    info!("   Health:   GET  /api/health, /metrics");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped, draining image jobs...");
    game.images().shutdown().await;
    Ok(())
}

async fn run_tests(state: app::AppState, types: Option<&str>) -> anyhow::Result<()> {
    let types = types.map(app::parse_prompt_types).transpose()?;
    let session_id = state.runner.config().session_id.clone();

    let suite = state.runner.run_suite(&session_id, types.as_deref()).await;
    state.game.images().shutdown().await;

    for result in &suite.results {
        let mark = if result.success { "✅" } else { "❌" };
        match result.failure_reason() {
            Some(reason) => println!("{} {} ({}): {}", mark, result.test_case_name, result.prompt_type, reason),
            None => println!("{} {} ({})", mark, result.test_case_name, result.prompt_type),
        }
    }
    let summary = suite.summary();
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if summary.tests_failed > 0 {
        anyhow::bail!("{} of {} prompt tests failed", summary.tests_failed, summary.tests_run);
    }
    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
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
