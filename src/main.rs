//! anamnesis — clinical knowledge accumulation engine.
//! Merges untrusted LLM analysis into per-conversation ledgers.

use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use anamnesis::{api, db, oracle, AppState, SharedDB};

#[derive(Parser)]
#[command(name = "anamnesis", version, about = "Clinical knowledge accumulation engine")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "3941", env = "ANAMNESIS_PORT")]
    port: u16,

    /// SQLite database path
    #[arg(short, long, default_value = "anamnesis.db", env = "ANAMNESIS_DB")]
    db: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    let ldb = db::LedgerDB::open(&args.db).expect("failed to open database");
    let shared: SharedDB = Arc::new(ldb);

    let oracle_cfg = oracle::OracleConfig::from_env();
    let oracle_status = match &oracle_cfg {
        Some(cfg) => format!("model={}", cfg.model),
        None => "disabled".into(),
    };

    let api_key = std::env::var("ANAMNESIS_API_KEY").ok();
    let auth_status = if api_key.is_some() { "enabled" } else { "disabled" };

    let state = AppState {
        db: shared,
        oracle: oracle_cfg,
        api_key,
        started_at: std::time::Instant::now(),
    };
    let app = api::router(state);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = args.port,
        db = %args.db,
        oracle = %oracle_status,
        auth = auth_status,
        "anamnesis starting"
    );

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
    info!("shutting down");
}
