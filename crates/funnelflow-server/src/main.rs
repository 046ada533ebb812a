use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use funnelflow_server::state::AppState;

/// `funnelflow health` — liveness probe for Docker HEALTHCHECK.
///
/// Calls `GET http://localhost:$FUNNELFLOW_PORT/health`.
/// Exits 0 if the server responds with HTTP 200, exits 1 otherwise.
fn run_health_check() -> ! {
    let port = std::env::var("FUNNELFLOW_PORT").unwrap_or_else(|_| "3000".to_string());
    let url = format!("http://localhost:{}/health", port);
    match ureq::get(&url).call() {
        Ok(resp) if resp.status() == 200 => std::process::exit(0),
        _ => std::process::exit(1),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Health-check subcommand — must be handled before tokio runtime initialisation
    // so the binary stays small and fast when used as a Docker HEALTHCHECK probe.
    let args: Vec<String> = std::env::args().collect();
    if args.get(1).map(|s| s.as_str()) == Some("health") {
        run_health_check();
    }
    // Initialise structured JSON logging. Level controlled via RUST_LOG env var.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("funnelflow=info".parse()?),
        )
        .json()
        .init();

    let cfg = funnelflow_core::config::Config::from_env().map_err(|e| anyhow::anyhow!(e))?;

    // Ensure data directory exists before opening DuckDB.
    std::fs::create_dir_all(&cfg.data_dir)?;
    let db_path = format!("{}/funnelflow.db", cfg.data_dir);

    // Open DuckDB — initialises schema and seeds settings table.
    let db = funnelflow_duckdb::DuckDbBackend::open(&db_path, &cfg.duckdb_memory_limit)?;

    // Seed a default website so the server is usable out of the box.
    // Uses ON CONFLICT so it's safe to run on every startup.
    if let Err(e) = db.seed_website("site_default", "localhost").await {
        tracing::warn!(error = %e, "Failed to seed default website");
    } else {
        info!("Default website 'site_default' (localhost) ready");
    }

    let state = Arc::new(AppState::new(db, cfg.clone()));

    let addr = format!("0.0.0.0:{}", cfg.port);
    let app = funnelflow_server::app::build_app(Arc::clone(&state));

    info!(port = cfg.port, "Funnelflow listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    Ok(())
}
