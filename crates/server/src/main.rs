use anyhow::Result;
use orchestrator_core::config::{AppConfig, LoadOptions};
use orchestrator_server::bootstrap;

fn init_logging(config: &AppConfig) {
    use orchestrator_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.filter.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let bind_address = config.server.bind_address.clone();
    let port = config.server.port;

    let app_state = bootstrap::bootstrap(config).await?;
    let app = orchestrator_server::router(app_state);

    let listener = tokio::net::TcpListener::bind((bind_address.as_str(), port)).await?;
    tracing::info!(
        event_name = "system.server.started",
        bind_address = %bind_address,
        port = port,
        "orchestrator-server started"
    );

    axum::serve(listener, app).with_graceful_shutdown(wait_for_shutdown()).await?;

    tracing::info!(event_name = "system.server.stopping", "orchestrator-server stopping");
    Ok(())
}

async fn wait_for_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
}
