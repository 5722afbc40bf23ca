use dotenvy::dotenv;
use log::{error, info};
use std::sync::Arc;

use boardserver::{build_state, run_axum_server, AppConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = AppConfig::load().map_err(|e| {
        error!("Invalid configuration: {}", e);
        e
    })?;
    info!(
        "Starting boardserver {} on {}",
        env!("CARGO_PKG_VERSION"),
        config.server.bind_address()
    );

    let state = Arc::new(build_state(config).await?);
    run_axum_server(state).await?;
    info!("boardserver stopped");
    Ok(())
}
