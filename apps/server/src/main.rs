use tracing_subscriber::EnvFilter;

use taskvault_server::config::ServerConfig;
use taskvault_server::router::build_router;
use taskvault_server::shutdown::shutdown_signal;
use taskvault_server::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let config = ServerConfig::load()?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let addr = config.bind_addr();
    let rotation_days = config.key_rotation_days;
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, rotation_days, "key service listening");

    axum::serve(listener, build_router(AppState::new(config)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("key service stopped");
    Ok(())
}
