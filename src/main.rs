mod api;
mod audit;
mod bootstrap;
mod config;
mod error;
mod execution;
mod ledger;
mod notify;
mod scheduler;
mod server;
mod tasks;

#[cfg(test)]
mod testing;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// Initialize logging and tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,tower_http=debug,unlock_bot=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    info!("🚀 Starting unlock bot");

    let config = config::Config::from_env()?;
    let bind_address = format!("0.0.0.0:{}", config.port);

    let state = bootstrap::initialize_app_state(&config).await?;

    // Create HTTP server
    let app = server::create_app(state);

    // Run the Server
    server::run_server(app, &bind_address).await?;

    Ok(())
}
