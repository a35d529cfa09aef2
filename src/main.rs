use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use calcio::{config::AppConfig, relay};

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env var reads)
    if let Err(e) = dotenvy::dotenv() {
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "calcio=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting calcio relay...");

    let config = AppConfig::from_env();

    let app = relay::router(relay::RelayState::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let listener = match tokio::net::TcpListener::bind(&config.relay_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", config.relay_addr, e);
            std::process::exit(1);
        }
    };
    tracing::info!("Relay listening on ws://{}/relay", config.relay_addr);

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Relay server stopped: {}", e);
        std::process::exit(1);
    }
}
