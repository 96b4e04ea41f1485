use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use tubefetch::{
    AppState, build_router, config::Config, error::ApiError, provider::YtDlpProvider,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "tubefetch=info,tower_http=info".to_string()),
        )
        .init();

    if let Err(error) = run().await {
        eprintln!("Server error: {}", error.message);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), ApiError> {
    let config = Config::from_env()?;

    tokio::fs::create_dir_all(&config.downloads_dir)
        .await
        .map_err(|error| {
            ApiError::internal(format!(
                "Could not create downloads directory {:?}: {error}",
                config.downloads_dir
            ))
        })?;

    let provider = YtDlpProvider::new(config.yt_dlp_bin.clone(), config.yt_dlp_timeout);
    let state = AppState {
        provider: Arc::new(provider),
    };
    let app = build_router(state, &config.public_dir, &config.allowed_origins);

    let listener = TcpListener::bind(&config.bind_addr).await.map_err(|error| {
        ApiError::internal(format!("Could not bind {}: {error}", config.bind_addr))
    })?;

    info!("Video downloader running at http://{}", config.bind_addr);
    info!("Downloads directory reserved at {:?}", config.downloads_dir);
    info!("Serving client from {:?}", config.public_dir);

    axum::serve(listener, app)
        .await
        .map_err(|error| ApiError::internal(format!("HTTP server error: {error}")))
}
