use std::{path::Path, sync::Arc};

use axum::{
    Router,
    http::{HeaderValue, Method, header::CONTENT_DISPOSITION},
    routing::get,
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::{debug, info, warn};

pub mod config;
pub mod error;
pub mod formats;
pub mod models;
pub mod provider;
pub mod routes;
pub mod source_url;

use crate::{config::normalize_origin, provider::VideoProvider};

/// Shared by every handler. Holds no mutable data, so requests never contend.
#[derive(Clone)]
pub struct AppState {
    pub provider: Arc<dyn VideoProvider>,
}

pub fn build_router(state: AppState, public_dir: &Path, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/video-info", get(routes::video_info))
        .route("/download", get(routes::download))
        .route("/download-progressive", get(routes::download_progressive))
        .fallback_service(ServeDir::new(public_dir))
        .with_state(state)
        .layer(build_cors_layer(allowed_origins))
        .layer(TraceLayer::new_for_http())
}

fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET])
        .allow_headers(Any)
        .expose_headers([CONTENT_DISPOSITION]);

    if allowed_origins.is_empty() {
        warn!("ALLOWED_ORIGINS is not set. Requests from any origin will be accepted.");
        return layer.allow_origin(Any);
    }

    info!(
        "CORS allow-list loaded with {} origin(s): {:?}",
        allowed_origins.len(),
        allowed_origins
    );

    let allowed_origins: Arc<[String]> = allowed_origins.into();
    layer.allow_origin(AllowOrigin::predicate(
        move |origin: &HeaderValue, _| {
            let normalized = origin.to_str().ok().and_then(normalize_origin);
            let allowed = normalized
                .as_ref()
                .is_some_and(|value| allowed_origins.contains(value));
            debug!(
                "CORS origin check raw={:?} normalized={:?} allowed={}",
                origin, normalized, allowed
            );
            allowed
        },
    ))
}
