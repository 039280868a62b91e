use axum::http::{header, HeaderName, Method};
use tower_http::cors::{Any, CorsLayer};

/// Header the storefront sends to get past the ngrok interstitial
const NGROK_SKIP_WARNING: HeaderName = HeaderName::from_static("ngrok-skip-browser-warning");

/// Storefront pages call from arbitrary shop domains
pub fn create_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT, NGROK_SKIP_WARNING])
        .max_age(std::time::Duration::from_secs(60 * 60))
}
