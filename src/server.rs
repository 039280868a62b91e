use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    api::handler::{
        convert_zmoke, get_escrow_order, get_xlm_price, health_check, link_escrow,
        order_completed_webhook, pending_order_webhook, AppState,
    },
    middleware::create_cors_layer,
};

pub fn create_app(state: AppState) -> Router {
    info!("⚙️ Setting up HTTP routes...");

    let app = Router::new()
        .route("/health", get(health_check))
        // WooCommerce webhooks
        .route("/webhook/pending-order", post(pending_order_webhook))
        .route("/webhook/order-completed", post(order_completed_webhook))
        // Storefront
        .route("/escrow/link", post(link_escrow))
        .route("/escrow/:escrow_id", get(get_escrow_order))
        .route("/price/xlm", get(get_xlm_price))
        .route("/api/convert-zmoke", post(convert_zmoke))
        .layer(create_cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("✓ HTTP routes configured");
    app
}

/// Serve until `shutdown` resolves, then stop accepting and drain connections
pub async fn run_server<F>(app: Router, bind_address: &str, shutdown: F) -> std::io::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("🌐 Server listening on: {}", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}
