use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use tracing::{debug, info, warn};

use super::models::*;
use crate::{
    conversion::{ConversionReceipt, CreditConverter},
    error::{AppError, AppResult, OrderStoreError},
    orders::StoreOrder,
    pricing::{PriceCache, PriceSnapshot},
    reconciliation::{EscrowOrder, ReconciliationEngine},
};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ReconciliationEngine>,
    pub price_cache: Arc<PriceCache>,
    pub converter: Arc<CreditConverter>,
}

/// POST /webhook/pending-order - WooCommerce "order created" webhook
pub async fn pending_order_webhook(
    State(state): State<AppState>,
    body: Bytes,
) -> AppResult<StatusCode> {
    debug!("📥 Webhook received: {}", String::from_utf8_lossy(&body));

    // Delivery test sent when the webhook is saved in the shop admin
    if body.starts_with(b"webhook_id=") {
        info!("🔔 WooCommerce ping received");
        return Ok(StatusCode::OK);
    }

    let order: StoreOrder = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("Invalid order payload: {}", e)))?;

    state.engine.notify_order_pending(
        order.id,
        order.total_due(),
        order.buyer_account().unwrap_or_default(),
    );
    Ok(StatusCode::OK)
}

/// POST /escrow/link - buyer's deposit confirmed by the storefront
pub async fn link_escrow(
    State(state): State<AppState>,
    Json(request): Json<EscrowLinkRequest>,
) -> AppResult<Json<EscrowLinkResponse>> {
    info!(
        "🔗 Linking order #{} to escrow {}",
        request.order_id, request.escrow_id
    );

    if request.escrow_id.trim().is_empty() {
        return Err(AppError::BadRequest("escrow_id is required".to_string()));
    }

    state
        .engine
        .confirm_escrow_link(
            request.order_id,
            &request.escrow_id,
            &request.buyer_address,
            &request.tx_hash,
        )
        .await?;

    Ok(Json(EscrowLinkResponse {
        status: "success".to_string(),
        message: "Order updated to processing, escrow release initiated".to_string(),
    }))
}

/// GET /escrow/:escrow_id
pub async fn get_escrow_order(
    State(state): State<AppState>,
    Path(escrow_id): Path<String>,
) -> AppResult<Json<EscrowOrder>> {
    match state.engine.order_for_escrow(&escrow_id).await {
        Ok(order) => Ok(Json(order)),
        Err(AppError::OrderStore(OrderStoreError::EscrowNotLinked(id))) => Err(
            AppError::NotFound(format!("No order linked to escrow {}", id)),
        ),
        Err(e) => Err(e),
    }
}

/// GET /price/xlm
pub async fn get_xlm_price(State(state): State<AppState>) -> AppResult<Json<PriceSnapshot>> {
    let snapshot = state.price_cache.get_price().await.map_err(|e| {
        warn!("⚠️ Price request failed: {}", e);
        e
    })?;
    Ok(Json(snapshot))
}

/// POST /api/convert-zmoke
pub async fn convert_zmoke(
    State(state): State<AppState>,
    Json(request): Json<ConvertRequest>,
) -> AppResult<Json<ConversionReceipt>> {
    info!(
        "💱 Convert request: customer {}, tx {}",
        request.user_id, request.tx_hash
    );
    let receipt = state
        .converter
        .convert(request.user_id, &request.tx_hash)
        .await?;
    Ok(Json(receipt))
}

/// POST /webhook/order-completed - kept for shops still sending it
pub async fn order_completed_webhook(body: Bytes) -> AppResult<StatusCode> {
    let order = serde_json::from_slice::<StoreOrder>(&body).map_err(|e| {
        debug!("📦 Order-completed webhook with unparsable body: {}", e);
        AppError::BadRequest(format!("Invalid order payload: {}", e))
    })?;
    info!("📦 Order #{} completed ({})", order.id, order.status);
    Ok(StatusCode::OK)
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.engine.stats();

    // Releases parked after a failure need an operator
    let status = if stats.releasing > 0 { "degraded" } else { "ok" };

    Json(HealthResponse {
        status: status.to_string(),
        timestamp: Utc::now(),
        pending_orders: stats,
    })
}
