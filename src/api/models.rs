use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::reconciliation::RegistryStats;

// ========== REQUEST MODELS ==========

/// Sent by the storefront once the buyer's escrow deposit went through
#[derive(Debug, Deserialize)]
pub struct EscrowLinkRequest {
    pub order_id: u64,
    pub escrow_id: String,
    #[serde(default)]
    pub buyer_address: String,
    #[serde(default)]
    pub tx_hash: String,
}

/// Reward tokens paid to the treasury, to be credited to `user_id`
#[derive(Debug, Deserialize)]
pub struct ConvertRequest {
    pub user_id: u64,
    pub tx_hash: String,
}

// ========== RESPONSE MODELS ==========

#[derive(Debug, Serialize)]
pub struct EscrowLinkResponse {
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub pending_orders: RegistryStats,
}
