pub mod models;
pub mod woocommerce;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::{AppResult, OrderStoreError};

pub use models::{MetaEntry, OrderId, StoreOrder};
pub use woocommerce::WooCommerceClient;

/// Order metadata key carrying the escrow identity
pub const META_ESCROW_ID: &str = "_stellar_escrow_id";
/// Order metadata key carrying the buyer's stellar account
pub const META_BUYER_ADDRESS: &str = "_stellar_buyer_address";
/// Order metadata key carrying the deposit transaction hash
pub const META_TX_HASH: &str = "_stellar_tx_hash";

/// E-commerce backend operations used by the reconciliation flow
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn get_order(&self, order_id: OrderId) -> AppResult<StoreOrder>;

    /// Set the order status and record `tx_hash` as order metadata
    async fn update_status(&self, order_id: OrderId, status: &str, tx_hash: &str) -> AppResult<()>;

    /// Record escrow identity and buyer account as order metadata
    async fn update_escrow_meta(
        &self,
        order_id: OrderId,
        escrow_id: &str,
        buyer_account: &str,
    ) -> AppResult<()>;

    /// Append an admin-visible note to the order history
    async fn add_note(&self, order_id: OrderId, note: &str) -> AppResult<()>;

    async fn list_orders(&self, status: &str) -> AppResult<Vec<StoreOrder>>;

    /// Stellar account linked to a customer profile
    async fn customer_wallet(&self, customer_id: OrderId) -> AppResult<String>;

    /// Add to the customer's store-credit balance, returning the new balance
    async fn add_store_credit(&self, customer_id: OrderId, amount: Decimal) -> AppResult<Decimal>;

    /// Scan pending orders for one whose metadata references `escrow_id`
    async fn find_order_by_escrow(&self, escrow_id: &str) -> AppResult<StoreOrder> {
        self.list_orders("pending")
            .await?
            .into_iter()
            .find(|order| order.meta(META_ESCROW_ID) == Some(escrow_id))
            .ok_or_else(|| OrderStoreError::EscrowNotLinked(escrow_id.to_string()).into())
    }
}
