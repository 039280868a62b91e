pub mod stellar;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::AppResult;

pub use stellar::StellarChain;

/// Credit asset identity (code + issuing account)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetId {
    pub code: String,
    pub issuer: String,
}

impl AssetId {
    pub fn new(code: impl Into<String>, issuer: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            issuer: issuer.into(),
        }
    }
}

impl std::fmt::Display for AssetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.code, self.issuer)
    }
}

/// A payment to be built, signed with `source_secret` and submitted
#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub source_account: String,
    pub source_secret: String,
    pub destination: String,
    pub asset: AssetId,
    /// Whole asset units; converted to stroops by the implementation
    pub amount: Decimal,
}

/// Base/quote pair understood by the price oracle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricePair {
    pub base: String,
    pub quote: String,
}

impl PricePair {
    pub fn xlm_usd() -> Self {
        Self {
            base: "XLM".to_string(),
            quote: "USD".to_string(),
        }
    }
}

impl std::fmt::Display for PricePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

/// Raw oracle tuple: fixed-point price and oracle-reported timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OracleReading {
    pub price: i128,
    pub timestamp: i64,
}

/// An asset payment found inside a submitted transaction
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedPayment {
    pub from: String,
    pub amount: Decimal,
}

/// Ledger capability used for every read and write the backend performs.
///
/// Implementations return errors for every failure and never panic the caller.
#[async_trait]
pub trait ChainService: Send + Sync {
    /// Build, sign and submit a payment. Returns the transaction hash.
    async fn submit_payment(&self, payment: &PaymentRequest) -> AppResult<String>;

    /// Whether the escrow record currently holds locked funds
    async fn query_escrow(&self, escrow_id: &str) -> AppResult<bool>;

    /// Invoke `release` on the escrow contract. Returns the transaction hash.
    async fn release_escrow(&self, escrow_id: &str) -> AppResult<String>;

    /// Balance of `asset_code` held by `account`, in whole units
    async fn query_balance(&self, account: &str, asset_code: &str) -> AppResult<Decimal>;

    /// Latest oracle price; `None` when the oracle has no data for the pair
    async fn query_oracle_price(&self, pair: &PricePair) -> AppResult<Option<OracleReading>>;

    /// Payment of `asset` to `destination` contained in transaction `tx_hash`
    async fn find_asset_payment(
        &self,
        tx_hash: &str,
        destination: &str,
        asset: &AssetId,
    ) -> AppResult<Option<ReceivedPayment>>;
}
