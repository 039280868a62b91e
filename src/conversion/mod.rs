use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use crate::{
    chain::{AssetId, ChainService},
    config::RewardConfig,
    error::{AppError, AppResult, ConversionError},
    orders::OrderStore,
};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ConversionReceipt {
    pub success: bool,
    pub credit_added: Decimal,
    pub new_balance: Decimal,
    pub message: String,
}

/// Turns reward tokens paid to the treasury into store credit
pub struct CreditConverter {
    chain: Arc<dyn ChainService>,
    orders: Arc<dyn OrderStore>,
    config: RewardConfig,
    redeemed: Mutex<HashSet<String>>,
}

impl CreditConverter {
    pub fn new(chain: Arc<dyn ChainService>, orders: Arc<dyn OrderStore>, config: RewardConfig) -> Self {
        Self {
            chain,
            orders,
            config,
            redeemed: Mutex::new(HashSet::new()),
        }
    }

    #[instrument(skip(self))]
    pub async fn convert(&self, user_id: u64, tx_hash: &str) -> AppResult<ConversionReceipt> {
        let (treasury, issuer) = match (&self.config.treasury_address, &self.config.issuer_public_key) {
            (Some(treasury), Some(issuer)) => (treasury.clone(), issuer.clone()),
            _ => {
                return Err(AppError::Config(
                    "TREASURY_ADDRESS and ZMOKE_ISSUER_PUBLIC_KEY must be set".to_string(),
                ))
            }
        };

        if !self.redeemed.lock().insert(tx_hash.to_string()) {
            return Err(ConversionError::AlreadyRedeemed(tx_hash.to_string()).into());
        }

        let result = self.redeem(user_id, tx_hash, &treasury, issuer).await;
        if result.is_err() {
            // Only successful conversions burn the transaction reference
            self.redeemed.lock().remove(tx_hash);
        }
        result
    }

    async fn redeem(
        &self,
        user_id: u64,
        tx_hash: &str,
        treasury: &str,
        issuer: String,
    ) -> AppResult<ConversionReceipt> {
        let asset = AssetId::new(&self.config.asset_code, issuer);
        let payment = self
            .chain
            .find_asset_payment(tx_hash, treasury, &asset)
            .await
            .map_err(|e| {
                warn!("❌ Payment lookup for {} failed: {}", tx_hash, e);
                ConversionError::LookupFailed {
                    tx_hash: tx_hash.to_string(),
                    reason: e.to_string(),
                }
            })?
            .ok_or_else(|| {
                warn!("❌ No {} payment to treasury in {}", asset.code, tx_hash);
                ConversionError::PaymentNotFound(tx_hash.to_string())
            })?;

        let tokens = payment
            .amount
            .round_dp_with_strategy(0, RoundingStrategy::ToZero);
        if tokens <= Decimal::ZERO {
            return Err(ConversionError::AmountTooSmall(payment.amount.to_string()).into());
        }
        info!("✅ Verified: {} {} from {}", tokens, asset.code, payment.from);

        let wallet = self.orders.customer_wallet(user_id).await.map_err(|e| {
            error!("❌ Failed to get wallet for customer {}: {}", user_id, e);
            AppError::BadRequest("Could not verify wallet ownership".to_string())
        })?;
        if wallet != payment.from {
            return Err(ConversionError::WalletMismatch {
                expected: wallet,
                sender: payment.from,
            }
            .into());
        }

        let credit = tokens
            .checked_mul(self.config.credit_per_unit())
            .ok_or_else(|| AppError::BadRequest(format!("Payment of {} is out of range", tokens)))?
            .round_dp(2);
        let new_balance = self.orders.add_store_credit(user_id, credit).await?;

        info!(
            "🎉 Added ${} store credit for customer {} (balance ${})",
            credit, user_id, new_balance
        );
        Ok(ConversionReceipt {
            success: true,
            credit_added: credit,
            new_balance,
            message: format!(
                "Converted {} {} to ${:.2} store credit",
                tokens, asset.code, credit
            ),
        })
    }
}
