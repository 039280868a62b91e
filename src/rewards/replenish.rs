use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use crate::{
    chain::{AssetId, ChainService, PaymentRequest},
    config::RewardConfig,
    error::{AppError, AppResult},
};

/// Keeps the distributor account stocked with reward tokens by minting from
/// the issuing account whenever the balance falls below the low water mark.
pub struct Replenisher {
    chain: Arc<dyn ChainService>,
    config: RewardConfig,
}

impl Replenisher {
    pub fn new(chain: Arc<dyn ChainService>, config: RewardConfig) -> Self {
        Self { chain, config }
    }

    /// Returns the mint transaction hash when a top-up was submitted
    #[instrument(skip(self))]
    pub async fn check_and_replenish(&self) -> AppResult<Option<String>> {
        let distributor = self.config.distributor_public_key.as_deref().ok_or_else(|| {
            AppError::Config("ZMOKE_DISTRIBUTOR_PUBLIC_KEY not set".to_string())
        })?;

        let balance = self
            .chain
            .query_balance(distributor, &self.config.asset_code)
            .await?;

        if balance >= self.config.low_water_mark {
            debug!(
                "✓ Distributor holds {} {} (low water {})",
                balance, self.config.asset_code, self.config.low_water_mark
            );
            return Ok(None);
        }

        warn!(
            "⚠️ Distributor balance {} {} below {}, replenishing",
            balance, self.config.asset_code, self.config.low_water_mark
        );

        let (issuer, issuer_secret) = match (
            &self.config.issuer_public_key,
            &self.config.issuer_secret,
        ) {
            (Some(public), Some(secret)) => (public, secret),
            _ => {
                return Err(AppError::Config(
                    "ZMOKE_ISSUER_PUBLIC_KEY and ZMOKE_ISSUER_SECRET must be set".to_string(),
                ))
            }
        };

        let payment = PaymentRequest {
            source_account: issuer.clone(),
            source_secret: issuer_secret.clone(),
            destination: distributor.to_string(),
            asset: AssetId::new(&self.config.asset_code, issuer.clone()),
            amount: self.config.replenish_amount,
        };

        let tx_hash = self.chain.submit_payment(&payment).await?;
        info!(
            "🪙 Minted {} {} to distributor (tx: {})",
            self.config.replenish_amount, self.config.asset_code, tx_hash
        );
        Ok(Some(tx_hash))
    }

    /// Background entry point; nothing is reported back to the caller
    pub async fn run(&self) {
        if let Err(e) = self.check_and_replenish().await {
            error!("❌ Reward token replenishment failed: {}", e);
        }
    }
}
