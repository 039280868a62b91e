use std::sync::Arc;

use rust_decimal::Decimal;
use tokio_util::task::TaskTracker;
use tracing::{info, instrument};

use super::{reward_quantity, Replenisher};
use crate::{
    chain::{AssetId, ChainService, PaymentRequest},
    config::RewardConfig,
    error::{AppError, AppResult},
};

/// Pays loyalty tokens from the distributor account to buyers
pub struct RewardDistributor {
    chain: Arc<dyn ChainService>,
    config: RewardConfig,
    replenisher: Arc<Replenisher>,
    tracker: TaskTracker,
}

impl RewardDistributor {
    pub fn new(chain: Arc<dyn ChainService>, config: RewardConfig, tracker: TaskTracker) -> Self {
        let replenisher = Arc::new(Replenisher::new(chain.clone(), config.clone()));
        Self {
            chain,
            config,
            replenisher,
            tracker,
        }
    }

    pub fn asset_code(&self) -> &str {
        &self.config.asset_code
    }

    /// `None` when the total is too large to price a reward for
    pub fn reward_for(&self, total_due: Decimal) -> Option<Decimal> {
        reward_quantity(total_due, self.config.reward_rate)
    }

    /// Send `amount` whole tokens to `buyer`, returning the payment hash.
    /// A liquidity check is kicked off in the background on every call.
    #[instrument(skip(self))]
    pub async fn distribute(&self, buyer: &str, amount: Decimal) -> AppResult<String> {
        let replenisher = self.replenisher.clone();
        self.tracker.spawn(async move { replenisher.run().await });

        let (distributor, distributor_secret, issuer) = match (
            &self.config.distributor_public_key,
            &self.config.distributor_secret,
            &self.config.issuer_public_key,
        ) {
            (Some(public), Some(secret), Some(issuer)) => (public, secret, issuer),
            _ => {
                return Err(AppError::Config(
                    "reward distributor keys and ZMOKE_ISSUER_PUBLIC_KEY must be set".to_string(),
                ))
            }
        };

        let payment = PaymentRequest {
            source_account: distributor.clone(),
            source_secret: distributor_secret.clone(),
            destination: buyer.to_string(),
            asset: AssetId::new(&self.config.asset_code, issuer.clone()),
            amount,
        };

        let tx_hash = self.chain.submit_payment(&payment).await?;
        info!(
            "🎁 Sent {} {} to {} (tx: {})",
            amount, self.config.asset_code, buyer, tx_hash
        );
        Ok(tx_hash)
    }
}
