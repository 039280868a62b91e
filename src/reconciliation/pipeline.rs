use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{error, info, instrument, warn};

use super::registry::PendingOrder;
use crate::{
    chain::ChainService, config::StellarConfig, orders::OrderStore, rewards::RewardDistributor,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    Released {
        release_tx: String,
        reward_tx: Option<String>,
    },
    ReleaseFailed,
}

impl PipelineOutcome {
    #[cfg(test)]
    pub fn is_released(&self) -> bool {
        matches!(self, PipelineOutcome::Released { .. })
    }
}

/// Release escrow, pay the buyer's reward, close out the order.
/// Steps run strictly in sequence; only a failed release stops the run.
pub struct ReleasePipeline {
    chain: Arc<dyn ChainService>,
    orders: Arc<dyn OrderStore>,
    rewards: Arc<RewardDistributor>,
    stellar: StellarConfig,
    final_status: String,
}

impl ReleasePipeline {
    pub fn new(
        chain: Arc<dyn ChainService>,
        orders: Arc<dyn OrderStore>,
        rewards: Arc<RewardDistributor>,
        stellar: StellarConfig,
        final_status: String,
    ) -> Self {
        Self {
            chain,
            orders,
            rewards,
            stellar,
            final_status,
        }
    }

    #[instrument(skip(self, order), fields(order_id = order.order_id, escrow_id = %order.escrow_id))]
    pub async fn run(&self, order: &PendingOrder) -> PipelineOutcome {
        let order_id = order.order_id;

        let release_tx = match self.chain.release_escrow(&order.escrow_id).await {
            Ok(tx) => tx,
            Err(e) => {
                error!("❌ Escrow release failed for order #{}: {}", order_id, e);
                self.note(order_id, &format!("Escrow release failed: {}", e))
                    .await;
                return PipelineOutcome::ReleaseFailed;
            }
        };

        info!("🔓 Escrow {} released for order #{}", order.escrow_id, order_id);
        self.note(
            order_id,
            &format!(
                "Escrow released to seller. Transaction: {}",
                self.stellar.tx_url(&release_tx)
            ),
        )
        .await;

        let reward_tx = self.reward(order).await;

        if let Err(e) = self
            .orders
            .update_status(order_id, &self.final_status, &release_tx)
            .await
        {
            error!(
                "❌ Failed to set order #{} to {}: {}",
                order_id, self.final_status, e
            );
        }

        PipelineOutcome::Released {
            release_tx,
            reward_tx,
        }
    }

    async fn reward(&self, order: &PendingOrder) -> Option<String> {
        if order.buyer_account.is_empty() || order.total_due <= Decimal::ZERO {
            info!(
                "⏭️ No reward for order #{} (buyer: {:?}, total: {})",
                order.order_id, order.buyer_account, order.total_due
            );
            return None;
        }

        let Some(quantity) = self.rewards.reward_for(order.total_due) else {
            error!(
                "❌ Reward for order #{} overflows (total: {})",
                order.order_id, order.total_due
            );
            self.note(
                order.order_id,
                &format!(
                    "Reward distribution failed: order total {} is out of range",
                    order.total_due
                ),
            )
            .await;
            return None;
        };
        if quantity.is_zero() {
            info!("⏭️ Reward for order #{} rounds down to zero", order.order_id);
            return None;
        }

        match self.rewards.distribute(&order.buyer_account, quantity).await {
            Ok(tx) => {
                self.note(
                    order.order_id,
                    &format!(
                        "Reward of {} {} sent to {}. Transaction: {}",
                        quantity,
                        self.rewards.asset_code(),
                        order.buyer_account,
                        self.stellar.tx_url(&tx)
                    ),
                )
                .await;
                Some(tx)
            }
            Err(e) => {
                error!("❌ Reward distribution failed for order #{}: {}", order.order_id, e);
                self.note(order.order_id, &format!("Reward distribution failed: {}", e))
                    .await;
                None
            }
        }
    }

    async fn note(&self, order_id: u64, note: &str) {
        if let Err(e) = self.orders.add_note(order_id, note).await {
            warn!("⚠️ Could not add note to order #{}: {}", order_id, e);
        }
    }
}
