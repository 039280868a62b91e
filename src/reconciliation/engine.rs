use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio_util::task::TaskTracker;
use tracing::{error, info, instrument, warn};

use super::{
    pipeline::{PipelineOutcome, ReleasePipeline},
    registry::{OrderState, PendingOrder, PendingOrderRegistry, RegistryStats},
};
use crate::{
    config::StellarConfig,
    error::AppResult,
    orders::{OrderId, OrderStore},
};

/// Status the order moves to as soon as the escrow deposit is confirmed
pub const PROCESSING_STATUS: &str = "processing";

/// Order found for an escrow, from the registry or the store
#[derive(Debug, Clone, Serialize)]
pub struct EscrowOrder {
    pub order_id: OrderId,
    pub escrow_id: String,
    pub buyer_account: String,
    pub total_due: Decimal,
    pub status: String,
}

/// Coordinates order intake, explicit escrow confirmation and the
/// background release of funded escrows.
pub struct ReconciliationEngine {
    registry: Arc<PendingOrderRegistry>,
    orders: Arc<dyn OrderStore>,
    pipeline: Arc<ReleasePipeline>,
    stellar: StellarConfig,
    tracker: TaskTracker,
}

impl ReconciliationEngine {
    pub fn new(
        registry: Arc<PendingOrderRegistry>,
        orders: Arc<dyn OrderStore>,
        pipeline: Arc<ReleasePipeline>,
        stellar: StellarConfig,
        tracker: TaskTracker,
    ) -> Self {
        Self {
            registry,
            orders,
            pipeline,
            stellar,
            tracker,
        }
    }

    pub fn registry(&self) -> &Arc<PendingOrderRegistry> {
        &self.registry
    }

    pub fn stats(&self) -> RegistryStats {
        self.registry.stats()
    }

    pub fn notify_order_pending(&self, order_id: OrderId, total_due: Decimal, buyer_account: &str) {
        self.registry.insert(order_id, total_due, buyer_account);
        info!(
            "📥 Order #{} awaiting escrow (total {}, buyer {:?})",
            order_id, total_due, buyer_account
        );
    }

    /// Record a confirmed escrow deposit. Returns once the order is marked as
    /// processing; release and reward continue in the background.
    #[instrument(skip(self))]
    pub async fn confirm_escrow_link(
        &self,
        order_id: OrderId,
        escrow_id: &str,
        buyer_account: &str,
        tx_ref: &str,
    ) -> AppResult<()> {
        let linked = self.registry.link_escrow(order_id, escrow_id, buyer_account);
        let tracked = linked.is_some();

        let mut order = linked.unwrap_or_else(|| PendingOrder {
            order_id,
            total_due: Decimal::ZERO,
            buyer_account: buyer_account.to_string(),
            escrow_id: escrow_id.to_string(),
            created_at: Utc::now(),
            state: OrderState::Linked,
        });

        if order.total_due <= Decimal::ZERO {
            match self.orders.get_order(order_id).await {
                Ok(stored) => order.total_due = stored.total_due(),
                Err(e) => warn!("⚠️ Could not load total for order #{}: {}", order_id, e),
            }
        }

        if let Err(e) = self
            .orders
            .update_status(order_id, PROCESSING_STATUS, tx_ref)
            .await
        {
            error!("❌ Failed to mark order #{} as processing: {}", order_id, e);
            return Err(e);
        }
        info!("✅ Order #{} linked to escrow {}", order_id, escrow_id);

        if let Err(e) = self
            .orders
            .update_escrow_meta(order_id, escrow_id, &order.buyer_account)
            .await
        {
            warn!("⚠️ Could not store escrow metadata on order #{}: {}", order_id, e);
        }
        let note = format!(
            "Escrow payment received. Transaction: {}",
            self.stellar.tx_url(tx_ref)
        );
        if let Err(e) = self.orders.add_note(order_id, &note).await {
            warn!("⚠️ Could not add note to order #{}: {}", order_id, e);
        }

        let claimed = if tracked {
            self.registry.begin_release(order_id)
        } else {
            self.registry.claim_untracked(escrow_id)
        };
        if !claimed {
            info!(
                "⏭️ Release of escrow {} for order #{} already claimed",
                escrow_id, order_id
            );
            return Ok(());
        }

        order.state = OrderState::Releasing;
        self.spawn_release(order, tracked);
        Ok(())
    }

    /// Run the release pipeline as tracked background work. With
    /// `retire_on_success` the order leaves the registry once released; a failed
    /// release leaves it parked for manual follow-up.
    pub fn spawn_release(&self, order: PendingOrder, retire_on_success: bool) {
        let pipeline = self.pipeline.clone();
        let registry = self.registry.clone();

        self.tracker.spawn(async move {
            match pipeline.run(&order).await {
                PipelineOutcome::Released {
                    release_tx,
                    reward_tx,
                } => {
                    info!(
                        "🏁 Order #{} settled (release {}, reward {})",
                        order.order_id,
                        release_tx,
                        reward_tx.as_deref().unwrap_or("none")
                    );
                    if retire_on_success {
                        registry.retire(order.order_id);
                    }
                }
                PipelineOutcome::ReleaseFailed if retire_on_success => {
                    warn!(
                        "⚠️ Order #{} left in releasing state after failed release",
                        order.order_id
                    );
                }
                PipelineOutcome::ReleaseFailed => {}
            }
        });
    }

    pub async fn order_for_escrow(&self, escrow_id: &str) -> AppResult<EscrowOrder> {
        if let Some(order) = self.registry.order_for_escrow(escrow_id) {
            return Ok(EscrowOrder {
                order_id: order.order_id,
                escrow_id: order.escrow_id,
                buyer_account: order.buyer_account,
                total_due: order.total_due,
                status: order.state.as_str().to_string(),
            });
        }

        let stored = self.orders.find_order_by_escrow(escrow_id).await?;
        Ok(EscrowOrder {
            order_id: stored.id,
            escrow_id: escrow_id.to_string(),
            buyer_account: stored.buyer_account().unwrap_or_default().to_string(),
            total_due: stored.total_due(),
            status: stored.status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RewardConfig;
    use crate::error::{AppError, OrderStoreError};
    use crate::orders::{MetaEntry, StoreOrder, META_ESCROW_ID};
    use crate::rewards::RewardDistributor;
    use crate::test_utils::{MockChainService, MockOrderStore};
    use rust_decimal_macros::dec;
    use std::sync::atomic::Ordering;

    struct Harness {
        chain: Arc<MockChainService>,
        orders: Arc<MockOrderStore>,
        engine: ReconciliationEngine,
        tracker: TaskTracker,
    }

    impl Harness {
        fn new(orders: MockOrderStore) -> Self {
            let chain = Arc::new(MockChainService::new());
            chain.set_balance("GDISTRIBUTOR", dec!(1000000));
            let orders = Arc::new(orders);
            let tracker = TaskTracker::new();
            let rewards = RewardConfig {
                issuer_public_key: Some("GISSUER".into()),
                issuer_secret: Some("SISSUER".into()),
                distributor_public_key: Some("GDISTRIBUTOR".into()),
                distributor_secret: Some("SDISTRIBUTOR".into()),
                ..RewardConfig::default()
            };
            let distributor = Arc::new(RewardDistributor::new(
                chain.clone(),
                rewards,
                tracker.clone(),
            ));
            let pipeline = Arc::new(ReleasePipeline::new(
                chain.clone(),
                orders.clone(),
                distributor,
                StellarConfig::default(),
                PROCESSING_STATUS.into(),
            ));
            let engine = ReconciliationEngine::new(
                Arc::new(PendingOrderRegistry::new()),
                orders.clone(),
                pipeline,
                StellarConfig::default(),
                tracker.clone(),
            );
            Self {
                chain,
                orders,
                engine,
                tracker,
            }
        }

        async fn drain(&self) {
            self.tracker.close();
            self.tracker.wait().await;
        }
    }

    fn store_order(id: u64, total: &str) -> StoreOrder {
        StoreOrder {
            id,
            status: "pending".into(),
            total: total.into(),
            meta_data: vec![],
        }
    }

    #[tokio::test]
    async fn test_link_releases_and_rewards() {
        let h = Harness::new(MockOrderStore::new());
        h.engine.notify_order_pending(501, dec!(25.00), "");

        h.engine
            .confirm_escrow_link(501, "ESC501", "GABC", "deposit-tx")
            .await
            .unwrap();

        // Synchronous part: processing with the deposit reference
        assert_eq!(
            h.orders.statuses_for(501)[0],
            ("processing".to_string(), "deposit-tx".to_string())
        );
        assert_eq!(
            h.orders.escrow_meta.lock()[0],
            (501, "ESC501".to_string(), "GABC".to_string())
        );

        h.drain().await;

        assert_eq!(h.chain.releases.lock().as_slice(), ["ESC501".to_string()]);
        let paid = h.chain.payments_to("GABC");
        assert_eq!(paid.len(), 1);
        assert_eq!(paid[0].amount, dec!(250));
        assert!(h.engine.registry().get(501).is_none());
        assert_eq!(h.orders.statuses_for(501).len(), 2);
    }

    #[tokio::test]
    async fn test_link_unknown_order_uses_store_total() {
        let h = Harness::new(MockOrderStore::new().with_order(store_order(77, "4.50")));

        h.engine
            .confirm_escrow_link(77, "ESC77", "GBUY", "tx77")
            .await
            .unwrap();
        h.drain().await;

        assert_eq!(h.chain.release_count(), 1);
        assert_eq!(h.chain.payments_to("GBUY")[0].amount, dec!(45));
        assert!(h.engine.registry().is_empty());
    }

    #[tokio::test]
    async fn test_zero_registry_total_falls_back_to_store() {
        let h = Harness::new(MockOrderStore::new().with_order(store_order(78, "12.35")));
        h.engine.notify_order_pending(78, Decimal::ZERO, "GBUY");

        h.engine
            .confirm_escrow_link(78, "ESC78", "GBUY", "tx78")
            .await
            .unwrap();
        h.drain().await;

        assert_eq!(h.chain.release_count(), 1);
        assert_eq!(h.chain.payments_to("GBUY")[0].amount, dec!(123));
        assert!(h.engine.registry().get(78).is_none());
    }

    #[tokio::test]
    async fn test_oversized_total_still_settles() {
        let h = Harness::new(MockOrderStore::new());
        h.engine.notify_order_pending(90, Decimal::MAX, "GBIG");

        h.engine
            .confirm_escrow_link(90, "ESC90", "GBIG", "tx90")
            .await
            .unwrap();
        h.drain().await;

        assert_eq!(h.chain.release_count(), 1);
        assert!(h.chain.payments_to("GBIG").is_empty());
        assert!(h.engine.registry().get(90).is_none());
        assert_eq!(
            h.orders.statuses_for(90).last().unwrap(),
            &("processing".to_string(), "release-tx-ESC90".to_string())
        );
    }

    #[tokio::test]
    async fn test_status_failure_is_fatal() {
        let h = Harness::new(MockOrderStore::new());
        h.orders.fail_status_update.store(true, Ordering::SeqCst);
        h.engine.notify_order_pending(5, dec!(10), "GABC");

        let err = h
            .engine
            .confirm_escrow_link(5, "ESC5", "GABC", "tx5")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::OrderStore(OrderStoreError::Api { status: 500, .. })
        ));

        h.drain().await;
        assert_eq!(h.chain.release_count(), 0);
        // Still linked so the poller can pick it up
        assert_eq!(h.engine.registry().get(5).unwrap().state, OrderState::Linked);
    }

    #[tokio::test]
    async fn test_failed_release_parks_order() {
        let h = Harness::new(MockOrderStore::new());
        h.chain.fail_release.store(true, Ordering::SeqCst);
        h.engine.notify_order_pending(8, dec!(10), "GABC");

        h.engine
            .confirm_escrow_link(8, "ESC8", "GABC", "tx8")
            .await
            .unwrap();
        h.drain().await;

        let parked = h.engine.registry().get(8).unwrap();
        assert_eq!(parked.state, OrderState::Releasing);
        assert_eq!(h.engine.registry().unresolved_count(), 0);
        assert_eq!(h.engine.stats().releasing, 1);
    }

    #[tokio::test]
    async fn test_link_skips_release_claimed_by_poller() {
        let h = Harness::new(MockOrderStore::new());
        h.engine.notify_order_pending(3, dec!(10), "GABC");
        h.engine.registry().link_escrow(3, "ESC3", "GABC");
        assert!(h.engine.registry().begin_release(3));

        h.engine
            .confirm_escrow_link(3, "ESC3", "GABC", "tx3")
            .await
            .unwrap();
        h.drain().await;

        assert_eq!(h.chain.release_count(), 0);
    }

    #[tokio::test]
    async fn test_late_link_after_poller_claim_is_skipped() {
        let h = Harness::new(MockOrderStore::new().with_order(store_order(4, "10")));
        h.engine.notify_order_pending(4, dec!(10), "GABC");
        h.engine.registry().link_escrow(4, "ESC4", "GABC");
        assert!(h.engine.registry().claim_linked(4).is_some());

        h.engine
            .confirm_escrow_link(4, "ESC4", "GABC", "tx4")
            .await
            .unwrap();
        h.drain().await;

        assert_eq!(h.chain.release_count(), 0);
        assert_eq!(h.orders.statuses_for(4).len(), 1);
    }

    #[tokio::test]
    async fn test_order_for_escrow_lookup() {
        let mut stored = store_order(12, "9.99");
        stored.meta_data.push(MetaEntry::new(META_ESCROW_ID, "ESC-STORE"));
        let h = Harness::new(MockOrderStore::new().with_order(stored));
        h.engine.notify_order_pending(11, dec!(2), "");
        h.engine.registry().link_escrow(11, "ESC-LIVE", "GABC");

        let live = h.engine.order_for_escrow("ESC-LIVE").await.unwrap();
        assert_eq!(live.order_id, 11);
        assert_eq!(live.status, "linked");

        let from_store = h.engine.order_for_escrow("ESC-STORE").await.unwrap();
        assert_eq!(from_store.order_id, 12);
        assert_eq!(from_store.total_due, dec!(9.99));

        let missing = h.engine.order_for_escrow("ESC-NONE").await.unwrap_err();
        assert!(matches!(
            missing,
            AppError::OrderStore(OrderStoreError::EscrowNotLinked(_))
        ));
    }
}
