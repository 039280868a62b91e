use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info};
use uuid::Uuid;

use super::{engine::ReconciliationEngine, registry::PendingOrder};
use crate::{chain::ChainService, orders::OrderId};

/// Periodically checks linked escrows and releases the funded ones
pub struct EscrowPoller {
    engine: Arc<ReconciliationEngine>,
    chain: Arc<dyn ChainService>,
    interval: Duration,
    tracker: TaskTracker,
    in_flight: Mutex<HashSet<OrderId>>,
}

/// Clears the in-flight mark when a check finishes, however it ends
struct InFlight<'a> {
    set: &'a Mutex<HashSet<OrderId>>,
    order_id: OrderId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.order_id);
    }
}

impl EscrowPoller {
    pub fn new(
        engine: Arc<ReconciliationEngine>,
        chain: Arc<dyn ChainService>,
        interval: Duration,
        tracker: TaskTracker,
    ) -> Self {
        Self {
            engine,
            chain,
            interval,
            tracker,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let run_id = Uuid::new_v4();
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(
            "🔁 Escrow poller started (run {}, every {:?})",
            run_id, self.interval
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("🛑 Escrow poller stopped (run {})", run_id);
                    break;
                }
                _ = interval.tick() => {
                    let spawned = self.poll_once();
                    if spawned > 0 {
                        debug!("🔍 Checking {} escrow(s)", spawned);
                    }
                }
            }
        }
    }

    /// Spawn one funding check per unresolved order not already being
    /// checked. Returns the number of checks started.
    pub fn poll_once(self: &Arc<Self>) -> usize {
        if self.engine.registry().unresolved_count() == 0 {
            return 0;
        }

        let mut spawned = 0;
        for (order_id, order) in self.engine.registry().snapshot_unresolved() {
            if !self.in_flight.lock().insert(order_id) {
                debug!("⏭️ Order #{} still being checked", order_id);
                continue;
            }

            let poller = self.clone();
            self.tracker
                .spawn(async move { poller.check_order(order_id, order).await });
            spawned += 1;
        }
        spawned
    }

    async fn check_order(&self, order_id: OrderId, order: PendingOrder) {
        let _guard = InFlight {
            set: &self.in_flight,
            order_id,
        };

        match self.chain.query_escrow(&order.escrow_id).await {
            Ok(true) => {
                let Some(claimed) = self.engine.registry().claim_linked(order_id) else {
                    debug!("⏭️ Order #{} already handled", order_id);
                    return;
                };
                info!(
                    "💰 Escrow {} funded, releasing order #{}",
                    claimed.escrow_id, order_id
                );
                self.engine.spawn_release(claimed, false);
            }
            Ok(false) => debug!("⏳ Escrow {} not funded yet", order.escrow_id),
            Err(e) => error!(
                "❌ Escrow query failed for order #{} ({}): {}",
                order_id, order.escrow_id, e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RewardConfig, StellarConfig};
    use crate::reconciliation::{pipeline::ReleasePipeline, registry::PendingOrderRegistry};
    use crate::rewards::RewardDistributor;
    use crate::test_utils::{wait_until, MockChainService, MockOrderStore};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::atomic::Ordering;

    struct Harness {
        chain: Arc<MockChainService>,
        orders: Arc<MockOrderStore>,
        engine: Arc<ReconciliationEngine>,
        poller: Arc<EscrowPoller>,
        tracker: TaskTracker,
    }

    fn harness() -> Harness {
        let chain = Arc::new(MockChainService::new());
        chain.set_balance("GDISTRIBUTOR", dec!(1000000));
        let orders = Arc::new(MockOrderStore::new());
        let tracker = TaskTracker::new();
        let rewards = RewardConfig {
            issuer_public_key: Some("GISSUER".into()),
            issuer_secret: Some("SISSUER".into()),
            distributor_public_key: Some("GDISTRIBUTOR".into()),
            distributor_secret: Some("SDISTRIBUTOR".into()),
            ..RewardConfig::default()
        };
        let distributor = Arc::new(RewardDistributor::new(chain.clone(), rewards, tracker.clone()));
        let pipeline = Arc::new(ReleasePipeline::new(
            chain.clone(),
            orders.clone(),
            distributor,
            StellarConfig::default(),
            "processing".into(),
        ));
        let engine = Arc::new(ReconciliationEngine::new(
            Arc::new(PendingOrderRegistry::new()),
            orders.clone(),
            pipeline,
            StellarConfig::default(),
            tracker.clone(),
        ));
        let poller = Arc::new(EscrowPoller::new(
            engine.clone(),
            chain.clone(),
            Duration::from_millis(10),
            tracker.clone(),
        ));
        Harness {
            chain,
            orders,
            engine,
            poller,
            tracker,
        }
    }

    #[tokio::test]
    async fn test_idle_registry_makes_no_queries() {
        let h = harness();
        h.engine.notify_order_pending(1, dec!(5), "GABC");

        assert_eq!(h.poller.poll_once(), 0);
        assert_eq!(h.chain.escrow_queries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_funded_zero_total_order_released_without_reward() {
        let h = harness();
        h.engine.notify_order_pending(502, Decimal::ZERO, "GABC");
        h.engine.registry().link_escrow(502, "ESC502", "GABC");
        h.chain.set_funded("ESC502", true);

        assert_eq!(h.poller.poll_once(), 1);
        h.tracker.close();
        h.tracker.wait().await;

        assert!(h.engine.registry().get(502).is_none());
        assert_eq!(h.chain.releases.lock().as_slice(), ["ESC502".to_string()]);
        assert!(h.chain.payments.lock().is_empty());
        assert_eq!(
            h.orders.statuses_for(502),
            vec![("processing".to_string(), "release-tx-ESC502".to_string())]
        );
    }

    #[tokio::test]
    async fn test_query_failure_does_not_retire() {
        let h = harness();
        h.engine.notify_order_pending(4, dec!(5), "GABC");
        h.engine.registry().link_escrow(4, "ESC4", "GABC");
        h.chain.fail_escrow_query.store(true, Ordering::SeqCst);

        h.poller.poll_once();
        h.tracker.close();
        h.tracker.wait().await;

        assert!(h.engine.registry().get(4).is_some());
        assert_eq!(h.chain.release_count(), 0);
    }

    #[tokio::test]
    async fn test_unfunded_escrow_stays_linked() {
        let h = harness();
        h.engine.notify_order_pending(6, dec!(5), "GABC");
        h.engine.registry().link_escrow(6, "ESC6", "GABC");

        h.poller.poll_once();
        h.tracker.close();
        h.tracker.wait().await;

        assert_eq!(h.chain.escrow_queries.load(Ordering::SeqCst), 1);
        assert_eq!(h.engine.registry().unresolved_count(), 1);
    }

    #[tokio::test]
    async fn test_link_and_poller_release_once() {
        let h = harness();
        *h.chain.release_delay.lock() = Some(Duration::from_millis(20));
        h.engine.notify_order_pending(9, dec!(10), "GABC");
        h.engine.registry().link_escrow(9, "ESC9", "GABC");
        h.chain.set_funded("ESC9", true);

        let polling = {
            let poller = h.poller.clone();
            tokio::spawn(async move { poller.poll_once() })
        };
        h.engine
            .confirm_escrow_link(9, "ESC9", "GABC", "tx9")
            .await
            .unwrap();
        polling.await.unwrap();
        h.poller.poll_once();

        h.tracker.close();
        h.tracker.wait().await;

        assert_eq!(h.chain.release_count(), 1);
        assert_eq!(h.chain.payments_to("GABC").len(), 1);
        assert!(h.engine.registry().is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let h = harness();
        h.engine.notify_order_pending(20, dec!(1), "GABC");
        h.engine.registry().link_escrow(20, "ESC20", "GABC");

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(h.poller.clone().run(cancel.clone()));

        let chain = h.chain.clone();
        assert!(
            wait_until(Duration::from_secs(2), || {
                chain.escrow_queries.load(Ordering::SeqCst) >= 2
            })
            .await
        );

        cancel.cancel();
        handle.await.unwrap();
        h.tracker.close();
        h.tracker.wait().await;

        let after = h.chain.escrow_queries.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(h.chain.escrow_queries.load(Ordering::SeqCst), after);
    }
}
