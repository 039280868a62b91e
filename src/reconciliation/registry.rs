use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::orders::OrderId;

/// How long a claimed escrow keeps blocking a second release
pub const CLAIM_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Reconciliation state of an order still held by the registry.
/// Retired orders are simply absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    /// Waiting for the buyer to deposit into escrow
    Pending,
    /// Escrow identity attached, funding not yet acted on
    Linked,
    /// Release in flight on the explicit-link path
    Releasing,
}

impl OrderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::Pending => "pending",
            OrderState::Linked => "linked",
            OrderState::Releasing => "releasing",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingOrder {
    pub order_id: OrderId,
    pub total_due: Decimal,
    pub buyer_account: String,
    pub escrow_id: String,
    pub created_at: DateTime<Utc>,
    pub state: OrderState,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub pending: usize,
    pub linked: usize,
    pub releasing: usize,
}

struct RegistryInner {
    orders: HashMap<OrderId, PendingOrder>,
    escrow_index: HashMap<String, OrderId>,
    /// Escrows whose release has been claimed by either detector, with the
    /// claim time. Entries older than `claim_retention` are pruned.
    claimed_escrows: HashMap<String, Instant>,
    claim_retention: Duration,
}

impl RegistryInner {
    /// Record a release claim. `false` when a live claim already exists.
    fn mark_claimed(&mut self, escrow_id: &str) -> bool {
        let now = Instant::now();
        let retention = self.claim_retention;
        self.claimed_escrows
            .retain(|_, claimed_at| now.duration_since(*claimed_at) < retention);
        if self.claimed_escrows.contains_key(escrow_id) {
            return false;
        }
        self.claimed_escrows.insert(escrow_id.to_string(), now);
        true
    }

    fn remove(&mut self, order_id: OrderId) -> Option<PendingOrder> {
        let order = self.orders.remove(&order_id)?;
        self.unindex(&order);
        Some(order)
    }

    /// Drop the reverse entry only if it still points at this order
    fn unindex(&mut self, order: &PendingOrder) {
        if order.escrow_id.is_empty() {
            return;
        }
        if self.escrow_index.get(&order.escrow_id) == Some(&order.order_id) {
            self.escrow_index.remove(&order.escrow_id);
        }
    }
}

/// In-memory registry of orders awaiting a confirmed escrow deposit.
///
/// Every mutation takes the single write lock; reads share it. The lock is
/// synchronous, so it can never be held across network I/O.
pub struct PendingOrderRegistry {
    inner: RwLock<RegistryInner>,
}

impl Default for PendingOrderRegistry {
    fn default() -> Self {
        Self::with_claim_retention(CLAIM_RETENTION)
    }
}

impl PendingOrderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_claim_retention(claim_retention: Duration) -> Self {
        Self {
            inner: RwLock::new(RegistryInner {
                orders: HashMap::new(),
                escrow_index: HashMap::new(),
                claimed_escrows: HashMap::new(),
                claim_retention,
            }),
        }
    }

    /// Upsert an order in `Pending` state
    pub fn insert(&self, order_id: OrderId, total_due: Decimal, buyer_account: &str) {
        let mut inner = self.inner.write();
        if let Some(previous) = inner.orders.remove(&order_id) {
            inner.unindex(&previous);
        }
        inner.orders.insert(
            order_id,
            PendingOrder {
                order_id,
                total_due,
                buyer_account: buyer_account.to_string(),
                escrow_id: String::new(),
                created_at: Utc::now(),
                state: OrderState::Pending,
            },
        );
    }

    /// Attach escrow and buyer. Returns the registered order (after update), or
    /// `None` when the order is unknown, in which case nothing changes.
    pub fn link_escrow(
        &self,
        order_id: OrderId,
        escrow_id: &str,
        buyer_account: &str,
    ) -> Option<PendingOrder> {
        let mut inner = self.inner.write();
        let RegistryInner {
            orders,
            escrow_index,
            ..
        } = &mut *inner;

        let order = orders.get_mut(&order_id)?;

        if !order.escrow_id.is_empty() && order.escrow_id != escrow_id {
            if escrow_index.get(&order.escrow_id) == Some(&order_id) {
                escrow_index.remove(&order.escrow_id);
            }
        }

        // An escrow claimed by another live order moves to this one
        if let Some(other_id) = escrow_index.insert(escrow_id.to_string(), order_id) {
            if other_id != order_id {
                if let Some(other) = orders.get_mut(&other_id) {
                    other.escrow_id.clear();
                    if other.state == OrderState::Linked {
                        other.state = OrderState::Pending;
                    }
                }
            }
        }

        let order = orders.get_mut(&order_id)?;
        order.escrow_id = escrow_id.to_string();
        if !buyer_account.is_empty() {
            order.buyer_account = buyer_account.to_string();
        }
        if order.state == OrderState::Pending {
            order.state = OrderState::Linked;
        }

        Some(order.clone())
    }

    /// `Linked -> Releasing`. `false` when the order is gone or already past
    /// `Linked`, meaning another detector owns the release.
    pub fn begin_release(&self, order_id: OrderId) -> bool {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        match inner.orders.get_mut(&order_id) {
            Some(order) if order.state == OrderState::Linked => {
                order.state = OrderState::Releasing;
                let escrow_id = order.escrow_id.clone();
                inner.mark_claimed(&escrow_id);
                true
            }
            _ => false,
        }
    }

    /// Claim the release of an escrow whose order is not registered.
    /// `false` when a release of that escrow was already claimed.
    pub fn claim_untracked(&self, escrow_id: &str) -> bool {
        self.inner.write().mark_claimed(escrow_id)
    }

    /// Atomically remove the order if it is still `Linked`
    pub fn claim_linked(&self, order_id: OrderId) -> Option<PendingOrder> {
        let mut inner = self.inner.write();
        let linked = matches!(
            inner.orders.get(&order_id),
            Some(order) if order.state == OrderState::Linked
        );
        if !linked {
            return None;
        }
        let claimed = inner.remove(order_id)?;
        inner.mark_claimed(&claimed.escrow_id);
        Some(claimed)
    }

    /// Remove the order and its escrow index entry. Idempotent.
    pub fn retire(&self, order_id: OrderId) -> Option<PendingOrder> {
        self.inner.write().remove(order_id)
    }

    #[cfg(test)]
    pub fn get(&self, order_id: OrderId) -> Option<PendingOrder> {
        self.inner.read().orders.get(&order_id).cloned()
    }

    pub fn order_for_escrow(&self, escrow_id: &str) -> Option<PendingOrder> {
        let inner = self.inner.read();
        inner
            .escrow_index
            .get(escrow_id)
            .and_then(|order_id| inner.orders.get(order_id))
            .cloned()
    }

    /// Linked orders the poller should check. Cloned under the read lock and
    /// consumed after it is released.
    pub fn snapshot_unresolved(&self) -> impl Iterator<Item = (OrderId, PendingOrder)> {
        let inner = self.inner.read();
        let snapshot: Vec<(OrderId, PendingOrder)> = inner
            .orders
            .iter()
            .filter(|(_, order)| !order.escrow_id.is_empty() && order.state == OrderState::Linked)
            .map(|(id, order)| (*id, order.clone()))
            .collect();
        snapshot.into_iter()
    }

    pub fn unresolved_count(&self) -> usize {
        self.inner
            .read()
            .orders
            .values()
            .filter(|order| !order.escrow_id.is_empty() && order.state == OrderState::Linked)
            .count()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.read().orders.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> RegistryStats {
        let inner = self.inner.read();
        inner
            .orders
            .values()
            .fold(RegistryStats::default(), |mut stats, order| {
                match order.state {
                    OrderState::Pending => stats.pending += 1,
                    OrderState::Linked => stats.linked += 1,
                    OrderState::Releasing => stats.releasing += 1,
                }
                stats
            })
    }
}
