//! In-memory collaborators shared by the unit tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::chain::{
    AssetId, ChainService, OracleReading, PaymentRequest, PricePair, ReceivedPayment,
};
use crate::error::{AppResult, ChainError, OrderStoreError};
use crate::orders::{OrderId, OrderStore, StoreOrder};

#[derive(Default)]
pub struct MockChainService {
    pub funded: Mutex<HashMap<String, bool>>,
    pub escrow_queries: AtomicUsize,
    pub fail_escrow_query: AtomicBool,
    pub releases: Mutex<Vec<String>>,
    pub release_delay: Mutex<Option<Duration>>,
    pub fail_release: AtomicBool,
    pub payments: Mutex<Vec<PaymentRequest>>,
    pub fail_payment: AtomicBool,
    pub balances: Mutex<HashMap<String, Decimal>>,
    pub oracle: Mutex<Option<OracleReading>>,
    pub oracle_calls: AtomicUsize,
    pub fail_oracle: AtomicBool,
    pub asset_payments: Mutex<HashMap<String, ReceivedPayment>>,
    pub fail_asset_lookup: AtomicBool,
}

impl MockChainService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_funded(&self, escrow_id: &str, funded: bool) {
        self.funded.lock().insert(escrow_id.to_string(), funded);
    }

    pub fn set_balance(&self, account: &str, balance: Decimal) {
        self.balances.lock().insert(account.to_string(), balance);
    }

    pub fn set_oracle_price(&self, price: i128) {
        *self.oracle.lock() = Some(OracleReading {
            price,
            timestamp: 1_700_000_000,
        });
    }

    pub fn release_count(&self) -> usize {
        self.releases.lock().len()
    }

    pub fn payments_to(&self, destination: &str) -> Vec<PaymentRequest> {
        self.payments
            .lock()
            .iter()
            .filter(|p| p.destination == destination)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ChainService for MockChainService {
    async fn submit_payment(&self, payment: &PaymentRequest) -> AppResult<String> {
        if self.fail_payment.load(Ordering::SeqCst) {
            return Err(ChainError::CommandFailed {
                command: "tx send".into(),
                output: "tx_failed".into(),
            }
            .into());
        }
        let mut payments = self.payments.lock();
        payments.push(payment.clone());
        Ok(format!("payment-tx-{}", payments.len()))
    }

    async fn query_escrow(&self, escrow_id: &str) -> AppResult<bool> {
        self.escrow_queries.fetch_add(1, Ordering::SeqCst);
        if self.fail_escrow_query.load(Ordering::SeqCst) {
            return Err(ChainError::Transport("connection reset".into()).into());
        }
        Ok(self.funded.lock().get(escrow_id).copied().unwrap_or(false))
    }

    async fn release_escrow(&self, escrow_id: &str) -> AppResult<String> {
        let delay = *self.release_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_release.load(Ordering::SeqCst) {
            return Err(ChainError::CommandFailed {
                command: "contract invoke release".into(),
                output: "HostError".into(),
            }
            .into());
        }
        self.releases.lock().push(escrow_id.to_string());
        Ok(format!("release-tx-{}", escrow_id))
    }

    async fn query_balance(&self, account: &str, _asset_code: &str) -> AppResult<Decimal> {
        Ok(self
            .balances
            .lock()
            .get(account)
            .copied()
            .unwrap_or(Decimal::ZERO))
    }

    async fn query_oracle_price(&self, _pair: &PricePair) -> AppResult<Option<OracleReading>> {
        self.oracle_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_oracle.load(Ordering::SeqCst) {
            return Err(ChainError::Transport("oracle unreachable".into()).into());
        }
        Ok(*self.oracle.lock())
    }

    async fn find_asset_payment(
        &self,
        tx_hash: &str,
        _destination: &str,
        _asset: &AssetId,
    ) -> AppResult<Option<ReceivedPayment>> {
        if self.fail_asset_lookup.load(Ordering::SeqCst) {
            return Err(ChainError::Horizon {
                status: 404,
                body: "Resource Missing".into(),
            }
            .into());
        }
        Ok(self.asset_payments.lock().get(tx_hash).cloned())
    }
}

#[derive(Default)]
pub struct MockOrderStore {
    pub orders: Mutex<HashMap<OrderId, StoreOrder>>,
    pub status_updates: Mutex<Vec<(OrderId, String, String)>>,
    pub fail_status_update: AtomicBool,
    pub escrow_meta: Mutex<Vec<(OrderId, String, String)>>,
    pub notes: Mutex<Vec<(OrderId, String)>>,
    pub wallets: Mutex<HashMap<OrderId, String>>,
    pub credits: Mutex<HashMap<OrderId, Decimal>>,
}

impl MockOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_order(self, order: StoreOrder) -> Self {
        self.orders.lock().insert(order.id, order);
        self
    }

    pub fn statuses_for(&self, order_id: OrderId) -> Vec<(String, String)> {
        self.status_updates
            .lock()
            .iter()
            .filter(|(id, _, _)| *id == order_id)
            .map(|(_, status, tx)| (status.clone(), tx.clone()))
            .collect()
    }

    pub fn notes_for(&self, order_id: OrderId) -> Vec<String> {
        self.notes
            .lock()
            .iter()
            .filter(|(id, _)| *id == order_id)
            .map(|(_, note)| note.clone())
            .collect()
    }
}

#[async_trait]
impl OrderStore for MockOrderStore {
    async fn get_order(&self, order_id: OrderId) -> AppResult<StoreOrder> {
        self.orders
            .lock()
            .get(&order_id)
            .cloned()
            .ok_or_else(|| OrderStoreError::OrderNotFound(order_id).into())
    }

    async fn update_status(&self, order_id: OrderId, status: &str, tx_hash: &str) -> AppResult<()> {
        if self.fail_status_update.load(Ordering::SeqCst) {
            return Err(OrderStoreError::Api {
                status: 500,
                body: "internal error".into(),
            }
            .into());
        }
        self.status_updates
            .lock()
            .push((order_id, status.to_string(), tx_hash.to_string()));
        if let Some(order) = self.orders.lock().get_mut(&order_id) {
            order.status = status.to_string();
        }
        Ok(())
    }

    async fn update_escrow_meta(
        &self,
        order_id: OrderId,
        escrow_id: &str,
        buyer_account: &str,
    ) -> AppResult<()> {
        self.escrow_meta
            .lock()
            .push((order_id, escrow_id.to_string(), buyer_account.to_string()));
        Ok(())
    }

    async fn add_note(&self, order_id: OrderId, note: &str) -> AppResult<()> {
        self.notes.lock().push((order_id, note.to_string()));
        Ok(())
    }

    async fn list_orders(&self, status: &str) -> AppResult<Vec<StoreOrder>> {
        Ok(self
            .orders
            .lock()
            .values()
            .filter(|order| order.status == status)
            .cloned()
            .collect())
    }

    async fn customer_wallet(&self, customer_id: OrderId) -> AppResult<String> {
        self.wallets
            .lock()
            .get(&customer_id)
            .cloned()
            .ok_or_else(|| OrderStoreError::WalletNotLinked(customer_id).into())
    }

    async fn add_store_credit(&self, customer_id: OrderId, amount: Decimal) -> AppResult<Decimal> {
        let mut credits = self.credits.lock();
        let balance = credits.entry(customer_id).or_insert(Decimal::ZERO);
        *balance += amount;
        Ok(*balance)
    }
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
