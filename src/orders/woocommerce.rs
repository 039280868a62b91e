use std::str::FromStr;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use super::{
    models::{MetaEntry, OrderId, StoreOrder},
    OrderStore, META_BUYER_ADDRESS, META_ESCROW_ID, META_TX_HASH,
};
use crate::{
    config::WooCommerceConfig,
    error::{AppError, AppResult, OrderStoreError},
};

const CUSTOMER_WALLET_KEY: &str = "_stellar_public_key";
const STORE_CREDIT_KEY: &str = "_zmoke_store_credit";

#[derive(Debug, Serialize)]
struct OrderUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    meta_data: Vec<MetaEntry>,
}

#[derive(Debug, Deserialize)]
struct Customer {
    #[serde(default)]
    meta_data: Vec<MetaEntry>,
}

impl Customer {
    fn meta(&self, key: &str) -> Option<&str> {
        self.meta_data
            .iter()
            .find(|m| m.key == key)
            .and_then(MetaEntry::value_str)
    }
}

/// WooCommerce REST v3 client
pub struct WooCommerceClient {
    config: WooCommerceConfig,
    client: Client,
}

impl WooCommerceClient {
    pub fn new(config: WooCommerceConfig, client: Client) -> Self {
        Self { config, client }
    }

    /// Missing credentials are reported per call rather than at startup
    fn request(&self, method: reqwest::Method, path: &str) -> AppResult<RequestBuilder> {
        let (base_url, key, secret) = match (
            &self.config.base_url,
            &self.config.consumer_key,
            &self.config.consumer_secret,
        ) {
            (Some(url), Some(key), Some(secret)) => (url, key, secret),
            _ => {
                return Err(AppError::Config(
                    "WC_BASE_URL, WC_CONSUMER_KEY and WC_CONSUMER_SECRET must be set".to_string(),
                ))
            }
        };

        let url = format!("{}/wp-json/wc/v3/{}", base_url.trim_end_matches('/'), path);
        debug!("🛒 {} {}", method, url);

        Ok(self
            .client
            .request(method, url)
            .basic_auth(key, Some(secret)))
    }

    async fn send(&self, request: RequestBuilder) -> AppResult<Response> {
        let response = request.send().await.map_err(OrderStoreError::from)?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(OrderStoreError::Api {
                status: status.as_u16(),
                body,
            }
            .into());
        }

        Ok(response)
    }

    async fn put_order(&self, order_id: OrderId, update: &OrderUpdate) -> AppResult<()> {
        let request = self
            .request(reqwest::Method::PUT, &format!("orders/{}", order_id))?
            .json(update);
        self.send(request).await?;
        Ok(())
    }

    async fn get_customer(&self, customer_id: OrderId) -> AppResult<Customer> {
        let request = self.request(reqwest::Method::GET, &format!("customers/{}", customer_id))?;
        let response = self.send(request).await?;
        Ok(response.json().await.map_err(OrderStoreError::from)?)
    }
}

#[async_trait]
impl OrderStore for WooCommerceClient {
    async fn get_order(&self, order_id: OrderId) -> AppResult<StoreOrder> {
        let request = self.request(reqwest::Method::GET, &format!("orders/{}", order_id))?;
        let response = match self.send(request).await {
            Err(AppError::OrderStore(OrderStoreError::Api { status: 404, .. })) => {
                return Err(OrderStoreError::OrderNotFound(order_id).into())
            }
            other => other?,
        };
        Ok(response.json().await.map_err(OrderStoreError::from)?)
    }

    async fn update_status(&self, order_id: OrderId, status: &str, tx_hash: &str) -> AppResult<()> {
        let update = OrderUpdate {
            status: Some(status.to_string()),
            meta_data: vec![MetaEntry::new(META_TX_HASH, tx_hash)],
        };
        self.put_order(order_id, &update).await?;
        info!("🛒 Order #{} set to {}", order_id, status);
        Ok(())
    }

    async fn update_escrow_meta(
        &self,
        order_id: OrderId,
        escrow_id: &str,
        buyer_account: &str,
    ) -> AppResult<()> {
        let update = OrderUpdate {
            status: None,
            meta_data: vec![
                MetaEntry::new(META_ESCROW_ID, escrow_id),
                MetaEntry::new(META_BUYER_ADDRESS, buyer_account),
            ],
        };
        self.put_order(order_id, &update).await
    }

    async fn add_note(&self, order_id: OrderId, note: &str) -> AppResult<()> {
        let request = self
            .request(reqwest::Method::POST, &format!("orders/{}/notes", order_id))?
            .json(&json!({
                "note": note,
                "customer_note": false,
            }));
        self.send(request).await?;
        Ok(())
    }

    async fn list_orders(&self, status: &str) -> AppResult<Vec<StoreOrder>> {
        let request = self
            .request(reqwest::Method::GET, "orders")?
            .query(&[("status", status), ("per_page", "50")]);
        let response = self.send(request).await?;
        Ok(response.json().await.map_err(OrderStoreError::from)?)
    }

    async fn customer_wallet(&self, customer_id: OrderId) -> AppResult<String> {
        let customer = self.get_customer(customer_id).await?;
        customer
            .meta(CUSTOMER_WALLET_KEY)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .ok_or_else(|| OrderStoreError::WalletNotLinked(customer_id).into())
    }

    async fn add_store_credit(&self, customer_id: OrderId, amount: Decimal) -> AppResult<Decimal> {
        let customer = self.get_customer(customer_id).await?;
        let current = customer
            .meta(STORE_CREDIT_KEY)
            .and_then(|v| Decimal::from_str(v.trim()).ok())
            .unwrap_or(Decimal::ZERO);

        let new_balance = (current + amount).round_dp(2);
        let request = self
            .request(reqwest::Method::PUT, &format!("customers/{}", customer_id))?
            .json(&json!({
                "meta_data": [
                    { "key": STORE_CREDIT_KEY, "value": format!("{:.2}", new_balance) }
                ]
            }));
        self.send(request).await?;

        info!(
            "💳 Store credit for customer {}: {} -> {}",
            customer_id, current, new_balance
        );
        Ok(new_balance)
    }
}
