use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::{
    chain::{ChainService, PricePair},
    error::{AppResult, PriceError},
};

/// Fixed decimals of the oracle's integer price
pub const ORACLE_DECIMALS: u32 = 14;

/// XLM/USD rate as served to the storefront
#[derive(Debug, Clone, Serialize)]
pub struct PriceSnapshot {
    /// XLM needed for one USD
    pub xlm_per_usd: f64,
    /// USD value of one XLM
    pub price_usd: f64,
    /// Oracle timestamp of the reading
    pub timestamp: i64,
    #[serde(skip_serializing)]
    pub cached_at: Instant,
}

impl PriceSnapshot {
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.cached_at.elapsed() < ttl
    }
}

/// Single-entry TTL cache in front of the price oracle
pub struct PriceCache {
    chain: Arc<dyn ChainService>,
    ttl: Duration,
    snapshot: RwLock<Option<PriceSnapshot>>,
}

impl PriceCache {
    pub fn new(chain: Arc<dyn ChainService>, ttl: Duration) -> Self {
        Self {
            chain,
            ttl,
            snapshot: RwLock::new(None),
        }
    }

    pub async fn get_price(&self) -> AppResult<PriceSnapshot> {
        {
            let snapshot = self.snapshot.read().await;
            if let Some(cached) = snapshot.as_ref().filter(|s| s.is_fresh(self.ttl)) {
                debug!("✓ Price cache hit: XLM/USD = {}", cached.price_usd);
                return Ok(cached.clone());
            }
        }

        // Lock released; concurrent misses may each refresh
        let fresh = self.fetch().await?;

        *self.snapshot.write().await = Some(fresh.clone());
        info!(
            "💾 Cached price: XLM/USD = {} ({} XLM per USD)",
            fresh.price_usd, fresh.xlm_per_usd
        );
        Ok(fresh)
    }

    async fn fetch(&self) -> AppResult<PriceSnapshot> {
        let pair = PricePair::xlm_usd();
        let reading = self
            .chain
            .query_oracle_price(&pair)
            .await
            .map_err(|e| {
                warn!("⚠️ Oracle query for {} failed: {}", pair, e);
                PriceError::Unavailable(e.to_string())
            })?
            .ok_or_else(|| PriceError::NoData(pair.to_string()))?;

        if reading.price <= 0 {
            return Err(PriceError::InvalidPrice(reading.price.to_string()).into());
        }

        let price_usd = reading.price as f64 / 10f64.powi(ORACLE_DECIMALS as i32);
        if !price_usd.is_finite() || price_usd <= 0.0 {
            return Err(PriceError::InvalidPrice(reading.price.to_string()).into());
        }

        Ok(PriceSnapshot {
            xlm_per_usd: 1.0 / price_usd,
            price_usd,
            timestamp: reading.timestamp,
            cached_at: Instant::now(),
        })
    }

    /// Current snapshot regardless of age
    #[cfg(test)]
    pub async fn peek(&self) -> Option<PriceSnapshot> {
        self.snapshot.read().await.clone()
    }
}
