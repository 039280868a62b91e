use std::sync::Arc;

use reqwest::Client;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{info, warn};

use crate::{
    api::handler::AppState,
    chain::{ChainService, StellarChain},
    config::Config,
    conversion::CreditConverter,
    error::{AppError, AppResult},
    orders::{OrderStore, WooCommerceClient},
    pricing::PriceCache,
    reconciliation::{EscrowPoller, PendingOrderRegistry, ReconciliationEngine, ReleasePipeline},
    rewards::RewardDistributor,
};

/// Wire the collaborators together and start the escrow poller on `tracker`.
/// The poller runs until `cancel` fires.
pub async fn initialize_app_state(
    config: &Config,
    tracker: &TaskTracker,
    cancel: &CancellationToken,
) -> AppResult<AppState> {
    info!("Initializing application components ...");

    let chain: Arc<dyn ChainService> = Arc::new(StellarChain::new(config.stellar.clone())?);
    info!(
        "✅ Stellar chain service ready ({} via {})",
        config.stellar.network, config.stellar.cli_binary
    );
    info!("   Escrow contract: {}", config.stellar.escrow_contract_id);
    info!("   Price oracle:    {}", config.stellar.oracle_contract_id);

    let http = Client::builder()
        .timeout(config.stellar.http_timeout)
        .build()
        .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;
    let orders: Arc<dyn OrderStore> =
        Arc::new(WooCommerceClient::new(config.woocommerce.clone(), http));
    if config.woocommerce.base_url.is_none() {
        warn!("⚠️  WC_BASE_URL not set - order store calls will fail");
    } else {
        info!("✅ WooCommerce client initialized");
    }

    let rewards = Arc::new(RewardDistributor::new(
        chain.clone(),
        config.rewards.clone(),
        tracker.clone(),
    ));
    info!(
        "✅ Reward distributor initialized ({} per unit of order total)",
        config.rewards.reward_rate
    );

    let pipeline = Arc::new(ReleasePipeline::new(
        chain.clone(),
        orders.clone(),
        rewards,
        config.stellar.clone(),
        config.final_order_status.clone(),
    ));

    let registry = Arc::new(PendingOrderRegistry::new());
    let engine = Arc::new(ReconciliationEngine::new(
        registry,
        orders.clone(),
        pipeline,
        config.stellar.clone(),
        tracker.clone(),
    ));

    let price_cache = Arc::new(PriceCache::new(chain.clone(), config.price_ttl));
    info!("✅ Price cache initialized (ttl {:?})", config.price_ttl);

    let converter = Arc::new(CreditConverter::new(
        chain.clone(),
        orders,
        config.rewards.clone(),
    ));

    let poller = Arc::new(EscrowPoller::new(
        engine.clone(),
        chain,
        config.poller.interval,
        tracker.clone(),
    ));
    tracker.spawn(poller.run(cancel.clone()));
    info!("✅ Escrow poller started");

    Ok(AppState {
        engine,
        price_cache,
        converter,
    })
}
