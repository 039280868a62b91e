use std::str::FromStr;
use std::time::Duration;

use config::ConfigError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Soroban/Horizon connection settings
#[derive(Debug, Clone)]
pub struct StellarConfig {
    pub cli_binary: String,
    pub network: String,
    /// CLI identity used as `--source` for contract invocations
    pub source_identity: String,
    pub horizon_url: String,
    pub escrow_contract_id: String,
    pub oracle_contract_id: String,
    pub explorer_tx_url: String,
    pub http_timeout: Duration,
}

impl Default for StellarConfig {
    fn default() -> Self {
        Self {
            cli_binary: "stellar".to_string(),
            network: "testnet".to_string(),
            source_identity: "deployer".to_string(),
            horizon_url: "https://horizon-testnet.stellar.org".to_string(),
            escrow_contract_id: "CDLLYK6JTLNNDEW3RGH2FNKKFLQLPSV64CGDFZK3WDH5M6QIFIMWAHIB"
                .to_string(),
            oracle_contract_id: "CCYOZJCOPG34LLQQ7N24YXBM7LL62R7ONMZ3G6WZAAYPB5OYKOMJRN63"
                .to_string(),
            explorer_tx_url: "https://stellar.expert/explorer/testnet/tx".to_string(),
            http_timeout: Duration::from_secs(30),
        }
    }
}

impl StellarConfig {
    pub fn tx_url(&self, tx_hash: &str) -> String {
        format!("{}/{}", self.explorer_tx_url.trim_end_matches('/'), tx_hash)
    }
}

/// WooCommerce REST credentials. Any of them may be missing; the client reports
/// that per call instead of refusing to start.
#[derive(Debug, Clone, Default)]
pub struct WooCommerceConfig {
    pub base_url: Option<String>,
    pub consumer_key: Option<String>,
    pub consumer_secret: Option<String>,
}

/// Reward token (ZMOKE) accounts and economics
#[derive(Debug, Clone)]
pub struct RewardConfig {
    pub asset_code: String,
    pub issuer_public_key: Option<String>,
    pub issuer_secret: Option<String>,
    pub distributor_public_key: Option<String>,
    pub distributor_secret: Option<String>,
    /// Account that receives reward tokens being converted to store credit
    pub treasury_address: Option<String>,
    /// Reward units granted per fiat unit of order value
    pub reward_rate: Decimal,
    pub low_water_mark: Decimal,
    pub replenish_amount: Decimal,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            asset_code: "ZMOKE".to_string(),
            issuer_public_key: None,
            issuer_secret: None,
            distributor_public_key: None,
            distributor_secret: None,
            treasury_address: None,
            reward_rate: dec!(10),
            low_water_mark: dec!(50000),
            replenish_amount: dec!(100000),
        }
    }
}

impl RewardConfig {
    /// Fiat credit granted per reward unit on conversion
    pub fn credit_per_unit(&self) -> Decimal {
        if self.reward_rate.is_zero() {
            Decimal::ZERO
        } else {
            Decimal::ONE / self.reward_rate
        }
    }
}

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub interval: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    pub stellar: StellarConfig,
    pub woocommerce: WooCommerceConfig,
    pub rewards: RewardConfig,
    pub poller: PollerConfig,
    pub price_ttl: Duration,
    /// Status written to the order once escrow has been released
    pub final_order_status: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            stellar: StellarConfig::default(),
            woocommerce: WooCommerceConfig::default(),
            rewards: RewardConfig::default(),
            poller: PollerConfig::default(),
            price_ttl: Duration::from_secs(300),
            final_order_status: "processing".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key lookup, falling back to defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let or_default = |key: &str, default: String| get(key).unwrap_or(default);

        let stellar = StellarConfig {
            cli_binary: or_default("STELLAR_CLI", defaults.stellar.cli_binary),
            network: or_default("STELLAR_NETWORK", defaults.stellar.network),
            source_identity: or_default("STELLAR_SOURCE", defaults.stellar.source_identity),
            horizon_url: or_default("STELLAR_HORIZON_URL", defaults.stellar.horizon_url),
            escrow_contract_id: or_default(
                "PAYMENT_ESCROW_ID",
                defaults.stellar.escrow_contract_id,
            ),
            oracle_contract_id: or_default(
                "REFLECTOR_ORACLE_ID",
                defaults.stellar.oracle_contract_id,
            ),
            explorer_tx_url: or_default("EXPLORER_TX_URL", defaults.stellar.explorer_tx_url),
            http_timeout: match get("HTTP_TIMEOUT_SECS") {
                Some(v) => Duration::from_secs(parse_number("HTTP_TIMEOUT_SECS", &v)?),
                None => defaults.stellar.http_timeout,
            },
        };

        let woocommerce = WooCommerceConfig {
            base_url: get("WC_BASE_URL"),
            consumer_key: get("WC_CONSUMER_KEY"),
            consumer_secret: get("WC_CONSUMER_SECRET"),
        };

        let rewards = RewardConfig {
            asset_code: or_default("REWARD_ASSET_CODE", defaults.rewards.asset_code),
            issuer_public_key: get("ZMOKE_ISSUER_PUBLIC_KEY"),
            issuer_secret: get("ZMOKE_ISSUER_SECRET"),
            distributor_public_key: get("ZMOKE_DISTRIBUTOR_PUBLIC_KEY"),
            distributor_secret: get("ZMOKE_DISTRIBUTOR_SECRET"),
            treasury_address: get("TREASURY_ADDRESS"),
            reward_rate: match get("REWARD_RATE") {
                Some(v) => parse_positive_decimal("REWARD_RATE", &v)?,
                None => defaults.rewards.reward_rate,
            },
            low_water_mark: match get("REWARD_LOW_WATER_MARK") {
                Some(v) => parse_decimal("REWARD_LOW_WATER_MARK", &v)?,
                None => defaults.rewards.low_water_mark,
            },
            replenish_amount: match get("REWARD_REPLENISH_AMOUNT") {
                Some(v) => parse_decimal("REWARD_REPLENISH_AMOUNT", &v)?,
                None => defaults.rewards.replenish_amount,
            },
        };

        let poller = PollerConfig {
            interval: match get("ESCROW_POLL_INTERVAL_SECS") {
                Some(v) => {
                    let secs: u64 = parse_number("ESCROW_POLL_INTERVAL_SECS", &v)?;
                    if secs == 0 {
                        return Err(ConfigError::Message(
                            "ESCROW_POLL_INTERVAL_SECS must be greater than zero".to_string(),
                        ));
                    }
                    Duration::from_secs(secs)
                }
                None => defaults.poller.interval,
            },
        };

        Ok(Self {
            bind_address: or_default("BIND_ADDRESS", defaults.bind_address),
            stellar,
            woocommerce,
            rewards,
            poller,
            price_ttl: match get("PRICE_CACHE_TTL_SECS") {
                Some(v) => Duration::from_secs(parse_number("PRICE_CACHE_TTL_SECS", &v)?),
                None => defaults.price_ttl,
            },
            final_order_status: or_default("FINAL_ORDER_STATUS", defaults.final_order_status),
        })
    }
}

fn parse_number(key: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|e| ConfigError::Message(format!("{} must be an integer: {}", key, e)))
}

fn parse_decimal(key: &str, value: &str) -> Result<Decimal, ConfigError> {
    Decimal::from_str(value.trim())
        .map_err(|e| ConfigError::Message(format!("{} must be a decimal: {}", key, e)))
}

fn parse_positive_decimal(key: &str, value: &str) -> Result<Decimal, ConfigError> {
    let parsed = parse_decimal(key, value)?;
    if parsed <= Decimal::ZERO {
        return Err(ConfigError::Message(format!(
            "{} must be greater than zero",
            key
        )));
    }
    Ok(parsed)
}
