use std::process::Stdio;
use std::str::FromStr;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, instrument};

use super::{AssetId, ChainService, OracleReading, PaymentRequest, PricePair, ReceivedPayment};
use crate::{
    config::StellarConfig,
    error::{AppError, AppResult, ChainError},
};

/// 1 unit = 10^7 stroops
const STROOPS_PER_UNIT: i64 = 10_000_000;

/// Ledger access through the `stellar` CLI (contract calls, signing, submission) and
/// Horizon (account and transaction reads).
pub struct StellarChain {
    config: StellarConfig,
    client: Client,
}

impl StellarChain {
    pub fn new(config: StellarConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    /// Run the CLI with optional stdin, returning stdout on success
    async fn run_cli(&self, args: &[String], stdin: Option<&[u8]>) -> Result<String, ChainError> {
        let command = format!("{} {}", self.config.cli_binary, redact(args).join(" "));
        debug!("▶️ {}", command);

        let mut child = Command::new(&self.config.cli_binary)
            .args(args)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input).await?;
            // Dropping the handle closes stdin so the CLI sees EOF
            drop(pipe);
        }

        let output = child.wait_with_output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(ChainError::CommandFailed {
                command,
                output: if stderr.is_empty() { stdout } else { stderr },
            });
        }

        Ok(stdout)
    }

    async fn invoke_contract(
        &self,
        contract_id: &str,
        method: &str,
        args: &[(&str, &str)],
        send: bool,
    ) -> Result<String, ChainError> {
        let mut cli_args = vec![
            "contract".to_string(),
            "invoke".to_string(),
            "--id".to_string(),
            contract_id.to_string(),
            "--source".to_string(),
            self.config.source_identity.clone(),
            "--network".to_string(),
            self.config.network.clone(),
        ];
        if !send {
            cli_args.push("--send=no".to_string());
        }
        cli_args.push("--".to_string());
        cli_args.push(method.to_string());
        for (name, value) in args {
            cli_args.push(format!("--{}", name));
            cli_args.push(value.to_string());
        }

        self.run_cli(&cli_args, None).await
    }

    async fn horizon_get<T: for<'de> Deserialize<'de>>(&self, path: &str) -> AppResult<T> {
        let url = format!("{}/{}", self.config.horizon_url.trim_end_matches('/'), path);
        let response = self.client.get(&url).send().await.map_err(ChainError::from)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChainError::Horizon {
                status: status.as_u16(),
                body,
            }
            .into());
        }

        Ok(response.json::<T>().await.map_err(ChainError::from)?)
    }
}

#[async_trait]
impl ChainService for StellarChain {
    #[instrument(skip(self, payment), fields(destination = %payment.destination, asset = %payment.asset.code))]
    async fn submit_payment(&self, payment: &PaymentRequest) -> AppResult<String> {
        let stroops = to_stroops(payment.amount)?;
        let network = self.config.network.clone();

        let unsigned = self
            .run_cli(
                &[
                    "tx".into(),
                    "new".into(),
                    "payment".into(),
                    "--source".into(),
                    payment.source_account.clone(),
                    "--destination".into(),
                    payment.destination.clone(),
                    "--asset".into(),
                    payment.asset.to_string(),
                    "--amount".into(),
                    stroops.to_string(),
                    "--network".into(),
                    network.clone(),
                    "--build-only".into(),
                ],
                None,
            )
            .await?;

        let signed = self
            .run_cli(
                &[
                    "tx".into(),
                    "sign".into(),
                    "--sign-with-key".into(),
                    payment.source_secret.clone(),
                    "--network".into(),
                    network.clone(),
                ],
                Some(unsigned.as_bytes()),
            )
            .await?;

        let output = self
            .run_cli(
                &["tx".into(), "send".into(), "--network".into(), network],
                Some(signed.as_bytes()),
            )
            .await?;

        let tx_hash = extract_tx_hash(&output);
        info!("💸 Payment of {} {} submitted: {}", payment.amount, payment.asset.code, tx_hash);
        Ok(tx_hash)
    }

    async fn query_escrow(&self, escrow_id: &str) -> AppResult<bool> {
        let output = self
            .invoke_contract(
                &self.config.escrow_contract_id,
                "get_escrow",
                &[("escrow_id", escrow_id)],
                false,
            )
            .await?;

        Ok(parse_escrow_funded(escrow_id, &output)?)
    }

    #[instrument(skip(self))]
    async fn release_escrow(&self, escrow_id: &str) -> AppResult<String> {
        let output = self
            .invoke_contract(
                &self.config.escrow_contract_id,
                "release",
                &[("escrow_id", escrow_id)],
                true,
            )
            .await?;

        Ok(extract_tx_hash(&output))
    }

    async fn query_balance(&self, account: &str, asset_code: &str) -> AppResult<Decimal> {
        let account_data: HorizonAccount = self.horizon_get(&format!("accounts/{}", account)).await?;
        Ok(account_data.balance_of(asset_code)?)
    }

    async fn query_oracle_price(&self, pair: &PricePair) -> AppResult<Option<OracleReading>> {
        let asset = serde_json::json!({ "Other": pair.base }).to_string();
        let output = self
            .invoke_contract(
                &self.config.oracle_contract_id,
                "lastprice",
                &[("asset", asset.as_str())],
                false,
            )
            .await?;

        debug!("📊 Oracle raw output for {}: {}", pair, output);
        Ok(parse_oracle_output(&output)?)
    }

    async fn find_asset_payment(
        &self,
        tx_hash: &str,
        destination: &str,
        asset: &AssetId,
    ) -> AppResult<Option<ReceivedPayment>> {
        let page: HorizonOperations = self
            .horizon_get(&format!("transactions/{}/operations", tx_hash))
            .await?;

        for op in page.embedded.records {
            if op.kind == "payment"
                && op.to.as_deref() == Some(destination)
                && op.asset_code.as_deref() == Some(asset.code.as_str())
                && op.asset_issuer.as_deref() == Some(asset.issuer.as_str())
            {
                let amount = op
                    .amount
                    .as_deref()
                    .map(Decimal::from_str)
                    .transpose()
                    .map_err(|e| ChainError::Malformed(format!("invalid amount: {}", e)))?
                    .unwrap_or_default();

                return Ok(Some(ReceivedPayment {
                    from: op.from.unwrap_or_default(),
                    amount,
                }));
            }
        }

        Ok(None)
    }
}

#[derive(Debug, Deserialize)]
struct HorizonBalance {
    #[serde(default)]
    asset_type: String,
    #[serde(default)]
    asset_code: Option<String>,
    balance: String,
}

#[derive(Debug, Deserialize)]
struct HorizonAccount {
    #[serde(default)]
    balances: Vec<HorizonBalance>,
}

impl HorizonAccount {
    /// Missing trustline counts as a zero balance
    fn balance_of(&self, asset_code: &str) -> Result<Decimal, ChainError> {
        let entry = self.balances.iter().find(|b| {
            if asset_code == "XLM" {
                b.asset_type == "native"
            } else {
                b.asset_code.as_deref() == Some(asset_code)
            }
        });

        match entry {
            Some(b) => Decimal::from_str(&b.balance)
                .map_err(|e| ChainError::Malformed(format!("invalid balance {}: {}", b.balance, e))),
            None => Ok(Decimal::ZERO),
        }
    }
}

#[derive(Debug, Deserialize)]
struct HorizonOperation {
    #[serde(rename = "type")]
    kind: String,
    from: Option<String>,
    to: Option<String>,
    amount: Option<String>,
    asset_code: Option<String>,
    asset_issuer: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HorizonRecords {
    #[serde(default)]
    records: Vec<HorizonOperation>,
}

#[derive(Debug, Deserialize)]
struct HorizonOperations {
    #[serde(rename = "_embedded")]
    embedded: HorizonRecords,
}

fn to_stroops(amount: Decimal) -> Result<i64, ChainError> {
    if amount.is_sign_negative() || amount.is_zero() {
        return Err(ChainError::Malformed(format!("payment amount must be positive: {}", amount)));
    }
    amount
        .round_dp(7)
        .checked_mul(Decimal::from(STROOPS_PER_UNIT))
        .and_then(|stroops| stroops.to_i64())
        .ok_or_else(|| ChainError::Malformed(format!("payment amount out of range: {}", amount)))
}

/// Hide `--sign-with-key` values from logs and error messages
fn redact(args: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(args.len());
    let mut hide_next = false;
    for arg in args {
        if hide_next {
            out.push("***".to_string());
            hide_next = false;
            continue;
        }
        hide_next = arg == "--sign-with-key";
        out.push(arg.clone());
    }
    out
}

fn tx_hash_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[0-9a-f]{64}\b").expect("static regex"))
}

/// Pull the transaction hash out of CLI output
pub(crate) fn extract_tx_hash(output: &str) -> String {
    if let Some(m) = tx_hash_regex().find(output) {
        return m.as_str().to_string();
    }

    output
        .lines()
        .find(|line| line.contains("Transaction") || line.contains("hash"))
        .map(|line| line.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn value_as_i128(value: &Value) -> Option<i128> {
    match value {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.as_i64().map(i128::from),
        _ => None,
    }
}

/// `get_escrow` output: funded means still `Locked` with a positive amount
pub(crate) fn parse_escrow_funded(escrow_id: &str, output: &str) -> Result<bool, ChainError> {
    let trimmed = output.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Err(ChainError::EscrowNotFound(escrow_id.to_string()));
    }

    let record: Value = serde_json::from_str(trimmed)?;
    let amount = record
        .get("total_amount")
        .and_then(value_as_i128)
        .ok_or_else(|| ChainError::Malformed(format!("escrow {} has no total_amount", escrow_id)))?;
    let status = record
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or_default();

    Ok(status == "Locked" && amount > 0)
}

fn oracle_regexes() -> &'static (Regex, Regex) {
    static RE: OnceLock<(Regex, Regex)> = OnceLock::new();
    RE.get_or_init(|| {
        (
            Regex::new(r#"price["\s:]+"?(\d+)"#).expect("static regex"),
            Regex::new(r#"timestamp["\s:]+"?(\d+)"#).expect("static regex"),
        )
    })
}

/// Parse `lastprice` output. Accepts the JSON form (`{"price":"..","timestamp":..}`),
/// the debug form (`Some(PriceData { price: .., timestamp: .. })`) and `null`.
pub(crate) fn parse_oracle_output(output: &str) -> Result<Option<OracleReading>, ChainError> {
    let trimmed = output.trim();
    if trimmed == "null" || trimmed == "None" || trimmed.is_empty() {
        return Ok(None);
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if value.is_null() {
            return Ok(None);
        }
        let price = value.get("price").and_then(value_as_i128);
        let timestamp = value.get("timestamp").and_then(value_as_i128);
        if let (Some(price), Some(timestamp)) = (price, timestamp) {
            return Ok(Some(OracleReading {
                price,
                timestamp: timestamp as i64,
            }));
        }
    }

    let (price_re, ts_re) = oracle_regexes();
    let price = price_re
        .captures(trimmed)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<i128>().ok())
        .ok_or_else(|| ChainError::Malformed(format!("could not find price in: {}", trimmed)))?;
    let timestamp = ts_re
        .captures(trimmed)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<i64>().ok())
        .unwrap_or_else(|| chrono::Utc::now().timestamp());

    Ok(Some(OracleReading { price, timestamp }))
}
