use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type OrderId = u64;

/// WooCommerce `meta_data` entry. Values are usually strings but plugins may
/// store numbers or objects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetaEntry {
    pub key: String,
    #[serde(default)]
    pub value: Value,
}

impl MetaEntry {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Value::String(value.into()),
        }
    }

    pub fn value_str(&self) -> Option<&str> {
        self.value.as_str()
    }
}

/// Order as returned by the store (webhook payloads share the shape)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreOrder {
    pub id: OrderId,
    #[serde(default)]
    pub status: String,
    /// Decimal string, e.g. `"25.00"`
    #[serde(default)]
    pub total: String,
    #[serde(default)]
    pub meta_data: Vec<MetaEntry>,
}

impl StoreOrder {
    /// Parsed order total; empty or unparsable totals count as zero
    pub fn total_due(&self) -> Decimal {
        Decimal::from_str(self.total.trim()).unwrap_or(Decimal::ZERO)
    }

    pub fn meta(&self, key: &str) -> Option<&str> {
        self.meta_data
            .iter()
            .find(|m| m.key == key)
            .and_then(MetaEntry::value_str)
    }

    /// First non-empty buyer account among the known metadata keys
    pub fn buyer_account(&self) -> Option<&str> {
        ["stellar_public_key", super::META_BUYER_ADDRESS]
            .iter()
            .filter_map(|key| self.meta(key))
            .find(|v| !v.is_empty())
    }
}
