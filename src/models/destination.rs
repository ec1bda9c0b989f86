use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

pub const DEFAULT_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_PRE_REFRESH_LEAD_SECS: u64 = 5;
pub const DEFAULT_BLOCK_AFTER_SECS: u64 = 120;

/// One rotation entry: an address plus its timing and blocking settings.
///
/// Field aliases accept the key names used by the browser extension's
/// stored configuration (`url`, `switchInterval`, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub id: String,
    #[serde(alias = "url")]
    pub address: String,
    #[serde(alias = "switchInterval", default = "default_interval")]
    pub interval_seconds: u64,
    #[serde(alias = "refreshBeforeSwitch", default = "default_lead")]
    pub pre_refresh_lead_seconds: u64,
    #[serde(default = "default_true")]
    pub refresh_enabled: bool,
    #[serde(alias = "blockClicksAfter", default = "default_block_after")]
    pub block_after_seconds: u64,
    #[serde(default)]
    pub allow_clicks_override: bool,
}

impl Destination {
    /// New destination with a fresh id and the stock timings.
    pub fn new(address: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), address)
    }

    pub fn with_id(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            interval_seconds: DEFAULT_INTERVAL_SECS,
            pre_refresh_lead_seconds: DEFAULT_PRE_REFRESH_LEAD_SECS,
            refresh_enabled: true,
            block_after_seconds: DEFAULT_BLOCK_AFTER_SECS,
            allow_clicks_override: false,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn pre_refresh_lead(&self) -> Duration {
        Duration::from_secs(self.pre_refresh_lead_seconds)
    }

    pub fn block_after(&self) -> Duration {
        Duration::from_secs(self.block_after_seconds)
    }
}

fn default_interval() -> u64 {
    DEFAULT_INTERVAL_SECS
}

fn default_lead() -> u64 {
    DEFAULT_PRE_REFRESH_LEAD_SECS
}

fn default_block_after() -> u64 {
    DEFAULT_BLOCK_AFTER_SECS
}

fn default_true() -> bool {
    true
}

// Older saved configs used numeric ids; they are normalised to `link_<n>`.
fn id_from_string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(id) => Ok(id),
        serde_json::Value::Number(n) => Ok(format!("link_{n}")),
        other => Err(serde::de::Error::custom(format!(
            "destination id must be a string or number, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_destination_uses_stock_timings() {
        let dest = Destination::new("https://example.com");
        assert_eq!(dest.interval_seconds, 30);
        assert_eq!(dest.pre_refresh_lead_seconds, 5);
        assert_eq!(dest.block_after_seconds, 120);
        assert!(dest.refresh_enabled);
        assert!(!dest.allow_clicks_override);
        assert!(!dest.id.is_empty());
        assert_ne!(dest.id, Destination::new("https://example.com").id);
    }

    #[test]
    fn accepts_extension_key_names() {
        let raw = r#"{
            "id": 7,
            "url": "https://dash.local",
            "switchInterval": 45,
            "refreshBeforeSwitch": 10,
            "refreshEnabled": false,
            "blockClicksAfter": 60
        }"#;
        let dest: Destination = serde_json::from_str(raw).unwrap();
        assert_eq!(dest.id, "link_7");
        assert_eq!(dest.address, "https://dash.local");
        assert_eq!(dest.interval_seconds, 45);
        assert_eq!(dest.pre_refresh_lead_seconds, 10);
        assert!(!dest.refresh_enabled);
        assert_eq!(dest.block_after_seconds, 60);
    }

    #[test]
    fn serializes_camel_case() {
        let dest = Destination::with_id("a", "https://a.example");
        let json = serde_json::to_value(&dest).unwrap();
        assert_eq!(json["intervalSeconds"], 30);
        assert_eq!(json["preRefreshLeadSeconds"], 5);
        assert_eq!(json["allowClicksOverride"], false);
    }
}
