//! Kiosk configuration: the destination list plus the global flags.
//!
//! Two on-disk shapes are understood. The current one is a plain
//! [`KioskConfig`]; the legacy one carried exactly two addresses (`url1`,
//! `url2`) with shared timings and is migrated into a destination list.

use serde::{Deserialize, Serialize};

use super::destination::{
    Destination, DEFAULT_BLOCK_AFTER_SECS, DEFAULT_INTERVAL_SECS, DEFAULT_PRE_REFRESH_LEAD_SECS,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KioskConfig {
    #[serde(alias = "links", default)]
    pub destinations: Vec<Destination>,
    /// Fullscreen surfaces instead of maximized ones.
    #[serde(default)]
    pub kiosk_mode: bool,
    #[serde(default)]
    pub auto_start: bool,
    #[serde(default)]
    pub hover_only_mode: bool,
    /// Empty means the five-tap gesture unlocks without a prompt.
    #[serde(default)]
    pub unlock_password: String,
    /// Re-broadcast a surface's unlock to every other surface.
    #[serde(default = "default_mirror_unlock")]
    pub mirror_unlock: bool,
}

impl Default for KioskConfig {
    fn default() -> Self {
        Self {
            destinations: Vec::new(),
            kiosk_mode: false,
            auto_start: false,
            hover_only_mode: false,
            unlock_password: String::new(),
            mirror_unlock: true,
        }
    }
}

fn default_mirror_unlock() -> bool {
    true
}

impl KioskConfig {
    pub fn with_destinations(destinations: Vec<Destination>) -> Self {
        Self {
            destinations,
            ..Self::default()
        }
    }

    pub fn password(&self) -> Option<&str> {
        let trimmed = self.unlock_password.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    }

    pub fn addresses(&self) -> Vec<String> {
        self.destinations.iter().map(|d| d.address.clone()).collect()
    }

    /// Parses a stored configuration, migrating the legacy two-address
    /// format. The flag reports whether a migration happened so the caller
    /// can persist the new shape.
    pub fn from_stored(value: serde_json::Value) -> serde_json::Result<(Self, bool)> {
        let is_legacy = value.get("url1").is_some() || value.get("url2").is_some();
        if is_legacy {
            let legacy: LegacyConfig = serde_json::from_value(value)?;
            Ok((legacy.migrate(), true))
        } else {
            Ok((serde_json::from_value(value)?, false))
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyConfig {
    url1: Option<String>,
    url2: Option<String>,
    switch_interval: Option<u64>,
    refresh_before_switch: Option<u64>,
    block_clicks_after: Option<u64>,
    #[serde(default)]
    kiosk_mode: bool,
    #[serde(default)]
    auto_start: bool,
    #[serde(default)]
    hover_only_mode: bool,
    #[serde(default)]
    unlock_password: String,
}

impl LegacyConfig {
    fn migrate(self) -> KioskConfig {
        let interval = self.switch_interval.unwrap_or(DEFAULT_INTERVAL_SECS);
        let lead = self
            .refresh_before_switch
            .unwrap_or(DEFAULT_PRE_REFRESH_LEAD_SECS);
        let block_after = self.block_clicks_after.unwrap_or(DEFAULT_BLOCK_AFTER_SECS);

        let destinations = [self.url1, self.url2]
            .into_iter()
            .enumerate()
            .filter_map(|(idx, url)| {
                let url = url.filter(|u| !u.trim().is_empty())?;
                let mut dest = Destination::with_id(format!("link_{}", idx + 1), url);
                dest.interval_seconds = interval;
                dest.pre_refresh_lead_seconds = lead;
                dest.block_after_seconds = block_after;
                Some(dest)
            })
            .collect();

        KioskConfig {
            destinations,
            kiosk_mode: self.kiosk_mode,
            auto_start: self.auto_start,
            hover_only_mode: self.hover_only_mode,
            unlock_password: self.unlock_password,
            mirror_unlock: true,
        }
    }
}

/// Validation functions for kiosk configuration data
pub mod validation {
    use std::collections::HashSet;

    use super::{Destination, KioskConfig};
    use crate::error::{RotationError, RotationResult};

    const MAX_INTERVAL_SECS: u64 = 24 * 60 * 60;

    pub fn validate_address(address: &str) -> RotationResult<()> {
        match address_problem(address.trim()) {
            Some(reason) => Err(RotationError::config(reason)),
            None => Ok(()),
        }
    }

    fn address_problem(address: &str) -> Option<String> {
        let Some((scheme, rest)) = address.split_once("://") else {
            return Some(format!("address '{address}' is missing a scheme"));
        };

        let scheme_ok = scheme
            .chars()
            .next()
            .map(|c| c.is_ascii_alphabetic())
            .unwrap_or(false)
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        if !scheme_ok {
            return Some(format!("address '{address}' has an invalid scheme"));
        }

        let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
        if host.is_empty() && scheme != "file" {
            return Some(format!("address '{address}' has no host"));
        }

        if address.chars().any(char::is_whitespace) {
            return Some(format!("address '{address}' contains whitespace"));
        }

        None
    }

    pub fn validate_destination(position: usize, dest: &Destination) -> RotationResult<()> {
        let label = position + 1;
        if dest.id.trim().is_empty() {
            return Err(RotationError::config(format!("destination {label} has no id")));
        }
        if let Some(reason) = address_problem(dest.address.trim()) {
            return Err(RotationError::config(format!("destination {label}: {reason}")));
        }
        if dest.interval_seconds == 0 {
            return Err(RotationError::config(format!(
                "destination {label}: interval must be greater than zero"
            )));
        }
        if dest.interval_seconds > MAX_INTERVAL_SECS {
            return Err(RotationError::config(format!(
                "destination {label}: interval exceeds {MAX_INTERVAL_SECS} seconds"
            )));
        }
        if dest.refresh_enabled && dest.pre_refresh_lead_seconds >= dest.interval_seconds {
            return Err(RotationError::config(format!(
                "destination {label}: refresh lead must be less than the interval"
            )));
        }
        Ok(())
    }

    pub fn validate_config(config: &KioskConfig) -> RotationResult<()> {
        if config.destinations.is_empty() {
            return Err(RotationError::config("no destinations configured"));
        }

        let mut seen = HashSet::new();
        for (position, dest) in config.destinations.iter().enumerate() {
            validate_destination(position, dest)?;
            if !seen.insert(dest.id.as_str()) {
                return Err(RotationError::config(format!(
                    "duplicate destination id '{}'",
                    dest.id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::validation::*;
    use super::*;
    use crate::error::RotationError;
    use serde_json::json;

    #[test]
    fn migrates_legacy_two_address_format() {
        let stored = json!({
            "url1": "https://one.example",
            "url2": "https://two.example",
            "switchInterval": 60,
            "refreshBeforeSwitch": 8,
            "blockClicksAfter": 90,
            "kioskMode": true,
            "unlockPassword": "1234"
        });

        let (config, migrated) = KioskConfig::from_stored(stored).unwrap();
        assert!(migrated);
        assert_eq!(config.destinations.len(), 2);
        assert_eq!(config.destinations[0].id, "link_1");
        assert_eq!(config.destinations[1].address, "https://two.example");
        assert!(config
            .destinations
            .iter()
            .all(|d| d.interval_seconds == 60 && d.pre_refresh_lead_seconds == 8));
        assert_eq!(config.destinations[0].block_after_seconds, 90);
        assert!(config.kiosk_mode);
        assert_eq!(config.password(), Some("1234"));
    }

    #[test]
    fn legacy_format_with_single_address() {
        let (config, migrated) =
            KioskConfig::from_stored(json!({ "url1": "https://only.example" })).unwrap();
        assert!(migrated);
        assert_eq!(config.destinations.len(), 1);
        assert_eq!(config.destinations[0].interval_seconds, 30);
    }

    #[test]
    fn current_format_accepts_links_alias() {
        let stored = json!({
            "links": [{ "id": "a", "url": "https://a.example" }],
            "hoverOnlyMode": true
        });
        let (config, migrated) = KioskConfig::from_stored(stored).unwrap();
        assert!(!migrated);
        assert_eq!(config.destinations[0].address, "https://a.example");
        assert!(config.hover_only_mode);
        assert!(config.mirror_unlock);
        assert_eq!(config.password(), None);
    }

    #[test]
    fn empty_list_is_a_config_error() {
        let err = validate_config(&KioskConfig::default()).unwrap_err();
        assert!(matches!(err, RotationError::Config { .. }));
    }

    #[test]
    fn lead_must_stay_below_interval_when_refreshing() {
        let mut dest = Destination::with_id("a", "https://a.example");
        dest.interval_seconds = 10;
        dest.pre_refresh_lead_seconds = 10;
        assert!(validate_destination(0, &dest).is_err());

        dest.refresh_enabled = false;
        assert!(validate_destination(0, &dest).is_ok());
    }

    #[test]
    fn rejects_duplicate_ids() {
        let config = KioskConfig::with_destinations(vec![
            Destination::with_id("same", "https://a.example"),
            Destination::with_id("same", "https://b.example"),
        ]);
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn address_checks() {
        assert!(validate_address("https://example.com/path?q=1").is_ok());
        assert!(validate_address("http://10.0.0.4:8080").is_ok());
        assert!(validate_address("file:///srv/board.html").is_ok());
        assert!(validate_address("https://").is_err());
        assert!(validate_address("example.com").is_err());
        assert!(validate_address("1http://example.com").is_err());
        assert!(validate_address("https://exa mple.com").is_err());
    }
}
