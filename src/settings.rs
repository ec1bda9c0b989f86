use anyhow::{anyhow, Context, Result};
use log::{info, warn};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};
use tokio::sync::watch;

use crate::models::{validation::validate_config, Destination, KioskConfig};

pub const CONFIG_PATH_ENV: &str = "KIOSK_ROTATOR_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "kiosk.json";

/// JSON-file backed kiosk configuration. Accepted updates are published to
/// every [`SettingsStore::subscribe`] receiver.
pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<KioskConfig>,
    changes: watch::Sender<KioskConfig>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let (data, migrated) = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            match parse(&contents) {
                Ok(loaded) => loaded,
                Err(err) => {
                    warn!(
                        "Ignoring unreadable settings in {}: {err}; using defaults",
                        path.display()
                    );
                    (KioskConfig::default(), false)
                }
            }
        } else {
            (KioskConfig::default(), false)
        };

        let (changes, _) = watch::channel(data.clone());
        let store = Self {
            path,
            data: RwLock::new(data),
            changes,
        };

        if migrated {
            info!(
                "Migrated legacy two-address settings in {}",
                store.path.display()
            );
            store.persist(&store.read())?;
        }
        Ok(store)
    }

    /// Opens the file named by `KIOSK_ROTATOR_CONFIG`, or `kiosk.json`.
    pub fn from_env() -> Result<Self> {
        let path = std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        Self::new(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> KioskConfig {
        self.read().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<KioskConfig> {
        self.changes.subscribe()
    }

    /// Validates, persists and publishes a new configuration. A rejected
    /// update leaves the stored one untouched.
    pub fn update(&self, config: KioskConfig) -> Result<()> {
        validate_config(&config)?;
        {
            let mut guard = self.write();
            self.persist(&config)?;
            *guard = config.clone();
        }
        self.changes.send_replace(config);
        Ok(())
    }

    /// Appends a destination with default timings.
    pub fn add_destination(&self, address: &str) -> Result<Destination> {
        let destination = Destination::new(address.trim());
        let mut config = self.config();
        config.destinations.push(destination.clone());
        self.update(config)?;
        Ok(destination)
    }

    pub fn remove_destination(&self, id: &str) -> Result<()> {
        let mut config = self.config();
        let before = config.destinations.len();
        config.destinations.retain(|dest| dest.id != id);
        if config.destinations.len() == before {
            return Err(anyhow!("no destination with id {id}"));
        }
        self.update(config)
    }

    fn persist(&self, data: &KioskConfig) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    fn read(&self) -> RwLockReadGuard<'_, KioskConfig> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, KioskConfig> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SettingsStore {
    /// Re-reads the file, e.g. after an external edit, and publishes it.
    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)?;
        let (data, _) = parse(&contents)?;
        *self.write() = data.clone();
        self.changes.send_replace(data);
        Ok(())
    }
}

fn parse(contents: &str) -> serde_json::Result<(KioskConfig, bool)> {
    KioskConfig::from_stored(serde_json::from_str(contents)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scratch_path() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("kiosk-rotator-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir.join("kiosk.json")
    }

    #[test]
    fn missing_file_gives_defaults() {
        let store = SettingsStore::new(scratch_path()).unwrap();
        assert_eq!(store.config(), KioskConfig::default());
    }

    #[test]
    fn unreadable_file_gives_defaults() {
        let path = scratch_path();
        fs::write(&path, "{ not json").unwrap();
        let store = SettingsStore::new(path).unwrap();
        assert!(store.config().destinations.is_empty());
    }

    #[test]
    fn legacy_file_is_migrated_and_rewritten() {
        let path = scratch_path();
        let legacy = json!({
            "url1": "https://one.example",
            "url2": "https://two.example",
            "switchInterval": 45,
            "refreshBeforeSwitch": 10,
            "blockClicksAfter": 60,
            "kioskMode": true
        });
        fs::write(&path, legacy.to_string()).unwrap();

        let store = SettingsStore::new(path.clone()).unwrap();
        let config = store.config();
        assert_eq!(config.destinations.len(), 2);
        assert_eq!(config.destinations[1].id, "link_2");
        assert_eq!(config.destinations[0].interval_seconds, 45);
        assert!(config.kiosk_mode);

        let rewritten: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert!(rewritten.get("url1").is_none());
        assert_eq!(rewritten["destinations"][0]["address"], "https://one.example");
    }

    #[test]
    fn update_persists_and_notifies() {
        let path = scratch_path();
        let store = SettingsStore::new(path.clone()).unwrap();
        let mut changes = store.subscribe();

        let added = store.add_destination(" https://new.example ").unwrap();
        assert_eq!(added.address, "https://new.example");
        assert_eq!(added.interval_seconds, 30);
        assert!(changes.has_changed().unwrap());
        assert_eq!(changes.borrow_and_update().destinations.len(), 1);

        let reopened = SettingsStore::new(path).unwrap();
        assert_eq!(reopened.config().destinations[0].id, added.id);
    }

    #[test]
    fn invalid_update_keeps_previous_config() {
        let store = SettingsStore::new(scratch_path()).unwrap();
        store.add_destination("https://keep.example").unwrap();
        let mut changes = store.subscribe();

        assert!(store.add_destination("not a url").is_err());
        let id = store.config().destinations[0].id.clone();
        assert!(store.remove_destination(&id).is_err());
        assert!(store.remove_destination("missing").is_err());

        assert_eq!(store.config().destinations.len(), 1);
        assert!(!changes.has_changed().unwrap());
    }

    #[test]
    fn reload_picks_up_external_edits() {
        let path = scratch_path();
        let store = SettingsStore::new(path.clone()).unwrap();
        let edited = KioskConfig::with_destinations(vec![Destination::with_id(
            "x",
            "https://edited.example",
        )]);
        fs::write(&path, serde_json::to_string(&edited).unwrap()).unwrap();

        store.reload().unwrap();
        assert_eq!(store.config(), edited);
    }
}
