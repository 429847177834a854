use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::db::KeyValueStore;
use crate::error::SettingsError;

pub const DB_ENV_VAR: &str = "INDUSTRY_LEDGER_DB";
pub const SALES_TAX_KEY: &str = "sales_tax";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_notify_debounce_ms")]
    pub notify_debounce_ms: u64,
}

fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("industry-ledger")
        .join("ledger.db")
}

fn default_listen_addr() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_notify_debounce_ms() -> u64 {
    10
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            listen_addr: default_listen_addr(),
            notify_debounce_ms: default_notify_debounce_ms(),
        }
    }
}

impl Settings {
    pub fn notify_debounce(&self) -> Duration {
        Duration::from_millis(self.notify_debounce_ms)
    }

    /// Environment overrides applied on top of the file
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(path) = std::env::var_os(DB_ENV_VAR).filter(|v| !v.is_empty()) {
            self.database_path = PathBuf::from(path);
        }
        self
    }
}

fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("industry-ledger")
}

pub fn settings_path() -> PathBuf {
    config_dir().join("settings.json")
}

/// Missing file means defaults; a broken file is an error
pub fn load_settings_from(path: &Path) -> Result<Settings, SettingsError> {
    if !path.exists() {
        debug!(path = %path.display(), "No settings file, using defaults");
        return Ok(Settings::default());
    }
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

pub fn load_settings() -> Settings {
    let path = settings_path();
    load_settings_from(&path)
        .unwrap_or_else(|err| {
            warn!(path = %path.display(), error = %err, "Ignoring unreadable settings file");
            Settings::default()
        })
        .with_env_overrides()
}

pub fn save_settings_to(path: &Path, settings: &Settings) -> Result<(), SettingsError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let json = serde_json::to_string_pretty(settings)?;
    std::fs::write(path, format!("{json}\n"))?;
    Ok(())
}

pub fn save_settings(settings: &Settings) -> Result<(), SettingsError> {
    save_settings_to(&settings_path(), settings)
}

// Sales tax lives next to the data, not in the process config

fn validate_sales_tax(percent: f64) -> Result<f64, SettingsError> {
    if percent.is_finite() && percent >= 0.0 {
        Ok(percent)
    } else {
        Err(SettingsError::InvalidSalesTax(percent.to_string()))
    }
}

/// Sales tax percentage, 0 when never configured
pub fn sales_tax_percent(store: &impl KeyValueStore) -> Result<f64, SettingsError> {
    match store.get_value(SALES_TAX_KEY)? {
        None => Ok(0.0),
        Some(raw) => {
            let percent: f64 = raw
                .trim()
                .parse()
                .map_err(|_| SettingsError::InvalidSalesTax(raw.clone()))?;
            validate_sales_tax(percent)
        }
    }
}

pub fn set_sales_tax_percent(store: &impl KeyValueStore, percent: f64) -> Result<(), SettingsError> {
    let percent = validate_sales_tax(percent)?;
    store.set_value(SALES_TAX_KEY, &percent.to_string())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteRepository;

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let settings = Settings {
            database_path: PathBuf::from("/tmp/ledger.db"),
            listen_addr: "0.0.0.0:8080".to_string(),
            notify_debounce_ms: 25,
        };

        save_settings_to(&path, &settings).unwrap();
        let loaded = load_settings_from(&path).unwrap();

        assert_eq!(loaded, settings);
        assert_eq!(loaded.notify_debounce(), Duration::from_millis(25));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_settings_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(loaded, Settings::default());
        assert_eq!(loaded.notify_debounce_ms, 10);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"listen_addr": "127.0.0.1:9000"}"#).unwrap();

        let loaded = load_settings_from(&path).unwrap();
        assert_eq!(loaded.listen_addr, "127.0.0.1:9000");
        assert_eq!(loaded.notify_debounce_ms, 10);
    }

    #[test]
    fn test_broken_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(load_settings_from(&path), Err(SettingsError::Json(_))));
    }

    #[test]
    fn test_sales_tax_roundtrip_and_validation() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        assert_eq!(sales_tax_percent(&repo).unwrap(), 0.0);

        set_sales_tax_percent(&repo, 3.6).unwrap();
        assert_eq!(sales_tax_percent(&repo).unwrap(), 3.6);

        assert!(matches!(
            set_sales_tax_percent(&repo, -1.0),
            Err(SettingsError::InvalidSalesTax(_))
        ));
        assert!(set_sales_tax_percent(&repo, f64::NAN).is_err());
        assert_eq!(sales_tax_percent(&repo).unwrap(), 3.6);

        repo.set_value(SALES_TAX_KEY, "lots").unwrap();
        assert!(sales_tax_percent(&repo).is_err());
    }
}
