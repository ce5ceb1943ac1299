use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use super::scrub::IntervalStore;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SettingsFile {
    #[serde(default)]
    values: BTreeMap<String, toml::Value>,
}

#[derive(Debug, Clone, Copy)]
pub struct IntSettingKey {
    pub key: &'static str,
    pub default: i64,
}

impl IntSettingKey {
    pub const fn new(key: &'static str, default: i64) -> Self {
        Self { key, default }
    }
}

/// Days between automatic boot pool scrubs
pub const BOOT_SCRUB: IntSettingKey = IntSettingKey::new("boot_scrub", 7);

/// System-wide key/value settings persisted as TOML.
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    data: SettingsFile,
}

impl SettingsStore {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self {
                path: path.to_path_buf(),
                data: SettingsFile::default(),
            });
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading settings file from {}", path.display()))?;
        let data = toml::from_str(&contents)
            .with_context(|| format!("parsing settings file at {}", path.display()))?;

        Ok(Self {
            path: path.to_path_buf(),
            data,
        })
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating settings directory at {}", parent.display()))?;
        }

        let contents =
            toml::to_string_pretty(&self.data).context("serializing settings to toml")?;
        fs::write(&self.path, contents)
            .with_context(|| format!("writing settings file to {}", self.path.display()))?;
        Ok(())
    }

    pub fn int(&self, key: IntSettingKey) -> i64 {
        self.data
            .values
            .get(key.key)
            .and_then(|value| value.as_integer())
            .unwrap_or(key.default)
    }

    pub fn set_int(&mut self, key: IntSettingKey, value: i64) {
        self.data
            .values
            .insert(key.key.to_string(), toml::Value::Integer(value));
    }
}

/// Scrub interval backed by the settings file at `path`, re-read on every call.
pub struct SettingsIntervalStore {
    pub path: PathBuf,
}

impl IntervalStore for SettingsIntervalStore {
    fn scrub_interval(&self) -> Result<u32> {
        let store = SettingsStore::load(&self.path)?;
        let days = store.int(BOOT_SCRUB);
        u32::try_from(days)
            .with_context(|| format!("stored {} value {} is out of range", BOOT_SCRUB.key, days))
    }

    fn set_scrub_interval(&self, days: u32) -> Result<()> {
        let mut store = SettingsStore::load(&self.path)?;
        store.set_int(BOOT_SCRUB, i64::from(days));
        store.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsIntervalStore {
            path: dir.path().join("settings.toml"),
        };
        assert_eq!(store.scrub_interval().unwrap(), 7);
    }

    #[test]
    fn interval_persists_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db").join("settings.toml");
        let store = SettingsIntervalStore { path: path.clone() };
        store.set_scrub_interval(35).unwrap();

        let reloaded = SettingsStore::load(&path).unwrap();
        assert_eq!(reloaded.int(BOOT_SCRUB), 35);
        assert_eq!(store.scrub_interval().unwrap(), 35);
    }

    #[test]
    fn other_keys_survive_updates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "[values]\nconsole_menu = true\n").unwrap();

        let store = SettingsIntervalStore { path: path.clone() };
        store.set_scrub_interval(14).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("console_menu = true"));
        assert!(contents.contains("boot_scrub = 14"));
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "values = [not toml").unwrap();
        let store = SettingsIntervalStore { path };
        assert!(store.scrub_interval().is_err());
    }
}
