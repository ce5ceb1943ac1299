use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use super::types::Platform;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/bootpool/config.toml";

/// Boot loader payload locations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoaderConfig {
    /// EFI application copied onto the EFI system partition
    pub efi_payload: PathBuf,
    /// Destination inside the EFI system partition
    pub efi_target: PathBuf,
    /// Protective MBR boot code
    pub pmbr: PathBuf,
    /// ZFS-aware stage 2 boot code written to the BIOS boot partition
    pub gptzfsboot: PathBuf,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            efi_payload: PathBuf::from("/boot/boot1.efi"),
            efi_target: PathBuf::from("efi/boot/BOOTx64.efi"),
            pmbr: PathBuf::from("/boot/pmbr"),
            gptzfsboot: PathBuf::from("/boot/gptzfsboot"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BootConfig {
    /// Accepted boot pool names, first present one wins
    pub pool_names: Vec<String>,
    /// Host family; detected from the build target when unset
    pub platform: Option<Platform>,
    /// Settings file holding the scrub interval
    pub settings_path: PathBuf,
    /// Present only when the running system booted through EFI (Linux)
    pub efi_marker: PathBuf,
    /// Print disk-changing commands instead of running them
    pub dry_run: bool,
    pub loader: LoaderConfig,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            pool_names: vec!["freenas-boot".to_string(), "boot-pool".to_string()],
            platform: None,
            settings_path: PathBuf::from("/var/db/bootpool/settings.toml"),
            efi_marker: PathBuf::from("/sys/firmware/efi"),
            dry_run: false,
            loader: LoaderConfig::default(),
        }
    }
}

impl BootConfig {
    /// Load the config file. An explicit path must exist; the default one may be absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p, true),
            None => (Path::new(DEFAULT_CONFIG_PATH), false),
        };

        if !path.exists() {
            if explicit {
                anyhow::bail!("Configuration file not found: {}", path.display());
            }
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn platform(&self) -> Platform {
        self.platform.unwrap_or_else(Platform::host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "platform = \"bsd\"\npool_names = [\"boot-pool\"]\n\n[loader]\nefi_payload = \"/boot/loader.efi\"\n",
        )
        .unwrap();

        let config = BootConfig::load(Some(&path)).unwrap();
        assert_eq!(config.platform(), Platform::Bsd);
        assert_eq!(config.pool_names, ["boot-pool"]);
        assert_eq!(config.loader.efi_payload, PathBuf::from("/boot/loader.efi"));
        assert_eq!(config.loader.pmbr, PathBuf::from("/boot/pmbr"));
        assert!(!config.dry_run);
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = BootConfig::load(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(err.to_string().contains("Configuration file not found"));
    }

    #[test]
    fn invalid_platform_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "platform = \"windows\"\n").unwrap();
        assert!(BootConfig::load(Some(&path)).is_err());
    }
}
