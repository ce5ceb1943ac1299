//! Boot type detection.
//!
//! Linux hosts answer from the running firmware; BSD hosts inspect the
//! partition tables of the pool members. The strategy is chosen once when the
//! service starts.

use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

use super::engine::DiskInventory;
use super::inventory::{GPT_BIOS_BOOT, GPT_EFI};
use super::types::{BootType, Platform};

#[async_trait]
pub trait BootTypeDetector: Send + Sync {
    async fn detect(&self, disks: &[String]) -> Result<BootType>;
}

pub fn detector_for(
    platform: Platform,
    efi_marker: PathBuf,
    inventory: Arc<dyn DiskInventory>,
) -> Arc<dyn BootTypeDetector> {
    match platform {
        Platform::Linux => Arc::new(FirmwareDetector { marker: efi_marker }),
        Platform::Bsd => Arc::new(PartitionTableDetector { inventory }),
    }
}

/// EFI when the firmware interface directory exists, BIOS otherwise.
pub struct FirmwareDetector {
    pub marker: PathBuf,
}

#[async_trait]
impl BootTypeDetector for FirmwareDetector {
    async fn detect(&self, _disks: &[String]) -> Result<BootType> {
        if self.marker.exists() {
            Ok(BootType::Efi)
        } else {
            Ok(BootType::Bios)
        }
    }
}

/// Counts EFI and BIOS boot partitions across all member disks.
pub struct PartitionTableDetector {
    pub inventory: Arc<dyn DiskInventory>,
}

#[async_trait]
impl BootTypeDetector for PartitionTableDetector {
    async fn detect(&self, disks: &[String]) -> Result<BootType> {
        let mut efi = 0;
        let mut bios = 0;
        for disk in disks {
            for partition in self.inventory.list_partitions(disk).await? {
                match partition.partition_type.as_str() {
                    "efi" | GPT_EFI => efi += 1,
                    "freebsd-boot" | GPT_BIOS_BOOT => bios += 1,
                    _ => {}
                }
            }
        }
        Ok(BootType::from_counts(efi, bios))
    }
}
