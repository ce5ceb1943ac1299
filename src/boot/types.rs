//! Core data structures for the boot pool

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use super::error::BootError;

/// Firmware model a boot disk is laid out for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BootType {
    #[serde(rename = "BIOS")]
    Bios,
    #[serde(rename = "EFI")]
    Efi,
    Unknown,
}

impl BootType {
    /// Classify from boot partition counts. Any BIOS boot partition wins.
    pub fn from_counts(efi: usize, bios: usize) -> Self {
        if bios > 0 {
            BootType::Bios
        } else if efi > 0 {
            BootType::Efi
        } else {
            BootType::Unknown
        }
    }

    /// `None` for [`BootType::Unknown`]
    pub fn known(self) -> Option<Self> {
        match self {
            BootType::Unknown => None,
            other => Some(other),
        }
    }
}

impl std::fmt::Display for BootType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BootType::Bios => write!(f, "BIOS"),
            BootType::Efi => write!(f, "EFI"),
            BootType::Unknown => write!(f, "unknown"),
        }
    }
}

/// Host operating system family; decides tool names and partition naming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Linux,
    Bsd,
}

impl Platform {
    pub fn host() -> Self {
        if cfg!(target_os = "linux") {
            Platform::Linux
        } else {
            Platform::Bsd
        }
    }

    /// Device name of partition `index` on `disk`.
    ///
    /// BSD always uses `ada0p2`; Linux uses `sda2`, or `nvme0n1p2` when the
    /// disk name ends in a digit.
    pub fn partition_name(self, disk: &str, index: u32) -> String {
        match self {
            Platform::Bsd => format!("{}p{}", disk, index),
            Platform::Linux => {
                if disk.chars().last().unwrap_or(' ').is_numeric() {
                    format!("{}p{}", disk, index)
                } else {
                    format!("{}{}", disk, index)
                }
            }
        }
    }
}

static NUMBERED_PARTITION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+\d)p\d+$").expect("valid regex"));
static LETTERED_PARTITION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^((?:sd|vd|xvd|hd)[a-z]+)\d+$").expect("valid regex"));

/// Map a pool member device (`/dev/ada0p2`, `sda3`, `nvme0n1p3`) to its whole disk.
pub fn disk_of_member(device: &str) -> String {
    let name = device.strip_prefix("/dev/").unwrap_or(device);
    if let Some(caps) = NUMBERED_PARTITION.captures(name) {
        return caps[1].to_string();
    }
    if let Some(caps) = LETTERED_PARTITION.captures(name) {
        return caps[1].to_string();
    }
    name.to_string()
}

/// Partitioning parameters for a new boot disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FormatOptions {
    /// ZFS partition size in bytes; `None` uses the rest of the disk
    pub size: Option<u64>,
    /// Swap partition size in bytes; `None` creates no swap
    pub swap_size: Option<u64>,
}

/// One partition as reported by the disk inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Partition {
    pub name: String,
    pub index: u32,
    /// `gpart` type name on BSD, lowercase GPT type GUID on Linux
    pub partition_type: String,
    pub size: u64,
}

/// A leaf device in the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolMember {
    pub name: String,
    pub guid: String,
    pub state: String,
}

/// A top-level vdev: a mirror, or a single disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VdevGroup {
    pub name: String,
    /// `mirror` or `disk`
    pub kind: String,
    pub guid: String,
    pub state: String,
    pub members: Vec<PoolMember>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolGroups {
    pub data: Vec<VdevGroup>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolDescriptor {
    pub name: String,
    pub health: String,
    pub groups: PoolGroups,
}

impl PoolDescriptor {
    /// GUID of the first data vdev, the target new mirror peers attach to.
    pub fn data_guid(&self) -> Option<&str> {
        self.groups.data.first().map(|g| g.guid.as_str())
    }

    pub fn members(&self) -> impl Iterator<Item = &PoolMember> {
        self.groups.data.iter().flat_map(|g| g.members.iter())
    }

    pub fn disks(&self) -> Vec<String> {
        self.members().map(|m| disk_of_member(&m.name)).collect()
    }
}

/// Name of the boot pool, decided once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootPoolName {
    Resolved(String),
    Unresolved,
}

impl BootPoolName {
    /// Pick the first candidate that is among the pools present on the host.
    pub fn select<S: AsRef<str>>(present: &[&str], candidates: &[S]) -> Self {
        candidates
            .iter()
            .map(|c| c.as_ref())
            .find(|c| present.contains(c))
            .map(|c| BootPoolName::Resolved(c.to_string()))
            .unwrap_or(BootPoolName::Unresolved)
    }

    pub fn require(&self) -> Result<&str, BootError> {
        match self {
            BootPoolName::Resolved(name) => Ok(name),
            BootPoolName::Unresolved => Err(BootError::UnresolvedPool),
        }
    }

    pub fn as_option(&self) -> Option<&str> {
        self.require().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bios_wins_over_efi() {
        assert_eq!(BootType::from_counts(3, 1), BootType::Bios);
        assert_eq!(BootType::from_counts(0, 2), BootType::Bios);
        assert_eq!(BootType::from_counts(2, 0), BootType::Efi);
        assert_eq!(BootType::from_counts(0, 0), BootType::Unknown);
    }

    #[test]
    fn boot_type_serializes_like_firmware_names() {
        assert_eq!(serde_json::to_string(&BootType::Efi).unwrap(), "\"EFI\"");
        assert_eq!(serde_json::to_string(&BootType::Bios.known()).unwrap(), "\"BIOS\"");
        assert_eq!(serde_json::to_string(&BootType::Unknown.known()).unwrap(), "null");
    }

    #[test]
    fn partition_names_follow_platform() {
        assert_eq!(Platform::Bsd.partition_name("ada1", 2), "ada1p2");
        assert_eq!(Platform::Linux.partition_name("sdb", 2), "sdb2");
        assert_eq!(Platform::Linux.partition_name("nvme0n1", 1), "nvme0n1p1");
    }

    #[test]
    fn member_devices_map_to_disks() {
        assert_eq!(disk_of_member("/dev/ada0p2"), "ada0");
        assert_eq!(disk_of_member("da1p2"), "da1");
        assert_eq!(disk_of_member("/dev/sda3"), "sda");
        assert_eq!(disk_of_member("/dev/nvme0n1p3"), "nvme0n1");
        assert_eq!(disk_of_member("sdb"), "sdb");
        assert_eq!(disk_of_member("gptid/1234-abcd"), "gptid/1234-abcd");
    }

    #[test]
    fn pool_name_prefers_candidate_order() {
        let present = ["tank", "boot-pool", "freenas-boot"];
        assert_eq!(
            BootPoolName::select(&present, &["freenas-boot", "boot-pool"]),
            BootPoolName::Resolved("freenas-boot".into())
        );
        assert_eq!(
            BootPoolName::select(&["tank"], &["freenas-boot", "boot-pool"]),
            BootPoolName::Unresolved
        );
        assert!(matches!(
            BootPoolName::Unresolved.require(),
            Err(BootError::UnresolvedPool)
        ));
    }
}
