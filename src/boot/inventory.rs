//! Partition table inspection through `gpart list` (BSD) and `lsblk` (Linux).

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use super::engine::DiskInventory;
use super::types::{Partition, Platform};
use crate::common::{CommandRunner, HostCommand};

/// GPT type GUIDs, as printed by lsblk's PARTTYPE column
pub const GPT_ZFS: &str = "6a898cc3-1dd2-11b2-99a6-080020736631";
pub const GPT_LINUX_SWAP: &str = "0657fd6d-a4ab-43c4-84e5-0933c84b4f4f";
pub const GPT_EFI: &str = "c12a7328-f81f-11d2-ba4b-00a0c93ec93b";
pub const GPT_BIOS_BOOT: &str = "21686148-6449-6e6f-744e-656564454649";

pub fn inventory_for(platform: Platform, runner: Arc<dyn CommandRunner>) -> Arc<dyn DiskInventory> {
    match platform {
        Platform::Bsd => Arc::new(GpartInventory { runner }),
        Platform::Linux => Arc::new(LsblkInventory { runner }),
    }
}

pub struct GpartInventory {
    runner: Arc<dyn CommandRunner>,
}

#[async_trait]
impl DiskInventory for GpartInventory {
    async fn list_partitions(&self, disk: &str) -> Result<Vec<Partition>> {
        let stdout = self
            .runner
            .run_checked(HostCommand::new("gpart").args(["list", disk]))
            .await
            .with_context(|| format!("listing partitions of {disk}"))?;
        Ok(parse_gpart_list(&stdout))
    }

    fn zfs_partition_type(&self) -> &'static str {
        "freebsd-zfs"
    }

    fn swap_partition_type(&self) -> &'static str {
        "freebsd-swap"
    }
}

/// Parse the `Providers:` section of `gpart list <disk>`.
pub fn parse_gpart_list(output: &str) -> Vec<Partition> {
    let mut partitions = Vec::new();
    let mut current: Option<Partition> = None;
    let mut in_providers = false;

    for line in output.lines() {
        let trimmed = line.trim();
        match trimmed {
            "Providers:" => {
                in_providers = true;
                continue;
            }
            "Consumers:" => break,
            _ => {}
        }
        if !in_providers {
            continue;
        }

        // "1. Name: ada0p1" opens a provider block
        if let Some((number, rest)) = trimmed.split_once(". Name: ")
            && number.chars().all(|c| c.is_ascii_digit())
        {
            partitions.extend(current.take());
            current = Some(Partition {
                name: rest.trim().to_string(),
                index: 0,
                partition_type: String::new(),
                size: 0,
            });
            continue;
        }

        let Some(partition) = current.as_mut() else {
            continue;
        };
        let Some((key, value)) = trimmed.split_once(": ") else {
            continue;
        };
        match key {
            "Mediasize" => {
                // "Mediasize: 524288 (512K)"
                partition.size = value
                    .split_whitespace()
                    .next()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0);
            }
            "type" => partition.partition_type = value.trim().to_string(),
            "index" => partition.index = value.trim().parse().unwrap_or(0),
            _ => {}
        }
    }

    partitions.extend(current);
    partitions
}

pub struct LsblkInventory {
    runner: Arc<dyn CommandRunner>,
}

#[async_trait]
impl DiskInventory for LsblkInventory {
    async fn list_partitions(&self, disk: &str) -> Result<Vec<Partition>> {
        let stdout = self
            .runner
            .run_checked(HostCommand::new("lsblk").args([
                "-J".to_string(),
                "-b".to_string(),
                "-o".to_string(),
                "NAME,SIZE,TYPE,PARTTYPE".to_string(),
                format!("/dev/{disk}"),
            ]))
            .await
            .with_context(|| format!("listing partitions of {disk}"))?;
        parse_lsblk(&stdout)
    }

    fn zfs_partition_type(&self) -> &'static str {
        GPT_ZFS
    }

    fn swap_partition_type(&self) -> &'static str {
        GPT_LINUX_SWAP
    }
}

/// Parse `lsblk -J -b -o NAME,SIZE,TYPE,PARTTYPE <disk>` into the disk's partitions.
pub fn parse_lsblk(output: &str) -> Result<Vec<Partition>> {
    let json: Value = serde_json::from_str(output).context("Failed to parse lsblk JSON output")?;

    let blockdevices = json
        .get("blockdevices")
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow::anyhow!("No blockdevices in lsblk output"))?;

    let mut partitions = Vec::new();
    for device in blockdevices {
        let Some(children) = device.get("children").and_then(|v| v.as_array()) else {
            continue;
        };
        for child in children {
            if child.get("type").and_then(|v| v.as_str()) != Some("part") {
                continue;
            }
            let Some(name) = child.get("name").and_then(|v| v.as_str()) else {
                continue;
            };
            partitions.push(Partition {
                name: name.to_string(),
                index: trailing_number(name),
                partition_type: child
                    .get("parttype")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_lowercase(),
                size: json_size(child.get("size")),
            });
        }
    }
    Ok(partitions)
}

// Older util-linux prints sizes as strings even with --bytes
fn json_size(value: Option<&Value>) -> u64 {
    match value {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(Value::String(s)) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

fn trailing_number(name: &str) -> u32 {
    let digits: String = name
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    digits.parse().unwrap_or(0)
}
