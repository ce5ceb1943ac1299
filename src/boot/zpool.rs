//! [`PoolEngine`] on top of the `zpool` command line and the host partitioner.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

use super::boot_type::BootTypeDetector;
use super::engine::{AttachSpec, Job, PoolEngine};
use super::types::{
    BootPoolName, BootType, FormatOptions, Platform, PoolDescriptor, PoolGroups, PoolMember,
    VdevGroup,
};
use crate::common::{CommandRunner, HostCommand};
use crate::ui::prelude::*;

/// EFI system partition size
const ESP_SIZE_MIB: u64 = 260;

pub struct ZpoolCli {
    runner: Arc<dyn CommandRunner>,
    platform: Platform,
    detector: Arc<dyn BootTypeDetector>,
    boot_pool: BootPoolName,
}

impl ZpoolCli {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        platform: Platform,
        detector: Arc<dyn BootTypeDetector>,
        boot_pool: BootPoolName,
    ) -> Self {
        Self {
            runner,
            platform,
            detector,
            boot_pool,
        }
    }

    /// Names of all pools imported on the host.
    pub async fn list_pools(runner: &dyn CommandRunner) -> Result<Vec<String>> {
        let stdout = runner
            .run_checked(HostCommand::new("zpool").args(["list", "-H", "-o", "name"]))
            .await?;
        Ok(stdout.split_whitespace().map(|s| s.to_string()).collect())
    }

    async fn zpool(&self, args: &[&str]) -> Result<String> {
        self.runner
            .run_checked(HostCommand::new("zpool").args(args.iter().copied()).mutating())
            .await
    }

    async fn layout_for_pool(&self) -> Result<BootType> {
        let disks = match self.boot_pool.as_option() {
            Some(pool) => self.get_disks(pool).await?,
            None => Vec::new(),
        };
        self.detector.detect(&disks).await
    }

    fn partition_commands(
        &self,
        disk: &str,
        boot_type: BootType,
        options: &FormatOptions,
    ) -> Vec<HostCommand> {
        match self.platform {
            Platform::Bsd => gpart_commands(disk, boot_type, options),
            Platform::Linux => sgdisk_commands(disk, boot_type, options),
        }
    }
}

fn kib(bytes: u64) -> u64 {
    bytes / 1024
}

fn gpart_commands(disk: &str, boot_type: BootType, options: &FormatOptions) -> Vec<HostCommand> {
    let gpart = || HostCommand::new("gpart").mutating();
    let mut commands = vec![gpart().args(["create", "-s", "gpt", disk])];

    if boot_type == BootType::Efi {
        commands.push(gpart().args([
            "add".to_string(),
            "-t".to_string(),
            "efi".to_string(),
            "-i".to_string(),
            "1".to_string(),
            "-s".to_string(),
            format!("{ESP_SIZE_MIB}m"),
            disk.to_string(),
        ]));
        commands.push(
            HostCommand::new("newfs_msdos")
                .args(["-F", "16"])
                .arg(format!("/dev/{}", Platform::Bsd.partition_name(disk, 1)))
                .mutating(),
        );
    } else {
        commands.push(gpart().args(["add", "-t", "freebsd-boot", "-i", "1", "-s", "512k", disk]));
    }

    if let Some(swap) = options.swap_size {
        commands.push(gpart().args([
            "add".to_string(),
            "-t".to_string(),
            "freebsd-swap".to_string(),
            "-a".to_string(),
            "4k".to_string(),
            "-i".to_string(),
            "3".to_string(),
            "-s".to_string(),
            format!("{}k", kib(swap)),
            disk.to_string(),
        ]));
    }

    let mut zfs = gpart().args(["add", "-t", "freebsd-zfs", "-a", "4k", "-i", "2"]);
    if let Some(size) = options.size {
        zfs = zfs.arg("-s").arg(format!("{}k", kib(size)));
    }
    commands.push(zfs.arg(disk));
    commands
}

fn sgdisk_commands(disk: &str, boot_type: BootType, options: &FormatOptions) -> Vec<HostCommand> {
    let device = format!("/dev/{disk}");
    let sgdisk = || HostCommand::new("sgdisk").mutating();
    let mut commands = vec![sgdisk().args(["-Z", device.as_str()])];

    if boot_type == BootType::Efi {
        commands.push(sgdisk().args([
            "-a4096".to_string(),
            format!("-n1:0:+{ESP_SIZE_MIB}M"),
            "-t1:EF00".to_string(),
            device.clone(),
        ]));
    } else {
        commands.push(sgdisk().args(["-a4096", "-n1:0:+1M", "-t1:EF02", device.as_str()]));
    }

    if let Some(swap) = options.swap_size {
        commands.push(sgdisk().args([
            "-a4096".to_string(),
            format!("-n3:0:+{}K", kib(swap)),
            "-t3:8200".to_string(),
            device.clone(),
        ]));
    }

    let end = options
        .size
        .map(|size| format!("+{}K", kib(size)))
        .unwrap_or_else(|| "0".to_string());
    commands.push(sgdisk().args([
        "-a4096".to_string(),
        format!("-n2:0:{end}"),
        "-t2:BF01".to_string(),
        device.clone(),
    ]));
    commands.push(HostCommand::new("udevadm").arg("settle").mutating());

    if boot_type == BootType::Efi {
        commands.push(
            HostCommand::new("mkfs.fat")
                .arg("-F32")
                .arg(format!("/dev/{}", Platform::Linux.partition_name(disk, 1)))
                .mutating(),
        );
    }
    commands
}

#[async_trait]
impl PoolEngine for ZpoolCli {
    async fn query(&self, pool: &str) -> Result<PoolDescriptor> {
        let paths = self
            .runner
            .run_checked(HostCommand::new("zpool").args(["status", "-P", pool]))
            .await?;
        let guids = self
            .runner
            .run_checked(HostCommand::new("zpool").args(["status", "-g", pool]))
            .await?;
        build_descriptor(pool, &paths, &guids)
    }

    async fn get_disks(&self, pool: &str) -> Result<Vec<String>> {
        Ok(self.query(pool).await?.disks())
    }

    async fn format_device(&self, disk: &str, options: &FormatOptions) -> Result<BootType> {
        let boot_type = self
            .layout_for_pool()
            .await
            .context("detecting boot type of the existing pool")?;

        // A disk without a partition table makes destroy fail; that is fine
        let wipe = match self.platform {
            Platform::Bsd => HostCommand::new("gpart").args(["destroy", "-F", disk]),
            Platform::Linux => HostCommand::new("wipefs").args(["-a".to_string(), format!("/dev/{disk}")]),
        };
        self.runner.run(wipe.mutating()).await?;

        for command in self.partition_commands(disk, boot_type, options) {
            self.runner
                .run_checked(command)
                .await
                .with_context(|| format!("partitioning {disk}"))?;
        }
        Ok(boot_type)
    }

    async fn extend(&self, pool: &str, vdev: AttachSpec) -> Result<Job> {
        let runner = self.runner.clone();
        let command = HostCommand::new("zpool")
            .args(["attach", pool, vdev.target.as_str(), vdev.path.as_str()])
            .mutating();
        Ok(Job::spawn(
            format!("Attaching {} to {}", vdev.path, pool),
            async move {
                runner.run_checked(command).await?;
                Ok(())
            },
        ))
    }

    async fn replace_member(&self, pool: &str, label: &str, device: &str) -> Result<()> {
        self.zpool(&["replace", pool, label, device]).await?;
        Ok(())
    }

    async fn online_member(&self, pool: &str, device: &str, expand: bool) -> Result<()> {
        if expand {
            self.zpool(&["online", "-e", pool, device]).await?;
        } else {
            self.zpool(&["online", pool, device]).await?;
        }
        Ok(())
    }

    async fn detach_member(&self, pool: &str, device: &str) -> Result<()> {
        self.zpool(&["detach", pool, device]).await?;
        Ok(())
    }

    async fn scrub(&self, pool: &str) -> Result<Job> {
        let runner = self.runner.clone();
        // -w returns only once the scrub has finished
        let command = HostCommand::new("zpool")
            .args(["scrub", "-w", pool])
            .mutating();
        emit(
            Level::Debug,
            "zpool.scrub",
            &format!("starting `{}`", command),
            None,
        );
        Ok(Job::spawn(format!("Scrubbing {}", pool), async move {
            runner.run_checked(command).await?;
            Ok(())
        }))
    }
}

/// One device line of the `config:` section of `zpool status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    pub depth: usize,
    pub name: String,
    pub state: String,
}

/// Parse the data vdev tree out of `zpool status` output.
///
/// Depth 0 is the pool itself, depth 1 a top-level vdev and depth 2 a
/// mirror child. Auxiliary sections (`logs`, `cache`, `spares`) follow at
/// depth 0 and are not part of the data tree.
pub fn parse_status_config(output: &str) -> Vec<StatusEntry> {
    let mut entries = Vec::new();
    let mut in_config = false;
    let mut seen_pool = false;

    for line in output.lines() {
        let trimmed = line.trim();
        if !in_config {
            in_config = trimmed == "config:";
            continue;
        }
        if trimmed.is_empty() || trimmed.starts_with("NAME") {
            continue;
        }
        if trimmed.starts_with("errors:") {
            break;
        }

        let body = line.trim_start_matches('\t');
        let indent = body.len() - body.trim_start_matches(' ').len();
        let depth = indent / 2;
        if depth == 0 {
            if seen_pool {
                break;
            }
            seen_pool = true;
        }

        let mut fields = trimmed.split_whitespace();
        let name = fields.next().unwrap_or_default().to_string();
        let state = fields.next().unwrap_or_default().to_string();
        entries.push(StatusEntry { depth, name, state });
    }
    entries
}

fn pool_health(output: &str) -> Option<String> {
    output
        .lines()
        .find_map(|l| l.trim().strip_prefix("state:"))
        .map(|s| s.trim().to_string())
}

/// Combine `zpool status -P` and `zpool status -g`, which list the same tree in the same order.
pub fn build_descriptor(pool: &str, paths: &str, guids: &str) -> Result<PoolDescriptor> {
    let named = parse_status_config(paths);
    let numbered = parse_status_config(guids);
    if named.is_empty() {
        anyhow::bail!("no configuration found in `zpool status` output for {pool}");
    }
    if named.len() != numbered.len() {
        anyhow::bail!("`zpool status -P` and `zpool status -g` disagree on the layout of {pool}");
    }

    let mut data: Vec<VdevGroup> = Vec::new();
    for (i, (entry, guid)) in named.iter().zip(&numbered).enumerate() {
        match entry.depth {
            0 => {}
            1 => {
                let has_children = named.get(i + 1).is_some_and(|next| next.depth > 1);
                let member = PoolMember {
                    name: entry.name.clone(),
                    guid: guid.name.clone(),
                    state: entry.state.clone(),
                };
                data.push(VdevGroup {
                    name: entry.name.clone(),
                    kind: if has_children {
                        entry.name.split('-').next().unwrap_or("mirror").to_string()
                    } else {
                        "disk".to_string()
                    },
                    guid: guid.name.clone(),
                    state: entry.state.clone(),
                    members: if has_children { Vec::new() } else { vec![member] },
                });
            }
            _ => {
                let group = data
                    .last_mut()
                    .with_context(|| format!("device {} has no parent vdev", entry.name))?;
                group.members.push(PoolMember {
                    name: entry.name.clone(),
                    guid: guid.name.clone(),
                    state: entry.state.clone(),
                });
            }
        }
    }

    Ok(PoolDescriptor {
        name: pool.to_string(),
        health: pool_health(paths).unwrap_or_else(|| "UNKNOWN".to_string()),
        groups: PoolGroups { data },
    })
}
