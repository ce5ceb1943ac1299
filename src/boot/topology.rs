//! Growing, shrinking and swapping the members of the boot pool mirror.
//!
//! None of these operations roll back on failure. If `attach` fails after
//! formatting, the new disk stays partitioned but is not part of the pool;
//! the returned error names the step that failed.

use std::sync::Arc;

use super::engine::{AttachSpec, DiskInventory, PoolEngine};
use super::error::{BootError, Step};
use super::loader::{LoaderInstaller, LoaderReport};
use super::locks::{ATTACH_LOCK, JobLocks};
use super::types::{BootPoolName, FormatOptions, Platform};
use crate::ui::prelude::*;

/// Boot pools are at most a two-way mirror.
pub const MAX_MEMBERS: usize = 2;

/// Index of the ZFS partition on every formatted boot disk
const DATA_PARTITION: u32 = 2;

pub struct PoolTopology {
    pool: BootPoolName,
    platform: Platform,
    engine: Arc<dyn PoolEngine>,
    inventory: Arc<dyn DiskInventory>,
    loader: LoaderInstaller,
    locks: JobLocks,
}

impl PoolTopology {
    pub fn new(
        pool: BootPoolName,
        platform: Platform,
        engine: Arc<dyn PoolEngine>,
        inventory: Arc<dyn DiskInventory>,
        loader: LoaderInstaller,
        locks: JobLocks,
    ) -> Self {
        Self {
            pool,
            platform,
            engine,
            inventory,
            loader,
            locks,
        }
    }

    /// Attach `disk` to the boot pool, turning a stripe into a mirror.
    ///
    /// Unless `expand` is set, the new ZFS partition is sized like the existing
    /// member's so the two sides of the mirror stay interchangeable.
    pub async fn attach(&self, disk: &str, expand: bool) -> Result<LoaderReport, BootError> {
        let pool = self.pool.require()?;
        let _guard = self.locks.acquire(ATTACH_LOCK).await;

        let disks = self
            .engine
            .get_disks(pool)
            .await
            .map_err(BootError::dependency(Step::ListDisks))?;
        if disks.len() >= MAX_MEMBERS {
            return Err(BootError::UnsupportedTopology {
                members: disks.len(),
            });
        }
        let Some(existing) = disks.first() else {
            return Err(BootError::Dependency {
                step: Step::ListDisks,
                source: anyhow::anyhow!("{pool} has no member disk to mirror"),
            });
        };

        let options = self.attach_format_options(existing, expand).await?;

        emit(
            Level::Info,
            "boot.attach.format",
            &format!("{} Formatting {}", char::from(NerdFont::HardDrive), disk),
            serde_json::to_value(&options).ok(),
        );
        let boot_type = self
            .engine
            .format_device(disk, &options)
            .await
            .map_err(BootError::dependency(Step::Format))?;

        let state = self
            .engine
            .query(pool)
            .await
            .map_err(BootError::dependency(Step::QueryTopology))?;
        let target = state
            .data_guid()
            .ok_or_else(|| BootError::Dependency {
                step: Step::QueryTopology,
                source: anyhow::anyhow!("{pool} has no data vdev to mirror"),
            })?
            .to_string();

        let member = self.platform.partition_name(disk, DATA_PARTITION);
        let job = self
            .engine
            .extend(
                pool,
                AttachSpec {
                    target,
                    path: format!("/dev/{member}"),
                },
            )
            .await
            .map_err(BootError::dependency(Step::Extend))?;
        job.wait()
            .await
            .map_err(BootError::dependency(Step::Extend))?;

        let report = self.loader.install(boot_type, disk).await;

        // Always expand so a larger replacement disk's capacity is picked up
        self.engine
            .online_member(pool, &member, true)
            .await
            .map_err(BootError::dependency(Step::Online))?;

        emit(
            Level::Success,
            "boot.attach.done",
            &format!("{} {} attached to {}", char::from(NerdFont::Check), disk, pool),
            None,
        );
        Ok(report)
    }

    async fn attach_format_options(
        &self,
        existing: &str,
        expand: bool,
    ) -> Result<FormatOptions, BootError> {
        let mut options = FormatOptions::default();
        if !expand {
            let zfs_type = self.inventory.zfs_partition_type();
            options.size = self
                .inventory
                .list_partitions(existing)
                .await
                .map_err(BootError::dependency(Step::InspectMember))?
                .into_iter()
                .filter(|p| p.partition_type == zfs_type)
                .map(|p| p.size)
                .last();
        }

        options.swap_size = self.swap_size_of(existing).await?;
        Ok(options)
    }

    async fn swap_size_of(&self, disk: &str) -> Result<Option<u64>, BootError> {
        self.inventory
            .swap_size(disk)
            .await
            .map(|size| size.filter(|s| *s > 0))
            .map_err(BootError::dependency(Step::InspectMember))
    }

    /// Remove `disk` from the boot pool mirror.
    pub async fn detach(&self, disk: &str) -> Result<(), BootError> {
        let pool = self.pool.require()?;
        self.engine
            .detach_member(pool, disk)
            .await
            .map_err(BootError::dependency(Step::Detach))?;
        emit(
            Level::Success,
            "boot.detach.done",
            &format!("{} {} detached from {}", char::from(NerdFont::Check), disk, pool),
            None,
        );
        Ok(())
    }

    /// Replace pool member `label` with a freshly formatted `disk`.
    pub async fn replace(&self, label: &str, disk: &str) -> Result<LoaderReport, BootError> {
        let pool = self.pool.require()?;

        let disks = self
            .engine
            .get_disks(pool)
            .await
            .map_err(BootError::dependency(Step::ListDisks))?;
        let options = match disks.first() {
            Some(existing) => FormatOptions {
                size: None,
                swap_size: self.swap_size_of(existing).await?,
            },
            None => FormatOptions::default(),
        };

        emit(
            Level::Info,
            "boot.replace.format",
            &format!("{} Formatting {}", char::from(NerdFont::HardDrive), disk),
            serde_json::to_value(&options).ok(),
        );
        let boot_type = self
            .engine
            .format_device(disk, &options)
            .await
            .map_err(BootError::dependency(Step::Format))?;

        let member = self.platform.partition_name(disk, DATA_PARTITION);
        self.engine
            .replace_member(pool, label, &member)
            .await
            .map_err(BootError::dependency(Step::Replace))?;

        let report = self.loader.install(boot_type, disk).await;
        emit(
            Level::Success,
            "boot.replace.done",
            &format!(
                "{} {} replaced by {} in {}",
                char::from(NerdFont::Check),
                label,
                disk,
                pool
            ),
            None,
        );
        Ok(report)
    }
}
