//! Contracts of the storage collaborators the boot pool operations drive.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use std::future::Future;
use tokio::task::JoinHandle;

use super::types::{BootType, FormatOptions, Partition, PoolDescriptor};
use crate::common::progress::{create_spinner, finish_spinner_with_success};

/// A long-running pool operation running in the background.
pub struct Job {
    description: String,
    handle: JoinHandle<Result<()>>,
}

impl Job {
    pub fn spawn<F>(description: impl Into<String>, work: F) -> Self
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            description: description.into(),
            handle: tokio::spawn(work),
        }
    }

    /// Wait for the job and return its own result, error message included.
    pub async fn wait(self) -> Result<()> {
        let spinner = create_spinner(format!("{}...", self.description));
        let result = match self.handle.await {
            Ok(result) => result,
            Err(join_error) => Err(anyhow!(join_error))
                .with_context(|| format!("{} did not complete", self.description)),
        };
        match &result {
            Ok(()) => finish_spinner_with_success(spinner, &self.description),
            Err(_) => spinner.finish_and_clear(),
        }
        result
    }
}

/// A device to attach as mirror peer of an existing vdev.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachSpec {
    /// GUID of the vdev to mirror
    pub target: String,
    /// Full device path of the new member, e.g. `/dev/ada1p2`
    pub path: String,
}

/// The storage pool engine.
#[async_trait]
pub trait PoolEngine: Send + Sync {
    async fn query(&self, pool: &str) -> Result<PoolDescriptor>;

    /// Whole disks backing the pool, in topology order.
    async fn get_disks(&self, pool: &str) -> Result<Vec<String>>;

    /// Partition `disk` as a boot pool member and report the firmware layout written.
    async fn format_device(&self, disk: &str, options: &FormatOptions) -> Result<BootType>;

    async fn extend(&self, pool: &str, vdev: AttachSpec) -> Result<Job>;

    async fn replace_member(&self, pool: &str, label: &str, device: &str) -> Result<()>;

    async fn online_member(&self, pool: &str, device: &str, expand: bool) -> Result<()>;

    async fn detach_member(&self, pool: &str, device: &str) -> Result<()>;

    async fn scrub(&self, pool: &str) -> Result<Job>;
}

/// Partition table inspection.
#[async_trait]
pub trait DiskInventory: Send + Sync {
    async fn list_partitions(&self, disk: &str) -> Result<Vec<Partition>>;

    /// Partition type of a ZFS pool member on this host.
    fn zfs_partition_type(&self) -> &'static str;

    fn swap_partition_type(&self) -> &'static str;

    /// Size of the swap partition on `disk`, if it has one.
    async fn swap_size(&self, disk: &str) -> Result<Option<u64>> {
        let swap_type = self.swap_partition_type();
        Ok(self
            .list_partitions(disk)
            .await?
            .into_iter()
            .find(|p| p.partition_type == swap_type)
            .map(|p| p.size))
    }
}
