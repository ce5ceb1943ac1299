//! Boot pool management: mirror topology, boot loaders and scrubbing.

pub mod boot_type;
pub mod config;
pub mod engine;
pub mod error;
pub mod inventory;
pub mod loader;
pub mod locks;
pub mod scrub;
pub mod settings;
pub mod topology;
pub mod types;
pub mod zpool;

#[cfg(test)]
pub mod testing;

use std::sync::Arc;

pub use config::BootConfig;
pub use error::{BootError, Step};
pub use loader::LoaderReport;
pub use types::{BootPoolName, BootType, Platform, PoolDescriptor};

use boot_type::{BootTypeDetector, detector_for};
use engine::PoolEngine;
use inventory::inventory_for;
use loader::LoaderInstaller;
use locks::JobLocks;
use scrub::{IntervalStore, ScrubScheduler};
use settings::SettingsIntervalStore;
use topology::PoolTopology;
use zpool::ZpoolCli;

use crate::common::CommandRunner;
use crate::ui::prelude::*;

/// Entry point for every boot pool operation.
pub struct BootService {
    pool: BootPoolName,
    engine: Arc<dyn PoolEngine>,
    detector: Arc<dyn BootTypeDetector>,
    topology: PoolTopology,
    scrub: ScrubScheduler,
}

/// Collaborators a [`BootService`] is assembled from.
pub struct ServiceParts {
    pub pool: BootPoolName,
    pub platform: Platform,
    pub engine: Arc<dyn PoolEngine>,
    pub inventory: Arc<dyn engine::DiskInventory>,
    pub detector: Arc<dyn BootTypeDetector>,
    pub loader: LoaderInstaller,
    pub store: Arc<dyn IntervalStore>,
}

impl BootService {
    /// Resolve the boot pool name and wire the host collaborators.
    ///
    /// A failed or empty probe leaves the pool unresolved; the service still
    /// starts and operations needing the pool report [`BootError::UnresolvedPool`].
    pub async fn start(config: &BootConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let pool = match ZpoolCli::list_pools(runner.as_ref()).await {
            Ok(present) => {
                let present: Vec<&str> = present.iter().map(String::as_str).collect();
                BootPoolName::select(&present, &config.pool_names)
            }
            Err(e) => {
                emit(
                    Level::Debug,
                    "boot.probe.failed",
                    &format!("zpool list failed: {e:#}"),
                    None,
                );
                BootPoolName::Unresolved
            }
        };
        if pool == BootPoolName::Unresolved {
            emit(
                Level::Error,
                "boot.probe.unresolved",
                &format!(
                    "{} Failed to detect boot pool name (tried {})",
                    char::from(NerdFont::Cross),
                    config.pool_names.join(", ")
                ),
                None,
            );
        }

        let platform = config.platform();
        let inventory = inventory_for(platform, runner.clone());
        let detector = detector_for(platform, config.efi_marker.clone(), inventory.clone());
        let engine = Arc::new(ZpoolCli::new(
            runner.clone(),
            platform,
            detector.clone(),
            pool.clone(),
        ));

        Self::from_parts(ServiceParts {
            pool,
            platform,
            engine,
            inventory,
            detector,
            loader: LoaderInstaller::new(runner, platform, config.loader.clone()),
            store: Arc::new(SettingsIntervalStore {
                path: config.settings_path.clone(),
            }),
        })
    }

    pub fn from_parts(parts: ServiceParts) -> Self {
        let locks = JobLocks::default();
        let topology = PoolTopology::new(
            parts.pool.clone(),
            parts.platform,
            parts.engine.clone(),
            parts.inventory,
            parts.loader,
            locks.clone(),
        );
        let scrub = ScrubScheduler::new(
            parts.pool.clone(),
            parts.engine.clone(),
            parts.store,
            locks,
        );
        Self {
            pool: parts.pool,
            engine: parts.engine,
            detector: parts.detector,
            topology,
            scrub,
        }
    }

    pub fn pool_name(&self) -> &BootPoolName {
        &self.pool
    }

    pub async fn get_state(&self) -> Result<PoolDescriptor, BootError> {
        let pool = self.pool.require()?;
        self.engine
            .query(pool)
            .await
            .map_err(BootError::dependency(Step::QueryTopology))
    }

    pub async fn get_disks(&self) -> Result<Vec<String>, BootError> {
        let pool = self.pool.require()?;
        self.engine
            .get_disks(pool)
            .await
            .map_err(BootError::dependency(Step::ListDisks))
    }

    /// Firmware layout of the boot pool, `None` when it cannot be told.
    pub async fn get_boot_type(&self) -> Result<Option<BootType>, BootError> {
        let disks = self.get_disks().await?;
        let boot_type = self
            .detector
            .detect(&disks)
            .await
            .map_err(BootError::dependency(Step::DetectBootType))?;
        Ok(boot_type.known())
    }

    pub async fn attach(&self, disk: &str, expand: bool) -> Result<LoaderReport, BootError> {
        self.topology.attach(disk, expand).await
    }

    pub async fn detach(&self, disk: &str) -> Result<(), BootError> {
        self.topology.detach(disk).await
    }

    pub async fn replace(&self, label: &str, disk: &str) -> Result<LoaderReport, BootError> {
        self.topology.replace(label, disk).await
    }

    pub async fn scrub(&self) -> Result<(), BootError> {
        self.scrub.scrub().await
    }

    pub fn set_scrub_interval(&self, days: i64) -> Result<u32, BootError> {
        self.scrub.set_scrub_interval(days)
    }

    pub fn get_scrub_interval(&self) -> Result<u32, BootError> {
        self.scrub.get_scrub_interval()
    }
}

/// Refuse to touch disks unless running as root. Dry runs are exempt.
pub fn require_root(dry_run: bool) -> Result<(), BootError> {
    if dry_run {
        return Ok(());
    }
    match sudo::check() {
        sudo::RunningAs::User => Err(BootError::PrivilegeRequired),
        _ => Ok(()),
    }
}
