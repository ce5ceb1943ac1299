use anyhow::Result;
use std::sync::Arc;

use super::engine::PoolEngine;
use super::error::{BootError, Step};
use super::locks::{JobLocks, SCRUB_LOCK};
use super::types::BootPoolName;
use crate::ui::prelude::*;

/// Persistent storage of the automatic scrub interval.
pub trait IntervalStore: Send + Sync {
    fn scrub_interval(&self) -> Result<u32>;
    fn set_scrub_interval(&self, days: u32) -> Result<()>;
}

pub struct ScrubScheduler {
    pool: BootPoolName,
    engine: Arc<dyn PoolEngine>,
    store: Arc<dyn IntervalStore>,
    locks: JobLocks,
}

impl ScrubScheduler {
    pub fn new(
        pool: BootPoolName,
        engine: Arc<dyn PoolEngine>,
        store: Arc<dyn IntervalStore>,
        locks: JobLocks,
    ) -> Self {
        Self {
            pool,
            engine,
            store,
            locks,
        }
    }

    /// Scrub the boot pool and wait for the scrub to finish.
    pub async fn scrub(&self) -> Result<(), BootError> {
        let pool = self.pool.require()?;
        let _guard = self.locks.acquire(SCRUB_LOCK).await;

        emit(
            Level::Info,
            "boot.scrub.start",
            &format!("{} Scrubbing {}", char::from(NerdFont::Refresh), pool),
            None,
        );
        let job = self
            .engine
            .scrub(pool)
            .await
            .map_err(BootError::dependency(Step::Scrub))?;
        job.wait().await.map_err(BootError::dependency(Step::Scrub))
    }

    pub fn set_scrub_interval(&self, days: i64) -> Result<u32, BootError> {
        if days < 1 {
            return Err(BootError::InvalidArgument(format!(
                "scrub interval must be at least 1 day, got {days}"
            )));
        }
        let days = u32::try_from(days).map_err(|_| {
            BootError::InvalidArgument(format!("scrub interval of {days} days is too large"))
        })?;
        self.store
            .set_scrub_interval(days)
            .map_err(BootError::dependency(Step::WriteScrubInterval))?;
        Ok(days)
    }

    pub fn get_scrub_interval(&self) -> Result<u32, BootError> {
        self.store
            .scrub_interval()
            .map_err(BootError::dependency(Step::ReadScrubInterval))
    }
}
