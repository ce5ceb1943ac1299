//! Recording fakes of the storage collaborators, shared by the boot tests.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::engine::{AttachSpec, DiskInventory, Job, PoolEngine};
use super::scrub::IntervalStore;
use super::types::{
    BootType, FormatOptions, Partition, PoolDescriptor, PoolGroups, PoolMember, VdevGroup,
    disk_of_member,
};
use crate::common::command::CommandOutput;
use crate::common::{CommandRunner, HostCommand};

#[derive(Default)]
pub struct FakeInventory {
    disks: HashMap<String, Vec<Partition>>,
}

impl FakeInventory {
    /// Add a disk whose partitions are numbered from 1 in the given order.
    pub fn with_disk(mut self, disk: &str, partitions: &[(&str, u64)]) -> Self {
        let parts = partitions
            .iter()
            .enumerate()
            .map(|(i, (kind, size))| Partition {
                name: format!("{}p{}", disk, i + 1),
                index: i as u32 + 1,
                partition_type: kind.to_string(),
                size: *size,
            })
            .collect();
        self.disks.insert(disk.to_string(), parts);
        self
    }
}

#[async_trait]
impl DiskInventory for FakeInventory {
    async fn list_partitions(&self, disk: &str) -> Result<Vec<Partition>> {
        self.disks
            .get(disk)
            .cloned()
            .ok_or_else(|| anyhow!("gpart: No such geom: {disk}."))
    }

    fn zfs_partition_type(&self) -> &'static str {
        "freebsd-zfs"
    }

    fn swap_partition_type(&self) -> &'static str {
        "freebsd-swap"
    }
}

/// Records every command; answers from scripted outputs matched by prefix.
#[derive(Default)]
pub struct FakeRunner {
    commands: Mutex<Vec<HostCommand>>,
    scripted: Mutex<Vec<(String, CommandOutput)>>,
}

impl FakeRunner {
    pub fn respond(self, prefix: &str, output: CommandOutput) -> Self {
        self.scripted
            .lock()
            .unwrap()
            .push((prefix.to_string(), output));
        self
    }

    pub fn rendered(&self) -> Vec<String> {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.render())
            .collect()
    }

    pub fn programs(&self) -> Vec<String> {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.program().to_string())
            .collect()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, command: HostCommand) -> Result<CommandOutput> {
        let rendered = command.render();
        self.commands.lock().unwrap().push(command);
        let scripted = self.scripted.lock().unwrap();
        Ok(scripted
            .iter()
            .find(|(prefix, _)| rendered.starts_with(prefix.as_str()))
            .map(|(_, out)| out.clone())
            .unwrap_or_else(|| CommandOutput::ok("")))
    }
}

#[derive(Default)]
pub struct EngineState {
    pub disks: Vec<String>,
    pub calls: Vec<String>,
    pub format_options: Vec<FormatOptions>,
    pub online: Vec<(String, bool)>,
}

/// In-memory pool engine. Disk names double as member device names.
pub struct FakeEngine {
    pub state: Arc<Mutex<EngineState>>,
    pub format_result: BootType,
    pub fail: Option<&'static str>,
    pub extend_job_error: Option<&'static str>,
}

impl FakeEngine {
    pub fn with_disks(disks: &[&str]) -> Self {
        Self {
            state: Arc::new(Mutex::new(EngineState {
                disks: disks.iter().map(|d| d.to_string()).collect(),
                ..Default::default()
            })),
            format_result: BootType::Efi,
            fail: None,
            extend_job_error: None,
        }
    }

    pub fn failing(mut self, call: &'static str) -> Self {
        self.fail = Some(call);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn disks(&self) -> Vec<String> {
        self.state.lock().unwrap().disks.clone()
    }

    fn record(&self, call: &'static str, detail: String) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .calls
            .push(format!("{call} {detail}").trim_end().to_string());
        if self.fail == Some(call) {
            return Err(anyhow!("{call} exploded"));
        }
        Ok(())
    }
}

#[async_trait]
impl PoolEngine for FakeEngine {
    async fn query(&self, pool: &str) -> Result<PoolDescriptor> {
        self.record("query", pool.to_string())?;
        let disks = self.disks();
        let members: Vec<PoolMember> = disks
            .iter()
            .enumerate()
            .map(|(i, d)| PoolMember {
                name: format!("/dev/{d}p2"),
                guid: format!("{}", 1000 + i),
                state: "ONLINE".into(),
            })
            .collect();
        let data = match members.len() {
            0 => Vec::new(),
            1 => vec![VdevGroup {
                name: members[0].name.clone(),
                kind: "disk".into(),
                guid: members[0].guid.clone(),
                state: "ONLINE".into(),
                members,
            }],
            _ => vec![VdevGroup {
                name: "mirror-0".into(),
                kind: "mirror".into(),
                guid: "42".into(),
                state: "ONLINE".into(),
                members,
            }],
        };
        Ok(PoolDescriptor {
            name: pool.to_string(),
            health: "ONLINE".into(),
            groups: PoolGroups { data },
        })
    }

    async fn get_disks(&self, pool: &str) -> Result<Vec<String>> {
        self.record("get_disks", pool.to_string())?;
        Ok(self.disks())
    }

    async fn format_device(&self, disk: &str, options: &FormatOptions) -> Result<BootType> {
        self.record("format_device", disk.to_string())?;
        self.state
            .lock()
            .unwrap()
            .format_options
            .push(options.clone());
        Ok(self.format_result)
    }

    async fn extend(&self, pool: &str, vdev: AttachSpec) -> Result<Job> {
        self.record("extend", format!("{pool} {} {}", vdev.target, vdev.path))?;
        let state = self.state.clone();
        let error = self.extend_job_error;
        Ok(Job::spawn(format!("attaching {}", vdev.path), async move {
            if let Some(message) = error {
                return Err(anyhow!(message));
            }
            state.lock().unwrap().disks.push(disk_of_member(&vdev.path));
            Ok(())
        }))
    }

    async fn replace_member(&self, pool: &str, label: &str, device: &str) -> Result<()> {
        self.record("replace_member", format!("{pool} {label} {device}"))?;
        let mut state = self.state.lock().unwrap();
        let new_disk = disk_of_member(device);
        if let Some(slot) = state.disks.iter_mut().find(|d| d.as_str() == label) {
            *slot = new_disk;
        }
        Ok(())
    }

    async fn online_member(&self, pool: &str, device: &str, expand: bool) -> Result<()> {
        self.record("online_member", format!("{pool} {device} {expand}"))?;
        self.state
            .lock()
            .unwrap()
            .online
            .push((device.to_string(), expand));
        Ok(())
    }

    async fn detach_member(&self, pool: &str, device: &str) -> Result<()> {
        self.record("detach_member", format!("{pool} {device}"))?;
        self.state.lock().unwrap().disks.retain(|d| d != device);
        Ok(())
    }

    async fn scrub(&self, pool: &str) -> Result<Job> {
        self.record("scrub", pool.to_string())?;
        Ok(Job::spawn(format!("scrub of {pool}"), async { Ok(()) }))
    }
}

#[derive(Default)]
pub struct MemoryIntervalStore {
    pub value: Mutex<Option<u32>>,
    pub writes: Mutex<usize>,
}

impl IntervalStore for MemoryIntervalStore {
    fn scrub_interval(&self) -> Result<u32> {
        Ok(self.value.lock().unwrap().unwrap_or(7))
    }

    fn set_scrub_interval(&self, days: u32) -> Result<()> {
        *self.value.lock().unwrap() = Some(days);
        *self.writes.lock().unwrap() += 1;
        Ok(())
    }
}
