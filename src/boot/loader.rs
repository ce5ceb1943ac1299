//! Boot loader installation onto a freshly formatted boot disk.
//!
//! Every step here is best-effort: a failure becomes a [`SoftFailure`] in the
//! returned [`LoaderReport`] and never aborts the attach or replace that
//! called it.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::config::LoaderConfig;
use super::types::{BootType, Platform};
use crate::common::{CommandRunner, HostCommand};
use crate::ui::prelude::*;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SoftFailure {
    pub step: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoaderReport {
    pub soft_failures: Vec<SoftFailure>,
}

impl LoaderReport {
    pub fn is_clean(&self) -> bool {
        self.soft_failures.is_empty()
    }

    fn fail(&mut self, step: &'static str, message: impl Into<String>) {
        self.soft_failures.push(SoftFailure {
            step,
            message: message.into(),
        });
    }

    /// Warn about every soft failure.
    pub fn log(&self, disk: &str) {
        for failure in &self.soft_failures {
            emit(
                Level::Warn,
                "boot.loader.soft_failure",
                &format!(
                    "{} Boot loader on {} may be incomplete: {} failed: {}",
                    char::from(NerdFont::Warning),
                    disk,
                    failure.step,
                    failure.message
                ),
                serde_json::to_value(failure).ok(),
            );
        }
    }
}

pub struct LoaderInstaller {
    runner: Arc<dyn CommandRunner>,
    platform: Platform,
    config: LoaderConfig,
}

impl LoaderInstaller {
    pub fn new(runner: Arc<dyn CommandRunner>, platform: Platform, config: LoaderConfig) -> Self {
        Self {
            runner,
            platform,
            config,
        }
    }

    pub async fn install(&self, boot_type: BootType, disk: &str) -> LoaderReport {
        let mut report = LoaderReport::default();
        match boot_type {
            BootType::Efi => self.install_efi(disk, &mut report).await,
            BootType::Bios | BootType::Unknown => self.install_bios(disk, &mut report).await,
        }
        report.log(disk);
        report
    }

    async fn install_efi(&self, disk: &str, report: &mut LoaderReport) {
        let esp = format!("/dev/{}", self.platform.partition_name(disk, 1));
        emit(
            Level::Info,
            "boot.loader.efi",
            &format!("{} Installing EFI loader on {}", char::from(NerdFont::Info), esp),
            None,
        );

        let mount_point = match tempfile::Builder::new().prefix("bootpool-efi").tempdir() {
            Ok(dir) => dir,
            Err(e) => {
                report.fail("create mount point", e.to_string());
                return;
            }
        };

        let fs_type = match self.platform {
            Platform::Bsd => "msdosfs",
            Platform::Linux => "vfat",
        };
        let mount = HostCommand::new("mount")
            .args(["-t", fs_type, esp.as_str()])
            .arg(mount_point.path().to_string_lossy())
            .mutating();
        if !self.soft_run("mount", mount, report).await {
            // Nothing is mounted, so nothing to populate or unmount
            return;
        }

        self.copy_payload(mount_point.path(), report).await;

        let umount = HostCommand::new("umount")
            .arg(mount_point.path().to_string_lossy())
            .mutating();
        if !self.soft_run("umount", umount, report).await {
            // Still mounted: removing the directory would wipe the ESP
            let left = mount_point.keep();
            if let Some(failure) = report.soft_failures.last_mut() {
                failure.message = format!(
                    "{}; {} is still mounted and was left in place",
                    failure.message,
                    left.display()
                );
            }
        }
    }

    async fn copy_payload(&self, root: &Path, report: &mut LoaderReport) {
        let target: PathBuf = root.join(&self.config.efi_target);
        if let Some(dir) = target.parent()
            && let Err(e) = std::fs::create_dir_all(dir)
        {
            report.fail("create efi/boot", format!("{}: {}", dir.display(), e));
            return;
        }

        let copy = HostCommand::new("cp")
            .arg(self.config.efi_payload.to_string_lossy())
            .arg(target.to_string_lossy())
            .mutating();
        self.soft_run("copy loader", copy, report).await;
    }

    async fn install_bios(&self, disk: &str, report: &mut LoaderReport) {
        let device = format!("/dev/{}", disk);
        emit(
            Level::Info,
            "boot.loader.bios",
            &format!(
                "{} Installing BIOS boot code on {}",
                char::from(NerdFont::Info),
                device
            ),
            None,
        );

        let command = match self.platform {
            Platform::Bsd => HostCommand::new("gpart")
                .arg("bootcode")
                .arg("-b")
                .arg(self.config.pmbr.to_string_lossy())
                .arg("-p")
                .arg(self.config.gptzfsboot.to_string_lossy())
                .args(["-i", "1"])
                .arg(device),
            Platform::Linux => HostCommand::new("grub-install")
                .arg("--target=i386-pc")
                .arg(device),
        };
        self.soft_run("install boot code", command.mutating(), report)
            .await;
    }

    /// Run a command, recording a soft failure unless it exits 0.
    async fn soft_run(
        &self,
        step: &'static str,
        command: HostCommand,
        report: &mut LoaderReport,
    ) -> bool {
        let rendered = command.render();
        match self.runner.run(command).await {
            Ok(output) if output.success() => true,
            Ok(output) => {
                report.fail(step, format!("`{}` {}", rendered, output.describe_failure()));
                false
            }
            Err(e) => {
                report.fail(step, format!("{e:#}"));
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boot::testing::FakeRunner;
    use crate::common::command::CommandOutput;

    fn installer(runner: Arc<FakeRunner>, platform: Platform) -> LoaderInstaller {
        LoaderInstaller::new(runner, platform, LoaderConfig::default())
    }

    #[tokio::test]
    async fn efi_mounts_copies_and_unmounts() {
        let runner = Arc::new(FakeRunner::default());
        let report = installer(runner.clone(), Platform::Bsd)
            .install(BootType::Efi, "ada1")
            .await;

        assert!(report.is_clean());
        assert_eq!(runner.programs(), ["mount", "cp", "umount"]);
        let commands = runner.rendered();
        assert!(commands[0].starts_with("mount -t msdosfs /dev/ada1p1 "));
        assert!(commands[1].starts_with("cp /boot/boot1.efi "));
        assert!(commands[1].ends_with("efi/boot/BOOTx64.efi"));
    }

    #[tokio::test]
    async fn clean_unmount_removes_mount_point() {
        let runner = Arc::new(FakeRunner::default());
        installer(runner.clone(), Platform::Bsd)
            .install(BootType::Efi, "ada1")
            .await;
        let umount = runner.rendered()[2].clone();
        let mount_point = PathBuf::from(umount.trim_start_matches("umount "));
        assert!(!mount_point.exists());
    }

    #[tokio::test]
    async fn failed_umount_keeps_mounted_contents() {
        let runner = Arc::new(
            FakeRunner::default().respond("umount", CommandOutput::failed(1, "Device busy")),
        );
        let report = installer(runner.clone(), Platform::Bsd)
            .install(BootType::Efi, "ada1")
            .await;

        assert_eq!(runner.programs(), ["mount", "cp", "umount"]);
        let umount = runner.rendered()[2].clone();
        let mount_point = PathBuf::from(umount.trim_start_matches("umount "));
        // the directory created for the loader stands in for the ESP contents
        let loader_dir = mount_point.join("efi/boot");
        let survived = loader_dir.is_dir();
        let _ = std::fs::remove_dir_all(&mount_point);

        assert!(survived);
        assert_eq!(report.soft_failures.len(), 1);
        assert_eq!(report.soft_failures[0].step, "umount");
        let message = &report.soft_failures[0].message;
        assert!(message.contains("Device busy"));
        assert!(message.contains(&mount_point.display().to_string()));
    }

    #[tokio::test]
    async fn linux_efi_uses_vfat() {
        let runner = Arc::new(FakeRunner::default());
        installer(runner.clone(), Platform::Linux)
            .install(BootType::Efi, "nvme0n1")
            .await;
        assert!(runner.rendered()[0].starts_with("mount -t vfat /dev/nvme0n1p1 "));
    }

    #[tokio::test]
    async fn failed_mount_is_soft_and_skips_the_rest() {
        let runner = Arc::new(
            FakeRunner::default().respond("mount", CommandOutput::failed(1, "Invalid argument")),
        );
        let report = installer(runner.clone(), Platform::Bsd)
            .install(BootType::Efi, "ada1")
            .await;

        assert_eq!(report.soft_failures.len(), 1);
        assert_eq!(report.soft_failures[0].step, "mount");
        assert!(report.soft_failures[0].message.contains("Invalid argument"));
        assert_eq!(runner.programs(), ["mount"]);
    }

    #[tokio::test]
    async fn failed_copy_still_unmounts() {
        let runner = Arc::new(
            FakeRunner::default().respond("cp", CommandOutput::failed(1, "No space left")),
        );
        let report = installer(runner.clone(), Platform::Bsd)
            .install(BootType::Efi, "ada1")
            .await;

        assert_eq!(report.soft_failures.len(), 1);
        assert_eq!(report.soft_failures[0].step, "copy loader");
        assert_eq!(runner.programs(), ["mount", "cp", "umount"]);
    }

    #[tokio::test]
    async fn bios_writes_boot_code_to_raw_disk() {
        let runner = Arc::new(FakeRunner::default());
        let report = installer(runner.clone(), Platform::Bsd)
            .install(BootType::Bios, "ada1")
            .await;
        assert!(report.is_clean());
        assert_eq!(
            runner.rendered(),
            ["gpart bootcode -b /boot/pmbr -p /boot/gptzfsboot -i 1 /dev/ada1"]
        );
    }

    #[tokio::test]
    async fn unknown_boot_type_takes_bios_path() {
        let runner = Arc::new(FakeRunner::default());
        installer(runner.clone(), Platform::Linux)
            .install(BootType::Unknown, "sdb")
            .await;
        assert_eq!(runner.rendered(), ["grub-install --target=i386-pc /dev/sdb"]);
    }

    #[tokio::test]
    async fn failed_boot_code_is_reported() {
        let runner = Arc::new(
            FakeRunner::default().respond("gpart bootcode", CommandOutput::failed(1, "")),
        );
        let report = installer(runner, Platform::Bsd)
            .install(BootType::Bios, "ada1")
            .await;
        assert_eq!(report.soft_failures[0].step, "install boot code");
    }
}
