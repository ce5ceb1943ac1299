mod boot;
mod common;
mod ui;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::Serialize;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use crate::boot::{
    BootConfig, BootError, BootService, BootType, LoaderReport, PoolDescriptor, require_root,
};
use crate::common::SystemRunner;
use crate::ui::prelude::*;

/// Boot pool manager
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Show debug messages, including every host command run
    #[arg(short, long, global = true)]
    debug: bool,

    /// Output format
    #[arg(long, value_enum, default_value = "text", global = true)]
    output: OutputFormat,

    /// Configuration file (defaults to /etc/bootpool/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print disk-changing commands instead of running them
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the boot pool topology and health
    State,
    /// List the disks backing the boot pool
    Disks,
    /// Show whether the boot pool is laid out for BIOS or EFI
    BootType,
    /// Add a disk to the boot pool as a mirror of the existing one
    Attach {
        /// Disk to attach, e.g. ada1 or sdb
        disk: String,
        /// Use the whole disk instead of matching the existing member's size
        #[arg(long)]
        expand: bool,
    },
    /// Remove a disk from the boot pool mirror
    Detach {
        /// Pool member to remove
        disk: String,
    },
    /// Replace a pool member with a new disk
    Replace {
        /// Member being replaced, as shown by `state`
        label: String,
        /// New disk
        disk: String,
    },
    /// Scrub the boot pool and wait for it to finish
    Scrub,
    /// Automatic scrub interval
    ScrubInterval {
        #[command(subcommand)]
        command: ScrubIntervalCommands,
    },
}

#[derive(Subcommand, Debug)]
enum ScrubIntervalCommands {
    /// Show the interval in days
    Get,
    /// Set the interval in days
    Set {
        #[arg(allow_negative_numbers = true)]
        days: i64,
    },
}

impl Commands {
    fn is_mutating(&self) -> bool {
        matches!(
            self,
            Commands::Attach { .. }
                | Commands::Detach { .. }
                | Commands::Replace { .. }
                | Commands::Scrub
                | Commands::ScrubInterval {
                    command: ScrubIntervalCommands::Set { .. }
                }
        )
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    ui::init(cli.output, std::io::stdout().is_terminal());
    ui::set_debug_mode(cli.debug);

    if let Err(e) = run(cli).await {
        let step = e
            .downcast_ref::<BootError>()
            .and_then(BootError::step)
            .map(|step| serde_json::json!({ "step": step.to_string() }));
        emit(
            Level::Error,
            "bootpool.error",
            &format!("{} {:#}", char::from(NerdFont::Cross), e),
            step,
        );
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = BootConfig::load(cli.config.as_deref())?;
    config.dry_run |= cli.dry_run;

    if cli.command.is_mutating() {
        require_root(config.dry_run)?;
    }

    let runner = Arc::new(SystemRunner::new(config.dry_run));
    let service = BootService::start(&config, runner).await;
    if let Some(pool) = service.pool_name().as_option() {
        emit(Level::Debug, "bootpool.pool", &format!("boot pool is {}", pool), None);
    }

    match cli.command {
        Commands::State => print_state(&service.get_state().await?),
        Commands::Disks => print_disks(&service.get_disks().await?),
        Commands::BootType => print_boot_type(service.get_boot_type().await?),
        Commands::Attach { disk, expand } => {
            let report = service.attach(&disk, expand).await?;
            print_report(&report);
        }
        Commands::Detach { disk } => {
            service.detach(&disk).await?;
            print_json_or(&serde_json::json!({ "detached": disk }), || ());
        }
        Commands::Replace { label, disk } => {
            let report = service.replace(&label, &disk).await?;
            print_report(&report);
        }
        Commands::Scrub => {
            service.scrub().await?;
            print_json_or(&serde_json::json!({ "scrubbed": true }), || ());
        }
        Commands::ScrubInterval { command } => {
            let days = match command {
                ScrubIntervalCommands::Get => service.get_scrub_interval()?,
                ScrubIntervalCommands::Set { days } => service.set_scrub_interval(days)?,
            };
            print_json_or(&serde_json::json!({ "boot_scrub": days }), || {
                println!("{} days", days)
            });
        }
    }
    Ok(())
}

/// Print `value` as JSON in JSON mode, otherwise run the text renderer.
fn print_json_or<T: Serialize>(value: &T, text: impl FnOnce()) {
    match get_output_format() {
        OutputFormat::Json => match serde_json::to_string_pretty(value) {
            Ok(s) => println!("{}", s),
            Err(e) => emit(Level::Error, "bootpool.serialize", &e.to_string(), None),
        },
        OutputFormat::Text => text(),
    }
}

fn print_state(state: &PoolDescriptor) {
    print_json_or(state, || {
        println!("{} {}", state.name.bold(), health_colored(&state.health));
        for group in &state.groups.data {
            if group.kind == "mirror" {
                println!("  {} {}", group.name, health_colored(&group.state));
                for member in &group.members {
                    println!("    {} {}", member.name, health_colored(&member.state));
                }
            } else {
                for member in &group.members {
                    println!("  {} {}", member.name, health_colored(&member.state));
                }
            }
        }
    });
}

fn health_colored(state: &str) -> colored::ColoredString {
    match state {
        "ONLINE" => state.green(),
        "DEGRADED" => state.yellow(),
        _ => state.red(),
    }
}

fn print_disks(disks: &[String]) {
    print_json_or(&disks, || {
        for disk in disks {
            println!("{} {}", char::from(NerdFont::HardDrive), disk);
        }
    });
}

fn print_boot_type(boot_type: Option<BootType>) {
    print_json_or(&boot_type, || match boot_type {
        Some(t) => println!("{}", t),
        None => println!("unknown"),
    });
}

fn print_report(report: &LoaderReport) {
    // soft failures were already warned about one by one
    print_json_or(report, || {
        if !report.is_clean() {
            println!(
                "{} boot loader step(s) failed; the new disk may not be bootable",
                report.soft_failures.len()
            );
        }
    });
}
