use crate::config::config::ShroudConfig;
use crate::kernel::device::{major, minor, DeviceEncoding};
use crate::kernel::uts::{effective_uid, HostIdentity, IdentitySource};
use crate::runtime::{ManifestReport, Shroud};
use crate::registry::UnmountPassReport;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply a configuration's manifest against the host and print a summary
    Apply {
        /// JSON configuration file
        config: PathBuf,
        /// Run one unmount pass after the manifest is applied
        #[arg(long)]
        unmount_pass: bool,
        /// Print counters in Prometheus text format instead of JSON
        #[arg(long)]
        metrics: bool,
    },
    /// Decode a legacy packed device number
    DecodeDev {
        /// Packing variant the value uses (old, new or huge)
        #[arg(long, default_value = "huge")]
        encoding: DeviceEncoding,
        /// Packed value, decimal or 0x-prefixed hex
        value: String,
    },
    /// Show the identity reported once a configuration's manifest is applied
    Uname {
        /// JSON configuration file
        config: PathBuf,
    },
}

#[derive(Serialize)]
struct ApplySummary {
    manifest: ManifestReport,
    paths: usize,
    mounts: usize,
    kstats: usize,
    unmounts: usize,
    identity_spoofed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    unmount_pass: Option<UnmountPassReport>,
}

pub fn run() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Apply {
            config,
            unmount_pass,
            metrics,
        } => {
            let shroud = load(&config)?;
            let report = shroud.apply_configured_manifest();
            let pass = unmount_pass.then(|| shroud.run_unmount_pass(effective_uid()));

            if metrics {
                print!("{}", shroud.metrics().export_prometheus());
            } else {
                let summary = ApplySummary {
                    paths: shroud.paths().len(),
                    mounts: shroud.mounts().len(),
                    kstats: shroud.kstats().len(),
                    unmounts: shroud.unmounts().len(),
                    identity_spoofed: shroud.identity().is_active(),
                    unmount_pass: pass,
                    manifest: report.clone(),
                };
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }

            if !report.is_clean() {
                anyhow::bail!("{} manifest entries failed", report.failed);
            }
        }
        Commands::DecodeDev { encoding, value } => {
            let raw = parse_number(&value)?;
            let dev = encoding.decode(raw);
            println!("{} {}:{}", dev, major(dev), minor(dev));
        }
        Commands::Uname { config } => {
            let shroud = load(&config)?;
            let report = shroud.apply_configured_manifest();
            if !report.is_clean() {
                eprintln!("Warning: {} manifest entries failed", report.failed);
            }
            let (identity, spoofed) = match shroud.active_identity_spoof() {
                Some(identity) => (identity, true),
                None => (HostIdentity.current()?, false),
            };
            println!(
                "{} {} {} {} {}{}",
                identity.sysname,
                identity.nodename,
                identity.release,
                identity.version,
                identity.machine,
                if spoofed { "" } else { " (not spoofed)" }
            );
        }
    }
    Ok(())
}

fn load(path: &Path) -> Result<Shroud> {
    let config = ShroudConfig::load(path)
        .with_context(|| format!("loading configuration {}", path.display()))?;
    Ok(Shroud::host(config)?)
}

fn parse_number(value: &str) -> Result<u64> {
    let parsed = match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.with_context(|| format!("'{}' is not a number", value))
}
