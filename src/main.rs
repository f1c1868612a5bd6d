use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use docsync::store::{FileTransport, LocalStore};
use docsync::sync::{BandwidthLimit, SyncEngine, SynchronizeEvent, VersionPolicy};
use docsync::SyncConfig;

/// Replicate a document store into another one.
#[derive(Debug, Parser)]
#[command(name = "docsync", version, about)]
struct Cli {
    /// Store to copy from
    source: PathBuf,

    /// Store to copy into (created if missing)
    target: PathBuf,

    /// Config file (defaults to <config dir>/docsync/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Documents synchronized at once
    #[arg(short = 'j', long)]
    concurrency: Option<usize>,

    /// Which side wins when version identifiers differ
    #[arg(long, value_enum)]
    policy: Option<PolicyArg>,

    /// File transfer limit in bytes per second
    #[arg(long)]
    bandwidth: Option<u64>,

    /// Abort the run after this many seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Hide the progress bar
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PolicyArg {
    EarliestWins,
    LatestWins,
}

impl From<PolicyArg> for VersionPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::EarliestWins => VersionPolicy::EarliestWins,
            PolicyArg::LatestWins => VersionPolicy::LatestWins,
        }
    }
}

impl Cli {
    fn sync_config(&self) -> Result<SyncConfig> {
        let mut config = SyncConfig::load_or_default(self.config.as_deref())?;
        if let Some(concurrency) = self.concurrency {
            config = config.with_concurrency(concurrency);
        }
        if let Some(policy) = self.policy {
            config = config.with_version_policy(policy.into());
        }
        if let Some(bandwidth) = self.bandwidth {
            config = config.with_bandwidth_limit(BandwidthLimit::new(bandwidth));
        }
        if let Some(timeout) = self.timeout {
            config = config.with_timeout(Duration::from_secs(timeout));
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(err) => {
            eprintln!("{} {:#}", "Error:".red().bold(), err);
            ExitCode::FAILURE
        }
    }
}

/// Returns false when some documents could not be synchronized.
async fn run(cli: Cli) -> Result<bool> {
    let config = cli.sync_config()?;
    let source = LocalStore::open(&cli.source).await?;
    let target = LocalStore::open(&cli.target).await?;
    let engine = SyncEngine::new(config, FileTransport).context("Failed to start sync engine")?;

    let pb = if cli.quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(0)
    };
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} documents ({percent}%)")?
            .progress_chars("=>-"),
    );
    let bar = pb.clone();
    let listener = move |event: SynchronizeEvent| {
        bar.set_length(event.total as u64);
        bar.set_position(event.completed as u64);
    };

    let result = engine.synchronize(&source, &target, Some(&listener)).await?;
    pb.finish_and_clear();

    println!(
        "{} {} documents written, {} files copied ({})",
        "Synced:".green().bold(),
        result.mutations.fingerprints.len(),
        result.mutations.files.len(),
        humansize::format_size(result.bytes_transferred, humansize::BINARY)
    );
    if !result.conflicts.fingerprints.is_empty() {
        println!(
            "{} {} documents have equal versions on both sides:",
            "Conflicts:".yellow().bold(),
            result.conflicts.fingerprints.len()
        );
        for fingerprint in &result.conflicts.fingerprints {
            println!("  {}", fingerprint);
        }
    }
    let bandwidth = engine.config().bandwidth_limit();
    if bandwidth.is_limited() {
        println!("{} capped at {}", "Bandwidth:".cyan().bold(), bandwidth);
    }
    for failure in &result.failures {
        println!("{} {}: {}", "Failed:".red().bold(), failure.label, failure.error);
    }

    Ok(result.failures.is_empty())
}
