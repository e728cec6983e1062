use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::info;
use vaktpost_config::VaktpostConfig;
use vaktpost_core::events::{Direction, Verdict};
use vaktpost_core::sink::LogQuery;
use vaktpost_engine::runtime;

use crate::error::CliError;

#[derive(Parser)]
#[command(name = "vaktpost", version, about)]
pub struct Cli {
    /// Configuration file; defaults to config/vaktpost.yaml plus VAKTPOST_ENV overlays
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Converge the host firewall on the declared policies
    Reconcile(ReconcileArgs),
    /// Serve verdicts for streamed flow records
    Serve,
    /// Capture live traffic and stream flows to the verdict service
    Capture(CaptureArgs),
    /// Apply or remove a single policy right away
    Enforce(EnforceArgs),
    /// Remove every rule installed by the reconciler
    Purge(PurgeArgs),
    /// Query persisted flow log entries
    Logs(LogsArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ReconcileArgs {
    /// Run a single cycle and exit
    #[arg(long)]
    pub once: bool,
    /// Apply to an in-memory firewall instead of the host
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone)]
pub struct CaptureArgs {
    #[arg(short, long)]
    pub interface: Option<String>,
    /// One of http, tcp, udp, icmp, scans, all
    #[arg(short, long)]
    pub filter: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct EnforceArgs {
    #[arg(short, long)]
    pub policy: u64,
    /// Delete the policy's rules instead of installing them
    #[arg(long)]
    pub remove: bool,
    /// Narrow the rules to this source port
    #[arg(long)]
    pub app_port: Option<u16>,
}

#[derive(Args, Debug, Clone)]
pub struct PurgeArgs {
    /// List the managed rules without removing them
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone)]
pub struct LogsArgs {
    #[arg(long)]
    pub source: Option<String>,
    #[arg(long)]
    pub destination: Option<String>,
    #[arg(long)]
    pub port: Option<String>,
    #[arg(long, value_enum)]
    pub direction: Option<DirectionArg>,
    /// Inclusive lower bound (RFC 3339 or YYYY-MM-DD)
    #[arg(long)]
    pub since: Option<String>,
    /// Inclusive upper bound (RFC 3339 or YYYY-MM-DD)
    #[arg(long)]
    pub until: Option<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum DirectionArg {
    Incoming,
    Outgoing,
    Unknown,
}

impl From<DirectionArg> for Direction {
    fn from(arg: DirectionArg) -> Self {
        match arg {
            DirectionArg::Incoming => Direction::Incoming,
            DirectionArg::Outgoing => Direction::Outgoing,
            DirectionArg::Unknown => Direction::Unknown,
        }
    }
}

pub fn load_config(path: Option<&PathBuf>) -> Result<VaktpostConfig, CliError> {
    Ok(match path {
        Some(path) => VaktpostConfig::load_from_path(path)?,
        None => VaktpostConfig::load()?,
    })
}

pub async fn run_command(command: Commands, config: VaktpostConfig) -> Result<(), CliError> {
    match command {
        Commands::Reconcile(args) => {
            let report =
                runtime::run_reconciler(&config, args.once, args.dry_run, shutdown_signal()).await?;
            if let Some(report) = report {
                println!(
                    "generation {}: {} applied, {} removed, {} swept, {} skipped, {} errors",
                    report.generation.0,
                    report.applied,
                    report.removed,
                    report.swept,
                    report.skipped,
                    report.errors
                );
            }
        }
        Commands::Serve => runtime::run_verdict_service(&config, shutdown_signal()).await?,
        Commands::Capture(args) => {
            let mut config = config;
            if let Some(interface) = args.interface {
                config.capture.interface = interface;
            }
            if let Some(filter) = args.filter {
                config.capture.filter = filter;
            }
            let on_verdict = Arc::new(|verdict: Verdict| {
                let record = verdict.record();
                println!(
                    "{} {} {} -> {}:{} {}",
                    verdict.severity(),
                    record.direction,
                    record.source,
                    record.destination,
                    record.port,
                    record.protocol
                );
            });
            let captured = runtime::run_capture(&config, on_verdict, shutdown_signal()).await?;
            info!(captured, "Capture stopped");
        }
        Commands::Enforce(args) => {
            let report =
                runtime::enforce_policy(&config, args.policy, args.app_port, args.remove).await?;
            println!(
                "policy {}: {} added, {} removed, {} errors",
                args.policy, report.added, report.removed, report.errors
            );
        }
        Commands::Purge(args) => {
            let purged = runtime::purge(&config, args.dry_run).await?;
            for rule in &purged {
                println!("{}", rule.raw);
            }
            let verb = if args.dry_run { "would be removed" } else { "removed" };
            println!("{} managed rules {verb}", purged.len());
        }
        Commands::Logs(args) => {
            let entries = runtime::query_logs(&config, &log_query(&args)?).await?;
            for entry in entries {
                println!("{}", serde_json::to_string(&entry)?);
            }
        }
    }
    Ok(())
}

fn log_query(args: &LogsArgs) -> Result<LogQuery, CliError> {
    let mut query = LogQuery::new();
    if let Some(source) = &args.source {
        query = query.source(source);
    }
    if let Some(destination) = &args.destination {
        query = query.destination(destination);
    }
    if let Some(port) = &args.port {
        query = query.port(port);
    }
    if let Some(direction) = args.direction {
        query = query.direction(direction.into());
    }
    if let Some(since) = &args.since {
        query = query.since(parse_bound(since, false)?);
    }
    if let Some(until) = &args.until {
        query = query.until(parse_bound(until, true)?);
    }
    Ok(query)
}

/// A bare date covers the whole day: midnight for a lower bound, the last
/// representable instant for an upper one.
fn parse_bound(value: &str, upper: bool) -> Result<DateTime<Utc>, CliError> {
    if let Ok(time) = DateTime::parse_from_rfc3339(value) {
        return Ok(time.with_timezone(&Utc));
    }
    let invalid = || CliError::InvalidTime {
        value: value.to_string(),
    };
    let day = NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| invalid())?;
    let time = if upper {
        day.and_hms_nano_opt(23, 59, 59, 999_999_999)
    } else {
        day.and_hms_opt(0, 0, 0)
    };
    time.map(|t| t.and_utc()).ok_or_else(invalid)
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Interrupt received, shutting down");
    }
}
