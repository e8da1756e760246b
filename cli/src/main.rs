//! trailwatch: CloudTrail audit CLI
//!
//! Verifies the digest chain and log hashes of a CloudTrail trail over a
//! time window, then scans every verified log for security-relevant calls.
//!
//! The trail is read from a local directory holding `AWSLogs/`. A bucket
//! mirror directory stands in for the trail bucket: re-downloads and
//! detached digest signatures (`<key>.metadata.json` sidecars) come from it.
//!
//! Usage:
//!   trailwatch audit --start 2024-03-01 --end 2024-03-05 --source ./trail
//!   trailwatch audit --start 2024-03-01T06:00:00Z --end 2024-03-05 --mirror ./bucket --json
//!   trailwatch rules

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use trailwatch_audit::StaticTrailService;
use trailwatch_contracts::error::{TrailwatchError, TrailwatchResult};
use trailwatch_engine::layout::infer_account;
use trailwatch_engine::{AuditEngine, AuditOutcome, AuditReport, EngineConfig, FsObjectStore};
use trailwatch_policy::Rule;

// ── CLI definition ────────────────────────────────────────────────────────────

/// trailwatch: tamper-evidence and activity audit for CloudTrail.
#[derive(Parser)]
#[command(
    name = "trailwatch",
    about = "Audit CloudTrail logs and digests",
    long_about = "Walks each region's CloudTrail digest chain verifying RSA signatures\n\
                  and log hashes, then scans the verified logs against security rules."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Audit a time window.
    Audit(AuditArgs),
    /// List the security rules and whether the configuration enables them.
    Rules {
        /// Engine configuration (TOML).
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(clap::Args)]
struct AuditArgs {
    /// Window start: RFC 3339 timestamp or YYYY-MM-DD (midnight UTC).
    #[arg(long, value_parser = parse_time)]
    start: DateTime<Utc>,
    /// Window end: RFC 3339 timestamp or YYYY-MM-DD (midnight UTC).
    #[arg(long, value_parser = parse_time)]
    end: DateTime<Utc>,
    /// Audit this local trail copy instead of downloading the window.
    #[arg(long)]
    source: Option<PathBuf>,
    /// Bucket mirror directory. Defaults to --source.
    #[arg(long)]
    mirror: Option<PathBuf>,
    /// Bucket name recorded in the trail.
    #[arg(long, default_value = "cloudtrail-mirror")]
    bucket: String,
    /// Account id. Inferred from the trail layout when omitted.
    #[arg(long)]
    account: Option<String>,
    /// Engine configuration (TOML).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Print the report as JSON.
    #[arg(long)]
    json: bool,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> ExitCode {
    // Set RUST_LOG=debug for per-file output.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Command::Audit(args) => run_audit(args),
        Command::Rules { config } => run_rules(config.as_deref()),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("trailwatch error: {e}");
            ExitCode::from(2)
        }
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

fn load_config(path: Option<&Path>) -> TrailwatchResult<EngineConfig> {
    match path {
        Some(path) => EngineConfig::from_file(path),
        None => Ok(EngineConfig::default()),
    }
}

fn run_rules(config: Option<&Path>) -> TrailwatchResult<ExitCode> {
    let config = load_config(config)?;
    for rule in Rule::ALL {
        let state = if config.rules.is_enabled(rule) { "on " } else { "off" };
        println!("  [{state}] {:<14} {}", rule.id(), rule.description());
    }
    Ok(ExitCode::SUCCESS)
}

fn run_audit(args: AuditArgs) -> TrailwatchResult<ExitCode> {
    if args.end < args.start {
        return Err(TrailwatchError::Config {
            reason: "--end is before --start".to_string(),
        });
    }
    let mut config = load_config(args.config.as_deref())?;

    let Some(mirror) = args.mirror.clone().or_else(|| args.source.clone()) else {
        return Err(TrailwatchError::Config {
            reason: "one of --source or --mirror is required".to_string(),
        });
    };
    if args.account.is_some() {
        config.account_id = args.account.clone();
    }
    let account = config
        .account_id
        .clone()
        .or_else(|| infer_account(&mirror).ok());

    let trail = StaticTrailService {
        bucket: Some(args.bucket.clone()),
        account_id: account,
    };
    let engine = Arc::new(AuditEngine::new(
        config,
        Arc::new(FsObjectStore::new(&mirror)),
        Arc::new(trail),
    ));

    let runtime = tokio::runtime::Runtime::new().map_err(|e| TrailwatchError::Io {
        path: "<runtime>".to_string(),
        reason: e.to_string(),
    })?;

    let show_progress = !args.json;
    let observed = Arc::clone(&engine);
    let last_shown = AtomicU64::new(0);
    let on_progress = move || {
        if !show_progress {
            return;
        }
        let percent = observed.percent_complete() as u64;
        if last_shown.fetch_max(percent, Ordering::Relaxed) < percent {
            let task = observed.current_task_name().unwrap_or("Done");
            eprint!("\r{percent:>3}%  {task:<40}");
        }
    };

    let report = runtime.block_on(engine.begin_audit(
        args.start,
        args.end,
        args.source.as_deref(),
        on_progress,
        |outcome| info!(outcome = ?outcome, "audit ended"),
    ));
    if show_progress {
        eprintln!();
    }

    if args.json {
        let json = serde_json::to_string_pretty(&report).map_err(|e| TrailwatchError::Decode {
            reason: e.to_string(),
        })?;
        println!("{json}");
    } else {
        print_summary(&report);
    }

    Ok(exit_code(&report))
}

fn exit_code(report: &AuditReport) -> ExitCode {
    match &report.outcome {
        AuditOutcome::Failed { .. } => ExitCode::from(2),
        AuditOutcome::Completed if report.violations.is_empty() => ExitCode::SUCCESS,
        AuditOutcome::Completed => ExitCode::from(1),
    }
}

// ── Output ────────────────────────────────────────────────────────────────────

fn print_summary(report: &AuditReport) {
    println!();
    println!("trailwatch audit {}", report.run_id);
    println!("=================================================");

    if let AuditOutcome::Failed { reason } = &report.outcome {
        println!("Audit could not complete: {reason}");
        println!();
    }

    println!("  Digests processed : {}", report.digests_processed);
    println!("  Logs processed    : {}", report.logs_processed);
    println!("  Violations        : {}", report.violations.len());
    let days = report.staleness_days();
    if days > 0 {
        println!("  Oldest root digest: more than {days} days ago");
    }
    println!();

    if !report.deployments.is_empty() {
        println!("Latest deployments:");
        for (application, url) in &report.deployments {
            println!("  {application:<20} {url}");
        }
        println!();
    }

    if report.violations.is_empty() {
        if report.outcome == AuditOutcome::Completed {
            println!("No violations found. The trail is intact for this window.");
        }
        return;
    }

    println!("Violations:");
    for v in &report.violations {
        println!(
            "  {:<36} {:<22} {:<16} {}",
            v.kind.name(),
            v.event_time.as_deref().unwrap_or("-"),
            v.aws_region.as_deref().unwrap_or("-"),
            v.file_path.as_deref().unwrap_or("-"),
        );
        if let Some(name) = &v.event_name {
            println!("      event {name} from {}", v.source_ip.as_deref().unwrap_or("-"));
        }
    }
}

// ── Argument parsing ──────────────────────────────────────────────────────────

fn parse_time(raw: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Ok(t.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| format!("'{raw}' is neither RFC 3339 nor YYYY-MM-DD"))
}
