use std::process::ExitCode;
use std::sync::atomic::Ordering;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use thaw_core::{format_bytes, snapshot_name_for, CampaignOutcome, RestorePlan, SnapshotRecord, ThawError};
use thaw_hitl::{format_plan, CANCELLED_MESSAGE};
use thaw_runner::{format_unix, ClearOutcome, RestoreRequest, Runner};

/// Rejections (lock held, stale lock, failed gate) exit with this code.
const EXIT_REJECTED: u8 = 2;
const EXIT_ERROR: u8 = 1;
/// A second Ctrl-C gives up on a clean stop.
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Parser)]
#[command(name = "thaw", version, about = "Restore cold-tier units from cluster snapshots")]
struct Cli {
    /// Cluster from the config to work against (default: `default_cluster`)
    #[arg(long, global = true)]
    cluster: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create .thaw/ with a default config and an empty database
    Init,

    /// Check cluster connectivity and store access
    Doctor,

    /// Print the effective configuration, passwords redacted
    ShowConfig,

    /// Plan, confirm and run a restore campaign
    Restore {
        /// Regex matched against unit names
        #[arg(long)]
        pattern: String,
        /// Reference date, YYYY.MM.DD
        #[arg(long)]
        date: String,
        /// Run the admission gates and print the plan; change nothing
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        batch_size: Option<usize>,
        #[arg(long)]
        max_shards_per_node: Option<u64>,
    },

    /// List catalog snapshots, optionally filtered by a regex
    List { pattern: Option<String> },

    /// List snapshots already restored
    ListRestored,

    /// Show the restore lock and the latest campaign
    ListStatus,

    /// Show the newest history entries, oldest first
    ListHistory {
        #[arg(long, default_value_t = 50)]
        limit: usize,
        #[arg(long)]
        search: Option<String>,
    },

    /// Force the restore lock back to Free
    ClearStaged {
        #[arg(long)]
        yes: bool,
    },

    /// Add new repository snapshots to the catalog and report cold units without one
    SyncCatalog {
        /// Regex narrowing the cold-unit report
        #[arg(long)]
        pattern: Option<String>,
    },

    /// Delete snapshots older than their retention policy allows
    Retention {
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        pattern: Option<String>,
    },

    /// Delete history entries older than N days
    PurgeHistory {
        #[arg(long)]
        before_days: u32,
        #[arg(long)]
        yes: bool,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let root = std::env::current_dir()?;
    let cluster = cli.cluster.as_deref();

    match cli.cmd {
        Command::Init => {
            let path = Runner::init(&root)?;
            println!("Initialized thaw in {} (config: {})", root.display(), path.display());
        }
        Command::Doctor => {
            let r = Runner::open(root, cluster)?;
            for line in r.doctor()? {
                println!("{}", line);
            }
            println!("OK");
        }
        Command::ShowConfig => {
            let r = Runner::open(root, cluster)?;
            print!("{}", r.cfg.redacted().to_toml()?);
            println!("# selected cluster: {}", r.target.name);
        }
        Command::Restore { pattern, date, dry_run, batch_size, max_shards_per_node } => {
            let r = Runner::open(root, cluster)?;
            // first Ctrl-C declines the prompt or stops after the running batch
            let cancel = r.cancel_flag();
            ctrlc::set_handler(move || {
                if cancel.swap(true, Ordering::SeqCst) {
                    std::process::exit(EXIT_INTERRUPTED);
                }
                eprintln!("\nInterrupted: cancelling; press Ctrl-C again to abort immediately");
            })?;
            let req = RestoreRequest { pattern, date, dry_run, batch_size, max_shards_per_node };
            return Ok(report_campaign(&r.restore(&req)?));
        }
        Command::List { pattern } => {
            let r = Runner::open(root, cluster)?;
            print_records(&r.list(pattern.as_deref())?);
        }
        Command::ListRestored => {
            let r = Runner::open(root, cluster)?;
            print_records(&r.list_restored()?);
        }
        Command::ListStatus => {
            let r = Runner::open(root, cluster)?;
            let status = r.status()?;
            let lock = &status.lock;
            if lock.is_free() {
                println!("Restore lock: Free");
            } else {
                println!(
                    "Restore lock: {:?} held by {} since {} (lease until {}){}",
                    lock.state,
                    lock.holder(),
                    lock.acquired_at_unix.map(format_unix).unwrap_or_default(),
                    lock.expires_at_unix.map(format_unix).unwrap_or_default(),
                    if status.stale { " STALE" } else { "" }
                );
                if let Some(summary) = &lock.plan_summary {
                    println!("  {}", summary);
                }
            }
            match &status.latest_plan {
                Some(plan) => print_plan_status(plan),
                None => println!("No campaigns yet"),
            }
        }
        Command::ListHistory { limit, search } => {
            let r = Runner::open(root, cluster)?;
            for e in r.list_history(limit, search.as_deref())? {
                println!("{}  {:<5}  {}  {}", format_unix(e.timestamp_unix), format!("{:?}", e.level), e.actor, e.message);
            }
        }
        Command::ClearStaged { yes } => {
            let r = Runner::open(root, cluster)?;
            match r.clear_staged(yes)? {
                ClearOutcome::AlreadyFree => println!("Restore lock is already Free"),
                ClearOutcome::Reset(prev) => {
                    println!("Restore lock reset to Free (was {:?}, held by {})", prev.state, prev.holder())
                }
                ClearOutcome::Refused => {
                    eprintln!("Force reset refused; lock left as it was");
                    return Ok(ExitCode::from(EXIT_ERROR));
                }
            }
        }
        Command::SyncCatalog { pattern } => {
            let r = Runner::open(root, cluster)?;
            let report = r.sync_catalog(pattern.as_deref())?;
            println!(
                "Repository {} lists {} snapshot(s); {} new in the catalog",
                r.target.repository, report.listed, report.added
            );
            if report.missing_snapshots.is_empty() {
                println!("Every cold unit has a snapshot");
            } else {
                println!("Cold units without a snapshot:");
                for unit in &report.missing_snapshots {
                    println!("- {} (expected {})", unit, snapshot_name_for(unit));
                }
            }
        }
        Command::Retention { dry_run, pattern } => {
            let r = Runner::open(root, cluster)?;
            let report = r.retention(dry_run, pattern.as_deref())?;
            let verb = if report.dry_run { "Would delete" } else { "Deleted" };
            println!("Examined {} snapshot(s)", report.examined);
            for id in &report.expired {
                println!("{} {}", verb, id);
            }
            for id in &report.already_gone {
                println!("Dropped catalog entry {} (already gone from the repository)", id);
            }
            for id in &report.deferred {
                println!("Deferred {} (restore in progress)", id);
            }
            for (id, err) in &report.failed {
                eprintln!("Failed to delete {}: {}", id, err);
            }
        }
        Command::PurgeHistory { before_days, yes } => {
            let r = Runner::open(root, cluster)?;
            match r.purge_history(before_days, yes)? {
                Some(n) => println!("Purged {} history entries older than {} day(s)", n, before_days),
                None => {
                    eprintln!("Purge refused");
                    return Ok(ExitCode::from(EXIT_ERROR));
                }
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn report_campaign(outcome: &CampaignOutcome) -> ExitCode {
    match outcome {
        CampaignOutcome::NoMatch { pattern, date } => {
            println!("No snapshots match '{}' near {}; nothing to do", pattern, date);
        }
        CampaignOutcome::NothingToRestore { plan } => {
            println!("Nothing to restore: all {} matching unit(s) are already restored", plan.tasks.len());
        }
        CampaignOutcome::Rejected { reason, .. } => {
            eprintln!("Restore rejected: {}", reason);
            if let ThawError::LockHeld { summary: Some(summary), .. } = reason {
                eprintln!("  running: {}", summary);
            }
            return ExitCode::from(EXIT_REJECTED);
        }
        CampaignOutcome::DryRun { plan, cluster, checks } => {
            print!("{}", format_plan(plan, Some(cluster), checks));
            println!("\nDry run: all gates pass, nothing was restored");
        }
        CampaignOutcome::Declined { .. } | CampaignOutcome::TimedOut { .. } => {
            println!("{}", CANCELLED_MESSAGE);
        }
        CampaignOutcome::Completed { plan, summary } => {
            print_plan_status(plan);
            println!("{}", summary);
        }
    }
    ExitCode::SUCCESS
}

fn print_records(records: &[SnapshotRecord]) {
    for r in records {
        println!(
            "{:<72} {:>10} {:>4} {}",
            r.source_pattern,
            format_bytes(r.size_bytes),
            r.shard_count,
            if r.restored { "restored" } else { "" }
        );
    }
    println!("{} snapshot(s)", records.len());
}

fn print_plan_status(plan: &RestorePlan) {
    println!(
        "Campaign {} '{}' near {} by {} ({})",
        plan.id,
        plan.pattern,
        plan.reference_date.format(thaw_core::DATE_FORMAT),
        plan.requested_by,
        format_unix(plan.created_at_unix)
    );
    for t in &plan.tasks {
        let err = t.last_error.as_deref().map(|e| format!("  {}", e)).unwrap_or_default();
        println!("  {:<11} {:<72} attempts={}{}", format!("{:?}", t.status), t.target_unit, t.attempts, err);
    }
}
