use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use thaw_cluster::ClusterClient;
use thaw_cluster_es::{EsClusterClient, EsEndpoint};
use thaw_core::{
    parse_reference_date, CampaignOutcome, Clock, HistoryEntry, PlanRequest, RestoreLock, RestorePlan, SnapshotRecord,
    SystemClock, ThawError,
};
use thaw_hitl::{Confirmer, Decision, StdinConfirmer};
use thaw_storage::Storage;
use thaw_storage_sqlite::SqliteStorage;
use tracing::info;

use crate::admission::{Admission, AdmissionController};
use crate::comparator::{sync_catalog, SyncReport};
use crate::config::{ClusterConfig, Config, PASSWORD_ENV};
use crate::doctor::doctor;
use crate::executor::BatchExecutor;
use crate::history::HistoryLog;
use crate::planner::{plan_from_catalog, Planned};
use crate::retention::{CompiledPolicies, RetentionManager, RetentionReport};
use crate::util::{current_actor, format_unix};

const SECS_PER_DAY: i64 = 86_400;

/// One `restore` invocation. Overrides apply to this campaign only.
#[derive(Clone, Debug, Default)]
pub struct RestoreRequest {
    pub pattern: String,
    /// Reference date, `YYYY.MM.DD`.
    pub date: String,
    pub dry_run: bool,
    pub batch_size: Option<usize>,
    pub max_shards_per_node: Option<u64>,
}

#[derive(Clone, Debug)]
pub struct StatusReport {
    pub lock: RestoreLock,
    pub stale: bool,
    pub latest_plan: Option<RestorePlan>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClearOutcome {
    AlreadyFree,
    /// The lock as it was before the reset.
    Reset(RestoreLock),
    Refused,
}

pub struct Runner {
    pub root: PathBuf,
    pub cfg: Config,
    /// The cluster this invocation works against.
    pub target: ClusterConfig,
    pub store: Arc<dyn Storage>,
    pub cluster: Arc<dyn ClusterClient>,
    pub confirmer: Arc<dyn Confirmer>,
    pub clock: Arc<dyn Clock>,
    pub actor: String,
    cancel: Arc<AtomicBool>,
}

impl Runner {
    /// Open against `root/.thaw/thaw.toml`, writing a default config if there is none.
    pub fn open(root: PathBuf, cluster: Option<&str>) -> Result<Self> {
        let cfg_path = Config::config_path(&root);
        let cfg = if cfg_path.exists() {
            Config::load_from(&cfg_path)?
        } else {
            let cfg = Config::default_for_dir(&root);
            cfg.save_to(&cfg_path)?;
            cfg
        };

        let target = cfg.cluster(cluster)?.clone().with_password_override(std::env::var(PASSWORD_ENV).ok());
        let store = SqliteStorage::open(&cfg.db_path(&root))?;
        let client = EsClusterClient::new(EsEndpoint {
            name: target.name.clone(),
            url: target.url.clone(),
            username: target.username.clone(),
            password: target.password.clone(),
            request_timeout: Duration::from_secs(target.request_timeout_secs),
        })?;

        Ok(Self::with_parts(
            root,
            cfg,
            target,
            Arc::new(store),
            Arc::new(client),
            Arc::new(StdinConfirmer),
            Arc::new(SystemClock),
            current_actor(),
        ))
    }

    /// Assemble from explicit parts; `target` must be one of `cfg.clusters`.
    #[allow(clippy::too_many_arguments)]
    pub fn with_parts(
        root: PathBuf,
        cfg: Config,
        target: ClusterConfig,
        store: Arc<dyn Storage>,
        cluster: Arc<dyn ClusterClient>,
        confirmer: Arc<dyn Confirmer>,
        clock: Arc<dyn Clock>,
        actor: impl Into<String>,
    ) -> Self {
        Self {
            root,
            cfg,
            target,
            store,
            cluster,
            confirmer,
            clock,
            actor: actor.into(),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn init(root: &Path) -> Result<PathBuf> {
        let cfg_path = Config::config_path(root);
        let cfg = if cfg_path.exists() {
            Config::load_from(&cfg_path)?
        } else {
            let cfg = Config::default_for_dir(root);
            cfg.save_to(&cfg_path)?;
            cfg
        };
        // opening runs the migrations, so a fresh root gets its schema here
        SqliteStorage::open(&cfg.db_path(root))?;
        Ok(cfg_path)
    }

    pub fn history(&self) -> HistoryLog {
        HistoryLog::new(self.store.clone(), self.clock.clone(), self.actor.clone())
    }

    /// Setting this stops the running campaign before its next batch.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn doctor(&self) -> Result<Vec<String>> {
        doctor(self.store.as_ref(), self.cluster.as_ref(), &self.target.repository, self.clock.now_unix())
    }

    /// Plan, admit, confirm and execute one campaign.
    pub fn restore(&self, req: &RestoreRequest) -> Result<CampaignOutcome> {
        let reference_date = parse_reference_date(&req.date)?;
        let mut restore_cfg = self.cfg.restore.clone();
        if let Some(n) = req.batch_size {
            if n == 0 {
                bail!("batch size must be at least 1");
            }
            restore_cfg.batch_size = n;
        }
        let needed = restore_cfg.worst_case_batch_secs();
        if restore_cfg.lock_lease_secs < needed {
            bail!(
                "batch size {} needs a lock lease of at least {}s, configured {}s",
                restore_cfg.batch_size,
                needed,
                restore_cfg.lock_lease_secs
            );
        }
        let mut limits = self.cfg.admission.limits();
        if let Some(max) = req.max_shards_per_node {
            limits.max_shards_per_node = max;
        }

        let version = self
            .cluster
            .ping()
            .map_err(|e| anyhow!("cluster '{}' is unreachable: {}", self.target.name, e))?;
        info!(cluster = %self.target.name, version = %version, pattern = %req.pattern, date = %req.date, "restore requested");

        let history = self.history();
        let plan_req = PlanRequest {
            repository: self.target.repository.clone(),
            pattern: req.pattern.clone(),
            reference_date,
            requested_by: self.actor.clone(),
            tie_break: restore_cfg.tie_break,
        };
        let mut plan = match plan_from_catalog(self.store.as_ref(), &plan_req, self.clock.now_unix())? {
            Planned::Plan(plan) => plan,
            Planned::NoMatch { pattern, date } => {
                history.info(&format!("No snapshots match pattern '{}' near {}", pattern, date))?;
                return Ok(CampaignOutcome::NoMatch { pattern, date });
            }
        };
        if !plan.has_work() {
            history.info(&format!(
                "Nothing to restore for pattern '{}' near {}: {} unit(s) already restored",
                plan.pattern,
                req.date,
                plan.tasks.len()
            ))?;
            return Ok(CampaignOutcome::NothingToRestore { plan });
        }

        let controller = AdmissionController {
            store: self.store.clone(),
            cluster: self.cluster.clone(),
            confirmer: self.confirmer.clone(),
            clock: self.clock.clone(),
            history: history.clone(),
            limits,
            lease_secs: restore_cfg.lock_lease_secs as i64,
            confirm_timeout: Duration::from_secs(restore_cfg.confirm_timeout_secs),
            cancel: self.cancel.clone(),
        };
        let admitted = match controller.admit(&plan, req.dry_run)? {
            Admission::Done(outcome) => return Ok(outcome),
            Admission::Admitted(admitted) => admitted,
        };

        self.store.save_plan(&plan).context("persist confirmed plan")?;
        let executor = BatchExecutor {
            store: self.store.clone(),
            cluster: self.cluster.clone(),
            clock: self.clock.clone(),
            history,
            policy: restore_cfg.retry_policy(),
            batch_size: restore_cfg.batch_size,
            restore_timeout: Duration::from_secs(restore_cfg.restore_timeout_secs),
            cancel: self.cancel.clone(),
        };
        let summary = executor.execute(&mut plan, &admitted.guard)?;
        admitted.guard.release()?;
        Ok(CampaignOutcome::Completed { plan, summary })
    }

    /// Catalog records of the selected repository, optionally filtered by a regex on the unit name.
    pub fn list(&self, pattern: Option<&str>) -> Result<Vec<SnapshotRecord>> {
        let re = compile_filter(pattern)?;
        Ok(self
            .store
            .list_snapshots(Some(&self.target.repository))?
            .into_iter()
            .filter(|r| re.as_ref().map(|re| re.is_match(&r.source_pattern)).unwrap_or(true))
            .collect())
    }

    pub fn list_restored(&self) -> Result<Vec<SnapshotRecord>> {
        Ok(self.store.list_snapshots(Some(&self.target.repository))?.into_iter().filter(|r| r.restored).collect())
    }

    pub fn status(&self) -> Result<StatusReport> {
        let lock = self.store.load_lock()?;
        let stale = lock.is_stale(self.clock.now_unix());
        Ok(StatusReport { lock, stale, latest_plan: self.store.latest_plan()? })
    }

    pub fn list_history(&self, limit: usize, search: Option<&str>) -> Result<Vec<HistoryEntry>> {
        self.store.list_history(limit, search)
    }

    /// Force the restore lock back to `Free`, whoever holds it.
    pub fn clear_staged(&self, assume_yes: bool) -> Result<ClearOutcome> {
        let lock = self.store.load_lock()?;
        if lock.is_free() {
            return Ok(ClearOutcome::AlreadyFree);
        }
        let history = self.history();
        if !assume_yes {
            let since = lock.acquired_at_unix.map(format_unix).unwrap_or_default();
            let prompt = format!(
                "Restore lock is {:?}, held by {} since {}. Force it back to Free?",
                lock.state,
                lock.holder(),
                since
            );
            let timeout = Duration::from_secs(self.cfg.restore.confirm_timeout_secs);
            if self.confirmer.confirm(&prompt, timeout, &self.cancel) != Decision::Accepted {
                history.info(&format!("Force reset of restore lock held by {} was refused", lock.holder()))?;
                return Ok(ClearOutcome::Refused);
            }
        }

        let previous = self.store.force_reset_lock()?;
        let campaign = previous.campaign.as_ref().map(|c| c.to_string()).unwrap_or_else(|| "-".to_string());
        history.error(&format!(
            "Force reset of restore lock: was {:?}, held by {}, campaign {}",
            previous.state,
            previous.holder(),
            campaign
        ))?;
        Ok(ClearOutcome::Reset(previous))
    }

    pub fn sync_catalog(&self, pattern: Option<&str>) -> Result<SyncReport> {
        let re = compile_filter(pattern)?;
        sync_catalog(self.store.as_ref(), self.cluster.as_ref(), &self.history(), &self.target.repository, re.as_ref())
    }

    pub fn retention(&self, dry_run: bool, pattern: Option<&str>) -> Result<RetentionReport> {
        let re = compile_filter(pattern)?;
        let policies = CompiledPolicies::new(&self.cfg.retention)?;
        let history = self.history();
        let manager = RetentionManager {
            store: self.store.as_ref(),
            cluster: self.cluster.as_ref(),
            history: &history,
            policies: &policies,
        };
        manager.run(&self.target.repository, re.as_ref(), self.today(), dry_run)
    }

    /// Delete history older than `before_days`. `None` means the operator said no.
    pub fn purge_history(&self, before_days: u32, assume_yes: bool) -> Result<Option<usize>> {
        if !assume_yes {
            let prompt = format!("Delete history entries older than {} day(s)?", before_days);
            let timeout = Duration::from_secs(self.cfg.restore.confirm_timeout_secs);
            if self.confirmer.confirm(&prompt, timeout, &self.cancel) != Decision::Accepted {
                return Ok(None);
            }
        }
        let cutoff = self.clock.now_unix() - i64::from(before_days) * SECS_PER_DAY;
        let purged = self.store.purge_history(cutoff)?;
        self.history().info(&format!("Purged {} history entries older than {} day(s)", purged, before_days))?;
        Ok(Some(purged))
    }

    fn today(&self) -> NaiveDate {
        DateTime::<Utc>::from_timestamp(self.clock.now_unix(), 0)
            .map(|dt| dt.date_naive())
            .unwrap_or_default()
    }
}

fn compile_filter(pattern: Option<&str>) -> Result<Option<Regex>> {
    pattern
        .map(|p| {
            Regex::new(p).map_err(|e| {
                anyhow::Error::from(ThawError::InvalidPattern { pattern: p.to_string(), reason: e.to_string() })
            })
        })
        .transpose()
}
