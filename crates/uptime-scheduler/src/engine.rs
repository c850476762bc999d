use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uptime_core::{config::SchedulerConfig, HealthResult, HealthStatus, ServiceTarget};
use uptime_probe::HealthCheck;
use uptime_store::{CoordinationStore, HistoryStore};
use uuid::Uuid;

use crate::{
    cycle::CycleStateStore,
    error::{Result, SchedulerError},
    handler::CronHandlers,
    keys,
    lock::LockManager,
    registry::JobRegistry,
    schedule::next_due,
    stats::SchedulerStats,
    trigger::SelfTrigger,
    types::{
        CancellationMarker, Cycle, CycleStatus, Job, JobAction, JobKind, JobRun, JobUpdate,
        RunOutcome, RunResult,
    },
};

/// Why the orchestrator is being invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invocation {
    /// Starts a new chain at the current cancellation epoch.
    Fresh,
    /// Fired by a self-trigger armed by a cycle of the chain at `epoch`.
    Continuation { epoch: u64 },
}

/// Where one invocation is in its lifecycle. Only used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CyclePhase {
    Idle,
    LockPending,
    Running,
    Rearming,
    Skipped,
    Superseded,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub jobs_run: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
}

impl CycleReport {
    fn count(&mut self, outcome: RunOutcome) {
        self.jobs_run += 1;
        match outcome {
            RunOutcome::Succeeded => self.succeeded += 1,
            RunOutcome::Failed => self.failed += 1,
            RunOutcome::TimedOut => self.timed_out += 1,
        }
    }
}

/// What one invocation ended up doing.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CycleOutcome {
    /// Ran due jobs and armed the next invocation for `next_run`.
    Completed {
        cycle: Cycle,
        report: CycleReport,
        next_run: Option<DateTime<Utc>>,
    },
    /// A cancellation landed; due work ran but nothing was rearmed.
    Superseded { cycle: Cycle, report: CycleReport },
    /// Another cycle held the lock.
    Skipped,
}

/// Admin-facing view of the orchestrator.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub last_cancel_timestamp: Option<DateTime<Utc>>,
    pub cancel_epoch: u64,
    pub active_cycles: i64,
    pub last_ping_timestamp: Option<DateTime<Utc>>,
    pub last_cycle_id: Option<String>,
    pub last_cycle_time: Option<DateTime<Utc>>,
    pub current_cycle: Option<Cycle>,
    pub next_trigger_at: Option<DateTime<Utc>>,
}

/// A finished job: the run state to record and, for service checks, the
/// history entry to append.
struct Finished {
    job: Job,
    run: JobRun,
    health: Option<HealthResult>,
}

/// Everything a job task needs, detached from the engine so it can be moved
/// into a `JoinSet`.
struct Execution {
    probe: Arc<dyn HealthCheck>,
    handlers: CronHandlers,
    timeout: std::time::Duration,
}

struct Executed {
    outcome: RunOutcome,
    status: Option<HealthStatus>,
    error: Option<String>,
    health: Option<HealthResult>,
}

impl Execution {
    async fn run(&self, job: &Job) -> Executed {
        match &job.def.kind {
            JobKind::ServiceCheck { service } => self.check(service).await,
            JobKind::Cron { handler } => self.cron(job, handler).await,
        }
    }

    async fn check(&self, service: &ServiceTarget) -> Executed {
        let attempt = AssertUnwindSafe(self.probe.check(service)).catch_unwind();
        let result = match tokio::time::timeout(self.timeout, attempt).await {
            Ok(Ok(Ok(result))) => result,
            Ok(Ok(Err(e))) => HealthResult::down(&service.name, e.to_string()),
            Ok(Err(_)) => HealthResult::down(&service.name, "health check panicked"),
            Err(_) => {
                let msg = format!("timed out after {} ms", self.timeout.as_millis());
                return Executed {
                    outcome: RunOutcome::TimedOut,
                    status: Some(HealthStatus::Down),
                    error: Some(msg.clone()),
                    health: Some(HealthResult::down(&service.name, msg)),
                };
            }
        };
        let outcome = if result.status == HealthStatus::Up {
            RunOutcome::Succeeded
        } else {
            RunOutcome::Failed
        };
        Executed {
            outcome,
            status: Some(result.status),
            error: result.error.clone(),
            health: Some(result),
        }
    }

    async fn cron(&self, job: &Job, handler: &str) -> Executed {
        let failed = |error: String| Executed {
            outcome: RunOutcome::Failed,
            status: None,
            error: Some(error),
            health: None,
        };
        let Some(task) = self.handlers.get(handler) else {
            return failed(format!("no handler registered as '{handler}'"));
        };
        let attempt = AssertUnwindSafe(task.run(job)).catch_unwind();
        match tokio::time::timeout(self.timeout, attempt).await {
            Ok(Ok(Ok(()))) => Executed {
                outcome: RunOutcome::Succeeded,
                status: None,
                error: None,
                health: None,
            },
            Ok(Ok(Err(e))) => failed(e),
            Ok(Err(_)) => failed("handler panicked".to_string()),
            Err(_) => Executed {
                outcome: RunOutcome::TimedOut,
                status: None,
                error: Some(format!("timed out after {} ms", self.timeout.as_millis())),
                health: None,
            },
        }
    }
}

/// Runs ping cycles: one locked pass over the due jobs per invocation,
/// followed by arming the next invocation.
pub struct SchedulerEngine {
    registry: JobRegistry,
    cycles: CycleStateStore,
    locks: LockManager,
    stats: SchedulerStats,
    history: Arc<dyn HistoryStore>,
    probe: Arc<dyn HealthCheck>,
    trigger: Arc<dyn SelfTrigger>,
    handlers: CronHandlers,
    config: SchedulerConfig,
    /// Highest cancellation epoch this process has read.
    observed_epoch: AtomicU64,
}

impl SchedulerEngine {
    /// Build an engine over `store`. Fails if the timing config would let a
    /// cycle outlive its lock.
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        history: Arc<dyn HistoryStore>,
        probe: Arc<dyn HealthCheck>,
        trigger: Arc<dyn SelfTrigger>,
        config: SchedulerConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            registry: JobRegistry::new(store.clone()),
            cycles: CycleStateStore::new(store.clone()),
            locks: LockManager::new(store.clone()),
            stats: SchedulerStats::new(store),
            history,
            probe,
            trigger,
            handlers: CronHandlers::new(),
            config,
            observed_epoch: AtomicU64::new(0),
        })
    }

    pub fn with_cron_handlers(mut self, handlers: CronHandlers) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn history(&self) -> &Arc<dyn HistoryStore> {
        &self.history
    }

    /// Handle one inbound trigger.
    ///
    /// Returns `Err` only when the coordination store fails before or while
    /// the cycle runs. The lock is released on every path that acquired it.
    pub async fn trigger(&self, invocation: Invocation) -> Result<CycleOutcome> {
        let mut phase = CyclePhase::Idle;
        self.stats.record_ping().await;

        let chain_epoch = match invocation {
            Invocation::Fresh => None,
            Invocation::Continuation { epoch } => Some(epoch),
        };
        let epoch = match self.cycles.current_epoch().await {
            Ok(epoch) => {
                self.observed_epoch.fetch_max(epoch, Ordering::Relaxed);
                epoch
            }
            Err(e) => {
                error!(?invocation, "cancellation epoch unreadable, not running: {e}");
                if let Some(chain) = chain_epoch {
                    // The counter is at least what was last observed here.
                    let observed = self.observed_epoch.load(Ordering::Relaxed);
                    self.retry_later(chain.min(observed)).await;
                }
                return Err(e.into());
            }
        };
        if let Some(chain) = chain_epoch.filter(|&c| c > epoch) {
            warn!(chain, epoch, "continuation carries a future epoch, clamping");
        }
        let chain_epoch = chain_epoch.map(|c| c.min(epoch));

        let owner = Uuid::new_v4().to_string();
        enter(&mut phase, CyclePhase::LockPending, &owner);
        if !self
            .locks
            .try_acquire(keys::LOCK_KEY, &owner, self.config.lock_ttl())
            .await
        {
            enter(&mut phase, CyclePhase::Skipped, &owner);
            info!(?invocation, "another cycle is active, skipping");
            enter(&mut phase, CyclePhase::Idle, &owner);
            return Ok(CycleOutcome::Skipped);
        }

        let result = self.run_locked(&owner, chain_epoch, &mut phase).await;
        if let Err(e) = &result {
            error!(cycle_id = %owner, "cycle failed: {e}");
            self.retry_later(chain_epoch.unwrap_or(epoch)).await;
        }
        self.locks.release(keys::LOCK_KEY, &owner).await;
        enter(&mut phase, CyclePhase::Idle, &owner);
        result
    }

    async fn run_locked(
        &self,
        owner: &str,
        chain_epoch: Option<u64>,
        phase: &mut CyclePhase,
    ) -> Result<CycleOutcome> {
        let cycle = self.cycles.begin_cycle(owner, chain_epoch).await?;
        enter(phase, CyclePhase::Running, owner);
        self.stats.cycle_started(&cycle).await;
        let result = self.run_cycle(cycle, phase).await;
        self.stats.cycle_finished().await;
        result
    }

    async fn run_cycle(&self, mut cycle: Cycle, phase: &mut CyclePhase) -> Result<CycleOutcome> {
        let superseded_early = self.superseded(&cycle).await;

        // Snapshot: jobs created from here on wait for the next cycle.
        let jobs = self.registry.list().await?;
        let now = Utc::now();
        let due: Vec<Job> = jobs
            .iter()
            .filter(|j| j.def.enabled && is_due(j, now))
            .cloned()
            .collect();
        info!(
            cycle_id = %cycle.cycle_id,
            epoch = cycle.epoch,
            chain_epoch = cycle.chain_epoch,
            jobs = jobs.len(),
            due = due.len(),
            "cycle running"
        );

        let finished = self.run_due_jobs(&cycle, due).await;
        let report = self.record(&finished).await;

        if superseded_early || self.superseded(&cycle).await {
            return Ok(self.supersede(cycle, report, phase).await);
        }

        enter(phase, CyclePhase::Rearming, &cycle.cycle_id);
        let last_runs: HashMap<&str, DateTime<Utc>> = finished
            .iter()
            .map(|f| (f.job.id(), f.run.last_run_at))
            .collect();
        let next = self.next_run(&jobs, &last_runs, Utc::now());
        let next_run = match self.trigger.arm(next, cycle.chain_epoch).await {
            Ok(()) => Some(next),
            Err(e) => {
                warn!(cycle_id = %cycle.cycle_id, "self-trigger not armed: {e}");
                None
            }
        };

        // A cancel may have landed between the check and the arm.
        if self.superseded(&cycle).await {
            return Ok(self.supersede(cycle, report, phase).await);
        }

        cycle.status = CycleStatus::Completed;
        if let Err(e) = self.cycles.record_outcome(&cycle).await {
            warn!(cycle_id = %cycle.cycle_id, "cycle outcome not recorded: {e}");
        }
        info!(
            cycle_id = %cycle.cycle_id,
            run = report.jobs_run,
            failed = report.failed,
            timed_out = report.timed_out,
            next_run = ?next_run,
            "cycle completed"
        );
        Ok(CycleOutcome::Completed {
            cycle,
            report,
            next_run,
        })
    }

    async fn supersede(
        &self,
        mut cycle: Cycle,
        report: CycleReport,
        phase: &mut CyclePhase,
    ) -> CycleOutcome {
        enter(phase, CyclePhase::Superseded, &cycle.cycle_id);
        cycle.status = CycleStatus::Superseded;
        if let Err(e) = self.cycles.record_outcome(&cycle).await {
            warn!(cycle_id = %cycle.cycle_id, "cycle outcome not recorded: {e}");
        }
        match self.cycles.current_epoch().await {
            Ok(current) => {
                if let Err(e) = self.trigger.disarm_stale(current).await {
                    warn!(cycle_id = %cycle.cycle_id, "stale trigger not disarmed: {e}");
                }
            }
            Err(e) => warn!(cycle_id = %cycle.cycle_id, "epoch unreadable, trigger left armed: {e}"),
        }
        info!(cycle_id = %cycle.cycle_id, chain_epoch = cycle.chain_epoch, "cycle superseded, not rearming");
        CycleOutcome::Superseded { cycle, report }
    }

    /// Run every due job in parallel under the per-job timeout, cutting off
    /// whatever is still running at the cycle deadline.
    async fn run_due_jobs(&self, cycle: &Cycle, due: Vec<Job>) -> Vec<Finished> {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.config.cycle_deadline();
        let exec = Arc::new(Execution {
            probe: self.probe.clone(),
            handlers: self.handlers.clone(),
            timeout: self.config.job_timeout(),
        });

        let mut pending: HashMap<String, Job> = HashMap::new();
        let mut set = JoinSet::new();
        for job in due {
            let exec = exec.clone();
            let task_job = job.clone();
            set.spawn(async move {
                let t0 = Instant::now();
                let executed = exec.run(&task_job).await;
                (task_job.def.id, executed, t0.elapsed().as_millis() as u64)
            });
            pending.insert(job.def.id.clone(), job);
        }

        let mut finished = Vec::new();
        let mut deadline_hit = false;
        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                joined = set.join_next() => match joined {
                    Some(Ok((id, executed, duration_ms))) => {
                        if let Some(job) = pending.remove(&id) {
                            finished.push(self.finish(cycle, job, executed, duration_ms));
                        }
                    }
                    Some(Err(e)) => warn!(cycle_id = %cycle.cycle_id, "job task lost: {e}"),
                    None => break,
                },
                _ = &mut sleep => {
                    deadline_hit = true;
                    set.abort_all();
                    warn!(
                        cycle_id = %cycle.cycle_id,
                        outstanding = pending.len(),
                        "cycle deadline reached"
                    );
                    break;
                }
            }
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        for (_, job) in pending {
            let (outcome, msg) = if deadline_hit {
                (RunOutcome::TimedOut, "cycle deadline exceeded")
            } else {
                (RunOutcome::Failed, "job task aborted")
            };
            let health = match &job.def.kind {
                JobKind::ServiceCheck { service } => {
                    Some(HealthResult::down(&service.name, msg))
                }
                JobKind::Cron { .. } => None,
            };
            let executed = Executed {
                outcome,
                status: health.as_ref().map(|h| h.status),
                error: Some(msg.to_string()),
                health,
            };
            finished.push(self.finish(cycle, job, executed, elapsed_ms));
        }
        finished
    }

    fn finish(&self, cycle: &Cycle, job: Job, executed: Executed, duration_ms: u64) -> Finished {
        let health = executed
            .health
            .map(|h| h.attributed(&cycle.cycle_id, job.id()));
        let run = JobRun {
            last_run_at: Utc::now(),
            last_result: RunResult {
                outcome: executed.outcome,
                status: executed.status,
                error: executed.error,
                duration_ms,
                cycle_id: cycle.cycle_id.clone(),
            },
        };
        Finished { job, run, health }
    }

    /// Persist run state and history. Failures are logged per job and never
    /// abort the cycle.
    async fn record(&self, finished: &[Finished]) -> CycleReport {
        let mut report = CycleReport::default();
        for f in finished {
            report.count(f.run.last_result.outcome);
            if let Err(e) = self.registry.record_run(f.job.id(), &f.run).await {
                warn!(job_id = %f.job.id(), "run state not recorded: {e}");
            }
        }

        let mut results: Vec<&HealthResult> =
            finished.iter().filter_map(|f| f.health.as_ref()).collect();
        results.sort_by_key(|r| r.timestamp);
        for result in results {
            match self.history.append(result).await {
                Ok(stored) => debug!(
                    service = %stored.service_name,
                    status = %stored.status,
                    "health result appended"
                ),
                Err(e) => warn!(service = %result.service_name, "history append failed: {e}"),
            }
        }
        report
    }

    /// Earliest next due time across enabled jobs, kept between the rearm
    /// floor and the default interval.
    fn next_run(
        &self,
        jobs: &[Job],
        last_runs: &HashMap<&str, DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> DateTime<Utc> {
        let floor = now + to_chrono(self.config.min_rearm());
        let ceiling = now + to_chrono(self.config.default_interval());
        jobs.iter()
            .filter(|j| j.def.enabled)
            .filter_map(|j| {
                let last = last_runs.get(j.id()).copied().or(j.last_run_at);
                next_due(&j.def.schedule, last, j.def.created_at)
            })
            .min()
            .map(|t| t.max(floor).min(ceiling))
            .unwrap_or(ceiling)
    }

    /// Store errors count as superseded so an unreachable store never rearms.
    async fn superseded(&self, cycle: &Cycle) -> bool {
        match self.cycles.is_superseded(cycle).await {
            Ok(superseded) => superseded,
            Err(e) => {
                warn!(cycle_id = %cycle.cycle_id, "cancellation check failed, not rearming: {e}");
                true
            }
        }
    }

    /// Keep a chain alive after a store failure. The retried cycle still
    /// checks the epoch, so a cancelled chain stays cancelled.
    async fn retry_later(&self, chain_epoch: u64) {
        let at = Utc::now() + to_chrono(self.config.default_interval());
        if let Err(e) = self.trigger.arm(at, chain_epoch).await {
            warn!(chain_epoch, "retry not armed: {e}");
        }
    }

    // --- admin surface -----------------------------------------------------

    /// Enable a job. `Ok(false)` when no such job exists.
    pub async fn start_job(&self, id: &str) -> Result<bool> {
        self.registry.set_enabled(id, true).await
    }

    /// Disable a job. `Ok(false)` when no such job exists.
    pub async fn stop_job(&self, id: &str) -> Result<bool> {
        self.registry.set_enabled(id, false).await
    }

    pub async fn update_cron_job(&self, id: &str, update: JobUpdate) -> Result<Job> {
        self.registry.update(id, update).await
    }

    /// Apply a start, stop or update action and return the job as stored.
    pub async fn apply(&self, id: &str, action: JobAction) -> Result<Job> {
        let found = match action {
            JobAction::Start => self.start_job(id).await?,
            JobAction::Stop => self.stop_job(id).await?,
            JobAction::Update(update) => return self.update_cron_job(id, update).await,
        };
        let not_found = || SchedulerError::JobNotFound { id: id.to_string() };
        if !found {
            return Err(not_found());
        }
        self.registry.get(id).await?.ok_or_else(not_found)
    }

    /// Mark every running and armed cycle stale. Takes effect at each
    /// cycle's next decision point.
    pub async fn cancel_all(&self) -> Result<CancellationMarker> {
        Ok(self.cycles.cancel_all().await?)
    }

    pub async fn status(&self) -> Result<SchedulerStatus> {
        let stats = self.stats.snapshot().await;
        let marker = self.cycles.marker().await?;
        let epoch = self.cycles.current_epoch().await?;
        let current = self.cycles.current().await?;
        let armed = self.trigger.armed().await?;
        Ok(SchedulerStatus {
            last_cancel_timestamp: marker.map(|m| m.timestamp),
            cancel_epoch: epoch,
            active_cycles: stats.active_cycles,
            last_ping_timestamp: stats.last_ping_timestamp,
            last_cycle_id: stats.last_cycle_id,
            last_cycle_time: stats.last_cycle_time,
            current_cycle: current,
            next_trigger_at: armed.map(|a| a.not_before),
        })
    }
}

fn enter(phase: &mut CyclePhase, next: CyclePhase, owner: &str) {
    debug!(cycle_id = %owner, from = ?*phase, to = ?next, "cycle phase");
    *phase = next;
}

fn is_due(job: &Job, now: DateTime<Utc>) -> bool {
    next_due(&job.def.schedule, job.last_run_at, job.def.created_at).is_some_and(|t| t <= now)
}

fn to_chrono(d: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::seconds(1))
}
