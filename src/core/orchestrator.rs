// src/core/orchestrator.rs

use chrono::Utc;
use futures::FutureExt;
use reqwest::Client;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, RwLock, Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::ScanSettings;
use crate::core::classifier::{build_report, classify};
use crate::core::error::{ScanError, StoreError};
use crate::core::models::{JobId, JobStatus, ProbeInfo, ProbeKind, ProbeOutcome, Report, ScanJob};
use crate::core::scanner::{Probe, ProbeContext, ProbeRegistry, build_http_client};
use crate::core::store::ResultStore;

/// Live handle on a job owned by this process.
///
/// The watch sender is the job's single source of truth: readers take cheap
/// snapshots with `borrow()`, waiters subscribe, and every mutation goes
/// through `send_modify`/`send_replace` so a probe's sub-state and findings
/// always change together.
#[derive(Clone)]
struct JobEntry {
    state: Arc<watch::Sender<ScanJob>>,
    stop: Arc<Notify>,
}

impl JobEntry {
    fn new(job: ScanJob) -> Self {
        let (state, _) = watch::channel(job);
        Self {
            state: Arc::new(state),
            stop: Arc::new(Notify::new()),
        }
    }

    fn snapshot(&self) -> ScanJob {
        self.state.borrow().clone()
    }
}

struct Inner {
    settings: ScanSettings,
    registry: ProbeRegistry,
    store: Arc<dyn ResultStore>,
    client: Client,
    /// Process-wide admission gate on simultaneously running probes.
    admission: Arc<Semaphore>,
    /// Jobs driven by this process until their final state is persisted.
    jobs: RwLock<HashMap<JobId, JobEntry>>,
}

/// Accepts scan requests, runs their probes concurrently and owns every
/// job state transition.
///
/// Cloning is cheap and every clone drives the same set of jobs.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(
        settings: ScanSettings,
        registry: ProbeRegistry,
        store: Arc<dyn ResultStore>,
    ) -> Result<Self, ScanError> {
        let client = build_http_client(&settings)?;
        let admission = Arc::new(Semaphore::new(settings.global_probe_limit.max(1)));
        Ok(Self {
            inner: Arc::new(Inner {
                settings,
                registry,
                store,
                client,
                admission,
                jobs: RwLock::new(HashMap::new()),
            }),
        })
    }

    pub fn settings(&self) -> &ScanSettings {
        &self.inner.settings
    }

    pub fn probe_catalogue(&self) -> Vec<ProbeInfo> {
        self.inner.registry.catalogue()
    }

    /// Validates the request and records a `queued` job.
    ///
    /// Nothing is created or persisted when the URL or a probe identifier
    /// is invalid, or when the store rejects the initial write.
    pub async fn submit<S: AsRef<str>>(&self, url: &str, probes: &[S]) -> Result<JobId, ScanError> {
        let target = parse_target(url)?;
        let kinds = self.inner.registry.resolve(probes)?;
        let job = ScanJob::new(target, kinds);
        let id = job.id;

        self.inner.persist(&job).await?;
        info!(job_id = %id, url = %job.url, probes = ?job.requested_probes, "Scan submitted.");
        self.inner.jobs.write().await.insert(id, JobEntry::new(job));
        Ok(id)
    }

    /// Moves a queued job to `running` and starts its probes in the background.
    pub async fn dispatch(&self, id: JobId) -> Result<(), ScanError> {
        let Some(entry) = self.inner.entry(id).await else {
            return match self.inner.store.load(id).await? {
                Some(_) => Err(ScanError::AlreadyDispatched(id)),
                None => Err(ScanError::NotFound(id)),
            };
        };

        let mut accepted = false;
        entry.state.send_if_modified(|job| {
            if job.status != JobStatus::Queued {
                return false;
            }
            job.mark_running(Utc::now());
            accepted = true;
            true
        });
        if !accepted {
            return Err(ScanError::AlreadyDispatched(id));
        }

        if let Err(e) = self.inner.persist(&entry.snapshot()).await {
            let reason = format!("result store: {e}");
            entry.state.send_modify(|job| job.fail_with(reason, Utc::now()));
            self.inner.save_best_effort(&entry.snapshot()).await;
            return Err(e.into());
        }

        info!(job_id = %id, "Scan dispatched.");
        tokio::spawn(drive_job(self.inner.clone(), entry));
        Ok(())
    }

    /// Ends a job early. In-flight probes are cancelled and recorded as
    /// timed out, then the job settles as it would at its deadline.
    /// Calling it on a terminal job does nothing.
    pub async fn finalize_now(&self, id: JobId) -> Result<(), ScanError> {
        let Some(entry) = self.inner.entry(id).await else {
            let job = self.inner.store.load(id).await?.ok_or(ScanError::NotFound(id))?;
            return if job.is_terminal() { Ok(()) } else { Err(ScanError::NotReady(id)) };
        };

        let now = Utc::now();
        let mut running = false;
        // Settling a queued job and dispatching it are mutually exclusive.
        let settled = entry.state.send_if_modified(|job| match job.status {
            JobStatus::Queued => {
                job.force_timeout_remaining(now);
                job.finalize(now);
                true
            }
            JobStatus::Running => {
                running = true;
                false
            }
            _ => false,
        });

        if running {
            info!(job_id = %id, "Early finalization requested.");
            entry.stop.notify_one();
        }
        if settled {
            info!(job_id = %id, "Queued scan finalized before dispatch.");
            if let Err(e) = self.inner.persist(&entry.snapshot()).await {
                let reason = format!("result store: {e}");
                entry.state.send_modify(|job| job.fail_with(reason, Utc::now()));
                self.inner.save_best_effort(&entry.snapshot()).await;
                return Err(e.into());
            }
            self.inner.evict(id).await;
        }
        Ok(())
    }

    /// Current snapshot of a job. Never blocks on running probes.
    pub async fn status(&self, id: JobId) -> Result<ScanJob, ScanError> {
        if let Some(entry) = self.inner.entry(id).await {
            return Ok(entry.snapshot());
        }
        self.inner.store.load(id).await?.ok_or(ScanError::NotFound(id))
    }

    /// Report of a terminal job. A job still in progress yields `NotReady`.
    pub async fn result(&self, id: JobId) -> Result<Report, ScanError> {
        let job = self.status(id).await?;
        if !job.is_terminal() {
            return Err(ScanError::NotReady(id));
        }
        Ok(build_report(&job))
    }

    /// Waits until the job reaches a terminal status and returns it.
    pub async fn wait(&self, id: JobId) -> Result<ScanJob, ScanError> {
        let Some(entry) = self.inner.entry(id).await else {
            // Jobs only known to the store are not driven by this process.
            let job = self.inner.store.load(id).await?.ok_or(ScanError::NotFound(id))?;
            return if job.is_terminal() { Ok(job) } else { Err(ScanError::NotReady(id)) };
        };
        let mut rx = entry.state.subscribe();
        let job = rx
            .wait_for(ScanJob::is_terminal)
            .await
            .map_err(|_| ScanError::NotFound(id))?
            .clone();
        Ok(job)
    }

    /// Stored jobs, newest first, with live state for jobs running here.
    pub async fn list(&self, limit: usize, offset: usize) -> Result<Vec<ScanJob>, ScanError> {
        let mut jobs = self.inner.store.list(limit, offset).await?;
        let live = self.inner.jobs.read().await;
        for job in jobs.iter_mut() {
            if let Some(entry) = live.get(&job.id) {
                *job = entry.snapshot();
            }
        }
        Ok(jobs)
    }

    /// Removes a finished job. Returns whether anything was deleted.
    pub async fn delete(&self, id: JobId) -> Result<bool, ScanError> {
        let removed_live = {
            let mut jobs = self.inner.jobs.write().await;
            match jobs.get(&id) {
                Some(entry) if !entry.state.borrow().is_terminal() => return Err(ScanError::JobActive(id)),
                Some(_) => jobs.remove(&id).is_some(),
                None => false,
            }
        };
        let removed_stored = self.inner.store.delete(id).await?;
        info!(job_id = %id, removed = removed_live || removed_stored, "Scan deleted.");
        Ok(removed_live || removed_stored)
    }

    /// Records the id of an externally rendered report. Allowed once, on a terminal job.
    pub async fn attach_report(&self, id: JobId, report_id: &str) -> Result<(), ScanError> {
        match self.inner.entry(id).await {
            Some(entry) => {
                let mut outcome = Ok(());
                entry.state.send_if_modified(|job| {
                    outcome = set_report_id(job, report_id);
                    outcome.is_ok()
                });
                outcome?;
                self.inner.persist(&entry.snapshot()).await?;
            }
            None => {
                let mut job = self.inner.store.load(id).await?.ok_or(ScanError::NotFound(id))?;
                set_report_id(&mut job, report_id)?;
                self.inner.persist(&job).await?;
            }
        }
        debug!(job_id = %id, report_id, "Report attached.");
        Ok(())
    }
}

impl Inner {
    async fn entry(&self, id: JobId) -> Option<JobEntry> {
        self.jobs.read().await.get(&id).cloned()
    }

    /// Saves with bounded retries and linear backoff.
    async fn persist(&self, job: &ScanJob) -> Result<(), StoreError> {
        let mut attempt: u32 = 0;
        loop {
            match self.store.save(job).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.settings.store_retries => {
                    attempt += 1;
                    warn!(job_id = %job.id, attempt, error = %e, "Store write failed, retrying.");
                    tokio::time::sleep(self.settings.store_retry_backoff() * attempt).await;
                }
                Err(e) => {
                    error!(job_id = %job.id, error = %e, "Store write failed.");
                    return Err(e);
                }
            }
        }
    }

    /// Drops a settled job from the live map. The store serves it from then on.
    async fn evict(&self, id: JobId) {
        if self.jobs.write().await.remove(&id).is_some() {
            debug!(job_id = %id, "Settled scan evicted from memory.");
        }
    }

    /// Single attempt for intermediate snapshots; the final write is the one that counts.
    async fn save_best_effort(&self, job: &ScanJob) {
        if let Err(e) = self.store.save(job).await {
            warn!(job_id = %job.id, error = %e, "Intermediate store write failed.");
        }
    }

    fn probe_context(&self) -> ProbeContext {
        ProbeContext::new(
            self.client.clone(),
            self.settings.probe_request_concurrency,
            self.settings.max_body_bytes,
        )
    }
}

fn set_report_id(job: &mut ScanJob, report_id: &str) -> Result<(), ScanError> {
    if !job.is_terminal() {
        return Err(ScanError::NotReady(job.id));
    }
    if let Some(existing) = &job.report_id {
        return Err(ScanError::ReportAlreadyAttached { job: job.id, report: existing.clone() });
    }
    job.report_id = Some(report_id.to_string());
    Ok(())
}

/// Accepts only absolute http(s) URLs with a host.
fn parse_target(input: &str) -> Result<Url, ScanError> {
    let invalid = |reason: String| ScanError::InvalidTarget { input: input.to_string(), reason };
    let url = Url::parse(input.trim()).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }
    Ok(url)
}

/// Runs every probe of a job and settles it.
///
/// Probes run as independent tasks. Outcomes are applied one at a time as
/// they arrive. At the job deadline, or on `finalize_now`, unfinished probes
/// are aborted and recorded as timed out.
async fn drive_job(inner: Arc<Inner>, entry: JobEntry) {
    let job = entry.snapshot();
    let id = job.id;
    if job.is_terminal() {
        debug!(job_id = %id, status = %job.status, "Scan already settled, nothing to drive.");
        return;
    }
    let mut tasks = JoinSet::new();

    for kind in job.requested_probes.iter().copied() {
        let Some(probe) = inner.registry.get(kind) else {
            warn!(job_id = %id, probe = %kind, "Probe no longer registered.");
            entry.state.send_modify(|job| {
                job.apply_outcome(kind, ProbeOutcome::Failed("probe not registered".to_string()), Utc::now())
            });
            continue;
        };
        tasks.spawn(run_probe(
            probe,
            inner.probe_context(),
            job.url.clone(),
            inner.admission.clone(),
            entry.state.clone(),
            inner.settings.probe_timeout(),
        ));
    }

    let deadline = tokio::time::sleep(inner.settings.job_deadline());
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            joined = tasks.join_next() => match joined {
                None => break,
                Some(Ok((kind, outcome))) => {
                    entry.state.send_modify(|job| job.apply_outcome(kind, outcome, Utc::now()));
                    inner.save_best_effort(&entry.snapshot()).await;
                }
                Some(Err(e)) => error!(job_id = %id, fatal = true, error = %e, "Probe task failed to complete."),
            },
            _ = &mut deadline => {
                warn!(job_id = %id, remaining = tasks.len(), "Job deadline reached.");
                break;
            }
            _ = entry.stop.notified() => {
                info!(job_id = %id, remaining = tasks.len(), "Finalizing job early.");
                break;
            }
        }
    }

    // Dropping the aborted tasks releases their permits and connections
    // before the remaining probes are marked timed out.
    tasks.abort_all();
    while let Some(joined) = tasks.join_next().await {
        if let Ok((kind, outcome)) = joined {
            entry.state.send_modify(|job| job.apply_outcome(kind, outcome, Utc::now()));
        }
    }

    let now = Utc::now();
    let mut settled = entry.snapshot();
    let forced = settled.force_timeout_remaining(now);
    settled.finalize(now);

    let persisted = match inner.persist(&settled).await {
        Ok(()) => true,
        Err(e) => {
            settled.fail_with(format!("result store: {e}"), Utc::now());
            inner.save_best_effort(&settled).await;
            false
        }
    };
    info!(
        job_id = %id,
        status = %settled.status,
        findings = settled.findings.len(),
        forced_timeouts = forced,
        "Scan finished."
    );
    entry.state.send_replace(settled);
    // A job whose final write failed stays in memory so its failure stays visible.
    if persisted {
        inner.evict(id).await;
    }
}

/// Wraps one probe run: admission, timeout, panic isolation and classification.
async fn run_probe(
    probe: Arc<dyn Probe>,
    ctx: ProbeContext,
    target: Url,
    admission: Arc<Semaphore>,
    state: Arc<watch::Sender<ScanJob>>,
    timeout: Duration,
) -> (ProbeKind, ProbeOutcome) {
    let kind = probe.kind();
    let Ok(_permit) = admission.acquire_owned().await else {
        return (kind, ProbeOutcome::Failed("probe admission closed".to_string()));
    };
    state.send_modify(|job| job.probe_started(kind, Utc::now()));
    debug!(probe = %kind, target = %target, "Probe started.");

    let scan = AssertUnwindSafe(probe.scan(&ctx, &target)).catch_unwind();
    let outcome = match tokio::time::timeout(timeout, scan).await {
        Err(_) => {
            warn!(probe = %kind, timeout_secs = timeout.as_secs(), "Probe timed out.");
            ProbeOutcome::TimedOut
        }
        Ok(Err(_)) => {
            error!(probe = %kind, fatal = true, "Probe panicked.");
            ProbeOutcome::Failed("probe panicked".to_string())
        }
        Ok(Ok(Err(e))) => {
            warn!(probe = %kind, error = %e, "Probe failed.");
            ProbeOutcome::Failed(e.to_string())
        }
        Ok(Ok(Ok(raw))) => {
            debug!(probe = %kind, findings = raw.len(), "Probe succeeded.");
            // A probe only ever reports under its own identity.
            let findings = raw
                .into_iter()
                .map(|mut finding| {
                    finding.probe = kind;
                    classify(finding)
                })
                .collect();
            ProbeOutcome::Succeeded(findings)
        }
    };
    (kind, outcome)
}
