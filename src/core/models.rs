// src/core/models.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};
use url::Url;
use uuid::Uuid;

use crate::core::knowledge_base;

/// Identifier of a scan job. Generated once at submission and never changed.
pub type JobId = Uuid;

// --- Severity ---

/// The fixed five-level severity taxonomy.
///
/// Declaration order is from most to least severe, so the derived `Ord`
/// sorts critical first.
#[derive(
    Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString,
    EnumIter, IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    /// Parses a free-form severity label. Anything outside the five levels becomes `Info`.
    pub fn normalize(label: &str) -> Self {
        label.trim().parse().unwrap_or(Severity::Info)
    }
}

// Unknown labels must not fail deserialization of stored jobs.
impl<'de> Deserialize<'de> for Severity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        Ok(Severity::normalize(&label))
    }
}

// --- Probe identity ---

/// Identifier of a probe type, as accepted from callers (`"sql_injection"`, ...).
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString,
    EnumIter, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProbeKind {
    Basic,
    Xss,
    SqlInjection,
    HttpMethods,
    FileUpload,
}

/// Selector that expands to every registered probe.
pub const ALL_PROBES: &str = "all";

impl ProbeKind {
    pub fn all() -> Vec<ProbeKind> {
        ProbeKind::iter().collect()
    }
}

/// How heavy a probe is, mirrored in the catalogue shown to users.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ProbeCategory {
    Essential,
    Common,
    Advanced,
}

/// Catalogue entry describing a registered probe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProbeInfo {
    pub id: ProbeKind,
    pub name: String,
    pub description: String,
    /// 1 (a single request) to 5 (many payload variants).
    pub intensity: u8,
    pub category: ProbeCategory,
}

// --- Findings ---

/// A finding as emitted by a probe, before classification.
///
/// `severity` is `None` when the probe leaves the decision to the classifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawFinding {
    pub probe: ProbeKind,
    pub code: String,
    pub title: String,
    pub description: String,
    pub remediation: String,
    pub severity: Option<Severity>,
    pub location: String,
    pub evidence: String,
}

impl RawFinding {
    /// Builds a raw finding from a knowledge-base code, taking title, description,
    /// remediation and default severity from the catalogue entry.
    pub fn from_code(probe: ProbeKind, code: &str, location: impl Into<String>, evidence: impl Into<String>) -> Self {
        let (title, description, remediation, severity) = match knowledge_base::get_finding_detail(code) {
            Some(detail) => (
                detail.title.to_string(),
                detail.description.to_string(),
                detail.remediation.to_string(),
                detail.severity,
            ),
            None => (code.to_string(), String::new(), String::new(), None),
        };
        Self {
            probe,
            code: code.to_string(),
            title,
            description,
            remediation,
            severity,
            location: location.into(),
            evidence: evidence.into(),
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }
}

/// A classified, immutable finding owned by exactly one scan job.
///
/// `evidence` is raw data observed on the target. It is stored verbatim and
/// must be treated as untrusted text by every consumer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Finding {
    pub id: Uuid,
    pub probe_source: ProbeKind,
    pub code: String,
    pub title: String,
    pub description: String,
    pub remediation: String,
    pub severity: Severity,
    pub location: String,
    pub evidence: String,
}

// --- Job state machine ---

/// Sub-state of one requested probe inside a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum ProbeState {
    Pending,
    Running,
    Succeeded,
    Failed(String),
    TimedOut,
}

impl ProbeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProbeState::Succeeded | ProbeState::Failed(_) | ProbeState::TimedOut)
    }

    /// Wire name of the state, without the failure reason.
    pub fn label(&self) -> &'static str {
        match self {
            ProbeState::Pending => "pending",
            ProbeState::Running => "running",
            ProbeState::Succeeded => "succeeded",
            ProbeState::Failed(_) => "failed",
            ProbeState::TimedOut => "timed_out",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProbeEntry {
    pub probe: ProbeKind,
    pub state: ProbeState,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub findings: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    PartiallyCompleted,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::PartiallyCompleted | JobStatus::Failed)
    }
}

/// Outcome of a probe as applied by the orchestrator.
#[derive(Debug, Clone)]
pub enum ProbeOutcome {
    Succeeded(Vec<Finding>),
    Failed(String),
    TimedOut,
}

/// The stateful record of one requested scan.
///
/// Only the orchestrator mutates a job, and it stops doing so once the job is
/// terminal (apart from the one-time `report_id` back-reference).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanJob {
    pub id: JobId,
    pub url: Url,
    pub requested_probes: Vec<ProbeKind>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// One entry per requested probe, in request order.
    pub probe_states: Vec<ProbeEntry>,
    /// Append-only, in probe completion order.
    pub findings: Vec<Finding>,
    pub message: String,
    pub failure_reason: Option<String>,
    pub report_id: Option<String>,
}

impl ScanJob {
    pub fn new(url: Url, requested_probes: Vec<ProbeKind>) -> Self {
        let probe_states = requested_probes
            .iter()
            .map(|probe| ProbeEntry {
                probe: *probe,
                state: ProbeState::Pending,
                started_at: None,
                finished_at: None,
                findings: 0,
            })
            .collect();
        Self {
            id: Uuid::new_v4(),
            url,
            requested_probes,
            status: JobStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            probe_states,
            findings: Vec::new(),
            message: "Scan queued".to_string(),
            failure_reason: None,
            report_id: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn probe_state(&self, probe: ProbeKind) -> Option<&ProbeState> {
        self.probe_states.iter().find(|e| e.probe == probe).map(|e| &e.state)
    }

    /// Percentage of requested probes that reached a terminal sub-state.
    pub fn progress(&self) -> u8 {
        if self.is_terminal() {
            return 100;
        }
        let total = self.probe_states.len();
        if total == 0 {
            return 0;
        }
        let done = self.probe_states.iter().filter(|e| e.state.is_terminal()).count();
        ((done * 100) / total) as u8
    }

    /// Status implied by the probe sub-states once all of them are terminal.
    ///
    /// All succeeded: `Completed`. None succeeded: `Failed`. Anything else:
    /// `PartiallyCompleted`.
    pub fn settled_status(&self) -> JobStatus {
        let succeeded = self
            .probe_states
            .iter()
            .filter(|e| e.state == ProbeState::Succeeded)
            .count();
        if succeeded == 0 {
            JobStatus::Failed
        } else if succeeded == self.probe_states.len() {
            JobStatus::Completed
        } else {
            JobStatus::PartiallyCompleted
        }
    }

    pub(crate) fn mark_running(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Running;
        self.started_at = Some(now);
        self.message = format!("Dispatching {} probe(s)", self.probe_states.len());
    }

    pub(crate) fn probe_started(&mut self, probe: ProbeKind, now: DateTime<Utc>) {
        if let Some(entry) = self.entry_mut(probe) {
            if entry.state == ProbeState::Pending {
                entry.state = ProbeState::Running;
                entry.started_at = Some(now);
            }
        }
        self.message = self.running_message();
    }

    /// Applies one probe's outcome in a single step: sub-state and findings together.
    pub(crate) fn apply_outcome(&mut self, probe: ProbeKind, outcome: ProbeOutcome, now: DateTime<Utc>) {
        let Some(entry) = self.entry_mut(probe) else {
            return;
        };
        if entry.state.is_terminal() {
            return;
        }
        entry.finished_at = Some(now);
        match outcome {
            ProbeOutcome::Succeeded(findings) => {
                entry.state = ProbeState::Succeeded;
                entry.findings = findings.len();
                self.findings.extend(findings);
            }
            ProbeOutcome::Failed(reason) => entry.state = ProbeState::Failed(reason),
            ProbeOutcome::TimedOut => entry.state = ProbeState::TimedOut,
        }
        self.message = self.running_message();
    }

    /// Forces every non-terminal probe to `TimedOut`. Returns how many were affected.
    pub(crate) fn force_timeout_remaining(&mut self, now: DateTime<Utc>) -> usize {
        let mut forced = 0;
        for entry in self.probe_states.iter_mut().filter(|e| !e.state.is_terminal()) {
            entry.state = ProbeState::TimedOut;
            entry.finished_at = Some(now);
            forced += 1;
        }
        forced
    }

    pub(crate) fn finalize(&mut self, now: DateTime<Utc>) {
        self.status = self.settled_status();
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
        self.finished_at = Some(now);
        self.message = match self.status {
            JobStatus::Completed => "Scan completed successfully".to_string(),
            JobStatus::PartiallyCompleted => "Scan completed with probe failures".to_string(),
            _ => "Every probe failed or timed out".to_string(),
        };
    }

    /// Marks the job failed because its state could not be persisted.
    /// Probes that had not settled yet fail with the same reason.
    pub(crate) fn fail_with(&mut self, reason: String, now: DateTime<Utc>) {
        for entry in self.probe_states.iter_mut().filter(|e| !e.state.is_terminal()) {
            entry.state = ProbeState::Failed(reason.clone());
            entry.finished_at = Some(now);
        }
        self.status = JobStatus::Failed;
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
        self.finished_at = Some(now);
        self.message = reason.clone();
        self.failure_reason = Some(reason);
    }

    fn entry_mut(&mut self, probe: ProbeKind) -> Option<&mut ProbeEntry> {
        self.probe_states.iter_mut().find(|e| e.probe == probe)
    }

    fn running_message(&self) -> String {
        let done = self.probe_states.iter().filter(|e| e.state.is_terminal()).count();
        format!("{} of {} probe(s) finished", done, self.probe_states.len())
    }
}

// --- Aggregated output ---

/// Five-bucket severity histogram. Every bucket is always present.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeveritySummary {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub info: usize,
}

impl SeveritySummary {
    pub fn record(&mut self, severity: Severity) {
        *self.bucket_mut(severity) += 1;
    }

    pub fn count(&self, severity: Severity) -> usize {
        match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
            Severity::Info => self.info,
        }
    }

    pub fn total(&self) -> usize {
        Severity::iter().map(|s| self.count(s)).sum()
    }

    fn bucket_mut(&mut self, severity: Severity) -> &mut usize {
        match severity {
            Severity::Critical => &mut self.critical,
            Severity::High => &mut self.high,
            Severity::Medium => &mut self.medium,
            Severity::Low => &mut self.low,
            Severity::Info => &mut self.info,
        }
    }
}

/// Per-probe outcome carried in a report, including the failure reason.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProbeOutcomeSummary {
    pub probe: ProbeKind,
    pub state: ProbeState,
    pub findings: usize,
}

/// The terminal, externally consumable output of a scan job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Report {
    pub job_id: JobId,
    pub url: String,
    pub status: JobStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_secs: f64,
    pub probes_used: Vec<ProbeKind>,
    pub probe_outcomes: Vec<ProbeOutcomeSummary>,
    pub failure_reason: Option<String>,
    pub summary: SeveritySummary,
    pub findings: Vec<Finding>,
    pub generated_at: DateTime<Utc>,
}
