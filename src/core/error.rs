// src/core/error.rs

use crate::core::models::JobId;
use thiserror::Error;

/// Errors surfaced to callers of the `Orchestrator`.
///
/// Probe-level failures never show up here: they are downgraded to a
/// `ProbeState::Failed` / `ProbeState::TimedOut` entry on the job instead.
#[derive(Error, Debug)]
pub enum ScanError {
    /// The target is not an absolute http/https URL. No job was created.
    #[error("invalid target '{input}': {reason}")]
    InvalidTarget { input: String, reason: String },

    /// A requested probe identifier is not in the registry. No job was created.
    #[error("unknown probe type '{0}'")]
    UnknownProbe(String),

    #[error("at least one probe type must be requested")]
    EmptyProbeSelection,

    /// The job exists but has not reached a terminal status yet.
    #[error("scan {0} is not finished yet, retry later")]
    NotReady(JobId),

    #[error("scan {0} not found")]
    NotFound(JobId),

    #[error("scan {0} is still active")]
    JobActive(JobId),

    /// Only a `queued` job can be dispatched.
    #[error("scan {0} has already been dispatched")]
    AlreadyDispatched(JobId),

    #[error("scan {job} already references report {report}")]
    ReportAlreadyAttached { job: JobId, report: String },

    #[error("result store failure: {0}")]
    Store(#[from] StoreError),

    #[error("unsupported report format '{0}'")]
    UnsupportedFormat(String),

    #[error("failed to render report: {0}")]
    Render(String),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// Infrastructure-level failure of a single probe.
///
/// "No vulnerability found" is never an error: probes return an empty list.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    /// Connection refused, DNS failure, TLS failure or request timeout.
    #[error("target unreachable: {0}")]
    Unreachable(String),

    /// The target answered but the response could not be read.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("request could not be built or sent: {0}")]
    Client(String),
}

impl From<reqwest::Error> for ProbeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            ProbeError::Unreachable(e.to_string())
        } else if e.is_body() || e.is_decode() {
            ProbeError::InvalidResponse(e.to_string())
        } else {
            ProbeError::Client(e.to_string())
        }
    }
}

/// Opaque failure reported by a `ResultStore` backend.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}
