// src/lib.rs

//! Vanguard web scanner: dispatches independent vulnerability probes
//! (XSS, SQL injection, HTTP methods, file upload, security headers)
//! against a target URL, tracks them as a scan job, and aggregates the
//! findings into a severity-classified report.

pub mod config;
pub mod core;
pub mod logging;

pub use crate::config::ScanSettings;
pub use crate::core::error::{ProbeError, ScanError, StoreError};
pub use crate::core::models::{
    Finding, JobId, JobStatus, ProbeKind, ProbeState, RawFinding, Report, ScanJob, Severity,
    SeveritySummary,
};
pub use crate::core::orchestrator::Orchestrator;
pub use crate::core::scanner::{Probe, ProbeContext, ProbeRegistry};
pub use crate::core::store::{JsonFileStore, MemoryStore, ResultStore};
