// src/core/mod.rs

// The `core` module is the scanning engine. Everything the CLI does goes
// through the `Orchestrator`; the other sub-modules are its collaborators.

/// Data structures shared across the engine: jobs, findings, severities
/// and the aggregated report.
pub mod models;

/// Error taxonomy for submission, probes and the result store.
pub mod error;

/// Static catalogue of finding codes with human-readable explanations
/// and remediation steps.
pub mod knowledge_base;

/// Severity classification and summary aggregation.
pub mod classifier;

/// The probe contract, the shared HTTP context and the concrete probes.
pub mod scanner;

/// Job lifecycle: submission, concurrent dispatch, timeouts, finalisation.
pub mod orchestrator;

/// Persistence contract for scan jobs plus in-memory and JSON-file backends.
pub mod store;

/// Report rendering to JSON and plain text.
pub mod report;
