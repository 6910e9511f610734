// src/core/classifier.rs

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;
use uuid::Uuid;

use crate::core::models::{
    Finding, ProbeKind, ProbeOutcomeSummary, RawFinding, Report, ScanJob, Severity, SeveritySummary,
};

/// Evidence written by the HTTP methods probe when a state-changing verb was accepted.
static ACCEPTED_STATE_CHANGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(PUT|DELETE)\b accepted").unwrap());

/// Severity used when a probe left the decision to the classifier.
fn default_severity(probe: ProbeKind) -> Severity {
    match probe {
        ProbeKind::Basic => Severity::Low,
        ProbeKind::Xss => Severity::High,
        ProbeKind::SqlInjection => Severity::High,
        ProbeKind::HttpMethods => Severity::Medium,
        ProbeKind::FileUpload => Severity::High,
    }
}

/// Decides the final severity of a raw finding.
///
/// A severity attached by the probe passes through untouched. Otherwise the
/// per-probe default applies, with one escalation: dangerous HTTP methods
/// default to medium but become high when PUT or DELETE were accepted
/// without credentials.
pub fn classify_severity(raw: &RawFinding) -> Severity {
    if let Some(severity) = raw.severity {
        return severity;
    }
    let base = default_severity(raw.probe);
    if raw.probe == ProbeKind::HttpMethods && ACCEPTED_STATE_CHANGE.is_match(&raw.evidence) {
        debug!(code = %raw.code, "Escalating accepted state-changing method to high.");
        return Severity::High;
    }
    base
}

/// Turns a raw probe finding into an immutable, classified `Finding`.
pub fn classify(raw: RawFinding) -> Finding {
    let severity = classify_severity(&raw);
    Finding {
        id: Uuid::new_v4(),
        probe_source: raw.probe,
        code: raw.code,
        title: raw.title,
        description: raw.description,
        remediation: raw.remediation,
        severity,
        location: raw.location,
        evidence: raw.evidence,
    }
}

/// Single pass over the findings producing the five-bucket histogram.
///
/// Findings reported by different probes for the same location and title
/// are counted separately; merging them is left to the presentation layer.
pub fn aggregate(findings: &[Finding]) -> SeveritySummary {
    findings.iter().fold(SeveritySummary::default(), |mut summary, finding| {
        summary.record(finding.severity);
        summary
    })
}

/// Builds the report for a job. Callers are expected to pass a terminal job.
pub fn build_report(job: &ScanJob) -> Report {
    let duration_secs = match (job.started_at, job.finished_at) {
        (Some(start), Some(end)) => (end - start).num_milliseconds().max(0) as f64 / 1000.0,
        _ => 0.0,
    };
    Report {
        job_id: job.id,
        url: job.url.to_string(),
        status: job.status,
        started_at: job.started_at,
        finished_at: job.finished_at,
        duration_secs,
        probes_used: job.requested_probes.clone(),
        probe_outcomes: job
            .probe_states
            .iter()
            .map(|entry| ProbeOutcomeSummary {
                probe: entry.probe,
                state: entry.state.clone(),
                findings: entry.findings,
            })
            .collect(),
        failure_reason: job.failure_reason.clone(),
        summary: aggregate(&job.findings),
        findings: job.findings.clone(),
        generated_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::{JobStatus, ProbeOutcome};
    use url::Url;

    fn raw(probe: ProbeKind, code: &str, evidence: &str) -> RawFinding {
        RawFinding::from_code(probe, code, "https://example.com/", evidence)
    }

    #[test]
    fn test_probe_severity_passes_through() {
        let finding = classify(raw(ProbeKind::SqlInjection, "SQLI_ERROR_BASED", "ORA-01756"));
        assert_eq!(finding.severity, Severity::Critical);

        let overridden = classify(raw(ProbeKind::Basic, "HEADERS_CSP_MISSING", "").with_severity(Severity::Medium));
        assert_eq!(overridden.severity, Severity::Medium);
    }

    #[test]
    fn test_dangerous_method_defaults_and_escalation() {
        let patch = raw(
            ProbeKind::HttpMethods,
            "HTTP_DANGEROUS_METHOD_ENABLED",
            "PATCH accepted with status 200 OK (no Authorization header sent)",
        );
        assert_eq!(classify(patch).severity, Severity::Medium);

        let delete = raw(
            ProbeKind::HttpMethods,
            "HTTP_DANGEROUS_METHOD_ENABLED",
            "DELETE accepted with status 204 No Content (no Authorization header sent)",
        );
        assert_eq!(classify(delete).severity, Severity::High);
    }

    #[test]
    fn test_unknown_code_uses_probe_default() {
        let finding = classify(raw(ProbeKind::FileUpload, "SOMETHING_NEW", ""));
        assert_eq!(finding.severity, Severity::High);
        assert_eq!(finding.title, "SOMETHING_NEW");
    }

    #[test]
    fn test_aggregate_is_pure_and_sums_to_length() {
        let findings: Vec<Finding> = vec![
            classify(raw(ProbeKind::Xss, "XSS_REFLECTED", "")),
            classify(raw(ProbeKind::Xss, "XSS_REFLECTED", "")),
            classify(raw(ProbeKind::Basic, "HEADERS_X_CONTENT_TYPE_OPTIONS_MISSING", "")),
            classify(raw(ProbeKind::SqlInjection, "SQLI_ERROR_BASED", "")),
        ];
        let first = aggregate(&findings);
        let second = aggregate(&findings);
        assert_eq!(first, second);
        assert_eq!(first.total(), findings.len());
        assert_eq!(first.high, 2);
        assert_eq!(first.critical, 1);
        assert_eq!(first.info, 1);
        assert_eq!(aggregate(&[]).total(), 0);
    }

    #[test]
    fn test_same_location_and_title_are_not_merged() {
        let a = classify(raw(ProbeKind::Xss, "XSS_REFLECTED", "q"));
        let mut b = classify(raw(ProbeKind::FileUpload, "XSS_REFLECTED", "svg"));
        b.title = a.title.clone();
        assert_eq!(aggregate(&[a, b]).total(), 2);
    }

    #[test]
    fn test_build_report_copies_job() {
        let now = Utc::now();
        let mut job = ScanJob::new(Url::parse("http://example.com/").unwrap(), vec![ProbeKind::Xss, ProbeKind::Basic]);
        job.mark_running(now);
        let finding = classify(raw(ProbeKind::Xss, "XSS_REFLECTED", "<script>"));
        job.apply_outcome(ProbeKind::Xss, ProbeOutcome::Succeeded(vec![finding]), now);
        job.apply_outcome(ProbeKind::Basic, ProbeOutcome::Failed("connection refused".into()), now);
        job.finalize(now);

        let report = build_report(&job);
        assert_eq!(report.status, JobStatus::PartiallyCompleted);
        assert_eq!(report.findings, job.findings);
        assert_eq!(report.summary.high, 1);
        assert_eq!(report.probes_used, vec![ProbeKind::Xss, ProbeKind::Basic]);
        assert_eq!(report.probe_outcomes.len(), 2);
        assert!(report.duration_secs >= 0.0);
    }
}
