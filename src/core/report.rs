// src/core/report.rs

use std::fmt::Write as _;
use std::str::FromStr;
use strum::IntoEnumIterator;

use crate::core::error::ScanError;
use crate::core::models::{ProbeState, Report, Severity};

/// Output formats a report can be requested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ReportFormat {
    Json,
    #[default]
    Text,
    /// Recognised but produced by an external renderer.
    Pdf,
}

impl FromStr for ReportFormat {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ReportFormat::Json),
            "text" | "txt" => Ok(ReportFormat::Text),
            "pdf" => Ok(ReportFormat::Pdf),
            other => Err(ScanError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Renders a terminal report. Findings and summary are taken as-is.
pub fn render(report: &Report, format: ReportFormat) -> Result<Vec<u8>, ScanError> {
    match format {
        ReportFormat::Json => serde_json::to_vec_pretty(report).map_err(|e| ScanError::Render(e.to_string())),
        ReportFormat::Text => render_text(report)
            .map(String::into_bytes)
            .map_err(|e| ScanError::Render(e.to_string())),
        ReportFormat::Pdf => Err(ScanError::UnsupportedFormat(format.to_string())),
    }
}

/// Escapes control characters so target-controlled text cannot drive the terminal.
fn inert(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_control() { c.escape_default().to_string() } else { c.to_string() })
        .collect()
}

fn render_text(report: &Report) -> Result<String, std::fmt::Error> {
    let mut out = String::new();
    let rule = "=".repeat(64);

    writeln!(out, "{rule}")?;
    writeln!(out, " VANGUARD WEB SCAN REPORT")?;
    writeln!(out, "{rule}")?;
    writeln!(out, "Target:    {}", inert(&report.url))?;
    writeln!(out, "Scan ID:   {}", report.job_id)?;
    writeln!(out, "Status:    {}", report.status)?;
    if let Some(started) = report.started_at {
        writeln!(out, "Started:   {}", started.to_rfc3339())?;
    }
    if let Some(finished) = report.finished_at {
        writeln!(out, "Finished:  {}", finished.to_rfc3339())?;
    }
    writeln!(out, "Duration:  {:.1}s", report.duration_secs)?;
    let probes: Vec<String> = report.probes_used.iter().map(ToString::to_string).collect();
    writeln!(out, "Probes:    {}", probes.join(", "))?;
    if let Some(reason) = &report.failure_reason {
        writeln!(out, "Failure:   {}", inert(reason))?;
    }

    writeln!(out)?;
    writeln!(out, "Summary ({} findings)", report.summary.total())?;
    for severity in Severity::iter() {
        writeln!(out, "  {:<9}{}", severity.to_string(), report.summary.count(severity))?;
    }

    writeln!(out)?;
    if report.findings.is_empty() {
        writeln!(out, "No findings.")?;
    } else {
        writeln!(out, "Findings (in arrival order)")?;
        for (i, finding) in report.findings.iter().enumerate() {
            writeln!(
                out,
                "{:>3}. [{}] {} ({})",
                i + 1,
                finding.severity.to_string().to_uppercase(),
                inert(&finding.title),
                finding.probe_source
            )?;
            if !finding.description.is_empty() {
                writeln!(out, "     Description: {}", inert(&finding.description))?;
            }
            writeln!(out, "     Location:    {}", inert(&finding.location))?;
            writeln!(out, "     Evidence:    {}", inert(&finding.evidence))?;
            if !finding.remediation.is_empty() {
                writeln!(out, "     Remediation: {}", inert(&finding.remediation))?;
            }
        }
    }

    writeln!(out)?;
    writeln!(out, "Probe outcomes")?;
    for outcome in &report.probe_outcomes {
        let state = match &outcome.state {
            ProbeState::Failed(reason) => format!("failed: {}", inert(reason)),
            ProbeState::Succeeded => format!("succeeded, {} finding(s)", outcome.findings),
            ProbeState::TimedOut => "timed out".to_string(),
            ProbeState::Running => "running".to_string(),
            ProbeState::Pending => "pending".to_string(),
        };
        writeln!(out, "  {:<14}{state}", outcome.probe.to_string())?;
    }
    writeln!(out, "{rule}")?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::classifier::{build_report, classify};
    use crate::core::models::{ProbeKind, ProbeOutcome, RawFinding, ScanJob};
    use chrono::Utc;
    use url::Url;

    fn finished_report() -> Report {
        let now = Utc::now();
        let mut job = ScanJob::new(
            Url::parse("http://site.test/?q=1").unwrap(),
            vec![ProbeKind::Xss, ProbeKind::FileUpload],
        );
        job.mark_running(now);
        let finding = classify(RawFinding::from_code(
            ProbeKind::Xss,
            "XSS_REFLECTED",
            "http://site.test/?q=x",
            "reflected \u{1b}[31mred\u{1b}[0m",
        ));
        job.apply_outcome(ProbeKind::Xss, ProbeOutcome::Succeeded(vec![finding]), now);
        job.apply_outcome(ProbeKind::FileUpload, ProbeOutcome::Failed("target unreachable".into()), now);
        job.finalize(now);
        build_report(&job)
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("JSON".parse::<ReportFormat>().unwrap(), ReportFormat::Json);
        assert_eq!("pdf".parse::<ReportFormat>().unwrap(), ReportFormat::Pdf);
        assert!(matches!("docx".parse::<ReportFormat>(), Err(ScanError::UnsupportedFormat(f)) if f == "docx"));
    }

    #[test]
    fn test_text_report_escapes_evidence() {
        let text = String::from_utf8(render(&finished_report(), ReportFormat::Text).unwrap()).unwrap();
        assert!(text.contains("Status:    partially_completed"));
        assert!(text.contains("[HIGH] Reflected Cross-Site Scripting (xss)"));
        assert!(text.contains("\\u{1b}[31mred"));
        assert!(!text.contains('\u{1b}'));
        assert!(text.contains("failed: target unreachable"));
    }

    #[test]
    fn test_text_report_keeps_arrival_order_and_details() {
        let mut report = finished_report();
        let mut low = report.findings[0].clone();
        low.severity = Severity::Low;
        low.title = "Late low finding".to_string();
        low.description = "Seen \u{7}after the XSS".to_string();
        low.remediation = "Clear \u{1b}[2J nothing".to_string();
        report.findings.insert(0, low);

        let text = String::from_utf8(render(&report, ReportFormat::Text).unwrap()).unwrap();
        let low_at = text.find("1. [LOW] Late low finding").unwrap();
        let high_at = text.find("2. [HIGH] Reflected Cross-Site Scripting").unwrap();
        assert!(low_at < high_at);
        assert!(text.contains(&format!("Description: {}", report.findings[1].description)));
        assert!(text.contains("Description: Seen \\u{7}after the XSS"));
        assert!(text.contains("Remediation: Clear \\u{1b}[2J nothing"));
        assert!(!text.contains('\u{7}'));
        assert!(!text.contains('\u{1b}'));
    }

    #[test]
    fn test_json_report_and_pdf() {
        let report = finished_report();
        let json: serde_json::Value = serde_json::from_slice(&render(&report, ReportFormat::Json).unwrap()).unwrap();
        assert_eq!(json["summary"]["high"], 1);
        assert_eq!(json["status"], "partially_completed");
        assert!(matches!(render(&report, ReportFormat::Pdf), Err(ScanError::UnsupportedFormat(_))));
    }
}
