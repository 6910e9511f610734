// src/core/scanner/headers_scanner.rs

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};
use url::Url;

use super::{Exchange, Probe, ProbeContext};
use crate::core::error::ProbeError;
use crate::core::models::{ProbeCategory, ProbeInfo, ProbeKind, RawFinding};

/// Product tokens carrying a version number, e.g. `nginx/1.18.0` or `PHP/7.4.3`.
static VERSION_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z][\w.-]*/\d+(\.\d+)+").unwrap());

/// Security headers whose absence is reported, with the finding code for each.
const REQUIRED_HEADERS: &[(&str, &str)] = &[
    ("content-security-policy", "HEADERS_CSP_MISSING"),
    ("x-frame-options", "HEADERS_X_FRAME_OPTIONS_MISSING"),
    ("x-content-type-options", "HEADERS_X_CONTENT_TYPE_OPTIONS_MISSING"),
];

const DISCLOSURE_HEADERS: &[&str] = &["server", "x-powered-by", "x-aspnet-version"];

/// Passive check of the response headers returned for the target page.
pub struct HeadersProbe;

#[async_trait]
impl Probe for HeadersProbe {
    fn info(&self) -> ProbeInfo {
        ProbeInfo {
            id: ProbeKind::Basic,
            name: "Security headers".to_string(),
            description: "Checks for missing security headers and version disclosure in a single request."
                .to_string(),
            intensity: 1,
            category: ProbeCategory::Essential,
        }
    }

    async fn scan(&self, ctx: &ProbeContext, target: &Url) -> Result<Vec<RawFinding>, ProbeError> {
        info!(target = %target, "Starting headers scan.");
        let response = ctx.send(ctx.client().get(target.clone())).await?;
        info!(status = %response.status, "Received HTTP response for headers scan.");

        let findings = analyze_headers(&response, target);
        info!(findings = findings.len(), "Headers scan finished.");
        Ok(findings)
    }
}

/// Analyzes the response headers and produces one finding per issue.
fn analyze_headers(response: &Exchange, target: &Url) -> Vec<RawFinding> {
    let location = target.to_string();
    let mut findings = Vec::new();

    // HSTS only means something over TLS.
    if target.scheme() == "https" && response.header("strict-transport-security").is_none() {
        debug!("HSTS header missing.");
        findings.push(RawFinding::from_code(
            ProbeKind::Basic,
            "HEADERS_HSTS_MISSING",
            location.clone(),
            "strict-transport-security header absent",
        ));
    }

    for (name, code) in REQUIRED_HEADERS {
        if response.headers.contains_key(*name) {
            continue;
        }
        debug!(header_name = name, "Header missing.");
        findings.push(RawFinding::from_code(
            ProbeKind::Basic,
            code,
            location.clone(),
            format!("{name} header absent"),
        ));
    }

    for name in DISCLOSURE_HEADERS {
        let Some(raw) = response.headers.get(*name) else { continue };
        let Ok(value) = raw.to_str() else {
            warn!(header_name = name, "Header found but contained invalid UTF-8.");
            continue;
        };
        if VERSION_TOKEN.is_match(value) || *name == "x-aspnet-version" {
            findings.push(RawFinding::from_code(
                ProbeKind::Basic,
                "HEADERS_VERSION_DISCLOSURE",
                location.clone(),
                format!("{name}: {value}"),
            ));
        }
    }

    findings
}
