// src/core/scanner/sqli_scanner.rs

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};
use url::Url;

use super::params::{InjectionPoint, injection_points};
use super::{Exchange, Probe, ProbeContext};
use crate::core::error::ProbeError;
use crate::core::models::{ProbeCategory, ProbeInfo, ProbeKind, RawFinding};

/// Database error messages leaked by vulnerable applications, per engine.
static ERROR_SIGNATURES: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        ("MySQL", r"(?i)you have an error in your sql syntax"),
        ("MySQL", r"(?i)warning:\s+mysqli?_\w+\("),
        ("MySQL", r"(?i)mysql_fetch_(array|assoc|row)"),
        ("PostgreSQL", r"(?i)pg_query\(\)|pg_exec\(\)"),
        ("PostgreSQL", r"(?i)unterminated quoted string at or near"),
        ("PostgreSQL", r"(?i)syntax error at or near"),
        ("Microsoft SQL Server", r"(?i)unclosed quotation mark after the character string"),
        ("Microsoft SQL Server", r"(?i)microsoft ole db provider for (sql server|odbc drivers)"),
        ("Oracle", r"\bORA-\d{5}\b"),
        ("SQLite", r"(?i)sqlite3?\.OperationalError|SQLITE_ERROR|sqlite error"),
        ("Generic", r"(?i)sql syntax.{0,40}error|quoted string not properly terminated"),
    ]
    .into_iter()
    .map(|(db, pattern)| (db, Regex::new(pattern).unwrap()))
    .collect()
});

/// Suffixes appended to the original value to break the query syntax.
const ERROR_PAYLOADS: &[&str] = &["'", "\"", "')", "' OR '1'='1"];

/// (always-true, always-false) suffix pairs for the boolean check.
const BOOLEAN_PAIRS: &[(&str, &str)] = &[
    (" AND 1=1", " AND 1=2"),
    ("' AND '1'='1", "' AND '1'='2"),
];

/// Minimum length ratio for two bodies to count as the same page.
const SAME_PAGE_RATIO: f64 = 0.95;
/// Below this ratio two bodies count as different pages.
const DIFFERENT_PAGE_RATIO: f64 = 0.80;

/// Error-based and boolean-based SQL injection through URL parameters.
pub struct SqlInjectionProbe;

#[async_trait]
impl Probe for SqlInjectionProbe {
    fn info(&self) -> ProbeInfo {
        ProbeInfo {
            id: ProbeKind::SqlInjection,
            name: "SQL injection".to_string(),
            description: "Looks for database errors and boolean-driven page changes in query parameters and numeric path segments."
                .to_string(),
            intensity: 4,
            category: ProbeCategory::Advanced,
        }
    }

    async fn scan(&self, ctx: &ProbeContext, target: &Url) -> Result<Vec<RawFinding>, ProbeError> {
        info!(target = %target, "Starting SQL injection scan.");
        let baseline = ctx.send(ctx.client().get(target.clone())).await?;
        // Signatures the page shows on its own must not count as evidence.
        let preexisting: Vec<usize> = matching_signatures(&baseline.body).map(|(i, _, _)| i).collect();
        if !preexisting.is_empty() {
            debug!(count = preexisting.len(), "Baseline page already contains SQL error text.");
        }

        let points = injection_points(target, true);
        debug!(points = points.len(), "SQL injection points prepared.");

        let findings: Vec<RawFinding> = stream::iter(points)
            .map(|point| {
                let preexisting = &preexisting;
                async move { test_point(ctx, target, &point, preexisting).await }
            })
            .buffered(ctx.concurrency())
            .filter_map(|finding| async move { finding })
            .collect()
            .await;

        info!(findings = findings.len(), "SQL injection scan finished.");
        Ok(findings)
    }
}

async fn test_point(
    ctx: &ProbeContext,
    target: &Url,
    point: &InjectionPoint,
    preexisting: &[usize],
) -> Option<RawFinding> {
    if let Some(finding) = error_based(ctx, target, point, preexisting).await {
        return Some(finding);
    }
    boolean_based(ctx, target, point).await
}

async fn error_based(
    ctx: &ProbeContext,
    target: &Url,
    point: &InjectionPoint,
    preexisting: &[usize],
) -> Option<RawFinding> {
    for suffix in ERROR_PAYLOADS {
        let url = point.apply(target, &format!("{}{suffix}", point.original()));
        let Some(response) = fetch(ctx, &url).await else { continue };
        let hit = matching_signatures(&response.body).find(|(i, _, _)| !preexisting.contains(i));
        if let Some((_, db, matched)) = hit {
            debug!(location = %point.label(), db, "SQL error signature found.");
            return Some(RawFinding::from_code(
                ProbeKind::SqlInjection,
                "SQLI_ERROR_BASED",
                url.to_string(),
                format!(
                    "{} with payload {suffix:?} produced a {db} error (HTTP {}): {matched}",
                    point.label(),
                    response.status.as_u16()
                ),
            ));
        }
    }
    None
}

async fn boolean_based(ctx: &ProbeContext, target: &Url, point: &InjectionPoint) -> Option<RawFinding> {
    let original = point.original();
    let reference = fetch(ctx, &point.apply(target, original)).await?;

    for (true_suffix, false_suffix) in BOOLEAN_PAIRS {
        let true_url = point.apply(target, &format!("{original}{true_suffix}"));
        let false_url = point.apply(target, &format!("{original}{false_suffix}"));
        let Some(when_true) = fetch(ctx, &true_url).await else { continue };
        let Some(when_false) = fetch(ctx, &false_url).await else { continue };

        let true_ratio = similarity(&reference, &when_true);
        let false_ratio = similarity(&reference, &when_false);
        debug!(location = %point.label(), true_ratio, false_ratio, "Boolean pair compared.");

        if true_ratio >= SAME_PAGE_RATIO && false_ratio < DIFFERENT_PAGE_RATIO {
            return Some(RawFinding::from_code(
                ProbeKind::SqlInjection,
                "SQLI_BOOLEAN_BASED",
                true_url.to_string(),
                format!(
                    "{}: {true_suffix:?} kept the page ({} bytes, HTTP {}), {false_suffix:?} changed it ({} bytes, HTTP {})",
                    point.label(),
                    when_true.body.len(),
                    when_true.status.as_u16(),
                    when_false.body.len(),
                    when_false.status.as_u16()
                ),
            ));
        }
    }
    None
}

async fn fetch(ctx: &ProbeContext, url: &Url) -> Option<Exchange> {
    match ctx.send(ctx.client().get(url.clone())).await {
        Ok(response) => Some(response),
        Err(e) => {
            warn!(url = %url, error = %e, "SQL injection request failed.");
            None
        }
    }
}

/// Yields (signature index, engine, matched text) for every signature found in `body`.
fn matching_signatures(body: &str) -> impl Iterator<Item = (usize, &'static str, String)> + '_ {
    ERROR_SIGNATURES.iter().enumerate().filter_map(move |(i, (db, regex))| {
        regex.find(body).map(|m| (i, *db, m.as_str().to_string()))
    })
}

/// Page similarity in [0, 1]; a different status code means different pages.
fn similarity(a: &Exchange, b: &Exchange) -> f64 {
    if a.status != b.status {
        return 0.0;
    }
    let (la, lb) = (a.body.len(), b.body.len());
    if la == 0 && lb == 0 {
        return 1.0;
    }
    la.min(lb) as f64 / la.max(lb) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;
    use reqwest::header::HeaderMap;

    fn page(status: u16, body: &str) -> Exchange {
        Exchange {
            status: StatusCode::from_u16(status).unwrap(),
            headers: HeaderMap::new(),
            body: body.to_string(),
        }
    }

    #[test]
    fn test_signatures_per_engine() {
        let engines: Vec<&str> = [
            "You have an error in your SQL syntax; check the manual",
            "ORA-01756: quoted string not properly terminated",
            "Unclosed quotation mark after the character string ''.",
            "sqlite3.OperationalError: near \"'\": syntax error",
        ]
        .iter()
        .map(|body| matching_signatures(body).next().unwrap().1)
        .collect();
        assert_eq!(engines, vec!["MySQL", "Oracle", "Microsoft SQL Server", "SQLite"]);
        assert!(matching_signatures("<h1>Product 7</h1>").next().is_none());
    }

    #[test]
    fn test_similarity() {
        assert_eq!(similarity(&page(200, "abcd"), &page(200, "abcd")), 1.0);
        assert_eq!(similarity(&page(200, "abcd"), &page(200, "ab")), 0.5);
        assert_eq!(similarity(&page(200, "abcd"), &page(500, "abcd")), 0.0);
        assert_eq!(similarity(&page(404, ""), &page(404, "")), 1.0);
    }
}
