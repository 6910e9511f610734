// src/core/scanner/http_methods_scanner.rs

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::{Method, StatusCode};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use super::{Exchange, Probe, ProbeContext};
use crate::core::error::ProbeError;
use crate::core::models::{ProbeCategory, ProbeInfo, ProbeKind, RawFinding, Severity};

/// Header carrying the marker on TRACE/TRACK requests.
pub const TRACE_HEADER: &str = "x-vanguard-trace";
/// Cookie carrying the marker on TRACE/TRACK requests.
pub const TRACE_COOKIE: &str = "vanguard_probe";

/// Verbs that should never be advertised or accepted anonymously.
const DANGEROUS_METHODS: &[&str] = &["PUT", "DELETE", "PATCH", "TRACE", "TRACK", "CONNECT"];

/// Checks which HTTP verbs the target advertises and actually honours.
///
/// State-changing verbs are sent to a scratch resource next to the target,
/// never to the target itself.
pub struct HttpMethodsProbe;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Check {
    Reference,
    Options,
    StateChange,
    Trace,
}

#[derive(Debug, Clone)]
struct Variant {
    method: Method,
    url: Url,
    check: Check,
}

#[async_trait]
impl Probe for HttpMethodsProbe {
    fn info(&self) -> ProbeInfo {
        ProbeInfo {
            id: ProbeKind::HttpMethods,
            name: "HTTP methods".to_string(),
            description: "Detects advertised or accepted dangerous verbs (PUT, DELETE, PATCH) and cross-site tracing."
                .to_string(),
            intensity: 2,
            category: ProbeCategory::Common,
        }
    }

    async fn scan(&self, ctx: &ProbeContext, target: &Url) -> Result<Vec<RawFinding>, ProbeError> {
        info!(target = %target, "Starting HTTP methods scan.");
        let marker = format!("vgd{}", Uuid::new_v4().simple());
        let scratch = target
            .join(&format!("vanguard-{marker}.txt"))
            .map_err(|e| ProbeError::Client(format!("cannot derive scratch resource: {e}")))?;

        let variants = build_variants(target, &scratch)?;
        let total = variants.len();

        let results: Vec<(Variant, Result<Exchange, ProbeError>)> = stream::iter(variants)
            .map(|variant| {
                let marker = marker.as_str();
                async move {
                    let outcome = send_variant(ctx, &variant, marker).await;
                    (variant, outcome)
                }
            })
            .buffered(ctx.concurrency())
            .collect()
            .await;

        let mut first_error = None;
        let mut answered = Vec::with_capacity(total);
        for (variant, outcome) in results {
            match outcome {
                Ok(exchange) => {
                    debug!(method = %variant.method, status = %exchange.status, "Method answered.");
                    answered.push((variant, exchange));
                }
                Err(e) => {
                    warn!(method = %variant.method, error = %e, "Method request failed.");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        if answered.is_empty() {
            return Err(first_error.unwrap_or_else(|| ProbeError::Unreachable(target.to_string())));
        }

        let findings = analyze(&answered, &marker);
        info!(findings = findings.len(), "HTTP methods scan finished.");
        Ok(findings)
    }
}

fn build_variants(target: &Url, scratch: &Url) -> Result<Vec<Variant>, ProbeError> {
    let track = Method::from_bytes(b"TRACK").map_err(|e| ProbeError::Client(e.to_string()))?;
    let variant = |method: Method, url: &Url, check: Check| Variant { method, url: url.clone(), check };
    Ok(vec![
        variant(Method::GET, target, Check::Reference),
        variant(Method::OPTIONS, target, Check::Options),
        variant(Method::PUT, scratch, Check::StateChange),
        variant(Method::DELETE, scratch, Check::StateChange),
        variant(Method::PATCH, scratch, Check::StateChange),
        variant(Method::TRACE, target, Check::Trace),
        variant(track, target, Check::Trace),
    ])
}

async fn send_variant(ctx: &ProbeContext, variant: &Variant, marker: &str) -> Result<Exchange, ProbeError> {
    let mut request = ctx.client().request(variant.method.clone(), variant.url.clone());
    match variant.check {
        Check::StateChange => {
            request = request
                .header("content-type", "text/plain")
                .body(format!("vanguard method probe {marker}"));
        }
        Check::Trace => {
            request = request
                .header(TRACE_HEADER, marker)
                .header("cookie", format!("{TRACE_COOKIE}={marker}"));
        }
        Check::Reference | Check::Options => {}
    }
    ctx.send(request).await
}

fn analyze(answered: &[(Variant, Exchange)], marker: &str) -> Vec<RawFinding> {
    let reference = answered
        .iter()
        .find(|(v, _)| v.check == Check::Reference)
        .map(|(_, exchange)| exchange);
    let mut findings = Vec::new();

    for (variant, exchange) in answered {
        match variant.check {
            Check::Reference => {}
            Check::Options => findings.extend(advertised_methods(variant, exchange)),
            Check::StateChange => findings.extend(accepted_state_change(variant, exchange, reference)),
            Check::Trace => findings.extend(cross_site_tracing(variant, exchange, marker)),
        }
    }
    findings
}

fn advertised_methods(variant: &Variant, exchange: &Exchange) -> Option<RawFinding> {
    let allow = exchange.header("allow").or_else(|| exchange.header("public"))?;
    let dangerous: Vec<&str> = allow
        .split(',')
        .map(str::trim)
        .filter(|m| DANGEROUS_METHODS.iter().any(|d| d.eq_ignore_ascii_case(m)))
        .collect();
    if dangerous.is_empty() {
        return None;
    }
    Some(RawFinding::from_code(
        ProbeKind::HttpMethods,
        "HTTP_DANGEROUS_METHODS_ADVERTISED",
        variant.url.to_string(),
        format!("OPTIONS advertises {} (Allow: {allow})", dangerous.join(", ")),
    ))
}

fn accepted_state_change(variant: &Variant, exchange: &Exchange, reference: Option<&Exchange>) -> Option<RawFinding> {
    let accepted = match exchange.status {
        StatusCode::CREATED | StatusCode::NO_CONTENT | StatusCode::ACCEPTED => true,
        // Catch-all routes answer 200 with the normal page for any verb.
        StatusCode::OK => reference.is_none_or(|r| r.body != exchange.body),
        _ => false,
    };
    if !accepted {
        return None;
    }
    Some(RawFinding::from_code(
        ProbeKind::HttpMethods,
        "HTTP_DANGEROUS_METHOD_ENABLED",
        variant.url.to_string(),
        format!(
            "{} accepted with status {} (no Authorization header sent)",
            variant.method, exchange.status
        ),
    ))
}

fn cross_site_tracing(variant: &Variant, exchange: &Exchange, marker: &str) -> Option<RawFinding> {
    if !exchange.status.is_success() || !exchange.body.contains(marker) {
        return None;
    }
    let body = exchange.body.to_ascii_lowercase();
    let reflected: Vec<&str> = [TRACE_HEADER, "cookie"]
        .into_iter()
        .filter(|name| body.contains(&format!("{name}:")))
        .collect();
    let credentials_exposed = reflected.contains(&"cookie") || body.contains("authorization:");
    let severity = if credentials_exposed { Severity::Critical } else { Severity::High };

    let names = if reflected.is_empty() { "request marker".to_string() } else { reflected.join(", ") };
    Some(
        RawFinding::from_code(
            ProbeKind::HttpMethods,
            "HTTP_TRACE_ENABLED",
            variant.url.to_string(),
            format!(
                "{} echoed the request with status {}; reflected headers: {names}",
                variant.method, exchange.status
            ),
        )
        .with_severity(severity),
    )
}
