// src/core/scanner/xss_scanner.rs

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};
use url::Url;

use super::forms::{DiscoveredForm, discover_forms};
use super::params::{InjectionPoint, injection_points};
use super::{Probe, ProbeContext};
use crate::core::error::ProbeError;
use crate::core::models::{ProbeCategory, ProbeInfo, ProbeKind, RawFinding};

/// Marker embedded in every payload so reflections can be told apart from page content.
pub const XSS_MARKER: &str = "vgd7x";

/// Payloads tried in order; the first one reflected unencoded wins.
const PAYLOADS: &[&str] = &[
    "<script>alert('vgd7x')</script>",
    "\"><svg onload=alert('vgd7x')>",
    "'><img src=x onerror=alert('vgd7x')>",
];

/// Value given to form fields that are not under test.
const FILLER: &str = "vanguard";

/// Reflected cross-site scripting through query parameters and GET forms.
pub struct XssProbe;

#[derive(Debug, Clone)]
enum XssCase {
    Parameter(InjectionPoint),
    FormField { form: DiscoveredForm, field: String },
}

impl XssCase {
    fn request_url(&self, target: &Url, payload: &str) -> Url {
        match self {
            XssCase::Parameter(point) => point.apply(target, payload),
            XssCase::FormField { form, field } => {
                let mut url = form.action.clone();
                {
                    let mut query = url.query_pairs_mut();
                    for name in &form.fields {
                        query.append_pair(name, if name == field { payload } else { FILLER });
                    }
                }
                url
            }
        }
    }

    fn describe(&self) -> String {
        match self {
            XssCase::Parameter(point) => point.label(),
            XssCase::FormField { field, .. } => format!("form field '{field}'"),
        }
    }

    fn code(&self) -> &'static str {
        match self {
            XssCase::Parameter(_) => "XSS_REFLECTED",
            XssCase::FormField { .. } => "XSS_FORM_REFLECTED",
        }
    }
}

#[async_trait]
impl Probe for XssProbe {
    fn info(&self) -> ProbeInfo {
        ProbeInfo {
            id: ProbeKind::Xss,
            name: "Cross-site scripting".to_string(),
            description: "Injects script payloads into parameters and GET forms and looks for unencoded reflection."
                .to_string(),
            intensity: 3,
            category: ProbeCategory::Common,
        }
    }

    async fn scan(&self, ctx: &ProbeContext, target: &Url) -> Result<Vec<RawFinding>, ProbeError> {
        info!(target = %target, "Starting XSS scan.");
        let baseline = ctx.send(ctx.client().get(target.clone())).await?;

        let mut cases: Vec<XssCase> = injection_points(target, false)
            .into_iter()
            .map(XssCase::Parameter)
            .collect();
        for form in discover_forms(&baseline.body, target).into_iter().filter(|f| f.is_get()) {
            for field in &form.fields {
                cases.push(XssCase::FormField { form: form.clone(), field: field.clone() });
            }
        }
        debug!(cases = cases.len(), "XSS injection cases prepared.");

        let findings: Vec<RawFinding> = stream::iter(cases)
            .map(|case| async move { test_case(ctx, target, &case).await })
            .buffered(ctx.concurrency())
            .filter_map(|finding| async move { finding })
            .collect()
            .await;

        info!(findings = findings.len(), "XSS scan finished.");
        Ok(findings)
    }
}

/// Tries each payload on one case and stops at the first reflection.
async fn test_case(ctx: &ProbeContext, target: &Url, case: &XssCase) -> Option<RawFinding> {
    for payload in PAYLOADS {
        let url = case.request_url(target, payload);
        let response = match ctx.send(ctx.client().get(url.clone())).await {
            Ok(response) => response,
            Err(e) => {
                warn!(url = %url, error = %e, "XSS payload request failed.");
                continue;
            }
        };
        if let Some(excerpt) = reflection_excerpt(&response.body, payload) {
            debug!(location = %case.describe(), "Payload reflected unencoded.");
            return Some(RawFinding::from_code(
                ProbeKind::Xss,
                case.code(),
                url.to_string(),
                format!("{} reflects payload {payload} unencoded: {excerpt}", case.describe()),
            ));
        }
    }
    None
}

/// Returns the payload with a little surrounding context when it appears verbatim in `body`.
fn reflection_excerpt(body: &str, payload: &str) -> Option<String> {
    let start = body.find(payload)?;
    let end = start + payload.len();
    let mut from = start.saturating_sub(40);
    while !body.is_char_boundary(from) {
        from -= 1;
    }
    let mut to = (end + 40).min(body.len());
    while !body.is_char_boundary(to) {
        to += 1;
    }
    Some(body[from..to].trim().to_string())
}
