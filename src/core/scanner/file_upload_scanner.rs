// src/core/scanner/file_upload_scanner.rs

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use super::forms::discover_forms;
use super::{Exchange, Probe, ProbeContext};
use crate::core::error::ProbeError;
use crate::core::models::{ProbeCategory, ProbeInfo, ProbeKind, RawFinding};

/// Endpoints tried when the page itself has no upload form.
const COMMON_UPLOAD_PATHS: &[&str] = &["/upload", "/api/upload", "/file/upload", "/files/upload", "/media/upload"];

/// Words that mark a response as a rejection even with a 2xx status.
const REJECTION_WORDS: &[&str] = &[
    "not allowed",
    "invalid",
    "rejected",
    "denied",
    "forbidden",
    "unsupported",
    "failed",
    "error",
];

/// A place the probe can post files to.
#[derive(Debug, Clone, PartialEq, Eq)]
struct UploadTarget {
    action: Url,
    file_field: String,
    /// Other named fields of the form, sent with a filler value.
    extra_fields: Vec<String>,
    /// Whether the target came from a form in the page (vs. a guessed path).
    from_form: bool,
}

/// One file the probe tries to upload.
#[derive(Debug, Clone, Copy)]
struct UploadCase {
    code: &'static str,
    extension: &'static str,
    content_type: &'static str,
    content: &'static str,
}

const UPLOAD_CASES: &[UploadCase] = &[
    UploadCase {
        code: "FILE_UPLOAD_DANGEROUS_TYPE",
        extension: "php",
        content_type: "application/x-php",
        content: "<?php echo 'vanguard'; ?>",
    },
    UploadCase {
        code: "FILE_UPLOAD_DANGEROUS_TYPE",
        extension: "jsp",
        content_type: "application/octet-stream",
        content: "<% out.println(\"vanguard\"); %>",
    },
    UploadCase {
        code: "FILE_UPLOAD_DOUBLE_EXTENSION",
        extension: "php.jpg",
        content_type: "image/jpeg",
        content: "<?php echo 'vanguard'; ?>",
    },
    UploadCase {
        code: "FILE_UPLOAD_SVG_SCRIPT",
        extension: "svg",
        content_type: "image/svg+xml",
        content: "<svg xmlns=\"http://www.w3.org/2000/svg\"><script>alert('vanguard')</script></svg>",
    },
];

/// Tries to upload executable and script-bearing files through the target's upload endpoints.
pub struct FileUploadProbe;

#[async_trait]
impl Probe for FileUploadProbe {
    fn info(&self) -> ProbeInfo {
        ProbeInfo {
            id: ProbeKind::FileUpload,
            name: "File upload".to_string(),
            description: "Finds upload forms or common upload endpoints and checks whether dangerous file types are accepted."
                .to_string(),
            intensity: 3,
            category: ProbeCategory::Advanced,
        }
    }

    async fn scan(&self, ctx: &ProbeContext, target: &Url) -> Result<Vec<RawFinding>, ProbeError> {
        info!(target = %target, "Starting file upload scan.");
        let baseline = ctx.send(ctx.client().get(target.clone())).await?;

        let mut findings = Vec::new();
        let mut targets = Vec::new();
        for form in discover_forms(&baseline.body, target).into_iter().filter(|f| f.accepts_files()) {
            for (field, accept) in &form.file_inputs {
                if accept.as_deref().is_none_or(|a| a.trim().is_empty()) {
                    findings.push(RawFinding::from_code(
                        ProbeKind::FileUpload,
                        "FILE_UPLOAD_NO_TYPE_RESTRICTION",
                        form.action.to_string(),
                        format!("file input '{field}' has no accept attribute"),
                    ));
                }
                targets.push(UploadTarget {
                    action: form.action.clone(),
                    file_field: field.clone(),
                    extra_fields: form.fields.clone(),
                    from_form: true,
                });
            }
        }

        if targets.is_empty() {
            targets = probe_common_paths(ctx, target).await;
        }
        debug!(targets = targets.len(), "Upload targets selected.");

        let mut attempts = Vec::new();
        for upload_target in &targets {
            for case in UPLOAD_CASES {
                attempts.push((upload_target.clone(), *case));
            }
        }

        let accepted: Vec<RawFinding> = stream::iter(attempts)
            .map(|(upload_target, case)| async move { try_upload(ctx, &upload_target, case).await })
            .buffered(ctx.concurrency())
            .filter_map(|finding| async move { finding })
            .collect()
            .await;
        findings.extend(accepted);

        info!(findings = findings.len(), "File upload scan finished.");
        Ok(findings)
    }
}

/// Keeps the common upload paths that exist on the target.
async fn probe_common_paths(ctx: &ProbeContext, target: &Url) -> Vec<UploadTarget> {
    let mut found = Vec::new();
    for path in COMMON_UPLOAD_PATHS {
        let Ok(url) = target.join(path) else { continue };
        match ctx.send(ctx.client().get(url.clone())).await {
            Ok(response) if response.status == StatusCode::NOT_FOUND => {}
            Ok(response) => {
                debug!(url = %url, status = %response.status, "Candidate upload endpoint found.");
                found.push(UploadTarget {
                    action: url,
                    file_field: "file".to_string(),
                    extra_fields: Vec::new(),
                    from_form: false,
                });
            }
            Err(e) => warn!(url = %url, error = %e, "Upload endpoint lookup failed."),
        }
    }
    found
}

async fn try_upload(ctx: &ProbeContext, upload_target: &UploadTarget, case: UploadCase) -> Option<RawFinding> {
    let filename = format!("vanguard-{}.{}", Uuid::new_v4().simple(), case.extension);
    let part = match Part::text(case.content).file_name(filename.clone()).mime_str(case.content_type) {
        Ok(part) => part,
        Err(e) => {
            warn!(error = %e, "Could not build multipart body.");
            return None;
        }
    };
    let mut form = Form::new().part(upload_target.file_field.clone(), part);
    for field in &upload_target.extra_fields {
        form = form.text(field.clone(), "vanguard");
    }

    let request = ctx.client().post(upload_target.action.clone()).multipart(form);
    let response = match ctx.send(request).await {
        Ok(response) => response,
        Err(e) => {
            warn!(url = %upload_target.action, error = %e, "Upload attempt failed.");
            return None;
        }
    };

    if !is_accepted(&response, &filename) {
        return None;
    }
    let origin = if upload_target.from_form { "upload form" } else { "upload endpoint" };
    Some(RawFinding::from_code(
        ProbeKind::FileUpload,
        case.code,
        upload_target.action.to_string(),
        format!(
            "{origin} accepted {filename} ({}) in field '{}' with status {}",
            case.content_type, upload_target.file_field, response.status
        ),
    ))
}

/// Heuristic acceptance check on the upload response.
fn is_accepted(response: &Exchange, filename: &str) -> bool {
    if !matches!(response.status, StatusCode::OK | StatusCode::CREATED) {
        return false;
    }
    let body = response.body.to_ascii_lowercase();
    if REJECTION_WORDS.iter().any(|word| body.contains(word)) {
        return false;
    }
    body.contains(&filename.to_ascii_lowercase()) || body.contains("success") || body.contains("uploaded")
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderMap;

    fn response(status: u16, body: &str) -> Exchange {
        Exchange {
            status: StatusCode::from_u16(status).unwrap(),
            headers: HeaderMap::new(),
            body: body.to_string(),
        }
    }

    #[test]
    fn test_acceptance_heuristic() {
        let name = "vanguard-1.php";
        assert!(is_accepted(&response(201, "{\"stored\":\"/files/vanguard-1.php\"}"), name));
        assert!(is_accepted(&response(200, "Upload successful"), name));
        assert!(!is_accepted(&response(200, "File type not allowed"), name));
        assert!(!is_accepted(&response(200, "<html>welcome</html>"), name));
        assert!(!is_accepted(&response(415, "uploaded"), name));
    }

    #[test]
    fn test_registers_as_shared_probe() {
        let probe: std::sync::Arc<dyn Probe> = std::sync::Arc::new(FileUploadProbe);
        assert_eq!(probe.kind(), ProbeKind::FileUpload);
        assert_eq!(probe.info().category, ProbeCategory::Advanced);
    }

    #[test]
    fn test_cases_cover_every_upload_code() {
        for code in [
            "FILE_UPLOAD_DANGEROUS_TYPE",
            "FILE_UPLOAD_DOUBLE_EXTENSION",
            "FILE_UPLOAD_SVG_SCRIPT",
        ] {
            assert!(UPLOAD_CASES.iter().any(|case| case.code == code));
        }
    }
}
