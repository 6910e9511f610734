// src/core/scanner/mod.rs

// Public interface of the `scanner` module: the `Probe` contract every
// detection strategy implements, the HTTP context probes share, and the
// registry the orchestrator resolves probe identifiers against.
pub mod file_upload_scanner;
pub mod forms;
pub mod headers_scanner;
pub mod http_methods_scanner;
pub mod params;
pub mod sqli_scanner;
pub mod xss_scanner;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Client, RequestBuilder, StatusCode};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::debug;
use url::Url;

use crate::config::ScanSettings;
use crate::core::error::{ProbeError, ScanError};
use crate::core::models::{ALL_PROBES, ProbeInfo, ProbeKind, RawFinding};

use self::file_upload_scanner::FileUploadProbe;
use self::headers_scanner::HeadersProbe;
use self::http_methods_scanner::HttpMethodsProbe;
use self::sqli_scanner::SqlInjectionProbe;
use self::xss_scanner::XssProbe;

/// One independent vulnerability-detection strategy.
///
/// `scan` returns an empty list when nothing was found. It returns
/// `Err(ProbeError)` only when the target could not be assessed at all, so
/// "confirmed safe" and "could not report" stay distinguishable.
/// Implementations never touch shared state; everything they learn is in the
/// returned findings. They must issue their requests through `ProbeContext`
/// so connections are released on every exit path, cancellation included.
#[async_trait]
pub trait Probe: Send + Sync {
    fn info(&self) -> ProbeInfo;

    fn kind(&self) -> ProbeKind {
        self.info().id
    }

    async fn scan(&self, ctx: &ProbeContext, target: &Url) -> Result<Vec<RawFinding>, ProbeError>;
}

/// A fully read HTTP response. Holding one keeps no connection open.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl Exchange {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Request capability handed to a probe for the duration of one scan.
///
/// Every request first takes a permit from the probe's own semaphore, which
/// bounds its internal concurrency. The permit and the underlying connection
/// are scoped to `send`: they are released when it returns or when its future
/// is dropped by a timeout.
#[derive(Clone)]
pub struct ProbeContext {
    client: Client,
    permits: Arc<Semaphore>,
    concurrency: usize,
    max_body_bytes: usize,
}

impl ProbeContext {
    pub fn new(client: Client, concurrency: usize, max_body_bytes: usize) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            client,
            permits: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            max_body_bytes,
        }
    }

    /// Context built from settings with a fresh client; convenient for
    /// running a single probe outside the orchestrator.
    pub fn from_settings(settings: &ScanSettings) -> Result<Self, ScanError> {
        let client = build_http_client(settings)?;
        Ok(Self::new(client, settings.probe_request_concurrency, settings.max_body_bytes))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Maximum requests this probe may have in flight.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Sends a request and reads the body (capped at `max_body_bytes`).
    pub async fn send(&self, request: RequestBuilder) -> Result<Exchange, ProbeError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| ProbeError::Client(format!("request gate closed: {e}")))?;

        let mut response = request.send().await?;
        let status = response.status();
        let headers = response.headers().clone();

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            let room = self.max_body_bytes.saturating_sub(body.len());
            body.extend_from_slice(&chunk[..chunk.len().min(room)]);
            if body.len() >= self.max_body_bytes {
                debug!(limit = self.max_body_bytes, "Response body truncated.");
                break;
            }
        }

        Ok(Exchange {
            status,
            headers,
            body: String::from_utf8_lossy(&body).into_owned(),
        })
    }
}

/// Builds the HTTP client shared by every probe of the process.
pub fn build_http_client(settings: &ScanSettings) -> Result<Client, ScanError> {
    Client::builder()
        .user_agent(settings.user_agent.clone())
        .timeout(settings.request_timeout())
        .danger_accept_invalid_certs(settings.accept_invalid_certs)
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()
        .map_err(|e| ScanError::HttpClient(e.to_string()))
}

/// The set of probe types callers may request.
#[derive(Clone, Default)]
pub struct ProbeRegistry {
    probes: Vec<Arc<dyn Probe>>,
}

impl ProbeRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in probe.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(HeadersProbe));
        registry.register(Arc::new(XssProbe));
        registry.register(Arc::new(SqlInjectionProbe));
        registry.register(Arc::new(HttpMethodsProbe));
        registry.register(Arc::new(FileUploadProbe));
        registry
    }

    /// Adds a probe, replacing any probe registered for the same kind.
    pub fn register(&mut self, probe: Arc<dyn Probe>) {
        let kind = probe.kind();
        match self.probes.iter_mut().find(|p| p.kind() == kind) {
            Some(slot) => *slot = probe,
            None => self.probes.push(probe),
        }
    }

    pub fn get(&self, kind: ProbeKind) -> Option<Arc<dyn Probe>> {
        self.probes.iter().find(|p| p.kind() == kind).cloned()
    }

    pub fn kinds(&self) -> Vec<ProbeKind> {
        self.probes.iter().map(|p| p.kind()).collect()
    }

    pub fn catalogue(&self) -> Vec<ProbeInfo> {
        self.probes.iter().map(|p| p.info()).collect()
    }

    /// Validates a caller's selection.
    ///
    /// `"all"` expands to every registered probe; repeated identifiers keep
    /// their first position. Any identifier that is not registered rejects
    /// the whole selection.
    pub fn resolve<S: AsRef<str>>(&self, requested: &[S]) -> Result<Vec<ProbeKind>, ScanError> {
        let mut seen = HashSet::new();
        let mut resolved = Vec::new();
        for raw in requested {
            let id = raw.as_ref().trim();
            let kinds = if id.eq_ignore_ascii_case(ALL_PROBES) {
                self.kinds()
            } else {
                let kind: ProbeKind = id
                    .to_ascii_lowercase()
                    .parse()
                    .map_err(|_| ScanError::UnknownProbe(id.to_string()))?;
                if self.get(kind).is_none() {
                    return Err(ScanError::UnknownProbe(id.to_string()));
                }
                vec![kind]
            };
            for kind in kinds {
                if seen.insert(kind) {
                    resolved.push(kind);
                }
            }
        }
        if resolved.is_empty() {
            return Err(ScanError::EmptyProbeSelection);
        }
        Ok(resolved)
    }
}
