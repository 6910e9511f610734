// src/config.rs

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File looked up in the working directory when no explicit path is given.
pub const DEFAULT_CONFIG_FILE: &str = "vanguard.toml";
/// Prefix for environment overrides, e.g. `VANGUARD_PROBE_TIMEOUT_SECS=30`.
pub const ENV_PREFIX: &str = "VANGUARD_";

/// Runtime settings of the scanning engine.
///
/// Layering, lowest to highest priority: compiled-in defaults, TOML file,
/// `VANGUARD_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScanSettings {
    /// Budget for a single probe before it is cancelled and recorded `timed_out`.
    pub probe_timeout_secs: u64,
    /// Wall-clock budget for a whole job; still-running probes are force-timed-out.
    pub job_deadline_secs: u64,
    /// Process-wide cap on probes running at the same time, across all jobs.
    pub global_probe_limit: usize,
    /// Maximum in-flight requests inside one probe.
    pub probe_request_concurrency: usize,
    pub request_timeout_secs: u64,
    pub max_body_bytes: usize,
    /// Extra attempts after a failed store write.
    pub store_retries: u32,
    pub store_retry_backoff_ms: u64,
    pub user_agent: String,
    pub accept_invalid_certs: bool,
    /// Overrides the per-user data directory (logs and stored scans).
    pub data_dir: Option<PathBuf>,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            probe_timeout_secs: 60,
            job_deadline_secs: 300,
            global_probe_limit: 16,
            probe_request_concurrency: 8,
            request_timeout_secs: 10,
            max_body_bytes: 2 * 1024 * 1024,
            store_retries: 3,
            store_retry_backoff_ms: 200,
            user_agent: format!("VanguardWebscan/{}", env!("CARGO_PKG_VERSION")),
            accept_invalid_certs: false,
            data_dir: None,
        }
    }
}

impl ScanSettings {
    /// Loads defaults, then `custom_path` (or `vanguard.toml`), then the environment.
    pub fn load(custom_path: Option<&Path>) -> Result<Self, figment::Error> {
        let file = custom_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        let figment = Figment::from(Serialized::defaults(ScanSettings::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX));
        Self::from_figment(figment)
    }

    pub fn from_figment(figment: Figment) -> Result<Self, figment::Error> {
        let settings: ScanSettings = figment.extract()?;
        Ok(settings.sanitized())
    }

    // Zero values would deadlock the semaphores or time out instantly.
    fn sanitized(mut self) -> Self {
        self.global_probe_limit = self.global_probe_limit.max(1);
        self.probe_request_concurrency = self.probe_request_concurrency.max(1);
        self.probe_timeout_secs = self.probe_timeout_secs.max(1);
        self.job_deadline_secs = self.job_deadline_secs.max(1);
        self
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn job_deadline(&self) -> Duration {
        Duration::from_secs(self.job_deadline_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn store_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.store_retry_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = ScanSettings::default();
        assert_eq!(settings.probe_timeout(), Duration::from_secs(60));
        assert_eq!(settings.job_deadline(), Duration::from_secs(300));
        assert!(!settings.accept_invalid_certs);
        assert!(settings.data_dir.is_none());
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let figment = Figment::from(Serialized::defaults(ScanSettings::default())).merge(Toml::string(
            r#"
                probe_timeout_secs = 15
                global_probe_limit = 0
                user_agent = "custom-agent"
            "#,
        ));
        let settings = ScanSettings::from_figment(figment).unwrap();

        assert_eq!(settings.probe_timeout_secs, 15);
        assert_eq!(settings.user_agent, "custom-agent");
        assert_eq!(settings.global_probe_limit, 1, "zero limit is clamped");
        assert_eq!(settings.job_deadline_secs, 300);
    }

    #[test]
    fn test_invalid_type_is_rejected() {
        let figment = Figment::from(Serialized::defaults(ScanSettings::default()))
            .merge(Toml::string(r#"probe_timeout_secs = "soon""#));
        assert!(ScanSettings::from_figment(figment).is_err());
    }
}
