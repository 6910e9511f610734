// src/core/store.rs

use async_trait::async_trait;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::core::error::StoreError;
use crate::core::models::{JobId, ScanJob};

/// Persistence boundary for scan jobs.
///
/// Backends own their connection details; the orchestrator only ever sees
/// this trait and treats every error as opaque.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Inserts or replaces the job with the same id.
    async fn save(&self, job: &ScanJob) -> Result<(), StoreError>;

    async fn load(&self, id: JobId) -> Result<Option<ScanJob>, StoreError>;

    /// Returns whether a job was removed.
    async fn delete(&self, id: JobId) -> Result<bool, StoreError>;

    /// Jobs ordered newest first.
    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<ScanJob>, StoreError>;
}

fn newest_first(jobs: &mut [ScanJob]) {
    jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
}

/// In-process store, mostly for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryStore {
    jobs: RwLock<HashMap<JobId, ScanJob>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn save(&self, job: &ScanJob) -> Result<(), StoreError> {
        self.jobs.write().await.insert(job.id, job.clone());
        Ok(())
    }

    async fn load(&self, id: JobId) -> Result<Option<ScanJob>, StoreError> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn delete(&self, id: JobId) -> Result<bool, StoreError> {
        Ok(self.jobs.write().await.remove(&id).is_some())
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<ScanJob>, StoreError> {
        let mut jobs: Vec<ScanJob> = self.jobs.read().await.values().cloned().collect();
        newest_first(&mut jobs);
        Ok(jobs.into_iter().skip(offset).take(limit).collect())
    }
}

/// One pretty-printed JSON document per job under `<dir>/<job id>.json`.
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// reader never observes a half-written job.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store rooted at `<data_dir>/scans`.
    pub fn in_data_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join("scans"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: JobId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }
}

#[async_trait]
impl ResultStore for JsonFileStore {
    async fn save(&self, job: &ScanJob) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let bytes = serde_json::to_vec_pretty(job)?;
        let path = self.path_for(job.id);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(job_id = %job.id, path = %path.display(), "Scan job saved.");
        Ok(())
    }

    async fn load(&self, id: JobId) -> Result<Option<ScanJob>, StoreError> {
        match tokio::fs::read(self.path_for(id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, id: JobId) -> Result<bool, StoreError> {
        match tokio::fs::remove_file(self.path_for(id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<ScanJob>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut jobs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<ScanJob>(&bytes) {
                Ok(job) => jobs.push(job),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable scan file."),
            }
        }
        newest_first(&mut jobs);
        Ok(jobs.into_iter().skip(offset).take(limit).collect())
    }
}
