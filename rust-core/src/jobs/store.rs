//! Job records and the recording-set registry

use crate::error::{CalibError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Target {
    Calibration,
    Model,
}

impl Target {
    pub fn as_str(self) -> &'static str {
        match self {
            Target::Calibration => "calibration",
            Target::Model => "model",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failed)
    }
}

/// Identity of a job: the same key always maps to the same current row
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobKey {
    pub batch_hash: String,
    pub target: Target,
    pub params_hash: String,
    pub code_version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub rpm_min: f64,
    pub rpm_max: f64,
    /// (RPM, environment-subtracted LAeq)
    pub per_rpm_noise: Vec<(f64, f64)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibJob {
    pub id: u64,
    pub key: JobKey,
    pub status: JobStatus,
    pub summary: Option<Summary>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRecord {
    pub hash: String,
    pub root: PathBuf,
    /// Jobs referencing this batch
    pub refs: usize,
    pub deleted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Created,
    Deduplicated,
    Revived,
}

/// Durable job state. Implementations must be safe to share between workers.
pub trait JobStore: Send + Sync {
    /// Return the current row for `key`, creating a pending one if none exists
    fn ensure_job(&self, key: &JobKey) -> Result<CalibJob>;

    /// Replace a failed row for `key` with a fresh pending one
    fn retry_job(&self, key: &JobKey) -> Result<CalibJob>;

    fn get(&self, id: u64) -> Result<CalibJob>;

    fn set_running(&self, id: u64) -> Result<()>;

    fn set_success(&self, id: u64, summary: Summary) -> Result<()>;

    fn set_failed(&self, id: u64, error: String) -> Result<()>;

    fn delete_job(&self, id: u64) -> Result<()>;

    /// Register an uploaded batch by content hash
    fn register_batch(&self, hash: &str, root: &Path) -> Result<(BatchRecord, Registration)>;

    /// Mark batches without referencing jobs as deleted and return them
    fn sweep_unreferenced(&self) -> Result<Vec<BatchRecord>>;
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    jobs: BTreeMap<u64, CalibJob>,
    current: HashMap<JobKey, u64>,
    batches: HashMap<String, BatchRecord>,
}

impl Inner {
    fn insert_pending(&mut self, key: &JobKey) -> CalibJob {
        self.next_id += 1;
        let job = CalibJob {
            id: self.next_id,
            key: key.clone(),
            status: JobStatus::Pending,
            summary: None,
            error: None,
        };
        self.jobs.insert(job.id, job.clone());
        self.current.insert(key.clone(), job.id);
        if let Some(batch) = self.batches.get_mut(&key.batch_hash) {
            batch.refs += 1;
        }
        job
    }

    fn job_mut(&mut self, id: u64) -> Result<&mut CalibJob> {
        self.jobs.get_mut(&id).ok_or(CalibError::UnknownJob(id))
    }
}

/// In-process job store
#[derive(Default)]
pub struct MemoryJobStore {
    inner: Mutex<Inner>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn batch(&self, hash: &str) -> Option<BatchRecord> {
        self.lock().batches.get(hash).cloned()
    }
}

impl JobStore for MemoryJobStore {
    fn ensure_job(&self, key: &JobKey) -> Result<CalibJob> {
        let mut inner = self.lock();
        if let Some(id) = inner.current.get(key).copied() {
            if let Some(job) = inner.jobs.get(&id) {
                return Ok(job.clone());
            }
        }
        Ok(inner.insert_pending(key))
    }

    fn retry_job(&self, key: &JobKey) -> Result<CalibJob> {
        let mut inner = self.lock();
        let existing = inner.current.get(key).and_then(|id| inner.jobs.get(id)).cloned();
        match existing {
            Some(job) if job.status != JobStatus::Failed => Ok(job),
            _ => Ok(inner.insert_pending(key)),
        }
    }

    fn get(&self, id: u64) -> Result<CalibJob> {
        self.lock().jobs.get(&id).cloned().ok_or(CalibError::UnknownJob(id))
    }

    fn set_running(&self, id: u64) -> Result<()> {
        let mut inner = self.lock();
        let job = inner.job_mut(id)?;
        job.status = JobStatus::Running;
        job.error = None;
        Ok(())
    }

    fn set_success(&self, id: u64, summary: Summary) -> Result<()> {
        let mut inner = self.lock();
        let job = inner.job_mut(id)?;
        job.status = JobStatus::Success;
        job.summary = Some(summary);
        job.error = None;
        Ok(())
    }

    fn set_failed(&self, id: u64, error: String) -> Result<()> {
        let mut inner = self.lock();
        let job = inner.job_mut(id)?;
        job.status = JobStatus::Failed;
        job.error = Some(error);
        Ok(())
    }

    fn delete_job(&self, id: u64) -> Result<()> {
        let mut inner = self.lock();
        let job = inner.jobs.remove(&id).ok_or(CalibError::UnknownJob(id))?;
        if inner.current.get(&job.key) == Some(&id) {
            inner.current.remove(&job.key);
        }
        if let Some(batch) = inner.batches.get_mut(&job.key.batch_hash) {
            batch.refs = batch.refs.saturating_sub(1);
        }
        Ok(())
    }

    fn register_batch(&self, hash: &str, root: &Path) -> Result<(BatchRecord, Registration)> {
        let mut inner = self.lock();
        let registration = match inner.batches.get(hash).map(|b| b.deleted) {
            Some(true) => {
                if let Some(batch) = inner.batches.get_mut(hash) {
                    batch.deleted = false;
                    batch.root = root.to_path_buf();
                }
                Registration::Revived
            }
            Some(false) => Registration::Deduplicated,
            None => {
                inner.batches.insert(
                    hash.to_string(),
                    BatchRecord {
                        hash: hash.to_string(),
                        root: root.to_path_buf(),
                        refs: 0,
                        deleted: false,
                    },
                );
                Registration::Created
            }
        };
        let record = inner.batches[hash].clone();
        Ok((record, registration))
    }

    fn sweep_unreferenced(&self) -> Result<Vec<BatchRecord>> {
        let mut inner = self.lock();
        let mut swept: Vec<BatchRecord> = inner
            .batches
            .values_mut()
            .filter(|b| b.refs == 0 && !b.deleted)
            .map(|b| {
                b.deleted = true;
                b.clone()
            })
            .collect();
        swept.sort_by(|a, b| a.hash.cmp(&b.hash));
        Ok(swept)
    }
}
