//! Job submission, execution and caching

use super::cache::{load_document, store_document, CacheKey, ModelCache};
use super::pool::WorkerPool;
use super::store::{CalibJob, JobKey, JobStatus, JobStore, Summary, Target};
use crate::audio::batch::AudioBatch;
use crate::calibration::{calibrate, Calibration, CalibrationDocument};
use crate::config::CalibrationParams;
use crate::error::Result;
use crate::filters::cache::FilterBankCache;
use crate::model::{build_model, ModelDocument, Provenance, CODE_VERSION};
use std::any::Any;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

impl Summary {
    pub fn from_calibration(calibration: &Calibration) -> Self {
        Self {
            rpm_min: calibration.rpm_min(),
            rpm_max: calibration.rpm_max(),
            per_rpm_noise: calibration.per_rpm_noise(),
        }
    }
}

/// Everything a running job touches
#[derive(Clone)]
struct Services {
    store: Arc<dyn JobStore>,
    cache: Arc<dyn ModelCache>,
    filters: Arc<FilterBankCache>,
}

pub struct Orchestrator {
    services: Services,
    in_flight: Arc<Mutex<HashSet<u64>>>,
    pool: WorkerPool,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn JobStore>, cache: Arc<dyn ModelCache>, workers: usize) -> Self {
        Self::with_filters(store, cache, Arc::new(FilterBankCache::new()), workers)
    }

    /// Share a filter-design cache with other orchestrators or callers
    pub fn with_filters(
        store: Arc<dyn JobStore>,
        cache: Arc<dyn ModelCache>,
        filters: Arc<FilterBankCache>,
        workers: usize,
    ) -> Self {
        Self {
            services: Services { store, cache, filters },
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            pool: WorkerPool::new(workers),
        }
    }

    pub fn store(&self) -> &dyn JobStore {
        self.services.store.as_ref()
    }

    /// Ensure a job exists for this batch and target and start it if pending.
    ///
    /// Structural batch errors and invalid parameters are returned directly;
    /// no job row is created for them.
    pub fn request(
        &self,
        root: &Path,
        target: Target,
        params: &CalibrationParams,
    ) -> Result<CalibJob> {
        self.open(root, target, params, false)
    }

    /// Like [`request`](Self::request), but a failed job is replaced by a fresh row
    pub fn retry(
        &self,
        root: &Path,
        target: Target,
        params: &CalibrationParams,
    ) -> Result<CalibJob> {
        self.open(root, target, params, true)
    }

    fn open(
        &self,
        root: &Path,
        target: Target,
        params: &CalibrationParams,
        retry: bool,
    ) -> Result<CalibJob> {
        params.validate()?;
        let batch = AudioBatch::scan(root)?;
        if target == Target::Model {
            batch.require_sweep()?;
        }
        let (record, registration) = self
            .services
            .store
            .register_batch(&batch.content_hash, &batch.root)?;
        debug!(hash = %record.hash, ?registration, "batch registered");

        let key = JobKey {
            batch_hash: batch.content_hash.clone(),
            target,
            params_hash: params.params_hash()?,
            code_version: CODE_VERSION.to_string(),
        };
        let job = if retry {
            self.services.store.retry_job(&key)?
        } else {
            self.services.store.ensure_job(&key)?
        };
        if job.status == JobStatus::Pending {
            self.submit(&job, batch, params.clone());
        }
        Ok(job)
    }

    pub fn is_in_flight(&self, id: u64) -> bool {
        self.in_flight.lock().map(|s| s.contains(&id)).unwrap_or(false)
    }

    /// Queue `job` unless it is already in flight. Returns true if queued.
    fn submit(&self, job: &CalibJob, batch: AudioBatch, params: CalibrationParams) -> bool {
        let id = job.id;
        {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
            if !in_flight.insert(id) {
                debug!(job = id, "already in flight");
                return false;
            }
        }

        let services = self.services.clone();
        let in_flight = Arc::clone(&self.in_flight);
        let key = job.key.clone();
        let queued = self.pool.execute(move || {
            execute(&services, id, &key, &batch, &params);
            in_flight.lock().unwrap_or_else(|p| p.into_inner()).remove(&id);
        });

        if !queued {
            warn!(job = id, "worker pool unavailable");
            if let Err(e) = self.services.store.set_failed(id, "worker pool unavailable".into()) {
                warn!(job = id, error = %e, "could not record job failure");
            }
            self.in_flight.lock().unwrap_or_else(|p| p.into_inner()).remove(&id);
        }
        queued
    }

    pub fn status(&self, id: u64) -> Result<CalibJob> {
        self.services.store.get(id)
    }

    /// Poll until the job reaches a terminal status or `timeout` elapses,
    /// returning the last observed row either way
    pub fn wait(&self, id: u64, timeout: Duration) -> Result<CalibJob> {
        let deadline = Instant::now() + timeout;
        loop {
            let job = self.status(id)?;
            if job.status.is_terminal() || Instant::now() >= deadline {
                return Ok(job);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

/// Worker body: run the job, record the outcome, never unwind
fn execute(
    services: &Services,
    id: u64,
    key: &JobKey,
    batch: &AudioBatch,
    params: &CalibrationParams,
) {
    if let Err(e) = services.store.set_running(id) {
        warn!(job = id, error = %e, "could not mark job running");
        return;
    }
    info!(job = id, target = key.target.as_str(), batch = %key.batch_hash, "job started");
    let started = Instant::now();

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| run(services, key, batch, params)));
    let result = match outcome {
        Ok(result) => result.map_err(|e| e.to_string()),
        Err(payload) => Err(format!("panic: {}", panic_message(payload.as_ref()))),
    };

    let recorded = match result {
        Ok(summary) => {
            let elapsed_ms = started.elapsed().as_millis() as u64;
            info!(job = id, elapsed_ms, "job succeeded");
            services.store.set_success(id, summary)
        }
        Err(message) => {
            warn!(job = id, error = %message, "job failed");
            services.store.set_failed(id, message)
        }
    };
    if let Err(e) = recorded {
        warn!(job = id, error = %e, "could not record job outcome");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn run(
    services: &Services,
    key: &JobKey,
    batch: &AudioBatch,
    params: &CalibrationParams,
) -> Result<Summary> {
    let cache_key = CacheKey::for_job(key);
    let calib_key = cache_key.with_target(Target::Calibration);
    let cached = cached_calibration(services, &calib_key)?;
    let fresh = cached.is_none();
    let calibration = match cached {
        Some(calibration) => calibration,
        None => calibrate(batch, params, &services.filters)?,
    };

    let model = match key.target {
        Target::Model => pending_model(services, &cache_key, batch, &calibration, params)?,
        Target::Calibration => None,
    };

    // cache writes only once every stage has succeeded
    let summary = Summary::from_calibration(&calibration);
    if fresh {
        let doc = CalibrationDocument {
            provenance: Provenance::new(&calib_key.data_hash, &calib_key.params_hash),
            calibration,
        };
        store_document(services.cache.as_ref(), &calib_key, &doc)?;
    }
    if let Some(doc) = model {
        store_document(services.cache.as_ref(), &cache_key, &doc)?;
    }
    Ok(summary)
}

/// Calibration from the cache, if a current one exists
fn cached_calibration(services: &Services, key: &CacheKey) -> Result<Option<Calibration>> {
    let cached: Option<CalibrationDocument> = load_document(services.cache.as_ref(), key)?;
    match cached {
        Some(doc) if !doc.provenance.is_stale(&key.data_hash, &key.params_hash) => {
            info!(key = %key.digest(), "calibration cache hit");
            Ok(Some(doc.calibration))
        }
        Some(_) => {
            warn!(key = %key.digest(), "stale calibration in cache, recomputing");
            Ok(None)
        }
        None => Ok(None),
    }
}

/// A freshly built model document, or `None` when the cache already holds a current one
fn pending_model(
    services: &Services,
    key: &CacheKey,
    batch: &AudioBatch,
    calibration: &Calibration,
    params: &CalibrationParams,
) -> Result<Option<ModelDocument>> {
    let cached: Option<ModelDocument> = load_document(services.cache.as_ref(), key)?;
    if let Some(doc) = cached {
        if !doc.provenance.is_stale(&key.data_hash, &key.params_hash) {
            info!(key = %key.digest(), "model cache hit");
            return Ok(None);
        }
    }
    let model = build_model(batch, calibration, params, &services.filters)?;
    Ok(Some(ModelDocument {
        provenance: Provenance::new(&key.data_hash, &key.params_hash),
        model,
    }))
}
