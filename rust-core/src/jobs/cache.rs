//! Content-addressed artifact cache

use super::store::{JobKey, Target};
use crate::digest::sha256_hex;
use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub data_hash: String,
    pub params_hash: String,
    pub code_version: String,
    pub target: Target,
}

impl CacheKey {
    pub fn for_job(key: &JobKey) -> Self {
        Self {
            data_hash: key.batch_hash.clone(),
            params_hash: key.params_hash.clone(),
            code_version: key.code_version.clone(),
            target: key.target,
        }
    }

    /// Same inputs, different artifact
    pub fn with_target(&self, target: Target) -> Self {
        Self {
            target,
            ..self.clone()
        }
    }

    pub fn digest(&self) -> String {
        let joined = format!(
            "{}\n{}\n{}\n{}",
            self.data_hash,
            self.params_hash,
            self.code_version,
            self.target.as_str()
        );
        sha256_hex(joined.as_bytes())
    }

    pub fn file_name(&self) -> String {
        format!("{}-{}.json", self.target.as_str(), self.digest())
    }
}

/// Artifact storage. Entries are only ever written for completed work.
pub trait ModelCache: Send + Sync {
    fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>>;

    fn put(&self, key: &CacheKey, bytes: &[u8]) -> Result<()>;
}

pub fn load_document<T: DeserializeOwned>(
    cache: &dyn ModelCache,
    key: &CacheKey,
) -> Result<Option<T>> {
    match cache.get(key)? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

pub fn store_document<T: Serialize>(cache: &dyn ModelCache, key: &CacheKey, doc: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(doc)?;
    cache.put(key, &bytes)
}

#[derive(Default)]
pub struct MemoryModelCache {
    entries: Mutex<HashMap<CacheKey, Vec<u8>>>,
}

impl MemoryModelCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ModelCache for MemoryModelCache {
    fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &CacheKey, bytes: &[u8]) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.insert(key.clone(), bytes.to_vec());
        Ok(())
    }
}

/// One JSON file per key under a directory
pub struct FsModelCache {
    dir: PathBuf,
}

impl FsModelCache {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.file_name())
    }
}

impl ModelCache for FsModelCache {
    fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, key: &CacheKey, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        // readers never observe a partial file
        let tmp = path.with_extension(format!("json.tmp.{}", std::process::id()));
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        debug!(path = %path.display(), bytes = bytes.len(), "cache entry written");
        Ok(())
    }
}
