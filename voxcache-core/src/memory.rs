//! On-disk memoization of function outputs keyed by argument digests.
//!
//! Entries live at `<location>/<function dir>/<digest>/output.json`, with a
//! `metadata.json` sibling describing when and how the entry was computed.
//! The function directory is the function id made path-safe, suffixed with
//! a short hash of the raw id so distinct ids never share a directory.
//! The key strategy is injected as an [`ArgumentHasher`].

use crate::config::MemoryConfig;
use crate::error::MemoryError;
use crate::hashing::{Argument, ArgumentHasher, CacheKey, MemoizedFunction, cache_key};
use crate::persistence::{atomic_write_json, load_json};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

const OUTPUT_FILE: &str = "output.json";
const METADATA_FILE: &str = "metadata.json";

/// Hit and miss counts of a [`Memory`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub hits: u64,
    pub misses: u64,
}

impl MemoryStats {
    /// Fraction of lookups served from disk (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Description of a stored entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub function_id: String,
    pub digest: String,
    pub algorithm: String,
    pub created_at: DateTime<Utc>,
    pub compute_secs: f64,
}

#[derive(Debug)]
pub struct Memory {
    location: PathBuf,
    hasher: Arc<dyn ArgumentHasher>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Memory {
    pub fn new(location: impl Into<PathBuf>, hasher: Arc<dyn ArgumentHasher>) -> Self {
        Self {
            location: location.into(),
            hasher,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &MemoryConfig, hasher: Arc<dyn ArgumentHasher>) -> Self {
        Self::new(config.location.clone(), hasher)
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Cache key of a call, without touching the store.
    pub fn key(
        &self,
        func: &MemoizedFunction,
        args: &[Argument],
        kwargs: &BTreeMap<String, Argument>,
    ) -> Result<CacheKey, MemoryError> {
        Ok(cache_key(self.hasher.as_ref(), func, args, kwargs)?)
    }

    /// Directory holding every entry of `func`.
    pub fn function_dir(&self, func: &MemoizedFunction) -> PathBuf {
        self.location.join(function_dir_name(func.function_id()))
    }

    fn entry_dir(&self, key: &CacheKey) -> PathBuf {
        self.location
            .join(function_dir_name(&key.function_id))
            .join(key.args_digest.to_hex())
    }

    /// Stored output for `key`, if any.
    pub fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Result<Option<T>, MemoryError> {
        let path = self.entry_dir(key).join(OUTPUT_FILE);
        load_json(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::InvalidData => MemoryError::CorruptEntry {
                path,
                message: e.to_string(),
            },
            _ => MemoryError::Io(e),
        })
    }

    /// Return the stored output of `func(args, kwargs)`, computing and
    /// storing it with `compute` on a miss.
    pub fn call<T, F>(
        &self,
        func: &MemoizedFunction,
        args: &[Argument],
        kwargs: &BTreeMap<String, Argument>,
        compute: F,
    ) -> Result<T, MemoryError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> T,
    {
        self.try_call(func, args, kwargs, || Ok::<T, MemoryError>(compute()))
    }

    /// [`Memory::call`] for fallible computations. Failed computations are
    /// not stored.
    pub fn try_call<T, E, F>(
        &self,
        func: &MemoizedFunction,
        args: &[Argument],
        kwargs: &BTreeMap<String, Argument>,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<MemoryError>,
        F: FnOnce() -> Result<T, E>,
    {
        let key = self.key(func, args, kwargs)?;

        match self.get(&key) {
            Ok(Some(output)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Memory hit");
                return Ok(output);
            }
            Ok(None) => {}
            Err(MemoryError::CorruptEntry { path, message }) => {
                warn!(path = %path.display(), error = %message, "Discarding corrupt cache entry");
            }
            Err(e) => return Err(e.into()),
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, "Memory miss, computing");
        let start = Instant::now();
        let output = compute()?;
        let compute_secs = start.elapsed().as_secs_f64();

        let dir = self.entry_dir(&key);
        atomic_write_json(&dir.join(OUTPUT_FILE), &output).map_err(MemoryError::Io)?;
        let metadata = EntryMetadata {
            function_id: key.function_id.clone(),
            digest: key.args_digest.to_hex(),
            algorithm: key.args_digest.algorithm.to_string(),
            created_at: Utc::now(),
            compute_secs,
        };
        atomic_write_json(&dir.join(METADATA_FILE), &metadata).map_err(MemoryError::Io)?;
        Ok(output)
    }

    /// Metadata of a stored entry, if any.
    pub fn metadata(&self, key: &CacheKey) -> Result<Option<EntryMetadata>, MemoryError> {
        Ok(load_json(&self.entry_dir(key).join(METADATA_FILE))?)
    }

    /// Remove every stored entry of `func`. Returns how many were removed.
    pub fn clear(&self, func: &MemoizedFunction) -> Result<usize, MemoryError> {
        let dir = self.function_dir(func);
        if !dir.exists() {
            return Ok(0);
        }
        let count = std::fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .count();
        std::fs::remove_dir_all(&dir)?;
        info!(function = func.function_id(), entries = count, "Cleared memoized outputs");
        Ok(count)
    }
}

/// Single path component for `function_id`: readable characters kept, the
/// rest replaced by `_`, then `-` and 16 hex digits of the id's blake3 hash.
fn function_dir_name(function_id: &str) -> String {
    let readable: String = function_id
        .chars()
        .map(|c| match c {
            c if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') => c,
            _ => '_',
        })
        .collect();
    let hash = blake3::hash(function_id.as_bytes()).to_hex();
    format!("{readable}-{}", &hash[..16])
}
