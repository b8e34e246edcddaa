// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Result cache for operator invocations
//!
//! Key = blake3(descriptor JSON) + blake3(input column values, row by row).
//! The same operator configuration applied to the same input cells replays its
//! stored columns instead of running again. Replaying writes columns with
//! replace-in-place semantics, so a re-run never duplicates a column.

use crate::dataset::Dataset;
use crate::error::Result;
use crate::operator::{OperatorDescriptor, RowError};
use crate::settings::Settings;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Columns and row errors produced by one invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResult {
    pub columns: Vec<(String, Vec<Value>)>,
    pub row_errors: Vec<RowError>,
}

impl CachedResult {
    /// Capture `names` out of an operator's output dataset
    pub fn capture(dataset: &Dataset, names: &[String], row_errors: Vec<RowError>) -> Option<Self> {
        let columns = names
            .iter()
            .map(|name| Some((name.clone(), dataset.column(name)?.cloned().collect())))
            .collect::<Option<Vec<_>>>()?;
        Some(Self {
            columns,
            row_errors,
        })
    }

    /// Write the stored columns onto `dataset`
    pub fn replay(&self, dataset: &Dataset) -> Result<Dataset> {
        let mut out = dataset.clone();
        for (name, values) in &self.columns {
            out = out.with_column(name.clone(), values.clone())?;
        }
        Ok(out)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|(n, _)| n.clone()).collect()
    }
}

/// Cache key derived from operator configuration and input cells
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(descriptor: &OperatorDescriptor, dataset: &Dataset, inputs: &[String]) -> Result<Self> {
        let descriptor_hash = blake3::hash(descriptor.to_json()?.as_bytes());

        let mut hasher = blake3::Hasher::new();
        hasher.update(&(dataset.num_rows() as u64).to_le_bytes());
        for row in dataset.rows() {
            for name in inputs {
                hasher.update(name.as_bytes());
                hasher.update(&[0]);
                let cell = row.get(name).unwrap_or(&Value::Null);
                hasher.update(serde_json::to_string(cell)?.as_bytes());
                hasher.update(&[0]);
            }
        }
        let input_hash = hasher.finalize();

        Ok(Self(format!(
            "{}{}",
            &hex::encode(descriptor_hash.as_bytes())[..32],
            &hex::encode(input_hash.as_bytes())[..32]
        )))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// In-memory result cache with an optional write-through disk layer
pub struct ResultCache {
    cache: Cache<CacheKey, Arc<CachedResult>>,
    disk_dir: Option<PathBuf>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl ResultCache {
    /// Create a new cache with specified TTL in seconds
    pub fn new(ttl_secs: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(10_000)
            .time_to_live(Duration::from_secs(ttl_secs))
            .build();

        Self {
            cache,
            disk_dir: None,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Cache configured from settings; `None` when caching is disabled
    pub fn from_settings(settings: &Settings) -> Result<Option<Self>> {
        if !settings.cache_enabled {
            return Ok(None);
        }
        let mut cache = Self::new(settings.cache_ttl_secs);
        if let Some(dir) = &settings.cache_dir {
            cache = cache.with_disk_dir(dir.clone())?;
        }
        Ok(Some(cache))
    }

    pub fn with_disk_dir(mut self, dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        self.disk_dir = Some(dir);
        Ok(self)
    }

    pub async fn get(&self, key: &CacheKey) -> Option<Arc<CachedResult>> {
        if let Some(result) = self.cache.get(key).await {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(result);
        }

        if let Some(result) = self.read_disk(key).await {
            let result = Arc::new(result);
            self.cache.insert(key.clone(), Arc::clone(&result)).await;
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(result);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub async fn set(&self, key: CacheKey, value: CachedResult) {
        if let Some(path) = self.disk_path(&key) {
            match serde_json::to_vec(&value) {
                Ok(bytes) => {
                    if let Err(e) = tokio::fs::write(&path, bytes).await {
                        warn!("Failed to write cache entry {}: {}", path.display(), e);
                    }
                }
                Err(e) => warn!("Failed to encode cache entry: {}", e),
            }
        }
        self.cache.insert(key, Arc::new(value)).await;
    }

    async fn read_disk(&self, key: &CacheKey) -> Option<CachedResult> {
        let path = self.disk_path(key)?;
        let bytes = tokio::fs::read(&path).await.ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(result) => {
                debug!("Loaded cache entry from {}", path.display());
                Some(result)
            }
            Err(e) => {
                warn!("Ignoring corrupt cache entry {}: {}", path.display(), e);
                None
            }
        }
    }

    fn disk_path(&self, key: &CacheKey) -> Option<PathBuf> {
        self.disk_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.json", key.as_str())))
    }

    /// Clear the in-memory layer
    pub async fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
    }

    /// Complete pending maintenance; disk writes are already eager
    pub async fn flush(&self) {
        self.cache.run_pending_tasks().await;
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        CacheStats {
            hits,
            misses,
            hit_rate: if total > 0 {
                hits as f64 / total as f64
            } else {
                0.0
            },
            entry_count: self.cache.entry_count(),
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub entry_count: u64,
}
