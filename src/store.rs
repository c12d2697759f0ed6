//! Historical-data cache abstraction.
//!
//! Supplements the spec: the original's `historical_cache.py`/
//! `historical_data_cache.py` persist append-only JSON-per-day rows pruned
//! to 30 days. Neither implementation is a precondition to planning — a
//! cold `InMemoryStore` produces a plan identically to a warm
//! `FilesystemStore` (design note in SPEC_FULL.md §6/§9).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

const RETENTION_DAYS: i64 = 30;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("historical store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("historical store serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HistoricalSample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

#[async_trait]
pub trait HistoricalStore: Send + Sync {
    async fn append(&self, series: &str, sample: HistoricalSample) -> Result<(), StoreError>;
    async fn read_recent(&self, series: &str, days: i64) -> Result<Vec<HistoricalSample>, StoreError>;
    async fn prune(&self, series: &str) -> Result<(), StoreError>;
}

/// Pure in-memory store; everything is lost on restart. Used for cold-start
/// planning and for tests.
#[derive(Default)]
pub struct InMemoryStore {
    series: RwLock<HashMap<String, Vec<HistoricalSample>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoricalStore for InMemoryStore {
    async fn append(&self, series: &str, sample: HistoricalSample) -> Result<(), StoreError> {
        self.series
            .write()
            .await
            .entry(series.to_string())
            .or_default()
            .push(sample);
        Ok(())
    }

    async fn read_recent(&self, series: &str, days: i64) -> Result<Vec<HistoricalSample>, StoreError> {
        let cutoff = Utc::now() - chrono::Duration::days(days);
        let guard = self.series.read().await;
        Ok(guard
            .get(series)
            .map(|v| v.iter().filter(|s| s.timestamp >= cutoff).copied().collect())
            .unwrap_or_default())
    }

    async fn prune(&self, series: &str) -> Result<(), StoreError> {
        let cutoff = Utc::now() - chrono::Duration::days(RETENTION_DAYS);
        if let Some(v) = self.series.write().await.get_mut(series) {
            v.retain(|s| s.timestamp >= cutoff);
        }
        Ok(())
    }
}

/// One JSON array file per series under `base_dir`, appended to and pruned
/// to `RETENTION_DAYS`. A single `RwLock` serialises access per process;
/// the file itself is not locked against other processes.
pub struct FilesystemStore {
    base_dir: PathBuf,
    lock: Arc<RwLock<()>>,
}

impl FilesystemStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            lock: Arc::new(RwLock::new(())),
        }
    }

    fn path_for(&self, series: &str) -> PathBuf {
        self.base_dir.join(format!("{series}.json"))
    }

    async fn load(&self, series: &str) -> Result<Vec<HistoricalSample>, StoreError> {
        let path = self.path_for(series);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, series: &str, samples: &[HistoricalSample]) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.base_dir).await?;
        let bytes = serde_json::to_vec(samples)?;
        tokio::fs::write(self.path_for(series), bytes).await?;
        Ok(())
    }
}

#[async_trait]
impl HistoricalStore for FilesystemStore {
    async fn append(&self, series: &str, sample: HistoricalSample) -> Result<(), StoreError> {
        let _guard = self.lock.write().await;
        let mut samples = self.load(series).await?;
        samples.push(sample);
        let cutoff = Utc::now() - chrono::Duration::days(RETENTION_DAYS);
        samples.retain(|s| s.timestamp >= cutoff);
        self.save(series, &samples).await
    }

    async fn read_recent(&self, series: &str, days: i64) -> Result<Vec<HistoricalSample>, StoreError> {
        let _guard = self.lock.read().await;
        let cutoff = Utc::now() - chrono::Duration::days(days);
        Ok(self
            .load(series)
            .await?
            .into_iter()
            .filter(|s| s.timestamp >= cutoff)
            .collect())
    }

    async fn prune(&self, series: &str) -> Result<(), StoreError> {
        let _guard = self.lock.write().await;
        let mut samples = self.load(series).await?;
        let cutoff = Utc::now() - chrono::Duration::days(RETENTION_DAYS);
        samples.retain(|s| s.timestamp >= cutoff);
        self.save(series, &samples).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_store_round_trips() {
        let store = InMemoryStore::new();
        store
            .append("soc", HistoricalSample { timestamp: Utc::now(), value: 42.0 })
            .await
            .unwrap();
        let recent = store.read_recent("soc", 1).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].value, 42.0);
    }

    #[tokio::test]
    async fn in_memory_store_filters_old_samples() {
        let store = InMemoryStore::new();
        let old = Utc::now() - chrono::Duration::days(40);
        store.append("soc", HistoricalSample { timestamp: old, value: 1.0 }).await.unwrap();
        store.append("soc", HistoricalSample { timestamp: Utc::now(), value: 2.0 }).await.unwrap();
        let recent = store.read_recent("soc", 30).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].value, 2.0);
    }

    #[tokio::test]
    async fn filesystem_store_persists_and_prunes() {
        let dir = std::env::temp_dir().join(format!("bess-planner-test-{}", uuid::Uuid::new_v4()));
        let store = FilesystemStore::new(&dir);
        store.append("soc", HistoricalSample { timestamp: Utc::now(), value: 5.0 }).await.unwrap();
        let recent = store.read_recent("soc", 1).await.unwrap();
        assert_eq!(recent.len(), 1);
        tokio::fs::remove_dir_all(&dir).await.ok();
    }
}
