//! Parquet persistence for cache entries.
//!
//! Layout: `{dir}/source={SOURCE}/{ENTITY}-{PARAMS_HASH}.parquet` plus a
//! `.meta.json` sidecar carrying coverage, retrieval time and TTL.
//!
//! - Atomic writes (write to .tmp, rename into place)
//! - Integrity validation on load (columns, row count matches sidecar)
//! - Corrupt snapshots are quarantined (`.quarantined`) and ignored

use chrono::{DateTime, Duration, Utc};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use super::cache::{CacheEntry, CacheKey};
use super::provider::DataError;
use crate::domain::{Frequency, Observation, TimeRange, TimeSeries, TimeZoneTag};

/// Metadata sidecar for one persisted entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub source: String,
    pub entity: String,
    pub params: String,
    pub frequency: Frequency,
    pub timezone: TimeZoneTag,
    pub covered: Vec<TimeRange>,
    pub retrieved_at: DateTime<Utc>,
    pub ttl_secs: i64,
    pub row_count: usize,
    pub data_hash: String,
}

#[derive(Debug, Clone)]
pub struct ParquetStore {
    dir: PathBuf,
}

impl ParquetStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn source_dir(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("source={}", key.source))
    }

    fn stem(key: &CacheKey) -> String {
        let params_hash = blake3::hash(key.params.as_bytes()).to_hex();
        format!("{}-{}", key.entity, &params_hash.as_str()[..12])
    }

    fn data_path(&self, key: &CacheKey) -> PathBuf {
        self.source_dir(key).join(format!("{}.parquet", Self::stem(key)))
    }

    fn meta_path(&self, key: &CacheKey) -> PathBuf {
        self.source_dir(key).join(format!("{}.meta.json", Self::stem(key)))
    }

    pub fn save(&self, key: &CacheKey, entry: &CacheEntry) -> Result<(), DataError> {
        let dir = self.source_dir(key);
        fs::create_dir_all(&dir)
            .map_err(|e| DataError::Persistence(format!("failed to create dir: {e}")))?;

        let df = series_to_dataframe(&entry.series)?;
        let path = self.data_path(key);
        let tmp_path = path.with_extension("parquet.tmp");
        write_parquet(&df, &tmp_path)?;
        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            DataError::Persistence(format!("atomic rename failed: {e}"))
        })?;

        let meta = SnapshotMeta {
            source: key.source.to_string(),
            entity: key.entity.to_string(),
            params: key.params.clone(),
            frequency: entry.series.frequency(),
            timezone: entry.series.timezone(),
            covered: entry.covered.clone(),
            retrieved_at: entry.retrieved_at,
            ttl_secs: entry.ttl.num_seconds(),
            row_count: entry.series.len(),
            data_hash: series_hash(&entry.series)?,
        };
        let meta_json = serde_json::to_string_pretty(&meta)
            .map_err(|e| DataError::Persistence(format!("meta serialization: {e}")))?;
        let meta_path = self.meta_path(key);
        let meta_tmp = meta_path.with_extension("json.tmp");
        fs::write(&meta_tmp, meta_json)
            .map_err(|e| DataError::Persistence(format!("meta write: {e}")))?;
        fs::rename(&meta_tmp, &meta_path)
            .map_err(|e| DataError::Persistence(format!("meta rename: {e}")))?;
        Ok(())
    }

    /// Load the entry for `key`. `Ok(None)` when nothing is persisted.
    pub fn load(&self, key: &CacheKey) -> Result<Option<CacheEntry>, DataError> {
        let meta_path = self.meta_path(key);
        let data_path = self.data_path(key);
        if !meta_path.exists() || !data_path.exists() {
            return Ok(None);
        }

        let meta: SnapshotMeta = fs::read_to_string(&meta_path)
            .map_err(|e| DataError::Persistence(format!("meta read: {e}")))
            .and_then(|s| {
                serde_json::from_str(&s)
                    .map_err(|e| DataError::Persistence(format!("meta parse: {e}")))
            })?;

        match load_and_validate(&data_path, key, &meta) {
            Ok(series) => Ok(Some(CacheEntry {
                series,
                covered: meta.covered,
                retrieved_at: meta.retrieved_at,
                ttl: Duration::seconds(meta.ttl_secs),
            })),
            Err(e) => {
                let quarantine = data_path.with_extension("parquet.quarantined");
                warn!(path = %data_path.display(), error = %e, "quarantining corrupt cache snapshot");
                let _ = fs::rename(&data_path, &quarantine);
                let _ = fs::remove_file(&meta_path);
                Ok(None)
            }
        }
    }

    pub fn remove(&self, key: &CacheKey) -> Result<(), DataError> {
        for path in [self.data_path(key), self.meta_path(key)] {
            if path.exists() {
                fs::remove_file(&path)
                    .map_err(|e| DataError::Persistence(format!("remove {}: {e}", path.display())))?;
            }
        }
        Ok(())
    }
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

fn series_hash(series: &TimeSeries) -> Result<String, DataError> {
    let bytes = serde_json::to_vec(series.points())
        .map_err(|e| DataError::Persistence(format!("hash serialization: {e}")))?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

fn series_to_dataframe(series: &TimeSeries) -> Result<DataFrame, DataError> {
    let ts: Vec<i64> = series.points().iter().map(|p| p.ts.timestamp_millis()).collect();
    let values: Vec<Option<f64>> = series.points().iter().map(|p| p.value).collect();

    DataFrame::new(vec![
        Column::new("ts_ms".into(), ts),
        Column::new("value".into(), values),
    ])
    .map_err(|e| DataError::Persistence(format!("dataframe creation: {e}")))
}

fn write_parquet(df: &DataFrame, path: &Path) -> Result<(), DataError> {
    let file = fs::File::create(path)
        .map_err(|e| DataError::Persistence(format!("create file: {e}")))?;
    ParquetWriter::new(file)
        .finish(&mut df.clone())
        .map_err(|e| DataError::Persistence(format!("write parquet: {e}")))?;
    Ok(())
}

fn load_and_validate(
    path: &Path,
    key: &CacheKey,
    meta: &SnapshotMeta,
) -> Result<TimeSeries, DataError> {
    let file =
        fs::File::open(path).map_err(|e| DataError::Persistence(format!("open: {e}")))?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| DataError::Persistence(format!("read: {e}")))?;

    if df.height() != meta.row_count {
        return Err(DataError::Persistence(format!(
            "row count {} does not match sidecar {}",
            df.height(),
            meta.row_count
        )));
    }

    let map_err = |e: PolarsError| DataError::Persistence(format!("column read: {e}"));
    let ts_ca = df.column("ts_ms").map_err(map_err)?.i64().map_err(map_err)?;
    let value_ca = df.column("value").map_err(map_err)?.f64().map_err(map_err)?;

    let mut points = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let ms = ts_ca
            .get(i)
            .ok_or_else(|| DataError::Persistence(format!("null timestamp at row {i}")))?;
        let ts = DateTime::<Utc>::from_timestamp_millis(ms)
            .ok_or_else(|| DataError::Persistence(format!("timestamp out of range at row {i}")))?;
        points.push(Observation {
            ts,
            value: value_ca.get(i),
        });
    }

    let series = TimeSeries::new(key.entity.clone(), meta.frequency, points)?
        .with_timezone(meta.timezone);
    if series_hash(&series)? != meta.data_hash {
        return Err(DataError::Persistence("data hash mismatch".into()));
    }
    Ok(series)
}
