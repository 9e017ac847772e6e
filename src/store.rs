use crate::error::{PipelineError, Result};
use crate::types::{CountyRecord, DateCaseRecord, DerivedCountyRecord, StateCaseRecord};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Address of one snapshot table: the series name plus the 8-digit stamp of
/// the day the snapshot was taken (the run date, not a data date).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotKey {
    pub series: String,
    pub stamp: String,
}

impl SnapshotKey {
    pub fn new(series: &str, run_date: NaiveDate) -> Self {
        Self {
            series: series.to_string(),
            stamp: run_date.format("%Y%m%d").to_string(),
        }
    }

    /// The persisted table identifier, `{series}{YYYYMMDD}`.
    pub fn table_name(&self) -> String {
        format!("{}{}", self.series, self.stamp)
    }
}

impl std::fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.table_name())
    }
}

/// Storage for dated table snapshots. Writes replace the whole table under
/// the key; reads of an absent key fail with `SnapshotNotFound`.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn write_state_table(&self, key: &SnapshotKey, rows: &[StateCaseRecord]) -> Result<()>;
    async fn read_state_table(&self, key: &SnapshotKey) -> Result<Vec<StateCaseRecord>>;

    async fn write_date_table(&self, key: &SnapshotKey, rows: &[DateCaseRecord]) -> Result<()>;
    async fn read_date_table(&self, key: &SnapshotKey) -> Result<Vec<DateCaseRecord>>;

    async fn write_county_table(&self, key: &SnapshotKey, rows: &[CountyRecord]) -> Result<()>;
    async fn read_county_table(&self, key: &SnapshotKey) -> Result<Vec<CountyRecord>>;

    async fn write_derived_county_table(
        &self,
        key: &SnapshotKey,
        rows: &[DerivedCountyRecord],
    ) -> Result<()>;
    async fn read_derived_county_table(
        &self,
        key: &SnapshotKey,
    ) -> Result<Vec<DerivedCountyRecord>>;

    /// Table names currently held, sorted. Snapshots are never deleted by
    /// the pipeline; this exists so an operator can prune externally.
    async fn list_tables(&self) -> Result<Vec<String>>;
}

/// In-memory snapshot store for development and testing.
pub struct InMemorySnapshotStore {
    tables: Arc<Mutex<HashMap<String, serde_json::Value>>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn put<T: Serialize>(&self, key: &SnapshotKey, rows: &[T]) -> Result<()> {
        let value = serde_json::to_value(rows)?;
        let mut tables = self.tables.lock().unwrap();
        tables.insert(key.table_name(), value);
        debug!("Wrote snapshot table {}", key);
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, key: &SnapshotKey) -> Result<Vec<T>> {
        let tables = self.tables.lock().unwrap();
        let value = tables
            .get(&key.table_name())
            .ok_or_else(|| PipelineError::SnapshotNotFound {
                key: key.table_name(),
            })?;
        Ok(serde_json::from_value(value.clone())?)
    }
}

impl Default for InMemorySnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn write_state_table(&self, key: &SnapshotKey, rows: &[StateCaseRecord]) -> Result<()> {
        self.put(key, rows)
    }

    async fn read_state_table(&self, key: &SnapshotKey) -> Result<Vec<StateCaseRecord>> {
        self.get(key)
    }

    async fn write_date_table(&self, key: &SnapshotKey, rows: &[DateCaseRecord]) -> Result<()> {
        self.put(key, rows)
    }

    async fn read_date_table(&self, key: &SnapshotKey) -> Result<Vec<DateCaseRecord>> {
        self.get(key)
    }

    async fn write_county_table(&self, key: &SnapshotKey, rows: &[CountyRecord]) -> Result<()> {
        self.put(key, rows)
    }

    async fn read_county_table(&self, key: &SnapshotKey) -> Result<Vec<CountyRecord>> {
        self.get(key)
    }

    async fn write_derived_county_table(
        &self,
        key: &SnapshotKey,
        rows: &[DerivedCountyRecord],
    ) -> Result<()> {
        self.put(key, rows)
    }

    async fn read_derived_county_table(
        &self,
        key: &SnapshotKey,
    ) -> Result<Vec<DerivedCountyRecord>> {
        self.get(key)
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let tables = self.tables.lock().unwrap();
        let mut names: Vec<String> = tables.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

/// Filesystem snapshot store: one JSON document per table under the root
/// directory. Writes land in a temp file first and rename into place, so a
/// failed run never leaves a half-written snapshot behind.
pub struct FsSnapshotStore {
    root: PathBuf,
}

impl FsSnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn table_path(&self, key: &SnapshotKey) -> PathBuf {
        self.root.join(format!("{}.json", key.table_name()))
    }

    fn put<T: Serialize>(&self, key: &SnapshotKey, rows: &[T]) -> Result<()> {
        fs::create_dir_all(&self.root)?;

        let path = self.table_path(key);
        let tmp_path = self.root.join(format!("{}.json.tmp", key.table_name()));
        let json_content = serde_json::to_string_pretty(&rows)?;
        fs::write(&tmp_path, json_content)?;
        fs::rename(&tmp_path, &path)?;

        debug!("Wrote snapshot table {} to {}", key, path.display());
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, key: &SnapshotKey) -> Result<Vec<T>> {
        let path = self.table_path(key);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PipelineError::SnapshotNotFound {
                    key: key.table_name(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&content)?)
    }
}

#[async_trait]
impl SnapshotStore for FsSnapshotStore {
    async fn write_state_table(&self, key: &SnapshotKey, rows: &[StateCaseRecord]) -> Result<()> {
        self.put(key, rows)
    }

    async fn read_state_table(&self, key: &SnapshotKey) -> Result<Vec<StateCaseRecord>> {
        self.get(key)
    }

    async fn write_date_table(&self, key: &SnapshotKey, rows: &[DateCaseRecord]) -> Result<()> {
        self.put(key, rows)
    }

    async fn read_date_table(&self, key: &SnapshotKey) -> Result<Vec<DateCaseRecord>> {
        self.get(key)
    }

    async fn write_county_table(&self, key: &SnapshotKey, rows: &[CountyRecord]) -> Result<()> {
        self.put(key, rows)
    }

    async fn read_county_table(&self, key: &SnapshotKey) -> Result<Vec<CountyRecord>> {
        self.get(key)
    }

    async fn write_derived_county_table(
        &self,
        key: &SnapshotKey,
        rows: &[DerivedCountyRecord],
    ) -> Result<()> {
        self.put(key, rows)
    }

    async fn read_derived_county_table(
        &self,
        key: &SnapshotKey,
    ) -> Result<Vec<DerivedCountyRecord>> {
        self.get(key)
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let file_name = entry?.file_name();
            if let Some(name) = file_name.to_str().and_then(|n| n.strip_suffix(".json")) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::CASES_BY_REPORT_DATE_SERIES;

    fn sample_rows() -> Vec<DateCaseRecord> {
        vec![
            DateCaseRecord {
                date: NaiveDate::from_ymd_opt(2020, 3, 1).unwrap(),
                n_cases: 3,
            },
            DateCaseRecord {
                date: NaiveDate::from_ymd_opt(2020, 3, 2).unwrap(),
                n_cases: 18,
            },
        ]
    }

    #[test]
    fn test_key_concatenates_series_and_stamp() {
        let key = SnapshotKey::new(
            CASES_BY_REPORT_DATE_SERIES,
            NaiveDate::from_ymd_opt(2020, 3, 5).unwrap(),
        );
        assert_eq!(key.table_name(), "cdc_cases_by_report_date20200305");
    }

    #[tokio::test]
    async fn test_in_memory_round_trip() {
        let store = InMemorySnapshotStore::new();
        let key = SnapshotKey::new(
            CASES_BY_REPORT_DATE_SERIES,
            NaiveDate::from_ymd_opt(2020, 3, 5).unwrap(),
        );

        store.write_date_table(&key, &sample_rows()).await.unwrap();
        let rows = store.read_date_table(&key).await.unwrap();

        assert_eq!(rows, sample_rows());
    }

    #[tokio::test]
    async fn test_read_of_absent_key_is_not_found() {
        let store = InMemorySnapshotStore::new();
        let key = SnapshotKey::new(
            CASES_BY_REPORT_DATE_SERIES,
            NaiveDate::from_ymd_opt(2020, 3, 5).unwrap(),
        );

        let err = store.read_date_table(&key).await.unwrap_err();
        assert!(matches!(err, PipelineError::SnapshotNotFound { .. }));
    }

    #[tokio::test]
    async fn test_write_overwrites_same_key() {
        let store = InMemorySnapshotStore::new();
        let key = SnapshotKey::new(
            CASES_BY_REPORT_DATE_SERIES,
            NaiveDate::from_ymd_opt(2020, 3, 5).unwrap(),
        );

        store.write_date_table(&key, &sample_rows()).await.unwrap();
        let replacement = vec![DateCaseRecord {
            date: NaiveDate::from_ymd_opt(2020, 3, 3).unwrap(),
            n_cases: 24,
        }];
        store.write_date_table(&key, &replacement).await.unwrap();

        let rows = store.read_date_table(&key).await.unwrap();
        assert_eq!(rows, replacement);
        assert_eq!(store.list_tables().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fs_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsSnapshotStore::new(dir.path());
        let key = SnapshotKey::new(
            CASES_BY_REPORT_DATE_SERIES,
            NaiveDate::from_ymd_opt(2020, 3, 5).unwrap(),
        );

        store.write_date_table(&key, &sample_rows()).await.unwrap();
        let rows = store.read_date_table(&key).await.unwrap();

        assert_eq!(rows, sample_rows());
        assert_eq!(
            store.list_tables().await.unwrap(),
            vec!["cdc_cases_by_report_date20200305".to_string()]
        );
    }
}
