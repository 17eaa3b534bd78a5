//! Record persistence, backup export and restore.
//!
//! A restore applies the baseline and the history independently. Each
//! part is fully parsed before anything is written, so a corrupt part is
//! rejected whole while the other part may still succeed.

use crate::core::report::{BaselineRecord, RecordBuilder, TestRecord};
use crate::core::result::{BaselineProfile, Domain, DomainResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Storage errors.
#[derive(Debug)]
pub enum StoreError {
    IoError(String),
    /// Stored or imported data could not be parsed
    Corrupt(String),
    SerializeError(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::IoError(e) => write!(f, "IO error: {e}"),
            StoreError::Corrupt(e) => write!(f, "Corrupt data: {e}"),
            StoreError::SerializeError(e) => write!(f, "Serialize error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Storage collaborator for test records and the baseline.
pub trait RecordStore {
    fn save_record(&mut self, record: TestRecord) -> Result<(), StoreError>;

    /// All stored records, oldest first.
    fn records(&self) -> Result<Vec<TestRecord>, StoreError>;

    /// Replace the whole history in a single write.
    fn replace_records(&mut self, records: Vec<TestRecord>) -> Result<(), StoreError>;

    fn save_baseline(&mut self, baseline: BaselineRecord) -> Result<(), StoreError>;

    /// The last stored baseline, if any.
    fn baseline(&self) -> Result<Option<BaselineRecord>, StoreError>;
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Vec<TestRecord>,
    baseline: Option<BaselineRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryStore {
    fn save_record(&mut self, record: TestRecord) -> Result<(), StoreError> {
        self.records.push(record);
        Ok(())
    }

    fn records(&self) -> Result<Vec<TestRecord>, StoreError> {
        Ok(self.records.clone())
    }

    fn replace_records(&mut self, records: Vec<TestRecord>) -> Result<(), StoreError> {
        self.records = records;
        Ok(())
    }

    fn save_baseline(&mut self, baseline: BaselineRecord) -> Result<(), StoreError> {
        self.baseline = Some(baseline);
        Ok(())
    }

    fn baseline(&self) -> Result<Option<BaselineRecord>, StoreError> {
        Ok(self.baseline.clone())
    }
}

/// JSON files under a data directory.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn records_path(&self) -> PathBuf {
        self.dir.join("records.json")
    }

    fn baseline_path(&self) -> PathBuf {
        self.dir.join("baseline.json")
    }

    fn read<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
        if !path.exists() {
            return Ok(None);
        }
        let content =
            std::fs::read_to_string(path).map_err(|e| StoreError::IoError(e.to_string()))?;
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| StoreError::Corrupt(format!("{}: {e}", path.display())))
    }

    /// Write through a temporary file so readers never see a partial file.
    fn write<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::IoError(e.to_string()))?;
        }
        let json = serde_json::to_string_pretty(value)
            .map_err(|e| StoreError::SerializeError(e.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| StoreError::IoError(e.to_string()))?;
        std::fs::rename(&tmp, path).map_err(|e| StoreError::IoError(e.to_string()))
    }
}

impl RecordStore for JsonFileStore {
    fn save_record(&mut self, record: TestRecord) -> Result<(), StoreError> {
        let mut records = self.records()?;
        records.push(record);
        Self::write(&self.records_path(), &records)
    }

    fn records(&self) -> Result<Vec<TestRecord>, StoreError> {
        Ok(Self::read(&self.records_path())?.unwrap_or_default())
    }

    fn replace_records(&mut self, records: Vec<TestRecord>) -> Result<(), StoreError> {
        Self::write(&self.records_path(), &records)
    }

    fn save_baseline(&mut self, baseline: BaselineRecord) -> Result<(), StoreError> {
        Self::write(&self.baseline_path(), &baseline)
    }

    fn baseline(&self) -> Result<Option<BaselineRecord>, StoreError> {
        Self::read(&self.baseline_path())
    }
}

/// Persist a session's domain results.
///
/// Scored results become one record each; the snapshot is attached to the
/// VISUAL record. Calibration payloads are merged into the stored
/// baseline instead. Returns the number of records written.
pub fn persist_results(
    store: &mut dyn RecordStore,
    builder: &RecordBuilder,
    results: &[DomainResult],
    snapshot: Option<&str>,
) -> Result<usize, StoreError> {
    let mut profile: Option<BaselineProfile> = None;
    let mut written = 0;
    for result in results {
        match result.raw {
            Some(raw) => {
                if profile.is_none() {
                    let stored = store.baseline()?.map(BaselineRecord::into_profile);
                    profile = Some(stored.unwrap_or_default());
                }
                if let Some(p) = profile.as_mut() {
                    p.apply(raw, result.completed_at);
                }
            }
            None => {
                let attached = match result.domain {
                    Domain::Visual => snapshot.map(str::to_string),
                    _ => None,
                };
                store.save_record(builder.build(result, attached))?;
                written += 1;
            }
        }
    }
    if let Some(profile) = profile {
        store.save_baseline(builder.baseline(&profile))?;
        info!("Baseline updated");
    }
    Ok(written)
}

/// Exported backup payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Backup {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline: Option<BaselineRecord>,
    #[serde(default)]
    pub history: Vec<TestRecord>,
    pub exported_at: DateTime<Utc>,
}

/// Collect everything in `store` into a backup.
pub fn export(store: &dyn RecordStore) -> Result<Backup, StoreError> {
    Ok(Backup {
        baseline: store.baseline()?,
        history: store.records()?,
        exported_at: Utc::now(),
    })
}

/// Outcome of restoring one part of a backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum PartOutcome {
    /// Part applied; the count is the number of items written.
    Applied(usize),
    Absent,
    Failed(String),
}

/// Per-part restore results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    pub baseline: PartOutcome,
    pub history: PartOutcome,
}

impl RestoreReport {
    pub fn is_complete(&self) -> bool {
        !matches!(self.baseline, PartOutcome::Failed(_))
            && !matches!(self.history, PartOutcome::Failed(_))
    }
}

/// Restore a backup document into `store`.
///
/// History records whose id is already stored are skipped.
pub fn restore(store: &mut dyn RecordStore, json: &str) -> Result<RestoreReport, StoreError> {
    let doc: serde_json::Value =
        serde_json::from_str(json).map_err(|e| StoreError::Corrupt(e.to_string()))?;
    let serde_json::Value::Object(mut doc) = doc else {
        return Err(StoreError::Corrupt("backup is not a JSON object".to_string()));
    };

    let baseline = match doc.remove("baseline") {
        None | Some(serde_json::Value::Null) => PartOutcome::Absent,
        Some(value) => match serde_json::from_value::<BaselineRecord>(value) {
            Ok(record) => match store.save_baseline(record) {
                Ok(()) => PartOutcome::Applied(1),
                Err(e) => PartOutcome::Failed(e.to_string()),
            },
            Err(e) => PartOutcome::Failed(format!("baseline: {e}")),
        },
    };

    let history = match doc.remove("history") {
        None | Some(serde_json::Value::Null) => PartOutcome::Absent,
        Some(value) => match serde_json::from_value::<Vec<TestRecord>>(value) {
            Ok(records) => import_history(store, records),
            Err(e) => PartOutcome::Failed(format!("history: {e}")),
        },
    };

    let report = RestoreReport { baseline, history };
    if report.is_complete() {
        info!("Restore complete: {:?}", report);
    } else {
        warn!("Restore partially failed: {:?}", report);
    }
    Ok(report)
}

/// Merge imported records into the stored history with one write, so a
/// failure leaves the history untouched.
fn import_history(store: &mut dyn RecordStore, records: Vec<TestRecord>) -> PartOutcome {
    let mut merged = match store.records() {
        Ok(stored) => stored,
        Err(e) => return PartOutcome::Failed(e.to_string()),
    };
    let mut seen: HashSet<String> = merged.iter().map(|r| r.id.clone()).collect();
    let before = merged.len();
    for record in records {
        if seen.insert(record.id.clone()) {
            merged.push(record);
        }
    }

    let applied = merged.len() - before;
    if applied == 0 {
        return PartOutcome::Applied(0);
    }
    match store.replace_records(merged) {
        Ok(()) => PartOutcome::Applied(applied),
        Err(e) => PartOutcome::Failed(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::result::{Baseline, VisualBaseline};
    use std::collections::BTreeSet;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("neuro-screen-store-{}", uuid::Uuid::new_v4()))
    }

    fn sample_record(score: u8) -> TestRecord {
        RecordBuilder::with_producer("test".into())
            .build(&DomainResult::new(Domain::Audio, score, BTreeSet::new()), None)
    }

    fn sample_baseline() -> BaselineRecord {
        BaselineRecord {
            visual: Some(VisualBaseline {
                eye: 96.0,
                brow: 97.0,
                mouth: 94.0,
            }),
            audio: None,
            touch: None,
            timestamp: 1_700_000_000_000,
        }
    }

    #[test]
    fn test_file_store_persists() {
        let dir = temp_dir();
        let mut store = JsonFileStore::new(&dir);
        assert!(store.records().unwrap().is_empty());
        assert!(store.baseline().unwrap().is_none());

        store.save_record(sample_record(80)).unwrap();
        store.save_record(sample_record(90)).unwrap();
        store.save_baseline(sample_baseline()).unwrap();

        let reopened = JsonFileStore::new(&dir);
        let records = reopened.records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].score, 90);
        assert_eq!(reopened.baseline().unwrap(), Some(sample_baseline()));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_export_then_restore_into_empty_store() {
        let mut source = MemoryStore::new();
        source.save_record(sample_record(75)).unwrap();
        source.save_baseline(sample_baseline()).unwrap();
        let json = serde_json::to_string(&export(&source).unwrap()).unwrap();

        let mut target = MemoryStore::new();
        let report = restore(&mut target, &json).unwrap();
        assert_eq!(report.baseline, PartOutcome::Applied(1));
        assert_eq!(report.history, PartOutcome::Applied(1));

        // Second restore skips known ids.
        let report = restore(&mut target, &json).unwrap();
        assert_eq!(report.history, PartOutcome::Applied(0));
        assert_eq!(target.records().unwrap().len(), 1);
    }

    /// Memory store that refuses writes once its budget is used up.
    struct LimitedStore {
        inner: MemoryStore,
        writes_left: usize,
    }

    impl LimitedStore {
        fn spend(&mut self) -> Result<(), StoreError> {
            if self.writes_left == 0 {
                return Err(StoreError::IoError("disk full".into()));
            }
            self.writes_left -= 1;
            Ok(())
        }
    }

    impl RecordStore for LimitedStore {
        fn save_record(&mut self, record: TestRecord) -> Result<(), StoreError> {
            self.spend()?;
            self.inner.save_record(record)
        }

        fn records(&self) -> Result<Vec<TestRecord>, StoreError> {
            self.inner.records()
        }

        fn replace_records(&mut self, records: Vec<TestRecord>) -> Result<(), StoreError> {
            self.spend()?;
            self.inner.replace_records(records)
        }

        fn save_baseline(&mut self, baseline: BaselineRecord) -> Result<(), StoreError> {
            self.spend()?;
            self.inner.save_baseline(baseline)
        }

        fn baseline(&self) -> Result<Option<BaselineRecord>, StoreError> {
            self.inner.baseline()
        }
    }

    fn history_backup(records: Vec<TestRecord>) -> String {
        serde_json::json!({ "history": records }).to_string()
    }

    #[test]
    fn test_history_import_is_a_single_write() {
        let records = vec![sample_record(60), sample_record(70), sample_record(80)];
        let mut store = LimitedStore {
            inner: MemoryStore::new(),
            writes_left: 1,
        };
        let report = restore(&mut store, &history_backup(records)).unwrap();
        assert_eq!(report.history, PartOutcome::Applied(3));
        assert_eq!(store.records().unwrap().len(), 3);
    }

    #[test]
    fn test_failed_history_write_leaves_history_untouched() {
        let mut inner = MemoryStore::new();
        inner.save_record(sample_record(50)).unwrap();
        let mut store = LimitedStore {
            inner,
            writes_left: 0,
        };
        let report = restore(
            &mut store,
            &history_backup(vec![sample_record(60), sample_record(70)]),
        )
        .unwrap();
        assert!(matches!(report.history, PartOutcome::Failed(_)));
        let records = store.records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].score, 50);
    }

    #[test]
    fn test_duplicate_ids_within_backup_imported_once() {
        let record = sample_record(60);
        let mut store = MemoryStore::new();
        let report = restore(&mut store, &history_backup(vec![record.clone(), record])).unwrap();
        assert_eq!(report.history, PartOutcome::Applied(1));
        assert_eq!(store.records().unwrap().len(), 1);
    }

    #[test]
    fn test_corrupt_history_does_not_block_baseline() {
        let json = serde_json::json!({
            "baseline": sample_baseline(),
            "history": [{"id": "a", "type": "AUDIO", "score": 80}, {"bogus": true}],
        })
        .to_string();

        let mut store = MemoryStore::new();
        let report = restore(&mut store, &json).unwrap();
        assert_eq!(report.baseline, PartOutcome::Applied(1));
        assert!(matches!(report.history, PartOutcome::Failed(_)));
        assert!(!report.is_complete());
        assert!(store.records().unwrap().is_empty());
        assert!(store.baseline().unwrap().is_some());
    }

    #[test]
    fn test_malformed_backup_rejected() {
        let mut store = MemoryStore::new();
        assert!(matches!(
            restore(&mut store, "{not json"),
            Err(StoreError::Corrupt(_))
        ));
        assert!(matches!(
            restore(&mut store, "[1, 2]"),
            Err(StoreError::Corrupt(_))
        ));
    }

    #[test]
    fn test_persist_results_splits_calibration() {
        let builder = RecordBuilder::with_producer("test".into());
        let mut store = MemoryStore::new();
        store.save_baseline(sample_baseline()).unwrap();

        let results = vec![
            DomainResult::new(Domain::Visual, 92, BTreeSet::new()),
            DomainResult::new(Domain::Audio, 70, BTreeSet::new()),
        ];
        let snapshot = Some("data:image/png;base64,AA");
        let written = persist_results(&mut store, &builder, &results, snapshot).unwrap();
        assert_eq!(written, 2);
        let records = store.records().unwrap();
        assert_eq!(records[0].snapshot.as_deref(), Some("data:image/png;base64,AA"));
        assert!(records[1].snapshot.is_none());

        let calibration = vec![DomainResult::calibration(
            Domain::Visual,
            Baseline::Visual(VisualBaseline {
                eye: 90.0,
                brow: 91.0,
                mouth: 92.0,
            }),
        )];
        assert_eq!(persist_results(&mut store, &builder, &calibration, None).unwrap(), 0);
        let baseline = store.baseline().unwrap().unwrap();
        assert_eq!(baseline.visual.map(|v| v.eye), Some(90.0));
        assert_eq!(store.records().unwrap().len(), 2);
    }

    #[test]
    fn test_corrupt_file_reported() {
        let dir = temp_dir();
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("records.json"), "{{{").unwrap();
        let store = JsonFileStore::new(&dir);
        assert!(matches!(store.records(), Err(StoreError::Corrupt(_))));
        std::fs::remove_dir_all(&dir).ok();
    }
}
