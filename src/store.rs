//! Flat-file persistence for scan targets, transmissions and recordings.
//! Records are plain field maps so the schema stays external.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub type FieldMap = serde_json::Map<String, serde_json::Value>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("store serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    ScanTarget,
    Transmission,
    Recording,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StoredRecord {
    pub kind: RecordKind,
    pub id: Uuid,
    pub created_at: Timestamp,
    pub updated_at: Option<Timestamp>,
    pub fields: FieldMap,
}

/// Record persistence used by the scanner. Updating an id that was
/// never created inserts it, so callers don't have to order writes.
pub trait RecordStore: Send + Sync {
    fn create(&self, kind: RecordKind, id: Uuid, fields: FieldMap) -> Result<(), StoreError>;
    fn update(&self, kind: RecordKind, id: Uuid, fields: FieldMap) -> Result<(), StoreError>;
    fn query(&self, kind: RecordKind) -> Result<Vec<StoredRecord>, StoreError>;
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "snake_case")]
enum RowOp {
    Create,
    Update,
}

#[derive(Serialize, Deserialize, Debug)]
struct Row {
    op: RowOp,
    kind: RecordKind,
    id: Uuid,
    at: Timestamp,
    fields: FieldMap,
}

/// Append-only JSON lines store. Queries replay the log, folding
/// updates into their create rows.
pub struct JsonlStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlStore {
    pub fn new(path: PathBuf) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    fn append(&self, row: &Row) -> Result<(), StoreError> {
        let line = serde_json::to_string(row)?;
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    fn replay(&self) -> Result<Vec<StoredRecord>, StoreError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records: Vec<StoredRecord> = Vec::new();
        let mut index: HashMap<(RecordKind, Uuid), usize> = HashMap::new();
        for line in text.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let row: Row = match serde_json::from_str(line) {
                Ok(row) => row,
                Err(e) => {
                    eprintln!("skipping malformed store line: {e}");
                    continue;
                }
            };
            fold_row(&mut records, &mut index, row);
        }
        Ok(records)
    }
}

fn fold_row(
    records: &mut Vec<StoredRecord>,
    index: &mut HashMap<(RecordKind, Uuid), usize>,
    row: Row,
) {
    match index.get(&(row.kind, row.id)) {
        Some(&i) => {
            let record = &mut records[i];
            for (key, value) in row.fields {
                record.fields.insert(key, value);
            }
            if matches!(row.op, RowOp::Update) {
                record.updated_at = Some(row.at);
            }
        }
        None => {
            index.insert((row.kind, row.id), records.len());
            records.push(StoredRecord {
                kind: row.kind,
                id: row.id,
                created_at: row.at,
                updated_at: match row.op {
                    RowOp::Create => None,
                    RowOp::Update => Some(row.at),
                },
                fields: row.fields,
            });
        }
    }
}

impl RecordStore for JsonlStore {
    fn create(&self, kind: RecordKind, id: Uuid, fields: FieldMap) -> Result<(), StoreError> {
        self.append(&Row {
            op: RowOp::Create,
            kind,
            id,
            at: Timestamp::now(),
            fields,
        })
    }

    fn update(&self, kind: RecordKind, id: Uuid, fields: FieldMap) -> Result<(), StoreError> {
        self.append(&Row {
            op: RowOp::Update,
            kind,
            id,
            at: Timestamp::now(),
            fields,
        })
    }

    fn query(&self, kind: RecordKind) -> Result<Vec<StoredRecord>, StoreError> {
        Ok(self
            .replay()?
            .into_iter()
            .filter(|r| r.kind == kind)
            .collect())
    }
}

/// Keeps records in memory. Test stand-in for the JSONL store.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<StoredRecord>>,
}

#[cfg(test)]
impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
impl RecordStore for MemoryStore {
    fn create(&self, kind: RecordKind, id: Uuid, fields: FieldMap) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.push(StoredRecord {
            kind,
            id,
            created_at: Timestamp::now(),
            updated_at: None,
            fields,
        });
        Ok(())
    }

    fn update(&self, kind: RecordKind, id: Uuid, fields: FieldMap) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        match records.iter_mut().find(|r| r.kind == kind && r.id == id) {
            Some(record) => {
                for (key, value) in fields {
                    record.fields.insert(key, value);
                }
                record.updated_at = Some(Timestamp::now());
            }
            None => {
                records.push(StoredRecord {
                    kind,
                    id,
                    created_at: Timestamp::now(),
                    updated_at: Some(Timestamp::now()),
                    fields,
                });
            }
        }
        Ok(())
    }

    fn query(&self, kind: RecordKind) -> Result<Vec<StoredRecord>, StoreError> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        Ok(records.iter().filter(|r| r.kind == kind).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, serde_json::Value)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_memory_store_create_and_query() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        store
            .create(
                RecordKind::Transmission,
                id,
                fields(&[("frequency", 118000000.0.into())]),
            )
            .unwrap();

        let records = store.query(RecordKind::Transmission).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, id);
        assert!(store.query(RecordKind::Recording).unwrap().is_empty());
    }

    #[test]
    fn test_memory_store_update_merges_fields() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        store
            .create(
                RecordKind::Transmission,
                id,
                fields(&[("frequency", 118000000.0.into())]),
            )
            .unwrap();
        store
            .update(
                RecordKind::Transmission,
                id,
                fields(&[("duration", 4.5.into())]),
            )
            .unwrap();

        let records = store.query(RecordKind::Transmission).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].fields["frequency"], 118000000.0);
        assert_eq!(records[0].fields["duration"], 4.5);
        assert!(records[0].updated_at.is_some());
    }

    #[test]
    fn test_jsonl_store_replays_log() {
        let path = std::env::temp_dir().join(format!("bandscan-store-{}.jsonl", Uuid::new_v4()));
        let store = JsonlStore::new(path.clone()).unwrap();

        let id = Uuid::new_v4();
        store
            .create(
                RecordKind::Transmission,
                id,
                fields(&[("frequency", 145500000.0.into())]),
            )
            .unwrap();
        store
            .create(
                RecordKind::ScanTarget,
                Uuid::new_v4(),
                fields(&[("frequency", 118000000.0.into())]),
            )
            .unwrap();
        store
            .update(
                RecordKind::Transmission,
                id,
                fields(&[("duration", 2.0.into()), ("frequency", 145500000.0.into())]),
            )
            .unwrap();

        let transmissions = store.query(RecordKind::Transmission).unwrap();
        assert_eq!(transmissions.len(), 1);
        assert_eq!(transmissions[0].fields["duration"], 2.0);
        assert_eq!(store.query(RecordKind::ScanTarget).unwrap().len(), 1);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_jsonl_store_empty_when_missing() {
        let path = std::env::temp_dir().join(format!("bandscan-store-{}.jsonl", Uuid::new_v4()));
        let store = JsonlStore::new(path).unwrap();
        assert!(store.query(RecordKind::Transmission).unwrap().is_empty());
    }

    #[test]
    fn test_update_before_create_inserts() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        store
            .update(RecordKind::Recording, id, fields(&[("size", 44.into())]))
            .unwrap();
        let records = store.query(RecordKind::Recording).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, id);
    }
}
