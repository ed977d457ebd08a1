//! Persistent shard storage.
//!
//! A logical dataset is a directory of per-peer shards:
//!
//! ```text
//! dataset/
//!   part-00000/
//!     segment.jsonl      one JSON record per line
//!     shard.meta.json    element type, record count, timestamps
//!   part-00001/
//!     ...
//! ```
//!
//! The segment is a single contiguous text file, so records can be served
//! straight out of one load; a line-offset index built at open time gives
//! row-addressed random reads. Re-opening a shard yields the same records
//! in the same order with the same field order.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::error::{StoreError, StoreResult};
use crate::shardlines::predicate::CompiledPredicate;
use crate::shardlines::values::{JsonObject, JsonValue};

const SEGMENT_FILE: &str = "segment.jsonl";
const META_FILE: &str = "shard.meta.json";
const ELEMENT_TYPE: &str = "jsonlines/object";

/// Directory of the shard owned by `rank` under a dataset root.
pub fn shard_dir(root: &Path, rank: u32) -> PathBuf {
    root.join(format!("part-{rank:05}"))
}

/// Number of `part-*` shard directories under a dataset root; 0 when the
/// root does not exist yet.
pub fn discover_shard_count(root: &Path) -> StoreResult<u32> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(StoreError::io(root, e)),
    };
    let mut count = 0;
    for entry in entries {
        let entry = entry.map_err(|e| StoreError::io(root, e))?;
        if entry.file_name().to_string_lossy().starts_with("part-") {
            count += 1;
        }
    }
    Ok(count)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ShardMeta {
    element_type: String,
    record_count: u64,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
}

impl ShardMeta {
    fn new() -> Self {
        let now = Utc::now();
        ShardMeta {
            element_type: ELEMENT_TYPE.to_string(),
            record_count: 0,
            created_at: now,
            modified_at: now,
        }
    }
}

enum Rows {
    /// Read-only: the loaded segment plus `(start, len)` per line.
    Loaded {
        segment: String,
        offsets: Vec<(usize, usize)>,
    },
    /// Overwrite: records kept in memory, mirrored to the segment writer.
    Building {
        records: Vec<JsonObject>,
        writer: BufWriter<File>,
    },
}

/// One peer's shard of a dataset, opened read-only or for overwrite.
pub struct ShardStore {
    dir: PathBuf,
    rank: u32,
    rows: Rows,
    meta: ShardMeta,
    filter: Option<CompiledPredicate>,
    dirty: bool,
}

impl ShardStore {
    /// Open this peer's shard for reading. A missing shard directory is an
    /// empty shard, so a cohort larger than the dataset still works.
    pub fn open_read_only(root: impl AsRef<Path>, rank: u32) -> StoreResult<Self> {
        let dir = shard_dir(root.as_ref(), rank);
        let segment_path = dir.join(SEGMENT_FILE);

        let segment = match fs::read_to_string(&segment_path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(StoreError::io(&segment_path, e)),
        };

        let mut offsets = Vec::new();
        let mut start = 0;
        for line in segment.split_inclusive('\n') {
            let trimmed = line.trim_end_matches(['\n', '\r']);
            if !trimmed.is_empty() {
                offsets.push((start, trimmed.len()));
            }
            start += line.len();
        }

        let meta = Self::read_meta(&dir, offsets.len() as u64)?;

        debug!(
            "opened shard '{}' read-only: {} records",
            dir.display(),
            offsets.len()
        );

        Ok(ShardStore {
            dir,
            rank,
            rows: Rows::Loaded { segment, offsets },
            meta,
            filter: None,
            dirty: false,
        })
    }

    /// Create (or truncate) this peer's shard for writing.
    pub fn create_overwrite(root: impl AsRef<Path>, rank: u32) -> StoreResult<Self> {
        let dir = shard_dir(root.as_ref(), rank);
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;

        let segment_path = dir.join(SEGMENT_FILE);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&segment_path)
            .map_err(|e| StoreError::io(&segment_path, e))?;

        debug!("created shard '{}' for overwrite", dir.display());

        Ok(ShardStore {
            dir,
            rank,
            rows: Rows::Building {
                records: Vec::new(),
                writer: BufWriter::new(file),
            },
            meta: ShardMeta::new(),
            filter: None,
            dirty: true,
        })
    }

    fn read_meta(dir: &Path, scanned_count: u64) -> StoreResult<ShardMeta> {
        let meta_path = dir.join(META_FILE);
        let text = match fs::read_to_string(&meta_path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let mut meta = ShardMeta::new();
                meta.record_count = scanned_count;
                return Ok(meta);
            }
            Err(e) => return Err(StoreError::io(&meta_path, e)),
        };
        let meta: ShardMeta = serde_json::from_str(&text)
            .map_err(|e| StoreError::metadata(&meta_path, e.to_string()))?;
        if meta.element_type != ELEMENT_TYPE {
            return Err(StoreError::metadata(
                &meta_path,
                format!("element type '{}' is not '{ELEMENT_TYPE}'", meta.element_type),
            ));
        }
        if meta.record_count != scanned_count {
            warn!(
                "shard '{}' metadata counts {} records, segment holds {}",
                dir.display(),
                meta.record_count,
                scanned_count
            );
        }
        Ok(meta)
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn rank(&self) -> u32 {
        self.rank
    }

    pub fn count_local(&self) -> u64 {
        match &self.rows {
            Rows::Loaded { offsets, .. } => offsets.len() as u64,
            Rows::Building { records, .. } => records.len() as u64,
        }
    }

    /// Install a selection predicate; iteration skips non-matching rows.
    pub fn set_filter(&mut self, predicate: CompiledPredicate) {
        self.filter = Some(predicate);
    }

    pub fn clear_filter(&mut self) {
        self.filter = None;
    }

    /// Row-addressed random read.
    pub fn at(&self, row_index: u64) -> StoreResult<JsonObject> {
        match &self.rows {
            Rows::Loaded { segment, offsets } => {
                let (start, len) =
                    *offsets
                        .get(row_index as usize)
                        .ok_or(StoreError::RowOutOfBounds {
                            row_index,
                            len: offsets.len() as u64,
                        })?;
                let line = &segment[start..start + len];
                serde_json::from_str(line).map_err(|e| StoreError::CorruptSegment {
                    path: self.dir.join(SEGMENT_FILE),
                    line: row_index + 1,
                    source: e,
                })
            }
            Rows::Building { records, .. } => records
                .get(row_index as usize)
                .cloned()
                .ok_or(StoreError::RowOutOfBounds {
                    row_index,
                    len: records.len() as u64,
                }),
        }
    }

    /// Visit every row that passes the installed filter, in row order.
    pub fn for_each_selected<E, F>(&self, mut visit: F) -> Result<(), E>
    where
        E: From<StoreError>,
        F: FnMut(u64, &JsonObject) -> Result<(), E>,
    {
        for row_index in 0..self.count_local() {
            let record = self.at(row_index)?;
            if let Some(filter) = &self.filter {
                let selected = filter
                    .eval(self.rank, row_index, &record)
                    .map_err(StoreError::from)?;
                if !selected {
                    continue;
                }
            }
            visit(row_index, &record)?;
        }
        Ok(())
    }

    /// Number of rows passing the installed filter.
    pub fn count_selected(&self) -> StoreResult<u64> {
        if self.filter.is_none() {
            return Ok(self.count_local());
        }
        let mut count = 0u64;
        self.for_each_selected::<StoreError, _>(|_, _| {
            count += 1;
            Ok(())
        })?;
        Ok(count)
    }

    /// Append one record to the local shard.
    pub fn append_local(&mut self, record: &JsonObject) -> StoreResult<()> {
        let segment_path = self.dir.join(SEGMENT_FILE);
        match &mut self.rows {
            Rows::Loaded { .. } => Err(StoreError::ReadOnly {
                path: self.dir.clone(),
            }),
            Rows::Building { records, writer } => {
                let line = serde_json::to_string(record).map_err(|e| {
                    StoreError::CorruptSegment {
                        path: segment_path.clone(),
                        line: records.len() as u64 + 1,
                        source: e,
                    }
                })?;
                writer
                    .write_all(line.as_bytes())
                    .and_then(|_| writer.write_all(b"\n"))
                    .map_err(|e| StoreError::io(&segment_path, e))?;
                records.push(record.clone());
                self.meta.record_count = records.len() as u64;
                self.meta.modified_at = Utc::now();
                self.dirty = true;
                Ok(())
            }
        }
    }

    /// Adapt a deserialized payload value into a record this store can
    /// append. Shipped rows cross the peer boundary as plain values; the
    /// receiving store owns the converted copy.
    pub fn import_record(&self, value: JsonValue) -> StoreResult<JsonObject> {
        match value {
            JsonValue::Object(record) => Ok(record),
            other => Err(StoreError::NotAnObject {
                found: other.type_name(),
            }),
        }
    }

    /// Flush the segment and persist metadata.
    pub fn flush(&mut self) -> StoreResult<()> {
        if let Rows::Building { writer, .. } = &mut self.rows {
            let segment_path = self.dir.join(SEGMENT_FILE);
            writer
                .flush()
                .map_err(|e| StoreError::io(&segment_path, e))?;
            let meta_path = self.dir.join(META_FILE);
            let text = serde_json::to_string_pretty(&self.meta)
                .map_err(|e| StoreError::metadata(&meta_path, e.to_string()))?;
            fs::write(&meta_path, text).map_err(|e| StoreError::io(&meta_path, e))?;
        }
        self.dirty = false;
        Ok(())
    }
}

impl Drop for ShardStore {
    fn drop(&mut self) {
        if self.dirty {
            if let Err(e) = self.flush() {
                warn!("shard '{}' flush on drop failed: {e}", self.dir.display());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn record(text: &str) -> JsonObject {
        serde_json::from_str(text).unwrap()
    }

    #[test]
    fn append_then_reopen_yields_identical_records() {
        let root = TempDir::new().unwrap();
        let rows = [
            r#"{"k": 1, "a": "x"}"#,
            r#"{"k": 2, "nested": {"b": [1, 2]}}"#,
        ];

        let mut store = ShardStore::create_overwrite(root.path(), 0).unwrap();
        for row in rows {
            store.append_local(&record(row)).unwrap();
        }
        store.flush().unwrap();
        drop(store);

        let reopened = ShardStore::open_read_only(root.path(), 0).unwrap();
        assert_eq!(reopened.count_local(), 2);
        for (i, row) in rows.iter().enumerate() {
            assert_eq!(reopened.at(i as u64).unwrap(), record(row));
        }
    }

    #[test]
    fn missing_shard_directory_is_an_empty_shard() {
        let root = TempDir::new().unwrap();
        let store = ShardStore::open_read_only(root.path(), 3).unwrap();
        assert_eq!(store.count_local(), 0);
        assert!(matches!(
            store.at(0),
            Err(StoreError::RowOutOfBounds { .. })
        ));
    }

    #[test]
    fn read_only_shard_rejects_appends() {
        let root = TempDir::new().unwrap();
        drop(ShardStore::create_overwrite(root.path(), 0).unwrap());
        let mut store = ShardStore::open_read_only(root.path(), 0).unwrap();
        assert!(matches!(
            store.append_local(&record("{}")),
            Err(StoreError::ReadOnly { .. })
        ));
    }

    #[test]
    fn filter_limits_iteration() {
        let root = TempDir::new().unwrap();
        let mut store = ShardStore::create_overwrite(root.path(), 0).unwrap();
        for i in 0..4 {
            store.append_local(&record(&format!(r#"{{"n": {i}}}"#))).unwrap();
        }
        store.flush().unwrap();
        drop(store);

        let mut store = ShardStore::open_read_only(root.path(), 0).unwrap();
        let predicate =
            CompiledPredicate::compile(&json!({">": [{"var": "keys.n"}, 1]})).unwrap();
        store.set_filter(predicate);

        assert_eq!(store.count_selected().unwrap(), 2);
        let mut seen = Vec::new();
        store
            .for_each_selected::<StoreError, _>(|row_index, _| {
                seen.push(row_index);
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, vec![2, 3]);
    }

    #[test]
    fn import_record_requires_an_object() {
        let root = TempDir::new().unwrap();
        let store = ShardStore::create_overwrite(root.path(), 0).unwrap();
        assert!(store.import_record(JsonValue::Object(record(r#"{"a": 1}"#))).is_ok());
        assert!(matches!(
            store.import_record(JsonValue::Int(4)),
            Err(StoreError::NotAnObject { found: "int" })
        ));
    }

    #[test]
    fn overwrite_truncates_previous_contents() {
        let root = TempDir::new().unwrap();
        let mut store = ShardStore::create_overwrite(root.path(), 0).unwrap();
        store.append_local(&record(r#"{"old": true}"#)).unwrap();
        store.flush().unwrap();
        drop(store);

        let mut store = ShardStore::create_overwrite(root.path(), 0).unwrap();
        store.append_local(&record(r#"{"new": true}"#)).unwrap();
        store.flush().unwrap();
        drop(store);

        let reopened = ShardStore::open_read_only(root.path(), 0).unwrap();
        assert_eq!(reopened.count_local(), 1);
        assert_eq!(reopened.at(0).unwrap(), record(r#"{"new": true}"#));
    }
}
