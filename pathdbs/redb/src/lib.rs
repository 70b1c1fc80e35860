//! RedbPathDb - a local `PathDb` backed by redb.

use anyhow::anyhow;
use chrono::{DateTime, TimeZone, Utc};
use minicbor::{Decode, Encode};
use pathmapped_core::db::apply_delta;
use pathmapped_core::{
    ChecksumEntry, EntryKey, FilesystemStats, PathDb, PathEntry, ReclaimEntry, StoreResult,
};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::collections::BTreeSet;
use std::{path::Path, sync::Arc};

/// `(filesystem, parent_path, filename) -> EntryRecord`
const ENTRIES: TableDefinition<(&str, &str, &str), &[u8]> = TableDefinition::new("entries");
/// `file_id -> ReverseRecord`
const REVERSE: TableDefinition<&str, &[u8]> = TableDefinition::new("reverse");
/// `checksum -> ChecksumRecord`
const CHECKSUMS: TableDefinition<&str, &[u8]> = TableDefinition::new("checksums");
/// `(partition, deletion_ms, file_id) -> ReclaimRecord`
const RECLAIMS: TableDefinition<(i32, i64, &str), &[u8]> = TableDefinition::new("reclaims");
/// `filesystem -> (file_count, size)`
const FILESYSTEMS: TableDefinition<&str, (u64, u64)> = TableDefinition::new("filesystems");

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct RedbPathDbConfig {
    /// Directory holding `pathdb.redb`.
    pub path: String,
}

#[derive(Debug, Encode, Decode)]
#[cbor(map)]
struct EntryRecord {
    #[n(0)]
    file_id: Option<String>,
    #[n(1)]
    creation_ms: i64,
    #[n(2)]
    expiration_ms: Option<i64>,
    #[n(3)]
    size: u64,
    #[n(4)]
    storage_location: Option<String>,
    #[n(5)]
    checksum: Option<String>,
}

#[derive(Debug, Encode, Decode)]
#[cbor(map)]
struct ReverseRecord {
    #[n(0)]
    references: Vec<String>,
}

#[derive(Debug, Encode, Decode)]
#[cbor(map)]
struct ChecksumRecord {
    #[n(0)]
    file_id: String,
    #[n(1)]
    storage_location: String,
}

#[derive(Debug, Encode, Decode)]
#[cbor(map)]
struct ReclaimRecord {
    #[n(0)]
    storage_location: String,
    #[n(1)]
    checksum: Option<String>,
}

fn encode<T: Encode<()>>(value: &T) -> StoreResult<Vec<u8>> {
    minicbor::to_vec(value).map_err(|e| anyhow!("cbor encode failed: {e}"))
}

fn decode<T: for<'b> Decode<'b, ()>>(bytes: &[u8]) -> StoreResult<T> {
    minicbor::decode(bytes).map_err(|e| anyhow!("cbor decode failed: {e}"))
}

fn from_millis(ms: i64) -> StoreResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| anyhow!("timestamp out of range: {ms}"))
}

fn entry_to_record(entry: &PathEntry) -> EntryRecord {
    EntryRecord {
        file_id: entry.file_id.clone(),
        creation_ms: entry.creation.timestamp_millis(),
        expiration_ms: entry.expiration.map(|e| e.timestamp_millis()),
        size: entry.size,
        storage_location: entry.storage_location.clone(),
        checksum: entry.checksum.clone(),
    }
}

fn record_to_entry(
    (filesystem, parent_path, filename): (&str, &str, &str),
    bytes: &[u8],
) -> StoreResult<PathEntry> {
    let rec: EntryRecord = decode(bytes)?;
    Ok(PathEntry {
        filesystem: filesystem.to_owned(),
        parent_path: parent_path.to_owned(),
        filename: filename.to_owned(),
        file_id: rec.file_id,
        creation: from_millis(rec.creation_ms)?,
        expiration: rec.expiration_ms.map(from_millis).transpose()?,
        size: rec.size,
        storage_location: rec.storage_location,
        checksum: rec.checksum,
    })
}

/// `PathDb` on a single redb file. Every call runs in its own transaction
/// on the blocking pool.
#[derive(Clone)]
pub struct RedbPathDb {
    db: Arc<Database>,
}

impl RedbPathDb {
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;
        let db = Database::create(path.join("pathdb.redb"))?;

        // Create every table up front so first reads on a fresh file succeed.
        {
            let write_txn = db.begin_write()?;
            {
                let _ = write_txn.open_table(ENTRIES)?;
                let _ = write_txn.open_table(REVERSE)?;
                let _ = write_txn.open_table(CHECKSUMS)?;
                let _ = write_txn.open_table(RECLAIMS)?;
                let _ = write_txn.open_table(FILESYSTEMS)?;
            }
            write_txn.commit()?;
        }

        Ok(Self { db: Arc::new(db) })
    }

    pub fn create(config: &RedbPathDbConfig) -> anyhow::Result<Self> {
        Self::open(&config.path)
    }

    async fn read<T, F>(&self, op: &'static str, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> StoreResult<T> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| anyhow!("redb {} task failed: {}", op, e))?
    }

    async fn write<T, F>(&self, op: &'static str, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&redb::WriteTransaction) -> StoreResult<T> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || -> StoreResult<T> {
            let write_txn = db.begin_write()?;
            let out = f(&write_txn)?;
            write_txn.commit()?;
            Ok(out)
        })
        .await
        .map_err(|e| anyhow!("redb {} task failed: {}", op, e))?
    }
}

impl std::fmt::Debug for RedbPathDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbPathDb").finish()
    }
}

#[async_trait::async_trait]
impl PathDb for RedbPathDb {
    async fn get_entry(&self, key: &EntryKey) -> StoreResult<Option<PathEntry>> {
        let key = key.clone();
        self.read("get_entry", move |db| {
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(ENTRIES)?;
            let k = (
                key.filesystem.as_str(),
                key.parent_path.as_str(),
                key.filename.as_str(),
            );
            table
                .get(k)?
                .map(|guard| record_to_entry(k, guard.value()))
                .transpose()
        })
        .await
    }

    async fn put_entry(&self, entry: PathEntry) -> StoreResult<()> {
        self.write("put_entry", move |txn| {
            let mut table = txn.open_table(ENTRIES)?;
            let bytes = encode(&entry_to_record(&entry))?;
            table.insert(
                (
                    entry.filesystem.as_str(),
                    entry.parent_path.as_str(),
                    entry.filename.as_str(),
                ),
                bytes.as_slice(),
            )?;
            Ok(())
        })
        .await
    }

    async fn delete_entry(&self, key: &EntryKey) -> StoreResult<bool> {
        let key = key.clone();
        self.write("delete_entry", move |txn| {
            let mut table = txn.open_table(ENTRIES)?;
            let removed = table
                .remove((
                    key.filesystem.as_str(),
                    key.parent_path.as_str(),
                    key.filename.as_str(),
                ))?
                .is_some();
            Ok(removed)
        })
        .await
    }

    async fn list_children(
        &self,
        filesystem: &str,
        parent_path: &str,
    ) -> StoreResult<Vec<PathEntry>> {
        let filesystem = filesystem.to_owned();
        let parent_path = parent_path.to_owned();
        self.read("list_children", move |db| {
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(ENTRIES)?;
            let mut out = Vec::new();
            for item in table.range((filesystem.as_str(), parent_path.as_str(), "")..)? {
                let (k, v) = item?;
                let key = k.value();
                if key.0 != filesystem || key.1 != parent_path {
                    break;
                }
                out.push(record_to_entry(key, v.value())?);
            }
            Ok(out)
        })
        .await
    }

    async fn count_children(&self, filesystem: &str, parent_path: &str) -> StoreResult<u64> {
        let filesystem = filesystem.to_owned();
        let parent_path = parent_path.to_owned();
        self.read("count_children", move |db| {
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(ENTRIES)?;
            let mut count = 0u64;
            for item in table.range((filesystem.as_str(), parent_path.as_str(), "")..)? {
                let (k, _) = item?;
                let key = k.value();
                if key.0 != filesystem || key.1 != parent_path {
                    break;
                }
                count += 1;
            }
            Ok(count)
        })
        .await
    }

    async fn filesystems_with(
        &self,
        parent_path: &str,
        filename: &str,
    ) -> StoreResult<Vec<String>> {
        let parent_path = parent_path.to_owned();
        let filename = filename.to_owned();
        self.read("filesystems_with", move |db| {
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(ENTRIES)?;
            let mut out = Vec::new();
            for item in table.iter()? {
                let (k, _) = item?;
                let (fs, parent, name) = k.value();
                if parent == parent_path && name == filename {
                    out.push(fs.to_owned());
                }
            }
            Ok(out)
        })
        .await
    }

    async fn get_reverse(&self, file_id: &str) -> StoreResult<Option<BTreeSet<String>>> {
        let file_id = file_id.to_owned();
        self.read("get_reverse", move |db| {
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(REVERSE)?;
            table
                .get(file_id.as_str())?
                .map(|guard| {
                    decode::<ReverseRecord>(guard.value())
                        .map(|r| r.references.into_iter().collect())
                })
                .transpose()
        })
        .await
    }

    async fn put_reverse(&self, file_id: &str, references: BTreeSet<String>) -> StoreResult<()> {
        let file_id = file_id.to_owned();
        self.write("put_reverse", move |txn| {
            let mut table = txn.open_table(REVERSE)?;
            let bytes = encode(&ReverseRecord {
                references: references.into_iter().collect(),
            })?;
            table.insert(file_id.as_str(), bytes.as_slice())?;
            Ok(())
        })
        .await
    }

    async fn delete_reverse(&self, file_id: &str) -> StoreResult<()> {
        let file_id = file_id.to_owned();
        self.write("delete_reverse", move |txn| {
            let mut table = txn.open_table(REVERSE)?;
            table.remove(file_id.as_str())?;
            Ok(())
        })
        .await
    }

    async fn get_checksum(&self, checksum: &str) -> StoreResult<Option<ChecksumEntry>> {
        let checksum = checksum.to_owned();
        self.read("get_checksum", move |db| {
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(CHECKSUMS)?;
            table
                .get(checksum.as_str())?
                .map(|guard| {
                    decode::<ChecksumRecord>(guard.value()).map(|r| ChecksumEntry {
                        checksum: checksum.clone(),
                        file_id: r.file_id,
                        storage_location: r.storage_location,
                    })
                })
                .transpose()
        })
        .await
    }

    async fn put_checksum(&self, entry: ChecksumEntry) -> StoreResult<()> {
        self.write("put_checksum", move |txn| {
            let mut table = txn.open_table(CHECKSUMS)?;
            let bytes = encode(&ChecksumRecord {
                file_id: entry.file_id,
                storage_location: entry.storage_location,
            })?;
            table.insert(entry.checksum.as_str(), bytes.as_slice())?;
            Ok(())
        })
        .await
    }

    async fn delete_checksum(&self, checksum: &str) -> StoreResult<()> {
        let checksum = checksum.to_owned();
        self.write("delete_checksum", move |txn| {
            let mut table = txn.open_table(CHECKSUMS)?;
            table.remove(checksum.as_str())?;
            Ok(())
        })
        .await
    }

    async fn enqueue_reclaim(&self, entry: ReclaimEntry) -> StoreResult<()> {
        self.write("enqueue_reclaim", move |txn| {
            let mut table = txn.open_table(RECLAIMS)?;
            let bytes = encode(&ReclaimRecord {
                storage_location: entry.storage_location.clone(),
                checksum: entry.checksum.clone(),
            })?;
            table.insert(
                (
                    entry.partition,
                    entry.deletion.timestamp_millis(),
                    entry.file_id.as_str(),
                ),
                bytes.as_slice(),
            )?;
            Ok(())
        })
        .await
    }

    async fn scan_reclaims(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<ReclaimEntry>> {
        let cutoff_ms = older_than.timestamp_millis();
        let limit = if limit == 0 { usize::MAX } else { limit };
        self.read("scan_reclaims", move |db| {
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(RECLAIMS)?;
            let mut out = Vec::new();
            for item in table.iter()? {
                if out.len() >= limit {
                    break;
                }
                let (k, v) = item?;
                let (partition, deletion_ms, file_id) = k.value();
                if deletion_ms >= cutoff_ms {
                    break;
                }
                let rec: ReclaimRecord = decode(v.value())?;
                out.push(ReclaimEntry {
                    partition,
                    deletion: from_millis(deletion_ms)?,
                    file_id: file_id.to_owned(),
                    storage_location: rec.storage_location,
                    checksum: rec.checksum,
                });
            }
            Ok(out)
        })
        .await
    }

    async fn remove_reclaim(&self, entry: &ReclaimEntry) -> StoreResult<()> {
        let partition = entry.partition;
        let deletion_ms = entry.deletion.timestamp_millis();
        let file_id = entry.file_id.clone();
        self.write("remove_reclaim", move |txn| {
            let mut table = txn.open_table(RECLAIMS)?;
            table.remove((partition, deletion_ms, file_id.as_str()))?;
            Ok(())
        })
        .await
    }

    async fn filesystem_stats(&self, filesystem: &str) -> StoreResult<FilesystemStats> {
        let filesystem = filesystem.to_owned();
        self.read("filesystem_stats", move |db| {
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(FILESYSTEMS)?;
            let (file_count, size) = table
                .get(filesystem.as_str())?
                .map(|guard| guard.value())
                .unwrap_or_default();
            Ok(FilesystemStats {
                filesystem,
                file_count,
                size,
            })
        })
        .await
    }

    async fn adjust_filesystem_stats(
        &self,
        filesystem: &str,
        count_delta: i64,
        size_delta: i64,
    ) -> StoreResult<()> {
        let filesystem = filesystem.to_owned();
        self.write("adjust_filesystem_stats", move |txn| {
            let mut table = txn.open_table(FILESYSTEMS)?;
            let (count, size) = table
                .get(filesystem.as_str())?
                .map(|guard| guard.value())
                .unwrap_or_default();
            table.insert(
                filesystem.as_str(),
                (apply_delta(count, count_delta), apply_delta(size, size_delta)),
            )?;
            Ok(())
        })
        .await
    }

    async fn drop_filesystem_stats(&self, filesystem: &str) -> StoreResult<()> {
        let filesystem = filesystem.to_owned();
        self.write("drop_filesystem_stats", move |txn| {
            let mut table = txn.open_table(FILESYSTEMS)?;
            table.remove(filesystem.as_str())?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pathmapped_core::testutil::PathDbTests;

    #[tokio::test]
    async fn test_redb_pathdb() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db = RedbPathDb::open(temp_dir.path()).unwrap();
        PathDbTests::new(&db).run_all().await.unwrap();
    }

    #[tokio::test]
    async fn entries_survive_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        let entry = PathEntry {
            filesystem: "maven".into(),
            parent_path: "/org/foo".into(),
            filename: "foo-1.0.jar".into(),
            file_id: Some("id-1".into()),
            creation: Utc::now(),
            expiration: None,
            size: 42,
            storage_location: Some("id/-1/id-1".into()),
            checksum: Some("abc".into()),
        };
        {
            let db = RedbPathDb::open(temp_dir.path()).unwrap();
            db.put_entry(entry.clone()).await.unwrap();
            db.adjust_filesystem_stats("maven", 1, 42).await.unwrap();
        }
        let db = RedbPathDb::open(temp_dir.path()).unwrap();
        let got = db.get_entry(&entry.key()).await.unwrap().unwrap();
        assert_eq!(got.size, 42);
        assert_eq!(got.checksum.as_deref(), Some("abc"));
        assert_eq!(
            got.creation.timestamp_millis(),
            entry.creation.timestamp_millis()
        );
        let stats = db.filesystem_stats("maven").await.unwrap();
        assert_eq!((stats.file_count, stats.size), (1, 42));
    }
}
