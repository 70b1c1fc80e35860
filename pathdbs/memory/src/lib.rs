//! In-memory `PathDb`, for tests and embedding.

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use pathmapped_core::db::apply_delta;
use pathmapped_core::{
    ChecksumEntry, EntryKey, FilesystemStats, PathDb, PathEntry, ReclaimEntry, StoreResult,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

type ReclaimKey = (i32, i64, String);

#[derive(Debug, Default)]
pub struct MemoryPathDb {
    /// Ordered so that one filesystem's children of one parent are adjacent.
    entries: RwLock<BTreeMap<EntryKey, PathEntry>>,
    reverse: DashMap<String, BTreeSet<String>>,
    checksums: DashMap<String, ChecksumEntry>,
    reclaims: RwLock<BTreeMap<ReclaimKey, ReclaimEntry>>,
    filesystems: DashMap<String, (u64, u64)>,
}

impl MemoryPathDb {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> StoreResult<RwLockReadGuard<'_, BTreeMap<EntryKey, PathEntry>>> {
        self.entries
            .read()
            .map_err(|_| anyhow!("entries lock poisoned"))
    }

    fn entries_mut(&self) -> StoreResult<RwLockWriteGuard<'_, BTreeMap<EntryKey, PathEntry>>> {
        self.entries
            .write()
            .map_err(|_| anyhow!("entries lock poisoned"))
    }

    fn reclaims(&self) -> StoreResult<RwLockReadGuard<'_, BTreeMap<ReclaimKey, ReclaimEntry>>> {
        self.reclaims
            .read()
            .map_err(|_| anyhow!("reclaims lock poisoned"))
    }

    fn reclaims_mut(
        &self,
    ) -> StoreResult<RwLockWriteGuard<'_, BTreeMap<ReclaimKey, ReclaimEntry>>> {
        self.reclaims
            .write()
            .map_err(|_| anyhow!("reclaims lock poisoned"))
    }

    fn children<'a>(
        map: &'a BTreeMap<EntryKey, PathEntry>,
        filesystem: &'a str,
        parent_path: &'a str,
    ) -> impl Iterator<Item = &'a PathEntry> + 'a {
        map.range(EntryKey::new(filesystem, parent_path, "")..)
            .take_while(move |(k, _)| k.filesystem == filesystem && k.parent_path == parent_path)
            .map(|(_, v)| v)
    }
}

fn reclaim_key(entry: &ReclaimEntry) -> ReclaimKey {
    (
        entry.partition,
        entry.deletion.timestamp_millis(),
        entry.file_id.clone(),
    )
}

#[async_trait::async_trait]
impl PathDb for MemoryPathDb {
    async fn get_entry(&self, key: &EntryKey) -> StoreResult<Option<PathEntry>> {
        Ok(self.entries()?.get(key).cloned())
    }

    async fn put_entry(&self, entry: PathEntry) -> StoreResult<()> {
        self.entries_mut()?.insert(entry.key(), entry);
        Ok(())
    }

    async fn delete_entry(&self, key: &EntryKey) -> StoreResult<bool> {
        Ok(self.entries_mut()?.remove(key).is_some())
    }

    async fn list_children(
        &self,
        filesystem: &str,
        parent_path: &str,
    ) -> StoreResult<Vec<PathEntry>> {
        let map = self.entries()?;
        Ok(Self::children(&map, filesystem, parent_path)
            .cloned()
            .collect())
    }

    async fn count_children(&self, filesystem: &str, parent_path: &str) -> StoreResult<u64> {
        let map = self.entries()?;
        Ok(Self::children(&map, filesystem, parent_path).count() as u64)
    }

    async fn filesystems_with(
        &self,
        parent_path: &str,
        filename: &str,
    ) -> StoreResult<Vec<String>> {
        Ok(self
            .entries()?
            .keys()
            .filter(|k| k.parent_path == parent_path && k.filename == filename)
            .map(|k| k.filesystem.clone())
            .collect())
    }

    async fn get_reverse(&self, file_id: &str) -> StoreResult<Option<BTreeSet<String>>> {
        Ok(self.reverse.get(file_id).map(|r| r.clone()))
    }

    async fn put_reverse(&self, file_id: &str, references: BTreeSet<String>) -> StoreResult<()> {
        self.reverse.insert(file_id.to_owned(), references);
        Ok(())
    }

    async fn delete_reverse(&self, file_id: &str) -> StoreResult<()> {
        self.reverse.remove(file_id);
        Ok(())
    }

    async fn get_checksum(&self, checksum: &str) -> StoreResult<Option<ChecksumEntry>> {
        Ok(self.checksums.get(checksum).map(|c| c.clone()))
    }

    async fn put_checksum(&self, entry: ChecksumEntry) -> StoreResult<()> {
        self.checksums.insert(entry.checksum.clone(), entry);
        Ok(())
    }

    async fn delete_checksum(&self, checksum: &str) -> StoreResult<()> {
        self.checksums.remove(checksum);
        Ok(())
    }

    async fn enqueue_reclaim(&self, entry: ReclaimEntry) -> StoreResult<()> {
        self.reclaims_mut()?.insert(reclaim_key(&entry), entry);
        Ok(())
    }

    async fn scan_reclaims(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<ReclaimEntry>> {
        let cutoff_ms = older_than.timestamp_millis();
        let limit = if limit == 0 { usize::MAX } else { limit };
        Ok(self
            .reclaims()?
            .values()
            .take_while(|r| r.deletion.timestamp_millis() < cutoff_ms)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn remove_reclaim(&self, entry: &ReclaimEntry) -> StoreResult<()> {
        self.reclaims_mut()?.remove(&reclaim_key(entry));
        Ok(())
    }

    async fn filesystem_stats(&self, filesystem: &str) -> StoreResult<FilesystemStats> {
        let (file_count, size) = self
            .filesystems
            .get(filesystem)
            .map(|s| *s)
            .unwrap_or_default();
        Ok(FilesystemStats {
            filesystem: filesystem.to_owned(),
            file_count,
            size,
        })
    }

    async fn adjust_filesystem_stats(
        &self,
        filesystem: &str,
        count_delta: i64,
        size_delta: i64,
    ) -> StoreResult<()> {
        let mut stats = self.filesystems.entry(filesystem.to_owned()).or_default();
        stats.0 = apply_delta(stats.0, count_delta);
        stats.1 = apply_delta(stats.1, size_delta);
        Ok(())
    }

    async fn drop_filesystem_stats(&self, filesystem: &str) -> StoreResult<()> {
        self.filesystems.remove(filesystem);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pathmapped_core::testutil::PathDbTests;

    #[tokio::test]
    async fn test_memory_pathdb() {
        let db = MemoryPathDb::new();
        PathDbTests::new(&db).run_all().await.unwrap();
    }

    #[tokio::test]
    async fn children_do_not_leak_across_parents() {
        let db = MemoryPathDb::new();
        let now = Utc::now();
        db.put_entry(PathEntry::directory("fs", "/a", "b/", now))
            .await
            .unwrap();
        db.put_entry(PathEntry::directory("fs", "/a/b", "c/", now))
            .await
            .unwrap();
        db.put_entry(PathEntry::directory("fs", "/a-b", "d/", now))
            .await
            .unwrap();
        let names: Vec<_> = db
            .list_children("fs", "/a")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.filename)
            .collect();
        assert_eq!(names, vec!["b/"]);
    }
}
