//! Timing wrapper for any [`PathDb`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::future::Future;
use std::time::Instant;
use tracing::{Instrument, debug, debug_span};

use pathmapped_core::{
    ChecksumEntry, EntryKey, FilesystemStats, PathDb, PathEntry, ReclaimEntry, StoreResult,
};

/// Runs every call of the inner `PathDb` inside a `pathdb` span and logs
/// its elapsed time at debug level.
#[derive(Debug)]
pub struct MeasuredPathDb<D> {
    inner: D,
}

impl<D: PathDb> MeasuredPathDb<D> {
    pub fn new(inner: D) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }

    async fn measure<T, F>(&self, op: &'static str, fut: F) -> StoreResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        let span = debug_span!("pathdb", op);
        let start = Instant::now();
        let result = fut.instrument(span.clone()).await;
        let elapsed_us = start.elapsed().as_micros() as u64;
        span.in_scope(|| debug!(elapsed_us, ok = result.is_ok(), "pathdb call"));
        result
    }
}

#[async_trait]
impl<D: PathDb> PathDb for MeasuredPathDb<D> {
    async fn get_entry(&self, key: &EntryKey) -> StoreResult<Option<PathEntry>> {
        self.measure("get_entry", self.inner.get_entry(key)).await
    }

    async fn put_entry(&self, entry: PathEntry) -> StoreResult<()> {
        self.measure("put_entry", self.inner.put_entry(entry)).await
    }

    async fn delete_entry(&self, key: &EntryKey) -> StoreResult<bool> {
        self.measure("delete_entry", self.inner.delete_entry(key)).await
    }

    async fn list_children(
        &self,
        filesystem: &str,
        parent_path: &str,
    ) -> StoreResult<Vec<PathEntry>> {
        self.measure(
            "list_children",
            self.inner.list_children(filesystem, parent_path),
        )
        .await
    }

    async fn count_children(&self, filesystem: &str, parent_path: &str) -> StoreResult<u64> {
        self.measure(
            "count_children",
            self.inner.count_children(filesystem, parent_path),
        )
        .await
    }

    async fn filesystems_with(
        &self,
        parent_path: &str,
        filename: &str,
    ) -> StoreResult<Vec<String>> {
        self.measure(
            "filesystems_with",
            self.inner.filesystems_with(parent_path, filename),
        )
        .await
    }

    async fn get_reverse(&self, file_id: &str) -> StoreResult<Option<BTreeSet<String>>> {
        self.measure("get_reverse", self.inner.get_reverse(file_id))
            .await
    }

    async fn put_reverse(&self, file_id: &str, references: BTreeSet<String>) -> StoreResult<()> {
        self.measure("put_reverse", self.inner.put_reverse(file_id, references))
            .await
    }

    async fn delete_reverse(&self, file_id: &str) -> StoreResult<()> {
        self.measure("delete_reverse", self.inner.delete_reverse(file_id))
            .await
    }

    async fn get_checksum(&self, checksum: &str) -> StoreResult<Option<ChecksumEntry>> {
        self.measure("get_checksum", self.inner.get_checksum(checksum))
            .await
    }

    async fn put_checksum(&self, entry: ChecksumEntry) -> StoreResult<()> {
        self.measure("put_checksum", self.inner.put_checksum(entry))
            .await
    }

    async fn delete_checksum(&self, checksum: &str) -> StoreResult<()> {
        self.measure("delete_checksum", self.inner.delete_checksum(checksum))
            .await
    }

    async fn enqueue_reclaim(&self, entry: ReclaimEntry) -> StoreResult<()> {
        self.measure("enqueue_reclaim", self.inner.enqueue_reclaim(entry))
            .await
    }

    async fn scan_reclaims(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<ReclaimEntry>> {
        self.measure("scan_reclaims", self.inner.scan_reclaims(older_than, limit))
            .await
    }

    async fn remove_reclaim(&self, entry: &ReclaimEntry) -> StoreResult<()> {
        self.measure("remove_reclaim", self.inner.remove_reclaim(entry))
            .await
    }

    async fn filesystem_stats(&self, filesystem: &str) -> StoreResult<FilesystemStats> {
        self.measure("filesystem_stats", self.inner.filesystem_stats(filesystem))
            .await
    }

    async fn adjust_filesystem_stats(
        &self,
        filesystem: &str,
        count_delta: i64,
        size_delta: i64,
    ) -> StoreResult<()> {
        self.measure(
            "adjust_filesystem_stats",
            self.inner
                .adjust_filesystem_stats(filesystem, count_delta, size_delta),
        )
        .await
    }

    async fn drop_filesystem_stats(&self, filesystem: &str) -> StoreResult<()> {
        self.measure(
            "drop_filesystem_stats",
            self.inner.drop_filesystem_stats(filesystem),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pathmapped_core::testutil::PathDbTests;
    use pathmapped_db_memory::MemoryPathDb;

    #[tokio::test]
    async fn measured_db_passes_conformance() {
        let db = MeasuredPathDb::new(MemoryPathDb::new());
        PathDbTests::new(&db).run_all().await.unwrap();
    }
}
