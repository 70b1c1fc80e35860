#![allow(dead_code)]

use chrono::{DateTime, Utc};
use pathmapped_core::{
    BlobReader, BlobWriter, ChecksumEntry, EntryKey, FileInfo, FilesystemStats, LocationStream,
    PathDb, PathEntry, PhysicalStore, ReclaimEntry, StorageConfig, StoreResult,
};
use std::collections::BTreeSet;
use pathmapped_db_memory::MemoryPathDb;
use pathmapped_fs::FileManager;
use pathmapped_store_memory::MemoryPhysicalStore;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::AsyncWrite;

/// Matches the dedup pattern of [`test_config`].
pub const DEDUP_FS: &str = "maven-hosted";
pub const PLAIN_FS: &str = "npm";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// No background sweeper, no grace period, dedup on `maven-*`.
pub fn test_config() -> StorageConfig {
    StorageConfig {
        gc_interval_secs: 0,
        gc_grace_period_secs: 0,
        deduplicate_pattern: Some("maven-.*".into()),
        ..Default::default()
    }
}

pub struct Harness {
    pub fm: FileManager,
    pub db: Arc<MemoryPathDb>,
    pub store: Arc<FlakyStore>,
}

pub struct FlakyDbHarness {
    pub fm: FileManager,
    pub db: Arc<FlakyPathDb>,
    pub store: Arc<FlakyStore>,
}

pub fn flaky_db_harness(config: StorageConfig) -> FlakyDbHarness {
    init_tracing();
    let db = Arc::new(FlakyPathDb::default());
    let store = Arc::new(FlakyStore::default());
    let fm = FileManager::new(config, db.clone(), store.clone()).unwrap();
    FlakyDbHarness { fm, db, store }
}

pub fn harness(config: StorageConfig) -> Harness {
    init_tracing();
    let db = Arc::new(MemoryPathDb::new());
    let store = Arc::new(FlakyStore::default());
    let fm = FileManager::new(config, db.clone(), store.clone()).unwrap();
    Harness { fm, db, store }
}

/// Reclaim entries are stamped at millisecond precision by some backends;
/// wait a little so a zero grace period reliably covers them.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}

/// In-memory store with switchable failures.
#[derive(Debug, Default)]
pub struct FlakyStore {
    pub inner: MemoryPhysicalStore,
    pub fail_writes: AtomicBool,
    pub fail_deletes: AtomicBool,
    /// Every delete attempt, successful or not.
    pub delete_calls: AtomicUsize,
}

impl FlakyStore {
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

struct FailingWriter;

impl AsyncWrite for FailingWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::Error::other("disk full")))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::Error::other("disk full")))
    }
}

#[async_trait::async_trait]
impl PhysicalStore for FlakyStore {
    fn allocate(&self, filesystem: &str, path: &str) -> FileInfo {
        self.inner.allocate(filesystem, path)
    }

    async fn open_writer(&self, info: &FileInfo) -> StoreResult<BlobWriter> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Ok(Box::new(FailingWriter));
        }
        self.inner.open_writer(info).await
    }

    async fn open_reader(&self, storage_location: &str) -> StoreResult<Option<BlobReader>> {
        self.inner.open_reader(storage_location).await
    }

    async fn delete(&self, storage_location: &str) -> StoreResult<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_deletes.load(Ordering::SeqCst) {
            anyhow::bail!("store unavailable");
        }
        self.inner.delete(storage_location).await
    }

    async fn exists(&self, storage_location: &str) -> StoreResult<bool> {
        self.inner.exists(storage_location).await
    }

    async fn list(&self) -> StoreResult<LocationStream> {
        self.inner.list().await
    }
}

/// In-memory metadata with switchable failures on entry and counter writes.
#[derive(Debug, Default)]
pub struct FlakyPathDb {
    pub inner: MemoryPathDb,
    pub fail_entry_puts: AtomicBool,
    pub fail_stats: AtomicBool,
}

impl FlakyPathDb {
    pub fn set_fail_entry_puts(&self, fail: bool) {
        self.fail_entry_puts.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_stats(&self, fail: bool) {
        self.fail_stats.store(fail, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl PathDb for FlakyPathDb {
    async fn get_entry(&self, key: &EntryKey) -> StoreResult<Option<PathEntry>> {
        self.inner.get_entry(key).await
    }

    async fn put_entry(&self, entry: PathEntry) -> StoreResult<()> {
        if self.fail_entry_puts.load(Ordering::SeqCst) {
            anyhow::bail!("entry table unavailable");
        }
        self.inner.put_entry(entry).await
    }

    async fn delete_entry(&self, key: &EntryKey) -> StoreResult<bool> {
        self.inner.delete_entry(key).await
    }

    async fn list_children(
        &self,
        filesystem: &str,
        parent_path: &str,
    ) -> StoreResult<Vec<PathEntry>> {
        self.inner.list_children(filesystem, parent_path).await
    }

    async fn count_children(&self, filesystem: &str, parent_path: &str) -> StoreResult<u64> {
        self.inner.count_children(filesystem, parent_path).await
    }

    async fn filesystems_with(
        &self,
        parent_path: &str,
        filename: &str,
    ) -> StoreResult<Vec<String>> {
        self.inner.filesystems_with(parent_path, filename).await
    }

    async fn get_reverse(&self, file_id: &str) -> StoreResult<Option<BTreeSet<String>>> {
        self.inner.get_reverse(file_id).await
    }

    async fn put_reverse(&self, file_id: &str, references: BTreeSet<String>) -> StoreResult<()> {
        self.inner.put_reverse(file_id, references).await
    }

    async fn delete_reverse(&self, file_id: &str) -> StoreResult<()> {
        self.inner.delete_reverse(file_id).await
    }

    async fn get_checksum(&self, checksum: &str) -> StoreResult<Option<ChecksumEntry>> {
        self.inner.get_checksum(checksum).await
    }

    async fn put_checksum(&self, entry: ChecksumEntry) -> StoreResult<()> {
        self.inner.put_checksum(entry).await
    }

    async fn delete_checksum(&self, checksum: &str) -> StoreResult<()> {
        self.inner.delete_checksum(checksum).await
    }

    async fn enqueue_reclaim(&self, entry: ReclaimEntry) -> StoreResult<()> {
        self.inner.enqueue_reclaim(entry).await
    }

    async fn scan_reclaims(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<ReclaimEntry>> {
        self.inner.scan_reclaims(older_than, limit).await
    }

    async fn remove_reclaim(&self, entry: &ReclaimEntry) -> StoreResult<()> {
        self.inner.remove_reclaim(entry).await
    }

    async fn filesystem_stats(&self, filesystem: &str) -> StoreResult<FilesystemStats> {
        self.inner.filesystem_stats(filesystem).await
    }

    async fn adjust_filesystem_stats(
        &self,
        filesystem: &str,
        count_delta: i64,
        size_delta: i64,
    ) -> StoreResult<()> {
        if self.fail_stats.load(Ordering::SeqCst) {
            anyhow::bail!("stats table unavailable");
        }
        self.inner
            .adjust_filesystem_stats(filesystem, count_delta, size_delta)
            .await
    }

    async fn drop_filesystem_stats(&self, filesystem: &str) -> StoreResult<()> {
        self.inner.drop_filesystem_stats(filesystem).await
    }
}
