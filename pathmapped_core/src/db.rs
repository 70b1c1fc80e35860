use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

use crate::model::{ChecksumEntry, EntryKey, FilesystemStats, PathEntry, ReclaimEntry};
use crate::store::StoreResult;

/// Metadata store holding the four path-mapping indexes.
///
/// Every method is a single, independent operation. No method is expected
/// to be atomic with any other; the path engine tolerates interleaving.
#[async_trait]
pub trait PathDb: std::fmt::Debug + Send + Sync + 'static {
    async fn get_entry(&self, key: &EntryKey) -> StoreResult<Option<PathEntry>>;

    /// Inserts or replaces the entry at its natural key.
    async fn put_entry(&self, entry: PathEntry) -> StoreResult<()>;

    /// Removes the entry. Returns whether it existed.
    async fn delete_entry(&self, key: &EntryKey) -> StoreResult<bool>;

    /// Direct children of `parent_path` in filename order.
    async fn list_children(&self, filesystem: &str, parent_path: &str)
    -> StoreResult<Vec<PathEntry>>;

    async fn count_children(&self, filesystem: &str, parent_path: &str) -> StoreResult<u64>;

    /// Every filesystem holding an entry at `(parent_path, filename)`.
    async fn filesystems_with(&self, parent_path: &str, filename: &str)
    -> StoreResult<Vec<String>>;

    async fn get_reverse(&self, file_id: &str) -> StoreResult<Option<BTreeSet<String>>>;

    async fn put_reverse(&self, file_id: &str, references: BTreeSet<String>) -> StoreResult<()>;

    async fn delete_reverse(&self, file_id: &str) -> StoreResult<()>;

    async fn get_checksum(&self, checksum: &str) -> StoreResult<Option<ChecksumEntry>>;

    async fn put_checksum(&self, entry: ChecksumEntry) -> StoreResult<()>;

    async fn delete_checksum(&self, checksum: &str) -> StoreResult<()>;

    async fn enqueue_reclaim(&self, entry: ReclaimEntry) -> StoreResult<()>;

    /// Reclaim entries with `deletion < older_than`, oldest first.
    /// Both instants are compared at millisecond precision, so an entry
    /// queued in the same millisecond as `older_than` is not yet due.
    /// A `limit` of 0 means no limit.
    async fn scan_reclaims(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<ReclaimEntry>>;

    async fn remove_reclaim(&self, entry: &ReclaimEntry) -> StoreResult<()>;

    async fn filesystem_stats(&self, filesystem: &str) -> StoreResult<FilesystemStats>;

    /// Adds the deltas to the filesystem's counters, clamping at zero.
    async fn adjust_filesystem_stats(
        &self,
        filesystem: &str,
        count_delta: i64,
        size_delta: i64,
    ) -> StoreResult<()>;

    async fn drop_filesystem_stats(&self, filesystem: &str) -> StoreResult<()>;
}

/// Applies a signed delta to an unsigned counter without wrapping.
pub fn apply_delta(value: u64, delta: i64) -> u64 {
    if delta >= 0 {
        value.saturating_add(delta as u64)
    } else {
        value.saturating_sub(delta.unsigned_abs())
    }
}
