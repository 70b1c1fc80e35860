//! Index algorithms over a [`PathDb`].
//!
//! Every public operation is a sequence of independent `PathDb` calls. There
//! is no cross-index transaction: concurrent writers to the same path race,
//! and the last one to commit wins.

use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use pathmapped_core::config::{AccessExtension, StorageConfig, StoragePolicy};
use pathmapped_core::path::{self, ROOT_DIR};
use pathmapped_core::{
    ChecksumEntry, EntryKey, FileType, FilesystemStats, PathDb, PathEntry, PathMapError,
    PathMapResult, ReclaimEntry,
};

use crate::deferred::Deferred;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// Nothing at the path; treated as success.
    NotFound,
    /// Refused: the directory still has children.
    NonEmptyDirectory,
}

impl DeleteOutcome {
    pub fn succeeded(&self) -> bool {
        !matches!(self, DeleteOutcome::NonEmptyDirectory)
    }

    /// Whether something was deleted, with a refusal as an error.
    pub fn into_result(self, filesystem: &str, path: &str) -> PathMapResult<bool> {
        match self {
            DeleteOutcome::Deleted => Ok(true),
            DeleteOutcome::NotFound => Ok(false),
            DeleteOutcome::NonEmptyDirectory => Err(PathMapError::NonEmptyDirectory {
                filesystem: filesystem.to_owned(),
                path: path.to_owned(),
            }),
        }
    }
}

/// Result of [`PathEngine::insert`].
#[derive(Debug, Clone)]
pub struct Committed {
    /// The entry as persisted, possibly rebound to an existing blob.
    pub entry: PathEntry,
    /// True when the content matched an existing checksum and the freshly
    /// written blob was queued for reclaim.
    pub deduplicated: bool,
}

#[derive(Debug)]
pub struct PathEngine {
    db: Arc<dyn PathDb>,
    policy: StoragePolicy,
    deferred: Deferred,
    access_extension: Option<AccessExtension>,
}

impl PathEngine {
    pub fn new(db: Arc<dyn PathDb>, config: &StorageConfig) -> PathMapResult<Self> {
        let deferred = if config.deferred_bookkeeping {
            Deferred::background()
        } else {
            Deferred::inline()
        };
        Ok(Self {
            db,
            policy: config.compile()?,
            deferred,
            access_extension: config.access_extension,
        })
    }

    pub fn db(&self) -> &Arc<dyn PathDb> {
        &self.db
    }

    pub fn policy(&self) -> &StoragePolicy {
        &self.policy
    }

    pub fn deferred(&self) -> &Deferred {
        &self.deferred
    }

    /// Commits a freshly written file entry.
    ///
    /// Any existing entry at the same key is deleted first. When the entry
    /// carries a checksum that already has a primary owner, the entry is
    /// rebound to that owner's blob and its own blob is queued for reclaim.
    pub async fn insert(&self, entry: PathEntry) -> PathMapResult<Committed> {
        let key = entry.key();
        if self.db.get_entry(&key).await?.is_some() {
            debug!(%key, "replacing existing entry");
            self.delete_key(&key, false).await?;
        }

        let mut entry = entry;
        let mut deduplicated = false;
        let mut claimed_checksum = None;
        if let (Some(checksum), Some(file_id), Some(location)) = (
            entry.checksum.clone(),
            entry.file_id.clone(),
            entry.storage_location.clone(),
        ) {
            match self.db.get_checksum(&checksum).await? {
                Some(primary) if primary.file_id != file_id => {
                    debug!(%key, %checksum, primary = %primary.file_id, "content already stored, rebinding");
                    self.db
                        .enqueue_reclaim(ReclaimEntry::new(file_id, location, None, Utc::now()))
                        .await?;
                    entry.file_id = Some(primary.file_id);
                    entry.storage_location = Some(primary.storage_location);
                    deduplicated = true;
                }
                Some(_) => {}
                None => {
                    self.db
                        .put_checksum(ChecksumEntry {
                            checksum: checksum.clone(),
                            file_id,
                            storage_location: location,
                        })
                        .await?;
                    claimed_checksum = Some(checksum);
                }
            }
        }

        if let Err(err) = self.db.put_entry(entry.clone()).await {
            // the caller discards the blob, so no row may point at it
            if let Some(checksum) = claimed_checksum {
                if let Err(undo) = self.db.delete_checksum(&checksum).await {
                    error!(%key, %checksum, error = %undo, "failed to drop checksum of uncommitted blob");
                }
            }
            return Err(err.into());
        }

        let size_delta = if deduplicated { 0 } else { size_i64(entry.size) };
        self.adjust_stats(&entry.filesystem, 1, size_delta).await;
        debug!(%key, file_id = ?entry.file_id, size = entry.size, "committed");

        self.record_references(&entry).await;
        Ok(Committed {
            entry,
            deduplicated,
        })
    }

    /// Counters are approximate; a failed update never fails the operation.
    async fn adjust_stats(&self, filesystem: &str, count_delta: i64, size_delta: i64) {
        if let Err(err) = self
            .db
            .adjust_filesystem_stats(filesystem, count_delta, size_delta)
            .await
        {
            warn!(%filesystem, count_delta, size_delta, error = %err, "failed to update filesystem stats");
        }
    }

    /// Ancestor directories and the reverse-index reference, inline or
    /// deferred depending on configuration.
    async fn record_references(&self, entry: &PathEntry) {
        let db = self.db.clone();
        let filesystem = entry.filesystem.clone();
        let parent = entry.parent_path.clone();
        self.deferred
            .run("make_dirs", async move {
                make_dirs_in(db.as_ref(), &filesystem, &parent).await
            })
            .await;

        if let Some(file_id) = entry.file_id.clone() {
            let db = self.db.clone();
            let reference = path::canonical_reference(&entry.filesystem, &entry.full_path());
            self.deferred
                .run("add_reference", async move {
                    add_reference(db.as_ref(), &file_id, reference).await
                })
                .await;
        }
    }

    pub async fn delete(&self, filesystem: &str, path: &str) -> PathMapResult<DeleteOutcome> {
        match EntryKey::for_path(filesystem, path) {
            Some(key) => self.delete_key(&key, false).await,
            None => Ok(DeleteOutcome::NotFound),
        }
    }

    /// Deletes even a non-empty directory marker, orphaning its children.
    /// Only meant for whole-filesystem purges.
    pub async fn force_delete(&self, filesystem: &str, path: &str) -> PathMapResult<DeleteOutcome> {
        match EntryKey::for_path(filesystem, path) {
            Some(key) => self.delete_key(&key, true).await,
            None => Ok(DeleteOutcome::NotFound),
        }
    }

    async fn delete_key(&self, key: &EntryKey, force: bool) -> PathMapResult<DeleteOutcome> {
        let Some(entry) = self.db.get_entry(key).await? else {
            return Ok(DeleteOutcome::NotFound);
        };

        if entry.is_directory() {
            if !force {
                let children = self
                    .db
                    .count_children(&entry.filesystem, &entry.children_parent_path())
                    .await?;
                if children > 0 {
                    warn!(%key, children, "refusing to delete non-empty directory");
                    return Ok(DeleteOutcome::NonEmptyDirectory);
                }
            }
            self.db.delete_entry(key).await?;
            debug!(%key, "directory deleted");
            return Ok(DeleteOutcome::Deleted);
        }

        self.db.delete_entry(key).await?;
        self.release(&entry).await?;
        debug!(%key, "file deleted");
        Ok(DeleteOutcome::Deleted)
    }

    /// Drops this entry's reference to its blob and queues the blob for
    /// reclaim once nothing references it.
    async fn release(&self, entry: &PathEntry) -> PathMapResult<()> {
        let (Some(file_id), Some(location)) = (&entry.file_id, &entry.storage_location) else {
            return Ok(());
        };
        let reference = path::canonical_reference(&entry.filesystem, &entry.full_path());
        let mut references = self.db.get_reverse(file_id).await?.unwrap_or_default();
        references.remove(&reference);

        if !references.is_empty() {
            debug!(%file_id, remaining = references.len(), "blob still referenced");
            self.db.put_reverse(file_id, references).await?;
            self.adjust_stats(&entry.filesystem, -1, 0).await;
            return Ok(());
        }

        self.db.delete_reverse(file_id).await?;
        if let Some(checksum) = &entry.checksum {
            let owned = self
                .db
                .get_checksum(checksum)
                .await?
                .is_some_and(|primary| &primary.file_id == file_id);
            if owned {
                self.db.delete_checksum(checksum).await?;
            }
        }
        self.db
            .enqueue_reclaim(ReclaimEntry::new(
                file_id.clone(),
                location.clone(),
                entry.checksum.clone(),
                Utc::now(),
            ))
            .await?;
        self.adjust_stats(&entry.filesystem, -1, -size_i64(entry.size))
            .await;
        debug!(%file_id, %location, "blob unreferenced, queued for reclaim");
        Ok(())
    }

    /// Points a new entry at the source's blob. The target, if present, is
    /// replaced. Creation and expiration are carried over from the source.
    pub async fn copy(
        &self,
        from_filesystem: &str,
        from_path: &str,
        to_filesystem: &str,
        to_path: &str,
    ) -> PathMapResult<()> {
        self.copy_inner(from_filesystem, from_path, to_filesystem, to_path, None)
            .await
    }

    /// Like [`copy`](Self::copy) but with an explicit lifetime for the new
    /// entry.
    pub async fn copy_with_lifetime(
        &self,
        from_filesystem: &str,
        from_path: &str,
        to_filesystem: &str,
        to_path: &str,
        creation: DateTime<Utc>,
        expiration: Option<DateTime<Utc>>,
    ) -> PathMapResult<()> {
        self.copy_inner(
            from_filesystem,
            from_path,
            to_filesystem,
            to_path,
            Some((creation, expiration)),
        )
        .await
    }

    async fn copy_inner(
        &self,
        from_filesystem: &str,
        from_path: &str,
        to_filesystem: &str,
        to_path: &str,
        lifetime: Option<(DateTime<Utc>, Option<DateTime<Utc>>)>,
    ) -> PathMapResult<()> {
        let target_key = EntryKey::for_path(to_filesystem, to_path)
            .filter(|k| !k.filename.ends_with('/'))
            .ok_or_else(|| PathMapError::InvalidPath(to_path.to_owned()))?;
        let source = self
            .resolve(from_filesystem, from_path)
            .await?
            .ok_or_else(|| PathMapError::not_found(from_filesystem, from_path))?;
        // only files are copied, a directory entry holds no blob reference
        if source.is_directory() {
            return Err(PathMapError::InvalidPath(from_path.to_owned()));
        }
        if target_key == source.key() {
            return Ok(());
        }

        if self.db.get_entry(&target_key).await?.is_some() {
            debug!(key = %target_key, "copy target exists, replacing");
            self.delete_key(&target_key, false).await?;
        }

        let (creation, expiration) = lifetime.unwrap_or((source.creation, source.expiration));
        let target = PathEntry {
            filesystem: target_key.filesystem,
            parent_path: target_key.parent_path,
            filename: target_key.filename,
            creation,
            expiration,
            ..source
        };
        self.db.put_entry(target.clone()).await?;
        self.adjust_stats(&target.filesystem, 1, 0).await;
        debug!(from = %format!("{from_filesystem}:{from_path}"), to = %target.key(), "copied");
        self.record_references(&target).await;
        Ok(())
    }

    /// Sets or clears the expiration of the entry at `path`.
    pub async fn expire(
        &self,
        filesystem: &str,
        path: &str,
        expiration: Option<DateTime<Utc>>,
    ) -> PathMapResult<()> {
        let key = EntryKey::for_path(filesystem, path)
            .ok_or_else(|| PathMapError::not_found(filesystem, path))?;
        let mut entry = self
            .db
            .get_entry(&key)
            .await?
            .ok_or_else(|| PathMapError::not_found(filesystem, path))?;
        entry.expiration = expiration;
        self.db.put_entry(entry).await?;
        debug!(%key, ?expiration, "expiration updated");
        Ok(())
    }

    /// Creates the directory marker for `path` and every missing ancestor.
    pub async fn make_dirs(&self, filesystem: &str, path: &str) -> PathMapResult<()> {
        make_dirs_in(self.db.as_ref(), filesystem, path).await
    }

    /// Raw entry lookup with no expiry handling. A trailing `/` selects the
    /// directory form.
    pub async fn get_entry(&self, filesystem: &str, path: &str) -> PathMapResult<Option<PathEntry>> {
        match EntryKey::for_path(filesystem, path) {
            Some(key) => Ok(self.db.get_entry(&key).await?),
            None => Ok(None),
        }
    }

    /// Entry at `key` unless it has expired. Never mutates.
    async fn live(&self, key: &EntryKey) -> PathMapResult<Option<PathEntry>> {
        let now = Utc::now();
        Ok(self
            .db
            .get_entry(key)
            .await?
            .filter(|e| !e.is_expired_at(now)))
    }

    /// Resolves a file entry for reading.
    ///
    /// An expired entry is deleted and reported as missing. When access
    /// extension is configured and the remaining lifetime is under the
    /// threshold, the expiration is pushed forward.
    pub async fn resolve(&self, filesystem: &str, path: &str) -> PathMapResult<Option<PathEntry>> {
        let Some(key) = EntryKey::for_path(filesystem, path) else {
            return Ok(None);
        };
        let Some(mut entry) = self.db.get_entry(&key).await? else {
            return Ok(None);
        };
        let now = Utc::now();
        if entry.is_expired_at(now) {
            debug!(%key, expiration = ?entry.expiration, "entry expired, deleting");
            self.delete_key(&key, false).await?;
            return Ok(None);
        }
        if let (Some(ext), Some(expiration)) = (self.access_extension, entry.expiration) {
            if expiration - now < ext.threshold() {
                let extended = now.checked_add_signed(ext.extend()).unwrap_or(DateTime::<Utc>::MAX_UTC);
                debug!(%key, %expiration, %extended, "extending expiration on access");
                entry.expiration = Some(extended);
                self.db.put_entry(entry.clone()).await?;
            }
        }
        Ok(Some(entry))
    }

    pub async fn storage_location(&self, filesystem: &str, path: &str) -> PathMapResult<Option<String>> {
        Ok(self
            .resolve(filesystem, path)
            .await?
            .and_then(|e| e.storage_location))
    }

    /// True if a file or a directory lives at `path`.
    ///
    /// Paths matching the common-file pattern, and paths with a trailing
    /// `/`, are only looked up in one form.
    pub async fn exists(&self, filesystem: &str, path: &str) -> PathMapResult<bool> {
        if path::is_root(path) {
            return Ok(true);
        }
        let Some(key) = EntryKey::for_path(filesystem, path) else {
            return Ok(false);
        };
        if self.live(&key).await?.is_some() {
            return Ok(true);
        }
        if key.filename.ends_with('/') || self.policy.is_common_file(path) {
            return Ok(false);
        }
        let dir_key = EntryKey {
            filename: format!("{}/", key.filename),
            ..key
        };
        Ok(self.live(&dir_key).await?.is_some())
    }

    pub async fn exists_file(&self, filesystem: &str, path: &str) -> PathMapResult<bool> {
        self.is_file(filesystem, path).await
    }

    pub async fn is_file(&self, filesystem: &str, path: &str) -> PathMapResult<bool> {
        if path.ends_with('/') {
            return Ok(false);
        }
        match EntryKey::for_path(filesystem, path) {
            Some(key) => Ok(self.live(&key).await?.is_some()),
            None => Ok(false),
        }
    }

    pub async fn is_directory(&self, filesystem: &str, path: &str) -> PathMapResult<bool> {
        if path::is_root(path) {
            return Ok(true);
        }
        match EntryKey::for_path(filesystem, &path::as_dir(path)) {
            Some(key) => Ok(self.db.get_entry(&key).await?.is_some()),
            None => Ok(false),
        }
    }

    pub async fn file_length(&self, filesystem: &str, path: &str) -> PathMapResult<Option<u64>> {
        Ok(self.live_file(filesystem, path).await?.map(|e| e.size))
    }

    pub async fn last_modified(
        &self,
        filesystem: &str,
        path: &str,
    ) -> PathMapResult<Option<DateTime<Utc>>> {
        Ok(self.live_file(filesystem, path).await?.map(|e| e.creation))
    }

    async fn live_file(&self, filesystem: &str, path: &str) -> PathMapResult<Option<PathEntry>> {
        if path.ends_with('/') {
            return Ok(None);
        }
        match EntryKey::for_path(filesystem, path) {
            Some(key) => self.live(&key).await,
            None => Ok(None),
        }
    }

    /// Direct children of `path`, filtered by type. Expired files are skipped.
    pub async fn list(
        &self,
        filesystem: &str,
        path: &str,
        file_type: FileType,
    ) -> PathMapResult<Vec<PathEntry>> {
        let parent = path::normalize_parent_path(path);
        let now = Utc::now();
        let children = self.db.list_children(filesystem, &parent).await?;
        Ok(children
            .into_iter()
            .filter(|e| file_type.matches(e) && !e.is_expired_at(now))
            .collect())
    }

    /// Lazy depth-first preorder walk below `path`, excluding `path` itself.
    ///
    /// Children are fetched only when the walk reaches their parent, so
    /// dropping the stream (or `take`-ing from it) stops all further reads.
    pub async fn traverse(
        &self,
        filesystem: &str,
        path: &str,
        file_type: FileType,
    ) -> PathMapResult<BoxStream<'static, PathMapResult<PathEntry>>> {
        let start = if path::is_root(path) {
            ROOT_DIR.to_owned()
        } else {
            let dir = path::as_dir(path);
            match self.get_entry(filesystem, &dir).await? {
                Some(root) => root.children_parent_path(),
                None => {
                    debug!(filesystem, path, "traverse root not found");
                    return Ok(stream::empty().boxed());
                }
            }
        };

        Ok(self.walk(filesystem, start, file_type, false))
    }

    fn walk(
        &self,
        filesystem: &str,
        start: String,
        file_type: FileType,
        include_expired: bool,
    ) -> BoxStream<'static, PathMapResult<PathEntry>> {
        let walk = Walk {
            db: self.db.clone(),
            filesystem: filesystem.to_owned(),
            file_type,
            expand: Some(start),
            stack: Vec::new(),
            now: Utc::now(),
            include_expired,
        };
        stream::try_unfold(walk, Walk::next).boxed()
    }

    /// Collects a traversal. A `limit` of 0 means unlimited.
    pub async fn list_recursive(
        &self,
        filesystem: &str,
        path: &str,
        file_type: FileType,
        limit: usize,
    ) -> PathMapResult<Vec<PathEntry>> {
        let walk = self.traverse(filesystem, path, file_type).await?;
        if limit > 0 {
            walk.take(limit).try_collect().await
        } else {
            walk.try_collect().await
        }
    }

    /// Candidates holding an entry at `path`, in candidate order.
    pub async fn filesystems_containing(
        &self,
        candidates: &[String],
        path: &str,
    ) -> PathMapResult<Vec<String>> {
        let Some(key) = EntryKey::for_path("", path) else {
            return Ok(Vec::new());
        };
        let found: HashSet<String> = self
            .db
            .filesystems_with(&key.parent_path, &key.filename)
            .await?
            .into_iter()
            .collect();
        Ok(candidates
            .iter()
            .filter(|c| found.contains(*c))
            .cloned()
            .collect())
    }

    pub async fn first_filesystem_containing(
        &self,
        candidates: &[String],
        path: &str,
    ) -> PathMapResult<Option<String>> {
        Ok(self
            .filesystems_containing(candidates, path)
            .await?
            .into_iter()
            .next())
    }

    pub async fn filesystems_containing_directory(
        &self,
        candidates: &[String],
        path: &str,
    ) -> PathMapResult<Vec<String>> {
        self.filesystems_containing(candidates, &path::as_dir(path))
            .await
    }

    /// Reclaim entries queued before `older_than`, oldest first.
    pub async fn orphaned_files(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> PathMapResult<Vec<ReclaimEntry>> {
        Ok(self.db.scan_reclaims(older_than, limit).await?)
    }

    pub async fn remove_reclaim(&self, entry: &ReclaimEntry) -> PathMapResult<()> {
        Ok(self.db.remove_reclaim(entry).await?)
    }

    pub async fn filesystem_stats(&self, filesystem: &str) -> PathMapResult<FilesystemStats> {
        Ok(self.db.filesystem_stats(filesystem).await?)
    }

    /// Deletes every entry of `filesystem`, deepest first, and drops its
    /// counters. Returns the number of entries removed.
    pub async fn purge_filesystem(&self, filesystem: &str) -> PathMapResult<usize> {
        let mut entries: Vec<PathEntry> = Vec::new();
        let mut walk = self.walk(filesystem, ROOT_DIR.to_owned(), FileType::All, true);
        while let Some(entry) = walk.next().await {
            entries.push(entry?);
        }
        let mut removed = 0;
        for entry in entries.iter().rev() {
            if self.delete_key(&entry.key(), true).await? == DeleteOutcome::Deleted {
                removed += 1;
            }
        }
        self.db.drop_filesystem_stats(filesystem).await?;
        info!(filesystem, removed, "filesystem purged");
        Ok(removed)
    }
}

fn size_i64(size: u64) -> i64 {
    i64::try_from(size).unwrap_or(i64::MAX)
}

/// Creates the marker for `dir_path` and its missing ancestors, stopping at
/// the first one that already exists.
async fn make_dirs_in(db: &dyn PathDb, filesystem: &str, dir_path: &str) -> PathMapResult<()> {
    let normalized = path::normalize_parent_path(dir_path);
    if path::is_root(&normalized) {
        return Ok(());
    }
    let now = Utc::now();
    let mut missing = Vec::new();
    for (parent, name) in path::ancestors_top_down(&normalized).into_iter().rev() {
        let key = EntryKey::new(filesystem, &parent, &name);
        if db.get_entry(&key).await?.is_some() {
            break;
        }
        missing.push(PathEntry::directory(filesystem, parent, name, now));
    }
    for dir in missing.into_iter().rev() {
        debug!(key = %dir.key(), "creating directory marker");
        db.put_entry(dir).await?;
    }
    Ok(())
}

async fn add_reference(db: &dyn PathDb, file_id: &str, reference: String) -> PathMapResult<()> {
    let mut references = db.get_reverse(file_id).await?.unwrap_or_default();
    if references.insert(reference) {
        db.put_reverse(file_id, references).await?;
    }
    Ok(())
}

struct Walk {
    db: Arc<dyn PathDb>,
    filesystem: String,
    file_type: FileType,
    /// Parent path whose children are pushed before the next pop.
    expand: Option<String>,
    stack: Vec<PathEntry>,
    now: DateTime<Utc>,
    include_expired: bool,
}

impl Walk {
    async fn next(mut self) -> PathMapResult<Option<(PathEntry, Self)>> {
        loop {
            if let Some(parent) = self.expand.take() {
                let mut children = self.db.list_children(&self.filesystem, &parent).await?;
                children.reverse();
                self.stack.extend(children);
            }
            let Some(entry) = self.stack.pop() else {
                return Ok(None);
            };
            if entry.is_directory() {
                self.expand = Some(entry.children_parent_path());
            } else if !self.include_expired && entry.is_expired_at(self.now) {
                continue;
            }
            if self.file_type.matches(&entry) {
                return Ok(Some((entry, self)));
            }
        }
    }
}
