use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use pathmapped_core::path;
use pathmapped_core::{
    BlobReader, FileType, FilesystemStats, PathDb, PathEntry, PathMapError, PathMapResult,
    PhysicalStore, StorageConfig,
};

use crate::engine::{DeleteOutcome, PathEngine};
use crate::gc::{GcReport, Sweeper};
use crate::writer::PathWriter;

/// Options for [`FileManager::list_with`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ListOptions {
    pub recursive: bool,
    /// Maximum number of names returned; 0 means unlimited.
    pub limit: usize,
    pub file_type: FileType,
}

/// Stream-oriented façade over the path engine and a physical store.
///
/// Construction validates the configuration before touching either store
/// and, when `gc_interval_secs > 0` and a tokio runtime is available, starts
/// the periodic sweeper.
#[derive(Debug)]
pub struct FileManager {
    engine: Arc<PathEngine>,
    store: Arc<dyn PhysicalStore>,
    sweeper: Arc<Sweeper>,
    config: StorageConfig,
    cancel: CancellationToken,
    gc_task: Mutex<Option<JoinHandle<()>>>,
}

impl FileManager {
    pub fn new(
        config: StorageConfig,
        db: Arc<dyn PathDb>,
        store: Arc<dyn PhysicalStore>,
    ) -> PathMapResult<Self> {
        let engine = Arc::new(PathEngine::new(db.clone(), &config)?);
        let sweeper = Arc::new(Sweeper::new(db, store.clone(), &config));
        let cancel = CancellationToken::new();

        let gc_task = match (config.gc_interval(), tokio::runtime::Handle::try_current()) {
            (Some(interval), Ok(_)) => {
                info!(interval_secs = interval.as_secs(), "starting periodic gc");
                Some(sweeper.clone().spawn_periodic(interval, cancel.clone()))
            }
            (Some(_), Err(_)) => {
                warn!("no tokio runtime, periodic gc not started");
                None
            }
            (None, _) => None,
        };

        Ok(Self {
            engine,
            store,
            sweeper,
            config,
            cancel,
            gc_task: Mutex::new(gc_task),
        })
    }

    pub fn engine(&self) -> &Arc<PathEngine> {
        &self.engine
    }

    pub fn physical_store(&self) -> &Arc<dyn PhysicalStore> {
        &self.store
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub async fn open_output(&self, filesystem: &str, path: &str) -> PathMapResult<PathWriter> {
        self.open_writer(filesystem, path, None).await
    }

    /// Opens a write stream whose entry expires `ttl` after commit.
    pub async fn open_output_with_ttl(
        &self,
        filesystem: &str,
        path: &str,
        ttl: Duration,
    ) -> PathMapResult<PathWriter> {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        self.open_writer(filesystem, path, Some(ttl)).await
    }

    async fn open_writer(
        &self,
        filesystem: &str,
        path: &str,
        ttl: Option<chrono::Duration>,
    ) -> PathMapResult<PathWriter> {
        PathWriter::open(
            self.engine.clone(),
            self.store.clone(),
            filesystem,
            path,
            ttl,
            self.config.persist_empty_files,
        )
        .await
    }

    pub async fn write_bytes(
        &self,
        filesystem: &str,
        path: &str,
        data: &[u8],
    ) -> PathMapResult<Option<PathEntry>> {
        let mut writer = self.open_output(filesystem, path).await?;
        writer.write(data).await?;
        writer.finish().await
    }

    /// Opens a read stream. Missing and expired entries are `NotFound`.
    pub async fn open_input(&self, filesystem: &str, path: &str) -> PathMapResult<BlobReader> {
        let entry = self
            .engine
            .resolve(filesystem, path)
            .await?
            .filter(PathEntry::is_file)
            .ok_or_else(|| PathMapError::not_found(filesystem, path))?;
        let location = entry
            .storage_location
            .clone()
            .ok_or_else(|| PathMapError::not_found(filesystem, path))?;

        match self
            .store
            .open_reader(&location)
            .await
            .map_err(PathMapError::PhysicalStore)?
        {
            Some(reader) => Ok(reader),
            None => {
                error!(filesystem, path, %location, "entry present but blob missing");
                if self.config.physical_file_existence_check_enabled {
                    Err(PathMapError::MetadataPhysicalDrift {
                        filesystem: filesystem.to_owned(),
                        path: path.to_owned(),
                        storage_location: location,
                    })
                } else {
                    Err(PathMapError::not_found(filesystem, path))
                }
            }
        }
    }

    pub async fn read_bytes(&self, filesystem: &str, path: &str) -> PathMapResult<Bytes> {
        let mut reader = self.open_input(filesystem, path).await?;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    /// Returns false only when a non-empty directory was refused.
    pub async fn delete(&self, filesystem: &str, path: &str) -> PathMapResult<bool> {
        Ok(self.engine.delete(filesystem, path).await?.succeeded())
    }

    pub async fn delete_with_outcome(
        &self,
        filesystem: &str,
        path: &str,
    ) -> PathMapResult<DeleteOutcome> {
        self.engine.delete(filesystem, path).await
    }

    pub async fn copy(
        &self,
        from_filesystem: &str,
        from_path: &str,
        to_filesystem: &str,
        to_path: &str,
    ) -> PathMapResult<()> {
        self.engine
            .copy(from_filesystem, from_path, to_filesystem, to_path)
            .await
    }

    pub async fn copy_with_lifetime(
        &self,
        from_filesystem: &str,
        from_path: &str,
        to_filesystem: &str,
        to_path: &str,
        creation: DateTime<Utc>,
        expiration: Option<DateTime<Utc>>,
    ) -> PathMapResult<()> {
        self.engine
            .copy_with_lifetime(
                from_filesystem,
                from_path,
                to_filesystem,
                to_path,
                creation,
                expiration,
            )
            .await
    }

    pub async fn expire(
        &self,
        filesystem: &str,
        path: &str,
        expiration: Option<DateTime<Utc>>,
    ) -> PathMapResult<()> {
        self.engine.expire(filesystem, path, expiration).await
    }

    pub async fn make_dirs(&self, filesystem: &str, path: &str) -> PathMapResult<()> {
        self.engine.make_dirs(filesystem, path).await
    }

    /// Names of the direct children of `path`; directories keep their `/`.
    pub async fn list(&self, filesystem: &str, path: &str) -> PathMapResult<Vec<String>> {
        self.list_with(filesystem, path, ListOptions::default())
            .await
    }

    /// Lists children of `path`. Recursive listings return paths relative
    /// to `path`.
    pub async fn list_with(
        &self,
        filesystem: &str,
        path: &str,
        options: ListOptions,
    ) -> PathMapResult<Vec<String>> {
        if !options.recursive {
            let mut names: Vec<String> = self
                .engine
                .list(filesystem, path, options.file_type)
                .await?
                .into_iter()
                .map(|e| e.filename)
                .collect();
            if options.limit > 0 {
                names.truncate(options.limit);
            }
            return Ok(names);
        }

        let prefix = if path::is_root(path) {
            path::ROOT_DIR.to_owned()
        } else {
            path::as_dir(&path::normalize_parent_path(path))
        };
        let entries = self
            .engine
            .list_recursive(filesystem, path, options.file_type, options.limit)
            .await?;
        Ok(entries
            .into_iter()
            .map(|e| {
                let full = e.full_path();
                match full.strip_prefix(&prefix) {
                    Some(rel) => rel.to_owned(),
                    None => full,
                }
            })
            .collect())
    }

    /// True if a file or directory lives at `path`.
    ///
    /// With the physical existence check enabled, a file entry whose blob is
    /// missing is logged and reported as absent.
    pub async fn exists(&self, filesystem: &str, path: &str) -> PathMapResult<bool> {
        if !self.engine.exists(filesystem, path).await? {
            return Ok(false);
        }
        if !self.config.physical_file_existence_check_enabled || path.ends_with('/') {
            return Ok(true);
        }
        let Some(entry) = self.engine.get_entry(filesystem, path).await? else {
            // only the directory form exists
            return Ok(true);
        };
        let Some(location) = entry.storage_location else {
            return Ok(true);
        };
        let present = self
            .store
            .exists(&location)
            .await
            .map_err(PathMapError::PhysicalStore)?;
        if !present {
            error!(filesystem, path, %location, "entry present but blob missing");
        }
        Ok(present)
    }

    pub async fn is_file(&self, filesystem: &str, path: &str) -> PathMapResult<bool> {
        self.engine.is_file(filesystem, path).await
    }

    pub async fn is_directory(&self, filesystem: &str, path: &str) -> PathMapResult<bool> {
        self.engine.is_directory(filesystem, path).await
    }

    pub async fn file_length(&self, filesystem: &str, path: &str) -> PathMapResult<Option<u64>> {
        self.engine.file_length(filesystem, path).await
    }

    pub async fn last_modified(
        &self,
        filesystem: &str,
        path: &str,
    ) -> PathMapResult<Option<DateTime<Utc>>> {
        self.engine.last_modified(filesystem, path).await
    }

    pub async fn storage_location(
        &self,
        filesystem: &str,
        path: &str,
    ) -> PathMapResult<Option<String>> {
        self.engine.storage_location(filesystem, path).await
    }

    pub async fn entry(&self, filesystem: &str, path: &str) -> PathMapResult<Option<PathEntry>> {
        self.engine.get_entry(filesystem, path).await
    }

    pub async fn filesystems_containing(
        &self,
        candidates: &[String],
        path: &str,
    ) -> PathMapResult<Vec<String>> {
        self.engine.filesystems_containing(candidates, path).await
    }

    pub async fn first_filesystem_containing(
        &self,
        candidates: &[String],
        path: &str,
    ) -> PathMapResult<Option<String>> {
        self.engine
            .first_filesystem_containing(candidates, path)
            .await
    }

    /// Runs one sweeper pass now.
    pub async fn gc(&self) -> PathMapResult<GcReport> {
        let report = self.sweeper.run_once().await?;
        debug!(
            examined = report.examined,
            deleted = report.deleted,
            failed = report.failed,
            "manual gc finished"
        );
        Ok(report)
    }

    pub async fn filesystem_stats(&self, filesystem: &str) -> PathMapResult<FilesystemStats> {
        self.engine.filesystem_stats(filesystem).await
    }

    pub async fn purge_filesystem(&self, filesystem: &str) -> PathMapResult<usize> {
        self.engine.purge_filesystem(filesystem).await
    }

    /// Stops the periodic sweeper and waits for deferred bookkeeping.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = match self.gc_task.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!(error = %err, "periodic gc task ended abnormally");
            }
        }
        self.engine.deferred().flush().await;
        debug!("file manager shut down");
    }
}

impl Drop for FileManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
