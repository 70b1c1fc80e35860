//! The write-commit stream.
//!
//! Bytes go straight to a freshly allocated blob. Metadata is touched only
//! when [`PathWriter::finish`] succeeds; any failure before that removes
//! the partial blob and leaves the existing entry (if any) alone.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use pathmapped_core::{
    BlobWriter, ChecksumAlgorithm, ChecksumCalculator, EntryKey, FileInfo, PathEntry,
    PathMapError, PathMapResult, PhysicalStore,
};

use crate::engine::PathEngine;

const COPY_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    Open,
    Writing,
    Committed,
    Aborted,
}

pub struct PathWriter {
    key: EntryKey,
    info: FileInfo,
    state: WriterState,
    sink: Option<BlobWriter>,
    checksum: Option<ChecksumCalculator>,
    size: u64,
    ttl: Option<chrono::Duration>,
    persist_empty: bool,
    engine: Arc<PathEngine>,
    store: Arc<dyn PhysicalStore>,
}

impl std::fmt::Debug for PathWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathWriter")
            .field("key", &self.key)
            .field("info", &self.info)
            .field("state", &self.state)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

impl PathWriter {
    pub(crate) async fn open(
        engine: Arc<PathEngine>,
        store: Arc<dyn PhysicalStore>,
        filesystem: &str,
        path: &str,
        ttl: Option<chrono::Duration>,
        persist_empty: bool,
    ) -> PathMapResult<Self> {
        let key = EntryKey::for_path(filesystem, path)
            .filter(|k| !k.filename.ends_with('/'))
            .ok_or_else(|| PathMapError::InvalidPath(path.to_owned()))?;
        let checksum = engine
            .policy()
            .is_dedup_enabled(filesystem)
            .then(|| engine.policy().checksum_algorithm.calculator());

        let info = store.allocate(filesystem, path);
        let sink = store
            .open_writer(&info)
            .await
            .map_err(PathMapError::PhysicalStore)?;
        debug!(%key, %info, dedup = checksum.is_some(), "write stream opened");

        Ok(Self {
            key,
            info,
            state: WriterState::Open,
            sink: Some(sink),
            checksum,
            size: 0,
            ttl,
            persist_empty,
            engine,
            store,
        })
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    pub fn file_info(&self) -> &FileInfo {
        &self.info
    }

    pub fn bytes_written(&self) -> u64 {
        self.size
    }

    pub fn checksum_algorithm(&self) -> Option<ChecksumAlgorithm> {
        self.checksum.as_ref().map(ChecksumCalculator::algorithm)
    }

    fn sink(&mut self) -> PathMapResult<&mut BlobWriter> {
        match self.state {
            WriterState::Open | WriterState::Writing => {}
            WriterState::Committed | WriterState::Aborted => {
                return Err(closed());
            }
        }
        self.sink.as_mut().ok_or_else(closed)
    }

    pub async fn write(&mut self, buf: &[u8]) -> PathMapResult<()> {
        let result = self.sink()?.write_all(buf).await;
        if let Err(err) = result {
            warn!(key = %self.key, error = %err, "write failed, aborting");
            self.discard().await;
            return Err(PathMapError::PhysicalStore(err.into()));
        }
        if let Some(calc) = self.checksum.as_mut() {
            calc.update(buf);
        }
        self.size += buf.len() as u64;
        self.state = WriterState::Writing;
        Ok(())
    }

    /// Drains `reader` into the blob. A read error aborts the write.
    pub async fn copy_from<R>(&mut self, reader: &mut R) -> PathMapResult<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        let mut total = 0u64;
        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => return Ok(total),
                Ok(n) => n,
                Err(err) => {
                    warn!(key = %self.key, error = %err, "source read failed, aborting");
                    self.discard().await;
                    return Err(PathMapError::Io(err));
                }
            };
            self.write(&buf[..n]).await?;
            total += n as u64;
        }
    }

    /// Publishes the blob and commits the entry.
    ///
    /// Returns `None` for an empty write when empty files are not persisted.
    pub async fn finish(mut self) -> PathMapResult<Option<PathEntry>> {
        let result = self.sink()?.shutdown().await;
        self.sink = None;
        if let Err(err) = result {
            warn!(key = %self.key, error = %err, "closing blob failed, aborting");
            self.discard().await;
            return Err(PathMapError::PhysicalStore(err.into()));
        }

        if self.size == 0 && !self.persist_empty {
            debug!(key = %self.key, "empty write, nothing committed");
            self.discard().await;
            return Ok(None);
        }

        let creation = Utc::now();
        let entry = PathEntry {
            filesystem: self.key.filesystem.clone(),
            parent_path: self.key.parent_path.clone(),
            filename: self.key.filename.clone(),
            file_id: Some(self.info.file_id.clone()),
            creation,
            expiration: self.expiration_for(creation),
            size: self.size,
            storage_location: Some(self.info.storage_location.clone()),
            checksum: self.checksum.take().map(ChecksumCalculator::finish),
        };

        match self.engine.insert(entry).await {
            Ok(committed) => {
                self.state = WriterState::Committed;
                Ok(Some(committed.entry))
            }
            Err(err) => {
                warn!(key = %self.key, error = %err, "commit failed, aborting");
                self.discard().await;
                Err(err)
            }
        }
    }

    fn expiration_for(&self, creation: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.ttl.and_then(|ttl| creation.checked_add_signed(ttl))
    }

    /// Drops the partial blob. No metadata is touched.
    pub async fn abort(mut self) -> PathMapResult<()> {
        self.sink = None;
        self.state = WriterState::Aborted;
        self.store
            .delete(&self.info.storage_location)
            .await
            .map_err(PathMapError::PhysicalStore)?;
        debug!(key = %self.key, "write aborted");
        Ok(())
    }

    async fn discard(&mut self) {
        self.sink = None;
        self.state = WriterState::Aborted;
        if let Err(err) = self.store.delete(&self.info.storage_location).await {
            warn!(location = %self.info.storage_location, error = %err, "failed to remove partial blob");
        }
    }
}

fn closed() -> PathMapError {
    PathMapError::Io(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        "write stream already closed",
    ))
}

impl Drop for PathWriter {
    fn drop(&mut self) {
        if !matches!(self.state, WriterState::Open | WriterState::Writing) {
            return;
        }
        self.sink = None;
        let store = self.store.clone();
        let location = self.info.storage_location.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(key = %self.key, "unfinished writer dropped, removing partial blob");
                handle.spawn(async move {
                    if let Err(err) = store.delete(&location).await {
                        warn!(%location, error = %err, "failed to remove partial blob");
                    }
                });
            }
            Err(_) => {
                warn!(key = %self.key, %location, "unfinished writer dropped outside a runtime, blob left behind");
            }
        }
    }
}
