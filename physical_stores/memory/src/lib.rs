use bytes::Bytes;
use dashmap::DashMap;
use futures::stream;
use pathmapped_core::path::{random_file_id, storage_dir_for};
use pathmapped_core::store::{BlobReader, BlobWriter, LocationStream, PhysicalStore, StoreResult};
use pathmapped_core::FileInfo;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;

#[derive(Debug, Default)]
pub struct MemoryPhysicalStore {
    files: Arc<DashMap<String, Bytes>>,
}

impl MemoryPhysicalStore {
    /// Creates a new, empty `MemoryPhysicalStore`.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Direct access for tests that simulate drift between metadata and
    /// stored blobs.
    pub fn remove_blob(&self, storage_location: &str) -> Option<Bytes> {
        self.files.remove(storage_location).map(|(_, v)| v)
    }
}

/// Buffers everything and publishes it on shutdown. A writer dropped
/// without shutdown leaves nothing behind.
struct MemoryBlobWriter {
    location: String,
    buf: Vec<u8>,
    files: Arc<DashMap<String, Bytes>>,
    closed: bool,
}

impl AsyncWrite for MemoryBlobWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.closed {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "writer already shut down",
            )));
        }
        self.buf.extend_from_slice(data);
        Poll::Ready(Ok(data.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if !self.closed {
            self.closed = true;
            let data = Bytes::from(std::mem::take(&mut self.buf));
            let location = self.location.clone();
            self.files.insert(location, data);
        }
        Poll::Ready(Ok(()))
    }
}

#[async_trait::async_trait]
impl PhysicalStore for MemoryPhysicalStore {
    fn allocate(&self, _filesystem: &str, _path: &str) -> FileInfo {
        let file_id = random_file_id();
        let storage_location = format!("{}/{}", storage_dir_for(&file_id), file_id);
        FileInfo {
            file_id,
            storage_location,
        }
    }

    async fn open_writer(&self, info: &FileInfo) -> StoreResult<BlobWriter> {
        Ok(Box::new(MemoryBlobWriter {
            location: info.storage_location.clone(),
            buf: Vec::new(),
            files: self.files.clone(),
            closed: false,
        }))
    }

    async fn open_reader(&self, storage_location: &str) -> StoreResult<Option<BlobReader>> {
        let Some(bytes) = self.files.get(storage_location).map(|b| b.clone()) else {
            return Ok(None);
        };
        Ok(Some(Box::new(io::Cursor::new(bytes))))
    }

    async fn delete(&self, storage_location: &str) -> StoreResult<()> {
        self.files.remove(storage_location);
        Ok(())
    }

    async fn exists(&self, storage_location: &str) -> StoreResult<bool> {
        Ok(self.files.contains_key(storage_location))
    }

    async fn list(&self) -> StoreResult<LocationStream> {
        let keys: Vec<Result<String, io::Error>> = self
            .files
            .iter()
            .map(|entry| Ok(entry.key().clone()))
            .collect();
        Ok(Box::pin(stream::iter(keys)))
    }
}
