use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::model::FileInfo;

pub type StoreResult<T, E = anyhow::Error> = std::result::Result<T, E>;

/// Byte sink for a freshly allocated blob. Must be shut down to publish.
pub type BlobWriter = Box<dyn AsyncWrite + Send + Unpin + 'static>;

pub type BlobReader = Box<dyn AsyncRead + Send + Unpin + 'static>;

pub type LocationStream =
    Pin<Box<dyn Stream<Item = Result<String, std::io::Error>> + Send + 'static>>;

/// Byte-level blob storage addressed by opaque storage-location strings.
#[async_trait]
pub trait PhysicalStore: std::fmt::Debug + Send + Sync + 'static {
    /// Picks a fresh file id and storage location. Nothing is written yet.
    fn allocate(&self, filesystem: &str, path: &str) -> FileInfo;

    async fn open_writer(&self, info: &FileInfo) -> StoreResult<BlobWriter>;

    /// `Ok(None)` when no blob exists at `storage_location`.
    async fn open_reader(&self, storage_location: &str) -> StoreResult<Option<BlobReader>>;

    /// Removes the blob. Deleting a missing blob succeeds.
    async fn delete(&self, storage_location: &str) -> StoreResult<()>;

    async fn exists(&self, storage_location: &str) -> StoreResult<bool>;

    /// Every stored location, in no particular order.
    async fn list(&self) -> StoreResult<LocationStream>;
}
