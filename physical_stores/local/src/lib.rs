use anyhow::anyhow;
use futures::StreamExt;
use pathmapped_core::path::{random_file_id, storage_dir_for};
use pathmapped_core::store::{BlobReader, BlobWriter, LocationStream, PhysicalStore, StoreResult};
use pathmapped_core::FileInfo;
use std::path::PathBuf;
use tokio::fs::File;
use tracing::debug;
use walkdir::WalkDir;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct LocalStoreConfig {
    pub base_path: String,
}

/// Blobs as plain files below `base_path`, laid out as `ab/cd/<file id>`.
#[derive(Debug, Clone)]
pub struct LocalPhysicalStore {
    base_path: PathBuf,
}

impl LocalPhysicalStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        LocalPhysicalStore {
            base_path: base_path.into(),
        }
    }

    pub fn create(config: LocalStoreConfig) -> Self {
        Self::new(config.base_path)
    }

    pub fn base_path(&self) -> &std::path::Path {
        &self.base_path
    }

    fn resolve_path(&self, path: &str) -> StoreResult<PathBuf> {
        if path.contains("..") || path.starts_with('/') {
            return Err(anyhow!(
                "Invalid storage location: '{}'. Must be a relative path without '..'.",
                path
            ));
        }
        Ok(self.base_path.join(path))
    }
}

#[async_trait::async_trait]
impl PhysicalStore for LocalPhysicalStore {
    fn allocate(&self, _filesystem: &str, _path: &str) -> FileInfo {
        let file_id = random_file_id();
        let storage_location = format!("{}/{}", storage_dir_for(&file_id), file_id);
        FileInfo {
            file_id,
            storage_location,
        }
    }

    async fn open_writer(&self, info: &FileInfo) -> StoreResult<BlobWriter> {
        let full_path = self.resolve_path(&info.storage_location)?;
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = File::create(&full_path).await?;
        Ok(Box::new(file))
    }

    async fn open_reader(&self, storage_location: &str) -> StoreResult<Option<BlobReader>> {
        let full_path = self.resolve_path(storage_location)?;
        match File::open(&full_path).await {
            Ok(file) => Ok(Some(Box::new(file))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, storage_location: &str) -> StoreResult<()> {
        let full_path = self.resolve_path(storage_location)?;
        match tokio::fs::remove_file(&full_path).await {
            Ok(()) => debug!(path = %full_path.display(), "blob removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn exists(&self, storage_location: &str) -> StoreResult<bool> {
        let full_path = self.resolve_path(storage_location)?;
        tokio::fs::try_exists(&full_path).await.map_err(Into::into)
    }

    async fn list(&self) -> StoreResult<LocationStream> {
        let base_path = self.base_path.clone();
        let walker = WalkDir::new(&base_path).into_iter();
        let stream = futures::stream::iter(walker).filter_map(move |entry| {
            futures::future::ready(match entry {
                Ok(entry) if entry.file_type().is_file() => entry
                    .path()
                    .strip_prefix(&base_path)
                    .ok()
                    .map(|rel| Ok(rel.to_string_lossy().replace('\\', "/"))),
                Ok(_) => None,
                Err(e) => Some(Err(e.into())),
            })
        });
        Ok(Box::pin(stream))
    }
}
