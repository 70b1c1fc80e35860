//! Core types and traits for path-mapped storage.
//!
//! Path-mapped storage maps a virtual, hierarchical namespace of paths
//! (grouped into independent *filesystems*) onto opaque physical blobs.
//! Identical content written to different paths can share one blob, and a
//! blob is reclaimed only after every path referencing it is gone.
//!
//! ## Entity model
//!
//! - [`PathEntry`]: one row per `(filesystem, parent_path, filename)`.
//!   A trailing `/` on the filename marks a directory.
//! - Reverse index: `file_id -> set of "filesystem:/path"` references. Its
//!   cardinality is the reference count of the blob.
//! - [`ChecksumEntry`]: `checksum -> (file_id, storage_location)`, the primary
//!   owner of a content digest, used for deduplication.
//! - [`ReclaimEntry`]: a queued physical deletion consumed by the sweeper.
//!
//! ## Collaborator traits
//!
//! - [`PathDb`]: durable storage for the four indexes above. Implementations
//!   live in `pathmapped_db_memory` and `pathmapped_db_redb`.
//! - [`PhysicalStore`]: byte-level blob storage addressed by opaque storage
//!   locations. Implementations live in `pathmapped_store_local` and
//!   `pathmapped_store_memory`.
//!
//! The algorithms that keep the indexes consistent live in `pathmapped_fs`.

pub mod checksum;
pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod path;
pub mod store;

// Test utilities (behind feature flag)
#[cfg(feature = "testutil")]
pub mod testutil;

pub use checksum::{ChecksumAlgorithm, ChecksumCalculator};
pub use config::{AccessExtension, StorageConfig, StoragePolicy};
pub use db::PathDb;
pub use error::{PathMapError, PathMapResult};
pub use model::{
    ChecksumEntry, EntryKey, FileInfo, FileType, FilesystemStats, PathEntry, ReclaimEntry,
};
pub use store::{BlobReader, BlobWriter, LocationStream, PhysicalStore, StoreResult};
