//! Entities persisted by a [`PathDb`](crate::PathDb).

use chrono::{DateTime, Utc};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::path;

/// Natural key of a [`PathEntry`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryKey {
    pub filesystem: String,
    pub parent_path: String,
    pub filename: String,
}

impl EntryKey {
    pub fn new(
        filesystem: impl Into<String>,
        parent_path: impl Into<String>,
        filename: impl Into<String>,
    ) -> Self {
        Self {
            filesystem: filesystem.into(),
            parent_path: parent_path.into(),
            filename: filename.into(),
        }
    }

    /// Splits `path` into a key. The root has no key.
    pub fn for_path(filesystem: &str, path: &str) -> Option<Self> {
        let parent_path = path::parent_path(path)?;
        let filename = path::filename(path)?;
        Some(Self::new(filesystem, parent_path, filename))
    }

    pub fn full_path(&self) -> String {
        path::full_path(&self.parent_path, &self.filename)
    }
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.filesystem, self.full_path())
    }
}

/// One row of the virtual namespace.
///
/// Equality and hashing only consider the natural key
/// `(filesystem, parent_path, filename)`.
#[derive(Debug, Clone)]
pub struct PathEntry {
    pub filesystem: String,
    pub parent_path: String,
    /// Leaf segment; a trailing `/` marks a directory.
    pub filename: String,
    /// `None` for directory markers.
    pub file_id: Option<String>,
    pub creation: DateTime<Utc>,
    /// `None` means never expires.
    pub expiration: Option<DateTime<Utc>>,
    pub size: u64,
    /// `None` for directory markers.
    pub storage_location: Option<String>,
    /// Only present when dedup is enabled for the filesystem.
    pub checksum: Option<String>,
}

impl PathEntry {
    pub fn directory(
        filesystem: impl Into<String>,
        parent_path: impl Into<String>,
        filename: impl Into<String>,
        creation: DateTime<Utc>,
    ) -> Self {
        Self {
            filesystem: filesystem.into(),
            parent_path: parent_path.into(),
            filename: filename.into(),
            file_id: None,
            creation,
            expiration: None,
            size: 0,
            storage_location: None,
            checksum: None,
        }
    }

    pub fn key(&self) -> EntryKey {
        EntryKey::new(&self.filesystem, &self.parent_path, &self.filename)
    }

    pub fn is_directory(&self) -> bool {
        self.filename.ends_with('/')
    }

    pub fn is_file(&self) -> bool {
        !self.is_directory()
    }

    /// `parent_path + filename`, keeping the trailing `/` of directories.
    pub fn full_path(&self) -> String {
        path::full_path(&self.parent_path, &self.filename)
    }

    /// The `parent_path` value carried by this entry's children.
    pub fn children_parent_path(&self) -> String {
        path::normalize_parent_path(&self.full_path())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expiration, Some(exp) if exp < now)
    }

    pub fn file_info(&self) -> Option<FileInfo> {
        match (&self.file_id, &self.storage_location) {
            (Some(file_id), Some(storage_location)) => Some(FileInfo {
                file_id: file_id.clone(),
                storage_location: storage_location.clone(),
            }),
            _ => None,
        }
    }
}

impl PartialEq for PathEntry {
    fn eq(&self, other: &Self) -> bool {
        self.filesystem == other.filesystem
            && self.parent_path == other.parent_path
            && self.filename == other.filename
    }
}

impl Eq for PathEntry {}

impl Hash for PathEntry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.filesystem.hash(state);
        self.parent_path.hash(state);
        self.filename.hash(state);
    }
}

/// Primary owner of a content digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumEntry {
    pub checksum: String,
    pub file_id: String,
    pub storage_location: String,
}

/// A queued physical deletion.
///
/// Ordered by `(partition, deletion, file_id)`, which is also the storage key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReclaimEntry {
    /// Day bucket (days since the Unix epoch) of `deletion`.
    pub partition: i32,
    pub deletion: DateTime<Utc>,
    pub file_id: String,
    pub storage_location: String,
    pub checksum: Option<String>,
}

const SECONDS_PER_DAY: i64 = 86_400;

impl ReclaimEntry {
    pub fn new(
        file_id: impl Into<String>,
        storage_location: impl Into<String>,
        checksum: Option<String>,
        deletion: DateTime<Utc>,
    ) -> Self {
        Self {
            partition: Self::partition_for(deletion),
            deletion,
            file_id: file_id.into(),
            storage_location: storage_location.into(),
            checksum,
        }
    }

    pub fn partition_for(at: DateTime<Utc>) -> i32 {
        at.timestamp().div_euclid(SECONDS_PER_DAY) as i32
    }
}

/// A freshly allocated physical blob handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileInfo {
    pub file_id: String,
    pub storage_location: String,
}

impl fmt::Display for FileInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {}", self.file_id, self.storage_location)
    }
}

/// Aggregate counters for one filesystem.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilesystemStats {
    pub filesystem: String,
    pub file_count: u64,
    pub size: u64,
}

/// Type filter for listings and existence checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum FileType {
    #[default]
    All,
    File,
    Dir,
}

impl FileType {
    pub fn matches(&self, entry: &PathEntry) -> bool {
        self.matches_filename(&entry.filename)
    }

    pub fn matches_filename(&self, filename: &str) -> bool {
        match self {
            FileType::All => true,
            FileType::Dir => filename.ends_with('/'),
            FileType::File => !filename.ends_with('/'),
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileType::All => "all",
            FileType::File => "file",
            FileType::Dir => "dir",
        };
        f.write_str(s)
    }
}

impl FromStr for FileType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(FileType::All),
            "file" => Ok(FileType::File),
            "dir" | "directory" => Ok(FileType::Dir),
            other => Err(anyhow::anyhow!("unknown file type '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn file(fs: &str, parent: &str, name: &str, size: u64) -> PathEntry {
        PathEntry {
            filesystem: fs.into(),
            parent_path: parent.into(),
            filename: name.into(),
            file_id: Some("id".into()),
            creation: Utc::now(),
            expiration: None,
            size,
            storage_location: Some("st".into()),
            checksum: None,
        }
    }

    #[test]
    fn equality_uses_natural_key_only() {
        let a = file("fs", "/a", "b.txt", 1);
        let b = file("fs", "/a", "b.txt", 99);
        let c = file("fs", "/a", "b.txt/", 1);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn children_parent_path_of_directory() {
        let dir = PathEntry::directory("fs", "/foo", "bar/", Utc::now());
        assert_eq!(dir.full_path(), "/foo/bar/");
        assert_eq!(dir.children_parent_path(), "/foo/bar");
        let top = PathEntry::directory("fs", "/", "foo/", Utc::now());
        assert_eq!(top.children_parent_path(), "/foo");
    }

    #[test]
    fn reclaim_partition_is_day_bucket() {
        let at = Utc.with_ymd_and_hms(1970, 1, 3, 12, 0, 0).unwrap();
        let r = ReclaimEntry::new("id", "st", None, at);
        assert_eq!(r.partition, 2);
    }

    #[test]
    fn file_type_filter_and_parse() {
        assert!(FileType::Dir.matches_filename("a/"));
        assert!(!FileType::Dir.matches_filename("a"));
        assert!(FileType::File.matches_filename("a"));
        assert!(FileType::All.matches_filename("a/"));
        assert_eq!("DIR".parse::<FileType>().unwrap(), FileType::Dir);
        assert!("symlink".parse::<FileType>().is_err());
    }
}
