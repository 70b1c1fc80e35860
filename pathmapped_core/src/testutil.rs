//! Conformance suites for `PhysicalStore` and `PathDb` implementations.
//!
//! # Usage
//!
//! In the adapter crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! pathmapped_core = { workspace = true, features = ["testutil"] }
//! ```
//!
//! In a test:
//!
//! ```ignore
//! use pathmapped_core::testutil::PathDbTests;
//!
//! #[tokio::test]
//! async fn conformance() {
//!     let db = MyPathDb::new(...);
//!     PathDbTests::new(&db).run_all().await.unwrap();
//! }
//! ```

use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use futures::StreamExt;
use rand::Rng;
use std::collections::{BTreeSet, HashSet};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::db::PathDb;
use crate::model::{ChecksumEntry, PathEntry, ReclaimEntry};
use crate::store::{PhysicalStore, StoreResult};

/// Writes `data` to a freshly allocated blob and returns its storage location.
pub async fn put_blob<S: PhysicalStore + ?Sized>(
    store: &S,
    filesystem: &str,
    path: &str,
    data: &[u8],
) -> StoreResult<String> {
    let info = store.allocate(filesystem, path);
    let mut writer = store.open_writer(&info).await?;
    writer.write_all(data).await?;
    writer.shutdown().await?;
    Ok(info.storage_location)
}

/// Reads a whole blob, `None` if missing.
pub async fn read_blob<S: PhysicalStore + ?Sized>(
    store: &S,
    storage_location: &str,
) -> StoreResult<Option<Bytes>> {
    let Some(mut reader) = store.open_reader(storage_location).await? else {
        return Ok(None);
    };
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await?;
    Ok(Some(Bytes::from(buf)))
}

/// Test suite for `PhysicalStore` implementations.
pub struct PhysicalStoreTests<'a, S> {
    store: &'a S,
    /// Filesystem name used for allocations, unique per run.
    filesystem: String,
}

impl<'a, S: PhysicalStore> PhysicalStoreTests<'a, S> {
    pub fn new(store: &'a S) -> Self {
        let filesystem = format!("_test_{}", rand::rng().random::<u32>());
        Self { store, filesystem }
    }

    pub async fn run_all(&self) -> StoreResult<()> {
        self.test_allocate_is_unique().await?;
        self.test_write_read().await?;
        self.test_missing_reader().await?;
        self.test_exists_and_delete().await?;
        self.test_delete_missing().await?;
        self.test_list().await?;
        Ok(())
    }

    pub async fn test_allocate_is_unique(&self) -> StoreResult<()> {
        let a = self.store.allocate(&self.filesystem, "/a.bin");
        let b = self.store.allocate(&self.filesystem, "/a.bin");
        assert_ne!(a.file_id, b.file_id, "file ids must be fresh");
        assert_ne!(
            a.storage_location, b.storage_location,
            "storage locations must be fresh"
        );
        assert!(
            !self.store.exists(&a.storage_location).await?,
            "allocation must not write anything"
        );
        Ok(())
    }

    pub async fn test_write_read(&self) -> StoreResult<()> {
        let data = vec![7u8; 64 * 1024];
        let loc = put_blob(self.store, &self.filesystem, "/big.bin", &data).await?;
        let read = read_blob(self.store, &loc).await?;
        assert_eq!(read.as_deref(), Some(&data[..]), "read should match write");
        self.store.delete(&loc).await?;
        Ok(())
    }

    pub async fn test_missing_reader(&self) -> StoreResult<()> {
        let info = self.store.allocate(&self.filesystem, "/never-written");
        assert!(
            self.store.open_reader(&info.storage_location).await?.is_none(),
            "reader for a missing blob should be None"
        );
        Ok(())
    }

    pub async fn test_exists_and_delete(&self) -> StoreResult<()> {
        let loc = put_blob(self.store, &self.filesystem, "/del.bin", b"bye").await?;
        assert!(self.store.exists(&loc).await?, "blob should exist after write");
        self.store.delete(&loc).await?;
        assert!(
            !self.store.exists(&loc).await?,
            "blob should be gone after delete"
        );
        Ok(())
    }

    pub async fn test_delete_missing(&self) -> StoreResult<()> {
        let info = self.store.allocate(&self.filesystem, "/ghost");
        self.store.delete(&info.storage_location).await?;
        Ok(())
    }

    pub async fn test_list(&self) -> StoreResult<()> {
        let mut written = Vec::new();
        for name in ["/l1", "/l2", "/l3"] {
            written.push(put_blob(self.store, &self.filesystem, name, b"list").await?);
        }
        let mut stream = self.store.list().await?;
        let mut found = HashSet::new();
        while let Some(loc) = stream.next().await {
            found.insert(loc?);
        }
        for loc in &written {
            assert!(found.contains(loc), "list should contain {loc}");
            self.store.delete(loc).await?;
        }
        Ok(())
    }
}

/// Test suite for `PathDb` implementations.
pub struct PathDbTests<'a, D> {
    db: &'a D,
    /// Filesystem name and key prefix, unique per run.
    prefix: String,
}

impl<'a, D: PathDb> PathDbTests<'a, D> {
    pub fn new(db: &'a D) -> Self {
        let prefix = format!("_test_{}", rand::rng().random::<u32>());
        Self { db, prefix }
    }

    fn file(&self, parent: &str, name: &str, size: u64) -> PathEntry {
        PathEntry {
            filesystem: self.prefix.clone(),
            parent_path: parent.to_owned(),
            filename: name.to_owned(),
            file_id: Some(format!("{}-{name}", self.prefix)),
            creation: Utc::now(),
            expiration: None,
            size,
            storage_location: Some(format!("st/{name}")),
            checksum: None,
        }
    }

    pub async fn run_all(&self) -> StoreResult<()> {
        self.test_entry_crud().await?;
        self.test_file_and_dir_coexist().await?;
        self.test_children().await?;
        self.test_filesystems_with().await?;
        self.test_reverse().await?;
        self.test_checksum().await?;
        self.test_reclaims().await?;
        self.test_reclaim_cutoff_precision().await?;
        self.test_filesystem_stats().await?;
        Ok(())
    }

    pub async fn test_entry_crud(&self) -> StoreResult<()> {
        let mut entry = self.file("/crud", "a.txt", 5);
        let key = entry.key();
        assert!(self.db.get_entry(&key).await?.is_none());

        self.db.put_entry(entry.clone()).await?;
        let got = self.db.get_entry(&key).await?.expect("entry after put");
        assert_eq!(got.size, 5);
        assert_eq!(got.file_id, entry.file_id);
        assert_eq!(got.storage_location, entry.storage_location);

        let exp = Utc::now() + Duration::hours(1);
        entry.expiration = Some(exp);
        entry.size = 6;
        self.db.put_entry(entry).await?;
        let got = self.db.get_entry(&key).await?.expect("entry after replace");
        assert_eq!(got.size, 6);
        assert_eq!(
            got.expiration.map(|e| e.timestamp_millis()),
            Some(exp.timestamp_millis()),
            "expiration should survive at millisecond precision"
        );

        assert!(self.db.delete_entry(&key).await?, "delete reports existing");
        assert!(!self.db.delete_entry(&key).await?, "second delete reports missing");
        assert!(self.db.get_entry(&key).await?.is_none());
        Ok(())
    }

    pub async fn test_file_and_dir_coexist(&self) -> StoreResult<()> {
        let file = self.file("/co", "foo", 1);
        let dir = PathEntry::directory(&self.prefix, "/co", "foo/", Utc::now());
        self.db.put_entry(file.clone()).await?;
        self.db.put_entry(dir.clone()).await?;
        let f = self.db.get_entry(&file.key()).await?.expect("file");
        let d = self.db.get_entry(&dir.key()).await?.expect("dir");
        assert!(f.is_file());
        assert!(d.is_directory());
        assert!(d.file_id.is_none());
        self.db.delete_entry(&file.key()).await?;
        self.db.delete_entry(&dir.key()).await?;
        Ok(())
    }

    pub async fn test_children(&self) -> StoreResult<()> {
        for name in ["c.txt", "a.txt", "b/"] {
            let entry = if name.ends_with('/') {
                PathEntry::directory(&self.prefix, "/kids", name, Utc::now())
            } else {
                self.file("/kids", name, 1)
            };
            self.db.put_entry(entry).await?;
        }
        // A grandchild and a sibling prefix must not show up.
        self.db.put_entry(self.file("/kids/b", "deep.txt", 1)).await?;
        self.db.put_entry(self.file("/kidsx", "other.txt", 1)).await?;

        let children = self.db.list_children(&self.prefix, "/kids").await?;
        let names: Vec<_> = children.iter().map(|e| e.filename.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b/", "c.txt"], "children in filename order");
        assert_eq!(self.db.count_children(&self.prefix, "/kids").await?, 3);
        assert_eq!(self.db.count_children(&self.prefix, "/nothing").await?, 0);
        assert!(
            self.db
                .list_children("other-filesystem", "/kids")
                .await?
                .is_empty(),
            "children are scoped to one filesystem"
        );
        Ok(())
    }

    pub async fn test_filesystems_with(&self) -> StoreResult<()> {
        let other = format!("{}-other", self.prefix);
        let a = self.file("/shared", "x.bin", 1);
        let mut b = a.clone();
        b.filesystem = other.clone();
        self.db.put_entry(a).await?;
        self.db.put_entry(b).await?;
        let mut found = self.db.filesystems_with("/shared", "x.bin").await?;
        found.retain(|fs| fs.starts_with(&self.prefix));
        found.sort();
        assert_eq!(found, vec![self.prefix.clone(), other]);
        Ok(())
    }

    pub async fn test_reverse(&self) -> StoreResult<()> {
        let id = format!("{}-rev", self.prefix);
        assert!(self.db.get_reverse(&id).await?.is_none());
        let refs: BTreeSet<String> = ["fs:/a".to_owned(), "fs:/b".to_owned()].into();
        self.db.put_reverse(&id, refs.clone()).await?;
        assert_eq!(self.db.get_reverse(&id).await?, Some(refs));
        self.db.delete_reverse(&id).await?;
        assert!(self.db.get_reverse(&id).await?.is_none());
        self.db.delete_reverse(&id).await?;
        Ok(())
    }

    pub async fn test_checksum(&self) -> StoreResult<()> {
        let sum = format!("{}-digest", self.prefix);
        let entry = ChecksumEntry {
            checksum: sum.clone(),
            file_id: "id-1".into(),
            storage_location: "st/1".into(),
        };
        self.db.put_checksum(entry.clone()).await?;
        assert_eq!(self.db.get_checksum(&sum).await?, Some(entry));
        self.db.delete_checksum(&sum).await?;
        assert!(self.db.get_checksum(&sum).await?.is_none());
        Ok(())
    }

    pub async fn test_reclaims(&self) -> StoreResult<()> {
        let now = Utc::now();
        let old = ReclaimEntry::new(
            format!("{}-old", self.prefix),
            "st/old",
            Some("sum".into()),
            now - Duration::days(3),
        );
        let older = ReclaimEntry::new(
            format!("{}-older", self.prefix),
            "st/older",
            None,
            now - Duration::days(4),
        );
        let fresh = ReclaimEntry::new(format!("{}-fresh", self.prefix), "st/fresh", None, now);
        for r in [&old, &older, &fresh] {
            self.db.enqueue_reclaim(r.clone()).await?;
        }

        let cutoff = now - Duration::days(1);
        let mine = |v: Vec<ReclaimEntry>| -> Vec<String> {
            v.into_iter()
                .filter(|r| r.file_id.starts_with(&self.prefix))
                .map(|r| r.file_id)
                .collect()
        };
        let due = mine(self.db.scan_reclaims(cutoff, 0).await?);
        assert_eq!(due, vec![older.file_id.clone(), old.file_id.clone()], "oldest first");

        let one = self.db.scan_reclaims(cutoff, 1).await?;
        assert_eq!(one.len(), 1, "limit is honored");

        let scanned = self.db.scan_reclaims(cutoff, 0).await?;
        let got_old = scanned
            .iter()
            .find(|r| r.file_id == old.file_id)
            .expect("old reclaim present");
        assert_eq!(got_old.storage_location, "st/old");
        assert_eq!(got_old.checksum.as_deref(), Some("sum"));

        for r in [&old, &older, &fresh] {
            self.db.remove_reclaim(r).await?;
        }
        let after = mine(self.db.scan_reclaims(now + Duration::seconds(1), 0).await?);
        assert!(after.is_empty(), "removed reclaims are gone");
        Ok(())
    }

    pub async fn test_reclaim_cutoff_precision(&self) -> StoreResult<()> {
        let ms = (Utc::now() - Duration::days(30)).timestamp_millis();
        let base = DateTime::from_timestamp_millis(ms).expect("valid millis");
        let entry = ReclaimEntry::new(
            format!("{}-edge", self.prefix),
            "st/edge",
            None,
            base + Duration::microseconds(400),
        );
        self.db.enqueue_reclaim(entry.clone()).await?;

        let mine = |v: Vec<ReclaimEntry>| v.iter().any(|r| r.file_id == entry.file_id);
        let same_ms = base + Duration::microseconds(700);
        assert!(
            !mine(self.db.scan_reclaims(same_ms, 0).await?),
            "same millisecond is not due"
        );
        let next_ms = base + Duration::milliseconds(1);
        assert!(mine(self.db.scan_reclaims(next_ms, 0).await?), "next millisecond is due");

        self.db.remove_reclaim(&entry).await?;
        Ok(())
    }

    pub async fn test_filesystem_stats(&self) -> StoreResult<()> {
        let fs = format!("{}-stats", self.prefix);
        let empty = self.db.filesystem_stats(&fs).await?;
        assert_eq!((empty.file_count, empty.size), (0, 0));

        self.db.adjust_filesystem_stats(&fs, 2, 100).await?;
        self.db.adjust_filesystem_stats(&fs, -1, -30).await?;
        let stats = self.db.filesystem_stats(&fs).await?;
        assert_eq!(stats.filesystem, fs);
        assert_eq!((stats.file_count, stats.size), (1, 70));

        self.db.adjust_filesystem_stats(&fs, -5, -500).await?;
        let clamped = self.db.filesystem_stats(&fs).await?;
        assert_eq!((clamped.file_count, clamped.size), (0, 0), "counters clamp at zero");

        self.db.drop_filesystem_stats(&fs).await?;
        assert_eq!(self.db.filesystem_stats(&fs).await?.file_count, 0);
        Ok(())
    }
}
