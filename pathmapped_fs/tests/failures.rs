//! Failure handling: aborted writes, drift between metadata and blobs,
//! and configuration rejected at construction.

mod common;

use common::{DEDUP_FS, PLAIN_FS, flaky_db_harness, harness, test_config};
use pathmapped_core::{ChecksumAlgorithm, PathDb, PathMapError, PhysicalStore, StorageConfig};
use pathmapped_db_memory::MemoryPathDb;
use pathmapped_fs::{FileManager, WriterState};
use pathmapped_store_memory::MemoryPhysicalStore;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, ReadBuf};

#[tokio::test]
async fn failed_write_leaves_existing_entry_alone() {
    let h = harness(test_config());
    h.fm.write_bytes(PLAIN_FS, "/a.txt", b"original").await.unwrap();

    h.store.set_fail_writes(true);
    let mut writer = h.fm.open_output(PLAIN_FS, "/a.txt").await.unwrap();
    let err = writer.write(b"replacement").await.unwrap_err();
    assert!(matches!(err, PathMapError::PhysicalStore(_)));
    assert_eq!(writer.state(), WriterState::Aborted);
    assert!(writer.write(b"more").await.is_err());
    drop(writer);
    h.store.set_fail_writes(false);

    assert_eq!(&h.fm.read_bytes(PLAIN_FS, "/a.txt").await.unwrap()[..], b"original");
    assert_eq!(h.store.len(), 1);
    let stats = h.fm.filesystem_stats(PLAIN_FS).await.unwrap();
    assert_eq!((stats.file_count, stats.size), (1, 8));
}

#[tokio::test]
async fn stats_failure_does_not_undo_a_commit() {
    let h = flaky_db_harness(test_config());
    h.db.set_fail_stats(true);

    let entry = h.fm.write_bytes(PLAIN_FS, "/a.txt", b"data").await.unwrap().unwrap();
    assert_eq!(&h.fm.read_bytes(PLAIN_FS, "/a.txt").await.unwrap()[..], b"data");
    assert!(h.store.exists(entry.storage_location.as_deref().unwrap()).await.unwrap());
    assert_eq!(h.store.len(), 1);

    assert!(h.fm.delete(PLAIN_FS, "/a.txt").await.unwrap());
    assert!(!h.fm.exists(PLAIN_FS, "/a.txt").await.unwrap());
}

#[tokio::test]
async fn failed_entry_put_releases_the_checksum() {
    let h = flaky_db_harness(test_config());
    h.db.set_fail_entry_puts(true);
    let err = h.fm.write_bytes(DEDUP_FS, "/a.jar", b"data").await.unwrap_err();
    assert!(matches!(err, PathMapError::Metadata(_)));
    h.db.set_fail_entry_puts(false);

    assert!(h.store.is_empty());
    let mut calc = ChecksumAlgorithm::Sha256.calculator();
    calc.update(b"data");
    assert!(h.db.get_checksum(&calc.finish()).await.unwrap().is_none());
    assert!(h.fm.entry(DEDUP_FS, "/a.jar").await.unwrap().is_none());

    // the same content later gets a blob of its own instead of the discarded one
    let entry = h.fm.write_bytes(DEDUP_FS, "/b.jar", b"data").await.unwrap().unwrap();
    assert!(h.store.exists(entry.storage_location.as_deref().unwrap()).await.unwrap());
    assert_eq!(&h.fm.read_bytes(DEDUP_FS, "/b.jar").await.unwrap()[..], b"data");
}

#[tokio::test]
async fn explicit_abort_removes_the_partial_blob() {
    let h = harness(test_config());
    let mut writer = h.fm.open_output(PLAIN_FS, "/a.txt").await.unwrap();
    writer.write(b"partial").await.unwrap();
    let location = writer.file_info().storage_location.clone();
    writer.abort().await.unwrap();

    assert!(!h.store.exists(&location).await.unwrap());
    assert!(!h.fm.exists(PLAIN_FS, "/a.txt").await.unwrap());
    assert!(h.fm.list(PLAIN_FS, "/").await.unwrap().is_empty());
}

#[tokio::test]
async fn dropped_writer_cleans_up_in_the_background() {
    let h = harness(test_config());
    let before = h.store.delete_calls.load(Ordering::SeqCst);
    {
        let mut writer = h.fm.open_output(PLAIN_FS, "/a.txt").await.unwrap();
        writer.write(b"never committed").await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(h.store.delete_calls.load(Ordering::SeqCst), before + 1);
    assert!(h.store.is_empty());
    assert!(!h.fm.exists(PLAIN_FS, "/a.txt").await.unwrap());
}

struct BrokenReader {
    served: bool,
}

impl AsyncRead for BrokenReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.served {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "upstream went away",
            )));
        }
        self.served = true;
        buf.put_slice(b"first chunk");
        Poll::Ready(Ok(()))
    }
}

#[tokio::test]
async fn copy_from_aborts_on_source_errors() {
    let h = harness(test_config());
    let mut writer = h.fm.open_output(PLAIN_FS, "/proxied.jar").await.unwrap();
    let err = writer
        .copy_from(&mut BrokenReader { served: false })
        .await
        .unwrap_err();
    assert!(matches!(err, PathMapError::Io(_)));
    assert_eq!(writer.state(), WriterState::Aborted);
    drop(writer);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(h.store.is_empty());
    assert!(!h.fm.exists(PLAIN_FS, "/proxied.jar").await.unwrap());
}

#[tokio::test]
async fn copy_from_streams_a_whole_reader() {
    let h = harness(test_config());
    let payload = vec![7u8; 200 * 1024];
    let mut writer = h.fm.open_output(PLAIN_FS, "/big.bin").await.unwrap();
    let copied = writer.copy_from(&mut payload.as_slice()).await.unwrap();
    assert_eq!(copied, payload.len() as u64);
    assert_eq!(writer.bytes_written(), payload.len() as u64);
    writer.finish().await.unwrap();
    assert_eq!(h.fm.read_bytes(PLAIN_FS, "/big.bin").await.unwrap().len(), payload.len());
}

#[tokio::test]
async fn missing_blob_is_reported_as_drift_when_checked() {
    let h = harness(StorageConfig {
        physical_file_existence_check_enabled: true,
        ..test_config()
    });
    h.fm.write_bytes(PLAIN_FS, "/a.txt", b"a").await.unwrap();
    let location = h.fm.storage_location(PLAIN_FS, "/a.txt").await.unwrap().unwrap();
    h.store.inner.remove_blob(&location);

    assert!(!h.fm.exists(PLAIN_FS, "/a.txt").await.unwrap());
    let err = h.fm.read_bytes(PLAIN_FS, "/a.txt").await.unwrap_err();
    match err {
        PathMapError::MetadataPhysicalDrift {
            storage_location, ..
        } => assert_eq!(storage_location, location),
        other => panic!("expected drift, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_blob_is_not_found_without_the_check() {
    let h = harness(test_config());
    h.fm.write_bytes(PLAIN_FS, "/a.txt", b"a").await.unwrap();
    let location = h.fm.storage_location(PLAIN_FS, "/a.txt").await.unwrap().unwrap();
    h.store.inner.remove_blob(&location);

    // metadata alone decides existence
    assert!(h.fm.exists(PLAIN_FS, "/a.txt").await.unwrap());
    assert!(h.fm.read_bytes(PLAIN_FS, "/a.txt").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn construction_rejects_bad_configuration() {
    let db = Arc::new(MemoryPathDb::new());
    let store = Arc::new(MemoryPhysicalStore::new());

    let err = FileManager::new(
        StorageConfig {
            file_checksum_algorithm: "MD5".into(),
            ..test_config()
        },
        db.clone(),
        store.clone(),
    )
    .unwrap_err();
    assert!(matches!(err, PathMapError::UnsupportedChecksumAlgorithm(ref a) if a == "MD5"));

    let err = FileManager::new(
        StorageConfig {
            deduplicate_pattern: Some("maven-(".into()),
            ..test_config()
        },
        db,
        store.clone(),
    )
    .unwrap_err();
    assert!(matches!(err, PathMapError::InvalidPattern { .. }));
    assert!(store.is_empty());
}
