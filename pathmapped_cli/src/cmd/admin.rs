use anyhow::{Result, bail};
use futures::StreamExt;
use pathmapped_core::{FileType, PhysicalStore};
use pathmapped_fs::FileManager;

pub async fn run_stats(fm: &FileManager, filesystem: &str) -> Result<()> {
    let stats = fm.filesystem_stats(filesystem).await?;
    println!("filesystem: {}", stats.filesystem);
    println!("files:      {}", stats.file_count);
    println!("size:       {}", stats.size);
    Ok(())
}

pub async fn run_purge(fm: &FileManager, filesystem: &str, yes: bool) -> Result<()> {
    if !yes {
        bail!("refusing to purge '{filesystem}' without --yes");
    }
    let removed = fm.purge_filesystem(filesystem).await?;
    println!("removed {removed} entries from '{filesystem}'");
    Ok(())
}

pub async fn run_gc(fm: &FileManager) -> Result<()> {
    let report = fm.gc().await?;
    for (entry, err) in &report.errors {
        eprintln!(
            "failed to reclaim {} at {}: {err:#}",
            entry.file_id, entry.storage_location
        );
    }
    println!(
        "examined {} queued blobs, deleted {}, failed {}",
        report.examined, report.deleted, report.failed
    );
    Ok(())
}

/// Read-only: walks every file of the filesystem and checks its blob.
pub async fn run_verify(fm: &FileManager, filesystem: &str) -> Result<()> {
    let store = fm.physical_store();
    let mut walk = fm
        .engine()
        .traverse(filesystem, "/", FileType::File)
        .await?;

    let mut checked = 0usize;
    let mut missing = Vec::new();
    while let Some(entry) = walk.next().await {
        let entry = entry?;
        let Some(location) = entry.storage_location.as_deref() else {
            continue;
        };
        checked += 1;
        if !store.exists(location).await? {
            missing.push((entry.full_path(), location.to_owned()));
        }
    }

    if missing.is_empty() {
        println!("all {checked} files in '{filesystem}' have their blob");
    } else {
        eprintln!(
            "{} of {checked} files in '{filesystem}' are MISSING their blob",
            missing.len()
        );
        for (path, location) in missing {
            eprintln!("{path}\t{location}");
        }
    }
    Ok(())
}
