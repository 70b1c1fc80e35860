use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use pathmapped_core::path::as_dir;
use pathmapped_core::{FileType, PathEntry};
use pathmapped_fs::{FileManager, ListOptions};
use tokio::io::{AsyncRead, AsyncWriteExt};

pub async fn run_list(
    fm: &FileManager,
    filesystem: &str,
    path: &str,
    recursive: bool,
    limit: usize,
    file_type: FileType,
) -> Result<()> {
    let names = fm
        .list_with(
            filesystem,
            path,
            ListOptions {
                recursive,
                limit,
                file_type,
            },
        )
        .await?;
    for name in names {
        println!("{name}");
    }
    Ok(())
}

fn print_entry(entry: &PathEntry) {
    println!("filesystem:  {}", entry.filesystem);
    println!("path:        {}", entry.full_path());
    println!("kind:        {}", if entry.is_directory() { "dir" } else { "file" });
    println!("created:     {}", entry.creation);
    match entry.expiration {
        Some(expiration) => println!("expires:     {expiration}"),
        None => println!("expires:     never"),
    }
    if entry.is_file() {
        println!("size:        {}", entry.size);
        if let Some(info) = entry.file_info() {
            println!("file id:     {}", info.file_id);
            println!("location:    {}", info.storage_location);
        }
        if let Some(checksum) = &entry.checksum {
            println!("checksum:    {checksum}");
        }
    }
}

pub async fn run_info(fm: &FileManager, filesystem: &str, path: &str) -> Result<()> {
    let mut found = false;
    if let Some(entry) = fm.entry(filesystem, path).await? {
        print_entry(&entry);
        found = true;
    }
    if !path.ends_with('/') {
        if let Some(entry) = fm.entry(filesystem, &as_dir(path)).await? {
            if found {
                println!();
            }
            print_entry(&entry);
            found = true;
        }
    }
    if !found {
        bail!("nothing stored at {filesystem}:{path}");
    }
    Ok(())
}

pub async fn run_cat(fm: &FileManager, filesystem: &str, path: &str) -> Result<()> {
    let mut reader = fm.open_input(filesystem, path).await?;
    let mut stdout = tokio::io::stdout();
    tokio::io::copy(&mut reader, &mut stdout).await?;
    stdout.flush().await?;
    Ok(())
}

pub async fn run_put(
    fm: &FileManager,
    filesystem: &str,
    path: &str,
    source: &Path,
    ttl_secs: Option<u64>,
) -> Result<()> {
    let mut reader: Box<dyn AsyncRead + Send + Unpin> = if source == Path::new("-") {
        Box::new(tokio::io::stdin())
    } else {
        Box::new(
            tokio::fs::File::open(source)
                .await
                .with_context(|| format!("failed to open {}", source.display()))?,
        )
    };

    let mut writer = match ttl_secs {
        Some(secs) => {
            fm.open_output_with_ttl(filesystem, path, Duration::from_secs(secs))
                .await?
        }
        None => fm.open_output(filesystem, path).await?,
    };
    writer.copy_from(&mut reader).await?;
    match writer.finish().await? {
        Some(entry) => {
            println!(
                "stored {} bytes at {}:{}",
                entry.size,
                filesystem,
                entry.full_path()
            );
            if let Some(location) = entry.storage_location {
                println!("location: {location}");
            }
        }
        None => println!("empty input, nothing stored"),
    }
    Ok(())
}

pub async fn run_delete(fm: &FileManager, filesystem: &str, path: &str, force: bool) -> Result<()> {
    let outcome = if force {
        fm.engine().force_delete(filesystem, path).await?
    } else {
        fm.delete_with_outcome(filesystem, path).await?
    };
    let deleted = outcome
        .into_result(filesystem, path)
        .context("use --force to drop the marker anyway")?;
    if deleted {
        println!("deleted {filesystem}:{path}");
    } else {
        println!("nothing at {filesystem}:{path}");
    }
    Ok(())
}

pub async fn run_copy(
    fm: &FileManager,
    from_filesystem: &str,
    from_path: &str,
    to_filesystem: &str,
    to_path: &str,
) -> Result<()> {
    fm.copy(from_filesystem, from_path, to_filesystem, to_path)
        .await?;
    println!("copied {from_filesystem}:{from_path} to {to_filesystem}:{to_path}");
    Ok(())
}

pub async fn run_mkdir(fm: &FileManager, filesystem: &str, path: &str) -> Result<()> {
    fm.make_dirs(filesystem, path).await?;
    Ok(())
}
