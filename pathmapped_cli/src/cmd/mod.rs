use anyhow::Result;
use pathmapped_fs::FileManager;

use crate::Commands;

mod admin;
mod files;

pub use admin::{run_gc, run_purge, run_stats, run_verify};
pub use files::{run_cat, run_copy, run_delete, run_info, run_list, run_mkdir, run_put};

pub async fn run_command(fm: &FileManager, cmd: Commands) -> Result<()> {
    match cmd {
        Commands::List {
            filesystem,
            path,
            recursive,
            limit,
            file_type,
        } => run_list(fm, &filesystem, &path, recursive, limit, file_type).await,
        Commands::Info { filesystem, path } => run_info(fm, &filesystem, &path).await,
        Commands::Cat { filesystem, path } => run_cat(fm, &filesystem, &path).await,
        Commands::Put {
            filesystem,
            path,
            source,
            ttl_secs,
        } => run_put(fm, &filesystem, &path, &source, ttl_secs).await,
        Commands::Delete {
            filesystem,
            path,
            force,
        } => run_delete(fm, &filesystem, &path, force).await,
        Commands::Copy {
            from_filesystem,
            from_path,
            to_filesystem,
            to_path,
        } => run_copy(fm, &from_filesystem, &from_path, &to_filesystem, &to_path).await,
        Commands::Mkdir { filesystem, path } => run_mkdir(fm, &filesystem, &path).await,
        Commands::Stats { filesystem } => run_stats(fm, &filesystem).await,
        Commands::Purge { filesystem, yes } => run_purge(fm, &filesystem, yes).await,
        Commands::Gc => run_gc(fm).await,
        Commands::Verify { filesystem } => run_verify(fm, &filesystem).await,
    }
}
