use clap::{ArgAction, Parser, Subcommand};
use clap_verbosity_flag::InfoLevel;
use pathmapped_core::FileType;
use std::path::PathBuf;
use tracing::debug;

mod cmd;
mod config;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file with [storage], [pathdb] and [physical] sections
    #[arg(short, long, value_name = "FILE", default_value = "pathmapped.toml")]
    config: PathBuf,

    #[command(flatten)]
    verbosity: clap_verbosity_flag::Verbosity<InfoLevel>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the children of a directory
    List {
        filesystem: String,
        #[arg(default_value = "/")]
        path: String,
        /// Walk the whole subtree
        #[arg(short, long, action = ArgAction::SetTrue)]
        recursive: bool,
        /// Stop after this many names (0 = no limit)
        #[arg(short, long, default_value_t = 0)]
        limit: usize,
        /// Only show entries of this type: all, file or dir
        #[arg(short = 't', long = "type", default_value_t = FileType::All)]
        file_type: FileType,
    },
    /// Show the stored entry for a path
    Info { filesystem: String, path: String },
    /// Write a file's content to stdout
    Cat { filesystem: String, path: String },
    /// Store a local file (or stdin with "-") at a path
    Put {
        filesystem: String,
        path: String,
        source: PathBuf,
        /// Expire the entry this many seconds after the write
        #[arg(long, value_name = "SECS")]
        ttl_secs: Option<u64>,
    },
    /// Delete a file or an empty directory (directories end with '/')
    Delete {
        filesystem: String,
        path: String,
        /// Remove a directory marker even if it still has children
        #[arg(long, action = ArgAction::SetTrue)]
        force: bool,
    },
    /// Point a second path at the same content
    Copy {
        from_filesystem: String,
        from_path: String,
        to_filesystem: String,
        to_path: String,
    },
    /// Create a directory and its missing parents
    Mkdir { filesystem: String, path: String },
    /// File count and total size of a filesystem
    Stats { filesystem: String },
    /// Delete every entry of a filesystem
    Purge {
        filesystem: String,
        /// Required, purging cannot be undone
        #[arg(long, action = ArgAction::SetTrue)]
        yes: bool,
    },
    /// Reclaim blobs that are no longer referenced
    Gc,
    /// Report files whose blob is missing from the physical store
    Verify { filesystem: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .with_writer(std::io::stderr)
        .init();

    let config = config::CliConfig::load(&cli.config)?;
    debug!(path = %cli.config.display(), pathdb = ?config.pathdb, physical = ?config.physical, "config loaded");
    let fm = config.open(&cli.config)?;
    let result = cmd::run_command(&fm, cli.cmd).await;
    fm.shutdown().await;
    result
}
