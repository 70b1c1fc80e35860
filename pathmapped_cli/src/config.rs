use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use pathmapped_core::{PathDb, PhysicalStore, StorageConfig};
use pathmapped_db_memory::MemoryPathDb;
use pathmapped_db_redb::{RedbPathDb, RedbPathDbConfig};
use pathmapped_fs::FileManager;
use pathmapped_store_local::{LocalPhysicalStore, LocalStoreConfig};
use pathmapped_store_memory::MemoryPhysicalStore;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CliConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    pub pathdb: PathDbConfig,
    pub physical: PhysicalConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum PathDbConfig {
    Redb(RedbPathDbConfig),
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum PhysicalConfig {
    Local(LocalStoreConfig),
    Memory,
}

impl CliConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let toml_content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: CliConfig = toml::from_str(&toml_content)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Opens both backends. Relative paths are taken relative to the
    /// directory holding the config file.
    pub fn open(&self, config_file: &Path) -> anyhow::Result<FileManager> {
        let base = config_file.parent().unwrap_or_else(|| Path::new("."));

        let db: Arc<dyn PathDb> = match &self.pathdb {
            PathDbConfig::Redb(cfg) => {
                let path = resolve(base, &cfg.path);
                Arc::new(
                    RedbPathDb::open(&path)
                        .with_context(|| format!("failed to open pathdb at {}", path.display()))?,
                )
            }
            PathDbConfig::Memory => Arc::new(MemoryPathDb::new()),
        };
        let store: Arc<dyn PhysicalStore> = match &self.physical {
            PhysicalConfig::Local(cfg) => {
                let base_path = resolve(base, &cfg.base_path);
                Arc::new(LocalPhysicalStore::create(LocalStoreConfig {
                    base_path: base_path.to_string_lossy().into_owned(),
                }))
            }
            PhysicalConfig::Memory => Arc::new(MemoryPhysicalStore::new()),
        };

        // one-shot commands never want the background sweeper
        let storage = StorageConfig {
            gc_interval_secs: 0,
            ..self.storage.clone()
        };
        Ok(FileManager::new(storage, db, store)?)
    }
}

fn resolve(base: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let config: CliConfig = toml::from_str(
            r#"
            [storage]
            gc_grace_period_secs = 0
            deduplicate_pattern = "maven-.*"
            file_checksum_algorithm = "BLAKE3"

            [pathdb]
            type = "redb"
            path = "meta"

            [physical]
            type = "local"
            base_path = "/var/lib/pathmapped/blobs"
            "#,
        )
        .unwrap();
        assert_eq!(config.storage.gc_grace_period_secs, 0);
        assert_eq!(config.storage.gc_interval_secs, 3600);
        assert_eq!(
            config.pathdb,
            PathDbConfig::Redb(RedbPathDbConfig {
                path: "meta".into()
            })
        );
        assert_eq!(
            config.physical,
            PhysicalConfig::Local(LocalStoreConfig {
                base_path: "/var/lib/pathmapped/blobs".into()
            })
        );
    }

    #[test]
    fn storage_section_is_optional() {
        let config: CliConfig = toml::from_str(
            r#"
            [pathdb]
            type = "memory"

            [physical]
            type = "memory"
            "#,
        )
        .unwrap();
        assert_eq!(config.storage, StorageConfig::default());
        assert_eq!(config.pathdb, PathDbConfig::Memory);
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let parsed = toml::from_str::<CliConfig>(
            r#"
            [pathdb]
            type = "cassandra"

            [physical]
            type = "memory"
            "#,
        );
        assert!(parsed.is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn relative_paths_follow_the_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_file = dir.path().join("pathmapped.toml");
        let config = CliConfig {
            storage: StorageConfig::default(),
            pathdb: PathDbConfig::Redb(RedbPathDbConfig {
                path: "meta".into(),
            }),
            physical: PhysicalConfig::Local(LocalStoreConfig {
                base_path: "blobs".into(),
            }),
        };
        std::fs::write(&config_file, toml::to_string(&config).unwrap()).unwrap();

        let loaded = CliConfig::load(&config_file).unwrap();
        let fm = loaded.open(&config_file).unwrap();
        fm.write_bytes("fs", "/a.txt", b"a").await.unwrap();
        fm.shutdown().await;

        assert!(dir.path().join("meta").join("pathdb.redb").is_file());
        assert!(dir.path().join("blobs").is_dir());
    }
}
