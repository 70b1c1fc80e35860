use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::checksum::ChecksumAlgorithm;
use crate::error::{PathMapError, PathMapResult};

pub const DEFAULT_COMMON_FILE_EXTENSIONS: &str = r".+\.(jar|json|xml|pom|gz|tgz|md5|sha1|sha256)$";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Period of the background sweeper in seconds; 0 disables it.
    pub gc_interval_secs: u64,
    pub gc_grace_period_secs: u64,
    /// Reclaim entries fetched per batch; 0 means unbounded.
    pub gc_batch_size: usize,
    pub gc_max_result_size: usize,
    pub file_checksum_algorithm: String,
    /// Filesystems whose name fully matches get checksums and dedup.
    pub deduplicate_pattern: Option<String>,
    /// Paths fully matching this are only ever looked up as files.
    pub common_file_extensions: Option<String>,
    pub physical_file_existence_check_enabled: bool,
    pub access_extension: Option<AccessExtension>,
    pub persist_empty_files: bool,
    /// Run ancestor-dir creation and reverse-index adds in the background.
    pub deferred_bookkeeping: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            gc_interval_secs: 60 * 60,
            gc_grace_period_secs: 24 * 60 * 60,
            gc_batch_size: 0,
            gc_max_result_size: 100_000,
            file_checksum_algorithm: ChecksumAlgorithm::Sha256.name().to_owned(),
            deduplicate_pattern: None,
            common_file_extensions: Some(DEFAULT_COMMON_FILE_EXTENSIONS.to_owned()),
            physical_file_existence_check_enabled: false,
            access_extension: None,
            persist_empty_files: false,
            deferred_bookkeeping: false,
        }
    }
}

/// Pushes expiration forward when an entry is resolved close to its expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessExtension {
    pub threshold_secs: u64,
    pub extend_secs: u64,
}

impl AccessExtension {
    pub fn threshold(&self) -> chrono::Duration {
        secs(self.threshold_secs)
    }

    pub fn extend(&self) -> chrono::Duration {
        secs(self.extend_secs)
    }
}

fn secs(s: u64) -> chrono::Duration {
    chrono::Duration::seconds(i64::try_from(s).unwrap_or(i64::MAX).min(i64::MAX / 1000))
}

impl StorageConfig {
    pub fn gc_interval(&self) -> Option<Duration> {
        (self.gc_interval_secs > 0).then(|| Duration::from_secs(self.gc_interval_secs))
    }

    pub fn gc_grace_period(&self) -> chrono::Duration {
        secs(self.gc_grace_period_secs)
    }

    /// Parses the algorithm and compiles the patterns. Call before any I/O.
    pub fn compile(&self) -> PathMapResult<StoragePolicy> {
        let checksum_algorithm = self.file_checksum_algorithm.parse()?;
        let deduplicate = self
            .deduplicate_pattern
            .as_deref()
            .map(full_match)
            .transpose()?;
        let common_files = self
            .common_file_extensions
            .as_deref()
            .map(full_match)
            .transpose()?;
        Ok(StoragePolicy {
            checksum_algorithm,
            deduplicate,
            common_files,
        })
    }
}

fn full_match(pattern: &str) -> PathMapResult<Regex> {
    Regex::new(&format!("^(?:{pattern})$")).map_err(|source| PathMapError::InvalidPattern {
        pattern: pattern.to_owned(),
        source,
    })
}

/// Validated, compiled form of the pattern and algorithm settings.
#[derive(Debug, Clone)]
pub struct StoragePolicy {
    pub checksum_algorithm: ChecksumAlgorithm,
    deduplicate: Option<Regex>,
    common_files: Option<Regex>,
}

impl StoragePolicy {
    pub fn is_dedup_enabled(&self, filesystem: &str) -> bool {
        self.deduplicate
            .as_ref()
            .is_some_and(|re| re.is_match(filesystem))
    }

    pub fn is_common_file(&self, path: &str) -> bool {
        self.common_files.as_ref().is_some_and(|re| re.is_match(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = StorageConfig::default();
        assert_eq!(cfg.gc_interval(), Some(Duration::from_secs(3600)));
        assert_eq!(cfg.gc_grace_period(), chrono::Duration::hours(24));
        assert_eq!(cfg.gc_max_result_size, 100_000);
        let policy = cfg.compile().unwrap();
        assert_eq!(policy.checksum_algorithm, ChecksumAlgorithm::Sha256);
        assert!(!policy.is_dedup_enabled("maven"));
        assert!(policy.is_common_file("/org/foo/foo-1.0.jar"));
        assert!(!policy.is_common_file("/org/foo/1.0"));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: StorageConfig = toml::from_str(
            r#"
            gc_interval_secs = 0
            deduplicate_pattern = "^(maven|npm)-.*$"

            [access_extension]
            threshold_secs = 60
            extend_secs = 600
            "#,
        )
        .unwrap();
        assert_eq!(cfg.gc_interval(), None);
        assert_eq!(cfg.gc_grace_period_secs, 86_400);
        assert_eq!(cfg.access_extension.unwrap().extend(), chrono::Duration::minutes(10));
        let policy = cfg.compile().unwrap();
        assert!(policy.is_dedup_enabled("maven-hosted"));
        assert!(!policy.is_dedup_enabled("pypi"));
    }

    #[test]
    fn dedup_pattern_is_full_match() {
        let cfg = StorageConfig {
            deduplicate_pattern: Some("maven".into()),
            ..Default::default()
        };
        let policy = cfg.compile().unwrap();
        assert!(policy.is_dedup_enabled("maven"));
        assert!(!policy.is_dedup_enabled("maven-remote"));
    }

    #[test]
    fn compile_fails_fast() {
        let bad_algo = StorageConfig {
            file_checksum_algorithm: "CRC32".into(),
            ..Default::default()
        };
        assert!(matches!(
            bad_algo.compile(),
            Err(PathMapError::UnsupportedChecksumAlgorithm(_))
        ));
        let bad_regex = StorageConfig {
            deduplicate_pattern: Some("(".into()),
            ..Default::default()
        };
        assert!(matches!(
            bad_regex.compile(),
            Err(PathMapError::InvalidPattern { .. })
        ));
    }
}
