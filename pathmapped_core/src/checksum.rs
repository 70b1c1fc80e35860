//! Content digests used for deduplication.

use sha2::Digest;
use std::fmt;
use std::str::FromStr;

use crate::error::PathMapError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ChecksumAlgorithm {
    #[default]
    Sha256,
    Blake3,
}

impl ChecksumAlgorithm {
    pub fn calculator(&self) -> ChecksumCalculator {
        ChecksumCalculator::new(*self)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Sha256 => "SHA-256",
            ChecksumAlgorithm::Blake3 => "BLAKE3",
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = PathMapError;

    /// Accepts `SHA-256`, `sha256`, `SHA_256`, `blake3` and so on.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let folded: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();
        match folded.as_str() {
            "sha256" => Ok(ChecksumAlgorithm::Sha256),
            "blake3" => Ok(ChecksumAlgorithm::Blake3),
            _ => Err(PathMapError::UnsupportedChecksumAlgorithm(s.to_owned())),
        }
    }
}

enum Hasher {
    Sha256(sha2::Sha256),
    Blake3(Box<blake3::Hasher>),
}

/// Incremental digest over a write stream.
pub struct ChecksumCalculator {
    algorithm: ChecksumAlgorithm,
    hasher: Hasher,
}

impl ChecksumCalculator {
    pub fn new(algorithm: ChecksumAlgorithm) -> Self {
        let hasher = match algorithm {
            ChecksumAlgorithm::Sha256 => Hasher::Sha256(sha2::Sha256::new()),
            ChecksumAlgorithm::Blake3 => Hasher::Blake3(Box::new(blake3::Hasher::new())),
        };
        Self { algorithm, hasher }
    }

    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    pub fn update(&mut self, data: &[u8]) {
        match &mut self.hasher {
            Hasher::Sha256(h) => h.update(data),
            Hasher::Blake3(h) => {
                h.update(data);
            }
        }
    }

    /// Lowercase hex digest.
    pub fn finish(self) -> String {
        match self.hasher {
            Hasher::Sha256(h) => hex::encode(h.finalize()),
            Hasher::Blake3(h) => hex::encode(h.finalize().as_bytes()),
        }
    }
}

impl fmt::Debug for ChecksumCalculator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChecksumCalculator")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_spellings() {
        for s in ["SHA-256", "sha256", "Sha_256"] {
            assert_eq!(s.parse::<ChecksumAlgorithm>().unwrap(), ChecksumAlgorithm::Sha256);
        }
        assert_eq!("BLAKE3".parse::<ChecksumAlgorithm>().unwrap(), ChecksumAlgorithm::Blake3);
    }

    #[test]
    fn unknown_algorithm_is_rejected() {
        let err = "MD4".parse::<ChecksumAlgorithm>().unwrap_err();
        assert!(matches!(err, PathMapError::UnsupportedChecksumAlgorithm(ref s) if s == "MD4"));
    }

    #[test]
    fn sha256_hex_digest() {
        let mut calc = ChecksumAlgorithm::Sha256.calculator();
        calc.update(b"hel");
        calc.update(b"lo");
        assert_eq!(
            calc.finish(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn blake3_matches_one_shot() {
        let mut calc = ChecksumAlgorithm::Blake3.calculator();
        calc.update(b"hello");
        assert_eq!(calc.finish(), blake3::hash(b"hello").to_hex().to_string());
    }
}
