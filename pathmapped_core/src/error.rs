use thiserror::Error;

pub type PathMapResult<T> = std::result::Result<T, PathMapError>;

/// Errors surfaced by the file manager and path engine.
///
/// Collaborator failures arrive as `anyhow::Error` and are wrapped by
/// [`PathMapError::Metadata`] or [`PathMapError::PhysicalStore`].
#[derive(Debug, Error)]
pub enum PathMapError {
    #[error("no entry at {filesystem}:{path}")]
    NotFound { filesystem: String, path: String },

    #[error("directory {filesystem}:{path} is not empty")]
    NonEmptyDirectory { filesystem: String, path: String },

    #[error("'{0}' does not name a file or directory")]
    InvalidPath(String),

    #[error("physical store failure: {0:#}")]
    PhysicalStore(anyhow::Error),

    #[error("unsupported checksum algorithm '{0}'")]
    UnsupportedChecksumAlgorithm(String),

    #[error("{filesystem}:{path} references missing blob at {storage_location}")]
    MetadataPhysicalDrift {
        filesystem: String,
        path: String,
        storage_location: String,
    },

    #[error("invalid pattern '{pattern}'")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("metadata store failure: {0:#}")]
    Metadata(anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PathMapError {
    pub fn not_found(filesystem: &str, path: &str) -> Self {
        Self::NotFound {
            filesystem: filesystem.to_owned(),
            path: path.to_owned(),
        }
    }

    /// True when nothing is stored at the path. Expired entries are
    /// deleted on touch and reported the same way.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<anyhow::Error> for PathMapError {
    fn from(err: anyhow::Error) -> Self {
        Self::Metadata(err)
    }
}
