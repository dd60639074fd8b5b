use std::path::{Path, PathBuf};

/// Errors raised while fingerprinting files or loading a catalog.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Path is a directory, expected a file: {}", .0.display())]
    NotAFile(PathBuf),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to walk directory: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Invalid DAT file: {0}")]
    Parse(String),

    #[error("Fingerprint store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("Cannot find home directory")]
    NoHomeDir,

    #[error("Failed to start hashing workers: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

impl Error {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
