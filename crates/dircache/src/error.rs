//! Error types for cache lookups and cache operations

use thiserror::Error;

/// Why a path lookup produced no object.
///
/// Lookup errors are plain values: they are memoized in the path hash index
/// next to positive results, so they must stay `Copy`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LookupError {
    /// An intermediate path component does not exist
    #[error("path component not found")]
    PathCompNotFound,

    /// An intermediate path component is not a directory
    #[error("path component is not a directory")]
    PathCompNotDir,

    /// The path ends with a separator but names a non-directory
    #[error("not a directory")]
    NotDir,

    /// The final path component does not exist
    #[error("not found")]
    NotFound,

    #[error("path too long")]
    PathTooLong,

    /// The path shape cannot be cached (e.g. UNC shares)
    #[error("unsupported path")]
    Unsupported,

    #[error("out of memory")]
    OutOfMemory,

    #[error("failed to open directory")]
    DirOpenError,

    #[error("failed to read directory")]
    DirReadError,

    #[error("text conversion error")]
    TextConversionError,

    #[error("internal error")]
    InternalError,
}

impl LookupError {
    /// Is this a fact about the tree rather than a failure to find out?
    ///
    /// Only these may be memoized as negative path hash entries; I/O and
    /// resource failures are always retried.
    pub fn is_negative_result(&self) -> bool {
        matches!(
            self,
            LookupError::PathCompNotFound
                | LookupError::PathCompNotDir
                | LookupError::NotDir
                | LookupError::NotFound
                | LookupError::Unsupported
        )
    }
}

/// Cache-level errors
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Lookup failed: {0}")]
    Lookup(#[from] LookupError),

    #[error("Buffer too small: {needed} bytes needed")]
    BufferTooSmall { needed: usize },

    #[error("Object handle is no longer live")]
    StaleObject,

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("Unknown encoding: {0}")]
    UnknownEncoding(String),
}

pub type Result<T> = std::result::Result<T, CacheError>;
