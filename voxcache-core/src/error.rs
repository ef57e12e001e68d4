//! Error types for voxcache.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering image loading, cache-key derivation, memoization and configuration.

use std::path::PathBuf;

/// Top-level error type for the voxcache core library.
#[derive(Debug, thiserror::Error)]
pub enum VoxcacheError {
    #[error("Image error: {0}")]
    Nifti(#[from] NiftiError),

    #[error("Hash error: {0}")]
    Hash(#[from] HashError),

    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from reading, writing and converting spatial images.
#[derive(Debug, thiserror::Error)]
pub enum NiftiError {
    #[error(
        "Data given cannot be loaded because it is not compatible with the NIfTI format: {repr}"
    )]
    NotSpatialImage { repr: String },

    #[error("Invalid NIfTI header: {message}")]
    InvalidHeader { message: String },

    #[error("Unsupported NIfTI datatype code {code}")]
    UnsupportedDataType { code: i16 },

    #[error("Unknown data type name: {name}")]
    UnknownDataTypeName { name: String },

    #[error("Voxel data truncated: expected {expected} bytes, found {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from argument filtering and digest computation.
#[derive(Debug, thiserror::Error)]
pub enum HashError {
    #[error("{function}() got an unexpected keyword argument '{name}'")]
    UnexpectedKeyword { function: String, name: String },

    #[error("{function}() takes {expected} positional arguments but {given} were given")]
    TooManyPositional {
        function: String,
        expected: usize,
        given: usize,
    },

    #[error("{function}() got multiple values for argument '{name}'")]
    DuplicateArgument { function: String, name: String },

    #[error("{function}() missing required argument '{name}'")]
    MissingArgument { function: String, name: String },

    #[error("Ignore list for {function}() names unknown argument '{name}'")]
    UnknownIgnored { function: String, name: String },

    #[error("Cannot stat image file {path}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unknown hash algorithm: {name}")]
    UnknownAlgorithm { name: String },

    #[error("Cannot serialize image {what} for hashing: {source}")]
    Serialize {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Nifti(#[from] NiftiError),
}

/// Errors from the memoization store.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error(transparent)]
    Key(#[from] HashError),

    #[error("Corrupt cache entry at {path}: {message}")]
    CorruptEntry { path: PathBuf, message: String },

    #[error("Cache IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// A type alias for results using the top-level `VoxcacheError`.
pub type Result<T> = std::result::Result<T, VoxcacheError>;
