//! # voxcache core
//!
//! Content-addressable cache keys for calls whose arguments include large
//! spatial images, a NIfTI-1 loader with dtype coercion, a small on-disk
//! memoization store, and a convergence monitor for iterative fits.

pub mod config;
pub mod context;
pub mod error;
pub mod hashing;
pub mod memory;
pub mod nifti;
pub mod persistence;
pub mod training;

// Re-export commonly used types at the crate root.
pub use config::{HashingConfig, LoaderConfig, MemoryConfig, VoxcacheConfig, load_config};
pub use context::{CacheContext, install, installed};
pub use error::{ConfigError, HashError, MemoryError, NiftiError, Result, VoxcacheError};
pub use hashing::{
    Argument, ArgumentHasher, CacheKey, ContentHasher, Digest, FunctionSignature, HashAlgorithm,
    ImageAwareHasher, MemoizedFunction, compute_argument_hash, hash_value,
};
pub use memory::{Memory, MemoryStats};
pub use nifti::{DataType, DtypeRequest, ImageHandle, ImageLoader, NiftiLoader, load_image};
pub use training::{
    CallbackAction, ConvergenceMonitor, ConvergenceTrace, IterationCallback, Scorer,
    TrainingObservation,
};
