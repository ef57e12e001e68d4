//! Content-addressable cache keys for call arguments.

pub mod argument;
pub mod digest;
pub mod hasher;
pub mod signature;

pub use argument::Argument;
pub use digest::{DIGEST_LEN, Digest, HashAlgorithm};
pub use hasher::{
    ArgumentHasher, CacheKey, ContentHasher, FILE_MARKER, ImageAwareHasher, cache_key,
    compute_argument_hash, hash_value,
};
pub use signature::{BoundArg, FilteredArgs, FunctionSignature, MemoizedFunction, Parameter};
pub use crate::config::HashingConfig;
