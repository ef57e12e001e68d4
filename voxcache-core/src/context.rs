//! Process-wide bundle of the image loader and the cache-key strategy.
//!
//! A [`CacheContext`] is built once at startup and handed to every consumer
//! that loads images or derives cache keys. [`install`] offers a single
//! shared instance for programs that want one.

use crate::config::VoxcacheConfig;
use crate::error::{MemoryError, NiftiError};
use crate::hashing::{
    Argument, ArgumentHasher, CacheKey, Digest, ImageAwareHasher, MemoizedFunction, cache_key,
};
use crate::memory::Memory;
use crate::nifti::{DtypeRequest, ImageHandle, ImageLoader, NiftiLoader, load_image};
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};

static INSTALLED: OnceLock<CacheContext> = OnceLock::new();

#[derive(Debug, Clone)]
pub struct CacheContext {
    config: VoxcacheConfig,
    loader: Arc<dyn ImageLoader>,
    hasher: Arc<dyn ArgumentHasher>,
}

impl CacheContext {
    /// Context with the NIfTI loader and the image-aware hasher.
    ///
    /// Memoization keys always treat file-region data like in-memory data,
    /// so `coerce_mmap` is forced on for the hasher built here.
    pub fn new(config: VoxcacheConfig) -> Self {
        let mut hashing = config.hashing;
        hashing.coerce_mmap = true;
        Self {
            loader: Arc::new(NiftiLoader),
            hasher: Arc::new(ImageAwareHasher::new(hashing)),
            config,
        }
    }

    /// Context with caller-supplied strategies.
    pub fn with_strategies(
        config: VoxcacheConfig,
        loader: Arc<dyn ImageLoader>,
        hasher: Arc<dyn ArgumentHasher>,
    ) -> Self {
        Self {
            config,
            loader,
            hasher,
        }
    }

    pub fn config(&self) -> &VoxcacheConfig {
        &self.config
    }

    pub fn loader(&self) -> &Arc<dyn ImageLoader> {
        &self.loader
    }

    pub fn hasher(&self) -> &Arc<dyn ArgumentHasher> {
        &self.hasher
    }

    /// Load or pass through an image, applying `dtype`, or the configured
    /// default when `dtype` is `None`.
    pub fn load_image(
        &self,
        reference: &Argument,
        dtype: Option<DtypeRequest>,
    ) -> Result<Arc<ImageHandle>, NiftiError> {
        let dtype = dtype.unwrap_or(self.config.loader.default_dtype);
        load_image(self.loader.as_ref(), reference, dtype)
    }

    pub fn argument_hash(
        &self,
        func: &MemoizedFunction,
        args: &[Argument],
        kwargs: &BTreeMap<String, Argument>,
    ) -> Result<Digest, crate::error::HashError> {
        crate::hashing::compute_argument_hash(self.hasher.as_ref(), func, args, kwargs)
    }

    pub fn cache_key(
        &self,
        func: &MemoizedFunction,
        args: &[Argument],
        kwargs: &BTreeMap<String, Argument>,
    ) -> Result<CacheKey, MemoryError> {
        Ok(cache_key(self.hasher.as_ref(), func, args, kwargs)?)
    }

    /// Memoization store at the configured location using this context's
    /// hasher.
    pub fn memory(&self) -> Memory {
        Memory::from_config(&self.config.memory, Arc::clone(&self.hasher))
    }
}

/// Install the shared context. The first call wins; later calls return the
/// existing instance and their configuration is ignored.
pub fn install(config: VoxcacheConfig) -> &'static CacheContext {
    let mut fresh = false;
    let ctx = INSTALLED.get_or_init(|| {
        fresh = true;
        CacheContext::new(config.clone())
    });
    if fresh {
        info!(
            algorithm = %ctx.config.hashing.algorithm,
            default_dtype = %ctx.config.loader.default_dtype,
            "Installed cache context"
        );
    } else if ctx.config != config {
        warn!("Cache context already installed; ignoring new configuration");
    }
    ctx
}

/// The shared context, if [`install`] has been called.
pub fn installed() -> Option<&'static CacheContext> {
    INSTALLED.get()
}
