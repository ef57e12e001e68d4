//! Structural argument hashing with a shortcut for file-backed images.
//!
//! Every value is fed to the digest as a type tag followed by its content,
//! with lengths prefixed, so distinct argument trees never share an
//! encoding. Maps are encoded in key order.
//!
//! [`ImageAwareHasher`] replaces each image that has a filename with the
//! surrogate `(type tag, "HASHED", filename, mtime)` and never reads its
//! voxels. A different path or a different mtime always yields a different
//! digest, even when the voxels are identical: false cache misses are
//! preferred over false hits. Images without a filename are hashed by
//! content (affine, header, voxels, extra metadata).

use crate::config::HashingConfig;
use crate::error::HashError;
use crate::hashing::argument::Argument;
use crate::hashing::digest::{Digest, DigestState, HashAlgorithm};
use crate::hashing::signature::{BoundArg, FilteredArgs, MemoizedFunction};
use crate::nifti::array::VoxelArray;
use crate::nifti::image::{DataObj, ImageHandle};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Marker placed in the surrogate tuple of file-backed images.
pub const FILE_MARKER: &str = "HASHED";

mod tag {
    pub const NONE: u8 = 0;
    pub const BOOL: u8 = 1;
    pub const INT: u8 = 2;
    pub const FLOAT: u8 = 3;
    pub const STR: u8 = 4;
    pub const PATH: u8 = 5;
    pub const BYTES: u8 = 6;
    pub const LIST: u8 = 7;
    pub const MAP: u8 = 8;
    pub const ARRAY: u8 = 9;
    pub const IMAGE: u8 = 10;
    pub const FILE_IMAGE: u8 = 11;
}

/// Name under which voxel storage is recorded in a hash.
const STORAGE_IN_MEMORY: &str = "ndarray";
const STORAGE_FILE_REGION: &str = "proxy";

/// Strategy deriving cache-key digests from call arguments.
///
/// Implementations must be deterministic: the same arguments (and, for
/// file-backed images, the same file metadata) always give the same digest.
pub trait ArgumentHasher: Send + Sync + fmt::Debug {
    fn algorithm(&self) -> HashAlgorithm;

    /// Digest of a single argument tree.
    fn hash_value(&self, value: &Argument) -> Result<Digest, HashError>;

    /// Digest of a bound, filtered argument map.
    fn hash_arguments(&self, args: &FilteredArgs<'_>) -> Result<Digest, HashError>;
}

/// Identity of a cached call: which function, which arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub function_id: String,
    pub args_digest: Digest,
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.function_id, self.args_digest)
    }
}

/// Filter `args`/`kwargs` through `function`'s signature and ignore list,
/// then hash what remains.
pub fn compute_argument_hash(
    hasher: &dyn ArgumentHasher,
    function: &MemoizedFunction,
    args: &[Argument],
    kwargs: &BTreeMap<String, Argument>,
) -> Result<Digest, HashError> {
    let filtered = function.filter_args(args, kwargs)?;
    let digest = hasher.hash_arguments(&filtered)?;
    debug!(
        function = function.function_id(),
        arguments = filtered.len(),
        digest = %digest,
        "Computed argument hash"
    );
    Ok(digest)
}

/// [`compute_argument_hash`] packaged with the function identity.
pub fn cache_key(
    hasher: &dyn ArgumentHasher,
    function: &MemoizedFunction,
    args: &[Argument],
    kwargs: &BTreeMap<String, Argument>,
) -> Result<CacheKey, HashError> {
    Ok(CacheKey {
        function_id: function.function_id().to_string(),
        args_digest: compute_argument_hash(hasher, function, args, kwargs)?,
    })
}

/// Hash one value with the image-aware strategy.
pub fn hash_value(
    value: &Argument,
    algorithm: HashAlgorithm,
    coerce_mmap: bool,
) -> Result<Digest, HashError> {
    ImageAwareHasher::new(HashingConfig {
        algorithm,
        coerce_mmap,
    })
    .hash_value(value)
}

/// Hashes file-backed images by `(filename, mtime)` and everything else by
/// content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageAwareHasher {
    config: HashingConfig,
}

impl ImageAwareHasher {
    pub fn new(config: HashingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HashingConfig {
        &self.config
    }
}

impl ArgumentHasher for ImageAwareHasher {
    fn algorithm(&self) -> HashAlgorithm {
        self.config.algorithm
    }

    fn hash_value(&self, value: &Argument) -> Result<Digest, HashError> {
        let mut enc = Encoder::new(self.config, true);
        enc.value(value)?;
        Ok(enc.finish())
    }

    fn hash_arguments(&self, args: &FilteredArgs<'_>) -> Result<Digest, HashError> {
        let mut enc = Encoder::new(self.config, true);
        enc.filtered(args)?;
        Ok(enc.finish())
    }
}

/// Hashes every image by full content, filename included. This is the
/// behavior without the file shortcut; every call reads all voxels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentHasher {
    config: HashingConfig,
}

impl ContentHasher {
    pub fn new(config: HashingConfig) -> Self {
        Self { config }
    }
}

impl ArgumentHasher for ContentHasher {
    fn algorithm(&self) -> HashAlgorithm {
        self.config.algorithm
    }

    fn hash_value(&self, value: &Argument) -> Result<Digest, HashError> {
        let mut enc = Encoder::new(self.config, false);
        enc.value(value)?;
        Ok(enc.finish())
    }

    fn hash_arguments(&self, args: &FilteredArgs<'_>) -> Result<Digest, HashError> {
        let mut enc = Encoder::new(self.config, false);
        enc.filtered(args)?;
        Ok(enc.finish())
    }
}

struct Encoder {
    state: DigestState,
    coerce_mmap: bool,
    file_surrogates: bool,
}

impl Encoder {
    fn new(config: HashingConfig, file_surrogates: bool) -> Self {
        Self {
            state: DigestState::new(config.algorithm),
            coerce_mmap: config.coerce_mmap,
            file_surrogates,
        }
    }

    fn finish(self) -> Digest {
        self.state.finalize()
    }

    fn tag(&mut self, tag: u8) {
        self.state.update(&[tag]);
    }

    fn len(&mut self, len: usize) {
        self.state.update(&(len as u64).to_le_bytes());
    }

    fn bytes(&mut self, bytes: &[u8]) {
        self.len(bytes.len());
        self.state.update(bytes);
    }

    fn str(&mut self, s: &str) {
        self.bytes(s.as_bytes());
    }

    fn path(&mut self, path: &Path) {
        self.bytes(path.as_os_str().as_encoded_bytes());
    }

    fn filtered(&mut self, args: &FilteredArgs<'_>) -> Result<(), HashError> {
        self.tag(tag::MAP);
        self.len(args.len());
        for (name, bound) in args {
            self.str(name);
            match bound {
                BoundArg::One(v) => self.value(v)?,
                BoundArg::Many(items) => {
                    self.tag(tag::LIST);
                    self.len(items.len());
                    for item in items {
                        self.value(item)?;
                    }
                }
                BoundArg::Named(map) => {
                    self.tag(tag::MAP);
                    self.len(map.len());
                    for (k, v) in map {
                        self.str(k);
                        self.value(v)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn value(&mut self, value: &Argument) -> Result<(), HashError> {
        match value {
            Argument::None => self.tag(tag::NONE),
            Argument::Bool(b) => {
                self.tag(tag::BOOL);
                self.state.update(&[u8::from(*b)]);
            }
            Argument::Int(i) => {
                self.tag(tag::INT);
                self.state.update(&i.to_le_bytes());
            }
            Argument::Float(x) => {
                self.tag(tag::FLOAT);
                self.state.update(&x.to_bits().to_le_bytes());
            }
            Argument::Str(s) => {
                self.tag(tag::STR);
                self.str(s);
            }
            Argument::Path(p) => {
                self.tag(tag::PATH);
                self.path(p);
            }
            Argument::Bytes(b) => {
                self.tag(tag::BYTES);
                self.bytes(b);
            }
            Argument::List(items) => {
                self.tag(tag::LIST);
                self.len(items.len());
                for item in items {
                    self.value(item)?;
                }
            }
            Argument::Map(map) => {
                self.tag(tag::MAP);
                self.len(map.len());
                for (k, v) in map {
                    self.str(k);
                    self.value(v)?;
                }
            }
            Argument::Array(a) => self.array(a, STORAGE_IN_MEMORY),
            Argument::Image(img) => self.image(img)?,
        }
        Ok(())
    }

    fn array(&mut self, array: &VoxelArray, storage: &str) {
        self.tag(tag::ARRAY);
        self.str(if self.coerce_mmap {
            STORAGE_IN_MEMORY
        } else {
            storage
        });
        self.str(array.dtype().name());
        self.len(array.shape().len());
        for &d in array.shape() {
            self.len(d);
        }
        self.bytes(&array.to_le_bytes());
    }

    fn image(&mut self, img: &ImageHandle) -> Result<(), HashError> {
        if self.file_surrogates {
            if let Some(path) = img.filename() {
                return self.file_image(path);
            }
        }

        self.tag(tag::IMAGE);
        self.str(ImageHandle::TYPE_TAG);
        for row in img.affine() {
            for v in row {
                self.state.update(&v.to_bits().to_le_bytes());
            }
        }
        // Field order of the header struct is fixed, so its JSON is stable.
        let header = serde_json::to_vec(img.header()).map_err(|source| HashError::Serialize {
            what: "header",
            source,
        })?;
        self.bytes(&header);
        match img.dataobj() {
            DataObj::Array(a) => self.array(a, STORAGE_IN_MEMORY),
            DataObj::Proxy(p) => self.array(&p.read()?, STORAGE_FILE_REGION),
        }
        match img.filename() {
            Some(path) => {
                self.tag(tag::PATH);
                self.path(path);
            }
            None => self.tag(tag::NONE),
        }
        let extra = serde_json::to_vec(img.extra()).map_err(|source| HashError::Serialize {
            what: "extra",
            source,
        })?;
        self.bytes(&extra);
        Ok(())
    }

    fn file_image(&mut self, path: &Path) -> Result<(), HashError> {
        let metadata = std::fs::metadata(path).map_err(|source| HashError::Stat {
            path: path.to_path_buf(),
            source,
        })?;
        let modified = metadata.modified().map_err(|source| HashError::Stat {
            path: path.to_path_buf(),
            source,
        })?;
        let mtime_ns = mtime_nanos(modified);

        self.tag(tag::FILE_IMAGE);
        self.str(ImageHandle::TYPE_TAG);
        self.str(FILE_MARKER);
        self.path(path);
        self.state.update(&mtime_ns.to_le_bytes());
        debug!(path = %path.display(), mtime_ns, "Hashed image by file surrogate");
        Ok(())
    }
}

/// Signed nanoseconds since the Unix epoch.
fn mtime_nanos(time: SystemTime) -> i128 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_nanos() as i128,
        Err(e) => -(e.duration().as_nanos() as i128),
    }
}
