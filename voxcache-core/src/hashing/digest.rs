//! Digest algorithms and fixed-length digests.

use crate::error::HashError;
use serde::{Deserialize, Serialize};
use sha2::Digest as _;
use std::fmt;
use std::str::FromStr;

/// Length of every digest voxcache produces.
pub const DIGEST_LEN: usize = 32;

/// Hash algorithm used for cache keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// BLAKE3: fast, the default.
    #[default]
    Blake3,
    /// SHA-256: slower, for callers that want a standardized digest.
    Sha256,
}

impl HashAlgorithm {
    pub fn name(self) -> &'static str {
        match self {
            HashAlgorithm::Blake3 => "blake3",
            HashAlgorithm::Sha256 => "sha256",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "blake3" => Ok(HashAlgorithm::Blake3),
            "sha256" | "sha-256" => Ok(HashAlgorithm::Sha256),
            _ => Err(HashError::UnknownAlgorithm {
                name: s.to_string(),
            }),
        }
    }
}

/// A finished digest, tagged with the algorithm that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Digest {
    pub algorithm: HashAlgorithm,
    pub bytes: [u8; DIGEST_LEN],
}

impl Digest {
    pub fn to_hex(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.bytes {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// Incremental digest computation over either algorithm.
pub(crate) enum DigestState {
    Blake3(Box<blake3::Hasher>),
    Sha256(sha2::Sha256),
}

impl DigestState {
    pub(crate) fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Blake3 => DigestState::Blake3(Box::new(blake3::Hasher::new())),
            HashAlgorithm::Sha256 => DigestState::Sha256(sha2::Sha256::new()),
        }
    }

    pub(crate) fn update(&mut self, bytes: &[u8]) {
        match self {
            DigestState::Blake3(h) => {
                h.update(bytes);
            }
            DigestState::Sha256(h) => h.update(bytes),
        }
    }

    pub(crate) fn finalize(self) -> Digest {
        match self {
            DigestState::Blake3(h) => Digest {
                algorithm: HashAlgorithm::Blake3,
                bytes: *h.finalize().as_bytes(),
            },
            DigestState::Sha256(h) => Digest {
                algorithm: HashAlgorithm::Sha256,
                bytes: h.finalize().into(),
            },
        }
    }
}
