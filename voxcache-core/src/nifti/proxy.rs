//! Lazily-read voxel data backed by a region of an image file.

use crate::error::NiftiError;
use crate::nifti::array::{VoxelArray, payload_len};
use crate::nifti::dtype::DataType;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;

/// Reference to voxel data stored uncompressed in a file.
///
/// Nothing is read until [`ArrayProxy::read`] is called, so cloning or
/// serializing a proxy never touches the voxel payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayProxy {
    pub path: PathBuf,
    pub offset: u64,
    pub shape: Vec<usize>,
    /// On-disk element type.
    pub dtype: DataType,
    pub big_endian: bool,
    /// `(slope, inter)` applied after decoding, if any.
    #[serde(default)]
    pub scaling: Option<(f64, f64)>,
}

impl ArrayProxy {
    /// Number of payload bytes the proxy covers.
    pub fn byte_len(&self) -> Result<usize, NiftiError> {
        payload_len(&self.shape, self.dtype)
    }

    /// Offset one past the last payload byte.
    pub fn end_offset(&self) -> Result<u64, NiftiError> {
        u64::try_from(self.byte_len()?)
            .ok()
            .and_then(|len| self.offset.checked_add(len))
            .ok_or_else(|| NiftiError::InvalidHeader {
                message: format!("payload at offset {} runs past the end of any file", self.offset),
            })
    }

    /// Element type of the array `read` returns.
    pub fn output_dtype(&self) -> DataType {
        if self.scaling.is_some() {
            DataType::F64
        } else {
            self.dtype
        }
    }

    pub fn read(&self) -> Result<VoxelArray, NiftiError> {
        let io_err = |source| NiftiError::Io {
            path: self.path.clone(),
            source,
        };
        let expected = self.byte_len()?;
        let mut file = File::open(&self.path).map_err(io_err)?;
        file.seek(SeekFrom::Start(self.offset)).map_err(io_err)?;
        let mut buf = Vec::with_capacity(expected);
        file.take(expected as u64)
            .read_to_end(&mut buf)
            .map_err(io_err)?;
        let raw = VoxelArray::from_bytes(self.dtype, &self.shape, &buf, self.big_endian)?;
        Ok(match self.scaling {
            Some((slope, inter)) => raw.scaled(slope, inter),
            None => raw,
        })
    }
}
