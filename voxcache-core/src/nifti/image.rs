//! Spatial image handles: voxel data plus affine, header and source file.

use crate::error::NiftiError;
use crate::nifti::array::VoxelArray;
use crate::nifti::dtype::DataType;
use crate::nifti::header::{Affine, NiftiHeader};
use crate::nifti::proxy::ArrayProxy;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Voxel storage of an image: materialized in memory or read on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataObj {
    Array(VoxelArray),
    Proxy(ArrayProxy),
}

impl DataObj {
    pub fn shape(&self) -> &[usize] {
        match self {
            DataObj::Array(a) => a.shape(),
            DataObj::Proxy(p) => &p.shape,
        }
    }

    /// Element type of the materialized data.
    pub fn dtype(&self) -> DataType {
        match self {
            DataObj::Array(a) => a.dtype(),
            DataObj::Proxy(p) => p.output_dtype(),
        }
    }

    pub fn is_proxy(&self) -> bool {
        matches!(self, DataObj::Proxy(_))
    }
}

/// An immutable spatial image.
///
/// When `filename` is set and the file has not been modified since the
/// handle was created, the handle's content is assumed to equal the file's.
/// Cache keys rely on this; data access never does.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageHandle {
    dataobj: DataObj,
    affine: Affine,
    header: NiftiHeader,
    filename: Option<PathBuf>,
    extra: BTreeMap<String, serde_json::Value>,
}

impl ImageHandle {
    /// Type tag used wherever an image must be identified by kind.
    pub const TYPE_TAG: &'static str = "ImageHandle";

    /// In-memory image with a header derived from the data. Fails when the
    /// shape cannot be described by a NIfTI-1 header.
    pub fn new(data: VoxelArray, affine: Affine) -> Result<Self, NiftiError> {
        let header = NiftiHeader::for_array(data.shape(), data.dtype(), &affine)?;
        Ok(Self {
            dataobj: DataObj::Array(data),
            affine,
            header,
            filename: None,
            extra: BTreeMap::new(),
        })
    }

    /// Image whose header is `header` updated to agree with `dataobj` and `affine`.
    pub fn with_header(
        dataobj: DataObj,
        affine: Affine,
        mut header: NiftiHeader,
    ) -> Result<Self, NiftiError> {
        header.set_shape(dataobj.shape())?;
        if let DataObj::Array(a) = &dataobj {
            header.set_data_type(a.dtype());
            header.scl_slope = 0.0;
            header.scl_inter = 0.0;
        }
        if header.affine() != affine {
            header.set_affine(&affine);
        }
        Ok(Self {
            dataobj,
            affine,
            header,
            filename: None,
            extra: BTreeMap::new(),
        })
    }

    /// Image read from `filename`, with the header kept exactly as stored.
    pub(crate) fn from_file(dataobj: DataObj, header: NiftiHeader, filename: PathBuf) -> Self {
        Self {
            affine: header.affine(),
            dataobj,
            header,
            filename: Some(filename),
            extra: BTreeMap::new(),
        }
    }

    /// New in-memory image of `data` sharing this image's affine and header
    /// metadata. The result has no filename.
    pub fn new_like(&self, data: VoxelArray) -> Result<Self, NiftiError> {
        Self::with_header(DataObj::Array(data), self.affine, self.header.clone())
    }

    pub fn dataobj(&self) -> &DataObj {
        &self.dataobj
    }

    pub fn affine(&self) -> &Affine {
        &self.affine
    }

    pub fn header(&self) -> &NiftiHeader {
        &self.header
    }

    /// Header fields not derived from data or affine (description, units,
    /// intent) may be edited in place.
    pub fn header_mut(&mut self) -> &mut NiftiHeader {
        &mut self.header
    }

    pub fn filename(&self) -> Option<&Path> {
        self.filename.as_deref()
    }

    pub fn set_filename(&mut self, filename: Option<PathBuf>) {
        self.filename = filename;
    }

    pub fn extra(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.extra
    }

    pub fn extra_mut(&mut self) -> &mut BTreeMap<String, serde_json::Value> {
        &mut self.extra
    }

    pub fn shape(&self) -> &[usize] {
        self.dataobj.shape()
    }

    /// Element type recorded in the header, `None` if the code is unknown.
    pub fn data_dtype(&self) -> Option<DataType> {
        self.header.data_type()
    }

    /// Voxel data, reading it from disk if the image is proxy-backed.
    pub fn data(&self) -> Result<Cow<'_, VoxelArray>, NiftiError> {
        match &self.dataobj {
            DataObj::Array(a) => Ok(Cow::Borrowed(a)),
            DataObj::Proxy(p) => p.read().map(Cow::Owned),
        }
    }

    /// Short human-readable description for error messages.
    pub fn short_repr(&self) -> String {
        match &self.filename {
            Some(path) => format!("{}('{}')", Self::TYPE_TAG, path.display()),
            None => format!(
                "{}(shape={:?}, dtype={})",
                Self::TYPE_TAG,
                self.shape(),
                self.dataobj.dtype()
            ),
        }
    }
}
