//! Serializable snapshot of an [`ImageHandle`].
//!
//! Proxy-backed images serialize their proxy (a file reference), not the
//! voxel buffer, so snapshots of file images stay small.

use crate::error::NiftiError;
use crate::nifti::header::{Affine, NiftiHeader};
use crate::nifti::image::{DataObj, ImageHandle};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageState {
    pub dataobj: DataObj,
    pub header: NiftiHeader,
    pub filename: Option<PathBuf>,
    pub affine: Affine,
    #[serde(default)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ImageHandle {
    pub fn to_state(&self) -> ImageState {
        ImageState {
            dataobj: self.dataobj().clone(),
            header: self.header().clone(),
            filename: self.filename().map(PathBuf::from),
            affine: *self.affine(),
            extra: self.extra().clone(),
        }
    }

    /// Rebuild an image through the regular constructor, then restore the
    /// filename.
    pub fn from_state(state: ImageState) -> Result<Self, NiftiError> {
        let mut image = ImageHandle::with_header(state.dataobj, state.affine, state.header)?;
        *image.extra_mut() = state.extra;
        image.set_filename(state.filename);
        Ok(image)
    }
}
