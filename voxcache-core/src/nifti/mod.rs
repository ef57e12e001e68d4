//! Spatial images: NIfTI-1 codec, lazy voxel access and dtype coercion.

pub mod array;
pub mod dtype;
pub mod header;
pub mod image;
pub mod io;
pub mod loader;
pub mod proxy;
pub mod state;

pub use array::{Element, VoxelArray, VoxelStats};
pub use dtype::{DataType, DtypeRequest};
pub use header::{Affine, IDENTITY, NiftiHeader};
pub use image::{DataObj, ImageHandle};
pub use io::{read_image, write_image};
pub use loader::{ImageLoader, NiftiLoader, load_image};
pub use proxy::ArrayProxy;
pub use state::ImageState;

/// Write `image` to `path` (`.nii` or `.nii.gz`).
pub fn save(path: &std::path::Path, image: &ImageHandle) -> Result<(), crate::error::NiftiError> {
    write_image(path, image)
}
