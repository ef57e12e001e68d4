//! Image loading strategy and dtype coercion.

use crate::error::NiftiError;
use crate::hashing::Argument;
use crate::nifti::dtype::DtypeRequest;
use crate::nifti::image::ImageHandle;
use crate::nifti::io::read_image;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Strategy that turns a path into an image.
pub trait ImageLoader: Send + Sync + fmt::Debug {
    fn load(&self, path: &Path) -> Result<ImageHandle, NiftiError>;
}

/// Loads single-file NIfTI-1 images, keeping uncompressed voxel data on disk
/// until it is accessed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NiftiLoader;

impl ImageLoader for NiftiLoader {
    fn load(&self, path: &Path) -> Result<ImageHandle, NiftiError> {
        read_image(path)
    }
}

/// Resolve `reference` to an image and cast its voxels if `dtype` asks for it.
///
/// Strings and paths are loaded fresh through `loader`; images are used as
/// given. Any other argument is rejected with
/// [`NiftiError::NotSpatialImage`]. When a cast happens the result is a new
/// in-memory image without a filename.
pub fn load_image(
    loader: &dyn ImageLoader,
    reference: &Argument,
    dtype: DtypeRequest,
) -> Result<Arc<ImageHandle>, NiftiError> {
    let image = match reference {
        Argument::Str(s) => Arc::new(loader.load(Path::new(s))?),
        Argument::Path(p) => Arc::new(loader.load(p)?),
        Argument::Image(img) => Arc::clone(img),
        other => {
            return Err(NiftiError::NotSpatialImage {
                repr: other.short_repr(),
            });
        }
    };

    let source = match image.data_dtype() {
        Some(dt) => dt,
        None => {
            let fallback = image.data()?.dtype();
            debug!(
                code = image.header().datatype,
                fallback = %fallback,
                "Header datatype unknown, using data dtype"
            );
            fallback
        }
    };

    let Some(target) = dtype.target_for(source) else {
        return Ok(image);
    };

    debug!(source = %source, target = %target, "Casting image data");
    let cast = image.data()?.cast(target);
    Ok(Arc::new(image.new_like(cast)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nifti::dtype::DataType;
    use crate::nifti::header::IDENTITY;
    use crate::nifti::io::write_image;
    use ndarray::{Array, IxDyn};
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Debug, Default)]
    struct RecordingLoader {
        seen: Mutex<Vec<String>>,
    }

    impl ImageLoader for RecordingLoader {
        fn load(&self, path: &Path) -> Result<ImageHandle, NiftiError> {
            if let Ok(mut seen) = self.seen.lock() {
                seen.push(path.display().to_string());
            }
            let data = Array::from_shape_vec(IxDyn(&[2, 2, 1]), vec![1u16, 2, 3, 4]).unwrap();
            ImageHandle::new(data.into(), IDENTITY)
        }
    }

    fn float_image() -> Arc<ImageHandle> {
        let data = Array::from_shape_vec(IxDyn(&[2, 2, 2]), vec![0.5f64; 8]).unwrap();
        Arc::new(ImageHandle::new(data.into(), IDENTITY).unwrap())
    }

    #[test]
    fn test_string_argument_goes_through_loader() {
        let loader = RecordingLoader::default();
        let img = load_image(&loader, &Argument::Str("sub-01.nii".into()), DtypeRequest::Keep).unwrap();
        assert_eq!(img.data_dtype(), Some(DataType::U16));
        assert_eq!(*loader.seen.lock().unwrap(), vec!["sub-01.nii".to_string()]);
    }

    #[test]
    fn test_image_argument_is_reused_without_cast() {
        let img = float_image();
        let loaded = load_image(&NiftiLoader, &Argument::Image(Arc::clone(&img)), DtypeRequest::Keep).unwrap();
        assert!(Arc::ptr_eq(&img, &loaded));
    }

    #[test]
    fn test_auto_casts_integer_to_i32_and_float_to_f32() {
        let loader = RecordingLoader::default();
        let ints = load_image(&loader, &Argument::Str("x.nii".into()), DtypeRequest::Auto).unwrap();
        assert_eq!(ints.data_dtype(), Some(DataType::I32));
        assert_eq!(ints.data().unwrap().dtype(), DataType::I32);

        let floats = load_image(&loader, &float_image().into(), DtypeRequest::Auto).unwrap();
        assert_eq!(floats.data().unwrap().dtype(), DataType::F32);
        assert!(floats.filename().is_none());
    }

    #[test]
    fn test_exact_dtype_equal_to_source_keeps_handle() {
        let img = float_image();
        let loaded = load_image(
            &NiftiLoader,
            &Argument::Image(Arc::clone(&img)),
            DtypeRequest::Exact(DataType::F64),
        )
        .unwrap();
        assert!(Arc::ptr_eq(&img, &loaded));
    }

    #[test]
    fn test_non_image_argument_is_type_error() {
        let err = load_image(&NiftiLoader, &Argument::Int(5), DtypeRequest::Keep).unwrap_err();
        match err {
            NiftiError::NotSpatialImage { repr } => assert_eq!(repr, "5"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unknown_header_dtype_falls_back_to_data() {
        let mut img = (*float_image()).clone();
        img.header_mut().datatype = 1234;
        assert_eq!(img.data_dtype(), None);

        let loaded = load_image(&NiftiLoader, &img.into(), DtypeRequest::Auto).unwrap();
        assert_eq!(loaded.data().unwrap().dtype(), DataType::F32);
    }

    #[test]
    fn test_loads_real_file_with_matching_affine() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("anat.nii");
        let mut affine = IDENTITY;
        affine[0][0] = 2.0;
        affine[1][3] = -10.0;
        let data = Array::from_shape_vec(IxDyn(&[3, 3, 3]), (0..27).map(|v| v as u8).collect()).unwrap();
        let original = ImageHandle::new(data.into(), affine).unwrap();
        write_image(&path, &original).unwrap();

        let loaded = load_image(&NiftiLoader, &Argument::Path(path.clone()), DtypeRequest::Keep).unwrap();
        assert_eq!(loaded.affine(), &affine);
        assert_eq!(loaded.filename(), Some(path.as_path()));
        assert_eq!(loaded.header().datatype, original.header().datatype);
        assert_eq!(loaded.shape(), &[3, 3, 3]);
    }
}
