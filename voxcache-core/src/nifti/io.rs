//! Reading and writing single-file NIfTI-1 images (`.nii`, `.nii.gz`).

use crate::error::NiftiError;
use crate::nifti::array::VoxelArray;
use crate::nifti::header::{HEADER_SIZE, NiftiHeader};
use crate::nifti::image::{DataObj, ImageHandle};
use crate::nifti::proxy::ArrayProxy;
use crate::persistence::atomic_write;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tracing::debug;

fn is_gzipped(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"))
}

fn io_error(path: &Path) -> impl Fn(std::io::Error) -> NiftiError + '_ {
    move |source| NiftiError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Read an image from disk.
///
/// Uncompressed files yield a proxy-backed image whose voxels are read on
/// first access. Compressed files are decompressed eagerly into memory.
/// Either way the returned handle records `path` as its filename.
pub fn read_image(path: &Path) -> Result<ImageHandle, NiftiError> {
    if is_gzipped(path) {
        return read_gzipped(path);
    }

    let mut file = File::open(path).map_err(io_error(path))?;
    let mut buf = [0u8; HEADER_SIZE];
    file.read_exact(&mut buf).map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => NiftiError::InvalidHeader {
            message: format!("{} is shorter than a NIfTI header", path.display()),
        },
        _ => io_error(path)(e),
    })?;
    let header = NiftiHeader::parse(&buf)?;
    let dtype = header
        .data_type()
        .ok_or(NiftiError::UnsupportedDataType {
            code: header.datatype,
        })?;

    let proxy = ArrayProxy {
        path: path.to_path_buf(),
        offset: header.vox_offset.max(HEADER_SIZE as f32) as u64,
        shape: header.shape(),
        dtype,
        big_endian: header.big_endian,
        scaling: header.scaling(),
    };

    let needed = proxy.end_offset()?;
    let file_len = file.metadata().map_err(io_error(path))?.len();
    if file_len < needed {
        return Err(NiftiError::Truncated {
            expected: usize::try_from(needed).unwrap_or(usize::MAX),
            actual: usize::try_from(file_len).unwrap_or(usize::MAX),
        });
    }

    debug!(
        path = %path.display(),
        shape = ?proxy.shape,
        dtype = %dtype,
        "Opened image as proxy"
    );
    Ok(ImageHandle::from_file(
        DataObj::Proxy(proxy),
        header,
        path.to_path_buf(),
    ))
}

fn read_gzipped(path: &Path) -> Result<ImageHandle, NiftiError> {
    let file = File::open(path).map_err(io_error(path))?;
    let mut bytes = Vec::new();
    GzDecoder::new(file)
        .read_to_end(&mut bytes)
        .map_err(io_error(path))?;

    let header = NiftiHeader::parse(&bytes)?;
    let dtype = header
        .data_type()
        .ok_or(NiftiError::UnsupportedDataType {
            code: header.datatype,
        })?;
    let offset = (header.vox_offset.max(HEADER_SIZE as f32) as usize).min(bytes.len());
    let raw = VoxelArray::from_bytes(dtype, &header.shape(), &bytes[offset..], header.big_endian)
        .map_err(|e| match e {
            NiftiError::Truncated { expected, .. } => NiftiError::Truncated {
                expected: expected.saturating_add(offset),
                actual: bytes.len(),
            },
            other => other,
        })?;
    let data = match header.scaling() {
        Some((slope, inter)) => raw.scaled(slope, inter),
        None => raw,
    };

    debug!(
        path = %path.display(),
        shape = ?data.shape(),
        dtype = %dtype,
        "Decompressed image into memory"
    );
    Ok(ImageHandle::from_file(
        DataObj::Array(data),
        header,
        path.to_path_buf(),
    ))
}

/// Write `image` as a single-file NIfTI-1 image, gzip-compressed when the
/// path ends in `.gz`. The header is brought in line with the data (shape,
/// dtype, affine) and intensity scaling is cleared, since the stored voxels
/// are already scaled.
pub fn write_image(path: &Path, image: &ImageHandle) -> Result<(), NiftiError> {
    let data = image.data()?;
    let mut header = image.header().clone();
    header.set_shape(data.shape())?;
    header.set_data_type(data.dtype());
    header.set_affine(image.affine());
    header.scl_slope = 0.0;
    header.scl_inter = 0.0;

    let mut payload = header.to_bytes();
    payload.extend_from_slice(&data.to_le_bytes());

    let bytes = if is_gzipped(path) {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&payload).map_err(io_error(path))?;
        encoder.finish().map_err(io_error(path))?
    } else {
        payload
    };

    atomic_write(path, &bytes).map_err(io_error(path))?;
    debug!(path = %path.display(), bytes = bytes.len(), "Wrote image");
    Ok(())
}
