//! Typed n-dimensional voxel buffers.
//!
//! A [`VoxelArray`] wraps an `ndarray::ArrayD` of one of the supported
//! [`DataType`]s. On-disk byte order follows NIfTI: first axis varies
//! fastest (Fortran order).

use crate::error::NiftiError;
use crate::nifti::dtype::DataType;
use ndarray::{ArrayD, IxDyn, ShapeBuilder};
use serde::{Deserialize, Serialize};

/// Byte length of a `shape` array of `dtype` elements. Fails instead of
/// overflowing on absurd shapes read from untrusted headers.
pub fn payload_len(shape: &[usize], dtype: DataType) -> Result<usize, NiftiError> {
    shape
        .iter()
        .try_fold(dtype.size(), |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| NiftiError::InvalidHeader {
            message: format!("{shape:?} {dtype} payload does not fit in memory"),
        })
}

/// Scalar element stored in a [`VoxelArray`].
pub trait Element: Copy + Send + Sync + 'static {
    const DTYPE: DataType;

    fn decode(chunk: &[u8], big_endian: bool) -> Self;
    fn encode_le(self, out: &mut Vec<u8>);
    fn to_f64(self) -> f64;
    fn to_i128(self) -> i128;
    fn from_f64(value: f64) -> Self;
    fn from_i128(value: i128) -> Self;
    fn wrap(array: ArrayD<Self>) -> VoxelArray;
}

macro_rules! impl_element {
    ($t:ty, $variant:ident) => {
        impl Element for $t {
            const DTYPE: DataType = DataType::$variant;

            fn decode(chunk: &[u8], big_endian: bool) -> Self {
                let mut buf = [0u8; std::mem::size_of::<$t>()];
                buf.copy_from_slice(chunk);
                if big_endian {
                    <$t>::from_be_bytes(buf)
                } else {
                    <$t>::from_le_bytes(buf)
                }
            }

            fn encode_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            fn to_f64(self) -> f64 {
                self as f64
            }

            fn to_i128(self) -> i128 {
                self as i128
            }

            fn from_f64(value: f64) -> Self {
                value as $t
            }

            fn from_i128(value: i128) -> Self {
                value as $t
            }

            fn wrap(array: ArrayD<Self>) -> VoxelArray {
                VoxelArray::$variant(array)
            }
        }

        impl From<ArrayD<$t>> for VoxelArray {
            fn from(array: ArrayD<$t>) -> Self {
                VoxelArray::$variant(array)
            }
        }
    };
}

/// An n-dimensional voxel buffer with a concrete element type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "dtype", content = "data", rename_all = "lowercase")]
pub enum VoxelArray {
    U8(ArrayD<u8>),
    I8(ArrayD<i8>),
    U16(ArrayD<u16>),
    I16(ArrayD<i16>),
    U32(ArrayD<u32>),
    I32(ArrayD<i32>),
    U64(ArrayD<u64>),
    I64(ArrayD<i64>),
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
}

macro_rules! dispatch {
    ($value:expr, $arr:ident => $body:expr) => {
        match $value {
            VoxelArray::U8($arr) => $body,
            VoxelArray::I8($arr) => $body,
            VoxelArray::U16($arr) => $body,
            VoxelArray::I16($arr) => $body,
            VoxelArray::U32($arr) => $body,
            VoxelArray::I32($arr) => $body,
            VoxelArray::U64($arr) => $body,
            VoxelArray::I64($arr) => $body,
            VoxelArray::F32($arr) => $body,
            VoxelArray::F64($arr) => $body,
        }
    };
}

macro_rules! with_dtype {
    ($dtype:expr, $t:ident => $body:expr) => {
        match $dtype {
            DataType::U8 => {
                type $t = u8;
                $body
            }
            DataType::I8 => {
                type $t = i8;
                $body
            }
            DataType::U16 => {
                type $t = u16;
                $body
            }
            DataType::I16 => {
                type $t = i16;
                $body
            }
            DataType::U32 => {
                type $t = u32;
                $body
            }
            DataType::I32 => {
                type $t = i32;
                $body
            }
            DataType::U64 => {
                type $t = u64;
                $body
            }
            DataType::I64 => {
                type $t = i64;
                $body
            }
            DataType::F32 => {
                type $t = f32;
                $body
            }
            DataType::F64 => {
                type $t = f64;
                $body
            }
        }
    };
}

impl_element!(u8, U8);
impl_element!(i8, I8);
impl_element!(u16, U16);
impl_element!(i16, I16);
impl_element!(u32, U32);
impl_element!(i32, I32);
impl_element!(u64, U64);
impl_element!(i64, I64);
impl_element!(f32, F32);
impl_element!(f64, F64);

/// Summary statistics over all voxels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoxelStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

impl VoxelArray {
    pub fn dtype(&self) -> DataType {
        match self {
            VoxelArray::U8(_) => DataType::U8,
            VoxelArray::I8(_) => DataType::I8,
            VoxelArray::U16(_) => DataType::U16,
            VoxelArray::I16(_) => DataType::I16,
            VoxelArray::U32(_) => DataType::U32,
            VoxelArray::I32(_) => DataType::I32,
            VoxelArray::U64(_) => DataType::U64,
            VoxelArray::I64(_) => DataType::I64,
            VoxelArray::F32(_) => DataType::F32,
            VoxelArray::F64(_) => DataType::F64,
        }
    }

    pub fn shape(&self) -> &[usize] {
        dispatch!(self, a => a.shape())
    }

    pub fn len(&self) -> usize {
        dispatch!(self, a => a.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decode a raw NIfTI voxel payload (Fortran order).
    pub fn from_bytes(
        dtype: DataType,
        shape: &[usize],
        bytes: &[u8],
        big_endian: bool,
    ) -> Result<Self, NiftiError> {
        let expected = payload_len(shape, dtype)?;
        let count = expected / dtype.size();
        if bytes.len() < expected {
            return Err(NiftiError::Truncated {
                expected,
                actual: bytes.len(),
            });
        }
        with_dtype!(dtype, T => {
            let values: Vec<T> = bytes[..expected]
                .chunks_exact(dtype.size())
                .map(|chunk| T::decode(chunk, big_endian))
                .collect();
            let array = ArrayD::from_shape_vec(IxDyn(shape).f(), values).map_err(|_| {
                NiftiError::ShapeMismatch {
                    expected: shape.to_vec(),
                    actual: vec![count],
                }
            })?;
            Ok(T::wrap(array))
        })
    }

    /// Little-endian bytes in Fortran order, the layout NIfTI stores on disk.
    ///
    /// The result depends only on shape, type and values, never on the
    /// in-memory layout of the underlying array.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len() * self.dtype().size());
        dispatch!(self, a => {
            for v in a.t().iter() {
                v.encode_le(&mut out);
            }
        });
        out
    }

    /// Convert every element to `target` with `as`-cast semantics.
    ///
    /// Integer to integer conversions wrap; conversions involving floats
    /// saturate and truncate toward zero.
    pub fn cast(&self, target: DataType) -> VoxelArray {
        if target == self.dtype() {
            return self.clone();
        }
        let integer_path = self.dtype().is_integer() && target.is_integer();
        dispatch!(self, a => with_dtype!(target, T => {
            let converted = if integer_path {
                a.mapv(|v| T::from_i128(v.to_i128()))
            } else {
                a.mapv(|v| T::from_f64(v.to_f64()))
            };
            T::wrap(converted)
        }))
    }

    /// Apply NIfTI intensity scaling `slope * v + inter`, producing `f64`.
    pub fn scaled(&self, slope: f64, inter: f64) -> VoxelArray {
        dispatch!(self, a => VoxelArray::F64(a.mapv(|v| v.to_f64() * slope + inter)))
    }

    pub fn stats(&self) -> Option<VoxelStats> {
        if self.is_empty() {
            return None;
        }
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        dispatch!(self, a => {
            for v in a.iter() {
                let x = v.to_f64();
                min = min.min(x);
                max = max.max(x);
                sum += x;
            }
        });
        Some(VoxelStats {
            min,
            max,
            mean: sum / self.len() as f64,
        })
    }
}
