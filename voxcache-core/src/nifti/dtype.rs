//! Voxel data types and the dtype coercion policy applied on load.

use crate::error::NiftiError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Element type of a voxel buffer.
///
/// Each variant maps to a NIfTI-1 `datatype` code through [`DataType::code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
}

impl DataType {
    pub const ALL: [DataType; 10] = [
        DataType::U8,
        DataType::I8,
        DataType::U16,
        DataType::I16,
        DataType::U32,
        DataType::I32,
        DataType::U64,
        DataType::I64,
        DataType::F32,
        DataType::F64,
    ];

    /// NIfTI-1 datatype code.
    pub fn code(self) -> i16 {
        match self {
            DataType::U8 => 2,
            DataType::I16 => 4,
            DataType::I32 => 8,
            DataType::F32 => 16,
            DataType::F64 => 64,
            DataType::I8 => 256,
            DataType::U16 => 512,
            DataType::U32 => 768,
            DataType::I64 => 1024,
            DataType::U64 => 1280,
        }
    }

    /// Look up a NIfTI-1 datatype code. Complex, RGB and float128 codes are
    /// not supported and yield `None`.
    pub fn from_code(code: i16) -> Option<Self> {
        Self::ALL.into_iter().find(|dt| dt.code() == code)
    }

    /// Size of one element in bytes.
    pub fn size(self) -> usize {
        match self {
            DataType::U8 | DataType::I8 => 1,
            DataType::U16 | DataType::I16 => 2,
            DataType::U32 | DataType::I32 | DataType::F32 => 4,
            DataType::U64 | DataType::I64 | DataType::F64 => 8,
        }
    }

    /// Bits per voxel as stored in the header's `bitpix` field.
    pub fn bitpix(self) -> i16 {
        (self.size() * 8) as i16
    }

    /// Whether the type holds discrete (integer) values.
    pub fn is_integer(self) -> bool {
        !matches!(self, DataType::F32 | DataType::F64)
    }

    pub fn name(self) -> &'static str {
        match self {
            DataType::U8 => "u8",
            DataType::I8 => "i8",
            DataType::U16 => "u16",
            DataType::I16 => "i16",
            DataType::U32 => "u32",
            DataType::I32 => "i32",
            DataType::U64 => "u64",
            DataType::I64 => "i64",
            DataType::F32 => "f32",
            DataType::F64 => "f64",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DataType {
    type Err = NiftiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        let alias = match normalized.as_str() {
            "uint8" => "u8",
            "int8" => "i8",
            "uint16" => "u16",
            "int16" => "i16",
            "uint32" => "u32",
            "int32" => "i32",
            "uint64" => "u64",
            "int64" => "i64",
            "float32" => "f32",
            "float64" => "f64",
            other => other,
        };
        Self::ALL
            .into_iter()
            .find(|dt| dt.name() == alias)
            .ok_or(NiftiError::UnknownDataTypeName {
                name: s.to_string(),
            })
    }
}

/// Requested target type for voxel data when loading an image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DtypeRequest {
    /// Leave the data type untouched.
    #[default]
    Keep,
    /// Integer sources become `i32`, everything else `f32`.
    Auto,
    /// Cast to exactly this type.
    Exact(DataType),
}

impl DtypeRequest {
    /// Resolve the request against the source type.
    ///
    /// Returns `None` when no cast is needed, including when the resolved
    /// target equals the source type.
    pub fn target_for(self, source: DataType) -> Option<DataType> {
        let target = match self {
            DtypeRequest::Keep => return None,
            DtypeRequest::Auto if source.is_integer() => DataType::I32,
            DtypeRequest::Auto => DataType::F32,
            DtypeRequest::Exact(dt) => dt,
        };
        (target != source).then_some(target)
    }
}

impl FromStr for DtypeRequest {
    type Err = NiftiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keep" | "none" => Ok(DtypeRequest::Keep),
            "auto" => Ok(DtypeRequest::Auto),
            other => other.parse().map(DtypeRequest::Exact),
        }
    }
}

impl fmt::Display for DtypeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DtypeRequest::Keep => f.write_str("keep"),
            DtypeRequest::Auto => f.write_str("auto"),
            DtypeRequest::Exact(dt) => dt.fmt(f),
        }
    }
}

impl TryFrom<String> for DtypeRequest {
    type Error = NiftiError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DtypeRequest> for String {
    fn from(value: DtypeRequest) -> Self {
        value.to_string()
    }
}
