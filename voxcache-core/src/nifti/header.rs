//! NIfTI-1 header parsing, serialization and affine derivation.

use crate::error::NiftiError;
use crate::nifti::dtype::DataType;
use serde::{Deserialize, Serialize};

/// Size of a NIfTI-1 header in bytes.
pub const HEADER_SIZE: usize = 348;
/// Offset of voxel data in a single-file image with no extensions.
pub const DEFAULT_VOX_OFFSET: f32 = 352.0;

const MAGIC_SINGLE: &str = "n+1";
/// Largest `vox_offset` accepted when parsing.
const MAX_VOX_OFFSET: f32 = u32::MAX as f32;

/// 4x4 voxel-to-world transform, row major.
pub type Affine = [[f64; 4]; 4];

pub const IDENTITY: Affine = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

/// The NIfTI-1 header fields voxcache reads, preserves and writes back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NiftiHeader {
    pub dim: [i16; 8],
    pub intent_code: i16,
    pub datatype: i16,
    pub bitpix: i16,
    pub pixdim: [f32; 8],
    pub vox_offset: f32,
    pub scl_slope: f32,
    pub scl_inter: f32,
    pub xyzt_units: u8,
    pub cal_max: f32,
    pub cal_min: f32,
    pub descrip: String,
    pub qform_code: i16,
    pub sform_code: i16,
    pub quatern_b: f32,
    pub quatern_c: f32,
    pub quatern_d: f32,
    pub qoffset_x: f32,
    pub qoffset_y: f32,
    pub qoffset_z: f32,
    pub srow_x: [f32; 4],
    pub srow_y: [f32; 4],
    pub srow_z: [f32; 4],
    pub magic: String,
    /// Whether the on-disk header was big-endian.
    #[serde(default)]
    pub big_endian: bool,
}

impl Default for NiftiHeader {
    fn default() -> Self {
        Self {
            dim: [0, 1, 1, 1, 1, 1, 1, 1],
            intent_code: 0,
            datatype: DataType::F32.code(),
            bitpix: DataType::F32.bitpix(),
            pixdim: [1.0; 8],
            vox_offset: DEFAULT_VOX_OFFSET,
            scl_slope: 0.0,
            scl_inter: 0.0,
            xyzt_units: 0,
            cal_max: 0.0,
            cal_min: 0.0,
            descrip: String::new(),
            qform_code: 0,
            sform_code: 0,
            quatern_b: 0.0,
            quatern_c: 0.0,
            quatern_d: 0.0,
            qoffset_x: 0.0,
            qoffset_y: 0.0,
            qoffset_z: 0.0,
            srow_x: [1.0, 0.0, 0.0, 0.0],
            srow_y: [0.0, 1.0, 0.0, 0.0],
            srow_z: [0.0, 0.0, 1.0, 0.0],
            magic: MAGIC_SINGLE.to_string(),
            big_endian: false,
        }
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    big_endian: bool,
}

impl Reader<'_> {
    fn array<const N: usize>(&self, offset: usize) -> [u8; N] {
        let mut buf = [0u8; N];
        buf.copy_from_slice(&self.bytes[offset..offset + N]);
        buf
    }

    fn i16(&self, offset: usize) -> i16 {
        let b = self.array::<2>(offset);
        if self.big_endian {
            i16::from_be_bytes(b)
        } else {
            i16::from_le_bytes(b)
        }
    }

    fn f32(&self, offset: usize) -> f32 {
        let b = self.array::<4>(offset);
        if self.big_endian {
            f32::from_be_bytes(b)
        } else {
            f32::from_le_bytes(b)
        }
    }

    fn f32s<const N: usize>(&self, offset: usize) -> [f32; N] {
        std::array::from_fn(|i| self.f32(offset + 4 * i))
    }

    fn text(&self, offset: usize, len: usize) -> String {
        let raw = &self.bytes[offset..offset + len];
        let end = raw.iter().position(|&b| b == 0).unwrap_or(len);
        String::from_utf8_lossy(&raw[..end]).into_owned()
    }
}

impl NiftiHeader {
    /// Build a header describing an array of `shape` and `dtype` placed by `affine`.
    pub fn for_array(
        shape: &[usize],
        dtype: DataType,
        affine: &Affine,
    ) -> Result<Self, NiftiError> {
        let mut header = Self::default();
        header.set_shape(shape)?;
        header.set_data_type(dtype);
        header.set_affine(affine);
        Ok(header)
    }

    /// Parse a header from the first [`HEADER_SIZE`] bytes of a file.
    pub fn parse(bytes: &[u8]) -> Result<Self, NiftiError> {
        if bytes.len() < HEADER_SIZE {
            return Err(NiftiError::InvalidHeader {
                message: format!("expected {HEADER_SIZE} header bytes, found {}", bytes.len()),
            });
        }
        let size_bytes: [u8; 4] = [bytes[0], bytes[1], bytes[2], bytes[3]];
        let big_endian = if i32::from_le_bytes(size_bytes) == HEADER_SIZE as i32 {
            false
        } else if i32::from_be_bytes(size_bytes) == HEADER_SIZE as i32 {
            true
        } else {
            return Err(NiftiError::InvalidHeader {
                message: "sizeof_hdr is not 348 in either byte order".to_string(),
            });
        };
        let r = Reader { bytes, big_endian };

        let magic = r.text(344, 4);
        if magic != MAGIC_SINGLE {
            // "ni1" marks a .hdr/.img pair, which is not supported.
            return Err(NiftiError::InvalidHeader {
                message: format!("unsupported magic {magic:?}, expected single-file \"n+1\""),
            });
        }

        let dim: [i16; 8] = std::array::from_fn(|i| r.i16(40 + 2 * i));
        if !(1..=7).contains(&dim[0]) {
            return Err(NiftiError::InvalidHeader {
                message: format!("dim[0] must be within 1..=7, found {}", dim[0]),
            });
        }
        if dim[1..=dim[0] as usize].iter().any(|&d| d < 0) {
            return Err(NiftiError::InvalidHeader {
                message: format!("negative dimension in {:?}", &dim[1..=dim[0] as usize]),
            });
        }

        let vox_offset = r.f32(108);
        if !(0.0..=MAX_VOX_OFFSET).contains(&vox_offset) {
            return Err(NiftiError::InvalidHeader {
                message: format!("vox_offset {vox_offset} is out of range"),
            });
        }

        Ok(Self {
            dim,
            intent_code: r.i16(68),
            datatype: r.i16(70),
            bitpix: r.i16(72),
            pixdim: r.f32s::<8>(76),
            vox_offset,
            scl_slope: r.f32(112),
            scl_inter: r.f32(116),
            xyzt_units: bytes[123],
            cal_max: r.f32(124),
            cal_min: r.f32(128),
            descrip: r.text(148, 80),
            qform_code: r.i16(252),
            sform_code: r.i16(254),
            quatern_b: r.f32(256),
            quatern_c: r.f32(260),
            quatern_d: r.f32(264),
            qoffset_x: r.f32(268),
            qoffset_y: r.f32(272),
            qoffset_z: r.f32(276),
            srow_x: r.f32s::<4>(280),
            srow_y: r.f32s::<4>(296),
            srow_z: r.f32s::<4>(312),
            magic,
            big_endian,
        })
    }

    /// Serialize as a little-endian single-file header followed by the
    /// 4-byte empty extension block.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; HEADER_SIZE + 4];
        let mut put = |offset: usize, bytes: &[u8]| {
            out[offset..offset + bytes.len()].copy_from_slice(bytes);
        };
        put(0, &(HEADER_SIZE as i32).to_le_bytes());
        put(38, b"r");
        for (i, d) in self.dim.iter().enumerate() {
            put(40 + 2 * i, &d.to_le_bytes());
        }
        put(68, &self.intent_code.to_le_bytes());
        put(70, &self.datatype.to_le_bytes());
        put(72, &self.bitpix.to_le_bytes());
        for (i, p) in self.pixdim.iter().enumerate() {
            put(76 + 4 * i, &p.to_le_bytes());
        }
        put(108, &DEFAULT_VOX_OFFSET.to_le_bytes());
        put(112, &self.scl_slope.to_le_bytes());
        put(116, &self.scl_inter.to_le_bytes());
        put(123, &[self.xyzt_units]);
        put(124, &self.cal_max.to_le_bytes());
        put(128, &self.cal_min.to_le_bytes());
        let descrip = self.descrip.as_bytes();
        put(148, &descrip[..descrip.len().min(79)]);
        put(252, &self.qform_code.to_le_bytes());
        put(254, &self.sform_code.to_le_bytes());
        let quatern = [
            self.quatern_b,
            self.quatern_c,
            self.quatern_d,
            self.qoffset_x,
            self.qoffset_y,
            self.qoffset_z,
        ];
        for (i, q) in quatern.iter().enumerate() {
            put(256 + 4 * i, &q.to_le_bytes());
        }
        for (row, base) in [(&self.srow_x, 280), (&self.srow_y, 296), (&self.srow_z, 312)] {
            for (i, v) in row.iter().enumerate() {
                put(base + 4 * i, &v.to_le_bytes());
            }
        }
        put(344, MAGIC_SINGLE.as_bytes());
        out
    }

    /// Array shape, `dim[1..=dim[0]]`.
    pub fn shape(&self) -> Vec<usize> {
        let ndim = self.dim[0].clamp(0, 7) as usize;
        self.dim[1..=ndim].iter().map(|&d| d.max(0) as usize).collect()
    }

    /// Set `dim` from `shape`. NIfTI-1 stores at most 7 axes of at most
    /// `i16::MAX` voxels each; other shapes leave the header untouched.
    pub fn set_shape(&mut self, shape: &[usize]) -> Result<(), NiftiError> {
        let too_large = || NiftiError::InvalidHeader {
            message: format!("shape {shape:?} cannot be stored in a NIfTI-1 header"),
        };
        if shape.is_empty() || shape.len() > 7 {
            return Err(too_large());
        }
        let mut dim = [shape.len() as i16, 1, 1, 1, 1, 1, 1, 1];
        for (slot, &d) in dim[1..].iter_mut().zip(shape) {
            *slot = i16::try_from(d).map_err(|_| too_large())?;
        }
        self.dim = dim;
        Ok(())
    }

    /// On-disk element type, or `None` when the datatype code is not one
    /// voxcache can decode.
    pub fn data_type(&self) -> Option<DataType> {
        DataType::from_code(self.datatype)
    }

    pub fn set_data_type(&mut self, dtype: DataType) {
        self.datatype = dtype.code();
        self.bitpix = dtype.bitpix();
    }

    /// Intensity scaling `(slope, inter)` when it is not the identity.
    pub fn scaling(&self) -> Option<(f64, f64)> {
        let slope = self.scl_slope as f64;
        let inter = self.scl_inter as f64;
        if slope == 0.0 || !slope.is_finite() || (slope == 1.0 && inter == 0.0) {
            None
        } else {
            Some((slope, if inter.is_finite() { inter } else { 0.0 }))
        }
    }

    /// Voxel-to-world affine: sform when set, else qform, else a scaled
    /// base affine centred on the volume.
    pub fn affine(&self) -> Affine {
        if self.sform_code > 0 {
            self.sform_affine()
        } else if self.qform_code > 0 {
            self.qform_affine()
        } else {
            self.base_affine()
        }
    }

    /// Store `affine` as the sform (code 2, aligned) and update voxel sizes.
    pub fn set_affine(&mut self, affine: &Affine) {
        let row = |r: usize| -> [f32; 4] { std::array::from_fn(|c| affine[r][c] as f32) };
        self.srow_x = row(0);
        self.srow_y = row(1);
        self.srow_z = row(2);
        self.sform_code = 2;
        for c in 0..3 {
            let norm = (0..3).map(|r| affine[r][c] * affine[r][c]).sum::<f64>().sqrt();
            self.pixdim[c + 1] = norm as f32;
        }
    }

    fn sform_affine(&self) -> Affine {
        let row = |r: &[f32; 4]| -> [f64; 4] { std::array::from_fn(|c| r[c] as f64) };
        [
            row(&self.srow_x),
            row(&self.srow_y),
            row(&self.srow_z),
            [0.0, 0.0, 0.0, 1.0],
        ]
    }

    fn qform_affine(&self) -> Affine {
        let (b, c, d) = (
            self.quatern_b as f64,
            self.quatern_c as f64,
            self.quatern_d as f64,
        );
        let a = (1.0 - (b * b + c * c + d * d)).max(0.0).sqrt();
        let rot = [
            [
                a * a + b * b - c * c - d * d,
                2.0 * (b * c - a * d),
                2.0 * (b * d + a * c),
            ],
            [
                2.0 * (b * c + a * d),
                a * a + c * c - b * b - d * d,
                2.0 * (c * d - a * b),
            ],
            [
                2.0 * (b * d - a * c),
                2.0 * (c * d + a * b),
                a * a + d * d - b * b - c * c,
            ],
        ];
        let qfac = if self.pixdim[0] < 0.0 { -1.0 } else { 1.0 };
        let zooms = [
            self.pixdim[1] as f64,
            self.pixdim[2] as f64,
            self.pixdim[3] as f64 * qfac,
        ];
        let offset = [
            self.qoffset_x as f64,
            self.qoffset_y as f64,
            self.qoffset_z as f64,
        ];
        let mut affine = IDENTITY;
        for r in 0..3 {
            for col in 0..3 {
                affine[r][col] = rot[r][col] * zooms[col];
            }
            affine[r][3] = offset[r];
        }
        affine
    }

    fn base_affine(&self) -> Affine {
        let shape = self.shape();
        let extent = |i: usize| shape.get(i).copied().unwrap_or(1) as f64;
        let zoom = |i: usize| self.pixdim[i + 1].abs() as f64;
        let mut affine = IDENTITY;
        affine[0][0] = -zoom(0);
        affine[1][1] = zoom(1);
        affine[2][2] = zoom(2);
        affine[0][3] = (extent(0) - 1.0) / 2.0 * zoom(0);
        affine[1][3] = -(extent(1) - 1.0) / 2.0 * zoom(1);
        affine[2][3] = -(extent(2) - 1.0) / 2.0 * zoom(2);
        affine
    }
}
