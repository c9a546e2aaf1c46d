//! Functions for reading statistical brain volumes from NIfTI-1 files (.nii and .nii.gz).


use byteordered::{ByteOrdered, Endianness};
use flate2::bufread::GzDecoder;
use ndarray::{ArrayD, IxDyn, ShapeBuilder};

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use crate::error::{NarpsError, Result};
use crate::util::is_gz_file;

pub const NIFTI1_HEADER_SIZE: usize = 348;

pub const NIFTI_TYPE_UINT8: i16 = 2;
pub const NIFTI_TYPE_INT16: i16 = 4;
pub const NIFTI_TYPE_INT32: i16 = 8;
pub const NIFTI_TYPE_FLOAT32: i16 = 16;
pub const NIFTI_TYPE_FLOAT64: i16 = 64;
pub const NIFTI_TYPE_INT8: i16 = 256;
pub const NIFTI_TYPE_UINT16: i16 = 512;
pub const NIFTI_TYPE_UINT32: i16 = 768;

/// Models the header fields of a NIfTI-1 file needed to read its voxels.
#[derive(Debug, Clone, PartialEq)]
pub struct NiftiHeader {
    pub endianness: Endianness,
    pub dim: [i16; 8],
    pub datatype: i16,
    pub bitpix: i16,
    pub pixdim: [f32; 8],
    pub vox_offset: f32,
    pub scl_slope: f32,
    pub scl_inter: f32,
    pub magic: [u8; 4],
}


impl Default for NiftiHeader {
    fn default() -> NiftiHeader {
        NiftiHeader {
            endianness: Endianness::Little,
            dim: [0; 8],
            datatype: NIFTI_TYPE_FLOAT32,
            bitpix: 32,
            pixdim: [0.; 8],
            vox_offset: 352.,
            scl_slope: 0.,
            scl_inter: 0.,
            magic: *b"n+1\0",
        }
    }
}


fn field<'a>(raw: &'a [u8], offset: usize, endianness: Endianness) -> ByteOrdered<&'a [u8], Endianness> {
    ByteOrdered::runtime(&raw[offset..], endianness)
}


impl NiftiHeader {

    /// Read a NIfTI-1 header from the given byte stream, which must be at the start of the file.
    /// The byte order is detected from the `sizeof_hdr` field.
    pub fn from_reader<S>(input: &mut S) -> Result<NiftiHeader>
    where
        S: Read,
    {
        let mut raw = [0u8; NIFTI1_HEADER_SIZE];
        input.read_exact(&mut raw)?;

        let endianness = if field(&raw, 0, Endianness::Little).read_i32()? == NIFTI1_HEADER_SIZE as i32 {
            Endianness::Little
        } else if field(&raw, 0, Endianness::Big).read_i32()? == NIFTI1_HEADER_SIZE as i32 {
            Endianness::Big
        } else {
            return Err(NarpsError::InvalidNiftiFormat);
        };

        let mut hdr = NiftiHeader::default();
        hdr.endianness = endianness;

        let mut dims = field(&raw, 40, endianness);
        for d in &mut hdr.dim {
            *d = dims.read_i16()?;
        }

        hdr.datatype = field(&raw, 70, endianness).read_i16()?;
        hdr.bitpix = field(&raw, 72, endianness).read_i16()?;

        let mut pixdims = field(&raw, 76, endianness);
        for p in &mut hdr.pixdim {
            *p = pixdims.read_f32()?;
        }

        hdr.vox_offset = field(&raw, 108, endianness).read_f32()?;
        hdr.scl_slope = field(&raw, 112, endianness).read_f32()?;
        hdr.scl_inter = field(&raw, 116, endianness).read_f32()?;
        hdr.magic.copy_from_slice(&raw[344..348]);

        // Only single-file volumes, "ni1" headers keep their data in a separate .img file.
        if &hdr.magic != b"n+1\0" {
            return Err(NarpsError::InvalidNiftiFormat);
        }
        if hdr.dim[0] < 1 || hdr.dim[0] > 7 {
            return Err(NarpsError::InvalidNiftiFormat);
        }
        Ok(hdr)
    }

    /// The volume shape, from `dim[1..=dim[0]]`.
    pub fn shape(&self) -> Vec<usize> {
        let ndim = self.dim[0] as usize;
        self.dim[1..=ndim].iter().map(|&d| d.max(0) as usize).collect()
    }

    /// Number of voxels, or `InvalidNiftiFormat` if the dimensions overflow `usize`.
    pub fn num_voxels(&self) -> Result<usize> {
        self.shape()
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .ok_or(NarpsError::InvalidNiftiFormat)
    }

    fn scale(&self, value: f64) -> f64 {
        if self.scl_slope == 0. {
            value
        } else {
            value * self.scl_slope as f64 + self.scl_inter as f64
        }
    }
}


const MAX_PREALLOCATED_VOXELS: usize = 1 << 24;


/// Models a NIfTI-1 volume. Data is stored as `f64`, in the file's x-fastest order.
#[derive(Debug, Clone, PartialEq)]
pub struct NiftiVolume {
    pub header: NiftiHeader,
    pub data: ArrayD<f64>,
}


impl NiftiVolume {

    /// Read a NIfTI-1 volume from a file.
    /// If the file's name ends with ".gz", the file is decompressed while reading.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<NiftiVolume> {
        let gz = is_gz_file(&path);
        let file = BufReader::new(File::open(path)?);
        if gz {
            NiftiVolume::from_reader(GzDecoder::new(file))
        } else {
            NiftiVolume::from_reader(file)
        }
    }


    /// Read a single-file NIfTI-1 volume from the given byte stream, positioned at the header.
    pub fn from_reader<S>(mut input: S) -> Result<NiftiVolume>
    where
        S: Read,
    {
        let hdr = NiftiHeader::from_reader(&mut input)?;

        // Streams cannot seek, so skip the extension bytes up to the voxel data.
        let skip = (hdr.vox_offset as usize).saturating_sub(NIFTI1_HEADER_SIZE) as u64;
        io::copy(&mut (&mut input).take(skip), &mut io::sink())?;

        let n = hdr.num_voxels()?;
        // The header is not trusted for the allocation, a short stream fails at its end instead.
        let mut values: Vec<f64> = Vec::with_capacity(n.min(MAX_PREALLOCATED_VOXELS));
        let mut input = ByteOrdered::runtime(input, hdr.endianness);

        match hdr.datatype {
            NIFTI_TYPE_UINT8 => for _ in 0..n { values.push(input.read_u8()? as f64); },
            NIFTI_TYPE_INT8 => for _ in 0..n { values.push(input.read_i8()? as f64); },
            NIFTI_TYPE_INT16 => for _ in 0..n { values.push(input.read_i16()? as f64); },
            NIFTI_TYPE_UINT16 => for _ in 0..n { values.push(input.read_u16()? as f64); },
            NIFTI_TYPE_INT32 => for _ in 0..n { values.push(input.read_i32()? as f64); },
            NIFTI_TYPE_UINT32 => for _ in 0..n { values.push(input.read_u32()? as f64); },
            NIFTI_TYPE_FLOAT32 => for _ in 0..n { values.push(input.read_f32()? as f64); },
            NIFTI_TYPE_FLOAT64 => for _ in 0..n { values.push(input.read_f64()?); },
            other => return Err(NarpsError::UnsupportedNiftiDatatype(other)),
        }

        for v in values.iter_mut() {
            *v = hdr.scale(*v);
        }

        let data = ArrayD::from_shape_vec(IxDyn(&hdr.shape()).f(), values)
            .map_err(|_| NarpsError::InvalidNiftiFormat)?;

        Ok(NiftiVolume { header: hdr, data })
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }
}


/// Read a NIfTI-1 volume from a .nii or .nii.gz file.
pub fn read_nifti<P: AsRef<Path>>(path: P) -> Result<NiftiVolume> {
    NiftiVolume::from_file(path)
}


#[cfg(test)]
mod test {
    use super::*;

    fn header_bytes(dim: &[i16], datatype: i16, bitpix: i16, big_endian: bool) -> Vec<u8> {
        let mut raw = vec![0u8; 352];
        let put_i16 = |raw: &mut Vec<u8>, offset: usize, v: i16| {
            let b = if big_endian { v.to_be_bytes() } else { v.to_le_bytes() };
            raw[offset..offset + 2].copy_from_slice(&b);
        };
        let size = if big_endian { 348i32.to_be_bytes() } else { 348i32.to_le_bytes() };
        raw[0..4].copy_from_slice(&size);
        put_i16(&mut raw, 40, dim.len() as i16);
        for (i, d) in dim.iter().enumerate() {
            put_i16(&mut raw, 42 + 2 * i, *d);
        }
        put_i16(&mut raw, 70, datatype);
        put_i16(&mut raw, 72, bitpix);
        let offset = if big_endian { 352f32.to_be_bytes() } else { 352f32.to_le_bytes() };
        raw[108..112].copy_from_slice(&offset);
        raw[344..348].copy_from_slice(b"n+1\0");
        raw
    }

    #[test]
    fn little_endian_float_volume_can_be_read() {
        let mut raw = header_bytes(&[2, 2, 1], NIFTI_TYPE_FLOAT32, 32, false);
        for v in &[1.0f32, 2.0, 3.0, 4.0] {
            raw.extend_from_slice(&v.to_le_bytes());
        }
        let vol = NiftiVolume::from_reader(&raw[..]).unwrap();
        assert_eq!(&[2, 2, 1], vol.shape());
        // x varies fastest on disk
        assert_eq!(2.0, vol.data[&[1, 0, 0][..]]);
        assert_eq!(3.0, vol.data[&[0, 1, 0][..]]);
    }

    #[test]
    fn big_endian_scaled_shorts_can_be_read() {
        let mut raw = header_bytes(&[3, 1, 1], NIFTI_TYPE_INT16, 16, true);
        raw[112..116].copy_from_slice(&2f32.to_be_bytes());
        raw[116..120].copy_from_slice(&1f32.to_be_bytes());
        for v in &[1i16, -2, 3] {
            raw.extend_from_slice(&v.to_be_bytes());
        }
        let vol = NiftiVolume::from_reader(&raw[..]).unwrap();
        assert_eq!(Endianness::Big, vol.header.endianness);
        assert_eq!(vec![3.0, -3.0, 7.0], vol.data.iter().cloned().collect::<Vec<f64>>());
    }

    #[test]
    fn wrong_header_size_is_rejected() {
        let raw = vec![0u8; 400];
        assert!(matches!(
            NiftiVolume::from_reader(&raw[..]),
            Err(NarpsError::InvalidNiftiFormat)
        ));
    }

    #[test]
    fn unsupported_datatype_is_rejected() {
        let raw = header_bytes(&[1, 1, 1], 32, 64, false);
        assert!(matches!(
            NiftiVolume::from_reader(&raw[..]),
            Err(NarpsError::UnsupportedNiftiDatatype(32))
        ));
    }

    #[test]
    fn overflowing_dimensions_are_rejected() {
        let raw = header_bytes(&[32767; 7], NIFTI_TYPE_UINT8, 8, false);
        let hdr = NiftiHeader::from_reader(&mut &raw[..]).unwrap();
        assert!(matches!(hdr.num_voxels(), Err(NarpsError::InvalidNiftiFormat)));
        assert!(matches!(
            NiftiVolume::from_reader(&raw[..]),
            Err(NarpsError::InvalidNiftiFormat)
        ));
    }

    #[test]
    fn truncated_data_is_an_io_error() {
        let mut raw = header_bytes(&[2000, 2000, 2000], NIFTI_TYPE_FLOAT64, 64, false);
        raw.extend_from_slice(&1f64.to_le_bytes());
        assert!(matches!(NiftiVolume::from_reader(&raw[..]), Err(NarpsError::Io(_))));
    }

    #[test]
    fn two_file_headers_are_rejected() {
        let mut raw = header_bytes(&[1, 1, 1], NIFTI_TYPE_UINT8, 8, false);
        raw[344..348].copy_from_slice(b"ni1\0");
        raw.push(7);
        assert!(matches!(
            NiftiVolume::from_reader(&raw[..]),
            Err(NarpsError::InvalidNiftiFormat)
        ));
    }
}
