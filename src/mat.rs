//! MATLAB MAT-file reader for recording payloads.
//!
//! Recordings are stored as a single 2-D numeric matrix named `val` with
//! shape `[n_leads, n_samples]`.  Both on-disk generations are supported:
//!
//! **Level 4** (what `wfdb2mat` writes) — a flat sequence of matrices:
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │ type : i32 │ mrows : i32 │ ncols : i32 │ imagf : i32 │ namlen : i32 │
//! ├────────────────────────────────────────────────────────────────┤
//! │ name (namlen bytes, NUL terminated)                            │
//! │ real part, column major   [imag part if imagf]                 │
//! └────────────────────────────────────────────────────────────────┘
//! type = M·1000 + O·100 + P·10 + T   (M: 0 little / 1 big endian,
//!                                     P: storage precision)
//! ```
//!
//! **Level 5** — 128-byte text header ending in the `IM`/`MI` endian
//! indicator, followed by tagged data elements.  `miMATRIX` elements hold
//! flags, dimensions, name and real part as sub-elements; `miCOMPRESSED`
//! elements wrap a zlib-compressed `miMATRIX`.
//!
//! Every numeric class is accepted; values are converted to `i32`
//! (floating-point values rounded, out-of-range values saturated).
use anyhow::{bail, Context, Result};
use flate2::read::ZlibDecoder;
use ndarray::{Array2, ShapeBuilder};
use std::io::Read;
use std::path::Path;

use crate::error::EcgDbError;

/// Name of the matrix holding the samples.
pub const VAL: &str = "val";

// Level 5 data types.
const MI_INT8: u32 = 1;
const MI_UINT8: u32 = 2;
const MI_INT16: u32 = 3;
const MI_UINT16: u32 = 4;
const MI_INT32: u32 = 5;
const MI_UINT32: u32 = 6;
const MI_SINGLE: u32 = 7;
const MI_DOUBLE: u32 = 9;
const MI_INT64: u32 = 12;
const MI_UINT64: u32 = 13;
const MI_MATRIX: u32 = 14;
const MI_COMPRESSED: u32 = 15;

// Level 5 array classes that carry plain numeric data.
const MX_DOUBLE: u32 = 6;
const MX_UINT64: u32 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endian {
    Little,
    Big,
}

impl Endian {
    fn u16(self, b: &[u8]) -> u16 {
        let a = [b[0], b[1]];
        match self {
            Endian::Little => u16::from_le_bytes(a),
            Endian::Big => u16::from_be_bytes(a),
        }
    }

    fn u32(self, b: &[u8]) -> u32 {
        let a = [b[0], b[1], b[2], b[3]];
        match self {
            Endian::Little => u32::from_le_bytes(a),
            Endian::Big => u32::from_be_bytes(a),
        }
    }

    fn u64(self, b: &[u8]) -> u64 {
        let mut a = [0u8; 8];
        a.copy_from_slice(&b[..8]);
        match self {
            Endian::Little => u64::from_le_bytes(a),
            Endian::Big => u64::from_be_bytes(a),
        }
    }
}

/// Load the `val` matrix of a recording file as `[n_leads, n_samples]`.
pub fn load_val(path: &Path) -> Result<Array2<i32>> {
    read_matrix(path, VAL)
}

/// Load the 2-D numeric matrix `name` from a MAT file.
pub fn read_matrix(path: &Path, name: &str) -> Result<Array2<i32>> {
    let bytes = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    parse_matrix(&bytes, name).with_context(|| format!("parse {}", path.display()))
}

/// Find the 2-D numeric matrix `name` in an in-memory MAT file.
pub fn parse_matrix(bytes: &[u8], name: &str) -> Result<Array2<i32>> {
    let found = if is_level5(bytes) {
        find_level5(bytes, name)?
    } else {
        find_level4(bytes, name)?
    };
    found.with_context(|| format!("no matrix named '{name}'"))
}

fn is_level5(bytes: &[u8]) -> bool {
    bytes.len() >= 128 && bytes.starts_with(b"MATLAB") && matches!(&bytes[126..128], b"IM" | b"MI")
}

/// Column-major values → standard-layout `[rows, cols]`.
fn to_array(rows: usize, cols: usize, values: Vec<i32>) -> Result<Array2<i32>> {
    let arr = Array2::from_shape_vec((rows, cols).f(), values)
        .context("matrix size does not match its dimensions")?;
    Ok(arr.as_standard_layout().into_owned())
}

fn slice(bytes: &[u8], start: usize, len: usize) -> Result<&[u8]> {
    start
        .checked_add(len)
        .and_then(|end| bytes.get(start..end))
        .with_context(|| format!("truncated file: need {len} bytes at offset {start}"))
}

fn saturate(v: i64) -> i32 {
    v.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

fn round_f64(v: f64) -> i32 {
    // `as` saturates and maps NaN to 0
    v.round() as i32
}

// ── Level 4 ───────────────────────────────────────────────────────────────

fn find_level4(bytes: &[u8], name: &str) -> Result<Option<Array2<i32>>> {
    let mut pos = 0usize;
    while pos + 20 <= bytes.len() {
        let head = &bytes[pos..pos + 20];
        // The M digit of the type word says how to read the type word itself.
        let le = Endian::Little.u32(head);
        let endian = if le < 5000 { Endian::Little } else { Endian::Big };
        let mopt = endian.u32(head) as usize;
        let field = |i: usize| endian.u32(&head[4 * i..]) as usize;
        let (mrows, ncols, imagf, namlen) = (field(1), field(2), field(3), field(4));

        let (m, o, p, t) = (mopt / 1000, (mopt / 100) % 10, (mopt / 10) % 10, mopt % 10);
        if m > 1 || o != 0 || t != 0 {
            bail!("not a numeric Level 4 matrix (type {mopt}) at offset {pos}");
        }
        let size = match p {
            0 => 8,
            1 | 2 => 4,
            3 | 4 => 2,
            5 => 1,
            _ => bail!("unknown Level 4 precision {p}"),
        };

        let name_bytes = slice(bytes, pos + 20, namlen)?;
        let var = String::from_utf8_lossy(name_bytes);
        let var = var.trim_end_matches('\0');
        let data_start = pos + 20 + namlen;
        let n = mrows * ncols;
        let parts = if imagf != 0 { 2 } else { 1 };
        let data_len = n * size * parts;

        if var == name {
            let raw = slice(bytes, data_start, n * size)?;
            let values = raw
                .chunks_exact(size)
                .map(|c| match p {
                    0 => round_f64(f64::from_bits(endian.u64(c))),
                    1 => round_f64(f32::from_bits(endian.u32(c)) as f64),
                    2 => endian.u32(c) as i32,
                    3 => endian.u16(c) as i16 as i32,
                    4 => endian.u16(c) as i32,
                    _ => c[0] as i32,
                })
                .collect();
            return to_array(mrows, ncols, values).map(Some);
        }
        pos = data_start + data_len;
    }
    Ok(None)
}

// ── Level 5 ───────────────────────────────────────────────────────────────

/// One data element: type, payload range and the offset of the next element.
struct Element {
    dtype: u32,
    start: usize,
    len:   usize,
    next:  usize,
}

fn read_element(bytes: &[u8], pos: usize, endian: Endian) -> Result<Element> {
    let tag = slice(bytes, pos, 8)?;
    let first = endian.u32(tag);
    if first >> 16 != 0 {
        // Small data element: type and size packed into the first word.
        return Ok(Element { dtype: first & 0xffff, start: pos + 4, len: (first >> 16) as usize, next: pos + 8 });
    }
    let len = endian.u32(&tag[4..]) as usize;
    let start = pos + 8;
    // Compressed elements are not padded.
    let padded = if first == MI_COMPRESSED { len } else { len.div_ceil(8) * 8 };
    Ok(Element { dtype: first, start, len, next: start + padded })
}

fn find_level5(bytes: &[u8], name: &str) -> Result<Option<Array2<i32>>> {
    let endian = if &bytes[126..128] == b"IM" { Endian::Little } else { Endian::Big };
    let mut pos = 128;
    while pos + 8 <= bytes.len() {
        let el = read_element(bytes, pos, endian)?;
        let payload = slice(bytes, el.start, el.len)?;
        match el.dtype {
            MI_MATRIX => {
                if let Some(arr) = parse_level5_matrix(payload, name, endian)? {
                    return Ok(Some(arr));
                }
            }
            MI_COMPRESSED => {
                let mut inner = Vec::new();
                ZlibDecoder::new(payload)
                    .read_to_end(&mut inner)
                    .context("inflate compressed element")?;
                let el = read_element(&inner, 0, endian)?;
                if el.dtype == MI_MATRIX {
                    let payload = slice(&inner, el.start, el.len)?;
                    if let Some(arr) = parse_level5_matrix(payload, name, endian)? {
                        return Ok(Some(arr));
                    }
                }
            }
            _ => {}
        }
        pos = el.next;
    }
    Ok(None)
}

fn parse_level5_matrix(m: &[u8], name: &str, endian: Endian) -> Result<Option<Array2<i32>>> {
    let flags = read_element(m, 0, endian)?;
    let class = endian.u32(slice(m, flags.start, 4)?) & 0xff;

    let dims_el = read_element(m, flags.next, endian)?;
    let dims: Vec<usize> = slice(m, dims_el.start, dims_el.len)?
        .chunks_exact(4)
        .map(|c| endian.u32(c) as usize)
        .collect();

    let name_el = read_element(m, dims_el.next, endian)?;
    let var = String::from_utf8_lossy(slice(m, name_el.start, name_el.len)?);
    if var != name {
        return Ok(None);
    }
    if !(MX_DOUBLE..=MX_UINT64).contains(&class) {
        bail!("'{name}' is not a numeric array (class {class})");
    }
    if dims.len() != 2 {
        bail!("'{name}' has {} dimensions, expected 2", dims.len());
    }

    let real = read_element(m, name_el.next, endian)?;
    let values = decode_level5(real.dtype, slice(m, real.start, real.len)?, endian)?;
    to_array(dims[0], dims[1], values).map(Some)
}

fn decode_level5(dtype: u32, raw: &[u8], endian: Endian) -> Result<Vec<i32>> {
    let size = match dtype {
        MI_INT8 | MI_UINT8 => 1,
        MI_INT16 | MI_UINT16 => 2,
        MI_INT32 | MI_UINT32 | MI_SINGLE => 4,
        MI_DOUBLE | MI_INT64 | MI_UINT64 => 8,
        other => return Err(EcgDbError::UnknownDataType(other).into()),
    };
    Ok(raw
        .chunks_exact(size)
        .map(|c| match dtype {
            MI_INT8 => c[0] as i8 as i32,
            MI_UINT8 => c[0] as i32,
            MI_INT16 => endian.u16(c) as i16 as i32,
            MI_UINT16 => endian.u16(c) as i32,
            MI_INT32 => endian.u32(c) as i32,
            MI_UINT32 => saturate(endian.u32(c) as i64),
            MI_SINGLE => round_f64(f32::from_bits(endian.u32(c)) as f64),
            MI_DOUBLE => round_f64(f64::from_bits(endian.u64(c))),
            MI_INT64 => saturate(endian.u64(c) as i64),
            _ => saturate(endian.u64(c).min(i64::MAX as u64) as i64),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{write::ZlibEncoder, Compression};
    use std::io::Write;

    fn level5_header() -> Vec<u8> {
        let mut h = format!("{:<116}", "MATLAB 5.0 MAT-file, Platform: test").into_bytes();
        h.extend_from_slice(&[0u8; 8]);
        h.extend_from_slice(&0x0100u16.to_le_bytes());
        h.extend_from_slice(b"IM");
        h
    }

    fn tag(dtype: u32, len: usize) -> Vec<u8> {
        let mut t = dtype.to_le_bytes().to_vec();
        t.extend_from_slice(&(len as u32).to_le_bytes());
        t
    }

    fn pad8(mut v: Vec<u8>) -> Vec<u8> {
        v.resize(v.len().div_ceil(8) * 8, 0);
        v
    }

    /// miMATRIX element holding an int16 `[rows, cols]` matrix (column-major `data`).
    fn level5_matrix(name: &str, rows: usize, cols: usize, data: &[i16]) -> Vec<u8> {
        let mut c = tag(MI_UINT32, 8);
        c.extend_from_slice(&10u32.to_le_bytes()); // mxINT16
        c.extend_from_slice(&0u32.to_le_bytes());
        c.extend(tag(MI_INT32, 8));
        c.extend_from_slice(&(rows as i32).to_le_bytes());
        c.extend_from_slice(&(cols as i32).to_le_bytes());
        // name as a small data element
        let mut small = (((name.len() as u32) << 16) | MI_INT8).to_le_bytes().to_vec();
        let mut nb = name.as_bytes().to_vec();
        nb.resize(4, 0);
        small.extend(nb);
        c.extend(small);
        let body: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        c.extend(tag(MI_INT16, body.len()));
        c.extend(pad8(body));
        let mut el = tag(MI_MATRIX, c.len());
        el.extend(c);
        el
    }

    fn level4(name: &str, rows: usize, cols: usize, data: &[i16]) -> Vec<u8> {
        let mut out = Vec::new();
        for v in [30i32, rows as i32, cols as i32, 0, name.len() as i32 + 1] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out.extend_from_slice(name.as_bytes());
        out.push(0);
        out.extend(data.iter().flat_map(|v| v.to_le_bytes()));
        out
    }

    // [[1, 2, 3], [-4, -5, -6]] in column-major order.
    const COL_MAJOR: [i16; 6] = [1, -4, 2, -5, 3, -6];

    fn check(arr: &Array2<i32>) {
        assert_eq!(arr.dim(), (2, 3));
        assert_eq!(arr.row(0).to_vec(), vec![1, 2, 3]);
        assert_eq!(arr.row(1).to_vec(), vec![-4, -5, -6]);
    }

    #[test]
    fn level4_int16() {
        let bytes = level4("val", 2, 3, &COL_MAJOR);
        check(&parse_matrix(&bytes, "val").unwrap());
    }

    #[test]
    fn level4_skips_other_matrices() {
        let mut bytes = level4("other", 1, 2, &[9, 9]);
        bytes.extend(level4("val", 2, 3, &COL_MAJOR));
        check(&parse_matrix(&bytes, "val").unwrap());
    }

    #[test]
    fn level5_uncompressed() {
        let mut bytes = level5_header();
        bytes.extend(level5_matrix("val", 2, 3, &COL_MAJOR));
        check(&parse_matrix(&bytes, "val").unwrap());
    }

    #[test]
    fn level5_compressed() {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(&level5_matrix("val", 2, 3, &COL_MAJOR)).unwrap();
        let z = enc.finish().unwrap();
        let mut bytes = level5_header();
        bytes.extend(tag(MI_COMPRESSED, z.len()));
        bytes.extend(z);
        check(&parse_matrix(&bytes, "val").unwrap());
    }

    #[test]
    fn missing_variable_is_an_error() {
        let bytes = level4("other", 1, 1, &[1]);
        assert!(parse_matrix(&bytes, "val").is_err());
    }

    #[test]
    fn truncated_data_is_an_error() {
        let mut bytes = level4("val", 2, 3, &COL_MAJOR);
        bytes.truncate(bytes.len() - 2);
        assert!(parse_matrix(&bytes, "val").is_err());
    }
}
