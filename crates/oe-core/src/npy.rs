//! Partial reads of 1-D `.npy` arrays.
//!
//! Bulk arrays can be gigabytes on remote storage, so the reader parses the
//! fixed header first and then fetches only the bytes covering the requested
//! element range, in a single range request.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// Magic string at the start of every `.npy` file.
const MAGIC: &[u8; 6] = b"\x93NUMPY";

/// Magic plus the major/minor version bytes.
const PREFIX_LEN: u64 = 8;

static DESCR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'descr'\s*:\s*'([^']+)'").expect("valid regex"));
static FORTRAN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'fortran_order'\s*:\s*(True|False)").expect("valid regex"));
static SHAPE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'shape'\s*:\s*\(([^)]*)\)").expect("valid regex"));

#[derive(Debug, Error)]
pub enum NpyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("not an npy container (bad magic bytes) at {0}")]
    BadMagic(String),
    #[error("malformed npy header in {origin}: {reason}")]
    MalformedHeader { origin: String, reason: String },
    #[error("only 1-D arrays support partial reads, {origin} has shape {shape:?}")]
    UnsupportedShape { origin: String, shape: Vec<usize> },
    #[error("unsupported dtype {descr:?} in {origin}")]
    UnsupportedDtype { origin: String, descr: String },
    #[error("{origin} holds {available} bytes but its header needs {needed}")]
    Truncated {
        origin: String,
        needed: u64,
        available: u64,
    },
    #[error("range {start}..{end} out of bounds for {origin} with {len} elements")]
    RangeOutOfBounds {
        origin: String,
        start: usize,
        end: usize,
        len: usize,
    },
}

/// A byte-addressable object that can serve range reads.
///
/// Implementations for remote object stores issue one ranged GET per call.
pub trait ByteSource {
    /// Human-readable location, used in error messages.
    fn origin(&self) -> String;

    /// Total size in bytes.
    fn len(&self) -> std::io::Result<u64>;

    fn is_empty(&self) -> std::io::Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Reads the half-open byte range `start..end`.
    fn read_range(&self, start: u64, end: u64) -> std::io::Result<Vec<u8>>;
}

/// A file on local disk.
#[derive(Debug, Clone)]
pub struct LocalFile {
    path: PathBuf,
}

impl LocalFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ByteSource for LocalFile {
    fn origin(&self) -> String {
        self.path.display().to_string()
    }

    fn len(&self) -> std::io::Result<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    fn read_range(&self, start: u64, end: u64) -> std::io::Result<Vec<u8>> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(start))?;
        let wanted = end.saturating_sub(start);
        let mut buf = Vec::new();
        file.take(wanted).read_to_end(&mut buf)?;
        if buf.len() as u64 != wanted {
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof));
        }
        Ok(buf)
    }
}

/// Element type declared by the header's `descr` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dtype {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl Dtype {
    pub const fn item_size(self) -> usize {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::I64 | Self::U64 | Self::F64 => 8,
        }
    }
}

/// Parsed `descr`: element type plus byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descr {
    pub dtype: Dtype,
    pub big_endian: bool,
}

impl Descr {
    fn parse(descr: &str) -> Option<Self> {
        let mut chars = descr.chars();
        let order = chars.next()?;
        let big_endian = match order {
            '>' => true,
            '=' => cfg!(target_endian = "big"),
            '<' | '|' => false,
            _ => return None,
        };
        let dtype = match chars.as_str() {
            "i1" => Dtype::I8,
            "u1" | "b1" => Dtype::U8,
            "i2" => Dtype::I16,
            "u2" => Dtype::U16,
            "i4" => Dtype::I32,
            "u4" => Dtype::U32,
            "i8" => Dtype::I64,
            "u8" => Dtype::U64,
            "f4" => Dtype::F32,
            "f8" => Dtype::F64,
            _ => return None,
        };
        Some(Self { dtype, big_endian })
    }
}

/// The fixed header of an `.npy` container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NpyHeader {
    pub major_version: u8,
    pub minor_version: u8,
    pub descr: Descr,
    pub fortran_order: bool,
    pub shape: Vec<usize>,
    /// Byte offset of the first element.
    pub data_offset: u64,
}

impl NpyHeader {
    /// Number of elements in a 1-D array.
    pub fn len(&self) -> usize {
        self.shape.iter().fold(1, |n, &d| n.saturating_mul(d))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Decoded array contents.
#[derive(Debug, Clone, PartialEq)]
pub enum NpyArray {
    I8(Vec<i8>),
    U8(Vec<u8>),
    I16(Vec<i16>),
    U16(Vec<u16>),
    I32(Vec<i32>),
    U32(Vec<u32>),
    I64(Vec<i64>),
    U64(Vec<u64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl NpyArray {
    pub fn len(&self) -> usize {
        match self {
            Self::I8(v) => v.len(),
            Self::U8(v) => v.len(),
            Self::I16(v) => v.len(),
            Self::U16(v) => v.len(),
            Self::I32(v) => v.len(),
            Self::U32(v) => v.len(),
            Self::I64(v) => v.len(),
            Self::U64(v) => v.len(),
            Self::F32(v) => v.len(),
            Self::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Widens an integer array to `i64`.
    ///
    /// Returns `None` for float arrays and for `u64` values above `i64::MAX`.
    pub fn into_i64(self) -> Option<Vec<i64>> {
        match self {
            Self::I8(v) => Some(v.into_iter().map(i64::from).collect()),
            Self::U8(v) => Some(v.into_iter().map(i64::from).collect()),
            Self::I16(v) => Some(v.into_iter().map(i64::from).collect()),
            Self::U16(v) => Some(v.into_iter().map(i64::from).collect()),
            Self::I32(v) => Some(v.into_iter().map(i64::from).collect()),
            Self::U32(v) => Some(v.into_iter().map(i64::from).collect()),
            Self::I64(v) => Some(v),
            Self::U64(v) => v.into_iter().map(|x| i64::try_from(x).ok()).collect(),
            Self::F32(_) | Self::F64(_) => None,
        }
    }
}

macro_rules! decode_as {
    ($bytes:expr, $big:expr, $ty:ty, $variant:ident) => {{
        const N: usize = std::mem::size_of::<$ty>();
        NpyArray::$variant(
            $bytes
                .chunks_exact(N)
                .map(|chunk| {
                    let mut raw = [0u8; N];
                    raw.copy_from_slice(chunk);
                    if $big {
                        <$ty>::from_be_bytes(raw)
                    } else {
                        <$ty>::from_le_bytes(raw)
                    }
                })
                .collect(),
        )
    }};
}

fn decode(bytes: &[u8], descr: Descr) -> NpyArray {
    let big = descr.big_endian;
    match descr.dtype {
        Dtype::I8 => decode_as!(bytes, big, i8, I8),
        Dtype::U8 => decode_as!(bytes, big, u8, U8),
        Dtype::I16 => decode_as!(bytes, big, i16, I16),
        Dtype::U16 => decode_as!(bytes, big, u16, U16),
        Dtype::I32 => decode_as!(bytes, big, i32, I32),
        Dtype::U32 => decode_as!(bytes, big, u32, U32),
        Dtype::I64 => decode_as!(bytes, big, i64, I64),
        Dtype::U64 => decode_as!(bytes, big, u64, U64),
        Dtype::F32 => decode_as!(bytes, big, f32, F32),
        Dtype::F64 => decode_as!(bytes, big, f64, F64),
    }
}

fn parse_shape(origin: &str, text: &str) -> Result<Vec<usize>, NpyError> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.trim_end_matches('L')
                .parse::<usize>()
                .map_err(|e| NpyError::MalformedHeader {
                    origin: origin.to_string(),
                    reason: format!("bad shape entry {s:?}: {e}"),
                })
        })
        .collect()
}

fn truncated(origin: String, needed: u64, available: u64) -> NpyError {
    NpyError::Truncated {
        origin,
        needed,
        available,
    }
}

/// Reads and parses the header, issuing three small range reads.
pub fn read_header<S: ByteSource + ?Sized>(source: &S) -> Result<NpyHeader, NpyError> {
    read_header_within(source, source.len()?)
}

fn read_header_within<S: ByteSource + ?Sized>(
    source: &S,
    available: u64,
) -> Result<NpyHeader, NpyError> {
    let origin = source.origin();
    if available < PREFIX_LEN {
        return Err(NpyError::BadMagic(origin));
    }
    let prefix = source.read_range(0, PREFIX_LEN)?;
    if prefix.len() < 8 || &prefix[..6] != MAGIC {
        return Err(NpyError::BadMagic(origin));
    }
    let (major_version, minor_version) = (prefix[6], prefix[7]);

    let len_field_width: u64 = if major_version == 1 { 2 } else { 4 };
    if PREFIX_LEN + len_field_width > available {
        return Err(truncated(origin, PREFIX_LEN + len_field_width, available));
    }
    let len_bytes = source.read_range(PREFIX_LEN, PREFIX_LEN + len_field_width)?;
    let header_len = match len_bytes.as_slice() {
        [a, b] => u64::from(u16::from_le_bytes([*a, *b])),
        [a, b, c, d] => u64::from(u32::from_le_bytes([*a, *b, *c, *d])),
        _ => {
            return Err(NpyError::MalformedHeader {
                origin,
                reason: "truncated header length".to_string(),
            });
        }
    };

    let header_start = PREFIX_LEN + len_field_width;
    let data_offset = header_start + header_len;
    if data_offset > available {
        return Err(truncated(origin, data_offset, available));
    }
    let raw = source.read_range(header_start, data_offset)?;
    let text = std::str::from_utf8(&raw).map_err(|e| NpyError::MalformedHeader {
        origin: origin.clone(),
        reason: format!("header is not UTF-8: {e}"),
    })?;

    let descr_text = DESCR_RE
        .captures(text)
        .map(|c| c[1].to_string())
        .ok_or_else(|| NpyError::MalformedHeader {
            origin: origin.clone(),
            reason: "missing 'descr'".to_string(),
        })?;
    let descr = Descr::parse(&descr_text).ok_or_else(|| NpyError::UnsupportedDtype {
        origin: origin.clone(),
        descr: descr_text.clone(),
    })?;
    let fortran_order = FORTRAN_RE.captures(text).is_some_and(|c| &c[1] == "True");
    let shape_text = SHAPE_RE
        .captures(text)
        .map(|c| c[1].to_string())
        .ok_or_else(|| NpyError::MalformedHeader {
            origin: origin.clone(),
            reason: "missing 'shape'".to_string(),
        })?;
    let shape = parse_shape(&origin, &shape_text)?;

    Ok(NpyHeader {
        major_version,
        minor_version,
        descr,
        fortran_order,
        shape,
        data_offset,
    })
}

/// Reads elements `range` of a 1-D array with a single data range read.
pub fn read_range<S: ByteSource + ?Sized>(
    source: &S,
    range: Range<usize>,
) -> Result<NpyArray, NpyError> {
    let available = source.len()?;
    let header = read_header_within(source, available)?;
    read_range_with_header(source, &header, range, available)
}

fn read_range_with_header<S: ByteSource + ?Sized>(
    source: &S,
    header: &NpyHeader,
    range: Range<usize>,
    available: u64,
) -> Result<NpyArray, NpyError> {
    if header.shape.len() != 1 {
        return Err(NpyError::UnsupportedShape {
            origin: source.origin(),
            shape: header.shape.clone(),
        });
    }
    let len = header.shape[0];
    if range.start > range.end || range.end > len {
        return Err(NpyError::RangeOutOfBounds {
            origin: source.origin(),
            start: range.start,
            end: range.end,
            len,
        });
    }
    if range.is_empty() {
        return Ok(decode(&[], header.descr));
    }

    let item_size = header.descr.dtype.item_size() as u64;
    let offset_of = |index: usize| {
        (index as u64)
            .checked_mul(item_size)
            .and_then(|n| n.checked_add(header.data_offset))
    };
    let (Some(start), Some(end)) = (offset_of(range.start), offset_of(range.end)) else {
        return Err(NpyError::MalformedHeader {
            origin: source.origin(),
            reason: format!("shape {:?} overflows the addressable size", header.shape),
        });
    };
    if end > available {
        return Err(truncated(source.origin(), end, available));
    }
    let bytes = source.read_range(start, end)?;
    Ok(decode(&bytes, header.descr))
}

/// Reads a single element.
pub fn read_element<S: ByteSource + ?Sized>(
    source: &S,
    index: usize,
) -> Result<NpyArray, NpyError> {
    read_range(source, index..index + 1)
}

/// Reads a whole 1-D array.
pub fn read_all<S: ByteSource + ?Sized>(source: &S) -> Result<NpyArray, NpyError> {
    let available = source.len()?;
    let header = read_header_within(source, available)?;
    let len = header.shape.first().copied().unwrap_or(0);
    read_range_with_header(source, &header, 0..len, available)
}


#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use proptest::prelude::*;

    use super::testing::{encode_i16, encode_i64};
    use super::*;

    /// In-memory source that records every range it serves.
    struct MemSource {
        bytes: Vec<u8>,
        reads: RefCell<Vec<(u64, u64)>>,
    }

    impl MemSource {
        fn new(bytes: Vec<u8>) -> Self {
            Self {
                bytes,
                reads: RefCell::new(Vec::new()),
            }
        }
    }

    impl ByteSource for MemSource {
        fn origin(&self) -> String {
            "memory".to_string()
        }

        fn len(&self) -> std::io::Result<u64> {
            Ok(self.bytes.len() as u64)
        }

        fn read_range(&self, start: u64, end: u64) -> std::io::Result<Vec<u8>> {
            self.reads.borrow_mut().push((start, end));
            let (s, e) = (usize::try_from(start).unwrap(), usize::try_from(end).unwrap());
            self.bytes
                .get(s..e)
                .map(<[u8]>::to_vec)
                .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::UnexpectedEof))
        }
    }

    #[test]
    fn test_header_parses_shape_and_dtype() {
        let source = MemSource::new(encode_i64(&[1, 2, 3], 1));
        let header = read_header(&source).unwrap();

        assert_eq!(header.shape, vec![3]);
        assert_eq!(header.descr.dtype, Dtype::I64);
        assert!(!header.descr.big_endian);
        assert!(!header.fortran_order);
        assert_eq!(header.data_offset % 64, 0);
    }

    #[test]
    fn test_single_data_read_for_range() {
        let values: Vec<i64> = (0..1000).collect();
        let source = MemSource::new(encode_i64(&values, 1));

        let slice = read_range(&source, 10..20).unwrap();

        assert_eq!(slice, NpyArray::I64((10..20).collect()));
        // prefix, length field, header, data
        let reads = source.reads.borrow();
        assert_eq!(reads.len(), 4);
        let (start, end) = reads[3];
        assert_eq!(end - start, 10 * 8);
    }

    #[test]
    fn test_version_two_header_reads_identically() {
        let values = vec![7i16, -3, 12, 0, 99];
        let v1 = MemSource::new(encode_i16(&values, 1));
        let v2 = MemSource::new(encode_i16(&values, 2));

        assert_eq!(read_header(&v2).unwrap().major_version, 2);
        assert_eq!(read_range(&v1, 1..4).unwrap(), read_range(&v2, 1..4).unwrap());
        assert_eq!(read_all(&v2).unwrap(), NpyArray::I16(values));
    }

    #[test]
    fn test_two_dimensional_array_rejected() {
        let data: Vec<u8> = [1i64, 2, 3, 4].iter().flat_map(|v| v.to_le_bytes()).collect();
        let source = MemSource::new(testing::encode("<i8", "(2, 2)", &data, 1));

        let err = read_range(&source, 0..1).unwrap_err();
        assert!(
            matches!(err, NpyError::UnsupportedShape { ref shape, .. } if shape == &vec![2, 2])
        );
    }

    #[test]
    fn test_out_of_bounds_range_rejected() {
        let source = MemSource::new(encode_i64(&[1, 2, 3], 1));

        let err = read_range(&source, 2..5).unwrap_err();
        assert!(matches!(err, NpyError::RangeOutOfBounds { len: 3, .. }));
    }

    #[test]
    fn test_shape_larger_than_data_rejected_before_reading() {
        let data: Vec<u8> = 1i64.to_le_bytes().to_vec();
        let source = MemSource::new(testing::encode("<i8", "(1099511627776,)", &data, 1));

        let err = read_all(&source).unwrap_err();

        let total = source.bytes.len() as u64;
        assert!(matches!(err, NpyError::Truncated { available, .. } if available == total));
        // prefix, length field and header only
        assert_eq!(source.reads.borrow().len(), 3);
    }

    #[test]
    fn test_shape_overflowing_offsets_rejected() {
        let data: Vec<u8> = 1i64.to_le_bytes().to_vec();
        let source = MemSource::new(testing::encode("<i8", "(2305843009213693952,)", &data, 1));

        assert!(matches!(read_all(&source), Err(NpyError::MalformedHeader { .. })));
    }

    #[test]
    fn test_truncated_header_rejected() {
        let mut bytes = encode_i64(&[1, 2], 1);
        bytes.truncate(20);
        let source = MemSource::new(bytes);

        assert!(matches!(
            read_header(&source),
            Err(NpyError::Truncated { available: 20, .. })
        ));
    }

    #[test]
    fn test_empty_source_is_not_an_array() {
        let source = MemSource::new(Vec::new());
        assert!(source.is_empty().unwrap());
        assert!(matches!(read_all(&source), Err(NpyError::BadMagic(_))));
    }

    #[test]
    fn test_local_file_short_read_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.bin");
        std::fs::write(&path, [0u8; 4]).unwrap();

        let err = LocalFile::new(&path).read_range(0, 8).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let source = MemSource::new(b"PK\x03\x04 not an npy file".to_vec());
        assert!(matches!(read_header(&source), Err(NpyError::BadMagic(_))));
    }

    #[test]
    fn test_unsupported_dtype_rejected() {
        let source = MemSource::new(testing::encode("<c8", "(1,)", &[0; 8], 1));
        assert!(matches!(
            read_header(&source),
            Err(NpyError::UnsupportedDtype { ref descr, .. }) if descr == "<c8"
        ));
    }

    #[test]
    fn test_big_endian_descr_decodes() {
        let descr = Descr::parse(">i4").unwrap();
        let bytes = [0u8, 0, 1, 0, 0xff, 0xff, 0xff, 0xfe];
        assert_eq!(decode(&bytes, descr), NpyArray::I32(vec![256, -2]));
    }

    #[test]
    fn test_read_element_from_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample_numbers.npy");
        testing::write_i64(&path, &[257_417_001, 257_417_002]);

        let first = read_element(&LocalFile::new(&path), 0).unwrap();
        assert_eq!(first.into_i64().unwrap(), vec![257_417_001]);
    }

    #[test]
    fn test_into_i64_rejects_floats() {
        assert!(NpyArray::F64(vec![1.0]).into_i64().is_none());
        assert_eq!(NpyArray::U8(vec![3]).into_i64(), Some(vec![3]));
    }

    proptest! {
        #[test]
        fn prop_range_matches_slice(
            values in proptest::collection::vec(any::<i64>(), 0..200),
            a in 0usize..200,
            b in 0usize..200,
            major in 1u8..=3,
        ) {
            let len = values.len();
            let (i, j) = (a.min(b).min(len), a.max(b).min(len));
            let source = MemSource::new(encode_i64(&values, major));

            let slice = read_range(&source, i..j).unwrap();
            prop_assert_eq!(slice, NpyArray::I64(values[i..j].to_vec()));
        }
    }
}
