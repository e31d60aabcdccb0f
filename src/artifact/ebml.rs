//! Minimal EBML reader/writer
//!
//! Just enough of the EBML encoding to mux WebM streams and patch their
//! headers: element ids, variable-length sizes, and unsigned/float/string
//! payloads.

use thiserror::Error;

/// EBML decoding errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EbmlError {
    #[error("Unexpected end of data at offset {0}")]
    UnexpectedEof(usize),

    #[error("Invalid element id at offset {0}")]
    InvalidId(usize),

    #[error("Invalid variable-length integer at offset {0}")]
    InvalidVint(usize),

    #[error("Invalid float of {0} bytes")]
    InvalidFloat(usize),
}

/// Header of one element inside a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementHeader {
    pub id: u32,

    /// `None` for the "unknown size" marker used by live streams
    pub size: Option<u64>,

    /// Offset of the first id byte
    pub offset: usize,

    /// Bytes taken by id + size
    pub header_len: usize,
}

impl ElementHeader {
    pub fn data_start(&self) -> usize {
        self.offset + self.header_len
    }

    /// End of the element, if its size is known
    pub fn end(&self) -> Option<usize> {
        self.size.map(|s| self.data_start() + s as usize)
    }
}

pub fn read_id(data: &[u8], pos: usize) -> Result<(u32, usize), EbmlError> {
    let first = *data.get(pos).ok_or(EbmlError::UnexpectedEof(pos))?;
    let len = first.leading_zeros() as usize + 1;
    if len > 4 {
        return Err(EbmlError::InvalidId(pos));
    }
    let bytes = data
        .get(pos..pos + len)
        .ok_or(EbmlError::UnexpectedEof(pos))?;
    let id = bytes.iter().fold(0u32, |acc, b| (acc << 8) | *b as u32);
    Ok((id, len))
}

/// Read an element size; `None` means unknown size
pub fn read_size(data: &[u8], pos: usize) -> Result<(Option<u64>, usize), EbmlError> {
    let first = *data.get(pos).ok_or(EbmlError::UnexpectedEof(pos))?;
    if first == 0 {
        return Err(EbmlError::InvalidVint(pos));
    }
    let len = first.leading_zeros() as usize + 1;
    let bytes = data
        .get(pos..pos + len)
        .ok_or(EbmlError::UnexpectedEof(pos))?;

    let mut value = (first as u64) & (0xFF >> len);
    for b in &bytes[1..] {
        value = (value << 8) | *b as u64;
    }

    let all_ones = (1u64 << (7 * len)) - 1;
    if value == all_ones {
        Ok((None, len))
    } else {
        Ok((Some(value), len))
    }
}

pub fn read_header(data: &[u8], pos: usize) -> Result<ElementHeader, EbmlError> {
    let (id, id_len) = read_id(data, pos)?;
    let (size, size_len) = read_size(data, pos + id_len)?;
    Ok(ElementHeader {
        id,
        size,
        offset: pos,
        header_len: id_len + size_len,
    })
}

pub fn read_uint(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64)
}

pub fn read_float(bytes: &[u8]) -> Result<f64, EbmlError> {
    match bytes.len() {
        0 => Ok(0.0),
        4 => Ok(f32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64),
        8 => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(bytes);
            Ok(f64::from_be_bytes(buf))
        }
        n => Err(EbmlError::InvalidFloat(n)),
    }
}

pub fn encode_id(id: u32) -> Vec<u8> {
    id.to_be_bytes()
        .into_iter()
        .skip_while(|b| *b == 0)
        .collect()
}

/// Shortest size encoding for `size`
pub fn encode_size(size: u64) -> Vec<u8> {
    let len = (1..=8)
        .find(|n| size < (1u64 << (7 * n)) - 1)
        .unwrap_or(8);
    encode_size_fixed(size, len)
}

/// Size encoded on exactly `len` bytes
pub fn encode_size_fixed(size: u64, len: usize) -> Vec<u8> {
    let marked = size | (1u64 << (7 * len));
    marked.to_be_bytes()[8 - len..].to_vec()
}

/// The 8-byte "unknown size" marker
pub fn unknown_size() -> [u8; 8] {
    [0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]
}

pub fn element(id: u32, body: &[u8]) -> Vec<u8> {
    let mut out = encode_id(id);
    out.extend(encode_size(body.len() as u64));
    out.extend_from_slice(body);
    out
}

pub fn uint_element(id: u32, value: u64) -> Vec<u8> {
    let bytes: Vec<u8> = value.to_be_bytes().into_iter().skip_while(|b| *b == 0).collect();
    if bytes.is_empty() {
        element(id, &[0])
    } else {
        element(id, &bytes)
    }
}

pub fn float_element(id: u32, value: f64) -> Vec<u8> {
    element(id, &value.to_be_bytes())
}

pub fn string_element(id: u32, value: &str) -> Vec<u8> {
    element(id, value.as_bytes())
}
