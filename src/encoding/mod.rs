//! Byte-stable binary encoding for journal metadata and column headers.
//!
//! Two concerns live here:
//!
//! 1. The [`Encode`] / [`Decode`] traits used to persist transaction
//!    records ([`TxRec`](crate::txlog::TxRec)). The wire format is owned by
//!    this crate, so the on-disk representation never changes because of a
//!    dependency upgrade.
//! 2. The variable-length column **length header**: a 1, 2 or 4 byte
//!    little-endian prefix whose width is fixed once per column from the
//!    declared maximum value size (see [`HeaderWidth`]).
//!
//! # Wire format
//!
//! | Rust type          | Encoding                                     |
//! |--------------------|----------------------------------------------|
//! | `u32`              | 4 bytes, little-endian                       |
//! | `u64`, `i64`       | 8 bytes, little-endian                       |
//! | `String`           | `[u32 len][utf-8 bytes]`                     |
//! | `Vec<T>`           | `[u32 count][T₁][T₂]…` via [`encode_vec`]    |
//!
//! Decoders never panic on short or hostile input; every failure is an
//! [`EncodingError`].


use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// Safety limits
// ------------------------------------------------------------------------------------------------

/// Maximum byte length accepted for a single `String` (64 MiB).
pub const MAX_BYTE_LEN: u32 = 64 * 1024 * 1024;

/// Maximum element count accepted for `Vec<T>` (1 M).
pub const MAX_VEC_ELEMENTS: u32 = 1024 * 1024;

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors produced during encoding or decoding.
#[derive(Debug, Error)]
pub enum EncodingError {
    /// The buffer ran out of bytes before decoding completed.
    #[error("unexpected end of buffer (need {needed} bytes, have {available})")]
    UnexpectedEof { needed: usize, available: usize },

    /// A byte sequence decoded as a string was not valid UTF-8.
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// A length or count exceeded what the target encoding can carry.
    #[error("length overflow: {0}")]
    LengthOverflow(String),
}

// ------------------------------------------------------------------------------------------------
// Core traits
// ------------------------------------------------------------------------------------------------

/// Serialize `self` by appending bytes to `buf`.
///
/// Output must be deterministic: equal values produce equal bytes.
pub trait Encode {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError>;
}

/// Deserialize a value from the front of a byte slice.
///
/// Returns `(value, bytes_consumed)`.
pub trait Decode: Sized {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError>;
}

/// Encode a value into a freshly-allocated `Vec<u8>`.
pub fn encode_to_vec<T: Encode>(value: &T) -> Result<Vec<u8>, EncodingError> {
    let mut buf = Vec::new();
    value.encode_to(&mut buf)?;
    Ok(buf)
}

/// Decode a value from the beginning of `buf`.
pub fn decode_from_slice<T: Decode>(buf: &[u8]) -> Result<(T, usize), EncodingError> {
    T::decode_from(buf)
}

/// Sequential decoder over a byte slice.
///
/// Keeps the running offset so struct decoders read as a flat list of
/// fields instead of manual `offset += n` bookkeeping.
pub struct Reader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    /// A reader positioned at the start of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    /// Decodes the next value and advances past it.
    pub fn read<T: Decode>(&mut self) -> Result<T, EncodingError> {
        let (value, n) = T::decode_from(&self.buf[self.offset..])?;
        self.offset += n;
        Ok(value)
    }

    /// Decodes the next `[u32 count][T…]` vector and advances past it.
    pub fn read_vec<T: Decode>(&mut self) -> Result<Vec<T>, EncodingError> {
        let (items, n) = decode_vec::<T>(&self.buf[self.offset..])?;
        self.offset += n;
        Ok(items)
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.offset
    }
}

// ------------------------------------------------------------------------------------------------
// Internal helpers
// ------------------------------------------------------------------------------------------------

#[inline]
fn require(buf: &[u8], needed: usize) -> Result<(), EncodingError> {
    if buf.len() < needed {
        Err(EncodingError::UnexpectedEof {
            needed,
            available: buf.len(),
        })
    } else {
        Ok(())
    }
}

#[inline]
fn len_to_u32(len: usize) -> Result<u32, EncodingError> {
    u32::try_from(len)
        .map_err(|_| EncodingError::LengthOverflow(format!("length {len} exceeds u32::MAX")))
}

// ------------------------------------------------------------------------------------------------
// Numeric primitives
// ------------------------------------------------------------------------------------------------

macro_rules! impl_le_primitive {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Encode for $ty {
                #[inline]
                fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
                    buf.extend_from_slice(&self.to_le_bytes());
                    Ok(())
                }
            }

            impl Decode for $ty {
                #[inline]
                fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
                    const SIZE: usize = std::mem::size_of::<$ty>();
                    require(buf, SIZE)?;
                    let mut bytes = [0u8; SIZE];
                    bytes.copy_from_slice(&buf[..SIZE]);
                    Ok((<$ty>::from_le_bytes(bytes), SIZE))
                }
            }
        )*
    };
}

impl_le_primitive!(u32, u64, i64);

// ------------------------------------------------------------------------------------------------
// Strings: [u32 len][utf-8 bytes]
// ------------------------------------------------------------------------------------------------

impl Encode for String {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.as_str().encode_to(buf)
    }
}

impl Encode for &str {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        len_to_u32(self.len())?.encode_to(buf)?;
        buf.extend_from_slice(self.as_bytes());
        Ok(())
    }
}

impl Decode for String {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (len, offset) = u32::decode_from(buf)?;
        if len > MAX_BYTE_LEN {
            return Err(EncodingError::LengthOverflow(format!(
                "string length {len} exceeds MAX_BYTE_LEN ({MAX_BYTE_LEN})"
            )));
        }
        let len = len as usize;
        require(&buf[offset..], len)?;
        let raw = buf[offset..offset + len].to_vec();
        Ok((String::from_utf8(raw)?, offset + len))
    }
}

/// Encode a slice of `T` as `[u32 count][T₁][T₂]…`.
pub fn encode_vec<T: Encode>(items: &[T], buf: &mut Vec<u8>) -> Result<(), EncodingError> {
    len_to_u32(items.len())?.encode_to(buf)?;
    for item in items {
        item.encode_to(buf)?;
    }
    Ok(())
}

/// Decode a `Vec<T>` from `[u32 count][T₁][T₂]…`, capped at [`MAX_VEC_ELEMENTS`].
pub fn decode_vec<T: Decode>(buf: &[u8]) -> Result<(Vec<T>, usize), EncodingError> {
    let (count, mut offset) = u32::decode_from(buf)?;
    if count > MAX_VEC_ELEMENTS {
        return Err(EncodingError::LengthOverflow(format!(
            "vector element count {count} exceeds MAX_VEC_ELEMENTS ({MAX_VEC_ELEMENTS})"
        )));
    }
    let mut items = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (item, consumed) = T::decode_from(&buf[offset..])?;
        offset += consumed;
        items.push(item);
    }
    Ok((items, offset))
}

// ------------------------------------------------------------------------------------------------
// Variable-length column header
// ------------------------------------------------------------------------------------------------

/// Width of the length prefix in front of every string/binary payload.
///
/// Chosen once from the column's declared maximum payload size and fixed
/// for the column's lifetime. The prefix stores the payload length in
/// bytes, little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderWidth {
    One,
    Two,
    Four,
}

impl HeaderWidth {
    /// Picks the narrowest width able to encode `max_payload_bytes`.
    pub fn for_max_size(max_payload_bytes: usize) -> Self {
        if max_payload_bytes <= u8::MAX as usize {
            HeaderWidth::One
        } else if max_payload_bytes <= u16::MAX as usize {
            HeaderWidth::Two
        } else {
            HeaderWidth::Four
        }
    }

    /// Number of header bytes.
    pub fn bytes(self) -> usize {
        match self {
            HeaderWidth::One => 1,
            HeaderWidth::Two => 2,
            HeaderWidth::Four => 4,
        }
    }

    /// Largest payload length representable with this width.
    pub fn max_len(self) -> usize {
        match self {
            HeaderWidth::One => u8::MAX as usize,
            HeaderWidth::Two => u16::MAX as usize,
            HeaderWidth::Four => u32::MAX as usize,
        }
    }

    /// Encodes `len` into the first [`bytes`](Self::bytes) bytes of `out`.
    ///
    /// Fails with [`EncodingError::LengthOverflow`] instead of truncating
    /// when `len` does not fit.
    pub fn encode(self, len: usize, out: &mut [u8]) -> Result<usize, EncodingError> {
        if len > self.max_len() {
            return Err(EncodingError::LengthOverflow(format!(
                "payload length {len} exceeds {}-byte header capacity {}",
                self.bytes(),
                self.max_len()
            )));
        }
        require(out, self.bytes())?;
        match self {
            HeaderWidth::One => out[0] = len as u8,
            HeaderWidth::Two => out[..2].copy_from_slice(&(len as u16).to_le_bytes()),
            HeaderWidth::Four => out[..4].copy_from_slice(&(len as u32).to_le_bytes()),
        }
        Ok(self.bytes())
    }

    /// Decodes a payload length, always reading the full header width.
    pub fn decode(self, buf: &[u8]) -> Result<usize, EncodingError> {
        require(buf, self.bytes())?;
        Ok(match self {
            HeaderWidth::One => buf[0] as usize,
            HeaderWidth::Two => u16::from_le_bytes([buf[0], buf[1]]) as usize,
            HeaderWidth::Four => u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize,
        })
    }
}
