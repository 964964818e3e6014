//! # Canonical Binary Codec
//!
//! Graphene's wire format, byte for byte. Signatures are computed over the
//! exact serialization of a transaction, so "close enough" here means
//! "rejected by every node". The rules:
//!
//! - Fixed-width integers are little-endian.
//! - Lengths, operation type-ids and object-id instances are unsigned
//!   LEB128 varints.
//! - Optionals carry a one-byte presence flag.
//! - Sets and maps are written in strictly ascending key order. The codec
//!   never re-sorts on the caller's behalf: an unsorted set is a
//!   [`CodecError::FieldConstraintViolation`], which keeps
//!   `decode(encode(x)) == x` true for every value that encodes at all.
//!
//! Every wire type implements [`Encode`] and [`Decode`]. The operation-level
//! entry points are [`encode_operation`], [`decode_operation`] and
//! [`digest`].

use thiserror::Error;

use crate::config::{MAX_PROPOSAL_NESTING, MAX_SEQUENCE_LENGTH, MAX_VARINT_BYTES};
use crate::crypto::hash::sha256_concat;
use crate::crypto::keys::PublicKey;
use crate::transaction::operations::Operation;
use crate::transaction::types::ChainId;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Encoding and decoding failures. Always a caller bug or a corrupt input,
/// never retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("unknown operation type {0}")]
    UnknownOperationType(u64),

    #[error("field `{field}` violates its constraints: {reason}")]
    FieldConstraintViolation { field: &'static str, reason: String },

    #[error("truncated input: needed {needed} more bytes, {remaining} remaining")]
    TruncatedInput { needed: usize, remaining: usize },

    #[error("malformed field `{field}`: {reason}")]
    MalformedField { field: &'static str, reason: String },
}

impl CodecError {
    pub(crate) fn constraint(field: &'static str, reason: impl Into<String>) -> Self {
        Self::FieldConstraintViolation {
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed(field: &'static str, reason: impl Into<String>) -> Self {
        Self::MalformedField {
            field,
            reason: reason.into(),
        }
    }
}

pub type CodecResult<T> = Result<T, CodecError>;

// ---------------------------------------------------------------------------
// Writer / Reader
// ---------------------------------------------------------------------------

/// Append-only output buffer.
#[derive(Debug, Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
    nesting: usize,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Unsigned LEB128.
    pub fn put_varint(&mut self, mut v: u64) {
        loop {
            let byte = (v & 0x7F) as u8;
            v >>= 7;
            if v == 0 {
                self.buf.push(byte);
                return;
            }
            self.buf.push(byte | 0x80);
        }
    }

    /// Length-prefixed byte blob.
    pub fn put_blob(&mut self, field: &'static str, bytes: &[u8]) -> CodecResult<()> {
        self.put_len(field, bytes.len())?;
        self.put_bytes(bytes);
        Ok(())
    }

    pub fn put_len(&mut self, field: &'static str, len: usize) -> CodecResult<()> {
        if len as u64 > MAX_SEQUENCE_LENGTH {
            return Err(CodecError::constraint(
                field,
                format!("length {len} exceeds {MAX_SEQUENCE_LENGTH}"),
            ));
        }
        self.put_varint(len as u64);
        Ok(())
    }

    /// Guard for recursive structures (proposals containing proposals).
    pub fn enter_nested(&mut self, field: &'static str) -> CodecResult<()> {
        self.nesting += 1;
        if self.nesting > MAX_PROPOSAL_NESTING {
            return Err(CodecError::constraint(field, "nesting too deep"));
        }
        Ok(())
    }

    pub fn leave_nested(&mut self) {
        self.nesting = self.nesting.saturating_sub(1);
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

/// Cursor over an input slice. Every read is bounds-checked.
#[derive(Debug)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
    nesting: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            nesting: 0,
        }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn take(&mut self, n: usize) -> CodecResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(CodecError::TruncatedInput {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn take_array<const N: usize>(&mut self) -> CodecResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn get_u8(&mut self) -> CodecResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn get_u16(&mut self) -> CodecResult<u16> {
        Ok(u16::from_le_bytes(self.take_array()?))
    }

    pub fn get_u32(&mut self) -> CodecResult<u32> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn get_u64(&mut self) -> CodecResult<u64> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    pub fn get_i64(&mut self) -> CodecResult<i64> {
        Ok(i64::from_le_bytes(self.take_array()?))
    }

    pub fn get_varint(&mut self) -> CodecResult<u64> {
        let mut value: u64 = 0;
        for i in 0..MAX_VARINT_BYTES {
            let byte = self.get_u8()?;
            let chunk = u64::from(byte & 0x7F);
            if i == MAX_VARINT_BYTES - 1 && chunk > 1 {
                return Err(CodecError::malformed("varint", "overflows u64"));
            }
            value |= chunk << (7 * i);
            if byte & 0x80 == 0 {
                if i > 0 && byte == 0 {
                    return Err(CodecError::malformed("varint", "non-minimal encoding"));
                }
                return Ok(value);
            }
        }
        Err(CodecError::malformed("varint", "too many continuation bytes"))
    }

    pub fn get_len(&mut self, field: &'static str) -> CodecResult<usize> {
        let len = self.get_varint()?;
        if len > MAX_SEQUENCE_LENGTH {
            return Err(CodecError::malformed(
                field,
                format!("length {len} exceeds {MAX_SEQUENCE_LENGTH}"),
            ));
        }
        Ok(len as usize)
    }

    pub fn get_blob(&mut self, field: &'static str) -> CodecResult<Vec<u8>> {
        let len = self.get_len(field)?;
        Ok(self.take(len)?.to_vec())
    }

    pub fn enter_nested(&mut self, field: &'static str) -> CodecResult<()> {
        self.nesting += 1;
        if self.nesting > MAX_PROPOSAL_NESTING {
            return Err(CodecError::malformed(field, "nesting too deep"));
        }
        Ok(())
    }

    pub fn leave_nested(&mut self) {
        self.nesting = self.nesting.saturating_sub(1);
    }

    /// Fails unless every byte was consumed.
    pub fn finish(&self, field: &'static str) -> CodecResult<()> {
        if !self.is_empty() {
            return Err(CodecError::malformed(
                field,
                format!("{} trailing bytes", self.remaining()),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Types with a canonical wire encoding.
pub trait Encode {
    fn encode(&self, w: &mut ByteWriter) -> CodecResult<()>;

    fn to_wire_bytes(&self) -> CodecResult<Vec<u8>> {
        let mut w = ByteWriter::new();
        self.encode(&mut w)?;
        Ok(w.into_bytes())
    }
}

/// Types that can be read back from their canonical encoding.
pub trait Decode: Sized {
    fn decode(r: &mut ByteReader<'_>) -> CodecResult<Self>;

    fn from_wire_bytes(bytes: &[u8]) -> CodecResult<Self> {
        let mut r = ByteReader::new(bytes);
        let value = Self::decode(&mut r)?;
        r.finish(std::any::type_name::<Self>())?;
        Ok(value)
    }
}

macro_rules! fixed_width {
    ($ty:ty, $put:ident, $get:ident) => {
        impl Encode for $ty {
            fn encode(&self, w: &mut ByteWriter) -> CodecResult<()> {
                w.$put(*self);
                Ok(())
            }
        }

        impl Decode for $ty {
            fn decode(r: &mut ByteReader<'_>) -> CodecResult<Self> {
                r.$get()
            }
        }
    };
}

fixed_width!(u8, put_u8, get_u8);
fixed_width!(u16, put_u16, get_u16);
fixed_width!(u32, put_u32, get_u32);
fixed_width!(u64, put_u64, get_u64);
fixed_width!(i64, put_i64, get_i64);

impl Encode for bool {
    fn encode(&self, w: &mut ByteWriter) -> CodecResult<()> {
        w.put_u8(u8::from(*self));
        Ok(())
    }
}

impl Decode for bool {
    fn decode(r: &mut ByteReader<'_>) -> CodecResult<Self> {
        match r.get_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CodecError::malformed("bool", format!("byte {other}"))),
        }
    }
}

impl Encode for String {
    fn encode(&self, w: &mut ByteWriter) -> CodecResult<()> {
        w.put_blob("string", self.as_bytes())
    }
}

impl Decode for String {
    fn decode(r: &mut ByteReader<'_>) -> CodecResult<Self> {
        let bytes = r.get_blob("string")?;
        String::from_utf8(bytes).map_err(|_| CodecError::malformed("string", "not UTF-8"))
    }
}

impl<T: Encode> Encode for Option<T> {
    fn encode(&self, w: &mut ByteWriter) -> CodecResult<()> {
        match self {
            Some(v) => {
                w.put_u8(1);
                v.encode(w)
            }
            None => {
                w.put_u8(0);
                Ok(())
            }
        }
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode(r: &mut ByteReader<'_>) -> CodecResult<Self> {
        match r.get_u8()? {
            0 => Ok(None),
            1 => Ok(Some(T::decode(r)?)),
            other => Err(CodecError::malformed("optional", format!("flag {other}"))),
        }
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn encode(&self, w: &mut ByteWriter) -> CodecResult<()> {
        w.put_len("vector", self.len())?;
        self.iter().try_for_each(|item| item.encode(w))
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode(r: &mut ByteReader<'_>) -> CodecResult<Self> {
        let len = r.get_len("vector")?;
        let mut out = Vec::with_capacity(len.min(r.remaining()));
        for _ in 0..len {
            out.push(T::decode(r)?);
        }
        Ok(out)
    }
}

impl<A: Encode, B: Encode> Encode for (A, B) {
    fn encode(&self, w: &mut ByteWriter) -> CodecResult<()> {
        self.0.encode(w)?;
        self.1.encode(w)
    }
}

impl<A: Decode, B: Decode> Decode for (A, B) {
    fn decode(r: &mut ByteReader<'_>) -> CodecResult<Self> {
        Ok((A::decode(r)?, B::decode(r)?))
    }
}

impl Encode for PublicKey {
    fn encode(&self, w: &mut ByteWriter) -> CodecResult<()> {
        w.put_bytes(&self.to_bytes());
        Ok(())
    }
}

impl Decode for PublicKey {
    fn decode(r: &mut ByteReader<'_>) -> CodecResult<Self> {
        let bytes: [u8; 33] = r.take_array()?;
        PublicKey::from_bytes(&bytes).map_err(|e| CodecError::malformed("public_key", e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Ordered collections
// ---------------------------------------------------------------------------

/// Write a set/map whose keys must be strictly ascending.
pub fn write_sorted<T, K, F>(
    w: &mut ByteWriter,
    field: &'static str,
    items: &[T],
    key: F,
) -> CodecResult<()>
where
    T: Encode,
    K: Ord,
    F: Fn(&T) -> K,
{
    if items.windows(2).any(|pair| key(&pair[0]) >= key(&pair[1])) {
        return Err(CodecError::constraint(
            field,
            "entries must be strictly ascending with no duplicates",
        ));
    }
    w.put_len(field, items.len())?;
    items.iter().try_for_each(|item| item.encode(w))
}

/// Read a set/map and reject out-of-order or duplicate keys.
pub fn read_sorted<T, K, F>(r: &mut ByteReader<'_>, field: &'static str, key: F) -> CodecResult<Vec<T>>
where
    T: Decode,
    K: Ord,
    F: Fn(&T) -> K,
{
    let items: Vec<T> = Vec::decode(r)?;
    if items.windows(2).any(|pair| key(&pair[0]) >= key(&pair[1])) {
        return Err(CodecError::malformed(field, "entries out of order"));
    }
    Ok(items)
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Serialize a single operation: `varint type_id || fields`.
pub fn encode_operation(op: &Operation) -> CodecResult<Vec<u8>> {
    op.to_wire_bytes()
}

/// Parse a single operation. Trailing bytes are an error.
pub fn decode_operation(bytes: &[u8]) -> CodecResult<Operation> {
    Operation::from_wire_bytes(bytes)
}

/// The value signatures are computed over: `sha256(chain_id || body)`.
///
/// One SHA-256, not two.
pub fn digest(chain_id: &ChainId, serialized_body: &[u8]) -> [u8; 32] {
    sha256_concat(&[chain_id.as_bytes(), serialized_body])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn varint_bytes(v: u64) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.put_varint(v);
        w.into_bytes()
    }

    #[test]
    fn varint_known_encodings() {
        assert_eq!(varint_bytes(0), vec![0x00]);
        assert_eq!(varint_bytes(127), vec![0x7F]);
        assert_eq!(varint_bytes(128), vec![0x80, 0x01]);
        assert_eq!(varint_bytes(300), vec![0xAC, 0x02]);
        assert_eq!(varint_bytes(u64::MAX).len(), MAX_VARINT_BYTES);
    }

    #[test]
    fn varint_boundaries_decode() {
        for v in [0u64, 1, 127, 128, 16_383, 16_384, u32::MAX as u64, u64::MAX] {
            let bytes = varint_bytes(v);
            let mut r = ByteReader::new(&bytes);
            assert_eq!(r.get_varint().unwrap(), v);
            assert!(r.is_empty());
        }
    }

    #[test]
    fn varint_rejects_non_minimal_and_overflow() {
        let mut r = ByteReader::new(&[0x80, 0x00]);
        assert!(matches!(r.get_varint(), Err(CodecError::MalformedField { .. })));

        let overflow = [0xFF; 10];
        let mut r = ByteReader::new(&overflow);
        assert!(matches!(r.get_varint(), Err(CodecError::MalformedField { .. })));
    }

    #[test]
    fn truncated_read_reports_sizes() {
        let mut r = ByteReader::new(&[1, 2]);
        assert_eq!(
            r.get_u32(),
            Err(CodecError::TruncatedInput {
                needed: 4,
                remaining: 2
            })
        );
    }

    #[test]
    fn integers_are_little_endian() {
        let mut w = ByteWriter::new();
        w.put_u16(0x0102);
        w.put_u32(0x0304_0506);
        w.put_i64(-1);
        assert_eq!(
            w.into_bytes(),
            vec![0x02, 0x01, 0x06, 0x05, 0x04, 0x03, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn string_is_length_prefixed() {
        let bytes = "abc".to_string().to_wire_bytes().unwrap();
        assert_eq!(bytes, vec![3, b'a', b'b', b'c']);
        assert_eq!(String::from_wire_bytes(&bytes).unwrap(), "abc");
    }

    #[test]
    fn invalid_utf8_is_malformed() {
        assert!(matches!(
            String::from_wire_bytes(&[2, 0xC3, 0x28]),
            Err(CodecError::MalformedField { field: "string", .. })
        ));
    }

    #[test]
    fn optional_flags() {
        assert_eq!(None::<u32>.to_wire_bytes().unwrap(), vec![0]);
        assert_eq!(Some(7u8).to_wire_bytes().unwrap(), vec![1, 7]);
        assert!(Option::<u8>::from_wire_bytes(&[2, 7]).is_err());
    }

    #[test]
    fn sorted_writer_rejects_duplicates() {
        let mut w = ByteWriter::new();
        let err = write_sorted(&mut w, "votes", &[3u32, 3u32], |v| *v).unwrap_err();
        assert!(matches!(err, CodecError::FieldConstraintViolation { field: "votes", .. }));

        let mut w = ByteWriter::new();
        write_sorted(&mut w, "votes", &[1u32, 2u32], |v| *v).unwrap();
        let bytes = w.into_bytes();
        let mut r = ByteReader::new(&bytes);
        let back: Vec<u32> = read_sorted(&mut r, "votes", |v: &u32| *v).unwrap();
        assert_eq!(back, vec![1, 2]);
    }

    #[test]
    fn trailing_bytes_rejected() {
        assert!(matches!(
            u16::from_wire_bytes(&[1, 2, 3]),
            Err(CodecError::MalformedField { .. })
        ));
    }

    #[test]
    fn forged_length_does_not_allocate() {
        // Claims 60k elements but carries none.
        let mut w = ByteWriter::new();
        w.put_varint(60_000);
        let bytes = w.into_bytes();
        assert!(matches!(
            Vec::<u64>::from_wire_bytes(&bytes),
            Err(CodecError::TruncatedInput { .. })
        ));
    }

    #[test]
    fn digest_is_single_sha256_over_chain_and_body() {
        let chain = ChainId::from_bytes([7u8; 32]);
        let expected = crate::crypto::sha256(&[[7u8; 32].as_slice(), b"body"].concat());
        assert_eq!(digest(&chain, b"body"), expected);
        assert_ne!(digest(&chain, b"body"), digest(&ChainId::from_bytes([8u8; 32]), b"body"));
    }
}
