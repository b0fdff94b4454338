//! Primitive encodings of the MySQL client/server protocol.
//!
//! All integers are little-endian and unsigned. `PacketReader` walks one
//! logical packet payload and never reads past its end; `PacketWriter`
//! accumulates a payload for the framer.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// First byte of a length-encoded integer that stands for SQL NULL.
pub const VINT_NULL: u8 = 0xfb;
const VINT_2: u8 = 0xfc;
const VINT_3: u8 = 0xfd;
const VINT_8: u8 = 0xfe;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("truncated input: needed {needed} bytes, {remaining} remaining")]
    TruncatedInput { needed: usize, remaining: usize },
    #[error("unexpected NULL length-encoded integer")]
    NullValue,
    #[error("invalid length-encoded integer prefix 0x{0:02x}")]
    InvalidLengthPrefix(u8),
    #[error("string is not null-terminated")]
    MissingTerminator,
    #[error("string contains an embedded NUL byte")]
    EmbeddedNul,
    #[error("value of {len} bytes exceeds its {max}-byte length prefix")]
    ValueTooLong { len: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, CodecError>;

#[derive(Debug, Clone)]
pub struct PacketReader {
    buf: Bytes,
}

impl PacketReader {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            buf: payload.into(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    pub fn has_remaining(&self) -> bool {
        self.buf.has_remaining()
    }

    fn ensure(&self, needed: usize) -> Result<()> {
        if self.buf.remaining() < needed {
            return Err(CodecError::TruncatedInput {
                needed,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.ensure(n)?;
        self.buf.advance(n);
        Ok(())
    }

    pub fn read_int1(&mut self) -> Result<u8> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_int2(&mut self) -> Result<u16> {
        self.ensure(2)?;
        Ok(self.buf.get_u16_le())
    }

    pub fn read_int3(&mut self) -> Result<u32> {
        self.ensure(3)?;
        Ok(self.buf.get_uint_le(3) as u32)
    }

    pub fn read_int4(&mut self) -> Result<u32> {
        self.ensure(4)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn read_int6(&mut self) -> Result<u64> {
        self.ensure(6)?;
        Ok(self.buf.get_uint_le(6))
    }

    pub fn read_int8(&mut self) -> Result<u64> {
        self.ensure(8)?;
        Ok(self.buf.get_u64_le())
    }

    /// Reads a length-encoded integer. The NULL marker is an error here;
    /// use [`PacketReader::read_nullable_vint`] where NULL is legal.
    pub fn read_vint(&mut self) -> Result<u64> {
        self.read_nullable_vint()?.ok_or(CodecError::NullValue)
    }

    pub fn read_nullable_vint(&mut self) -> Result<Option<u64>> {
        let prefix = self.read_int1()?;
        let value = match prefix {
            0..=0xfa => prefix as u64,
            VINT_NULL => return Ok(None),
            VINT_2 => self.read_int2()? as u64,
            VINT_3 => self.read_int3()? as u64,
            VINT_8 => self.read_int8()?,
            other => return Err(CodecError::InvalidLengthPrefix(other)),
        };
        Ok(Some(value))
    }

    pub fn read_fixed_string(&mut self, n: usize) -> Result<Bytes> {
        self.ensure(n)?;
        Ok(self.buf.copy_to_bytes(n))
    }

    pub fn read_len_encoded_string(&mut self) -> Result<Bytes> {
        let len = self.read_vint()?;
        let len = usize::try_from(len).map_err(|_| CodecError::TruncatedInput {
            needed: usize::MAX,
            remaining: self.remaining(),
        })?;
        self.read_fixed_string(len)
    }

    /// Reads up to the next 0x00 and consumes the terminator.
    pub fn read_nul_terminated_string(&mut self) -> Result<Bytes> {
        let end = self
            .buf
            .iter()
            .position(|b| *b == 0)
            .ok_or(CodecError::MissingTerminator)?;
        let value = self.buf.split_to(end);
        self.buf.advance(1);
        Ok(value)
    }

    /// Consumes everything left in the packet.
    pub fn read_eof_string(&mut self) -> Bytes {
        let n = self.buf.remaining();
        self.buf.copy_to_bytes(n)
    }
}

#[derive(Debug, Default)]
pub struct PacketWriter {
    buf: BytesMut,
}

impl PacketWriter {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn write_int1(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn write_int2(&mut self, v: u16) {
        self.buf.put_u16_le(v);
    }

    /// Writes the low 24 bits of `v`.
    pub fn write_int3(&mut self, v: u32) {
        self.buf.put_uint_le(v as u64, 3);
    }

    pub fn write_int4(&mut self, v: u32) {
        self.buf.put_u32_le(v);
    }

    /// Writes the low 48 bits of `v`.
    pub fn write_int6(&mut self, v: u64) {
        self.buf.put_uint_le(v, 6);
    }

    pub fn write_int8(&mut self, v: u64) {
        self.buf.put_u64_le(v);
    }

    pub fn write_vint(&mut self, v: u64) {
        if v < VINT_NULL as u64 {
            self.buf.put_u8(v as u8);
        } else if v < 1 << 16 {
            self.buf.put_u8(VINT_2);
            self.buf.put_u16_le(v as u16);
        } else if v < 1 << 24 {
            self.buf.put_u8(VINT_3);
            self.buf.put_uint_le(v, 3);
        } else {
            self.buf.put_u8(VINT_8);
            self.buf.put_u64_le(v);
        }
    }

    pub fn write_null(&mut self) {
        self.buf.put_u8(VINT_NULL);
    }

    pub fn write_bytes(&mut self, value: &[u8]) {
        self.buf.extend_from_slice(value);
    }

    pub fn write_len_encoded_string(&mut self, value: &[u8]) {
        self.write_vint(value.len() as u64);
        self.buf.extend_from_slice(value);
    }

    /// One length byte then the bytes, as used for auth responses.
    pub fn write_int1_prefixed_string(&mut self, value: &[u8]) -> Result<()> {
        let len = u8::try_from(value.len()).map_err(|_| CodecError::ValueTooLong {
            len: value.len(),
            max: u8::MAX as usize,
        })?;
        self.buf.put_u8(len);
        self.buf.extend_from_slice(value);
        Ok(())
    }

    /// The terminator is the only 0x00 allowed; there is no escaping.
    pub fn write_nul_terminated_string(&mut self, value: &[u8]) -> Result<()> {
        if value.contains(&0) {
            return Err(CodecError::EmbeddedNul);
        }
        self.buf.extend_from_slice(value);
        self.buf.put_u8(0);
        Ok(())
    }

    pub fn write_eof_string(&mut self, value: &[u8]) {
        self.buf.extend_from_slice(value);
    }

    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}
