//! Bounded forward reader over a [`Blob`] (little-endian helpers).

use std::borrow::Cow;

use crate::{
    blob::Blob,
    error::{ErrorKind, ParseError, ParseResult},
};

/// Width of a length prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LenWidth {
    /// One byte.
    U8,
    /// Four bytes, little-endian.
    U32,
}

/// Sequential reader with absolute offsets.
///
/// Invariant: `offset <= end <= blob.len()`. A read that would cross `end`
/// fails with [`ErrorKind::UnexpectedEnd`] and leaves the offset untouched.
#[derive(Debug)]
pub struct Cursor<'a, B: Blob + ?Sized> {
    blob: &'a B,
    offset: u64,
    end: u64,
}

impl<B: Blob + ?Sized> Clone for Cursor<'_, B> {
    fn clone(&self) -> Self { Self { blob: self.blob, offset: self.offset, end: self.end } }
}

impl<'a, B: Blob + ?Sized> Cursor<'a, B> {
    /// Cursor from `start` to the end of the blob.
    pub fn new(blob: &'a B, start: u64) -> ParseResult<Self> { Self::with_bound(blob, start, blob.len()) }

    /// Cursor over `[start, end)`; `end` is clamped to the blob length.
    pub fn with_bound(blob: &'a B, start: u64, end: u64) -> ParseResult<Self> {
        let end = end.min(blob.len());
        if start > end {
            return Err(ParseError::new(ErrorKind::UnexpectedEnd { needed: 0, available: 0 }, start));
        }
        Ok(Self { blob, offset: start, end })
    }

    /// Absolute offset of the next byte.
    pub const fn offset(&self) -> u64 { self.offset }

    /// Upper bound (exclusive).
    pub const fn end(&self) -> u64 { self.end }

    /// Bytes left before the bound.
    pub const fn peek_remaining(&self) -> u64 { self.end - self.offset }

    /// True once every byte up to the bound has been consumed.
    pub const fn is_at_end(&self) -> bool { self.offset == self.end }

    fn ensure(&self, n: u64) -> ParseResult<()> {
        let available = self.peek_remaining();
        if available < n {
            return Err(ParseError::new(ErrorKind::UnexpectedEnd { needed: n, available }, self.offset));
        }
        Ok(())
    }

    /// Reads `n` bytes, borrowing from the blob when it is resident.
    pub fn read_bytes(&mut self, n: usize) -> ParseResult<Cow<'a, [u8]>> {
        self.ensure(n as u64)?;
        let bytes = self.blob.read_at(self.offset, n).ok_or_else(|| {
            ParseError::new(ErrorKind::UnexpectedEnd { needed: n as u64, available: self.peek_remaining() }, self.offset)
        })?;
        self.offset += n as u64;
        Ok(bytes)
    }

    fn read_array<const N: usize>(&mut self) -> ParseResult<[u8; N]> {
        let b = self.read_bytes(N)?;
        let mut out = [0_u8; N];
        out.copy_from_slice(&b);
        Ok(out)
    }

    /// Looks at the next byte without consuming it.
    pub fn peek_u8(&self) -> ParseResult<u8> { self.clone().read_u8() }

    /// Reads one byte.
    pub fn read_u8(&mut self) -> ParseResult<u8> { Ok(self.read_array::<1>()?[0]) }

    /// Reads a u16 LE.
    pub fn read_u16(&mut self) -> ParseResult<u16> { Ok(u16::from_le_bytes(self.read_array()?)) }

    /// Reads a u32 LE.
    pub fn read_u32(&mut self) -> ParseResult<u32> { Ok(u32::from_le_bytes(self.read_array()?)) }

    /// Reads an i32 LE.
    pub fn read_i32(&mut self) -> ParseResult<i32> { Ok(i32::from_le_bytes(self.read_array()?)) }

    /// Reads a u64 LE.
    pub fn read_u64(&mut self) -> ParseResult<u64> { Ok(u64::from_le_bytes(self.read_array()?)) }

    /// Reads an IEEE-754 f64 LE.
    pub fn read_f64(&mut self) -> ParseResult<f64> { Ok(f64::from_bits(self.read_u64()?)) }

    /// Reads a length of the given width, then that many bytes.
    ///
    /// A four-byte length is signed on disk; values above `i32::MAX` are rejected
    /// as [`ErrorKind::MalformedValue`].
    pub fn read_cstring_prefixed(&mut self, width: LenWidth) -> ParseResult<Cow<'a, [u8]>> {
        let at = self.offset;
        let len = match width {
            LenWidth::U8 => usize::from(self.read_u8()?),
            LenWidth::U32 => {
                let n = self.read_i32()?;
                usize::try_from(n).map_err(|_| ParseError::malformed("negative length", at))?
            }
        };
        self.read_bytes(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_little_endian() -> ParseResult<()> {
        let data: &[u8] = &[0xEF, 0xBE, 0xEF, 0xBE, 0xAD, 0xDE, 0x2A];
        let mut c = Cursor::new(data, 0)?;
        assert_eq!(c.read_u16()?, 0xBEEF);
        assert_eq!(c.read_u32()?, 0xDEAD_BEEF);
        assert_eq!(c.offset(), 6);
        assert_eq!(c.peek_u8()?, 0x2A);
        assert_eq!(c.read_u8()?, 0x2A);
        assert!(c.is_at_end());
        Ok(())
    }

    #[test]
    fn short_read_fails_without_advancing() -> ParseResult<()> {
        let data: &[u8] = &[1, 2, 3];
        let mut c = Cursor::new(data, 1)?;
        let err = c.read_u32().unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnexpectedEnd { needed: 4, available: 2 });
        assert_eq!(err.offset, 1);
        assert_eq!(c.offset(), 1);
        Ok(())
    }

    #[test]
    fn bound_is_enforced() -> ParseResult<()> {
        let data: &[u8] = &[0; 16];
        let mut c = Cursor::with_bound(data, 4, 6)?;
        assert_eq!(c.peek_remaining(), 2);
        assert!(c.read_u32().is_err());
        assert_eq!(c.read_u16()?, 0);
        assert!(c.read_u8().is_err());
        Ok(())
    }

    #[test]
    fn start_past_end_is_rejected() {
        let data: &[u8] = &[0; 2];
        assert!(Cursor::new(data, 3).is_err());
    }

    #[test]
    fn length_prefixed_strings() -> ParseResult<()> {
        let data: &[u8] = &[2, b'h', b'i', 3, 0, 0, 0, b'a', b'b', b'c', 0xFF, 0xFF, 0xFF, 0xFF];
        let mut c = Cursor::new(data, 0)?;
        assert_eq!(&*c.read_cstring_prefixed(LenWidth::U8)?, b"hi");
        assert_eq!(&*c.read_cstring_prefixed(LenWidth::U32)?, b"abc");
        let err = c.read_cstring_prefixed(LenWidth::U32).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::MalformedValue(_)));
        Ok(())
    }

    #[test]
    fn slices_are_borrowed() -> ParseResult<()> {
        let data: &[u8] = &[9, 8, 7];
        let mut c = Cursor::new(data, 0)?;
        assert!(matches!(c.read_bytes(2)?, Cow::Borrowed(_)));
        Ok(())
    }
}
