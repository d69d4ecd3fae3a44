//! Bounds-checked byte access for the self-relative wire formats.
//!
//! All offset arithmetic used by the codec goes through these helpers so a
//! short or hostile buffer surfaces as [`SdError::Malformed`] instead of a
//! slice panic.

use crate::errors::{SdError, SdResult};

/// Borrow `len` bytes at `offset`.
pub(crate) fn slice_at<'a>(
    buf: &'a [u8],
    offset: usize,
    len: usize,
    what: &'static str,
) -> SdResult<&'a [u8]> {
    offset
        .checked_add(len)
        .and_then(|end| buf.get(offset..end))
        .ok_or_else(|| SdError::malformed(what, offset, len, buf.len()))
}

pub(crate) fn read_u16_le(buf: &[u8], offset: usize, what: &'static str) -> SdResult<u16> {
    let b = slice_at(buf, offset, 2, what)?;
    Ok(u16::from_le_bytes([b[0], b[1]]))
}

pub(crate) fn read_u32_le(buf: &[u8], offset: usize, what: &'static str) -> SdResult<u32> {
    let b = slice_at(buf, offset, 4, what)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Fixed-length output buffer with a write cursor.
///
/// The length is decided up front; every `put_*` checks that the write fits,
/// so a miscomputed size is reported rather than silently growing the output.
#[derive(Debug)]
pub(crate) struct ByteWriter {
    buf: Vec<u8>,
    pos: usize,
}

impl ByteWriter {
    /// Zero-filled buffer of exactly `len` bytes, cursor at 0
    pub(crate) fn zeroed(len: usize) -> Self {
        Self {
            buf: vec![0u8; len],
            pos: 0,
        }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    /// Move the cursor to an absolute position
    pub(crate) fn seek(&mut self, pos: usize) -> SdResult<()> {
        if pos > self.buf.len() {
            return Err(SdError::malformed("output buffer", pos, 0, self.buf.len()));
        }
        self.pos = pos;
        Ok(())
    }

    fn span(&mut self, n: usize) -> SdResult<&mut [u8]> {
        let start = self.pos;
        let end = start
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| SdError::malformed("output buffer", start, n, self.buf.len()))?;
        self.pos = end;
        Ok(&mut self.buf[start..end])
    }

    pub(crate) fn put_u8(&mut self, v: u8) -> SdResult<()> {
        self.span(1)?[0] = v;
        Ok(())
    }

    pub(crate) fn put_u16_le(&mut self, v: u16) -> SdResult<()> {
        self.span(2)?.copy_from_slice(&v.to_le_bytes());
        Ok(())
    }

    pub(crate) fn put_u32_le(&mut self, v: u32) -> SdResult<()> {
        self.span(4)?.copy_from_slice(&v.to_le_bytes());
        Ok(())
    }

    pub(crate) fn put_bytes(&mut self, bytes: &[u8]) -> SdResult<()> {
        self.span(bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }

    /// Read back a u32 already written (used for header fix-ups)
    pub(crate) fn u32_at(&self, offset: usize) -> SdResult<u32> {
        read_u32_le(&self.buf, offset, "output buffer")
    }

    /// Overwrite a u32 without moving the cursor
    pub(crate) fn patch_u32_le(&mut self, offset: usize, v: u32) -> SdResult<()> {
        let saved = self.pos;
        self.seek(offset)?;
        let result = self.put_u32_le(v);
        self.pos = saved;
        result
    }

    pub(crate) fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}
