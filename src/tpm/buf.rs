//! Command builder and response cursor used by the protocol strategies.

use alloc::vec;
use alloc::vec::Vec;

use super::constants::{HEADER_SIZE_OFFSET, TPM_BUFSIZE, TPM_HEADER_SIZE};
use super::error::{TpmError, TpmResult};
use super::types::{header_code, header_length, write_header};

/// A page-sized command buffer whose header length tracks what was appended.
/// The response overwrites it in place.
#[derive(Debug, Clone)]
pub struct TpmBuf {
    data: Vec<u8>,
    overflow: bool,
}

impl TpmBuf {
    pub fn new(tag: u16, ordinal: u32) -> Self {
        let mut buf = Self { data: vec![0u8; TPM_BUFSIZE], overflow: false };
        buf.reset(tag, ordinal);
        buf
    }

    pub fn reset(&mut self, tag: u16, ordinal: u32) {
        self.data.fill(0);
        self.overflow = false;
        write_header(&mut self.data, tag, TPM_HEADER_SIZE as u32, ordinal);
    }

    /// Header length: bytes built so far, or bytes received after a transfer.
    pub fn len(&self) -> usize {
        (header_length(&self.data) as usize).min(TPM_BUFSIZE)
    }

    /// True once anything follows the header.
    pub fn has_body(&self) -> bool {
        self.len() > TPM_HEADER_SIZE
    }

    pub fn append(&mut self, bytes: &[u8]) {
        if self.overflow {
            return;
        }
        let len = self.len();
        if len + bytes.len() > TPM_BUFSIZE {
            self.overflow = true;
            return;
        }
        self.data[len..len + bytes.len()].copy_from_slice(bytes);
        let new_len = (len + bytes.len()) as u32;
        self.data[HEADER_SIZE_OFFSET..HEADER_SIZE_OFFSET + 4].copy_from_slice(&new_len.to_be_bytes());
    }

    pub fn append_u8(&mut self, value: u8) {
        self.append(&[value]);
    }

    pub fn append_u16(&mut self, value: u16) {
        self.append(&value.to_be_bytes());
    }

    pub fn append_u32(&mut self, value: u32) {
        self.append(&value.to_be_bytes());
    }

    /// TPM2B: 16-bit size followed by the bytes.
    pub fn append_sized(&mut self, bytes: &[u8]) {
        match u16::try_from(bytes.len()) {
            Ok(n) => {
                self.append_u16(n);
                self.append(bytes);
            }
            Err(_) => self.overflow = true,
        }
    }

    pub fn check(&self) -> TpmResult<()> {
        if self.overflow {
            return Err(TpmError::CommandTooLarge { count: TPM_BUFSIZE + 1, bufsiz: TPM_BUFSIZE });
        }
        Ok(())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len()]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Response code once the buffer holds a response.
    pub fn code(&self) -> u32 {
        header_code(&self.data)
    }

    /// Cursor over the response body.
    pub fn body(&self) -> ResponseReader<'_> {
        ResponseReader::new(self.as_slice(), TPM_HEADER_SIZE)
    }
}

/// Bounds-checked big-endian reader over a response.
#[derive(Debug, Clone)]
pub struct ResponseReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ResponseReader<'a> {
    pub fn new(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn bytes(&mut self, n: usize) -> TpmResult<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|end| *end <= self.data.len()).ok_or(
            TpmError::ShortResponse { len: self.data.len(), expected: self.pos.saturating_add(n) },
        )?;
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub fn skip(&mut self, n: usize) -> TpmResult<()> {
        self.bytes(n).map(|_| ())
    }

    pub fn u8(&mut self) -> TpmResult<u8> {
        Ok(self.bytes(1)?[0])
    }

    pub fn u16(&mut self) -> TpmResult<u16> {
        let b = self.bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> TpmResult<u32> {
        let b = self.bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// TPM2B: 16-bit size followed by that many bytes.
    pub fn sized(&mut self) -> TpmResult<&'a [u8]> {
        let n = self.u16()?;
        self.bytes(usize::from(n))
    }
}
