//! Upload byte counting, independent of anything the archive claims.

use crate::{BundleError, SecurityError};
use std::io::Read;

/// Reads an upload stream fully, failing as soon as it passes `limit` bytes.
pub fn read_limited<R: Read>(reader: R, limit: u64) -> Result<Vec<u8>, BundleError> {
    let mut buf = Vec::new();
    reader.take(limit.saturating_add(1)).read_to_end(&mut buf)?;
    if buf.len() as u64 > limit {
        return Err(SecurityError::UploadTooLarge { limit }.into());
    }
    Ok(buf)
}

/// Accumulates streamed upload chunks (e.g. an HTTP body) under a byte cap.
#[derive(Debug)]
pub struct UploadBuffer {
    buf: Vec<u8>,
    limit: u64,
}

impl UploadBuffer {
    pub fn new(limit: u64) -> Self {
        Self {
            buf: Vec::new(),
            limit,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) -> Result<(), SecurityError> {
        let next = self.buf.len() as u64 + chunk.len() as u64;
        if next > self.limit {
            return Err(SecurityError::UploadTooLarge { limit: self.limit });
        }
        self.buf.extend_from_slice(chunk);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_limited_accepts_exact_limit() {
        let data = vec![7u8; 100];
        assert_eq!(read_limited(&data[..], 100).unwrap().len(), 100);
    }

    #[test]
    fn read_limited_rejects_one_over() {
        let data = vec![7u8; 101];
        let err = read_limited(&data[..], 100).unwrap_err();
        assert!(matches!(
            err,
            BundleError::Security(SecurityError::UploadTooLarge { limit: 100 })
        ));
    }

    #[test]
    fn buffer_rejects_chunk_crossing_limit() {
        let mut buf = UploadBuffer::new(10);
        buf.push(b"hello").unwrap();
        buf.push(b"world").unwrap();
        assert_eq!(
            buf.push(b"!"),
            Err(SecurityError::UploadTooLarge { limit: 10 })
        );
        assert_eq!(buf.into_inner(), b"helloworld");
    }
}
