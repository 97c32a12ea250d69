//! Growable receive buffer with a read cursor

use crate::{
    constants::{BUF_CHUNK, MAX_BUFFER_SIZE},
    error::{EslError, EslResult},
};

/// Byte buffer that the parser consumes from the front.
///
/// Consumed bytes stay in place until [`compact`](Self::compact) moves the
/// unread tail to the start, so extraction is a cursor bump.
#[derive(Debug)]
pub(crate) struct EslBuffer {
    data: Vec<u8>,
    position: usize,
}

impl EslBuffer {
    pub(crate) fn new() -> Self {
        Self {
            data: Vec::with_capacity(BUF_CHUNK),
            position: 0,
        }
    }

    pub(crate) fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.data
            .extend_from_slice(bytes);
    }

    /// Unread bytes.
    pub(crate) fn len(&self) -> usize {
        self.data
            .len()
            - self.position
    }

    pub(crate) fn data(&self) -> &[u8] {
        &self.data[self.position..]
    }

    /// Take everything up to `pattern`, consuming the pattern as well.
    pub(crate) fn extract_until_pattern(&mut self, pattern: &[u8]) -> Option<Vec<u8>> {
        let found = self
            .data()
            .windows(pattern.len())
            .position(|w| w == pattern)?;
        let start = self.position;
        let out = self.data[start..start + found].to_vec();
        self.position += found + pattern.len();
        Some(out)
    }

    /// Take exactly `len` bytes, or nothing if not enough are buffered.
    pub(crate) fn extract_bytes(&mut self, len: usize) -> Option<Vec<u8>> {
        if self.len() < len {
            return None;
        }
        let start = self.position;
        let out = self.data[start..start + len].to_vec();
        self.position += len;
        Some(out)
    }

    pub(crate) fn compact(&mut self) {
        if self.position == 0 {
            return;
        }
        self.data
            .drain(..self.position);
        self.position = 0;
        if self
            .data
            .capacity()
            > 4 * BUF_CHUNK
            && self
                .data
                .len()
                < BUF_CHUNK
        {
            self.data
                .shrink_to(BUF_CHUNK);
        }
    }

    pub(crate) fn check_size_limits(&self) -> EslResult<()> {
        if self.len() > MAX_BUFFER_SIZE {
            return Err(EslError::protocol_error(format!(
                "Receive buffer exceeded {} bytes without a complete message",
                MAX_BUFFER_SIZE
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_until_pattern_consumes_terminator() {
        let mut buf = EslBuffer::new();
        buf.extend_from_slice(b"Content-Type: auth/request\n\nrest");
        let head = buf
            .extract_until_pattern(b"\n\n")
            .unwrap();
        assert_eq!(head, b"Content-Type: auth/request");
        assert_eq!(buf.data(), b"rest");
    }

    #[test]
    fn extract_until_pattern_waits_for_more() {
        let mut buf = EslBuffer::new();
        buf.extend_from_slice(b"Content-Type: auth/request\n");
        assert!(buf
            .extract_until_pattern(b"\n\n")
            .is_none());
        buf.extend_from_slice(b"\n");
        assert!(buf
            .extract_until_pattern(b"\n\n")
            .is_some());
    }

    #[test]
    fn extract_bytes_requires_full_length() {
        let mut buf = EslBuffer::new();
        buf.extend_from_slice(b"abc");
        assert!(buf
            .extract_bytes(4)
            .is_none());
        assert_eq!(
            buf.extract_bytes(2)
                .unwrap(),
            b"ab"
        );
        buf.compact();
        assert_eq!(buf.data(), b"c");
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn oversized_buffer_rejected() {
        let mut buf = EslBuffer::new();
        buf.extend_from_slice(&vec![b'x'; MAX_BUFFER_SIZE + 1]);
        assert!(buf
            .check_size_limits()
            .is_err());
    }
}
