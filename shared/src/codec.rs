//! Newline-delimited framing for the JSON wire protocol
//!
//! Messages are framed as:
//! ```text
//! <UTF-8 JSON object>\n
//! ```
//!
//! This ensures message boundaries are preserved over a TCP stream without a
//! length prefix; the receiver scans its accumulated buffer for `\n` and
//! hands back one decoded line at a time.

use bytes::{Buf, BytesMut};
use thiserror::Error;

/// Maximum line length (1 MB) to prevent memory exhaustion from a
/// misbehaving or malicious peer that never sends a newline.
pub const MAX_LINE_SIZE: usize = 1024 * 1024;

/// Errors that can occur while framing the byte stream.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("line exceeds maximum size of {MAX_LINE_SIZE} bytes")]
    LineTooLong,
    #[error("line is not valid UTF-8")]
    InvalidUtf8,
}

/// Decoder state for streaming newline-delimited frames out of a TCP read
/// loop. Every connection owns its own decoder; unlike a function-static
/// buffer this is safe to use from many concurrently-running handlers.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Add freshly-read bytes to the decoder buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next line from the buffer.
    ///
    /// Call this repeatedly until it returns `Ok(None)` to drain all
    /// complete lines currently buffered.
    pub fn decode_next(&mut self) -> Result<Option<String>, CodecError> {
        let Some(newline_at) = self.buffer.iter().position(|&b| b == b'\n') else {
            if self.buffer.len() > MAX_LINE_SIZE {
                return Err(CodecError::LineTooLong);
            }
            return Ok(None);
        };

        let mut line_bytes = self.buffer.split_to(newline_at);
        self.buffer.advance(1); // drop the newline itself

        // Tolerate a trailing \r for clients that frame with \r\n.
        if line_bytes.last() == Some(&b'\r') {
            line_bytes.truncate(line_bytes.len() - 1);
        }

        let line = String::from_utf8(line_bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8)?;
        Ok(Some(line))
    }

    /// True if there are unconsumed bytes with no terminating newline yet.
    /// A connection that hits EOF while this is true saw a partial frame.
    pub fn has_partial_frame(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Current buffer length, for diagnostics.
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }
}

/// Encode a single JSON line, appending the trailing newline the framing
/// requires.
pub fn encode_line(json: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(json.len() + 1);
    out.extend_from_slice(json.as_bytes());
    out.push(b'\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_single_line() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(b"{\"type\":\"HEARTBEAT\"}\n");
        let line = decoder.decode_next().unwrap().expect("should have a line");
        assert_eq!(line, r#"{"type":"HEARTBEAT"}"#);
        assert!(decoder.decode_next().unwrap().is_none());
    }

    #[test]
    fn partial_line_yields_none_until_newline_arrives() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(b"{\"type\":\"HEA");
        assert!(decoder.decode_next().unwrap().is_none());
        assert!(decoder.has_partial_frame());

        decoder.extend(b"RTBEAT\"}\n");
        let line = decoder.decode_next().unwrap().expect("should have a line");
        assert_eq!(line, r#"{"type":"HEARTBEAT"}"#);
        assert!(!decoder.has_partial_frame());
    }

    #[test]
    fn decodes_multiple_lines_fed_at_once() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(b"{\"a\":1}\n{\"a\":2}\n");

        assert_eq!(decoder.decode_next().unwrap().unwrap(), r#"{"a":1}"#);
        assert_eq!(decoder.decode_next().unwrap().unwrap(), r#"{"a":2}"#);
        assert!(decoder.decode_next().unwrap().is_none());
    }

    #[test]
    fn tolerates_crlf() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(b"{\"a\":1}\r\n");
        assert_eq!(decoder.decode_next().unwrap().unwrap(), r#"{"a":1}"#);
    }

    #[test]
    fn line_too_long_without_newline_errors() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&vec![b'x'; MAX_LINE_SIZE + 1]);
        assert!(matches!(decoder.decode_next(), Err(CodecError::LineTooLong)));
    }
}
