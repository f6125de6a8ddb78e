//! Line framing for the IRC byte stream.
//!
//! [`LineCodec`] is a [`Decoder`] yielding one logical line per LF (a
//! preceding CR is stripped). The buffer is bounded: a single line longer
//! than `max_line_len` plus the tag-section budget yields
//! [`LineError::TooLong`] once, the oversized line is discarded through
//! its terminator, and the decoder keeps working on subsequent lines.

use std::cmp;

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

use crate::error::LineError;
use crate::message::MAX_TAGS_LEN;

/// Initial read-buffer capacity; short lines never grow past this.
pub const INITIAL_BUFFER_SIZE: usize = 1024;

/// LF-framed line decoder with a bounded buffer.
#[derive(Clone, Debug)]
pub struct LineCodec {
    max_length: usize,
    next_index: usize,
    is_discarding: bool,
}

impl LineCodec {
    /// Create a decoder for a connection with the given body budget.
    ///
    /// The hard buffer maximum is `max_line_len` plus the tag-section
    /// budget, since a tagged line may legitimately exceed the body
    /// budget by the full tag allowance.
    pub fn new(max_line_len: usize) -> Self {
        LineCodec {
            max_length: max_line_len + MAX_TAGS_LEN,
            next_index: 0,
            is_discarding: false,
        }
    }

    /// The hard per-line maximum in bytes.
    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = LineError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, LineError> {
        loop {
            // Only scan up to one byte past the maximum; anything beyond
            // is already an oversized line.
            let read_to = cmp::min(self.max_length.saturating_add(1), buf.len());
            let newline_offset = buf[self.next_index..read_to]
                .iter()
                .position(|b| *b == b'\n');

            match (self.is_discarding, newline_offset) {
                (true, Some(offset)) => {
                    // Tail of the oversized line; drop it and resume.
                    buf.advance(self.next_index + offset + 1);
                    self.is_discarding = false;
                    self.next_index = 0;
                }
                (true, None) => {
                    buf.advance(read_to);
                    self.next_index = 0;
                    return Ok(None);
                }
                (false, Some(offset)) => {
                    let newline_index = self.next_index + offset;
                    self.next_index = 0;
                    let mut line = buf.split_to(newline_index + 1);
                    line.truncate(line.len() - 1);
                    if line.last() == Some(&b'\r') {
                        line.truncate(line.len() - 1);
                    }
                    return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
                }
                (false, None) if buf.len() > self.max_length => {
                    self.is_discarding = true;
                    return Err(LineError::TooLong(self.max_length));
                }
                (false, None) => {
                    // Partial line; remember how far we scanned.
                    self.next_index = read_to;
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, LineError> {
        match self.decode(buf)? {
            Some(line) => Ok(Some(line)),
            None if buf.is_empty() || self.is_discarding => Ok(None),
            None => {
                // Unterminated final line.
                let mut line = buf.split_to(buf.len());
                if line.last() == Some(&b'\r') {
                    line.truncate(line.len() - 1);
                }
                self.next_index = 0;
                Ok(Some(String::from_utf8_lossy(&line).into_owned()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(codec: &mut LineCodec, buf: &mut BytesMut) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(Some(line)) = codec.decode(buf) {
            out.push(line);
        }
        out
    }

    #[test]
    fn test_decode_lines() {
        let mut codec = LineCodec::new(512);
        let mut buf = BytesMut::from(&b"PING :a\r\nPONG b\nNOTICE * :x\r\n"[..]);
        assert_eq!(
            decode_all(&mut codec, &mut buf),
            vec!["PING :a", "PONG b", "NOTICE * :x"]
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_line_across_reads() {
        let mut codec = LineCodec::new(512);
        let mut buf = BytesMut::from(&b"PRIVMSG #chan :hel"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"lo\r\nPING x\r\n");
        assert_eq!(
            decode_all(&mut codec, &mut buf),
            vec!["PRIVMSG #chan :hello", "PING x"]
        );
    }

    #[test]
    fn test_too_long_line_is_recoverable() {
        let mut codec = LineCodec::new(16);
        let max = codec.max_length();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&vec![b'a'; max + 100]);
        buf.extend_from_slice(b"\r\nPING ok\r\n");

        match codec.decode(&mut buf) {
            Err(LineError::TooLong(reported)) => assert_eq!(reported, max),
            other => panic!("expected TooLong, got {:?}", other),
        }
        // The decoder stays usable: discarding may span several calls (as
        // it would across socket reads), then the next line comes through.
        let mut next = None;
        for _ in 0..8 {
            if let Some(line) = codec.decode(&mut buf).unwrap() {
                next = Some(line);
                break;
            }
        }
        assert_eq!(next.as_deref(), Some("PING ok"));
    }

    #[test]
    fn test_too_long_line_fed_incrementally() {
        let mut codec = LineCodec::new(16);
        let max = codec.max_length();
        let mut buf = BytesMut::new();

        let mut errored = false;
        for _ in 0..(max / 8 + 2) {
            buf.extend_from_slice(&[b'x'; 8]);
            match codec.decode(&mut buf) {
                Ok(None) => {}
                Err(LineError::TooLong(_)) => {
                    errored = true;
                    break;
                }
                other => panic!("unexpected decode result: {:?}", other),
            }
        }
        assert!(errored);

        buf.extend_from_slice(b"tail\nPONG y\n");
        let mut next = None;
        for _ in 0..8 {
            if let Some(line) = codec.decode(&mut buf).unwrap() {
                next = Some(line);
                break;
            }
        }
        assert_eq!(next.as_deref(), Some("PONG y"));
    }

    #[test]
    fn test_decode_eof_flushes_unterminated_line() {
        let mut codec = LineCodec::new(512);
        let mut buf = BytesMut::from(&b"QUIT :bye"[..]);
        assert_eq!(
            codec.decode_eof(&mut buf).unwrap(),
            Some("QUIT :bye".to_owned())
        );
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_empty_line() {
        let mut codec = LineCodec::new(512);
        let mut buf = BytesMut::from(&b"\r\nPING z\r\n"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(String::new()));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("PING z".to_owned()));
    }
}
