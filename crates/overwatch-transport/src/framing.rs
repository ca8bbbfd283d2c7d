//! Frame encoding and the incremental frame decoder.

use crate::error::{TransportError, TransportResult};

/// Byte-size limits enforced by the decoder.
#[derive(Debug, Clone, Copy)]
pub struct FramingLimits {
    /// Largest accepted frame body, in bytes.
    pub max_message_size: usize,
    /// Largest accepted receive buffer, in bytes.
    pub max_buffer_size: usize,
    /// Largest accepted header block, in bytes.
    pub max_header_size: usize,
}

impl Default for FramingLimits {
    fn default() -> Self {
        Self {
            max_message_size: 10 * 1024 * 1024,
            max_buffer_size: 20 * 1024 * 1024,
            max_header_size: 8 * 1024,
        }
    }
}

/// Encode one frame: a `Content-Length` header (byte count, not
/// code-point count) followed by the body.
///
/// A trailing newline follows the body. Header-mode peers skip it as a
/// blank separator between frames; peers that read newline-delimited
/// JSON see the body as one complete line.
#[must_use]
pub fn encode_frame(body: &[u8]) -> Vec<u8> {
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    let mut frame = Vec::with_capacity(header.len().saturating_add(body.len()).saturating_add(1));
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(body);
    frame.push(b'\n');
    frame
}

/// Incremental decoder for the two frame modes.
///
/// Feed bytes with [`FrameDecoder::push`], then drain complete frames
/// with [`FrameDecoder::next_frame`]. A limit violation discards the
/// offending frame, clears any pending-length state, and surfaces a
/// typed error; the decoder remains usable for subsequent bytes.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    pending_len: Option<usize>,
    limits: FramingLimits,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(FramingLimits::default())
    }
}

impl FrameDecoder {
    /// Create a decoder with the given limits.
    #[must_use]
    pub fn new(limits: FramingLimits) -> Self {
        Self {
            buf: Vec::new(),
            pending_len: None,
            limits,
        }
    }

    /// Append received bytes to the decode buffer.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::BufferOverflow`] when the buffer would
    /// exceed `max_buffer_size`; the buffer and pending-length state are
    /// cleared so decoding can resynchronize on later input.
    pub fn push(&mut self, bytes: &[u8]) -> TransportResult<()> {
        self.buf.extend_from_slice(bytes);
        if self.buf.len() > self.limits.max_buffer_size {
            let size = self.buf.len();
            self.buf.clear();
            self.pending_len = None;
            return Err(TransportError::BufferOverflow {
                size,
                limit: self.limits.max_buffer_size,
            });
        }
        Ok(())
    }

    /// Extract the next complete frame body, if one is buffered.
    ///
    /// # Errors
    ///
    /// Limit and header violations surface as typed errors after the
    /// offending bytes have been discarded; the caller should keep
    /// pulling frames.
    pub fn next_frame(&mut self) -> TransportResult<Option<Vec<u8>>> {
        loop {
            // A known Content-Length: wait for the full body.
            if let Some(len) = self.pending_len {
                if self.buf.len() < len {
                    return Ok(None);
                }
                let frame: Vec<u8> = self.buf.drain(..len).collect();
                self.pending_len = None;
                return Ok(Some(frame));
            }

            let Some(newline) = self.buf.iter().position(|&b| b == b'\n') else {
                // No complete line yet. An unterminated header block is
                // bounded by the header limit; a line-mode body is only
                // bounded by the buffer limit enforced in push().
                if looks_like_header(&self.buf) && self.buf.len() > self.limits.max_header_size {
                    let size = self.buf.len();
                    self.buf.clear();
                    return Err(TransportError::HeaderTooLarge {
                        size,
                        limit: self.limits.max_header_size,
                    });
                }
                return Ok(None);
            };

            let line_end = strip_cr(&self.buf[..newline]);
            if line_end.is_empty() {
                // Blank separator between frames.
                self.buf.drain(..=newline);
                continue;
            }

            if looks_like_header(line_end) {
                match self.decode_header_block()? {
                    HeaderProgress::NeedMore => return Ok(None),
                    HeaderProgress::Decoded => {},
                }
                continue;
            }

            // Line-delimited: the line is one complete message.
            if line_end.len() > self.limits.max_message_size {
                let size = line_end.len();
                self.buf.drain(..=newline);
                return Err(TransportError::MessageTooLarge {
                    size,
                    limit: self.limits.max_message_size,
                });
            }
            let frame = line_end.to_vec();
            self.buf.drain(..=newline);
            return Ok(Some(frame));
        }
    }

    /// Consume a header block ending in a blank line and record its
    /// `Content-Length`.
    fn decode_header_block(&mut self) -> TransportResult<HeaderProgress> {
        let Some(block_end) = find_block_end(&self.buf) else {
            if self.buf.len() > self.limits.max_header_size {
                let size = self.buf.len();
                self.buf.clear();
                return Err(TransportError::HeaderTooLarge {
                    size,
                    limit: self.limits.max_header_size,
                });
            }
            return Ok(HeaderProgress::NeedMore);
        };

        if block_end > self.limits.max_header_size {
            self.buf.drain(..block_end);
            return Err(TransportError::HeaderTooLarge {
                size: block_end,
                limit: self.limits.max_header_size,
            });
        }

        let content_length = parse_content_length(&self.buf[..block_end]);
        self.buf.drain(..block_end);

        match content_length {
            Some(Ok(len)) => {
                if len > self.limits.max_message_size {
                    return Err(TransportError::MessageTooLarge {
                        size: len,
                        limit: self.limits.max_message_size,
                    });
                }
                self.pending_len = Some(len);
                Ok(HeaderProgress::Decoded)
            },
            Some(Err(raw)) => Err(TransportError::InvalidContentLength(raw)),
            None => Err(TransportError::MissingContentLength),
        }
    }
}

enum HeaderProgress {
    NeedMore,
    Decoded,
}

fn strip_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// True when the bytes open with an ASCII `Name:` header token rather
/// than a JSON body.
fn looks_like_header(bytes: &[u8]) -> bool {
    let Some(colon) = bytes.iter().position(|&b| b == b':') else {
        // No colon yet: still header-like only if every byte so far is a
        // legal header-name byte.
        return !bytes.is_empty()
            && bytes
                .iter()
                .all(|&b| b.is_ascii_alphanumeric() || b == b'-');
    };
    colon > 0
        && bytes[..colon]
            .iter()
            .all(|&b| b.is_ascii_alphanumeric() || b == b'-')
}

/// Byte offset one past the blank line that terminates the header block,
/// or `None` when the block is still incomplete.
fn find_block_end(buf: &[u8]) -> Option<usize> {
    let mut offset = 0usize;
    while let Some(newline) = buf
        .get(offset..)
        .and_then(|rest| rest.iter().position(|&b| b == b'\n'))
    {
        let line_start = offset;
        let line_stop = offset.saturating_add(newline);
        offset = line_stop.saturating_add(1);
        if strip_cr(&buf[line_start..line_stop]).is_empty() {
            return Some(offset);
        }
    }
    None
}

/// Find `Content-Length` (case-insensitive) in a header block.
///
/// Returns `None` when absent, `Some(Err(raw))` when present but not a
/// nonnegative integer, and `Some(Ok(len))` otherwise. Other headers are
/// ignored.
fn parse_content_length(block: &[u8]) -> Option<Result<usize, String>> {
    for line in block.split(|&b| b == b'\n') {
        let line = strip_cr(line);
        let Some(colon) = line.iter().position(|&b| b == b':') else {
            continue;
        };
        let name = String::from_utf8_lossy(&line[..colon]);
        if !name.trim().eq_ignore_ascii_case("content-length") {
            continue;
        }
        let value = String::from_utf8_lossy(line.get(colon.saturating_add(1)..).unwrap_or(b""));
        let value = value.trim();
        return Some(
            value
                .parse::<usize>()
                .map_err(|_| value.to_string()),
        );
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_limits() -> FramingLimits {
        FramingLimits {
            max_message_size: 64,
            max_buffer_size: 256,
            max_header_size: 48,
        }
    }

    #[test]
    fn test_header_delimited_frame() {
        let mut dec = FrameDecoder::default();
        let body = br#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#;
        dec.push(&encode_frame(body)).unwrap();
        assert_eq!(dec.next_frame().unwrap().unwrap(), body.to_vec());
        assert!(dec.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_content_length_is_case_insensitive() {
        let mut dec = FrameDecoder::default();
        dec.push(b"content-LENGTH: 2\r\n\r\n{}").unwrap();
        assert_eq!(dec.next_frame().unwrap().unwrap(), b"{}".to_vec());
    }

    #[test]
    fn test_other_headers_are_ignored() {
        let mut dec = FrameDecoder::default();
        dec.push(b"Content-Type: application/json\r\nContent-Length: 2\r\n\r\n{}")
            .unwrap();
        assert_eq!(dec.next_frame().unwrap().unwrap(), b"{}".to_vec());
    }

    #[test]
    fn test_line_delimited_frame() {
        let mut dec = FrameDecoder::default();
        dec.push(b"{\"jsonrpc\":\"2.0\",\"method\":\"x\"}\n").unwrap();
        assert_eq!(
            dec.next_frame().unwrap().unwrap(),
            b"{\"jsonrpc\":\"2.0\",\"method\":\"x\"}".to_vec()
        );
    }

    #[test]
    fn test_split_delivery_across_pushes() {
        let mut dec = FrameDecoder::default();
        let frame = encode_frame(b"{\"a\":1}");
        let (first, second) = frame.split_at(frame.len() / 2);
        dec.push(first).unwrap();
        assert!(dec.next_frame().unwrap().is_none());
        dec.push(second).unwrap();
        assert_eq!(dec.next_frame().unwrap().unwrap(), b"{\"a\":1}".to_vec());
    }

    #[test]
    fn test_multiple_frames_one_push() {
        let mut dec = FrameDecoder::default();
        let mut bytes = encode_frame(b"{\"a\":1}");
        bytes.extend_from_slice(&encode_frame(b"{\"b\":2}"));
        bytes.extend_from_slice(b"{\"c\":3}\n");
        dec.push(&bytes).unwrap();
        assert_eq!(dec.next_frame().unwrap().unwrap(), b"{\"a\":1}".to_vec());
        assert_eq!(dec.next_frame().unwrap().unwrap(), b"{\"b\":2}".to_vec());
        assert_eq!(dec.next_frame().unwrap().unwrap(), b"{\"c\":3}".to_vec());
        assert!(dec.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_blank_lines_between_frames_are_skipped() {
        let mut dec = FrameDecoder::default();
        dec.push(b"\r\n\n{\"a\":1}\n").unwrap();
        assert_eq!(dec.next_frame().unwrap().unwrap(), b"{\"a\":1}".to_vec());
    }

    #[test]
    fn test_oversize_content_length_rejected_and_resyncs() {
        let mut dec = FrameDecoder::new(small_limits());
        dec.push(b"Content-Length: 9999\r\n\r\n").unwrap();
        let err = dec.next_frame().unwrap_err();
        assert!(matches!(err, TransportError::MessageTooLarge { .. }));
        // Decoder recovers: the next well-formed frame decodes.
        dec.push(b"{\"ok\":1}\n").unwrap();
        assert_eq!(dec.next_frame().unwrap().unwrap(), b"{\"ok\":1}".to_vec());
    }

    #[test]
    fn test_negative_content_length_rejected() {
        let mut dec = FrameDecoder::default();
        dec.push(b"Content-Length: -5\r\n\r\n").unwrap();
        let err = dec.next_frame().unwrap_err();
        assert!(matches!(err, TransportError::InvalidContentLength(_)));
    }

    #[test]
    fn test_non_numeric_content_length_rejected() {
        let mut dec = FrameDecoder::default();
        dec.push(b"Content-Length: banana\r\n\r\n").unwrap();
        let err = dec.next_frame().unwrap_err();
        assert!(matches!(err, TransportError::InvalidContentLength(_)));
    }

    #[test]
    fn test_header_block_without_content_length_rejected() {
        let mut dec = FrameDecoder::default();
        dec.push(b"Content-Type: application/json\r\n\r\n").unwrap();
        let err = dec.next_frame().unwrap_err();
        assert!(matches!(err, TransportError::MissingContentLength));
        // The block was consumed; a following frame still decodes.
        dec.push(b"{\"ok\":1}\n").unwrap();
        assert_eq!(dec.next_frame().unwrap().unwrap(), b"{\"ok\":1}".to_vec());
    }

    #[test]
    fn test_header_too_large() {
        let mut dec = FrameDecoder::new(small_limits());
        let long = format!("X-Padding: {}\r\nContent-Length: 2\r\n\r\n", "y".repeat(64));
        dec.push(long.as_bytes()).unwrap();
        let err = dec.next_frame().unwrap_err();
        assert!(matches!(err, TransportError::HeaderTooLarge { .. }));
    }

    #[test]
    fn test_oversize_line_rejected_and_resyncs() {
        let mut dec = FrameDecoder::new(small_limits());
        let mut bytes = vec![b'{'];
        bytes.extend(std::iter::repeat_n(b'x', 100));
        bytes.push(b'\n');
        bytes.extend_from_slice(b"{\"ok\":1}\n");
        dec.push(&bytes).unwrap();
        let err = dec.next_frame().unwrap_err();
        assert!(matches!(err, TransportError::MessageTooLarge { .. }));
        assert_eq!(dec.next_frame().unwrap().unwrap(), b"{\"ok\":1}".to_vec());
    }

    #[test]
    fn test_buffer_overflow_clears_state() {
        let mut dec = FrameDecoder::new(small_limits());
        let err = dec.push(&vec![b'{'; 300]).unwrap_err();
        assert!(matches!(err, TransportError::BufferOverflow { .. }));
        // State fully cleared; decoding resumes cleanly.
        dec.push(b"{\"ok\":1}\n").unwrap();
        assert_eq!(dec.next_frame().unwrap().unwrap(), b"{\"ok\":1}".to_vec());
    }

    #[test]
    fn test_content_length_counts_bytes_not_chars() {
        // "é" is one char, two bytes.
        let body = "{\"s\":\"é\"}".as_bytes();
        let frame = encode_frame(body);
        let rendered = String::from_utf8_lossy(&frame);
        assert!(rendered.starts_with(&format!("Content-Length: {}\r\n\r\n", body.len())));

        let mut dec = FrameDecoder::default();
        dec.push(&frame).unwrap();
        assert_eq!(dec.next_frame().unwrap().unwrap(), body.to_vec());
        // The trailing newline is inter-frame padding, not a frame.
        assert!(dec.next_frame().unwrap().is_none());
    }
}
