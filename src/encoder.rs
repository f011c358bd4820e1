//! Component E: the MIME encoder.
//!
//! Renders a demand-driven source of [`BodyPart`]s into the wire format:
//! `--boundary CRLF` + headers + blank line + content, repeated per part,
//! with a closing `--boundary-- ` trailer and no epilogue (§4.5). Holds no
//! state of its own beyond the boundary token; [`crate::bridge::MultipartEncoder`]
//! drives it across a chunk stream.

use bytes::{BufMut, Bytes, BytesMut};

use crate::part::BodyPart;

/// Stateless per-part renderer; [`crate::bridge::MultipartEncoder`] owns the
/// actual stream-driving state machine.
pub struct Encoder {
    boundary: Vec<u8>,
}

impl Encoder {
    pub fn new(boundary: impl Into<Vec<u8>>) -> Encoder {
        Encoder {
            boundary: boundary.into(),
        }
    }

    pub fn boundary(&self) -> &[u8] {
        &self.boundary
    }

    /// The delimiter line plus this part's rendered headers and the blank
    /// line that ends them. `is_first` controls whether a leading CRLF is
    /// emitted to close off the previous part's content.
    pub fn encode_part_head(&self, part: &BodyPart, is_first: bool) -> Bytes {
        let mut buf = BytesMut::new();
        if !is_first {
            buf.put_slice(b"\r\n");
        }
        buf.put_slice(b"--");
        buf.put_slice(&self.boundary);
        buf.put_slice(b"\r\n");
        for (name, value) in part.headers.map() {
            buf.put_slice(name.as_str().as_bytes());
            buf.put_slice(b": ");
            buf.put_slice(value.as_bytes());
            buf.put_slice(b"\r\n");
        }
        buf.put_slice(b"\r\n");
        buf.freeze()
    }

    /// The closing `--boundary--` trailer. `is_first` is true only for a
    /// part-less message (no CRLF needed to close a nonexistent part).
    pub fn encode_trailer(&self, is_first: bool) -> Bytes {
        let mut buf = BytesMut::new();
        if !is_first {
            buf.put_slice(b"\r\n");
        }
        buf.put_slice(b"--");
        buf.put_slice(&self.boundary);
        buf.put_slice(b"--");
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::{CONTENT_TYPE, HeaderValue};

    #[test]
    fn encodes_head_with_headers_and_blank_line() {
        let enc = Encoder::new(b"B".to_vec());
        let part = BodyPart::builder()
            .header(CONTENT_TYPE, HeaderValue::from_static("text/plain"))
            .buffered(Bytes::from_static(b"hi"))
            .build();
        let head = enc.encode_part_head(&part, true);
        assert_eq!(&head[..], &b"--B\r\ncontent-type: text/plain\r\n\r\n"[..]);
    }

    #[test]
    fn non_first_head_is_prefixed_with_crlf() {
        let enc = Encoder::new(b"B".to_vec());
        let part = BodyPart::builder().build();
        let head = enc.encode_part_head(&part, false);
        assert!(head.starts_with(b"\r\n--B\r\n"));
    }

    #[test]
    fn trailer_has_no_epilogue() {
        let enc = Encoder::new(b"B".to_vec());
        assert_eq!(&enc.encode_trailer(false)[..], &b"\r\n--B--"[..]);
        assert_eq!(&enc.encode_trailer(true)[..], &b"--B--"[..]);
    }
}
