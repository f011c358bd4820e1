use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_core::Stream;

use crate::codec::WriterContext;
use crate::encoder::Encoder;
use crate::error::Error;
use crate::part::BodyPart;

type BoxedContentStream = Pin<Box<dyn Stream<Item = Result<Bytes, Error>>>>;

enum State {
    NextPart,
    PartContent(BoxedContentStream),
    Trailer(bool),
    Done,
}

/// Parts in, chunks out: pulls [`BodyPart`]s from an upstream source and
/// renders each through [`Encoder`], interleaving the part's own content
/// stream between the delimiter/header block and the next part (§4.6.2).
pub struct MultipartEncoder<S> {
    inner: S,
    encoder: Encoder,
    ctx: WriterContext,
    first: bool,
    state: State,
}

impl<S> MultipartEncoder<S> {
    pub fn new(inner: S, boundary: impl Into<Vec<u8>>, ctx: WriterContext) -> MultipartEncoder<S> {
        MultipartEncoder {
            inner,
            encoder: Encoder::new(boundary),
            ctx,
            first: true,
            state: State::NextPart,
        }
    }
}

impl<S> Stream for MultipartEncoder<S>
where
    S: Stream<Item = BodyPart> + Unpin,
{
    type Item = Result<Bytes, Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        loop {
            match &mut this.state {
                State::NextPart => match Pin::new(&mut this.inner).poll_next(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(None) => {
                        this.state = State::Trailer(this.first);
                    }
                    Poll::Ready(Some(part)) => {
                        let head = this.encoder.encode_part_head(&part, this.first);
                        this.first = false;
                        match part.into_content_stream(&this.ctx) {
                            Ok(stream) => {
                                this.state = State::PartContent(stream);
                                return Poll::Ready(Some(Ok(head)));
                            }
                            Err(e) => {
                                this.state = State::Done;
                                return Poll::Ready(Some(Err(e)));
                            }
                        }
                    }
                },
                State::PartContent(stream) => match stream.as_mut().poll_next(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(None) => {
                        this.state = State::NextPart;
                    }
                    Poll::Ready(Some(Ok(bytes))) => return Poll::Ready(Some(Ok(bytes))),
                    Poll::Ready(Some(Err(e))) => {
                        this.state = State::Done;
                        return Poll::Ready(Some(Err(e)));
                    }
                },
                State::Trailer(is_first) => {
                    let trailer = this.encoder.encode_trailer(*is_first);
                    this.state = State::Done;
                    return Poll::Ready(Some(Ok(trailer)));
                }
                State::Done => return Poll::Ready(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_executor::block_on_stream;
    use futures_util::stream;
    use http::header::{HeaderValue, CONTENT_DISPOSITION};

    fn collect_bytes(parts: Vec<BodyPart>, boundary: &str) -> Vec<u8> {
        let source = stream::iter(parts);
        let encoder = MultipartEncoder::new(source, boundary.as_bytes().to_vec(), WriterContext::new());
        let mut out = Vec::new();
        for chunk in block_on_stream(encoder) {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    #[test]
    fn encodes_a_single_buffered_part() {
        let part = BodyPart::builder()
            .content_disposition("form-data; name=\"a\"")
            .unwrap()
            .buffered(Bytes::from_static(b"hello"))
            .build();
        let out = collect_bytes(vec![part], "B");
        assert_eq!(
            out,
            b"--B\r\ncontent-disposition: form-data; name=\"a\"\r\n\r\nhello\r\n--B--"
        );
    }

    #[test]
    fn encodes_two_parts_with_separating_crlf() {
        let a = BodyPart::builder().buffered(Bytes::from_static(b"x")).build();
        let b = BodyPart::builder()
            .header(CONTENT_DISPOSITION, HeaderValue::from_static("form-data; name=\"b\""))
            .buffered(Bytes::from_static(b"y"))
            .build();
        let out = collect_bytes(vec![a, b], "B");
        assert_eq!(
            out,
            b"--B\r\n\r\nx\r\n--B\r\ncontent-disposition: form-data; name=\"b\"\r\n\r\ny\r\n--B--"
        );
    }

    #[test]
    fn encodes_an_empty_message() {
        let out = collect_bytes(vec![], "B");
        assert_eq!(out, b"--B--");
    }
}
