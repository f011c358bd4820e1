use std::cell::RefCell;
use std::collections::VecDeque;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use bytes::Bytes;
use futures_core::Stream;

use crate::error::Error;
use crate::parser::{EventSink, ParseEvent, Parser};
use crate::part::{BodyPart, PartHeaders};

/// The shared mailbox between a part's producer (the decoder, driven by
/// upstream `Content`/`EndPart` events) and its consumer (the part's own
/// [`PartContentStream`]). Coupled backpressure (§5): the decoder only
/// pushes what the parser has already produced, and a dropped consumer
/// marks itself `cancelled` so the decoder stops bothering to buffer
/// further chunks for a part nobody is reading anymore.
struct PartChannel {
    chunks: VecDeque<Bytes>,
    ended: bool,
    error: Option<Error>,
    cancelled: bool,
    waker: Option<Waker>,
}

impl PartChannel {
    fn new() -> PartChannel {
        PartChannel {
            chunks: VecDeque::new(),
            ended: false,
            error: None,
            cancelled: false,
            waker: None,
        }
    }

    fn push(&mut self, bytes: Bytes) {
        if self.cancelled {
            return;
        }
        self.chunks.push_back(bytes);
        self.wake();
    }

    fn finish(&mut self) {
        self.ended = true;
        self.wake();
    }

    fn fail(&mut self, err: Error) {
        self.error = Some(err);
        self.ended = true;
        self.wake();
    }

    fn wake(&mut self) {
        if let Some(w) = self.waker.take() {
            w.wake();
        }
    }
}

/// A part's own content sub-stream, independently pollable from the
/// part-stream itself (§4.6.1/§5). Dropping it before it naturally ends is
/// the "inner cancel": the decoder notices via `cancelled` and silently
/// discards the rest of that part's bytes instead of erroring.
struct PartContentStream {
    channel: Rc<RefCell<PartChannel>>,
}

impl Stream for PartContentStream {
    type Item = Result<Bytes, Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut channel = self.channel.borrow_mut();
        if let Some(chunk) = channel.chunks.pop_front() {
            return Poll::Ready(Some(Ok(chunk)));
        }
        if let Some(err) = channel.error.take() {
            return Poll::Ready(Some(Err(err)));
        }
        if channel.ended {
            return Poll::Ready(None);
        }
        channel.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl Drop for PartContentStream {
    fn drop(&mut self) {
        let mut channel = self.channel.borrow_mut();
        if !channel.ended {
            channel.cancelled = true;
        }
    }
}

/// Chunks in, parts out: couples an upstream `Stream<Item = Result<Bytes,
/// Error>>` to the parser. A [`BodyPart`] is yielded as soon as its headers
/// are complete (`EndHeaders`, §4.6.1), carrying a `Streaming` content
/// sub-stream that is fed as further `Content`/`EndPart` events arrive.
pub struct MultipartDecoder<S> {
    inner: S,
    parser: Option<Parser>,
    current_headers: PartHeaders,
    /// The in-flight part's content channel, if headers have been emitted
    /// but `EndPart` hasn't arrived yet.
    channel: Option<Rc<RefCell<PartChannel>>>,
    new_parts: VecDeque<BodyPart>,
    finished: bool,
}

impl<S> MultipartDecoder<S> {
    pub fn new(inner: S, boundary: impl AsRef<[u8]>) -> MultipartDecoder<S> {
        MultipartDecoder {
            inner,
            parser: Some(Parser::new(boundary)),
            current_headers: PartHeaders::new(),
            channel: None,
            new_parts: VecDeque::new(),
            finished: false,
        }
    }

    /// Fail the in-flight part's content channel, if any, without erroring
    /// the part-stream itself. Used both when the upstream fails (the
    /// error is also returned from `poll_next`) and when the decoder is
    /// dropped mid-part (the "outer cancel").
    fn fail_in_flight(&mut self, err: Error) {
        if let Some(channel) = self.channel.take() {
            channel.borrow_mut().fail(err);
        }
    }
}

impl<S> Drop for MultipartDecoder<S> {
    fn drop(&mut self) {
        if let Some(channel) = self.channel.take() {
            let mut channel = channel.borrow_mut();
            if !channel.ended {
                channel.fail(Error::Cancelled);
            }
        }
    }
}

struct DecoderSink<'a> {
    headers: &'a mut PartHeaders,
    channel: &'a mut Option<Rc<RefCell<PartChannel>>>,
    new_parts: &'a mut VecDeque<BodyPart>,
    error: &'a mut Option<Error>,
}

impl<'a> EventSink for DecoderSink<'a> {
    fn on_event(&mut self, event: ParseEvent) {
        match event {
            ParseEvent::Header(name, value) => {
                if let Err(e) = self.headers.append_raw(&name, &value) {
                    if self.error.is_none() {
                        *self.error = Some(e);
                    }
                }
            }
            ParseEvent::EndHeaders => {
                let headers = std::mem::take(self.headers);
                let channel = Rc::new(RefCell::new(PartChannel::new()));
                let stream = PartContentStream {
                    channel: Rc::clone(&channel),
                };
                let part = BodyPart::builder().headers(headers).streaming(stream).build();
                self.new_parts.push_back(part);
                *self.channel = Some(channel);
            }
            ParseEvent::Content(bytes) => {
                if let Some(channel) = self.channel.as_ref() {
                    channel.borrow_mut().push(Bytes::from(bytes));
                }
            }
            ParseEvent::EndPart => {
                if let Some(channel) = self.channel.take() {
                    channel.borrow_mut().finish();
                }
            }
            ParseEvent::StartMessage
            | ParseEvent::StartPart
            | ParseEvent::EndMessage
            | ParseEvent::DataRequired { .. } => {}
        }
    }
}

impl<S> Stream for MultipartDecoder<S>
where
    S: Stream<Item = Result<Bytes, Error>> + Unpin,
{
    type Item = Result<BodyPart, Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        loop {
            if let Some(part) = this.new_parts.pop_front() {
                return Poll::Ready(Some(Ok(part)));
            }
            if this.finished {
                return Poll::Ready(None);
            }

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(None) => {
                    if let Some(parser) = this.parser.take() {
                        if let Err(e) = parser.close() {
                            this.finished = true;
                            this.fail_in_flight(e.clone());
                            return Poll::Ready(Some(Err(e)));
                        }
                    }
                    this.finished = true;
                }
                Poll::Ready(Some(Err(e))) => {
                    this.finished = true;
                    this.fail_in_flight(e.clone());
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(Some(Ok(bytes))) => {
                    let mut parser = match this.parser.take() {
                        Some(p) => p,
                        None => {
                            this.finished = true;
                            return Poll::Ready(Some(Err(Error::ParserProtocolError)));
                        }
                    };
                    let mut error = None;
                    let mut sink = DecoderSink {
                        headers: &mut this.current_headers,
                        channel: &mut this.channel,
                        new_parts: &mut this.new_parts,
                        error: &mut error,
                    };
                    let offer_result = parser.offer(&bytes, &mut sink);
                    this.parser = Some(parser);

                    if let Some(e) = error {
                        this.finished = true;
                        this.fail_in_flight(e.clone());
                        return Poll::Ready(Some(Err(e)));
                    }
                    if let Err(e) = offer_result {
                        this.finished = true;
                        this.fail_in_flight(e.clone());
                        return Poll::Ready(Some(Err(e)));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_executor::block_on_stream;
    use futures_util::stream;
    use futures_util::StreamExt;

    use crate::codec::WriterContext;

    fn decode_all(boundary: &str, chunks: Vec<&'static [u8]>) -> Result<Vec<BodyPart>, Error> {
        let upstream = stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from_static(c))));
        let decoder = MultipartDecoder::new(upstream, boundary.as_bytes());
        block_on_stream(decoder).collect()
    }

    fn drain_content(part: BodyPart) -> Result<Vec<u8>, Error> {
        let stream = part.into_content_stream(&WriterContext::new())?;
        let mut out = Vec::new();
        for chunk in block_on_stream(stream) {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }

    #[test]
    fn decodes_two_parts_from_one_chunk() {
        let raw: &[u8] = b"--B\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\nhello\r\n--B\r\nContent-Disposition: form-data; name=\"b\"\r\n\r\nworld\r\n--B--\r\n";
        let parts = decode_all("B", vec![raw]).unwrap();
        assert_eq!(parts.len(), 2);
        let mut parts = parts.into_iter();
        assert_eq!(drain_content(parts.next().unwrap()).unwrap(), b"hello");
        assert_eq!(drain_content(parts.next().unwrap()).unwrap(), b"world");
    }

    #[test]
    fn decodes_across_many_small_chunks() {
        let raw: &[u8] = b"--B\r\n\r\nhello world\r\n--B--\r\n";
        let chunks: Vec<&'static [u8]> = raw.chunks(3).collect();
        let parts = decode_all("B", chunks).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(
            drain_content(parts.into_iter().next().unwrap()).unwrap(),
            b"hello world"
        );
    }

    #[test]
    fn unterminated_stream_surfaces_no_closing_boundary() {
        let raw: &[u8] = b"--B\r\n\r\nhello";
        let err = decode_all("B", vec![raw]).unwrap_err();
        assert!(matches!(err, Error::NoClosingBoundary));
    }

    #[test]
    fn each_part_yields_as_soon_as_its_headers_are_complete() {
        // Headers for part two complete before part one's content stream
        // has been read at all: confirms EndHeaders, not EndPart, is what
        // drives BodyPart delivery.
        let raw: &[u8] = b"--B\r\n\r\nhello\r\n--B\r\n\r\nworld\r\n--B--\r\n";
        let upstream = stream::iter(vec![Ok(Bytes::from_static(raw))]);
        let mut decoder = Box::pin(MultipartDecoder::new(upstream, "B"));

        let first = block_on_stream_next(&mut decoder).unwrap().unwrap();
        let second = block_on_stream_next(&mut decoder).unwrap().unwrap();
        assert!(block_on_stream_next(&mut decoder).is_none());

        assert_eq!(drain_content(first).unwrap(), b"hello");
        assert_eq!(drain_content(second).unwrap(), b"world");
    }

    fn block_on_stream_next<St: Stream + Unpin>(stream: &mut St) -> Option<St::Item> {
        futures_executor::block_on(stream.next())
    }

    #[test]
    fn dropping_decoder_mid_part_cancels_its_content_stream() {
        let raw: &[u8] = b"--B\r\n\r\nhello";
        let upstream = stream::iter(vec![Ok(Bytes::from_static(raw))]);
        let mut decoder = Box::pin(MultipartDecoder::new(upstream, "B"));
        let part = block_on_stream_next(&mut decoder).unwrap().unwrap();
        drop(decoder);

        let err = drain_content(part).unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
