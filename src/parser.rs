//! Component D: the incremental MIME parser.
//!
//! A suspend/resume state machine: `offer()` appends a chunk to the
//! internal [`Composite`] buffer and drains as many [`ParseEvent`]s as the
//! buffered bytes allow, synchronously, through an [`EventSink`]. When a
//! step needs more bytes than are currently buffered, it emits
//! `ParseEvent::DataRequired` and returns -- the parser's `state` itself
//! *is* the resume point, so the next `offer()` picks up exactly where the
//! last one left off.

use log::{trace, warn};

use crate::boyer_moore::{Searcher, SliceHaystack};
use crate::composite::{Buffer, Composite};
use crate::error::Error;

const CR: u8 = b'\r';
const LF: u8 = b'\n';

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum State {
    StartMessage,
    SkipPreamble,
    StartPart,
    Headers,
    Body,
    EndPart,
    EndMessage,
}

/// An event emitted synchronously during [`Parser::offer`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseEvent {
    StartMessage,
    StartPart,
    /// A header's raw `(name, value)`, as split on the first `:` and with
    /// leading linear whitespace trimmed from the value.
    Header(String, Vec<u8>),
    EndHeaders,
    /// A run of body bytes, guaranteed not to contain any part of the
    /// boundary marker.
    Content(Vec<u8>),
    EndPart,
    EndMessage,
    /// The parser needs more bytes before it can make further progress.
    /// `is_content` distinguishes "waiting mid-body" from any other
    /// structural gap (preamble, headers, delimiter line).
    DataRequired { is_content: bool },
}

/// Receives [`ParseEvent`]s as `offer()` drains the buffered input.
pub trait EventSink {
    fn on_event(&mut self, event: ParseEvent);
}

impl<F: FnMut(ParseEvent)> EventSink for F {
    fn on_event(&mut self, event: ParseEvent) {
        (self)(event)
    }
}

enum StepResult {
    Progress,
    NeedMore,
}

enum HeaderStep {
    Header(String, Vec<u8>),
    Blank,
    /// A header line with no `:` separator: a recoverable protocol oddity,
    /// logged and ignored rather than aborting the whole parse.
    Skipped,
    NeedMore,
}

enum BodyStep {
    Content(Vec<u8>),
    EndOfPart(Vec<u8>),
    NeedMore,
}

/// The incremental multipart parser (component D).
pub struct Parser {
    state: State,
    buffer: Composite,
    searcher: Searcher,
    /// Set once the closing `--boundary--` delimiter (rather than an
    /// ordinary `--boundary`) has been seen.
    done: bool,
    closed: bool,
}

impl Parser {
    /// `boundary` is the bare token, without the leading `--` (as returned
    /// by [`crate::boundary::extract_boundary`]).
    pub fn new(boundary: impl AsRef<[u8]>) -> Parser {
        let mut delimiter = Vec::from(&b"--"[..]);
        delimiter.extend_from_slice(boundary.as_ref());
        Parser {
            state: State::StartMessage,
            buffer: Composite::empty(),
            searcher: Searcher::new(delimiter),
            done: false,
            closed: false,
        }
    }

    /// Offer a chunk of freshly-arrived bytes, draining as many events as
    /// possible. Legal only in `StartMessage` (the first call) or while
    /// suspended waiting for more data (`SkipPreamble`/`Headers`/`Body`).
    pub fn offer(&mut self, bytes: &[u8], sink: &mut impl EventSink) -> Result<(), Error> {
        if self.closed {
            warn!("offer() called on a closed parser");
            return Err(Error::ParserProtocolError);
        }
        trace!("offer: {} bytes in state {:?}", bytes.len(), self.state);
        match self.state {
            State::StartMessage => {
                self.buffer.offer(bytes);
                sink.on_event(ParseEvent::StartMessage);
                self.state = State::SkipPreamble;
            }
            State::SkipPreamble | State::Headers | State::Body => {
                self.buffer.offer(bytes);
            }
            State::StartPart | State::EndPart | State::EndMessage => {
                warn!("offer() called in non-suspended state {:?}", self.state);
                return Err(Error::ParserProtocolError);
            }
        }
        self.drain(sink)
    }

    /// Signal end of input. Legal only in `StartMessage` (an empty stream)
    /// or `EndMessage`; any other state means the stream closed mid-part.
    pub fn close(mut self) -> Result<(), Error> {
        self.closed = true;
        match self.state {
            State::StartMessage | State::EndMessage => Ok(()),
            State::SkipPreamble => {
                warn!("stream closed before the first boundary was found");
                Err(Error::MissingStartBoundary)
            }
            State::Headers => {
                warn!("stream closed mid-headers");
                Err(Error::NoBlankLineAfterHeaders)
            }
            State::Body => {
                warn!("stream closed mid-body with no closing boundary");
                Err(Error::NoClosingBoundary)
            }
            State::StartPart | State::EndPart => Err(Error::ParserProtocolError),
        }
    }

    fn drain(&mut self, sink: &mut impl EventSink) -> Result<(), Error> {
        loop {
            match self.state {
                State::StartMessage => unreachable!("offer() always leaves StartMessage first"),
                State::SkipPreamble => match self.skip_preamble()? {
                    StepResult::Progress => {
                        self.compact()?;
                        self.state = State::StartPart;
                    }
                    StepResult::NeedMore => {
                        sink.on_event(ParseEvent::DataRequired { is_content: false });
                        return Ok(());
                    }
                },
                State::StartPart => {
                    sink.on_event(ParseEvent::StartPart);
                    self.state = State::Headers;
                }
                State::Headers => match self.read_header_line()? {
                    HeaderStep::Header(name, value) => {
                        sink.on_event(ParseEvent::Header(name, value));
                    }
                    HeaderStep::Blank => {
                        sink.on_event(ParseEvent::EndHeaders);
                        self.compact()?;
                        self.state = State::Body;
                    }
                    HeaderStep::Skipped => {}
                    HeaderStep::NeedMore => {
                        sink.on_event(ParseEvent::DataRequired { is_content: false });
                        return Ok(());
                    }
                },
                State::Body => match self.read_body()? {
                    BodyStep::Content(bytes) => {
                        sink.on_event(ParseEvent::Content(bytes));
                    }
                    BodyStep::EndOfPart(trailing) => {
                        if !trailing.is_empty() {
                            sink.on_event(ParseEvent::Content(trailing));
                        }
                        self.state = State::EndPart;
                    }
                    BodyStep::NeedMore => {
                        sink.on_event(ParseEvent::DataRequired { is_content: true });
                        return Ok(());
                    }
                },
                State::EndPart => {
                    sink.on_event(ParseEvent::EndPart);
                    self.compact()?;
                    self.state = if self.done {
                        State::EndMessage
                    } else {
                        State::StartPart
                    };
                }
                State::EndMessage => {
                    sink.on_event(ParseEvent::EndMessage);
                    return Ok(());
                }
            }
        }
    }

    /// Drop everything before `position`: bytes already drained can never
    /// be revisited once a state transition has committed past them.
    fn compact(&mut self) -> Result<(), Error> {
        let pos = self.buffer.position();
        if pos > 0 {
            self.buffer.delete(0, pos)?;
        }
        Ok(())
    }

    /// The unread portion of the buffer, `[position, limit)`, as borrowed
    /// native slices rather than a freshly copied `Vec<u8>` -- scanning and
    /// bounded extraction both work directly against these.
    fn haystack(&self) -> SliceHaystack<'_> {
        SliceHaystack::new(self.buffer.slices_from(self.buffer.position()))
    }

    fn advance(&mut self, n: usize) -> Result<(), Error> {
        let pos = self.buffer.position();
        self.buffer.position_to(pos + n)
    }

    /// §4.4.2: search for the first delimiter anywhere in the window,
    /// consuming it plus any trailing linear whitespace and line
    /// terminator before falling through to `StartPart`.
    fn skip_preamble(&mut self) -> Result<StepResult, Error> {
        let haystack = self.haystack();
        let bnd_start = match self.searcher.find_in(&haystack) {
            Some(i) => i,
            None => return Ok(StepResult::NeedMore),
        };
        let mut cursor = bnd_start + self.searcher.pattern_len();
        while cursor < haystack.len()
            && (haystack.at(cursor) == b' ' || haystack.at(cursor) == b'\t')
        {
            cursor += 1;
        }
        if cursor >= haystack.len() {
            return Ok(StepResult::NeedMore);
        }
        let consumed = if haystack.at(cursor) == CR {
            if cursor + 1 >= haystack.len() {
                return Ok(StepResult::NeedMore);
            }
            cursor + if haystack.at(cursor + 1) == LF { 2 } else { 1 }
        } else if haystack.at(cursor) == LF {
            cursor + 1
        } else {
            return Err(Error::MalformedLine);
        };
        self.advance(consumed)?;
        Ok(StepResult::Progress)
    }

    /// §4.4.5: split a header line on its first `:`, trimming leading
    /// linear whitespace from the value. A zero-length line ends the
    /// header block. A line with no `:` is a recoverable protocol oddity:
    /// it is logged and skipped rather than aborting the parse.
    fn read_header_line(&mut self) -> Result<HeaderStep, Error> {
        let haystack = self.haystack();
        let (content_len, consumed) = match find_line_terminator(&haystack) {
            Some(pair) => pair,
            None => return Ok(HeaderStep::NeedMore),
        };
        self.advance(consumed)?;
        if content_len == 0 {
            return Ok(HeaderStep::Blank);
        }
        let line = haystack.copy_range(0, content_len);
        let colon = match line.iter().position(|&b| b == b':') {
            Some(c) => c,
            None => {
                warn!(
                    "header line with no ':' separator, ignoring: {:?}",
                    latin1_decode(&line)
                );
                return Ok(HeaderStep::Skipped);
            }
        };
        let name = latin1_decode(&line[..colon]).trim().to_string();
        let mut start = colon + 1;
        while start < line.len() && (line[start] == b' ' || line[start] == b'\t') {
            start += 1;
        }
        Ok(HeaderStep::Header(name, line[start..].to_vec()))
    }

    /// §4.4.6: scan for the delimiter, emitting everything before it as
    /// content while reserving enough tail bytes that a delimiter split
    /// across chunk boundaries is never missed.
    fn read_body(&mut self) -> Result<BodyStep, Error> {
        let haystack = self.haystack();
        let reserve = self.searcher.pattern_len() + 1;

        let bnd_start = match self.searcher.find_in(&haystack) {
            None => {
                return if haystack.len() > reserve {
                    let emit = haystack.len() - reserve;
                    let content = haystack.copy_range(0, emit);
                    self.advance(emit)?;
                    Ok(BodyStep::Content(content))
                } else {
                    Ok(BodyStep::NeedMore)
                };
            }
            Some(i) => i,
        };

        let abs = self.buffer.position() + bnd_start;
        let at_line_start = abs == 0 || matches!(self.buffer.get(abs - 1)?, LF | CR);
        if !at_line_start {
            // A coincidental match mid-line: not a real delimiter. Emit
            // through it and keep scanning from just past it.
            let emit = bnd_start + 1;
            let content = haystack.copy_range(0, emit);
            self.advance(emit)?;
            return Ok(BodyStep::Content(content));
        }

        // Strip the line terminator immediately preceding the delimiter
        // from the emitted content -- it belongs to the delimiter line,
        // not the part body.
        let mut content_end = bnd_start;
        if content_end > 0 && haystack.at(content_end - 1) == LF {
            content_end -= 1;
            if content_end > 0 && haystack.at(content_end - 1) == CR {
                content_end -= 1;
            }
        }

        let after_delim = bnd_start + self.searcher.pattern_len();

        // Not enough bytes yet to know what follows the dash-boundary;
        // emit only what is definitely safe and ask for more.
        if haystack.len() < after_delim + 2 {
            return self.emit_prefix_or_need_more(&haystack, content_end);
        }

        if haystack.at(after_delim) == b'-' && haystack.at(after_delim + 1) == b'-' {
            let content = haystack.copy_range(0, content_end);
            self.advance(after_delim + 2)?;
            self.done = true;
            return Ok(BodyStep::EndOfPart(content));
        }

        let mut cursor = after_delim;
        while cursor < haystack.len()
            && (haystack.at(cursor) == b' ' || haystack.at(cursor) == b'\t')
        {
            cursor += 1;
        }
        if cursor >= haystack.len() {
            return self.emit_prefix_or_need_more(&haystack, content_end);
        }

        let terminator_len = match haystack.at(cursor) {
            CR if cursor + 1 < haystack.len() && haystack.at(cursor + 1) == LF => 2,
            CR if cursor + 1 >= haystack.len() => {
                return self.emit_prefix_or_need_more(&haystack, content_end);
            }
            LF => 1,
            _ => {
                // Whatever follows the dash-boundary, it is not padding
                // terminated by a line break: this was never a real
                // delimiter line. Emit through the match and keep scanning.
                let emit = bnd_start + 1;
                let content = haystack.copy_range(0, emit);
                self.advance(emit)?;
                return Ok(BodyStep::Content(content));
            }
        };

        let content = haystack.copy_range(0, content_end);
        self.advance(cursor + terminator_len)?;
        Ok(BodyStep::EndOfPart(content))
    }

    /// Emit the definitely-safe content prefix (everything before the
    /// stripped line terminator) and ask for more, or ask for more with
    /// nothing to emit yet if that prefix is empty.
    fn emit_prefix_or_need_more(
        &mut self,
        haystack: &SliceHaystack<'_>,
        content_end: usize,
    ) -> Result<BodyStep, Error> {
        if content_end > 0 {
            let content = haystack.copy_range(0, content_end);
            self.advance(content_end)?;
            Ok(BodyStep::Content(content))
        } else {
            Ok(BodyStep::NeedMore)
        }
    }
}

/// Find the first line terminator (`CRLF` or bare `LF`) in `haystack`,
/// returning `(content_len, total_consumed)` -- the length of the line
/// excluding its terminator, and the number of bytes to advance past it.
fn find_line_terminator(haystack: &SliceHaystack<'_>) -> Option<(usize, usize)> {
    let mut lf = None;
    for i in 0..haystack.len() {
        if haystack.at(i) == LF {
            lf = Some(i);
            break;
        }
    }
    let lf = lf?;
    if lf > 0 && haystack.at(lf - 1) == CR {
        Some((lf - 1, lf + 1))
    } else {
        Some((lf, lf + 1))
    }
}

fn latin1_decode(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: Vec<ParseEvent>,
    }

    impl EventSink for Recorder {
        fn on_event(&mut self, event: ParseEvent) {
            self.events.push(event);
        }
    }

    impl Recorder {
        fn content(&self) -> Vec<u8> {
            let mut out = Vec::new();
            for e in &self.events {
                if let ParseEvent::Content(bytes) = e {
                    out.extend_from_slice(bytes);
                }
            }
            out
        }

        fn headers(&self) -> Vec<(String, Vec<u8>)> {
            self.events
                .iter()
                .filter_map(|e| match e {
                    ParseEvent::Header(n, v) => Some((n.clone(), v.clone())),
                    _ => None,
                })
                .collect()
        }
    }

    fn parse_whole(boundary: &str, body: &[u8]) -> (Parser, Recorder) {
        let mut parser = Parser::new(boundary.as_bytes());
        let mut sink = Recorder::default();
        parser.offer(body, &mut sink).unwrap();
        (parser, sink)
    }

    #[test]
    fn single_empty_part() {
        let raw = b"--BOUNDARY\r\n\r\n--BOUNDARY--\r\n";
        let (parser, sink) = parse_whole("BOUNDARY", raw);
        parser.close().unwrap();
        assert_eq!(
            sink.events,
            vec![
                ParseEvent::StartMessage,
                ParseEvent::StartPart,
                ParseEvent::EndHeaders,
                ParseEvent::EndPart,
                ParseEvent::EndMessage,
            ]
        );
    }

    #[test]
    fn single_header_ascii_body() {
        let raw = b"--B\r\nContent-Type: text/plain\r\n\r\nhello\r\n--B--\r\n";
        let (parser, sink) = parse_whole("B", raw);
        parser.close().unwrap();
        assert_eq!(
            sink.headers(),
            vec![("Content-Type".to_string(), b"text/plain".to_vec())]
        );
        assert_eq!(sink.content(), b"hello");
        assert!(sink.events.contains(&ParseEvent::EndMessage));
    }

    #[test]
    fn chunked_byte_by_byte_matches_whole_input() {
        let raw = b"--B\r\nContent-Type: text/plain\r\n\r\nhello world\r\n--B--\r\n";
        let mut parser = Parser::new("B");
        let mut sink = Recorder::default();
        for byte in raw {
            parser.offer(&[*byte], &mut sink).unwrap();
        }
        parser.close().unwrap();

        let (whole_parser, whole_sink) = parse_whole("B", raw);
        whole_parser.close().unwrap();

        assert_eq!(sink.content(), whole_sink.content());
        assert_eq!(sink.headers(), whole_sink.headers());
        let structural = |events: &[ParseEvent]| -> Vec<ParseEvent> {
            events
                .iter()
                .filter(|e| !matches!(e, ParseEvent::DataRequired { .. }))
                .cloned()
                .collect()
        };
        assert_eq!(structural(&sink.events), structural(&whole_sink.events));
    }

    #[test]
    fn boundary_lookalike_inside_body_is_not_a_false_positive() {
        let raw = b"--B\r\n\r\nline one\r\n--BX not the boundary\r\nline two\r\n--B--\r\n";
        let (parser, sink) = parse_whole("B", raw);
        parser.close().unwrap();
        assert_eq!(
            sink.content(),
            &b"line one\r\n--BX not the boundary\r\nline two"[..]
        );
    }

    #[test]
    fn two_parts_form_data_with_filename_and_content_type() {
        let raw = b"--B\r\n\
Content-Disposition: form-data; name=\"field\"\r\n\r\n\
value\r\n\
--B\r\n\
Content-Disposition: form-data; name=\"file\"; filename=\"a.bin\"\r\n\
Content-Type: application/octet-stream\r\n\r\n\
\x00\x01\x02\r\n\
--B--\r\n";
        let (parser, sink) = parse_whole("B", raw);
        parser.close().unwrap();

        let start_parts = sink
            .events
            .iter()
            .filter(|e| matches!(e, ParseEvent::StartPart))
            .count();
        assert_eq!(start_parts, 2);
        assert_eq!(
            sink.headers(),
            vec![
                ("Content-Disposition".to_string(), b"form-data; name=\"field\"".to_vec()),
                (
                    "Content-Disposition".to_string(),
                    b"form-data; name=\"file\"; filename=\"a.bin\"".to_vec()
                ),
                ("Content-Type".to_string(), b"application/octet-stream".to_vec()),
            ]
        );
    }

    #[test]
    fn header_line_with_no_colon_is_skipped_not_fatal() {
        let raw = b"--B\r\nnot a header line\r\nContent-Type: text/plain\r\n\r\nhello\r\n--B--\r\n";
        let (parser, sink) = parse_whole("B", raw);
        parser.close().unwrap();
        assert_eq!(
            sink.headers(),
            vec![("Content-Type".to_string(), b"text/plain".to_vec())]
        );
        assert_eq!(sink.content(), b"hello");
    }

    #[test]
    fn close_before_first_boundary_is_missing_start_boundary() {
        let mut parser = Parser::new("B");
        let mut sink = Recorder::default();
        parser.offer(b"not a multipart body at all", &mut sink).unwrap();
        assert!(matches!(parser.close(), Err(Error::MissingStartBoundary)));
    }

    #[test]
    fn close_mid_headers_is_no_blank_line_after_headers() {
        let mut parser = Parser::new("B");
        let mut sink = Recorder::default();
        parser
            .offer(b"--B\r\nContent-Type: text/plain\r\n", &mut sink)
            .unwrap();
        assert!(matches!(
            parser.close(),
            Err(Error::NoBlankLineAfterHeaders)
        ));
    }

    #[test]
    fn close_mid_body_is_no_closing_boundary() {
        let mut parser = Parser::new("B");
        let mut sink = Recorder::default();
        parser
            .offer(b"--B\r\n\r\nsome unterminated body", &mut sink)
            .unwrap();
        assert!(matches!(parser.close(), Err(Error::NoClosingBoundary)));
    }

    #[test]
    fn offer_after_close_is_a_protocol_error() {
        let mut parser = Parser::new("B");
        let mut sink = Recorder::default();
        parser.offer(b"--B\r\n\r\n\r\n--B--\r\n", &mut sink).unwrap();
        assert!(matches!(
            parser.offer(b"more", &mut sink),
            Err(Error::ParserProtocolError)
        ));
    }
}
