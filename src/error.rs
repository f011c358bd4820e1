// Copyright 2016-2020 mime-multipart Developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::error::Error as StdError;
use std::fmt::{self, Display};
use std::string::FromUtf8Error;

use http::header::ToStrError;

/// An error type for the `mime-multipart-codec` crate.
#[derive(Clone)]
pub enum Error {
    // --- buffer substrate (the Region / Composite chain) ---
    /// A `put` or `delete` was attempted with an index outside `[0, limit]`.
    InvalidBoundaryRange,
    /// A relative `get` was attempted at or past `limit`.
    BufferUnderflow,
    /// `reset()` was called with no mark set.
    InvalidMark,
    /// A mutating call landed on a read-only projection.
    ReadOnlyViolation,

    // --- parser protocol ---
    /// `offer()` was called while the parser was not in `StartMessage` or `DataRequired`.
    ParserProtocolError,
    /// `close()` was called while still looking for the first boundary.
    MissingStartBoundary,
    /// `close()` was called mid-body, with no closing boundary seen.
    NoClosingBoundary,
    /// `close()` was called while still reading a part's headers.
    NoBlankLineAfterHeaders,
    /// A boundary delimiter line's trailing whitespace was not followed by
    /// a valid line terminator. (A header line with no `:` separator is a
    /// recoverable oddity, not an error -- it is logged and skipped.)
    MalformedLine,
    /// A header name or value was not valid per `http`'s header grammar.
    InvalidHeaderNameOrValue,

    // --- decoder/encoder bridge ---
    /// A decoder was constructed without a boundary to key off of.
    MissingMultipartContext,
    /// The upstream chunk stream reported an error; forwarded as the
    /// part-stream's terminal error and as the poison value for any
    /// in-flight part-content stream.
    Upstream(String),
    /// The in-flight part's content stream was cancelled by its subscriber.
    Cancelled,

    // --- part / header value objects ---
    /// `BodyPart::as_typed` was called on a part that was never buffered.
    NotBuffered,
    /// No content codec was registered for the requested type.
    NoContentCodec,
    /// The content-type header value could not be parsed as a MIME type.
    HeaderValueNotMime,
    /// The content-type's top-level type was not `multipart`.
    NotMultipart,
    /// The content-type had no `boundary` parameter.
    BoundaryNotSpecified,

    /// A `HeaderValue` could not be converted to a `str` (non-ASCII bytes).
    ToStr(ToStrError),
    /// An error occurred while decoding bytes as UTF-8.
    Utf8(FromUtf8Error),
}

impl From<ToStrError> for Error {
    fn from(err: ToStrError) -> Error {
        Error::ToStr(err)
    }
}

impl From<FromUtf8Error> for Error {
    fn from(err: FromUtf8Error) -> Error {
        Error::Utf8(err)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::InvalidBoundaryRange => "InvalidBoundaryRange".fmt(f),
            Error::BufferUnderflow => "BufferUnderflow".fmt(f),
            Error::InvalidMark => "InvalidMark".fmt(f),
            Error::ReadOnlyViolation => "ReadOnlyViolation".fmt(f),
            Error::ParserProtocolError => "ParserProtocolError".fmt(f),
            Error::MissingStartBoundary => "MissingStartBoundary".fmt(f),
            Error::NoClosingBoundary => "NoClosingBoundary".fmt(f),
            Error::NoBlankLineAfterHeaders => "NoBlankLineAfterHeaders".fmt(f),
            Error::MalformedLine => "MalformedLine".fmt(f),
            Error::InvalidHeaderNameOrValue => "InvalidHeaderNameOrValue".fmt(f),
            Error::MissingMultipartContext => "MissingMultipartContext".fmt(f),
            Error::Upstream(ref msg) => format!("Upstream: {}", msg).fmt(f),
            Error::Cancelled => "Cancelled".fmt(f),
            Error::NotBuffered => "NotBuffered".fmt(f),
            Error::NoContentCodec => "NoContentCodec".fmt(f),
            Error::HeaderValueNotMime => "HeaderValueNotMime".fmt(f),
            Error::NotMultipart => "NotMultipart".fmt(f),
            Error::BoundaryNotSpecified => "BoundaryNotSpecified".fmt(f),
            Error::ToStr(ref e) => format!("ToStr: {}", e).fmt(f),
            Error::Utf8(ref e) => format!("Utf8: {}", e).fmt(f),
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)?;
        if let Some(source) = self.source() {
            write!(f, ": {:?}", source)?; // recurse
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match *self {
            Error::ToStr(ref e) => Some(e),
            Error::Utf8(ref e) => Some(e),
            _ => None,
        }
    }

    fn description(&self) -> &str {
        match *self {
            Error::InvalidBoundaryRange => "A put or delete index fell outside [0, limit].",
            Error::BufferUnderflow => "A relative get was attempted at or past limit.",
            Error::InvalidMark => "reset() was called with no mark set.",
            Error::ReadOnlyViolation => "A mutating call was made on a read-only projection.",
            Error::ParserProtocolError => "offer() was called in an illegal parser state.",
            Error::MissingStartBoundary => {
                "The stream closed before the first boundary was found."
            }
            Error::NoClosingBoundary => "The stream closed mid-body with no closing boundary.",
            Error::NoBlankLineAfterHeaders => {
                "The stream closed before a blank line ended the part headers."
            }
            Error::MalformedLine => "A boundary delimiter line's padding was malformed.",
            Error::InvalidHeaderNameOrValue => "A header name or value failed to parse.",
            Error::MissingMultipartContext => "No boundary was supplied to construct the decoder.",
            Error::Upstream(_) => "The upstream chunk stream reported an error.",
            Error::Cancelled => "The part's content stream was cancelled by its subscriber.",
            Error::NotBuffered => "as_typed() was called on a part that was never buffered.",
            Error::NoContentCodec => "No content codec was registered for the requested type.",
            Error::HeaderValueNotMime => "HeaderValue could not be parsed to Mime.",
            Error::NotMultipart => "The Content-Type top-level type was not multipart.",
            Error::BoundaryNotSpecified => "The Content-Type had no boundary parameter.",
            Error::ToStr(_) => "A ToStr error occurred.",
            Error::Utf8(_) => "A UTF-8 error occurred.",
        }
    }
}
