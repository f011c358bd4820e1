//! Components G (part/header value objects) and the `BodyPart` entity
//! from the data model (§3.1).

use std::cell::OnceCell;
use std::pin::Pin;
use std::str::FromStr;

use bytes::Bytes;
use futures_core::Stream;
use http::header::{HeaderName, HeaderValue, CONTENT_DISPOSITION, CONTENT_TYPE};
use mime::Mime;

use crate::boundary::parse_type_and_params;
use crate::codec::{ContentCodecRegistry, WriterContext};
use crate::error::Error;

/// A case-insensitive, insertion-ordered multi-map of part headers, with
/// memoized `Content-Type` and `Content-Disposition` accessors.
#[derive(Clone, Default)]
pub struct PartHeaders {
    map: http::HeaderMap,
    content_disposition: OnceCell<Option<ContentDisposition>>,
    content_type: OnceCell<Option<Mime>>,
}

impl PartHeaders {
    pub fn new() -> Self {
        PartHeaders {
            map: http::HeaderMap::new(),
            content_disposition: OnceCell::new(),
            content_type: OnceCell::new(),
        }
    }

    pub fn append(&mut self, name: HeaderName, value: HeaderValue) {
        self.map.append(name, value);
    }

    /// Append a header parsed from raw `(name, value)` bytes, as read off
    /// the wire (component D's header-line reader hands these in).
    pub fn append_raw(&mut self, name: &str, value: &[u8]) -> Result<(), Error> {
        let name =
            HeaderName::from_str(name).map_err(|_| Error::InvalidHeaderNameOrValue)?;
        let value =
            HeaderValue::from_bytes(value).map_err(|_| Error::InvalidHeaderNameOrValue)?;
        self.map.append(name, value);
        Ok(())
    }

    pub fn first(&self, name: &str) -> Option<&HeaderValue> {
        self.map.get(name)
    }

    /// The underlying multi-map, in insertion order.
    pub fn map(&self) -> &http::HeaderMap {
        &self.map
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Memoized `Content-Disposition`, parsed on first access and cached
    /// for the rest of this `PartHeaders`' life. Headers are expected to be
    /// fully populated before the first read; appending more afterward
    /// does not invalidate the cache.
    pub fn content_disposition(&self) -> Option<ContentDisposition> {
        self.content_disposition
            .get_or_init(|| {
                self.first(CONTENT_DISPOSITION.as_str())
                    .and_then(|v| v.to_str().ok())
                    .map(ContentDisposition::parse)
            })
            .clone()
    }

    /// Memoized `Content-Type`, inferred per RFC 7578 §4.4 when absent: a
    /// part whose `Content-Disposition` carries a `filename` parameter
    /// defaults to `application/octet-stream`, otherwise `text/plain`.
    pub fn content_type(&self) -> Option<Mime> {
        self.content_type
            .get_or_init(|| {
                if let Some(v) = self.first(CONTENT_TYPE.as_str()) {
                    return v.to_str().ok().and_then(|s| Mime::from_str(s).ok());
                }
                let has_filename = self
                    .content_disposition()
                    .map(|cd| cd.filename().is_some())
                    .unwrap_or(false);
                let default = if has_filename {
                    mime::APPLICATION_OCTET_STREAM
                } else {
                    mime::TEXT_PLAIN
                };
                Some(default)
            })
            .clone()
    }
}

/// A parsed `Content-Disposition` value (component H).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentDisposition {
    pub disposition_type: String,
    pub parameters: Vec<(String, String)>,
}

impl ContentDisposition {
    pub fn parse(value: &str) -> ContentDisposition {
        let (disposition_type, parameters) = parse_type_and_params(value);
        ContentDisposition {
            disposition_type,
            parameters,
        }
    }

    fn param(&self, key: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// The form control name (`name=` parameter).
    pub fn name(&self) -> Option<&str> {
        self.param("name")
    }

    /// The raw, possibly-ASCII-only `filename=` parameter.
    pub fn filename(&self) -> Option<&str> {
        self.param("filename")
    }

    /// The RFC 5987 extended `filename*=UTF-8''...` parameter, percent-decoded.
    pub fn filename_star(&self) -> Option<String> {
        let raw = self.param("filename*")?;
        let encoded = raw.strip_prefix("UTF-8''").unwrap_or(raw);
        Some(percent_decode(encoded))
    }

    /// Prefers the RFC 5987 extended filename when present, falling back
    /// to the plain `filename=` parameter.
    pub fn filename_decoded(&self) -> Option<String> {
        self.filename_star().or_else(|| self.filename().map(str::to_string))
    }
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(byte) = u8::from_str_radix(
                std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or(""),
                16,
            ) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

type BoxedStream = Pin<Box<dyn Stream<Item = Result<Bytes, Error>>>>;
type EntityEncodeFn = Box<dyn Fn(&WriterContext) -> Result<Bytes, Error>>;

enum PartContent {
    Empty,
    Buffered(Bytes),
    Streaming(BoxedStream),
    Entity(EntityEncodeFn),
}

/// A single MIME body part: headers plus content (component data model §3.1).
pub struct BodyPart {
    pub headers: PartHeaders,
    content: PartContent,
}

impl BodyPart {
    pub fn builder() -> BodyPartBuilder {
        BodyPartBuilder::new()
    }

    /// Whether this part's bytes have already been accumulated into memory.
    pub fn is_buffered(&self) -> bool {
        matches!(self.content, PartContent::Empty | PartContent::Buffered(_))
    }

    /// Resolve a buffered part's bytes into `T` using a content codec
    /// registry. Fails with [`Error::NotBuffered`] for streaming or
    /// entity-backed parts.
    pub fn as_typed<T: 'static>(&self, registry: &ContentCodecRegistry) -> Result<T, Error> {
        let bytes: &[u8] = match &self.content {
            PartContent::Empty => &[],
            PartContent::Buffered(b) => b.as_ref(),
            PartContent::Streaming(_) | PartContent::Entity(_) => {
                return Err(Error::NotBuffered)
            }
        };
        registry.decode(bytes, self.headers.content_type().as_ref())
    }

    /// Buffered bytes, if this part was built or decoded as buffered.
    pub fn buffered_bytes(&self) -> Option<&Bytes> {
        match &self.content {
            PartContent::Buffered(b) => Some(b),
            _ => None,
        }
    }

    /// Consume the part into a stream of content chunks, resolving
    /// entity-backed parts through `ctx` (component E's writer context).
    pub fn into_content_stream(self, ctx: &WriterContext) -> Result<BoxedStream, Error> {
        use futures_util::stream;
        match self.content {
            PartContent::Empty => Ok(Box::pin(stream::empty())),
            PartContent::Buffered(b) => Ok(Box::pin(stream::once(async move { Ok(b) }))),
            PartContent::Streaming(s) => Ok(s),
            PartContent::Entity(encode) => {
                let bytes = encode(ctx)?;
                Ok(Box::pin(stream::once(async move { Ok(bytes) })))
            }
        }
    }
}

/// Builds a [`BodyPart`] (component G): entity-backed, publisher-backed,
/// or buffered-inbound, per `spec.md` §4.7.
pub struct BodyPartBuilder {
    headers: PartHeaders,
    content: PartContent,
}

impl BodyPartBuilder {
    pub fn new() -> Self {
        BodyPartBuilder {
            headers: PartHeaders::new(),
            content: PartContent::Empty,
        }
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Replace the whole header set, e.g. when reassembling a part the
    /// decoder already accumulated headers for.
    pub fn headers(mut self, headers: PartHeaders) -> Self {
        self.headers = headers;
        self
    }

    pub fn content_disposition(self, disposition: &str) -> Result<Self, Error> {
        let value =
            HeaderValue::from_str(disposition).map_err(|_| Error::InvalidHeaderNameOrValue)?;
        Ok(self.header(CONTENT_DISPOSITION, value))
    }

    /// Buffered-inbound content: bytes already captured in memory.
    pub fn buffered(mut self, bytes: impl Into<Bytes>) -> Self {
        self.content = PartContent::Buffered(bytes.into());
        self
    }

    /// Publisher-backed content: a reactive stream of chunks.
    pub fn streaming(mut self, stream: impl Stream<Item = Result<Bytes, Error>> + 'static) -> Self {
        self.content = PartContent::Streaming(Box::pin(stream));
        self
    }

    /// Entity-backed content: a typed value plus the function a
    /// [`WriterContext`] uses to turn it into bytes at encode time.
    pub fn entity<T: 'static>(
        mut self,
        value: T,
        encode: impl Fn(&T, &WriterContext) -> Result<Bytes, Error> + 'static,
    ) -> Self {
        self.content = PartContent::Entity(Box::new(move |ctx| encode(&value, ctx)));
        self
    }

    pub fn build(self) -> BodyPart {
        BodyPart {
            headers: self.headers,
            content: self.content,
        }
    }
}

impl Default for BodyPartBuilder {
    fn default() -> Self {
        BodyPartBuilder::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_defaults_to_octet_stream_with_filename() {
        let mut headers = PartHeaders::new();
        headers
            .append_raw("Content-Disposition", b"form-data; name=\"f\"; filename=\"a.bin\"")
            .unwrap();
        assert_eq!(
            headers.content_type().unwrap(),
            mime::APPLICATION_OCTET_STREAM
        );
    }

    #[test]
    fn content_type_defaults_to_text_plain_without_filename() {
        let mut headers = PartHeaders::new();
        headers
            .append_raw("Content-Disposition", b"form-data; name=\"f\"")
            .unwrap();
        assert_eq!(headers.content_type().unwrap(), mime::TEXT_PLAIN);
    }

    #[test]
    fn explicit_content_type_wins() {
        let mut headers = PartHeaders::new();
        headers.append_raw("Content-Type", b"image/gif").unwrap();
        assert_eq!(headers.content_type().unwrap(), mime::IMAGE_GIF);
    }

    #[test]
    fn disposition_name_and_filename() {
        let cd = ContentDisposition::parse(r#"form-data; name="b"; filename="f.bin""#);
        assert_eq!(cd.name(), Some("b"));
        assert_eq!(cd.filename(), Some("f.bin"));
    }

    #[test]
    fn filename_star_prefers_percent_decoded_extended_form() {
        let cd = ContentDisposition::parse(
            "attachment; filename=\"fallback.txt\"; filename*=UTF-8''caf%C3%A9.txt",
        );
        assert_eq!(cd.filename_decoded().as_deref(), Some("café.txt"));
    }

    #[test]
    fn buffered_part_is_buffered_streaming_is_not() {
        let buffered = BodyPart::builder().buffered(Bytes::from_static(b"x")).build();
        assert!(buffered.is_buffered());

        let streaming = BodyPart::builder()
            .streaming(futures_util::stream::once(async { Ok(Bytes::from_static(b"x")) }))
            .build();
        assert!(!streaming.is_buffered());
    }

    #[test]
    fn as_typed_fails_not_buffered_for_streaming_part() {
        let part = BodyPart::builder()
            .streaming(futures_util::stream::once(async { Ok(Bytes::from_static(b"x")) }))
            .build();
        let registry = ContentCodecRegistry::new();
        let result: Result<Vec<u8>, Error> = part.as_typed(&registry);
        assert!(matches!(result, Err(Error::NotBuffered)));
    }
}
