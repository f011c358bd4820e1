//! The content-codec registry and writer context -- the opaque
//! "entity-codec collaborator" that `spec.md` §1 names as an external
//! dependency the codec consumes but does not define. This crate only
//! needs a place to hang typed encode/decode functions off of `BodyPart`;
//! it does not attempt to be a general serialization framework.

use std::any::{Any, TypeId};
use std::collections::HashMap;

use bytes::Bytes;
use mime::Mime;

use crate::error::Error;

trait ErasedDecode {
    fn decode(&self, bytes: &[u8], content_type: Option<&Mime>) -> Result<Box<dyn Any>, Error>;
}

struct DecodeFn<T, F>(F, std::marker::PhantomData<T>);

impl<T, F> ErasedDecode for DecodeFn<T, F>
where
    T: 'static,
    F: Fn(&[u8], Option<&Mime>) -> Result<T, Error>,
{
    fn decode(&self, bytes: &[u8], content_type: Option<&Mime>) -> Result<Box<dyn Any>, Error> {
        (self.0)(bytes, content_type).map(|v| Box::new(v) as Box<dyn Any>)
    }
}

trait ErasedEncode {
    fn encode(&self, value: &dyn Any, content_type: Option<&Mime>) -> Result<Bytes, Error>;
}

struct EncodeFn<T, F>(F, std::marker::PhantomData<T>);

impl<T, F> ErasedEncode for EncodeFn<T, F>
where
    T: 'static,
    F: Fn(&T, Option<&Mime>) -> Result<Bytes, Error>,
{
    fn encode(&self, value: &dyn Any, content_type: Option<&Mime>) -> Result<Bytes, Error> {
        let typed = value
            .downcast_ref::<T>()
            .expect("encoder registered for the wrong TypeId");
        (self.0)(typed, content_type)
    }
}

/// A registry of typed decode/encode functions, keyed by `TypeId`.
#[derive(Default)]
pub struct ContentCodecRegistry {
    decoders: HashMap<TypeId, Box<dyn ErasedDecode>>,
    encoders: HashMap<TypeId, Box<dyn ErasedEncode>>,
}

impl ContentCodecRegistry {
    pub fn new() -> Self {
        ContentCodecRegistry::default()
    }

    pub fn register_decoder<T: 'static>(
        &mut self,
        f: impl Fn(&[u8], Option<&Mime>) -> Result<T, Error> + 'static,
    ) {
        self.decoders.insert(
            TypeId::of::<T>(),
            Box::new(DecodeFn(f, std::marker::PhantomData::<T>)),
        );
    }

    pub fn register_encoder<T: 'static>(
        &mut self,
        f: impl Fn(&T, Option<&Mime>) -> Result<Bytes, Error> + 'static,
    ) {
        self.encoders.insert(
            TypeId::of::<T>(),
            Box::new(EncodeFn(f, std::marker::PhantomData::<T>)),
        );
    }

    pub fn decode<T: 'static>(&self, bytes: &[u8], content_type: Option<&Mime>) -> Result<T, Error> {
        let codec = self
            .decoders
            .get(&TypeId::of::<T>())
            .ok_or(Error::NoContentCodec)?;
        let boxed = codec.decode(bytes, content_type)?;
        Ok(*boxed.downcast::<T>().expect("decoder registered for the wrong TypeId"))
    }

    pub fn encode<T: 'static>(&self, value: &T, content_type: Option<&Mime>) -> Result<Bytes, Error> {
        let codec = self
            .encoders
            .get(&TypeId::of::<T>())
            .ok_or(Error::NoContentCodec)?;
        codec.encode(value, content_type)
    }
}

/// External collaborator for the MIME encoder (component E): the
/// character set used to serialize headers, and the codec registry used
/// to turn an entity-backed [`crate::part::BodyPart`] into bytes.
pub struct WriterContext {
    pub charset: &'static str,
    pub codecs: ContentCodecRegistry,
}

impl WriterContext {
    pub fn new() -> Self {
        WriterContext {
            charset: "ISO-8859-1",
            codecs: ContentCodecRegistry::new(),
        }
    }
}

impl Default for WriterContext {
    fn default() -> Self {
        WriterContext::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_registered_type() {
        let mut registry = ContentCodecRegistry::new();
        registry.register_decoder::<String>(|bytes, _| {
            Ok(String::from_utf8(bytes.to_vec()).unwrap())
        });
        registry.register_encoder::<String>(|value, _| Ok(Bytes::from(value.clone())));

        let encoded = registry.encode(&"hello".to_string(), None).unwrap();
        let decoded: String = registry.decode(&encoded, None).unwrap();
        assert_eq!(decoded, "hello");
    }

    #[test]
    fn missing_codec_is_an_error() {
        let registry = ContentCodecRegistry::new();
        let result: Result<String, Error> = registry.decode(b"x", None);
        assert!(matches!(result, Err(Error::NoContentCodec)));
    }
}
