// Copyright 2016-2020 mime-multipart Developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A streaming MIME multipart codec.
//!
//! [`Region`] and [`Composite`] form a refcounted, zero-copy byte buffer
//! substrate; [`Parser`] and [`Encoder`] turn that substrate into an
//! incremental, suspendable multipart codec; [`MultipartDecoder`] and
//! [`MultipartEncoder`] bridge that codec to `futures_core::Stream`s of
//! chunks and [`BodyPart`]s.

pub mod boundary;
mod boyer_moore;
pub mod bridge;
pub mod codec;
pub mod composite;
pub mod encoder;
pub mod error;
pub mod parser;
pub mod part;
pub mod region;

pub use boundary::{extract_boundary, generate_boundary};
pub use bridge::{MultipartDecoder, MultipartEncoder, MultipartParts};
pub use codec::{ContentCodecRegistry, WriterContext};
pub use composite::{Buffer, Composite};
pub use encoder::Encoder;
pub use error::Error;
pub use parser::{EventSink, ParseEvent, Parser};
pub use part::{BodyPart, BodyPartBuilder, ContentDisposition, PartHeaders};
pub use region::{NullRecycler, Recycler, Region};
