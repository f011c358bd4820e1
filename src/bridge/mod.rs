//! Component F: the decoder/encoder bridge.
//!
//! Couples the incremental [`crate::parser::Parser`] and [`crate::encoder::Encoder`]
//! to reactive chunk streams. Both directions are realized directly as
//! `futures_core::Stream`: polling *is* the demand signal (§5), so no
//! separate `request(n)` vocabulary is reintroduced here.

mod decoder;
mod encoder;
mod parts;

pub use decoder::MultipartDecoder;
pub use encoder::MultipartEncoder;
pub use parts::MultipartParts;
