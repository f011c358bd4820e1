//! Component H: boundary and parameter parsing.
//!
//! Pulls the `boundary=...` parameter off an outer `Content-Type`, parses
//! the `type; key="value"; key=value` grammar shared by `Content-Type` and
//! `Content-Disposition`, and generates fresh boundaries for the encoder.

use std::str::FromStr;

use http::header::HeaderValue;
use mime::Mime;
use textnonce::TextNonce;

use crate::error::Error;

/// Extract the `boundary` parameter from a `Content-Type` header value,
/// verifying the top-level type is `multipart`. Returns the bare boundary
/// token (without the leading `--`); callers that need the dash-boundary
/// prefix it themselves (see [`crate::parser::Parser::new`]).
pub fn extract_boundary(content_type: &HeaderValue) -> Result<Vec<u8>, Error> {
    let value = content_type.to_str()?;
    let mime = Mime::from_str(value).map_err(|_| Error::HeaderValueNotMime)?;
    if mime.type_() != mime::MULTIPART {
        return Err(Error::NotMultipart);
    }
    match mime.get_param(mime::BOUNDARY) {
        Some(b) => Ok(b.as_str().as_bytes().to_vec()),
        None => Err(Error::BoundaryNotSpecified),
    }
}

/// Parse `key=value; key="quoted value"` parameters following a leading
/// `type` token (the grammar shared by `Content-Type` and
/// `Content-Disposition`). Returns `(type, params)` with params in the
/// order they appeared.
pub fn parse_type_and_params(value: &str) -> (String, Vec<(String, String)>) {
    let mut parts = value.split(';');
    let type_ = parts.next().unwrap_or("").trim().to_string();
    let mut params = Vec::new();
    for part in parts {
        if let Some((name, raw)) = part.split_once('=') {
            let name = name.trim().to_string();
            let raw = raw.trim();
            let val = if raw.starts_with('"') && raw.ends_with('"') && raw.len() >= 2 {
                unescape_quoted(&raw[1..raw.len() - 1])
            } else {
                raw.to_string()
            };
            params.push((name, val));
        }
    }
    (type_, params)
}

fn unescape_quoted(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Render `(name, value)` parameters back into `; name="value"` form,
/// quoting every value (matching the encoder's conservative wire output).
pub fn render_params(params: &[(&str, &str)]) -> String {
    let mut out = String::new();
    for (name, value) in params {
        out.push_str("; ");
        out.push_str(name);
        out.push_str("=\"");
        for c in value.chars() {
            if c == '"' || c == '\\' {
                out.push('\\');
            }
            out.push(c);
        }
        out.push('"');
    }
    out
}

/// Generate a fresh, sufficiently-entropic boundary: at least 32
/// characters from the RFC 2046 boundary-safe alphabet. Replaces the
/// fixed placeholder boundary the base crate's lineage used to emit.
pub fn generate_boundary() -> Vec<u8> {
    TextNonce::sized(48)
        .expect("48 is a valid TextNonce size")
        .into_string()
        .into_bytes()
        .into_iter()
        .map(|ch| match ch {
            b'=' => b'-',
            b'/' => b'.',
            b'+' => b'_',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_boundary_from_content_type() {
        let ct = HeaderValue::from_static("multipart/form-data; boundary=XYZ");
        assert_eq!(extract_boundary(&ct).unwrap(), b"XYZ");
    }

    #[test]
    fn rejects_non_multipart() {
        let ct = HeaderValue::from_static("text/plain; boundary=XYZ");
        assert!(matches!(extract_boundary(&ct), Err(Error::NotMultipart)));
    }

    #[test]
    fn rejects_missing_boundary_param() {
        let ct = HeaderValue::from_static("multipart/form-data");
        assert!(matches!(
            extract_boundary(&ct),
            Err(Error::BoundaryNotSpecified)
        ));
    }

    #[test]
    fn parses_quoted_and_bare_params() {
        let (ty, params) =
            parse_type_and_params(r#"form-data; name="f"; filename="a b.txt""#);
        assert_eq!(ty, "form-data");
        assert_eq!(
            params,
            vec![
                ("name".to_string(), "f".to_string()),
                ("filename".to_string(), "a b.txt".to_string()),
            ]
        );
    }

    #[test]
    fn generated_boundary_is_long_enough_and_stable_alphabet() {
        let b = generate_boundary();
        assert!(b.len() >= 32);
        assert!(b
            .iter()
            .all(|&c| c.is_ascii_alphanumeric() || c == b'-' || c == b'.' || c == b'_'));
    }
}
