//! Representation of email header data.
//!
//! See RFC 5322, section 2.2.

use bstr::ByteSlice;
use std::{
    fmt::{self, Debug, Formatter},
    hash::{Hash, Hasher},
};

pub type HeaderField = (FieldName, FieldBody);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HeaderFieldError;

/// A collection of header fields that can be used for DKIM processing.
///
/// May be empty: a message that opens with a blank line has no header, yet
/// can still be fed through the engine.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct HeaderFields(Box<[HeaderField]>);

impl HeaderFields {
    pub fn new(value: impl Into<Box<[HeaderField]>>) -> Self {
        Self(value.into())
    }

    pub fn from_vec(value: Vec<(String, Vec<u8>)>) -> Result<Self, HeaderFieldError> {
        let value: Vec<_> = value
            .into_iter()
            .map(|(name, value)| {
                let name = FieldName::new(name)?;
                let body = FieldBody::new(value)?;
                Ok((name, body))
            })
            .collect::<Result<_, _>>()?;
        Ok(Self::new(value))
    }
}

impl AsRef<[HeaderField]> for HeaderFields {
    fn as_ref(&self) -> &[HeaderField] {
        &self.0
    }
}

/// Splits a header block into header fields.
///
/// The block must use CRLF line endings and not include the blank separator
/// line. The split is lenient: lines that do not form a well-formed header
/// field (no colon, stray control bytes, continuation line at the start)
/// are dropped rather than failing the whole block, since an engine fed an
/// arbitrary message must make progress on whatever fields it can use.
pub fn split_header_block(block: &[u8]) -> Vec<HeaderField> {
    let mut fields = vec![];

    let mut current: Option<(FieldName, Vec<u8>)> = None;

    for line in block.split_str("\r\n") {
        if line.is_empty() {
            continue;
        }

        if line.starts_with(b" ") || line.starts_with(b"\t") {
            // continuation of the current field, if any
            if let Some((_, value)) = &mut current {
                value.extend(b"\r\n");
                value.extend(line);
            }
            continue;
        }

        if let Some((name, value)) = current.take() {
            if let Ok(body) = FieldBody::new(value) {
                fields.push((name, body));
            }
        }

        current = split_field_line(line);
    }

    if let Some((name, value)) = current {
        if let Ok(body) = FieldBody::new(value) {
            fields.push((name, body));
        }
    }

    fields
}

fn split_field_line(line: &[u8]) -> Option<(FieldName, Vec<u8>)> {
    let i = line.find_byte(b':')?;

    let name = std::str::from_utf8(&line[..i]).ok()?;
    let name = FieldName::new(name).ok()?;
    let value = line[(i + 1)..].to_vec();

    Some((name, value))
}

/// A header field name.
///
/// Composed of printable ASCII except colon; note that `;` is not practical
/// in DKIM.
#[derive(Clone, Eq)]
pub struct FieldName(Box<str>);

impl FieldName {
    pub fn new(value: impl Into<Box<str>>) -> Result<Self, HeaderFieldError> {
        let value = value.into();

        if value.is_empty() || !value.chars().all(|c| c.is_ascii_graphic() && c != ':') {
            return Err(HeaderFieldError);
        }

        Ok(Self(value))
    }

    pub fn to_lowercase(&self) -> Self {
        Self(self.0.to_ascii_lowercase().into())
    }
}

impl AsRef<str> for FieldName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Debug for FieldName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq for FieldName {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl PartialEq<&str> for FieldName {
    fn eq(&self, other: &&str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }
}

impl Hash for FieldName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_ascii_lowercase().hash(state);
    }
}

/// A header field body, colloquially known as a 'header value'.
///
/// The body is the original text after the colon, including any leading
/// whitespace and internal CRLF line folds, but without the terminating
/// CRLF.
#[derive(Clone, Eq, Hash, PartialEq)]
pub struct FieldBody(Box<[u8]>);

impl FieldBody {
    pub fn new(value: impl Into<Box<[u8]>>) -> Result<Self, HeaderFieldError> {
        fn is_well_formed(line: &[u8], continuation: bool) -> bool {
            // Continuation lines must be 'folded', ie start with WSP. Stray
            // control bytes, including lone CR and LF, are rejected; all
            // other bytes (Latin-1, malformed UTF-8) are allowed.
            let folded = matches!(line.first(), Some(b' ') | Some(b'\t'));
            (!continuation || folded)
                && !line.iter().any(|b| b.is_ascii_control() && *b != b'\t')
        }

        let value = value.into();

        let mut lines = value.split_str("\r\n");

        let first_ok = matches!(lines.next(), Some(line) if is_well_formed(line, false));

        if !first_ok || !lines.all(|line| is_well_formed(line, true)) {
            return Err(HeaderFieldError);
        }

        Ok(Self(value))
    }
}

impl AsRef<[u8]> for FieldBody {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Debug for FieldBody {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.as_bstr().fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_name_ok() {
        assert!(FieldName::new("abc").is_ok());

        assert!(FieldName::new("").is_err());
        assert!(FieldName::new("abc ").is_err());
        assert!(FieldName::new("a:c").is_err());
    }

    #[test]
    fn field_body_ok() {
        assert!(FieldBody::new(*b"").is_ok());
        assert!(FieldBody::new(*b" ab\r\n\tcd ").is_ok());

        assert!(FieldBody::new(*b" \na").is_err());
        assert!(FieldBody::new(*b" \r\na").is_err());
    }

    #[test]
    fn split_header_block_ok() {
        let block = b"From: me\r\nTo: you,\r\n\tand you\r\nSubject: hi\r\n";

        let fields = split_header_block(block);

        assert_eq!(fields.len(), 3);
        assert_eq!(fields[0].0, "from");
        assert_eq!(fields[1].1.as_ref(), b" you,\r\n\tand you");
    }

    #[test]
    fn split_header_block_lenient() {
        let block = b"\tstray continuation\r\nnot a field\r\nFrom: me\r\n";

        let fields = split_header_block(block);

        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].0, "From");
    }
}
