//! Small shared utilities.

use base64ct::{Base64, Encoding};
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
};

/// A trait for entities that can be represented as a canonical string.
pub trait CanonicalStr {
    /// Returns the canonical representation as a static string slice.
    fn canonical_str(&self) -> &'static str;
}

#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct Base64Error;

impl Display for Base64Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "failed to decode Base64 data")
    }
}

impl Error for Base64Error {}

/// Encodes binary data as a padded Base64 string.
pub fn encode_base64<T: AsRef<[u8]>>(input: T) -> String {
    Base64::encode_string(input.as_ref())
}

/// Decodes a Base64 string. Folding whitespace is stripped before decoding,
/// as tag values in header fields may be wrapped at any point.
pub fn decode_base64(input: &str) -> Result<Vec<u8>, Base64Error> {
    let s: String = input
        .chars()
        .filter(|c| !matches!(c, ' ' | '\t' | '\r' | '\n'))
        .collect();
    Base64::decode_vec(&s).map_err(|_| Base64Error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_round_trip() {
        assert_eq!(encode_base64(b"abc"), "YWJj");
        assert_eq!(decode_base64("YWJj"), Ok(b"abc".to_vec()));
        assert_eq!(decode_base64(" YW \r\n\tJj "), Ok(b"abc".to_vec()));

        assert_eq!(decode_base64("Y(Jj"), Err(Base64Error));
    }
}
