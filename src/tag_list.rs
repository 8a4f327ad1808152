//! The tag=value list grammar underlying DKIM signatures and key records.
//!
//! See RFC 6376, section 3.2.

use crate::{
    parse::{strip_fws, strip_suffix},
    util,
};
use std::collections::HashSet;

/// A single `name=value` pair of a tag list.
///
/// The value is the original text between the surrounding folding
/// whitespace; FWS *inside* the value is retained. Callers that need it
/// stripped do so explicitly.
#[derive(Debug, PartialEq, Eq)]
pub struct TagSpec<'a> {
    pub name: &'a str,
    pub value: &'a str,
}

#[derive(Debug, PartialEq, Eq)]
pub enum TagListParseError {
    DuplicateTag,
    Syntax,
}

/// A parsed tag list, in original order.
#[derive(Debug, PartialEq, Eq)]
pub struct TagList<'a>(Vec<TagSpec<'a>>);

impl<'a> AsRef<[TagSpec<'a>]> for TagList<'a> {
    fn as_ref(&self) -> &[TagSpec<'a>] {
        &self.0
    }
}

impl<'a> TagList<'a> {
    pub fn from_str(val: &'a str) -> Result<Self, TagListParseError> {
        let (rest, tags) = parse_tag_list(val).ok_or(TagListParseError::Syntax)?;

        // trailing garbage is a hard error
        if !rest.is_empty() {
            return Err(TagListParseError::Syntax);
        }

        // duplicate names are a hard error
        let mut seen = HashSet::new();
        if tags.iter().any(|tag| !seen.insert(tag.name)) {
            return Err(TagListParseError::DuplicateTag);
        }

        Ok(TagList(tags))
    }

    pub fn get(&self, name: &str) -> Option<&'a str> {
        self.0.iter().find(|t| t.name == name).map(|t| t.value)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// tag-list = tag-spec *( ";" tag-spec ) [ ";" ]
fn parse_tag_list(val: &str) -> Option<(&str, Vec<TagSpec<'_>>)> {
    let (mut s, t) = parse_tag_spec(val)?;

    let mut tags = vec![t];

    while let Some((snext, t)) = s.strip_prefix(';').and_then(parse_tag_spec) {
        s = snext;
        tags.push(t);
    }

    let s = s.strip_prefix(';').unwrap_or(s);

    Some((s, tags))
}

// tag-spec = [FWS] tag-name [FWS] "=" [FWS] tag-value [FWS]
fn parse_tag_spec(val: &str) -> Option<(&str, TagSpec<'_>)> {
    let s = strip_fws(val).unwrap_or(val);

    let (s, name) = parse_tag_name(s)?;

    let s = strip_fws(s).unwrap_or(s);

    let s = s.strip_prefix('=')?;

    let s = strip_fws(s).unwrap_or(s);

    // tag-value is optional: `t=;` carries an empty value
    let (s, value) = match parse_tag_value(s) {
        Some((s, value)) => {
            let s = strip_fws(s).unwrap_or(s);
            (s, value)
        }
        None => (s, Default::default()),
    };

    Some((s, TagSpec { name, value }))
}

// tag-name = ALPHA *ALNUMPUNC
fn parse_tag_name(value: &str) -> Option<(&str, &str)> {
    let s = value
        .strip_prefix(|c: char| c.is_ascii_alphabetic())?
        .trim_start_matches(|c: char| c.is_ascii_alphanumeric() || c == '_');
    Some((s, strip_suffix(value, s)))
}

// tag-value = tval *( 1*FWS tval ); see also erratum 5070
fn parse_tag_value(value: &str) -> Option<(&str, &str)> {
    fn strip_tval(s: &str) -> Option<&str> {
        s.strip_prefix(is_tval_char)
            .map(|s| s.trim_start_matches(is_tval_char))
    }

    let mut s = strip_tval(value)?;

    while let Some(snext) = strip_fws(s).and_then(strip_tval) {
        s = snext;
    }

    Some((s, strip_suffix(value, s)))
}

pub fn is_tval_char(c: char) -> bool {
    // printable ASCII without ';'
    matches!(c, '!'..=':' | '<'..='~')
}

/// Splits a colon-separated tag value into its elements, with the
/// surrounding FWS of each element removed.
pub fn parse_colon_separated_value(value: &str) -> Vec<&str> {
    value
        .split(':')
        .map(|s| s.trim_matches(|c| matches!(c, ' ' | '\t' | '\r' | '\n')))
        .collect()
}

/// Decodes a Base64 tag value, ignoring internal FWS.
pub fn parse_base64_value(value: &str) -> Result<Vec<u8>, TagListParseError> {
    util::decode_base64(value).map_err(|_| TagListParseError::Syntax)
}
