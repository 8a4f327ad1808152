//! DKIM signature representation and parsing.

use crate::{
    header::FieldName,
    quoted_printable,
    tag_list::{parse_base64_value, parse_colon_separated_value, TagList, TagSpec},
    util::CanonicalStr,
};
use std::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};

pub const DKIM_SIGNATURE_NAME: &str = "DKIM-Signature";

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SignatureAlgorithm {
    RsaSha1,
    RsaSha256,
}

impl SignatureAlgorithm {
    pub fn hash_algorithm(self) -> crate::crypto::HashAlgorithm {
        match self {
            Self::RsaSha1 => crate::crypto::HashAlgorithm::Sha1,
            Self::RsaSha256 => crate::crypto::HashAlgorithm::Sha256,
        }
    }
}

impl CanonicalStr for SignatureAlgorithm {
    fn canonical_str(&self) -> &'static str {
        match self {
            Self::RsaSha1 => "rsa-sha1",
            Self::RsaSha256 => "rsa-sha256",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum CanonicalizationAlgorithm {
    #[default]
    Simple,
    Relaxed,
}

impl CanonicalStr for CanonicalizationAlgorithm {
    fn canonical_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Relaxed => "relaxed",
        }
    }
}

/// The header/body canonicalization pair of the *c=* tag.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct Canonicalization {
    pub header: CanonicalizationAlgorithm,
    pub body: CanonicalizationAlgorithm,
}

impl From<(CanonicalizationAlgorithm, CanonicalizationAlgorithm)> for Canonicalization {
    fn from((header, body): (CanonicalizationAlgorithm, CanonicalizationAlgorithm)) -> Self {
        Self { header, body }
    }
}

impl CanonicalStr for Canonicalization {
    fn canonical_str(&self) -> &'static str {
        use CanonicalizationAlgorithm::*;

        match (self.header, self.body) {
            (Simple, Simple) => "simple/simple",
            (Simple, Relaxed) => "simple/relaxed",
            (Relaxed, Simple) => "relaxed/simple",
            (Relaxed, Relaxed) => "relaxed/relaxed",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ParseDomainError;

impl Display for ParseDomainError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "invalid domain name")
    }
}

impl std::error::Error for ParseDomainError {}

/// A domain name as used in the *d=* tag, held in lowercase A-label form.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DomainName {
    name: String,
}

impl DomainName {
    pub fn new(s: &str) -> Result<Self, ParseDomainError> {
        if s.ends_with('.') {
            return Err(ParseDomainError);
        }

        let s = idna::domain_to_ascii(s).map_err(|_| ParseDomainError)?;

        if !is_valid_dns_name(&s) {
            return Err(ParseDomainError);
        }

        Ok(Self { name: s })
    }

    pub fn eq_or_subdomain_of(&self, other: &DomainName) -> bool {
        let name = &self.name;
        let other = &other.name;

        if name.eq_ignore_ascii_case(other) {
            return true;
        }

        name.len() > other.len() && {
            let len = name.len() - other.len();
            matches!(name.get(len..), Some(s) if s.eq_ignore_ascii_case(other))
                && matches!(name.get(..len), Some(s) if s.ends_with('.'))
        }
    }
}

impl Display for DomainName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.name.fmt(f)
    }
}

impl AsRef<str> for DomainName {
    fn as_ref(&self) -> &str {
        &self.name
    }
}

fn is_valid_dns_name(s: &str) -> bool {
    const MAX_DOMAIN_LENGTH: usize = 253;

    let s = s.strip_suffix('.').unwrap_or(s);

    if s.is_empty() || s.len() > MAX_DOMAIN_LENGTH {
        return false;
    }

    let labels: Vec<_> = s.split('.').collect();

    // at least two labels, and a TLD that is not all-numeric
    match labels.as_slice() {
        [] | [_] => false,
        [rest @ .., tld] => {
            rest.iter().all(|l| is_label(l))
                && is_label(tld)
                && !tld.chars().all(|c| c.is_ascii_digit())
        }
    }
}

fn is_label(s: &str) -> bool {
    let alnum_at =
        |i: usize| s.as_bytes().get(i).map_or(false, |b| b.is_ascii_alphanumeric());

    matches!(s.len(), 1..=63)
        && alnum_at(0)
        && alnum_at(s.len() - 1)
        && s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
}

/// A selector as used in the *s=* tag.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Selector {
    name: String,
}

impl Selector {
    pub fn new(s: &str) -> Result<Self, ParseDomainError> {
        if s.is_empty() || !s.split('.').all(is_label) {
            return Err(ParseDomainError);
        }

        Ok(Self { name: s.into() })
    }
}

impl Display for Selector {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.name.fmt(f)
    }
}

impl AsRef<str> for Selector {
    fn as_ref(&self) -> &str {
        &self.name
    }
}

/// The agent or user identity of the *i=* tag: an optional local part and a
/// domain.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Identity {
    pub local_part: Option<String>,
    pub domain: DomainName,
}

impl Identity {
    pub fn new(s: &str) -> Result<Self, ParseDomainError> {
        let (local_part, domain) = s.rsplit_once('@').ok_or(ParseDomainError)?;

        let local_part = if local_part.is_empty() {
            None
        } else {
            if local_part.len() > 64
                || local_part
                    .chars()
                    .any(|c| c.is_ascii_control() || c == ' ')
            {
                return Err(ParseDomainError);
            }
            Some(local_part.into())
        };

        DomainName::new(domain).map(|domain| Self { local_part, domain })
    }

    pub fn from_domain(domain: DomainName) -> Self {
        Self {
            local_part: None,
            domain,
        }
    }
}

impl Display for Identity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if let Some(l) = &self.local_part {
            l.fmt(f)?;
        }
        write!(f, "@{}", self.domain)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DkimSignatureError {
    InvalidTagList,
    Utf8Encoding,
    MissingVersionTag,
    UnsupportedVersion,
    UnsupportedAlgorithm,
    MissingSignatureTag,
    MissingBodyHashTag,
    UnsupportedCanonicalization,
    InvalidDomain,
    MissingDomainTag,
    SignedHeadersEmpty,
    MissingSignedHeadersTag,
    InvalidBodyLength,
    UnsupportedQueryMethod,
    InvalidSelector,
    MissingSelectorTag,
    InvalidTimestamp,
    InvalidExpiration,
    ExpirationBeforeTimestamp,
    InvalidIdentity,
    IdentityOutOfScope,
    ValueSyntax,
}

impl Display for DkimSignatureError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTagList => write!(f, "invalid tag list"),
            Self::Utf8Encoding => write!(f, "invalid UTF-8 encoding"),
            Self::MissingVersionTag => write!(f, "missing v= tag"),
            Self::UnsupportedVersion => write!(f, "unsupported version"),
            Self::UnsupportedAlgorithm => write!(f, "unsupported algorithm"),
            Self::MissingSignatureTag => write!(f, "missing b= tag"),
            Self::MissingBodyHashTag => write!(f, "missing bh= tag"),
            Self::UnsupportedCanonicalization => write!(f, "unsupported canonicalization"),
            Self::InvalidDomain => write!(f, "invalid domain"),
            Self::MissingDomainTag => write!(f, "missing d= tag"),
            Self::SignedHeadersEmpty => write!(f, "empty h= tag"),
            Self::MissingSignedHeadersTag => write!(f, "missing h= tag"),
            Self::InvalidBodyLength => write!(f, "invalid body length"),
            Self::UnsupportedQueryMethod => write!(f, "unsupported query method"),
            Self::InvalidSelector => write!(f, "invalid selector"),
            Self::MissingSelectorTag => write!(f, "missing s= tag"),
            Self::InvalidTimestamp => write!(f, "invalid timestamp"),
            Self::InvalidExpiration => write!(f, "invalid expiration"),
            Self::ExpirationBeforeTimestamp => write!(f, "expiration before timestamp"),
            Self::InvalidIdentity => write!(f, "invalid identity"),
            Self::IdentityOutOfScope => write!(f, "identity not within domain"),
            Self::ValueSyntax => write!(f, "invalid value syntax"),
        }
    }
}

impl std::error::Error for DkimSignatureError {}

/// A DKIM signature as parsed from a *DKIM-Signature* header field.
///
/// RFC-defined tags become typed fields; unrecognized tags are collected in
/// the `ext_tags` side table.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DkimSignature {
    pub algorithm: SignatureAlgorithm,
    pub signature_data: Box<[u8]>,
    pub body_hash: Box<[u8]>,
    pub canonicalization: Canonicalization,
    pub domain: DomainName,
    pub signed_headers: Box<[FieldName]>,
    pub identity: Identity,
    pub body_length: Option<u64>,
    pub selector: Selector,
    pub timestamp: Option<u64>,
    pub expiration: Option<u64>,
    pub copied_headers: Option<Box<str>>,
    pub ext_tags: Box<[(Box<str>, Box<str>)]>,
}

impl DkimSignature {
    /// The DNS name at which this signature's key is published:
    /// `<selector>._domainkey.<domain>`.
    pub fn dns_name(&self) -> String {
        dns_key_name(self.selector.as_ref(), self.domain.as_ref())
    }

    pub fn from_tag_list(tag_list: &TagList<'_>) -> Result<Self, DkimSignatureError> {
        let mut version_seen = false;
        let mut algorithm = None;
        let mut signature_data = None;
        let mut body_hash = None;
        let mut canonicalization = Canonicalization::default();
        let mut domain = None;
        let mut signed_headers = None;
        let mut identity = None;
        let mut body_length = None;
        let mut selector = None;
        let mut timestamp = None;
        let mut expiration = None;
        let mut copied_headers = None;
        let mut ext_tags = vec![];

        for &TagSpec { name, value } in tag_list.as_ref() {
            match name {
                "v" => {
                    if value != "1" {
                        return Err(DkimSignatureError::UnsupportedVersion);
                    }
                    version_seen = true;
                }
                "a" => {
                    algorithm = Some(parse_signature_algorithm(value)?);
                }
                "b" => {
                    let value = parse_base64_value(value)
                        .map_err(|_| DkimSignatureError::ValueSyntax)?;
                    signature_data = Some(value);
                }
                "bh" => {
                    let value = parse_base64_value(value)
                        .map_err(|_| DkimSignatureError::ValueSyntax)?;
                    body_hash = Some(value);
                }
                "c" => {
                    canonicalization = parse_canonicalization(value)?;
                }
                "d" => {
                    let value = DomainName::new(value)
                        .map_err(|_| DkimSignatureError::InvalidDomain)?;
                    domain = Some(value);
                }
                "h" => {
                    signed_headers = Some(parse_signed_headers(value)?);
                }
                "i" => {
                    let bytes = quoted_printable::decode(value)
                        .map_err(|_| DkimSignatureError::InvalidIdentity)?;
                    let s = std::str::from_utf8(&bytes)
                        .map_err(|_| DkimSignatureError::InvalidIdentity)?;
                    let value = Identity::new(s)
                        .map_err(|_| DkimSignatureError::InvalidIdentity)?;
                    identity = Some(value);
                }
                "l" => {
                    body_length = Some(parse_body_length(value)?);
                }
                "q" => {
                    let methods = parse_colon_separated_value(value);
                    if !methods.iter().any(|m| m.eq_ignore_ascii_case("dns/txt")) {
                        return Err(DkimSignatureError::UnsupportedQueryMethod);
                    }
                }
                "s" => {
                    let value = Selector::new(value)
                        .map_err(|_| DkimSignatureError::InvalidSelector)?;
                    selector = Some(value);
                }
                "t" => {
                    timestamp =
                        Some(parse_seconds(value).ok_or(DkimSignatureError::InvalidTimestamp)?);
                }
                "x" => {
                    expiration =
                        Some(parse_seconds(value).ok_or(DkimSignatureError::InvalidExpiration)?);
                }
                "z" => {
                    // copied header fields, semantically ignored
                    copied_headers = Some(value.into());
                }
                _ => {
                    ext_tags.push((name.into(), value.into()));
                }
            }
        }

        if !version_seen {
            return Err(DkimSignatureError::MissingVersionTag);
        }

        let algorithm = algorithm.unwrap_or(SignatureAlgorithm::RsaSha256);
        let signature_data = signature_data.ok_or(DkimSignatureError::MissingSignatureTag)?;
        let body_hash = body_hash.ok_or(DkimSignatureError::MissingBodyHashTag)?;
        let domain = domain.ok_or(DkimSignatureError::MissingDomainTag)?;
        let signed_headers = signed_headers.ok_or(DkimSignatureError::MissingSignedHeadersTag)?;
        let selector = selector.ok_or(DkimSignatureError::MissingSelectorTag)?;

        if let (Some(t), Some(x)) = (timestamp, expiration) {
            if x < t {
                return Err(DkimSignatureError::ExpirationBeforeTimestamp);
            }
        }

        let identity = match identity {
            Some(i) => {
                if !i.domain.eq_or_subdomain_of(&domain) {
                    return Err(DkimSignatureError::IdentityOutOfScope);
                }
                i
            }
            None => Identity::from_domain(domain.clone()),
        };

        Ok(Self {
            algorithm,
            signature_data: signature_data.into(),
            body_hash: body_hash.into(),
            canonicalization,
            domain,
            signed_headers: signed_headers.into(),
            identity,
            body_length,
            selector,
            timestamp,
            expiration,
            copied_headers,
            ext_tags: ext_tags.into(),
        })
    }
}

impl FromStr for DkimSignature {
    type Err = DkimSignatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag_list =
            TagList::from_str(s).map_err(|_| DkimSignatureError::InvalidTagList)?;

        Self::from_tag_list(&tag_list)
    }
}

pub fn dns_key_name(selector: &str, domain: &str) -> String {
    let mut name = format!("{selector}._domainkey.{domain}");
    name.make_ascii_lowercase();
    name
}

fn parse_signature_algorithm(value: &str) -> Result<SignatureAlgorithm, DkimSignatureError> {
    match value.split_once('-') {
        Some((k, h)) if k.eq_ignore_ascii_case("rsa") && h.eq_ignore_ascii_case("sha256") => {
            Ok(SignatureAlgorithm::RsaSha256)
        }
        Some((k, h)) if k.eq_ignore_ascii_case("rsa") && h.eq_ignore_ascii_case("sha1") => {
            Ok(SignatureAlgorithm::RsaSha1)
        }
        _ => Err(DkimSignatureError::UnsupportedAlgorithm),
    }
}

pub(crate) fn parse_canonicalization(
    value: &str,
) -> Result<Canonicalization, DkimSignatureError> {
    fn parse_algorithm(s: &str) -> Result<CanonicalizationAlgorithm, DkimSignatureError> {
        if s.eq_ignore_ascii_case("simple") {
            Ok(CanonicalizationAlgorithm::Simple)
        } else if s.eq_ignore_ascii_case("relaxed") {
            Ok(CanonicalizationAlgorithm::Relaxed)
        } else {
            Err(DkimSignatureError::UnsupportedCanonicalization)
        }
    }

    // the second half defaults to `simple` when omitted
    match value.split_once('/') {
        Some((h, b)) => Ok(Canonicalization {
            header: parse_algorithm(h)?,
            body: parse_algorithm(b)?,
        }),
        None => Ok(Canonicalization {
            header: parse_algorithm(value)?,
            body: CanonicalizationAlgorithm::Simple,
        }),
    }
}

pub(crate) fn parse_signed_headers(
    value: &str,
) -> Result<Vec<FieldName>, DkimSignatureError> {
    let mut result: Vec<FieldName> = vec![];

    for v in parse_colon_separated_value(value) {
        if v.is_empty() {
            return Err(DkimSignatureError::SignedHeadersEmpty);
        }
        let name = FieldName::new(v).map_err(|_| DkimSignatureError::ValueSyntax)?;
        let name = name.to_lowercase();
        // lowercased and deduplicated, preserving first-occurrence order
        if !result.contains(&name) {
            result.push(name);
        }
    }

    if result.is_empty() {
        return Err(DkimSignatureError::SignedHeadersEmpty);
    }

    Ok(result)
}

fn parse_body_length(value: &str) -> Result<u64, DkimSignatureError> {
    // 1 to 76 digits
    if !matches!(value.len(), 1..=76) || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DkimSignatureError::InvalidBodyLength);
    }
    value
        .parse()
        .map_err(|_| DkimSignatureError::InvalidBodyLength)
}

fn parse_seconds(value: &str) -> Option<u64> {
    // 1 to 12 digits
    if !matches!(value.len(), 1..=12) || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}
