//! Sign templates and supporting types.

pub(crate) mod format;

use crate::{
    crypto::{KeyError, SigningKey},
    header::FieldName,
    quoted_printable,
    signature::{self, Canonicalization, DomainName, Identity, Selector, SignatureAlgorithm},
    tag_list::{TagList, TagSpec},
};
use std::fmt::{self, Display, Formatter};

/// The signing time to place in the *t=* tag.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Timestamp {
    /// Stamp with the current time when the signature is produced. This is
    /// what a template's present-but-empty `t=` means.
    Now,
    Exact(u64),
}

/// The expiration time to place in the *x=* tag.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Expiration {
    At(u64),
    /// `x=+N`: N seconds after the signing time (or after the time of
    /// signature production, when no signing time is requested).
    After(u64),
}

/// The body length to declare in the *l=* tag.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BodyLength {
    /// Declare however many bytes the canonicalized body turns out to have.
    /// This is what a template's present-but-empty `l=` means.
    MessageLength,
    /// Hash at most this many canonicalized body bytes, and declare the
    /// number actually hashed.
    Exact(u64),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SignRequestError {
    InvalidTagList,
    MissingDomainTag,
    MissingSelectorTag,
    MissingSignedHeadersTag,
    UnsupportedVersion,
    UnsupportedAlgorithm,
    UnsupportedCanonicalization,
    UnsupportedQueryMethod,
    InvalidDomain,
    InvalidSelector,
    InvalidIdentity,
    InvalidTimestamp,
    InvalidExpiration,
    ExpirationBeforeTimestamp,
    InvalidBodyLength,
    InvalidCopiedHeaders,
    ValueSyntax,
}

impl Display for SignRequestError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTagList => write!(f, "invalid tag list"),
            Self::MissingDomainTag => write!(f, "missing d= tag"),
            Self::MissingSelectorTag => write!(f, "missing s= tag"),
            Self::MissingSignedHeadersTag => write!(f, "missing h= tag"),
            Self::UnsupportedVersion => write!(f, "unsupported version"),
            Self::UnsupportedAlgorithm => write!(f, "unsupported algorithm"),
            Self::UnsupportedCanonicalization => write!(f, "unsupported canonicalization"),
            Self::UnsupportedQueryMethod => write!(f, "unsupported query method"),
            Self::InvalidDomain => write!(f, "invalid domain"),
            Self::InvalidSelector => write!(f, "invalid selector"),
            Self::InvalidIdentity => write!(f, "invalid identity"),
            Self::InvalidTimestamp => write!(f, "invalid timestamp"),
            Self::InvalidExpiration => write!(f, "invalid expiration"),
            Self::ExpirationBeforeTimestamp => write!(f, "expiration before timestamp"),
            Self::InvalidBodyLength => write!(f, "invalid body length"),
            Self::InvalidCopiedHeaders => write!(f, "invalid copied headers"),
            Self::ValueSyntax => write!(f, "invalid value syntax"),
        }
    }
}

impl std::error::Error for SignRequestError {}

/// A request to produce one DKIM signature for the message.
///
/// A template fixes everything about the signature except the two hashes:
/// where the key lives (`d=`/`s=`), which header fields to sign, and the
/// optional tags to emit. The private key travels alongside the template
/// and never appears in the output.
pub struct SignRequest {
    pub domain: DomainName,
    pub selector: Selector,
    pub algorithm: SignatureAlgorithm,
    pub canonicalization: Canonicalization,
    pub signed_headers: Vec<FieldName>,
    pub identity: Option<Identity>,
    pub timestamp: Option<Timestamp>,
    pub expiration: Option<Expiration>,
    pub body_length: Option<BodyLength>,
    /// Emit `q=dns/txt`.
    pub query_method: bool,
    /// Header fields to copy into the *z=* tag.
    pub copied_headers: Vec<(FieldName, Box<[u8]>)>,
    /// Additional tags, serialized sorted by name after the known ones.
    pub extra_tags: Vec<(Box<str>, Box<str>)>,
    // Held as a result so that an unusable key surfaces as a perm-fail
    // result for this request rather than failing engine construction.
    pub(crate) key: Result<SigningKey, KeyError>,
}

impl SignRequest {
    pub fn new(
        domain: DomainName,
        selector: Selector,
        signed_headers: Vec<FieldName>,
        key: SigningKey,
    ) -> Self {
        Self {
            domain,
            selector,
            algorithm: SignatureAlgorithm::RsaSha256,
            canonicalization: Canonicalization::default(),
            signed_headers: normalize_signed_headers(signed_headers),
            identity: None,
            timestamp: None,
            expiration: None,
            body_length: None,
            query_method: false,
            copied_headers: vec![],
            extra_tags: vec![],
            key: Ok(key),
        }
    }

    /// Creates a sign template from a tag list, with the private key
    /// supplied separately as PEM data.
    ///
    /// `v=` is forced to 1 and `b=`/`bh=` values are discarded; `t=` may be
    /// empty (stamp at signing time) and `x=` may carry a `+N` offset.
    pub fn from_tag_list(s: &str, key_pem: &str) -> Result<Self, SignRequestError> {
        let tag_list = TagList::from_str(s).map_err(|_| SignRequestError::InvalidTagList)?;

        let mut algorithm = None;
        let mut canonicalization = None;
        let mut domain = None;
        let mut signed_headers = None;
        let mut identity = None;
        let mut timestamp = None;
        let mut expiration = None;
        let mut body_length = None;
        let mut selector = None;
        let mut query_method = false;
        let mut copied_headers = vec![];
        let mut extra_tags = vec![];

        for &TagSpec { name, value } in tag_list.as_ref() {
            match name {
                "v" => {
                    if value != "1" {
                        return Err(SignRequestError::UnsupportedVersion);
                    }
                }
                "a" => {
                    let alg = if value.eq_ignore_ascii_case("rsa-sha256") {
                        SignatureAlgorithm::RsaSha256
                    } else if value.eq_ignore_ascii_case("rsa-sha1") {
                        SignatureAlgorithm::RsaSha1
                    } else {
                        return Err(SignRequestError::UnsupportedAlgorithm);
                    };
                    algorithm = Some(alg);
                }
                "b" | "bh" => {
                    // cleared: the engine computes both
                }
                "c" => {
                    let c = signature::parse_canonicalization(value)
                        .map_err(|_| SignRequestError::UnsupportedCanonicalization)?;
                    canonicalization = Some(c);
                }
                "d" => {
                    let d = DomainName::new(value).map_err(|_| SignRequestError::InvalidDomain)?;
                    domain = Some(d);
                }
                "h" => {
                    let sh = signature::parse_signed_headers(value)
                        .map_err(|_| SignRequestError::MissingSignedHeadersTag)?;
                    signed_headers = Some(sh);
                }
                "i" => {
                    let bytes = quoted_printable::decode(value)
                        .map_err(|_| SignRequestError::InvalidIdentity)?;
                    let s = std::str::from_utf8(&bytes)
                        .map_err(|_| SignRequestError::InvalidIdentity)?;
                    let i = Identity::new(s).map_err(|_| SignRequestError::InvalidIdentity)?;
                    identity = Some(i);
                }
                "l" => {
                    body_length = Some(if value.is_empty() {
                        BodyLength::MessageLength
                    } else {
                        let n = value
                            .parse()
                            .map_err(|_| SignRequestError::InvalidBodyLength)?;
                        BodyLength::Exact(n)
                    });
                }
                "q" => {
                    if !value.eq_ignore_ascii_case("dns/txt") {
                        return Err(SignRequestError::UnsupportedQueryMethod);
                    }
                    query_method = true;
                }
                "s" => {
                    let s = Selector::new(value).map_err(|_| SignRequestError::InvalidSelector)?;
                    selector = Some(s);
                }
                "t" => {
                    timestamp = Some(if value.is_empty() {
                        Timestamp::Now
                    } else {
                        Timestamp::Exact(
                            value.parse().map_err(|_| SignRequestError::InvalidTimestamp)?,
                        )
                    });
                }
                "x" => {
                    expiration = Some(parse_expiration(value)?);
                }
                "z" => {
                    copied_headers = parse_copied_headers(value)?;
                }
                _ => {
                    extra_tags.push((name.into(), value.into()));
                }
            }
        }

        let domain = domain.ok_or(SignRequestError::MissingDomainTag)?;
        let selector = selector.ok_or(SignRequestError::MissingSelectorTag)?;
        let signed_headers = signed_headers.ok_or(SignRequestError::MissingSignedHeadersTag)?;

        if let Some(i) = &identity {
            if !i.domain.eq_or_subdomain_of(&domain) {
                return Err(SignRequestError::InvalidIdentity);
            }
        }

        if let (Some(Timestamp::Exact(t)), Some(Expiration::At(x))) = (timestamp, expiration) {
            if x < t {
                return Err(SignRequestError::ExpirationBeforeTimestamp);
            }
        }

        Ok(Self {
            domain,
            selector,
            algorithm: algorithm.unwrap_or(SignatureAlgorithm::RsaSha256),
            canonicalization: canonicalization.unwrap_or_default(),
            signed_headers,
            identity,
            timestamp,
            expiration,
            body_length,
            query_method,
            copied_headers,
            extra_tags,
            key: SigningKey::from_pem(key_pem),
        })
    }
}

fn normalize_signed_headers(names: Vec<FieldName>) -> Vec<FieldName> {
    let mut result: Vec<FieldName> = vec![];
    for name in names {
        let name = name.to_lowercase();
        if !result.contains(&name) {
            result.push(name);
        }
    }
    result
}

fn parse_expiration(value: &str) -> Result<Expiration, SignRequestError> {
    match value.strip_prefix('+') {
        Some(offset) => offset
            .parse()
            .map(Expiration::After)
            .map_err(|_| SignRequestError::InvalidExpiration),
        None => value
            .parse()
            .map(Expiration::At)
            .map_err(|_| SignRequestError::InvalidExpiration),
    }
}

fn parse_copied_headers(
    value: &str,
) -> Result<Vec<(FieldName, Box<[u8]>)>, SignRequestError> {
    let mut result = vec![];

    for piece in value.split('|') {
        let decoded =
            quoted_printable::decode(piece).map_err(|_| SignRequestError::InvalidCopiedHeaders)?;

        let mut iter = decoded.splitn(2, |&b| b == b':');
        match (iter.next(), iter.next()) {
            (Some(name), Some(val)) => {
                let name = std::str::from_utf8(name)
                    .map_err(|_| SignRequestError::InvalidCopiedHeaders)?;
                let name = FieldName::new(name)
                    .map_err(|_| SignRequestError::InvalidCopiedHeaders)?;
                result.push((name, val.into()));
            }
            _ => return Err(SignRequestError::InvalidCopiedHeaders),
        }
    }

    Ok(result)
}
