//! DKIM public key records.
//!
//! See RFC 6376, section 3.6.1.

use crate::{
    crypto::HashAlgorithm,
    quoted_printable,
    tag_list::{parse_base64_value, parse_colon_separated_value, TagList, TagSpec},
};
use std::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ServiceType {
    Any,
    Email,
    Other(Box<str>),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum KeyFlag {
    /// `y`: the domain is testing DKIM; verification failures become
    /// advisory.
    Testing,
    /// `s`: the *i=* domain must match *d=* exactly.
    NoSubdomains,
    Other(Box<str>),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DkimKeyRecordError {
    /// Not a usable tag list, or a record without key data.
    InvalidRecord,
    UnsupportedVersion,
    UnsupportedKeyType,
    ServiceTypeMismatch,
    ValueSyntax,
}

impl Display for DkimKeyRecordError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRecord => write!(f, "invalid or empty DKIM record"),
            Self::UnsupportedVersion => write!(f, "unsupported DKIM record version"),
            Self::UnsupportedKeyType => write!(f, "unsupported key type"),
            Self::ServiceTypeMismatch => write!(f, "service type does not allow email"),
            Self::ValueSyntax => write!(f, "invalid value syntax in DKIM record"),
        }
    }
}

impl std::error::Error for DkimKeyRecordError {}

/// A DKIM public key as published in DNS.
#[derive(Debug, Eq, PartialEq)]
pub struct DkimKeyRecord {
    /// Allowed hash algorithms; defaults to all supported ones.
    pub hash_algorithms: Box<[HashAlgorithm]>,
    /// The *p=* key data. Empty means the key has been revoked.
    pub key_data: Box<[u8]>,
    pub service_types: Box<[ServiceType]>,
    pub flags: Box<[KeyFlag]>,
    pub notes: Option<Box<str>>,
}

impl DkimKeyRecord {
    pub fn is_testing(&self) -> bool {
        self.flags.contains(&KeyFlag::Testing)
    }

    pub fn is_subdomain_restricted(&self) -> bool {
        self.flags.contains(&KeyFlag::NoSubdomains)
    }

    pub fn allows_hash_algorithm(&self, hash_alg: HashAlgorithm) -> bool {
        self.hash_algorithms.contains(&hash_alg)
    }

    fn from_tag_list(tag_list: &TagList<'_>) -> Result<Self, DkimKeyRecordError> {
        let mut hash_algorithms = HashAlgorithm::all();
        let mut key_data = None;
        let mut service_types = vec![ServiceType::Any];
        let mut flags = vec![];
        let mut notes = None;

        for (i, &TagSpec { name, value }) in tag_list.as_ref().iter().enumerate() {
            match name {
                "v" => {
                    // when present, the version tag must come first
                    if i != 0 || value != "DKIM1" {
                        return Err(DkimKeyRecordError::UnsupportedVersion);
                    }
                }
                "h" => {
                    // unrecognized algorithm names are ignored; the
                    // resulting set may end up empty
                    hash_algorithms.clear();
                    for v in parse_colon_separated_value(value) {
                        if v.eq_ignore_ascii_case("sha1") {
                            hash_algorithms.push(HashAlgorithm::Sha1);
                        } else if v.eq_ignore_ascii_case("sha256") {
                            hash_algorithms.push(HashAlgorithm::Sha256);
                        }
                    }
                }
                "k" => {
                    if !value.eq_ignore_ascii_case("rsa") {
                        return Err(DkimKeyRecordError::UnsupportedKeyType);
                    }
                }
                "n" => {
                    let v = quoted_printable::decode(value)
                        .map_err(|_| DkimKeyRecordError::ValueSyntax)?;
                    notes = Some(String::from_utf8_lossy(&v).into());
                }
                "p" => {
                    // empty means revoked, checked during verification
                    let v = parse_base64_value(value)
                        .map_err(|_| DkimKeyRecordError::ValueSyntax)?;
                    key_data = Some(v);
                }
                "s" => {
                    let mut st = vec![];
                    for v in parse_colon_separated_value(value) {
                        if v == "*" {
                            st.push(ServiceType::Any);
                        } else if v.eq_ignore_ascii_case("email") {
                            st.push(ServiceType::Email);
                        } else {
                            st.push(ServiceType::Other(v.into()));
                        }
                    }
                    service_types = st;
                }
                "t" => {
                    let mut fs = vec![];
                    for v in parse_colon_separated_value(value) {
                        if v.eq_ignore_ascii_case("y") {
                            fs.push(KeyFlag::Testing);
                        } else if v.eq_ignore_ascii_case("s") {
                            fs.push(KeyFlag::NoSubdomains);
                        } else {
                            fs.push(KeyFlag::Other(v.into()));
                        }
                    }
                    flags = fs;
                }
                "g" => {
                    // deprecated granularity tag (RFC 4871), dropped
                }
                _ => {}
            }
        }

        let key_data = key_data.ok_or(DkimKeyRecordError::InvalidRecord)?;

        // the record must be applicable to email
        if !service_types
            .iter()
            .any(|s| matches!(s, ServiceType::Any | ServiceType::Email))
        {
            return Err(DkimKeyRecordError::ServiceTypeMismatch);
        }

        Ok(Self {
            hash_algorithms: hash_algorithms.into(),
            key_data: key_data.into(),
            service_types: service_types.into(),
            flags: flags.into(),
            notes,
        })
    }
}

impl FromStr for DkimKeyRecord {
    type Err = DkimKeyRecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag_list =
            TagList::from_str(s).map_err(|_| DkimKeyRecordError::InvalidRecord)?;

        Self::from_tag_list(&tag_list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_record_ok() {
        let record: DkimKeyRecord =
            "v=DKIM1; p=YWJj; s = email; t=y:s; n=highly=20interesting"
                .parse()
                .unwrap();

        assert_eq!(
            record,
            DkimKeyRecord {
                hash_algorithms: [HashAlgorithm::Sha1, HashAlgorithm::Sha256].into(),
                key_data: (*b"abc").into(),
                service_types: [ServiceType::Email].into(),
                flags: [KeyFlag::Testing, KeyFlag::NoSubdomains].into(),
                notes: Some("highly interesting".into()),
            }
        );
        assert!(record.is_testing());
        assert!(record.is_subdomain_restricted());
    }

    #[test]
    fn key_record_defaults() {
        let record: DkimKeyRecord = "p=YWJj".parse().unwrap();

        assert_eq!(
            record.hash_algorithms.as_ref(),
            [HashAlgorithm::Sha1, HashAlgorithm::Sha256]
        );
        assert_eq!(record.service_types.as_ref(), [ServiceType::Any]);
        assert!(record.flags.is_empty());
    }

    #[test]
    fn key_record_revoked() {
        let record: DkimKeyRecord = "v=DKIM1; p=".parse().unwrap();

        assert!(record.key_data.is_empty());
    }

    #[test]
    fn key_record_restricted_hashes() {
        let record: DkimKeyRecord = "h=sha256:sha512; p=YWJj".parse().unwrap();

        assert!(record.allows_hash_algorithm(HashAlgorithm::Sha256));
        assert!(!record.allows_hash_algorithm(HashAlgorithm::Sha1));
    }

    #[test]
    fn key_record_garbage() {
        assert_eq!(
            "And now for something completely different".parse::<DkimKeyRecord>(),
            Err(DkimKeyRecordError::InvalidRecord)
        );
        assert_eq!("".parse::<DkimKeyRecord>(), Err(DkimKeyRecordError::InvalidRecord));
    }

    #[test]
    fn key_record_wrong_service_type() {
        assert_eq!(
            "p=YWJj; s=web".parse::<DkimKeyRecord>(),
            Err(DkimKeyRecordError::ServiceTypeMismatch)
        );
    }

    #[test]
    fn key_record_misplaced_version() {
        assert_eq!(
            "p=YWJj; v=DKIM1".parse::<DkimKeyRecord>(),
            Err(DkimKeyRecordError::UnsupportedVersion)
        );
    }
}
