//! Cryptographic utilities.
//!
//! # DKIM public key formats in DNS
//!
//! RFC 6376 specifies in section 3.6.1 that the *p=* tag contains an RSA
//! public key in the RSAPublicKey format (RFC 3447), but the example in
//! appendix C installs a key in the SubjectPublicKeyInfo format (RFC 5280).
//! It is the second format that implementers have taken as authoritative
//! and that is widespread in deployed DNS records. Several errata
//! describing the mismatch have been filed over the years.
//!
//! Because of this situation, key data is first read in the de-facto
//! standard SubjectPublicKeyInfo format, and failing that in the de-iure
//! standard RSAPublicKey format.

mod hash;
mod rsa;

pub use self::rsa::{read_rsa_private_key, read_rsa_public_key, sign_rsa, verify_rsa};
pub use hash::{digest_slices, CountingHasher, HashStatus};

use crate::util::CanonicalStr;
use ::rsa::{traits::PublicKeyParts, RsaPrivateKey, RsaPublicKey};
use std::fmt::{self, Display, Formatter};

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
}

impl HashAlgorithm {
    pub fn all() -> Vec<Self> {
        vec![Self::Sha1, Self::Sha256]
    }
}

impl CanonicalStr for HashAlgorithm {
    fn canonical_str(&self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
        }
    }
}

/// An RSA signing key, as supplied in a sign template.
pub struct SigningKey(RsaPrivateKey);

impl SigningKey {
    /// Reads a signing key from PEM-encoded data, in either PKCS#8
    /// (`PRIVATE KEY`) or PKCS#1 (`RSA PRIVATE KEY`) form.
    pub fn from_pem(s: &str) -> Result<Self, KeyError> {
        read_rsa_private_key(s).map(Self)
    }

    /// The length in bytes of signatures produced with this key.
    pub fn signature_length(&self) -> usize {
        self.0.size()
    }

    pub(crate) fn as_inner(&self) -> &RsaPrivateKey {
        &self.0
    }
}

/// An RSA verifying key, as published in a DKIM key record.
pub struct VerifyingKey(RsaPublicKey);

impl VerifyingKey {
    /// Reads a verifying key from the DER data in a key record's *p=* tag.
    pub fn from_key_data(key_data: &[u8]) -> Result<Self, KeyError> {
        read_rsa_public_key(key_data).map(Self)
    }

    pub(crate) fn as_inner(&self) -> &RsaPublicKey {
        &self.0
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KeyError {
    InvalidKey,
}

impl Display for KeyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "unusable key data")
    }
}

impl std::error::Error for KeyError {}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VerificationError {
    VerificationFailure,
}

impl Display for VerificationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "signature verification failure")
    }
}

impl std::error::Error for VerificationError {}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SigningError {
    SigningFailure,
}

impl Display for SigningError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "signing failure")
    }
}

impl std::error::Error for SigningError {}
