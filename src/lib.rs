//! A library implementing the *DomainKeys Identified Mail* (DKIM)
//! specification described in [RFC 6376], with a fully iterative,
//! non-blocking operating model.
//!
//! The engine never performs I/O. The caller pushes message bytes as they
//! become available and injects DNS TXT lookup results as they complete;
//! whenever the engine needs something it does not have yet, it suspends
//! by returning. This makes the library usable from any I/O environment —
//! a blocking loop, an async runtime, a milter — without the library
//! taking a position on how bytes and DNS records are obtained.
//!
//! # Usage
//!
//! The type [`Engine`] is the entry point for both verifying and signing.
//! Feed it the message with [`Engine::append`], ending with an empty
//! chunk; look up the DNS names of any unresolved results and hand the TXT
//! records back with [`Engine::add_dns_record`]; repeat
//! [`Engine::result`] until every signature has a status.
//!
//! ```
//! use stepdkim::{DnsEntry, Engine};
//!
//! let mut engine = Engine::new();
//!
//! engine.append("From: me\r\nTo: you\r\n\r\n");
//! engine.append("Hi\r\n");
//! let results = engine.append("").expect("message complete");
//!
//! for result in &results {
//!     if result.status.is_none() {
//!         let name = result.dns_name.as_deref().expect("lookup name");
//!         // ... look up TXT records for `name`, then:
//!         engine.add_dns_record(name.to_owned(), DnsEntry::LookupFailed);
//!     }
//! }
//!
//! let results = engine.result().expect("complete");
//! # let _ = results;
//! ```
//!
//! Signing uses the same protocol with [`SignRequest`] templates supplied
//! in [`Config::sign`]; the signed `DKIM-Signature` header appears in the
//! corresponding result record.
//!
//! The low-level building blocks (tag lists, canonicalization, hashes,
//! key records) are exposed in their own modules for users who want to
//! assemble their own processing.
//!
//! # Trace logging
//!
//! This library uses the [tracing] crate for internal trace logging, done
//! only in the high-level engine module. For insight into library
//! operation, install a tracing subscriber and enable logging at `trace`
//! level.
//!
//! [RFC 6376]: https://www.rfc-editor.org/rfc/rfc6376
//! [tracing]: https://crates.io/crates/tracing

pub mod canonicalize;
pub mod crypto;
pub mod engine;
pub mod header;
pub mod message_hash;
mod parse;
pub mod quoted_printable;
pub mod record;
pub mod signature;
pub mod signer;
pub mod tag_list;
mod util;

pub use crate::{
    crypto::SigningKey,
    engine::{Config, DnsCache, DnsEntry, Engine, SignatureResult, Status},
    header::{FieldBody, FieldName, HeaderField, HeaderFields},
    record::{DkimKeyRecord, DkimKeyRecordError},
    signature::{
        Canonicalization, CanonicalizationAlgorithm, DkimSignature, DkimSignatureError,
        DomainName, Identity, Selector, SignatureAlgorithm,
    },
    signer::{BodyLength, Expiration, SignRequest, SignRequestError, Timestamp},
    util::{decode_base64, encode_base64, Base64Error, CanonicalStr},
};
