//! Computation of the header and body hashes.

use crate::{
    canonicalize::{self, BodyCanonicalizer},
    crypto::{self, CountingHasher, HashAlgorithm},
    header::{FieldName, HeaderFields},
    parse::strip_fws,
    signature::{CanonicalizationAlgorithm, DkimSignature},
};
use std::collections::{HashMap, HashSet};

const CRLF: &[u8] = b"\r\n";

/// Computes the header hash for a signature.
///
/// The digest covers the canonicalized selected header fields, in the order
/// given by the (deduplicated) signed header names, followed by the
/// canonicalized *DKIM-Signature* field itself with the *b=* tag value
/// erased and without a trailing CRLF.
///
/// For each signed header name all matching fields are included, bottom-up;
/// `own_index` identifies the *DKIM-Signature* field being processed, which
/// is never part of its own hash.
pub fn compute_header_hash(
    hash_alg: HashAlgorithm,
    canon_alg: CanonicalizationAlgorithm,
    headers: &HeaderFields,
    signed_headers: &[FieldName],
    own_index: Option<usize>,
    sig_field_name: &str,
    sig_field_value: &str,
) -> Box<[u8]> {
    let cheaders = canonicalize_signed_headers(canon_alg, headers, signed_headers, own_index);

    let value = erase_signature_data_tag(sig_field_value);

    let mut csig = vec![];
    canonicalize::canonicalize_header(&mut csig, canon_alg, sig_field_name, value.as_bytes());

    while csig.ends_with(CRLF) {
        csig.truncate(csig.len() - 2);
    }

    crypto::digest_slices(hash_alg, [cheaders, csig])
}

fn canonicalize_signed_headers(
    canon_alg: CanonicalizationAlgorithm,
    headers: &HeaderFields,
    signed_headers: &[FieldName],
    own_index: Option<usize>,
) -> Vec<u8> {
    let mut result = vec![];

    for selected in signed_headers {
        for (i, (name, value)) in headers.as_ref().iter().enumerate().rev() {
            if name == selected && own_index != Some(i) {
                canonicalize::canonicalize_header(&mut result, canon_alg, name, value);
                result.extend(CRLF);
            }
        }
    }

    result
}

/// Erases the *b=* tag value from a *DKIM-Signature* field value: the text
/// up to and including the `=` stays, anything up to the next `;` or the
/// end of the field goes.
pub fn erase_signature_data_tag(value: &str) -> String {
    fn b_tag_prefix_len(segment: &str) -> Option<usize> {
        let s = strip_fws(segment).unwrap_or(segment);
        let s = s.strip_prefix('b')?;
        let s = strip_fws(s).unwrap_or(s);
        let s = s.strip_prefix('=')?;
        Some(segment.len() - s.len())
    }

    let mut result = String::with_capacity(value.len());

    for (i, segment) in value.split(';').enumerate() {
        if i > 0 {
            result.push(';');
        }
        match b_tag_prefix_len(segment) {
            Some(n) => result.push_str(&segment[..n]),
            None => result.push_str(segment),
        }
    }

    result
}

pub type BodyHashKey = (Option<u64>, HashAlgorithm, CanonicalizationAlgorithm);

pub fn body_hash_key(sig: &DkimSignature) -> BodyHashKey {
    let hash_alg = sig.algorithm.hash_algorithm();
    (sig.body_length, hash_alg, sig.canonicalization.body)
}

#[derive(Default)]
pub struct BodyHasherBuilder {
    registrations: HashSet<BodyHashKey>,
}

impl BodyHasherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        length: Option<u64>,
        hash_alg: HashAlgorithm,
        canon_alg: CanonicalizationAlgorithm,
    ) {
        self.registrations.insert((length, hash_alg, canon_alg));
    }

    pub fn build(self) -> BodyHasher {
        let hashers = self
            .registrations
            .into_iter()
            .map(|key @ (len, alg, _)| (key, CountingHasher::new(alg, len)))
            .collect();

        BodyHasher {
            hashers,
            canonicalizer_simple: BodyCanonicalizer::simple(),
            canonicalizer_relaxed: BodyCanonicalizer::relaxed(),
        }
    }
}

/// The producer of body hash results.
///
/// One hasher per distinct `(l=, hash, canonicalization)` key; signatures
/// sharing a key share the pipeline. The two canonicalizers are shared
/// across all hashers, so each chunk is canonicalized at most once per
/// algorithm no matter how many signatures are in flight.
pub struct BodyHasher {
    hashers: HashMap<BodyHashKey, CountingHasher>,
    canonicalizer_simple: BodyCanonicalizer,
    canonicalizer_relaxed: BodyCanonicalizer,
}

impl BodyHasher {
    pub fn hash_chunk(&mut self, chunk: &[u8]) {
        let mut canonicalized_chunk_simple = None;
        let mut canonicalized_chunk_relaxed = None;

        for ((_, _, canon), hasher) in self.hashers.iter_mut().filter(|(_, h)| !h.is_done()) {
            let canonicalized_chunk = match canon {
                CanonicalizationAlgorithm::Simple => canonicalized_chunk_simple
                    .get_or_insert_with(|| self.canonicalizer_simple.canonicalize_chunk(chunk)),
                CanonicalizationAlgorithm::Relaxed => canonicalized_chunk_relaxed
                    .get_or_insert_with(|| self.canonicalizer_relaxed.canonicalize_chunk(chunk)),
            };

            let _ = hasher.update(canonicalized_chunk);
        }
    }

    pub fn finish(self) -> BodyHashResults {
        let mut final_chunk_simple = None;
        let mut final_chunk_relaxed = None;
        let mut finish_simple = Some(self.canonicalizer_simple);
        let mut finish_relaxed = Some(self.canonicalizer_relaxed);

        let mut results = HashMap::new();

        for (key @ (_, _, canon), mut hasher) in self.hashers {
            if !hasher.is_done() {
                let final_chunk = match canon {
                    CanonicalizationAlgorithm::Simple => match finish_simple.take() {
                        Some(c) => final_chunk_simple.insert(c.finish()),
                        None => final_chunk_simple.as_ref().unwrap(),
                    },
                    CanonicalizationAlgorithm::Relaxed => match finish_relaxed.take() {
                        Some(c) => final_chunk_relaxed.insert(c.finish()),
                        None => final_chunk_relaxed.as_ref().unwrap(),
                    },
                };

                let _ = hasher.update(final_chunk);
            }

            results.insert(key, hasher.finish());
        }

        BodyHashResults { results }
    }
}

pub struct BodyHashResults {
    results: HashMap<BodyHashKey, (Box<[u8]>, u64)>,
}

impl BodyHashResults {
    pub fn get(&self, key: &BodyHashKey) -> Option<&(Box<[u8]>, u64)> {
        self.results.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::FieldBody;
    use base64ct::{Base64, Encoding};
    use bstr::BStr;

    fn header_fields(fields: &[(&str, &[u8])]) -> HeaderFields {
        let fields: Vec<_> = fields
            .iter()
            .map(|(name, value)| {
                (
                    FieldName::new(*name).unwrap(),
                    FieldBody::new(*value).unwrap(),
                )
            })
            .collect();
        HeaderFields::new(fields)
    }

    fn field_names(names: &[&str]) -> Vec<FieldName> {
        names.iter().map(|n| FieldName::new(*n).unwrap()).collect()
    }

    #[test]
    fn erase_signature_data_tag_ok() {
        assert_eq!(erase_signature_data_tag(" a = 1 ; b = 2 ; c = 3 "), " a = 1 ; b =; c = 3 ");
        assert_eq!(erase_signature_data_tag(" a = 1 ; b = 2 "), " a = 1 ; b =");
        assert_eq!(erase_signature_data_tag(" a = 1 ; b ="), " a = 1 ; b =");
        assert_eq!(erase_signature_data_tag(" bh = x ; b = 2 ;"), " bh = x ; b =;");
    }

    #[test]
    fn selected_headers_bottom_up() {
        let headers = header_fields(&[
            ("From", b" Good \t "),
            ("To", b" see   me"),
            ("Date", b" Fri 24\r\n\tfoo"),
            ("To", b" another one"),
        ]);

        let selected = field_names(&["to", "from"]);

        let result = canonicalize_signed_headers(
            CanonicalizationAlgorithm::Relaxed,
            &headers,
            &selected,
            None,
        );

        assert_eq!(
            BStr::new(&result),
            BStr::new(b"to:another one\r\nto:see me\r\nfrom:Good\r\n"),
        );
    }

    #[test]
    fn own_signature_field_excluded() {
        let headers = header_fields(&[
            ("DKIM-Signature", b" v=1; earlier"),
            ("From", b" me"),
            ("DKIM-Signature", b" v=1; this one"),
        ]);

        let selected = field_names(&["dkim-signature", "from"]);

        let result = canonicalize_signed_headers(
            CanonicalizationAlgorithm::Relaxed,
            &headers,
            &selected,
            Some(2),
        );

        assert_eq!(
            BStr::new(&result),
            BStr::new(b"dkim-signature:v=1; earlier\r\nfrom:me\r\n"),
        );
    }

    #[test]
    fn body_hasher_shared_pipelines() {
        let key_simple = (None, HashAlgorithm::Sha256, CanonicalizationAlgorithm::Simple);
        let key_relaxed = (None, HashAlgorithm::Sha256, CanonicalizationAlgorithm::Relaxed);

        let mut builder = BodyHasherBuilder::new();
        builder.register(key_simple.0, key_simple.1, key_simple.2);
        builder.register(key_relaxed.0, key_relaxed.1, key_relaxed.2);
        let mut hasher = builder.build();

        hasher.hash_chunk(b"abc \r\n");

        let results = hasher.finish();

        assert_eq!(results.get(&key_simple).unwrap().1, 6);
        assert_eq!(results.get(&key_relaxed).unwrap().1, 5);
    }

    #[test]
    fn body_hasher_with_length_budget() {
        let key = (Some(27), HashAlgorithm::Sha256, CanonicalizationAlgorithm::Simple);

        let mut builder = BodyHasherBuilder::new();
        builder.register(key.0, key.1, key.2);
        let mut hasher = builder.build();

        hasher.hash_chunk(b"well  hello \r\n");
        hasher.hash_chunk(b"\r\n what agi \r");
        hasher.hash_chunk(b"\n\r\n");

        let results = hasher.finish();

        let (hash, len) = results.get(&key).unwrap();
        assert_eq!(*len, 27);
        assert_eq!(
            hash,
            &crypto::digest_slices(HashAlgorithm::Sha256, [b"well  hello \r\n\r\n what agi \r"])
        );
    }

    #[test]
    fn body_hasher_known_answer() {
        let key = (None, HashAlgorithm::Sha256, CanonicalizationAlgorithm::Relaxed);

        let mut builder = BodyHasherBuilder::new();
        builder.register(key.0, key.1, key.2);
        let mut hasher = builder.build();

        hasher.hash_chunk(b" C \r\nD \t E\r\n\r\n\r\n");

        let results = hasher.finish();

        let (hash, _) = results.get(&key).unwrap();

        // See RFC 6376, appendix A (body " C \r\nD \t E\r\n" relaxed):
        assert_eq!(
            Base64::encode_string(hash),
            "2jUSOH9NhtVGCQWNr9BrIAPreKQjO6Sn7XIkfJVOzv8="
        );
    }
}
