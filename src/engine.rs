//! The iterative DKIM engine.
//!
//! The engine never performs I/O. It is driven entirely by the caller:
//! message bytes are pushed in with [`Engine::append`], and DNS TXT lookup
//! results are injected with [`Engine::add_dns_record`]. Whenever the
//! engine needs something it does not have, it suspends by returning —
//! `append` returns `None` while more message bytes are needed, and a
//! result record with no status names the DNS record that is still
//! missing.

use crate::{
    crypto::{self, VerifyingKey},
    header::{split_header_block, HeaderFields},
    message_hash::{
        self, body_hash_key, BodyHashKey, BodyHasher, BodyHasherBuilder, BodyHashResults,
    },
    record::{DkimKeyRecord, DkimKeyRecordError},
    signature::{dns_key_name, DkimSignature, DkimSignatureError, Identity, DKIM_SIGNATURE_NAME},
    signer::{format, BodyLength, Expiration, SignRequest, Timestamp},
    util::CanonicalStr,
};
use std::{collections::HashMap, mem, sync::Arc, time::SystemTime};
use tracing::trace;

/// The outcome class of a processed signature.
///
/// The numeric codes are part of the external interface and are stable.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Status {
    /// Verification succeeded, or signing produced a header (+1).
    Valid,
    /// Deterministic cryptographic or policy failure (0).
    PermFail,
    /// Transient failure, the DNS lookup failed (-1).
    TempFail,
    /// Recoverable or advisory failure (-2).
    SoftFail,
    /// The signature was rejected before any cryptography (-3).
    InvalidHeader,
}

impl Status {
    pub fn code(self) -> i8 {
        match self {
            Self::Valid => 1,
            Self::PermFail => 0,
            Self::TempFail => -1,
            Self::SoftFail => -2,
            Self::InvalidHeader => -3,
        }
    }
}

impl CanonicalStr for Status {
    fn canonical_str(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::PermFail => "perm-fail",
            Self::TempFail => "temp-fail",
            Self::SoftFail => "soft-fail",
            Self::InvalidHeader => "invalid-header",
        }
    }
}

/// A DNS lookup result supplied by the caller, or memoized by the engine.
#[derive(Clone, Debug)]
pub enum DnsEntry {
    /// Raw TXT record strings, not yet parsed.
    Unresolved(Vec<Box<str>>),
    /// A parsed key record, memoized on first use.
    Parsed(Arc<DkimKeyRecord>),
    /// The lookup itself failed.
    LookupFailed,
    PermFail(Box<str>),
    TempFail(Box<str>),
}

impl From<&str> for DnsEntry {
    fn from(txt: &str) -> Self {
        Self::Unresolved(vec![txt.into()])
    }
}

impl From<Vec<&str>> for DnsEntry {
    fn from(txts: Vec<&str>) -> Self {
        Self::Unresolved(txts.into_iter().map(Into::into).collect())
    }
}

/// The DNS name → lookup result mapping consulted during result
/// computation.
///
/// A cache can be moved between engines; parsed records memoized by one
/// engine are then reused by the next.
#[derive(Clone, Debug, Default)]
pub struct DnsCache {
    entries: HashMap<Box<str>, DnsEntry>,
}

impl DnsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<Box<str>>, entry: impl Into<DnsEntry>) {
        let mut name = name.into();
        name.make_ascii_lowercase();
        self.entries.insert(name, entry.into());
    }

    pub fn get(&self, name: &str) -> Option<&DnsEntry> {
        self.entries.get(name)
    }

    // Looks up an entry, parsing raw TXT data on first use. Of several TXT
    // strings the first that parses as a key record wins; if none does, a
    // perm-fail sentinel is cached.
    fn resolve(&mut self, name: &str) -> Option<&DnsEntry> {
        if let Some(entry) = self.entries.get_mut(name) {
            if let DnsEntry::Unresolved(txts) = entry {
                let mut error = DkimKeyRecordError::InvalidRecord;

                let mut parsed = None;
                for txt in txts.iter() {
                    match txt.parse::<DkimKeyRecord>() {
                        Ok(record) => {
                            parsed = Some(record);
                            break;
                        }
                        Err(e) => error = e,
                    }
                }

                *entry = match parsed {
                    Some(record) => {
                        trace!(name, "parsed DKIM key record");
                        DnsEntry::Parsed(Arc::new(record))
                    }
                    None => {
                        trace!(name, "no usable DKIM key record");
                        DnsEntry::PermFail(error.to_string().into())
                    }
                };
            }
        }

        self.entries.get(name)
    }
}

/// Engine construction options.
pub struct Config {
    /// Pre-populated DNS lookup results.
    pub dns: DnsCache,
    /// Signatures to produce for the message.
    pub sign: Vec<SignRequest>,
    /// Also verify existing *DKIM-Signature* headers while signing.
    pub sign_and_verify: bool,
    /// Upper bound on the number of *DKIM-Signature* headers processed.
    pub max_signatures: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dns: DnsCache::new(),
            sign: vec![],
            sign_and_verify: false,
            max_signatures: 20,
        }
    }
}

/// The per-signature outcome record.
///
/// One record per sign template and per discovered *DKIM-Signature*
/// header, in that order; headers whose signature could not be parsed
/// still occupy their slot.
#[derive(Clone, Debug)]
pub struct SignatureResult {
    /// The parsed or produced signature; `None` when parsing failed.
    pub signature: Option<DkimSignature>,
    /// The DNS name holding the verification key.
    pub dns_name: Option<Box<str>>,
    /// `None` means the engine is waiting for the `dns_name` record.
    pub status: Option<Status>,
    pub error: Option<Box<str>>,
    /// The complete signed header line, for sign results.
    pub signed_header: Option<Box<str>>,
}

enum Slot {
    Sign(SignSlot),
    Verify(VerifySlot),
    Invalid(DkimSignatureError),
}

struct SignSlot {
    request: SignRequest,
    // computed once, on the first result pass after the body ends
    outcome: Option<SignOutcome>,
}

enum SignOutcome {
    Signed {
        signature: DkimSignature,
        header: Box<str>,
    },
    Failed(Box<str>),
}

struct VerifySlot {
    sig: DkimSignature,
    dns_name: Box<str>,
    data_hash: Box<[u8]>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Phase {
    Header,
    Body,
    Done,
}

/// The engine: a push-driven DKIM signer and verifier.
///
/// Feed message octets with [`append`][Self::append]; an empty chunk
/// signals the end of the body. Once the message is complete, every call
/// returns the current result list. Entries that are waiting for a DNS
/// record carry no status; inject lookup results with
/// [`add_dns_record`][Self::add_dns_record] and call
/// [`result`][Self::result] again until all signatures resolve.
pub struct Engine {
    phase: Phase,
    header_buf: Vec<u8>,
    headers: HeaderFields,
    slots: Vec<Slot>,
    body_hasher: Option<BodyHasher>,
    body_results: Option<BodyHashResults>,
    dns: DnsCache,
    verify_existing: bool,
    max_signatures: usize,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// Creates an engine that verifies the signatures of the message.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let verify_existing = config.sign.is_empty() || config.sign_and_verify;

        let slots = config
            .sign
            .into_iter()
            .map(|request| {
                Slot::Sign(SignSlot {
                    request,
                    outcome: None,
                })
            })
            .collect();

        Self {
            phase: Phase::Header,
            header_buf: vec![],
            headers: HeaderFields::default(),
            slots,
            body_hasher: None,
            body_results: None,
            dns: config.dns,
            verify_existing,
            max_signatures: config.max_signatures,
        }
    }

    /// Feeds the next chunk of message octets to the engine. An empty
    /// chunk signals the end of the body.
    ///
    /// Returns `None` while more input is needed, and the current result
    /// list (possibly with unresolved entries) once the message is
    /// complete.
    pub fn append(&mut self, chunk: impl AsRef<[u8]>) -> Option<Vec<SignatureResult>> {
        let chunk = chunk.as_ref();

        match self.phase {
            Phase::Header => {
                if chunk.is_empty() {
                    // end of input before any header/body boundary: the
                    // whole buffer is the header of a body-less message
                    let buf = mem::take(&mut self.header_buf);
                    self.freeze_header(&buf);
                    self.finish_body();
                    return Some(self.collect_results());
                }

                let scan_from = self.header_buf.len().saturating_sub(2);
                self.header_buf.extend_from_slice(chunk);

                if let Some((header_end, body_start)) =
                    find_body_boundary(&self.header_buf, scan_from)
                {
                    let buf = mem::take(&mut self.header_buf);
                    self.freeze_header(&buf[..header_end]);
                    self.phase = Phase::Body;

                    if body_start < buf.len() {
                        self.hash_body_chunk(&buf[body_start..]);
                    }
                }

                None
            }
            Phase::Body => {
                if chunk.is_empty() {
                    self.finish_body();
                    return Some(self.collect_results());
                }

                self.hash_body_chunk(chunk);

                None
            }
            Phase::Done => Some(self.collect_results()),
        }
    }

    /// Recomputes the result list from the stored hashes and the current
    /// DNS cache, without re-reading message bytes. Idempotent.
    ///
    /// Returns `None` until the end of the body has been seen.
    pub fn result(&mut self) -> Option<Vec<SignatureResult>> {
        if self.phase != Phase::Done {
            return None;
        }

        Some(self.collect_results())
    }

    /// Merges a DNS lookup result supplied by the caller.
    pub fn add_dns_record(&mut self, name: impl Into<Box<str>>, entry: impl Into<DnsEntry>) {
        self.dns.insert(name, entry);
    }

    /// The DNS names the engine is still waiting for.
    pub fn pending_lookups(&self) -> Vec<&str> {
        let mut names: Vec<&str> = vec![];

        for slot in &self.slots {
            if let Slot::Verify(v) = slot {
                if self.dns.get(&v.dns_name).is_none() && !names.contains(&&*v.dns_name) {
                    names.push(&v.dns_name);
                }
            }
        }

        names
    }

    pub fn dns_cache(&self) -> &DnsCache {
        &self.dns
    }

    /// Releases the DNS cache, with everything memoized during result
    /// computation, for reuse with another engine.
    pub fn into_dns_cache(self) -> DnsCache {
        self.dns
    }

    fn freeze_header(&mut self, raw: &[u8]) {
        let raw = normalize_line_endings(raw);

        let fields = split_header_block(&raw);
        self.headers = HeaderFields::new(fields);

        let mut hasher = BodyHasherBuilder::new();

        for slot in &self.slots {
            if let Slot::Sign(s) = slot {
                let (len, alg, canon) = sign_body_hash_key(&s.request);
                hasher.register(len, alg, canon);
            }
        }

        if self.verify_existing {
            let mut found = 0;

            for (index, (name, value)) in self.headers.as_ref().iter().enumerate() {
                if *name != DKIM_SIGNATURE_NAME {
                    continue;
                }
                if found == self.max_signatures {
                    break;
                }
                found += 1;

                let value = match std::str::from_utf8(value.as_ref()) {
                    Ok(s) => s,
                    Err(_) => {
                        trace!(index, "invalid UTF-8 in DKIM-Signature header");
                        self.slots
                            .push(Slot::Invalid(DkimSignatureError::Utf8Encoding));
                        continue;
                    }
                };

                let sig = match value.parse::<DkimSignature>() {
                    Ok(sig) => sig,
                    Err(e) => {
                        trace!(index, "failed to parse DKIM-Signature header");
                        self.slots.push(Slot::Invalid(e));
                        continue;
                    }
                };

                trace!(index, "found DKIM-Signature header");

                let data_hash = message_hash::compute_header_hash(
                    sig.algorithm.hash_algorithm(),
                    sig.canonicalization.header,
                    &self.headers,
                    &sig.signed_headers,
                    Some(index),
                    name.as_ref(),
                    value,
                );

                let (len, alg, canon) = body_hash_key(&sig);
                hasher.register(len, alg, canon);

                let dns_name = sig.dns_name().into();

                self.slots.push(Slot::Verify(VerifySlot {
                    sig,
                    dns_name,
                    data_hash,
                }));
            }
        }

        trace!(signatures = self.slots.len(), "message header complete");

        self.body_hasher = Some(hasher.build());
    }

    fn hash_body_chunk(&mut self, chunk: &[u8]) {
        if let Some(hasher) = &mut self.body_hasher {
            hasher.hash_chunk(chunk);
        }
    }

    fn finish_body(&mut self) {
        if let Some(hasher) = self.body_hasher.take() {
            self.body_results = Some(hasher.finish());
        }
        self.phase = Phase::Done;
        trace!("message body complete");
    }

    fn collect_results(&mut self) -> Vec<SignatureResult> {
        let Self {
            slots,
            headers,
            body_results,
            dns,
            ..
        } = self;

        let body_results = body_results
            .as_ref()
            .expect("results collected before end of body");

        let now = now_unix_secs();

        slots
            .iter_mut()
            .map(|slot| match slot {
                Slot::Sign(s) => {
                    let outcome = s.outcome.get_or_insert_with(|| {
                        perform_signing(&s.request, headers, body_results, now)
                    });

                    let dns_name =
                        dns_key_name(s.request.selector.as_ref(), s.request.domain.as_ref());

                    match outcome {
                        SignOutcome::Signed { signature, header } => SignatureResult {
                            signature: Some(signature.clone()),
                            dns_name: Some(dns_name.into()),
                            status: Some(Status::Valid),
                            error: None,
                            signed_header: Some(header.clone()),
                        },
                        SignOutcome::Failed(error) => SignatureResult {
                            signature: None,
                            dns_name: Some(dns_name.into()),
                            status: Some(Status::PermFail),
                            error: Some(error.clone()),
                            signed_header: None,
                        },
                    }
                }
                Slot::Invalid(e) => SignatureResult {
                    signature: None,
                    dns_name: None,
                    status: Some(Status::InvalidHeader),
                    error: Some(e.to_string().into()),
                    signed_header: None,
                },
                Slot::Verify(v) => evaluate_verification(v, dns, body_results, now),
            })
            .collect()
    }
}

fn evaluate_verification(
    slot: &VerifySlot,
    dns: &mut DnsCache,
    body_results: &BodyHashResults,
    now: u64,
) -> SignatureResult {
    let sig = &slot.sig;

    let result = |status: Option<Status>, error: Option<&str>| SignatureResult {
        signature: Some(sig.clone()),
        dns_name: Some(slot.dns_name.clone()),
        status,
        error: error.map(Into::into),
        signed_header: None,
    };

    if let Some(x) = sig.expiration {
        if x < now {
            trace!(domain = %sig.domain, "signature expired");
            return result(Some(Status::SoftFail), Some("signature e[x]pired"));
        }
    }

    let record = match dns.resolve(&slot.dns_name) {
        None => {
            // suspended: the caller must look this name up
            return result(None, None);
        }
        Some(DnsEntry::LookupFailed) => {
            return result(Some(Status::TempFail), Some("dns lookup failed"));
        }
        Some(DnsEntry::TempFail(e)) => {
            let e = e.clone();
            return result(Some(Status::TempFail), Some(&e));
        }
        Some(DnsEntry::PermFail(e)) => {
            let e = e.clone();
            return result(Some(Status::PermFail), Some(&e));
        }
        Some(DnsEntry::Parsed(record)) => record.clone(),
        Some(DnsEntry::Unresolved(_)) => unreachable!("resolve parses raw records"),
    };

    // a failure with a testing key (t=y) is advisory only
    let fail = if record.is_testing() {
        Status::SoftFail
    } else {
        Status::PermFail
    };

    if record.key_data.is_empty() {
        return result(Some(fail), Some("key revoked"));
    }

    let hash_alg = sig.algorithm.hash_algorithm();

    if !record.allows_hash_algorithm(hash_alg) {
        return result(Some(fail), Some("hash algorithm not allowed"));
    }

    if record.is_subdomain_restricted()
        && !sig
            .identity
            .domain
            .as_ref()
            .eq_ignore_ascii_case(sig.domain.as_ref())
    {
        return result(Some(fail), Some("identity does not match domain"));
    }

    let (computed_bh, _) = body_results
        .get(&body_hash_key(sig))
        .expect("body hash pipeline missing");

    if computed_bh != &sig.body_hash {
        trace!(domain = %sig.domain, "body hash mismatch");
        return result(Some(fail), Some("body hash mismatch"));
    }

    let key = match VerifyingKey::from_key_data(&record.key_data) {
        Ok(key) => key,
        Err(_) => {
            return result(Some(fail), Some("header sig mismatch"));
        }
    };

    match crypto::verify_rsa(hash_alg, key.as_inner(), &slot.data_hash, &sig.signature_data) {
        Ok(()) => {
            trace!(domain = %sig.domain, "signature verified");
            result(Some(Status::Valid), None)
        }
        Err(_) => {
            trace!(domain = %sig.domain, "header signature mismatch");
            result(Some(fail), Some("header sig mismatch"))
        }
    }
}

fn perform_signing(
    request: &SignRequest,
    headers: &HeaderFields,
    body_results: &BodyHashResults,
    now: u64,
) -> SignOutcome {
    let key = match &request.key {
        Ok(key) => key,
        Err(_) => {
            trace!(domain = %request.domain, "unusable private key");
            return SignOutcome::Failed("cannot load private key".into());
        }
    };

    if request.signed_headers.is_empty() {
        return SignOutcome::Failed("no signed header fields".into());
    }

    let (body_hash, hashed_len) = body_results
        .get(&sign_body_hash_key(request))
        .expect("body hash pipeline missing");

    let body_length = request.body_length.map(|_| *hashed_len);

    let timestamp = request.timestamp.map(|t| match t {
        Timestamp::Now => now,
        Timestamp::Exact(t) => t,
    });

    let expiration = request.expiration.map(|x| match x {
        Expiration::At(x) => x,
        Expiration::After(n) => timestamp.unwrap_or(now).saturating_add(n),
    });

    let mut value =
        format::format_without_signature_data(request, timestamp, expiration, body_hash, body_length);

    let hash_alg = request.algorithm.hash_algorithm();

    let data_hash = message_hash::compute_header_hash(
        hash_alg,
        request.canonicalization.header,
        headers,
        &request.signed_headers,
        None,
        DKIM_SIGNATURE_NAME,
        &value,
    );

    let signature_data = match crypto::sign_rsa(hash_alg, key.as_inner(), &data_hash) {
        Ok(s) => s,
        Err(_) => {
            trace!(domain = %request.domain, "signing failed");
            return SignOutcome::Failed("signing failed".into());
        }
    };

    format::append_signature_data(&mut value, &signature_data);

    let header = format!("{DKIM_SIGNATURE_NAME}:{value}\r\n");

    trace!(domain = %request.domain, "produced signature");

    let signature = DkimSignature {
        algorithm: request.algorithm,
        signature_data: signature_data.into(),
        body_hash: body_hash.clone(),
        canonicalization: request.canonicalization,
        domain: request.domain.clone(),
        signed_headers: request.signed_headers.clone().into(),
        identity: request
            .identity
            .clone()
            .unwrap_or_else(|| Identity::from_domain(request.domain.clone())),
        body_length,
        selector: request.selector.clone(),
        timestamp,
        expiration,
        copied_headers: None,
        ext_tags: request.extra_tags.clone().into(),
    };

    SignOutcome::Signed {
        signature,
        header: header.into(),
    }
}

fn sign_body_hash_key(request: &SignRequest) -> BodyHashKey {
    let length = match request.body_length {
        Some(BodyLength::Exact(n)) => Some(n),
        Some(BodyLength::MessageLength) | None => None,
    };

    (
        length,
        request.algorithm.hash_algorithm(),
        request.canonicalization.body,
    )
}

// Finds the blank line separating header and body, starting the scan at
// `from`. Returns the end of the header (after the last field line's
// terminator) and the start of the body. Tolerates bare LF everywhere.
fn find_body_boundary(buf: &[u8], from: usize) -> Option<(usize, usize)> {
    if buf.starts_with(b"\r\n") {
        return Some((0, 2));
    }
    if buf.starts_with(b"\n") {
        return Some((0, 1));
    }

    let mut i = from;
    while let Some(j) = buf[i..].iter().position(|&b| b == b'\n') {
        let nl = i + j;
        let rest = &buf[(nl + 1)..];
        if rest.starts_with(b"\n") {
            return Some((nl + 1, nl + 2));
        }
        if rest.starts_with(b"\r\n") {
            return Some((nl + 1, nl + 3));
        }
        i = nl + 1;
    }

    None
}

// Turns any bare LF into CRLF; lone CR is left alone.
fn normalize_line_endings(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut prev_cr = false;

    for &b in bytes {
        if b == b'\n' && !prev_cr {
            out.extend(b"\r\n");
        } else {
            out.push(b);
        }
        prev_cr = b == b'\r';
    }

    out
}

fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0, |t| t.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_body_boundary_ok() {
        assert_eq!(find_body_boundary(b"a: b\r\n\r\nbody", 0), Some((6, 8)));
        assert_eq!(find_body_boundary(b"a: b\n\nbody", 0), Some((5, 6)));
        assert_eq!(find_body_boundary(b"a: b\n\r\nbody", 0), Some((5, 7)));
        assert_eq!(find_body_boundary(b"\r\nbody", 0), Some((0, 2)));

        assert_eq!(find_body_boundary(b"a: b\r\nc: d\r\n", 0), None);
        assert_eq!(find_body_boundary(b"", 0), None);
    }

    #[test]
    fn normalize_line_endings_ok() {
        assert_eq!(normalize_line_endings(b"a\nb\r\nc\r"), b"a\r\nb\r\nc\r");
        assert_eq!(normalize_line_endings(b"\n"), b"\r\n");
    }

    #[test]
    fn status_codes_stable() {
        assert_eq!(Status::Valid.code(), 1);
        assert_eq!(Status::PermFail.code(), 0);
        assert_eq!(Status::TempFail.code(), -1);
        assert_eq!(Status::SoftFail.code(), -2);
        assert_eq!(Status::InvalidHeader.code(), -3);

        assert_eq!(Status::SoftFail.canonical_str(), "soft-fail");
    }
}
