pub mod common;

use common::*;
use stepdkim::{Config, DnsCache, Engine, SignRequest, Status};

const MESSAGE: &[u8] = b"From: me\nTo: you\nSubject: whatever\n\nHi\n";

fn dns() -> Vec<(&'static str, stepdkim::DnsEntry)> {
    vec![("good._domainkey.example.com", key_record_txt().as_str().into())]
}

#[test]
fn tampered_body() {
    let header = sign_message("d=example.com; s=good; h=From:To:Subject", MESSAGE);

    let message = with_signed_header(&header, b"From: me\nTo: you\nSubject: whatever\n\nBye\n");
    let results = verify_message(&message, dns());

    assert_eq!(results[0].status, Some(Status::PermFail));
    assert_eq!(results[0].error.as_deref(), Some("body hash mismatch"));
}

#[test]
fn tampered_signed_header() {
    let header = sign_message("d=example.com; s=good; h=From:To:Subject", MESSAGE);

    let message = with_signed_header(&header, b"From: me\nTo: you\nSubject: changed\n\nHi\n");
    let results = verify_message(&message, dns());

    assert_eq!(results[0].status, Some(Status::PermFail));
    assert_eq!(results[0].error.as_deref(), Some("header sig mismatch"));
}

#[test]
fn unsigned_header_may_change() {
    let header = sign_message("d=example.com; s=good; h=From:Subject", MESSAGE);

    let message = with_signed_header(&header, b"From: me\nTo: somebody else\nSubject: whatever\n\nHi\n");
    let results = verify_message(&message, dns());

    assert_eq!(results[0].status, Some(Status::Valid));
}

#[test]
fn testing_key_softens_failure() {
    let header = sign_message("d=example.com; s=good; h=From:To:Subject", MESSAGE);

    let record = format!("v=DKIM1; k=rsa; t=y; p={}", public_key_base64());

    let message = with_signed_header(&header, b"From: me\nTo: you\nSubject: whatever\n\nBye\n");
    let results = verify_message(&message, vec![("good._domainkey.example.com", record.as_str().into())]);

    assert_eq!(results[0].status, Some(Status::SoftFail));
    assert_eq!(results[0].error.as_deref(), Some("body hash mismatch"));
}

#[test]
fn revoked_key() {
    let header = sign_message("d=example.com; s=good; h=From:To:Subject", MESSAGE);

    let message = with_signed_header(&header, MESSAGE);
    let results =
        verify_message(&message, vec![("good._domainkey.example.com", "v=DKIM1; p=".into())]);

    assert_eq!(results[0].status, Some(Status::PermFail));
    assert_eq!(results[0].error.as_deref(), Some("key revoked"));
}

#[test]
fn hash_algorithm_not_allowed() {
    let header = sign_message(
        "d=example.com; s=good; h=From:To:Subject; a=rsa-sha256",
        MESSAGE,
    );

    let record = format!("v=DKIM1; k=rsa; h=sha1; p={}", public_key_base64());

    let message = with_signed_header(&header, MESSAGE);
    let results = verify_message(
        &message,
        vec![("good._domainkey.example.com", record.as_str().into())],
    );

    assert_eq!(results[0].status, Some(Status::PermFail));
    assert_eq!(results[0].error.as_deref(), Some("hash algorithm not allowed"));
}

#[test]
fn strict_key_requires_identity_domain_match() {
    let header = sign_message(
        "d=example.com; s=good; h=From:To:Subject; i=@sub.example.com",
        MESSAGE,
    );

    let record = format!("v=DKIM1; k=rsa; t=s; p={}", public_key_base64());

    let message = with_signed_header(&header, MESSAGE);
    let results = verify_message(
        &message,
        vec![("good._domainkey.example.com", record.as_str().into())],
    );

    assert_eq!(results[0].status, Some(Status::PermFail));
    assert_eq!(results[0].error.as_deref(), Some("identity does not match domain"));
}

#[test]
fn chunked_input_is_equivalent() {
    let header = sign_message(
        "d=example.com; s=good; h=From:To:Subject; c=relaxed/relaxed",
        MESSAGE,
    );
    let message = with_signed_header(&header, MESSAGE);

    // whole message at once
    let whole = verify_message(&message, dns());
    assert_eq!(whole[0].status, Some(Status::Valid));

    // byte by byte
    let mut cache = DnsCache::new();
    cache.insert("good._domainkey.example.com", key_record_txt().as_str());
    let mut engine = Engine::with_config(Config {
        dns: cache,
        ..Default::default()
    });

    let mut results = None;
    for b in &message {
        results = engine.append(std::slice::from_ref(b));
    }
    assert!(results.is_none(), "engine must wait for end of body");

    let results = engine.append("").expect("complete");
    assert_eq!(results[0].status, Some(Status::Valid));
}

#[test]
fn signing_is_independent_of_chunking() {
    let template = "d=example.com; s=good; h=From:To:Subject; c=relaxed/relaxed; t=1686737001";

    let header_whole = sign_message(template, MESSAGE);

    let request = SignRequest::from_tag_list(template, RSA2048_KEY_PEM).unwrap();
    let mut engine = Engine::with_config(Config {
        sign: vec![request],
        ..Default::default()
    });
    for chunk in MESSAGE.chunks(3) {
        engine.append(chunk);
    }
    let results = engine.append("").expect("complete");

    assert_eq!(
        results[0].signed_header.as_deref(),
        Some(&*header_whole),
        "chunking must not affect the produced signature"
    );
}

#[test]
fn body_length_cap_honored() {
    // l= covers only the first canonicalized body bytes; the tail may
    // change freely
    let message: &[u8] = b"From: me\nTo: you\n\nHi\nthere\n";
    let header = sign_message("d=example.com; s=good; h=From:To; l=4", message);

    assert!(header.contains("l=4;"), "declared length in {header}");

    let altered: &[u8] = b"From: me\nTo: you\n\nHi\nsomething else\n";
    let full = with_signed_header(&header, altered);
    let results = verify_message(&full, dns());

    assert_eq!(results[0].status, Some(Status::Valid));
}

#[test]
fn message_without_body() {
    let header = sign_message("d=example.com; s=good; h=From:To:Subject", b"From: me\nTo: you\nSubject: whatever\n");

    // an empty body canonicalizes to a single CRLF on both ends
    let message = with_signed_header(&header, b"From: me\nTo: you\nSubject: whatever\n\n");
    let results = verify_message(&message, dns());

    assert_eq!(results[0].status, Some(Status::Valid));
}
