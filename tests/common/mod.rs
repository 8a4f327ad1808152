use stepdkim::{Config, DnsCache, DnsEntry, Engine, SignRequest, SignatureResult};

pub const RSA2048_KEY_PEM: &str = include_str!("../keys/rsa2048.pem");
pub const RSA2048_PUB_PEM: &str = include_str!("../keys/rsa2048.pub.pem");
pub const RSA1024_KEY_PEM: &str = include_str!("../keys/rsa1024.pem");

// Public counterpart of the RSA-1024 key, serving as "some other key".
pub const RSA1024_PUBLIC_KEY_BASE64: &str = concat!(
    "MIGfMA0GCSqGSIb3DQEBAQUAA4GNADCBiQ",
    "KBgQDwIRP/UC3SBsEmGqZ9ZJW3/DkMoGeLnQg1fWn7/zYt",
    "IxN2SnFCjxOCKG9v3b4jYfcTNh5ijSsq631uBItLa7od+v",
    "/RtdC2UzJ1lWT947qR+Rcac2gbto/NMqJ0fzfVjH4OuKhi",
    "tdY9tf6mcwGjaNBcWToIMmPSPDdQPNUYckcQ2QIDAQAB",
);

/// The Base64 SubjectPublicKeyInfo of the RSA-2048 test key, as installed
/// in a key record's *p=* tag.
pub fn public_key_base64() -> String {
    RSA2048_PUB_PEM
        .lines()
        .filter(|line| !line.starts_with("-----"))
        .collect()
}

pub fn key_record_txt() -> String {
    format!("v=DKIM1; k=rsa; p={}", public_key_base64())
}

/// Signs `message` with a template given in tag-list form and the RSA-2048
/// test key, returning the signed header line.
pub fn sign_message(template: &str, message: &[u8]) -> Box<str> {
    let request = SignRequest::from_tag_list(template, RSA2048_KEY_PEM).expect("valid template");

    let mut engine = Engine::with_config(Config {
        sign: vec![request],
        ..Default::default()
    });

    let results = run_message(&mut engine, message);

    assert_eq!(results.len(), 1);
    let result = results.into_iter().next().unwrap();
    assert_eq!(
        (result.status, &result.error),
        (Some(stepdkim::Status::Valid), &None),
        "signing failed"
    );

    result.signed_header.expect("signed header present")
}

/// Verifies `message` against the given DNS entries and returns the result
/// list.
pub fn verify_message(message: &[u8], dns: Vec<(&str, DnsEntry)>) -> Vec<SignatureResult> {
    let mut cache = DnsCache::new();
    for (name, entry) in dns {
        cache.insert(name, entry);
    }

    let mut engine = Engine::with_config(Config {
        dns: cache,
        ..Default::default()
    });

    run_message(&mut engine, message)
}

/// Feeds a whole message to the engine, ending the body, and returns the
/// result list.
pub fn run_message(engine: &mut Engine, message: &[u8]) -> Vec<SignatureResult> {
    engine.append(message);
    engine.append("").expect("message complete")
}

/// Prepends the signed header line to the original message bytes.
pub fn with_signed_header(signed_header: &str, message: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(signed_header.len() + message.len());
    out.extend(signed_header.as_bytes());
    out.extend(message);
    out
}
