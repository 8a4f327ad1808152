// Parsing utilities shared by the tag-list and Quoted-Printable parsers.

pub fn strip_suffix<'a>(s: &'a str, suffix: &str) -> &'a str {
    debug_assert!(s.ends_with(suffix));
    &s[..(s.len() - suffix.len())]
}

const CRLF: &str = "\r\n";

// FWS = ([*WSP CRLF] 1*WSP)
pub fn strip_fws(input: &str) -> Option<&str> {
    let leading = strip_wsp(input);

    match leading.unwrap_or(input).strip_prefix(CRLF) {
        // whitespace continuing on the next line
        Some(s) => strip_wsp(s),
        None => leading,
    }
}

fn strip_wsp(input: &str) -> Option<&str> {
    input
        .strip_prefix(is_wsp)
        .map(|s| s.trim_start_matches(is_wsp))
}

// RFC 5234, appendix B.1
fn is_wsp(c: char) -> bool {
    matches!(c, ' ' | '\t')
}
