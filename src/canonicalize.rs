//! Canonicalization transforms.
//!
//! See RFC 6376, section 3.4.

use crate::signature::CanonicalizationAlgorithm;
use bstr::ByteSlice;

const SP: u8 = b' ';
const CR: u8 = b'\r';
const LF: u8 = b'\n';
const CRLF: [u8; 2] = [CR, LF];

// which state are we in = what did we see last?
#[derive(Copy, Clone)]
enum CanonState {
    Start, // at a line boundary (including before any input)
    Cr,
    Wsp,
    WspCr,
    Text,
}

/// A streaming canonicalizer using the body canonicalization algorithm.
///
/// Input arrives in arbitrary chunks. Two pieces of state bridge chunk
/// boundaries: the byte-level [`CanonState`] covering bytes after the last
/// line terminator, and the run of empty lines that may yet turn out to be
/// trailing (`empty_lines`). Empty lines are only released once a later
/// non-empty line arrives; at end of body the run is discarded.
///
/// A lone LF is accepted as a line terminator and normalized to CRLF. A
/// lone CR is ordinary content.
pub struct BodyCanonicalizer {
    kind: CanonicalizationAlgorithm,
    state: CanonState,
    blank_line: bool,   // whether currently on an empty or blank line
    empty_lines: usize, // buffered run of empty lines
    emitted: bool,      // whether any output has been produced
}

impl BodyCanonicalizer {
    pub fn simple() -> Self {
        Self::new(CanonicalizationAlgorithm::Simple)
    }

    pub fn relaxed() -> Self {
        Self::new(CanonicalizationAlgorithm::Relaxed)
    }

    pub fn new(kind: CanonicalizationAlgorithm) -> Self {
        Self {
            kind,
            state: CanonState::Start,
            blank_line: true,
            empty_lines: 0,
            emitted: false,
        }
    }

    // One state machine serves both algorithms: under `simple`, WSP is
    // ordinary content and the Wsp/WspCr states are never entered.
    pub fn canonicalize_chunk(&mut self, bytes: &[u8]) -> Vec<u8> {
        let relaxed = self.kind == CanonicalizationAlgorithm::Relaxed;

        let mut result = vec![];

        for &b in bytes {
            match self.state {
                CanonState::Start | CanonState::Text => {
                    if relaxed && is_wsp(b) {
                        self.state = CanonState::Wsp;
                    } else if b == CR {
                        self.state = CanonState::Cr;
                    } else if b == LF {
                        self.end_line(&mut result);
                        self.state = CanonState::Start;
                    } else if matches!(self.state, CanonState::Start) {
                        self.push_content(&mut result, b);
                        self.state = CanonState::Text;
                    } else {
                        result.push(b);
                    }
                }
                CanonState::Wsp => {
                    if b == CR {
                        self.state = CanonState::WspCr;
                    } else if b == LF {
                        // trailing WSP is dropped
                        self.end_line(&mut result);
                        self.state = CanonState::Start;
                    } else if !is_wsp(b) {
                        // a WSP run collapses to a single SP
                        self.push_content(&mut result, SP);
                        result.push(b);
                        self.state = CanonState::Text;
                    }
                }
                CanonState::Cr => {
                    if b == LF {
                        self.end_line(&mut result);
                        self.state = CanonState::Start;
                        continue;
                    }

                    // lone CR is content
                    self.push_content(&mut result, CR);

                    if relaxed && is_wsp(b) {
                        self.state = CanonState::Wsp;
                    } else if b != CR {
                        result.push(b);
                        self.state = CanonState::Text;
                    }
                }
                CanonState::WspCr => {
                    if b == LF {
                        // the WSP before the terminator is trailing, drop it
                        self.end_line(&mut result);
                        self.state = CanonState::Start;
                        continue;
                    }

                    self.push_content(&mut result, SP);
                    result.push(CR);

                    if b == CR {
                        self.state = CanonState::Cr;
                    } else if is_wsp(b) {
                        self.state = CanonState::Wsp;
                    } else {
                        result.push(b);
                        self.state = CanonState::Text;
                    }
                }
            }
        }

        result
    }

    /// Flushes the final line and terminates the canonicalized body.
    ///
    /// The canonicalized body ends with exactly one CRLF; a body with no
    /// content at all (empty, or consisting of blank lines only) becomes a
    /// single CRLF.
    pub fn finish(mut self) -> Vec<u8> {
        let mut result = vec![];

        match self.state {
            CanonState::Start => {}
            CanonState::Cr => {
                // dangling CR is content, terminate its line
                self.push_content(&mut result, CR);
                result.extend(CRLF);
            }
            CanonState::Text => {
                result.extend(CRLF);
            }
            CanonState::Wsp => {
                // trailing WSP dropped; terminate the line only if it had
                // any content before the whitespace
                if !self.blank_line {
                    result.extend(CRLF);
                }
            }
            CanonState::WspCr => {
                self.push_content(&mut result, SP);
                result.push(CR);
                result.extend(CRLF);
            }
        }

        if !self.emitted && result.is_empty() {
            return CRLF.to_vec();
        }

        result
    }

    // A completed line: either buffer it (empty line, may be trailing) or
    // terminate the emitted content.
    fn end_line(&mut self, result: &mut Vec<u8>) {
        if self.blank_line {
            self.empty_lines += 1;
        } else {
            result.extend(CRLF);
            self.blank_line = true;
        }
    }

    // First content byte of a line: release any buffered empty lines, which
    // turned out not to be trailing after all.
    fn push_content(&mut self, result: &mut Vec<u8>, b: u8) {
        for _ in 0..self.empty_lines {
            result.extend(CRLF);
        }
        self.empty_lines = 0;
        self.blank_line = false;
        self.emitted = true;
        result.push(b);
    }
}

fn is_wsp(b: u8) -> bool {
    matches!(b, b'\t' | b' ')
}

/// Canonicalizes a single header field into the result vector, without a
/// trailing CRLF.
pub fn canonicalize_header(
    result: &mut Vec<u8>,
    algorithm: CanonicalizationAlgorithm,
    name: impl AsRef<str>,
    value: impl AsRef<[u8]>,
) {
    let name = name.as_ref();
    let value = value.as_ref();

    match algorithm {
        CanonicalizationAlgorithm::Simple => {
            result.extend(name.bytes());
            result.push(b':');
            result.extend(value);
        }
        CanonicalizationAlgorithm::Relaxed => {
            result.extend(name.to_ascii_lowercase().bytes());
            result.push(b':');
            canonicalize_header_value_relaxed(result, value);
        }
    }
}

// Unfolds the value (CRLF before WSP simply counts as whitespace), reduces
// every whitespace run to a single SP, and strips whitespace at both ends.
fn canonicalize_header_value_relaxed(result: &mut Vec<u8>, value: &[u8]) {
    fn is_space(c: char) -> bool {
        matches!(c, ' ' | '\t' | '\r' | '\n')
    }

    let value = value.trim_with(is_space);

    let mut compressing = false;
    for &b in value {
        if is_space(b.into()) {
            compressing = true;
        } else {
            if compressing {
                result.push(SP);
                compressing = false;
            }
            result.push(b);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bstr::BStr;

    #[test]
    fn canonicalize_header_relaxed_ok() {
        let mut result = vec![];
        canonicalize_header(
            &mut result,
            CanonicalizationAlgorithm::Relaxed,
            "SubJect",
            b" Fri 24\r\n\tfoo  bar ",
        );

        assert_eq!(BStr::new(&result), BStr::new(b"subject:Fri 24 foo bar"));
    }

    #[test]
    fn canonicalize_header_simple_ok() {
        let mut result = vec![];
        canonicalize_header(
            &mut result,
            CanonicalizationAlgorithm::Simple,
            "SubJect",
            b" Fri 24\r\n\tfoo  bar ",
        );

        assert_eq!(BStr::new(&result), BStr::new(b"SubJect: Fri 24\r\n\tfoo  bar "));
    }

    #[test]
    fn body_canonicalize_simple_ok() {
        let bc = BodyCanonicalizer::simple();

        let body = canonicalize_chunks(
            bc,
            &[b"well  hello \r\n", b"\r\n what agi \r\n\r\n", b"\r\n"],
        );

        assert_eq!(body, b"well  hello \r\n\r\n what agi \r\n");
    }

    #[test]
    fn body_canonicalize_relaxed_basic() {
        let bc = BodyCanonicalizer::relaxed();

        let body = canonicalize_chunks(
            bc,
            &[b"well  hello \r\n", b"\r\n what agi \r\n\r\n", b"\r\n"],
        );

        assert_eq!(body, b"well hello\r\n\r\n what agi\r\n");
    }

    #[test]
    fn body_canonicalize_relaxed_small_chunks() {
        let bc = BodyCanonicalizer::relaxed();

        let body = canonicalize_chunks(
            bc,
            &[
                b"well ",
                b" hello ",
                b"\r",
                b"\n\r",
                b"\n what agi \r\n\r\n",
                b"\r\n",
            ],
        );

        assert_eq!(body, b"well hello\r\n\r\n what agi\r\n");
    }

    #[test]
    fn body_canonicalize_bare_lf() {
        let bc = BodyCanonicalizer::simple();

        let body = canonicalize_chunks(bc, &[b"one\ntwo \n\nthree\r\n\n"]);

        assert_eq!(body, b"one\r\ntwo \r\n\r\nthree\r\n");
    }

    #[test]
    fn body_canonicalize_relaxed_bare_lf() {
        let bc = BodyCanonicalizer::relaxed();

        let body = canonicalize_chunks(bc, &[b"one  two\t\n", b"three \n\n"]);

        assert_eq!(body, b"one two\r\nthree\r\n");
    }

    #[test]
    fn body_canonicalize_empty() {
        let bc = BodyCanonicalizer::simple();
        assert_eq!(canonicalize_chunks(bc, &[]), b"\r\n");

        let bc = BodyCanonicalizer::relaxed();
        assert_eq!(canonicalize_chunks(bc, &[b""]), b"\r\n");
    }

    #[test]
    fn body_canonicalize_blank_lines_only() {
        let bc = BodyCanonicalizer::simple();
        assert_eq!(canonicalize_chunks(bc, &[b"\r\n\r\n\r\n"]), b"\r\n");

        let bc = BodyCanonicalizer::relaxed();
        assert_eq!(canonicalize_chunks(bc, &[b"  \r\n", b"\t\r\n"]), b"\r\n");
    }

    #[test]
    fn body_canonicalize_initial_empty_lines() {
        let bc = BodyCanonicalizer::relaxed();

        let body = canonicalize_chunks(bc, &[b"\r\n\r\n", b"\ra \r", b"\nb  ", b"c"]);

        assert_eq!(body, b"\r\n\r\n\ra\r\nb c\r\n");
    }

    #[test]
    fn body_canonicalize_trailing_wsp_fragment() {
        let bc = BodyCanonicalizer::relaxed();

        let body = canonicalize_chunks(bc, &[b"a\r\n  "]);

        assert_eq!(body, b"a\r\n");
    }

    #[test]
    fn body_canonicalize_idempotent() {
        let input: &[&[u8]] = &[b"x  y \r\n\r\nz\n", b"\n\n"];

        let once = canonicalize_chunks(BodyCanonicalizer::relaxed(), input);
        let twice = canonicalize_chunks(BodyCanonicalizer::relaxed(), &[&once]);

        assert_eq!(once, twice);
    }

    fn canonicalize_chunks(mut bc: BodyCanonicalizer, chunks: &[&[u8]]) -> Vec<u8> {
        let mut result = vec![];
        for c in chunks {
            result.extend(bc.canonicalize_chunk(c));
        }
        result.extend(bc.finish());
        result
    }
}
