//! Serialization of a *DKIM-Signature* header with deterministic line
//! folding.
//!
//! Known tags are emitted in the order `v a c d q s t x h l i z bh`,
//! followed by any additional tags sorted by name, followed by `b=`. The
//! first line holds 64 columns of content after `DKIM-Signature: `;
//! every line is at most 80 columns; continuation lines begin with a
//! single SP.

use crate::{
    header::FieldName,
    quoted_printable,
    signature::{Canonicalization, DKIM_SIGNATURE_NAME},
    signer::SignRequest,
    util::{self, CanonicalStr},
};

const LINE_WIDTH: usize = 80;

// All output is ASCII (domains are A-labels, everything else is
// Quoted-Printable-encoded), so columns can be counted in bytes.
struct Folder {
    out: String,
    col: usize,
}

impl Folder {
    fn new() -> Self {
        Self {
            out: String::new(),
            // the header name and colon occupy the start of the first line
            col: DKIM_SIGNATURE_NAME.len() + 1,
        }
    }

    // Writes a tag as an unbreakable unit, preceded by a separating SP.
    fn push_unit(&mut self, unit: &str) {
        debug_assert!(unit.is_ascii());

        if self.col + 1 + unit.len() <= LINE_WIDTH {
            self.out.push(' ');
            self.col += 1;
        } else {
            self.break_line();
        }
        self.out.push_str(unit);
        self.col += unit.len();
    }

    // Writes a tag whole if it fits on the current or on a fresh line,
    // otherwise breaks inside the value at column boundaries.
    fn push_breakable_unit(&mut self, unit: &str) {
        debug_assert!(unit.is_ascii());

        if self.col + 1 + unit.len() <= LINE_WIDTH {
            self.push_unit(unit);
            return;
        }

        self.break_line();

        let mut rest = unit;
        loop {
            let room = LINE_WIDTH - self.col;
            if rest.len() <= room {
                self.out.push_str(rest);
                self.col += rest.len();
                break;
            }
            let (chunk, tail) = rest.split_at(room.max(1));
            self.out.push_str(chunk);
            self.break_line();
            rest = tail;
        }
    }

    // Writes the h= tag, breaking only after colons so that no header name
    // is split by folding whitespace.
    fn push_signed_headers(&mut self, names: &[FieldName]) {
        let mut first = String::from("h=");
        first.push_str(names[0].as_ref());
        if names.len() == 1 {
            first.push(';');
        }
        self.push_unit(&first);

        for (i, name) in names.iter().enumerate().skip(1) {
            let last = i == names.len() - 1;

            // colon, name, and the final ';' as one piece
            let needed = 1 + name.as_ref().len() + usize::from(last);
            if self.col + needed > LINE_WIDTH {
                self.break_line();
            }

            self.out.push(':');
            self.out.push_str(name.as_ref());
            self.col += 1 + name.as_ref().len();
            if last {
                self.out.push(';');
                self.col += 1;
            }
        }
    }

    fn break_line(&mut self) {
        self.out.push_str("\r\n ");
        self.col = 1;
    }
}

/// Produces the header field value up to and including the final `b=`,
/// ready for header hashing.
pub fn format_without_signature_data(
    request: &SignRequest,
    timestamp: Option<u64>,
    expiration: Option<u64>,
    body_hash: &[u8],
    body_length: Option<u64>,
) -> String {
    let mut folder = Folder::new();

    folder.push_unit("v=1;");

    folder.push_unit(&format!("a={};", request.algorithm.canonical_str()));

    if request.canonicalization != Canonicalization::default() {
        folder.push_unit(&format!("c={};", request.canonicalization.canonical_str()));
    }

    folder.push_unit(&format!("d={};", request.domain));

    if request.query_method {
        folder.push_unit("q=dns/txt;");
    }

    folder.push_unit(&format!("s={};", request.selector));

    if let Some(t) = timestamp {
        folder.push_unit(&format!("t={t};"));
    }
    if let Some(x) = expiration {
        folder.push_unit(&format!("x={x};"));
    }

    folder.push_signed_headers(&request.signed_headers);

    if let Some(l) = body_length {
        folder.push_unit(&format!("l={l};"));
    }

    if let Some(identity) = &request.identity {
        let i = quoted_printable::encode(identity.to_string().as_bytes(), false);
        folder.push_breakable_unit(&format!("i={i};"));
    }

    if !request.copied_headers.is_empty() {
        // no effort to fold inside z=; the rare long value stays on one
        // line, which is still well-formed
        let z: Vec<_> = request
            .copied_headers
            .iter()
            .map(|(name, value)| {
                format!("{}:{}", name.as_ref(), quoted_printable::encode(value, true))
            })
            .collect();
        folder.push_unit(&format!("z={};", z.join("|")));
    }

    folder.push_breakable_unit(&format!("bh={};", util::encode_base64(body_hash)));

    let mut extra_tags: Vec<_> = request.extra_tags.iter().collect();
    extra_tags.sort_by(|(a, _), (b, _)| a.cmp(b));
    for (name, value) in extra_tags {
        folder.push_unit(&format!("{name}={value};"));
    }

    folder.push_unit("b=");

    folder.out
}

/// Appends the Base64 signature data after the trailing `b=`, wrapped at
/// the line width.
pub fn append_signature_data(value: &mut String, signature_data: &[u8]) {
    let b = util::encode_base64(signature_data);

    let mut col = match value.rsplit_once("\r\n") {
        Some((_, last_line)) => last_line.len(),
        None => DKIM_SIGNATURE_NAME.len() + 1 + value.len(),
    };

    let mut rest = b.as_str();
    while !rest.is_empty() {
        let room = LINE_WIDTH.saturating_sub(col);
        if room == 0 {
            value.push_str("\r\n ");
            col = 1;
            continue;
        }
        let n = room.min(rest.len());
        value.push_str(&rest[..n]);
        col += n;
        rest = &rest[n..];
    }
}
