//-
// Copyright (c) 2024, The Miltonmail developers
//
// This file is part of Miltonmail.
//
// Miltonmail is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Miltonmail is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for
// more details.
//
// You should have received a copy of the GNU General Public License along with
// Miltonmail. If not, see <http://www.gnu.org/licenses/>.

//! A tree model of a MIME message.
//!
//! Messages are parsed eagerly into a tree of `Part`s. Composite parts
//! (`multipart/*`) hold their children; everything else, including
//! `message/rfc822`, is a leaf holding its still-encoded body.

use std::borrow::Cow;

use chrono::prelude::*;

use super::header::{self, Headers, ParameterisedValue};
use super::quoted_printable::qp_decode;

const MAX_RECURSION: u32 = 20;
const MAX_PARTS: u32 = 1000;

/// A parsed internet message.
#[derive(Clone, Debug)]
pub struct Message {
    root: Part,
}

/// A node of the MIME tree.
#[derive(Clone, Debug)]
pub enum Part {
    Leaf(Leaf),
    Multipart(Multipart),
}

/// A part with a body and no children.
#[derive(Clone, Debug)]
pub struct Leaf {
    pub headers: Headers,
    body: Vec<u8>,
}

/// A `multipart/*` part.
#[derive(Clone, Debug)]
pub struct Multipart {
    pub headers: Headers,
    pub parts: Vec<Part>,
}

/// The declared role of a part.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    Inline,
    Attachment,
    /// Some other disposition type.
    Other,
    /// No `Content-Disposition` header.
    None,
}

impl Message {
    pub fn parse(raw: &[u8]) -> Self {
        let mut part_count = 0;
        Message {
            root: parse_part(raw, 0, &mut part_count),
        }
    }

    /// The top-level header block.
    pub fn headers(&self) -> &Headers {
        self.root.headers()
    }

    /// The value of the `Date` header, if present and valid.
    pub fn date(&self) -> Option<DateTime<FixedOffset>> {
        self.headers().get("Date").and_then(header::parse_date)
    }

    /// Every leaf of the MIME tree, depth-first in document order.
    pub fn leaves(&self) -> Vec<&Leaf> {
        let mut leaves = Vec::new();
        let mut stack = vec![&self.root];
        while let Some(part) = stack.pop() {
            match *part {
                Part::Leaf(ref leaf) => leaves.push(leaf),
                Part::Multipart(ref multi) => {
                    stack.extend(multi.parts.iter().rev())
                }
            }
        }
        leaves
    }
}

impl Part {
    pub fn headers(&self) -> &Headers {
        match *self {
            Part::Leaf(ref leaf) => &leaf.headers,
            Part::Multipart(ref multi) => &multi.headers,
        }
    }
}

impl Leaf {
    pub fn disposition(&self) -> Disposition {
        match self.headers.get("Content-Disposition") {
            None => Disposition::None,
            Some(raw) => match &ParameterisedValue::parse(raw).value as &str {
                "attachment" => Disposition::Attachment,
                "inline" => Disposition::Inline,
                _ => Disposition::Other,
            },
        }
    }

    /// The file name of this part, still carrying any encoded words.
    ///
    /// The `filename` parameter of `Content-Disposition` is preferred; the
    /// `name` parameter of `Content-Type` is used otherwise.
    pub fn filename(&self) -> Option<String> {
        self.headers
            .get("Content-Disposition")
            .and_then(|cd| ParameterisedValue::parse(cd).param("filename"))
            .or_else(|| {
                self.headers
                    .get("Content-Type")
                    .and_then(|ct| ParameterisedValue::parse(ct).param("name"))
            })
            .filter(|name| !name.trim().is_empty())
    }

    /// The body with its content transfer encoding removed.
    ///
    /// Returns `None` if the body is declared base64 but cannot be decoded.
    pub fn payload(&self) -> Option<Cow<[u8]>> {
        let cte = self
            .headers
            .get("Content-Transfer-Encoding")
            .map(|cte| cte.trim().to_ascii_lowercase());

        match cte.as_deref() {
            Some("base64") => {
                let cleaned: Vec<u8> = self
                    .body
                    .iter()
                    .copied()
                    .filter(|&b| {
                        b.is_ascii_alphanumeric() || b'+' == b || b'/' == b
                    })
                    .collect();
                base64::decode_config(&cleaned, base64::STANDARD_NO_PAD)
                    .ok()
                    .map(Cow::Owned)
            }
            Some("quoted-printable") => Some(qp_decode(self.raw_body())),
            _ => Some(Cow::Borrowed(self.raw_body())),
        }
    }

    /// The body exactly as it appears in the message.
    fn raw_body(&self) -> &[u8] {
        &self.body
    }
}

fn parse_part(raw: &[u8], depth: u32, part_count: &mut u32) -> Part {
    *part_count += 1;

    let (header_block, body) = split_header(raw);
    let headers = Headers::parse(header_block);

    let boundary = headers
        .get("Content-Type")
        .map(ParameterisedValue::parse)
        .filter(|ct| ct.value.starts_with("multipart/"))
        .and_then(|ct| ct.param("boundary"))
        .filter(|b| !b.is_empty());

    let boundary = match boundary {
        Some(b) if depth < MAX_RECURSION && *part_count < MAX_PARTS => b,
        _ => {
            return Part::Leaf(Leaf {
                headers,
                body: body.to_vec(),
            })
        }
    };

    let mut parts = Vec::new();
    for child in split_multipart(body, boundary.as_bytes()) {
        if *part_count >= MAX_PARTS {
            break;
        }
        parts.push(parse_part(child, depth + 1, part_count));
    }

    Part::Multipart(Multipart { headers, parts })
}

/// Split `raw` into the header block and the body.
///
/// A part which starts with a blank line has no headers. A part with no
/// blank line at all is entirely header.
fn split_header(raw: &[u8]) -> (&[u8], &[u8]) {
    if raw.starts_with(b"\r\n") {
        return (&[], &raw[2..]);
    }
    if raw.starts_with(b"\n") {
        return (&[], &raw[1..]);
    }

    let mut start = 0;
    while let Some(nl) = memchr::memchr(b'\n', &raw[start..]) {
        let line_end = start + nl + 1;
        let rest = &raw[line_end..];
        if rest.starts_with(b"\r\n") {
            return (&raw[..line_end], &rest[2..]);
        }
        if rest.starts_with(b"\n") {
            return (&raw[..line_end], &rest[1..]);
        }
        start = line_end;
    }

    (raw, &[])
}

/// Split a multipart body into the raw content of each child part.
///
/// The preamble and epilogue are discarded, as is the line ending which
/// precedes each delimiter line. A missing close delimiter ends the last
/// part at the end of the body.
fn split_multipart<'a>(body: &'a [u8], boundary: &[u8]) -> Vec<&'a [u8]> {
    let mut children = Vec::new();
    let mut current: Option<usize> = None;
    let mut line_start = 0;

    while line_start < body.len() {
        let line_end = memchr::memchr(b'\n', &body[line_start..])
            .map(|nl| line_start + nl + 1)
            .unwrap_or_else(|| body.len());
        let line = &body[line_start..line_end];

        if let Some(closing) = delimiter_line(line, boundary) {
            if let Some(start) = current.take() {
                children.push(trim_final_eol(&body[start..line_start]));
            }

            if closing {
                return children;
            }

            current = Some(line_end);
        }

        line_start = line_end;
    }

    if let Some(start) = current {
        children.push(&body[start.min(body.len())..]);
    }

    children
}

/// If `line` is a delimiter line for `boundary`, return whether it is the
/// close delimiter.
fn delimiter_line(line: &[u8], boundary: &[u8]) -> Option<bool> {
    let rest = line.strip_prefix(b"--")?.strip_prefix(boundary)?;
    let (closing, rest) = match rest.strip_prefix(b"--") {
        Some(rest) => (true, rest),
        None => (false, rest),
    };

    if rest.iter().all(|&b| b.is_ascii_whitespace()) {
        Some(closing)
    } else {
        None
    }
}

fn trim_final_eol(s: &[u8]) -> &[u8] {
    let s = s.strip_suffix(b"\n").unwrap_or(s);
    s.strip_suffix(b"\r").unwrap_or(s)
}
