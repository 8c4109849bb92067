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

//! Utilities for working with RFC 5322 header blocks and MIME parameters.

use chrono::prelude::*;
use encoding_rs::*;
use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, take, take_while},
    combinator::{map, map_opt},
    multi::{fold_many0, many0},
    sequence::{delimited, pair, preceded, separated_pair, terminated, tuple},
    IResult,
};

/// The header fields of a message or body part, unfolded, in their original
/// order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Headers {
    fields: Vec<(String, String)>,
}

impl Headers {
    /// Parse a raw header block.
    ///
    /// Lines which are neither a `name: value` field nor a continuation are
    /// ignored. 8-bit content is interpreted as UTF-8 (per RFC 6532), with
    /// invalid sequences replaced.
    pub fn parse(block: &[u8]) -> Self {
        let mut fields: Vec<(String, String)> = Vec::new();

        for line in block.split(|&b| b'\n' == b) {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if line.is_empty() {
                continue;
            }

            if b' ' == line[0] || b'\t' == line[0] {
                if let Some((_, value)) = fields.last_mut() {
                    value.push_str(&String::from_utf8_lossy(line));
                }
                continue;
            }

            let colon = match memchr::memchr(b':', line) {
                Some(colon) => colon,
                None => continue,
            };

            let name =
                String::from_utf8_lossy(&line[..colon]).trim().to_owned();
            if name.is_empty() || name.contains(' ') {
                continue;
            }

            let value =
                String::from_utf8_lossy(&line[colon + 1..]).into_owned();
            fields.push((name, value));
        }

        for (_, value) in &mut fields {
            *value = value.trim().to_owned();
        }

        Headers { fields }
    }

    /// Return the value of the first field called `name`, ignoring case.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v as &str)
    }
}

/// A header value of the form `value; name=param; ...`, as used by
/// `Content-Type` and `Content-Disposition`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParameterisedValue {
    /// The main value, lower-cased.
    pub value: String,
    /// Parameters with lower-cased names and unquoted values.
    params: Vec<(String, String)>,
}

impl ParameterisedValue {
    pub fn parse(raw: &str) -> Self {
        match parameterised_value(raw.as_bytes()) {
            Ok((_, (value, params))) => ParameterisedValue {
                value: String::from_utf8_lossy(trim(value))
                    .to_ascii_lowercase(),
                params: params.into_iter().flatten().collect(),
            },
            Err(_) => ParameterisedValue {
                value: raw.trim().to_ascii_lowercase(),
                params: vec![],
            },
        }
    }

    /// Return the raw value of the parameter called exactly `name`.
    pub fn raw_param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v as &str)
    }

    /// Return the value of parameter `name`, taking RFC 2231 extended
    /// (`name*`) and continued (`name*0`, `name*1*`, ...) forms into account.
    ///
    /// Extended forms take precedence over the plain parameter, since agents
    /// that send both use the plain one as an ASCII-only fallback.
    pub fn param(&self, name: &str) -> Option<String> {
        if let Some(extended) = self.raw_param(&format!("{}*", name)) {
            return Some(decode_extended(extended));
        }

        if let Some(continued) = self.continued_param(name) {
            return Some(continued);
        }

        self.raw_param(name).map(str::to_owned)
    }

    fn continued_param(&self, name: &str) -> Option<String> {
        let mut bytes = Vec::new();
        let mut charset: Option<&'static Encoding> = None;

        for ix in 0.. {
            let (segment, extended) =
                if let Some(s) = self.raw_param(&format!("{}*{}*", name, ix)) {
                    (s, true)
                } else if let Some(s) =
                    self.raw_param(&format!("{}*{}", name, ix))
                {
                    (s, false)
                } else {
                    break;
                };

            let mut segment = segment;
            if 0 == ix && extended {
                let (encoding, rest) = split_charset(segment);
                charset = Some(encoding);
                segment = rest;
            }

            if extended {
                bytes.extend(percent_decode(segment));
            } else {
                bytes.extend_from_slice(segment.as_bytes());
            }
        }

        if bytes.is_empty() && charset.is_none() {
            return None;
        }

        Some(
            charset
                .unwrap_or(UTF_8)
                .decode_with_bom_removal(&bytes)
                .0
                .into_owned(),
        )
    }
}

/// Parse the value of a `Date` header.
///
/// Trailing comments such as `(UTC)` are ignored.
pub fn parse_date(raw: &str) -> Option<DateTime<FixedOffset>> {
    let raw = raw.trim();
    let raw = match raw.find('(') {
        Some(paren) if raw.ends_with(')') => raw[..paren].trim_end(),
        _ => raw,
    };

    DateTime::parse_from_rfc2822(raw).ok()
}

/// Decode an RFC 2231 extended value, `charset'language'pct-encoded`.
fn decode_extended(value: &str) -> String {
    let (encoding, value) = split_charset(value);

    encoding
        .decode_with_bom_removal(&percent_decode(value))
        .0
        .into_owned()
}

fn split_charset(value: &str) -> (&'static Encoding, &str) {
    match extended_prefix(value.as_bytes()) {
        Ok((tail, charset)) => (
            Encoding::for_label_no_replacement(charset).unwrap_or(UTF_8),
            &value[value.len() - tail.len()..],
        ),
        Err(_) => (UTF_8, value),
    }
}

fn percent_decode(s: &str) -> Vec<u8> {
    let bytes = s.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut ix = 0;
    while ix < bytes.len() {
        if b'%' == bytes[ix]
            && ix + 2 < bytes.len()
            && bytes[ix + 1].is_ascii_hexdigit()
            && bytes[ix + 2].is_ascii_hexdigit()
        {
            decoded
                .push(hex_value(bytes[ix + 1]) << 4 | hex_value(bytes[ix + 2]));
            ix += 3;
        } else {
            decoded.push(bytes[ix]);
            ix += 1;
        }
    }
    decoded
}

fn hex_value(b: u8) -> u8 {
    match b {
        b'0'..=b'9' => b - b'0',
        b'a'..=b'f' => b - b'a' + 10,
        b'A'..=b'F' => b - b'A' + 10,
        _ => 0,
    }
}

// RFC 2045 5.1 parameter grammar, loosened the way real agents need: values
// which should have been quoted often contain spaces, and segments without
// `=` are ignored rather than rejected.

fn is_ws(b: u8) -> bool {
    b' ' == b || b'\t' == b || b'\r' == b || b'\n' == b
}

fn trim(mut s: &[u8]) -> &[u8] {
    while let Some((&b, tail)) = s.split_first() {
        if !is_ws(b) {
            break;
        }
        s = tail;
    }
    while let Some((&b, head)) = s.split_last() {
        if !is_ws(b) {
            break;
        }
        s = head;
    }
    s
}

fn quoted_pair(i: &[u8]) -> IResult<&[u8], &[u8]> {
    preceded(tag("\\"), take(1usize))(i)
}

fn quoted_string(i: &[u8]) -> IResult<&[u8], Vec<u8>> {
    delimited(
        tag("\""),
        fold_many0(
            alt((quoted_pair, is_not("\"\\"))),
            Vec::new(),
            |mut accum: Vec<u8>, piece: &[u8]| {
                accum.extend_from_slice(piece);
                accum
            },
        ),
        tag("\""),
    )(i)
}

// Anything up to the next `;`, possibly nothing.
fn segment(i: &[u8]) -> IResult<&[u8], &[u8]> {
    take_while(|b: u8| b';' != b)(i)
}

fn param_name(i: &[u8]) -> IResult<&[u8], String> {
    map_opt(is_not("=;"), |name| {
        let name = String::from_utf8_lossy(trim(name)).to_ascii_lowercase();
        if name.is_empty() {
            None
        } else {
            Some(name)
        }
    })(i)
}

fn param_value(i: &[u8]) -> IResult<&[u8], String> {
    preceded(
        take_while(is_ws),
        alt((
            // Junk after the closing quote is dropped
            map(terminated(quoted_string, segment), |v: Vec<u8>| {
                String::from_utf8_lossy(&v).into_owned()
            }),
            map(segment, |v| String::from_utf8_lossy(trim(v)).into_owned()),
        )),
    )(i)
}

fn parameter(i: &[u8]) -> IResult<&[u8], Option<(String, String)>> {
    alt((
        map(separated_pair(param_name, tag("="), param_value), Some),
        map(segment, |_| None),
    ))(i)
}

fn parameterised_value(
    i: &[u8],
) -> IResult<&[u8], (&[u8], Vec<Option<(String, String)>>)> {
    pair(segment, many0(preceded(tag(";"), parameter)))(i)
}

// RFC 2231 4 `charset'language'`, returning the charset.
fn extended_prefix(i: &[u8]) -> IResult<&[u8], &[u8]> {
    terminated(
        take_while(|b: u8| b'\'' != b),
        tuple((tag("'"), take_while(|b: u8| b'\'' != b), tag("'"))),
    )(i)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_unfolds_and_keeps_order() {
        let headers = Headers::parse(
            b"From: someone@example.com\r\n\
              Subject: a long\r\n \
              subject\r\n\
              X-Junk\r\n\
              subject: second\r\n",
        );
        assert_eq!(Some("someone@example.com"), headers.get("from"));
        assert_eq!(Some("a long subject"), headers.get("Subject"));
        assert_eq!(None, headers.get("X-Junk"));
        assert_eq!(None, headers.get("To"));
    }

    #[test]
    fn parameterised_values() {
        let ct = ParameterisedValue::parse(
            r#"Multipart/Mixed; Boundary="a;b \"c\""; charset=utf-8"#,
        );
        assert_eq!("multipart/mixed", ct.value);
        assert_eq!(Some("a;b \"c\""), ct.raw_param("boundary"));
        assert_eq!(Some("utf-8".to_owned()), ct.param("charset"));
        assert_eq!(None, ct.param("name"));

        let cd = ParameterisedValue::parse("attachment");
        assert_eq!("attachment", cd.value);
        assert_eq!(None, cd.param("filename"));
    }

    #[test]
    fn sloppy_parameters() {
        let cd = ParameterisedValue::parse(
            " Attachment ;junk; filename = My File.pdf ;; =x; size=12;",
        );
        assert_eq!("attachment", cd.value);
        assert_eq!(Some("My File.pdf".to_owned()), cd.param("filename"));
        assert_eq!(Some("12"), cd.raw_param("size"));
        assert_eq!(None, cd.raw_param("junk"));
        assert_eq!(None, cd.raw_param(""));

        let cd = ParameterisedValue::parse(
            "attachment; filename=\"a.txt\" trailing; name=\"unterminated",
        );
        assert_eq!(Some("a.txt"), cd.raw_param("filename"));
        assert_eq!(Some("\"unterminated"), cd.raw_param("name"));

        let ct = ParameterisedValue::parse("");
        assert_eq!("", ct.value);
        assert_eq!(None, ct.raw_param("charset"));
    }

    #[test]
    fn charset_prefixes() {
        let (encoding, rest) = split_charset("iso-8859-1'de'Gr%FC");
        assert_eq!(WINDOWS_1252, encoding);
        assert_eq!("Gr%FC", rest);

        let (encoding, rest) = split_charset("''plain");
        assert_eq!(UTF_8, encoding);
        assert_eq!("plain", rest);

        let (encoding, rest) = split_charset("no-prefix");
        assert_eq!(UTF_8, encoding);
        assert_eq!("no-prefix", rest);
    }

    #[test]
    fn rfc2231_parameters() {
        let cd = ParameterisedValue::parse(
            "attachment; filename=\"fallback.pdf\"; \
             filename*=utf-8''My%20File%20%E2%82%AC.pdf",
        );
        assert_eq!(Some("My File €.pdf".to_owned()), cd.param("filename"));

        let cd = ParameterisedValue::parse(
            "attachment; filename*0*=iso-8859-1'de'Gr%FC; \
             filename*1=\"nde.txt\"",
        );
        assert_eq!(Some("Gründe.txt".to_owned()), cd.param("filename"));

        let cd = ParameterisedValue::parse(
            "attachment; filename*0=\"long \"; filename*1=\"name.txt\"",
        );
        assert_eq!(Some("long name.txt".to_owned()), cd.param("filename"));
    }

    #[test]
    fn dates() {
        let date = parse_date("Tue, 1 Mar 2022 10:30:00 +0100").unwrap();
        assert_eq!("20220301", date.format("%Y%m%d").to_string());

        let date = parse_date("Tue, 1 Mar 2022 23:30:00 -0800 (PST)").unwrap();
        // The local date of the sender is what counts
        assert_eq!("20220301", date.format("%Y%m%d").to_string());

        assert!(parse_date("1 Mar 2022 10:30:00 GMT").is_some());
        assert!(parse_date("yesterday").is_none());
    }
}
