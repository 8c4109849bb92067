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

use std::borrow::Cow;

/// Decodes quoted-printable encoding, as described by RFC 2045.
///
/// Encoded bytes and soft line breaks are both handled, the latter by
/// discarding (including any transport padding between the `=` and the line
/// ending). UNIX line endings are handled as well as DOS line endings.
///
/// This never fails. Invalid sequences are passed through untransformed, as
/// are 8-bit characters.
pub fn qp_decode(s: &[u8]) -> Cow<[u8]> {
    if !s.contains(&b'=') {
        return Cow::Borrowed(s);
    }

    let mut transformed = Vec::with_capacity(s.len());
    let mut ix = 0;
    while ix < s.len() {
        if b'=' != s[ix] {
            transformed.push(s[ix]);
            ix += 1;
            continue;
        }

        let tail = &s[ix + 1..];
        if let Some(skip) = soft_line_break(tail) {
            ix += 1 + skip;
        } else if tail.len() >= 2
            && tail[0].is_ascii_hexdigit()
            && tail[1].is_ascii_hexdigit()
        {
            transformed.push(hex_value(tail[0]) << 4 | hex_value(tail[1]));
            ix += 3;
        } else {
            transformed.push(b'=');
            ix += 1;
        }
    }

    Cow::Owned(transformed)
}

/// If `tail` (the bytes after an `=`) starts with optional whitespace and a
/// line ending, return the length of that sequence.
fn soft_line_break(tail: &[u8]) -> Option<usize> {
    let padding = tail
        .iter()
        .take_while(|&&b| b' ' == b || b'\t' == b)
        .count();
    let rest = &tail[padding..];
    if rest.starts_with(b"\r\n") {
        Some(padding + 2)
    } else if rest.starts_with(b"\n") {
        Some(padding + 1)
    } else {
        None
    }
}

fn hex_value(b: u8) -> u8 {
    match b {
        b'0'..=b'9' => b - b'0',
        b'a'..=b'f' => b - b'a' + 10,
        _ => b - b'A' + 10,
    }
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;

    fn assert_qp(expected: &[u8], input: &[u8]) {
        assert_eq!(expected, &qp_decode(input)[..]);
    }

    #[test]
    fn test_qp_decode() {
        assert_qp(b"hello world", b"hello world");
        assert_qp(b"\xabfoo", b"=ABfoo");
        assert_qp(b"fo\xabo", b"fo=abo");
        assert_qp(b"foo\xab", b"foo=AB");
        assert_qp(b"foo\xab\xcd", b"foo=AB=CD");

        assert_qp(b"foo", b"foo=\n");
        assert_qp(b"foobar", b"foo=\nbar");
        assert_qp(b"foobar", b"foo=\r\nbar");
        assert_qp(b"foobar", b"foo=  \r\nbar");

        assert_qp(b"foo=()bar", b"foo=()bar");
        assert_qp(b"foo=\xabbar", b"foo==ABbar");
        assert_qp(b"foo=A\xabbar", b"foo=A=ABbar");
        assert_qp(b"foo=+1", b"foo=+1");
        assert_qp("foo=ゑbar".as_bytes(), "foo=ゑbar".as_bytes());
        assert_qp(b"foo=", b"foo=");
    }

    proptest! {
        #[test]
        fn qp_decode_never_fails(
            s in prop::collection::vec(prop::num::u8::ANY, 0..40)
        ) {
            qp_decode(&s);
        }
    }
}
