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

//! Conversion between UTF-8 folder names and IMAP's "modified UTF-7"
//! (RFC 3501 § 5.1.3), which is what goes over the wire.

use std::borrow::Cow;

/// Encode a UTF-8 folder name for the wire.
///
/// The result is minimal: printable ASCII is always sent directly, `&` is
/// escaped as `&-`, and each run of other characters becomes one shifted
/// group with an explicit shift-out.
pub fn encode(name: &str) -> Cow<'_, str> {
    if name.bytes().all(|b| is_direct(b) && b'&' != b) {
        return Cow::Borrowed(name);
    }

    let mut encoded = String::with_capacity(name.len() * 2);
    let mut pending = Vec::<u16>::new();
    let mut units = [0u16; 2];

    for ch in name.chars() {
        if ch.is_ascii() && is_direct(ch as u8) {
            flush_shifted(&mut encoded, &mut pending);
            if '&' == ch {
                encoded.push_str("&-");
            } else {
                encoded.push(ch);
            }
        } else {
            pending.extend_from_slice(ch.encode_utf16(&mut units));
        }
    }

    flush_shifted(&mut encoded, &mut pending);
    Cow::Owned(encoded)
}

/// Decode a folder name received from the server.
///
/// Decoding is permissive. Shifted groups which are not valid base64 or
/// valid UTF-16 are passed through as-is rather than rejected, since the
/// name must still round-trip back to the server unchanged.
pub fn decode(wire: &str) -> Cow<'_, str> {
    if !wire.contains('&') {
        return Cow::Borrowed(wire);
    }

    let mut decoded = String::with_capacity(wire.len());
    let mut rest = wire;
    while let Some(shift_in) = rest.find('&') {
        decoded.push_str(&rest[..shift_in]);
        let after = &rest[shift_in + 1..];

        let shift_out = match after.find('-') {
            Some(ix) => ix,
            None => {
                decoded.push_str(&rest[shift_in..]);
                rest = "";
                break;
            }
        };

        let group = &after[..shift_out];
        if group.is_empty() {
            decoded.push('&');
        } else if let Some(text) = decode_group(group) {
            decoded.push_str(&text);
        } else {
            decoded.push_str(&rest[shift_in..shift_in + shift_out + 2]);
        }

        rest = &after[shift_out + 1..];
    }

    decoded.push_str(rest);
    Cow::Owned(decoded)
}

fn decode_group(group: &str) -> Option<String> {
    let bytes = base64::decode_config(group, base64::IMAP_MUTF7).ok()?;
    if 0 != bytes.len() % 2 {
        return None;
    }

    let units = bytes
        .chunks(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect::<Vec<_>>();
    String::from_utf16(&units).ok()
}

fn flush_shifted(dst: &mut String, pending: &mut Vec<u16>) {
    if pending.is_empty() {
        return;
    }

    let mut bytes = Vec::with_capacity(pending.len() * 2);
    for unit in pending.drain(..) {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }

    dst.push('&');
    dst.push_str(&base64::encode_config(&bytes, base64::IMAP_MUTF7));
    dst.push('-');
}

fn is_direct(byte: u8) -> bool {
    byte >= b' ' && byte < 0x7F
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn encode_names() {
        assert_eq!("INBOX", encode("INBOX"));
        assert_eq!("Sent Items", encode("Sent Items"));
        assert_eq!("Tom &- Jerry", encode("Tom & Jerry"));
        assert_eq!("Entw&APw-rfe", encode("Entwürfe"));
        assert_eq!("&ZeVnLIqe-", encode("日本語"));
        assert_eq!(
            "&BB4EQgQ,BEAEMAQyBDsENQQ9BD0ESwQ1-",
            encode("Отправленные")
        );
        assert_eq!("caf&AOk-/&AOk-t&AOk-", encode("café/été"));
    }

    #[test]
    fn decode_names() {
        assert_eq!("INBOX", decode("INBOX"));
        assert_eq!("Tom & Jerry", decode("Tom &- Jerry"));
        assert_eq!("Entwürfe", decode("Entw&APw-rfe"));
        assert_eq!("日本語", decode("&ZeVnLIqe-"));
        assert_eq!(
            "Отправленные",
            decode("&BB4EQgQ,BEAEMAQyBDsENQQ9BD0ESwQ1-")
        );
    }

    #[test]
    fn decode_tolerates_garbage() {
        assert_eq!("a&b", decode("a&b"));
        assert_eq!("x&!!-y", decode("x&!!-y"));
        assert_eq!("&AA-", decode("&AA-"));
    }

    proptest! {
        #[test]
        fn round_trip(name in "\\PC{0,20}") {
            let encoded = encode(&name);
            prop_assert!(encoded.bytes().all(is_direct));
            prop_assert_eq!(name.as_str(), &*decode(&encoded));
        }
    }
}
