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

//! RFC 2047 "encoded words" in header text.

use std::borrow::Cow;

use encoding_rs::*;
use lazy_static::lazy_static;
use regex::Regex;

use super::quoted_printable::qp_decode;

lazy_static! {
    static ref ENCODED_WORD: Regex =
        Regex::new(r"=\?([^?\s]*)\?([bBqQ])\?([^?\s]*)\?=").unwrap();
}

/// Decode every encoded word in `text`.
///
/// Each encoded word is decoded with its own declared charset (UTF-8 when
/// none is given) and spliced back in place of the encoded form. Literal text
/// is kept as is, except that whitespace separating two adjacent encoded
/// words is dropped, as RFC 2047 requires. Encoded words that cannot be
/// decoded are left in their raw form.
///
/// RFC 2047 limits encoded words to 75 characters, but agents that produce
/// longer ones are common and other clients accept them, so we do too.
pub fn decode_header_words(text: &str) -> String {
    let mut decoded = String::with_capacity(text.len());
    let mut last_end = 0;
    let mut after_encoded_word = false;

    for m in ENCODED_WORD.find_iter(text) {
        let between = &text[last_end..m.start()];
        if !(after_encoded_word && between.trim().is_empty()) {
            decoded.push_str(between);
        }

        match ew_decode(m.as_str()) {
            Some(word) => {
                decoded.push_str(&word);
                after_encoded_word = true;
            }
            None => {
                decoded.push_str(m.as_str());
                after_encoded_word = false;
            }
        }

        last_end = m.end();
    }

    decoded.push_str(&text[last_end..]);
    decoded
}

/// Decode `word`, which must be a single encoded word in its entirety.
///
/// Returns `None` if it is not an encoded word or if it could not be decoded.
pub fn ew_decode(word: &str) -> Option<String> {
    let captures = ENCODED_WORD.captures(word)?;
    if captures.get(0)?.as_str().len() != word.len() {
        return None;
    }

    let charset = captures.get(1)?.as_str();
    let transfer_encoding = captures.get(2)?.as_str();
    let content = captures.get(3)?.as_str().as_bytes();

    let content = match transfer_encoding {
        "q" | "Q" => {
            // _ in the content (before transfer decoding) stands for ASCII
            // space regardless of charset
            let spaced: Vec<u8> = content
                .iter()
                .map(|&b| if b'_' == b { b' ' } else { b })
                .collect();
            qp_decode(&spaced).into_owned()
        }
        _ => base64::decode(content).ok()?,
    };

    Some(decode_charset(charset, &content).into_owned())
}

fn decode_charset<'a>(charset: &str, content: &'a [u8]) -> Cow<'a, str> {
    // RFC 2231 allows a language suffix, as in "utf-8*en"
    let label = charset.split('*').next().unwrap_or("");
    let encoding = if label.is_empty() {
        UTF_8
    } else {
        Encoding::for_label_no_replacement(label.as_bytes()).unwrap_or(UTF_8)
    };

    encoding.decode_with_bom_removal(content).0
}
