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

//! Extraction of attachments from a single message.

use std::fs;
use std::path::Path;

use log::{debug, info, warn};

use crate::mime::encoded_word::decode_header_words;
use crate::mime::part::{Disposition, Message};
use crate::support::error::Error;
use crate::support::file_ops::{self, IgnoreKinds};
use crate::support::safe_name::sanitise_file_name;

/// Prefix used in place of the date for messages with no usable `Date`.
const UNDATED: &str = "00000000";

/// The outcome of extracting one message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Extraction {
    /// Attachments written to new files.
    pub written: usize,
    /// Attachments skipped because their file already exists.
    pub duplicates: usize,
}

/// Derive the local file name for an attachment of `message` whose declared
/// name is `raw_filename`.
///
/// The result is `YYYYMMDD_name`, where the date is the message's send date
/// as written by the sender, and `name` is `raw_filename` with encoded words
/// decoded, spaces replaced by underscores, and everything outside
/// `[A-Za-z0-9_.-]` removed. It depends only on the message content, so
/// repeated extraction of the same message always yields the same names.
pub fn safe_filename(message: &Message, raw_filename: &str) -> String {
    let date = message
        .date()
        .map(|date| date.format("%Y%m%d").to_string())
        .unwrap_or_else(|| UNDATED.to_owned());

    sanitise_file_name(&format!(
        "{}_{}",
        date,
        decode_header_words(raw_filename)
    ))
}

/// Write every attachment of `message` into `dest` which is not already
/// there.
///
/// Only parts whose disposition is `attachment` are considered. Parts with no
/// file name or an undecodable body are skipped. `dest` is created if it
/// does not exist and there is something to write.
pub fn extract(message: &Message, dest: &Path) -> Result<Extraction, Error> {
    let mut extraction = Extraction::default();

    for leaf in message.leaves() {
        if Disposition::Attachment != leaf.disposition() {
            continue;
        }

        let raw_filename = match leaf.filename() {
            Some(name) => name,
            None => {
                debug!("Skipping attachment without a file name");
                continue;
            }
        };

        let payload = match leaf.payload() {
            Some(payload) => payload,
            None => {
                warn!("Skipping undecodable attachment {}", raw_filename);
                continue;
            }
        };

        let path = dest.join(safe_filename(message, &raw_filename));
        if fs::symlink_metadata(&path).is_ok() {
            debug!("{} already exists", path.display());
            extraction.duplicates += 1;
            continue;
        }

        file_ops::ensure_dir(dest, 0o755)?;
        let written = file_ops::spit(&path, false, 0o644, &payload)
            .map(|_| true)
            .ignore_already_exists()?;

        if written {
            info!("Saved {}", path.display());
            extraction.written += 1;
        } else {
            extraction.duplicates += 1;
        }
    }

    Ok(extraction)
}
