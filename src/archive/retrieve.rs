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

//! Downloading the attachments of a whole folder.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::prelude::*;
use log::{error, info};
use serde::{Deserialize, Serialize};

use super::attachment;
use crate::imap::session::{MailSession, SearchCriteria};
use crate::mime::part::Message;
use crate::support::error::Error;

/// The operations of a mail session needed to download a folder.
pub trait Mailbox {
    fn select_folder(&mut self, name: &str) -> Result<(), Error>;
    fn search(&mut self, criteria: SearchCriteria) -> Result<Vec<u32>, Error>;
    fn fetch_raw(&mut self, id: u32) -> Result<Vec<u8>, Error>;
}

impl<S: Read + Write> Mailbox for MailSession<S> {
    fn select_folder(&mut self, name: &str) -> Result<(), Error> {
        MailSession::select_folder(self, name)
    }

    fn search(&mut self, criteria: SearchCriteria) -> Result<Vec<u32>, Error> {
        MailSession::search(self, criteria)
    }

    fn fetch_raw(&mut self, id: u32) -> Result<Vec<u8>, Error> {
        MailSession::fetch_raw(self, id)
    }
}

/// What to do when a single message cannot be processed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Stop the whole run.
    Abort,
    /// Log the failure, count it, and carry on with the next message.
    ///
    /// Only failures confined to the message (a failed fetch or a failed
    /// write) are tolerated; connection and protocol failures still abort.
    Continue,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        FailurePolicy::Abort
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    /// Messages processed, including failed ones.
    pub messages: usize,
    pub written: usize,
    pub duplicates: usize,
    pub failed: usize,
}

/// The directory attachments of `account` are saved to under `root`.
pub fn attachments_dir(root: &Path, account: &str) -> PathBuf {
    root.join(account).join("attachments")
}

/// Save the attachments of every message in `folder` to `dest`.
///
/// If `cutoff` is given, only messages on or after that day are considered.
/// Messages are processed newest first.
pub fn download_folder(
    mailbox: &mut impl Mailbox,
    folder: &str,
    dest: &Path,
    cutoff: Option<NaiveDate>,
    policy: FailurePolicy,
) -> Result<Summary, Error> {
    mailbox.select_folder(folder)?;

    let criteria = match cutoff {
        None => SearchCriteria::All,
        Some(date) => SearchCriteria::Since(date),
    };

    let mut ids = mailbox.search(criteria)?;
    let mut summary = Summary::default();
    if ids.is_empty() {
        info!("No messages to process in {}", folder);
        return Ok(summary);
    }

    info!("Processing {} messages in {}", ids.len(), folder);
    // Server order is oldest first
    ids.reverse();

    for id in ids {
        summary.messages += 1;
        match download_message(mailbox, id, dest) {
            Ok(extraction) => {
                summary.written += extraction.written;
                summary.duplicates += extraction.duplicates;
            }
            Err(e)
                if FailurePolicy::Continue == policy && e.is_per_message() =>
            {
                error!("Skipping message {}: {}", id, e);
                summary.failed += 1;
            }
            Err(e) => return Err(e),
        }
    }

    Ok(summary)
}

fn download_message(
    mailbox: &mut impl Mailbox,
    id: u32,
    dest: &Path,
) -> Result<attachment::Extraction, Error> {
    let raw = mailbox.fetch_raw(id)?;
    attachment::extract(&Message::parse(&raw), dest)
}
