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

//! Persistence of the account collection.

use std::env;
use std::fs;
use std::io;
use std::path::PathBuf;

use log::debug;

use super::model::{Account, AccountCollection};
use crate::support::error::Error;
use crate::support::file_ops;

/// The environment variable naming the active account.
pub const ACCOUNT_VAR: &str = "MILTON_ACCOUNT";

pub const CONFIG_FILE: &str = "config.json";

/// Loads and saves the `AccountCollection` kept in `config.json` within a
/// configuration directory.
#[derive(Clone, Debug)]
pub struct AccountStore {
    dir: PathBuf,
}

impl AccountStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        AccountStore { dir: dir.into() }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE)
    }

    /// Load the full collection.
    ///
    /// If nothing has been saved yet, fails with `ConfigNotFound`, which
    /// callers that can start from scratch should handle explicitly.
    pub fn load(&self) -> Result<AccountCollection, Error> {
        let path = self.path();
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if io::ErrorKind::NotFound == e.kind() => {
                return Err(Error::ConfigNotFound(path));
            }
            Err(e) => return Err(e.into()),
        };

        let collection: AccountCollection = serde_json::from_slice(&data)
            .map_err(|e| {
                Error::BadConfig(format!("{}: {}", path.display(), e))
            })?;
        collection.validate()?;
        debug!(
            "Loaded {} account(s) from {}",
            collection.accounts.len(),
            path.display()
        );
        Ok(collection)
    }

    /// Save the full collection, replacing whatever was there.
    ///
    /// The configuration directory is created if needed. The write is atomic,
    /// so a crash part way through leaves the previous file intact.
    pub fn save(&self, collection: &AccountCollection) -> Result<(), Error> {
        file_ops::ensure_dir(&self.dir, 0o700)?;
        let mut data = serde_json::to_vec_pretty(collection)
            .map_err(|e| Error::BadConfig(e.to_string()))?;
        data.push(b'\n');
        file_ops::spit(self.path(), true, 0o600, &data)?;
        debug!(
            "Saved {} account(s) to {}",
            collection.accounts.len(),
            self.path().display()
        );
        Ok(())
    }
}

/// Return the account selector from `MILTON_ACCOUNT`, if set.
pub fn selector_from_env() -> Option<String> {
    env::var(ACCOUNT_VAR).ok().filter(|s| !s.is_empty())
}

/// Find the account named by `selector`.
pub fn resolve_active<'a>(
    selector: Option<&str>,
    collection: &'a AccountCollection,
) -> Result<&'a Account, Error> {
    let selector = selector.ok_or(Error::AccountNotSet(ACCOUNT_VAR))?;
    collection
        .get(selector)
        .ok_or_else(|| Error::AccountNotFound(selector.to_owned()))
}
