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

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use super::sysexits::*;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Passphrase not found in environment; set {0}")]
    PassphraseMissing(&'static str),
    #[error("No active account; set {0} to the name of a stored account")]
    AccountNotSet(&'static str),
    #[error("No account named '{0}'")]
    AccountNotFound(String),
    #[error("An account named '{0}' already exists")]
    DuplicateAccount(String),
    #[error("'{0}' cannot be used as an account name")]
    UnsafeName(String),
    #[error("No configuration found at {}", .0.display())]
    ConfigNotFound(PathBuf),
    #[error("Malformed configuration: {0}")]
    BadConfig(String),
    #[error(
        "Failed to decrypt stored password \
         (wrong passphrase or corrupted account store)"
    )]
    DecryptionFailed,
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Login rejected: {0}")]
    Authentication(String),
    #[error("Server error: {0}")]
    Protocol(String),
    #[error("Folder not found: {0}")]
    FolderNotFound(String),
    #[error("Failed to fetch message {0}: {1}")]
    Fetch(u32, String),
    #[error("{0} is not possible while {1}")]
    InvalidState(&'static str, &'static str),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Ssl(#[from] openssl::error::ErrorStack),
}

/// The coarse classes of `Error`, which determine how an error is reported
/// and which exit code the process ends with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    Configuration,
    Credential,
    Connection,
    Authentication,
    Protocol,
    Filesystem,
}

impl Error {
    pub fn class(&self) -> ErrorClass {
        match *self {
            Error::PassphraseMissing(..)
            | Error::AccountNotSet(..)
            | Error::AccountNotFound(..)
            | Error::DuplicateAccount(..)
            | Error::UnsafeName(..)
            | Error::ConfigNotFound(..)
            | Error::BadConfig(..) => ErrorClass::Configuration,
            Error::DecryptionFailed => ErrorClass::Credential,
            Error::Connection(..) | Error::Ssl(..) => ErrorClass::Connection,
            Error::Authentication(..) => ErrorClass::Authentication,
            Error::Protocol(..)
            | Error::FolderNotFound(..)
            | Error::Fetch(..)
            | Error::InvalidState(..) => ErrorClass::Protocol,
            Error::Io(..) => ErrorClass::Filesystem,
        }
    }

    pub fn exit_code(&self) -> Sysexit {
        match self.class() {
            ErrorClass::Configuration => EX_CONFIG,
            ErrorClass::Credential => EX_NOPERM,
            ErrorClass::Connection => EX_UNAVAILABLE,
            ErrorClass::Authentication => EX_NOPERM,
            ErrorClass::Protocol => EX_PROTOCOL,
            ErrorClass::Filesystem => EX_IOERR,
        }
    }

    /// Whether this error concerns only the message being processed, as
    /// opposed to the connection or session as a whole.
    pub fn is_per_message(&self) -> bool {
        match *self {
            Error::Fetch(..) | Error::Io(..) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn classification() {
        assert_eq!(
            ErrorClass::Configuration,
            Error::PassphraseMissing("X").class()
        );
        assert_eq!(ErrorClass::Credential, Error::DecryptionFailed.class());
        assert_eq!(
            ErrorClass::Protocol,
            Error::FolderNotFound("Junk".to_owned()).class()
        );
        assert_eq!(EX_CONFIG, Error::AccountNotSet("X").exit_code());
        assert_eq!(
            EX_PROTOCOL,
            Error::Fetch(3, "NO".to_owned()).exit_code()
        );
    }

    #[test]
    fn user_facing_messages_name_the_variable() {
        assert_eq!(
            "Passphrase not found in environment; set MILTON_PASS",
            Error::PassphraseMissing("MILTON_PASS").to_string()
        );
    }
}
