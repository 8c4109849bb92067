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

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::Error;
use crate::archive::retrieve::FailurePolicy;

/// Name of the settings file within the configuration directory.
pub const SETTINGS_FILE: &str = "settings.toml";

/// Optional user settings.
///
/// These are stored in `settings.toml` in the configuration directory
/// (normally `~/.config/milton`). The file and every key in it are optional.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// The directory under which each account gets its own download
    /// directory.
    ///
    /// If unset, `milton` in the user's home directory is used.
    pub download_root: Option<PathBuf>,

    /// How long to wait for the TCP connection to be established.
    pub connect_timeout_secs: u64,

    /// How long any single read or write on the connection may block.
    pub io_timeout_secs: u64,

    /// Whether a failure to process one message aborts the whole download
    /// (`"abort"`) or is logged and skipped (`"continue"`).
    pub on_message_error: FailurePolicy,

    /// Skip verification of the server's TLS certificate.
    ///
    /// This makes the connection vulnerable to interception and should only
    /// be used for testing against servers with self-signed certificates.
    pub allow_insecure_tls: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            download_root: None,
            connect_timeout_secs: 30,
            io_timeout_secs: 120,
            on_message_error: FailurePolicy::Abort,
            allow_insecure_tls: false,
        }
    }
}

impl Settings {
    /// Load the settings from `config_dir`, falling back to the defaults if
    /// there is no settings file.
    pub fn load(config_dir: &Path) -> Result<Self, Error> {
        let path = config_dir.join(SETTINGS_FILE);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if io::ErrorKind::NotFound == e.kind() => {
                return Ok(Settings::default())
            }
            Err(e) => return Err(Error::Io(e)),
        };

        toml::from_slice(&data).map_err(|e| {
            Error::BadConfig(format!("{}: {}", path.display(), e))
        })
    }

    pub fn download_root(&self) -> Result<PathBuf, Error> {
        match self.download_root {
            Some(ref root) => Ok(root.clone()),
            None => dirs::home_dir().map(|home| home.join("milton")).ok_or_else(
                || {
                    Error::BadConfig(
                        "Cannot determine the home directory; \
                         set download_root in settings.toml"
                            .to_owned(),
                    )
                },
            ),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs.max(1))
    }
}

/// The configuration directory used when none is given explicitly.
pub fn default_config_dir() -> Result<PathBuf, Error> {
    dirs::home_dir()
        .map(|home| home.join(".config").join("milton"))
        .ok_or_else(|| {
            Error::BadConfig(
                "Cannot determine the home directory; use --config-dir"
                    .to_owned(),
            )
        })
}

#[cfg(test)]
mod test {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::load(dir.path()).unwrap();
        assert_eq!(Settings::default(), settings);
        assert_eq!(Duration::from_secs(30), settings.connect_timeout());
        assert_eq!(Duration::from_secs(120), settings.io_timeout());
    }

    #[test]
    fn partial_file() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(SETTINGS_FILE),
            "download_root = \"/srv/mail\"\n\
             io_timeout_secs = 0\n\
             on_message_error = \"continue\"\n",
        )
        .unwrap();

        let settings = Settings::load(dir.path()).unwrap();
        assert_eq!(
            PathBuf::from("/srv/mail"),
            settings.download_root().unwrap()
        );
        assert_eq!(FailurePolicy::Continue, settings.on_message_error);
        assert_eq!(Duration::from_secs(30), settings.connect_timeout());
        // Zero would mean "block forever" to the socket layer
        assert_eq!(Duration::from_secs(1), settings.io_timeout());
        assert!(!settings.allow_insecure_tls);
    }

    #[test]
    fn malformed_file() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(SETTINGS_FILE),
            "on_message_error = \"sometimes\"\n",
        )
        .unwrap();
        assert_matches!(
            Err(Error::BadConfig(_)),
            Settings::load(dir.path())
        );

        fs::write(dir.path().join(SETTINGS_FILE), "io_timeout_secs = ")
            .unwrap();
        assert_matches!(
            Err(Error::BadConfig(_)),
            Settings::load(dir.path())
        );
    }
}
