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

use std::path::PathBuf;

use chrono::prelude::*;
use structopt::StructOpt;

use crate::account::store::AccountStore;
use crate::support::error::Error;
use crate::support::logging;
use crate::support::settings::{self, Settings};
use crate::support::sysexits::*;

/// Download attachments from an IMAP account.
///
/// Account passwords are stored encrypted under a passphrase which is read
/// from the MILTON_PASS environment variable. Commands which talk to a server
/// operate on the account named by MILTON_ACCOUNT.
#[derive(StructOpt)]
#[structopt(max_term_width = 80)]
struct Options {
    /// The directory containing config.json, settings.toml, and optionally
    /// logging.toml [default: ~/.config/milton]
    #[structopt(long, parse(from_os_str), global = true)]
    config_dir: Option<PathBuf>,

    /// Log a trace of the IMAP conversation to standard error.
    ///
    /// Passwords are not included in the trace.
    #[structopt(long, global = true)]
    trace: bool,

    /// Do not verify the server's TLS certificate.
    #[structopt(long, global = true)]
    allow_insecure_tls_connections: bool,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(StructOpt)]
enum Command {
    /// Show where configuration is read from and which account is active.
    Info,
    /// Add a new account.
    ///
    /// The account details are prompted for interactively. The password is
    /// encrypted under the passphrase in MILTON_PASS, which must be set.
    AddAccount,
    /// Show stored information.
    Show(ShowSubcommand),
    /// Change the stored password of the active account.
    ///
    /// This only changes what is stored locally; it does not change the
    /// password on the server.
    Passwd,
    /// List the folders of the active account.
    Folders,
    Download(DownloadSubcommand),
}

#[derive(StructOpt)]
enum ShowSubcommand {
    /// List the stored accounts.
    Accounts,
}

/// Download the attachments of every message in a folder.
///
/// Attachments are saved as YYYYMMDD_name, where the date is the date the
/// message was sent. Files which already exist are never overwritten, so a
/// folder can be downloaded again to pick up only new attachments.
///
/// Messages are accessed read-only; nothing is marked as seen.
#[derive(StructOpt)]
pub(super) struct DownloadSubcommand {
    /// The folder to download from, e.g. INBOX.
    pub(super) folder: String,

    /// Only consider messages on or after this date (YYYY-MM-DD).
    #[structopt(long, parse(try_from_str = parse_date))]
    pub(super) since: Option<NaiveDate>,

    /// Skip messages which cannot be fetched or saved instead of stopping.
    #[structopt(long)]
    pub(super) keep_going: bool,

    /// Save attachments here instead of
    /// <download_root>/<account>/attachments.
    #[structopt(long, parse(from_os_str))]
    pub(super) dest: Option<PathBuf>,
}

/// Everything the subcommands need to know about the environment.
pub(super) struct Context {
    pub(super) config_dir: PathBuf,
    pub(super) store: AccountStore,
    pub(super) settings: Settings,
    pub(super) allow_insecure_tls: bool,
}

pub fn main() {
    // Clap exits with status 1 instead of EX_USAGE if we use the more concise
    // API
    let options = Options::from_clap(&match Options::clap().get_matches_safe()
    {
        Ok(matches) => matches,
        Err(
            e @ clap::Error {
                kind: clap::ErrorKind::HelpDisplayed,
                ..
            },
        )
        | Err(
            e @ clap::Error {
                kind: clap::ErrorKind::VersionDisplayed,
                ..
            },
        ) => {
            println!("{}", e.message);
            return;
        }
        Err(e) => {
            eprintln!("{}", e.message);
            EX_USAGE.exit()
        }
    });

    let config_dir = match options.config_dir {
        Some(dir) => dir,
        None => settings::default_config_dir().unwrap_or_else(|e| fail(e)),
    };

    if let Err(e) = logging::init(&config_dir, options.trace) {
        die!(EX_CONFIG, "Failed to initialise logging: {}", e);
    }

    let settings = Settings::load(&config_dir).unwrap_or_else(|e| fail(e));
    let ctx = Context {
        store: AccountStore::new(&config_dir),
        allow_insecure_tls: options.allow_insecure_tls_connections
            || settings.allow_insecure_tls,
        settings,
        config_dir,
    };

    let result = match options.command {
        Command::Info => super::accounts::info(&ctx),
        Command::AddAccount => super::accounts::add(&ctx),
        Command::Show(ShowSubcommand::Accounts) => super::accounts::show(&ctx),
        Command::Passwd => super::accounts::passwd(&ctx),
        Command::Folders => super::remote::folders(&ctx),
        Command::Download(cmd) => super::remote::download(&ctx, cmd),
    };

    if let Err(e) = result {
        fail(e);
    }
}

/// Report `e` and exit with the status corresponding to its class.
pub(super) fn fail(e: Error) -> ! {
    eprintln!("Error: {}", e);
    e.exit_code().exit()
}

fn parse_date(s: &str) -> Result<NaiveDate, chrono::ParseError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse(args: &[&str]) -> Result<Options, clap::Error> {
        Options::clap()
            .get_matches_from_safe(args)
            .map(|m| Options::from_clap(&m))
    }

    #[test]
    fn download_arguments() {
        let options = parse(&[
            "miltonmail",
            "--trace",
            "download",
            "Sent Items",
            "--since",
            "2022-01-01",
            "--keep-going",
        ])
        .unwrap();
        assert!(options.trace);
        match options.command {
            Command::Download(cmd) => {
                assert_eq!("Sent Items", cmd.folder);
                assert_eq!(Some(NaiveDate::from_ymd(2022, 1, 1)), cmd.since);
                assert!(cmd.keep_going);
                assert_eq!(None, cmd.dest);
            }
            _ => panic!("Wrong subcommand"),
        }
    }

    #[test]
    fn bad_arguments() {
        assert!(
            parse(&["miltonmail", "download", "INBOX", "--since", "1/1/22"])
                .is_err()
        );
        assert!(parse(&["miltonmail", "download"]).is_err());
        assert!(parse(&["miltonmail", "show"]).is_err());
        assert!(parse(&["miltonmail", "show", "accounts"]).is_ok());
    }
}
