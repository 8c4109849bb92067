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

use std::io::{self, BufRead, Write};

use super::main::Context;
use crate::account::model::{Account, AccountCollection, DEFAULT_PORT};
use crate::account::store::{self, ACCOUNT_VAR};
use crate::crypt::credential::{CredentialCipher, PASSPHRASE_VAR};
use crate::support::error::Error;
use crate::support::safe_name::is_safe_name;

pub(super) fn info(ctx: &Context) -> Result<(), Error> {
    println!("Configuration directory: {}", ctx.config_dir.display());
    println!("Account file: {}", ctx.store.path().display());
    println!(
        "Download root: {}",
        ctx.settings.download_root()?.display()
    );
    println!(
        "Passphrase ({}): {}",
        PASSPHRASE_VAR,
        if CredentialCipher::from_env().is_ok() {
            "set"
        } else {
            "not set"
        }
    );

    let selector = store::selector_from_env();
    let collection = match ctx.store.load() {
        Ok(collection) => collection,
        Err(Error::ConfigNotFound(path)) => {
            println!("No configuration file at {}", path.display());
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    match store::resolve_active(selector.as_deref(), &collection) {
        Ok(account) => println!(
            "Active account: {} ({}@{}:{})",
            account.name, account.username, account.server, account.port
        ),
        Err(e @ Error::AccountNotSet(..))
        | Err(e @ Error::AccountNotFound(..)) => {
            println!("Active account: none ({})", e)
        }
        Err(e) => return Err(e),
    }

    Ok(())
}

pub(super) fn add(ctx: &Context) -> Result<(), Error> {
    let cipher = CredentialCipher::from_env()?;
    let mut collection = load_or_empty(ctx)?;

    let name = prompt("Account name: ");
    if !is_safe_name(&name) {
        return Err(Error::UnsafeName(name));
    }
    if collection.get(&name).is_some() {
        return Err(Error::DuplicateAccount(name));
    }

    let server = prompt("IMAP server: ");
    let username = prompt("User name: ");
    let password = read_password("Password: ");
    let port = match prompt(&format!("Port [{}]: ", DEFAULT_PORT)).as_str() {
        "" => DEFAULT_PORT,
        port => port
            .parse::<u16>()
            .unwrap_or_else(|_| die!(EX_USAGE, "Invalid port: {}", port)),
    };

    let account =
        Account::new(name.clone(), server, username, port, &password, &cipher)?;
    collection.add(account)?;
    ctx.store.save(&collection)?;

    println!("Account '{}' added.", name);
    if store::selector_from_env().as_deref() != Some(name.as_str()) {
        println!("Set {}='{}' to use it.", ACCOUNT_VAR, name);
    }
    Ok(())
}

pub(super) fn show(ctx: &Context) -> Result<(), Error> {
    let collection = match ctx.store.load() {
        Ok(collection) => collection,
        Err(Error::ConfigNotFound(_)) => {
            println!(
                "No configuration file found. \
                 No accounts have been added yet."
            );
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    if collection.accounts.is_empty() {
        println!("No accounts found.");
        return Ok(());
    }

    let selector = store::selector_from_env();
    for account in &collection.accounts {
        println!(
            "{} {}: {}@{}:{}",
            if selector.as_deref() == Some(account.name.as_str()) {
                "*"
            } else {
                " "
            },
            account.name,
            account.username,
            account.server,
            account.port
        );
    }

    Ok(())
}

pub(super) fn passwd(ctx: &Context) -> Result<(), Error> {
    let cipher = CredentialCipher::from_env()?;
    let mut collection = ctx.store.load()?;
    let selector = store::selector_from_env();
    let name = store::resolve_active(selector.as_deref(), &collection)?
        .name
        .clone();

    let password = read_password("New password: ");
    if password != read_password("Confirm: ") {
        die!(EX_USAGE, "Passwords don't match");
    }

    collection
        .get_mut(&name)
        .ok_or_else(|| Error::AccountNotFound(name.clone()))?
        .set_password(&password, &cipher)?;
    ctx.store.save(&collection)?;

    println!("Password for '{}' updated.", name);
    Ok(())
}

/// Load the account collection and resolve the active account.
pub(super) fn active_account(ctx: &Context) -> Result<Account, Error> {
    let collection = ctx.store.load()?;
    let selector = store::selector_from_env();
    store::resolve_active(selector.as_deref(), &collection).map(Clone::clone)
}

fn load_or_empty(ctx: &Context) -> Result<AccountCollection, Error> {
    match ctx.store.load() {
        Ok(collection) => Ok(collection),
        Err(Error::ConfigNotFound(_)) => Ok(AccountCollection::default()),
        Err(e) => Err(e),
    }
}

fn prompt(message: &str) -> String {
    let stdin = io::stdin();
    match read_answer(&mut stdin.lock(), &mut io::stdout(), message) {
        Ok(Some(answer)) => answer,
        Ok(None) => die!(EX_NOINPUT, "\nUnexpected end of input"),
        Err(e) => die!(EX_IOERR, "Failed to prompt for input: {}", e),
    }
}

/// Writes `message` to `output` and reads one trimmed line from `input`.
///
/// Returns `None` at end of input. Failing to write or flush the prompt is
/// an error, since the user would otherwise be answering a blank screen.
fn read_answer(
    input: &mut impl BufRead,
    output: &mut impl Write,
    message: &str,
) -> io::Result<Option<String>> {
    output.write_all(message.as_bytes())?;
    output.flush()?;

    let mut line = String::new();
    if 0 == input.read_line(&mut line)? {
        return Ok(None);
    }
    Ok(Some(line.trim().to_owned()))
}

fn read_password(message: &str) -> String {
    match rpassword::read_password_from_tty(Some(message)) {
        Ok(p) => p,
        Err(e) => die!(EX_NOINPUT, "Failed to read password: {}", e),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }
    }

    #[test]
    fn answers_are_trimmed() {
        let mut output = Vec::<u8>::new();
        let answer = read_answer(
            &mut &b"  imap.example.org \n"[..],
            &mut output,
            "IMAP server: ",
        )
        .unwrap();
        assert_eq!(Some("imap.example.org".to_owned()), answer);
        assert_eq!(b"IMAP server: ", &output[..]);
    }

    #[test]
    fn end_of_input_is_no_answer() {
        let mut output = Vec::<u8>::new();
        assert_eq!(
            None,
            read_answer(&mut &b""[..], &mut output, "Port: ").unwrap()
        );
    }

    #[test]
    fn prompt_write_failure_is_reported() {
        let err = read_answer(&mut &b"x\n"[..], &mut BrokenPipe, "Name: ")
            .unwrap_err();
        assert_eq!(io::ErrorKind::WriteZero, err.kind());

        let err = read_answer(&mut &b"x\n"[..], &mut BrokenPipe, "")
            .unwrap_err();
        assert_eq!(io::ErrorKind::BrokenPipe, err.kind());
    }
}
