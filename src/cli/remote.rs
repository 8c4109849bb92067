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

use log::info;

use super::accounts::active_account;
use super::main::{Context, DownloadSubcommand};
use crate::account::model::Account;
use crate::archive::retrieve::{self, FailurePolicy};
use crate::crypt::credential::CredentialCipher;
use crate::imap::session::{self, ConnectOptions, SessionState, TlsSession};
use crate::support::error::Error;
use crate::support::safe_name::is_safe_name;

pub(super) fn folders(ctx: &Context) -> Result<(), Error> {
    let cipher = CredentialCipher::from_env()?;
    let account = active_account(ctx)?;

    let mut session = login(ctx, &account, &cipher)?;
    for folder in session.list_folders()? {
        if folder.selectable {
            println!("{}", folder.name);
        } else {
            println!("{} (container only)", folder.name);
        }
    }
    session.logout()
}

pub(super) fn download(
    ctx: &Context,
    cmd: DownloadSubcommand,
) -> Result<(), Error> {
    let cipher = CredentialCipher::from_env()?;
    let account = active_account(ctx)?;

    let dest = match cmd.dest {
        Some(dest) => dest,
        None => {
            if !is_safe_name(&account.name) {
                return Err(Error::UnsafeName(account.name));
            }
            retrieve::attachments_dir(
                &ctx.settings.download_root()?,
                &account.name,
            )
        }
    };

    let policy = if cmd.keep_going {
        FailurePolicy::Continue
    } else {
        ctx.settings.on_message_error
    };

    let mut session = login(ctx, &account, &cipher)?;
    let summary = retrieve::download_folder(
        &mut session,
        &cmd.folder,
        &dest,
        cmd.since,
        policy,
    )?;
    session.logout()?;

    println!(
        "{} messages processed; {} attachments saved to {}, \
         {} already present",
        summary.messages,
        summary.written,
        dest.display(),
        summary.duplicates
    );
    if summary.failed > 0 {
        println!(
            "{} messages could not be processed; see the log above",
            summary.failed
        );
    }

    Ok(())
}

fn login(
    ctx: &Context,
    account: &Account,
    cipher: &CredentialCipher,
) -> Result<TlsSession, Error> {
    let password = account.password(cipher)?;
    let options = ConnectOptions {
        host: account.server.clone(),
        port: account.port,
        connect_timeout: ctx.settings.connect_timeout(),
        io_timeout: ctx.settings.io_timeout(),
        allow_insecure_tls: ctx.allow_insecure_tls,
    };

    info!("Connecting to {}:{}", options.host, options.port);
    let mut session = session::connect(&options)?;
    if SessionState::Connected == *session.state() {
        session.authenticate(&account.username, &password)?;
    }

    Ok(session)
}
