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

//! A read-only IMAP session bound to one connection.
//!
//! `MailSession` tracks the protocol state itself instead of trusting the
//! server to reject out-of-order commands:
//!
//! ```text
//! Connected --authenticate--> Authenticated --select_folder--> Selected(a)
//! Selected(a) --select_folder--> Selected(b)
//! ```
//!
//! Any call made from the wrong state fails with `Error::InvalidState`
//! without touching the connection. Dropping a session that is still
//! connected sends `LOGOUT`.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use chrono::prelude::*;
use log::{debug, info, warn};
use openssl::ssl::{
    HandshakeError, SslConnector, SslMethod, SslStream, SslVerifyMode,
};

use super::client::{self, Client, Response};
use super::mailbox_name;
use super::syntax::{self as s, Command, SearchKey, Status};
use crate::support::error::Error;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Greeted but not logged in.
    Connected,
    Authenticated,
    /// The named folder is selected (read-only).
    Selected(String),
    Disconnected,
}

impl SessionState {
    fn describe(&self) -> &'static str {
        match *self {
            SessionState::Connected => "not logged in",
            SessionState::Authenticated => "no folder is selected",
            SessionState::Selected(..) => "a folder is selected",
            SessionState::Disconnected => "disconnected",
        }
    }
}

/// Which messages `MailSession::search` should return.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchCriteria {
    All,
    /// Messages whose internal date is on or after the given day.
    Since(NaiveDate),
}

/// How to reach the server.
#[derive(Clone, Debug)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
    /// Applies to every read and write on the established connection.
    pub io_timeout: Duration,
    pub allow_insecure_tls: bool,
}

pub type TlsSession = MailSession<SslStream<TcpStream>>;

/// One folder reported by `LIST`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Folder {
    pub name: String,
    /// Whether the folder can be selected; `\Noselect` folders only exist
    /// to hold other folders.
    pub selectable: bool,
}

pub struct MailSession<S: Read + Write> {
    client: Client<S>,
    state: SessionState,
}

/// Open a TLS connection to the server described by `options` and read its
/// greeting.
pub fn connect(options: &ConnectOptions) -> Result<TlsSession, Error> {
    let addresses = (&options.host as &str, options.port)
        .to_socket_addrs()
        .map_err(|e| {
            Error::Connection(format!(
                "Failed to resolve {}: {}",
                options.host, e
            ))
        })?;

    let mut last_error = None;
    let mut tcp_stream = None;
    for address in addresses {
        debug!("Connecting to {}", address);
        match TcpStream::connect_timeout(&address, options.connect_timeout) {
            Ok(stream) => {
                tcp_stream = Some(stream);
                break;
            }
            Err(e) => {
                debug!("Connection to {} failed: {}", address, e);
                last_error = Some(e);
            }
        }
    }

    let tcp_stream = tcp_stream.ok_or_else(|| {
        Error::Connection(match last_error {
            Some(e) => format!("{}:{}: {}", options.host, options.port, e),
            None => format!("{}: host not found", options.host),
        })
    })?;

    let timeout = Some(options.io_timeout);
    tcp_stream
        .set_read_timeout(timeout)
        .and_then(|_| tcp_stream.set_write_timeout(timeout))
        .map_err(|e| Error::Connection(e.to_string()))?;

    debug!("Starting TLS handshake with {}", options.host);
    let mut connector = SslConnector::builder(SslMethod::tls())?;
    if options.allow_insecure_tls {
        warn!("TLS certificate verification is disabled");
        connector.set_verify(SslVerifyMode::NONE);
    }

    let ssl_stream = connector
        .build()
        .connect(&options.host, tcp_stream)
        .map_err(|e| match e {
            HandshakeError::SetupFailure(es) => Error::Ssl(es),
            HandshakeError::Failure(f) => Error::Connection(format!(
                "TLS handshake with {} failed: {}",
                options.host,
                f.error()
            )),
            HandshakeError::WouldBlock(_) => Error::Connection(format!(
                "TLS handshake with {} timed out",
                options.host
            )),
        })?;

    MailSession::from_stream(ssl_stream)
}

impl<S: Read + Write> MailSession<S> {
    /// Start a session on an already-established stream by reading the
    /// server greeting.
    pub fn from_stream(stream: S) -> Result<Self, Error> {
        let mut client = Client::new(stream);
        let state = match client.read_greeting() {
            Ok((Status::PreAuth, text)) => {
                info!("Server pre-authenticated the session: {}", text);
                SessionState::Authenticated
            }
            Ok((_, text)) => {
                debug!("Server greeting: {}", text);
                SessionState::Connected
            }
            Err(client::Error::Bye(text)) => {
                return Err(Error::Connection(format!(
                    "Server refused the connection: {}",
                    text
                )))
            }
            Err(e) => return Err(e.into()),
        };

        Ok(MailSession { client, state })
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Log in with `LOGIN`.
    pub fn authenticate(
        &mut self,
        username: &str,
        password: &str,
    ) -> Result<(), Error> {
        self.require("LOGIN", |s| SessionState::Connected == *s)?;

        let response = match self.run(Command::Login {
            user: username,
            password,
        }) {
            Ok(response) => response,
            Err(client::Error::Bye(text)) => {
                return Err(Error::Authentication(text))
            }
            Err(e) => return Err(e.into()),
        };

        match response.status {
            Status::Ok => {
                info!("Logged in as {}", username);
                self.state = SessionState::Authenticated;
                Ok(())
            }
            _ => Err(Error::Authentication(response.text)),
        }
    }

    /// List every folder on the server, in the order the server reports
    /// them. Names are returned in UTF-8.
    pub fn list_folders(&mut self) -> Result<Vec<Folder>, Error> {
        self.require("LIST", is_authenticated)?;

        let response = self.run(Command::List)?;
        check_ok("LIST", &response)?;

        let mut folders = Vec::new();
        for data in &response.untagged {
            if let Some(entry) = s::parse_list(data) {
                let entry = entry.map_err(Error::Protocol)?;
                folders.push(Folder {
                    name: mailbox_name::decode(&entry.name).into_owned(),
                    selectable: entry.is_selectable(),
                });
            }
        }

        Ok(folders)
    }

    /// Select `name` for read-only access, implicitly leaving any folder
    /// which was selected before.
    pub fn select_folder(&mut self, name: &str) -> Result<(), Error> {
        self.require("EXAMINE", is_authenticated)?;

        let wire_name = mailbox_name::encode(name);
        let response = self.run(Command::Examine(&*wire_name))?;

        // A failed EXAMINE still closes the previous mailbox
        match response.status {
            Status::Ok => {
                debug!("Selected folder {}", name);
                self.state = SessionState::Selected(name.to_owned());
                Ok(())
            }
            Status::No => {
                self.state = SessionState::Authenticated;
                Err(Error::FolderNotFound(name.to_owned()))
            }
            _ => {
                self.state = SessionState::Authenticated;
                Err(protocol_failure("EXAMINE", &response))
            }
        }
    }

    /// Search the selected folder.
    ///
    /// The result is in ascending sequence number order, which for IMAP
    /// means oldest first. Callers wanting newest-first must reverse it.
    pub fn search(
        &mut self,
        criteria: SearchCriteria,
    ) -> Result<Vec<u32>, Error> {
        self.require("SEARCH", is_selected)?;

        let key = match criteria {
            SearchCriteria::All => SearchKey::All,
            SearchCriteria::Since(date) => SearchKey::Since(date),
        };

        let response = self.run(Command::Search(key))?;
        check_ok("SEARCH", &response)?;

        let mut ids = Vec::new();
        for data in &response.untagged {
            if let Some(found) = s::parse_search(data) {
                ids.extend(found.map_err(Error::Protocol)?);
            }
        }

        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    /// Fetch the full raw content of message `id` without setting `\Seen`.
    pub fn fetch_raw(&mut self, id: u32) -> Result<Vec<u8>, Error> {
        self.require("FETCH", is_selected)?;

        let response = self.run(Command::Fetch(id))?;
        if Status::Ok != response.status {
            return Err(Error::Fetch(id, response.text));
        }

        for data in &response.untagged {
            match s::parse_fetch(data) {
                Some(Ok(s::FetchData {
                    seqnum,
                    body: Some(body),
                })) if seqnum == id => return Ok(body),
                Some(Err(e)) => return Err(Error::Fetch(id, e)),
                _ => (),
            }
        }

        Err(Error::Fetch(id, "No message content in response".to_owned()))
    }

    /// End the session politely. Calling this more than once is harmless.
    pub fn logout(&mut self) -> Result<(), Error> {
        if SessionState::Disconnected == self.state {
            return Ok(());
        }

        self.state = SessionState::Disconnected;
        match self.client.command(Command::Logout) {
            Ok(_) | Err(client::Error::Bye(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn require(
        &self,
        operation: &'static str,
        allowed: impl FnOnce(&SessionState) -> bool,
    ) -> Result<(), Error> {
        if allowed(&self.state) {
            Ok(())
        } else {
            Err(Error::InvalidState(operation, self.state.describe()))
        }
    }

    /// Run `command`, marking the session disconnected if the connection
    /// fails or the response cannot be followed.
    ///
    /// After an unexpected response the rest of it is still unread, so the
    /// stream can't be used for further commands, not even `LOGOUT`.
    fn run(&mut self, command: Command<'_>) -> Result<Response, client::Error> {
        let result = self.client.command(command);
        if result.is_err() {
            self.state = SessionState::Disconnected;
        }
        result
    }
}

impl<S: Read + Write> Drop for MailSession<S> {
    fn drop(&mut self) {
        if let Err(e) = self.logout() {
            debug!("Error during LOGOUT: {}", e);
        }
    }
}

fn is_authenticated(state: &SessionState) -> bool {
    matches!(
        *state,
        SessionState::Authenticated | SessionState::Selected(..)
    )
}

fn is_selected(state: &SessionState) -> bool {
    matches!(*state, SessionState::Selected(..))
}

fn check_ok(what: &str, response: &Response) -> Result<(), Error> {
    if Status::Ok == response.status {
        Ok(())
    } else {
        Err(protocol_failure(what, response))
    }
}

fn protocol_failure(what: &str, response: &Response) -> Error {
    Error::Protocol(format!(
        "{} failed: {:?} {}",
        what, response.status, response.text
    ))
}

#[cfg(test)]
mod test {
    use std::cell::RefCell;
    use std::net::TcpListener;
    use std::rc::Rc;
    use std::thread;

    use super::*;
    use crate::imap::test_support::ScriptedStream;

    fn session(
        script: &[u8],
    ) -> (MailSession<ScriptedStream>, Rc<RefCell<Vec<u8>>>) {
        let (stream, out) = ScriptedStream::new(script);
        (MailSession::from_stream(stream).unwrap(), out)
    }

    fn sent(out: &Rc<RefCell<Vec<u8>>>) -> String {
        String::from_utf8(out.borrow().clone()).unwrap()
    }

    fn folder(name: &str, selectable: bool) -> Folder {
        Folder {
            name: name.to_owned(),
            selectable,
        }
    }

    fn options(port: u16) -> ConnectOptions {
        ConnectOptions {
            host: "127.0.0.1".to_owned(),
            port,
            connect_timeout: Duration::from_secs(5),
            io_timeout: Duration::from_secs(5),
            allow_insecure_tls: true,
        }
    }

    #[test]
    fn full_read_only_run() {
        let (mut session, out) = session(
            b"* OK IMAP4rev1 ready\r\n\
              1 OK LOGIN completed\r\n\
              * LIST (\\HasNoChildren) \"/\" INBOX\r\n\
              * LIST (\\HasNoChildren) \"/\" \"Sent Items\"\r\n\
              * LIST (\\Noselect \\HasChildren) \"/\" Entw&APw-rfe\r\n\
              2 OK LIST completed\r\n\
              * 3 EXISTS\r\n\
              * OK [READ-ONLY] ok\r\n\
              3 OK [READ-ONLY] EXAMINE completed\r\n\
              * SEARCH 3 1\r\n\
              4 OK SEARCH completed\r\n\
              * 3 FETCH (BODY[] {11}\r\nSubject: x\n)\r\n\
              5 OK FETCH completed\r\n\
              * BYE see you\r\n\
              6 OK LOGOUT completed\r\n",
        );

        assert_eq!(SessionState::Connected, *session.state());
        session.authenticate("user", "secret").unwrap();
        assert_eq!(SessionState::Authenticated, *session.state());

        assert_eq!(
            vec![
                folder("INBOX", true),
                folder("Sent Items", true),
                folder("Entwürfe", false),
            ],
            session.list_folders().unwrap()
        );

        session.select_folder("Sent Items").unwrap();
        assert_eq!(
            SessionState::Selected("Sent Items".to_owned()),
            *session.state()
        );

        assert_eq!(
            vec![1, 3],
            session
                .search(SearchCriteria::Since(NaiveDate::from_ymd(
                    2022, 1, 1
                )))
                .unwrap()
        );
        assert_eq!(b"Subject: x\n".to_vec(), session.fetch_raw(3).unwrap());

        session.logout().unwrap();
        assert_eq!(SessionState::Disconnected, *session.state());
        session.logout().unwrap();
        drop(session);

        assert_eq!(
            "1 LOGIN \"user\" \"secret\"\r\n\
             2 LIST \"\" \"*\"\r\n\
             3 EXAMINE \"Sent Items\"\r\n\
             4 SEARCH SINCE \"1-Jan-2022\"\r\n\
             5 FETCH 3 (BODY.PEEK[])\r\n\
             6 LOGOUT\r\n",
            sent(&out)
        );
    }

    #[test]
    fn out_of_order_calls_are_rejected() {
        let (mut session, out) = session(
            b"* OK ready\r\n\
              1 OK logged in\r\n",
        );

        assert_matches!(
            Err(Error::InvalidState("LIST", _)),
            session.list_folders()
        );
        assert_matches!(
            Err(Error::InvalidState("EXAMINE", _)),
            session.select_folder("INBOX")
        );

        session.authenticate("user", "secret").unwrap();
        assert_matches!(
            Err(Error::InvalidState("LOGIN", _)),
            session.authenticate("user", "secret")
        );
        assert_matches!(
            Err(Error::InvalidState("SEARCH", "no folder is selected")),
            session.search(SearchCriteria::All)
        );
        assert_matches!(
            Err(Error::InvalidState("FETCH", _)),
            session.fetch_raw(1)
        );

        // Nothing but the LOGIN reached the server (plus the LOGOUT attempt
        // on drop, which fails since the script is exhausted).
        drop(session);
        assert_eq!(
            "1 LOGIN \"user\" \"secret\"\r\n2 LOGOUT\r\n",
            sent(&out)
        );
    }

    #[test]
    fn rejected_login() {
        let (mut session, _) = session(
            b"* OK ready\r\n\
              1 NO [AUTHENTICATIONFAILED] Invalid credentials\r\n",
        );
        match session.authenticate("user", "wrong") {
            Err(Error::Authentication(text)) => {
                assert_eq!("[AUTHENTICATIONFAILED] Invalid credentials", text)
            }
            r => panic!("Unexpected result: {:?}", r),
        }
        assert_eq!(SessionState::Connected, *session.state());
    }

    #[test]
    fn select_replaces_and_failure_deselects() {
        let (mut session, out) = session(
            b"* OK ready\r\n\
              1 OK logged in\r\n\
              2 OK [READ-ONLY] done\r\n\
              3 OK [READ-ONLY] done\r\n\
              4 NO [NONEXISTENT] No such mailbox\r\n\
              5 BAD what\r\n",
        );
        session.authenticate("user", "secret").unwrap();
        session.select_folder("INBOX").unwrap();
        session.select_folder("Archive/2022").unwrap();
        assert_eq!(
            SessionState::Selected("Archive/2022".to_owned()),
            *session.state()
        );

        match session.select_folder("Nope") {
            Err(Error::FolderNotFound(name)) => assert_eq!("Nope", name),
            r => panic!("Unexpected result: {:?}", r),
        }
        assert_eq!(SessionState::Authenticated, *session.state());
        assert_matches!(
            Err(Error::InvalidState(..)),
            session.search(SearchCriteria::All)
        );

        assert_matches!(Err(Error::Protocol(_)), session.select_folder("x"));

        assert!(sent(&out).contains("3 EXAMINE \"Archive/2022\"\r\n"));
    }

    #[test]
    fn empty_search() {
        let (mut session, _) = session(
            b"* OK ready\r\n\
              1 OK logged in\r\n\
              2 OK done\r\n\
              * SEARCH\r\n\
              3 OK done\r\n",
        );
        session.authenticate("user", "secret").unwrap();
        session.select_folder("INBOX").unwrap();
        assert_eq!(
            Vec::<u32>::new(),
            session.search(SearchCriteria::All).unwrap()
        );
    }

    #[test]
    fn fetch_failures_name_the_message() {
        let (mut session, _) = session(
            b"* OK ready\r\n\
              1 OK logged in\r\n\
              2 OK done\r\n\
              3 NO message expunged\r\n\
              * 8 FETCH (FLAGS ())\r\n\
              4 OK done\r\n",
        );
        session.authenticate("user", "secret").unwrap();
        session.select_folder("INBOX").unwrap();

        match session.fetch_raw(7) {
            Err(Error::Fetch(7, text)) => {
                assert_eq!("message expunged", text)
            }
            r => panic!("Unexpected result: {:?}", r),
        }
        assert_matches!(Err(Error::Fetch(8, _)), session.fetch_raw(8));
        assert!(Error::Fetch(8, String::new()).is_per_message());
    }

    #[test]
    fn connection_loss_is_not_per_message() {
        let (mut session, _) = session(
            b"* OK ready\r\n\
              1 OK logged in\r\n\
              2 OK done\r\n",
        );
        session.authenticate("user", "secret").unwrap();
        session.select_folder("INBOX").unwrap();

        let err = session.fetch_raw(1).unwrap_err();
        assert!(!err.is_per_message());
        assert_matches!(Error::Connection(_), err);
        assert_eq!(SessionState::Disconnected, *session.state());
    }

    #[test]
    fn greetings() {
        let (stream, _) = ScriptedStream::new(b"* BYE go away\r\n");
        assert_matches!(
            Err(Error::Connection(_)),
            MailSession::from_stream(stream).map(|_| ())
        );

        let (stream, _) = ScriptedStream::new(b"* PREAUTH welcome back\r\n");
        let session = MailSession::from_stream(stream).unwrap();
        assert_eq!(SessionState::Authenticated, *session.state());
    }

    #[test]
    fn drop_logs_out() {
        let (session, out) = session(b"* OK ready\r\n* BYE bye\r\n1 OK\r\n");
        drop(session);
        assert_eq!("1 LOGOUT\r\n", sent(&out));
    }

    #[test]
    fn list_failures_are_protocol_errors() {
        let (mut refused, _) = session(
            b"* OK ready\r\n\
              1 OK logged in\r\n\
              2 NO [CANNOT] list refused\r\n",
        );
        refused.authenticate("user", "secret").unwrap();
        match refused.list_folders() {
            Err(Error::Protocol(text)) => {
                assert!(text.contains("list refused"), "{}", text)
            }
            r => panic!("Unexpected result: {:?}", r),
        }
        assert_eq!(SessionState::Authenticated, *refused.state());

        let (mut malformed, _) = session(
            b"* OK ready\r\n\
              1 OK logged in\r\n\
              * LIST (\\HasNoChildren \"/\" INBOX\r\n\
              2 OK LIST completed\r\n",
        );
        malformed.authenticate("user", "secret").unwrap();
        assert_matches!(Err(Error::Protocol(_)), malformed.list_folders());
    }

    #[test]
    fn unexpected_response_ends_session() {
        let (mut session, out) = session(
            b"* OK ready\r\n\
              1 OK logged in\r\n\
              2 OK done\r\n\
              99 OK not yours\r\n\
              * 1 FETCH (BODY[] {2}\r\nhi)\r\n\
              3 OK done\r\n",
        );
        session.authenticate("user", "secret").unwrap();
        session.select_folder("INBOX").unwrap();

        let err = session.fetch_raw(1).unwrap_err();
        assert_matches!(Error::Protocol(_), err);
        assert_eq!(SessionState::Disconnected, *session.state());

        // The rest of the response is never read and no LOGOUT is sent
        drop(session);
        assert!(!sent(&out).contains("LOGOUT"));
    }

    #[test]
    fn connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        assert_matches!(
            Err(Error::Connection(_)),
            connect(&options(port)).map(|_| ())
        );
    }

    #[test]
    fn tls_handshake_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let _ = stream.write_all(b"* OK plaintext IMAP here\r\n");
        });

        match connect(&options(port)) {
            Err(Error::Connection(text)) => {
                assert!(text.contains("TLS handshake"), "{}", text)
            }
            Err(e) => panic!("Unexpected error: {}", e),
            Ok(_) => panic!("Handshake succeeded against plaintext"),
        }

        server.join().unwrap();
    }
}
