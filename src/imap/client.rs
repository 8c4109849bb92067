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

//! A minimal line-level IMAP client.
//!
//! This only knows how to frame commands and responses: it sends the chunks
//! produced by `syntax::Command::encode`, waits for continuations between
//! them, and collects untagged responses until the tagged completion. All
//! interpretation of the responses is left to the caller.

use std::io::{self, BufRead, Read, Write};
use std::str;

use lazy_static::lazy_static;
use log::trace;
use regex::bytes::Regex;
use thiserror::Error;

use super::syntax::{self as s, ResponseLine, Status};

lazy_static! {
    static ref LITERAL_AT_EOL: Regex =
        Regex::new(r#"\{([0-9]+)\+?\}\r?\n$"#).unwrap();
}

/// Literals larger than this are refused rather than buffered.
const MAX_LITERAL: u32 = 256 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("Unexpected response: {0}")]
    Unexpected(String),
    #[error("Server closed the connection: {0}")]
    Bye(String),
}

/// The result of one command.
#[derive(Clone, Debug)]
pub struct Response {
    /// The data of every untagged response received, in order.
    pub untagged: Vec<Vec<u8>>,
    pub status: Status,
    pub text: String,
}

pub struct Client<S> {
    stream: io::BufReader<S>,
    next_tag: u64,
}

impl<S: Read + Write> Client<S> {
    pub fn new(stream: S) -> Self {
        Client {
            stream: io::BufReader::new(stream),
            next_tag: 1,
        }
    }

    /// Read the server greeting.
    ///
    /// Returns the condition (`OK` or `PREAUTH`) and text of the greeting. A
    /// `BYE` greeting is an error.
    pub fn read_greeting(&mut self) -> Result<(Status, String), Error> {
        let mut line = Vec::new();
        self.read_logical_line(&mut line)?;

        match ResponseLine::parse(&line) {
            Some(ResponseLine::Untagged(data)) => {
                match s::untagged_status(&data) {
                    Some((Status::Bye, text)) => Err(Error::Bye(text)),
                    Some((status @ Status::Ok, text))
                    | Some((status @ Status::PreAuth, text)) => {
                        Ok((status, text))
                    }
                    _ => Err(unexpected(&line)),
                }
            }
            _ => Err(unexpected(&line)),
        }
    }

    /// Send `command` and read responses up to and including its tagged
    /// completion.
    ///
    /// A `NO` or `BAD` completion is not an error at this level.
    pub fn command(
        &mut self,
        command: s::Command<'_>,
    ) -> Result<Response, Error> {
        let tag = self.next_tag.to_string();
        self.next_tag += 1;

        let chunks = command.encode(&tag);
        let mut untagged = Vec::new();
        let mut bye = None;

        for (ix, chunk) in chunks.iter().enumerate() {
            if !command.is_sensitive() {
                let what = if 0 == ix { ">>[cmd]" } else { ">>[lit]" };
                self.trace(ix > 0, what, chunk);
            } else if 0 == ix {
                trace!("WIRE >>[cmd] {} {} <censored>", tag, command.name());
            }

            self.stream.get_mut().write_all(chunk)?;
            self.stream.get_mut().flush()?;

            if ix + 1 < chunks.len() {
                // Wait for the server to accept the literal
                loop {
                    match self.read_response(&mut bye)? {
                        ResponseLine::Continuation(_) => break,
                        ResponseLine::Untagged(data) => untagged.push(data),
                        ResponseLine::Tagged {
                            tag: rtag,
                            status,
                            text,
                        } if rtag == tag => {
                            return Ok(Response {
                                untagged,
                                status,
                                text,
                            });
                        }
                        ResponseLine::Tagged { tag: rtag, .. } => {
                            return Err(Error::Unexpected(format!(
                                "Response for unknown tag {}",
                                rtag
                            )));
                        }
                    }
                }
            }
        }

        loop {
            match self.read_response(&mut bye)? {
                ResponseLine::Untagged(data) => untagged.push(data),
                ResponseLine::Tagged {
                    tag: rtag,
                    status,
                    text,
                } if rtag == tag => {
                    return Ok(Response {
                        untagged,
                        status,
                        text,
                    });
                }
                ResponseLine::Tagged { tag: rtag, .. } => {
                    return Err(Error::Unexpected(format!(
                        "Response for unknown tag {}",
                        rtag
                    )));
                }
                ResponseLine::Continuation(text) => {
                    return Err(Error::Unexpected(format!(
                        "Continuation without literal: {}",
                        text
                    )));
                }
            }
        }
    }

    /// Read one response line.
    ///
    /// If the server has announced `BYE` and then closes the connection, the
    /// result is `Error::Bye` rather than an I/O error.
    fn read_response(
        &mut self,
        bye: &mut Option<String>,
    ) -> Result<ResponseLine, Error> {
        let mut line = Vec::new();
        match self.read_logical_line(&mut line) {
            Ok(()) => (),
            Err(Error::Io(e)) if io::ErrorKind::UnexpectedEof == e.kind() => {
                return Err(match bye.take() {
                    Some(text) => Error::Bye(text),
                    None => Error::Io(e),
                });
            }
            Err(e) => return Err(e),
        }

        let response =
            ResponseLine::parse(&line).ok_or_else(|| unexpected(&line))?;
        if let ResponseLine::Untagged(ref data) = response {
            if let Some((Status::Bye, text)) = s::untagged_status(data) {
                *bye = Some(text);
            }
        }

        Ok(response)
    }

    /// Read one logical line, i.e., a line including any literals it
    /// introduces, into `dst`. The final line ending is removed.
    fn read_logical_line(&mut self, dst: &mut Vec<u8>) -> Result<(), Error> {
        loop {
            let start = dst.len();
            let nread = self.stream.read_until(b'\n', dst)?;
            self.trace(false, "<<[eol]", &dst[start..]);
            if 0 == nread || !dst.ends_with(b"\n") {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "Connection closed in the middle of a line",
                )));
            }

            let literal_len = LITERAL_AT_EOL
                .captures(&dst[start..])
                .and_then(|cap| cap.get(1))
                .and_then(|len| str::from_utf8(len.as_bytes()).ok())
                .and_then(|len| len.parse::<u32>().ok());

            match literal_len {
                Some(len) if len > MAX_LITERAL => {
                    return Err(Error::Unexpected(format!(
                        "Literal of {} bytes is too large",
                        len
                    )));
                }
                Some(len) => self.read_literal(dst, len)?,
                None => break,
            }
        }

        dst.pop();
        if dst.ends_with(b"\r") {
            dst.pop();
        }

        Ok(())
    }

    fn read_literal(&mut self, dst: &mut Vec<u8>, n: u32) -> Result<(), Error> {
        let start = dst.len();
        let nread = self.stream.by_ref().take(n.into()).read_to_end(dst)?;
        self.trace(true, "<<[lit]", &dst[start..]);
        if n as usize > nread {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "Hit EOF before end of literal",
            )));
        }

        Ok(())
    }

    fn trace(&self, truncate: bool, what: &str, data: &[u8]) {
        if !log::log_enabled!(log::Level::Trace) {
            return;
        }

        if data.is_empty() {
            trace!("WIRE {}<empty>", what);
            return;
        }

        let (data, truncated) = if truncate {
            data.split_at(data.len().min(128))
        } else {
            (data, &[] as &[u8])
        };

        let mut start = 0;
        for split in memchr::memchr_iter(b'\n', data)
            .chain(std::iter::once(data.len() - 1))
        {
            if split < start {
                continue;
            }

            let data = &data[start..=split];
            start = split + 1;

            let mut vis = String::new();
            for &byte in data {
                match byte {
                    b' '..=b'~' => vis.push(byte as char),
                    b'\n' => vis.push_str("\\n"),
                    b'\r' => vis.push_str("\\r"),
                    b => vis.push_str(&format!("\\x{:02X}", b)),
                }
            }

            trace!("WIRE {} {}", what, vis);
        }

        if !truncated.is_empty() {
            trace!("WIRE {}<{} more bytes>", what, truncated.len());
        }
    }
}

impl From<Error> for crate::support::error::Error {
    fn from(e: Error) -> Self {
        use crate::support::error::Error as E;

        match e {
            Error::Io(e) => E::Connection(e.to_string()),
            Error::Bye(text) => {
                E::Connection(format!("Server closed the connection: {}", text))
            }
            Error::Unexpected(text) => E::Protocol(text),
        }
    }
}

fn unexpected(line: &[u8]) -> Error {
    Error::Unexpected(
        String::from_utf8_lossy(&line[..line.len().min(128)]).into_owned(),
    )
}
