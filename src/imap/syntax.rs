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

//! Just enough of the IMAP4rev1 grammar (RFC 3501) for a read-only client.
//!
//! Commands are written with the same conservative encoding decisions as the
//! rest of the system: strings go out as quoted strings when that is possible
//! and as synchronising literals otherwise. Atoms are only used for fixed
//! keywords.
//!
//! Responses are read one logical line at a time; literals stay inline in the
//! line, exactly as they appeared on the wire, and are interpreted by the
//! parsers here.

use std::str;

use chrono::prelude::*;
use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, tag_no_case as kw, take, take_while1},
    combinator::{all_consuming, map, map_opt, not, opt, recognize, rest},
    multi::{fold_many0, many0, separated_list},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};

/// The condition of a status response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Ok,
    No,
    Bad,
    Bye,
    PreAuth,
}

impl Status {
    fn from_atom(word: &[u8]) -> Option<Self> {
        if word.eq_ignore_ascii_case(b"OK") {
            Some(Status::Ok)
        } else if word.eq_ignore_ascii_case(b"NO") {
            Some(Status::No)
        } else if word.eq_ignore_ascii_case(b"BAD") {
            Some(Status::Bad)
        } else if word.eq_ignore_ascii_case(b"BYE") {
            Some(Status::Bye)
        } else if word.eq_ignore_ascii_case(b"PREAUTH") {
            Some(Status::PreAuth)
        } else {
            None
        }
    }
}

/// A logical response line from the server, without its final line ending.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResponseLine {
    /// `tag status text`
    Tagged {
        tag: String,
        status: Status,
        text: String,
    },
    /// `* data`; holds only the data part.
    Untagged(Vec<u8>),
    /// `+ text`
    Continuation(String),
}

impl ResponseLine {
    pub fn parse(line: &[u8]) -> Option<Self> {
        all_consuming(response_line)(line).ok().map(|(_, r)| r)
    }
}

/// If `data` is an untagged status response (e.g. the greeting or a `BYE`),
/// return its condition and text.
pub fn untagged_status(data: &[u8]) -> Option<(Status, String)> {
    pair(status, map(rest, trimmed_text))(data)
        .ok()
        .map(|(_, r)| r)
}

/// One entry of a `LIST` response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListEntry {
    pub attributes: Vec<String>,
    pub delimiter: Option<char>,
    /// The name in wire form, i.e., still in modified UTF-7.
    pub name: String,
}

impl ListEntry {
    pub fn is_selectable(&self) -> bool {
        !self
            .attributes
            .iter()
            .any(|a| a.eq_ignore_ascii_case("\\Noselect"))
    }
}

/// Parse `LIST (attributes) delimiter name`.
///
/// Returns `None` if `data` is not a `LIST` response, and `Some(Err)` if it
/// is one but is malformed.
pub fn parse_list(data: &[u8]) -> Option<Result<ListEntry, String>> {
    let body = keyword("LIST", data)?;

    Some(
        all_consuming(list_body)(body)
            .map(|(_, entry)| entry)
            .map_err(|_| format!("Malformed LIST response: {}", lossy(data))),
    )
}

/// Parse `SEARCH n n n...`.
///
/// Returns `None` if `data` is not a `SEARCH` response, and `Some(Err)` if it
/// is one but is malformed.
pub fn parse_search(data: &[u8]) -> Option<Result<Vec<u32>, String>> {
    let body = keyword("SEARCH", data)?;

    Some(
        all_consuming(search_body)(body)
            .map(|(_, ids)| ids)
            .map_err(|_| {
                format!("Malformed SEARCH response: {}", lossy(data))
            }),
    )
}

/// The interesting parts of a `FETCH` response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchData {
    pub seqnum: u32,
    /// The content of `BODY[]`, if the response contained it and it was not
    /// `NIL`.
    pub body: Option<Vec<u8>>,
}

/// Parse `n FETCH (items...)`, extracting `BODY[]` and skipping everything
/// else.
///
/// Returns `None` if `data` is not a `FETCH` response, and `Some(Err)` if it
/// is one but is malformed.
pub fn parse_fetch(data: &[u8]) -> Option<Result<FetchData, String>> {
    let (body, seqnum) = fetch_prefix(data).ok()?;

    Some(
        all_consuming(fetch_msg_att)(body)
            .map(|(_, body)| FetchData { seqnum, body })
            .map_err(|_| {
                format!("Malformed FETCH response: {}", truncated(data))
            }),
    )
}

// ==================== RESPONSE PARSERS ====================

fn response_line(i: &[u8]) -> IResult<&[u8], ResponseLine> {
    alt((
        map(preceded(tag("+"), rest), |text| {
            ResponseLine::Continuation(trimmed_text(text))
        }),
        map(preceded(tag("* "), rest), |data: &[u8]| {
            ResponseLine::Untagged(data.to_vec())
        }),
        map(
            tuple((atom, tag(" "), status, rest)),
            |(tag_atom, _, condition, text)| ResponseLine::Tagged {
                tag: String::from_utf8_lossy(tag_atom).into_owned(),
                status: condition,
                text: trimmed_text(text),
            },
        ),
    ))(i)
}

fn status(i: &[u8]) -> IResult<&[u8], Status> {
    map_opt(atom, Status::from_atom)(i)
}

fn list_body(i: &[u8]) -> IResult<&[u8], ListEntry> {
    let (i, attributes) = preceded(
        tag(" "),
        delimited(tag("("), separated_list(tag(" "), atom), tag(")")),
    )(i)?;
    let (i, delimiter) = preceded(
        tag(" "),
        alt((map(nil, |_| None), map(map_opt(quoted, single_char), Some))),
    )(i)?;
    let (i, name) = preceded(
        tag(" "),
        map_opt(astring, |name| String::from_utf8(name).ok()),
    )(i)?;

    Ok((
        i,
        ListEntry {
            attributes: attributes
                .into_iter()
                .map(|a| String::from_utf8_lossy(a).into_owned())
                .collect(),
            delimiter,
            name,
        },
    ))
}

fn search_body(i: &[u8]) -> IResult<&[u8], Vec<u32>> {
    // Some servers leave a space after the last number
    terminated(many0(preceded(tag(" "), number)), opt(tag(" ")))(i)
}

fn fetch_prefix(i: &[u8]) -> IResult<&[u8], u32> {
    terminated(
        number,
        preceded(tag(" "), terminated(kw("FETCH"), word_end)),
    )(i)
}

/// The `(items...)` of a `FETCH` response, yielding the last `BODY[]` seen.
fn fetch_msg_att(i: &[u8]) -> IResult<&[u8], Option<Vec<u8>>> {
    let (i, items) = preceded(
        tag(" "),
        delimited(tag("("), separated_list(tag(" "), fetch_item), tag(")")),
    )(i)?;
    Ok((i, items.into_iter().flatten().last().flatten()))
}

/// One `name value` pair. The outer `Option` is `Some` only for `BODY[]`.
fn fetch_item(i: &[u8]) -> IResult<&[u8], Option<Option<Vec<u8>>>> {
    let (i, name) = terminated(fetch_att_name, tag(" "))(i)?;
    if name.eq_ignore_ascii_case(b"BODY[]") {
        map(nstring, Some)(i)
    } else {
        map(skip_value, |_| None)(i)
    }
}

/// A fetch item name like `FLAGS` or `BODY[HEADER.FIELDS (DATE)]<0>`.
fn fetch_att_name(i: &[u8]) -> IResult<&[u8], &[u8]> {
    recognize(pair(
        take_while1(is_section_atom_char),
        opt(tuple((
            tag("["),
            opt(is_not("]")),
            tag("]"),
            opt(take_while1(is_section_atom_char)),
        ))),
    ))(i)
}

/// Any value at all, including parenthesised lists.
fn skip_value(i: &[u8]) -> IResult<&[u8], ()> {
    alt((
        map(string, |_| ()),
        map(
            delimited(tag("("), separated_list(tag(" "), skip_value), tag(")")),
            |_| (),
        ),
        map(atom, |_| ()),
    ))(i)
}

// ==================== PRIMITIVE PARSERS ====================

fn atom(i: &[u8]) -> IResult<&[u8], &[u8]> {
    take_while1(is_atom_char)(i)
}

fn word_end(i: &[u8]) -> IResult<&[u8], ()> {
    not(take_while1(is_atom_char))(i)
}

fn nil(i: &[u8]) -> IResult<&[u8], &[u8]> {
    terminated(kw("NIL"), word_end)(i)
}

fn number(i: &[u8]) -> IResult<&[u8], u32> {
    map_opt(take_while1(|b: u8| b.is_ascii_digit()), |s| {
        str::from_utf8(s).ok().and_then(|s| s.parse::<u32>().ok())
    })(i)
}

fn literal(i: &[u8]) -> IResult<&[u8], &[u8]> {
    let (i, len) = delimited(
        tag("{"),
        number,
        tuple((opt(tag("+")), tag("}"), opt(tag("\r")), tag("\n"))),
    )(i)?;
    take(len)(i)
}

fn quoted_char(i: &[u8]) -> IResult<&[u8], &[u8]> {
    preceded(tag("\\"), take(1usize))(i)
}

fn quoted(i: &[u8]) -> IResult<&[u8], Vec<u8>> {
    delimited(
        tag("\""),
        fold_many0(
            alt((quoted_char, is_not("\"\\"))),
            Vec::new(),
            |mut accum: Vec<u8>, piece: &[u8]| {
                accum.extend_from_slice(piece);
                accum
            },
        ),
        tag("\""),
    )(i)
}

fn string(i: &[u8]) -> IResult<&[u8], Vec<u8>> {
    alt((quoted, map(literal, <[u8]>::to_vec)))(i)
}

fn astring(i: &[u8]) -> IResult<&[u8], Vec<u8>> {
    alt((string, map(atom, <[u8]>::to_vec)))(i)
}

fn nstring(i: &[u8]) -> IResult<&[u8], Option<Vec<u8>>> {
    alt((map(nil, |_| None), map(string, Some)))(i)
}

/// If `data` starts with the whole atom `word`, return what follows it.
fn keyword<'a>(word: &'static str, data: &'a [u8]) -> Option<&'a [u8]> {
    let result: IResult<&'a [u8], &'a [u8]> =
        terminated(kw(word), word_end)(data);
    result.ok().map(|(tail, _)| tail)
}

fn single_char(s: Vec<u8>) -> Option<char> {
    let s = String::from_utf8(s).ok()?;
    let mut chars = s.chars();
    let ch = chars.next()?;
    if chars.next().is_some() {
        None
    } else {
        Some(ch)
    }
}

fn trimmed_text(text: &[u8]) -> String {
    String::from_utf8_lossy(text).trim().to_owned()
}

fn is_atom_char(ch: u8) -> bool {
    ch > b' ' && ch < 0x7F && !matches!(ch, b'(' | b')' | b'{' | b'"')
}

fn is_section_atom_char(ch: u8) -> bool {
    is_atom_char(ch) && b'[' != ch && b']' != ch
}

/// Search criteria supported by the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchKey {
    All,
    Since(NaiveDate),
}

/// A command to send to the server.
#[derive(Clone, Copy, Debug)]
pub enum Command<'a> {
    Login { user: &'a str, password: &'a str },
    List,
    /// Read-only `SELECT`. The name must already be in wire form.
    Examine(&'a str),
    Search(SearchKey),
    /// `BODY.PEEK[]` of one message by sequence number.
    Fetch(u32),
    Logout,
}

impl Command<'_> {
    pub fn name(&self) -> &'static str {
        match *self {
            Command::Login { .. } => "LOGIN",
            Command::List => "LIST",
            Command::Examine(..) => "EXAMINE",
            Command::Search(..) => "SEARCH",
            Command::Fetch(..) => "FETCH",
            Command::Logout => "LOGOUT",
        }
    }

    /// Whether the command carries secrets and must not be traced.
    pub fn is_sensitive(&self) -> bool {
        matches!(*self, Command::Login { .. })
    }

    /// Encode this command with the given tag.
    ///
    /// The result is split into chunks. Every chunk but the last ends with a
    /// synchronising literal prefix, and the client must wait for a
    /// continuation response before sending the next chunk.
    pub fn encode(&self, tag: &str) -> Vec<Vec<u8>> {
        let mut w = CommandWriter::default();
        w.verbatim(tag);
        w.verbatim(" ");
        w.verbatim(self.name());

        match *self {
            Command::Login { user, password } => {
                w.verbatim(" ");
                w.string(user);
                w.verbatim(" ");
                w.string(password);
            }
            Command::List => w.verbatim(" \"\" \"*\""),
            Command::Examine(mailbox) => {
                w.verbatim(" ");
                w.string(mailbox);
            }
            Command::Search(SearchKey::All) => w.verbatim(" ALL"),
            Command::Search(SearchKey::Since(date)) => w.verbatim(&format!(
                " SINCE \"{}\"",
                date.format("%-d-%b-%Y")
            )),
            Command::Fetch(seqnum) => {
                w.verbatim(&format!(" {} (BODY.PEEK[])", seqnum))
            }
            Command::Logout => (),
        }

        w.finish()
    }
}

#[derive(Default)]
struct CommandWriter {
    chunks: Vec<Vec<u8>>,
    current: Vec<u8>,
}

impl CommandWriter {
    fn verbatim(&mut self, s: &str) {
        self.current.extend_from_slice(s.as_bytes());
    }

    fn string(&mut self, s: &str) {
        if is_quotable(s) {
            self.current.push(b'"');
            for &b in s.as_bytes() {
                if b'"' == b || b'\\' == b {
                    self.current.push(b'\\');
                }
                self.current.push(b);
            }
            self.current.push(b'"');
        } else {
            self.verbatim(&format!("{{{}}}\r\n", s.len()));
            self.chunks.push(std::mem::take(&mut self.current));
            self.current.extend_from_slice(s.as_bytes());
        }
    }

    fn finish(mut self) -> Vec<Vec<u8>> {
        self.current.extend_from_slice(b"\r\n");
        self.chunks.push(self.current);
        self.chunks
    }
}

fn is_quotable(s: &str) -> bool {
    s.len() < 1024
        && s.bytes()
            .all(|b| b >= 0x01 && b < 0x80 && b'\r' != b && b'\n' != b)
}

fn lossy(data: &[u8]) -> String {
    String::from_utf8_lossy(data).into_owned()
}

fn truncated(data: &[u8]) -> String {
    lossy(&data[..data.len().min(128)])
}
