/*
 * plover - protocol parser.
 *
 * This file is part of plover.
 *
 * plover is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * plover is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with plover. If not, see <http://www.gnu.org/licenses/>.
 */

//! Response-line classification and data parsers for IMAP4rev1 server
//! output (RFC 3501 §7, RFC 4315).

use std::str::FromStr;

use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, take, take_until, take_while, take_while1},
    character::is_digit,
    combinator::{map, map_res, opt},
    multi::{length_data, separated_list1},
    sequence::delimited,
    IResult,
};

#[cfg(test)]
mod tests;

use crate::{
    error::{Error, ErrorKind, Result},
    BytesExt, Flag, ImapNum, MessageSequenceNumber, CRLF, UID, UIDVALIDITY,
};

pub const UNTAGGED_PREFIX: &[u8] = b"* ";

macro_rules! to_str (
    ($v:expr) => (unsafe{ std::str::from_utf8_unchecked($v) })
);

/// Data kind of an untagged server line.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UntaggedKind {
    Capability,
    Flags,
    List,
    Lsub,
    Mailbox,
    Search,
    Status,
    Bye,
    Exists(ImapNum),
    Recent(ImapNum),
    Expunge(MessageSequenceNumber),
    Fetch(MessageSequenceNumber),
    Unknown,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TaggedStatus {
    Ok,
    No,
    Bad,
    Preauth,
    Bye,
}

/// Shape of one complete server line.
///
/// Classification is total: every line maps to exactly one variant, with
/// `Unrecognized` meaning "read further lines to resynchronize".
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResponseLine<'a> {
    /// Server is ready for more command data (`+ ...`).
    Continuation(&'a [u8]),
    /// Server data not tied to a specific command (`* ...`).
    Untagged {
        kind: UntaggedKind,
        payload: &'a [u8],
    },
    /// Completion (or status) line for a tagged command.
    Tagged {
        tag: &'a [u8],
        status: TaggedStatus,
        rest: &'a [u8],
    },
    /// Line matching neither pattern; the engine keeps reading.
    Unrecognized(&'a [u8]),
}

fn leading_number(input: &[u8]) -> Option<(ImapNum, &[u8])> {
    let end = input.iter().position(|b| !b.is_ascii_digit())?;
    if end == 0 {
        return None;
    }
    let num = ImapNum::from_str(to_str!(&input[..end])).ok()?;
    Some((num, input[end..].ltrim()))
}

fn untagged_kind(input: &[u8]) -> UntaggedKind {
    if let Some((num, rest)) = leading_number(input) {
        let rest = rest.rtrim();
        return if rest.eq_ignore_ascii_case(b"EXISTS") {
            UntaggedKind::Exists(num)
        } else if rest.eq_ignore_ascii_case(b"RECENT") {
            UntaggedKind::Recent(num)
        } else if rest.eq_ignore_ascii_case(b"EXPUNGE") {
            UntaggedKind::Expunge(num)
        } else if rest.len() >= b"FETCH".len()
            && rest[..b"FETCH".len()].eq_ignore_ascii_case(b"FETCH")
        {
            UntaggedKind::Fetch(num)
        } else {
            UntaggedKind::Unknown
        };
    }
    let table: &[(&[u8], UntaggedKind)] = &[
        (b"CAPABILITY", UntaggedKind::Capability),
        (b"FLAGS", UntaggedKind::Flags),
        (b"LIST", UntaggedKind::List),
        (b"LSUB", UntaggedKind::Lsub),
        (b"MAILBOX", UntaggedKind::Mailbox),
        (b"SEARCH", UntaggedKind::Search),
        (b"STATUS", UntaggedKind::Status),
        (b"BYE", UntaggedKind::Bye),
    ];
    for (prefix, kind) in table {
        if input.len() >= prefix.len() && input[..prefix.len()].eq_ignore_ascii_case(prefix) {
            // Prefix must end at a word boundary (`* FLAGS (..` vs `* FLAGSX`).
            if input
                .get(prefix.len())
                .map(|b| *b == b' ' || *b == b'\r' || *b == b'\n')
                .unwrap_or(true)
            {
                return *kind;
            }
        }
    }
    UntaggedKind::Unknown
}

fn status_word(input: &[u8]) -> Option<(TaggedStatus, &[u8])> {
    let table: &[(&[u8], TaggedStatus)] = &[
        (b"OK", TaggedStatus::Ok),
        (b"NO", TaggedStatus::No),
        (b"BAD", TaggedStatus::Bad),
        (b"PREAUTH", TaggedStatus::Preauth),
        (b"BYE", TaggedStatus::Bye),
    ];
    for (word, status) in table {
        if input.len() >= word.len() && input[..word.len()].eq_ignore_ascii_case(word) {
            let rest = &input[word.len()..];
            if rest.is_empty() || rest.starts_with(b" ") || rest.starts_with(CRLF) {
                return Some((*status, rest.ltrim()));
            }
        }
    }
    None
}

/// Classify one complete (logical) server line.
pub fn classify_line(line: &[u8]) -> ResponseLine<'_> {
    if line.starts_with(b"+") {
        let payload = line[1..].ltrim();
        return ResponseLine::Continuation(payload);
    }
    if let Some(stripped) = line.strip_prefix(UNTAGGED_PREFIX) {
        return ResponseLine::Untagged {
            kind: untagged_kind(stripped),
            payload: stripped,
        };
    }
    // Tagged: `<tag> SP <status> [SP text]`.
    if let Some(sp) = line.find(b" ") {
        let (tag, rest) = line.split_at(sp);
        if !tag.is_empty() && tag.iter().all(|b| b.is_ascii_alphanumeric()) {
            if let Some((status, rest)) = status_word(&rest[1..]) {
                return ResponseLine::Tagged { tag, status, rest };
            }
        }
    }
    ResponseLine::Unrecognized(line)
}

/// Response codes carried in bracketed text of status responses
/// (RFC 3501 §7.1), plus the UIDPLUS codes of RFC 4315.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ResponseCode {
    /// Human-readable text that must be shown to the user.
    Alert(String),
    Badcharset(Option<String>),
    Capability,
    Parse(String),
    Permanentflags(String),
    /// The mailbox is selected read-only.
    ReadOnly,
    /// The mailbox is selected read-write.
    ReadWrite,
    Trycreate,
    Uidnext(UID),
    Uidvalidity(UIDVALIDITY),
    Unseen(ImapNum),
    /// `[COPYUID uidvalidity source-uid dest-uid]` on a COPY completion.
    Copyuid {
        uidvalidity: UIDVALIDITY,
        source: UID,
        dest: UID,
    },
    /// `[APPENDUID uidvalidity uid]` on an APPEND completion.
    Appenduid { uidvalidity: UIDVALIDITY, uid: UID },
    None,
}

impl std::fmt::Display for ResponseCode {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        use ResponseCode::*;
        match self {
            Alert(s) => write!(fmt, "ALERT: {}", s),
            // `None`/`Some` would resolve to `ResponseCode::None` under the
            // glob import above.
            Badcharset(Option::None) => {
                write!(fmt, "Given charset is not supported by this server.")
            }
            Badcharset(Option::Some(s)) => write!(
                fmt,
                "Given charset is not supported by this server. Supported ones are: {}",
                s
            ),
            Capability => write!(fmt, "Capability response"),
            Parse(s) => write!(fmt, "Server error in parsing message headers: {}", s),
            Permanentflags(s) => write!(fmt, "Mailbox supports these flags: {}", s),
            ReadOnly => write!(fmt, "This mailbox is selected read-only."),
            ReadWrite => write!(fmt, "This mailbox is selected with read-write permissions."),
            Trycreate => write!(
                fmt,
                "Failed to operate on the target mailbox because it doesn't exist. Try creating \
                 it first."
            ),
            Uidnext(uid) => write!(fmt, "Next UID value is {}", uid),
            Uidvalidity(uid) => write!(fmt, "UIDVALIDITY value is {}", uid),
            Unseen(n) => write!(fmt, "First message without the \\Seen flag is {}", n),
            Copyuid {
                uidvalidity,
                source,
                dest,
            } => write!(
                fmt,
                "Copied UID {} to UID {} (UIDVALIDITY {})",
                source, dest, uidvalidity
            ),
            Appenduid { uidvalidity, uid } => {
                write!(fmt, "Appended as UID {} (UIDVALIDITY {})", uid, uidvalidity)
            }
            None => write!(fmt, "None"),
        }
    }
}

fn bracket_num(val: &[u8], prefix: &[u8]) -> UID {
    val.find(b"]")
        .map(|end| &val[prefix.len()..end])
        .and_then(|s| UID::from_str(to_str!(s)).ok())
        .unwrap_or(0)
}

impl ResponseCode {
    pub fn from(val: &[u8]) -> Self {
        use ResponseCode::*;
        if !val.starts_with(b"[") {
            let msg = val.trim();
            if msg.is_empty() {
                return None;
            }
            return Alert(String::from_utf8_lossy(msg).to_string());
        }

        let val = &val[1..];
        if val.starts_with(b"BADCHARSET") {
            let charsets = val.find(b"(").map(|pos| val[pos + 1..].trim());
            Badcharset(charsets.map(|charsets| String::from_utf8_lossy(charsets).to_string()))
        } else if val.starts_with(b"READ-ONLY") {
            ReadOnly
        } else if val.starts_with(b"READ-WRITE") {
            ReadWrite
        } else if val.starts_with(b"TRYCREATE") {
            Trycreate
        } else if val.starts_with(b"UIDNEXT") {
            Uidnext(bracket_num(val, b"UIDNEXT "))
        } else if val.starts_with(b"UIDVALIDITY") {
            Uidvalidity(bracket_num(val, b"UIDVALIDITY "))
        } else if val.starts_with(b"UNSEEN") {
            Unseen(bracket_num(val, b"UNSEEN "))
        } else if val.starts_with(b"CAPABILITY") {
            Capability
        } else if val.starts_with(b"PARSE") {
            let msg = val.find(b"] ").map(|pos| &val[pos + 2..]).unwrap_or(b"");
            Parse(String::from_utf8_lossy(msg.trim()).to_string())
        } else if val.starts_with(b"PERMANENTFLAGS (") {
            let flags = val
                .find(b")")
                .map(|end| &val[b"PERMANENTFLAGS (".len()..end])
                .unwrap_or(b"");
            Permanentflags(String::from_utf8_lossy(flags).to_string())
        } else if val.starts_with(b"COPYUID ") {
            match copyuid(&val[b"COPYUID ".len()..]) {
                Ok((_, code)) => code,
                Err(_) => None,
            }
        } else if val.starts_with(b"APPENDUID ") {
            match appenduid(&val[b"APPENDUID ".len()..]) {
                Ok((_, code)) => code,
                Err(_) => None,
            }
        } else if let Some(pos) = val.find(b"] ") {
            let msg = val[pos + 2..].trim();
            if msg.is_empty() {
                None
            } else {
                Alert(String::from_utf8_lossy(msg).to_string())
            }
        } else {
            None
        }
    }
}

fn number(input: &[u8]) -> IResult<&[u8], ImapNum> {
    map_res(take_while1(is_digit), |s| ImapNum::from_str(to_str!(s)))(input)
}

// `COPYUID` carries uid-sets; only the first UID of each set is recorded
// since this client copies one message per command.
fn copyuid(input: &[u8]) -> IResult<&[u8], ResponseCode> {
    let (input, uidvalidity) = number(input)?;
    let (input, _) = tag(" ")(input)?;
    let (input, source) = number(input)?;
    let (input, _) = opt(alt((
        delimited(tag(":"), number, take_while(|b| b != b' ')),
        map(take_while1(|b| b != b' '), |_| 0),
    )))(input)?;
    let (input, _) = tag(" ")(input)?;
    let (input, dest) = number(input)?;
    Ok((
        input,
        ResponseCode::Copyuid {
            uidvalidity,
            source,
            dest,
        },
    ))
}

fn appenduid(input: &[u8]) -> IResult<&[u8], ResponseCode> {
    let (input, uidvalidity) = number(input)?;
    let (input, _) = tag(" ")(input)?;
    let (input, uid) = number(input)?;
    Ok((input, ResponseCode::Appenduid { uidvalidity, uid }))
}

/// Iterator over `\r\n`-terminated lines that does not split inside `{n}`
/// byte literals.
pub struct ImapLineIterator<'a> {
    slice: &'a [u8],
}

impl<'a> Iterator for ImapLineIterator<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        if self.slice.is_empty() {
            return None;
        }
        let mut i = 0;
        loop {
            // A declared literal length can point past a truncated buffer.
            let cur_slice = match self.slice.get(i..) {
                Some(s) => s,
                None => {
                    let ret = self.slice;
                    self.slice = &[];
                    return Some(ret);
                }
            };
            if let Some(pos) = cur_slice.find(CRLF) {
                if let Some(literal_start) = cur_slice[..pos].rfind(b"{") {
                    if let Ok((_, len)) =
                        delimited::<_, _, _, _, nom::error::Error<&[u8]>, _, _, _>(
                            tag("{"),
                            map_res(take_while1(is_digit), |s| usize::from_str(to_str!(s))),
                            tag("}\r\n"),
                        )(&cur_slice[literal_start..])
                    {
                        i += pos + 2 + len;
                        continue;
                    }
                }
                let ret = self.slice.get(..i + pos + 2).unwrap_or_default();
                self.slice = self.slice.get(i + pos + 2..).unwrap_or_default();
                return Some(ret);
            } else {
                let ret = self.slice;
                self.slice = self.slice.get(ret.len()..).unwrap_or_default();
                return Some(ret);
            }
        }
    }
}

pub trait ImapLineSplit {
    fn split_rn(&self) -> ImapLineIterator;
}

impl ImapLineSplit for [u8] {
    fn split_rn(&self) -> ImapLineIterator {
        ImapLineIterator { slice: self }
    }
}

/*
 * "* CAPABILITY IMAP4rev1 LITERAL+ SASL-IR LOGIN-REFERRALS ID ENABLE IDLE
 * UIDPLUS AUTH=PLAIN\r\n"
 */
pub fn capabilities(input: &[u8]) -> IResult<&[u8], Vec<&[u8]>> {
    let (input, _) = take_until("CAPABILITY ")(input)?;
    let (input, _) = tag("CAPABILITY ")(input)?;
    let (input, ret) = separated_list1(tag(" "), is_not(" ]\r\n"))(input)?;
    let (input, _) = opt(take_until(CRLF))(input)?;
    let (input, _) = opt(tag(CRLF))(input)?;
    Ok((input, ret))
}

/// Parse a parenthesized flag list body (already stripped of `(`).
pub fn flags(input: &[u8]) -> IResult<&[u8], (Flag, Vec<String>)> {
    let mut ret = Flag::default();
    let mut keywords = Vec::new();

    let mut input = input;
    while !input.starts_with(b")") && !input.is_empty() {
        let is_system_flag = input.starts_with(b"\\");
        if is_system_flag {
            input = &input[1..];
        }
        let mut match_end = 0;
        while match_end < input.len() {
            if input[match_end..].starts_with(b" ") || input[match_end..].starts_with(b")") {
                break;
            }
            match_end += 1;
        }

        match (is_system_flag, &input[..match_end]) {
            (true, t) if t.eq_ignore_ascii_case(b"Answered") => {
                ret.set(Flag::REPLIED, true);
            }
            (true, t) if t.eq_ignore_ascii_case(b"Flagged") => {
                ret.set(Flag::FLAGGED, true);
            }
            (true, t) if t.eq_ignore_ascii_case(b"Deleted") => {
                ret.set(Flag::TRASHED, true);
            }
            (true, t) if t.eq_ignore_ascii_case(b"Seen") => {
                ret.set(Flag::SEEN, true);
            }
            (true, t) if t.eq_ignore_ascii_case(b"Draft") => {
                ret.set(Flag::DRAFT, true);
            }
            (true, t) if t.eq_ignore_ascii_case(b"Recent") => {
                ret.set(Flag::RECENT, true);
            }
            (_, f) if f.is_empty() => {}
            (_, f) => {
                keywords.push(String::from_utf8_lossy(f).into());
            }
        }
        input = &input[match_end..];
        input = input.ltrim();
    }
    Ok((input, (ret, keywords)))
}

/// Quoted string or atom naming a mailbox in a LIST/LSUB line.
pub fn mailbox_token(input: &[u8]) -> IResult<&[u8], &str> {
    let (input, name) = alt((
        delimited(tag("\""), take_until("\""), tag("\"")),
        is_not("\r\n"),
    ))(input)?;
    match std::str::from_utf8(name) {
        Ok(s) => Ok((input, s)),
        Err(_) => Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Verify,
        ))),
    }
}

/// One `* LIST (attrs) "sep" name` or `* LSUB ...` line.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ListEntry {
    pub path: String,
    pub delimiter: Option<u8>,
    pub no_inferiors: bool,
    pub no_select: bool,
    pub marked: bool,
    pub unmarked: bool,
    pub has_children: bool,
    pub has_no_children: bool,
}

/*
 * LIST (\HasNoChildren) "." INBOX.Sent
 * LIST (\HasChildren) "." INBOX
 */
pub fn list_mailbox_result(input: &[u8]) -> IResult<&[u8], ListEntry> {
    let (input, _) = alt((tag("* LIST ("), tag("* LSUB (")))(input.ltrim())?;
    let (input, properties) = take_until(&b")"[0..])(input)?;
    let (input, _) = tag(b") ")(input)?;
    let (input, separator) = alt((
        map(tag("NIL"), |_| Option::<u8>::None),
        map(delimited(tag(b"\""), take(1_u32), tag(b"\"")), |s: &[u8]| {
            Some(s[0])
        }),
    ))(input)?;
    let (input, _) = take(1_u32)(input)?;
    let (input, path) = mailbox_token(input)?;
    let (input, _) = opt(tag(CRLF))(input)?;
    let mut f = ListEntry {
        path: path.to_string(),
        delimiter: separator,
        ..ListEntry::default()
    };
    for p in properties.split(|&b| b == b' ') {
        if p.eq_ignore_ascii_case(b"\\NoInferiors") {
            f.no_inferiors = true;
        } else if p.eq_ignore_ascii_case(b"\\NoSelect") || p.eq_ignore_ascii_case(b"\\NonExistent")
        {
            f.no_select = true;
        } else if p.eq_ignore_ascii_case(b"\\Marked") {
            f.marked = true;
        } else if p.eq_ignore_ascii_case(b"\\Unmarked") {
            f.unmarked = true;
        } else if p.eq_ignore_ascii_case(b"\\HasChildren") {
            f.has_children = true;
        } else if p.eq_ignore_ascii_case(b"\\HasNoChildren") {
            f.has_no_children = true;
        }
    }
    Ok((input, f))
}

/// Aggregate of the untagged data a `SELECT`/`EXAMINE` returns.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SelectResponse {
    pub exists: ImapNum,
    pub recent: ImapNum,
    pub flags: (Flag, Vec<String>),
    pub first_unseen: MessageSequenceNumber,
    pub uidvalidity: UIDVALIDITY,
    pub uidnext: UID,
    pub permanentflags: (Flag, Vec<String>),
    /// if `SELECT` returns `\*` we can set arbitrary flags permanently.
    pub can_create_flags: bool,
    pub read_only: bool,
}

/*
 *  Example: C: A142 SELECT INBOX
 *           S: * 172 EXISTS
 *           S: * 1 RECENT
 *           S: * OK [UNSEEN 12] Message 12 is first unseen
 *           S: * OK [UIDVALIDITY 3857529045] UIDs valid
 *           S: * OK [UIDNEXT 4392] Predicted next UID
 *           S: * FLAGS (\Answered \Flagged \Deleted \Seen \Draft)
 *           S: * OK [PERMANENTFLAGS (\Deleted \Seen \*)] Limited
 *           S: A142 OK [READ-WRITE] SELECT completed
 */
pub fn select_response(input: &[u8]) -> Result<SelectResponse> {
    let mut ret = SelectResponse::default();
    for l in input.split_rn() {
        if l.starts_with(UNTAGGED_PREFIX) && l.rtrim().ends_with(b"EXISTS") {
            if let Some((n, _)) = leading_number(&l[UNTAGGED_PREFIX.len()..]) {
                ret.exists = n;
            }
        } else if l.starts_with(UNTAGGED_PREFIX) && l.rtrim().ends_with(b"RECENT") {
            if let Some((n, _)) = leading_number(&l[UNTAGGED_PREFIX.len()..]) {
                ret.recent = n;
            }
        } else if l.starts_with(b"* FLAGS (") {
            ret.flags = flags(&l[b"* FLAGS (".len()..]).map(|(_, v)| v)?;
        } else if l.starts_with(b"* OK [UNSEEN ") {
            ret.first_unseen = bracket_num(&l[b"* OK ".len() + 1..], b"UNSEEN ");
        } else if l.starts_with(b"* OK [UIDVALIDITY ") {
            ret.uidvalidity = bracket_num(&l[b"* OK ".len() + 1..], b"UIDVALIDITY ");
        } else if l.starts_with(b"* OK [UIDNEXT ") {
            ret.uidnext = bracket_num(&l[b"* OK ".len() + 1..], b"UIDNEXT ");
        } else if l.starts_with(b"* OK [PERMANENTFLAGS (") {
            ret.permanentflags =
                flags(&l[b"* OK [PERMANENTFLAGS (".len()..]).map(|(_, v)| v)?;
            ret.can_create_flags = l.contains_subsequence(b"\\*");
        } else if l.contains_subsequence(b"OK [READ-WRITE]") {
            ret.read_only = false;
        } else if l.contains_subsequence(b"OK [READ-ONLY]") {
            ret.read_only = true;
        } else if !l.trim().is_empty() {
            log::trace!("select response: {}", String::from_utf8_lossy(l));
        }
    }
    Ok(ret)
}

fn search_results_list(input: &[u8]) -> IResult<&[u8], Vec<ImapNum>> {
    let (input, _) = tag("* SEARCH ")(input)?;
    let (input, list) = separated_list1(
        tag(b" "),
        map_res(is_not(" \r\n"), |s: &[u8]| ImapNum::from_str(to_str!(s))),
    )(input)?;
    let (input, _) = opt(tag(CRLF))(input)?;
    Ok((input, list))
}

fn search_results_empty(input: &[u8]) -> IResult<&[u8], Vec<ImapNum>> {
    let (input, _) = tag("* SEARCH\r\n")(input)?;
    Ok((input, vec![]))
}

pub fn search_results(input: &[u8]) -> IResult<&[u8], Vec<ImapNum>> {
    alt((search_results_list, search_results_empty))(input)
}

/// One `* <n> FETCH (..)` data line. `body` borrows the literal bytes.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FetchResponse<'a> {
    pub message_sequence_number: MessageSequenceNumber,
    pub uid: Option<UID>,
    pub flags: Option<(Flag, Vec<String>)>,
    pub rfc822_size: Option<usize>,
    pub body: Option<&'a [u8]>,
    pub raw_fetch_value: &'a [u8],
}

fn literal(input: &[u8]) -> IResult<&[u8], &[u8]> {
    length_data(delimited(
        tag("{"),
        map_res(take_while1(is_digit), |s| usize::from_str(to_str!(s))),
        tag("}\r\n"),
    ))(input)
}

pub fn fetch_response(input: &[u8]) -> Result<(&[u8], FetchResponse<'_>)> {
    if !input.starts_with(UNTAGGED_PREFIX) {
        return Err(Error::new(format!(
            "Expected `* ` but got `{:.50}`",
            String::from_utf8_lossy(input)
        ))
        .set_kind(ErrorKind::ProtocolError));
    }
    let mut ret = FetchResponse::default();
    let mut i = UNTAGGED_PREFIX.len();

    macro_rules! bounds {
        () => {
            if i >= input.len() {
                return Err(Error::new(format!(
                    "Expected more input. Got: `{:.50}`",
                    String::from_utf8_lossy(input)
                ))
                .set_kind(ErrorKind::ProtocolError));
            }
        };
    }

    while i < input.len() && input[i].is_ascii_digit() {
        ret.message_sequence_number *= 10;
        ret.message_sequence_number += (input[i] - b'0') as MessageSequenceNumber;
        i += 1;
    }
    bounds!();
    while input[i] == b' ' {
        i += 1;
        bounds!();
    }
    if !input[i..].starts_with(b"FETCH (") {
        return Err(Error::new(format!(
            "Expected `FETCH (` but got `{:.50}`",
            String::from_utf8_lossy(&input[i..])
        ))
        .set_kind(ErrorKind::ProtocolError));
    }
    i += b"FETCH (".len();

    while i < input.len() {
        while i < input.len() && input[i] == b' ' {
            i += 1;
        }
        if i >= input.len() {
            break;
        }
        if input[i..].starts_with(b"UID ") {
            i += b"UID ".len();
            let (rest, uid) = number(&input[i..])?;
            ret.uid = Some(uid);
            i = input.len() - rest.len();
        } else if input[i..].starts_with(b"FLAGS (") {
            i += b"FLAGS (".len();
            let (rest, val) = flags(&input[i..])?;
            ret.flags = Some(val);
            // `rest` still starts with the closing paren.
            i = input.len() - rest.len() + 1;
        } else if input[i..].starts_with(b"RFC822.SIZE ") {
            i += b"RFC822.SIZE ".len();
            let (rest, size) = number(&input[i..])?;
            ret.rfc822_size = Some(size);
            i = input.len() - rest.len();
        } else if input[i..].starts_with(b"BODY[] {")
            || input[i..].starts_with(b"RFC822 {")
            || input[i..].starts_with(b"BODY[HEADER] {")
            || input[i..].starts_with(b"RFC822.HEADER {")
            || input[i..].starts_with(b"BODY[TEXT] {")
        {
            let item_len = input[i..].find(b"{").unwrap_or(0);
            i += item_len;
            let (rest, body) = literal(&input[i..])?;
            ret.body = Some(body);
            i = input.len() - rest.len();
        } else if input[i..].starts_with(b")\r\n") {
            i += b")\r\n".len();
            break;
        } else {
            return Err(Error::new(format!(
                "Got unexpected token while parsing FETCH response: `{:.50}`",
                String::from_utf8_lossy(&input[i..])
            ))
            .set_kind(ErrorKind::ProtocolError));
        }
    }
    ret.raw_fetch_value = &input[..i];
    Ok((&input[i..], ret))
}

pub fn fetch_responses(mut input: &[u8]) -> Result<Vec<FetchResponse<'_>>> {
    let mut ret = Vec::new();
    while input.starts_with(UNTAGGED_PREFIX) {
        let (rest, el) = fetch_response(input)?;
        input = rest;
        ret.push(el);
    }
    Ok(ret)
}

/// `* <msn> FETCH (UID <uid> FLAGS (..))`, in either item order.
pub fn uid_fetch_flags_response(input: &[u8]) -> IResult<&[u8], (UID, (Flag, Vec<String>))> {
    let (input, _) = tag("* ")(input)?;
    let (input, _msn) = take_while(is_digit)(input)?;
    let (input, _) = tag(" FETCH (")(input)?;
    let (input, (uid, flag_val)) = alt((
        |input| {
            let (input, uid) = nom::sequence::preceded(tag("UID "), number)(input)?;
            let (input, _) = tag(" FLAGS (")(input)?;
            let (input, flag_val) = flags(input)?;
            let (input, _) = tag(")")(input)?;
            Ok((input, (uid, flag_val)))
        },
        |input| {
            let (input, _) = tag("FLAGS (")(input)?;
            let (input, flag_val) = flags(input)?;
            let (input, _) = tag(") UID ")(input)?;
            let (input, uid) = number(input)?;
            Ok((input, (uid, flag_val)))
        },
    ))(input)?;
    let (input, _) = tag(")\r\n")(input)?;
    Ok((input, (uid, flag_val)))
}

pub fn uid_fetch_flags_responses(
    input: &[u8],
) -> IResult<&[u8], Vec<(UID, (Flag, Vec<String>))>> {
    nom::multi::many0(uid_fetch_flags_response)(input)
}
