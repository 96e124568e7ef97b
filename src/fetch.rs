/*
 * plover - fetch engine.
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

//! Lazy message retrieval: cache first, `UID FETCH` second, sequence-number
//! `FETCH` only while sequence numbers are still trustworthy.
//!
//! Fetched bytes are committed to the cache with mbox `From ` framing
//! applied, and restored on the way out, so a cache entry can be handed to
//! a mailbox-file writer verbatim.

use crate::{
    cache::{CachePart, CacheToken, ImapCache},
    connection::ImapConnection,
    email::{FetchStatus, Message, MessageList},
    error::{Error, ErrorKind, Result},
    protocol_parser::{fetch_response, FetchResponse, ImapLineSplit},
    untagged::Reconciliation,
    BytesExt, MessageSequenceNumber, UID,
};

/// Flush queued EXISTS/EXPUNGE notifications into `list`. Expunged UIDs are
/// evicted from the cache, and UIDs and flags are backfilled for any range
/// the mailbox grew by. Sequence-addressed fetches call this first, so a
/// command never goes out against numbering the server already shifted.
pub fn sync_updates(
    conn: &mut ImapConnection,
    cache: &mut dyn ImapCache,
    list: &mut MessageList,
) -> Result<Reconciliation> {
    if conn.updates.is_empty() {
        return Ok(Reconciliation::default());
    }
    let selected = conn
        .selected
        .clone()
        .ok_or_else(|| Error::new("No mailbox is selected").set_kind(ErrorKind::Bug))?;
    let reconciliation = conn.reconcile(list)?;
    for &uid in &reconciliation.expunged_uids {
        cache.remove(&selected.name, selected.uidvalidity, uid)?;
    }
    if let Some(range) = reconciliation.new_range.clone() {
        fetch_flags_range(conn, list, range)?;
    }
    Ok(reconciliation)
}

/// Prefix every `>*From `-shaped line with one more `>` so the bytes can be
/// framed into an mbox file without a false message separator.
pub fn escape_from_lines(input: &[u8]) -> Vec<u8> {
    let mut ret = Vec::with_capacity(input.len());
    let mut start = 0;
    while start <= input.len() {
        let end = input[start..]
            .find(b"\n")
            .map(|p| start + p + 1)
            .unwrap_or(input.len());
        let line = &input[start..end];
        let stripped = {
            let mut l = line;
            while l.starts_with(b">") {
                l = &l[1..];
            }
            l
        };
        if stripped.starts_with(b"From ") {
            ret.push(b'>');
        }
        ret.extend_from_slice(line);
        if end == input.len() {
            break;
        }
        start = end;
    }
    ret
}

/// Undo [`escape_from_lines`]: strip one `>` from every `>+From `-shaped
/// line.
pub fn unescape_from_lines(input: &[u8]) -> Vec<u8> {
    let mut ret = Vec::with_capacity(input.len());
    let mut start = 0;
    while start <= input.len() {
        let end = input[start..]
            .find(b"\n")
            .map(|p| start + p + 1)
            .unwrap_or(input.len());
        let line = &input[start..end];
        if line.starts_with(b">") {
            let stripped = {
                let mut l = line;
                while l.starts_with(b">") {
                    l = &l[1..];
                }
                l
            };
            if stripped.starts_with(b"From ") {
                ret.extend_from_slice(&line[1..]);
            } else {
                ret.extend_from_slice(line);
            }
        } else {
            ret.extend_from_slice(line);
        }
        if end == input.len() {
            break;
        }
        start = end;
    }
    ret
}

fn fetch_item(part: CachePart) -> &'static str {
    match part {
        CachePart::Header => "BODY.PEEK[HEADER]",
        CachePart::Body => "BODY.PEEK[]",
    }
}

/// Refuse sequence-number addressing once the live array may have shifted.
fn seq_addressing_guard(list: &MessageList) -> Result<()> {
    if !list.sequence_trusted {
        return Err(Error::new(
            "Mailbox state diverged from the server; re-select before using sequence numbers",
        )
        .set_kind(ErrorKind::Divergence));
    }
    if list.expunged_since_select {
        return Err(Error::new(
            "Messages were expunged since the mailbox was selected; sequence numbers are stale",
        )
        .set_kind(ErrorKind::Divergence));
    }
    Ok(())
}

/// Write fetched bytes through to the cache and update the in-memory
/// message, returning the bytes for the caller.
fn commit(
    cache: &mut dyn ImapCache,
    mailbox: &str,
    uidvalidity: crate::UIDVALIDITY,
    msg: Option<&mut Message>,
    uid: UID,
    part: CachePart,
    parsed: &FetchResponse<'_>,
    body: &[u8],
) -> Result<()> {
    cache.put(mailbox, uidvalidity, uid, part, &escape_from_lines(body))?;
    if let Some((flags, keywords)) = parsed.flags.as_ref() {
        cache.set_flags(mailbox, uidvalidity, uid, *flags)?;
        if let Some(msg) = msg {
            msg.flags = *flags;
            msg.keywords = keywords.clone();
            finish_commit(msg, uid, part, parsed, body, mailbox, uidvalidity);
        }
    } else if let Some(msg) = msg {
        finish_commit(msg, uid, part, parsed, body, mailbox, uidvalidity);
    }
    Ok(())
}

fn finish_commit(
    msg: &mut Message,
    uid: UID,
    part: CachePart,
    parsed: &FetchResponse<'_>,
    body: &[u8],
    mailbox: &str,
    uidvalidity: crate::UIDVALIDITY,
) {
    msg.size = parsed.rfc822_size.unwrap_or(body.len());
    msg.lines = body.iter().filter(|&&b| b == b'\n').count();
    msg.status = match part {
        CachePart::Body => FetchStatus::Full,
        CachePart::Header if msg.status != FetchStatus::Full => FetchStatus::HeaderOnly,
        CachePart::Header => msg.status,
    };
    msg.cache_token = Some(CacheToken {
        mailbox: mailbox.to_string(),
        uidvalidity,
        uid,
    });
}

/// Fetch one message part by UID. A cache hit never touches the socket; a
/// cache miss while disconnected is an [`ErrorKind::Offline`] error.
pub fn fetch_by_uid(
    conn: &mut ImapConnection,
    cache: &mut dyn ImapCache,
    list: &mut MessageList,
    uid: UID,
    part: CachePart,
) -> Result<Vec<u8>> {
    let selected = conn
        .selected
        .clone()
        .ok_or_else(|| Error::new("No mailbox is selected").set_kind(ErrorKind::Bug))?;
    if let Some(bytes) = cache.get(&selected.name, selected.uidvalidity, uid, part)? {
        return Ok(unescape_from_lines(&bytes));
    }
    if !conn.is_connected() {
        return Err(Error::new(format!(
            "UID {} is not cached and the session is disconnected",
            uid
        ))
        .set_kind(ErrorKind::Offline));
    }

    let command = format!(
        "UID FETCH {} (UID FLAGS RFC822.SIZE {})",
        uid,
        fetch_item(part)
    );
    let mut response = Vec::with_capacity(8 * 1024);
    conn.exchange(command.as_bytes(), |l| {
        response.extend_from_slice(l);
        Ok(())
    })?;

    for line in response.split_rn() {
        let parsed = match fetch_response(line) {
            Ok((_, parsed)) => parsed,
            Err(_) => continue,
        };
        if parsed.uid != Some(uid) {
            continue;
        }
        let body = parsed.body.ok_or_else(|| {
            Error::new(format!("Server returned no content for UID {}", uid))
                .set_kind(ErrorKind::ProtocolError)
        })?;
        let body = body.to_vec();
        commit(
            cache,
            &selected.name,
            selected.uidvalidity,
            list.by_uid_mut(uid),
            uid,
            part,
            &parsed,
            &body,
        )?;
        return Ok(body);
    }
    Err(Error::new(format!("Server returned no data for UID {}", uid))
        .set_kind(ErrorKind::NotFound))
}

/// Fetch one message part by sequence number, learning its UID on the way.
/// Refused while the sequence mapping is stale; prefer
/// [`fetch_by_uid`] once the UID is known.
pub fn fetch_by_seq(
    conn: &mut ImapConnection,
    cache: &mut dyn ImapCache,
    list: &mut MessageList,
    seq: MessageSequenceNumber,
    part: CachePart,
) -> Result<Vec<u8>> {
    sync_updates(conn, cache, list)?;
    seq_addressing_guard(list)?;
    if let Some(uid) = list.by_seq(seq).and_then(|m| m.uid) {
        return fetch_by_uid(conn, cache, list, uid, part);
    }
    let selected = conn
        .selected
        .clone()
        .ok_or_else(|| Error::new("No mailbox is selected").set_kind(ErrorKind::Bug))?;
    list.by_seq(seq).ok_or_else(|| {
        Error::new(format!(
            "Sequence number {} out of range 1..={}",
            seq,
            list.len()
        ))
        .set_kind(ErrorKind::NotFound)
    })?;

    let command = format!(
        "FETCH {} (UID FLAGS RFC822.SIZE {})",
        seq,
        fetch_item(part)
    );
    let mut response = Vec::with_capacity(8 * 1024);
    conn.exchange(command.as_bytes(), |l| {
        response.extend_from_slice(l);
        Ok(())
    })?;

    for line in response.split_rn() {
        let parsed = match fetch_response(line) {
            Ok((_, parsed)) => parsed,
            Err(_) => continue,
        };
        if parsed.message_sequence_number != seq {
            continue;
        }
        let uid = parsed.uid.ok_or_else(|| {
            Error::new(format!(
                "Server response for sequence number {} carried no UID",
                seq
            ))
            .set_kind(ErrorKind::ProtocolError)
        })?;
        let body = parsed.body.ok_or_else(|| {
            Error::new(format!(
                "Server returned no content for sequence number {}",
                seq
            ))
            .set_kind(ErrorKind::ProtocolError)
        })?;
        let body = body.to_vec();
        if let Some(msg) = list.by_seq_mut(seq) {
            msg.set_uid(uid)?;
        }
        commit(
            cache,
            &selected.name,
            selected.uidvalidity,
            list.by_seq_mut(seq),
            uid,
            part,
            &parsed,
            &body,
        )?;
        return Ok(body);
    }
    Err(Error::new(format!(
        "Server returned no data for sequence number {}",
        seq
    ))
    .set_kind(ErrorKind::NotFound))
}

/// Bulk header fetch over a contiguous sequence-number range, as issued
/// right after SELECT. A malformed response fails only that message; the
/// number of committed messages is returned.
pub fn fetch_headers_range(
    conn: &mut ImapConnection,
    cache: &mut dyn ImapCache,
    list: &mut MessageList,
    range: std::ops::RangeInclusive<MessageSequenceNumber>,
) -> Result<usize> {
    sync_updates(conn, cache, list)?;
    seq_addressing_guard(list)?;
    let selected = conn
        .selected
        .clone()
        .ok_or_else(|| Error::new("No mailbox is selected").set_kind(ErrorKind::Bug))?;
    let command = format!(
        "FETCH {}:{} (UID FLAGS RFC822.SIZE BODY.PEEK[HEADER])",
        range.start(),
        range.end()
    );
    let mut response = Vec::with_capacity(64 * 1024);
    conn.exchange(command.as_bytes(), |l| {
        response.extend_from_slice(l);
        Ok(())
    })?;

    let mut committed = 0;
    for line in response.split_rn() {
        let parsed = match fetch_response(line) {
            Ok((_, parsed)) => parsed,
            Err(err) => {
                log::debug!(
                    "skipping malformed FETCH response: {} (`{:.60}`)",
                    err,
                    String::from_utf8_lossy(line)
                );
                continue;
            }
        };
        let seq = parsed.message_sequence_number;
        let (uid, body) = match (parsed.uid, parsed.body) {
            (Some(uid), Some(body)) => (uid, body),
            _ => {
                log::debug!("FETCH response for seq {} missing UID or content", seq);
                continue;
            }
        };
        let body = body.to_vec();
        match list.by_seq_mut(seq) {
            Some(msg) => {
                if let Err(err) = msg.set_uid(uid) {
                    log::debug!("seq {}: {}", seq, err);
                    continue;
                }
            }
            None => continue,
        }
        commit(
            cache,
            &selected.name,
            selected.uidvalidity,
            list.by_seq_mut(seq),
            uid,
            CachePart::Header,
            &parsed,
            &body,
        )?;
        committed += 1;
    }
    Ok(committed)
}

/// `FETCH <range> (UID FLAGS)`: cheap UID/flag backfill for freshly grown
/// entries reported by reconciliation.
pub fn fetch_flags_range(
    conn: &mut ImapConnection,
    list: &mut MessageList,
    range: std::ops::RangeInclusive<MessageSequenceNumber>,
) -> Result<()> {
    let command = format!("FETCH {}:{} (UID FLAGS)", range.start(), range.end());
    let mut response = Vec::with_capacity(4 * 1024);
    conn.exchange(command.as_bytes(), |l| {
        response.extend_from_slice(l);
        Ok(())
    })?;
    for line in response.split_rn() {
        let parsed = match fetch_response(line) {
            Ok((_, parsed)) => parsed,
            Err(_) => continue,
        };
        let msg = match list.by_seq_mut(parsed.message_sequence_number) {
            Some(msg) => msg,
            None => continue,
        };
        if let Some(uid) = parsed.uid {
            msg.set_uid(uid)?;
        }
        if let Some((flags, keywords)) = parsed.flags {
            msg.flags = flags;
            msg.keywords = keywords;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cache::RamCache,
        connection::{
            test_support::{fixture_connection, written_bytes},
            SessionState,
        },
    };

    fn list_with_uids(uids: &[Option<UID>]) -> MessageList {
        let mut list = MessageList::new(uids.len(), 100);
        for (i, uid) in uids.iter().enumerate() {
            list.by_seq_mut(i + 1).unwrap().uid = *uid;
        }
        list
    }

    #[test]
    fn test_from_line_escaping_round_trip() {
        let original = b"From herb@example.com Sat Jan  3 01:05:34 1996\r\n\
                         >From the start it was clear\r\n\
                         a plain line\r\nFrom  double space\r\n";
        let escaped = escape_from_lines(original);
        assert!(escaped.starts_with(b">From herb@example.com"));
        assert!(escaped.contains_subsequence(b">>From the start"));
        assert!(escaped.contains_subsequence(b"\na plain line\r\n"));
        assert_eq!(unescape_from_lines(&escaped), original.to_vec());
    }

    #[test]
    fn test_escape_leaves_unrelated_lines_alone() {
        let input = b"Fromage is cheese\r\n> quoted text\r\nx From y\r\n";
        assert_eq!(escape_from_lines(input), input.to_vec());
        assert_eq!(unescape_from_lines(input), input.to_vec());
    }

    #[test]
    fn test_fetch_by_uid_cache_hit_never_touches_socket() {
        let mut conn = fixture_connection(b"");
        let mut cache = RamCache::new();
        cache
            .put("INBOX", 100, 7, CachePart::Body, b"cached body\r\n")
            .unwrap();
        let mut list = list_with_uids(&[Some(7)]);
        let bytes = fetch_by_uid(&mut conn, &mut cache, &mut list, 7, CachePart::Body).unwrap();
        assert_eq!(bytes, b"cached body\r\n".to_vec());
        assert!(written_bytes(&conn).is_empty());
    }

    #[test]
    fn test_fetch_by_uid_commits_write_through() {
        let body = b"Subject: hi\r\n\r\nFrom a to b\r\n";
        let input = format!(
            "* 1 FETCH (UID 7 FLAGS (\\Seen) RFC822.SIZE {} BODY[] {{{}}}\r\n",
            body.len(),
            body.len()
        );
        let mut input = input.into_bytes();
        input.extend_from_slice(body);
        input.extend_from_slice(b")\r\nT1 OK FETCH completed\r\n");

        let mut conn = fixture_connection(&input);
        let mut cache = RamCache::new();
        let mut list = list_with_uids(&[Some(7)]);
        let bytes = fetch_by_uid(&mut conn, &mut cache, &mut list, 7, CachePart::Body).unwrap();
        assert_eq!(bytes, body.to_vec());
        assert!(written_bytes(&conn).starts_with(b"T1 UID FETCH 7 "));

        let msg = list.by_uid(7).unwrap();
        assert_eq!(msg.status, FetchStatus::Full);
        assert_eq!(msg.size, body.len());
        assert_eq!(msg.lines, 3);
        assert!(msg.flags.is_seen());
        assert_eq!(
            msg.cache_token,
            Some(CacheToken {
                mailbox: "INBOX".into(),
                uidvalidity: 100,
                uid: 7,
            })
        );
        // Cached with mbox framing applied.
        let cached = cache.get("INBOX", 100, 7, CachePart::Body).unwrap().unwrap();
        assert!(cached.contains_subsequence(b">From a to b"));
        assert_eq!(unescape_from_lines(&cached), body.to_vec());
    }

    #[test]
    fn test_seq_addressing_refused_after_expunge() {
        let mut conn = fixture_connection(b"");
        let mut cache = RamCache::new();
        let mut list = list_with_uids(&[None, None]);
        list.expunged_since_select = true;
        let err =
            fetch_by_seq(&mut conn, &mut cache, &mut list, 1, CachePart::Header).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Divergence);
        assert!(written_bytes(&conn).is_empty());
    }

    #[test]
    fn test_seq_addressing_refused_when_untrusted() {
        let mut conn = fixture_connection(b"");
        let mut cache = RamCache::new();
        let mut list = list_with_uids(&[None]);
        list.sequence_trusted = false;
        let err = fetch_headers_range(&mut conn, &mut cache, &mut list, 1..=1).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Divergence);
    }

    #[test]
    fn test_seq_fetch_flushes_pending_expunge_first() {
        // An EXPUNGE arrives during an unrelated command. The next
        // sequence-addressed fetch must apply it and refuse, instead of
        // addressing the stale number and returning the wrong message.
        let mut conn = fixture_connection(b"* 1 EXPUNGE\r\nT1 OK NOOP completed\r\n");
        let mut cache = RamCache::new();
        cache
            .put("INBOX", 100, 1, CachePart::Body, b"doomed\r\n")
            .unwrap();
        let mut list = list_with_uids(&[Some(1), Some(2)]);
        conn.exchange_discard(b"NOOP").unwrap();
        assert_eq!(conn.updates.len(), 1);

        let err =
            fetch_by_seq(&mut conn, &mut cache, &mut list, 2, CachePart::Body).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Divergence);
        // No FETCH went out against the shifted numbering.
        assert!(!written_bytes(&conn).contains_subsequence(b"T2 "));
        assert!(conn.updates.is_empty());
        // The expunge was applied and its cache entry evicted.
        assert_eq!(list.len(), 1);
        assert_eq!(list.by_seq(1).unwrap().uid, Some(2));
        assert!(cache.get("INBOX", 100, 1, CachePart::Body).unwrap().is_none());
    }

    #[test]
    fn test_sync_updates_backfills_grown_range() {
        // EXISTS 3 arrives during a NOOP; flushing the queue fetches UID
        // and flags for the freshly grown tail.
        let input = b"* 3 EXISTS\r\n\
                      T1 OK NOOP completed\r\n\
                      * 3 FETCH (UID 30 FLAGS (\\Seen))\r\n\
                      T2 OK FETCH completed\r\n";
        let mut conn = fixture_connection(input);
        let mut cache = RamCache::new();
        let mut list = list_with_uids(&[Some(10), Some(20)]);
        conn.exchange_discard(b"NOOP").unwrap();

        let ret = sync_updates(&mut conn, &mut cache, &mut list).unwrap();
        assert_eq!(ret.new_range, Some(3..=3));
        assert!(!ret.expunged);
        assert_eq!(list.len(), 3);
        assert_eq!(list.by_seq(3).unwrap().uid, Some(30));
        assert!(list.by_seq(3).unwrap().flags.is_seen());
        assert!(written_bytes(&conn).contains_subsequence(b"T2 FETCH 3:3 (UID FLAGS)\r\n"));
    }

    #[test]
    fn test_uid_stability_seq_fetch_then_uid_read() {
        // First access is by sequence number; the UID learned there must
        // make the second, UID-addressed read a pure cache hit.
        let body = b"Subject: once\r\n\r\nbody\r\n";
        let input = format!(
            "* 2 FETCH (UID 42 FLAGS () RFC822.SIZE {} BODY[] {{{}}}\r\n",
            body.len(),
            body.len()
        );
        let mut input = input.into_bytes();
        input.extend_from_slice(body);
        input.extend_from_slice(b")\r\nT1 OK FETCH completed\r\n");

        let mut conn = fixture_connection(&input);
        let mut cache = RamCache::new();
        let mut list = list_with_uids(&[Some(41), None]);
        let first = fetch_by_seq(&mut conn, &mut cache, &mut list, 2, CachePart::Body).unwrap();
        assert_eq!(list.by_seq(2).unwrap().uid, Some(42));

        let second = fetch_by_uid(&mut conn, &mut cache, &mut list, 42, CachePart::Body).unwrap();
        assert_eq!(first, second);
        let written = written_bytes(&conn);
        // Exactly one command went out.
        assert!(written.starts_with(b"T1 FETCH 2 "));
        assert!(!written.contains_subsequence(b"T2 "));
    }

    #[test]
    fn test_truncated_literal_fails_only_that_fetch() {
        // Literal announces 100 bytes but the connection drops after 4.
        let mut conn = fixture_connection(b"* 1 FETCH (UID 7 BODY[] {100}\r\nabcd");
        let mut cache = RamCache::new();
        let mut list = list_with_uids(&[Some(7)]);
        let err =
            fetch_by_uid(&mut conn, &mut cache, &mut list, 7, CachePart::Body).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Network(_)));
        assert_eq!(list.by_uid(7).unwrap().status, FetchStatus::Unfetched);
        assert!(cache.get("INBOX", 100, 7, CachePart::Body).unwrap().is_none());
        assert_eq!(conn.state, SessionState::Disconnected);
    }

    #[test]
    fn test_bulk_header_fetch_isolates_bad_responses() {
        let hdr = b"Subject: a\r\n\r\n";
        let mut input = Vec::new();
        input.extend_from_slice(
            format!(
                "* 1 FETCH (UID 10 FLAGS (\\Seen) RFC822.SIZE 14 BODY[HEADER] {{{}}}\r\n",
                hdr.len()
            )
            .as_bytes(),
        );
        input.extend_from_slice(hdr);
        input.extend_from_slice(b")\r\n");
        input.extend_from_slice(b"* 2 FETCH (WAT)\r\n");
        input.extend_from_slice(
            format!(
                "* 3 FETCH (UID 12 FLAGS () RFC822.SIZE 14 BODY[HEADER] {{{}}}\r\n",
                hdr.len()
            )
            .as_bytes(),
        );
        input.extend_from_slice(hdr);
        input.extend_from_slice(b")\r\n");
        input.extend_from_slice(b"T1 OK FETCH completed\r\n");

        let mut conn = fixture_connection(&input);
        let mut cache = RamCache::new();
        let mut list = list_with_uids(&[None, None, None]);
        let committed =
            fetch_headers_range(&mut conn, &mut cache, &mut list, 1..=3).unwrap();
        assert_eq!(committed, 2);
        assert_eq!(list.by_seq(1).unwrap().uid, Some(10));
        assert_eq!(list.by_seq(1).unwrap().status, FetchStatus::HeaderOnly);
        assert_eq!(list.by_seq(2).unwrap().status, FetchStatus::Unfetched);
        assert_eq!(list.by_seq(3).unwrap().uid, Some(12));
    }

    #[test]
    fn test_fetch_flags_range_backfills_new_entries() {
        let input = b"* 3 FETCH (UID 30 FLAGS (\\Seen))\r\n\
                      * 4 FETCH (UID 31 FLAGS (\\Flagged NonJunk))\r\n\
                      T1 OK FETCH completed\r\n";
        let mut conn = fixture_connection(input);
        let mut list = list_with_uids(&[Some(10), Some(20), None, None]);
        fetch_flags_range(&mut conn, &mut list, 3..=4).unwrap();
        assert_eq!(list.by_seq(3).unwrap().uid, Some(30));
        assert!(list.by_seq(3).unwrap().flags.is_seen());
        assert_eq!(list.by_seq(4).unwrap().uid, Some(31));
        assert_eq!(list.by_seq(4).unwrap().keywords, vec!["NonJunk".to_string()]);
        assert!(written_bytes(&conn).starts_with(b"T1 FETCH 3:4 (UID FLAGS)\r\n"));
    }

    #[test]
    fn test_offline_cache_miss_is_offline_error() {
        let mut conn = fixture_connection(b"");
        conn.state = SessionState::Disconnected;
        let mut cache = RamCache::new();
        let mut list = list_with_uids(&[Some(7)]);
        let err =
            fetch_by_uid(&mut conn, &mut cache, &mut list, 7, CachePart::Body).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Offline);
    }

    #[test]
    fn test_offline_cache_hit_is_served() {
        let mut conn = fixture_connection(b"");
        conn.state = SessionState::Disconnected;
        let mut cache = RamCache::new();
        cache
            .put("INBOX", 100, 7, CachePart::Header, b"Subject: x\r\n\r\n")
            .unwrap();
        let mut list = list_with_uids(&[Some(7)]);
        let bytes =
            fetch_by_uid(&mut conn, &mut cache, &mut list, 7, CachePart::Header).unwrap();
        assert_eq!(bytes, b"Subject: x\r\n\r\n".to_vec());
    }
}
