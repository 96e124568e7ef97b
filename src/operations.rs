/*
 * plover - mailbox operations.
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

//! COPY/APPEND/SEARCH and mailbox management, with UIDPLUS bookkeeping.
//!
//! On a UIDPLUS session the `COPYUID`/`APPENDUID` response codes name the
//! UID a message received in the destination mailbox; recording it in the
//! cache right away saves the UID probe a later fetch would need.

use crate::{
    cache::{CachePart, ImapCache},
    connection::{quoted, ImapConnection},
    error::{Error, ErrorKind, Result, ResultIntoError},
    flags::flag_to_atoms,
    protocol_parser::{search_results, ImapLineSplit, ResponseCode},
    BytesExt, Flag, ImapNum, UID,
};

/// `UID COPY` one message to `dest_mailbox`. If the destination is missing
/// and the server hints `TRYCREATE`, it is created and the copy retried
/// once. Returns the message's UID in the destination when the server
/// reported `COPYUID`.
pub fn copy_message(
    conn: &mut ImapConnection,
    cache: &mut dyn ImapCache,
    uid: UID,
    dest_mailbox: &str,
) -> Result<Option<UID>> {
    let selected = conn
        .selected
        .clone()
        .ok_or_else(|| Error::new("No mailbox is selected").set_kind(ErrorKind::Bug))?;
    let command = format!("UID COPY {} {}", uid, quoted(dest_mailbox));
    let code = match conn.exchange_discard(command.as_bytes()) {
        Ok(code) => code,
        Err(err)
            if err.kind == ErrorKind::ProtocolError
                && err.details.contains("TRYCREATE") =>
        {
            create_mailbox(conn, dest_mailbox)
                .chain_err_summary(|| format!("Could not create mailbox {}", dest_mailbox))?;
            conn.exchange_discard(command.as_bytes())?
        }
        Err(err) => return Err(err),
    };
    match code {
        ResponseCode::Copyuid {
            uidvalidity,
            source,
            dest,
        } => {
            if source != uid {
                log::debug!(
                    "COPYUID reported source UID {} for a copy of UID {}, not mirroring cache",
                    source,
                    uid
                );
                return Ok(Some(dest));
            }
            mirror_copied_entry(cache, &selected.name, selected.uidvalidity, uid, dest_mailbox, uidvalidity, dest)?;
            Ok(Some(dest))
        }
        _ => Ok(None),
    }
}

fn mirror_copied_entry(
    cache: &mut dyn ImapCache,
    src_mailbox: &str,
    src_uidvalidity: crate::UIDVALIDITY,
    src_uid: UID,
    dest_mailbox: &str,
    dest_uidvalidity: crate::UIDVALIDITY,
    dest_uid: UID,
) -> Result<()> {
    for part in [CachePart::Header, CachePart::Body] {
        if let Some(bytes) = cache.get(src_mailbox, src_uidvalidity, src_uid, part)? {
            cache.put(dest_mailbox, dest_uidvalidity, dest_uid, part, &bytes)?;
        }
    }
    if let Some(flags) = cache.flags(src_mailbox, src_uidvalidity, src_uid)? {
        cache.set_flags(dest_mailbox, dest_uidvalidity, dest_uid, flags)?;
    }
    Ok(())
}

/// `APPEND` a full message to `mailbox` as a synchronizing literal.
/// Returns the UID the server assigned when it reported `APPENDUID`, in
/// which case the bytes are committed to the cache under that UID.
pub fn append_message(
    conn: &mut ImapConnection,
    cache: &mut dyn ImapCache,
    mailbox: &str,
    flags: Flag,
    bytes: &[u8],
) -> Result<Option<UID>> {
    let atoms = flag_to_atoms(flags);
    let command = if atoms.is_empty() {
        format!("APPEND {} {{{}}}", quoted(mailbox), bytes.len())
    } else {
        format!(
            "APPEND {} ({}) {{{}}}",
            quoted(mailbox),
            atoms.join(" "),
            bytes.len()
        )
    };
    let code = conn.exchange_with_literal(command.as_bytes(), bytes, |_| Ok(()))?;
    match code {
        ResponseCode::Appenduid { uidvalidity, uid } => {
            cache.put(mailbox, uidvalidity, uid, CachePart::Body, bytes)?;
            if let Some(end) = bytes.find(b"\r\n\r\n") {
                cache.put(mailbox, uidvalidity, uid, CachePart::Header, &bytes[..end + 4])?;
            }
            cache.set_flags(mailbox, uidvalidity, uid, flags & !Flag::RECENT)?;
            Ok(Some(uid))
        }
        _ => Ok(None),
    }
}

/// `UID SEARCH` with a raw criteria string, e.g. `UNSEEN SINCE 1-Feb-2026`.
pub fn search(conn: &mut ImapConnection, criteria: &str) -> Result<Vec<ImapNum>> {
    let command = format!("UID SEARCH {}", criteria);
    let mut response = Vec::with_capacity(4 * 1024);
    conn.exchange(command.as_bytes(), |l| {
        response.extend_from_slice(l);
        Ok(())
    })?;
    for line in response.split_rn() {
        if let Ok((_, hits)) = search_results(line) {
            return Ok(hits);
        }
    }
    // No `* SEARCH` data line means no matches on some servers.
    Ok(Vec::new())
}

pub fn create_mailbox(conn: &mut ImapConnection, mailbox: &str) -> Result<()> {
    let command = format!("CREATE {}", quoted(mailbox));
    conn.exchange_discard(command.as_bytes()).map(|_| ())
}

pub fn delete_mailbox(
    conn: &mut ImapConnection,
    cache: &mut dyn ImapCache,
    mailbox: &str,
) -> Result<()> {
    let command = format!("DELETE {}", quoted(mailbox));
    conn.exchange_discard(command.as_bytes())?;
    for token in cache.list(mailbox)? {
        if token.mailbox == mailbox {
            cache.remove(&token.mailbox, token.uidvalidity, token.uid)?;
        }
    }
    Ok(())
}

/// `RENAME` a mailbox, carrying its cache entries to the new name.
pub fn rename_mailbox(
    conn: &mut ImapConnection,
    cache: &mut dyn ImapCache,
    from_mailbox: &str,
    to_mailbox: &str,
) -> Result<()> {
    let command = format!("RENAME {} {}", quoted(from_mailbox), quoted(to_mailbox));
    conn.exchange_discard(command.as_bytes())?;
    cache.rename_mailbox(from_mailbox, to_mailbox)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cache::RamCache,
        connection::test_support::{fixture_connection, written_bytes},
    };

    #[test]
    fn test_copy_records_copyuid_without_extra_round_trip() {
        let mut conn = fixture_connection(b"T1 OK [COPYUID 100 5 42] COPY completed\r\n");
        let mut cache = RamCache::new();
        cache
            .put("INBOX", 100, 5, CachePart::Body, b"the message\r\n")
            .unwrap();
        cache.set_flags("INBOX", 100, 5, Flag::SEEN).unwrap();

        let dest = copy_message(&mut conn, &mut cache, 5, "Archive").unwrap();
        assert_eq!(dest, Some(42));
        assert_eq!(
            cache.get("Archive", 100, 42, CachePart::Body).unwrap(),
            Some(b"the message\r\n".to_vec())
        );
        assert_eq!(cache.flags("Archive", 100, 42).unwrap(), Some(Flag::SEEN));
        // Exactly one command went out.
        assert_eq!(
            written_bytes(&conn),
            b"T1 UID COPY 5 \"Archive\"\r\n".to_vec()
        );
    }

    #[test]
    fn test_copy_without_uidplus_code() {
        let mut conn = fixture_connection(b"T1 OK COPY completed\r\n");
        let mut cache = RamCache::new();
        let dest = copy_message(&mut conn, &mut cache, 5, "Archive").unwrap();
        assert_eq!(dest, None);
    }

    #[test]
    fn test_copy_creates_destination_on_trycreate() {
        let mut conn = fixture_connection(
            b"T1 NO [TRYCREATE] Mailbox does not exist\r\n\
              T2 OK CREATE completed\r\n\
              T3 OK [COPYUID 7 5 1] COPY completed\r\n",
        );
        let mut cache = RamCache::new();
        let dest = copy_message(&mut conn, &mut cache, 5, "Archive/2026").unwrap();
        assert_eq!(dest, Some(1));
        let written = written_bytes(&conn);
        assert!(written.contains_subsequence(b"T2 CREATE \"Archive/2026\"\r\n"));
        assert!(written.contains_subsequence(b"T3 UID COPY 5 \"Archive/2026\"\r\n"));
    }

    #[test]
    fn test_append_records_appenduid() {
        let mut conn = fixture_connection(
            b"+ Ready for literal data\r\n\
              T1 OK [APPENDUID 9 77] APPEND completed\r\n",
        );
        let mut cache = RamCache::new();
        let bytes = b"Subject: s\r\n\r\nbody\r\n";
        let uid = append_message(&mut conn, &mut cache, "Sent", Flag::SEEN, bytes).unwrap();
        assert_eq!(uid, Some(77));
        assert_eq!(
            cache.get("Sent", 9, 77, CachePart::Body).unwrap(),
            Some(bytes.to_vec())
        );
        assert_eq!(
            cache.get("Sent", 9, 77, CachePart::Header).unwrap(),
            Some(b"Subject: s\r\n\r\n".to_vec())
        );
        assert_eq!(cache.flags("Sent", 9, 77).unwrap(), Some(Flag::SEEN));
        let written = written_bytes(&conn);
        assert!(written.starts_with(
            format!("T1 APPEND \"Sent\" (\\Seen) {{{}}}\r\n", bytes.len()).as_bytes()
        ));
        assert!(written.contains_subsequence(bytes));
    }

    #[test]
    fn test_append_without_appenduid() {
        let mut conn = fixture_connection(b"+ go ahead\r\nT1 OK APPEND completed\r\n");
        let mut cache = RamCache::new();
        let uid =
            append_message(&mut conn, &mut cache, "Sent", Flag::default(), b"x\r\n").unwrap();
        assert_eq!(uid, None);
    }

    #[test]
    fn test_search() {
        let mut conn = fixture_connection(b"* SEARCH 2 84 882\r\nT1 OK SEARCH completed\r\n");
        let hits = search(&mut conn, "UNSEEN").unwrap();
        assert_eq!(hits, vec![2, 84, 882]);
        assert!(written_bytes(&conn).starts_with(b"T1 UID SEARCH UNSEEN\r\n"));
    }

    #[test]
    fn test_search_no_matches() {
        let mut conn = fixture_connection(b"* SEARCH\r\nT1 OK SEARCH completed\r\n");
        assert!(search(&mut conn, "UNSEEN").unwrap().is_empty());
    }

    #[test]
    fn test_rename_carries_cache_entries() {
        let mut conn = fixture_connection(b"T1 OK RENAME completed\r\n");
        let mut cache = RamCache::new();
        cache
            .put("Old", 3, 1, CachePart::Body, b"msg\r\n")
            .unwrap();
        rename_mailbox(&mut conn, &mut cache, "Old", "New").unwrap();
        assert!(cache.get("Old", 3, 1, CachePart::Body).unwrap().is_none());
        assert_eq!(
            cache.get("New", 3, 1, CachePart::Body).unwrap(),
            Some(b"msg\r\n".to_vec())
        );
    }

    #[test]
    fn test_delete_drops_cache_entries() {
        let mut conn = fixture_connection(b"T1 OK DELETE completed\r\n");
        let mut cache = RamCache::new();
        cache.put("Gone", 3, 1, CachePart::Body, b"m\r\n").unwrap();
        cache.put("GoneNot", 3, 1, CachePart::Body, b"m\r\n").unwrap();
        delete_mailbox(&mut conn, &mut cache, "Gone").unwrap();
        assert!(cache.get("Gone", 3, 1, CachePart::Body).unwrap().is_none());
        assert!(cache.get("GoneNot", 3, 1, CachePart::Body).unwrap().is_some());
    }
}
