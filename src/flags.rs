/*
 * plover - flag synchronizer.
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

//! Flag bit ↔ IMAP atom conversion and batched `UID STORE` writes.
//!
//! The local cache is updated before the server acknowledges, so flag state
//! survives a disconnect mid-sync. STOREs are written without waiting for
//! their completions; after [`STORE_ROUND_TRIP_LIMIT`] unacknowledged tags
//! the batch forces a synchronous drain so server-side command queues stay
//! bounded.

use smallvec::SmallVec;

use crate::{
    cache::ImapCache,
    connection::ImapConnection,
    email::MessageList,
    error::{Error, ErrorKind, Result},
    Flag, UID,
};

/// Unacknowledged STOREs tolerated before a forced drain.
pub const STORE_ROUND_TRIP_LIMIT: usize = 800;

/// One flag transition requested by the caller.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FlagOp {
    Set(Flag),
    UnSet(Flag),
    SetKeyword(String),
    UnSetKeyword(String),
}

/// System-flag atoms for every bit set in `flag`. `\Recent` is read-only
/// on the wire and never yielded.
pub fn flag_to_atoms(flag: Flag) -> SmallVec<[&'static str; 8]> {
    let mut ret = SmallVec::new();
    if flag.is_seen() {
        ret.push("\\Seen");
    }
    if flag.is_flagged() {
        ret.push("\\Flagged");
    }
    if flag.is_replied() {
        ret.push("\\Answered");
    }
    if flag.is_draft() {
        ret.push("\\Draft");
    }
    if flag.is_trashed() {
        ret.push("\\Deleted");
    }
    ret
}

/// Apply `ops` to an in-memory flag set. `\Recent` cannot be set or
/// cleared by the client.
pub fn apply_flag_ops(flags: &mut Flag, keywords: &mut Vec<String>, ops: &[FlagOp]) {
    for op in ops {
        match op {
            FlagOp::Set(f) => *flags |= *f & !Flag::RECENT,
            FlagOp::UnSet(f) => *flags &= !(*f & !Flag::RECENT),
            FlagOp::SetKeyword(kw) => {
                if !keywords.iter().any(|k| k == kw) {
                    keywords.push(kw.clone());
                }
            }
            FlagOp::UnSetKeyword(kw) => keywords.retain(|k| k != kw),
        }
    }
}

/// Batches unsynchronized STOREs, draining every
/// [`STORE_ROUND_TRIP_LIMIT`] commands. [`Self::finish`] must be called to
/// collect the remaining completions.
pub struct FlagBatch<'c> {
    conn: &'c mut ImapConnection,
    pending: Vec<String>,
}

impl<'c> FlagBatch<'c> {
    pub fn new(conn: &'c mut ImapConnection) -> Self {
        Self {
            conn,
            pending: Vec::new(),
        }
    }

    pub fn store(&mut self, command: &[u8]) -> Result<()> {
        let tag = self.conn.send_unsynchronized(command)?;
        self.pending.push(tag);
        if self.pending.len() >= STORE_ROUND_TRIP_LIMIT {
            log::debug!(
                "flag sync: {} unacknowledged STOREs, forcing a drain",
                self.pending.len()
            );
            self.conn.drain_pending_tags(&mut self.pending)?;
        }
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        self.conn.drain_pending_tags(&mut self.pending)
    }
}

fn uid_set(uids: &[UID]) -> String {
    let mut ret = String::new();
    for uid in uids {
        if !ret.is_empty() {
            ret.push(',');
        }
        ret.push_str(&uid.to_string());
    }
    ret
}

/// Apply `ops` to `uids` in the selected mailbox: mirror the change to the
/// cache and the in-memory list first, then issue one `UID STORE` per
/// transition polarity over the whole set.
pub fn store_flags(
    conn: &mut ImapConnection,
    cache: &mut dyn ImapCache,
    list: &mut MessageList,
    uids: &[UID],
    ops: &[FlagOp],
) -> Result<()> {
    if uids.is_empty() || ops.is_empty() {
        return Ok(());
    }
    let selected = conn
        .selected
        .clone()
        .ok_or_else(|| Error::new("No mailbox is selected").set_kind(ErrorKind::Bug))?;
    if selected.read_only {
        return Err(Error::new(format!(
            "Mailbox {} is selected read-only, cannot change flags",
            selected.name
        ))
        .set_kind(ErrorKind::ProtocolError));
    }

    let mut set = Flag::default();
    let mut unset = Flag::default();
    let mut set_keywords: Vec<&str> = Vec::new();
    let mut unset_keywords: Vec<&str> = Vec::new();
    for op in ops {
        match op {
            FlagOp::Set(f) => set |= *f & !Flag::RECENT,
            FlagOp::UnSet(f) => unset |= *f & !Flag::RECENT,
            FlagOp::SetKeyword(kw) => {
                if selected.can_create_flags {
                    set_keywords.push(kw);
                } else {
                    log::debug!(
                        "mailbox {} does not accept new keywords, dropping {}",
                        selected.name,
                        kw
                    );
                }
            }
            FlagOp::UnSetKeyword(kw) => unset_keywords.push(kw),
        }
    }
    if set.is_trashed() && !selected.can_delete {
        return Err(Error::new(format!(
            "Mailbox {} does not permit the \\Deleted flag",
            selected.name
        ))
        .set_kind(ErrorKind::ProtocolError));
    }

    // Mirror before the server acknowledges.
    for &uid in uids {
        if let Some(msg) = list.by_uid_mut(uid) {
            apply_flag_ops(&mut msg.flags, &mut msg.keywords, ops);
            cache.set_flags(&selected.name, selected.uidvalidity, uid, msg.flags)?;
        } else {
            let mut flags = cache
                .flags(&selected.name, selected.uidvalidity, uid)?
                .unwrap_or_default();
            let mut keywords = Vec::new();
            apply_flag_ops(&mut flags, &mut keywords, ops);
            cache.set_flags(&selected.name, selected.uidvalidity, uid, flags)?;
        }
    }

    let mut add_atoms: Vec<&str> = flag_to_atoms(set).into_iter().collect();
    add_atoms.extend(set_keywords);
    let mut del_atoms: Vec<&str> = flag_to_atoms(unset).into_iter().collect();
    del_atoms.extend(unset_keywords);
    if add_atoms.is_empty() && del_atoms.is_empty() {
        return Ok(());
    }

    let set_str = uid_set(uids);
    let mut batch = FlagBatch::new(conn);
    if !add_atoms.is_empty() {
        batch.store(
            format!(
                "UID STORE {} +FLAGS.SILENT ({})",
                set_str,
                add_atoms.join(" ")
            )
            .as_bytes(),
        )?;
    }
    if !del_atoms.is_empty() {
        batch.store(
            format!(
                "UID STORE {} -FLAGS.SILENT ({})",
                set_str,
                del_atoms.join(" ")
            )
            .as_bytes(),
        )?;
    }
    batch.finish()
}
