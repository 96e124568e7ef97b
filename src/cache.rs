/*
 * plover - local cache.
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

//! Seam to the persistent per-account message cache.
//!
//! Entries are keyed by `(mailbox, UIDVALIDITY, UID, part)` and never by
//! sequence number, so they survive mailbox reordering. The cache is the
//! system of record when disconnected and a write-through mirror when
//! connected. The on-disk format belongs to the embedding application; this
//! crate only ships [`RamCache`], which also backs the test suite.

use std::collections::HashMap;

use crate::{
    error::Result,
    Flag, UID, UIDVALIDITY,
};

/// Which stored byte range of a message an entry holds.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CachePart {
    Header,
    Body,
}

/// Location of a committed cache entry, recorded on the in-memory
/// [`Message`](crate::email::Message) after a successful fetch.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct CacheToken {
    pub mailbox: String,
    pub uidvalidity: UIDVALIDITY,
    pub uid: UID,
}

pub trait ImapCache: Send + std::fmt::Debug {
    fn get(
        &mut self,
        mailbox: &str,
        uidvalidity: UIDVALIDITY,
        uid: UID,
        part: CachePart,
    ) -> Result<Option<Vec<u8>>>;

    fn put(
        &mut self,
        mailbox: &str,
        uidvalidity: UIDVALIDITY,
        uid: UID,
        part: CachePart,
        bytes: &[u8],
    ) -> Result<()>;

    fn remove(&mut self, mailbox: &str, uidvalidity: UIDVALIDITY, uid: UID) -> Result<()>;

    /// Move every entry of `from_mailbox` under `to_mailbox`.
    fn rename_mailbox(&mut self, from_mailbox: &str, to_mailbox: &str) -> Result<()>;

    fn list(&mut self, mailbox_prefix: &str) -> Result<Vec<CacheToken>>;

    fn flags(&mut self, mailbox: &str, uidvalidity: UIDVALIDITY, uid: UID)
        -> Result<Option<Flag>>;

    /// Flag state must survive a later disconnect, so this is called before
    /// the server acknowledges a STORE.
    fn set_flags(
        &mut self,
        mailbox: &str,
        uidvalidity: UIDVALIDITY,
        uid: UID,
        flags: Flag,
    ) -> Result<()>;

    /// Drop every entry of `mailbox` whose UIDVALIDITY differs from the
    /// server's current one.
    fn clear_stale(&mut self, mailbox: &str, uidvalidity: UIDVALIDITY) -> Result<()>;
}

#[derive(Debug, Default)]
struct RamEntry {
    header: Option<Vec<u8>>,
    body: Option<Vec<u8>>,
    flags: Flag,
}

/// In-memory [`ImapCache`] implementation.
#[derive(Debug, Default)]
pub struct RamCache {
    entries: HashMap<(String, UIDVALIDITY, UID), RamEntry>,
}

impl RamCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ImapCache for RamCache {
    fn get(
        &mut self,
        mailbox: &str,
        uidvalidity: UIDVALIDITY,
        uid: UID,
        part: CachePart,
    ) -> Result<Option<Vec<u8>>> {
        Ok(self
            .entries
            .get(&(mailbox.to_string(), uidvalidity, uid))
            .and_then(|e| match part {
                CachePart::Header => e.header.clone(),
                CachePart::Body => e.body.clone(),
            }))
    }

    fn put(
        &mut self,
        mailbox: &str,
        uidvalidity: UIDVALIDITY,
        uid: UID,
        part: CachePart,
        bytes: &[u8],
    ) -> Result<()> {
        let entry = self
            .entries
            .entry((mailbox.to_string(), uidvalidity, uid))
            .or_default();
        match part {
            CachePart::Header => entry.header = Some(bytes.to_vec()),
            CachePart::Body => entry.body = Some(bytes.to_vec()),
        }
        Ok(())
    }

    fn remove(&mut self, mailbox: &str, uidvalidity: UIDVALIDITY, uid: UID) -> Result<()> {
        self.entries.remove(&(mailbox.to_string(), uidvalidity, uid));
        Ok(())
    }

    fn rename_mailbox(&mut self, from_mailbox: &str, to_mailbox: &str) -> Result<()> {
        let keys: Vec<_> = self
            .entries
            .keys()
            .filter(|(m, _, _)| m == from_mailbox)
            .cloned()
            .collect();
        for (m, validity, uid) in keys {
            if let Some(entry) = self.entries.remove(&(m, validity, uid)) {
                self.entries
                    .insert((to_mailbox.to_string(), validity, uid), entry);
            }
        }
        Ok(())
    }

    fn list(&mut self, mailbox_prefix: &str) -> Result<Vec<CacheToken>> {
        let mut ret: Vec<CacheToken> = self
            .entries
            .keys()
            .filter(|(m, _, _)| m.starts_with(mailbox_prefix))
            .map(|(m, validity, uid)| CacheToken {
                mailbox: m.clone(),
                uidvalidity: *validity,
                uid: *uid,
            })
            .collect();
        ret.sort_by(|a, b| (&a.mailbox, a.uid).cmp(&(&b.mailbox, b.uid)));
        Ok(ret)
    }

    fn flags(
        &mut self,
        mailbox: &str,
        uidvalidity: UIDVALIDITY,
        uid: UID,
    ) -> Result<Option<Flag>> {
        Ok(self
            .entries
            .get(&(mailbox.to_string(), uidvalidity, uid))
            .map(|e| e.flags))
    }

    fn set_flags(
        &mut self,
        mailbox: &str,
        uidvalidity: UIDVALIDITY,
        uid: UID,
        flags: Flag,
    ) -> Result<()> {
        self.entries
            .entry((mailbox.to_string(), uidvalidity, uid))
            .or_default()
            .flags = flags;
        Ok(())
    }

    fn clear_stale(&mut self, mailbox: &str, uidvalidity: UIDVALIDITY) -> Result<()> {
        self.entries
            .retain(|(m, validity, _), _| m != mailbox || *validity == uidvalidity);
        Ok(())
    }
}
