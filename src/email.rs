/*
 * plover - message model.
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

//! In-memory message list of the selected mailbox, with sequence-number and
//! UID addressing.

use crate::{
    cache::CacheToken,
    error::{Error, ErrorKind, Result},
    Flag, MessageSequenceNumber, UID, UIDVALIDITY,
};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum FetchStatus {
    #[default]
    Unfetched,
    HeaderOnly,
    Full,
}

/// One message of the selected mailbox.
///
/// The sequence number is its 1-based position in the live array and is
/// reassigned whenever expunges are reconciled. The UID is stable for a
/// given UIDVALIDITY and immutable once learned.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Message {
    pub uid: Option<UID>,
    pub flags: Flag,
    pub keywords: Vec<String>,
    pub size: usize,
    pub lines: usize,
    pub status: FetchStatus,
    pub cache_token: Option<CacheToken>,
}

impl Message {
    pub fn set_uid(&mut self, uid: UID) -> Result<()> {
        match self.uid {
            Some(prev) if prev != uid => Err(Error::new(format!(
                "Server reported UID {} for a message already known as UID {}",
                uid, prev
            ))
            .set_kind(ErrorKind::Divergence)),
            _ => {
                self.uid = Some(uid);
                Ok(())
            }
        }
    }
}

/// The live message array of the selected mailbox.
///
/// Sequence numbers are implicit: message `i` of `messages` has sequence
/// number `i + 1`, contiguous after every reconciliation.
#[derive(Clone, Debug, Default)]
pub struct MessageList {
    messages: Vec<Message>,
    pub uidvalidity: UIDVALIDITY,
    /// Set when an EXPUNGE has been applied since the list was last rebuilt
    /// from a SELECT; sequence-number addressed fetches are refused while
    /// this is set.
    pub expunged_since_select: bool,
    /// Cleared when reconciliation fails; every sequence-addressed
    /// operation is refused until the mailbox is re-selected.
    pub sequence_trusted: bool,
}

impl MessageList {
    pub fn new(count: usize, uidvalidity: UIDVALIDITY) -> Self {
        Self {
            messages: vec![Message::default(); count],
            uidvalidity,
            expunged_since_select: false,
            sequence_trusted: true,
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn by_seq(&self, seq: MessageSequenceNumber) -> Option<&Message> {
        seq.checked_sub(1).and_then(|i| self.messages.get(i))
    }

    pub fn by_seq_mut(&mut self, seq: MessageSequenceNumber) -> Option<&mut Message> {
        seq.checked_sub(1).and_then(|i| self.messages.get_mut(i))
    }

    pub fn seq_of_uid(&self, uid: UID) -> Option<MessageSequenceNumber> {
        self.messages
            .iter()
            .position(|m| m.uid == Some(uid))
            .map(|i| i + 1)
    }

    pub fn by_uid(&self, uid: UID) -> Option<&Message> {
        self.messages.iter().find(|m| m.uid == Some(uid))
    }

    pub fn by_uid_mut(&mut self, uid: UID) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.uid == Some(uid))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    /// Grow the array to `count`, backfilling freshly initialized entries.
    /// Returns the sequence-number range of the new entries, if any.
    pub(crate) fn grow_to(
        &mut self,
        count: usize,
    ) -> Option<std::ops::RangeInclusive<MessageSequenceNumber>> {
        if count <= self.messages.len() {
            return None;
        }
        let first_new = self.messages.len() + 1;
        self.messages.resize_with(count, Message::default);
        Some(first_new..=count)
    }

    /// Remove the message at 1-based `seq`, shifting later entries down.
    pub(crate) fn remove_seq(&mut self, seq: MessageSequenceNumber) -> Result<Message> {
        if seq == 0 || seq > self.messages.len() {
            return Err(Error::new(format!(
                "EXPUNGE sequence number {} out of range 1..={}",
                seq,
                self.messages.len()
            ))
            .set_kind(ErrorKind::Divergence));
        }
        Ok(self.messages.remove(seq - 1))
    }

    pub(crate) fn replace_messages(&mut self, messages: Vec<Message>) {
        self.messages = messages;
    }

    pub(crate) fn clone_messages(&self) -> Vec<Message> {
        self.messages.clone()
    }
}
