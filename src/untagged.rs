/*
 * plover - unsolicited updates.
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

//! Queueing and reconciliation of server-pushed EXISTS/EXPUNGE
//! notifications.
//!
//! Applying these mid-command would shift sequence numbers out from under
//! the in-flight command's own addressing, so they are buffered while a
//! command is outstanding and replayed in FIFO order once it completes.

use std::collections::VecDeque;

use smallvec::SmallVec;

use crate::{
    email::MessageList,
    error::{Error, ErrorKind, Result},
    ImapNum, MessageSequenceNumber, UID,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PendingUpdate {
    /// New total message count of the mailbox.
    Exists(ImapNum),
    /// 1-based sequence number permanently removed from the mailbox.
    Expunge(MessageSequenceNumber),
}

#[derive(Debug, Default)]
pub struct UpdateQueue {
    queue: VecDeque<PendingUpdate>,
}

impl UpdateQueue {
    pub fn push(&mut self, update: PendingUpdate) {
        log::trace!("queueing pending update {:?}", update);
        self.queue.push_back(update);
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    fn drain(&mut self) -> VecDeque<PendingUpdate> {
        std::mem::take(&mut self.queue)
    }
}

/// Outcome of a successful replay.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Reconciliation {
    /// Sequence-number range of freshly backfilled messages; the caller
    /// should fetch flags (and UIDs) for it.
    pub new_range: Option<std::ops::RangeInclusive<MessageSequenceNumber>>,
    /// UIDs of expunged messages that were known, for cache eviction.
    pub expunged_uids: SmallVec<[UID; 8]>,
    /// Whether any expunge was applied.
    pub expunged: bool,
}

/// Replay every queued update against `list`, in arrival order.
///
/// An `Exists(n)` sets the target count, growing the live array; an
/// `Expunge(seq)` removes the message at `seq`, shifting later entries
/// down. On any invalid entry the list is left exactly as it was, the
/// queue is emptied, and the error kind is
/// [`Divergence`](crate::error::ErrorKind::Divergence): sequence-addressed
/// operations must not be trusted until the mailbox is re-selected.
pub fn reconcile(list: &mut MessageList, queue: &mut UpdateQueue) -> Result<Reconciliation> {
    if queue.is_empty() {
        return Ok(Reconciliation::default());
    }
    let pending = queue.drain();
    log::debug!("reconciling {} pending updates", pending.len());

    let mut work = MessageList::new(0, list.uidvalidity);
    work.replace_messages(list.clone_messages());
    let mut ret = Reconciliation::default();
    // Backfilled entries are always a suffix of the work array.
    let mut fresh: usize = 0;

    for update in pending {
        match update {
            PendingUpdate::Exists(n) => {
                if n < work.len() {
                    list.sequence_trusted = false;
                    return Err(Error::new(format!(
                        "Server reported EXISTS {} but {} messages are known and no EXPUNGE \
                         was seen",
                        n,
                        work.len()
                    ))
                    .set_kind(ErrorKind::Divergence));
                }
                if let Some(range) = work.grow_to(n) {
                    fresh += range.end() - range.start() + 1;
                }
            }
            PendingUpdate::Expunge(seq) => {
                let originals = work.len() - fresh;
                let removed = match work.remove_seq(seq) {
                    Ok(removed) => removed,
                    Err(err) => {
                        list.sequence_trusted = false;
                        return Err(err);
                    }
                };
                if fresh > 0 && seq > originals {
                    // Removed one of the backfilled tail entries.
                    fresh -= 1;
                }
                if let Some(uid) = removed.uid {
                    ret.expunged_uids.push(uid);
                }
                ret.expunged = true;
            }
        }
    }

    if fresh > 0 {
        ret.new_range = Some(work.len() - fresh + 1..=work.len());
    }
    list.replace_messages(work.clone_messages());
    if ret.expunged {
        list.expunged_since_select = true;
    }
    Ok(ret)
}
