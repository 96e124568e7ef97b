/*
 * plover - IMAP4rev1 client core.
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

//! # plover
//!
//! The IMAP4rev1 protocol-client core of a terminal mail user agent.
//!
//! This crate owns the TCP/TLS session to an IMAP server, encodes commands,
//! classifies and correlates server responses, reconciles server-pushed
//! mailbox-state changes with the in-memory message list, and synchronizes
//! message flags and UIDs with a persistent local cache so the mailbox
//! remains usable when disconnected.
//!
//! The session is one blocking thread of control: at most one command is
//! outstanding at any time, enforced by the `&mut self` receiver of
//! [`ImapConnection::exchange`](connection::ImapConnection::exchange).
//! Credential acquisition, the on-disk cache format and MIME decoding are
//! external collaborators; see [`cache::ImapCache`].

#![deny(unused_must_use)]

#[macro_use]
pub mod connection;
pub mod cache;
pub mod email;
pub mod error;
pub mod fetch;
pub mod flags;
pub mod mailbox;
pub mod operations;
pub mod protocol_parser;
pub mod untagged;

use std::time::Duration;

use bitflags::bitflags;
use serde_derive::{Deserialize, Serialize};

pub use crate::{
    connection::{CancellationToken, ImapConnection, ImapStream, SessionState},
    email::{FetchStatus, Message, MessageList},
    error::{Error, ErrorKind, Result},
};

pub type ImapNum = usize;
pub type UID = ImapNum;
pub type UIDVALIDITY = UID;
pub type MessageSequenceNumber = ImapNum;

pub type Capabilities = indexmap::IndexSet<Box<[u8]>>;

pub static SUPPORTED_CAPABILITIES: &[&str] = &[
    "AUTH=CRAM-MD5",
    "AUTH=PLAIN",
    "IMAP4REV1",
    "LOGIN",
    "LOGINDISABLED",
    "UIDPLUS",
];

/// Whether this client makes any use of a server-advertised capability.
pub fn is_supported_capability(capability: &[u8]) -> bool {
    SUPPORTED_CAPABILITIES
        .iter()
        .any(|cap| capability.eq_ignore_ascii_case(cap.as_bytes()))
}

bitflags! {
    /// Message flag bitmask.
    ///
    /// `RECENT` exists only on the read side: servers report it but clients
    /// must never STORE it.
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct Flag: u8 {
        const SEEN    = 0b0000_0001;
        const FLAGGED = 0b0000_0010;
        const REPLIED = 0b0000_0100;
        const DRAFT   = 0b0000_1000;
        const TRASHED = 0b0001_0000;
        const RECENT  = 0b0010_0000;
    }
}

impl Flag {
    pub fn is_seen(&self) -> bool {
        self.contains(Self::SEEN)
    }

    pub fn is_flagged(&self) -> bool {
        self.contains(Self::FLAGGED)
    }

    pub fn is_replied(&self) -> bool {
        self.contains(Self::REPLIED)
    }

    pub fn is_draft(&self) -> bool {
        self.contains(Self::DRAFT)
    }

    pub fn is_trashed(&self) -> bool {
        self.contains(Self::TRASHED)
    }
}

/// Authentication mechanism to attempt after capability negotiation.
///
/// External mechanisms (for example GSSAPI) are delegated to a
/// caller-supplied [`connection::Authenticator`].
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum AuthKind {
    #[default]
    Login,
    Plain,
    CramMd5,
    External,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ImapServerConf {
    pub server_hostname: String,
    pub server_username: String,
    pub server_password: String,
    pub server_port: u16,
    pub use_starttls: bool,
    pub use_tls: bool,
    pub danger_accept_invalid_certs: bool,
    pub auth: AuthKind,
    #[serde(default)]
    pub timeout: Option<Duration>,
}

impl ImapServerConf {
    /// Identity used to key the local cache, stable across reconnects.
    pub fn account_identity(&self) -> String {
        format!("{}@{}", self.server_username, self.server_hostname)
    }
}

/// Helpers for searching raw server bytes.
pub trait BytesExt {
    fn rtrim(&self) -> &Self;
    fn ltrim(&self) -> &Self;
    fn trim(&self) -> &Self;
    fn find(&self, needle: &[u8]) -> Option<usize>;
    fn rfind(&self, needle: &[u8]) -> Option<usize>;
    fn contains_subsequence(&self, needle: &[u8]) -> bool;
}

impl BytesExt for [u8] {
    fn rtrim(&self) -> &Self {
        if let Some(last) = self.iter().rposition(|b| !b.is_ascii_whitespace()) {
            &self[..=last]
        } else {
            &[]
        }
    }

    fn ltrim(&self) -> &Self {
        if let Some(first) = self.iter().position(|b| !b.is_ascii_whitespace()) {
            &self[first..]
        } else {
            &[]
        }
    }

    fn trim(&self) -> &Self {
        self.rtrim().ltrim()
    }

    fn find(&self, needle: &[u8]) -> Option<usize> {
        if needle.is_empty() {
            return Some(0);
        }
        self.windows(needle.len()).position(|w| w == needle)
    }

    fn rfind(&self, needle: &[u8]) -> Option<usize> {
        if needle.is_empty() {
            return Some(self.len());
        }
        self.windows(needle.len()).rposition(|w| w == needle)
    }

    fn contains_subsequence(&self, needle: &[u8]) -> bool {
        self.find(needle).is_some()
    }
}

pub const CRLF: &[u8] = b"\r\n";
