/*
 * plover - connection module.
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

//! TCP/TLS session, tag correlation and session lifecycle.
//!
//! [`ImapConnection::exchange`] is the single entry point for a command
//! round trip: it allocates the next tag, writes the command line and
//! drains classified response lines until the tag completes. The `&mut
//! self` receiver enforces the one-outstanding-command invariant; `Busy` is
//! therefore a transient condition that cannot be re-entered.

use std::{
    borrow::Cow,
    io::{Read, Write},
    net::{SocketAddr, TcpStream, ToSocketAddrs},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use hmac::{Hmac, Mac};
use md5::Md5;
use native_tls::TlsConnector;

use crate::{
    error::{Error, ErrorKind, NetworkErrorKind, Result, ResultIntoError},
    protocol_parser::{
        self, classify_line, ImapLineSplit, ResponseCode, ResponseLine, SelectResponse,
        TaggedStatus, UntaggedKind,
    },
    untagged::{PendingUpdate, UpdateQueue},
    AuthKind, BytesExt, Capabilities, ImapServerConf, MessageList, UIDVALIDITY,
};

pub const IO_BUF_SIZE: usize = 8 * 1024;
/// Poll quantum for blocking reads, so cancellation is noticed promptly.
const READ_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Idle interval after which [`ImapConnection::keepalive`] sends a `NOOP`.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(60 * 9);
/// Unrecognizable lines tolerated before giving up on resynchronization.
const RESYNC_LIMIT: usize = 64;

macro_rules! imap_log {
    ($fn:ident, $conn:expr, $fmt:literal, $($t:tt)*) => {
        log::$fn!(std::concat!("{} ", $fmt), $conn.id, $($t)*);
    };
    ($fn:ident, $conn:expr, $fmt:literal) => {
        log::$fn!(std::concat!("{} ", $fmt), $conn.id);
    };
}

/// Cooperative cancellation checked at every blocking-I/O checkpoint.
///
/// Cancelling before the first byte of a command is written aborts
/// cleanly; cancelling mid-flight forcibly closes the session, since
/// partial command bytes cannot be retracted.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Challenge/response hook for delegated mechanisms such as GSSAPI.
pub trait Authenticator {
    /// SASL mechanism name sent in `AUTHENTICATE <name>`.
    fn mechanism(&self) -> &str;

    /// Produce the response for one decoded server challenge. The return
    /// value is base64-encoded by the caller.
    fn respond(&mut self, challenge: &[u8]) -> Result<Vec<u8>>;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Authenticating,
    Authenticated,
    Selected,
    Closing,
}

/// Mailbox selection of a live session.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SelectedMailbox {
    pub name: String,
    pub uidvalidity: UIDVALIDITY,
    pub read_only: bool,
    pub can_delete: bool,
    pub can_create_flags: bool,
}

#[derive(Debug)]
pub enum Connection {
    Tcp(TcpStream),
    Tls(Box<native_tls::TlsStream<TcpStream>>),
    #[cfg(test)]
    Fixture(FixtureStream),
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Self::Tcp(inner) => inner.read(buf),
            Self::Tls(inner) => inner.read(buf),
            #[cfg(test)]
            Self::Fixture(inner) => inner.read(buf),
        }
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Self::Tcp(inner) => inner.write(buf),
            Self::Tls(inner) => inner.write(buf),
            #[cfg(test)]
            Self::Fixture(inner) => inner.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Self::Tcp(inner) => inner.flush(),
            Self::Tls(inner) => inner.flush(),
            #[cfg(test)]
            Self::Fixture(inner) => inner.flush(),
        }
    }
}

impl Connection {
    fn into_tcp(self) -> Result<TcpStream> {
        match self {
            Self::Tcp(inner) => Ok(inner),
            _ => Err(Error::new("Connection is already encrypted").set_kind(ErrorKind::Bug)),
        }
    }
}

/// Deterministic in-memory transport for protocol tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct FixtureStream {
    pub input: std::io::Cursor<Vec<u8>>,
    pub written: Vec<u8>,
}

#[cfg(test)]
impl Read for FixtureStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.input.read(buf)
    }
}

#[cfg(test)]
impl Write for FixtureStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[derive(Debug)]
pub struct ImapStream {
    pub cmd_id: usize,
    pub id: Cow<'static, str>,
    stream: Connection,
    pending: Vec<u8>,
    cancel: CancellationToken,
    timeout: Option<Duration>,
}

fn lookup_ipv4(host: &str, port: u16) -> Result<SocketAddr> {
    let mut addrs = (host, port)
        .to_socket_addrs()
        .chain_err_kind(ErrorKind::Network(NetworkErrorKind::HostLookupFailed))?;
    let mut fallback = None;
    for addr in addrs.by_ref() {
        if matches!(addr, SocketAddr::V4(_)) {
            return Ok(addr);
        }
        fallback.get_or_insert(addr);
    }
    fallback.ok_or_else(|| {
        Error::new(format!("Could not lookup address {}", host))
            .set_kind(ErrorKind::Network(NetworkErrorKind::HostLookupFailed))
    })
}

/// Parse a trailing `{n}\r\n` literal announcement on a physical line.
fn literal_announcement(line: &[u8]) -> Option<usize> {
    if !line.ends_with(b"}\r\n") {
        return None;
    }
    let open = line.rfind(b"{")?;
    let digits = &line[open + 1..line.len() - b"}\r\n".len()];
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(digits).ok()?.parse::<usize>().ok()
}

impl ImapStream {
    fn tag(id: usize) -> String {
        format!("T{}", id)
    }

    /// Read more raw bytes into the pending buffer, polling the
    /// cancellation token between timed-out reads.
    fn fill_pending(&mut self) -> Result<()> {
        let mut buf = [0u8; IO_BUF_SIZE];
        let deadline = self.timeout.map(|t| Instant::now() + t);
        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::new("Cancelled while waiting for server response")
                    .set_kind(ErrorKind::Cancelled));
            }
            match self.stream.read(&mut buf) {
                Ok(0) => {
                    return Err(Error::new("Connection closed by server")
                        .set_kind(ErrorKind::Network(NetworkErrorKind::Io)));
                }
                Ok(b) => {
                    self.pending.extend_from_slice(&buf[..b]);
                    return Ok(());
                }
                Err(err)
                    if matches!(
                        err.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) =>
                {
                    if let Some(deadline) = deadline {
                        if Instant::now() >= deadline {
                            return Err(Error::new("Timed out waiting for server response")
                                .set_kind(ErrorKind::Timeout));
                        }
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Append exactly `n` raw literal bytes to `out`, never line-classified.
    fn read_literal_bytes(&mut self, n: usize, out: &mut Vec<u8>) -> Result<()> {
        while self.pending.len() < n {
            self.fill_pending().chain_err_summary(|| {
                "Connection dropped before a byte literal was fully read".to_string()
            })?;
        }
        out.extend(self.pending.drain(..n));
        Ok(())
    }

    /// Read one *logical* line: a `\r\n`-terminated line including every
    /// `{n}` byte literal embedded in it. After a literal is consumed the
    /// reader resynchronizes to line mode.
    pub fn read_logical_line(&mut self, line: &mut Vec<u8>) -> Result<()> {
        line.clear();
        loop {
            if let Some(pos) = self.pending.find(crate::CRLF) {
                let start = line.len();
                line.extend(self.pending.drain(..pos + crate::CRLF.len()));
                if let Some(n) = literal_announcement(&line[start..]) {
                    self.read_literal_bytes(n, line)?;
                    continue;
                }
                return Ok(());
            }
            self.fill_pending()?;
        }
    }

    /// Write the next tagged command line. Returns the tag it was sent
    /// under. Cancellation is checked before the first byte goes out.
    pub fn send_command(&mut self, command: &[u8]) -> Result<String> {
        if self.cancel.is_cancelled() {
            return Err(
                Error::new("Cancelled before command was sent").set_kind(ErrorKind::Cancelled)
            );
        }
        let command = command.trim();
        let tag = Self::tag(self.cmd_id);
        self.cmd_id += 1;
        self.stream.write_all(tag.as_bytes())?;
        self.stream.write_all(b" ")?;
        self.stream.write_all(command)?;
        self.stream.write_all(b"\r\n")?;
        self.stream.flush()?;
        if command.starts_with(b"LOGIN") {
            imap_log!(trace, self, "sent: {} LOGIN ..", tag);
        } else {
            imap_log!(trace, self, "sent: {} {}", tag, String::from_utf8_lossy(command));
        }
        Ok(tag)
    }

    /// Send raw literal data after a continuation request. The CRLF
    /// terminating the command line follows the literal octets.
    pub fn send_literal(&mut self, data: &[u8]) -> Result<()> {
        self.stream.write_all(data)?;
        self.stream.write_all(b"\r\n")?;
        self.stream.flush()?;
        Ok(())
    }

    pub fn send_raw(&mut self, raw: &[u8]) -> Result<()> {
        self.stream.write_all(raw)?;
        self.stream.write_all(b"\r\n")?;
        self.stream.flush()?;
        Ok(())
    }
}

#[derive(Debug)]
pub struct ImapConnection {
    pub id: Cow<'static, str>,
    pub stream: Result<ImapStream>,
    pub server_conf: ImapServerConf,
    pub capabilities: Capabilities,
    pub state: SessionState,
    pub selected: Option<SelectedMailbox>,
    pub cancel: CancellationToken,
    /// EXISTS/EXPUNGE seen while a command was outstanding, pending
    /// reconciliation.
    pub updates: UpdateQueue,
    last_io: Instant,
}

impl ImapConnection {
    pub fn new(server_conf: ImapServerConf) -> Self {
        Self {
            id: Cow::Owned(format!("imap://{}", server_conf.server_hostname)),
            stream: Err(Error::new("Not connected").set_kind(ErrorKind::Offline)),
            server_conf,
            capabilities: Capabilities::default(),
            state: SessionState::Disconnected,
            selected: None,
            cancel: CancellationToken::new(),
            updates: UpdateQueue::default(),
            last_io: Instant::now(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_ok() && !matches!(self.state, SessionState::Disconnected)
    }

    pub fn has_capability(&self, cap: &[u8]) -> bool {
        self.capabilities
            .iter()
            .any(|c| c.eq_ignore_ascii_case(cap))
    }

    pub fn uid_plus(&self) -> bool {
        self.has_capability(b"UIDPLUS")
    }

    fn mark_disconnected(&mut self, err: &Error) {
        imap_log!(debug, self, "session lost: {}", err);
        self.state = SessionState::Disconnected;
        self.selected = None;
        self.stream = Err(err.clone());
    }

    /// Connect, negotiate capabilities and authenticate.
    ///
    /// `AuthKind::External` requires `authenticator`; the built-in
    /// mechanisms ignore it.
    pub fn connect_with(
        &mut self,
        mut authenticator: Option<&mut dyn Authenticator>,
    ) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        if self.cancel.is_cancelled() {
            return Err(Error::new("Cancelled before connecting").set_kind(ErrorKind::Cancelled));
        }
        self.state = SessionState::Connecting;
        let conf = self.server_conf.clone();
        let result = self.connect_inner(&conf, authenticator.take());
        match result {
            Ok(stream) => {
                self.stream = Ok(stream);
                self.state = SessionState::Authenticated;
                self.last_io = Instant::now();
                Ok(())
            }
            Err(err) => {
                self.state = SessionState::Disconnected;
                self.stream = Err(err.clone());
                Err(err)
            }
        }
    }

    pub fn connect(&mut self) -> Result<()> {
        self.connect_with(None)
    }

    fn connect_inner(
        &mut self,
        conf: &ImapServerConf,
        authenticator: Option<&mut dyn Authenticator>,
    ) -> Result<ImapStream> {
        let addr = lookup_ipv4(&conf.server_hostname, conf.server_port)?;
        let socket = TcpStream::connect(addr)
            .chain_err_summary(|| format!("Could not connect to {}", conf.server_hostname))
            .chain_err_kind(ErrorKind::Network(NetworkErrorKind::ConnectionFailed))?;
        socket.set_read_timeout(Some(READ_POLL_INTERVAL))?;
        socket.set_write_timeout(Some(conf.timeout.unwrap_or(Duration::from_secs(120))))?;

        let connection = if conf.use_tls && !conf.use_starttls {
            Connection::Tls(Box::new(tls_handshake(
                socket,
                &conf.server_hostname,
                conf.danger_accept_invalid_certs,
            )?))
        } else {
            Connection::Tcp(socket)
        };

        let mut stream = ImapStream {
            cmd_id: 1,
            id: self.id.clone(),
            stream: connection,
            pending: Vec::with_capacity(IO_BUF_SIZE),
            cancel: self.cancel.clone(),
            timeout: conf.timeout,
        };

        // Server greeting: `* OK`, `* PREAUTH` or `* BYE`.
        let mut line = Vec::with_capacity(1024);
        stream.read_logical_line(&mut line)?;
        let mut preauthenticated = false;
        match classify_line(&line) {
            ResponseLine::Untagged {
                kind: UntaggedKind::Bye,
                payload,
            } => {
                return Err(Error::new(format!(
                    "Server refused connection: {}",
                    String::from_utf8_lossy(payload.trim())
                ))
                .set_kind(ErrorKind::Network(NetworkErrorKind::ConnectionFailed)));
            }
            ResponseLine::Untagged { payload, .. } if payload.starts_with(b"PREAUTH") => {
                preauthenticated = true;
            }
            ResponseLine::Untagged { payload, .. } if payload.starts_with(b"OK") => {}
            _ => {
                return Err(Error::new(format!(
                    "Unexpected greeting from {}: `{}`",
                    conf.server_hostname,
                    String::from_utf8_lossy(&line)
                ))
                .set_kind(ErrorKind::ProtocolError));
            }
        }

        if conf.use_starttls {
            let tag = stream.send_command(b"STARTTLS")?;
            drain_simple(&mut stream, &tag, &mut Vec::new()).chain_err_summary(|| {
                if conf.server_port == 993 {
                    "STARTTLS failed. Server port is set to 993, which normally uses TLS. \
                     Maybe try disabling use_starttls."
                } else {
                    "STARTTLS failed. Is the connection already encrypted?"
                }
            })?;
            let socket = stream.stream.into_tcp()?;
            stream.stream = Connection::Tls(Box::new(tls_handshake(
                socket,
                &conf.server_hostname,
                conf.danger_accept_invalid_certs,
            )?));
        }

        let mut capabilities = self.fetch_capabilities(&mut stream, conf)?;

        if !capabilities
            .iter()
            .any(|cap| cap.eq_ignore_ascii_case(b"IMAP4rev1"))
        {
            return Err(Error::new(format!(
                "Could not connect to {}: server is not IMAP4rev1 compliant",
                conf.server_hostname
            ))
            .set_kind(ErrorKind::ProtocolNotSupported));
        }

        for cap in capabilities.iter() {
            if !crate::is_supported_capability(cap) {
                imap_log!(
                    trace,
                    self,
                    "unhandled server capability {}",
                    String::from_utf8_lossy(cap)
                );
            }
        }

        if !preauthenticated {
            self.state = SessionState::Authenticating;
            authenticate(&mut stream, conf, &capabilities, authenticator)?;
            // Sending CAPABILITY after LOGIN automatically is an RFC
            // recommendation, so check for lazy servers.
            capabilities = self.fetch_capabilities(&mut stream, conf)?;
        }
        self.capabilities = capabilities;
        Ok(stream)
    }

    fn fetch_capabilities(
        &self,
        stream: &mut ImapStream,
        conf: &ImapServerConf,
    ) -> Result<Capabilities> {
        let tag = stream.send_command(b"CAPABILITY")?;
        let mut response = Vec::with_capacity(1024);
        drain_simple(stream, &tag, &mut response)?;
        response
            .split_rn()
            .find(|l| {
                l.len() >= b"* CAPABILITY".len()
                    && l[..b"* CAPABILITY".len()].eq_ignore_ascii_case(b"* CAPABILITY")
            })
            .ok_or_else(|| {
                Error::new(format!(
                    "Could not connect to {}: expected CAPABILITY response but got: `{:.128}`",
                    conf.server_hostname,
                    String::from_utf8_lossy(&response)
                ))
                .set_kind(ErrorKind::ProtocolError)
            })
            .and_then(|l| {
                protocol_parser::capabilities(l)
                    .map(|(_, v)| {
                        v.into_iter()
                            .map(|v| v.to_vec().into_boxed_slice())
                            .collect()
                    })
                    .map_err(|err| Error::from(err).set_kind(ErrorKind::ProtocolError))
            })
    }

    /// Issue one command and drain responses until its tag completes.
    ///
    /// Untagged `EXISTS`/`EXPUNGE` lines are routed to the update queue;
    /// every other untagged line is handed to `collect`. A tagged line
    /// whose tag does not match the expected one is skipped as noise.
    pub fn exchange<F>(&mut self, command: &[u8], mut collect: F) -> Result<ResponseCode>
    where
        F: FnMut(&[u8]) -> Result<()>,
    {
        let expected = {
            let stream = match self.stream.as_mut() {
                Ok(stream) => stream,
                Err(err) => return Err(err.clone()),
            };
            match stream.send_command(command) {
                Ok(tag) => tag,
                Err(err) if err.kind == ErrorKind::Cancelled => {
                    // No bytes were sent; the session is intact.
                    return Err(err);
                }
                Err(err) => {
                    self.mark_disconnected(&err);
                    return Err(err);
                }
            }
        };
        let ret = self.drain_until_tagged(&expected, &mut collect);
        self.last_io = Instant::now();
        ret
    }

    pub fn exchange_discard(&mut self, command: &[u8]) -> Result<ResponseCode> {
        self.exchange(command, |_| Ok(()))
    }

    /// Like [`Self::exchange`], for commands carrying one synchronizing
    /// byte literal (`APPEND`): waits for the continuation request, sends
    /// the literal, then drains to completion.
    pub fn exchange_with_literal<F>(
        &mut self,
        command: &[u8],
        literal: &[u8],
        mut collect: F,
    ) -> Result<ResponseCode>
    where
        F: FnMut(&[u8]) -> Result<()>,
    {
        let expected = {
            let stream = match self.stream.as_mut() {
                Ok(stream) => stream,
                Err(err) => return Err(err.clone()),
            };
            match stream.send_command(command) {
                Ok(tag) => tag,
                Err(err) if err.kind == ErrorKind::Cancelled => return Err(err),
                Err(err) => {
                    self.mark_disconnected(&err);
                    return Err(err);
                }
            }
        };
        // Wait for `+` before the literal; untagged noise may precede it.
        let mut line = Vec::with_capacity(1024);
        loop {
            let read = match self.stream.as_mut() {
                Ok(stream) => stream.read_logical_line(&mut line),
                Err(err) => return Err(err.clone()),
            };
            if let Err(err) = read {
                self.mark_disconnected(&err);
                return Err(err);
            }
            match classify_line(&line) {
                ResponseLine::Continuation(_) => break,
                ResponseLine::Untagged {
                    kind: UntaggedKind::Exists(n),
                    ..
                } => self.updates.push(PendingUpdate::Exists(n)),
                ResponseLine::Untagged {
                    kind: UntaggedKind::Expunge(n),
                    ..
                } => self.updates.push(PendingUpdate::Expunge(n)),
                ResponseLine::Tagged { tag, status, rest } if tag == expected.as_bytes() => {
                    // Completion without continuation: the server rejected
                    // the literal up front.
                    return self.tagged_terminal(status, rest);
                }
                _ => {}
            }
        }
        let send = match self.stream.as_mut() {
            Ok(stream) => stream.send_literal(literal),
            Err(err) => return Err(err.clone()),
        };
        if let Err(err) = send {
            self.mark_disconnected(&err);
            return Err(err);
        }
        let ret = self.drain_until_tagged(&expected, &mut collect);
        self.last_io = Instant::now();
        ret
    }

    /// Write one command without draining its response; used by the flag
    /// synchronizer to batch STOREs. The caller owns the returned tag and
    /// must eventually pass it to [`Self::drain_pending_tags`].
    pub(crate) fn send_unsynchronized(&mut self, command: &[u8]) -> Result<String> {
        let stream = match self.stream.as_mut() {
            Ok(stream) => stream,
            Err(err) => return Err(err.clone()),
        };
        match stream.send_command(command) {
            Ok(tag) => Ok(tag),
            Err(err) if err.kind == ErrorKind::Cancelled => Err(err),
            Err(err) => {
                self.mark_disconnected(&err);
                Err(err)
            }
        }
    }

    /// Drain responses until every tag in `tags` has completed. The first
    /// negative completion is remembered and returned after all tags are
    /// accounted for, so the stream is never left holding replies.
    pub(crate) fn drain_pending_tags(&mut self, tags: &mut Vec<String>) -> Result<()> {
        let mut first_err: Option<Error> = None;
        let mut line = Vec::with_capacity(1024);
        while !tags.is_empty() {
            let read = match self.stream.as_mut() {
                Ok(stream) => stream.read_logical_line(&mut line),
                Err(err) => return Err(err.clone()),
            };
            if let Err(err) = read {
                self.mark_disconnected(&err);
                return Err(err);
            }
            match classify_line(&line) {
                ResponseLine::Untagged {
                    kind: UntaggedKind::Exists(n),
                    ..
                } => self.updates.push(PendingUpdate::Exists(n)),
                ResponseLine::Untagged {
                    kind: UntaggedKind::Expunge(n),
                    ..
                } => self.updates.push(PendingUpdate::Expunge(n)),
                ResponseLine::Untagged {
                    kind: UntaggedKind::Bye,
                    payload,
                } => {
                    let err = bye_error(payload);
                    self.mark_disconnected(&err);
                    return Err(err);
                }
                ResponseLine::Tagged { tag, status, rest } => {
                    if let Some(pos) = tags.iter().position(|t| t.as_bytes() == tag) {
                        tags.remove(pos);
                        if let Err(err) = completion_result(status, rest) {
                            first_err.get_or_insert(err);
                        }
                    }
                }
                _ => {}
            }
        }
        self.last_io = Instant::now();
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn tagged_terminal(&mut self, status: TaggedStatus, rest: &[u8]) -> Result<ResponseCode> {
        match status {
            TaggedStatus::Ok | TaggedStatus::Preauth => {
                let rest = rest.trim();
                // Plain completion text is not a response code.
                if rest.starts_with(b"[") {
                    Ok(ResponseCode::from(rest))
                } else {
                    Ok(ResponseCode::None)
                }
            }
            TaggedStatus::No | TaggedStatus::Bad => completion_result(status, rest)
                .map(|()| ResponseCode::None),
            TaggedStatus::Bye => {
                let err = bye_error(rest);
                if matches!(self.state, SessionState::Closing) {
                    Ok(ResponseCode::from(rest.trim()))
                } else {
                    self.mark_disconnected(&err);
                    Err(err)
                }
            }
        }
    }

    fn drain_until_tagged<F>(&mut self, expected: &str, collect: &mut F) -> Result<ResponseCode>
    where
        F: FnMut(&[u8]) -> Result<()>,
    {
        let mut line = Vec::with_capacity(1024);
        let mut unrecognized = 0usize;
        loop {
            let read = match self.stream.as_mut() {
                Ok(stream) => stream.read_logical_line(&mut line),
                Err(err) => return Err(err.clone()),
            };
            if let Err(err) = read {
                // A command was mid-flight; its bytes cannot be retracted.
                self.mark_disconnected(&err);
                return Err(err);
            }
            match classify_line(&line) {
                ResponseLine::Continuation(_) => {
                    // Not expected here; ignore and keep draining.
                }
                ResponseLine::Untagged {
                    kind: UntaggedKind::Exists(n),
                    ..
                } => self.updates.push(PendingUpdate::Exists(n)),
                ResponseLine::Untagged {
                    kind: UntaggedKind::Expunge(n),
                    ..
                } => self.updates.push(PendingUpdate::Expunge(n)),
                ResponseLine::Untagged {
                    kind: UntaggedKind::Bye,
                    payload,
                } => {
                    if matches!(self.state, SessionState::Closing) {
                        continue;
                    }
                    let err = bye_error(payload);
                    self.mark_disconnected(&err);
                    return Err(err);
                }
                ResponseLine::Untagged { .. } => collect(&line)?,
                ResponseLine::Tagged { tag, status, rest } => {
                    if tag == expected.as_bytes() {
                        let status = status;
                        let rest = rest.to_vec();
                        return self.tagged_terminal(status, &rest);
                    }
                    imap_log!(
                        debug,
                        self,
                        "skipping response for unexpected tag: {}",
                        String::from_utf8_lossy(&line)
                    );
                }
                ResponseLine::Unrecognized(l) => {
                    unrecognized += 1;
                    imap_log!(
                        debug,
                        self,
                        "unrecognizable response line ({}/{}): {}",
                        unrecognized,
                        RESYNC_LIMIT,
                        String::from_utf8_lossy(l)
                    );
                    if unrecognized > RESYNC_LIMIT {
                        let err = Error::new(
                            "Could not resynchronize with server: too many unrecognizable \
                             response lines",
                        )
                        .set_kind(ErrorKind::Network(NetworkErrorKind::ProtocolViolation));
                        self.mark_disconnected(&err);
                        return Err(err);
                    }
                }
            }
        }
    }

    /// SELECT (or EXAMINE) `mailbox` and build a fresh message list.
    pub fn select_mailbox(
        &mut self,
        mailbox: &str,
        examine: bool,
    ) -> Result<(SelectResponse, MessageList)> {
        // Pending updates refer to the previously selected mailbox.
        self.updates = UpdateQueue::default();
        let command = format!(
            "{} {}",
            if examine { "EXAMINE" } else { "SELECT" },
            quoted(mailbox)
        );
        let mut response = Vec::with_capacity(IO_BUF_SIZE);
        let code = self.exchange(command.as_bytes(), |l| {
            response.extend_from_slice(l);
            Ok(())
        })?;
        let mut select_response = protocol_parser::select_response(&response)?;
        match code {
            ResponseCode::ReadOnly => select_response.read_only = true,
            ResponseCode::ReadWrite => select_response.read_only = false,
            _ => {}
        }
        if examine {
            select_response.read_only = true;
        }

        let mut list = MessageList::new(0, select_response.uidvalidity);
        crate::untagged::reconcile(&mut list, &mut self.updates)?;
        select_response.exists = list.len();
        // The list was just built; growth is initial population, not a
        // mid-session change.
        list.expunged_since_select = false;

        let no_permanentflags = select_response.permanentflags.0.is_empty()
            && select_response.permanentflags.1.is_empty();
        self.selected = Some(SelectedMailbox {
            name: mailbox.to_string(),
            uidvalidity: select_response.uidvalidity,
            read_only: select_response.read_only,
            can_delete: !select_response.read_only
                && (no_permanentflags
                    || select_response.can_create_flags
                    || select_response.permanentflags.0.contains(crate::Flag::TRASHED)),
            can_create_flags: select_response.can_create_flags,
        });
        self.state = SessionState::Selected;
        imap_log!(
            trace,
            self,
            "selected {} ({} messages, uidvalidity {})",
            mailbox,
            select_response.exists,
            select_response.uidvalidity
        );
        Ok((select_response, list))
    }

    /// Replay queued EXISTS/EXPUNGE updates against `list`.
    pub fn reconcile(&mut self, list: &mut MessageList) -> Result<crate::untagged::Reconciliation> {
        crate::untagged::reconcile(list, &mut self.updates)
    }

    /// Send `NOOP` if the session has been idle past
    /// [`KEEPALIVE_INTERVAL`]. A strict no-op while disconnected; never
    /// fires while a command is outstanding because `&mut self` makes that
    /// unrepresentable.
    pub fn keepalive(&mut self) -> Result<()> {
        if !self.is_connected() || self.last_io.elapsed() < KEEPALIVE_INTERVAL {
            return Ok(());
        }
        self.exchange_discard(b"NOOP").map(|_| ())
    }

    pub fn logout(&mut self) -> Result<()> {
        if !self.is_connected() {
            return Ok(());
        }
        self.state = SessionState::Closing;
        let ret = self.exchange_discard(b"LOGOUT").map(|_| ());
        self.state = SessionState::Disconnected;
        self.selected = None;
        self.stream = Err(Error::new("Logged out").set_kind(ErrorKind::Offline));
        ret
    }
}

impl Drop for ImapConnection {
    fn drop(&mut self) {
        if self.is_connected() {
            self.logout().ok();
        }
    }
}

fn bye_error(payload: &[u8]) -> Error {
    Error::new(format!(
        "Server closed the connection: {}",
        String::from_utf8_lossy(payload.trim())
    ))
    .set_kind(ErrorKind::Network(NetworkErrorKind::Io))
}

/// Map a tagged completion to a `Result`, carrying the server's
/// human-readable text on `NO`/`BAD`.
fn completion_result(status: TaggedStatus, rest: &[u8]) -> Result<()> {
    match status {
        TaggedStatus::Ok | TaggedStatus::Preauth => Ok(()),
        TaggedStatus::No => Err(Error::new(
            String::from_utf8_lossy(rest.trim()).to_string(),
        )
        .set_summary("IMAP NO Response.")
        .set_kind(ErrorKind::ProtocolError)),
        TaggedStatus::Bad => Err(Error::new(
            String::from_utf8_lossy(rest.trim()).to_string(),
        )
        .set_summary("IMAP BAD Response.")
        .set_kind(ErrorKind::ProtocolError)),
        TaggedStatus::Bye => Err(bye_error(rest)),
    }
}

/// Connect-time drain: no mailbox is selected yet, so there is no update
/// queue to feed; untagged lines are appended to `response`.
fn drain_simple(stream: &mut ImapStream, expected: &str, response: &mut Vec<u8>) -> Result<()> {
    let mut line = Vec::with_capacity(1024);
    loop {
        stream.read_logical_line(&mut line)?;
        match classify_line(&line) {
            ResponseLine::Untagged {
                kind: UntaggedKind::Bye,
                payload,
            } => return Err(bye_error(payload)),
            ResponseLine::Untagged { .. } => response.extend_from_slice(&line),
            ResponseLine::Tagged { tag, status, rest } if tag == expected.as_bytes() => {
                return completion_result(status, rest);
            }
            _ => {}
        }
    }
}

fn tls_handshake(
    socket: TcpStream,
    hostname: &str,
    danger_accept_invalid_certs: bool,
) -> Result<native_tls::TlsStream<TcpStream>> {
    let mut builder = TlsConnector::builder();
    if danger_accept_invalid_certs {
        builder.danger_accept_invalid_certs(true);
    }
    let connector = builder
        .build()
        .chain_err_kind(ErrorKind::Network(NetworkErrorKind::InvalidTLSConnection))?;
    let mut conn_result = connector.connect(hostname, socket);
    if let Err(native_tls::HandshakeError::WouldBlock(midhandshake_stream)) = conn_result {
        let mut midhandshake_stream = Some(midhandshake_stream);
        loop {
            match midhandshake_stream.take().unwrap().handshake() {
                Ok(r) => {
                    conn_result = Ok(r);
                    break;
                }
                Err(native_tls::HandshakeError::WouldBlock(stream)) => {
                    midhandshake_stream = Some(stream);
                }
                Err(err) => {
                    return Err(Error::new(err.to_string())
                        .set_kind(ErrorKind::Network(NetworkErrorKind::InvalidTLSConnection)));
                }
            }
        }
    }
    conn_result
        .map_err(Error::from)
        .chain_err_summary(|| format!("Could not initiate TLS negotiation to {}.", hostname))
}

/// Quote a mailbox or credential string per RFC 3501 `quoted` syntax.
pub fn quoted(s: &str) -> String {
    let mut ret = String::with_capacity(s.len() + 2);
    ret.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            ret.push('\\');
        }
        ret.push(c);
    }
    ret.push('"');
    ret
}

type HmacMd5 = Hmac<Md5>;

/// RFC 2195 CRAM-MD5 challenge response: `user SP hex(HMAC-MD5(secret,
/// challenge))`.
fn cram_md5_response(user: &str, secret: &str, challenge: &[u8]) -> Result<String> {
    let mut mac = HmacMd5::new_from_slice(secret.as_bytes())
        .map_err(|err| Error::new(err.to_string()).set_kind(ErrorKind::Bug))?;
    mac.update(challenge);
    let digest = mac.finalize().into_bytes();
    let mut hex = String::with_capacity(2 * digest.len());
    for b in digest.iter() {
        hex.push_str(&format!("{:02x}", b));
    }
    Ok(format!("{} {}", user, hex))
}

fn authenticate(
    stream: &mut ImapStream,
    conf: &ImapServerConf,
    capabilities: &Capabilities,
    mut authenticator: Option<&mut dyn Authenticator>,
) -> Result<()> {
    let has = |cap: &[u8]| capabilities.iter().any(|c| c.eq_ignore_ascii_case(cap));
    match conf.auth {
        AuthKind::Login => {
            if has(b"LOGINDISABLED") {
                return Err(Error::new(format!(
                    "Could not connect to {}: server does not accept the LOGIN command \
                     [LOGINDISABLED]",
                    conf.server_hostname
                ))
                .set_kind(ErrorKind::Authentication));
            }
            let command = format!(
                "LOGIN {} {}",
                quoted(&conf.server_username),
                quoted(&conf.server_password)
            );
            let tag = stream.send_command(command.as_bytes())?;
            drain_simple(stream, &tag, &mut Vec::new()).chain_err_kind(ErrorKind::Authentication)
        }
        AuthKind::Plain => {
            if !has(b"AUTH=PLAIN") {
                return Err(Error::new(format!(
                    "Could not connect to {}: AUTH=PLAIN is enabled but server did not \
                     advertise the AUTH=PLAIN capability",
                    conf.server_hostname
                ))
                .set_kind(ErrorKind::Authentication));
            }
            let tag = stream.send_command(b"AUTHENTICATE PLAIN")?;
            wait_for_continuation(stream)?;
            let credentials = format!(
                "\0{}\0{}",
                conf.server_username, conf.server_password
            );
            stream.send_raw(base64::encode(credentials.as_bytes()).as_bytes())?;
            drain_simple(stream, &tag, &mut Vec::new()).chain_err_kind(ErrorKind::Authentication)
        }
        AuthKind::CramMd5 => {
            if !has(b"AUTH=CRAM-MD5") {
                return Err(Error::new(format!(
                    "Could not connect to {}: AUTH=CRAM-MD5 is enabled but server did not \
                     advertise the AUTH=CRAM-MD5 capability",
                    conf.server_hostname
                ))
                .set_kind(ErrorKind::Authentication));
            }
            let tag = stream.send_command(b"AUTHENTICATE CRAM-MD5")?;
            let challenge_b64 = wait_for_continuation(stream)?;
            let challenge = base64::decode(challenge_b64.trim())
                .chain_err_summary(|| "Could not decode CRAM-MD5 challenge")
                .chain_err_kind(ErrorKind::Authentication)?;
            let response =
                cram_md5_response(&conf.server_username, &conf.server_password, &challenge)?;
            stream.send_raw(base64::encode(response.as_bytes()).as_bytes())?;
            drain_simple(stream, &tag, &mut Vec::new()).chain_err_kind(ErrorKind::Authentication)
        }
        AuthKind::External => {
            let authenticator = authenticator.as_deref_mut().ok_or_else(|| {
                Error::new(
                    "Configured for an external authentication mechanism but no authenticator \
                     was supplied",
                )
                .set_kind(ErrorKind::Authentication)
            })?;
            let command = format!("AUTHENTICATE {}", authenticator.mechanism());
            let tag = stream.send_command(command.as_bytes())?;
            loop {
                let mut line = Vec::with_capacity(1024);
                stream.read_logical_line(&mut line)?;
                match classify_line(&line) {
                    ResponseLine::Continuation(payload) => {
                        let challenge = base64::decode(payload.trim())
                            .chain_err_summary(|| "Could not decode server challenge")
                            .chain_err_kind(ErrorKind::Authentication)?;
                        let response = authenticator.respond(&challenge)?;
                        stream.send_raw(base64::encode(&response).as_bytes())?;
                    }
                    ResponseLine::Untagged {
                        kind: UntaggedKind::Bye,
                        payload,
                    } => return Err(bye_error(payload)),
                    ResponseLine::Tagged { tag: t, status, rest } if t == tag.as_bytes() => {
                        return completion_result(status, rest)
                            .chain_err_kind(ErrorKind::Authentication);
                    }
                    _ => {}
                }
            }
        }
    }
}

fn wait_for_continuation(stream: &mut ImapStream) -> Result<Vec<u8>> {
    let mut line = Vec::with_capacity(1024);
    loop {
        stream.read_logical_line(&mut line)?;
        match classify_line(&line) {
            ResponseLine::Continuation(payload) => return Ok(payload.rtrim().to_vec()),
            ResponseLine::Untagged {
                kind: UntaggedKind::Bye,
                payload,
            } => return Err(bye_error(payload)),
            ResponseLine::Tagged { status, rest, .. } => {
                completion_result(status, rest)?;
                return Err(Error::new(
                    "Expected a continuation request but the command completed",
                )
                .set_kind(ErrorKind::ProtocolError));
            }
            _ => {}
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Build a connection in `Selected` state over a fixture transport.
    pub(crate) fn fixture_connection(input: &[u8]) -> ImapConnection {
        let conf = ImapServerConf {
            server_hostname: "imap.example.com".into(),
            server_username: "user".into(),
            server_password: "secret".into(),
            server_port: 143,
            use_starttls: false,
            use_tls: false,
            danger_accept_invalid_certs: false,
            auth: AuthKind::Login,
            timeout: None,
        };
        let mut conn = ImapConnection::new(conf);
        conn.stream = Ok(ImapStream {
            cmd_id: 1,
            id: conn.id.clone(),
            stream: Connection::Fixture(FixtureStream {
                input: std::io::Cursor::new(input.to_vec()),
                written: Vec::new(),
            }),
            pending: Vec::new(),
            cancel: conn.cancel.clone(),
            timeout: None,
        });
        for cap in ["IMAP4rev1", "UIDPLUS", "AUTH=PLAIN"] {
            conn.capabilities
                .insert(cap.as_bytes().to_vec().into_boxed_slice());
        }
        conn.state = SessionState::Selected;
        conn.selected = Some(SelectedMailbox {
            name: "INBOX".into(),
            uidvalidity: 100,
            read_only: false,
            can_delete: true,
            can_create_flags: true,
        });
        conn
    }

    pub(crate) fn written_bytes(conn: &ImapConnection) -> Vec<u8> {
        match conn.stream.as_ref() {
            Ok(ImapStream {
                stream: Connection::Fixture(f),
                ..
            }) => f.written.clone(),
            _ => Vec::new(),
        }
    }
}
