/*
 * plover - error module.
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

//! An error object for `plover`.

use std::{borrow::Cow, error, fmt, io, num, result, str, string, sync::Arc};

pub type Result<T> = result::Result<T, Error>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NetworkErrorKind {
    /// Name lookup of host failed.
    HostLookupFailed,
    /// Connection failed.
    ConnectionFailed,
    /// TLS negotiation or certificate failure.
    InvalidTLSConnection,
    /// Read/write failure on an established connection.
    Io,
    /// Peer sent data that cannot be understood; resynchronization failed.
    ProtocolViolation,
}

impl fmt::Display for NetworkErrorKind {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::HostLookupFailed => write!(fmt, "Name lookup of host failed."),
            Self::ConnectionFailed => write!(fmt, "Connection failed."),
            Self::InvalidTLSConnection => write!(fmt, "Invalid TLS connection."),
            Self::Io => write!(fmt, "I/O error."),
            Self::ProtocolViolation => write!(fmt, "Protocol violation."),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ErrorKind {
    #[default]
    None,
    /// Server replied `NO`/`BAD`; the session remains usable.
    ProtocolError,
    /// Server does not speak IMAP4rev1 or lacks a required capability.
    ProtocolNotSupported,
    /// Credentials were rejected or the mechanism failed.
    Authentication,
    /// Socket-level failure; the session is dead.
    Network(NetworkErrorKind),
    /// Operation was cancelled at a checkpoint.
    Cancelled,
    /// Session is in disconnected mode and the operation needs the socket.
    Offline,
    /// Queued mailbox updates could not be replayed; a re-`SELECT` is
    /// required before sequence numbers can be trusted again.
    Divergence,
    NotFound,
    Timeout,
    Bug,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::None => write!(fmt, "Error"),
            Self::ProtocolError => write!(fmt, "Protocol error"),
            Self::ProtocolNotSupported => write!(fmt, "Protocol not supported"),
            Self::Authentication => write!(fmt, "Authentication failure"),
            Self::Network(inner) => write!(fmt, "Network error: {}", inner),
            Self::Cancelled => write!(fmt, "Cancelled"),
            Self::Offline => write!(fmt, "Offline"),
            Self::Divergence => write!(fmt, "Client/server state divergence"),
            Self::NotFound => write!(fmt, "Not found"),
            Self::Timeout => write!(fmt, "Timed out"),
            Self::Bug => write!(fmt, "Bug, please report this"),
        }
    }
}

impl ErrorKind {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

#[derive(Clone, Debug)]
pub struct Error {
    pub summary: Option<Cow<'static, str>>,
    pub details: Cow<'static, str>,
    pub source: Option<Arc<dyn error::Error + Send + Sync + 'static>>,
    pub kind: ErrorKind,
}

pub trait IntoError {
    fn set_err_summary<M>(self, msg: M) -> Error
    where
        M: Into<Cow<'static, str>>;

    fn set_err_kind(self, kind: ErrorKind) -> Error;
}

pub trait ResultIntoError<T> {
    fn chain_err_summary<M, F>(self, msg_fn: F) -> Result<T>
    where
        F: Fn() -> M,
        M: Into<Cow<'static, str>>;

    fn chain_err_kind(self, kind: ErrorKind) -> Result<T>;
}

impl<I: Into<Error>> IntoError for I {
    #[inline]
    fn set_err_summary<M>(self, msg: M) -> Error
    where
        M: Into<Cow<'static, str>>,
    {
        let err: Error = self.into();
        err.set_summary(msg)
    }

    #[inline]
    fn set_err_kind(self, kind: ErrorKind) -> Error {
        let err: Error = self.into();
        err.set_kind(kind)
    }
}

impl<T, I: Into<Error>> ResultIntoError<T> for result::Result<T, I> {
    #[inline]
    fn chain_err_summary<M, F>(self, msg_fn: F) -> Result<T>
    where
        F: Fn() -> M,
        M: Into<Cow<'static, str>>,
    {
        self.map_err(|err| err.set_err_summary(msg_fn()))
    }

    #[inline]
    fn chain_err_kind(self, kind: ErrorKind) -> Result<T> {
        self.map_err(|err| err.set_err_kind(kind))
    }
}

impl Error {
    pub fn new<M>(msg: M) -> Self
    where
        M: Into<Cow<'static, str>>,
    {
        Self {
            summary: None,
            details: msg.into(),
            source: None,
            kind: ErrorKind::default(),
        }
    }

    pub fn set_summary<M>(mut self, summary: M) -> Self
    where
        M: Into<Cow<'static, str>>,
    {
        self.summary = Some(summary.into());
        self
    }

    pub fn set_source(
        mut self,
        new_val: Option<Arc<dyn error::Error + Send + Sync + 'static>>,
    ) -> Self {
        self.source = new_val;
        self
    }

    pub fn set_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = kind;
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(summary) = self.summary.as_ref() {
            writeln!(f, "Summary: {}", summary)?;
        }
        write!(f, "{}", self.details)?;
        if let Some(source) = self.source.as_ref() {
            write!(f, "\nCaused by: {}", source)?;
        }
        Ok(())
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.source.as_ref().map(|s| &(*(*s)) as _)
    }
}

impl From<io::Error> for Error {
    #[inline]
    fn from(err: io::Error) -> Self {
        Self::new(err.to_string())
            .set_source(Some(Arc::new(err)))
            .set_kind(ErrorKind::Network(NetworkErrorKind::Io))
    }
}

impl From<native_tls::Error> for Error {
    #[inline]
    fn from(err: native_tls::Error) -> Self {
        Self::new(err.to_string())
            .set_source(Some(Arc::new(err)))
            .set_kind(ErrorKind::Network(NetworkErrorKind::InvalidTLSConnection))
    }
}

impl From<native_tls::HandshakeError<std::net::TcpStream>> for Error {
    #[inline]
    fn from(err: native_tls::HandshakeError<std::net::TcpStream>) -> Self {
        Self::new(err.to_string())
            .set_kind(ErrorKind::Network(NetworkErrorKind::InvalidTLSConnection))
    }
}

impl<'a> From<nom::Err<nom::error::Error<&'a [u8]>>> for Error {
    #[inline]
    fn from(err: nom::Err<nom::error::Error<&'a [u8]>>) -> Self {
        Self::new(match err {
            nom::Err::Incomplete(_) => "Parsing failure: incomplete input".to_string(),
            nom::Err::Error(err) | nom::Err::Failure(err) => format!(
                "Parsing failure: {:?} at `{}`",
                err.code,
                String::from_utf8_lossy(err.input)
            ),
        })
        .set_kind(ErrorKind::ProtocolError)
    }
}

impl From<num::ParseIntError> for Error {
    #[inline]
    fn from(err: num::ParseIntError) -> Self {
        Self::new(err.to_string()).set_source(Some(Arc::new(err)))
    }
}

impl From<str::Utf8Error> for Error {
    #[inline]
    fn from(err: str::Utf8Error) -> Self {
        Self::new(err.to_string()).set_source(Some(Arc::new(err)))
    }
}

impl From<string::FromUtf8Error> for Error {
    #[inline]
    fn from(err: string::FromUtf8Error) -> Self {
        Self::new(err.to_string()).set_source(Some(Arc::new(err)))
    }
}

impl From<base64::DecodeError> for Error {
    #[inline]
    fn from(err: base64::DecodeError) -> Self {
        Self::new(err.to_string()).set_source(Some(Arc::new(err)))
    }
}

impl From<&str> for Error {
    #[inline]
    fn from(details: &str) -> Self {
        Self::new(details.to_string())
    }
}

impl From<String> for Error {
    #[inline]
    fn from(details: String) -> Self {
        Self::new(details)
    }
}
