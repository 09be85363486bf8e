//! Purpose: Model every failure shape a client operation can surface.
//! Exports: `Error`, `ErrorKind`, and the sentinel constructors.
//! Role: Single error type for the whole crate; no operation invents its own.
//! Invariants: Sentinel message strings are stable; legacy callers match on them.
//! Invariants: `NoMatch` is the gokabinet "success" compatibility sentinel, not a real failure.

use std::error::Error as StdError;
use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// Single-key REST lookup returned 404.
    NotFound,
    /// The per-call deadline elapsed before a usable response was obtained,
    /// including a deadline that fired while the body was being read.
    Timeout,
    /// Non-success HTTP status with a server-supplied message.
    Protocol,
    /// Unrecognized response content-type.
    Decode,
    /// Prefix match found zero records. Predecessor libraries reported this
    /// as a "success" error and callers still pattern-match on it.
    NoMatch,
    /// Credential material could not be loaded or assembled.
    Credentials,
    Io,
    Usage,
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    code: Option<u16>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            code: None,
            source: None,
        }
    }

    /// Lookup miss sentinel. The wording is deliberately odd: users search
    /// for "logical inconsistency" (the server's own phrase) to find misses.
    pub fn not_found() -> Self {
        Self::new(ErrorKind::NotFound).with_message("entry not found aka logical inconsistency")
    }

    pub fn timeout() -> Self {
        Self::new(ErrorKind::Timeout).with_message("operation timeout")
    }

    /// Zero prefix matches. gokabinet returned this on success; kept for
    /// compatibility until every caller stops matching the string.
    pub fn no_match() -> Self {
        Self::new(ErrorKind::NoMatch).with_message("success")
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// HTTP status code attached to the error, if any.
    pub fn code(&self) -> Option<u16> {
        self.code
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_code(mut self, code: u16) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "kt: {:?}", self.kind)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(code) = self.code {
            write!(f, " (status: {code})")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}
