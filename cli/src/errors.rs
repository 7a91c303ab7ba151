//! Typed domain error enums.
//!
//! All error types implement `thiserror::Error` and convert to
//! `anyhow::Error` via the `?` operator. Runners flatten these into failure
//! results at the scheduler boundary; nothing here carries I/O handles.

use thiserror::Error;

/// Violations of the frame wire format or message grammar.
///
/// A protocol error leaves the channel in an unknown state: the session that
/// observed it must be poisoned and discarded by the pool.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("frame length prefix is not 8 hex digits")]
    BadPrefix,

    #[error("frame of {0} bytes exceeds the maximum frame size")]
    Oversize(u32),

    #[error("frame body is not a JSON object")]
    Shape,

    #[error("stream ended mid-frame")]
    Truncated,

    #[error("unexpected message type '{0}'")]
    Unexpected(String),
}

/// Errors surfaced by an agent session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("agent handshake failed: {0}")]
    Handshake(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("stream closed by agent")]
    StreamClosed,

    #[error("session is closed")]
    Closed,

    #[error("cancelled")]
    Cancelled,
}

impl SessionError {
    /// `true` when the error means the session can no longer be trusted and
    /// the pool must open a fresh one on the next acquire.
    #[must_use]
    pub fn poisons_session(&self) -> bool {
        !matches!(self, SessionError::Closed)
    }
}

/// Module name classification failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("malformed module name '{0}': expected 1 or 3 dot-separated parts")]
    MalformedName(String),

    #[error("module '{0}' not found in any configured module root")]
    NotFound(String),
}

/// Agent archive assembly failures. Fatal to any remote execution in the run.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("extension '{0}' has no resolvable module file")]
    UnknownExtension(String),

    #[error("archive assembly failed: {0}")]
    Archive(String),

    #[error("agent cache I/O failed: {0}")]
    Io(String),
}

impl From<std::io::Error> for BuildError {
    fn from(err: std::io::Error) -> Self {
        BuildError::Io(err.to_string())
    }
}

impl From<zip::result::ZipError> for BuildError {
    fn from(err: zip::result::ZipError) -> Self {
        BuildError::Archive(err.to_string())
    }
}

/// Errors raised while acquiring a pooled session.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Aggregate of per-session close failures reported by `ConnectionPool::drain`.
#[derive(Debug)]
pub struct PoolShutdownError {
    pub failures: Vec<(String, String)>,
}

impl std::fmt::Display for PoolShutdownError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed to close {} pooled session(s):", self.failures.len())?;
        for (host, err) in &self.failures {
            write!(f, " [{host}: {err}]")?;
        }
        Ok(())
    }
}

impl std::error::Error for PoolShutdownError {}
