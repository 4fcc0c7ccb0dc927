//! Error types for the synchronization engine.

use bibshare_model::{EntryId, Field};
use thiserror::Error;

/// Result type for synchronization operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while opening or driving a shared session.
///
/// Transient errors (`Timeout`, `TransientIo`) are retried internally up
/// to the configured budget before surfacing; configuration,
/// authentication, and schema-compatibility errors are never retried.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Malformed or incomplete connection parameters. Local, recoverable
    /// by correcting input.
    #[error("invalid configuration: {message}")]
    InvalidConfiguration {
        /// What is wrong with the parameters.
        message: String,
    },

    /// The remote store rejected the credentials. Never retried.
    #[error("authentication failed: {message}")]
    AuthenticationFailed {
        /// Detail from the remote store.
        message: String,
    },

    /// The remote schema predates the supported structure. The remote
    /// database is left untouched; a side-by-side migration is offered.
    #[error("legacy schema detected: version {found}, supported {supported}")]
    LegacySchemaDetected {
        /// Schema version found on the remote.
        found: u32,
        /// Schema version this engine supports.
        supported: u32,
    },

    /// A network operation exceeded its deadline.
    #[error("operation timed out")]
    Timeout,

    /// A transient I/O failure (connection reset, broken pipe).
    #[error("transient I/O failure: {message}")]
    TransientIo {
        /// Detail from the transport.
        message: String,
    },

    /// The remote store refused one specific write. Retried once
    /// automatically, then surfaced per-change without tearing down the
    /// session.
    #[error("remote rejected write to {field} of entry {entry_id}: {reason}")]
    RemoteRejected {
        /// The entry the write targeted.
        entry_id: EntryId,
        /// The field the write targeted.
        field: Field,
        /// Why the remote refused.
        reason: String,
    },

    /// A stored credential could not be recovered with the supplied key.
    /// Never silently treated as an empty password.
    #[error("stored credential could not be decrypted")]
    DecryptionFailed,

    /// An operation was attempted against a closed session. A
    /// programming-contract violation, never retried.
    #[error("session is closed")]
    SessionClosed,

    /// The bounded reconnection budget ran dry.
    #[error("reconnection failed after {attempts} attempts")]
    ReconnectExhausted {
        /// How many attempts were made.
        attempts: u32,
    },

    /// An internal invariant was broken.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the breakage.
        message: String,
    },
}

impl SyncError {
    /// Creates an invalid configuration error.
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
        }
    }

    /// Creates an authentication failure.
    pub fn authentication_failed(message: impl Into<String>) -> Self {
        Self::AuthenticationFailed {
            message: message.into(),
        }
    }

    /// Creates a transient I/O failure.
    pub fn transient_io(message: impl Into<String>) -> Self {
        Self::TransientIo {
            message: message.into(),
        }
    }

    /// Creates a rejected-write error.
    pub fn remote_rejected(entry_id: EntryId, field: Field, reason: impl Into<String>) -> Self {
        Self::RemoteRejected {
            entry_id,
            field,
            reason: reason.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if the failure may heal on its own and is worth an
    /// automatic reconnection attempt.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Timeout | SyncError::TransientIo { .. })
    }
}
