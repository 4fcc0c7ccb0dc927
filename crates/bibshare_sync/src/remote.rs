//! The remote-store boundary.
//!
//! These traits are the seam between the synchronization engine and
//! whatever actually holds the shared database. The engine only ever
//! sees row-shaped data (`RemoteEntry`, `RemoteChange`) and translates
//! it to and from the local entity representation.

use crate::error::SyncResult;
use crate::properties::ConnectionProperties;
use bibshare_model::EntryId;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// The schema version this engine reads and writes.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Identifies one open synchronizer session.
///
/// Every remote write carries the writing session's id, and every change
/// log record carries the originator's id — that tag is what lets a
/// session recognize and swallow its own writes when they come back
/// around through the change log.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Creates a new random session id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One entry as stored remotely: an identity, a type, and field rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Stable entry identity.
    pub id: EntryId,
    /// Entry type, e.g. "article".
    pub entry_type: String,
    /// Field name/value rows.
    pub fields: Vec<(String, String)>,
}

/// A consistent full read of the remote database.
#[derive(Debug, Clone)]
pub struct RemoteSnapshot {
    /// All entries at the snapshot point.
    pub entries: Vec<RemoteEntry>,
    /// Change-log cursor matching the snapshot; polling from here yields
    /// exactly the changes made after it.
    pub cursor: u64,
}

/// An optimistic field write.
///
/// The write succeeds only if the remote's current value equals
/// `expected`; a mismatch means another session got there first and the
/// write is refused with `RemoteRejected`.
#[derive(Debug, Clone)]
pub struct FieldWrite {
    /// The writing session.
    pub session: SessionId,
    /// Target entry.
    pub entry_id: EntryId,
    /// Target field name.
    pub field: String,
    /// The value the writer believes the remote currently holds.
    pub expected: Option<String>,
    /// The new value; `None` removes the field.
    pub value: Option<String>,
}

/// One record of the remote change log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteChange {
    /// Position in the change log.
    pub sequence: u64,
    /// The session that made the change.
    pub session: SessionId,
    /// Affected entry.
    pub entry_id: EntryId,
    /// Affected field name.
    pub field: String,
    /// Value before the change.
    pub old_value: Option<String>,
    /// Value after the change.
    pub new_value: Option<String>,
}

/// A page of the remote change log.
#[derive(Debug, Clone)]
pub struct RemoteChangeBatch {
    /// The changes, in log order.
    pub changes: Vec<RemoteChange>,
    /// Cursor to resume from.
    pub cursor: u64,
    /// True if more changes were available beyond this page.
    pub has_more: bool,
}

/// One live connection to a shared remote database.
///
/// Every operation is subject to the transport's configured timeout and
/// returns `Timeout` rather than hanging; `TransientIo` marks failures
/// that are worth a reconnection attempt.
pub trait RemoteStore: Send + Sync {
    /// Reports the remote schema version.
    fn schema_version(&self) -> SyncResult<u32>;

    /// Reads the full database together with a matching change cursor.
    fn snapshot(&self) -> SyncResult<RemoteSnapshot>;

    /// Reads the current value of one field.
    fn read_field(&self, entry_id: &EntryId, field: &str) -> SyncResult<Option<String>>;

    /// Applies an optimistic field write; returns the new change-log
    /// sequence on success.
    fn write_field(&self, write: &FieldWrite) -> SyncResult<u64>;

    /// Reads change-log records after `cursor`, up to `limit`.
    fn changes_since(&self, cursor: u64, limit: u32) -> SyncResult<RemoteChangeBatch>;

    /// Probes the connection, used while reconnecting.
    fn ping(&self) -> SyncResult<()>;
}

/// Opens connections to remote stores and performs legacy migrations.
pub trait RemoteConnector: Send + Sync {
    /// Opens a connection described by the properties.
    ///
    /// # Errors
    ///
    /// `AuthenticationFailed` if the credentials are refused,
    /// `Timeout`/`TransientIo` if the store is unreachable.
    fn connect(&self, properties: &ConnectionProperties) -> SyncResult<Arc<dyn RemoteStore>>;

    /// Copies a legacy database side by side into a new database with
    /// the current structure, leaving the original untouched.
    ///
    /// Returns properties addressing the migrated database.
    fn migrate_legacy(&self, properties: &ConnectionProperties)
        -> SyncResult<ConnectionProperties>;
}

/// The database name a side-by-side migration writes to.
#[must_use]
pub fn migrated_database_name(database: &str) -> String {
    format!("{database}_migrated")
}
