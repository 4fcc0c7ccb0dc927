//! In-memory reference remote store.
//!
//! `MemoryCluster` plays the role of the remote relational server for
//! tests and examples: named databases, user accounts, a per-database
//! change log, and fault injection to exercise the degraded paths.

use crate::error::{SyncError, SyncResult};
use crate::properties::ConnectionProperties;
use crate::remote::{
    migrated_database_name, FieldWrite, RemoteChange, RemoteChangeBatch, RemoteConnector,
    RemoteEntry, RemoteSnapshot, RemoteStore, CURRENT_SCHEMA_VERSION,
};
use bibshare_model::EntryId;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
struct MemoryRow {
    entry_type: String,
    fields: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct MemoryDatabase {
    schema_version: u32,
    rows: BTreeMap<EntryId, MemoryRow>,
    log: Vec<RemoteChange>,
    next_sequence: u64,
}

impl MemoryDatabase {
    fn new(schema_version: u32) -> Self {
        Self {
            schema_version,
            rows: BTreeMap::new(),
            log: Vec::new(),
            next_sequence: 1,
        }
    }

    fn last_sequence(&self) -> u64 {
        self.next_sequence - 1
    }
}

#[derive(Debug, Default)]
struct ClusterState {
    databases: Mutex<HashMap<String, MemoryDatabase>>,
    accounts: Mutex<HashMap<String, String>>,
    offline: AtomicBool,
    timeout_next: AtomicU32,
    fail_writes: AtomicU32,
}

impl ClusterState {
    fn check_available(&self) -> SyncResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(SyncError::transient_io("remote store unreachable"));
        }
        if take_one(&self.timeout_next) {
            return Err(SyncError::Timeout);
        }
        Ok(())
    }
}

/// Decrements the counter if positive; true if a unit was taken.
fn take_one(counter: &AtomicU32) -> bool {
    let mut current = counter.load(Ordering::SeqCst);
    while current > 0 {
        match counter.compare_exchange(current, current - 1, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(_) => return true,
            Err(actual) => current = actual,
        }
    }
    false
}

/// An in-memory cluster of named shared databases.
///
/// Implements [`RemoteConnector`]; handles returned by
/// [`connect`](RemoteConnector::connect) all share the cluster's state,
/// so several sessions connected to the same database observe each
/// other's writes through the change log.
#[derive(Debug, Default)]
pub struct MemoryCluster {
    state: Arc<ClusterState>,
}

impl MemoryCluster {
    /// Creates an empty cluster.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(ClusterState::default()),
        }
    }

    /// Registers an account. Connections for a registered user must
    /// present the matching password; unknown users are admitted.
    pub fn add_account(&self, user: impl Into<String>, password: impl Into<String>) {
        self.state
            .accounts
            .lock()
            .insert(user.into(), password.into());
    }

    /// Creates (or resets) a database at an explicit schema version.
    pub fn create_database(&self, name: impl Into<String>, schema_version: u32) {
        self.state
            .databases
            .lock()
            .insert(name.into(), MemoryDatabase::new(schema_version));
    }

    /// Seeds an entry directly into a database, bypassing the change log.
    pub fn seed_entry(&self, database: &str, entry: &RemoteEntry) {
        let mut databases = self.state.databases.lock();
        let db = databases
            .entry(database.to_string())
            .or_insert_with(|| MemoryDatabase::new(CURRENT_SCHEMA_VERSION));
        db.rows.insert(
            entry.id,
            MemoryRow {
                entry_type: entry.entry_type.clone(),
                fields: entry.fields.iter().cloned().collect(),
            },
        );
    }

    /// Takes the whole cluster on or off line.
    pub fn set_offline(&self, offline: bool) {
        self.state.offline.store(offline, Ordering::SeqCst);
    }

    /// Makes the next `count` operations time out.
    pub fn timeout_next(&self, count: u32) {
        self.state.timeout_next.store(count, Ordering::SeqCst);
    }

    /// Makes the next `count` writes be rejected.
    pub fn fail_writes(&self, count: u32) {
        self.state.fail_writes.store(count, Ordering::SeqCst);
    }

    /// Returns true if a database exists.
    #[must_use]
    pub fn database_exists(&self, name: &str) -> bool {
        self.state.databases.lock().contains_key(name)
    }

    /// Returns a database's schema version.
    #[must_use]
    pub fn schema_version_of(&self, name: &str) -> Option<u32> {
        self.state
            .databases
            .lock()
            .get(name)
            .map(|db| db.schema_version)
    }

    /// Returns the number of entries in a database.
    #[must_use]
    pub fn entry_count(&self, name: &str) -> usize {
        self.state
            .databases
            .lock()
            .get(name)
            .map_or(0, |db| db.rows.len())
    }

    /// Reads one field value directly, for assertions.
    #[must_use]
    pub fn field_value(&self, database: &str, entry_id: &EntryId, field: &str) -> Option<String> {
        self.state
            .databases
            .lock()
            .get(database)
            .and_then(|db| db.rows.get(entry_id))
            .and_then(|row| row.fields.get(field).cloned())
    }
}

impl RemoteConnector for MemoryCluster {
    fn connect(&self, properties: &ConnectionProperties) -> SyncResult<Arc<dyn RemoteStore>> {
        self.state.check_available()?;

        if let Some(expected) = self.state.accounts.lock().get(properties.user()) {
            if expected != properties.password() {
                return Err(SyncError::authentication_failed(format!(
                    "access denied for user '{}'",
                    properties.user()
                )));
            }
        }

        self.state
            .databases
            .lock()
            .entry(properties.database().to_string())
            .or_insert_with(|| MemoryDatabase::new(CURRENT_SCHEMA_VERSION));

        Ok(Arc::new(MemoryRemote {
            state: Arc::clone(&self.state),
            database: properties.database().to_string(),
        }))
    }

    fn migrate_legacy(
        &self,
        properties: &ConnectionProperties,
    ) -> SyncResult<ConnectionProperties> {
        self.state.check_available()?;

        let mut databases = self.state.databases.lock();
        let source = databases.get(properties.database()).ok_or_else(|| {
            SyncError::invalid_configuration(format!(
                "unknown database '{}'",
                properties.database()
            ))
        })?;

        let mut migrated = MemoryDatabase::new(CURRENT_SCHEMA_VERSION);
        migrated.rows = source.rows.clone();

        let target = migrated_database_name(properties.database());
        databases.insert(target.clone(), migrated);
        Ok(properties.with_database(target))
    }
}

/// A handle onto one database of a [`MemoryCluster`].
#[derive(Debug)]
pub struct MemoryRemote {
    state: Arc<ClusterState>,
    database: String,
}

impl MemoryRemote {
    fn with_database<T>(
        &self,
        f: impl FnOnce(&mut MemoryDatabase) -> SyncResult<T>,
    ) -> SyncResult<T> {
        self.state.check_available()?;
        let mut databases = self.state.databases.lock();
        let db = databases
            .get_mut(&self.database)
            .ok_or_else(|| SyncError::internal(format!("database '{}' vanished", self.database)))?;
        f(db)
    }
}

impl RemoteStore for MemoryRemote {
    fn schema_version(&self) -> SyncResult<u32> {
        self.with_database(|db| Ok(db.schema_version))
    }

    fn snapshot(&self) -> SyncResult<RemoteSnapshot> {
        self.with_database(|db| {
            let entries = db
                .rows
                .iter()
                .map(|(id, row)| RemoteEntry {
                    id: *id,
                    entry_type: row.entry_type.clone(),
                    fields: row
                        .fields
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect(),
                })
                .collect();
            Ok(RemoteSnapshot {
                entries,
                cursor: db.last_sequence(),
            })
        })
    }

    fn read_field(&self, entry_id: &EntryId, field: &str) -> SyncResult<Option<String>> {
        self.with_database(|db| {
            Ok(db
                .rows
                .get(entry_id)
                .and_then(|row| row.fields.get(field).cloned()))
        })
    }

    fn write_field(&self, write: &FieldWrite) -> SyncResult<u64> {
        if take_one(&self.state.fail_writes) {
            return Err(SyncError::remote_rejected(
                write.entry_id,
                bibshare_model::Field::new(&write.field),
                "injected rejection",
            ));
        }
        self.with_database(|db| {
            let row = db.rows.entry(write.entry_id).or_insert_with(|| MemoryRow {
                entry_type: "misc".to_string(),
                fields: BTreeMap::new(),
            });
            let current = row.fields.get(&write.field).cloned();
            if current != write.expected {
                return Err(SyncError::remote_rejected(
                    write.entry_id,
                    bibshare_model::Field::new(&write.field),
                    "concurrent modification",
                ));
            }
            match &write.value {
                Some(value) => {
                    row.fields.insert(write.field.clone(), value.clone());
                }
                None => {
                    row.fields.remove(&write.field);
                }
            }
            let sequence = db.next_sequence;
            db.next_sequence += 1;
            db.log.push(RemoteChange {
                sequence,
                session: write.session,
                entry_id: write.entry_id,
                field: write.field.clone(),
                old_value: current,
                new_value: write.value.clone(),
            });
            Ok(sequence)
        })
    }

    fn changes_since(&self, cursor: u64, limit: u32) -> SyncResult<RemoteChangeBatch> {
        self.with_database(|db| {
            let mut changes: Vec<RemoteChange> = Vec::new();
            let mut remaining = 0usize;
            for change in db.log.iter().filter(|c| c.sequence > cursor) {
                if changes.len() < limit as usize {
                    changes.push(change.clone());
                } else {
                    remaining += 1;
                }
            }
            let new_cursor = changes.last().map_or(cursor, |c| c.sequence);
            Ok(RemoteChangeBatch {
                changes,
                cursor: new_cursor,
                has_more: remaining > 0,
            })
        })
    }

    fn ping(&self) -> SyncResult<()> {
        self.state.check_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::EngineKind;
    use crate::remote::SessionId;

    fn props(database: &str, user: &str, password: &str) -> ConnectionProperties {
        ConnectionProperties::builder()
            .engine(EngineKind::MySql)
            .host("localhost")
            .database(database)
            .user(user)
            .password(password)
            .build()
            .unwrap()
    }

    fn write(session: SessionId, entry_id: EntryId, field: &str, expected: Option<&str>, value: Option<&str>) -> FieldWrite {
        FieldWrite {
            session,
            entry_id,
            field: field.to_string(),
            expected: expected.map(str::to_string),
            value: value.map(str::to_string),
        }
    }

    #[test]
    fn connect_creates_database_at_current_version() {
        let cluster = MemoryCluster::new();
        let remote = cluster.connect(&props("refs", "alice", "")).unwrap();
        assert_eq!(remote.schema_version().unwrap(), CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn registered_account_requires_matching_password() {
        let cluster = MemoryCluster::new();
        cluster.add_account("alice", "right");

        assert!(cluster.connect(&props("refs", "alice", "right")).is_ok());
        let err = match cluster.connect(&props("refs", "alice", "wrong")) {
            Ok(_) => panic!("expected connect to fail"),
            Err(e) => e,
        };
        assert!(matches!(err, SyncError::AuthenticationFailed { .. }));
    }

    #[test]
    fn optimistic_write_rejects_stale_expectation() {
        let cluster = MemoryCluster::new();
        let remote = cluster.connect(&props("refs", "alice", "")).unwrap();
        let id = EntryId::new();
        let session = SessionId::new();

        remote
            .write_field(&write(session, id, "year", None, Some("2020")))
            .unwrap();

        let err = remote
            .write_field(&write(session, id, "year", None, Some("2021")))
            .unwrap_err();
        assert!(matches!(err, SyncError::RemoteRejected { .. }));

        remote
            .write_field(&write(session, id, "year", Some("2020"), Some("2021")))
            .unwrap();
        assert_eq!(
            remote.read_field(&id, "year").unwrap(),
            Some("2021".to_string())
        );
    }

    #[test]
    fn change_log_pagination() {
        let cluster = MemoryCluster::new();
        let remote = cluster.connect(&props("refs", "alice", "")).unwrap();
        let session = SessionId::new();

        for i in 0..5 {
            let id = EntryId::new();
            remote
                .write_field(&write(session, id, "title", None, Some(&format!("t{i}"))))
                .unwrap();
        }

        let page = remote.changes_since(0, 3).unwrap();
        assert_eq!(page.changes.len(), 3);
        assert!(page.has_more);
        assert_eq!(page.cursor, 3);

        let rest = remote.changes_since(page.cursor, 10).unwrap();
        assert_eq!(rest.changes.len(), 2);
        assert!(!rest.has_more);
        assert_eq!(rest.cursor, 5);

        let empty = remote.changes_since(rest.cursor, 10).unwrap();
        assert!(empty.changes.is_empty());
        assert_eq!(empty.cursor, 5);
    }

    #[test]
    fn snapshot_cursor_matches_log_tail() {
        let cluster = MemoryCluster::new();
        let remote = cluster.connect(&props("refs", "alice", "")).unwrap();
        let session = SessionId::new();

        let snapshot = remote.snapshot().unwrap();
        assert_eq!(snapshot.cursor, 0);
        assert!(snapshot.entries.is_empty());

        remote
            .write_field(&write(session, EntryId::new(), "title", None, Some("t")))
            .unwrap();
        let snapshot = remote.snapshot().unwrap();
        assert_eq!(snapshot.cursor, 1);
        assert_eq!(snapshot.entries.len(), 1);
    }

    #[test]
    fn offline_cluster_fails_transiently() {
        let cluster = MemoryCluster::new();
        let remote = cluster.connect(&props("refs", "alice", "")).unwrap();
        cluster.set_offline(true);

        assert!(remote.ping().unwrap_err().is_transient());
        assert!(remote.snapshot().unwrap_err().is_transient());

        cluster.set_offline(false);
        assert!(remote.ping().is_ok());
    }

    #[test]
    fn injected_timeouts_are_consumed() {
        let cluster = MemoryCluster::new();
        let remote = cluster.connect(&props("refs", "alice", "")).unwrap();
        cluster.timeout_next(2);

        assert!(matches!(remote.ping(), Err(SyncError::Timeout)));
        assert!(matches!(remote.ping(), Err(SyncError::Timeout)));
        assert!(remote.ping().is_ok());
    }

    #[test]
    fn migration_copies_side_by_side() {
        let cluster = MemoryCluster::new();
        cluster.create_database("old", 1);
        let id = EntryId::new();
        cluster.seed_entry(
            "old",
            &RemoteEntry {
                id,
                entry_type: "article".into(),
                fields: vec![("title".into(), "t".into())],
            },
        );

        let migrated = cluster.migrate_legacy(&props("old", "alice", "")).unwrap();
        assert_eq!(migrated.database(), "old_migrated");

        // Original untouched, copy at the current version with the data.
        assert_eq!(cluster.schema_version_of("old"), Some(1));
        assert_eq!(cluster.entry_count("old"), 1);
        assert_eq!(
            cluster.schema_version_of("old_migrated"),
            Some(CURRENT_SCHEMA_VERSION)
        );
        assert_eq!(
            cluster.field_value("old_migrated", &id, "title"),
            Some("t".to_string())
        );
    }
}
