//! Registry of open shared connections.

use crate::properties::{ConnectionProperties, EngineKind};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// The identity under which a connection is tracked: engine, host
/// (lowercased), port, database, user. Matches
/// [`ConnectionProperties::same_target`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ConnectionKey {
    engine: EngineKind,
    host: String,
    port: u16,
    database: String,
    user: String,
}

impl ConnectionKey {
    fn from_properties(properties: &ConnectionProperties) -> Self {
        Self {
            engine: properties.engine(),
            host: properties.host().to_ascii_lowercase(),
            port: properties.port(),
            database: properties.database().to_string(),
            user: properties.user().to_string(),
        }
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    open: Mutex<HashSet<ConnectionKey>>,
}

impl RegistryInner {
    fn release(&self, key: &ConnectionKey) {
        self.open.lock().remove(key);
    }
}

/// Tracks which connection targets are currently open in this process so
/// a second session to the identical remote database is rejected.
///
/// The registry is an explicitly constructed instance with its own
/// lifetime — construct one, share it (it clones cheaply), and hand it
/// to every `SessionManager` that should participate in duplicate
/// detection.
///
/// # Thread Safety
///
/// The duplicate check and the registration happen inside one critical
/// section, so two sessions racing to open the same target cannot both
/// be admitted.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner::default()),
        }
    }

    /// Returns true if some currently open session targets the same
    /// logical database.
    #[must_use]
    pub fn is_open(&self, properties: &ConnectionProperties) -> bool {
        self.inner
            .open
            .lock()
            .contains(&ConnectionKey::from_properties(properties))
    }

    /// Atomically checks for a duplicate and registers the target.
    ///
    /// Returns `None` if the target is already open. The returned lease
    /// releases the registration when dropped, on every exit path.
    #[must_use]
    pub fn try_register(&self, properties: &ConnectionProperties) -> Option<RegistryLease> {
        let key = ConnectionKey::from_properties(properties);
        let mut open = self.inner.open.lock();
        if open.contains(&key) {
            return None;
        }
        open.insert(key.clone());
        Some(RegistryLease {
            registry: Arc::clone(&self.inner),
            key,
        })
    }

    /// Number of currently registered targets.
    #[must_use]
    pub fn active(&self) -> usize {
        self.inner.open.lock().len()
    }
}

/// A registration held by one open session.
///
/// Dropping the lease releases the target, so the registry cannot leak
/// a registration no matter how the session ends.
#[derive(Debug)]
pub struct RegistryLease {
    registry: Arc<RegistryInner>,
    key: ConnectionKey,
}

impl Drop for RegistryLease {
    fn drop(&mut self) {
        self.registry.release(&self.key);
    }
}
