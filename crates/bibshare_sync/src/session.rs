//! Session orchestration.
//!
//! `SessionManager` owns the open path: validate the properties, admit
//! the target through the registry, open the physical connection, probe
//! the schema, start a synchronizer, and wire it to the local store.
//! The registry lease is an RAII guard, so every early return on the way
//! releases it.

use crate::config::SyncOptions;
use crate::error::{SyncError, SyncResult};
use crate::properties::ConnectionProperties;
use crate::registry::{ConnectionRegistry, RegistryLease};
use crate::remote::{RemoteConnector, CURRENT_SCHEMA_VERSION};
use crate::synchronizer::Synchronizer;
use bibshare_model::{BibEntry, ChangeOrigin, EntryStore};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{info, warn};

/// Format version of the local mirror file.
const MIRROR_FORMAT_VERSION: u32 = 1;

/// How often the local-edit forwarder checks for shutdown.
const FORWARDER_TICK: Duration = Duration::from_millis(25);

#[derive(Debug, Serialize, Deserialize)]
struct MirrorSnapshot {
    version: u32,
    entries: Vec<BibEntry>,
}

/// Result of [`SessionManager::open`].
#[derive(Debug)]
pub enum OpenOutcome {
    /// A new session was opened.
    Opened(Session),
    /// Some session in this process already targets the same logical
    /// database. A decision point for the caller, not a failure.
    AlreadyConnected,
}

impl OpenOutcome {
    /// Unwraps the session; panics on `AlreadyConnected`. Test helper.
    #[must_use]
    pub fn expect_opened(self) -> Session {
        match self {
            OpenOutcome::Opened(session) => session,
            OpenOutcome::AlreadyConnected => panic!("expected an opened session"),
        }
    }
}

/// Opens and supervises shared sessions.
pub struct SessionManager {
    registry: ConnectionRegistry,
    connector: Arc<dyn RemoteConnector>,
}

impl SessionManager {
    /// Creates a manager using the given registry and connector.
    pub fn new(registry: ConnectionRegistry, connector: Arc<dyn RemoteConnector>) -> Self {
        Self {
            registry,
            connector,
        }
    }

    /// The registry this manager admits sessions through.
    #[must_use]
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Opens a shared session.
    ///
    /// # Errors
    ///
    /// - `InvalidConfiguration` for malformed properties
    /// - `AuthenticationFailed` if the remote refuses the credentials
    /// - `LegacySchemaDetected` if the remote schema predates the
    ///   supported structure; the remote is left untouched and
    ///   [`open_with_migration`](Self::open_with_migration) offers the
    ///   side-by-side path
    /// - `Timeout`/`TransientIo` if the remote is unreachable
    ///
    /// A duplicate target is not an error: the result is
    /// [`OpenOutcome::AlreadyConnected`].
    pub fn open(
        &self,
        properties: &ConnectionProperties,
        store: Arc<dyn EntryStore>,
        options: SyncOptions,
    ) -> SyncResult<OpenOutcome> {
        properties.validate()?;

        let Some(lease) = self.registry.try_register(properties) else {
            info!(
                database = properties.database(),
                "already connected to this target"
            );
            return Ok(OpenOutcome::AlreadyConnected);
        };

        // Every `?` from here on drops the lease before propagating.
        let remote = self.connector.connect(properties)?;

        let version = remote.schema_version()?;
        if version < CURRENT_SCHEMA_VERSION {
            info!(
                found = version,
                supported = CURRENT_SCHEMA_VERSION,
                "remote schema predates supported structure"
            );
            return Err(SyncError::LegacySchemaDetected {
                found: version,
                supported: CURRENT_SCHEMA_VERSION,
            });
        }

        let synchronizer = Synchronizer::start(remote, Arc::clone(&store), options.clone())?;
        let (forwarder_stop, forwarder) =
            spawn_local_forwarder(Arc::clone(&store), Arc::clone(&synchronizer))?;

        let mut session = Session {
            synchronizer,
            store,
            properties: properties.clone(),
            lease: Some(lease),
            forwarder_stop,
            forwarder: Some(forwarder),
            autosave_error: None,
        };

        if let Some(path) = &options.autosave {
            if let Err(error) = session.save_mirror(path) {
                warn!(error = %error, path = %path.display(), "autosave mirror failed");
                session.autosave_error = Some(error.to_string());
            }
        }

        Ok(OpenOutcome::Opened(session))
    }

    /// Performs the side-by-side legacy migration the caller confirmed,
    /// then opens a session against the migrated database.
    ///
    /// The original database is left untouched.
    pub fn open_with_migration(
        &self,
        properties: &ConnectionProperties,
        store: Arc<dyn EntryStore>,
        options: SyncOptions,
    ) -> SyncResult<OpenOutcome> {
        properties.validate()?;
        let migrated = self.connector.migrate_legacy(properties)?;
        info!(
            from = properties.database(),
            to = migrated.database(),
            "migrated legacy database side by side"
        );
        self.open(&migrated, store, options)
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("active", &self.registry.active())
            .finish_non_exhaustive()
    }
}

/// Forwards LOCAL events from the store feed into the synchronizer.
///
/// REMOTE events the synchronizer itself applied also travel the feed;
/// `apply_local_change` swallows those by origin.
fn spawn_local_forwarder(
    store: Arc<dyn EntryStore>,
    synchronizer: Arc<Synchronizer>,
) -> SyncResult<(Arc<AtomicBool>, JoinHandle<()>)> {
    let receiver = store.feed().subscribe();
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = Arc::clone(&stop);
    let handle = std::thread::Builder::new()
        .name("bibshare-local-feed".into())
        .spawn(move || loop {
            if stop_flag.load(Ordering::SeqCst) {
                break;
            }
            match receiver.recv_timeout(FORWARDER_TICK) {
                Ok(event) => {
                    if event.origin == ChangeOrigin::Remote {
                        continue;
                    }
                    match synchronizer.apply_local_change(&event) {
                        Ok(()) => {}
                        Err(SyncError::SessionClosed) => break,
                        Err(error) => {
                            warn!(error = %error, field = %event.field, "local change not applied remotely");
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        })
        .map_err(|e| SyncError::internal(format!("failed to spawn forwarder: {e}")))?;
    Ok((stop, handle))
}

/// One open shared session.
///
/// Closing (or dropping) the session stops the local-edit forwarder,
/// closes the synchronizer, and releases the registry lease — in that
/// order, unconditionally.
pub struct Session {
    synchronizer: Arc<Synchronizer>,
    store: Arc<dyn EntryStore>,
    properties: ConnectionProperties,
    lease: Option<RegistryLease>,
    forwarder_stop: Arc<AtomicBool>,
    forwarder: Option<JoinHandle<()>>,
    autosave_error: Option<String>,
}

impl Session {
    /// The synchronizer driving this session.
    #[must_use]
    pub fn synchronizer(&self) -> &Arc<Synchronizer> {
        &self.synchronizer
    }

    /// The local store this session keeps in sync.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn EntryStore> {
        &self.store
    }

    /// The properties the session was opened with.
    #[must_use]
    pub fn properties(&self) -> &ConnectionProperties {
        &self.properties
    }

    /// The non-fatal autosave failure recorded at open, if any.
    #[must_use]
    pub fn autosave_error(&self) -> Option<&str> {
        self.autosave_error.as_deref()
    }

    /// Writes a JSON mirror of the local store.
    ///
    /// The file is written to a temporary sibling and renamed into
    /// place, so a crash mid-write never corrupts an existing mirror.
    pub fn save_mirror(&self, path: &Path) -> SyncResult<()> {
        let snapshot = MirrorSnapshot {
            version: MIRROR_FORMAT_VERSION,
            entries: self.store.entries(),
        };
        let json = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| SyncError::internal(format!("mirror serialization failed: {e}")))?;

        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, &json)
            .map_err(|e| SyncError::transient_io(format!("mirror write failed: {e}")))?;
        std::fs::rename(&tmp, path)
            .map_err(|e| SyncError::transient_io(format!("mirror rename failed: {e}")))?;
        Ok(())
    }

    /// Closes the session. Idempotent.
    pub fn close(&mut self) {
        self.forwarder_stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.forwarder.take() {
            let _ = handle.join();
        }
        self.synchronizer.close();
        // Lease released last: the target stays claimed until the
        // connection is really gone.
        self.lease.take();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("properties", &self.properties)
            .field("state", &self.synchronizer.state())
            .finish_non_exhaustive()
    }
}
