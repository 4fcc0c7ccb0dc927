//! Synchronizer state machine.
//!
//! One `Synchronizer` owns one live connection to a shared remote
//! database and keeps it and the local entry store in agreement:
//! local edits become remote writes, remote change-log records become
//! REMOTE change events applied to the local store.
//!
//! State machine:
//!
//! ```text
//! Disconnected → Connecting → Synchronized ⇄ Degraded → Closed
//! ```
//!
//! `Degraded` covers transient trouble — the notification worker runs a
//! bounded, backoff-spaced reconnection loop and either returns to
//! `Synchronized` or closes the session. `Closed` is terminal.

use crate::config::SyncOptions;
use crate::error::{SyncError, SyncResult};
use crate::remote::{FieldWrite, RemoteChangeBatch, RemoteStore, SessionId};
use bibshare_model::{ChangeEvent, ChangeFeed, ChangeOrigin, EntryId, EntryStore, Field};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// The current state of a synchronizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Not yet started.
    Disconnected,
    /// Performing the initial handshake and pull.
    Connecting,
    /// Bidirectional propagation is running.
    Synchronized,
    /// A transient failure occurred; reconnection is in progress.
    Degraded,
    /// Terminal. Every operation fails with `SessionClosed`.
    Closed,
}

impl SyncState {
    /// Returns true if the session still holds a usable connection.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, SyncState::Synchronized | SyncState::Degraded)
    }

    /// Returns true for the terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncState::Closed)
    }
}

/// Counters describing a synchronizer's activity.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Change-log polls completed.
    pub polls: u64,
    /// REMOTE events delivered to the local store.
    pub events_delivered: u64,
    /// Remote notifications swallowed (own echoes and duplicates).
    pub events_suppressed: u64,
    /// Local writes accepted by the remote.
    pub writes_pushed: u64,
    /// Local writes the remote rejected at least once.
    pub writes_rejected: u64,
    /// Queued writes dropped after their one retry failed.
    pub writes_failed: u64,
    /// Successful reconnections.
    pub reconnects: u64,
    /// The error that closed the session, if any.
    pub last_error: Option<String>,
}

/// Bidirectional change propagation for one open session.
pub struct Synchronizer {
    session_id: SessionId,
    remote: Arc<dyn RemoteStore>,
    store: Arc<dyn EntryStore>,
    options: SyncOptions,
    state: RwLock<SyncState>,
    state_subscribers: RwLock<Vec<Sender<SyncState>>>,
    remote_events: ChangeFeed,
    /// Per-entry mutual exclusion between local writes and remote
    /// delivery.
    entry_locks: Mutex<HashMap<EntryId, Arc<Mutex<()>>>>,
    /// Local events queued while the connection is degraded; each is
    /// retried once after reconnection.
    pending: Mutex<Vec<ChangeEvent>>,
    cursor: AtomicU64,
    shutdown: AtomicBool,
    wake_lock: Mutex<()>,
    wake_cv: Condvar,
    worker: Mutex<Option<JoinHandle<()>>>,
    stats: RwLock<SyncStats>,
}

impl Synchronizer {
    /// Connects the local store to an already-open remote store and
    /// starts propagation.
    ///
    /// Performs the initial pull (populating the local store from the
    /// remote snapshot), spawns the notification worker, and moves to
    /// `Synchronized`.
    pub fn start(
        remote: Arc<dyn RemoteStore>,
        store: Arc<dyn EntryStore>,
        options: SyncOptions,
    ) -> SyncResult<Arc<Self>> {
        let sync = Arc::new(Self {
            session_id: SessionId::new(),
            remote,
            store,
            options,
            state: RwLock::new(SyncState::Disconnected),
            state_subscribers: RwLock::new(Vec::new()),
            remote_events: ChangeFeed::new(),
            entry_locks: Mutex::new(HashMap::new()),
            pending: Mutex::new(Vec::new()),
            cursor: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
            wake_lock: Mutex::new(()),
            wake_cv: Condvar::new(),
            worker: Mutex::new(None),
            stats: RwLock::new(SyncStats::default()),
        });

        sync.transition(SyncState::Connecting);
        if let Err(error) = sync.initial_pull() {
            sync.fail(&error);
            return Err(error);
        }

        let worker = {
            let this = Arc::clone(&sync);
            std::thread::Builder::new()
                .name("bibshare-sync".into())
                .spawn(move || this.worker_loop())
                .map_err(|e| SyncError::internal(format!("failed to spawn sync worker: {e}")))?
        };
        *sync.worker.lock() = Some(worker);

        sync.transition(SyncState::Synchronized);
        info!(session = %sync.session_id, "session synchronized");
        Ok(sync)
    }

    /// This session's identity on the remote change log.
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// The current state.
    #[must_use]
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// A copy of the activity counters.
    #[must_use]
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Subscribes to REMOTE change events delivered by this session.
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        self.remote_events.subscribe()
    }

    /// Subscribes to state transitions.
    pub fn subscribe_state(&self) -> Receiver<SyncState> {
        let (tx, rx) = mpsc::channel();
        self.state_subscribers.write().push(tx);
        rx
    }

    /// Pushes one locally originated change to the remote store.
    ///
    /// Fire-and-forget while the connection is degraded: the event is
    /// queued and retried once after reconnection. While synchronized the
    /// write happens inline under the entry's lock; a rejected write is
    /// retried once against the remote's current value and then surfaced
    /// as a per-change error without tearing down the session.
    ///
    /// Events with REMOTE origin are swallowed — the store feed replays
    /// this session's own applied changes, and pushing them back out
    /// would echo them forever.
    pub fn apply_local_change(&self, event: &ChangeEvent) -> SyncResult<()> {
        match self.state() {
            SyncState::Closed => return Err(SyncError::SessionClosed),
            SyncState::Synchronized => {}
            SyncState::Disconnected | SyncState::Connecting | SyncState::Degraded => {
                if event.origin == ChangeOrigin::Local && !event.is_noop() {
                    self.pending.lock().push(event.clone());
                }
                return Ok(());
            }
        }
        if event.origin == ChangeOrigin::Remote || event.is_noop() {
            return Ok(());
        }

        let lock = self.entry_lock(event.entry_id);
        let _guard = lock.lock();

        let write = FieldWrite {
            session: self.session_id,
            entry_id: event.entry_id,
            field: event.field.name().to_string(),
            expected: event.old_value.clone(),
            value: event.new_value.clone(),
        };
        match self.remote.write_field(&write) {
            Ok(_) => {
                self.stats.write().writes_pushed += 1;
                Ok(())
            }
            Err(SyncError::RemoteRejected { .. }) => {
                self.stats.write().writes_rejected += 1;
                self.transition(SyncState::Degraded);
                self.retry_rejected_write(event, write)
            }
            Err(error) if error.is_transient() => {
                debug!(error = %error, "write hit transient failure, queueing");
                self.transition(SyncState::Degraded);
                self.pending.lock().push(event.clone());
                self.wake();
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    /// Closes the session. Idempotent; cancels any in-flight
    /// reconnection wait and joins the worker.
    pub fn close(&self) {
        let already = self.shutdown.swap(true, Ordering::SeqCst);
        self.transition(SyncState::Closed);
        self.wake();
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
        if !already {
            debug!(session = %self.session_id, "session closed");
        }
    }

    fn initial_pull(&self) -> SyncResult<()> {
        let snapshot = self.remote.snapshot()?;
        self.cursor.store(snapshot.cursor, Ordering::SeqCst);
        for entry in snapshot.entries {
            for (field, value) in entry.fields {
                let event = ChangeEvent::remote(entry.id, Field::new(field), None, Some(value));
                self.store.apply_remote(&event);
            }
        }
        Ok(())
    }

    fn worker_loop(&self) {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            let cursor = self.cursor.load(Ordering::SeqCst);
            match self
                .remote
                .changes_since(cursor, self.options.poll_batch_size)
            {
                Ok(batch) => {
                    let has_more = batch.has_more;
                    self.stats.write().polls += 1;
                    self.deliver_batch(batch);
                    // A degraded state set by a failed write heals as
                    // soon as the log answers again.
                    if self.state() == SyncState::Degraded {
                        self.transition(SyncState::Synchronized);
                    }
                    if !self.pending.lock().is_empty() {
                        self.flush_pending();
                    }
                    if !has_more {
                        self.wait(self.options.poll_interval);
                    }
                }
                Err(error) if error.is_transient() => {
                    if !self.reconnect(&error) {
                        break;
                    }
                }
                Err(error) => {
                    self.fail(&error);
                    break;
                }
            }
        }
        debug!(session = %self.session_id, "notification worker stopped");
    }

    fn deliver_batch(&self, batch: RemoteChangeBatch) {
        let mut delivered = 0u64;
        let mut suppressed = 0u64;
        for change in batch.changes {
            self.cursor.fetch_max(change.sequence, Ordering::SeqCst);
            if change.session == self.session_id {
                // Echo of our own write.
                suppressed += 1;
                continue;
            }
            let event = ChangeEvent::remote(
                change.entry_id,
                Field::new(change.field),
                change.old_value,
                change.new_value,
            );
            let applied = {
                let lock = self.entry_lock(event.entry_id);
                let _guard = lock.lock();
                self.store.apply_remote(&event)
            };
            if applied {
                self.remote_events.emit(event);
                delivered += 1;
            } else {
                // Redelivery of a state the store already holds.
                suppressed += 1;
            }
        }
        if delivered > 0 || suppressed > 0 {
            let mut stats = self.stats.write();
            stats.events_delivered += delivered;
            stats.events_suppressed += suppressed;
        }
    }

    /// The single automatic retry of a rejected write, against the
    /// remote's refreshed current value.
    fn retry_rejected_write(&self, event: &ChangeEvent, mut write: FieldWrite) -> SyncResult<()> {
        match self.remote.read_field(&event.entry_id, &write.field) {
            Ok(current) => write.expected = current,
            Err(error) if error.is_transient() => {
                self.pending.lock().push(event.clone());
                self.wake();
                return Ok(());
            }
            Err(error) => {
                self.transition(SyncState::Synchronized);
                return Err(error);
            }
        }
        match self.remote.write_field(&write) {
            Ok(_) => {
                self.stats.write().writes_pushed += 1;
                self.transition(SyncState::Synchronized);
                Ok(())
            }
            Err(error @ SyncError::RemoteRejected { .. }) => {
                // Retry exhausted: surface per-change, keep the session.
                self.transition(SyncState::Synchronized);
                Err(error)
            }
            Err(error) if error.is_transient() => {
                self.pending.lock().push(event.clone());
                self.wake();
                Ok(())
            }
            Err(error) => {
                self.transition(SyncState::Synchronized);
                Err(error)
            }
        }
    }

    /// Retries each queued write once, last-writer-wins. Writes that
    /// fail again are dropped and counted.
    fn flush_pending(&self) {
        let pending: Vec<ChangeEvent> = std::mem::take(&mut *self.pending.lock());
        for event in pending {
            let field = event.field.name().to_string();
            let lock = self.entry_lock(event.entry_id);
            let _guard = lock.lock();

            let current = match self.remote.read_field(&event.entry_id, &field) {
                Ok(current) => current,
                Err(error) => {
                    warn!(error = %error, %field, "dropping queued write");
                    self.stats.write().writes_failed += 1;
                    continue;
                }
            };
            if current == event.new_value {
                continue;
            }
            let write = FieldWrite {
                session: self.session_id,
                entry_id: event.entry_id,
                field,
                expected: current,
                value: event.new_value.clone(),
            };
            match self.remote.write_field(&write) {
                Ok(_) => self.stats.write().writes_pushed += 1,
                Err(error) => {
                    warn!(error = %error, field = %write.field, "dropping queued write");
                    self.stats.write().writes_failed += 1;
                }
            }
        }
    }

    /// Bounded reconnection loop. Returns false when the worker should
    /// stop (shutdown or budget exhausted).
    fn reconnect(&self, cause: &SyncError) -> bool {
        warn!(error = %cause, "connection degraded, reconnecting");
        self.transition(SyncState::Degraded);
        let retry = &self.options.retry;
        for attempt in 1..=retry.max_attempts {
            if self.shutdown.load(Ordering::SeqCst) {
                return false;
            }
            self.wait(retry.delay_for_attempt(attempt));
            if self.shutdown.load(Ordering::SeqCst) {
                return false;
            }
            match self.remote.ping() {
                Ok(()) => {
                    debug!(attempt, "reconnected");
                    self.stats.write().reconnects += 1;
                    self.transition(SyncState::Synchronized);
                    self.flush_pending();
                    return true;
                }
                Err(error) => {
                    debug!(attempt, error = %error, "reconnection attempt failed");
                }
            }
        }
        self.fail(&SyncError::ReconnectExhausted {
            attempts: retry.max_attempts,
        });
        false
    }

    fn fail(&self, error: &SyncError) {
        warn!(error = %error, "synchronizer closing on error");
        self.stats.write().last_error = Some(error.to_string());
        self.shutdown.store(true, Ordering::SeqCst);
        self.transition(SyncState::Closed);
    }

    fn transition(&self, next: SyncState) {
        {
            let mut state = self.state.write();
            if *state == next || state.is_terminal() {
                return;
            }
            debug!(from = ?*state, to = ?next, "state transition");
            *state = next;
        }
        let mut subscribers = self.state_subscribers.write();
        subscribers.retain(|tx| tx.send(next).is_ok());
    }

    fn entry_lock(&self, id: EntryId) -> Arc<Mutex<()>> {
        Arc::clone(
            self.entry_locks
                .lock()
                .entry(id)
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Interruptible sleep; returns early when woken by `wake`.
    fn wait(&self, timeout: Duration) {
        if timeout.is_zero() {
            return;
        }
        let mut guard = self.wake_lock.lock();
        if self.shutdown.load(Ordering::SeqCst) {
            return;
        }
        let _ = self.wake_cv.wait_for(&mut guard, timeout);
    }

    fn wake(&self) {
        let _guard = self.wake_lock.lock();
        self.wake_cv.notify_all();
    }
}

impl Drop for Synchronizer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.wake();
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for Synchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synchronizer")
            .field("session_id", &self.session_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
