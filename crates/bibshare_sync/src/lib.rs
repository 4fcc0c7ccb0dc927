//! # bibshare Sync
//!
//! Shared-database synchronization engine for bibshare.
//!
//! Multiple application instances edit one bibliographic database held
//! in a remote relational store while each keeps a fully materialized
//! local copy. This crate provides:
//! - Validated connection properties with per-engine defaults
//! - A credential vault (encrypted at rest, keyed by username)
//! - A registry rejecting duplicate connections to the same target
//! - The synchronizer state machine with bounded reconnection
//! - Session orchestration including legacy-schema migration
//! - An in-memory reference remote for tests
//!
//! ## Key Invariants
//!
//! - The duplicate check and the registration are one critical section
//! - A session's own writes are never echoed back to it
//! - Remote change application is idempotent
//! - Reconnection is bounded, observable, and cancelable
//! - The registry lease is released on every exit path

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod memory;
mod prefs;
mod properties;
mod registry;
mod remote;
mod session;
mod synchronizer;
mod vault;

pub use config::{RetryConfig, SyncOptions};
pub use error::{SyncError, SyncResult};
pub use memory::{MemoryCluster, MemoryRemote};
pub use prefs::SharedPreferences;
pub use properties::{ConnectionProperties, ConnectionPropertiesBuilder, EngineKind};
pub use registry::{ConnectionRegistry, RegistryLease};
pub use remote::{
    migrated_database_name, FieldWrite, RemoteChange, RemoteChangeBatch, RemoteConnector,
    RemoteEntry, RemoteSnapshot, RemoteStore, SessionId, CURRENT_SCHEMA_VERSION,
};
pub use session::{OpenOutcome, Session, SessionManager};
pub use synchronizer::{SyncState, SyncStats, Synchronizer};
pub use vault::CredentialVault;
