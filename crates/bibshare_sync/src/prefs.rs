//! Persisted connection preferences.
//!
//! A typed key/value snapshot of everything the surrounding application
//! remembers about the last shared connection. How the snapshot gets to
//! disk is the host's business (it has serde derives for that); the
//! contract here is only the key set and the rule that the password is
//! stored exclusively through the credential vault.

use crate::error::{SyncError, SyncResult};
use crate::properties::{ConnectionProperties, ConnectionPropertiesBuilder, EngineKind};
use crate::vault::CredentialVault;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const KEY_ENGINE: &str = "engine";
const KEY_HOST: &str = "host";
const KEY_PORT: &str = "port";
const KEY_DATABASE: &str = "database";
const KEY_USER: &str = "user";
const KEY_PASSWORD: &str = "password";
const KEY_REMEMBER_PASSWORD: &str = "remember_password";
const KEY_USE_TLS: &str = "use_tls";
const KEY_TRUST_STORE: &str = "trust_store";
const KEY_SERVER_TIMEZONE: &str = "server_timezone";
const KEY_AUTOSAVE: &str = "autosave";
const KEY_FOLDER: &str = "folder";

/// Stored preferences for one shared connection.
///
/// Absent keys mean "not configured", never an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SharedPreferences {
    values: BTreeMap<String, String>,
}

impl SharedPreferences {
    /// Creates an empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a raw value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Writes a raw value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Removes a key.
    pub fn clear(&mut self, key: &str) {
        self.values.remove(key);
    }

    /// Stores the connection description.
    ///
    /// The password is persisted only when `remember_password` is set,
    /// and then only as a vault blob keyed by the username; otherwise
    /// any previously stored blob is cleared.
    pub fn store_connection(
        &mut self,
        properties: &ConnectionProperties,
        remember_password: bool,
        vault: &CredentialVault,
    ) -> SyncResult<()> {
        self.set(KEY_ENGINE, properties.engine().to_string());
        self.set(KEY_HOST, properties.host());
        self.set(KEY_PORT, properties.port().to_string());
        self.set(KEY_DATABASE, properties.database());
        self.set(KEY_USER, properties.user());
        self.set(KEY_USE_TLS, properties.use_tls().to_string());
        match properties.trust_store_path() {
            Some(path) => self.set(KEY_TRUST_STORE, path.display().to_string()),
            None => self.clear(KEY_TRUST_STORE),
        }
        match properties.server_timezone() {
            Some(tz) => self.set(KEY_SERVER_TIMEZONE, tz),
            None => self.clear(KEY_SERVER_TIMEZONE),
        }

        if remember_password {
            let blob = vault.encrypt(properties.password(), properties.user())?;
            self.set(KEY_PASSWORD, blob);
        } else {
            self.clear(KEY_PASSWORD);
        }
        self.set(KEY_REMEMBER_PASSWORD, remember_password.to_string());
        Ok(())
    }

    /// Reconstructs a properties builder from the snapshot.
    ///
    /// Returns `Ok(None)` when no connection was stored. A stored
    /// password blob is decrypted with the stored username;
    /// `DecryptionFailed` surfaces so the caller can ask for the
    /// password again — it is never silently treated as empty.
    pub fn load_connection(
        &self,
        vault: &CredentialVault,
    ) -> SyncResult<Option<ConnectionPropertiesBuilder>> {
        let (Some(engine), Some(host), Some(database), Some(user)) = (
            self.get(KEY_ENGINE),
            self.get(KEY_HOST),
            self.get(KEY_DATABASE),
            self.get(KEY_USER),
        ) else {
            return Ok(None);
        };

        let engine = EngineKind::from_name(engine).ok_or_else(|| {
            SyncError::invalid_configuration(format!("unknown engine '{engine}'"))
        })?;

        let mut builder = ConnectionProperties::builder()
            .engine(engine)
            .host(host)
            .database(database)
            .user(user);

        if let Some(port) = self.get(KEY_PORT) {
            let port: u16 = port.parse().map_err(|_| {
                SyncError::invalid_configuration(format!("stored port '{port}' is not a number"))
            })?;
            builder = builder.port(port);
        }
        if self.get(KEY_USE_TLS) == Some("true") {
            builder = builder.use_tls(true);
        }
        if let Some(path) = self.get(KEY_TRUST_STORE) {
            builder = builder.trust_store_path(path);
        }
        if let Some(tz) = self.get(KEY_SERVER_TIMEZONE) {
            builder = builder.server_timezone(tz);
        }
        if let Some(blob) = self.get(KEY_PASSWORD) {
            builder = builder.password(vault.decrypt(blob, user)?);
        }
        Ok(Some(builder))
    }

    /// Whether a password blob is stored.
    #[must_use]
    pub fn remembers_password(&self) -> bool {
        self.get(KEY_PASSWORD).is_some()
    }

    /// Stores the autosave choice and mirror folder.
    pub fn set_autosave(&mut self, autosave: bool, folder: Option<&str>) {
        self.set(KEY_AUTOSAVE, autosave.to_string());
        match folder {
            Some(folder) => self.set(KEY_FOLDER, folder),
            None => self.clear(KEY_FOLDER),
        }
    }

    /// Whether autosave was requested.
    #[must_use]
    pub fn autosave(&self) -> bool {
        self.get(KEY_AUTOSAVE) == Some("true")
    }

    /// The mirror folder, if configured.
    #[must_use]
    pub fn folder(&self) -> Option<&str> {
        self.get(KEY_FOLDER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_properties() -> ConnectionProperties {
        ConnectionProperties::builder()
            .engine(EngineKind::Postgres)
            .host("db.example.org")
            .port(5433)
            .database("references")
            .user("alice")
            .password("hunter2")
            .server_timezone("UTC")
            .build()
            .unwrap()
    }

    #[test]
    fn empty_snapshot_loads_nothing() {
        let prefs = SharedPreferences::new();
        assert!(prefs.load_connection(&CredentialVault::new()).unwrap().is_none());
    }

    #[test]
    fn roundtrip_with_remembered_password() {
        let vault = CredentialVault::new();
        let mut prefs = SharedPreferences::new();
        prefs
            .store_connection(&sample_properties(), true, &vault)
            .unwrap();
        assert!(prefs.remembers_password());

        let loaded = prefs
            .load_connection(&vault)
            .unwrap()
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(loaded.engine(), EngineKind::Postgres);
        assert_eq!(loaded.host(), "db.example.org");
        assert_eq!(loaded.port(), 5433);
        assert_eq!(loaded.database(), "references");
        assert_eq!(loaded.user(), "alice");
        assert_eq!(loaded.password(), "hunter2");
        assert_eq!(loaded.server_timezone(), Some("UTC"));
    }

    #[test]
    fn password_is_never_stored_in_clear_text() {
        let vault = CredentialVault::new();
        let mut prefs = SharedPreferences::new();
        prefs
            .store_connection(&sample_properties(), true, &vault)
            .unwrap();

        let json = serde_json::to_string(&prefs).unwrap();
        assert!(!json.contains("hunter2"));
    }

    #[test]
    fn forgetting_the_password_clears_the_blob() {
        let vault = CredentialVault::new();
        let mut prefs = SharedPreferences::new();
        prefs
            .store_connection(&sample_properties(), true, &vault)
            .unwrap();
        prefs
            .store_connection(&sample_properties(), false, &vault)
            .unwrap();

        assert!(!prefs.remembers_password());
        let loaded = prefs
            .load_connection(&vault)
            .unwrap()
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(loaded.password(), "");
    }

    #[test]
    fn blob_for_another_user_fails_to_decrypt() {
        let vault = CredentialVault::new();
        let mut prefs = SharedPreferences::new();
        prefs
            .store_connection(&sample_properties(), true, &vault)
            .unwrap();

        // Simulate the stored user changing out from under the blob.
        prefs.set("user", "bob");
        let err = prefs.load_connection(&vault).unwrap_err();
        assert!(matches!(err, SyncError::DecryptionFailed));
    }

    #[test]
    fn stored_port_must_be_numeric() {
        let vault = CredentialVault::new();
        let mut prefs = SharedPreferences::new();
        prefs
            .store_connection(&sample_properties(), false, &vault)
            .unwrap();
        prefs.set("port", "not-a-port");

        let err = prefs.load_connection(&vault).unwrap_err();
        assert!(matches!(err, SyncError::InvalidConfiguration { .. }));
    }

    #[test]
    fn autosave_keys() {
        let mut prefs = SharedPreferences::new();
        assert!(!prefs.autosave());
        prefs.set_autosave(true, Some("/home/alice/mirrors"));
        assert!(prefs.autosave());
        assert_eq!(prefs.folder(), Some("/home/alice/mirrors"));
        prefs.set_autosave(false, None);
        assert!(!prefs.autosave());
        assert_eq!(prefs.folder(), None);
    }

    #[test]
    fn serde_roundtrip_is_transparent() {
        let vault = CredentialVault::new();
        let mut prefs = SharedPreferences::new();
        prefs
            .store_connection(&sample_properties(), false, &vault)
            .unwrap();

        let json = serde_json::to_string(&prefs).unwrap();
        let back: SharedPreferences = serde_json::from_str(&json).unwrap();
        assert_eq!(back, prefs);
    }
}
