//! Connection properties and their builder.

use crate::error::{SyncError, SyncResult};
use std::fmt;
use std::path::{Path, PathBuf};

/// A supported remote database engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    /// MySQL / MariaDB.
    MySql,
    /// PostgreSQL.
    Postgres,
    /// Oracle.
    Oracle,
}

impl EngineKind {
    /// All supported engines.
    pub const ALL: [EngineKind; 3] = [EngineKind::MySql, EngineKind::Postgres, EngineKind::Oracle];

    /// The engine's conventional port, used when the builder leaves the
    /// port unset.
    #[must_use]
    pub fn default_port(&self) -> u16 {
        match self {
            EngineKind::MySql => 3306,
            EngineKind::Postgres => 5432,
            EngineKind::Oracle => 1521,
        }
    }

    /// The URL scheme used when composing a connection URL.
    #[must_use]
    pub fn scheme(&self) -> &'static str {
        match self {
            EngineKind::MySql => "mysql",
            EngineKind::Postgres => "postgresql",
            EngineKind::Oracle => "oracle",
        }
    }

    /// Parses an engine name, case-insensitively.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "mysql" => Some(EngineKind::MySql),
            "postgresql" | "postgres" => Some(EngineKind::Postgres),
            "oracle" => Some(EngineKind::Oracle),
            _ => None,
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineKind::MySql => "MySQL",
            EngineKind::Postgres => "PostgreSQL",
            EngineKind::Oracle => "Oracle",
        };
        f.write_str(name)
    }
}

/// An immutable, validated description of how to reach one remote
/// database.
///
/// Built once per connection attempt via [`ConnectionPropertiesBuilder`],
/// never mutated afterwards, and discarded when the session closes. Two
/// instances describe the same logical target when engine, host
/// (case-insensitive), port, database, and user agree — the password and
/// TLS details are deliberately excluded from that identity.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionProperties {
    engine: EngineKind,
    host: String,
    port: u16,
    database: String,
    user: String,
    password: String,
    use_tls: bool,
    trust_store_path: Option<PathBuf>,
    trust_store_password: Option<String>,
    server_timezone: Option<String>,
    allow_public_key_retrieval: bool,
    expert_mode: bool,
    url_override: Option<String>,
}

impl ConnectionProperties {
    /// Starts a builder.
    #[must_use]
    pub fn builder() -> ConnectionPropertiesBuilder {
        ConnectionPropertiesBuilder::new()
    }

    /// The remote engine.
    #[must_use]
    pub fn engine(&self) -> EngineKind {
        self.engine
    }

    /// The remote host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The remote port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The database name.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    /// The user name.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// The password. Held in memory only for the lifetime of the
    /// connection attempt; persisted only through the credential vault.
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Whether TLS was requested.
    #[must_use]
    pub fn use_tls(&self) -> bool {
        self.use_tls
    }

    /// Path to the trust store, when TLS is in use.
    #[must_use]
    pub fn trust_store_path(&self) -> Option<&Path> {
        self.trust_store_path.as_deref()
    }

    /// Password for the trust store.
    #[must_use]
    pub fn trust_store_password(&self) -> Option<&str> {
        self.trust_store_password.as_deref()
    }

    /// Server timezone override.
    #[must_use]
    pub fn server_timezone(&self) -> Option<&str> {
        self.server_timezone.as_deref()
    }

    /// Whether the client may fetch the server's RSA public key.
    #[must_use]
    pub fn allow_public_key_retrieval(&self) -> bool {
        self.allow_public_key_retrieval
    }

    /// Whether the expert URL override is active.
    #[must_use]
    pub fn expert_mode(&self) -> bool {
        self.expert_mode
    }

    /// The raw expert URL override, if any.
    #[must_use]
    pub fn url_override(&self) -> Option<&str> {
        self.url_override.as_deref()
    }

    /// The URL the connection is opened against.
    ///
    /// In expert mode with a non-empty override the override string is
    /// used verbatim; otherwise the URL is composed from the structured
    /// fields.
    #[must_use]
    pub fn connection_url(&self) -> String {
        if self.expert_mode {
            if let Some(url) = self.url_override.as_deref().filter(|u| !u.trim().is_empty()) {
                return url.to_string();
            }
        }

        let mut url = format!(
            "{}://{}:{}/{}",
            self.engine.scheme(),
            self.host,
            self.port,
            self.database
        );
        let mut params = Vec::new();
        if self.use_tls {
            params.push("useSSL=true".to_string());
        }
        if self.allow_public_key_retrieval {
            params.push("allowPublicKeyRetrieval=true".to_string());
        }
        if let Some(tz) = self.server_timezone.as_deref() {
            params.push(format!("serverTimezone={tz}"));
        }
        if !params.is_empty() {
            url.push('?');
            url.push_str(&params.join("&"));
        }
        url
    }

    /// Returns true if `other` describes the same logical target: engine,
    /// host (case-insensitive), port, database, and user all equal. The
    /// password is excluded — the same target reached with a different
    /// transient credential is still the same connection.
    #[must_use]
    pub fn same_target(&self, other: &ConnectionProperties) -> bool {
        self.engine == other.engine
            && self.host.eq_ignore_ascii_case(&other.host)
            && self.port == other.port
            && self.database == other.database
            && self.user == other.user
    }

    /// Re-checks the builder invariants.
    pub fn validate(&self) -> SyncResult<()> {
        validate_parts(
            &self.host,
            self.port,
            &self.database,
            &self.user,
            self.use_tls,
            self.trust_store_path.as_deref(),
        )
    }

    /// Returns a copy of these properties pointing at a different
    /// database on the same server. Used by the side-by-side legacy
    /// migration to address the newly created database.
    #[must_use]
    pub fn with_database(&self, database: impl Into<String>) -> Self {
        let mut props = self.clone();
        props.database = database.into();
        props
    }
}

impl fmt::Debug for ConnectionProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionProperties")
            .field("engine", &self.engine)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("use_tls", &self.use_tls)
            .field("expert_mode", &self.expert_mode)
            .finish_non_exhaustive()
    }
}

fn validate_parts(
    host: &str,
    port: u16,
    database: &str,
    user: &str,
    use_tls: bool,
    trust_store_path: Option<&Path>,
) -> SyncResult<()> {
    if host.trim().is_empty() {
        return Err(SyncError::invalid_configuration("host must not be empty"));
    }
    if database.trim().is_empty() {
        return Err(SyncError::invalid_configuration(
            "database name must not be empty",
        ));
    }
    if user.trim().is_empty() {
        return Err(SyncError::invalid_configuration("user must not be empty"));
    }
    if port == 0 {
        return Err(SyncError::invalid_configuration(
            "port must be a positive integer",
        ));
    }
    if use_tls && trust_store_path.is_none() {
        return Err(SyncError::invalid_configuration(
            "TLS requested but no trust store supplied",
        ));
    }
    Ok(())
}

/// Builder for [`ConnectionProperties`].
///
/// Selecting an engine and leaving the port unset fills in the engine's
/// default port at [`build`](Self::build) time.
#[derive(Debug, Clone)]
pub struct ConnectionPropertiesBuilder {
    engine: EngineKind,
    host: String,
    port: Option<u16>,
    database: String,
    user: String,
    password: String,
    use_tls: bool,
    trust_store_path: Option<PathBuf>,
    trust_store_password: Option<String>,
    server_timezone: Option<String>,
    allow_public_key_retrieval: bool,
    expert_mode: bool,
    url_override: Option<String>,
}

impl ConnectionPropertiesBuilder {
    /// Creates a builder with MySQL defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            engine: EngineKind::MySql,
            host: String::new(),
            port: None,
            database: String::new(),
            user: String::new(),
            password: String::new(),
            use_tls: false,
            trust_store_path: None,
            trust_store_password: None,
            server_timezone: None,
            allow_public_key_retrieval: false,
            expert_mode: false,
            url_override: None,
        }
    }

    /// Sets the engine.
    #[must_use]
    pub fn engine(mut self, engine: EngineKind) -> Self {
        self.engine = engine;
        self
    }

    /// Sets the host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets the port explicitly, overriding the engine default.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the database name.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Sets the user.
    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Sets the password.
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    /// Requests TLS. A trust store path becomes mandatory.
    #[must_use]
    pub fn use_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    /// Sets the trust store path.
    #[must_use]
    pub fn trust_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.trust_store_path = Some(path.into());
        self
    }

    /// Sets the trust store password.
    #[must_use]
    pub fn trust_store_password(mut self, password: impl Into<String>) -> Self {
        self.trust_store_password = Some(password.into());
        self
    }

    /// Sets the server timezone.
    #[must_use]
    pub fn server_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.server_timezone = Some(timezone.into());
        self
    }

    /// Authorizes retrieval of the server's RSA public key.
    #[must_use]
    pub fn allow_public_key_retrieval(mut self, allow: bool) -> Self {
        self.allow_public_key_retrieval = allow;
        self
    }

    /// Enables expert mode, where a raw URL override bypasses the
    /// composed host/port/database URL.
    #[must_use]
    pub fn expert_mode(mut self, expert_mode: bool) -> Self {
        self.expert_mode = expert_mode;
        self
    }

    /// Sets the raw URL used verbatim in expert mode.
    #[must_use]
    pub fn url_override(mut self, url: impl Into<String>) -> Self {
        self.url_override = Some(url.into());
        self
    }

    /// Validates and builds the immutable properties.
    ///
    /// # Errors
    ///
    /// `InvalidConfiguration` if host, database, or user is empty, or if
    /// TLS is requested without a trust store. An unset port is filled
    /// with the engine default and never an error.
    pub fn build(self) -> SyncResult<ConnectionProperties> {
        let port = self.port.unwrap_or_else(|| self.engine.default_port());
        validate_parts(
            &self.host,
            port,
            &self.database,
            &self.user,
            self.use_tls,
            self.trust_store_path.as_deref(),
        )?;
        Ok(ConnectionProperties {
            engine: self.engine,
            host: self.host,
            port,
            database: self.database,
            user: self.user,
            password: self.password,
            use_tls: self.use_tls,
            trust_store_path: self.trust_store_path,
            trust_store_password: self.trust_store_password,
            server_timezone: self.server_timezone,
            allow_public_key_retrieval: self.allow_public_key_retrieval,
            expert_mode: self.expert_mode,
            url_override: self.url_override,
        })
    }
}

impl Default for ConnectionPropertiesBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> ConnectionPropertiesBuilder {
        ConnectionProperties::builder()
            .engine(EngineKind::Postgres)
            .host("db.example.org")
            .database("references")
            .user("alice")
            .password("secret")
    }

    #[test]
    fn unset_port_uses_engine_default() {
        let props = base().build().unwrap();
        assert_eq!(props.port(), 5432);

        let props = base().engine(EngineKind::MySql).build().unwrap();
        assert_eq!(props.port(), 3306);

        let props = base().engine(EngineKind::Oracle).build().unwrap();
        assert_eq!(props.port(), 1521);
    }

    #[test]
    fn explicit_port_wins() {
        let props = base().port(6000).build().unwrap();
        assert_eq!(props.port(), 6000);
    }

    #[test]
    fn empty_host_is_invalid() {
        let err = base().host("").build().unwrap_err();
        assert!(matches!(err, SyncError::InvalidConfiguration { .. }));
        let err = base().host("   ").build().unwrap_err();
        assert!(matches!(err, SyncError::InvalidConfiguration { .. }));
    }

    #[test]
    fn empty_database_or_user_is_invalid() {
        assert!(base().database("").build().is_err());
        assert!(base().user("").build().is_err());
    }

    #[test]
    fn zero_port_is_invalid() {
        assert!(base().port(0).build().is_err());
    }

    #[test]
    fn tls_requires_trust_store() {
        assert!(base().use_tls(true).build().is_err());
        assert!(base()
            .use_tls(true)
            .trust_store_path("/etc/ssl/store.p12")
            .build()
            .is_ok());
    }

    #[test]
    fn composed_url() {
        let props = base()
            .server_timezone("UTC")
            .allow_public_key_retrieval(true)
            .build()
            .unwrap();
        assert_eq!(
            props.connection_url(),
            "postgresql://db.example.org:5432/references?allowPublicKeyRetrieval=true&serverTimezone=UTC"
        );
    }

    #[test]
    fn expert_override_is_verbatim() {
        let props = base()
            .expert_mode(true)
            .url_override("jdbc:mysql://weird:3307/x?custom=1")
            .build()
            .unwrap();
        assert_eq!(props.connection_url(), "jdbc:mysql://weird:3307/x?custom=1");
    }

    #[test]
    fn expert_mode_with_blank_override_composes() {
        let props = base().expert_mode(true).url_override("  ").build().unwrap();
        assert!(props.connection_url().starts_with("postgresql://"));
    }

    #[test]
    fn same_target_ignores_password_and_tls() {
        let a = base().build().unwrap();
        let b = base()
            .password("other")
            .use_tls(true)
            .trust_store_path("/tmp/store")
            .build()
            .unwrap();
        assert!(a.same_target(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn same_target_host_is_case_insensitive() {
        let a = base().build().unwrap();
        let b = base().host("DB.Example.ORG").build().unwrap();
        assert!(a.same_target(&b));
    }

    #[test]
    fn different_user_is_a_different_target() {
        let a = base().build().unwrap();
        let b = base().user("bob").build().unwrap();
        assert!(!a.same_target(&b));
    }

    #[test]
    fn debug_redacts_password() {
        let props = base().build().unwrap();
        let debug = format!("{props:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
