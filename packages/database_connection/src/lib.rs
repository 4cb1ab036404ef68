#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Resolves connection configurations to live adapters.
//!
//! Configurations are registered process-wide per model hierarchy with
//! [`establish_connection`]. Live adapters are never shared: each [`ConnectionScope`] opens
//! and caches its own adapter per hierarchy, falling back to the [`ROOT_HIERARCHY`]
//! configuration when a hierarchy has none of its own.

use std::{
    collections::BTreeMap,
    sync::{LazyLock, RwLock},
};

use datum_database::{Adapter, DatabaseError, Dsn, DsnError};
use thiserror::Error;

/// Hierarchy every model belongs to unless it declares its own
pub const ROOT_HIERARCHY: &str = "Record";

pub type AdapterFactory = fn(&Dsn) -> Result<Box<dyn Adapter>, InitDbError>;

static ADAPTERS: LazyLock<BTreeMap<&'static str, AdapterFactory>> = LazyLock::new(|| {
    #[allow(unused_mut)]
    let mut adapters = BTreeMap::<&'static str, AdapterFactory>::new();

    #[cfg(feature = "sqlite")]
    adapters.insert("sqlite", |dsn| Ok(init_sqlite(dsn)?));
    #[cfg(feature = "postgres")]
    {
        adapters.insert("postgres", |dsn| Ok(init_postgres(dsn)?));
        adapters.insert("postgresql", |dsn| Ok(init_postgres(dsn)?));
    }
    #[cfg(feature = "mysql")]
    adapters.insert("mysql", |dsn| Ok(init_mysql(dsn)?));

    log::trace!("Registered adapters: {:?}", adapters.keys());

    adapters
});

static CONFIGS: LazyLock<RwLock<BTreeMap<String, Dsn>>> =
    LazyLock::new(|| RwLock::new(BTreeMap::new()));

#[derive(Debug, Error)]
pub enum InitDbError {
    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    InitSqlite(#[from] InitSqliteError),
    #[cfg(feature = "postgres")]
    #[error(transparent)]
    InitPostgres(#[from] InitPostgresError),
    #[cfg(feature = "mysql")]
    #[error(transparent)]
    InitMysql(#[from] InitMysqlError),
    #[error(
        "Adapter '{0}' is unavailable. This usually indicates that the crate was built \
         without the matching feature, or the application is misconfigured. Check the \
         enabled features and the DSN."
    )]
    UnavailableAdapter(String),
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("No connection established for hierarchy '{0}'")]
    ConnectionNotEstablished(String),
    #[error("Invalid model hierarchy '{0}'")]
    InvalidHierarchy(String),
    #[error(transparent)]
    Init(#[from] InitDbError),
    #[error(transparent)]
    Dsn(#[from] DsnError),
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

#[cfg(feature = "sqlite")]
#[derive(Debug, Error)]
pub enum InitSqliteError {
    #[error(transparent)]
    Sqlite(#[from] datum_database::sqlite::SqliteDatabaseError),
}

/// # Errors
///
/// * If the database file could not be opened
#[cfg(feature = "sqlite")]
pub fn init_sqlite(dsn: &Dsn) -> Result<Box<dyn Adapter>, InitSqliteError> {
    Ok(Box::new(datum_database::sqlite::SqliteAdapter::open(dsn)?))
}

#[cfg(feature = "postgres")]
#[derive(Debug, Error)]
pub enum InitPostgresError {
    #[error(transparent)]
    Postgres(#[from] datum_database::postgres::PostgresDatabaseError),
}

/// # Errors
///
/// * If the server could not be reached or rejected the credentials
#[cfg(feature = "postgres")]
pub fn init_postgres(dsn: &Dsn) -> Result<Box<dyn Adapter>, InitPostgresError> {
    Ok(Box::new(datum_database::postgres::PostgresAdapter::connect(
        dsn,
    )?))
}

#[cfg(feature = "mysql")]
#[derive(Debug, Error)]
pub enum InitMysqlError {
    #[error(transparent)]
    Mysql(#[from] datum_database::mysql::MysqlDatabaseError),
}

/// # Errors
///
/// * If the server could not be reached or rejected the credentials
#[cfg(feature = "mysql")]
pub fn init_mysql(dsn: &Dsn) -> Result<Box<dyn Adapter>, InitMysqlError> {
    Ok(Box::new(datum_database::mysql::MysqlAdapter::connect(dsn)?))
}

/// Names of the adapters compiled into this build
#[must_use]
pub fn available_adapters() -> Vec<&'static str> {
    ADAPTERS.keys().copied().collect()
}

/// Opens a new adapter for `dsn`, picked by its scheme.
///
/// # Errors
///
/// * [`InitDbError::UnavailableAdapter`] if no adapter is registered for the scheme
/// * If the adapter fails to connect
pub fn connect(dsn: &Dsn) -> Result<Box<dyn Adapter>, InitDbError> {
    let factory = ADAPTERS
        .get(dsn.scheme.as_str())
        .ok_or_else(|| InitDbError::UnavailableAdapter(dsn.scheme.clone()))?;

    factory(dsn)
}

fn validate_hierarchy(hierarchy: &str) -> Result<(), ConnectionError> {
    if hierarchy.trim().is_empty() {
        return Err(ConnectionError::InvalidHierarchy(hierarchy.to_string()));
    }
    Ok(())
}

/// Registers the configuration models of `hierarchy` connect with.
///
/// # Errors
///
/// * If `dsn` is not a valid connection URL
/// * If `hierarchy` is blank
///
/// # Panics
///
/// * If the `CONFIGS` `RwLock` is poisoned
pub fn establish_connection(hierarchy: &str, dsn: &str) -> Result<(), ConnectionError> {
    establish_connection_with(hierarchy, Dsn::parse(dsn)?)
}

/// # Errors
///
/// * If `hierarchy` is blank
///
/// # Panics
///
/// * If the `CONFIGS` `RwLock` is poisoned
pub fn establish_connection_with(hierarchy: &str, dsn: Dsn) -> Result<(), ConnectionError> {
    validate_hierarchy(hierarchy)?;

    log::debug!("Establishing connection for '{hierarchy}' to {dsn}");
    CONFIGS.write().unwrap().insert(hierarchy.to_string(), dsn);

    Ok(())
}

/// Registers a configuration read from `DATABASE_URL` or the `DB_*` variables.
///
/// # Errors
///
/// * If the environment holds no usable configuration
/// * If `hierarchy` is blank
///
/// # Panics
///
/// * If the `CONFIGS` `RwLock` is poisoned
pub fn establish_connection_from_env(hierarchy: &str) -> Result<(), ConnectionError> {
    establish_connection_with(hierarchy, Dsn::from_env()?)
}

/// # Panics
///
/// * If the `CONFIGS` `RwLock` is poisoned
#[must_use]
pub fn is_connection_established(hierarchy: &str) -> bool {
    CONFIGS.read().unwrap().contains_key(hierarchy)
}

/// Configuration registered for exactly `hierarchy`, without falling back to the root
///
/// # Panics
///
/// * If the `CONFIGS` `RwLock` is poisoned
#[must_use]
pub fn configuration(hierarchy: &str) -> Option<Dsn> {
    CONFIGS.read().unwrap().get(hierarchy).cloned()
}

/// # Panics
///
/// * If the `CONFIGS` `RwLock` is poisoned
pub fn remove_connection(hierarchy: &str) -> Option<Dsn> {
    CONFIGS.write().unwrap().remove(hierarchy)
}

/// Forgets every registered configuration and disconnects the adapters `scope` holds.
///
/// # Errors
///
/// * If an adapter fails to disconnect. The remaining adapters are still dropped.
///
/// # Panics
///
/// * If the `CONFIGS` `RwLock` is poisoned
pub fn disconnect_all(scope: &mut ConnectionScope) -> Result<(), ConnectionError> {
    CONFIGS.write().unwrap().clear();
    scope.disconnect()
}

/// The live adapters of one execution context, keyed by model hierarchy.
///
/// Nothing here is shared: two scopes always hold two distinct connections.
#[derive(Debug, Default)]
pub struct ConnectionScope {
    connections: BTreeMap<String, Box<dyn Adapter>>,
}

impl ConnectionScope {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the adapter for `hierarchy`, connecting on first use.
    ///
    /// A hierarchy without its own configuration shares the root hierarchy's adapter.
    ///
    /// # Errors
    ///
    /// * [`ConnectionError::ConnectionNotEstablished`] if neither `hierarchy` nor the root
    ///   hierarchy has a configuration
    /// * [`ConnectionError::InvalidHierarchy`] if `hierarchy` is blank
    /// * If the adapter fails to connect
    ///
    /// # Panics
    ///
    /// * If the `CONFIGS` `RwLock` is poisoned
    pub fn adapter_for(&mut self, hierarchy: &str) -> Result<&mut dyn Adapter, ConnectionError> {
        validate_hierarchy(hierarchy)?;

        let key = self.resolve(hierarchy)?;

        match self.connections.get_mut(&key) {
            Some(adapter) => Ok(adapter.as_mut()),
            None => Err(ConnectionError::ConnectionNotEstablished(
                hierarchy.to_string(),
            )),
        }
    }

    fn resolve(&mut self, hierarchy: &str) -> Result<String, ConnectionError> {
        if self.connections.contains_key(hierarchy) {
            return Ok(hierarchy.to_string());
        }

        match configuration(hierarchy) {
            Some(dsn) => {
                log::debug!("Connecting '{hierarchy}' to {dsn}");
                let adapter = connect(&dsn)?;
                self.connections.insert(hierarchy.to_string(), adapter);
                Ok(hierarchy.to_string())
            }
            None if hierarchy == ROOT_HIERARCHY => Err(
                ConnectionError::ConnectionNotEstablished(hierarchy.to_string()),
            ),
            None => self.resolve(ROOT_HIERARCHY),
        }
    }

    /// Uses `adapter` for `hierarchy` instead of connecting from its configuration
    pub fn insert(&mut self, hierarchy: impl Into<String>, adapter: Box<dyn Adapter>) {
        let hierarchy = hierarchy.into();
        log::debug!("Attaching {} adapter to '{hierarchy}'", adapter.dialect());

        if let Some(mut previous) = self.connections.insert(hierarchy, adapter) {
            if let Err(e) = previous.disconnect() {
                log::error!("Failed to disconnect replaced adapter: {e:?}");
            }
        }
    }

    #[must_use]
    pub fn is_connected(&self, hierarchy: &str) -> bool {
        self.connections.contains_key(hierarchy)
    }

    /// Disconnects every adapter in the scope.
    ///
    /// # Errors
    ///
    /// * The first disconnect failure. The remaining adapters are still dropped.
    pub fn disconnect(&mut self) -> Result<(), ConnectionError> {
        let mut result = Ok(());

        for (hierarchy, mut adapter) in std::mem::take(&mut self.connections) {
            log::debug!("Disconnecting '{hierarchy}'");
            if let Err(e) = adapter.disconnect() {
                log::error!("Failed to disconnect '{hierarchy}': {e:?}");
                if result.is_ok() {
                    result = Err(e.into());
                }
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serial_test::serial;

    use super::*;

    #[test_log::test]
    fn unknown_scheme_is_unavailable() {
        let dsn = Dsn::parse("oracle://localhost/db").unwrap();

        assert!(matches!(
            connect(&dsn),
            Err(InitDbError::UnavailableAdapter(x)) if x == "oracle"
        ));
    }

    #[cfg(feature = "sqlite")]
    #[test_log::test]
    fn sqlite_is_registered() {
        assert!(available_adapters().contains(&"sqlite"));
    }

    #[test_log::test]
    fn blank_hierarchy_is_invalid() {
        assert!(matches!(
            establish_connection(" ", "sqlite://memory"),
            Err(ConnectionError::InvalidHierarchy(_))
        ));
        assert!(matches!(
            ConnectionScope::new().adapter_for(""),
            Err(ConnectionError::InvalidHierarchy(_))
        ));
    }

    #[test_log::test]
    #[serial]
    fn missing_configuration_is_not_established() {
        let mut scope = ConnectionScope::new();
        disconnect_all(&mut scope).unwrap();

        assert!(!is_connection_established(ROOT_HIERARCHY));
        assert!(matches!(
            scope.adapter_for("Analytics"),
            Err(ConnectionError::ConnectionNotEstablished(x)) if x == ROOT_HIERARCHY
        ));
    }

    #[cfg(feature = "sqlite")]
    #[test_log::test]
    #[serial]
    fn hierarchies_fall_back_to_root() {
        let mut scope = ConnectionScope::new();
        disconnect_all(&mut scope).unwrap();

        establish_connection(ROOT_HIERARCHY, "sqlite://memory").unwrap();
        assert!(is_connection_established(ROOT_HIERARCHY));

        scope
            .adapter_for("Users")
            .unwrap()
            .execute_ddl("CREATE TABLE shared (id INTEGER)")
            .unwrap();

        assert!(scope.is_connected(ROOT_HIERARCHY));
        assert!(!scope.is_connected("Users"));

        let columns = scope
            .adapter_for(ROOT_HIERARCHY)
            .unwrap()
            .columns_of("shared")
            .unwrap();
        assert_eq!(columns.len(), 1);

        disconnect_all(&mut scope).unwrap();
        assert!(!scope.is_connected(ROOT_HIERARCHY));
        assert!(!is_connection_established(ROOT_HIERARCHY));
    }

    #[cfg(feature = "sqlite")]
    #[test_log::test]
    #[serial]
    fn hierarchies_with_configuration_get_their_own_adapter() {
        let dir = tempfile::tempdir().unwrap();
        let mut scope = ConnectionScope::new();
        disconnect_all(&mut scope).unwrap();

        establish_connection(ROOT_HIERARCHY, "sqlite://memory").unwrap();
        establish_connection(
            "Archive",
            &format!("sqlite://{}", dir.path().join("archive.db").display()),
        )
        .unwrap();

        scope
            .adapter_for("Archive")
            .unwrap()
            .execute_ddl("CREATE TABLE archived (id INTEGER)")
            .unwrap();

        assert!(scope.is_connected("Archive"));
        assert!(
            scope
                .adapter_for(ROOT_HIERARCHY)
                .unwrap()
                .columns_of("archived")
                .unwrap()
                .is_empty()
        );

        disconnect_all(&mut scope).unwrap();
    }

    #[cfg(feature = "sqlite")]
    #[test_log::test]
    #[serial]
    fn scopes_never_share_connections() {
        let mut scope = ConnectionScope::new();
        disconnect_all(&mut scope).unwrap();
        establish_connection(ROOT_HIERARCHY, "sqlite://memory").unwrap();

        let mut other = ConnectionScope::new();

        scope
            .adapter_for(ROOT_HIERARCHY)
            .unwrap()
            .execute_ddl("CREATE TABLE mine (id INTEGER)")
            .unwrap();

        assert!(
            other
                .adapter_for(ROOT_HIERARCHY)
                .unwrap()
                .columns_of("mine")
                .unwrap()
                .is_empty()
        );

        other.disconnect().unwrap();
        disconnect_all(&mut scope).unwrap();
    }

    #[cfg(feature = "sqlite")]
    #[test_log::test]
    fn inserted_adapters_take_precedence() {
        let mut scope = ConnectionScope::new();
        scope.insert(
            "Inserted",
            Box::new(datum_database::sqlite::SqliteAdapter::open_in_memory().unwrap()),
        );

        assert_eq!(
            scope.adapter_for("Inserted").unwrap().dialect(),
            datum_database::Dialect::Sqlite
        );
    }
}
