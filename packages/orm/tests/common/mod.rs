#![allow(dead_code)]

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use datum_database::{
    Adapter, Column, DatabaseError, Dialect, Row,
    query::{CountQuery, DeleteStatement, InsertStatement, SelectQuery, UpdateStatement},
    sqlite::SqliteAdapter,
};
use datum_database_connection::{ConnectionScope, ROOT_HIERARCHY};
use datum_orm::{DatabaseValue, Model, Record};

pub struct User;

impl Model for User {
    const NAME: &'static str = "User";
}

pub struct Post;

impl Model for Post {
    const NAME: &'static str = "Post";
}

/// Lives under its own hierarchy, which falls back to the root connection
pub struct AuditEntry;

impl Model for AuditEntry {
    const NAME: &'static str = "AuditEntry";
    const HIERARCHY: &'static str = "Audit";
}

const SCHEMA: &str = "
    CREATE TABLE users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        email VARCHAR(255) NOT NULL,
        name TEXT,
        active BOOLEAN DEFAULT 0,
        created_at DATETIME,
        updated_at DATETIME
    );
    CREATE TABLE posts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT,
        user_id INTEGER
    );
    CREATE TABLE audit_entries (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        message TEXT
    );
";

/// A scope whose root connection is a fresh in-memory database
pub fn scope() -> ConnectionScope {
    let mut db = SqliteAdapter::open_in_memory().unwrap();
    db.execute_ddl(SCHEMA).unwrap();

    let mut scope = ConnectionScope::new();
    scope.insert(ROOT_HIERARCHY, Box::new(db));
    scope
}

/// Writes issued through a [`CountingAdapter`]
#[derive(Debug, Default, Clone)]
pub struct Writes {
    inserts: Arc<AtomicUsize>,
    updates: Arc<AtomicUsize>,
}

impl Writes {
    pub fn inserts(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }

    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }
}

/// Delegates to SQLite and counts the write statements it runs
#[derive(Debug)]
pub struct CountingAdapter {
    inner: SqliteAdapter,
    writes: Writes,
}

impl Adapter for CountingAdapter {
    fn dialect(&self) -> Dialect {
        self.inner.dialect()
    }

    fn select(&mut self, query: &SelectQuery) -> Result<Vec<Row>, DatabaseError> {
        self.inner.select(query)
    }

    fn count(&mut self, query: &CountQuery) -> Result<u64, DatabaseError> {
        self.inner.count(query)
    }

    fn insert(&mut self, statement: &InsertStatement) -> Result<Row, DatabaseError> {
        self.writes.inserts.fetch_add(1, Ordering::SeqCst);
        self.inner.insert(statement)
    }

    fn update(&mut self, statement: &UpdateStatement) -> Result<u64, DatabaseError> {
        self.writes.updates.fetch_add(1, Ordering::SeqCst);
        self.inner.update(statement)
    }

    fn delete(&mut self, statement: &DeleteStatement) -> Result<u64, DatabaseError> {
        self.inner.delete(statement)
    }

    fn columns_of(&mut self, table_name: &str) -> Result<Vec<Column>, DatabaseError> {
        self.inner.columns_of(table_name)
    }

    fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> Result<Vec<Row>, DatabaseError> {
        self.inner.execute(sql, params)
    }

    fn execute_ddl(&mut self, sql: &str) -> Result<(), DatabaseError> {
        self.inner.execute_ddl(sql)
    }

    fn tx_begin(&mut self) -> Result<(), DatabaseError> {
        self.inner.tx_begin()
    }

    fn tx_commit(&mut self) -> Result<(), DatabaseError> {
        self.inner.tx_commit()
    }

    fn tx_rollback(&mut self) -> Result<(), DatabaseError> {
        self.inner.tx_rollback()
    }

    fn in_transaction(&self) -> bool {
        self.inner.in_transaction()
    }

    fn disconnect(&mut self) -> Result<(), DatabaseError> {
        self.inner.disconnect()
    }
}

/// Like [`scope`], with every write counted
pub fn counting_scope() -> (ConnectionScope, Writes) {
    let mut inner = SqliteAdapter::open_in_memory().unwrap();
    inner.execute_ddl(SCHEMA).unwrap();
    let writes = Writes::default();

    let mut scope = ConnectionScope::new();
    scope.insert(
        ROOT_HIERARCHY,
        Box::new(CountingAdapter {
            inner,
            writes: writes.clone(),
        }),
    );
    (scope, writes)
}

pub fn create_user(
    scope: &mut ConnectionScope,
    email: &str,
    name: &str,
    active: bool,
) -> Record<User> {
    let mut user = Record::<User>::with_values(
        scope,
        [
            ("email", DatabaseValue::from(email)),
            ("name", DatabaseValue::from(name)),
            ("active", DatabaseValue::from(active)),
        ],
    )
    .unwrap();
    user.save(scope).unwrap();
    user
}

pub fn ids<M: Model>(records: &[Record<M>]) -> Vec<i64> {
    records
        .iter()
        .map(|x| x.get_as::<i64>("id").unwrap().unwrap())
        .collect()
}
