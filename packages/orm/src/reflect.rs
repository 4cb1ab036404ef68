//! Column reflection, cached per model type for the life of the process

use std::{
    any::TypeId,
    collections::BTreeMap,
    sync::{Arc, LazyLock, RwLock},
};

use datum_database::{Adapter, Column};

use crate::{CREATED_AT, Model, OrmError, UPDATED_AT};

static SCHEMAS: LazyLock<RwLock<BTreeMap<TypeId, Arc<Schema>>>> =
    LazyLock::new(|| RwLock::new(BTreeMap::new()));

/// The reflected columns of a model's table and the field slot each one occupies
#[derive(Debug)]
pub struct Schema {
    columns: Vec<Column>,
    slots: BTreeMap<String, usize>,
}

impl Schema {
    #[must_use]
    pub fn new(columns: Vec<Column>) -> Self {
        let slots = columns
            .iter()
            .enumerate()
            .map(|(i, column)| (column.name.clone(), i))
            .collect();

        Self { columns, slots }
    }

    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    #[must_use]
    pub fn slot(&self, name: &str) -> Option<usize> {
        self.slots.get(name).copied()
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.slot(name).map(|i| &self.columns[i])
    }

    #[must_use]
    pub fn has_timestamp_columns(&self) -> bool {
        self.slots.contains_key(CREATED_AT) && self.slots.contains_key(UPDATED_AT)
    }
}

/// Returns the cached schema of `M`, reflecting it through `db` on first use.
///
/// Tables without columns are not cached, so a table created later is picked up.
///
/// # Errors
///
/// * If the table structure could not be read
///
/// # Panics
///
/// * If the `SCHEMAS` `RwLock` is poisoned
pub fn schema_for<M: Model>(db: &mut dyn Adapter) -> Result<Arc<Schema>, OrmError> {
    if let Some(schema) = SCHEMAS.read().unwrap().get(&TypeId::of::<M>()) {
        return Ok(schema.clone());
    }

    let table_name = M::table_name();
    let schema = Arc::new(Schema::new(db.columns_of(&table_name)?));

    log::debug!(
        "Reflected {} column{} for {} from '{table_name}'",
        schema.len(),
        if schema.len() == 1 { "" } else { "s" },
        M::NAME,
    );

    if !schema.is_empty() {
        SCHEMAS
            .write()
            .unwrap()
            .insert(TypeId::of::<M>(), schema.clone());
    }

    Ok(schema)
}

/// Forgets the reflected columns of `M`
///
/// # Panics
///
/// * If the `SCHEMAS` `RwLock` is poisoned
pub fn clear_column_cache<M: Model>() {
    log::debug!("Clearing column cache for {}", M::NAME);
    SCHEMAS.write().unwrap().remove(&TypeId::of::<M>());
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use datum_database::{ColumnType, sqlite::SqliteAdapter};
    use pretty_assertions::assert_eq;

    use super::*;

    struct Gadget;

    impl Model for Gadget {
        const NAME: &'static str = "Gadget";
    }

    struct Widget;

    impl Model for Widget {
        const NAME: &'static str = "Widget";
    }

    #[test_log::test]
    fn reflects_and_caches_columns() {
        let mut db = SqliteAdapter::open_in_memory().unwrap();
        db.execute_ddl(
            "CREATE TABLE gadgets (id INTEGER PRIMARY KEY, name TEXT, created_at DATETIME, updated_at DATETIME)",
        )
        .unwrap();

        let schema = schema_for::<Gadget>(&mut db).unwrap();
        assert_eq!(schema.len(), 4);
        assert_eq!(schema.slot("name"), Some(1));
        assert_eq!(schema.column("id").unwrap().column_type, ColumnType::Integer);
        assert!(schema.has_timestamp_columns());

        db.execute_ddl("ALTER TABLE gadgets ADD COLUMN extra TEXT")
            .unwrap();
        assert_eq!(schema_for::<Gadget>(&mut db).unwrap().len(), 4);

        clear_column_cache::<Gadget>();
        assert_eq!(schema_for::<Gadget>(&mut db).unwrap().len(), 5);
    }

    #[test_log::test]
    fn missing_tables_are_not_cached() {
        let mut db = SqliteAdapter::open_in_memory().unwrap();

        assert!(schema_for::<Widget>(&mut db).unwrap().is_empty());

        db.execute_ddl("CREATE TABLE widgets (id INTEGER PRIMARY KEY)")
            .unwrap();
        let schema = schema_for::<Widget>(&mut db).unwrap();
        assert_eq!(schema.len(), 1);
        assert!(!schema.has_timestamp_columns());
    }
}
