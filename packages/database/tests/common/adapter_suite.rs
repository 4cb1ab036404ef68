use chrono::{TimeZone as _, Utc};
use datum_database::{
    Adapter, DatabaseError, DatabaseValue,
    adapter::transaction,
    query::{Filter, SortDirection, count, delete, insert, select, update, where_eq, where_in},
};
use pretty_assertions::assert_eq;

/// Behavior every adapter must share. Implementors return `None` when their backend is not
/// reachable, in which case the test is skipped.
pub trait AdapterTestSuite {
    fn get_adapter(&self) -> Option<Box<dyn Adapter>>;

    /// DDL creating `{table}` with columns `id`, `name`, `score`, `active` and `created_at`
    fn create_table_sql(&self, table: &str) -> String;

    fn setup(&self, suffix: &str) -> Option<(Box<dyn Adapter>, String)> {
        let mut db = self.get_adapter()?;
        let table = format!("suite_{suffix}");

        db.execute_ddl(&format!("DROP TABLE IF EXISTS {table}"))
            .unwrap();
        db.execute_ddl(&self.create_table_sql(&table)).unwrap();

        Some((db, table))
    }

    fn teardown(&self, db: &mut dyn Adapter, table: &str) {
        db.execute_ddl(&format!("DROP TABLE IF EXISTS {table}"))
            .unwrap();
    }

    fn seed(&self, db: &mut dyn Adapter, table: &str, names: &[&str]) -> Vec<i64> {
        names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                insert(table)
                    .value("name", *name)
                    .value("score", i64::try_from(i).unwrap())
                    .returning(vec!["id".to_string()])
                    .execute(db)
                    .unwrap()
                    .id()
                    .and_then(|x| x.as_i64())
                    .unwrap()
            })
            .collect()
    }

    fn test_insert_returns_generated_id(&self) {
        let Some((mut db, table)) = self.setup("insert") else {
            return;
        };

        let ids = self.seed(db.as_mut(), &table, &["a", "b"]);
        assert_eq!(ids.len(), 2);
        assert!(ids[1] > ids[0]);

        let row = select(&table)
            .filter(where_eq("id", ids[1]))
            .execute_first(db.as_mut())
            .unwrap()
            .unwrap();
        assert_eq!(row.get("name"), Some(DatabaseValue::String("b".into())));

        self.teardown(db.as_mut(), &table);
    }

    fn test_insert_without_values(&self) {
        let Some((mut db, table)) = self.setup("insert_defaults") else {
            return;
        };

        db.execute_ddl(&format!("DROP TABLE IF EXISTS {table}"))
            .unwrap();
        db.execute_ddl(&self.create_table_sql(&table).replace(" NOT NULL", ""))
            .unwrap();

        let row = insert(&table)
            .returning(vec!["id".to_string()])
            .execute(db.as_mut())
            .unwrap();
        assert!(row.id().and_then(|x| x.as_i64()).is_some());

        self.teardown(db.as_mut(), &table);
    }

    fn test_select_filters_sorts_and_pages(&self) {
        let Some((mut db, table)) = self.setup("select") else {
            return;
        };

        self.seed(db.as_mut(), &table, &["a", "b", "c", "d"]);

        let names = |rows: Vec<datum_database::Row>| {
            rows.into_iter()
                .filter_map(|x| x.get("name"))
                .map(|x| x.to_string())
                .collect::<Vec<_>>()
        };

        let rows = select(&table)
            .sort("name", SortDirection::Desc)
            .limit(2)
            .offset(1)
            .execute(db.as_mut())
            .unwrap();
        assert_eq!(names(rows), vec!["c", "b"]);

        let rows = select(&table)
            .filter(where_in("name", ["a", "d"]))
            .sort("name", SortDirection::Asc)
            .execute(db.as_mut())
            .unwrap();
        assert_eq!(names(rows), vec!["a", "d"]);

        let placeholder = db.placeholder(1);
        let rows = select(&table)
            .filter(Filter::sql(
                format!("score >= {placeholder}"),
                vec![DatabaseValue::Int64(2)],
            ))
            .sort("score", SortDirection::Asc)
            .limit(1)
            .execute(db.as_mut())
            .unwrap();
        assert_eq!(names(rows), vec!["c"]);

        let rows = select(&table)
            .sort("name", SortDirection::Asc)
            .offset(3)
            .execute(db.as_mut())
            .unwrap();
        assert_eq!(names(rows), vec!["d"]);

        self.teardown(db.as_mut(), &table);
    }

    fn test_count(&self) {
        let Some((mut db, table)) = self.setup("count") else {
            return;
        };

        assert_eq!(count(&table).execute(db.as_mut()).unwrap(), 0);

        self.seed(db.as_mut(), &table, &["a", "b", "b"]);

        assert_eq!(count(&table).execute(db.as_mut()).unwrap(), 3);
        assert_eq!(
            count(&table)
                .filter(where_eq("name", "b"))
                .execute(db.as_mut())
                .unwrap(),
            2
        );

        self.teardown(db.as_mut(), &table);
    }

    fn test_update_and_delete_report_affected_rows(&self) {
        let Some((mut db, table)) = self.setup("update_delete") else {
            return;
        };

        self.seed(db.as_mut(), &table, &["a", "b", "b"]);

        let updated = update(&table)
            .value("score", 10)
            .filter(where_eq("name", "b"))
            .execute(db.as_mut())
            .unwrap();
        assert_eq!(updated, 2);

        let deleted = delete(&table)
            .filter(where_eq("score", 10))
            .execute(db.as_mut())
            .unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(count(&table).execute(db.as_mut()).unwrap(), 1);

        self.teardown(db.as_mut(), &table);
    }

    fn test_transaction_commit(&self) {
        let Some((mut db, table)) = self.setup("tx_commit") else {
            return;
        };

        transaction(db.as_mut(), |db| {
            insert(&table).value("name", "a").execute(db)?;
            insert(&table).value("name", "b").execute(db)?;
            Ok::<_, DatabaseError>(())
        })
        .unwrap();

        assert!(!db.in_transaction());
        assert_eq!(count(&table).execute(db.as_mut()).unwrap(), 2);

        self.teardown(db.as_mut(), &table);
    }

    fn test_transaction_rollback(&self) {
        let Some((mut db, table)) = self.setup("tx_rollback") else {
            return;
        };

        let result = transaction(db.as_mut(), |db| {
            insert(&table).value("name", "a").execute(db)?;
            Err::<(), _>(DatabaseError::InvalidStatement("abort".into()))
        });

        assert!(matches!(result, Err(DatabaseError::InvalidStatement(_))));
        assert!(!db.in_transaction());
        assert_eq!(count(&table).execute(db.as_mut()).unwrap(), 0);

        self.teardown(db.as_mut(), &table);
    }

    fn test_nested_transaction_rejected(&self) {
        let Some((mut db, table)) = self.setup("tx_nested") else {
            return;
        };

        let result = transaction(db.as_mut(), |db| {
            transaction(db, |_| Ok::<_, DatabaseError>(()))
        });

        assert!(matches!(result, Err(DatabaseError::AlreadyInTransaction)));
        assert!(!db.in_transaction());

        self.teardown(db.as_mut(), &table);
    }

    fn test_columns_of(&self) {
        let Some((mut db, table)) = self.setup("columns") else {
            return;
        };

        let columns = db.columns_of(&table).unwrap();
        let names = columns.iter().map(|x| x.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["id", "name", "score", "active", "created_at"]);

        let name = &columns[1];
        assert_eq!(name.column_type, datum_database::ColumnType::String);
        assert_eq!(name.limit, Some(255));

        let active = &columns[3];
        assert_eq!(active.column_type, datum_database::ColumnType::Boolean);
        assert!(active.default.is_some());

        assert_eq!(
            columns[4].column_type,
            datum_database::ColumnType::DateTime
        );

        self.teardown(db.as_mut(), &table);
    }

    fn test_timestamps_round_trip(&self) {
        let Some((mut db, table)) = self.setup("timestamps") else {
            return;
        };

        let columns = db.columns_of(&table).unwrap();
        let column = columns.iter().find(|x| x.name == "created_at").unwrap();
        let active_column = columns.iter().find(|x| x.name == "active").unwrap();

        let created_at = Utc.with_ymd_and_hms(2008, 10, 27, 18, 43, 0).unwrap();
        let stored = db
            .cast_to_storage(&DatabaseValue::DateTime(created_at), column)
            .unwrap();
        let active = db
            .cast_to_storage(&DatabaseValue::Bool(true), active_column)
            .unwrap();

        let id = insert(&table)
            .value("name", "a")
            .value("created_at", stored)
            .value("active", active)
            .returning(vec!["id".to_string()])
            .execute(db.as_mut())
            .unwrap()
            .id()
            .unwrap();

        let row = select(&table)
            .filter(where_eq("id", id))
            .execute_first(db.as_mut())
            .unwrap()
            .unwrap();

        assert_eq!(
            db.cast_to_model(&row.get("created_at").unwrap(), column)
                .unwrap(),
            DatabaseValue::DateTime(created_at)
        );
        assert_eq!(
            db.cast_to_model(&row.get("active").unwrap(), active_column)
                .unwrap(),
            DatabaseValue::Bool(true)
        );

        self.teardown(db.as_mut(), &table);
    }

    fn test_migration_ledger(&self) {
        let Some(mut db) = self.get_adapter() else {
            return;
        };
        let id = "20081027184300_suite_ledger";

        db.prepare_migration_log().unwrap();
        db.prepare_migration_log().unwrap();
        db.unregister_migration(id).unwrap();

        db.register_migration(id).unwrap();
        assert!(db.load_migration_log().unwrap().iter().any(|x| x == id));

        db.unregister_migration(id).unwrap();
        assert!(!db.load_migration_log().unwrap().iter().any(|x| x == id));
    }
}
