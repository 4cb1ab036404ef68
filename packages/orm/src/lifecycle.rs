//! Insert-or-update and delete for single records

use chrono::Utc;
use datum_database::{
    Adapter, DatabaseValue,
    adapter::ModelRef,
    query::insert,
};
use datum_database_connection::ConnectionScope;

use crate::{CREATED_AT, Model, OrmError, Record, UPDATED_AT};

impl<M: Model> Record<M> {
    /// Inserts the record if it is not persisted, otherwise writes its changed fields.
    ///
    /// Models with `created_at`/`updated_at` columns get them stamped. After an insert the
    /// generated primary key is assigned back. Either way the record is clean afterwards.
    ///
    /// # Errors
    ///
    /// * If no connection is configured for the model
    /// * If a value cannot be cast for its column
    /// * If the statement fails
    pub fn save(&mut self, scope: &mut ConnectionScope) -> Result<(), OrmError> {
        let db = scope.adapter_for(M::HIERARCHY)?;

        if self.is_persisted() {
            self.update_existing(db)
        } else {
            self.insert_new(db)
        }
    }

    fn update_existing(&mut self, db: &mut dyn Adapter) -> Result<(), OrmError> {
        if self.schema().has_timestamp_columns() {
            self.set(UPDATED_AT, Utc::now())?;
        }

        let changeset = self.changeset(db)?;

        if changeset.is_empty() {
            log::trace!("{} has no changes to save", M::NAME);
        } else {
            let id = self.id().cloned().ok_or_else(|| {
                OrmError::InvalidArgument(format!("Cannot update {} without a primary key", M::NAME))
            })?;
            let table_name = M::table_name();

            db.update_model(
                ModelRef {
                    model_name: M::NAME,
                    table_name: &table_name,
                    primary_key: M::PRIMARY_KEY,
                    id: &id,
                },
                changeset,
            )?;
        }

        self.reset_changed_fields();
        Ok(())
    }

    fn insert_new(&mut self, db: &mut dyn Adapter) -> Result<(), OrmError> {
        let timestamps = self.schema().has_timestamp_columns();

        if timestamps {
            let now = Utc::now();
            for field in [CREATED_AT, UPDATED_AT] {
                if self.get(field).is_some_and(DatabaseValue::is_null) {
                    self.set(field, now)?;
                }
            }
        }

        let changeset = self.changeset(db)?;

        let mut returning = changeset
            .iter()
            .map(|(name, _)| name.clone())
            .collect::<Vec<_>>();
        if timestamps {
            returning.extend([CREATED_AT.to_string(), UPDATED_AT.to_string()]);
        }
        returning.push(M::PRIMARY_KEY.to_string());
        let mut seen = std::collections::BTreeSet::new();
        returning.retain(|name| seen.insert(name.clone()));

        let row = insert(M::table_name())
            .values(changeset)
            .returning(returning)
            .named(format!("{} Insert", M::NAME))
            .execute(db)?;

        self.apply_row(&row, db)?;

        if self.id().is_none() {
            if let Some(id) = row.get(M::PRIMARY_KEY).or_else(|| row.id()) {
                self.set(M::PRIMARY_KEY, id)?;
            }
        }

        log::debug!("Inserted {} {:?}", M::NAME, self.id());

        self.reset_changed_fields();
        self.set_persisted(true);
        Ok(())
    }

    /// Assigns `values` and saves.
    ///
    /// # Errors
    ///
    /// * [`OrmError::UnknownField`] if a name is not a column. Nothing is written.
    /// * Whatever [`Record::save`] returns
    pub fn update<K: AsRef<str>, V: Into<DatabaseValue>>(
        &mut self,
        scope: &mut ConnectionScope,
        values: impl IntoIterator<Item = (K, V)>,
    ) -> Result<(), OrmError> {
        for (field, value) in values {
            self.set(field.as_ref(), value)?;
        }

        self.save(scope)
    }

    /// Deletes the row and detaches the record: it is no longer persisted, its primary key
    /// is null and it has no changed fields. Other fields keep their values.
    ///
    /// # Errors
    ///
    /// * [`OrmError::InvalidArgument`] if the record has no primary key
    /// * If no connection is configured for the model
    /// * If the statement fails
    pub fn delete(&mut self, scope: &mut ConnectionScope) -> Result<(), OrmError> {
        let id = self.id().cloned().ok_or_else(|| {
            OrmError::InvalidArgument(format!("Cannot delete {} without a primary key", M::NAME))
        })?;
        let table_name = M::table_name();

        scope.adapter_for(M::HIERARCHY)?.delete_model(ModelRef {
            model_name: M::NAME,
            table_name: &table_name,
            primary_key: M::PRIMARY_KEY,
            id: &id,
        })?;

        self.set_persisted(false);
        self.set(M::PRIMARY_KEY, DatabaseValue::Null)?;
        self.reset_changed_fields();

        Ok(())
    }
}
