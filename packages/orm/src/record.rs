//! Model instances and their dirty tracking

use std::{marker::PhantomData, sync::Arc};

use datum_database::{Adapter, DatabaseValue, Row, TryFromError};
use datum_database_connection::ConnectionScope;

use crate::{
    Model, OrmError,
    reflect::{Schema, schema_for},
};

/// One row of `M`'s table.
///
/// Field values live in slots laid out by the model's [`Schema`]. Every slot also keeps the
/// value it held after the last load or save, and assignments that change a value mark the
/// field dirty until the next save.
pub struct Record<M: Model> {
    schema: Arc<Schema>,
    values: Vec<DatabaseValue>,
    baseline: Vec<DatabaseValue>,
    dirty: Vec<usize>,
    persisted: bool,
    model: PhantomData<fn() -> M>,
}

impl<M: Model> Record<M> {
    /// An empty, unsaved record
    ///
    /// # Errors
    ///
    /// * If no connection is configured for the model
    /// * If the table structure could not be read
    pub fn new(scope: &mut ConnectionScope) -> Result<Self, OrmError> {
        let db = scope.adapter_for(M::HIERARCHY)?;
        Ok(Self::from_schema(schema_for::<M>(db)?))
    }

    /// An unsaved record with the given fields assigned. Names that are not columns are
    /// ignored.
    ///
    /// # Errors
    ///
    /// * If no connection is configured for the model
    /// * If the table structure could not be read
    pub fn with_values<K: AsRef<str>, V: Into<DatabaseValue>>(
        scope: &mut ConnectionScope,
        values: impl IntoIterator<Item = (K, V)>,
    ) -> Result<Self, OrmError> {
        let mut record = Self::new(scope)?;

        for (field, value) in values {
            let field = field.as_ref();
            match record.schema.slot(field) {
                Some(slot) => record.assign(slot, value.into()),
                None => log::trace!("Ignoring unknown field '{field}' for {}", M::NAME),
            }
        }

        Ok(record)
    }

    pub(crate) fn from_schema(schema: Arc<Schema>) -> Self {
        let values = vec![DatabaseValue::Null; schema.len()];

        Self {
            baseline: values.clone(),
            values,
            schema,
            dirty: vec![],
            persisted: false,
            model: PhantomData,
        }
    }

    /// Builds a persisted record from a fetched row, casting each value for its column
    pub(crate) fn load(
        schema: Arc<Schema>,
        row: &Row,
        db: &dyn Adapter,
    ) -> Result<Self, OrmError> {
        let mut record = Self::from_schema(schema);
        record.apply_row(row, db)?;
        record.reset_changed_fields();
        record.persisted = true;
        Ok(record)
    }

    /// Assigns every column present in `row`. Names that are not columns are skipped.
    pub(crate) fn apply_row(&mut self, row: &Row, db: &dyn Adapter) -> Result<(), OrmError> {
        for (name, value) in &row.columns {
            let Some(slot) = self.schema.slot(name) else {
                continue;
            };
            let value = db.cast_to_model(value, &self.schema.columns()[slot])?;
            self.assign(slot, value);
        }

        Ok(())
    }

    /// Dirty fields cast to their storage representation, in assignment order
    pub(crate) fn changeset(
        &self,
        db: &dyn Adapter,
    ) -> Result<Vec<(String, DatabaseValue)>, OrmError> {
        self.dirty
            .iter()
            .map(|&slot| {
                let column = &self.schema.columns()[slot];
                Ok((
                    column.name.clone(),
                    db.cast_to_storage(&self.values[slot], column)?,
                ))
            })
            .collect()
    }

    pub(crate) const fn set_persisted(&mut self, persisted: bool) {
        self.persisted = persisted;
    }

    fn assign(&mut self, slot: usize, value: DatabaseValue) {
        if self.values[slot] == value {
            return;
        }

        self.values[slot] = value;
        if !self.dirty.contains(&slot) {
            self.dirty.push(slot);
        }
    }

    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Current value of `field`, `None` if it is not a column
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&DatabaseValue> {
        self.schema.slot(field).map(|slot| &self.values[slot])
    }

    /// Current value of `field` converted to `T`, `None` when it is null
    ///
    /// # Errors
    ///
    /// * [`OrmError::UnknownField`] if `field` is not a column
    /// * If the value cannot be represented as `T`
    pub fn get_as<T: TryFrom<DatabaseValue, Error = TryFromError>>(
        &self,
        field: &str,
    ) -> Result<Option<T>, OrmError> {
        let value = self.get(field).ok_or_else(|| unknown_field::<M>(field))?;

        if value.is_null() {
            return Ok(None);
        }

        Ok(Some(T::try_from(value.clone())?))
    }

    /// Assigns `field`. Assigning the value the field already holds leaves it clean.
    ///
    /// # Errors
    ///
    /// * [`OrmError::UnknownField`] if `field` is not a column
    pub fn set(&mut self, field: &str, value: impl Into<DatabaseValue>) -> Result<(), OrmError> {
        let slot = self
            .schema
            .slot(field)
            .ok_or_else(|| unknown_field::<M>(field))?;

        self.assign(slot, value.into());
        Ok(())
    }

    /// Names of the fields assigned since the last load or save, in assignment order
    #[must_use]
    pub fn changed_fields(&self) -> Vec<&str> {
        self.dirty
            .iter()
            .map(|&slot| self.schema.columns()[slot].name.as_str())
            .collect()
    }

    #[must_use]
    pub fn is_changed(&self, field: &str) -> bool {
        self.schema
            .slot(field)
            .is_some_and(|slot| self.dirty.contains(&slot))
    }

    /// Value `field` held after the last load or save
    #[must_use]
    pub fn was(&self, field: &str) -> Option<&DatabaseValue> {
        self.schema.slot(field).map(|slot| &self.baseline[slot])
    }

    /// Accepts the current values as the clean baseline
    pub fn reset_changed_fields(&mut self) {
        self.dirty.clear();
        self.baseline.clone_from(&self.values);
    }

    /// Whether the record was loaded or saved, or already carries a primary key
    #[must_use]
    pub fn is_persisted(&self) -> bool {
        self.persisted || self.id().is_some()
    }

    /// The primary key, `None` while it is null
    #[must_use]
    pub fn id(&self) -> Option<&DatabaseValue> {
        self.get(M::PRIMARY_KEY).filter(|x| !x.is_null())
    }

    /// Column names paired with their current values, in column order
    pub fn values(&self) -> impl Iterator<Item = (&str, &DatabaseValue)> {
        self.schema
            .columns()
            .iter()
            .zip(&self.values)
            .map(|(column, value)| (column.name.as_str(), value))
    }
}

pub(crate) fn unknown_field<M: Model>(field: &str) -> OrmError {
    OrmError::UnknownField {
        model: M::NAME,
        field: field.to_string(),
    }
}

impl<M: Model> Clone for Record<M> {
    fn clone(&self) -> Self {
        Self {
            schema: self.schema.clone(),
            values: self.values.clone(),
            baseline: self.baseline.clone(),
            dirty: self.dirty.clone(),
            persisted: self.persisted,
            model: PhantomData,
        }
    }
}

impl<M: Model> std::fmt::Debug for Record<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(M::NAME)
            .field("values", &self.values().collect::<Vec<_>>())
            .field("changed_fields", &self.changed_fields())
            .field("persisted", &self.persisted)
            .finish()
    }
}

/// `#<User id: 1, email: "a@example.org", active: true>`
impl<M: Model> std::fmt::Display for Record<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#<{}", M::NAME)?;

        for (i, (name, value)) in self.values().enumerate() {
            f.write_str(if i == 0 { " " } else { ", " })?;
            match value {
                DatabaseValue::String(x) => write!(f, "{name}: {x:?}")?,
                DatabaseValue::DateTime(_) | DatabaseValue::Date(_) | DatabaseValue::Time(_) => {
                    write!(f, "{name}: \"{value}\"")?;
                }
                _ => write!(f, "{name}: {value}")?,
            }
        }

        f.write_str(">")
    }
}

/// A record used as a condition value stands for its primary key
impl<M: Model> From<&Record<M>> for DatabaseValue {
    fn from(record: &Record<M>) -> Self {
        record.id().cloned().unwrap_or(Self::Null)
    }
}
