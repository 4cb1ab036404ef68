//! Messages carried by [`crate::OrmError::RecordNotFound`]

use datum_database::{
    DatabaseValue,
    query::{ConditionValue, Filter},
};

use crate::Model;

/// `Could not find User with id='1'`, or for several ids
/// `Could not find all User records with id=(1, 2) (obtained 1 results, but expected 2)`
#[must_use]
pub fn find_not_found<M: Model>(ids: &[DatabaseValue], obtained: usize) -> String {
    if let [id] = ids {
        format!("Could not find {} with {}='{id}'", M::NAME, M::PRIMARY_KEY)
    } else {
        format!(
            "Could not find all {} records with {}=({}) (obtained {obtained} results, but expected {})",
            M::NAME,
            M::PRIMARY_KEY,
            join(ids, ToString::to_string),
            ids.len(),
        )
    }
}

/// `Could not find User with 'email' = "a@example.org", 'active' = 't'`
#[must_use]
pub fn find_by_not_found<M: Model>(filter: &Filter) -> String {
    let criteria = match filter {
        Filter::Conditions(conditions) => conditions
            .iter()
            .map(|condition| match &condition.value {
                ConditionValue::Eq(value) => format!("'{}' = {}", condition.column, dump(value)),
                ConditionValue::In(values) => {
                    format!("'{}' IN ({})", condition.column, join(values, dump))
                }
            })
            .collect::<Vec<_>>()
            .join(", "),
        Filter::Sql { sql, args } if args.is_empty() => sql.clone(),
        Filter::Sql { sql, args } => format!("{sql} ({})", join(args, dump)),
    };

    format!("Could not find {} with {criteria}", M::NAME)
}

/// `Could not find User`
#[must_use]
pub fn generic_not_found<M: Model>() -> String {
    format!("Could not find {}", M::NAME)
}

/// Renders `filter`'s not-found message, or the generic one when there is no filter
#[must_use]
pub fn not_found<M: Model>(filter: Option<&Filter>) -> String {
    filter
        .filter(|x| !x.is_empty())
        .map_or_else(generic_not_found::<M>, find_by_not_found::<M>)
}

fn join(values: &[DatabaseValue], f: impl Fn(&DatabaseValue) -> String) -> String {
    values.iter().map(f).collect::<Vec<_>>().join(", ")
}

fn dump(value: &DatabaseValue) -> String {
    match value {
        DatabaseValue::Bool(true) => "'t'".to_string(),
        DatabaseValue::Bool(false) => "'f'".to_string(),
        DatabaseValue::Int64(x) => x.to_string(),
        DatabaseValue::Real64(x) => x.to_string(),
        DatabaseValue::String(x) => format!("{x:?}"),
        value => format!("{:?}", value.to_string()),
    }
}
