mod common;

use chrono::{DateTime, Utc};
use common::{AuditEntry, Post, User, counting_scope, create_user, scope};
use datum_database::DatabaseError;
use datum_orm::{DatabaseValue, Model as _, OrmError, Queries as _, Record};
use pretty_assertions::assert_eq;

#[test_log::test]
fn first_insert_gets_primary_key_one_and_reloads_clean() {
    let mut scope = scope();

    let mut user = Record::<User>::new(&mut scope).unwrap();
    user.set("email", "a@example.org").unwrap();
    user.set("name", "A").unwrap();
    assert!(!user.is_persisted());

    user.save(&mut scope).unwrap();

    assert!(user.is_persisted());
    assert_eq!(user.id(), Some(&DatabaseValue::Int64(1)));
    assert!(user.changed_fields().is_empty());

    let found = User::find(&mut scope, 1).unwrap().unwrap();
    assert_eq!(
        found.get_as::<String>("email").unwrap().as_deref(),
        Some("a@example.org")
    );
    assert_eq!(found.get_as::<String>("name").unwrap().as_deref(), Some("A"));
    assert_eq!(found.get_as::<bool>("active").unwrap(), Some(false));
    assert!(found.changed_fields().is_empty());
}

#[test_log::test]
fn insert_stamps_timestamps() {
    let mut scope = scope();
    let before = Utc::now() - chrono::Duration::seconds(1);

    let user = create_user(&mut scope, "a@example.org", "A", true);

    let created_at = user.get_as::<DateTime<Utc>>("created_at").unwrap().unwrap();
    let updated_at = user.get_as::<DateTime<Utc>>("updated_at").unwrap().unwrap();
    assert!(created_at >= before);
    assert_eq!(created_at, updated_at);

    let found = User::find(&mut scope, 1).unwrap().unwrap();
    assert!(
        found
            .get_as::<DateTime<Utc>>("created_at")
            .unwrap()
            .is_some()
    );
}

#[test_log::test]
fn models_without_timestamp_columns_are_not_stamped() {
    let mut scope = scope();

    assert!(User::has_timestamp_columns(&mut scope).unwrap());
    assert!(!Post::has_timestamp_columns(&mut scope).unwrap());

    let mut post = Record::<Post>::with_values(&mut scope, [("title", "Hello")]).unwrap();
    post.save(&mut scope).unwrap();

    assert_eq!(post.changed_fields(), Vec::<&str>::new());
    assert_eq!(Post::count(&mut scope).unwrap(), 1);
}

#[test_log::test]
fn unchanged_second_save_takes_the_update_path() {
    let (mut scope, writes) = counting_scope();

    let mut post = Record::<Post>::with_values(&mut scope, [("title", "Hello")]).unwrap();
    post.save(&mut scope).unwrap();
    assert_eq!(writes.inserts(), 1);

    post.save(&mut scope).unwrap();

    assert!(post.is_persisted());
    assert!(post.changed_fields().is_empty());
    assert_eq!(writes.inserts(), 1);
    assert_eq!(writes.updates(), 0);
    assert_eq!(Post::count(&mut scope).unwrap(), 1);
}

#[test_log::test]
fn unchanged_second_save_only_touches_updated_at() {
    let (mut scope, writes) = counting_scope();
    let mut user = create_user(&mut scope, "a@example.org", "A", true);
    assert_eq!(writes.inserts(), 1);

    user.save(&mut scope).unwrap();

    assert!(user.is_persisted());
    assert!(user.changed_fields().is_empty());
    assert_eq!(writes.inserts(), 1);
    assert_eq!(writes.updates(), 1);
    assert_eq!(User::count(&mut scope).unwrap(), 1);
}

#[test_log::test]
fn second_save_updates_only_changed_fields() {
    let mut scope = scope();
    let mut user = create_user(&mut scope, "a@example.org", "A", false);

    user.set("name", "B").unwrap();
    assert_eq!(user.changed_fields(), vec!["name"]);
    user.save(&mut scope).unwrap();

    assert!(user.changed_fields().is_empty());
    assert_eq!(User::count(&mut scope).unwrap(), 1);

    let found = User::find(&mut scope, 1).unwrap().unwrap();
    assert_eq!(found.get_as::<String>("name").unwrap().as_deref(), Some("B"));
    assert_eq!(
        found.get_as::<String>("email").unwrap().as_deref(),
        Some("a@example.org")
    );
}

#[test_log::test]
fn assigning_loaded_values_leaves_the_record_clean() {
    let mut scope = scope();
    create_user(&mut scope, "a@example.org", "A", true);

    let mut found = User::find(&mut scope, 1).unwrap().unwrap();
    found.set("name", "A").unwrap();
    found.set("active", true).unwrap();

    assert!(found.changed_fields().is_empty());

    found.set("name", "Z").unwrap();
    assert_eq!(found.changed_fields(), vec!["name"]);
    assert_eq!(found.was("name"), Some(&DatabaseValue::String("A".into())));
}

#[test_log::test]
fn update_assigns_and_saves() {
    let mut scope = scope();
    let mut user = create_user(&mut scope, "a@example.org", "A", false);

    user.update(&mut scope, [("name", "C")]).unwrap();

    let found = User::find(&mut scope, 1).unwrap().unwrap();
    assert_eq!(found.get_as::<String>("name").unwrap().as_deref(), Some("C"));
}

#[test_log::test]
fn update_with_an_unknown_field_writes_nothing() {
    let mut scope = scope();
    let mut user = create_user(&mut scope, "a@example.org", "A", false);

    let result = user.update(&mut scope, [("nickname", "x")]);

    assert!(matches!(
        result,
        Err(OrmError::UnknownField { model: "User", field }) if field == "nickname"
    ));
    let found = User::find(&mut scope, 1).unwrap().unwrap();
    assert_eq!(found.get_as::<String>("name").unwrap().as_deref(), Some("A"));
}

#[test_log::test]
fn delete_detaches_the_record() {
    let mut scope = scope();
    let mut user = create_user(&mut scope, "a@example.org", "A", false);
    create_user(&mut scope, "b@example.org", "B", false);

    user.delete(&mut scope).unwrap();

    assert!(!user.is_persisted());
    assert_eq!(user.id(), None);
    assert!(user.changed_fields().is_empty());
    assert_eq!(
        user.get_as::<String>("email").unwrap().as_deref(),
        Some("a@example.org")
    );
    assert_eq!(User::count(&mut scope).unwrap(), 1);
    assert!(User::find(&mut scope, 1).unwrap().is_none());
}

#[test_log::test]
fn deleting_an_unsaved_record_is_an_error() {
    let mut scope = scope();
    let mut user = Record::<User>::new(&mut scope).unwrap();

    assert!(matches!(
        user.delete(&mut scope),
        Err(OrmError::InvalidArgument(_))
    ));
}

#[test_log::test]
fn failed_transaction_leaves_the_row_unchanged() {
    let mut scope = scope();
    let mut user = create_user(&mut scope, "a@example.org", "A", false);

    let result = User::transaction(&mut scope, |scope| {
        user.set("name", "B")?;
        user.save(scope)?;
        Err::<(), _>(OrmError::InvalidArgument("abort".to_string()))
    });

    assert!(matches!(result, Err(OrmError::InvalidArgument(x)) if x == "abort"));

    let found = User::find(&mut scope, 1).unwrap().unwrap();
    assert_eq!(found.get_as::<String>("name").unwrap().as_deref(), Some("A"));
}

#[test_log::test]
fn successful_transaction_commits() {
    let mut scope = scope();

    let id = User::transaction(&mut scope, |scope| {
        let user = create_user(scope, "a@example.org", "A", true);
        Ok(user.id().cloned())
    })
    .unwrap();

    assert_eq!(id, Some(DatabaseValue::Int64(1)));
    assert_eq!(User::count(&mut scope).unwrap(), 1);
}

#[test_log::test]
fn nested_transactions_are_rejected() {
    let mut scope = scope();

    let result = User::transaction(&mut scope, |scope| {
        create_user(scope, "a@example.org", "A", true);
        User::transaction(scope, |_| Ok(()))
    });

    assert!(matches!(
        result,
        Err(OrmError::Database(DatabaseError::AlreadyInTransaction))
    ));
    assert_eq!(User::count(&mut scope).unwrap(), 0);
}

#[test_log::test]
fn hierarchies_without_configuration_use_the_root_connection() {
    let mut scope = scope();

    let mut entry = Record::<AuditEntry>::with_values(&mut scope, [("message", "hi")]).unwrap();
    entry.save(&mut scope).unwrap();

    assert_eq!(AuditEntry::table_name(), "audit_entries");
    assert_eq!(AuditEntry::count(&mut scope).unwrap(), 1);
}

#[test_log::test]
fn records_stand_for_their_primary_key_in_conditions() {
    let mut scope = scope();
    create_user(&mut scope, "a@example.org", "A", true);
    let author = create_user(&mut scope, "b@example.org", "B", true);

    for title in ["one", "two"] {
        let mut post = Record::<Post>::with_values(
            &mut scope,
            [
                ("title", DatabaseValue::from(title)),
                ("user_id", DatabaseValue::from(&author)),
            ],
        )
        .unwrap();
        post.save(&mut scope).unwrap();
    }

    assert_eq!(Post::where_eq("user_id", &author).count(&mut scope).unwrap(), 2);
}

#[test_log::test]
fn missing_connection_is_reported() {
    let mut scope = datum_orm::ConnectionScope::new();

    assert!(matches!(
        Record::<User>::new(&mut scope),
        Err(OrmError::Connection(_))
    ));
}
