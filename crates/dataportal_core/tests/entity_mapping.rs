mod common;

use common::{AuditLog, Customer, Order};
use dataportal_core::model::value::StorageType;
use dataportal_core::registry::{FieldUsage, MetadataRegistry};
use dataportal_core::{
    describe, DataAccessFactory, Entity, EntityMapping, EntityStamp, ErrorKind, FieldDirective,
    MappingError, Settings,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ClashingColumns {
    stamp: EntityStamp,
    first: String,
    second: String,
}

impl Entity for ClashingColumns {
    const TYPE_NAME: &'static str = "ClashingColumns";

    fn mapping() -> EntityMapping<Self> {
        EntityMapping::new()
            .field(
                FieldDirective::scalar("first", |e: &Self| &e.first, |e: &mut Self| &mut e.first)
                    .column("Label"),
            )
            .field(
                FieldDirective::scalar("second", |e: &Self| &e.second, |e: &mut Self| {
                    &mut e.second
                })
                .column("label"),
            )
    }

    fn stamp(&self) -> &EntityStamp {
        &self.stamp
    }

    fn stamp_mut(&mut self) -> &mut EntityStamp {
        &mut self.stamp
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct TwoKeys {
    stamp: EntityStamp,
    left: i64,
    right: i64,
}

impl Entity for TwoKeys {
    const TYPE_NAME: &'static str = "TwoKeys";

    fn mapping() -> EntityMapping<Self> {
        EntityMapping::bare()
            .field(
                FieldDirective::scalar("left", |e: &Self| &e.left, |e: &mut Self| &mut e.left)
                    .primary_key(),
            )
            .field(
                FieldDirective::scalar("right", |e: &Self| &e.right, |e: &mut Self| &mut e.right)
                    .auto_increment(),
            )
    }

    fn stamp(&self) -> &EntityStamp {
        &self.stamp
    }

    fn stamp_mut(&mut self) -> &mut EntityStamp {
        &mut self.stamp
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Injected {
    stamp: EntityStamp,
}

impl Entity for Injected {
    const TYPE_NAME: &'static str = "Injected";

    fn mapping() -> EntityMapping<Self> {
        EntityMapping::new().table("Injected; DROP TABLE Orders")
    }

    fn stamp(&self) -> &EntityStamp {
        &self.stamp
    }

    fn stamp_mut(&mut self) -> &mut EntityStamp {
        &mut self.stamp
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Counter {
    stamp: EntityStamp,
    id: i64,
    hits: i32,
    scratch: String,
}

impl Entity for Counter {
    const TYPE_NAME: &'static str = "Counter";

    fn mapping() -> EntityMapping<Self> {
        EntityMapping::bare()
            .auto_bind(false)
            .field(
                FieldDirective::scalar("id", |e: &Self| &e.id, |e: &mut Self| &mut e.id)
                    .column("Id"),
            )
            .field(
                FieldDirective::scalar("hits", |e: &Self| &e.hits, |e: &mut Self| &mut e.hits)
                    .column("Hits"),
            )
            .field(FieldDirective::scalar(
                "scratch",
                |e: &Self| &e.scratch,
                |e: &mut Self| &mut e.scratch,
            ))
    }

    fn stamp(&self) -> &EntityStamp {
        &self.stamp
    }

    fn stamp_mut(&mut self) -> &mut EntityStamp {
        &mut self.stamp
    }
}

#[test]
fn conventional_uid_key_and_prefixed_collection_columns() {
    let descriptor = describe::<Customer>().unwrap();

    assert_eq!(descriptor.table(), "CustomerInfo");
    let key = descriptor.primary_key().unwrap();
    assert_eq!(key.column(), "UID");
    assert_eq!(
        key.usage(),
        FieldUsage::PrimaryKey {
            auto_increment: false
        }
    );
    assert!(!descriptor.has_auto_increment_key());

    let columns: Vec<&str> = descriptor.fields().iter().map(|f| f.column()).collect();
    assert!(columns.contains(&"AddressStreet"));
    assert!(columns.contains(&"AddressCity"));
    assert!(!columns.iter().any(|c| c.eq_ignore_ascii_case("nickname")));

    let collections = descriptor.collections();
    assert_eq!(collections.len(), 1);
    assert_eq!(collections[0].prefix, "Address");
}

#[test]
fn field_lookup_matches_name_or_column_and_reports_storage() {
    let descriptor = describe::<Customer>().unwrap();

    let tier = descriptor.field("TIER").unwrap();
    assert_eq!(tier.storage_type(), StorageType::String);

    let profile = descriptor.field("profile").unwrap();
    assert!(profile.is_self_serializing());
    assert_eq!(profile.storage_type(), StorageType::Serialized);

    let street = descriptor.field("addressstreet").unwrap();
    assert_eq!(street.name(), "address.street");
    assert!(descriptor.field("nickname").is_none());
}

#[test]
fn explicit_auto_increment_key_wins_over_uid_convention() {
    let descriptor = describe::<Order>().unwrap();

    assert_eq!(descriptor.table(), "Orders");
    assert_eq!(descriptor.primary_key().unwrap().column(), "ID");
    assert!(descriptor.has_auto_increment_key());
    assert!(descriptor.write_fields().any(|f| f.column() == "UID"));
    assert!(!descriptor.write_fields().any(|f| f.column() == "ID"));
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Ledger {
    stamp: EntityStamp,
    id: i64,
    uid: String,
}

impl Entity for Ledger {
    const TYPE_NAME: &'static str = "Ledger";

    fn mapping() -> EntityMapping<Self> {
        EntityMapping::bare()
            .field(FieldDirective::scalar("ID", |e: &Self| &e.id, |e: &mut Self| &mut e.id))
            .field(FieldDirective::scalar("UID", |e: &Self| &e.uid, |e: &mut Self| &mut e.uid))
    }

    fn stamp(&self) -> &EntityStamp {
        &self.stamp
    }

    fn stamp_mut(&mut self) -> &mut EntityStamp {
        &mut self.stamp
    }
}

#[test]
fn conventional_key_follows_declaration_order() {
    let descriptor = describe::<Ledger>().unwrap();
    let key = descriptor.primary_key().unwrap();
    assert_eq!(key.column(), "ID");
    assert_eq!(key.usage(), FieldUsage::PrimaryKey { auto_increment: true });
    assert_eq!(descriptor.field("UID").unwrap().usage(), FieldUsage::Column);
}

#[test]
fn bare_mapping_without_key_columns_has_no_primary_key() {
    let descriptor = describe::<AuditLog>().unwrap();
    assert_eq!(descriptor.table(), "AuditLogInfo");
    assert!(descriptor.primary_key().is_none());

    let log = AuditLog::default();
    assert_eq!(descriptor.identity(&log), log.uid());
}

#[test]
fn auto_bind_off_maps_only_explicit_columns_and_finds_id_key() {
    let descriptor = describe::<Counter>().unwrap();

    let columns: Vec<&str> = descriptor.fields().iter().map(|f| f.column()).collect();
    assert_eq!(columns, vec!["Id", "Hits"]);
    assert!(descriptor.has_auto_increment_key());
    assert_eq!(
        descriptor.key_value("42"),
        dataportal_core::SqlValue::Integer(42)
    );
}

#[test]
fn duplicate_columns_are_a_descriptor_conflict() {
    let err = describe::<ClashingColumns>().unwrap_err();
    assert!(matches!(err, MappingError::DuplicateColumn { ref column, .. } if column == "label"));

    let settings = Settings::from_pairs([("ConnectionStrings.DbConnectionString", "unused.db")]);
    let factory = DataAccessFactory::from_settings(settings).unwrap();
    let err = factory.engine::<ClashingColumns>().err().unwrap();
    assert_eq!(err.kind(), ErrorKind::DescriptorConflict);
}

#[test]
fn multiple_primary_keys_are_rejected() {
    let err = describe::<TwoKeys>().unwrap_err();
    assert_eq!(err, MappingError::MultiplePrimaryKeys { entity: "TwoKeys" });
}

#[test]
fn table_names_must_be_plain_identifiers() {
    let err = describe::<Injected>().unwrap_err();
    assert!(matches!(err, MappingError::InvalidIdentifier { .. }));
}

#[test]
fn query_templates_expand_table_and_field() {
    let descriptor = describe::<Customer>().unwrap();
    assert_eq!(descriptor.query_all_sql(), "SELECT * FROM CustomerInfo");
    assert_eq!(
        descriptor.query_by_field_sql("Name", "Ann"),
        "SELECT * FROM CustomerInfo WHERE Name='Ann'"
    );
}

#[test]
fn concurrent_first_use_builds_one_descriptor() {
    let registry = Arc::new(MetadataRegistry::new());
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.describe::<Order>().unwrap())
        })
        .collect();
    let descriptors: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(registry.build_count(), 1);
    assert!(descriptors
        .windows(2)
        .all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
}
