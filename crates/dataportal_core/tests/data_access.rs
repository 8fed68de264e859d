mod common;

use common::{create_schema, customer, AuditLog, Customer, FailingStore, Fixture, Order, Tag, Tier};
use dataportal_core::cache::{CacheKeys, CacheStore, KeyScope};
use dataportal_core::{
    CacheStoreRegistry, DataAccessFactory, Entity, EntityMapping, EntityStamp, ErrorKind,
    FieldDirective, Settings,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread;

const ALL: &str = "SELECT * FROM CustomerInfo";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct AliasedCustomer {
    stamp: EntityStamp,
    name: String,
}

impl Entity for AliasedCustomer {
    const TYPE_NAME: &'static str = "AliasedCustomer";

    fn mapping() -> EntityMapping<Self> {
        EntityMapping::new()
            .table("CustomerInfo")
            .alias("c")
            .query_all("SELECT c.* FROM {table} c")
            .field(
                FieldDirective::scalar("name", |c: &Self| &c.name, |c: &mut Self| &mut c.name)
                    .column("Name"),
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
struct ReportingTag {
    stamp: EntityStamp,
    label: String,
}

impl Entity for ReportingTag {
    const TYPE_NAME: &'static str = "ReportingTag";

    fn mapping() -> EntityMapping<Self> {
        EntityMapping::new()
            .table("Tags")
            .connection("Reporting")
            .field(
                FieldDirective::scalar("label", |t: &Self| &t.label, |t: &mut Self| &mut t.label)
                    .column("Label"),
            )
    }

    fn stamp(&self) -> &EntityStamp {
        &self.stamp
    }

    fn stamp_mut(&mut self) -> &mut EntityStamp {
        &mut self.stamp
    }
}

#[test]
fn inserted_model_is_served_from_cache() {
    let fixture = Fixture::new();
    let engine = fixture.factory.engine::<Customer>().unwrap();

    let mut ann = customer("Ann", Tier::Pro, Some("Oslo"));
    assert_eq!(engine.insert(&mut ann).unwrap(), 1);
    let opened = fixture.connections.created();

    let loaded = engine.get(ann.uid()).unwrap().unwrap();
    assert_eq!(loaded, ann);
    assert_eq!(fixture.connections.created(), opened);
}

#[test]
fn storage_read_populates_the_cache() {
    let fixture = Fixture::new();
    fixture.execute(
        "INSERT INTO CustomerInfo (UID, CreateTime, UpdateTime, Name, Tier)
         VALUES ('c-1', 1, 1, 'Dora', 'Free')",
    );
    let engine = fixture.factory.engine::<Customer>().unwrap();

    assert_eq!(engine.get("c-1").unwrap().unwrap().name, "Dora");
    assert_eq!(engine.get("c-1").unwrap().unwrap().name, "Dora");
    assert_eq!(fixture.connections.created(), 1);

    assert!(engine.get("missing").unwrap().is_none());
    assert_eq!(fixture.connections.created(), 2);
}

#[test]
fn repeated_query_hits_the_cache_and_insert_invalidates_it() {
    let fixture = Fixture::new();
    let engine = fixture.factory.engine::<Customer>().unwrap();
    engine
        .insert(&mut customer("Ann", Tier::Pro, None))
        .unwrap();

    assert_eq!(engine.query(ALL).unwrap().len(), 1);
    let opened = fixture.connections.created();
    assert_eq!(engine.query(ALL).unwrap().len(), 1);
    assert_eq!(fixture.connections.created(), opened);

    engine
        .insert(&mut customer("Bob", Tier::Free, None))
        .unwrap();
    assert_eq!(engine.query(ALL).unwrap().len(), 2);
}

#[test]
fn update_stamps_time_and_refreshes_cached_model() {
    let fixture = Fixture::new();
    let engine = fixture.factory.engine::<Customer>().unwrap();
    let mut ann = customer("Ann", Tier::Free, None);
    engine.insert(&mut ann).unwrap();
    let by_name = "SELECT * FROM CustomerInfo WHERE Name='Ann B'";
    assert!(engine.query(by_name).unwrap().is_empty());

    ann.name = "Ann B".into();
    ann.stamp.update_time = 0;
    assert_eq!(engine.update(&mut ann).unwrap(), 1);
    assert!(ann.update_time() > 0);

    let opened = fixture.connections.created();
    let cached = engine.get(ann.uid()).unwrap().unwrap();
    assert_eq!(cached.name, "Ann B");
    assert_eq!(cached.update_time(), ann.update_time());
    assert_eq!(fixture.connections.created(), opened);

    assert_eq!(engine.query(by_name).unwrap().len(), 1);
}

#[test]
fn update_purges_query_by_old_value_and_new_value_finds_entity() {
    let fixture = Fixture::new();
    let engine = fixture.factory.engine::<Customer>().unwrap();
    let mut ann = customer("Ann", Tier::Free, None);
    engine.insert(&mut ann).unwrap();
    let free = "SELECT * FROM CustomerInfo WHERE Tier='Free'";
    let pro = "SELECT * FROM CustomerInfo WHERE Tier='Pro'";
    assert_eq!(engine.query(free).unwrap().len(), 1);

    ann.tier = Tier::Pro;
    engine.update(&mut ann).unwrap();

    assert!(engine.query(free).unwrap().is_empty());
    let found = engine.query(pro).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].uid(), ann.uid());
}

#[test]
fn update_of_missing_row_drops_the_model_instead_of_caching_it() {
    let fixture = Fixture::new();
    let engine = fixture.factory.engine::<Customer>().unwrap();
    let mut ghost = customer("Ghost", Tier::Free, None);

    assert_eq!(engine.update(&mut ghost).unwrap(), 0);

    let keys = CacheKeys::new(Customer::TYPE_NAME, KeyScope::Plain);
    let store = fixture.factory.cache_store();
    assert!(store.get(&keys.model(ghost.uid())).unwrap().is_none());
    assert!(engine.get(ghost.uid()).unwrap().is_none());
}

#[test]
fn delete_removes_model_and_cached_lists() {
    let fixture = Fixture::new();
    let engine = fixture.factory.engine::<Customer>().unwrap();
    let mut ann = customer("Ann", Tier::Pro, None);
    engine.insert(&mut ann).unwrap();
    assert_eq!(engine.query(ALL).unwrap().len(), 1);

    assert_eq!(engine.delete(&ann).unwrap(), 1);

    assert!(engine.get(ann.uid()).unwrap().is_none());
    assert!(engine.query(ALL).unwrap().is_empty());
    assert_eq!(fixture.count_rows("CustomerInfo"), 0);
}

#[test]
fn partially_cached_query_is_reloaded_from_storage() {
    let fixture = Fixture::new();
    let engine = fixture.factory.engine::<Customer>().unwrap();
    let mut ann = customer("Ann", Tier::Pro, None);
    let mut bob = customer("Bob", Tier::Pro, None);
    engine.insert(&mut ann).unwrap();
    engine.insert(&mut bob).unwrap();
    assert_eq!(engine.query(ALL).unwrap().len(), 2);

    let keys = CacheKeys::new(Customer::TYPE_NAME, KeyScope::Plain);
    fixture
        .factory
        .cache_store()
        .remove(&keys.model(bob.uid()))
        .unwrap();

    let opened = fixture.connections.created();
    assert_eq!(engine.query(ALL).unwrap().len(), 2);
    assert_eq!(fixture.connections.created(), opened + 1);
}

#[test]
fn empty_cached_result_is_fetched_again() {
    let fixture = Fixture::new();
    let engine = fixture.factory.engine::<Customer>().unwrap();
    let by_name = "SELECT * FROM CustomerInfo WHERE Name='Zed'";
    assert!(engine.query(by_name).unwrap().is_empty());

    fixture.execute(
        "INSERT INTO CustomerInfo (UID, CreateTime, UpdateTime, Name)
         VALUES ('c-zed', 1, 1, 'Zed')",
    );

    assert_eq!(engine.query(by_name).unwrap().len(), 1);
}

#[test]
fn auto_increment_key_reaches_caller_and_cache() {
    let fixture = Fixture::new();
    let engine = fixture.factory.engine::<Order>().unwrap();
    let mut order = Order {
        customer_uid: "c-1".into(),
        amount: 9.5,
        ..Order::default()
    };

    engine.insert(&mut order).unwrap();
    assert!(order.id > 0);

    let opened = fixture.connections.created();
    let loaded = engine.get(&order.id.to_string()).unwrap().unwrap();
    assert_eq!(loaded.amount, 9.5);
    assert_eq!(fixture.connections.created(), opened);
}

#[test]
fn keyless_type_rejects_keyed_operations_before_storage() {
    let fixture = Fixture::new();
    let engine = fixture.factory.engine::<AuditLog>().unwrap();
    let mut entry = AuditLog {
        message: "boot".into(),
        level: 1,
        ..AuditLog::default()
    };
    engine.insert(&mut entry).unwrap();
    let opened = fixture.connections.created();

    let err = engine.get("anything").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unsupported);
    assert_eq!(fixture.connections.created(), opened);

    assert_eq!(
        engine.delete(&entry).unwrap_err().kind(),
        ErrorKind::Unsupported
    );
    assert_eq!(
        engine.query("SELECT * FROM AuditLogInfo").unwrap()[0].message,
        "boot"
    );
}

#[test]
fn cache_disabled_type_always_reads_storage() {
    let fixture = Fixture::new();
    let engine = fixture.factory.engine::<Tag>().unwrap();
    assert!(engine.cache().is_none());

    let mut tag = Tag {
        label: "urgent".into(),
        ..Tag::default()
    };
    engine.insert(&mut tag).unwrap();
    engine.get(tag.uid()).unwrap();
    engine.get(tag.uid()).unwrap();
    assert_eq!(fixture.connections.created(), 3);
}

#[test]
fn cache_can_be_disabled_by_settings() {
    let fixture = Fixture::with_settings(&[("DataAccessCacheEnable", "false")]);
    let engine = fixture.factory.engine::<Customer>().unwrap();
    assert!(engine.cache().is_none());
}

#[test]
fn failing_cache_store_never_fails_crud() {
    let fixture = Fixture::with_store(Arc::new(FailingStore));
    let engine = fixture.factory.engine::<Customer>().unwrap();
    let mut ann = customer("Ann", Tier::Pro, None);

    engine.insert(&mut ann).unwrap();
    assert_eq!(engine.get(ann.uid()).unwrap().unwrap().name, "Ann");
    assert_eq!(engine.query(ALL).unwrap().len(), 1);
    ann.name = "Ann B".into();
    assert_eq!(engine.update(&mut ann).unwrap(), 1);
    assert_eq!(engine.delete(&ann).unwrap(), 1);
}

#[test]
fn alias_qualifies_the_key_column() {
    let fixture = Fixture::new();
    let engine = fixture.factory.engine::<Customer>().unwrap();
    let mut ann = customer("Ann", Tier::Pro, None);
    engine.insert(&mut ann).unwrap();

    let aliased = fixture.factory.engine::<AliasedCustomer>().unwrap();
    let loaded = aliased.get(ann.uid()).unwrap().unwrap();
    assert_eq!(loaded.name, "Ann");
}

#[test]
fn connection_directive_selects_a_named_connection_string() {
    let fixture = Fixture::new();
    let reporting_dir = tempfile::tempdir().unwrap();
    let reporting = reporting_dir.path().join("reporting.db");
    create_schema(&reporting);

    let settings = fixture.settings(&[(
        "ConnectionStrings.Reporting",
        reporting.to_str().unwrap(),
    )]);
    let factory = DataAccessFactory::from_settings(settings).unwrap();
    let engine = factory.engine::<ReportingTag>().unwrap();
    let mut tag = ReportingTag {
        label: "q3".into(),
        ..ReportingTag::default()
    };
    engine.insert(&mut tag).unwrap();

    assert_eq!(fixture.count_rows("Tags"), 0);
    let conn = rusqlite::Connection::open(&reporting).unwrap();
    let stored: String = conn
        .query_row("SELECT Label FROM Tags", [], |row| row.get(0))
        .unwrap();
    assert_eq!(stored, "q3");
}

#[test]
fn missing_connection_string_is_a_configuration_error() {
    let factory = DataAccessFactory::from_settings(Settings::new()).unwrap();
    let err = factory.engine::<Customer>().err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[test]
fn failed_writes_leave_cached_entries_untouched() {
    let fixture = Fixture::new();
    let engine = fixture.factory.engine::<Customer>().unwrap();
    let by_name = "SELECT * FROM CustomerInfo WHERE Name='Ann'";

    let mut ann = customer("Ann", Tier::Pro, Some("Oslo"));
    engine.insert(&mut ann).unwrap();
    engine.query(ALL).unwrap();
    engine.query(by_name).unwrap();

    let keys = CacheKeys::new(Customer::TYPE_NAME, KeyScope::Plain);
    let watched = [
        keys.model(ann.uid()),
        keys.relation(ann.uid()),
        keys.query(ALL),
        keys.query(by_name),
    ];
    let store = fixture.factory.cache_store();
    let snapshot = || -> Vec<Option<Vec<u8>>> {
        watched.iter().map(|key| store.get(key).unwrap()).collect()
    };
    let before = snapshot();
    assert!(before.iter().all(Option::is_some));

    let mut twin = ann.clone();
    twin.name = "Twin".into();
    assert_eq!(engine.insert(&mut twin).unwrap_err().kind(), ErrorKind::Storage);

    fixture.execute(
        "CREATE TRIGGER FreezeCustomers BEFORE UPDATE ON CustomerInfo
         BEGIN SELECT RAISE(ABORT, 'frozen'); END;
         CREATE TRIGGER KeepCustomers BEFORE DELETE ON CustomerInfo
         BEGIN SELECT RAISE(ABORT, 'kept'); END;",
    );

    let mut renamed = ann.clone();
    renamed.name = "Anna".into();
    assert_eq!(engine.update(&mut renamed).unwrap_err().kind(), ErrorKind::Storage);
    assert_eq!(renamed.update_time(), ann.update_time());
    assert_eq!(engine.delete(&ann).unwrap_err().kind(), ErrorKind::Storage);

    assert_eq!(snapshot(), before);
    assert_eq!(engine.get(ann.uid()).unwrap().unwrap().name, "Ann");
    assert_eq!(engine.query(by_name).unwrap().len(), 1);
    assert_eq!(fixture.count_rows("CustomerInfo"), 1);
}

#[test]
fn cache_store_is_selected_by_name_from_settings() {
    let fixture = Fixture::new();
    let mut stores = CacheStoreRegistry::new();
    stores.register("failing", || -> Arc<dyn CacheStore> { Arc::new(FailingStore) });

    let factory = DataAccessFactory::with_store_registry(
        fixture.settings(&[("DataAccessCacheType", "Failing")]),
        &stores,
    )
    .unwrap();
    assert_eq!(factory.cache_store().name(), "failing");

    let engine = factory.engine::<Customer>().unwrap();
    let mut ann = customer("Ann", Tier::Pro, None);
    assert_eq!(engine.insert(&mut ann).unwrap(), 1);
    assert_eq!(engine.get(ann.uid()).unwrap().unwrap().name, "Ann");

    let err = DataAccessFactory::with_store_registry(
        fixture.settings(&[("DataAccessCacheType", "redis")]),
        &stores,
    )
    .err()
    .unwrap();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[test]
fn engines_are_memoized_per_type() {
    let fixture = Fixture::new();
    let first = fixture.factory.engine::<Customer>().unwrap();
    let second = fixture.factory.engine::<Customer>().unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(
        fixture.factory.erased("Customer").unwrap().type_name(),
        "Customer"
    );
    assert_eq!(
        fixture.factory.erased("Nobody").err().unwrap().kind(),
        ErrorKind::Configuration
    );
}

#[test]
fn concurrent_writers_share_one_engine() {
    let fixture = Fixture::new();
    let engine = fixture.factory.engine::<Customer>().unwrap();

    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for n in 0..5 {
                    let mut c = customer(&format!("w{worker}-{n}"), Tier::Free, None);
                    engine.insert(&mut c).unwrap();
                    assert_eq!(engine.get(c.uid()).unwrap().unwrap(), c);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(engine.query(ALL).unwrap().len(), 20);
}
