#![allow(dead_code)]

use dataportal_core::cache::{CacheError, CacheResult, CacheStore};
use dataportal_core::config::Settings;
use dataportal_core::db::{ConnectionFactory, DbResult, SqlConnection, SqliteConnectionFactory};
use dataportal_core::{
    ColumnEnum, DataAccessFactory, Entity, EntityMapping, EntityStamp, FieldDirective, Json,
    Record,
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const SCHEMA: &str = "
    CREATE TABLE CustomerInfo (
        UID TEXT PRIMARY KEY,
        CreateTime INTEGER NOT NULL,
        UpdateTime INTEGER NOT NULL,
        Name TEXT NOT NULL,
        Tier TEXT,
        Profile TEXT,
        AddressStreet TEXT,
        AddressCity TEXT
    );
    CREATE TABLE Orders (
        ID INTEGER PRIMARY KEY AUTOINCREMENT,
        UID TEXT NOT NULL,
        CreateTime INTEGER NOT NULL,
        UpdateTime INTEGER NOT NULL,
        CustomerUid TEXT,
        Amount REAL,
        Note TEXT
    );
    CREATE TABLE AuditLogInfo (
        Message TEXT NOT NULL,
        Level INTEGER NOT NULL
    );
    CREATE TABLE Tags (
        UID TEXT PRIMARY KEY,
        CreateTime INTEGER NOT NULL,
        UpdateTime INTEGER NOT NULL,
        Label TEXT
    );
";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tier {
    #[default]
    Free,
    Pro,
    Enterprise,
}

impl ColumnEnum for Tier {
    fn variants() -> &'static [Self] {
        &[Tier::Free, Tier::Pro, Tier::Enterprise]
    }

    fn variant_name(&self) -> &'static str {
        match self {
            Tier::Free => "Free",
            Tier::Pro => "Pro",
            Tier::Enterprise => "Enterprise",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub tags: Vec<String>,
    pub newsletter: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub street: String,
    pub city: Option<String>,
}

impl Record for Address {
    fn fields() -> Vec<FieldDirective<Self>> {
        vec![
            FieldDirective::scalar("street", |a: &Self| &a.street, |a: &mut Self| &mut a.street)
                .column("Street"),
            FieldDirective::scalar("city", |a: &Self| &a.city, |a: &mut Self| &mut a.city)
                .column("City"),
        ]
    }
}

/// UID-keyed entity exercising enum, serialized and collection fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub stamp: EntityStamp,
    pub name: String,
    pub tier: Tier,
    pub profile: Json<Profile>,
    pub address: Address,
    pub nickname: String,
}

impl Customer {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }
}

impl Entity for Customer {
    const TYPE_NAME: &'static str = "Customer";

    fn mapping() -> EntityMapping<Self> {
        EntityMapping::new()
            .field(
                FieldDirective::scalar("name", |c: &Self| &c.name, |c: &mut Self| &mut c.name)
                    .column("Name"),
            )
            .field(
                FieldDirective::enumeration("tier", |c: &Self| &c.tier, |c: &mut Self| {
                    &mut c.tier
                })
                .column("Tier"),
            )
            .field(
                FieldDirective::serialized(
                    "profile",
                    |c: &Self| &c.profile,
                    |c: &mut Self| &mut c.profile,
                )
                .column("Profile"),
            )
            .field(FieldDirective::collection(
                "address",
                "Address",
                |c: &Self| &c.address,
                |c: &mut Self| &mut c.address,
            ))
            .field(
                FieldDirective::scalar(
                    "nickname",
                    |c: &Self| &c.nickname,
                    |c: &mut Self| &mut c.nickname,
                )
                .ignore(),
            )
    }

    fn stamp(&self) -> &EntityStamp {
        &self.stamp
    }

    fn stamp_mut(&mut self) -> &mut EntityStamp {
        &mut self.stamp
    }
}

/// Entity keyed by an auto-increment `ID`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub stamp: EntityStamp,
    pub id: i64,
    pub customer_uid: String,
    pub amount: f64,
    pub note: Option<String>,
}

impl Entity for Order {
    const TYPE_NAME: &'static str = "Order";

    fn mapping() -> EntityMapping<Self> {
        EntityMapping::new()
            .table("Orders")
            .field(
                FieldDirective::scalar("id", |o: &Self| &o.id, |o: &mut Self| &mut o.id)
                    .column("ID")
                    .auto_increment(),
            )
            .field(
                FieldDirective::scalar(
                    "customer_uid",
                    |o: &Self| &o.customer_uid,
                    |o: &mut Self| &mut o.customer_uid,
                )
                .column("CustomerUid"),
            )
            .field(
                FieldDirective::scalar("amount", |o: &Self| &o.amount, |o: &mut Self| {
                    &mut o.amount
                })
                .column("Amount"),
            )
            .field(
                FieldDirective::scalar("note", |o: &Self| &o.note, |o: &mut Self| &mut o.note)
                    .column("Note"),
            )
    }

    fn stamp(&self) -> &EntityStamp {
        &self.stamp
    }

    fn stamp_mut(&mut self) -> &mut EntityStamp {
        &mut self.stamp
    }
}

/// Append-only entity without any primary key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditLog {
    pub stamp: EntityStamp,
    pub message: String,
    pub level: i32,
}

impl Entity for AuditLog {
    const TYPE_NAME: &'static str = "AuditLog";

    fn mapping() -> EntityMapping<Self> {
        EntityMapping::bare()
            .field(
                FieldDirective::scalar("message", |l: &Self| &l.message, |l: &mut Self| {
                    &mut l.message
                })
                .column("Message"),
            )
            .field(
                FieldDirective::scalar("level", |l: &Self| &l.level, |l: &mut Self| &mut l.level)
                    .column("Level"),
            )
    }

    fn stamp(&self) -> &EntityStamp {
        &self.stamp
    }

    fn stamp_mut(&mut self) -> &mut EntityStamp {
        &mut self.stamp
    }
}

/// Entity that opts out of every cache tier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub stamp: EntityStamp,
    pub label: String,
}

impl Entity for Tag {
    const TYPE_NAME: &'static str = "Tag";

    fn mapping() -> EntityMapping<Self> {
        EntityMapping::new().table("Tags").cache_disabled().field(
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

/// Connection factory that counts every connection it hands out.
pub struct CountingConnections {
    inner: SqliteConnectionFactory,
    created: AtomicUsize,
}

impl CountingConnections {
    pub fn new(path: &Path) -> Self {
        Self {
            inner: SqliteConnectionFactory::new(path),
            created: AtomicUsize::new(0),
        }
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl ConnectionFactory for CountingConnections {
    fn create(&self) -> DbResult<Box<dyn SqlConnection>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        self.inner.create()
    }
}

/// Store whose every call fails.
pub struct FailingStore;

impl FailingStore {
    fn failure() -> CacheError {
        CacheError::Unavailable {
            store: "failing".to_string(),
            reason: "offline".to_string(),
        }
    }
}

impl CacheStore for FailingStore {
    fn name(&self) -> &str {
        "failing"
    }

    fn get(&self, _key: &str) -> CacheResult<Option<Vec<u8>>> {
        Err(Self::failure())
    }

    fn insert(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> CacheResult<()> {
        Err(Self::failure())
    }

    fn remove(&self, _key: &str) -> CacheResult<()> {
        Err(Self::failure())
    }
}

/// Temporary SQLite database with the fixture schema.
pub struct Fixture {
    _dir: TempDir,
    pub path: PathBuf,
    pub connections: Arc<CountingConnections>,
    pub factory: Arc<DataAccessFactory>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_settings(&[])
    }

    /// Fixture whose factory also sees `extra` settings.
    pub fn with_settings(extra: &[(&str, &str)]) -> Self {
        Self::build(extra, None)
    }

    /// Fixture whose factory caches into `store`.
    pub fn with_store(store: Arc<dyn CacheStore>) -> Self {
        Self::build(&[], Some(store))
    }

    fn build(extra: &[(&str, &str)], store: Option<Arc<dyn CacheStore>>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("portal.db");
        create_schema(&path);

        let connections = Arc::new(CountingConnections::new(&path));
        let mut factory = DataAccessFactory::from_settings(settings_for(&path, extra))
            .unwrap()
            .with_connections(connections.clone());
        if let Some(store) = store {
            factory = factory.with_cache_store(store);
        }

        Self {
            _dir: dir,
            path,
            connections,
            factory: Arc::new(factory),
        }
    }

    pub fn settings(&self, extra: &[(&str, &str)]) -> Settings {
        settings_for(&self.path, extra)
    }

    /// Rows in `table`, read straight from the database.
    pub fn count_rows(&self, table: &str) -> i64 {
        let conn = Connection::open(&self.path).unwrap();
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
            row.get(0)
        })
        .unwrap()
    }

    /// Runs raw SQL behind the engines' back.
    pub fn execute(&self, sql: &str) {
        let conn = Connection::open(&self.path).unwrap();
        conn.execute_batch(sql).unwrap();
    }
}

pub fn create_schema(path: &Path) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(SCHEMA).unwrap();
}

pub fn settings_for(path: &Path, extra: &[(&str, &str)]) -> Settings {
    let connection = format!("Data Source={}", path.display());
    let mut pairs = vec![(
        "ConnectionStrings.DbConnectionString".to_string(),
        connection,
    )];
    pairs.extend(
        extra
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string())),
    );
    Settings::from_pairs(pairs)
}

pub fn customer(name: &str, tier: Tier, city: Option<&str>) -> Customer {
    let mut customer = Customer::new(name);
    customer.tier = tier;
    customer.profile = Json(Profile {
        tags: vec!["early".to_string()],
        newsletter: tier != Tier::Free,
    });
    customer.address = Address {
        street: format!("{name} street 1"),
        city: city.map(str::to_string),
    };
    customer
}
