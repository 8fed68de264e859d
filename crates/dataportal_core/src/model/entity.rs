//! Entity contract and mapping directives.
//!
//! # Responsibility
//! - Define the `Entity` trait: identity stamp, type name and mapping.
//! - Provide builders for table-level and field-level mapping directives.
//! - Generate typed accessors once, as closures over plain field lenses.
//!
//! # Invariants
//! - `EntityStamp::uid` is generated at creation and never reassigned by core.
//! - Accessors are built from function pointers; no name lookup happens per call.
//! - Collection fields are lifted into the owning entity at declaration time.

use crate::model::value::{ColumnEnum, ColumnSerialize, ColumnValue, SqlValue, ValueType};
use crate::model::MappingError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Default "query all" template. `{table}` is replaced by the table name.
pub const DEFAULT_QUERY_ALL_TEMPLATE: &str = "SELECT * FROM {table}";
/// Default "query by field" template.
///
/// Literal value substitution here is an injection boundary: values are
/// inserted verbatim, so callers must never pass untrusted text.
pub const DEFAULT_QUERY_BY_FIELD_TEMPLATE: &str = "SELECT * FROM {table} WHERE {field}='{value}'";

const UID_COLUMN: &str = "UID";
const CREATE_TIME_COLUMN: &str = "CreateTime";
const UPDATE_TIME_COLUMN: &str = "UpdateTime";

/// Returns current Unix epoch milliseconds.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Identity and lifecycle timestamps shared by every entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityStamp {
    /// Globally unique identity, generated at creation.
    pub uid: String,
    /// Unix epoch milliseconds at creation.
    pub create_time: i64,
    /// Unix epoch milliseconds at the last authoritative update.
    pub update_time: i64,
}

impl EntityStamp {
    /// Creates a stamp with a generated UUID v4 identity.
    pub fn new() -> Self {
        let now = now_millis();
        Self {
            uid: Uuid::new_v4().to_string(),
            create_time: now,
            update_time: now,
        }
    }

    /// Creates a stamp with a caller-provided identity.
    pub fn with_uid(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            ..Self::new()
        }
    }

    fn fields() -> Vec<FieldDirective<Self>> {
        vec![
            FieldDirective::scalar("uid", |s: &Self| &s.uid, |s: &mut Self| &mut s.uid)
                .column(UID_COLUMN),
            FieldDirective::scalar(
                "create_time",
                |s: &Self| &s.create_time,
                |s: &mut Self| &mut s.create_time,
            )
            .column(CREATE_TIME_COLUMN),
            FieldDirective::scalar(
                "update_time",
                |s: &Self| &s.update_time,
                |s: &mut Self| &mut s.update_time,
            )
            .column(UPDATE_TIME_COLUMN),
        ]
    }
}

impl Default for EntityStamp {
    fn default() -> Self {
        Self::new()
    }
}

/// Contract for a persisted record type.
///
/// `Default` is the parameterless constructor used during row hydration.
pub trait Entity: Clone + Default + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable type name used for table naming, cache scoping and routing.
    const TYPE_NAME: &'static str;

    /// Declarative mapping; read exactly once per process by the registry.
    fn mapping() -> EntityMapping<Self>;

    fn stamp(&self) -> &EntityStamp;

    fn stamp_mut(&mut self) -> &mut EntityStamp;

    fn uid(&self) -> &str {
        &self.stamp().uid
    }

    fn create_time(&self) -> i64 {
        self.stamp().create_time
    }

    fn update_time(&self) -> i64 {
        self.stamp().update_time
    }

    fn set_update_time(&mut self, at: i64) {
        self.stamp_mut().update_time = at;
    }

    /// Identity comparison; field values are irrelevant.
    fn same_identity(&self, other: &Self) -> bool {
        self.uid() == other.uid()
    }
}

/// Nested value object that can be expanded into prefixed columns.
pub trait Record: Send + Sync + 'static {
    fn fields() -> Vec<FieldDirective<Self>>
    where
        Self: Sized;

    /// When false, only fields with an explicit column directive are mapped.
    fn auto_bind() -> bool {
        true
    }
}

type Getter<E> = Arc<dyn Fn(&E) -> SqlValue + Send + Sync>;
type Setter<E> = Arc<dyn Fn(&mut E, SqlValue) -> Result<(), MappingError> + Send + Sync>;

/// Generated get/set accessor pair for one column.
pub struct FieldAccess<E> {
    get: Getter<E>,
    set: Setter<E>,
}

impl<E> Clone for FieldAccess<E> {
    fn clone(&self) -> Self {
        Self {
            get: Arc::clone(&self.get),
            set: Arc::clone(&self.set),
        }
    }
}

impl<E: 'static> FieldAccess<E> {
    pub fn read(&self, entity: &E) -> SqlValue {
        (self.get)(entity)
    }

    pub fn write(&self, entity: &mut E, value: SqlValue) -> Result<(), MappingError> {
        (self.set)(entity, value)
    }

    fn project<P: 'static>(
        self,
        outer: fn(&P) -> &E,
        outer_mut: fn(&mut P) -> &mut E,
    ) -> FieldAccess<P> {
        let get = self.get;
        let set = self.set;
        FieldAccess {
            get: Arc::new(move |parent: &P| get(outer(parent))),
            set: Arc::new(move |parent: &mut P, value| set(outer_mut(parent), value)),
        }
    }
}

/// Role of one field in the write path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRole {
    Column,
    Ignore,
    /// Populated on read, excluded from insert/update statements.
    QueryOnly,
    PrimaryKey {
        auto_increment: bool,
    },
}

/// Prefix expansion of a nested record into multiple columns.
pub struct CollectionDirective<E> {
    pub(crate) prefix: String,
    pub(crate) auto_bind: bool,
    pub(crate) fields: Vec<FieldDirective<E>>,
}

/// Field-level mapping directive.
pub struct FieldDirective<E> {
    pub(crate) name: String,
    pub(crate) column: Option<String>,
    pub(crate) value_type: ValueType,
    pub(crate) role: FieldRole,
    pub(crate) access: Option<FieldAccess<E>>,
    pub(crate) collection: Option<CollectionDirective<E>>,
}

impl<E: 'static> FieldDirective<E> {
    fn with_access(name: &str, value_type: ValueType, access: Option<FieldAccess<E>>) -> Self {
        Self {
            name: name.to_string(),
            column: None,
            value_type,
            role: FieldRole::Column,
            access,
            collection: None,
        }
    }

    /// Primitive or string field converted through `ColumnValue`.
    pub fn scalar<V>(name: &str, get: fn(&E) -> &V, get_mut: fn(&mut E) -> &mut V) -> Self
    where
        V: ColumnValue + 'static,
    {
        let access = FieldAccess {
            get: Arc::new(move |entity: &E| get(entity).to_sql()),
            set: Arc::new(move |entity: &mut E, value| {
                *get_mut(entity) = V::from_sql(value)?;
                Ok(())
            }),
        };
        Self::with_access(name, V::VALUE_TYPE, Some(access))
    }

    /// Enum field stored by name.
    pub fn enumeration<V>(name: &str, get: fn(&E) -> &V, get_mut: fn(&mut E) -> &mut V) -> Self
    where
        V: ColumnEnum,
    {
        let access = FieldAccess {
            get: Arc::new(move |entity: &E| SqlValue::Text(get(entity).variant_name().to_string())),
            set: Arc::new(move |entity: &mut E, value: SqlValue| {
                let text = value.to_text().unwrap_or_default();
                let parsed = V::parse_variant(&text).ok_or(MappingError::ValueConversion {
                    expected: "enum variant name",
                    found: text,
                })?;
                *get_mut(entity) = parsed;
                Ok(())
            }),
        };
        Self::with_access(name, ValueType::Enum, Some(access))
    }

    /// Self-serializing value object stored in one column.
    pub fn serialized<V>(name: &str, get: fn(&E) -> &V, get_mut: fn(&mut E) -> &mut V) -> Self
    where
        V: ColumnSerialize + 'static,
    {
        let access = FieldAccess {
            get: Arc::new(move |entity: &E| SqlValue::Text(get(entity).serialize_column())),
            set: Arc::new(move |entity: &mut E, value: SqlValue| {
                let text = value.to_text().unwrap_or_default();
                *get_mut(entity) = V::deserialize_column(&text)?;
                Ok(())
            }),
        };
        Self::with_access(name, ValueType::SelfSerializing(V::storage_type()), Some(access))
    }

    /// Nested record without a collection directive; never mapped.
    pub fn record(name: &str) -> Self {
        Self::with_access(name, ValueType::Record, None)
    }

    /// Nested record expanded into columns named `{prefix}{column}`.
    pub fn collection<N>(
        name: &str,
        prefix: &str,
        get: fn(&E) -> &N,
        get_mut: fn(&mut E) -> &mut N,
    ) -> Self
    where
        N: Record,
    {
        let fields = N::fields()
            .into_iter()
            .map(|field| field.project(get, get_mut))
            .collect();
        let mut directive = Self::with_access(name, ValueType::Record, None);
        directive.collection = Some(CollectionDirective {
            prefix: prefix.to_string(),
            auto_bind: N::auto_bind(),
            fields,
        });
        directive
    }

    /// Physical column name; defaults to the field name.
    pub fn column(mut self, column: &str) -> Self {
        self.column = Some(column.to_string());
        self
    }

    pub fn ignore(mut self) -> Self {
        self.role = FieldRole::Ignore;
        self
    }

    pub fn query_only(mut self) -> Self {
        self.role = FieldRole::QueryOnly;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.role = FieldRole::PrimaryKey {
            auto_increment: false,
        };
        self
    }

    /// Marks the field as an auto-increment primary key.
    pub fn auto_increment(mut self) -> Self {
        self.role = FieldRole::PrimaryKey {
            auto_increment: true,
        };
        self
    }

    /// Whether the field carries any explicit column-level directive.
    pub(crate) fn is_explicit(&self) -> bool {
        self.column.is_some()
            || self.collection.is_some()
            || matches!(
                self.role,
                FieldRole::QueryOnly | FieldRole::PrimaryKey { .. }
            )
    }

    fn project<P: 'static>(
        self,
        outer: fn(&P) -> &E,
        outer_mut: fn(&mut P) -> &mut E,
    ) -> FieldDirective<P> {
        FieldDirective {
            name: self.name,
            column: self.column,
            value_type: self.value_type,
            role: self.role,
            access: self.access.map(|access| access.project(outer, outer_mut)),
            collection: self.collection.map(|collection| CollectionDirective {
                prefix: collection.prefix,
                auto_bind: collection.auto_bind,
                fields: collection
                    .fields
                    .into_iter()
                    .map(|field| field.project(outer, outer_mut))
                    .collect(),
            }),
        }
    }
}

/// Portal routing directive: names the settings holding the dispatcher kind
/// and the remote endpoint for one entity type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PortalRoute {
    pub client_setting: String,
    pub url_setting: String,
}

/// Table-level mapping directives for one entity type.
pub struct EntityMapping<E> {
    pub(crate) table: Option<String>,
    pub(crate) alias: Option<String>,
    pub(crate) auto_bind: bool,
    pub(crate) query_all_template: String,
    pub(crate) query_by_field_template: String,
    pub(crate) cache_disabled: bool,
    pub(crate) connection: Option<String>,
    pub(crate) portal_route: Option<PortalRoute>,
    pub(crate) fields: Vec<FieldDirective<E>>,
}

impl<E: Entity> EntityMapping<E> {
    /// Starts a mapping with the stamp fields (`UID`, `CreateTime`, `UpdateTime`).
    pub fn new() -> Self {
        let stamp_fields = EntityStamp::fields()
            .into_iter()
            .map(|field| field.project(E::stamp, E::stamp_mut))
            .collect();
        Self {
            fields: stamp_fields,
            ..Self::bare()
        }
    }
}

impl<E: 'static> EntityMapping<E> {
    /// Starts a mapping without stamp fields.
    pub fn bare() -> Self {
        Self {
            table: None,
            alias: None,
            auto_bind: true,
            query_all_template: DEFAULT_QUERY_ALL_TEMPLATE.to_string(),
            query_by_field_template: DEFAULT_QUERY_BY_FIELD_TEMPLATE.to_string(),
            cache_disabled: false,
            connection: None,
            portal_route: None,
            fields: Vec::new(),
        }
    }

    pub fn table(mut self, name: &str) -> Self {
        self.table = Some(name.to_string());
        self
    }

    /// Table alias used to qualify the key column in the get-by-key query.
    pub fn alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.to_string());
        self
    }

    pub fn auto_bind(mut self, enabled: bool) -> Self {
        self.auto_bind = enabled;
        self
    }

    /// Overrides the "query all" template (`{table}` placeholder).
    pub fn query_all(mut self, template: &str) -> Self {
        self.query_all_template = template.to_string();
        self
    }

    /// Overrides the "query by field" template (`{table}`, `{field}`, `{value}`).
    pub fn query_by_field(mut self, template: &str) -> Self {
        self.query_by_field_template = template.to_string();
        self
    }

    pub fn cache_disabled(mut self) -> Self {
        self.cache_disabled = true;
        self
    }

    /// Names the connection string used by this type.
    pub fn connection(mut self, name: &str) -> Self {
        self.connection = Some(name.to_string());
        self
    }

    /// Routes portal calls for this type through the named settings.
    pub fn portal_route(mut self, client_setting: &str, url_setting: &str) -> Self {
        self.portal_route = Some(PortalRoute {
            client_setting: client_setting.to_string(),
            url_setting: url_setting.to_string(),
        });
        self
    }

    pub fn field(mut self, field: FieldDirective<E>) -> Self {
        self.fields.push(field);
        self
    }
}

impl<E: Entity> Default for EntityMapping<E> {
    fn default() -> Self {
        Self::new()
    }
}
