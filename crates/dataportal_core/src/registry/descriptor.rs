//! Per-type entity descriptors built from mapping directives.
//!
//! # Responsibility
//! - Resolve table, key, column and collection layout for one entity type.
//! - Hold per-type statement and ordinal caches used by the mapper.
//!
//! # Invariants
//! - No two mapped fields resolve to the same column (case-insensitive).
//! - At most one primary key; explicit directive wins over convention.
//! - Identifiers are validated before they reach any SQL template.

use crate::mapper::hydrate::OrdinalCache;
use crate::mapper::statements::StatementCache;
use crate::model::entity::{
    CollectionDirective, Entity, FieldAccess, FieldDirective, FieldRole, PortalRoute,
};
use crate::model::value::{SqlValue, StorageType, ValueType};
use crate::model::MappingError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

const TABLE_SUFFIX: &str = "Info";
const CONVENTION_UID: &str = "UID";
const CONVENTION_ID: &str = "ID";

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));
static TABLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$").expect("valid table regex")
});

/// How a mapped field participates in statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldUsage {
    PrimaryKey { auto_increment: bool },
    Column,
    QueryOnly,
}

/// One resolved column of an entity type.
pub struct FieldDescriptor<E> {
    name: String,
    column: String,
    value_type: ValueType,
    usage: FieldUsage,
    access: FieldAccess<E>,
}

impl<E: 'static> FieldDescriptor<E> {
    /// Field path; nested collection fields are joined with `.`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    pub fn storage_type(&self) -> StorageType {
        self.value_type.storage_type()
    }

    pub fn usage(&self) -> FieldUsage {
        self.usage
    }

    pub fn is_self_serializing(&self) -> bool {
        matches!(self.value_type, ValueType::SelfSerializing(_))
    }

    pub fn read(&self, entity: &E) -> SqlValue {
        self.access.read(entity)
    }

    pub fn write(&self, entity: &mut E, value: SqlValue) -> Result<(), MappingError> {
        self.access.write(entity, value)
    }
}

/// Resolved collection field: one nested record expanded into prefixed columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionDescriptor {
    pub name: String,
    pub prefix: String,
    pub columns: Vec<String>,
}

/// Process-lifetime mapping metadata for one entity type.
pub struct EntityDescriptor<E> {
    type_name: &'static str,
    table: String,
    alias: Option<String>,
    fields: Vec<FieldDescriptor<E>>,
    key_index: Option<usize>,
    collections: Vec<CollectionDescriptor>,
    query_all_template: String,
    query_by_field_template: String,
    cache_disabled: bool,
    connection: Option<String>,
    portal_route: Option<PortalRoute>,
    pub(crate) statements: StatementCache,
    pub(crate) ordinals: OrdinalCache,
}

impl<E> std::fmt::Debug for EntityDescriptor<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityDescriptor")
            .field("type_name", &self.type_name)
            .field("table", &self.table)
            .field("alias", &self.alias)
            .field("key_index", &self.key_index)
            .field("collections", &self.collections)
            .field("cache_disabled", &self.cache_disabled)
            .field("connection", &self.connection)
            .finish_non_exhaustive()
    }
}

impl<E: Entity> EntityDescriptor<E> {
    /// Resolves `E::mapping()` into a descriptor.
    ///
    /// # Errors
    /// - `DuplicateColumn` when two fields resolve to one column.
    /// - `MultiplePrimaryKeys` when more than one field is marked primary.
    /// - `InvalidIdentifier` when a table, alias or column name is not a
    ///   plain SQL identifier.
    pub fn build() -> Result<Self, MappingError> {
        let mapping = E::mapping();
        let entity = E::TYPE_NAME;

        let table = match mapping.table {
            Some(table) => table,
            None => conventional_table_name(entity),
        };
        if !TABLE_RE.is_match(&table) {
            return Err(MappingError::InvalidIdentifier {
                entity,
                identifier: table,
            });
        }
        if let Some(alias) = &mapping.alias {
            validate_identifier(entity, alias)?;
        }

        let mut resolver = FieldResolver {
            entity,
            fields: Vec::new(),
            collections: Vec::new(),
            seen_columns: HashSet::new(),
            explicit_key: None,
        };
        resolver.resolve(mapping.fields, "", "", mapping.auto_bind)?;

        let FieldResolver {
            mut fields,
            collections,
            explicit_key,
            ..
        } = resolver;

        let key_index = match explicit_key {
            Some(index) => Some(index),
            None => conventional_key(&fields).map(|(index, auto_increment)| {
                fields[index].usage = FieldUsage::PrimaryKey { auto_increment };
                index
            }),
        };

        Ok(Self {
            type_name: entity,
            table,
            alias: mapping.alias,
            fields,
            key_index,
            collections,
            query_all_template: mapping.query_all_template,
            query_by_field_template: mapping.query_by_field_template,
            cache_disabled: mapping.cache_disabled,
            connection: mapping.connection,
            portal_route: mapping.portal_route,
            statements: StatementCache::default(),
            ordinals: OrdinalCache::default(),
        })
    }

    /// Primary key text of `entity`, or its UID for key-less types.
    ///
    /// This is the identity used in cache model and relation keys.
    pub fn identity(&self, entity: &E) -> String {
        match self.primary_key() {
            Some(key) => key.read(entity).to_literal(),
            None => entity.uid().to_string(),
        }
    }
}

impl<E: 'static> EntityDescriptor<E> {
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    /// All mapped fields in declaration order, key included.
    pub fn fields(&self) -> &[FieldDescriptor<E>] {
        &self.fields
    }

    pub fn primary_key(&self) -> Option<&FieldDescriptor<E>> {
        self.key_index.map(|index| &self.fields[index])
    }

    pub fn has_auto_increment_key(&self) -> bool {
        matches!(
            self.primary_key().map(FieldDescriptor::usage),
            Some(FieldUsage::PrimaryKey {
                auto_increment: true
            })
        )
    }

    /// Non-key fields written by insert and update.
    pub fn write_fields(&self) -> impl Iterator<Item = &FieldDescriptor<E>> {
        self.fields
            .iter()
            .filter(|field| field.usage == FieldUsage::Column)
    }

    pub fn query_only_fields(&self) -> impl Iterator<Item = &FieldDescriptor<E>> {
        self.fields
            .iter()
            .filter(|field| field.usage == FieldUsage::QueryOnly)
    }

    pub fn collections(&self) -> &[CollectionDescriptor] {
        &self.collections
    }

    /// Finds a field by path or column name, case-insensitive.
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor<E>> {
        self.fields.iter().find(|field| {
            field.name.eq_ignore_ascii_case(name) || field.column.eq_ignore_ascii_case(name)
        })
    }

    pub fn cache_disabled(&self) -> bool {
        self.cache_disabled
    }

    /// Connection string name declared on the type.
    pub fn connection(&self) -> Option<&str> {
        self.connection.as_deref()
    }

    pub fn portal_route(&self) -> Option<&PortalRoute> {
        self.portal_route.as_ref()
    }

    /// "Query all" statement for this type.
    pub fn query_all_sql(&self) -> String {
        self.query_all_template.replace("{table}", &self.table)
    }

    /// "Query by field" statement with the value substituted literally.
    ///
    /// The value is not escaped; callers must not pass untrusted text.
    pub fn query_by_field_sql(&self, column: &str, value: &str) -> String {
        self.query_by_field_template
            .replace("{table}", &self.table)
            .replace("{field}", column)
            .replace("{value}", value)
    }

    /// Number of times CRUD statement text was built for this type.
    pub fn statement_build_count(&self) -> usize {
        self.statements.build_count()
    }

    /// Number of times result columns were bound to field ordinals.
    pub fn ordinal_bind_count(&self) -> usize {
        self.ordinals.bind_count()
    }

    /// Converts a textual key into the value bound for the key column.
    pub fn key_value(&self, key: &str) -> SqlValue {
        match self.primary_key() {
            Some(field) if field.value_type.is_integral() => key
                .trim()
                .parse::<i64>()
                .map(SqlValue::Integer)
                .unwrap_or_else(|_| SqlValue::Text(key.to_string())),
            _ => SqlValue::Text(key.to_string()),
        }
    }
}

/// Default table name: type name plus `Info` unless already present.
pub fn conventional_table_name(type_name: &str) -> String {
    if type_name.ends_with(TABLE_SUFFIX) {
        type_name.to_string()
    } else {
        format!("{type_name}{TABLE_SUFFIX}")
    }
}

fn validate_identifier(entity: &'static str, identifier: &str) -> Result<(), MappingError> {
    if IDENTIFIER_RE.is_match(identifier) {
        Ok(())
    } else {
        Err(MappingError::InvalidIdentifier {
            entity,
            identifier: identifier.to_string(),
        })
    }
}

/// First column field named `UID` or `ID`, in declaration order.
///
/// An `ID` key is always auto-increment; a `UID` key never is.
fn conventional_key<E>(fields: &[FieldDescriptor<E>]) -> Option<(usize, bool)> {
    let named = |field: &FieldDescriptor<E>, name: &str| {
        field.column.eq_ignore_ascii_case(name) || field.name.eq_ignore_ascii_case(name)
    };
    fields
        .iter()
        .enumerate()
        .filter(|(_, field)| field.usage == FieldUsage::Column)
        .find_map(|(index, field)| {
            if named(field, CONVENTION_UID) {
                Some((index, false))
            } else if named(field, CONVENTION_ID) {
                Some((index, true))
            } else {
                None
            }
        })
}

struct FieldResolver<E> {
    entity: &'static str,
    fields: Vec<FieldDescriptor<E>>,
    collections: Vec<CollectionDescriptor>,
    seen_columns: HashSet<String>,
    explicit_key: Option<usize>,
}

impl<E: 'static> FieldResolver<E> {
    fn resolve(
        &mut self,
        directives: Vec<FieldDirective<E>>,
        prefix: &str,
        path: &str,
        auto_bind: bool,
    ) -> Result<(), MappingError> {
        for directive in directives {
            if directive.role == FieldRole::Ignore {
                continue;
            }
            if !auto_bind && !directive.is_explicit() {
                continue;
            }

            let name = if path.is_empty() {
                directive.name.clone()
            } else {
                format!("{path}.{}", directive.name)
            };

            if let Some(collection) = directive.collection {
                self.resolve_collection(collection, prefix, name)?;
                continue;
            }
            let Some(access) = directive.access else {
                // Plain nested records are not mapped without a collection directive.
                continue;
            };
            if directive.value_type == ValueType::Record {
                continue;
            }

            let column = format!(
                "{prefix}{}",
                directive.column.as_deref().unwrap_or(&directive.name)
            );
            validate_identifier(self.entity, &column)?;
            if !self.seen_columns.insert(column.to_ascii_lowercase()) {
                return Err(MappingError::DuplicateColumn {
                    entity: self.entity,
                    column,
                });
            }

            let usage = match directive.role {
                FieldRole::PrimaryKey { auto_increment } => {
                    if self.explicit_key.is_some() {
                        return Err(MappingError::MultiplePrimaryKeys {
                            entity: self.entity,
                        });
                    }
                    self.explicit_key = Some(self.fields.len());
                    FieldUsage::PrimaryKey { auto_increment }
                }
                FieldRole::QueryOnly => FieldUsage::QueryOnly,
                FieldRole::Column | FieldRole::Ignore => FieldUsage::Column,
            };

            self.fields.push(FieldDescriptor {
                name,
                column,
                value_type: directive.value_type,
                usage,
                access,
            });
        }
        Ok(())
    }

    fn resolve_collection(
        &mut self,
        collection: CollectionDirective<E>,
        prefix: &str,
        name: String,
    ) -> Result<(), MappingError> {
        let nested_prefix = format!("{prefix}{}", collection.prefix);
        let first_new = self.fields.len();
        self.resolve(collection.fields, &nested_prefix, &name, collection.auto_bind)?;
        let columns = self.fields[first_new..]
            .iter()
            .map(|field| field.column.clone())
            .collect();
        self.collections.push(CollectionDescriptor {
            name,
            prefix: nested_prefix,
            columns,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::conventional_table_name;

    #[test]
    fn table_name_gets_info_suffix_once() {
        assert_eq!(conventional_table_name("Customer"), "CustomerInfo");
        assert_eq!(conventional_table_name("CustomerInfo"), "CustomerInfo");
    }
}
