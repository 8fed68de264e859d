//! CRUD statement generation, cached per descriptor.

use crate::registry::EntityDescriptor;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Per-type CRUD statement text for one parameter prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlStatements {
    /// `None` for key-less types.
    pub select_by_key: Option<String>,
    pub insert: String,
    /// `None` for key-less types or when no column is writable.
    pub update: Option<String>,
    pub delete: Option<String>,
}

/// Statement text cached on a descriptor, keyed by dialect parameter prefix.
#[derive(Default)]
pub(crate) struct StatementCache {
    by_prefix: RwLock<HashMap<String, Arc<SqlStatements>>>,
    builds: AtomicUsize,
}

impl StatementCache {
    pub(crate) fn get_or_build<E: 'static>(
        &self,
        descriptor: &EntityDescriptor<E>,
        prefix: &str,
    ) -> Arc<SqlStatements> {
        if let Some(found) = self
            .by_prefix
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(prefix)
        {
            return Arc::clone(found);
        }

        let mut slots = self
            .by_prefix
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(prefix.to_string()).or_insert_with(|| {
            self.builds.fetch_add(1, Ordering::SeqCst);
            Arc::new(build_statements(descriptor, prefix))
        }))
    }

    pub(crate) fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

/// Builds CRUD statements for `descriptor` using named parameters.
pub fn build_statements<E: 'static>(
    descriptor: &EntityDescriptor<E>,
    prefix: &str,
) -> SqlStatements {
    let table = descriptor.table();
    let key = descriptor.primary_key().map(|field| field.column().to_string());

    let mut insert_columns: Vec<&str> = Vec::new();
    if let Some(key_field) = descriptor.primary_key() {
        if !descriptor.has_auto_increment_key() {
            insert_columns.push(key_field.column());
        }
    }
    insert_columns.extend(descriptor.write_fields().map(|field| field.column()));

    let insert = if insert_columns.is_empty() {
        format!("INSERT INTO {table} DEFAULT VALUES")
    } else {
        let placeholders = insert_columns
            .iter()
            .map(|column| format!("{prefix}{column}"))
            .collect::<Vec<_>>()
            .join(",");
        format!(
            "INSERT INTO {table} ({}) VALUES ({placeholders})",
            insert_columns.join(",")
        )
    };

    let select_by_key = key.as_ref().map(|key| {
        let qualified = match descriptor.alias() {
            Some(alias) => format!("{alias}.{key}"),
            None => key.clone(),
        };
        format!(
            "{} WHERE {qualified}={prefix}{key}",
            descriptor.query_all_sql()
        )
    });

    let assignments = descriptor
        .write_fields()
        .map(|field| format!("{0}={prefix}{0}", field.column()))
        .collect::<Vec<_>>();
    let update = match (&key, assignments.is_empty()) {
        (Some(key), false) => Some(format!(
            "UPDATE {table} SET {} WHERE {key}={prefix}{key}",
            assignments.join(",")
        )),
        _ => None,
    };

    let delete = key
        .as_ref()
        .map(|key| format!("DELETE FROM {table} WHERE {key}={prefix}{key}"));

    SqlStatements {
        select_by_key,
        insert,
        update,
        delete,
    }
}
