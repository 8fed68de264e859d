//! Row-level CRUD over a live connection.
//!
//! # Responsibility
//! - Bind entity fields to named parameters with the connection's prefix.
//! - Write generated keys back onto inserted entities.
//! - Reject keyed operations on types without a primary key.

use crate::db::{SqlCommand, SqlConnection, SqlParam};
use crate::error::{DataError, DataResult};
use crate::mapper::hydrate::hydrate_rows;
use crate::mapper::statements::SqlStatements;
use crate::model::entity::Entity;
use crate::model::value::SqlValue;
use crate::registry::{EntityDescriptor, FieldDescriptor};
use log::debug;
use std::sync::Arc;

/// Row-level CRUD for one entity type over a caller-supplied connection.
pub struct RelationalMapper<E> {
    descriptor: Arc<EntityDescriptor<E>>,
}

impl<E> Clone for RelationalMapper<E> {
    fn clone(&self) -> Self {
        Self {
            descriptor: Arc::clone(&self.descriptor),
        }
    }
}

impl<E: Entity> RelationalMapper<E> {
    pub fn new(descriptor: Arc<EntityDescriptor<E>>) -> Self {
        Self { descriptor }
    }

    pub fn descriptor(&self) -> &Arc<EntityDescriptor<E>> {
        &self.descriptor
    }

    /// Reads one row by primary key.
    ///
    /// # Errors
    /// - `Unsupported` when the type has no primary key.
    pub fn get(&self, conn: &mut dyn SqlConnection, key: &SqlValue) -> DataResult<Option<E>> {
        let (statements, key_field) = self.keyed(conn, "get")?;
        let Some(text) = statements.select_by_key.as_deref() else {
            return Err(DataError::unsupported("get", E::TYPE_NAME));
        };

        let mut command = conn.create_command(text);
        command.add_parameter(SqlParam::input(
            key_field.column(),
            key.clone(),
            key_field.storage_type(),
        ));
        let rows = conn.execute_reader(&command)?;
        Ok(hydrate_rows(&self.descriptor, rows)?.into_iter().next())
    }

    /// Inserts one row; an auto-increment key is written back onto `entity`.
    pub fn insert(&self, conn: &mut dyn SqlConnection, entity: &mut E) -> DataResult<usize> {
        let statements = self.statements(conn);
        let mut command = conn.create_command(&statements.insert);

        let auto_key = self
            .descriptor
            .primary_key()
            .filter(|_| self.descriptor.has_auto_increment_key());
        if let Some(key) = self.descriptor.primary_key() {
            if auto_key.is_none() {
                command.add_parameter(bind(key, entity));
            }
        }
        for field in self.descriptor.write_fields() {
            command.add_parameter(bind(field, entity));
        }
        if let Some(key) = auto_key {
            command.add_parameter(SqlParam::output(key.column(), key.storage_type()));
        }

        let affected = conn.execute_non_query(&mut command)?;

        if let Some(key) = auto_key {
            if let Some(generated) = command.parameter_value(key.column()).cloned() {
                if !generated.is_null() {
                    key.write(entity, generated)?;
                }
            }
        }
        debug!(
            "event=row_insert module=mapper status=ok entity={} rows={}",
            E::TYPE_NAME,
            affected
        );
        Ok(affected)
    }

    /// Updates the row identified by the entity's key.
    ///
    /// Returns `Ok(0)` without touching storage when no column is writable.
    pub fn update(&self, conn: &mut dyn SqlConnection, entity: &E) -> DataResult<usize> {
        let (statements, key_field) = self.keyed(conn, "update")?;
        let Some(text) = statements.update.as_deref() else {
            return Ok(0);
        };

        let mut command = conn.create_command(text);
        for field in self.descriptor.write_fields() {
            command.add_parameter(bind(field, entity));
        }
        command.add_parameter(bind(key_field, entity));
        Ok(conn.execute_non_query(&mut command)?)
    }

    pub fn delete(&self, conn: &mut dyn SqlConnection, entity: &E) -> DataResult<usize> {
        let (statements, key_field) = self.keyed(conn, "delete")?;
        let Some(text) = statements.delete.as_deref() else {
            return Err(DataError::unsupported("delete", E::TYPE_NAME));
        };

        let mut command = conn.create_command(text);
        command.add_parameter(bind(key_field, entity));
        Ok(conn.execute_non_query(&mut command)?)
    }

    /// Runs caller-supplied SQL and hydrates every row.
    pub fn query(&self, conn: &mut dyn SqlConnection, sql: &str) -> DataResult<Vec<E>> {
        let command = SqlCommand::new(sql);
        let rows = conn.execute_reader(&command)?;
        Ok(hydrate_rows(&self.descriptor, rows)?)
    }

    fn statements(&self, conn: &dyn SqlConnection) -> Arc<SqlStatements> {
        self.descriptor
            .statements
            .get_or_build(&self.descriptor, conn.param_prefix())
    }

    fn keyed(
        &self,
        conn: &dyn SqlConnection,
        operation: &'static str,
    ) -> DataResult<(Arc<SqlStatements>, &FieldDescriptor<E>)> {
        let key = self
            .descriptor
            .primary_key()
            .ok_or_else(|| DataError::unsupported(operation, E::TYPE_NAME))?;
        Ok((self.statements(conn), key))
    }
}

fn bind<E: 'static>(field: &FieldDescriptor<E>, entity: &E) -> SqlParam {
    SqlParam::input(field.column(), field.read(entity), field.storage_type())
}
