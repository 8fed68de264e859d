//! SQL connection abstraction consumed by the relational mapper.
//!
//! # Responsibility
//! - Define a dialect-neutral connection, command and parameter surface.
//! - Provide scoped acquisition so connections are released on every exit path.
//! - Ship the SQLite driver used by default.
//!
//! # Invariants
//! - Parameter names are stored without prefix; drivers apply their own.
//! - A connection is used by one operation at a time and never shared.

use crate::model::value::{SqlValue, StorageType};
use thiserror::Error;

mod sqlite;

pub use sqlite::{SqliteConnection, SqliteConnectionFactory};

/// Minimum declared size for text parameters.
pub const MIN_TEXT_PARAM_SIZE: usize = 4000;

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error("connection is not open")]
    NotOpen,
    #[error("invalid connection string `{0}`")]
    InvalidConnectionString(String),
    #[error("command has no placeholder for parameter `{0}`")]
    UnknownParameter(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamDirection {
    Input,
    /// Filled by the driver after execution (e.g. generated keys).
    Output,
    InputOutput,
}

/// One bound command parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlParam {
    /// Name without the dialect prefix.
    pub name: String,
    pub value: SqlValue,
    pub storage_type: StorageType,
    pub direction: ParamDirection,
    /// Declared size for text parameters.
    pub size: Option<usize>,
}

impl SqlParam {
    pub fn input(name: &str, value: SqlValue, storage_type: StorageType) -> Self {
        let size = value.text_len().map(text_param_size);
        Self {
            name: name.to_string(),
            value,
            storage_type,
            direction: ParamDirection::Input,
            size,
        }
    }

    pub fn output(name: &str, storage_type: StorageType) -> Self {
        Self {
            name: name.to_string(),
            value: SqlValue::Null,
            storage_type,
            direction: ParamDirection::Output,
            size: None,
        }
    }
}

/// Text parameters are sized to content length plus headroom.
pub fn text_param_size(content_len: usize) -> usize {
    (content_len + 1).max(MIN_TEXT_PARAM_SIZE)
}

/// Parameterized command text.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlCommand {
    pub text: String,
    pub params: Vec<SqlParam>,
}

impl SqlCommand {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            params: Vec::new(),
        }
    }

    pub fn add_parameter(&mut self, param: SqlParam) {
        self.params.push(param);
    }

    /// Current value of a parameter, including driver-filled outputs.
    pub fn parameter_value(&self, name: &str) -> Option<&SqlValue> {
        self.params
            .iter()
            .find(|param| param.name.eq_ignore_ascii_case(name))
            .map(|param| &param.value)
    }
}

/// Materialized reader result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl RowSet {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Dialect-specific connection.
pub trait SqlConnection: Send {
    /// Parameter-name prefix of this dialect (`:`, `@`, `?`...).
    fn param_prefix(&self) -> &str;

    fn open(&mut self) -> DbResult<()>;

    fn close(&mut self);

    fn is_open(&self) -> bool;

    fn create_command(&self, text: &str) -> SqlCommand {
        SqlCommand::new(text)
    }

    /// Executes a statement and fills output parameters.
    fn execute_non_query(&mut self, command: &mut SqlCommand) -> DbResult<usize>;

    fn execute_reader(&mut self, command: &SqlCommand) -> DbResult<RowSet>;
}

/// Creates unopened connections for one connection string.
pub trait ConnectionFactory: Send + Sync {
    fn create(&self) -> DbResult<Box<dyn SqlConnection>>;
}

/// Open connection that is closed when the scope ends.
pub struct ConnectionScope {
    connection: Box<dyn SqlConnection>,
}

impl ConnectionScope {
    pub fn acquire(factory: &dyn ConnectionFactory) -> DbResult<Self> {
        let mut connection = factory.create()?;
        connection.open()?;
        Ok(Self { connection })
    }

    pub fn connection(&mut self) -> &mut dyn SqlConnection {
        self.connection.as_mut()
    }
}

impl Drop for ConnectionScope {
    fn drop(&mut self) {
        self.connection.close();
    }
}
