//! SQLite driver for the connection abstraction.
//!
//! # Responsibility
//! - Open file-backed SQLite connections with the pragmas core relies on.
//! - Bind named parameters and materialize reader results.
//!
//! # Invariants
//! - Open connections have `foreign_keys=ON` and a 5s busy timeout.
//! - Output parameters receive `last_insert_rowid()` after execution.

use super::{
    ConnectionFactory, DbError, DbResult, ParamDirection, RowSet, SqlCommand, SqlConnection,
    SqlParam,
};
use crate::model::value::SqlValue;
use log::{debug, error};
use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::{Connection, Statement, ToSql};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const PARAM_PREFIX: &str = ":";
const DATA_SOURCE_KEYS: [&str; 2] = ["data source", "datasource"];
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Owned(Value::Null),
            Self::Integer(value) => ToSqlOutput::Owned(Value::Integer(*value)),
            Self::Real(value) => ToSqlOutput::Owned(Value::Real(*value)),
            Self::Text(value) => ToSqlOutput::Borrowed(ValueRef::Text(value.as_bytes())),
            Self::Blob(value) => ToSqlOutput::Borrowed(ValueRef::Blob(value)),
        })
    }
}

fn from_value_ref(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(number) => SqlValue::Integer(number),
        ValueRef::Real(number) => SqlValue::Real(number),
        ValueRef::Text(bytes) => SqlValue::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => SqlValue::Blob(bytes.to_vec()),
    }
}

/// One SQLite database file.
pub struct SqliteConnection {
    path: PathBuf,
    conn: Option<Connection>,
}

impl SqliteConnection {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            conn: None,
        }
    }

    fn live(&self) -> DbResult<&Connection> {
        self.conn.as_ref().ok_or(DbError::NotOpen)
    }
}

fn bind_params(statement: &mut Statement<'_>, params: &[SqlParam]) -> DbResult<()> {
    for param in params {
        let placeholder = format!("{PARAM_PREFIX}{}", param.name);
        let index = statement.parameter_index(&placeholder)?;
        match (index, param.direction) {
            (Some(index), ParamDirection::Input | ParamDirection::InputOutput) => {
                statement.raw_bind_parameter(index, &param.value)?;
            }
            (None, ParamDirection::Input) => {
                return Err(DbError::UnknownParameter(param.name.clone()));
            }
            _ => {}
        }
    }
    Ok(())
}

impl SqlConnection for SqliteConnection {
    fn param_prefix(&self) -> &str {
        PARAM_PREFIX
    }

    fn open(&mut self) -> DbResult<()> {
        if self.conn.is_some() {
            return Ok(());
        }
        let started_at = Instant::now();
        let conn = Connection::open(&self.path).and_then(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            conn.busy_timeout(BUSY_TIMEOUT)?;
            Ok(conn)
        });
        match conn {
            Ok(conn) => {
                debug!(
                    "event=db_open module=db status=ok mode=file duration_ms={}",
                    started_at.elapsed().as_millis()
                );
                self.conn = Some(conn);
                Ok(())
            }
            Err(err) => {
                error!(
                    "event=db_open module=db status=error mode=file duration_ms={} error_code=db_open_failed error={}",
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err.into())
            }
        }
    }

    fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err((_, err)) = conn.close() {
                error!("event=db_close module=db status=error error={err}");
            }
        }
    }

    fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    fn execute_non_query(&mut self, command: &mut SqlCommand) -> DbResult<usize> {
        let conn = self.live()?;
        let mut statement = conn.prepare(&command.text)?;
        bind_params(&mut statement, &command.params)?;
        let affected = statement.raw_execute()?;

        if command
            .params
            .iter()
            .any(|param| param.direction != ParamDirection::Input)
        {
            let generated = conn.last_insert_rowid();
            for param in command
                .params
                .iter_mut()
                .filter(|param| param.direction != ParamDirection::Input)
            {
                param.value = SqlValue::Integer(generated);
            }
        }
        Ok(affected)
    }

    fn execute_reader(&mut self, command: &SqlCommand) -> DbResult<RowSet> {
        let conn = self.live()?;
        let mut statement = conn.prepare(&command.text)?;
        bind_params(&mut statement, &command.params)?;

        let columns: Vec<String> = statement
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect();
        let width = columns.len();

        let mut rows = statement.raw_query();
        let mut values = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = Vec::with_capacity(width);
            for ordinal in 0..width {
                record.push(from_value_ref(row.get_ref(ordinal)?));
            }
            values.push(record);
        }

        Ok(RowSet {
            columns,
            rows: values,
        })
    }
}

impl Drop for SqliteConnection {
    fn drop(&mut self) {
        self.close();
    }
}

/// Creates `SqliteConnection`s for one database file.
#[derive(Debug, Clone)]
pub struct SqliteConnectionFactory {
    path: PathBuf,
}

impl SqliteConnectionFactory {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Accepts either a bare path or `Data Source=<path>[;...]`.
    ///
    /// # Errors
    /// - `InvalidConnectionString` when no path can be found.
    pub fn from_connection_string(value: &str) -> DbResult<Self> {
        let trimmed = value.trim();
        if !trimmed.contains('=') {
            if trimmed.is_empty() {
                return Err(DbError::InvalidConnectionString(value.to_string()));
            }
            return Ok(Self::new(trimmed));
        }

        trimmed
            .split(';')
            .filter_map(|pair| pair.split_once('='))
            .find(|(key, _)| {
                DATA_SOURCE_KEYS
                    .iter()
                    .any(|known| key.trim().eq_ignore_ascii_case(known))
            })
            .map(|(_, path)| path.trim())
            .filter(|path| !path.is_empty())
            .map(Self::new)
            .ok_or_else(|| DbError::InvalidConnectionString(value.to_string()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConnectionFactory for SqliteConnectionFactory {
    fn create(&self) -> DbResult<Box<dyn SqlConnection>> {
        Ok(Box::new(SqliteConnection::new(&self.path)))
    }
}
