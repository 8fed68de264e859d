//! JSON-level view of a typed engine, dispatched by entity type name.

use crate::access::engine::DataAccess;
use crate::error::DataResult;
use crate::model::entity::Entity;
use serde_json::Value;

/// Result of a write carried back to the caller with the written entity,
/// so generated keys and stamps survive a serialization boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOutcome {
    pub rows: usize,
    pub model: Value,
}

/// Type-erased data access used by the portal server to dispatch by type name.
pub trait ErasedDataAccess: Send + Sync {
    fn type_name(&self) -> &'static str;

    fn get(&self, key: &str) -> DataResult<Option<Value>>;

    fn query(&self, sql: &str) -> DataResult<Vec<Value>>;

    fn insert(&self, model: Value) -> DataResult<WriteOutcome>;

    fn update(&self, model: Value) -> DataResult<WriteOutcome>;

    fn delete(&self, model: Value) -> DataResult<usize>;
}

impl<E: Entity> ErasedDataAccess for DataAccess<E> {
    fn type_name(&self) -> &'static str {
        E::TYPE_NAME
    }

    fn get(&self, key: &str) -> DataResult<Option<Value>> {
        DataAccess::get(self, key)?
            .map(|model| serde_json::to_value(model))
            .transpose()
            .map_err(Into::into)
    }

    fn query(&self, sql: &str) -> DataResult<Vec<Value>> {
        DataAccess::query(self, sql)?
            .into_iter()
            .map(|model| serde_json::to_value(model).map_err(Into::into))
            .collect()
    }

    fn insert(&self, model: Value) -> DataResult<WriteOutcome> {
        let mut entity: E = serde_json::from_value(model)?;
        let rows = DataAccess::insert(self, &mut entity)?;
        Ok(WriteOutcome {
            rows,
            model: serde_json::to_value(entity)?,
        })
    }

    fn update(&self, model: Value) -> DataResult<WriteOutcome> {
        let mut entity: E = serde_json::from_value(model)?;
        let rows = DataAccess::update(self, &mut entity)?;
        Ok(WriteOutcome {
            rows,
            model: serde_json::to_value(entity)?,
        })
    }

    fn delete(&self, model: Value) -> DataResult<usize> {
        let entity: E = serde_json::from_value(model)?;
        DataAccess::delete(self, &entity)
    }
}
