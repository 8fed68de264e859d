//! Local and remote dispatch behind one CRUD capability.
//!
//! # Invariants
//! - A remote fault response is re-raised as `DataError::Remote` with its kind.
//! - Written entities come back from the peer so generated keys survive.

use crate::access::DataAccess;
use crate::error::{DataError, DataResult};
use crate::model::entity::Entity;
use crate::portal::message::{PortalRequest, PortalResponse};
use crate::portal::transport::{PayloadSerializer, Transport};
use log::debug;
use std::marker::PhantomData;
use std::sync::Arc;

/// CRUD surface shared by local and remote dispatch.
pub trait CrudCapability<E: Entity>: Send + Sync {
    fn get(&self, key: &str) -> DataResult<Option<E>>;

    fn query(&self, sql: &str) -> DataResult<Vec<E>>;

    fn insert(&self, entity: &mut E) -> DataResult<usize>;

    fn update(&self, entity: &mut E) -> DataResult<usize>;

    fn delete(&self, entity: &E) -> DataResult<usize>;
}

impl<E: Entity> CrudCapability<E> for DataAccess<E> {
    fn get(&self, key: &str) -> DataResult<Option<E>> {
        DataAccess::get(self, key)
    }

    fn query(&self, sql: &str) -> DataResult<Vec<E>> {
        DataAccess::query(self, sql)
    }

    fn insert(&self, entity: &mut E) -> DataResult<usize> {
        DataAccess::insert(self, entity)
    }

    fn update(&self, entity: &mut E) -> DataResult<usize> {
        DataAccess::update(self, entity)
    }

    fn delete(&self, entity: &E) -> DataResult<usize> {
        DataAccess::delete(self, entity)
    }
}

/// Serializes calls over a transport and re-raises returned faults.
pub struct RemoteDispatcher<E> {
    transport: Arc<dyn Transport>,
    serializer: Arc<dyn PayloadSerializer>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> RemoteDispatcher<E> {
    pub fn new(transport: Arc<dyn Transport>, serializer: Arc<dyn PayloadSerializer>) -> Self {
        Self {
            transport,
            serializer,
            _entity: PhantomData,
        }
    }

    pub fn endpoint(&self) -> &str {
        self.transport.endpoint()
    }

    fn call(&self, request: PortalRequest) -> DataResult<PortalResponse> {
        let operation = request.operation();
        let payload = self.serializer.encode_request(&request)?;
        let reply = self.transport.invoke(operation.as_str(), payload)?;
        let response = self.serializer.decode_response(&reply)?;
        debug!(
            "event=portal_call module=portal status={} entity={} operation={} endpoint={}",
            response.label(),
            E::TYPE_NAME,
            operation,
            self.transport.endpoint()
        );
        match response {
            PortalResponse::Fault(fault) => Err(DataError::Remote(fault)),
            other => Ok(other),
        }
    }

    fn written(&self, request: PortalRequest, entity: Option<&mut E>) -> DataResult<usize> {
        match self.call(request)? {
            PortalResponse::Written { rows, model } => {
                if let (Some(entity), Some(model)) = (entity, model) {
                    *entity = serde_json::from_value(model)?;
                }
                Ok(rows)
            }
            other => Err(unexpected("written", &other)),
        }
    }
}

fn unexpected(expected: &str, response: &PortalResponse) -> DataError {
    DataError::Serialization(format!(
        "expected `{expected}` response, got `{}`",
        response.label()
    ))
}

impl<E: Entity> CrudCapability<E> for RemoteDispatcher<E> {
    fn get(&self, key: &str) -> DataResult<Option<E>> {
        let request = PortalRequest::Get {
            entity: E::TYPE_NAME.to_string(),
            key: key.to_string(),
        };
        match self.call(request)? {
            PortalResponse::Model(model) => {
                Ok(model.map(serde_json::from_value::<E>).transpose()?)
            }
            other => Err(unexpected("model", &other)),
        }
    }

    fn query(&self, sql: &str) -> DataResult<Vec<E>> {
        let request = PortalRequest::Query {
            entity: E::TYPE_NAME.to_string(),
            sql: sql.to_string(),
        };
        match self.call(request)? {
            PortalResponse::Models(models) => models
                .into_iter()
                .map(|model| serde_json::from_value(model).map_err(DataError::from))
                .collect(),
            other => Err(unexpected("models", &other)),
        }
    }

    fn insert(&self, entity: &mut E) -> DataResult<usize> {
        let request = PortalRequest::Insert {
            entity: E::TYPE_NAME.to_string(),
            model: serde_json::to_value(&*entity)?,
        };
        self.written(request, Some(entity))
    }

    fn update(&self, entity: &mut E) -> DataResult<usize> {
        let request = PortalRequest::Update {
            entity: E::TYPE_NAME.to_string(),
            model: serde_json::to_value(&*entity)?,
        };
        self.written(request, Some(entity))
    }

    fn delete(&self, entity: &E) -> DataResult<usize> {
        let request = PortalRequest::Delete {
            entity: E::TYPE_NAME.to_string(),
            model: serde_json::to_value(entity)?,
        };
        self.written(request, None)
    }
}

/// Dispatch target selected once per entity type.
pub enum Dispatcher<E> {
    Local(Arc<DataAccess<E>>),
    Remote(RemoteDispatcher<E>),
}

impl<E: Entity> Dispatcher<E> {
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }

    fn target(&self) -> &dyn CrudCapability<E> {
        match self {
            Self::Local(engine) => engine.as_ref(),
            Self::Remote(remote) => remote,
        }
    }
}

impl<E: Entity> CrudCapability<E> for Dispatcher<E> {
    fn get(&self, key: &str) -> DataResult<Option<E>> {
        self.target().get(key)
    }

    fn query(&self, sql: &str) -> DataResult<Vec<E>> {
        self.target().query(sql)
    }

    fn insert(&self, entity: &mut E) -> DataResult<usize> {
        self.target().insert(entity)
    }

    fn update(&self, entity: &mut E) -> DataResult<usize> {
        self.target().update(entity)
    }

    fn delete(&self, entity: &E) -> DataResult<usize> {
        self.target().delete(entity)
    }
}
