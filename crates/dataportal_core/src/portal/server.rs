//! Remote end of the portal.
//!
//! # Responsibility
//! - Decode requests, run them on the engine registered for the entity type.
//! - Encode results, operation errors and panics as response payloads.

use crate::access::DataAccessFactory;
use crate::error::{DataError, DataResult, ErrorKind, RemoteFault};
use crate::portal::message::{PortalRequest, PortalResponse};
use crate::portal::transport::{JsonPayloadSerializer, PayloadSerializer};
use log::{error, warn};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

const UNKNOWN_ENTITY: &str = "unknown";

/// Remote side of the portal: runs requests against local engines.
///
/// Every failure of the requested operation, panics included, is returned
/// as a `PortalResponse::Fault` payload rather than a transport failure.
pub struct PortalServer {
    factory: Arc<DataAccessFactory>,
    serializer: Arc<dyn PayloadSerializer>,
}

impl PortalServer {
    pub fn new(factory: Arc<DataAccessFactory>) -> Self {
        Self {
            factory,
            serializer: Arc::new(JsonPayloadSerializer),
        }
    }

    pub fn with_serializer(mut self, serializer: Arc<dyn PayloadSerializer>) -> Self {
        self.serializer = serializer;
        self
    }

    pub fn factory(&self) -> &Arc<DataAccessFactory> {
        &self.factory
    }

    /// Handles one `(operation, payload)` call and returns the response payload.
    pub fn handle(&self, operation: &str, payload: &[u8]) -> Vec<u8> {
        let response = match self.serializer.decode_request(payload) {
            Ok(request) => self.run(operation, request),
            Err(err) => PortalResponse::Fault(RemoteFault::from_error(&err, UNKNOWN_ENTITY)),
        };

        match self.serializer.encode_response(&response) {
            Ok(bytes) => bytes,
            Err(err) => {
                error!(
                    "event=portal_encode module=portal status=error operation={} error={}",
                    operation, err
                );
                let fault = PortalResponse::Fault(RemoteFault::from_error(&err, UNKNOWN_ENTITY));
                self.serializer.encode_response(&fault).unwrap_or_default()
            }
        }
    }

    fn run(&self, operation: &str, request: PortalRequest) -> PortalResponse {
        let entity = request.entity().to_string();
        let outcome = catch_unwind(AssertUnwindSafe(|| self.dispatch(operation, request)));
        match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                warn!(
                    "event=portal_serve module=portal status=error operation={} entity={} error_kind={} error={}",
                    operation,
                    entity,
                    err.kind(),
                    err
                );
                PortalResponse::Fault(RemoteFault::from_error(&err, &entity))
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|text| (*text).to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                error!(
                    "event=portal_serve module=portal status=error operation={} entity={} error_kind=panic",
                    operation, entity
                );
                PortalResponse::Fault(RemoteFault {
                    kind: ErrorKind::Internal,
                    message: format!("operation panicked: {message}"),
                    entity,
                })
            }
        }
    }

    fn dispatch(&self, operation: &str, request: PortalRequest) -> DataResult<PortalResponse> {
        if !request.operation().as_str().eq_ignore_ascii_case(operation) {
            return Err(DataError::Serialization(format!(
                "operation `{operation}` does not match request `{}`",
                request.operation()
            )));
        }
        let engine = self.factory.erased(request.entity())?;

        Ok(match request {
            PortalRequest::Get { key, .. } => PortalResponse::Model(engine.get(&key)?),
            PortalRequest::Query { sql, .. } => PortalResponse::Models(engine.query(&sql)?),
            PortalRequest::Insert { model, .. } => {
                let outcome = engine.insert(model)?;
                PortalResponse::Written {
                    rows: outcome.rows,
                    model: Some(outcome.model),
                }
            }
            PortalRequest::Update { model, .. } => {
                let outcome = engine.update(model)?;
                PortalResponse::Written {
                    rows: outcome.rows,
                    model: Some(outcome.model),
                }
            }
            PortalRequest::Delete { model, .. } => PortalResponse::Written {
                rows: engine.delete(model)?,
                model: None,
            },
        })
    }
}
