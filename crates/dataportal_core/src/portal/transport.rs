//! Remote call plumbing: transports, connectors and payload serializers.
//!
//! # Responsibility
//! - Define `invoke(operation, payload) -> payload` as the only remote surface.
//! - Keep payload encoding pluggable and separate from the transport.
//! - Provide an in-process loopback transport wired to a `PortalServer`.
//!
//! # Invariants
//! - Transport failures are `TransportError`; operation failures travel back
//!   inside the response payload as a fault.

use crate::error::{DataError, DataResult};
use crate::portal::message::{PortalRequest, PortalResponse};
use crate::portal::server::PortalServer;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("endpoint `{endpoint}` is unreachable: {reason}")]
    Unreachable { endpoint: String, reason: String },
    #[error("transport protocol error: {0}")]
    Protocol(String),
}

/// One remote endpoint.
pub trait Transport: Send + Sync {
    fn endpoint(&self) -> &str;

    fn invoke(&self, operation: &str, payload: Vec<u8>) -> Result<Vec<u8>, TransportError>;
}

/// Opens transports for configured endpoint URLs.
pub trait TransportConnector: Send + Sync {
    fn connect(&self, endpoint: &str) -> Result<Arc<dyn Transport>, TransportError>;
}

/// Encodes portal envelopes into opaque payload bytes.
pub trait PayloadSerializer: Send + Sync {
    fn encode_request(&self, request: &PortalRequest) -> DataResult<Vec<u8>>;

    fn decode_request(&self, payload: &[u8]) -> DataResult<PortalRequest>;

    fn encode_response(&self, response: &PortalResponse) -> DataResult<Vec<u8>>;

    fn decode_response(&self, payload: &[u8]) -> DataResult<PortalResponse>;
}

/// JSON payloads via `serde_json`.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonPayloadSerializer;

impl PayloadSerializer for JsonPayloadSerializer {
    fn encode_request(&self, request: &PortalRequest) -> DataResult<Vec<u8>> {
        Ok(serde_json::to_vec(request)?)
    }

    fn decode_request(&self, payload: &[u8]) -> DataResult<PortalRequest> {
        Ok(serde_json::from_slice(payload)?)
    }

    fn encode_response(&self, response: &PortalResponse) -> DataResult<Vec<u8>> {
        Ok(serde_json::to_vec(response)?)
    }

    fn decode_response(&self, payload: &[u8]) -> DataResult<PortalResponse> {
        if payload.is_empty() {
            return Err(DataError::Serialization("empty response payload".to_string()));
        }
        Ok(serde_json::from_slice(payload)?)
    }
}

/// Transport that hands payloads straight to an in-process server.
pub struct LoopbackTransport {
    endpoint: String,
    server: Arc<PortalServer>,
    calls: AtomicUsize,
}

impl LoopbackTransport {
    pub fn new(endpoint: impl Into<String>, server: Arc<PortalServer>) -> Self {
        Self {
            endpoint: endpoint.into(),
            server,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of `invoke` calls served so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Transport for LoopbackTransport {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn invoke(&self, operation: &str, payload: Vec<u8>) -> Result<Vec<u8>, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.server.handle(operation, &payload))
    }
}

/// Connector resolving endpoints to registered loopback transports.
#[derive(Default)]
pub struct LoopbackConnector {
    transports: RwLock<HashMap<String, Arc<LoopbackTransport>>>,
}

impl LoopbackConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `endpoint` with `server`; returns the transport for inspection.
    pub fn serve(&self, endpoint: &str, server: Arc<PortalServer>) -> Arc<LoopbackTransport> {
        let transport = Arc::new(LoopbackTransport::new(endpoint, server));
        self.transports
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(endpoint.to_string(), Arc::clone(&transport));
        transport
    }
}

impl TransportConnector for LoopbackConnector {
    fn connect(&self, endpoint: &str) -> Result<Arc<dyn Transport>, TransportError> {
        self.transports
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(endpoint)
            .map(|transport| Arc::clone(transport) as Arc<dyn Transport>)
            .ok_or_else(|| TransportError::Unreachable {
                endpoint: endpoint.to_string(),
                reason: "no loopback server registered".to_string(),
            })
    }
}
