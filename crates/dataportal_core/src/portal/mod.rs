//! Location-transparent CRUD facade.
//!
//! # Responsibility
//! - Route each entity type to its local engine or a remote peer.
//! - Keep an optional portal-level cache tier in front of remote calls.
//! - Serve remote calls against local engines and return failures as data.
//!
//! # Invariants
//! - The dispatcher for a type is chosen once per environment.
//! - A portal call behaves the same whether it ran locally or remotely,
//!   error kinds included.

pub mod context;
pub mod data_portal;
pub mod dispatcher;
pub mod message;
pub mod server;
pub mod transport;

pub use context::ExecutionContext;
pub use data_portal::{DataPortal, NoHooks, PortalEnvironment, PortalHooks};
pub use dispatcher::{CrudCapability, Dispatcher, RemoteDispatcher};
pub use message::{Operation, PortalRequest, PortalResponse};
pub use server::PortalServer;
pub use transport::{
    JsonPayloadSerializer, LoopbackConnector, LoopbackTransport, PayloadSerializer, Transport,
    TransportConnector, TransportError,
};
