//! Wire messages exchanged between remote dispatcher and portal server.

use crate::error::RemoteFault;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{Display, Formatter};

/// CRUD operation name sent as the transport operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Get,
    Query,
    Insert,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "Get",
            Self::Query => "Query",
            Self::Insert => "Insert",
            Self::Update => "Update",
            Self::Delete => "Delete",
        }
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request envelope; entities travel as serde values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PortalRequest {
    Get { entity: String, key: String },
    Query { entity: String, sql: String },
    Insert { entity: String, model: Value },
    Update { entity: String, model: Value },
    Delete { entity: String, model: Value },
}

impl PortalRequest {
    pub fn operation(&self) -> Operation {
        match self {
            Self::Get { .. } => Operation::Get,
            Self::Query { .. } => Operation::Query,
            Self::Insert { .. } => Operation::Insert,
            Self::Update { .. } => Operation::Update,
            Self::Delete { .. } => Operation::Delete,
        }
    }

    pub fn entity(&self) -> &str {
        match self {
            Self::Get { entity, .. }
            | Self::Query { entity, .. }
            | Self::Insert { entity, .. }
            | Self::Update { entity, .. }
            | Self::Delete { entity, .. } => entity,
        }
    }
}

/// Response envelope: a result value or a fault carried as data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "body", rename_all = "snake_case")]
pub enum PortalResponse {
    Model(Option<Value>),
    Models(Vec<Value>),
    /// Write result with the entity as written (generated key, stamps).
    Written { rows: usize, model: Option<Value> },
    Fault(RemoteFault),
}

impl PortalResponse {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Model(_) => "model",
            Self::Models(_) => "models",
            Self::Written { .. } => "written",
            Self::Fault(_) => "fault",
        }
    }
}
