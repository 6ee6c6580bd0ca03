//! Wire types shared by the HTTP and WebSocket surfaces.
//!
//! Vertices travel as JSON objects:
//! ```text
//! { "id": "v3", "data": "...", "parents": ["v1", "v2"] }
//! ```
//! `parents` is omitted on output when empty and defaults to `[]` on input.
//!
//! A frontier travels in the `after` query parameter as a comma-separated
//! list of vertex ids (`?after=v1,v2`).

use serde::{Deserialize, Serialize};

/// An immutable vertex of a causal document graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vertex {
    /// Unique within a document
    pub id: String,
    /// Opaque payload, `""` when absent
    #[serde(default)]
    pub data: String,
    /// Causal parents, in declaration order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<String>,
}

impl Vertex {
    /// Create a vertex with the given parents.
    pub fn new<I, S>(id: impl Into<String>, data: impl Into<String>, parents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            data: data.into(),
            parents: parents.into_iter().map(Into::into).collect(),
        }
    }

    /// Create a root vertex (no parents).
    pub fn root(id: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            data: data.into(),
            parents: Vec::new(),
        }
    }

    /// Parse a vertex from a JSON request body.
    pub fn from_json(bytes: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::InvalidBody(e.to_string()))
    }

    /// Encode as a JSON text frame.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }
}

/// Split the `after` query parameter into frontier ids.
///
/// A missing or empty parameter is a validation error. Empty segments are
/// kept: they name no vertex and so contribute nothing to the closure.
pub fn parse_frontier(after: Option<&str>) -> Result<Vec<String>, ProtocolError> {
    match after {
        Some(raw) if !raw.is_empty() => Ok(raw.split(',').map(str::to_owned).collect()),
        _ => Err(ProtocolError::MissingAfter),
    }
}

/// Request validation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Missing after parameter")]
    MissingAfter,
    #[error("Invalid request body: {0}")]
    InvalidBody(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}
