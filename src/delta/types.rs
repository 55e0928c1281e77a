//! Document envelope exchanged with remote observers

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::core::error::Result;
use crate::core::types::Revision;
use crate::schema::StateSchema;

/// Full or delta document
///
/// ```json
/// {
///   "revision": 7,
///   "schema": { "elements": [ { "key": "timestep", "shape": { "type": "integer" } } ] },
///   "state": [ { "key": "timestep", "value": 41 } ],
///   "layout": { "kind": "vbox" }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModelDocument {
    /// Store revision at which the document was produced
    #[serde(default)]
    pub revision: Revision,
    /// Description of every exposed element
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<StateSchema>,
    /// Values of the elements carried by this document, in key order
    #[serde(default)]
    pub state: Vec<StateEntry>,
    /// Opaque presentation blob, passed through unexamined
    #[serde(default, skip_serializing_if = "Json::is_null")]
    pub layout: Json,
}

impl ModelDocument {
    /// Parse a document from raw bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Serialise the document
    pub fn to_bytes(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Whether the document carries no element values
    pub fn is_noop(&self) -> bool {
        self.state.is_empty()
    }

    /// Value carried for `key`, if any
    pub fn value(&self, key: &str) -> Option<&Json> {
        self.state.iter().find(|e| e.key == key).map(|e| &e.value)
    }

    /// Keys carried by the state section, in document order
    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.state.iter().map(|e| e.key.as_str())
    }
}

/// One element value inside a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEntry {
    /// Element key
    pub key: String,
    /// Wire form of the value
    pub value: Json,
}

/// Outcome of applying an inbound document
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ApplyReport {
    /// Keys that were updated, in application order
    pub applied: Vec<String>,
    /// Keys skipped because the store does not expose them
    pub ignored: Vec<String>,
    /// Store revision after the last update
    pub revision: Revision,
}
