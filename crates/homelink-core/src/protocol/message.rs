//! JSON payload types for the device command protocol.
//!
//! Every authenticated packet body is a JSON-RPC-style object.  Requests
//! are `{"id", "method", "params"}`; responses mirror the id and carry
//! either `"result"` or `"error": {"code", "message"}`.  The correlation
//! id is how asynchronous responses are matched back to their calls.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Well-known method names understood by most device firmwares.
pub mod methods {
    /// Returns the device's model, firmware and network information.
    pub const INFO: &str = "info";
    /// Legacy property read: params is an array of property names.
    pub const GET_PROP: &str = "get_prop";
    /// Service/property-id addressed read (`did`/`siid`/`piid` objects).
    pub const GET_PROPERTIES: &str = "get_properties";
    /// Service/property-id addressed write.
    pub const SET_PROPERTIES: &str = "set_properties";
    /// Service/action-id addressed invocation.
    pub const ACTION: &str = "action";
}

/// An outgoing command: `{"id": N, "method": "...", "params": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: u64,
    pub method: String,
    pub params: Value,
}

impl RpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            id,
            method: method.into(),
            params,
        }
    }
}

/// A device-reported failure, propagated verbatim to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("device error {code}: {message}")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

/// An inbound response: `{"id": N, "result": ...}` or
/// `{"id": N, "error": {"code", "message"}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    /// Splits the response into the success value or the device error.
    ///
    /// A response carrying neither field resolves to `Value::Null` — some
    /// firmwares acknowledge writes with a bare `{"id"}` object.
    pub fn into_result(self) -> Result<Value, RpcError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Read address of one service-described property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyRef {
    pub did: u64,
    pub siid: u32,
    pub piid: u32,
}

/// Write form of [`PropertyRef`] with the target value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyValue {
    pub did: u64,
    pub siid: u32,
    pub piid: u32,
    pub value: Value,
}

/// Invocation of a service-described action with positional arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionCall {
    pub did: u64,
    pub siid: u32,
    pub aiid: u32,
    #[serde(rename = "in")]
    pub args: Vec<Value>,
}
