//! # Capability Model
//!
//! Request/response types exchanged with capabilities and the two capability
//! ports (`TargetCapability`, `TriggerCapability`).
//!
//! Both the concrete business logic on the capability DON and the remote
//! proxies on the workflow DON implement these ports, so a workflow engine
//! cannot tell a local capability from a remote one.
//!
//! ## Payload Encoding
//!
//! Payloads are JSON. Objects serialize with sorted keys, so peers that agree
//! on a value also agree on its bytes, which is what quorum tallies compare.

use crate::{DonId, TypesError};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors delivered to capability callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    /// Error string agreed on by a quorum of remote peers, shown verbatim.
    #[error("{0}")]
    Remote(String),

    #[error("request timed out")]
    Timeout,

    #[error("capability closed")]
    Closed,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Failure raised by a local capability implementation.
    #[error("{0}")]
    Execution(String),
}

/// Workflow context attached to every request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequestMetadata {
    pub workflow_id: String,
    pub workflow_execution_id: String,
    pub workflow_owner: String,
    pub workflow_name: String,
    pub workflow_don_id: DonId,
    pub reference_id: String,
}

/// A single target invocation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CapabilityRequest {
    pub metadata: RequestMetadata,
    pub config: Value,
    pub inputs: Value,
}

/// Successful target result.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CapabilityResponse {
    pub value: Value,
}

/// Subscription to a trigger.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TriggerRegistrationRequest {
    pub trigger_id: String,
    pub metadata: RequestMetadata,
    pub config: Value,
}

/// An event emitted by a trigger.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub trigger_type: String,
    pub id: String,
    pub outputs: Value,
}

/// What a trigger pushes onto its callback channel.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TriggerResponse {
    pub event: TriggerEvent,
    pub error: Option<String>,
}

/// Outcome of a target invocation.
pub type ResponseResult = Result<CapabilityResponse, CapabilityError>;

/// Channel on which a target delivers its (single) outcome.
pub type ResponseStream = mpsc::Receiver<ResponseResult>;

/// Channel on which a trigger delivers events.
pub type TriggerStream = mpsc::Receiver<TriggerResponse>;

/// Request/response capability.
#[async_trait]
pub trait TargetCapability: Send + Sync {
    /// Start an execution; the stream yields exactly one outcome.
    async fn execute(&self, request: CapabilityRequest) -> Result<ResponseStream, CapabilityError>;
}

/// Event-source capability.
///
/// Implementations stop writing to a registration's stream only after
/// `unregister_trigger` was called for it.
#[async_trait]
pub trait TriggerCapability: Send + Sync {
    async fn register_trigger(
        &self,
        request: TriggerRegistrationRequest,
    ) -> Result<TriggerStream, CapabilityError>;

    async fn unregister_trigger(
        &self,
        request: TriggerRegistrationRequest,
    ) -> Result<(), CapabilityError>;
}

/// Encode a payload as canonical JSON bytes.
pub fn to_payload<T: Serialize>(value: &T) -> Result<Vec<u8>, TypesError> {
    serde_json::to_vec(value).map_err(|e| TypesError::Encode(e.to_string()))
}

/// Decode a JSON payload.
pub fn from_payload<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, TypesError> {
    serde_json::from_slice(bytes).map_err(|e| TypesError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_bytes_are_key_order_independent() {
        let a = CapabilityResponse {
            value: json!({"b": 1, "a": 2}),
        };
        let b = CapabilityResponse {
            value: serde_json::from_str(r#"{"a": 2, "b": 1}"#).unwrap(),
        };
        assert_eq!(to_payload(&a).unwrap(), to_payload(&b).unwrap());
    }

    #[test]
    fn test_request_decodes() {
        let request = CapabilityRequest {
            metadata: RequestMetadata {
                workflow_id: "wf".into(),
                workflow_execution_id: "exec".into(),
                ..Default::default()
            },
            config: json!({}),
            inputs: json!({"executeValue1": "aValue1"}),
        };
        let bytes = to_payload(&request).unwrap();
        let decoded: CapabilityRequest = from_payload(&bytes).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_invalid_payload_is_decode_error() {
        let result: Result<TriggerResponse, _> = from_payload(b"not json");
        assert!(matches!(result, Err(TypesError::Decode(_))));
    }

    #[test]
    fn test_remote_error_displays_verbatim() {
        let err = CapabilityError::Remote("failed to execute capability: an error".into());
        assert_eq!(err.to_string(), "failed to execute capability: an error");
        assert_eq!(CapabilityError::Timeout.to_string(), "request timed out");
    }
}
