//! RPC reply envelope handed back to the transport

use serde::{Deserialize, Serialize};

use crate::error::IpcError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyState {
    Success,
    Error,
}

/// `{"state": "success"|"error", "output": <text or null>}`
///
/// The state is derived from the presence of output: a reply carries output
/// exactly when the invocation succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcReply {
    pub state: ReplyState,
    pub output: Option<String>,
}

impl RpcReply {
    pub fn from_output(output: Option<String>) -> Self {
        let state = if output.is_some() {
            ReplyState::Success
        } else {
            ReplyState::Error
        };
        Self { state, output }
    }

    pub fn success(output: impl Into<String>) -> Self {
        Self::from_output(Some(output.into()))
    }

    pub fn error() -> Self {
        Self::from_output(None)
    }

    pub fn is_success(&self) -> bool {
        self.state == ReplyState::Success
    }

    pub fn to_json(&self) -> Result<String, IpcError> {
        Ok(serde_json::to_string(self)?)
    }
}
