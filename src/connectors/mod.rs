//! Connectors backing the host capabilities exposed to scripts.
//!
//! Native functions installed into a script context never throw across the
//! boundary. They return a JSON envelope (`{ ok, value }` or
//! `{ ok: false, code, message }`) that the JS prelude unwraps, raising an
//! `Error` inside the script on failure.

pub mod http;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error codes for hostcall failures.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HostCallErrorCode {
    InvalidRequest,
    Denied,
    Io,
    Timeout,
    Internal,
}

/// Structured error information for hostcall failures.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostCallError {
    pub code: HostCallErrorCode,
    pub message: String,
}

impl HostCallError {
    pub fn new(code: HostCallErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(HostCallErrorCode::InvalidRequest, message)
    }
}

impl fmt::Display for HostCallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for HostCallError {}

#[derive(Debug, Serialize)]
struct HostResult<'a> {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<HostCallErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
}

const SERIALIZATION_FAILED: &str =
    r#"{"ok":false,"code":"internal","message":"host result serialization failed"}"#;

/// Envelope for a successful hostcall.
pub fn host_result_ok(value: &Value) -> String {
    serde_json::to_string(&HostResult {
        ok: true,
        value: Some(value),
        code: None,
        message: None,
    })
    .unwrap_or_else(|_| SERIALIZATION_FAILED.to_string())
}

/// Envelope for a failed hostcall.
pub fn host_result_err(error: &HostCallError) -> String {
    serde_json::to_string(&HostResult {
        ok: false,
        value: None,
        code: Some(error.code),
        message: Some(&error.message),
    })
    .unwrap_or_else(|_| SERIALIZATION_FAILED.to_string())
}

/// Envelope for either outcome.
pub fn host_result(result: std::result::Result<Value, HostCallError>) -> String {
    match result {
        Ok(value) => host_result_ok(&value),
        Err(error) => host_result_err(&error),
    }
}
