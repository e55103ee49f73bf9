// File: src/error.rs
// Purpose: Server function errors and their wire envelope

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

/// Length of the correlation id attached to unexpected errors
pub const CORRELATION_ID_LEN: usize = 8;

pub const OPERATIONAL_ERROR: &str = "OperationalError";
pub const UNEXPECTED_ERROR: &str = "UnexpectedError";
pub const NOT_FOUND_ERROR: &str = "NotFound";
pub const BAD_REQUEST_ERROR: &str = "BadRequest";

/// Error produced by a server function or the transport around it
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ServerError {
    /// An expected failure; the code reaches the client unchanged
    #[error("{message}")]
    Operational { code: String, message: String },

    /// A crash; only the correlation id is guaranteed to reach the client
    #[error("{message} (ref {correlation_id})")]
    Unexpected {
        message: String,
        correlation_id: String,
    },

    #[error("no server function with id `{0}`")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),
}

impl ServerError {
    pub fn operational(code: impl Into<String>, message: impl Into<String>) -> Self {
        ServerError::Operational {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Wraps a crash with a fresh correlation id
    pub fn unexpected(err: impl std::fmt::Display) -> Self {
        ServerError::Unexpected {
            message: err.to_string(),
            correlation_id: correlation_id(),
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            ServerError::Operational { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Logs the error at the level its kind deserves
    ///
    /// Operational errors are part of normal control flow and only show up
    /// at debug level.
    pub fn log(&self, function_id: &str) {
        match self {
            ServerError::Operational { code, message } => {
                debug!(function = function_id, code = %code, "operational error: {}", message);
            }
            ServerError::Unexpected {
                message,
                correlation_id,
            } => {
                error!(function = function_id, correlation_id = %correlation_id, "server function crashed: {}", message);
            }
            other => debug!(function = function_id, "{}", other),
        }
    }

    /// Converts to the envelope sent to clients
    ///
    /// In production an unexpected error's message is replaced by a generic
    /// one; the correlation id is always kept.
    pub fn to_payload(&self, production: bool) -> ErrorPayload {
        match self {
            ServerError::Operational { code, message } => ErrorPayload {
                name: OPERATIONAL_ERROR.to_string(),
                message: message.clone(),
                code: Some(code.clone()),
                correlation_id: None,
            },
            ServerError::Unexpected {
                message,
                correlation_id,
            } => ErrorPayload {
                name: UNEXPECTED_ERROR.to_string(),
                message: if production {
                    format!("Internal server error (ref {})", correlation_id)
                } else {
                    message.clone()
                },
                code: None,
                correlation_id: Some(correlation_id.clone()),
            },
            ServerError::NotFound(_) => ErrorPayload {
                name: NOT_FOUND_ERROR.to_string(),
                message: self.to_string(),
                code: None,
                correlation_id: None,
            },
            ServerError::BadRequest(_) => ErrorPayload {
                name: BAD_REQUEST_ERROR.to_string(),
                message: self.to_string(),
                code: None,
                correlation_id: None,
            },
        }
    }
}

/// Error envelope as it travels over the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl From<ErrorPayload> for ServerError {
    fn from(payload: ErrorPayload) -> Self {
        match payload.name.as_str() {
            OPERATIONAL_ERROR => ServerError::Operational {
                code: payload.code.unwrap_or_default(),
                message: payload.message,
            },
            NOT_FOUND_ERROR => ServerError::NotFound(payload.message),
            BAD_REQUEST_ERROR => ServerError::BadRequest(payload.message),
            _ => ServerError::Unexpected {
                message: payload.message,
                correlation_id: payload.correlation_id.unwrap_or_default(),
            },
        }
    }
}

/// First 8 characters of a fresh UUID v4
pub fn correlation_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(CORRELATION_ID_LEN);
    id
}
