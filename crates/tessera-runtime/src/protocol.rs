// File: src/protocol.rs
// Purpose: Resource keys and the call request/response wire format

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorPayload;

/// Identity of a cached resource: a function id plus its arguments
///
/// Arguments are compared through their canonical JSON text. Object keys
/// serialize in sorted order, so `{"b":1,"a":2}` and `{"a":2,"b":1}` name
/// the same resource.
#[derive(Debug, Clone)]
pub struct ResourceKey {
    function_id: String,
    args: Vec<Value>,
    serialized: String,
}

impl ResourceKey {
    pub fn new(function_id: impl Into<String>, args: Vec<Value>) -> Self {
        let serialized = Value::Array(args.clone()).to_string();
        Self {
            function_id: function_id.into(),
            args,
            serialized,
        }
    }

    pub fn function_id(&self) -> &str {
        &self.function_id
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Canonical JSON of the argument array
    pub fn serialized_args(&self) -> &str {
        &self.serialized
    }

    /// Positional prefix match over `[function_id, ...args]`
    ///
    /// An empty prefix matches every key; a prefix longer than the key
    /// matches none.
    pub fn matches_prefix(&self, prefix: &[Value]) -> bool {
        let Some((first, rest)) = prefix.split_first() else {
            return true;
        };
        if first.as_str() != Some(self.function_id.as_str()) {
            return false;
        }
        rest.len() <= self.args.len() && rest.iter().zip(&self.args).all(|(p, a)| p == a)
    }
}

impl PartialEq for ResourceKey {
    fn eq(&self, other: &Self) -> bool {
        self.function_id == other.function_id && self.serialized == other.serialized
    }
}

impl Eq for ResourceKey {}

impl Hash for ResourceKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.function_id.hash(state);
        self.serialized.hash(state);
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.function_id, self.serialized)
    }
}

/// How the navigation layer should apply a redirect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedirectMode {
    #[default]
    Push,
    Replace,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redirect {
    pub url: String,
    #[serde(default)]
    pub mode: RedirectMode,
}

impl Redirect {
    pub fn push(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            mode: RedirectMode::Push,
        }
    }

    pub fn replace(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            mode: RedirectMode::Replace,
        }
    }
}

/// Body of `POST /_tessera/rpc`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRequest {
    pub id: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

/// Result of one server function call plus its side effects
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CallResponse {
    #[serde(default)]
    pub value: Value,
    /// Names of the cookies the call changed
    ///
    /// Values only travel in `Set-Cookie` headers, never in the body.
    #[serde(default)]
    pub cookies: Vec<String>,
    /// Seconds until the value is due for revalidation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire: Option<f64>,
    /// Prefixes over `[function_id, ...args]` to invalidate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalidations: Option<Vec<Vec<Value>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect: Option<Redirect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

impl CallResponse {
    pub fn value(value: Value) -> Self {
        Self {
            value,
            ..Self::default()
        }
    }

    pub fn error(error: ErrorPayload) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }
}
