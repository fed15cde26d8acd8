//! Request descriptions and their outcomes.

use crate::error::{RequestError, VaultError, VaultResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Request unique identifier, stable across reposts.
pub type RequestId = Uuid;

/// HTTP method of a backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A serializable description of a backend call.
///
/// This is what the vault persists. The completion handling attached at
/// dispatch time lives in the vault and is never part of the description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Identifier used to correlate retries in logs
    pub id: RequestId,

    /// HTTP method
    pub method: HttpMethod,

    /// Resource path, relative to the API root
    pub path: String,

    /// Query or form parameters
    #[serde(default)]
    pub params: BTreeMap<String, String>,

    /// Optional JSON body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,

    /// User the request is made on behalf of
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl Request {
    /// Create a new request.
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            method,
            path: path.into(),
            params: BTreeMap::new(),
            body: None,
            user_id: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Put, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Patch, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, path)
    }

    /// Add a parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Set the JSON body.
    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Make the request on behalf of a user.
    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Serialize into a job description.
    pub fn to_json(&self) -> VaultResult<String> {
        serde_json::to_string(self).map_err(|e| VaultError::Serialization(e.to_string()))
    }

    /// Rebuild a request from a job description.
    pub fn from_json(description: &str) -> VaultResult<Self> {
        serde_json::from_str(description).map_err(|e| VaultError::Deserialization(e.to_string()))
    }
}

/// Backend response.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Response {
    /// HTTP status, when one was received
    pub status: Option<u16>,

    /// Response body
    pub body: serde_json::Value,
}

impl Response {
    pub fn new(status: u16, body: serde_json::Value) -> Self {
        Self {
            status: Some(status),
            body,
        }
    }

    /// A response that only carries a message, with no status.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            status: None,
            body: serde_json::Value::String(message.into()),
        }
    }
}

/// A failed request: the classified error plus whatever response came back.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestFailure {
    pub error: RequestError,
    pub response: Option<Response>,
}

impl RequestFailure {
    pub fn new(error: RequestError) -> Self {
        Self {
            error,
            response: None,
        }
    }

    pub fn with_response(mut self, response: Response) -> Self {
        self.response = Some(response);
        self
    }
}

impl From<RequestError> for RequestFailure {
    fn from(error: RequestError) -> Self {
        Self::new(error)
    }
}

impl fmt::Display for RequestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

/// Result of executing a request.
pub type Outcome = Result<Response, RequestFailure>;
