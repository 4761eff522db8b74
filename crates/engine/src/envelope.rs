use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{BridgeError, BridgeResult};

/// Wire form of an inbound request, as a host hands it over.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub path: String,
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
}

/// Immutable request state reachable from script code through a handle.
///
/// Header names are normalized to lowercase when the context is built, so
/// `header()` lookups are case-insensitive. Nothing mutates a context after
/// construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestContext {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    body: String,
}

impl RequestContext {
    pub fn new<I, K, V>(
        method: impl Into<String>,
        path: impl Into<String>,
        headers: I,
        body: impl Into<String>,
    ) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let headers = headers
            .into_iter()
            .map(|(name, value)| (name.as_ref().to_ascii_lowercase(), value.into()))
            .collect();
        Self {
            method: method.into(),
            path: path.into(),
            headers,
            body: body.into(),
        }
    }

    /// Build a context from a raw byte body, decoding it lossily as UTF-8.
    pub fn from_bytes<I, K, V>(
        method: impl Into<String>,
        path: impl Into<String>,
        headers: I,
        body: &[u8],
    ) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        Self::new(method, path, headers, String::from_utf8_lossy(body).into_owned())
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

impl From<RequestEnvelope> for RequestContext {
    fn from(envelope: RequestEnvelope) -> Self {
        Self::new(
            envelope.method,
            envelope.path,
            envelope.headers,
            envelope.body.unwrap_or_default(),
        )
    }
}

/// The single response a handler hands back to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseDescriptor {
    pub status: u16,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: String,
}

impl ResponseDescriptor {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// JSON body with a matching content type.
    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        Self::new(status, body.to_string()).with_header("content-type", "application/json")
    }

    /// Host-synthesized error response: `{"error": message}`.
    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Self::json(status, &serde_json::json!({ "error": message.into() }))
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// Parse a script-supplied descriptor. Shape errors and out-of-range
    /// statuses become `InvalidArgument`.
    pub fn from_script(value: serde_json::Value) -> BridgeResult<Self> {
        let response = Self::from_value(value).map_err(|err| {
            BridgeError::invalid_argument(
                "send_response",
                format!("invalid response descriptor: {err}"),
            )
        })?;
        response.validate()?;
        Ok(response)
    }

    pub fn validate(&self) -> BridgeResult<()> {
        if !(100..=599).contains(&self.status) {
            return Err(BridgeError::invalid_argument(
                "send_response",
                format!("status {} is outside 100..=599", self.status),
            ));
        }
        Ok(())
    }
}
