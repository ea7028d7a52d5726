//! REST error types
//!
//! 429 and early 502 responses never surface here; they are retried by the
//! handler. Everything else a caller can observe is a [`RestError`].

use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Result alias for REST operations
pub type RestResult<T> = Result<T, RestError>;

#[derive(Debug, Error)]
pub enum RestError {
    #[error("invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("no token is configured for an authenticated request")]
    MissingToken,

    #[error("invalid image for {field}: {reason}")]
    InvalidImage { field: String, reason: String },

    /// Error response carrying a structured `code`
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Error response without a structured body
    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("request timed out after {timeout_ms}ms on {method} {path}")]
    Timeout {
        method: String,
        path: String,
        timeout_ms: u64,
    },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("request was cancelled before it could be sent")]
    Cancelled,
}

impl RestError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// HTTP status of an error response
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api(e) => Some(e.status),
            Self::Http(e) => Some(e.status),
            _ => None,
        }
    }

    /// Structured API error code
    pub fn code(&self) -> Option<i64> {
        match self {
            Self::Api(e) => Some(e.code),
            _ => None,
        }
    }
}

/// Error response whose JSON body carries a `code`
#[derive(Debug, Clone, PartialEq)]
pub struct ApiError {
    pub code: i64,
    pub status: u16,
    pub method: String,
    pub path: String,
    pub message: String,
    /// Field errors flattened to `path.to.field: message`
    pub errors: Vec<String>,
    pub body: Value,
}

impl ApiError {
    /// Build from a response body; `None` unless the body has an integer `code`
    pub fn from_body(method: &str, path: &str, status: u16, body: &Value) -> Option<Self> {
        let code = body.get("code")?.as_i64()?;
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let mut errors = Vec::new();
        flatten_errors(body.get("errors").unwrap_or(body), "", &mut errors);

        Some(Self {
            code,
            status,
            method: method.to_string(),
            path: path.to_string(),
            message,
            errors,
            body: body.clone(),
        })
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "API error [{}]: {} on {} {}",
            self.code, self.message, self.method, self.path
        )?;
        for error in &self.errors {
            write!(f, "\n  {error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ApiError {}

/// Error response without a structured body
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{status} {status_text} on {method} {path}")]
pub struct HttpError {
    pub status: u16,
    pub status_text: String,
    pub method: String,
    pub path: String,
    pub body: Option<Value>,
}

/// Walk nested validation errors, keying each message by its dotted path
fn flatten_errors(value: &Value, prefix: &str, out: &mut Vec<String>) {
    let Value::Object(map) = value else {
        return;
    };

    for (key, child) in map {
        if key == "message" || key == "code" {
            continue;
        }

        if key == "_errors" {
            if let Value::Array(items) = child {
                let messages: Vec<&str> = items
                    .iter()
                    .filter_map(|item| item.get("message").and_then(Value::as_str))
                    .collect();
                if !messages.is_empty() {
                    out.push(format!("{prefix}: {}", messages.join("\n")));
                }
            }
            continue;
        }

        let path = if prefix.is_empty() {
            key.clone()
        } else if key.parse::<usize>().is_ok() {
            format!("{prefix}[{key}]")
        } else {
            format!("{prefix}.{key}")
        };

        match child {
            Value::Object(_) => flatten_errors(child, &path, out),
            Value::Array(items) => {
                let messages: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
                if !messages.is_empty() {
                    out.push(format!("{path}: {}", messages.join("\n")));
                }
            }
            Value::String(message) => out.push(format!("{path}: {message}")),
            _ => {}
        }
    }
}
