//! Parsed response bodies

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Body of a successful response
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    /// 204 or a zero-length body
    Empty,
    Json(Value),
    /// Any non-JSON content, passed through untouched
    Binary(Vec<u8>),
}

impl ResponseBody {
    /// Classify a raw body by status and content type
    pub fn parse(status: u16, content_type: Option<&str>, bytes: &[u8]) -> serde_json::Result<Self> {
        if status == 204 || bytes.is_empty() {
            return Ok(Self::Empty);
        }

        let is_json = content_type
            .is_some_and(|ct| ct.trim_start().to_ascii_lowercase().starts_with("application/json"));
        if is_json {
            serde_json::from_slice(bytes).map(Self::Json)
        } else {
            Ok(Self::Binary(bytes.to_vec()))
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_json(self) -> Option<Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Deserialize a JSON body; an empty body reads as `null`
    pub fn deserialize<T: DeserializeOwned>(self) -> serde_json::Result<T> {
        match self {
            Self::Json(value) => serde_json::from_value(value),
            Self::Empty => serde_json::from_value(Value::Null),
            Self::Binary(bytes) => serde_json::from_slice(&bytes),
        }
    }
}
