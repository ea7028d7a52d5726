//! Request descriptors
//!
//! A [`RestRequest`] is everything the handler needs to issue one logical
//! call: method, path, body and how to authenticate. Route-specific helpers
//! build these; the handler never interprets the payload.

use crate::error::RestError;
use crate::image;
use serde_json::{Map, Value};
use std::fmt;

/// HTTP verbs accepted by the API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    /// Parse a verb case-insensitively
    pub fn parse(raw: &str) -> Result<Self, RestError> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            _ => Err(RestError::InvalidMethod(raw.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// How a request authenticates
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Auth {
    /// No `Authorization` header; never subject to the global limit
    #[default]
    None,
    /// The handler's configured token
    Default,
    /// An explicit `Authorization` value
    Token(String),
}

impl Auth {
    pub fn is_some(&self) -> bool {
        !matches!(self, Self::None)
    }
}

/// One file part of a multipart upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAttachment {
    pub name: String,
    pub contents: Vec<u8>,
    /// Form field name; defaults to `files[<index>]`
    pub field_name: Option<String>,
}

impl FileAttachment {
    pub fn new(name: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            contents: contents.into(),
            field_name: None,
        }
    }

    #[must_use]
    pub fn with_field_name(mut self, field_name: impl Into<String>) -> Self {
        self.field_name = Some(field_name.into());
        self
    }
}

/// Descriptor for one logical REST call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RestRequest {
    /// Verb as supplied; validated by the handler
    pub method: String,
    pub path: String,
    pub json: Option<Value>,
    /// Explicit multipart text fields
    pub form: Option<Vec<(String, String)>>,
    pub files: Vec<FileAttachment>,
    /// Audit log reason
    pub reason: Option<String>,
    pub auth: Auth,
    /// Jump the route's queue
    pub priority: bool,
    /// Override the computed route key
    pub route: Option<String>,
    pub query: Vec<(String, String)>,
}

impl RestRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new("GET", path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new("POST", path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new("PUT", path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new("PATCH", path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new("DELETE", path)
    }

    #[must_use]
    pub fn json(mut self, body: Value) -> Self {
        self.json = Some(body);
        self
    }

    /// Put raw image bytes into the JSON body as a data URL under `field`
    pub fn image(self, field: &str, bytes: &[u8]) -> Result<Self, RestError> {
        let url = image::to_data_url(field, bytes)?;
        self.json_field(field, Value::String(url))
    }

    /// Put a caller-built data URL into the JSON body under `field`
    pub fn image_url(self, field: &str, url: &str) -> Result<Self, RestError> {
        image::validate_data_url(field, url)?;
        self.json_field(field, Value::String(url.to_string()))
    }

    fn json_field(mut self, field: &str, value: Value) -> Result<Self, RestError> {
        match self.json.get_or_insert_with(|| Value::Object(Map::new())) {
            Value::Object(body) => {
                body.insert(field.to_string(), value);
                Ok(self)
            }
            _ => Err(RestError::InvalidImage {
                field: field.to_string(),
                reason: "request body is not a JSON object".to_string(),
            }),
        }
    }

    #[must_use]
    pub fn form_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.form
            .get_or_insert_with(Vec::new)
            .push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn file(mut self, file: FileAttachment) -> Self {
        self.files.push(file);
        self
    }

    #[must_use]
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    #[must_use]
    pub fn auth(mut self, auth: Auth) -> Self {
        self.auth = auth;
        self
    }

    /// Authenticate with the handler's token
    #[must_use]
    pub fn authenticated(self) -> Self {
        self.auth(Auth::Default)
    }

    #[must_use]
    pub fn priority(mut self, priority: bool) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn route(mut self, route: impl Into<String>) -> Self {
        self.route = Some(route.into());
        self
    }

    #[must_use]
    pub fn query(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((name.into(), value.to_string()));
        self
    }

    /// Whether the body goes out as multipart form data
    pub fn is_multipart(&self) -> bool {
        !self.files.is_empty() || self.form.is_some()
    }
}
