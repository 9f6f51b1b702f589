//! Service Definitions
//!
//! A service names one remote call: its url template, HTTP method, the
//! middleware that applies to it and the default payload merged into every
//! call. Definitions are immutable once registered and shared behind `Arc`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PipeError;
use crate::merge::AssignPolicy;
use crate::stack::Named;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = PipeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            "HEAD" => Ok(Method::Head),
            "OPTIONS" => Ok(Method::Options),
            other => Err(PipeError::InvalidService(format!(
                "unsupported method '{other}'"
            ))),
        }
    }
}

/// Default payload merged into every call of a service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceDefaults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default)]
    pub assign: AssignPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub method: Method,
    /// Names of the middleware that apply to this service. `None` means the
    /// whole global middleware stack.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub middleware: Option<Vec<String>>,
    #[serde(default)]
    pub default: ServiceDefaults,
}

impl ServiceDefinition {
    pub fn new(name: impl Into<String>, url: impl Into<String>, method: Method) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            method,
            middleware: None,
            default: ServiceDefaults::default(),
        }
    }

    pub fn with_middleware<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.middleware = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_defaults(mut self, default: ServiceDefaults) -> Self {
        self.default = default;
        self
    }
}

impl Named for ServiceDefinition {
    fn name(&self) -> &str {
        &self.name
    }
}

/// A service as it appears in configuration: either the full object form or
/// the compact `[name, url]` / `[name, url, method]` array form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServiceSpec {
    Object(ServiceDefinition),
    Array(Vec<String>),
}

impl TryFrom<ServiceSpec> for ServiceDefinition {
    type Error = PipeError;

    fn try_from(spec: ServiceSpec) -> Result<Self, Self::Error> {
        match spec {
            ServiceSpec::Object(definition) => Ok(definition),
            ServiceSpec::Array(parts) => match parts.as_slice() {
                [name, url] => Ok(ServiceDefinition::new(name, url, Method::Get)),
                [name, url, method] => Ok(ServiceDefinition::new(name, url, method.parse()?)),
                _ => Err(PipeError::InvalidService(format!(
                    "array services take [name, url] or [name, url, method], got {} entries",
                    parts.len()
                ))),
            },
        }
    }
}

impl From<ServiceDefinition> for ServiceSpec {
    fn from(definition: ServiceDefinition) -> Self {
        ServiceSpec::Object(definition)
    }
}
