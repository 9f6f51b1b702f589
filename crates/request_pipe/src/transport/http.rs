//! `reqwest`-backed transport.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{CancelHandle, Transport, TransportRequest, TransportResponse};
use crate::config::RequestConfig;
use crate::error::{PipeError, TransportError};
use crate::service::Method;

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Build a client carrying the requester-wide timeout; per-call settings
    /// still arrive with each [`TransportRequest`].
    pub fn new(config: &RequestConfig) -> Result<Self, PipeError> {
        let mut builder = Client::builder();
        if let Some(timeout_ms) = config.timeout_ms {
            builder = builder.timeout(Duration::from_millis(timeout_ms));
        }
        let client = builder
            .build()
            .map_err(|e| PipeError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        request: TransportRequest,
        cancel: &CancelHandle,
    ) -> Result<TransportResponse, TransportError> {
        let url = resolve_url(request.base_url.as_deref(), &request.url)?;
        let mut builder = self
            .client
            .request(to_reqwest_method(request.method), url.clone());

        if let Some(query) = &request.query {
            builder = builder.query(&query_pairs(query)?);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        debug!(method = %request.method, %url, "Sending request");
        let started = Instant::now();

        let exchange = async {
            let response = builder.send().await.map_err(map_reqwest_error)?;
            read_response(response).await
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            result = exchange => result,
        };

        match &result {
            Ok(response) => info!(
                method = %request.method,
                %url,
                status = response.status,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Request completed"
            ),
            Err(error) => warn!(method = %request.method, %url, %error, "Request failed"),
        }
        result
    }
}

fn to_reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
        Method::Head => reqwest::Method::HEAD,
        Method::Options => reqwest::Method::OPTIONS,
    }
}

fn map_reqwest_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else if error.is_builder() {
        TransportError::InvalidRequest(error.to_string())
    } else {
        TransportError::Network(error.to_string())
    }
}

async fn read_response(response: reqwest::Response) -> Result<TransportResponse, TransportError> {
    let status = response.status();
    let headers: BTreeMap<String, String> = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect();
    let text = response.text().await.map_err(|e| TransportError::Decode(e.to_string()))?;

    if !status.is_success() {
        return Err(TransportError::Status {
            status: status.as_u16(),
            body: text,
        });
    }

    let body = if text.is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&text).unwrap_or(Value::String(text))
    };

    Ok(TransportResponse {
        status: status.as_u16(),
        headers,
        body,
    })
}

/// Absolute urls are used as-is; relative ones are joined onto `base_url`.
pub(crate) fn resolve_url(base_url: Option<&str>, url: &str) -> Result<Url, TransportError> {
    let full = if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        let base = base_url.ok_or_else(|| {
            TransportError::InvalidRequest(format!("relative url '{url}' without a base url"))
        })?;
        format!(
            "{}/{}",
            base.trim_end_matches('/'),
            url.trim_start_matches('/')
        )
    };
    Url::parse(&full).map_err(|e| TransportError::InvalidRequest(format!("{full}: {e}")))
}

/// Flatten a query object into `key=value` pairs. Arrays repeat the key;
/// nested objects are sent as JSON text; nulls are dropped.
pub(crate) fn query_pairs(query: &Value) -> Result<Vec<(String, String)>, TransportError> {
    let map = match query {
        Value::Null => return Ok(Vec::new()),
        Value::Object(map) => map,
        other => {
            return Err(TransportError::InvalidRequest(format!(
                "query parameters must be an object, got {other}"
            )))
        }
    };

    let mut pairs = Vec::with_capacity(map.len());
    for (key, value) in map {
        match value {
            Value::Null => {}
            Value::Array(items) => {
                for item in items {
                    if let Some(text) = scalar_text(item) {
                        pairs.push((key.clone(), text));
                    }
                }
            }
            other => {
                if let Some(text) = scalar_text(other) {
                    pairs.push((key.clone(), text));
                }
            }
        }
    }
    Ok(pairs)
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        nested => Some(nested.to_string()),
    }
}
