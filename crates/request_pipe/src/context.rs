//! Per-call state threaded through the pipeline.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::bucket::Slot;
use crate::config::RequestConfig;
use crate::service::{Method, ServiceDefinition};
use crate::transport::{CancelHandle, TransportResponse};

/// Invoked with the call's cancel handle and id once the request is issued.
pub type CancelCallback = Arc<dyn Fn(&CancelHandle, &str) + Send + Sync>;

/// What the caller asked for. Kept unchanged on the [`Context`] for the
/// whole call.
#[derive(Clone, Default)]
pub struct ContextInit {
    pub name: String,
    pub id: Option<String>,
    pub feature: Vec<String>,
    pub params: Option<Value>,
    pub body: Option<Value>,
    pub path: Option<Value>,
    pub cancel: Option<CancelCallback>,
    pub config: Option<RequestConfig>,
    pub url: Option<String>,
    pub method: Option<Method>,
    pub middleware: Option<Vec<String>>,
}

impl ContextInit {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_feature(mut self, feature: impl Into<String>) -> Self {
        self.feature.push(feature.into());
        self
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_path(mut self, path: Value) -> Self {
        self.path = Some(path);
        self
    }

    pub fn with_config(mut self, config: RequestConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn with_middleware<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.middleware = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn on_cancel<F>(mut self, callback: F) -> Self
    where
        F: Fn(&CancelHandle, &str) + Send + Sync + 'static,
    {
        self.cancel = Some(Arc::new(callback));
        self
    }

    pub fn has_feature(&self, feature: &str) -> bool {
        self.feature.iter().any(|f| f == feature)
    }
}

impl fmt::Debug for ContextInit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextInit")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("feature", &self.feature)
            .field("params", &self.params)
            .field("body", &self.body)
            .field("path", &self.path)
            .field("cancel", &self.cancel.as_ref().map(|_| "<callback>"))
            .field("config", &self.config)
            .field("url", &self.url)
            .field("method", &self.method)
            .field("middleware", &self.middleware)
            .finish()
    }
}

/// Working request shape. Middleware may rewrite any of it before the
/// terminal processor merges it with the service defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestOptions {
    pub url: String,
    pub method: Method,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug)]
pub struct Context {
    pub id: String,
    /// Name of the handler currently running.
    pub step: String,
    pub params: RequestOptions,
    pub config: RequestConfig,
    pub service: Arc<ServiceDefinition>,
    pub response: Option<TransportResponse>,
    /// Set by the request processor when the caller supplied an id.
    pub cancel: Option<CancelHandle>,
    pub metadata: Map<String, Value>,
    init: ContextInit,
    caller_id: bool,
    bucket_key: Option<String>,
    token: CancelHandle,
    slot: Option<Slot>,
}

impl Context {
    /// Per-call url and method win over the service's; the per-call config
    /// is layered over `requester_config`.
    pub fn new(
        init: ContextInit,
        service: Arc<ServiceDefinition>,
        requester_config: &RequestConfig,
        token: CancelHandle,
    ) -> Self {
        let caller_id = init.id.is_some();
        let id = init
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let params = RequestOptions {
            url: init.url.clone().unwrap_or_else(|| service.url.clone()),
            method: init.method.unwrap_or(service.method),
            path: init.path.clone(),
            params: init.params.clone(),
            data: init.body.clone(),
        };
        let config = match &init.config {
            Some(overlay) => requester_config.merged(overlay),
            None => requester_config.clone(),
        };

        Self {
            id,
            step: String::new(),
            params,
            config,
            service,
            response: None,
            cancel: None,
            metadata: Map::new(),
            init,
            caller_id,
            bucket_key: None,
            token,
            slot: None,
        }
    }

    pub fn init(&self) -> &ContextInit {
        &self.init
    }

    pub fn has_caller_id(&self) -> bool {
        self.caller_id
    }

    /// Identity under which the call is registered in the bucket, if any.
    pub fn bucket_key(&self) -> Option<&str> {
        self.bucket_key.as_deref()
    }

    /// The call's cancellation handle. Always present, whether or not it is
    /// exposed through [`Context::cancel`].
    pub fn token(&self) -> &CancelHandle {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub(crate) fn set_bucket_key(&mut self, key: Option<String>) {
        self.bucket_key = key;
    }

    pub(crate) fn hold_slot(&mut self, slot: Slot) {
        self.slot = Some(slot);
    }

    pub(crate) fn take_slot(&mut self) -> Option<Slot> {
        self.slot.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn users() -> Arc<ServiceDefinition> {
        Arc::new(ServiceDefinition::new("getUser", "/api/user/:id", Method::Get))
    }

    #[test]
    fn generated_ids_are_not_caller_ids() {
        let ctx = Context::new(
            ContextInit::new("getUser"),
            users(),
            &RequestConfig::default(),
            CancelHandle::new(),
        );

        assert!(!ctx.has_caller_id());
        assert!(Uuid::parse_str(&ctx.id).is_ok());
        assert_eq!(ctx.params.url, "/api/user/:id");
        assert_eq!(ctx.params.method, Method::Get);
    }

    #[test]
    fn call_overrides_win() {
        let global = RequestConfig::default()
            .with_base_url("http://api")
            .with_header("accept", "application/json");
        let init = ContextInit::new("getUser")
            .with_id("call-1")
            .with_url("/v2/user/:id")
            .with_method(Method::Post)
            .with_path(json!({ "id": 7 }))
            .with_body(json!({ "name": "x" }))
            .with_config(RequestConfig::default().with_header("x-trace", "abc"));

        let ctx = Context::new(init, users(), &global, CancelHandle::new());

        assert!(ctx.has_caller_id());
        assert_eq!(ctx.id, "call-1");
        assert_eq!(ctx.params.url, "/v2/user/:id");
        assert_eq!(ctx.params.method, Method::Post);
        assert_eq!(ctx.params.data, Some(json!({ "name": "x" })));
        assert_eq!(ctx.config.base_url.as_deref(), Some("http://api"));
        assert_eq!(ctx.config.headers.len(), 2);
        assert_eq!(ctx.init().path, Some(json!({ "id": 7 })));
    }

    #[test]
    fn debug_hides_callback() {
        let init = ContextInit::new("getUser").on_cancel(|_, _| {});
        let rendered = format!("{init:?}");
        assert!(rendered.contains("<callback>"));
    }
}
