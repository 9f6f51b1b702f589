use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::context::Context;
use crate::error::PipeError;
use crate::handler::Handler;
use crate::path::interpolate;
use crate::pipeline::Env;
use crate::transport::TransportRequest;

pub const REQUEST_PROCESSOR: &str = "request";

/// Terminal processor: reconciles the call with the service defaults, issues
/// the transport request and attaches the response.
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestProcessor;

impl RequestProcessor {
    pub fn new() -> Self {
        Self
    }

    async fn execute(&self, ctx: &mut Context, env: &Env) -> Result<(), PipeError> {
        let service = Arc::clone(&ctx.service);
        let defaults = &service.default;
        let policy = defaults.assign;

        ctx.params.path = policy.reconcile(defaults.path.as_ref(), ctx.params.path.as_ref());
        ctx.params.params = policy.reconcile(defaults.params.as_ref(), ctx.params.params.as_ref());
        ctx.params.data = policy.reconcile(defaults.data.as_ref(), ctx.params.data.as_ref());

        let url = interpolate(&ctx.params.url, ctx.params.path.as_ref())?;
        let request = TransportRequest {
            url,
            method: ctx.params.method,
            base_url: ctx.config.base_url.clone(),
            query: ctx.params.params.clone(),
            body: ctx.params.data.clone(),
            headers: ctx.config.headers.clone(),
            timeout: ctx.config.timeout(),
        };

        if ctx.has_caller_id() {
            let handle = ctx.token().clone();
            if let Some(callback) = &ctx.init().cancel {
                callback(&handle, &ctx.id);
            }
            ctx.cancel = Some(handle);
        }

        debug!(service = %service.name, id = %ctx.id, ?policy, url = %request.url, "Issuing request");
        let token = ctx.token().clone();
        let response = env.transport.send(request, &token).await?;
        ctx.response = Some(response);
        Ok(())
    }
}

#[async_trait]
impl Handler for RequestProcessor {
    fn name(&self) -> &str {
        REQUEST_PROCESSOR
    }

    async fn handle(&self, ctx: &mut Context, env: &Env) -> Result<(), PipeError> {
        let outcome = self.execute(ctx, env).await;

        if let Some(slot) = ctx.take_slot() {
            let shared = match (&outcome, &ctx.response) {
                (Ok(()), Some(response)) => Ok(response.clone()),
                (Ok(()), None) => Err("request produced no response".to_string()),
                (Err(error), _) => Err(error.to_string()),
            };
            slot.complete(shared);
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::{Admission, Bucket, DuplicatePolicy};
    use crate::config::RequestConfig;
    use crate::context::ContextInit;
    use crate::error::TransportError;
    use crate::merge::AssignPolicy;
    use crate::service::{Method, ServiceDefaults, ServiceDefinition};
    use crate::transport::{CancelHandle, Transport, TransportResponse};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        requests: Mutex<Vec<TransportRequest>>,
        fail: bool,
    }

    #[async_trait]
    impl Transport for Recording {
        async fn send(
            &self,
            request: TransportRequest,
            _cancel: &CancelHandle,
        ) -> Result<TransportResponse, TransportError> {
            self.requests.lock().unwrap().push(request);
            if self.fail {
                return Err(TransportError::Timeout);
            }
            Ok(TransportResponse::json(200, json!({ "ok": true })))
        }
    }

    fn env_with(transport: Arc<Recording>) -> Env {
        Env::new(transport)
    }

    fn service(assign: AssignPolicy, params: Value) -> Arc<ServiceDefinition> {
        Arc::new(
            ServiceDefinition::new("getUser", "/api/user/:id", Method::Get).with_defaults(
                ServiceDefaults {
                    params: Some(params),
                    assign,
                    ..Default::default()
                },
            ),
        )
    }

    fn context(init: ContextInit, service: Arc<ServiceDefinition>) -> Context {
        Context::new(init, service, &RequestConfig::default(), CancelHandle::new())
    }

    #[tokio::test]
    async fn default_policy_lets_service_win() {
        let transport = Arc::new(Recording::default());
        let env = env_with(Arc::clone(&transport));
        let mut ctx = context(
            ContextInit::new("getUser")
                .with_path(json!({ "id": 3 }))
                .with_params(json!({ "pageSize": 50, "q": "a" })),
            service(AssignPolicy::Default, json!({ "pageSize": 10 })),
        );

        RequestProcessor.handle(&mut ctx, &env).await.unwrap();

        let sent = transport.requests.lock().unwrap()[0].clone();
        assert_eq!(sent.url, "/api/user/3");
        assert_eq!(sent.query, Some(json!({ "pageSize": 10, "q": "a" })));
        assert_eq!(ctx.response.as_ref().unwrap().status, 200);
    }

    #[tokio::test]
    async fn caller_id_exposes_cancel_handle() {
        let transport = Arc::new(Recording::default());
        let env = env_with(transport);
        let called = Arc::new(AtomicBool::new(false));
        let seen = Arc::clone(&called);
        let mut ctx = context(
            ContextInit::new("getUser")
                .with_id("user-3")
                .with_path(json!({ "id": 3 }))
                .on_cancel(move |_, id| {
                    assert_eq!(id, "user-3");
                    seen.store(true, Ordering::SeqCst);
                }),
            service(AssignPolicy::Replace, json!({})),
        );

        RequestProcessor.handle(&mut ctx, &env).await.unwrap();

        assert!(called.load(Ordering::SeqCst));
        assert!(ctx.cancel.is_some());
    }

    #[tokio::test]
    async fn generated_id_leaves_cancel_unset() {
        let env = env_with(Arc::new(Recording::default()));
        let mut ctx = context(
            ContextInit::new("getUser").with_path(json!({ "id": 1 })),
            service(AssignPolicy::Replace, json!({})),
        );

        RequestProcessor.handle(&mut ctx, &env).await.unwrap();

        assert!(ctx.cancel.is_none());
    }

    #[tokio::test]
    async fn missing_path_param_fails_before_transport() {
        let transport = Arc::new(Recording::default());
        let env = env_with(Arc::clone(&transport));
        let mut ctx = context(
            ContextInit::new("getUser"),
            service(AssignPolicy::Replace, json!({})),
        );

        let err = RequestProcessor.handle(&mut ctx, &env).await.unwrap_err();

        assert!(matches!(err, PipeError::MissingPathParam { ref param, .. } if param == "id"));
        assert!(transport.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn slot_released_on_transport_failure() {
        let transport = Arc::new(Recording {
            fail: true,
            ..Default::default()
        });
        let env = env_with(transport);
        let bucket = Bucket::new(true, None, DuplicatePolicy::Reject);
        let mut ctx = context(
            ContextInit::new("getUser").with_id("k").with_path(json!({ "id": 1 })),
            service(AssignPolicy::Replace, json!({})),
        );
        match bucket.register("k", ctx.token().clone()) {
            Admission::Accepted(slot) => ctx.hold_slot(slot),
            other => panic!("unexpected admission {other:?}"),
        }

        let err = RequestProcessor.handle(&mut ctx, &env).await.unwrap_err();

        assert!(matches!(err, PipeError::Transport(TransportError::Timeout)));
        assert!(!bucket.contains("k"));
    }
}
