//! Request Pipeline
//!
//! Drives one call from its [`ContextInit`] to a populated [`Context`]:
//! service lookup, bucket admission, middleware, processors and finally the
//! terminal [`RequestProcessor`]. Handlers run strictly one after another and
//! the first error ends the call.

use std::sync::Arc;

use tracing::{debug, info_span, warn, Instrument};

use crate::bucket::{Admission, Bucket, DuplicatePolicy};
use crate::config::{PipeConfig, RequestConfig};
use crate::context::{Context, ContextInit};
use crate::emitter::{Emitter, PipeEvent};
use crate::error::PipeError;
use crate::handler::{Handler, SharedHandler};
use crate::processor::RequestProcessor;
use crate::service::ServiceDefinition;
use crate::stack::{MiddlewareStack, ProcessorStack, ServiceStack};
use crate::transport::Transport;

/// Derives a bucket key for calls that carry no caller id.
pub type Fingerprint = Arc<dyn Fn(&Context) -> Option<String> + Send + Sync>;

/// Everything shared by all calls of one client.
pub struct Env {
    pub services: ServiceStack,
    pub middleware: MiddlewareStack,
    pub processors: ProcessorStack,
    pub bucket: Bucket,
    pub emitter: Emitter,
    pub transport: Arc<dyn Transport>,
    pub requester_config: RequestConfig,
    pub fingerprint: Option<Fingerprint>,
}

impl Env {
    /// Empty registries and a pass-through bucket.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            services: ServiceStack::new(),
            middleware: MiddlewareStack::new(),
            processors: ProcessorStack::new(),
            bucket: Bucket::new(false, None, DuplicatePolicy::default()),
            emitter: Emitter::default(),
            transport,
            requester_config: RequestConfig::default(),
            fingerprint: None,
        }
    }

    pub fn from_config(config: &PipeConfig, transport: Arc<dyn Transport>) -> Result<Self, PipeError> {
        let mut env = Self::new(transport);
        env.bucket = Bucket::from_config(config);
        env.requester_config = config.requester_config.clone();
        for spec in &config.services {
            let service = ServiceDefinition::try_from(spec.clone())?;
            env.services.register(Arc::new(service));
        }
        Ok(env)
    }

    pub fn with_fingerprint<F>(mut self, fingerprint: F) -> Self
    where
        F: Fn(&Context) -> Option<String> + Send + Sync + 'static,
    {
        self.fingerprint = Some(Arc::new(fingerprint));
        self
    }

    /// Middleware for this call: the per-call list, else the service's list,
    /// else the whole global stack.
    fn middleware_for(&self, ctx: &Context) -> Result<Vec<SharedHandler>, PipeError> {
        let names = ctx
            .init()
            .middleware
            .as_ref()
            .or(ctx.service.middleware.as_ref());

        match names {
            Some(names) => names
                .iter()
                .map(|name| {
                    self.middleware
                        .find(name)
                        .ok_or_else(|| PipeError::MiddlewareNotFound(name.clone()))
                })
                .collect(),
            None => Ok(self.middleware.sources()),
        }
    }
}

pub struct Pipeline {
    terminal: SharedHandler,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            terminal: Arc::new(RequestProcessor::new()),
        }
    }

    /// Replace the terminal processor.
    pub fn with_terminal(terminal: SharedHandler) -> Self {
        Self { terminal }
    }

    pub async fn run(&self, env: &Env, init: ContextInit) -> Result<Context, PipeError> {
        let service = env
            .services
            .find(&init.name)
            .ok_or_else(|| PipeError::ServiceNotFound(init.name.clone()))?;

        let token = env.transport.cancel_handle();
        let mut ctx = Context::new(init, service, &env.requester_config, token);

        let key = if ctx.has_caller_id() {
            Some(ctx.id.clone())
        } else {
            env.fingerprint.as_ref().and_then(|fingerprint| fingerprint(&ctx))
        };
        ctx.set_bucket_key(key);

        let span = info_span!("pipeline", service = %ctx.service.name, id = %ctx.id);
        self.drive(env, ctx).instrument(span).await
    }

    async fn drive(&self, env: &Env, mut ctx: Context) -> Result<Context, PipeError> {
        env.emitter.emit(PipeEvent::Start {
            id: ctx.id.clone(),
            service: ctx.service.name.clone(),
        });

        if let Some(key) = ctx.bucket_key().map(str::to_string) {
            match env.bucket.register(&key, ctx.token().clone()) {
                Admission::Accepted(slot) | Admission::Superseded(slot) => ctx.hold_slot(slot),
                Admission::Rejected => {
                    emit_duplicate(env, &ctx, &key);
                    let error = PipeError::DuplicateRequest(key);
                    debug!(%error, "Call rejected");
                    return Err(error);
                }
                Admission::Coalesced(pending) => {
                    emit_duplicate(env, &ctx, &key);
                    return match pending.wait().await {
                        Ok(response) => {
                            ctx.response = Some(response);
                            emit_success(env, &ctx);
                            Ok(ctx)
                        }
                        Err(reason) => Err(fail(env, &ctx, PipeError::CoalescedFailure(reason))),
                    };
                }
            }
        }

        let mut handlers = match env.middleware_for(&ctx) {
            Ok(handlers) => handlers,
            Err(error) => return Err(self.abort(env, &mut ctx, error)),
        };
        handlers.extend(env.processors.sources());
        handlers.push(Arc::clone(&self.terminal));

        for handler in handlers {
            if !handler.should_run(&ctx) {
                debug!(handler = handler.name(), "Skipping handler");
                continue;
            }
            if ctx.is_cancelled() {
                let error = PipeError::Cancelled(handler.name().to_string());
                return Err(self.abort(env, &mut ctx, error));
            }

            ctx.step = handler.name().to_string();
            env.emitter.emit(PipeEvent::Step {
                id: ctx.id.clone(),
                service: ctx.service.name.clone(),
                step: ctx.step.clone(),
            });
            debug!(step = %ctx.step, "Running handler");

            if let Err(error) = handler.handle(&mut ctx, env).await {
                return Err(self.abort(env, &mut ctx, error));
            }
        }

        if let Some(slot) = ctx.take_slot() {
            match &ctx.response {
                Some(response) => slot.complete(Ok(response.clone())),
                None => slot.complete(Err("call finished without a response".to_string())),
            }
        }

        emit_success(env, &ctx);
        Ok(ctx)
    }

    /// Settle a failed call: share the failure with coalesced followers,
    /// release the bucket slot and report.
    fn abort(&self, env: &Env, ctx: &mut Context, error: PipeError) -> PipeError {
        if let Some(slot) = ctx.take_slot() {
            slot.complete(Err(error.to_string()));
        }
        fail(env, ctx, error)
    }
}

fn emit_duplicate(env: &Env, ctx: &Context, key: &str) {
    env.emitter.emit(PipeEvent::Duplicate {
        id: ctx.id.clone(),
        service: ctx.service.name.clone(),
        key: key.to_string(),
        policy: env.bucket.policy(),
    });
}

fn emit_success(env: &Env, ctx: &Context) {
    env.emitter.emit(PipeEvent::Success {
        id: ctx.id.clone(),
        service: ctx.service.name.clone(),
        status: ctx.response.as_ref().map(|r| r.status).unwrap_or_default(),
    });
}

fn fail(env: &Env, ctx: &Context, error: PipeError) -> PipeError {
    if error.is_cancelled() {
        env.emitter.emit(PipeEvent::Cancelled {
            id: ctx.id.clone(),
            service: ctx.service.name.clone(),
            step: ctx.step.clone(),
        });
    } else {
        env.emitter.emit(PipeEvent::Failure {
            id: ctx.id.clone(),
            service: ctx.service.name.clone(),
            error: error.to_string(),
        });
    }
    warn!(step = %ctx.step, %error, "Pipeline failed");
    error
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::handler::FnMiddleware;
    use crate::service::Method;
    use crate::transport::{CancelHandle, TransportRequest, TransportResponse};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Echo {
        sent: Mutex<Vec<TransportRequest>>,
    }

    #[async_trait]
    impl Transport for Echo {
        async fn send(
            &self,
            request: TransportRequest,
            _cancel: &CancelHandle,
        ) -> Result<TransportResponse, TransportError> {
            self.sent.lock().unwrap().push(request.clone());
            Ok(TransportResponse::json(200, json!({ "url": request.url })))
        }
    }

    fn setup() -> (Env, Arc<Echo>) {
        let transport = Arc::new(Echo::default());
        let env = Env::new(transport.clone());
        env.services
            .register(Arc::new(ServiceDefinition::new("ping", "/ping", Method::Get)));
        (env, transport)
    }

    fn tracer(log: &Arc<Mutex<Vec<String>>>, name: &str) -> SharedHandler {
        let log = Arc::clone(log);
        let label = name.to_string();
        Arc::new(FnMiddleware::new(name, move |_| {
            log.lock().unwrap().push(label.clone());
            Ok(())
        }))
    }

    #[tokio::test]
    async fn unknown_service() {
        let (env, _) = setup();
        let err = Pipeline::new()
            .run(&env, ContextInit::new("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipeError::ServiceNotFound(name) if name == "nope"));
    }

    #[tokio::test]
    async fn runs_middleware_then_processors_then_request() {
        let (env, _) = setup();
        let log = Arc::new(Mutex::new(Vec::new()));
        env.middleware.register(tracer(&log, "m1"));
        env.middleware.register(tracer(&log, "m2"));
        env.processors.register(tracer(&log, "p1"));

        let ctx = Pipeline::new().run(&env, ContextInit::new("ping")).await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["m1", "m2", "p1"]);
        assert_eq!(ctx.step, "request");
        assert_eq!(ctx.response.unwrap().body, json!({ "url": "/ping" }));
    }

    #[tokio::test]
    async fn per_call_middleware_list_and_unknown_names() {
        let (env, _) = setup();
        let log = Arc::new(Mutex::new(Vec::new()));
        env.middleware.register(tracer(&log, "m1"));
        env.middleware.register(tracer(&log, "m2"));

        Pipeline::new()
            .run(&env, ContextInit::new("ping").with_middleware(["m2"]))
            .await
            .unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["m2"]);

        let err = Pipeline::new()
            .run(&env, ContextInit::new("ping").with_middleware(["ghost"]))
            .await
            .unwrap_err();
        assert!(matches!(err, PipeError::MiddlewareNotFound(name) if name == "ghost"));
    }

    #[tokio::test]
    async fn handler_error_short_circuits() {
        let (env, transport) = setup();
        let log = Arc::new(Mutex::new(Vec::new()));
        env.middleware.register(Arc::new(FnMiddleware::new("auth", |_| {
            Err(PipeError::handler("auth", "no token"))
        })));
        env.middleware.register(tracer(&log, "after"));
        env.processors.register(tracer(&log, "p1"));

        let err = Pipeline::new()
            .run(&env, ContextInit::new("ping").with_id("c1"))
            .await
            .unwrap_err();

        assert!(matches!(err, PipeError::Handler { ref step, .. } if step == "auth"));
        assert!(log.lock().unwrap().is_empty());
        assert!(transport.sent.lock().unwrap().is_empty());
        assert!(env.bucket.is_empty());
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_next_step() {
        let (env, transport) = setup();
        env.middleware.register(Arc::new(FnMiddleware::new("cancel", |ctx| {
            ctx.token().cancel();
            Ok(())
        })));

        let err = Pipeline::new()
            .run(&env, ContextInit::new("ping"))
            .await
            .unwrap_err();

        assert!(matches!(err, PipeError::Cancelled(ref step) if step == "request"));
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn fingerprint_keys_anonymous_calls() {
        let (env, _) = setup();
        let env = env.with_fingerprint(|ctx| Some(format!("fp:{}", ctx.service.name)));
        let seen = Arc::new(Mutex::new(None));
        let probe = Arc::clone(&seen);
        env.middleware.register(Arc::new(FnMiddleware::new("probe", move |ctx| {
            *probe.lock().unwrap() = ctx.bucket_key().map(str::to_string);
            Ok(())
        })));

        Pipeline::new().run(&env, ContextInit::new("ping")).await.unwrap();

        assert_eq!(seen.lock().unwrap().as_deref(), Some("fp:ping"));
        assert!(env.bucket.is_empty());
    }

    #[tokio::test]
    async fn emits_lifecycle_events() {
        let (env, _) = setup();
        let mut events = env.emitter.subscribe();

        Pipeline::new()
            .run(&env, ContextInit::new("ping").with_id("e1"))
            .await
            .unwrap();

        assert!(matches!(events.recv().await.unwrap(), PipeEvent::Start { .. }));
        assert!(matches!(events.recv().await.unwrap(), PipeEvent::Step { step, .. } if step == "request"));
        assert!(matches!(events.recv().await.unwrap(), PipeEvent::Success { status: 200, .. }));
    }
}
