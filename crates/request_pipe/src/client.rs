//! Client Entry Point
//!
//! [`PipeClient`] owns the shared [`Env`] and hands every call to the
//! [`Pipeline`]. It is cheap to clone; clones share registries, bucket and
//! emitter.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;

use crate::config::PipeConfig;
use crate::context::{Context, ContextInit};
use crate::emitter::PipeEvent;
use crate::error::PipeError;
use crate::handler::{Handler, SharedHandler};
use crate::pipeline::{Env, Fingerprint, Pipeline};
use crate::service::{ServiceDefinition, ServiceSpec};
use crate::transport::{ReqwestTransport, Transport};

#[derive(Clone)]
pub struct PipeClient {
    env: Arc<Env>,
    pipeline: Arc<Pipeline>,
}

impl PipeClient {
    /// Client backed by a [`ReqwestTransport`] built from `requester_config`.
    pub fn new(config: PipeConfig) -> Result<Self, PipeError> {
        Self::builder(config).build()
    }

    pub fn builder(config: PipeConfig) -> PipeClientBuilder {
        PipeClientBuilder {
            config,
            transport: None,
            terminal: None,
            middleware: Vec::new(),
            processors: Vec::new(),
            fingerprint: None,
        }
    }

    pub fn register_service(&self, service: impl Into<ServiceSpec>) -> Result<(), PipeError> {
        let service = ServiceDefinition::try_from(service.into())?;
        info!(service = %service.name, url = %service.url, "Service registered");
        self.env.services.register(Arc::new(service));
        Ok(())
    }

    pub fn register_middleware<H>(&self, handler: H)
    where
        H: Handler + 'static,
    {
        self.env.middleware.register(Arc::new(handler));
    }

    pub fn register_processor<H>(&self, handler: H)
    where
        H: Handler + 'static,
    {
        self.env.processors.register(Arc::new(handler));
    }

    pub async fn request(&self, init: ContextInit) -> Result<Context, PipeError> {
        self.pipeline.run(&self.env, init).await
    }

    /// Cancel the in-flight call registered under `id`.
    pub fn cancel(&self, id: &str) -> bool {
        self.env.bucket.cancel(id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipeEvent> {
        self.env.emitter.subscribe()
    }

    pub fn env(&self) -> &Env {
        &self.env
    }
}

pub struct PipeClientBuilder {
    config: PipeConfig,
    transport: Option<Arc<dyn Transport>>,
    terminal: Option<SharedHandler>,
    middleware: Vec<SharedHandler>,
    processors: Vec<SharedHandler>,
    fingerprint: Option<Fingerprint>,
}

impl PipeClientBuilder {
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn terminal(mut self, terminal: SharedHandler) -> Self {
        self.terminal = Some(terminal);
        self
    }

    pub fn middleware<H>(mut self, handler: H) -> Self
    where
        H: Handler + 'static,
    {
        self.middleware.push(Arc::new(handler));
        self
    }

    pub fn processor<H>(mut self, handler: H) -> Self
    where
        H: Handler + 'static,
    {
        self.processors.push(Arc::new(handler));
        self
    }

    pub fn fingerprint<F>(mut self, fingerprint: F) -> Self
    where
        F: Fn(&Context) -> Option<String> + Send + Sync + 'static,
    {
        self.fingerprint = Some(Arc::new(fingerprint));
        self
    }

    pub fn build(self) -> Result<PipeClient, PipeError> {
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(&self.config.requester_config)?),
        };

        let mut env = Env::from_config(&self.config, transport)?;
        env.fingerprint = self.fingerprint;
        for handler in self.middleware {
            env.middleware.register(handler);
        }
        for handler in self.processors {
            env.processors.register(handler);
        }

        let pipeline = match self.terminal {
            Some(terminal) => Pipeline::with_terminal(terminal),
            None => Pipeline::new(),
        };

        info!(
            services = env.services.len(),
            middleware = env.middleware.len(),
            processors = env.processors.len(),
            unique = self.config.unique,
            "Pipe client ready"
        );

        Ok(PipeClient {
            env: Arc::new(env),
            pipeline: Arc::new(pipeline),
        })
    }
}
