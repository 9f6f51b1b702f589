//! Handler Trait
//!
//! Middleware and processors share this one trait; only the stack they are
//! registered in decides when they run.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::Context;
use crate::error::PipeError;
use crate::pipeline::Env;

/// A step in the pipeline.
///
/// Each handler receives the call's mutable [`Context`] and can:
/// - rewrite the working request (`ctx.params`, `ctx.config`)
/// - leave data for later handlers in `ctx.metadata`
/// - stop the pipeline by returning an error
#[async_trait]
pub trait Handler: Send + Sync {
    /// Returns the name of this handler (for lookup and logging)
    fn name(&self) -> &str;

    /// Feature tag this handler is bound to. Tagged handlers only run for
    /// calls that list the tag in `feature`.
    fn feature(&self) -> Option<&str> {
        None
    }

    /// Check if this handler should run
    ///
    /// Default implementation honours [`Handler::feature`].
    fn should_run(&self, ctx: &Context) -> bool {
        match self.feature() {
            Some(tag) => ctx.init().has_feature(tag),
            None => true,
        }
    }

    /// Run the handler
    ///
    /// # Arguments
    ///
    /// * `ctx` - The call being processed
    /// * `env` - Registries, bucket, emitter and transport shared by all calls
    ///
    /// # Returns
    ///
    /// - `Ok(())` - Continue with the next handler
    /// - `Err(PipeError)` - Abort the call with this error
    async fn handle(&self, ctx: &mut Context, env: &Env) -> Result<(), PipeError>;
}

pub type SharedHandler = Arc<dyn Handler>;

type HandlerFn = dyn Fn(&mut Context) -> Result<(), PipeError> + Send + Sync;

/// Adapts a synchronous closure into a [`Handler`].
pub struct FnMiddleware {
    name: String,
    feature: Option<String>,
    func: Box<HandlerFn>,
}

impl FnMiddleware {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&mut Context) -> Result<(), PipeError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            feature: None,
            func: Box::new(func),
        }
    }

    pub fn with_feature(mut self, feature: impl Into<String>) -> Self {
        self.feature = Some(feature.into());
        self
    }
}

impl fmt::Debug for FnMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnMiddleware")
            .field("name", &self.name)
            .field("feature", &self.feature)
            .finish()
    }
}

#[async_trait]
impl Handler for FnMiddleware {
    fn name(&self) -> &str {
        &self.name
    }

    fn feature(&self) -> Option<&str> {
        self.feature.as_deref()
    }

    async fn handle(&self, ctx: &mut Context, _env: &Env) -> Result<(), PipeError> {
        (self.func)(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RequestConfig;
    use crate::context::ContextInit;
    use crate::service::{Method, ServiceDefinition};
    use crate::transport::CancelHandle;

    fn context(init: ContextInit) -> Context {
        Context::new(
            init,
            Arc::new(ServiceDefinition::new("s", "/s", Method::Get)),
            &RequestConfig::default(),
            CancelHandle::new(),
        )
    }

    #[test]
    fn untagged_handlers_always_run() {
        let handler = FnMiddleware::new("log", |_| Ok(()));
        assert!(handler.should_run(&context(ContextInit::new("s"))));
    }

    #[test]
    fn tagged_handlers_need_the_feature() {
        let handler = FnMiddleware::new("auth", |_| Ok(())).with_feature("auth");

        assert!(!handler.should_run(&context(ContextInit::new("s"))));
        assert!(handler.should_run(&context(ContextInit::new("s").with_feature("auth"))));
        assert_eq!(Handler::name(&handler), "auth");
    }
}
