//! Ordered registries for services, middleware and processors.

use std::sync::{Arc, RwLock};

use crate::handler::Handler;
use crate::service::ServiceDefinition;

/// Anything that can be looked up in a [`Stack`] by name.
pub trait Named {
    fn name(&self) -> &str;
}

impl Named for dyn Handler {
    fn name(&self) -> &str {
        Handler::name(self)
    }
}

/// Append-only registry that preserves registration order.
///
/// Names are not unique: registering a second item with an existing name
/// keeps both, and [`Stack::find`] returns the earliest one.
pub struct Stack<T: ?Sized> {
    sources: RwLock<Vec<Arc<T>>>,
}

pub type ServiceStack = Stack<ServiceDefinition>;
pub type MiddlewareStack = Stack<dyn Handler>;
pub type ProcessorStack = Stack<dyn Handler>;

impl<T: ?Sized + Named> Stack<T> {
    pub fn new() -> Self {
        Self {
            sources: RwLock::new(Vec::new()),
        }
    }

    pub fn register(&self, item: Arc<T>) {
        self.sources
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(item);
    }

    /// Snapshot of the registered items, in registration order.
    pub fn sources(&self) -> Vec<Arc<T>> {
        self.sources
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn find(&self, name: &str) -> Option<Arc<T>> {
        self.sources
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .find(|item| item.name() == name)
            .map(Arc::clone)
    }

    pub fn len(&self) -> usize {
        self.sources
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: ?Sized + Named> Default for Stack<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::Method;

    #[test]
    fn keeps_registration_order() {
        let stack = ServiceStack::new();
        stack.register(Arc::new(ServiceDefinition::new("b", "/b", Method::Get)));
        stack.register(Arc::new(ServiceDefinition::new("a", "/a", Method::Get)));
        stack.register(Arc::new(ServiceDefinition::new("c", "/c", Method::Get)));

        let names: Vec<_> = stack.sources().iter().map(|s| s.name.clone()).collect();
        assert_eq!(names, vec!["b", "a", "c"]);
        assert_eq!(stack.len(), 3);
    }

    #[test]
    fn duplicate_names_do_not_replace() {
        let stack = ServiceStack::new();
        stack.register(Arc::new(ServiceDefinition::new("users", "/v1/users", Method::Get)));
        stack.register(Arc::new(ServiceDefinition::new("users", "/v2/users", Method::Get)));

        assert_eq!(stack.len(), 2);
        assert_eq!(stack.find("users").unwrap().url, "/v1/users");
        assert!(stack.find("missing").is_none());
    }

    #[test]
    fn empty_by_default() {
        let stack = MiddlewareStack::default();
        assert!(stack.is_empty());
        assert!(stack.sources().is_empty());
    }
}
