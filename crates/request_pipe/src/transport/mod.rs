//! Transport Boundary
//!
//! The pipeline hands a fully reconciled [`TransportRequest`] to a
//! [`Transport`] and attaches whatever comes back to the context. The wire
//! protocol lives entirely behind this trait.

pub mod http;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::service::Method;

pub use self::http::ReqwestTransport;

/// Cooperative cancellation handle for one call.
///
/// Cloning is cheap and every clone observes the same state. Cancelling does
/// not unwind a handler that is already running; the transport notices at its
/// next await point and settles with [`TransportError::Cancelled`].
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the handle has been cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransportRequest {
    pub url: String,
    pub method: Method,
    pub base_url: Option<String>,
    pub query: Option<Value>,
    pub body: Option<Value>,
    pub headers: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// JSON body when the payload parses as JSON, otherwise the raw text as a string.
    pub body: Value,
}

impl TransportResponse {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body,
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue the request; must settle with [`TransportError::Cancelled`] once `cancel` fires.
    async fn send(
        &self,
        request: TransportRequest,
        cancel: &CancelHandle,
    ) -> Result<TransportResponse, TransportError>;

    /// Cancellation-token factory used for every new call.
    fn cancel_handle(&self) -> CancelHandle {
        CancelHandle::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clones_share_cancellation() {
        let handle = CancelHandle::new();
        let clone = handle.clone();
        assert!(!clone.is_cancelled());

        handle.cancel();

        assert!(clone.is_cancelled());
        clone.cancelled().await;
    }
}
