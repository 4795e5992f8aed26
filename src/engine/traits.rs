use std::future::Future;
use std::sync::Arc;

use thiserror::Error;

use crate::types::{OpKind, Payload};

/// Remote record returned by a successful write.
pub type RemoteRecord = serde_json::Value;

/// Failure reported by the remote store. Only the message is kept.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RemoteError {
    /// Human-readable cause, stored in the error history.
    pub message: String,
}

impl RemoteError {
    /// Wraps a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for RemoteError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for RemoteError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Capability that performs one network write against the remote store.
///
/// `Update` and `Delete` payloads carry the target record `id`.
pub trait RemoteApply: Send + Sync + 'static {
    /// Applies one write; an `Err` counts as a failed attempt.
    fn apply(
        &self,
        kind: OpKind,
        collection: &str,
        payload: &Payload,
    ) -> impl Future<Output = Result<RemoteRecord, RemoteError>> + Send;
}

impl<R: RemoteApply> RemoteApply for Arc<R> {
    fn apply(
        &self,
        kind: OpKind,
        collection: &str,
        payload: &Payload,
    ) -> impl Future<Output = Result<RemoteRecord, RemoteError>> + Send {
        (**self).apply(kind, collection, payload)
    }
}
