//! Durable offline write queue replayed against a remote store.
//!
//! Writes are persisted locally first and drained later, oldest first, with
//! per-operation retry accounting. Delivery is at least once.
//!
//! # Examples
//!
//! Queue and drain with the in-memory store:
//! ```
//! use syncqueue::{
//!     core::store::MemoryStore,
//!     engine::{
//!         queue::{OperationQueue, QueueConfig},
//!         traits::{RemoteApply, RemoteError, RemoteRecord},
//!     },
//!     types::{OpKind, Payload, ANONYMOUS_OWNER},
//! };
//!
//! struct AcceptAll;
//!
//! impl RemoteApply for AcceptAll {
//!     async fn apply(
//!         &self,
//!         _kind: OpKind,
//!         _collection: &str,
//!         payload: &Payload,
//!     ) -> Result<RemoteRecord, RemoteError> {
//!         Ok(serde_json::Value::Object(payload.clone()))
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let queue = OperationQueue::new(MemoryStore::new(), QueueConfig::default());
//! queue
//!     .enqueue("servicios", OpKind::Insert, Payload::new(), ANONYMOUS_OWNER)
//!     .await
//!     .expect("enqueue");
//! let report = queue.drain(&AcceptAll).await.expect("drain");
//! assert_eq!(report.succeeded, 1);
//! assert_eq!(queue.pending_count().await.expect("count"), 0);
//! # }
//! ```
//!
//! Durable store with a coordinator:
//! ```no_run
//! # use std::sync::Arc;
//! # use syncqueue::engine::traits::{RemoteApply, RemoteError, RemoteRecord};
//! # use syncqueue::types::{OpKind, Payload};
//! # struct Backend;
//! # impl RemoteApply for Backend {
//! #     async fn apply(&self, _: OpKind, _: &str, _: &Payload) -> Result<RemoteRecord, RemoteError> {
//! #         Ok(serde_json::Value::Null)
//! #     }
//! # }
//! use syncqueue::{
//!     config::SyncConfig,
//!     engine::queue::OperationQueue,
//!     runtime::coordinator::spawn_coordinator,
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let config = SyncConfig::from_env().expect("config");
//! let store = config.open_store().expect("open sqlite");
//! let queue = OperationQueue::new(store, config.queue.clone());
//! let coordinator = spawn_coordinator(queue.clone(), Arc::new(Backend), config.coordinator.clone());
//! coordinator.set_online(true).await.expect("online");
//! coordinator.shutdown().await.expect("shutdown");
//! # }
//! ```
#![warn(missing_docs)]

/// Aggregate configuration.
pub mod config;
/// In-memory store and index helpers.
pub mod core;
/// Queue engine and remote-apply seam.
pub mod engine;
/// Operation model and persistence wrapper types.
pub mod op;
/// Persistence abstraction and SQLite implementation.
pub mod persist;
/// Typed site producers.
pub mod producer;
/// Trigger coordinator, notifier and events.
pub mod runtime;
/// Shared primitive types and enums.
pub mod types;
