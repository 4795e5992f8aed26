//! In-memory operation table and index helpers.

/// Helper index aliases.
pub mod indices;
/// Non-durable [`crate::persist::OperationStore`] implementation.
pub mod store;
