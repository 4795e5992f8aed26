//! Async coordination around the queue: triggers and status events.

/// Trigger coordinator deciding when to drain.
pub mod coordinator;
/// Event payloads broadcast to status displays.
pub mod events;
/// Broadcast notifier and callback subscriptions.
pub mod notifier;
