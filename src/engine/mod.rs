//! Queue engine and the remote-apply seam.

/// Operation queue, drain algorithm and its configuration.
pub mod queue;
/// Remote-apply capability trait.
pub mod traits;
