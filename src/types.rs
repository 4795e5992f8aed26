//! Shared primitive IDs and queue-related enums.

use serde::{Deserialize, Serialize};

/// Opaque, time-ordered operation identifier.
pub type OpId = String;
/// Identifier of the user that originated an operation.
pub type OwnerId = String;
/// Milliseconds since the Unix epoch.
pub type TimestampMs = u64;
/// Field map carried by an operation to the remote store.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Owner recorded when no user was signed in at enqueue time.
pub const ANONYMOUS_OWNER: &str = "anonymous";

/// Remote write verb applied when an operation is replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OpKind {
    /// Create a new remote record.
    Insert,
    /// Update the remote record named by the payload `id`.
    Update,
    /// Delete the remote record named by the payload `id`.
    Delete,
}

impl OpKind {
    /// Canonical text stored on disk.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }

    /// Parses the canonical text. Unknown values yield `None`.
    pub fn from_str_checked(s: &str) -> Option<Self> {
        match s {
            "INSERT" => Some(Self::Insert),
            "UPDATE" => Some(Self::Update),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a queued operation.
///
/// There is no succeeded state: a confirmed remote write removes the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpStatus {
    /// Waiting for a drain pass.
    Pending,
    /// Retry budget exhausted. Terminal.
    Failed,
}

impl OpStatus {
    /// Canonical text stored on disk.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Failed => "failed",
        }
    }

    /// Parses the canonical text. Unknown values yield `None`.
    pub fn from_str_checked(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for OpStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
