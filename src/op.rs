//! Queued operation model and persistence wrappers.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::types::{OpId, OpKind, OpStatus, OwnerId, Payload, TimestampMs};

/// Version number for serialized [`PayloadEnvelope`] blobs.
pub const PAYLOAD_FORMAT_VERSION: u16 = 1;

/// Producer input for [`crate::engine::queue::OperationQueue::enqueue`].
#[derive(Debug, Clone, PartialEq)]
pub struct OperationDraft {
    /// Target remote collection.
    pub collection: String,
    /// Remote write verb.
    pub kind: OpKind,
    /// Field map sent to the remote store.
    pub payload: Payload,
    /// Originating user, or [`crate::types::ANONYMOUS_OWNER`].
    pub owner_id: OwnerId,
}

/// One deferred remote write.
///
/// Only `status`, `retry_count`, `last_attempt_ms` and `errors` change after
/// creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Primary key, never reused.
    pub id: OpId,
    /// Target remote collection.
    pub collection: String,
    /// Remote write verb.
    pub kind: OpKind,
    /// Field map sent to the remote store.
    pub payload: Payload,
    /// Originating user, or [`crate::types::ANONYMOUS_OWNER`].
    pub owner_id: OwnerId,
    /// Current lifecycle state.
    pub status: OpStatus,
    /// Number of failed remote attempts.
    pub retry_count: u32,
    /// Creation time; defines replay order.
    pub created_at_ms: TimestampMs,
    /// Time of the most recent attempt.
    pub last_attempt_ms: Option<TimestampMs>,
    /// One message per failed attempt, oldest first.
    pub errors: Vec<String>,
}

impl Operation {
    /// Materializes a fresh pending operation from `draft`.
    pub fn from_draft(draft: OperationDraft) -> Self {
        let created_at_ms = now_ms();
        Self {
            id: new_op_id(created_at_ms),
            collection: draft.collection,
            kind: draft.kind,
            payload: draft.payload,
            owner_id: draft.owner_id,
            status: OpStatus::Pending,
            retry_count: 0,
            created_at_ms,
            last_attempt_ms: None,
            errors: Vec::new(),
        }
    }

    /// Records one failed attempt.
    ///
    /// Moves the operation to [`OpStatus::Failed`] once `retry_count` reaches
    /// `max_retries`. A non-zero `max_history` keeps only the newest messages.
    pub fn record_failure(
        &mut self,
        message: String,
        at_ms: TimestampMs,
        max_retries: u32,
        max_history: usize,
    ) {
        self.retry_count = self.retry_count.saturating_add(1);
        self.last_attempt_ms = Some(at_ms);
        self.push_error(message, max_history);
        if self.retry_count >= max_retries {
            self.status = OpStatus::Failed;
        }
    }

    /// Marks the operation terminally failed without an attempt.
    pub fn mark_failed(&mut self, reason: String, max_history: usize) {
        self.status = OpStatus::Failed;
        self.push_error(reason, max_history);
    }

    fn push_error(&mut self, message: String, max_history: usize) {
        self.errors.push(message);
        if max_history > 0 && self.errors.len() > max_history {
            let excess = self.errors.len() - max_history;
            self.errors.drain(..excess);
        }
    }
}

/// Versioned wrapper for stable on-disk payload decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadEnvelope {
    /// Payload format version.
    pub format_version: u16,
    /// Wrapped field map.
    pub payload: Payload,
}

impl PayloadEnvelope {
    /// Constructs an envelope using [`PAYLOAD_FORMAT_VERSION`].
    pub fn new(payload: Payload) -> Self {
        Self {
            format_version: PAYLOAD_FORMAT_VERSION,
            payload,
        }
    }
}

/// Builds `op_<ms>_<suffix>`; the zero-padded timestamp keeps ids time-ordered.
pub fn new_op_id(ts_ms: TimestampMs) -> OpId {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("op_{ts_ms:013}_{}", &suffix[..9])
}

/// Current wall-clock time in milliseconds.
pub fn now_ms() -> TimestampMs {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
