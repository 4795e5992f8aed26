//! Typed producers that turn site actions into queued remote inserts.
//!
//! Payload keys follow the remote schema column names.

use serde::Serialize;
use tracing::{info, warn};

use crate::{
    engine::queue::{OperationQueue, QueueError},
    op::OperationDraft,
    persist::OperationStore,
    runtime::coordinator::{CoordinatorHandle, RuntimeError},
    types::{ANONYMOUS_OWNER, OpId, OpKind, Payload},
};

/// Remote collection receiving presence check-ins.
pub const PRESENCE_COLLECTION: &str = "presence_logs";
/// Remote collection receiving scheduled services.
pub const SERVICES_COLLECTION: &str = "servicios";
/// Remote collection receiving tournaments.
pub const TOURNAMENTS_COLLECTION: &str = "torneos";

/// Signed-in user as reported by the auth backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    /// Backend user id.
    pub id: String,
}

/// One presence check-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceLog {
    /// Calendar date, as entered.
    pub date: String,
    /// Time of day, as entered.
    pub time: String,
    /// What the visitor was doing.
    pub activity: String,
}

/// A service to schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDraft {
    /// Display name.
    pub title: String,
    /// Scheduled date.
    pub scheduled_for: String,
    /// Free-form notes.
    pub notes: String,
}

/// A tournament to announce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TournamentDraft {
    /// Game played.
    pub game: String,
    /// Tournament date.
    pub date: String,
    /// Registered participants.
    pub participants: Vec<String>,
}

#[derive(Serialize)]
struct PresenceRow<'a> {
    user_id: &'a str,
    fecha: &'a str,
    hora: &'a str,
    actividad: &'a str,
}

#[derive(Serialize)]
struct ServiceRow<'a> {
    user_id: Option<&'a str>,
    nombre: &'a str,
    fecha_programada: &'a str,
    notas: &'a str,
    completado: bool,
}

#[derive(Serialize)]
struct TournamentRow<'a> {
    user_id: Option<&'a str>,
    juego: &'a str,
    fecha: &'a str,
    participantes: &'a [String],
}

/// Errors raised while producing an operation.
#[derive(Debug, thiserror::Error)]
pub enum ProducerError {
    /// The payload could not be represented as a field map.
    #[error("payload encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
    /// The queue could not persist the operation.
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Enqueues site writes and nudges the coordinator when one is attached.
pub struct Producer<S> {
    queue: OperationQueue<S>,
    coordinator: Option<CoordinatorHandle>,
}

impl<S> Clone for Producer<S> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            coordinator: self.coordinator.clone(),
        }
    }
}

impl<S: OperationStore + 'static> Producer<S> {
    /// Creates a producer over `queue`.
    pub fn new(queue: OperationQueue<S>, coordinator: Option<CoordinatorHandle>) -> Self {
        Self { queue, coordinator }
    }

    /// Queues a presence check-in. Anonymous visitors are attributed to
    /// [`ANONYMOUS_OWNER`] so the write can be replayed after sign-in.
    pub async fn log_presence(
        &self,
        user: Option<&UserIdentity>,
        log: &PresenceLog,
    ) -> Result<OpId, ProducerError> {
        let owner = user.map_or(ANONYMOUS_OWNER, |u| u.id.as_str());
        let payload = to_payload(&PresenceRow {
            user_id: owner,
            fecha: &log.date,
            hora: &log.time,
            actividad: &log.activity,
        })?;
        self.submit(PRESENCE_COLLECTION, payload, owner).await
    }

    /// Queues a new service, not yet completed.
    pub async fn create_service(
        &self,
        user: Option<&UserIdentity>,
        service: &ServiceDraft,
    ) -> Result<OpId, ProducerError> {
        let user_id = user.map(|u| u.id.as_str());
        let payload = to_payload(&ServiceRow {
            user_id,
            nombre: &service.title,
            fecha_programada: &service.scheduled_for,
            notas: &service.notes,
            completado: false,
        })?;
        self.submit(SERVICES_COLLECTION, payload, user_id.unwrap_or(ANONYMOUS_OWNER))
            .await
    }

    /// Queues a new tournament.
    pub async fn create_tournament(
        &self,
        user: Option<&UserIdentity>,
        tournament: &TournamentDraft,
    ) -> Result<OpId, ProducerError> {
        let user_id = user.map(|u| u.id.as_str());
        let payload = to_payload(&TournamentRow {
            user_id,
            juego: &tournament.game,
            fecha: &tournament.date,
            participantes: &tournament.participants,
        })?;
        self.submit(TOURNAMENTS_COLLECTION, payload, user_id.unwrap_or(ANONYMOUS_OWNER))
            .await
    }

    async fn submit(
        &self,
        collection: &str,
        payload: Payload,
        owner: &str,
    ) -> Result<OpId, ProducerError> {
        let id = self
            .queue
            .enqueue_draft(OperationDraft {
                collection: collection.to_string(),
                kind: OpKind::Insert,
                payload,
                owner_id: owner.to_string(),
            })
            .await?;
        info!(op_id = %id, collection, "write queued for sync");

        if let Some(coordinator) = &self.coordinator {
            if let Err(RuntimeError::ChannelClosed) = coordinator.notify_enqueued().await {
                warn!(op_id = %id, "coordinator stopped; write stays queued");
            }
        }
        Ok(id)
    }
}

fn to_payload<T: Serialize>(row: &T) -> Result<Payload, serde_json::Error> {
    match serde_json::to_value(row)? {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(serde::ser::Error::custom(format!(
            "expected an object payload, got {other}"
        ))),
    }
}
