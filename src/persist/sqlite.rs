//! SQLite-backed durable operation table.

use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::{
    op::{Operation, PAYLOAD_FORMAT_VERSION, PayloadEnvelope},
    types::{OpKind, OpStatus},
};

use super::{OperationStore, PersistError, PersistResult};

const SELECT_COLUMNS: &str = "id, collection, kind, owner_id, status, retry_count, \
     created_at_ms, last_attempt_ms, payload, errors";

/// SQLite implementation of [`crate::persist::OperationStore`].
pub struct SqliteOperationStore {
    conn: Connection,
}

impl SqliteOperationStore {
    /// Opens or creates a SQLite-backed store at `path`.
    ///
    /// Enables WAL mode and sets `synchronous=FULL` so every commit survives
    /// an abrupt restart.
    pub fn open(path: impl AsRef<Path>) -> PersistResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_connection(conn)
    }

    /// Opens an in-memory SQLite store.
    pub fn open_in_memory() -> PersistResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(conn)
    }

    fn init_connection(conn: Connection) -> PersistResult<Self> {
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(include_str!("schema.sql"))?;
        Ok(Self { conn })
    }

    fn query_ops(&self, sql: &str, status: OpStatus) -> PersistResult<Vec<Operation>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params![status.as_str()], RawRow::from_row)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?.decode()?);
        }
        Ok(out)
    }
}

impl OperationStore for SqliteOperationStore {
    fn put(&mut self, op: &Operation) -> PersistResult<()> {
        let payload = serde_json::to_vec(&PayloadEnvelope::new(op.payload.clone()))?;
        let errors = serde_json::to_string(&op.errors)?;

        let tx = self.conn.transaction()?;
        let exists: Option<i64> = tx
            .query_row("SELECT 1 FROM operations WHERE id = ?1", params![op.id], |row| {
                row.get(0)
            })
            .optional()?;
        if exists.is_some() {
            return Err(PersistError::DuplicateKey(op.id.clone()));
        }
        tx.execute(
            "INSERT INTO operations(id, collection, kind, owner_id, status, retry_count, \
             created_at_ms, last_attempt_ms, payload, errors) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                op.id,
                op.collection,
                op.kind.as_str(),
                op.owner_id,
                op.status.as_str(),
                i64::from(op.retry_count),
                op.created_at_ms as i64,
                op.last_attempt_ms.map(|v| v as i64),
                payload,
                errors,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn get(&self, id: &str) -> PersistResult<Operation> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM operations WHERE id = ?1");
        let raw = self
            .conn
            .query_row(&sql, params![id], RawRow::from_row)
            .optional()?;
        match raw {
            Some(raw) => raw.decode(),
            None => Err(PersistError::NotFound(id.to_string())),
        }
    }

    fn list_by_status(&self, status: OpStatus) -> PersistResult<Vec<Operation>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM operations WHERE status = ?1 \
             ORDER BY created_at_ms ASC, seq ASC"
        );
        self.query_ops(&sql, status)
    }

    fn count_by_status(&self, status: OpStatus) -> PersistResult<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM operations WHERE status = ?1",
            params![status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn update(&mut self, op: &Operation) -> PersistResult<()> {
        let errors = serde_json::to_string(&op.errors)?;
        let changed = self.conn.execute(
            "UPDATE operations SET status = ?1, retry_count = ?2, last_attempt_ms = ?3, errors = ?4 \
             WHERE id = ?5",
            params![
                op.status.as_str(),
                i64::from(op.retry_count),
                op.last_attempt_ms.map(|v| v as i64),
                errors,
                op.id,
            ],
        )?;
        if changed == 0 {
            return Err(PersistError::NotFound(op.id.clone()));
        }
        Ok(())
    }

    fn delete(&mut self, id: &str) -> PersistResult<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM operations WHERE id = ?1", params![id])?;
        Ok(removed > 0)
    }

    fn flush(&mut self) -> PersistResult<()> {
        self.conn.execute_batch("PRAGMA wal_checkpoint(PASSIVE);")?;
        Ok(())
    }
}

struct RawRow {
    id: String,
    collection: String,
    kind: String,
    owner_id: String,
    status: String,
    retry_count: i64,
    created_at_ms: i64,
    last_attempt_ms: Option<i64>,
    payload: Vec<u8>,
    errors: String,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            collection: row.get(1)?,
            kind: row.get(2)?,
            owner_id: row.get(3)?,
            status: row.get(4)?,
            retry_count: row.get(5)?,
            created_at_ms: row.get(6)?,
            last_attempt_ms: row.get(7)?,
            payload: row.get(8)?,
            errors: row.get(9)?,
        })
    }

    fn decode(self) -> PersistResult<Operation> {
        let kind = OpKind::from_str_checked(&self.kind)
            .ok_or_else(|| PersistError::Corrupt(format!("{}: unknown kind {}", self.id, self.kind)))?;
        let status = OpStatus::from_str_checked(&self.status).ok_or_else(|| {
            PersistError::Corrupt(format!("{}: unknown status {}", self.id, self.status))
        })?;
        let envelope: PayloadEnvelope = serde_json::from_slice(&self.payload)?;
        if envelope.format_version != PAYLOAD_FORMAT_VERSION {
            return Err(PersistError::Corrupt(format!(
                "{}: unsupported payload format version {}",
                self.id, envelope.format_version
            )));
        }
        let errors: Vec<String> = serde_json::from_str(&self.errors)?;

        Ok(Operation {
            id: self.id,
            collection: self.collection,
            kind,
            payload: envelope.payload,
            owner_id: self.owner_id,
            status,
            retry_count: self.retry_count as u32,
            created_at_ms: self.created_at_ms as u64,
            last_attempt_ms: self.last_attempt_ms.map(|v| v as u64),
            errors,
        })
    }
}
