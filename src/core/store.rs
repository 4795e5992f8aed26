use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::{
    op::Operation,
    persist::{OperationStore, PersistError, PersistResult},
    types::{OpId, OpStatus},
};

use super::indices::{VecIndex, remove_from_vec_index};

/// Serializable image of a [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySnapshotV1 {
    /// Next insertion sequence number.
    pub next_seq: u64,
    /// Records in insertion order.
    pub records: Vec<Operation>,
}

#[derive(Debug, Clone)]
struct Slot {
    seq: u64,
    op: Operation,
}

/// Operation table held in process memory. Lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: HashMap<OpId, Slot>,
    by_status: VecIndex<OpStatus>,
    next_seq: u64,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            next_seq: 1,
            ..Self::default()
        }
    }

    /// Rebuilds a store from an exported snapshot.
    pub fn from_snapshot(snapshot: MemorySnapshotV1) -> PersistResult<Self> {
        let mut store = Self::new();
        for op in snapshot.records {
            store.put(&op)?;
        }
        store.next_seq = store.next_seq.max(snapshot.next_seq);
        Ok(store)
    }

    /// Copies every record, in insertion order.
    pub fn export_snapshot(&self) -> MemorySnapshotV1 {
        let mut slots: Vec<&Slot> = self.records.values().collect();
        slots.sort_by_key(|slot| slot.seq);
        MemorySnapshotV1 {
            next_seq: self.next_seq,
            records: slots.into_iter().map(|slot| slot.op.clone()).collect(),
        }
    }

    /// Number of records in any status.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when no records are held.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn take_next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

impl OperationStore for MemoryStore {
    fn put(&mut self, op: &Operation) -> PersistResult<()> {
        if self.records.contains_key(&op.id) {
            return Err(PersistError::DuplicateKey(op.id.clone()));
        }
        let seq = self.take_next_seq();
        self.by_status
            .entry(op.status)
            .or_default()
            .push(op.id.clone());
        self.records.insert(
            op.id.clone(),
            Slot {
                seq,
                op: op.clone(),
            },
        );
        Ok(())
    }

    fn get(&self, id: &str) -> PersistResult<Operation> {
        self.records
            .get(id)
            .map(|slot| slot.op.clone())
            .ok_or_else(|| PersistError::NotFound(id.to_string()))
    }

    fn list_by_status(&self, status: OpStatus) -> PersistResult<Vec<Operation>> {
        let mut slots: Vec<&Slot> = self
            .by_status
            .get(&status)
            .into_iter()
            .flat_map(|ids| ids.iter())
            .filter_map(|id| self.records.get(id))
            .collect();
        slots.sort_by_key(|slot| (slot.op.created_at_ms, slot.seq));
        Ok(slots.into_iter().map(|slot| slot.op.clone()).collect())
    }

    fn count_by_status(&self, status: OpStatus) -> PersistResult<usize> {
        Ok(self.by_status.get(&status).map_or(0, Vec::len))
    }

    fn update(&mut self, op: &Operation) -> PersistResult<()> {
        let slot = self
            .records
            .get_mut(&op.id)
            .ok_or_else(|| PersistError::NotFound(op.id.clone()))?;
        let old_status = slot.op.status;

        slot.op.status = op.status;
        slot.op.retry_count = op.retry_count;
        slot.op.last_attempt_ms = op.last_attempt_ms;
        slot.op.errors = op.errors.clone();

        if old_status != op.status {
            remove_from_vec_index(self.by_status.entry(old_status).or_default(), &op.id);
            self.by_status
                .entry(op.status)
                .or_default()
                .push(op.id.clone());
        }
        Ok(())
    }

    fn delete(&mut self, id: &str) -> PersistResult<bool> {
        let Some(slot) = self.records.remove(id) else {
            return Ok(false);
        };
        remove_from_vec_index(self.by_status.entry(slot.op.status).or_default(), id);
        Ok(true)
    }
}
