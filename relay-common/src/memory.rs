//! An in-process `RecordStore`, used to exercise the relay without a database.
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::change::{ChangeEvent, ChangeKind};
use crate::record::{Record, RecordField};
use crate::store::{RecordStore, StoreError, StoreResult};

#[derive(Default)]
struct State {
    records: HashMap<String, Record>,
    changes: Vec<ChangeEvent>,
    next_change_id: i64,
}

impl State {
    fn append_change(&mut self, kind: ChangeKind, image: Option<Record>) {
        self.next_change_id += 1;
        self.changes
            .push(ChangeEvent::new(self.next_change_id, kind, image));
    }
}

/// Mirrors `PgStore`: conditional inserts, single-field updates that only emit a change when
/// something changed, and an ordered change log.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, supplier_ref: &str) -> Option<Record> {
        self.lock().records.get(supplier_ref).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of `RecordStore` operations attempted so far, successful or not.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Take every change recorded so far, oldest first.
    pub fn drain_changes(&self) -> Vec<ChangeEvent> {
        std::mem::take(&mut self.lock().changes)
    }

    /// Delete a record out-of-band, the way an operator would.
    pub fn remove(&self, supplier_ref: &str) -> Option<Record> {
        let mut state = self.lock();
        let removed = state.records.remove(supplier_ref);
        if removed.is_some() {
            state.append_change(ChangeKind::Remove, None);
        }
        removed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A poisoned lock only means another test thread panicked mid-operation.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn put_if_absent(&self, record: &Record) -> StoreResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();

        if state.records.contains_key(&record.supplier_ref) {
            return Err(StoreError::ConditionFailed {
                supplier_ref: record.supplier_ref.clone(),
            });
        }

        state
            .records
            .insert(record.supplier_ref.clone(), record.clone());
        state.append_change(ChangeKind::Insert, Some(record.clone()));

        Ok(())
    }

    async fn update_field(
        &self,
        supplier_ref: &str,
        field: RecordField,
        value: &str,
    ) -> StoreResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();

        let image = match state.records.get_mut(supplier_ref) {
            Some(record) => {
                if !record.set_field(field, value) {
                    return Ok(());
                }
                record.clone()
            }
            None => return Ok(()),
        };
        state.append_change(ChangeKind::Modify, Some(image));

        Ok(())
    }
}
