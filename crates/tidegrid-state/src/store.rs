//! StateStore — redb-backed persistence for TideGrid.
//!
//! Provides typed CRUD operations over target configs, decision events,
//! and standalone workload state. All values are JSON-serialized into redb's
//! `&[u8]` value columns. The store supports both on-disk and in-memory
//! backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Decision events kept per target; older ones are pruned on insert.
pub const DECISION_RETENTION: usize = 100;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(TARGETS).map_err(map_err!(Table))?;
        txn.open_table(DECISIONS).map_err(map_err!(Table))?;
        txn.open_table(WORKLOADS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic helpers ────────────────────────────────────────────

    fn put<T: Serialize>(
        &self,
        table_def: JsonTable,
        key: &str,
        value: &T,
    ) -> StateResult<()> {
        let value = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(table_def).map_err(map_err!(Table))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(
        &self,
        table_def: JsonTable,
        key: &str,
    ) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table_def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn remove(&self, table_def: JsonTable, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(table_def).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── Targets ────────────────────────────────────────────────────

    /// Insert or update a target config.
    pub fn put_target(&self, config: &TargetConfig) -> StateResult<()> {
        let key = config.id();
        self.put(TARGETS, &key, config)?;
        debug!(target_id = %key, "target config stored");
        Ok(())
    }

    /// Get a target config by id.
    pub fn get_target(&self, target_id: &str) -> StateResult<Option<TargetConfig>> {
        self.get(TARGETS, target_id)
    }

    /// List all target configs.
    pub fn list_targets(&self) -> StateResult<Vec<TargetConfig>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TARGETS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let config: TargetConfig =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(config);
        }
        Ok(results)
    }

    /// List the ids of all configured targets.
    pub fn list_target_ids(&self) -> StateResult<Vec<TargetId>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TARGETS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            results.push(key.value().to_string());
        }
        Ok(results)
    }

    /// Delete a target config and its decision history. Returns true if it existed.
    pub fn delete_target(&self, target_id: &str) -> StateResult<bool> {
        let existed = self.remove(TARGETS, target_id)?;
        let purged = self.delete_decisions_for_target(target_id)?;
        debug!(%target_id, existed, purged, "target config deleted");
        Ok(existed)
    }

    // ── Decision events ────────────────────────────────────────────

    /// Append a decision event, pruning the target's oldest events beyond
    /// [`DECISION_RETENTION`].
    pub fn put_decision(&self, event: &DecisionEvent) -> StateResult<()> {
        let key = event.table_key();
        let value = serde_json::to_vec(event).map_err(map_err!(Serialize))?;
        let (start, end) = prefix_range(&event.target_id);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(DECISIONS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;

            let keys: Vec<String> = table
                .range(start.as_str()..end.as_str())
                .map_err(map_err!(Read))?
                .filter_map(|entry| entry.ok().map(|(k, _)| k.value().to_string()))
                .collect();
            if keys.len() > DECISION_RETENTION {
                let excess = keys.len() - DECISION_RETENTION;
                for stale in &keys[..excess] {
                    table.remove(stale.as_str()).map_err(map_err!(Write))?;
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Most recent decision events for a target, newest first.
    pub fn list_decisions(&self, target_id: &str, limit: usize) -> StateResult<Vec<DecisionEvent>> {
        let (start, end) = prefix_range(target_id);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DECISIONS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table
            .range(start.as_str()..end.as_str())
            .map_err(map_err!(Read))?
            .rev()
        {
            if results.len() >= limit {
                break;
            }
            let (_, value) = entry.map_err(map_err!(Read))?;
            let event: DecisionEvent =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(event);
        }
        Ok(results)
    }

    /// The newest decision event for a target.
    pub fn latest_decision(&self, target_id: &str) -> StateResult<Option<DecisionEvent>> {
        Ok(self.list_decisions(target_id, 1)?.into_iter().next())
    }

    /// Delete all decision events for a target. Returns number deleted.
    pub fn delete_decisions_for_target(&self, target_id: &str) -> StateResult<u32> {
        let (start, end) = prefix_range(target_id);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let count;
        {
            let mut table = txn.open_table(DECISIONS).map_err(map_err!(Table))?;
            let keys: Vec<String> = table
                .range(start.as_str()..end.as_str())
                .map_err(map_err!(Read))?
                .filter_map(|entry| entry.ok().map(|(k, _)| k.value().to_string()))
                .collect();
            count = keys.len() as u32;
            for key in &keys {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(count)
    }

    // ── Workloads ──────────────────────────────────────────────────

    /// Insert or update a workload state.
    pub fn put_workload(&self, state: &WorkloadState) -> StateResult<()> {
        self.put(WORKLOADS, &state.target_id, state)
    }

    /// Get the workload state of a target.
    pub fn get_workload(&self, target_id: &str) -> StateResult<Option<WorkloadState>> {
        self.get(WORKLOADS, target_id)
    }

    /// Delete a workload state. Returns true if it existed.
    pub fn delete_workload(&self, target_id: &str) -> StateResult<bool> {
        self.remove(WORKLOADS, target_id)
    }
}

/// Key range covering every `{target_id}:...` key.
fn prefix_range(target_id: &str) -> (String, String) {
    // ';' sorts directly after ':'.
    (format!("{target_id}:"), format!("{target_id};"))
}
