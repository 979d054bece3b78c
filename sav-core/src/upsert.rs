//! Insert-or-update by a memoised remote id
//!
//! The first `persist` inserts and remembers the id the store hands back;
//! every later `persist` updates that row. The id sits behind an async mutex
//! that stays locked across the creating insert, so concurrent first writers
//! queue behind it and see the id instead of inserting a second row.

use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::remote::{RemoteId, RemoteStore, Table};

/// Whether a `persist` call created the row or patched it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persisted {
    Inserted,
    Updated,
}

#[derive(Debug)]
pub struct MemoizedRecord {
    table: Table,
    id: Mutex<Option<RemoteId>>,
}

impl MemoizedRecord {
    pub fn new(table: Table) -> Self {
        Self {
            table,
            id: Mutex::new(None),
        }
    }

    pub fn table(&self) -> Table {
        self.table
    }

    pub async fn id(&self) -> Option<RemoteId> {
        self.id.lock().await.clone()
    }

    /// Cache an id discovered by a read. Ignored if one is already cached.
    pub async fn remember(&self, id: RemoteId) {
        let mut slot = self.id.lock().await;
        if slot.is_none() {
            *slot = Some(id);
        }
    }

    /// Drop the cached id; the next `persist` inserts a fresh row.
    pub async fn forget(&self) {
        *self.id.lock().await = None;
    }

    pub async fn persist(&self, store: &dyn RemoteStore, payload: Value) -> Result<(RemoteId, Persisted)> {
        self.persist_with(store, move || payload).await
    }

    /// Like `persist`, but the payload is built once the id slot is held, so
    /// queued writers each send the state as of their turn.
    pub async fn persist_with<F>(&self, store: &dyn RemoteStore, build: F) -> Result<(RemoteId, Persisted)>
    where
        F: FnOnce() -> Value + Send,
    {
        let mut slot = self.id.lock().await;
        let payload = build();
        match slot.as_ref() {
            Some(id) => {
                store.update(self.table, id, payload).await?;
                Ok((id.clone(), Persisted::Updated))
            }
            None => {
                let id = store.insert(self.table, payload).await?;
                tracing::debug!(table = %self.table, id = %id, "Created remote record");
                *slot = Some(id.clone());
                Ok((id, Persisted::Inserted))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{MemoryRemoteStore, RemoteOp};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_insert_then_update() {
        let store = MemoryRemoteStore::new();
        let record = MemoizedRecord::new(Table::Clients);

        let (id, first) = record.persist(&store, json!({"name": "a"})).await.unwrap();
        let (same, second) = record.persist(&store, json!({"name": "b"})).await.unwrap();

        assert_eq!(first, Persisted::Inserted);
        assert_eq!(second, Persisted::Updated);
        assert_eq!(id, same);
        assert_eq!(store.rows(Table::Clients).len(), 1);
        assert_eq!(store.rows(Table::Clients)[0]["name"], "b");
    }

    #[tokio::test]
    async fn test_failed_insert_leaves_id_absent() {
        let store = MemoryRemoteStore::new();
        let record = MemoizedRecord::new(Table::Clients);

        store.set_failing(true);
        assert!(record.persist(&store, json!({"name": "a"})).await.is_err());
        assert_eq!(record.id().await, None);

        store.set_failing(false);
        let (_, outcome) = record.persist(&store, json!({"name": "a"})).await.unwrap();
        assert_eq!(outcome, Persisted::Inserted);
    }

    #[tokio::test]
    async fn test_remember_does_not_replace_existing_id() {
        let record = MemoizedRecord::new(Table::Clients);
        record.remember(RemoteId::new("one")).await;
        record.remember(RemoteId::new("two")).await;
        assert_eq!(record.id().await, Some(RemoteId::new("one")));

        record.forget().await;
        assert_eq!(record.id().await, None);
    }

    #[tokio::test]
    async fn test_concurrent_first_writes_insert_once() {
        let store = Arc::new(MemoryRemoteStore::with_latency(Duration::from_millis(20)));
        let record = Arc::new(MemoizedRecord::new(Table::UserCalculations));

        let mut handles = Vec::new();
        for i in 0..4 {
            let store = store.clone();
            let record = record.clone();
            handles.push(tokio::spawn(async move {
                record.persist(store.as_ref(), json!({"step": i})).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let inserts = store
            .writes()
            .into_iter()
            .filter(|op| matches!(op, RemoteOp::Insert { .. }))
            .count();
        assert_eq!(inserts, 1);
        assert_eq!(store.rows(Table::UserCalculations).len(), 1);
        assert_eq!(store.writes().len(), 4);
    }
}
