//! Session tracker — ordered action log for one user's pass through a flow
//!
//! The log lives in memory; every write ships the whole log (plus any
//! caller-supplied columns) to `user_calculations`. The first write inserts the
//! row, later writes update it by the memoised id. Remote failures are logged
//! and swallowed: the in-memory log is never rolled back.

use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};

use crate::models::session::iso_now;
use crate::models::{ActionEntry, SessionKind};
use crate::remote::{RemoteId, RemoteStore, Table};
use crate::upsert::MemoizedRecord;

/// Optional detail attached to a tracked action.
#[derive(Debug, Clone, Default)]
pub struct ActionDetails {
    pub page: Option<String>,
    pub field: Option<String>,
    pub value: Option<String>,
    /// Extra columns persisted alongside the log.
    pub extra: Map<String, Value>,
}

pub struct SessionTracker {
    remote: Arc<dyn RemoteStore>,
    owner: Option<String>,
    kind: SessionKind,
    actions: Mutex<Vec<ActionEntry>>,
    record: MemoizedRecord,
}

impl SessionTracker {
    pub fn new(remote: Arc<dyn RemoteStore>, owner: Option<String>, kind: SessionKind) -> Self {
        Self {
            remote,
            owner: owner.filter(|o| !o.trim().is_empty()),
            kind,
            actions: Mutex::new(Vec::new()),
            record: MemoizedRecord::new(Table::UserCalculations),
        }
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    /// Snapshot of the in-memory log, in call order.
    pub fn actions(&self) -> Vec<ActionEntry> {
        self.log().clone()
    }

    pub async fn session_id(&self) -> Option<RemoteId> {
        self.record.id().await
    }

    /// Append one entry and persist the accumulated log.
    /// No-op when the owner is unknown.
    pub async fn track_action(&self, action: &str, details: ActionDetails) {
        let Some(owner) = self.owner.as_deref() else {
            tracing::debug!(action, "No owner identity — action not tracked");
            return;
        };

        self.log().push(ActionEntry {
            action: action.to_string(),
            timestamp: iso_now(),
            page: details.page,
            field: details.field,
            value: details.value,
        });

        self.persist(owner, details.extra).await;
    }

    /// Persist caller-supplied columns merged with the log, without appending.
    pub async fn save_session_data(&self, form_data: Map<String, Value>) {
        let Some(owner) = self.owner.as_deref() else {
            tracing::debug!("No owner identity — session data not saved");
            return;
        };
        self.persist(owner, form_data).await;
    }

    /// Clear the log and forget the remote id. The remote row is left alone.
    pub async fn reset_session(&self) {
        self.log().clear();
        self.record.forget().await;
        tracing::info!(owner = ?self.owner, kind = self.kind.as_str(), "Session reset");
    }

    async fn persist(&self, owner: &str, extra: Map<String, Value>) {
        let kind = self.kind.as_str();
        let build = || {
            let mut payload = extra;
            let actions = serde_json::to_value(&*self.log()).unwrap_or_else(|_| Value::Array(Vec::new()));
            payload.insert("telegram_user_id".to_string(), Value::String(owner.to_string()));
            payload.insert("calculation_type".to_string(), Value::String(kind.to_string()));
            payload.insert("actions".to_string(), actions);
            payload.insert("last_updated".to_string(), Value::String(iso_now()));
            Value::Object(payload)
        };

        match self.record.persist_with(self.remote.as_ref(), build).await {
            Ok((id, outcome)) => {
                tracing::debug!(id = %id, ?outcome, owner, kind, "Session persisted");
            }
            Err(e) => {
                tracing::error!(error = %e, owner, kind, "Failed to persist session");
            }
        }
    }

    fn log(&self) -> std::sync::MutexGuard<'_, Vec<ActionEntry>> {
        self.actions.lock().unwrap_or_else(|e| e.into_inner())
    }
}
