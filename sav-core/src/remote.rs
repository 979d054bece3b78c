//! Remote persistence client — row-oriented operations against named tables
//!
//! `RemoteStore` is the seam every core component talks to. Implementations:
//! - [`PgRemoteStore`] — managed Postgres through sqlx
//! - [`MemoryRemoteStore`] — in-process tables with an operation log and
//!   injectable failures, used by tests and offline runs
//!
//! Rows travel as JSON objects. Errors are values (`Result`), never panics.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;

use crate::error::{Result, SavError};

// ============================================================================
// Tables, ids, filters
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    UserCalculations,
    NotificationTemplates,
    CrmAdmins,
    Clients,
    ClientMessages,
    Experts,
    Cities,
    TelegramProfiles,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::UserCalculations => "user_calculations",
            Table::NotificationTemplates => "notification_templates",
            Table::CrmAdmins => "crm_admins",
            Table::Clients => "clients",
            Table::ClientMessages => "client_messages",
            Table::Experts => "experts",
            Table::Cities => "cities",
            Table::TelegramProfiles => "telegram_profiles",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque identifier assigned by the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteId(String);

impl RemoteId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Pull the `id` field out of a raw row.
    pub fn from_row(row: &Value) -> Option<Self> {
        row.get("id").and_then(json_text).map(Self)
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Equality filter. Values are compared in their text form, so `42` matches a
/// bigint column and `"42"` a text column alike.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub value: String,
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl ToString) -> Self {
        Self {
            column: column.into(),
            value: value.to_string(),
        }
    }
}

/// Text form of a JSON scalar, the way Postgres `->>` renders it.
pub fn json_text(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

// ============================================================================
// RemoteStore trait
// ============================================================================

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Insert one row and return the id the store assigned.
    async fn insert(&self, table: Table, row: Value) -> Result<RemoteId>;

    /// Patch the row with `id`; only the keys present in `patch` change.
    async fn update(&self, table: Table, id: &RemoteId, patch: Value) -> Result<()>;

    /// Insert, or update the row whose `conflict_column` matches.
    async fn upsert(&self, table: Table, row: Value, conflict_column: &str) -> Result<RemoteId>;

    async fn select(&self, table: Table, filters: &[Filter], limit: Option<i64>) -> Result<Vec<Value>>;

    async fn select_one(&self, table: Table, filters: &[Filter]) -> Result<Option<Value>> {
        Ok(self.select(table, filters, Some(1)).await?.into_iter().next())
    }

    /// Backend version string, for health endpoints.
    async fn health(&self) -> Result<String>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// PgRemoteStore
// ============================================================================

#[derive(Debug, Clone)]
pub struct PgRemoteStore {
    pool: PgPool,
}

impl PgRemoteStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    s.len() <= 63 && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

fn quoted(column: &str) -> Result<String> {
    if !is_identifier(column) {
        return Err(SavError::InvalidIdentifier(column.to_string()));
    }
    Ok(format!("\"{}\"", column))
}

/// Quoted column list for the keys of a JSON object row, sorted.
fn row_columns(row: &Value) -> Result<Vec<String>> {
    let obj = row
        .as_object()
        .ok_or_else(|| SavError::Remote("row payload must be a JSON object".to_string()))?;
    let mut cols = obj.keys().map(|k| quoted(k)).collect::<Result<Vec<_>>>()?;
    cols.sort();
    Ok(cols)
}

fn insert_sql(table: Table, cols: &[String]) -> String {
    if cols.is_empty() {
        return format!("INSERT INTO {t} DEFAULT VALUES RETURNING id::text", t = table);
    }
    let list = cols.join(", ");
    format!(
        "INSERT INTO {t} ({list}) SELECT {list} FROM jsonb_populate_record(NULL::{t}, $1) RETURNING id::text",
        t = table,
        list = list
    )
}

fn update_sql(table: Table, cols: &[String]) -> String {
    let sets = cols
        .iter()
        .map(|c| format!("{c} = r.{c}", c = c))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "UPDATE {t} SET {sets} FROM jsonb_populate_record(NULL::{t}, $1) AS r WHERE {t}.id::text = $2",
        t = table,
        sets = sets
    )
}

fn upsert_sql(table: Table, cols: &[String], conflict: &str) -> Option<String> {
    let updates = cols
        .iter()
        .filter(|c| c.as_str() != conflict)
        .map(|c| format!("{c} = EXCLUDED.{c}", c = c))
        .collect::<Vec<_>>();
    if updates.is_empty() {
        return None;
    }
    let list = cols.join(", ");
    Some(format!(
        "INSERT INTO {t} ({list}) SELECT {list} FROM jsonb_populate_record(NULL::{t}, $1) \
         ON CONFLICT ({conflict}) DO UPDATE SET {updates} RETURNING id::text",
        t = table,
        list = list,
        conflict = conflict,
        updates = updates.join(", ")
    ))
}

/// Filters bind as `(column, value)` pairs: `$1, $2` for the first, and so on.
fn select_sql(table: Table, filter_count: usize, limit: Option<i64>) -> String {
    let mut sql = format!("SELECT to_jsonb(t) FROM {} AS t", table);
    for i in 0..filter_count {
        sql.push_str(if i == 0 { " WHERE " } else { " AND " });
        sql.push_str(&format!("to_jsonb(t) ->> ${} = ${}", 2 * i + 1, 2 * i + 2));
    }
    if let Some(n) = limit {
        sql.push_str(&format!(" LIMIT {}", n.max(0)));
    }
    sql
}

#[async_trait]
impl RemoteStore for PgRemoteStore {
    async fn insert(&self, table: Table, row: Value) -> Result<RemoteId> {
        let cols = row_columns(&row)?;
        let sql = insert_sql(table, &cols);

        let (id,): (String,) = sqlx::query_as(&sql).bind(&row).fetch_one(&self.pool).await?;
        tracing::debug!(table = %table, id = %id, "Inserted row");
        Ok(RemoteId(id))
    }

    async fn update(&self, table: Table, id: &RemoteId, patch: Value) -> Result<()> {
        let cols = row_columns(&patch)?;
        if cols.is_empty() {
            return Ok(());
        }
        let sql = update_sql(table, &cols);

        let result = sqlx::query(&sql)
            .bind(&patch)
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(SavError::NotFound {
                table: table.to_string(),
                id: id.to_string(),
            });
        }
        tracing::debug!(table = %table, id = %id, "Updated row");
        Ok(())
    }

    async fn upsert(&self, table: Table, row: Value, conflict_column: &str) -> Result<RemoteId> {
        let conflict = quoted(conflict_column)?;
        let cols = row_columns(&row)?;
        let sql = upsert_sql(table, &cols, &conflict).ok_or_else(|| {
            SavError::Remote(format!(
                "upsert into {} needs at least one column besides {}",
                table, conflict_column
            ))
        })?;

        let (id,): (String,) = sqlx::query_as(&sql).bind(&row).fetch_one(&self.pool).await?;
        Ok(RemoteId(id))
    }

    async fn select(&self, table: Table, filters: &[Filter], limit: Option<i64>) -> Result<Vec<Value>> {
        let sql = select_sql(table, filters.len(), limit);

        let mut query = sqlx::query_as::<_, (Value,)>(&sql);
        for f in filters {
            query = query.bind(f.column.as_str()).bind(f.value.as_str());
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|(v,)| v).collect())
    }

    async fn health(&self) -> Result<String> {
        Ok(crate::db::health_check(&self.pool).await?)
    }

    fn name(&self) -> &str {
        "postgres"
    }
}

// ============================================================================
// MemoryRemoteStore
// ============================================================================

/// One successfully applied operation, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteOp {
    Insert { table: Table, id: RemoteId },
    Update { table: Table, id: RemoteId },
    Upsert { table: Table, id: RemoteId },
    Select { table: Table },
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<Table, Vec<Value>>,
    ops: Vec<RemoteOp>,
    failing: bool,
}

#[derive(Debug, Default)]
pub struct MemoryRemoteStore {
    state: Mutex<MemoryState>,
    latency: Option<Duration>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every operation sleeps for `latency` before touching the tables.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            state: Mutex::default(),
            latency: Some(latency),
        }
    }

    /// Make every subsequent operation fail with a remote error.
    pub fn set_failing(&self, failing: bool) {
        self.lock().failing = failing;
    }

    /// Put a row in place without logging an operation.
    pub fn seed(&self, table: Table, row: Value) {
        self.lock().tables.entry(table).or_default().push(row);
    }

    pub fn rows(&self, table: Table) -> Vec<Value> {
        self.lock().tables.get(&table).cloned().unwrap_or_default()
    }

    pub fn ops(&self) -> Vec<RemoteOp> {
        self.lock().ops.clone()
    }

    /// Write operations only (inserts, updates, upserts).
    pub fn writes(&self) -> Vec<RemoteOp> {
        self.ops()
            .into_iter()
            .filter(|op| !matches!(op, RemoteOp::Select { .. }))
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn enter(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let state = self.lock();
        if state.failing {
            return Err(SavError::Remote("remote store unavailable".to_string()));
        }
        Ok(state)
    }
}

fn merge_into(target: &mut Value, patch: &Value) {
    if let (Some(t), Some(p)) = (target.as_object_mut(), patch.as_object()) {
        for (k, v) in p {
            t.insert(k.clone(), v.clone());
        }
    }
}

fn matches_filters(row: &Value, filters: &[Filter]) -> bool {
    filters.iter().all(|f| {
        row.get(&f.column)
            .and_then(json_text)
            .map(|v| v == f.value)
            .unwrap_or(false)
    })
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn insert(&self, table: Table, mut row: Value) -> Result<RemoteId> {
        if !row.is_object() {
            return Err(SavError::Remote("row payload must be a JSON object".to_string()));
        }
        let mut state = self.enter().await?;
        let id = RemoteId::from_row(&row).unwrap_or_else(|| RemoteId(uuid::Uuid::new_v4().to_string()));
        row["id"] = Value::String(id.0.clone());
        state.tables.entry(table).or_default().push(row);
        state.ops.push(RemoteOp::Insert { table, id: id.clone() });
        Ok(id)
    }

    async fn update(&self, table: Table, id: &RemoteId, patch: Value) -> Result<()> {
        let mut state = self.enter().await?;
        let row = state
            .tables
            .get_mut(&table)
            .and_then(|rows| rows.iter_mut().find(|r| RemoteId::from_row(r).as_ref() == Some(id)))
            .ok_or_else(|| SavError::NotFound {
                table: table.to_string(),
                id: id.to_string(),
            })?;
        merge_into(row, &patch);
        state.ops.push(RemoteOp::Update { table, id: id.clone() });
        Ok(())
    }

    async fn upsert(&self, table: Table, row: Value, conflict_column: &str) -> Result<RemoteId> {
        let key = row
            .get(conflict_column)
            .and_then(json_text)
            .ok_or_else(|| SavError::Remote(format!("upsert row lacks {}", conflict_column)))?;
        let mut state = self.enter().await?;
        let rows = state.tables.entry(table).or_default();
        let filter = [Filter::eq(conflict_column, &key)];

        let id = match rows.iter_mut().find(|r| matches_filters(r, &filter)) {
            Some(existing) => {
                merge_into(existing, &row);
                RemoteId::from_row(existing)
                    .ok_or_else(|| SavError::Remote("stored row has no id".to_string()))?
            }
            None => {
                let mut row = row;
                let id = RemoteId(uuid::Uuid::new_v4().to_string());
                row["id"] = Value::String(id.0.clone());
                rows.push(row);
                id
            }
        };
        state.ops.push(RemoteOp::Upsert { table, id: id.clone() });
        Ok(id)
    }

    async fn select(&self, table: Table, filters: &[Filter], limit: Option<i64>) -> Result<Vec<Value>> {
        let mut state = self.enter().await?;
        let limit = limit.map(|n| n.max(0) as usize).unwrap_or(usize::MAX);
        let rows: Vec<Value> = state
            .tables
            .get(&table)
            .map(|rows| {
                rows.iter()
                    .filter(|r| matches_filters(r, filters))
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        state.ops.push(RemoteOp::Select { table });
        Ok(rows)
    }

    async fn health(&self) -> Result<String> {
        let _state = self.enter().await?;
        Ok("memory".to_string())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
