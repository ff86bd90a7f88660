//! The append-only ledger store: `events`, `runs`/`key_ranges`, and
//! `task_failures`.
//!
//! Pool setup follows pragma-based WAL/foreign-key configuration with
//! `sqlx::migrate!`, plus an in-memory twin used in tests. The ledger needs
//! real columns and a `(run_id, seq)` primary key for atomic
//! append-with-duplicate-rejection, not a generic JSON blob table, so this
//! is a standalone trait rather than a generic storage-backend impl.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::RwLock;
use thiserror::Error;
use vex_core::event::{EventId, EventType, KeyRange, TaskState};
use vex_core::{Event, Hash, Run};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("event (run {run_id}, seq {seq}) already exists")]
    Duplicate { run_id: String, seq: u64 },
    #[error("out-of-order append: run {run_id} expected seq {expected}, got {got}")]
    OutOfOrder { run_id: String, expected: u64, got: u64 },
    #[error("append reported zero affected rows for (run {run_id}, seq {seq})")]
    AppendFailed { run_id: String, seq: u64 },
    #[error("database error: {0}")]
    Backend(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

/// The abstract append-only store backing `events`, `runs`, and
/// `task_failures`. Implementors must guarantee that a successful
/// `append_event` is durable before returning.
#[async_trait]
pub trait Store: Send + Sync {
    async fn append_event(&self, event: &Event) -> Result<(), StoreError>;
    async fn last_event(&self, run_id: &str) -> Result<Option<Event>, StoreError>;
    async fn get_event(&self, run_id: &str, seq: u64) -> Result<Option<Event>, StoreError>;
    async fn range(&self, run_id: &str, from_seq: u64, to_seq: u64) -> Result<Vec<Event>, StoreError>;

    async fn get_run_id(&self) -> Result<Option<String>, StoreError>;
    async fn get_run(&self, run_id: &str) -> Result<Option<Run>, StoreError>;
    async fn put_run(&self, run: &Run) -> Result<(), StoreError>;
    /// Close the currently-open key range for `run_id` at `seq_rekey` (done
    /// implicitly) and open a new one starting at `seq_rekey + 1`.
    async fn append_key_range(&self, run_id: &str, seq_first: u64, public_key_hex: &str) -> Result<(), StoreError>;

    async fn get_task_failure_count(&self, run_id: &str, task_id: &str) -> Result<u32, StoreError>;
    async fn increment_task_failure_count(&self, run_id: &str, task_id: &str) -> Result<u32, StoreError>;
}

#[async_trait]
impl<T: Store + ?Sized> Store for std::sync::Arc<T> {
    async fn append_event(&self, event: &Event) -> Result<(), StoreError> {
        (**self).append_event(event).await
    }
    async fn last_event(&self, run_id: &str) -> Result<Option<Event>, StoreError> {
        (**self).last_event(run_id).await
    }
    async fn get_event(&self, run_id: &str, seq: u64) -> Result<Option<Event>, StoreError> {
        (**self).get_event(run_id, seq).await
    }
    async fn range(&self, run_id: &str, from_seq: u64, to_seq: u64) -> Result<Vec<Event>, StoreError> {
        (**self).range(run_id, from_seq, to_seq).await
    }
    async fn get_run_id(&self) -> Result<Option<String>, StoreError> {
        (**self).get_run_id().await
    }
    async fn get_run(&self, run_id: &str) -> Result<Option<Run>, StoreError> {
        (**self).get_run(run_id).await
    }
    async fn put_run(&self, run: &Run) -> Result<(), StoreError> {
        (**self).put_run(run).await
    }
    async fn append_key_range(&self, run_id: &str, seq_first: u64, public_key_hex: &str) -> Result<(), StoreError> {
        (**self).append_key_range(run_id, seq_first, public_key_hex).await
    }
    async fn get_task_failure_count(&self, run_id: &str, task_id: &str) -> Result<u32, StoreError> {
        (**self).get_task_failure_count(run_id, task_id).await
    }
    async fn increment_task_failure_count(&self, run_id: &str, task_id: &str) -> Result<u32, StoreError> {
        (**self).increment_task_failure_count(run_id, task_id).await
    }
}

fn event_type_str(t: EventType) -> &'static str {
    match t {
        EventType::Genesis => "genesis",
        EventType::ToolCall => "tool_call",
        EventType::ToolResponse => "tool_response",
        EventType::Blocked => "blocked",
        EventType::Approval => "approval",
        EventType::Rejection => "rejection",
        EventType::Rekey => "rekey",
    }
}

fn event_type_from_str(s: &str) -> Result<EventType, StoreError> {
    Ok(match s {
        "genesis" => EventType::Genesis,
        "tool_call" => EventType::ToolCall,
        "tool_response" => EventType::ToolResponse,
        "blocked" => EventType::Blocked,
        "approval" => EventType::Approval,
        "rejection" => EventType::Rejection,
        "rekey" => EventType::Rekey,
        other => return Err(StoreError::Corrupt(format!("unknown event type {other}"))),
    })
}

fn task_state_str(s: TaskState) -> &'static str {
    match s {
        TaskState::Working => "working",
        TaskState::Stalled => "stalled",
        TaskState::Completed => "completed",
        TaskState::Failed => "failed",
    }
}

fn task_state_from_str(s: &str) -> Result<TaskState, StoreError> {
    Ok(match s {
        "working" => TaskState::Working,
        "stalled" => TaskState::Stalled,
        "completed" => TaskState::Completed,
        "failed" => TaskState::Failed,
        other => return Err(StoreError::Corrupt(format!("unknown task state {other}"))),
    })
}

/// SQLite-backed `Store`. One pool shared by all components in a process;
/// the LedgerWorker is the only caller of `append_event`.
pub struct SqliteLedgerStore {
    pool: SqlitePool,
}

impl SqliteLedgerStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .pragma("foreign_keys", "ON")
            .pragma("busy_timeout", "30000")
            .pragma("journal_mode", "WAL");

        let pool = SqlitePoolOptions::new().max_connections(5).connect_with(options).await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Backend(format!("migration failed: {e}")))?;

        Ok(Self { pool })
    }

    pub async fn memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .pragma("foreign_keys", "ON");
        let pool = SqlitePoolOptions::new().max_connections(1).connect_with(options).await?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Backend(format!("migration failed: {e}")))?;
        Ok(Self { pool })
    }

    fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> Result<Event, StoreError> {
        let params_text: String = row.try_get("params")?;
        let response_text: Option<String> = row.try_get("response")?;
        let id_hex: String = row.try_get("id")?;
        let parent_hex: Option<String> = row.try_get("parent_id")?;
        let prev_hash_hex: String = row.try_get("prev_hash")?;
        let hash_hex: String = row.try_get("hash")?;
        let sig_hex: String = row.try_get("sig")?;
        let ts_millis: i64 = row.try_get("ts")?;

        Ok(Event {
            seq: row.try_get::<i64, _>("seq")? as u64,
            id: EventId::from_hex(&id_hex).map_err(|e| StoreError::Corrupt(e.to_string()))?,
            run_id: row.try_get("run_id")?,
            ts: chrono::DateTime::from_timestamp_millis(ts_millis)
                .ok_or_else(|| StoreError::Corrupt("invalid timestamp".into()))?,
            event_type: event_type_from_str(&row.try_get::<String, _>("type")?)?,
            method: row.try_get("method")?,
            params: serde_json::from_str(&params_text).map_err(|e| StoreError::Corrupt(e.to_string()))?,
            response: response_text
                .map(|t| serde_json::from_str(&t))
                .transpose()
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            task_id: row.try_get("task_id")?,
            task_state: task_state_from_str(&row.try_get::<String, _>("task_state")?)?,
            parent_id: parent_hex
                .map(|h| EventId::from_hex(&h))
                .transpose()
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            policy_id: row.try_get("policy_id")?,
            risk_level: row.try_get("risk_level")?,
            was_blocked: row.try_get::<i64, _>("was_blocked")? != 0,
            prev_hash: Hash::from_hex(&prev_hash_hex).map_err(|e| StoreError::Corrupt(e.to_string()))?,
            hash: Hash::from_hex(&hash_hex).map_err(|e| StoreError::Corrupt(e.to_string()))?,
            sig: hex::decode(&sig_hex)
                .ok()
                .and_then(|b| b.try_into().ok())
                .ok_or_else(|| StoreError::Corrupt("signature not 64 bytes".into()))?,
            key_id: row.try_get("key_id")?,
        })
    }
}

#[async_trait]
impl Store for SqliteLedgerStore {
    async fn append_event(&self, event: &Event) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let current_max: Option<i64> = sqlx::query_scalar("SELECT MAX(seq) FROM events WHERE run_id = ?")
            .bind(&event.run_id)
            .fetch_one(&mut *tx)
            .await?;

        let expected = current_max.map(|m| m as u64 + 1).unwrap_or(0);
        if event.seq != expected {
            return Err(StoreError::OutOfOrder {
                run_id: event.run_id.clone(),
                expected,
                got: event.seq,
            });
        }

        let response_text = event.response.as_ref().map(|v| v.to_string());

        let result = sqlx::query(
            "INSERT INTO events (run_id, seq, id, ts, type, method, params, response, task_id, \
             task_state, parent_id, policy_id, risk_level, was_blocked, prev_hash, hash, sig, key_id) \
             VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)",
        )
        .bind(&event.run_id)
        .bind(event.seq as i64)
        .bind(event.id.to_hex())
        .bind(event.ts.timestamp_millis())
        .bind(event_type_str(event.event_type))
        .bind(&event.method)
        .bind(event.params.to_string())
        .bind(response_text)
        .bind(&event.task_id)
        .bind(task_state_str(event.task_state))
        .bind(event.parent_id.map(|p| p.to_hex()))
        .bind(&event.policy_id)
        .bind(&event.risk_level)
        .bind(event.was_blocked as i64)
        .bind(event.prev_hash.to_hex())
        .bind(event.hash.to_hex())
        .bind(hex::encode(event.sig))
        .bind(&event.key_id)
        .execute(&mut *tx)
        .await;

        let result = match result {
            Ok(r) => r,
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                return Err(StoreError::Duplicate {
                    run_id: event.run_id.clone(),
                    seq: event.seq,
                })
            }
            Err(e) => return Err(e.into()),
        };

        if result.rows_affected() == 0 {
            return Err(StoreError::AppendFailed {
                run_id: event.run_id.clone(),
                seq: event.seq,
            });
        }

        if matches!(event.event_type, EventType::Blocked | EventType::Rejection) {
            if let Some(task_id) = &event.task_id {
                sqlx::query(
                    "INSERT INTO task_failures (run_id, task_id, failure_count) VALUES (?, ?, 1) \
                     ON CONFLICT(run_id, task_id) DO UPDATE SET failure_count = failure_count + 1",
                )
                .bind(&event.run_id)
                .bind(task_id)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn last_event(&self, run_id: &str) -> Result<Option<Event>, StoreError> {
        let row = sqlx::query("SELECT * FROM events WHERE run_id = ? ORDER BY seq DESC LIMIT 1")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_event).transpose()
    }

    async fn get_event(&self, run_id: &str, seq: u64) -> Result<Option<Event>, StoreError> {
        let row = sqlx::query("SELECT * FROM events WHERE run_id = ? AND seq = ?")
            .bind(run_id)
            .bind(seq as i64)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_event).transpose()
    }

    async fn range(&self, run_id: &str, from_seq: u64, to_seq: u64) -> Result<Vec<Event>, StoreError> {
        let rows = sqlx::query("SELECT * FROM events WHERE run_id = ? AND seq >= ? AND seq <= ? ORDER BY seq ASC")
            .bind(run_id)
            .bind(from_seq as i64)
            .bind(to_seq as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_event).collect()
    }

    async fn get_run_id(&self) -> Result<Option<String>, StoreError> {
        let row: Option<String> = sqlx::query_scalar("SELECT run_id FROM runs ORDER BY created_at DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<Run>, StoreError> {
        let row = sqlx::query("SELECT * FROM runs WHERE run_id = ?")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else { return Ok(None) };

        let agent_label: Option<String> = row.try_get("agent_label")?;
        let genesis_hash_hex: String = row.try_get("genesis_hash")?;
        let created_ms: i64 = row.try_get("created_at")?;

        let range_rows = sqlx::query("SELECT * FROM key_ranges WHERE run_id = ? ORDER BY seq_first ASC")
            .bind(run_id)
            .fetch_all(&self.pool)
            .await?;

        let mut key_ranges = Vec::with_capacity(range_rows.len());
        for r in &range_rows {
            key_ranges.push(KeyRange {
                seq_first: r.try_get::<i64, _>("seq_first")? as u64,
                seq_last: r.try_get::<Option<i64>, _>("seq_last")?.map(|v| v as u64),
                public_key_hex: r.try_get("public_key_hex")?,
            });
        }

        Ok(Some(Run {
            run_id: run_id.to_string(),
            agent_label,
            genesis_hash: Hash::from_hex(&genesis_hash_hex).map_err(|e| StoreError::Corrupt(e.to_string()))?,
            key_ranges,
            created_at: chrono::DateTime::from_timestamp_millis(created_ms)
                .ok_or_else(|| StoreError::Corrupt("invalid created_at".into()))?,
        }))
    }

    async fn put_run(&self, run: &Run) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO runs (run_id, agent_label, genesis_hash, created_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT(run_id) DO UPDATE SET agent_label = excluded.agent_label",
        )
        .bind(&run.run_id)
        .bind(&run.agent_label)
        .bind(run.genesis_hash.to_hex())
        .bind(run.created_at.timestamp_millis())
        .execute(&mut *tx)
        .await?;

        for range in &run.key_ranges {
            sqlx::query(
                "INSERT INTO key_ranges (run_id, seq_first, seq_last, public_key_hex) VALUES (?, ?, ?, ?) \
                 ON CONFLICT(run_id, seq_first) DO UPDATE SET seq_last = excluded.seq_last",
            )
            .bind(&run.run_id)
            .bind(range.seq_first as i64)
            .bind(range.seq_last.map(|v| v as i64))
            .bind(&range.public_key_hex)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn append_key_range(&self, run_id: &str, seq_first: u64, public_key_hex: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE key_ranges SET seq_last = ? WHERE run_id = ? AND seq_last IS NULL",
        )
        .bind(seq_first.saturating_sub(1) as i64)
        .bind(run_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO key_ranges (run_id, seq_first, seq_last, public_key_hex) VALUES (?, ?, NULL, ?)")
            .bind(run_id)
            .bind(seq_first as i64)
            .bind(public_key_hex)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_task_failure_count(&self, run_id: &str, task_id: &str) -> Result<u32, StoreError> {
        let row: Option<i64> = sqlx::query_scalar("SELECT failure_count FROM task_failures WHERE run_id = ? AND task_id = ?")
            .bind(run_id)
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.unwrap_or(0) as u32)
    }

    async fn increment_task_failure_count(&self, run_id: &str, task_id: &str) -> Result<u32, StoreError> {
        sqlx::query(
            "INSERT INTO task_failures (run_id, task_id, failure_count) VALUES (?, ?, 1) \
             ON CONFLICT(run_id, task_id) DO UPDATE SET failure_count = failure_count + 1",
        )
        .bind(run_id)
        .bind(task_id)
        .execute(&self.pool)
        .await?;
        self.get_task_failure_count(run_id, task_id).await
    }
}

/// An in-memory `Store`, used by tests and by the CLI's dry-run modes.
/// Mirrors `backend::MemoryBackend`'s `RwLock<HashMap<...>>` shape.
#[derive(Default)]
pub struct MemoryLedgerStore {
    inner: RwLock<MemoryLedgerInner>,
}

#[derive(Default)]
struct MemoryLedgerInner {
    events: HashMap<String, Vec<Event>>,
    runs: HashMap<String, Run>,
    task_failures: HashMap<(String, String), u32>,
    run_order: Vec<String>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryLedgerStore {
    async fn append_event(&self, event: &Event) -> Result<(), StoreError> {
        let mut inner = self.inner.write().expect("memory store lock poisoned");
        let events = inner.events.entry(event.run_id.clone()).or_default();
        let expected = events.last().map(|e| e.seq + 1).unwrap_or(0);
        if event.seq != expected {
            return Err(StoreError::OutOfOrder {
                run_id: event.run_id.clone(),
                expected,
                got: event.seq,
            });
        }
        if events.iter().any(|e| e.seq == event.seq) {
            return Err(StoreError::Duplicate {
                run_id: event.run_id.clone(),
                seq: event.seq,
            });
        }

        if matches!(event.event_type, EventType::Blocked | EventType::Rejection) {
            if let Some(task_id) = &event.task_id {
                *inner
                    .task_failures
                    .entry((event.run_id.clone(), task_id.clone()))
                    .or_insert(0) += 1;
            }
        }

        inner.events.entry(event.run_id.clone()).or_default().push(event.clone());
        Ok(())
    }

    async fn last_event(&self, run_id: &str) -> Result<Option<Event>, StoreError> {
        let inner = self.inner.read().expect("memory store lock poisoned");
        Ok(inner.events.get(run_id).and_then(|v| v.last()).cloned())
    }

    async fn get_event(&self, run_id: &str, seq: u64) -> Result<Option<Event>, StoreError> {
        let inner = self.inner.read().expect("memory store lock poisoned");
        Ok(inner.events.get(run_id).and_then(|v| v.iter().find(|e| e.seq == seq)).cloned())
    }

    async fn range(&self, run_id: &str, from_seq: u64, to_seq: u64) -> Result<Vec<Event>, StoreError> {
        let inner = self.inner.read().expect("memory store lock poisoned");
        Ok(inner
            .events
            .get(run_id)
            .map(|v| v.iter().filter(|e| e.seq >= from_seq && e.seq <= to_seq).cloned().collect())
            .unwrap_or_default())
    }

    async fn get_run_id(&self) -> Result<Option<String>, StoreError> {
        let inner = self.inner.read().expect("memory store lock poisoned");
        Ok(inner.run_order.last().cloned())
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<Run>, StoreError> {
        let inner = self.inner.read().expect("memory store lock poisoned");
        Ok(inner.runs.get(run_id).cloned())
    }

    async fn put_run(&self, run: &Run) -> Result<(), StoreError> {
        let mut inner = self.inner.write().expect("memory store lock poisoned");
        if !inner.runs.contains_key(&run.run_id) {
            inner.run_order.push(run.run_id.clone());
        }
        inner.runs.insert(run.run_id.clone(), run.clone());
        Ok(())
    }

    async fn append_key_range(&self, run_id: &str, seq_first: u64, public_key_hex: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().expect("memory store lock poisoned");
        let run = inner
            .runs
            .get_mut(run_id)
            .ok_or_else(|| StoreError::Corrupt(format!("no such run {run_id}")))?;
        run.rotate_at(seq_first.saturating_sub(1), public_key_hex.to_string());
        Ok(())
    }

    async fn get_task_failure_count(&self, run_id: &str, task_id: &str) -> Result<u32, StoreError> {
        let inner = self.inner.read().expect("memory store lock poisoned");
        Ok(inner.task_failures.get(&(run_id.to_string(), task_id.to_string())).copied().unwrap_or(0))
    }

    async fn increment_task_failure_count(&self, run_id: &str, task_id: &str) -> Result<u32, StoreError> {
        let mut inner = self.inner.write().expect("memory store lock poisoned");
        let count = inner.task_failures.entry((run_id.to_string(), task_id.to_string())).or_insert(0);
        *count += 1;
        Ok(*count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vex_core::event::TaskState;

    fn genesis(run_id: &str, pub_hex: &str) -> Event {
        let mut e = Event::draft(
            run_id,
            EventType::Genesis,
            "",
            json!({"public_key": pub_hex}),
            None,
            None,
            TaskState::Completed,
            None,
            None,
            None,
            false,
        );
        e.seq = 0;
        e.prev_hash = Hash::ZERO;
        e.hash = e.compute_hash().unwrap();
        e.key_id = "k0".into();
        e
    }

    #[tokio::test]
    async fn memory_store_rejects_out_of_order_append() {
        let store = MemoryLedgerStore::new();
        let mut e = genesis("run1", "abc");
        e.seq = 5;
        let err = store.append_event(&e).await.unwrap_err();
        assert!(matches!(err, StoreError::OutOfOrder { expected: 0, got: 5, .. }));
    }

    #[tokio::test]
    async fn memory_store_rejects_duplicate_seq() {
        let store = MemoryLedgerStore::new();
        let e = genesis("run1", "abc");
        store.append_event(&e).await.unwrap();
        let err = store.append_event(&e).await.unwrap_err();
        assert!(matches!(err, StoreError::OutOfOrder { .. } | StoreError::Duplicate { .. }));
    }

    #[tokio::test]
    async fn memory_store_range_is_ascending() {
        let store = MemoryLedgerStore::new();
        let mut prev = genesis("run1", "abc");
        store.append_event(&prev).await.unwrap();
        for i in 1..5 {
            let mut e = genesis("run1", "abc");
            e.seq = i;
            e.prev_hash = prev.hash;
            e.hash = e.compute_hash().unwrap();
            store.append_event(&e).await.unwrap();
            prev = e;
        }
        let events = store.range("run1", 0, 10).await.unwrap();
        assert_eq!(events.len(), 5);
        assert!(events.windows(2).all(|w| w[0].seq < w[1].seq));
    }

    #[tokio::test]
    async fn sqlite_store_append_and_read_back() {
        let store = SqliteLedgerStore::memory().await.unwrap();
        let e = genesis("run1", "abc");
        store.append_event(&e).await.unwrap();

        let last = store.last_event("run1").await.unwrap().unwrap();
        assert_eq!(last.seq, 0);
        assert_eq!(last.params["public_key"], "abc");

        let fetched = store.get_event("run1", 0).await.unwrap().unwrap();
        assert_eq!(fetched.hash, e.hash);
    }

    #[tokio::test]
    async fn sqlite_store_rejects_duplicate_seq() {
        let store = SqliteLedgerStore::memory().await.unwrap();
        let e = genesis("run1", "abc");
        store.append_event(&e).await.unwrap();
        let err = store.append_event(&e).await.unwrap_err();
        assert!(matches!(err, StoreError::OutOfOrder { .. }));
    }

    #[tokio::test]
    async fn sqlite_store_put_and_get_run_with_key_ranges() {
        let store = SqliteLedgerStore::memory().await.unwrap();
        let run = Run::new("run1", Hash::digest(b"genesis"), "pub_old".to_string());
        store.put_run(&run).await.unwrap();

        store.append_key_range("run1", 51, "pub_new").await.unwrap();

        let fetched = store.get_run("run1").await.unwrap().unwrap();
        assert_eq!(fetched.key_ranges.len(), 2);
        assert_eq!(fetched.key_ranges[0].seq_last, Some(50));
        assert_eq!(fetched.key_ranges[1].public_key_hex, "pub_new");
    }
}
