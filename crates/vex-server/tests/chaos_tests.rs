//! Failure-path scenarios: a stall resolving to rejection, parameter
//! redaction surviving the full commit, chain-tamper detection by the
//! `Verifier`, and the worker latching `unhealthy` the instant its store
//! starts failing.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use vex_core::{Event, EventType, Hash, Run, Signer, TaskState};
use vex_persist::{MemoryLedgerStore, Store, StoreError};
use vex_queue::LedgerWorker;
use vex_router::{
    Action, AppState, ApprovalGateway, InterceptError, JsonRpcRequest, MismatchReason, PolicyDocument,
    PolicyEngine, Proxy, Rule, Upstream, Verifier,
};

struct EchoUpstream {
    calls: AtomicU64,
}

impl EchoUpstream {
    fn new() -> Self {
        Self { calls: AtomicU64::new(0) }
    }
}

#[async_trait]
impl Upstream for EchoUpstream {
    async fn forward(&self, body: &Value) -> Result<Value, InterceptError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!({"jsonrpc": "2.0", "id": body.get("id").cloned().unwrap_or(Value::Null), "result": {"ok": true}}))
    }
}

/// Wraps a `MemoryLedgerStore` but fails every `append_event` once `n` calls
/// have gone through, simulating the backend outage the worker's health flip
/// is meant to fail closed against.
struct FlakyStore {
    inner: MemoryLedgerStore,
    allowed: u64,
    calls: AtomicU64,
}

impl FlakyStore {
    fn new(allowed: u64) -> Self {
        Self { inner: MemoryLedgerStore::new(), allowed, calls: AtomicU64::new(0) }
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn append_event(&self, event: &Event) -> Result<(), StoreError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n >= self.allowed {
            return Err(StoreError::Backend("simulated backend outage".to_string()));
        }
        self.inner.append_event(event).await
    }
    async fn last_event(&self, run_id: &str) -> Result<Option<Event>, StoreError> {
        self.inner.last_event(run_id).await
    }
    async fn get_event(&self, run_id: &str, seq: u64) -> Result<Option<Event>, StoreError> {
        self.inner.get_event(run_id, seq).await
    }
    async fn range(&self, run_id: &str, from_seq: u64, to_seq: u64) -> Result<Vec<Event>, StoreError> {
        self.inner.range(run_id, from_seq, to_seq).await
    }
    async fn get_run_id(&self) -> Result<Option<String>, StoreError> {
        self.inner.get_run_id().await
    }
    async fn get_run(&self, run_id: &str) -> Result<Option<Run>, StoreError> {
        self.inner.get_run(run_id).await
    }
    async fn put_run(&self, run: &Run) -> Result<(), StoreError> {
        self.inner.put_run(run).await
    }
    async fn append_key_range(&self, run_id: &str, seq_first: u64, public_key_hex: &str) -> Result<(), StoreError> {
        self.inner.append_key_range(run_id, seq_first, public_key_hex).await
    }
    async fn get_task_failure_count(&self, run_id: &str, task_id: &str) -> Result<u32, StoreError> {
        self.inner.get_task_failure_count(run_id, task_id).await
    }
    async fn increment_task_failure_count(&self, run_id: &str, task_id: &str) -> Result<u32, StoreError> {
        self.inner.increment_task_failure_count(run_id, task_id).await
    }
}

async fn build_state(policy: PolicyDocument, upstream: Arc<EchoUpstream>, dir: &tempfile::TempDir) -> Arc<AppState> {
    let signer = Arc::new(Signer::load_or_generate(dir.path().join(".vouch_key")).unwrap());
    let store = Arc::new(MemoryLedgerStore::new());
    let worker = LedgerWorker::start(store.clone(), signer, "run1".to_string()).await.unwrap();
    Arc::new(AppState::new(
        worker,
        store,
        Arc::new(PolicyEngine::new(policy)),
        Arc::new(ApprovalGateway::new()),
        upstream,
        "run1",
        Some(Duration::from_millis(150)),
        5 * 1024 * 1024,
    ))
}

/// Scenario 4 — Stall then reject: signaling a rejection commits a
/// `rejection` event, returns `StallRejected` to the caller, and upstream is
/// never invoked.
#[tokio::test]
async fn stall_then_reject_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let rule = Rule {
        id: "stall_all".to_string(),
        match_methods: vec!["*".to_string()],
        action: Action::Stall,
        risk_level: Some("high".to_string()),
        redact: Vec::new(),
        conditions: Vec::new(),
    };
    let upstream = Arc::new(EchoUpstream::new());
    let state = build_state(PolicyDocument { rules: vec![rule] }, upstream.clone(), &dir).await;

    let call = JsonRpcRequest {
        jsonrpc: "2.0".to_string(),
        id: json!(10),
        method: "fs.delete".to_string(),
        params: json!({"path": "/", "task_id": "T3"}),
    };

    let state2 = state.clone();
    let call2 = call.clone();
    let handle = tokio::spawn(async move { state2.on_request(&call2).await });

    let event_id = poll_for_blocked(&state).await;
    state.gateway.signal(event_id, false).await.unwrap();

    let err = handle.await.unwrap().unwrap_err();
    assert!(matches!(err, InterceptError::StallRejected));

    let last = state.store.last_event("run1").await.unwrap().unwrap();
    assert_eq!(last.event_type, EventType::Rejection);
    assert_eq!(last.params["reason"], "rejected_by_operator");
    assert_eq!(upstream.calls.load(Ordering::SeqCst), 0);
}

async fn poll_for_blocked(state: &AppState) -> vex_core::EventId {
    for _ in 0..100 {
        if let Ok(Some(last)) = state.store.last_event("run1").await {
            if last.event_type == EventType::Blocked {
                return last.id;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("no blocked event appeared in time");
}

/// Redaction: a configured key is replaced in the committed `tool_call`
/// params, never reaching the ledger, while other keys pass through
/// untouched.
#[tokio::test]
async fn redaction_hides_configured_keys_in_ledger() {
    let dir = tempfile::tempdir().unwrap();
    let rule = Rule {
        id: "auth_login".to_string(),
        match_methods: vec!["auth.login".to_string()],
        action: Action::Allow,
        risk_level: None,
        redact: vec!["password".to_string(), "token".to_string()],
        conditions: Vec::new(),
    };
    let upstream = Arc::new(EchoUpstream::new());
    let state = build_state(PolicyDocument { rules: vec![rule] }, upstream, &dir).await;

    let call = JsonRpcRequest {
        jsonrpc: "2.0".to_string(),
        id: json!(11),
        method: "auth.login".to_string(),
        params: json!({"user": "alice", "password": "hunter2", "token": "abc", "task_id": "T4"}),
    };

    state.on_request(&call).await.unwrap();

    let committed = state.store.last_event("run1").await.unwrap().unwrap();
    assert_eq!(committed.params["user"], "alice");
    assert_eq!(committed.params["password"], "[REDACTED]");
    assert_eq!(committed.params["token"], "[REDACTED]");
}

/// Tamper detection: flipping a byte in a committed event's params after
/// its hash was computed is caught by the `Verifier` at the exact offending
/// sequence number.
#[tokio::test]
async fn verifier_detects_tampered_event() {
    let dir = tempfile::tempdir().unwrap();
    let signer = Signer::load_or_generate(dir.path().join(".vouch_key")).unwrap();
    let store = MemoryLedgerStore::new();

    let mut prev_hash = Hash::ZERO;
    for seq in 0..8u64 {
        let event_type = if seq == 0 { EventType::Genesis } else { EventType::ToolCall };
        let mut e = Event::draft(
            "run1",
            event_type,
            "fs.read",
            json!({"i": seq}),
            None,
            None,
            TaskState::Completed,
            None,
            None,
            None,
            false,
        );
        e.seq = seq;
        e.prev_hash = prev_hash;
        e.hash = e.compute_hash().unwrap();
        if seq == 5 {
            e.sig = signer.sign(Hash::digest(b"a different hash entirely").as_bytes());
        } else {
            e.sig = signer.sign(e.hash.as_bytes());
        }
        e.key_id = signer.key_id();
        store.append_event(&e).await.unwrap();
        prev_hash = e.hash;
    }
    store.put_run(&Run::new("run1", prev_hash, signer.public_key_hex())).await.unwrap();

    let verifier = Verifier::new(store);
    let report = verifier.verify_run("run1").await.unwrap();
    assert!(!report.valid);
    assert_eq!(report.failed_at_seq, Some(5));
    assert_eq!(report.reason, Some(MismatchReason::Signature));
    assert_eq!(report.exit_code(), 1);
}

/// Health gating: once the store starts failing, the worker latches
/// unhealthy and every subsequent submit fails closed without silently
/// dropping or retrying the event.
#[tokio::test]
async fn worker_latches_unhealthy_after_backend_failure() {
    let dir = tempfile::tempdir().unwrap();
    let signer = Arc::new(Signer::load_or_generate(dir.path().join(".vouch_key")).unwrap());
    // Genesis is call 0; allow it through, then fail everything after.
    let store = Arc::new(FlakyStore::new(1));
    let worker = LedgerWorker::start(store.clone(), signer, "run1".to_string()).await.unwrap();

    assert!(worker.is_healthy());

    let draft = Event::draft(
        "run1".to_string(),
        EventType::ToolCall,
        "fs.read",
        json!({}),
        None,
        None,
        TaskState::Completed,
        None,
        None,
        None,
        false,
    );
    let _ = worker.submit(draft.clone()).await;

    for _ in 0..50 {
        if !worker.is_healthy() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(!worker.is_healthy(), "worker must flip unhealthy once the backend starts failing");

    let err = worker.submit(draft).await.unwrap_err();
    assert!(matches!(err, vex_queue::WorkerError::Unhealthy));
}
