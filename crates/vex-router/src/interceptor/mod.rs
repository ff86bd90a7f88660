//! The `Interceptor`: the JSON-RPC proxy surface and its paired control API.
//!
//! One `Arc<AppState>` is shared across handlers behind a `TraceLayer`, with
//! one listener per process role. The request/response hook points are
//! named trait methods (`on_request`/`on_response`) rather than a single
//! modify-in-flight function, so the two halves of the stall/redact/commit
//! state machine can be tested and reasoned about separately.

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use vex_core::event::{EventId, EventType, TaskState};
use vex_core::Event;
use vex_persist::Store;
use vex_queue::{LedgerWorker, WorkerError};

use crate::approval::{ApprovalGateway, GatewayError, StallOutcome};
use crate::policy::{Action, PolicyEngine};

#[derive(Debug, Error)]
pub enum InterceptError {
    #[error("malformed JSON-RPC request")]
    Parse,
    #[error("request body exceeds the configured size limit")]
    BodyTooLarge,
    #[error("method is required")]
    EmptyMethod,
    #[error("task_id exceeds the maximum length")]
    TaskIdTooLong,
    #[error("ledger queue is full")]
    QueueFull,
    #[error("ledger storage failure")]
    LedgerUnhealthy,
    #[error("rejected by approver")]
    StallRejected,
    #[error("stall timed out")]
    StallTimedOut,
    #[error("approval gateway error: {0}")]
    Gateway(#[from] GatewayError),
    #[error("upstream forwarding failed: {0}")]
    Upstream(String),
}

impl From<WorkerError> for InterceptError {
    fn from(e: WorkerError) -> Self {
        match e {
            WorkerError::QueueFull => InterceptError::QueueFull,
            WorkerError::Unhealthy | WorkerError::ShuttingDown => InterceptError::LedgerUnhealthy,
            other => InterceptError::Upstream(other.to_string()),
        }
    }
}

impl InterceptError {
    fn status_and_code(&self) -> (StatusCode, i64) {
        match self {
            Self::Parse => (StatusCode::BAD_REQUEST, -32700),
            Self::BodyTooLarge => (StatusCode::BAD_REQUEST, -32000),
            Self::EmptyMethod | Self::TaskIdTooLong => (StatusCode::BAD_REQUEST, -32600),
            Self::QueueFull | Self::LedgerUnhealthy => (StatusCode::SERVICE_UNAVAILABLE, -32000),
            Self::StallRejected => (StatusCode::FORBIDDEN, -32000),
            Self::StallTimedOut => (StatusCode::FORBIDDEN, -32000),
            Self::Gateway(_) => (StatusCode::INTERNAL_SERVER_ERROR, -32000),
            Self::Upstream(_) => (StatusCode::BAD_GATEWAY, -32000),
        }
    }

    fn into_jsonrpc_response(self, id: Value) -> Response {
        let (status, code) = self.status_and_code();
        let message = if matches!(self, Self::LedgerUnhealthy) {
            "Ledger Storage Failure".to_string()
        } else {
            self.to_string()
        };
        (status, Json(json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}}))).into_response()
    }
}

/// A parsed inbound JSON-RPC 2.0 call.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default = "default_jsonrpc_version")]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

fn default_jsonrpc_version() -> String {
    "2.0".to_string()
}

fn extract_task_id(params: &Value) -> Option<String> {
    params.get("task_id").and_then(|v| v.as_str()).map(str::to_string)
}

/// Context threaded from `on_request` to `on_response` for a single call.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: String,
    pub task_id: Option<String>,
    pub tool_call_id: EventId,
}

/// Upstream transport, injected so the core never depends on a concrete HTTP
/// client. Tests substitute a stub; `vex-server` wires a `reqwest`-backed
/// implementation.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn forward(&self, body: &Value) -> Result<Value, InterceptError>;
}

/// `reqwest`-backed upstream used outside tests.
pub struct ReqwestUpstream {
    client: reqwest::Client,
    url: String,
}

impl ReqwestUpstream {
    pub fn new(url: impl Into<String>, timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url: url.into() })
    }
}

#[async_trait]
impl Upstream for ReqwestUpstream {
    async fn forward(&self, body: &Value) -> Result<Value, InterceptError> {
        let resp = self
            .client
            .post(&self.url)
            .json(body)
            .send()
            .await
            .map_err(|e| InterceptError::Upstream(e.to_string()))?;
        resp.json::<Value>().await.map_err(|e| InterceptError::Upstream(e.to_string()))
    }
}

/// The two explicit hook points of the per-call state machine.
#[async_trait]
pub trait Proxy: Send + Sync {
    /// Evaluate policy, stall if required, and commit a `tool_call` event.
    /// Returns the context needed to process the matching response.
    async fn on_request(&self, call: &JsonRpcRequest) -> Result<RequestContext, InterceptError>;

    /// Commit a `tool_response` event for a call that was already forwarded.
    /// Never returns an error to the caller: a dropped response event is
    /// logged at CRITICAL but does not alter the response already in flight
    /// to the agent.
    async fn on_response(&self, ctx: RequestContext, result: Option<Value>);

    /// Release a pending stall without a signal, committing
    /// `rejection(reason=client_canceled)`.
    async fn cancel_stall(&self, event_id: EventId, method: String, task_id: Option<String>);
}

/// Shared state behind every proxy and control-API handler. `store` is a
/// read-only handle for operator tooling (the CLI, a dashboard) to discover
/// pending `blocked` events and learn the `event_id` to approve or reject —
/// the Interceptor itself never writes through it, only through `worker`.
pub struct AppState {
    pub worker: LedgerWorker,
    pub store: Arc<dyn Store>,
    pub policy: Arc<PolicyEngine>,
    pub gateway: Arc<ApprovalGateway>,
    pub upstream: Arc<dyn Upstream>,
    pub run_id: String,
    pub stall_deadline: Option<Duration>,
    pub body_limit_bytes: usize,
    last_event_by_task: Mutex<HashMap<String, EventId>>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        worker: LedgerWorker,
        store: Arc<dyn Store>,
        policy: Arc<PolicyEngine>,
        gateway: Arc<ApprovalGateway>,
        upstream: Arc<dyn Upstream>,
        run_id: impl Into<String>,
        stall_deadline: Option<Duration>,
        body_limit_bytes: usize,
    ) -> Self {
        Self {
            worker,
            store,
            policy,
            gateway,
            upstream,
            run_id: run_id.into(),
            stall_deadline,
            body_limit_bytes,
            last_event_by_task: Mutex::new(HashMap::new()),
        }
    }

    async fn last_event_for_task(&self, task_id: &Option<String>) -> Option<EventId> {
        let task_id = task_id.as_ref()?;
        self.last_event_by_task.lock().await.get(task_id).copied()
    }

    async fn set_last_event_for_task(&self, task_id: &Option<String>, id: EventId) {
        if let Some(task_id) = task_id {
            self.last_event_by_task.lock().await.insert(task_id.clone(), id);
        }
    }
}

#[async_trait]
impl Proxy for AppState {
    async fn on_request(&self, call: &JsonRpcRequest) -> Result<RequestContext, InterceptError> {
        if call.method.is_empty() {
            return Err(InterceptError::EmptyMethod);
        }
        let task_id = extract_task_id(&call.params);
        if task_id.as_ref().is_some_and(|t| t.len() > vex_core::MAX_TASK_ID_BYTES) {
            return Err(InterceptError::TaskIdTooLong);
        }

        let decision = self.policy.evaluate(&call.method, &call.params);
        let parent_for_call = if decision.action == Action::Stall {
            let event_id = EventId::generate();
            let mut blocked = Event::draft(
                self.run_id.clone(),
                EventType::Blocked,
                call.method.clone(),
                decision.redacted_params(&call.params),
                None,
                task_id.clone(),
                TaskState::Stalled,
                self.last_event_for_task(&task_id).await,
                decision.policy_id.clone(),
                decision.risk_level.clone(),
                true,
            );
            blocked.id = event_id;
            let committed = self.worker.submit(blocked).await?;
            self.set_last_event_for_task(&task_id, committed.id).await;

            let handle = self.gateway.register(event_id).await?;
            let outcome = self.gateway.wait(handle, self.stall_deadline).await;

            match outcome {
                StallOutcome::Approved => {
                    let approval = Event::draft(
                        self.run_id.clone(),
                        EventType::Approval,
                        call.method.clone(),
                        json!({}),
                        None,
                        task_id.clone(),
                        TaskState::Working,
                        Some(event_id),
                        decision.policy_id.clone(),
                        decision.risk_level.clone(),
                        false,
                    );
                    let committed = self.worker.submit(approval).await?;
                    self.set_last_event_for_task(&task_id, committed.id).await;
                    info!(method = %call.method, event_id = %event_id, "stall approved");
                    Some(committed.id)
                }
                StallOutcome::Rejected | StallOutcome::TimedOut => {
                    let reason = if outcome == StallOutcome::Rejected {
                        "rejected_by_operator"
                    } else {
                        "stall_timed_out"
                    };
                    let rejection = Event::draft(
                        self.run_id.clone(),
                        EventType::Rejection,
                        call.method.clone(),
                        json!({ "reason": reason }),
                        None,
                        task_id.clone(),
                        TaskState::Failed,
                        Some(event_id),
                        decision.policy_id.clone(),
                        decision.risk_level.clone(),
                        false,
                    );
                    let committed = self.worker.submit(rejection).await?;
                    self.set_last_event_for_task(&task_id, committed.id).await;
                    warn!(method = %call.method, event_id = %event_id, reason, "stall terminated without approval");
                    return Err(if outcome == StallOutcome::Rejected {
                        InterceptError::StallRejected
                    } else {
                        InterceptError::StallTimedOut
                    });
                }
            }
        } else {
            self.last_event_for_task(&task_id).await
        };

        let tool_call = Event::draft(
            self.run_id.clone(),
            EventType::ToolCall,
            call.method.clone(),
            decision.redacted_params(&call.params),
            None,
            task_id.clone(),
            TaskState::Working,
            parent_for_call,
            decision.policy_id.clone(),
            decision.risk_level.clone(),
            decision.action == Action::Stall,
        );
        let committed = self.worker.submit(tool_call).await?;
        self.set_last_event_for_task(&task_id, committed.id).await;

        Ok(RequestContext {
            method: call.method.clone(),
            task_id,
            tool_call_id: committed.id,
        })
    }

    async fn on_response(&self, ctx: RequestContext, result: Option<Value>) {
        if !self.worker.is_healthy() {
            error!(critical = true, method = %ctx.method, "dropping tool_response: ledger worker unhealthy");
            return;
        }

        let task_state = result
            .as_ref()
            .and_then(|r| r.get("state"))
            .and_then(|v| v.as_str())
            .map(parse_task_state)
            .unwrap_or(TaskState::Completed);

        let response_event = Event::draft(
            self.run_id.clone(),
            EventType::ToolResponse,
            ctx.method.clone(),
            json!({}),
            result,
            ctx.task_id.clone(),
            task_state,
            Some(ctx.tool_call_id),
            None,
            None,
            false,
        );

        match self.worker.submit(response_event).await {
            Ok(committed) => self.set_last_event_for_task(&ctx.task_id, committed.id).await,
            Err(e) => error!(critical = true, method = %ctx.method, error = %e, "failed to commit tool_response"),
        }
    }

    async fn cancel_stall(&self, event_id: EventId, method: String, task_id: Option<String>) {
        self.gateway.cancel(event_id).await;
        let rejection = Event::draft(
            self.run_id.clone(),
            EventType::Rejection,
            method,
            json!({ "reason": "client_canceled" }),
            None,
            task_id.clone(),
            TaskState::Failed,
            Some(event_id),
            None,
            None,
            false,
        );
        match self.worker.submit(rejection).await {
            Ok(committed) => self.set_last_event_for_task(&task_id, committed.id).await,
            Err(e) => error!(error = %e, "failed to commit client_canceled rejection"),
        }
    }
}

fn parse_task_state(s: &str) -> TaskState {
    match s {
        "working" => TaskState::Working,
        "stalled" => TaskState::Stalled,
        "failed" => TaskState::Failed,
        _ => TaskState::Completed,
    }
}

async fn handle_call(State(state): State<Arc<AppState>>, body: axum::body::Bytes) -> Response {
    if body.len() > state.body_limit_bytes {
        return InterceptError::BodyTooLarge.into_jsonrpc_response(Value::Null);
    }

    let call: JsonRpcRequest = match serde_json::from_slice(&body) {
        Ok(c) => c,
        Err(_) => return InterceptError::Parse.into_jsonrpc_response(Value::Null),
    };

    if !state.worker.is_healthy() {
        return InterceptError::LedgerUnhealthy.into_jsonrpc_response(call.id);
    }

    let ctx = match state.on_request(&call).await {
        Ok(ctx) => ctx,
        Err(e) => return e.into_jsonrpc_response(call.id),
    };

    let raw_body: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(_) => return InterceptError::Parse.into_jsonrpc_response(call.id),
    };

    match state.upstream.forward(&raw_body).await {
        Ok(response_body) => {
            let result = response_body.get("result").cloned();
            state.on_response(ctx, result).await;
            (StatusCode::OK, Json(response_body)).into_response()
        }
        Err(e) => {
            state.on_response(ctx, None).await;
            e.into_jsonrpc_response(call.id)
        }
    }
}

#[derive(Deserialize)]
struct EventIdPath {
    event_id: String,
}

#[derive(Serialize)]
struct ControlError {
    error: String,
}

async fn handle_approve(State(state): State<Arc<AppState>>, Path(params): Path<EventIdPath>) -> Response {
    signal(&state, &params.event_id, true).await
}

async fn handle_reject(State(state): State<Arc<AppState>>, Path(params): Path<EventIdPath>) -> Response {
    signal(&state, &params.event_id, false).await
}

async fn signal(state: &Arc<AppState>, event_id_hex: &str, approved: bool) -> Response {
    let Ok(event_id) = EventId::from_hex(event_id_hex) else {
        return (StatusCode::NOT_FOUND, Json(ControlError { error: "unknown event".into() })).into_response();
    };

    match state.gateway.signal(event_id, approved).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(GatewayError::UnknownEvent(_)) => {
            (StatusCode::NOT_FOUND, Json(ControlError { error: "unknown event".into() })).into_response()
        }
        Err(GatewayError::AlreadySignaled(_)) | Err(GatewayError::DuplicateEvent(_)) => {
            (StatusCode::CONFLICT, Json(ControlError { error: "already signaled".into() })).into_response()
        }
    }
}

#[derive(Serialize)]
struct RekeyResponse {
    old_public_key: String,
    new_public_key: String,
}

async fn handle_rekey(State(state): State<Arc<AppState>>) -> Response {
    match state.worker.rotate().await {
        Ok((old, new)) => (
            StatusCode::OK,
            Json(RekeyResponse { old_public_key: old, new_public_key: new }),
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(ControlError { error: e.to_string() })).into_response(),
    }
}

/// The JSON-RPC proxy surface: a single `POST /` endpoint.
pub fn proxy_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", post(handle_call))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The control API: approve/reject/rekey, bound to a separate localhost
/// listener from the proxy surface.
pub fn control_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/approve/{event_id}", post(handle_approve))
        .route("/api/reject/{event_id}", post(handle_reject))
        .route("/api/rekey", post(handle_rekey))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
