//! # vex-router
//!
//! The interception proxy core of the VEX Gatekeeper: the `PolicyEngine`,
//! the `Interceptor`'s request/response state machine and control API, the
//! `ApprovalGateway`, the chain `Verifier`, and the ambient
//! `GatekeeperConfig` surface.
//!
//! This crate owns the HTTP/axum surface; `vex-server` only wires it to a
//! concrete `Store`, `Signer`, and pair of listener addresses.

pub mod approval;
pub mod config;
pub mod interceptor;
pub mod policy;
pub mod verify;

pub use approval::{ApprovalGateway, GatewayError, StallOutcome, WaitHandle};
pub use config::{GatekeeperConfig, ListenerConfig, DEFAULT_BODY_LIMIT_BYTES};
pub use interceptor::{
    control_router, proxy_router, AppState, InterceptError, JsonRpcRequest, Proxy, ReqwestUpstream,
    RequestContext, Upstream,
};
pub use policy::{Action, Condition, ConditionOp, Decision, PolicyDocument, PolicyEngine, PolicyError, Rule};
pub use verify::{recompute_hash_matches, MismatchReason, VerifyError, VerifyReport, Verifier};
