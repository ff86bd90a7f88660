//! The `PolicyEngine`: glob method matching, parameter conditions, and
//! {allow, stall} decisions with redaction.
//!
//! The compiled policy document is swapped wholesale on reload rather than
//! mutated field-by-field, so it sits behind `arc_swap::ArcSwap` — a
//! lock-free load-acquire so readers never block a writer mid-reload.

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("failed to read policy file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse policy document: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Allow,
    Stall,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOp {
    Eq,
    Neq,
    In,
    Gt,
    Lt,
    Contains,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub key: String,
    pub op: ConditionOp,
    pub value: serde_json::Value,
}

impl Condition {
    /// Evaluate this predicate against a call's `params`, looking the key up
    /// as a top-level field (no dotted-path lookup).
    fn holds(&self, params: &serde_json::Value) -> bool {
        let Some(actual) = params.get(&self.key) else {
            return false;
        };

        match self.op {
            ConditionOp::Eq => actual == &self.value,
            ConditionOp::Neq => actual != &self.value,
            ConditionOp::In => self
                .value
                .as_array()
                .is_some_and(|arr| arr.iter().any(|v| v == actual)),
            ConditionOp::Gt => compare_numbers(actual, &self.value).is_some_and(|o| o.is_gt()),
            ConditionOp::Lt => compare_numbers(actual, &self.value).is_some_and(|o| o.is_lt()),
            ConditionOp::Contains => match (actual.as_str(), self.value.as_str()) {
                (Some(a), Some(b)) => a.contains(b),
                _ => actual
                    .as_array()
                    .is_some_and(|arr| arr.iter().any(|v| v == &self.value)),
            },
        }
    }
}

fn compare_numbers(a: &serde_json::Value, b: &serde_json::Value) -> Option<std::cmp::Ordering> {
    a.as_f64()?.partial_cmp(&b.as_f64()?)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub match_methods: Vec<String>,
    pub action: Action,
    #[serde(default)]
    pub risk_level: Option<String>,
    #[serde(default)]
    pub redact: Vec<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl Rule {
    fn matches_method(&self, method: &str) -> Option<MatchPrecedence> {
        self.match_methods
            .iter()
            .filter_map(|pattern| precedence_for(pattern, method))
            .max()
    }

    fn conditions_hold(&self, params: &serde_json::Value) -> bool {
        self.conditions.iter().all(|c| c.holds(params))
    }
}

/// Matching precedence: exact beats prefix beats wildcard. Ordered
/// so `Ord`/`max` picks the strongest match among a rule's patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum MatchPrecedence {
    Wildcard,
    Prefix,
    Exact,
}

/// `*` matches any token; a pattern is otherwise a literal dotted method
/// name optionally ending in `.*` for a prefix match. No regex.
fn precedence_for(pattern: &str, method: &str) -> Option<MatchPrecedence> {
    if pattern == "*" {
        return Some(MatchPrecedence::Wildcard);
    }
    if pattern == method {
        return Some(MatchPrecedence::Exact);
    }
    if let Some(prefix) = pattern.strip_suffix(".*") {
        if method == prefix || method.starts_with(&format!("{prefix}.")) {
            return Some(MatchPrecedence::Prefix);
        }
    }
    None
}

/// The outcome of evaluating `(method, params)` against the compiled policy.
#[derive(Debug, Clone)]
pub struct Decision {
    pub action: Action,
    pub policy_id: Option<String>,
    pub risk_level: Option<String>,
    pub redact: Vec<String>,
}

impl Decision {
    fn default_allow() -> Self {
        Self {
            action: Action::Allow,
            policy_id: None,
            risk_level: None,
            redact: Vec::new(),
        }
    }

    /// Apply this decision's `redact` list to a copy of `params`, replacing
    /// matched top-level keys with the literal string `"[REDACTED]"`.
    pub fn redacted_params(&self, params: &serde_json::Value) -> serde_json::Value {
        if self.redact.is_empty() {
            return params.clone();
        }
        let mut out = params.clone();
        if let Some(obj) = out.as_object_mut() {
            for key in &self.redact {
                if obj.contains_key(key) {
                    obj.insert(key.clone(), serde_json::Value::String("[REDACTED]".to_string()));
                }
            }
        }
        out
    }
}

/// An ordered list of rules, evaluated first-match-wins.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyDocument {
    pub rules: Vec<Rule>,
}

/// Thread-safe, atomically swappable policy evaluator. Pure and side-effect
/// free; holds the compiled document behind `ArcSwap` so a reload never
/// blocks a concurrent `evaluate` call.
pub struct PolicyEngine {
    document: ArcSwap<PolicyDocument>,
}

impl PolicyEngine {
    pub fn new(document: PolicyDocument) -> Self {
        Self {
            document: ArcSwap::new(Arc::new(document)),
        }
    }

    pub fn empty() -> Self {
        Self::new(PolicyDocument::default())
    }

    /// Parse a YAML policy document from disk into the already-specified
    /// `PolicyDocument` shape.
    pub fn load(path: &std::path::Path) -> Result<Self, PolicyError> {
        let text = std::fs::read_to_string(path).map_err(|source| PolicyError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let document: PolicyDocument = serde_yaml::from_str(&text)?;
        Ok(Self::new(document))
    }

    /// Swap in a newly loaded document, e.g. on a reload signal.
    pub fn reload(&self, path: &std::path::Path) -> Result<(), PolicyError> {
        let text = std::fs::read_to_string(path).map_err(|source| PolicyError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let document: PolicyDocument = serde_yaml::from_str(&text)?;
        self.document.store(Arc::new(document));
        Ok(())
    }

    /// Decide `(method, params)`: first rule whose `match_methods` contain a
    /// matching pattern (exact > prefix > `*`) and whose `conditions` all
    /// hold; default allow with no redaction if none match.
    pub fn evaluate(&self, method: &str, params: &serde_json::Value) -> Decision {
        let document = self.document.load();

        for rule in &document.rules {
            if rule.matches_method(method).is_some() && rule.conditions_hold(params) {
                return Decision {
                    action: rule.action,
                    policy_id: Some(rule.id.clone()),
                    risk_level: rule.risk_level.clone(),
                    redact: rule.redact.clone(),
                };
            }
        }

        Decision::default_allow()
    }
}
