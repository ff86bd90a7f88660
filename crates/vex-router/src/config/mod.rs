//! `GatekeeperConfig`: the ambient configuration surface for the proxy and
//! control listeners, the ledger, and the policy file.
//!
//! A plain struct with a `Default` impl, layered through the `config` crate
//! so defaults can be overridden by an optional TOML file and by
//! `VEX_GATEKEEPER_*` environment variables, rather than hand-rolled env
//! parsing.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use vex_queue::DEFAULT_QUEUE_CAPACITY;

/// Default cap on a forwarded request body.
pub const DEFAULT_BODY_LIMIT_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8088,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatekeeperConfig {
    /// Address the JSON-RPC proxy surface binds to.
    pub proxy_listener: ListenerConfig,
    /// Address the localhost-only control API binds to.
    pub control_listener: ListenerConfig,
    /// Base URL the Interceptor forwards requests to once they clear policy.
    pub upstream_url: String,
    /// Bounded queue capacity `K` in front of the `LedgerWorker`.
    pub queue_capacity: usize,
    /// Stall deadline; `None` means block indefinitely pending a signal.
    #[serde(with = "option_millis")]
    pub stall_deadline: Option<Duration>,
    /// Timeout applied to upstream forwarding.
    #[serde(with = "millis")]
    pub upstream_timeout: Duration,
    /// Maximum accepted request body size.
    pub body_limit_bytes: usize,
    /// Path to the Ed25519 signing key file (`.vouch_key`).
    pub signing_key_path: PathBuf,
    /// `sqlx` connection URL for the ledger store.
    pub database_url: String,
    /// Path to the declarative policy document.
    pub policy_path: Option<PathBuf>,
    /// Human-readable label for this run, stored on `Run::agent_label`.
    pub agent_label: Option<String>,
}

impl Default for GatekeeperConfig {
    fn default() -> Self {
        Self {
            proxy_listener: ListenerConfig {
                host: "0.0.0.0".to_string(),
                port: 8088,
            },
            control_listener: ListenerConfig {
                host: "127.0.0.1".to_string(),
                port: 8089,
            },
            upstream_url: "http://127.0.0.1:9000".to_string(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            stall_deadline: None,
            upstream_timeout: Duration::from_secs(30),
            body_limit_bytes: DEFAULT_BODY_LIMIT_BYTES,
            signing_key_path: PathBuf::from(".vouch_key"),
            database_url: "sqlite://vex_gatekeeper.db".to_string(),
            policy_path: None,
            agent_label: None,
        }
    }
}

impl GatekeeperConfig {
    /// Layer defaults, an optional TOML file, and `VEX_GATEKEEPER_*`
    /// environment overrides, using the `config` crate the way the rest of
    /// the pack uses it for process configuration.
    pub fn load(toml_path: Option<&std::path::Path>) -> Result<Self, config::ConfigError> {
        let defaults = config::Config::try_from(&Self::default())?;
        let mut builder = config::Config::builder().add_source(defaults);

        if let Some(path) = toml_path {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("VEX_GATEKEEPER")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

mod option_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_listeners() {
        let cfg = GatekeeperConfig::default();
        assert_eq!(cfg.proxy_listener.port, 8088);
        assert_eq!(cfg.control_listener.host, "127.0.0.1");
        assert_eq!(cfg.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert!(cfg.stall_deadline.is_none());
    }

    #[test]
    fn load_with_no_file_falls_back_to_defaults() {
        let cfg = GatekeeperConfig::load(None).unwrap();
        assert_eq!(cfg.body_limit_bytes, DEFAULT_BODY_LIMIT_BYTES);
    }
}
