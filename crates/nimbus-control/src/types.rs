//! Configuration for the control plane service.

use std::time::Duration;

use serde::Deserialize;

/// Configuration for the control plane service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ControlConfig {
    /// Listen address (e.g., "0.0.0.0:8080").
    #[serde(default = "ControlConfig::default_listen_addr")]
    pub listen_addr: String,

    /// Directory holding the `RocksDB` database.
    #[serde(default = "ControlConfig::default_data_dir")]
    pub data_dir: String,

    /// Base URL of the storage agent. Commands are not sent when unset.
    #[serde(default)]
    pub agent_url: Option<String>,

    /// How long to wait for a final answer to a command, in seconds.
    #[serde(default = "ControlConfig::default_command_timeout")]
    pub command_timeout_seconds: u64,

    /// HTTP timeout for delivering a command, in seconds.
    #[serde(default = "ControlConfig::default_agent_request_timeout")]
    pub agent_request_timeout_seconds: u64,

    /// Re-read-and-retry rounds after a lost compare-and-swap.
    #[serde(default = "ControlConfig::default_conflict_retries")]
    pub conflict_retries: u32,

    /// How often the recovery sweep runs, in seconds.
    #[serde(default = "ControlConfig::default_reconcile_interval")]
    pub reconcile_interval_seconds: u64,

    /// How long a resource may sit in a transitional state with no
    /// outstanding command before the sweep recovers it, in seconds.
    #[serde(default = "ControlConfig::default_stuck_after")]
    pub stuck_after_seconds: u64,
}

impl ControlConfig {
    fn default_listen_addr() -> String {
        "0.0.0.0:8080".to_string()
    }

    fn default_data_dir() -> String {
        "/data".to_string()
    }

    pub(crate) const fn default_command_timeout() -> u64 {
        3600 // template downloads are slow
    }

    const fn default_agent_request_timeout() -> u64 {
        30
    }

    const fn default_conflict_retries() -> u32 {
        nimbus_fsm::DEFAULT_CONFLICT_RETRIES
    }

    const fn default_reconcile_interval() -> u64 {
        60
    }

    const fn default_stuck_after() -> u64 {
        7200 // 2 hours
    }

    /// Load configuration from environment variables, falling back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    ///
    /// Values that fail to parse are ignored with a warning.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(val) = lookup("LISTEN_ADDR") {
            config.listen_addr = val;
        }
        if let Some(val) = lookup("DATA_DIR") {
            config.data_dir = val;
        }
        if let Some(val) = lookup("AGENT_URL") {
            config.agent_url = Some(val).filter(|url| !url.trim().is_empty());
        }
        parse_into(&lookup, "COMMAND_TIMEOUT_SECONDS", &mut config.command_timeout_seconds);
        parse_into(
            &lookup,
            "AGENT_REQUEST_TIMEOUT_SECONDS",
            &mut config.agent_request_timeout_seconds,
        );
        parse_into(&lookup, "CONFLICT_RETRIES", &mut config.conflict_retries);
        parse_nonzero_into(
            &lookup,
            "RECONCILE_INTERVAL_SECONDS",
            &mut config.reconcile_interval_seconds,
        );
        parse_into(&lookup, "STUCK_AFTER_SECONDS", &mut config.stuck_after_seconds);

        config
    }

    /// Get the command timeout as a `Duration`.
    #[must_use]
    pub const fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_seconds)
    }

    /// Get the agent request timeout as a `Duration`.
    #[must_use]
    pub const fn agent_request_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_request_timeout_seconds)
    }

    /// Get the sweep interval as a `Duration`, never shorter than one second.
    #[must_use]
    pub const fn reconcile_interval(&self) -> Duration {
        if self.reconcile_interval_seconds == 0 {
            Duration::from_secs(1)
        } else {
            Duration::from_secs(self.reconcile_interval_seconds)
        }
    }

    /// Get the stuck threshold as a `Duration`.
    #[must_use]
    pub const fn stuck_after(&self) -> Duration {
        Duration::from_secs(self.stuck_after_seconds)
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            listen_addr: Self::default_listen_addr(),
            data_dir: Self::default_data_dir(),
            agent_url: None,
            command_timeout_seconds: Self::default_command_timeout(),
            agent_request_timeout_seconds: Self::default_agent_request_timeout(),
            conflict_retries: Self::default_conflict_retries(),
            reconcile_interval_seconds: Self::default_reconcile_interval(),
            stuck_after_seconds: Self::default_stuck_after(),
        }
    }
}

fn parse_into<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) {
    if let Some(raw) = lookup(key) {
        match raw.trim().parse() {
            Ok(value) => *target = value,
            Err(_) => tracing::warn!(key, value = %raw, "Ignoring unparseable setting"),
        }
    }
}

fn parse_nonzero_into(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut u64) {
    let mut value = *target;
    parse_into(lookup, key, &mut value);
    if value == 0 {
        tracing::warn!(key, default = *target, "Ignoring zero setting");
    } else {
        *target = value;
    }
}
