//! Group membership configuration.
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use groupbeat::config::{GroupConfig, ServerAssignor};
//!
//! let config = GroupConfig::new("orders")
//!     .with_instance_id("orders-worker-1")
//!     .with_rack("use1-az1")
//!     .with_server_assignor(ServerAssignor::Range)
//!     .with_rebalance_timeout(Duration::from_secs(30));
//! config.validate().expect("valid config");
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::constants::{
    DEFAULT_HEARTBEAT_INTERVAL_MS, DEFAULT_LEAVE_TIMEOUT_MS, DEFAULT_REBALANCE_TIMEOUT_MS,
    DEFAULT_REQUEST_TIMEOUT_MS, RANGE_ASSIGNOR, UNIFORM_ASSIGNOR,
};
use crate::error::{GroupError, Result};

/// The partition assignor the coordinator runs on the member's behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerAssignor {
    /// Spread partitions evenly, keeping existing ownership where possible.
    #[default]
    Uniform,
    /// Assign contiguous partition ranges per topic.
    Range,
}

impl ServerAssignor {
    /// Name sent to the coordinator.
    pub fn protocol_name(&self) -> &'static str {
        match self {
            ServerAssignor::Uniform => UNIFORM_ASSIGNOR,
            ServerAssignor::Range => RANGE_ASSIGNOR,
        }
    }
}

impl fmt::Display for ServerAssignor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.protocol_name())
    }
}

impl FromStr for ServerAssignor {
    type Err = GroupError;

    /// Accepts protocol names as well as the client-side balancer names they
    /// stand in for (`sticky`, `cooperative-sticky`).
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "uniform" | "sticky" | "cooperative-sticky" => Ok(ServerAssignor::Uniform),
            "range" => Ok(ServerAssignor::Range),
            other => Err(GroupError::Config(format!(
                "unknown server assignor {other:?}, expected \"uniform\" or \"range\""
            ))),
        }
    }
}

/// What the connected cluster and the client are able to do.
///
/// Filled in by the client from API version negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Opt in to the heartbeat-driven group protocol at all.
    pub next_gen_protocol: bool,
    /// The coordinator expects clients to generate their own member ids.
    pub client_member_ids: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            next_gen_protocol: true,
            client_member_ids: true,
        }
    }
}

/// Configuration for a single group membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupConfig {
    pub group_id: String,
    /// Durable identity across restarts. A member with an instance id never
    /// sends an automatic leave.
    pub instance_id: Option<String>,
    pub rack_id: Option<String>,
    pub rebalance_timeout: Duration,
    /// Interval used until the coordinator dictates one.
    pub heartbeat_interval: Duration,
    pub server_assignor: ServerAssignor,
    /// Deadline for each heartbeat round trip.
    pub request_timeout: Duration,
    /// Deadline for the best-effort leave on shutdown.
    pub leave_timeout: Duration,
    pub capabilities: Capabilities,
}

impl GroupConfig {
    /// Create a configuration with defaults for everything but the group id.
    pub fn new(group_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            instance_id: None,
            rack_id: None,
            rebalance_timeout: Duration::from_millis(DEFAULT_REBALANCE_TIMEOUT_MS),
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
            server_assignor: ServerAssignor::default(),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            leave_timeout: Duration::from_millis(DEFAULT_LEAVE_TIMEOUT_MS),
            capabilities: Capabilities::default(),
        }
    }

    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    pub fn with_rack(mut self, rack_id: impl Into<String>) -> Self {
        self.rack_id = Some(rack_id.into());
        self
    }

    pub fn with_rebalance_timeout(mut self, timeout: Duration) -> Self {
        self.rebalance_timeout = timeout;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_server_assignor(mut self, assignor: ServerAssignor) -> Self {
        self.server_assignor = assignor;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_leave_timeout(mut self, timeout: Duration) -> Self {
        self.leave_timeout = timeout;
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Whether the heartbeat-driven protocol should be attempted at all.
    pub fn should_use_next_gen(&self) -> bool {
        self.capabilities.next_gen_protocol
    }

    /// Rebalance timeout as sent on the wire, saturating at `i32::MAX`.
    pub fn rebalance_timeout_ms(&self) -> i32 {
        i32::try_from(self.rebalance_timeout.as_millis()).unwrap_or(i32::MAX)
    }

    /// Validate the configuration and return any errors found.
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.group_id.trim().is_empty() {
            errors.push("group_id must not be empty".to_string());
        }

        if matches!(&self.instance_id, Some(id) if id.trim().is_empty()) {
            errors.push("instance_id must not be empty when set".to_string());
        }

        if self.rebalance_timeout.is_zero() {
            errors.push("rebalance_timeout must be greater than 0".to_string());
        }

        if self.rebalance_timeout.as_millis() > i32::MAX as u128 {
            errors.push(format!(
                "rebalance_timeout ({:?}) must fit in a 32-bit millisecond count",
                self.rebalance_timeout
            ));
        }

        if self.heartbeat_interval.is_zero() {
            errors.push("heartbeat_interval must be greater than 0".to_string());
        }

        if self.heartbeat_interval >= self.rebalance_timeout {
            errors.push(format!(
                "heartbeat_interval ({:?}) must be less than rebalance_timeout ({:?})",
                self.heartbeat_interval, self.rebalance_timeout
            ));
        }

        if self.request_timeout.is_zero() {
            errors.push("request_timeout must be greater than 0".to_string());
        }

        if self.leave_timeout.is_zero() {
            errors.push("leave_timeout must be greater than 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Create configuration from environment variables.
    ///
    /// Environment variables:
    /// - `GROUP_ID`: Group to join (required)
    /// - `GROUP_INSTANCE_ID`: Durable member identity (optional)
    /// - `CLIENT_RACK`: Rack the client runs in (optional)
    /// - `REBALANCE_TIMEOUT_MS`: Rebalance timeout (default: 60000)
    /// - `HEARTBEAT_INTERVAL_MS`: Initial heartbeat interval (default: 3000)
    /// - `GROUP_REMOTE_ASSIGNOR`: "uniform" or "range" (default: uniform)
    pub fn from_env() -> Result<Self> {
        let group_id = std::env::var("GROUP_ID")
            .map_err(|_| GroupError::Config("GROUP_ID must be set".to_string()))?;
        let mut config = Self::new(group_id);

        config.instance_id = non_empty_var("GROUP_INSTANCE_ID");
        config.rack_id = non_empty_var("CLIENT_RACK");

        if let Some(ms) = parse_millis_var("REBALANCE_TIMEOUT_MS")? {
            config.rebalance_timeout = ms;
        }
        if let Some(ms) = parse_millis_var("HEARTBEAT_INTERVAL_MS")? {
            config.heartbeat_interval = ms;
        }
        if let Some(name) = non_empty_var("GROUP_REMOTE_ASSIGNOR") {
            config.server_assignor = name.parse()?;
        }

        config
            .validate()
            .map_err(|errors| GroupError::Config(errors.join("; ")))?;
        Ok(config)
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_millis_var(name: &str) -> Result<Option<Duration>> {
    let Some(raw) = non_empty_var(name) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<u64>()
        .map(|ms| Some(Duration::from_millis(ms)))
        .map_err(|e| GroupError::Config(format!("Invalid {name}: {e}")))
}
